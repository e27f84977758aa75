// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

mod byte_source;
mod merkle;
mod signing;

pub use byte_source::{ByteSource, FsByteSource};
pub use merkle::{fold_proof, merkle_root, merkle_siblings};
pub use signing::{verify_signature, IssuerSigningKey};

use std::collections::{BTreeMap, HashMap};

use pbi_core::{
    Action, FileEntry, IssuerIdentity, Manifest, MerkleSummary, PackIdentity, PubKeyJwk, Proof,
    ProofLeaf, ProofMerkle, Receipt, SigAlg, VerificationPolicy, IssuerSig,
    ManifestReceiptEntry, MANIFEST_VERSION, PROOF_VERSION,
};
use pbi_error::{ErrorCode, Failure};
use pbi_receipt::CredentialStore;
use pbi_trust::TrustMode;

/// One receipt's outcome within a whole-pack verification run.
#[derive(Debug, Clone)]
pub struct ReceiptVerificationResult {
    /// The receipt's id.
    pub id: String,
    /// `Ok(())` or the failure the Receipt Verifier returned.
    pub result: Result<(), Failure>,
}

/// The outcome of a whole-pack verification run.
///
/// Only emitted when no fatal condition (file hash mismatch, `packId`
/// mismatch, Merkle root mismatch, invalid issuer signature) was hit —
/// those short-circuit verification entirely and surface as an `Err`
/// instead, per the Pack Engine's no-partial-results rule.
#[derive(Debug, Clone)]
pub struct PackVerificationReport {
    /// One entry per receipt, in manifest declared order.
    pub per_receipt: Vec<ReceiptVerificationResult>,
    /// How many receipts verified successfully.
    pub verified_count: usize,
    /// The total number of receipts in the pack.
    pub total: usize,
}

impl PackVerificationReport {
    /// `true` iff every receipt verified.
    #[must_use]
    pub fn all_verified(&self) -> bool {
        self.verified_count == self.total
    }
}

fn receipt_path(id: &str) -> String {
    format!("receipts/{id}.json")
}

fn action_path(id: &str) -> String {
    format!("actions/{id}.json")
}

fn pubkey_path(cred_id: &str) -> String {
    format!("pubkeys/{cred_id}.jwk.json")
}

fn read_json<T: serde::de::DeserializeOwned>(source: &dyn ByteSource, path: &str) -> Result<T, Failure> {
    let bytes = source.read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Failure::with_detail(ErrorCode::InvalidStructure, format!("{path}: {e}")))
}

fn file_entry_for(source: &dyn ByteSource, path: &str) -> Result<FileEntry, Failure> {
    let bytes = source.read(path)?;
    Ok(FileEntry {
        sha256: pbi_crypto::sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}

/// Seal a pack directory into a signed manifest plus one proof per
/// receipt.
///
/// Steps, in order: enumerate `receipts/` in lexicographic ASCII order
/// (the canonical receipt and Merkle-leaf order); for each receipt/action
/// pair, recompute `actionHash` and require it matches the embedded
/// value; compute the `files{}` hash map over every receipt, action, and
/// referenced pubkey file (proofs are excluded); build the Merkle tree;
/// compute `packId` over the manifest with `pack.packId` and `issuerSig`
/// both cleared; sign `canonical(manifest_without_issuerSig)`; and emit a
/// proof per receipt.
///
/// # Errors
///
/// Returns a [`Failure`] if any receipt/action pair is missing, malformed,
/// or has a recomputed `actionHash` that disagrees with the receipt.
pub fn seal(
    source: &dyn ByteSource,
    issuer: IssuerIdentity,
    policy: VerificationPolicy,
    created_at: chrono::DateTime<chrono::Utc>,
    prev_pack_id: Option<String>,
    signing_key: &IssuerSigningKey,
) -> Result<(Manifest, Vec<Proof>), Failure> {
    let mut ids = source.list_dir("receipts")?;
    ids.sort();

    let mut files: BTreeMap<String, FileEntry> = BTreeMap::new();
    let mut receipts = Vec::with_capacity(ids.len());
    let mut loaded: Vec<(String, Receipt, Action, String, String)> = Vec::with_capacity(ids.len());
    let mut pubkey_paths_seen: BTreeMap<String, ()> = BTreeMap::new();

    for id in &ids {
        let r_path = receipt_path(id);
        let a_path = action_path(id);
        let receipt: Receipt = read_json(source, &r_path)?;
        let action: Action = read_json(source, &a_path)?;

        let recomputed_action_hash = action.action_hash()?;
        if recomputed_action_hash != receipt.action_hash {
            return Err(Failure::with_detail(
                ErrorCode::ActionHashMismatch,
                format!("receipt {id}: embedded actionHash disagrees with recomputed value"),
            ));
        }
        let receipt_hash = receipt.receipt_hash()?;

        files.insert(r_path.clone(), file_entry_for(source, &r_path)?);
        files.insert(a_path.clone(), file_entry_for(source, &a_path)?);

        let pk_path = pubkey_path(&receipt.author_sig.cred_id);
        if pubkey_paths_seen.insert(pk_path.clone(), ()).is_none() {
            files.insert(pk_path.clone(), file_entry_for(source, &pk_path)?);
        }

        receipts.push(ManifestReceiptEntry {
            id: id.clone(),
            receipt_path: r_path,
            action_path: a_path,
            cred_id: receipt.author_sig.cred_id.clone(),
            receipt_hash: receipt_hash.clone(),
            action_hash: recomputed_action_hash.clone(),
        });
        loaded.push((id.clone(), receipt, action, receipt_hash, recomputed_action_hash));
    }

    let leaf_hashes: Vec<String> = loaded.iter().map(|(.., rh, _)| rh.clone()).collect();
    let root = merkle_root(&leaf_hashes)?;

    let mut manifest = Manifest {
        ver: MANIFEST_VERSION.to_string(),
        created_at,
        issuer,
        policy,
        pack: PackIdentity { pack_id: String::new(), prev_pack_id },
        merkle: MerkleSummary {
            algo: "sha256".to_string(),
            leaf: "receiptHashHex".to_string(),
            root,
            count: leaf_hashes.len() as u64,
        },
        receipts,
        files,
        issuer_sig: None,
    };

    manifest.pack.pack_id = manifest.compute_pack_id()?;

    let signing_payload = manifest.signing_payload()?;
    let sig_bytes = signing_key.sign(&signing_payload);
    let pub_key_jwk = signing_key.pub_key_jwk();
    let key_id = pub_key_jwk.key_id()?;
    manifest.issuer_sig = Some(IssuerSig {
        alg: signing_key.alg().as_str().to_string(),
        key_id,
        signed_at: created_at,
        pub_key_jwk,
        sig_b64url: pbi_crypto::base64url_encode(&sig_bytes),
    });

    let mut proofs = Vec::with_capacity(loaded.len());
    for (index, (id, receipt, action, receipt_hash, action_hash)) in loaded.into_iter().enumerate() {
        let siblings = merkle_siblings(&leaf_hashes, index)?;
        let pubkey_jwk: PubKeyJwk = read_json(source, &pubkey_path(&receipt.author_sig.cred_id))?;
        proofs.push(Proof {
            ver: PROOF_VERSION.to_string(),
            created_at,
            pack_id: manifest.pack.pack_id.clone(),
            prev_pack_id: manifest.pack.prev_pack_id.clone(),
            merkle: ProofMerkle {
                algo: "sha256".to_string(),
                leaf: "receiptHashHex".to_string(),
                root: manifest.merkle.root.clone(),
                index: index as u64,
                siblings,
            },
            manifest: manifest.clone(),
            leaf: ProofLeaf {
                id,
                cred_id: receipt.author_sig.cred_id.clone(),
                receipt_hash,
                action_hash,
                receipt,
                action,
                pub_key_jwk: pubkey_jwk,
            },
        });
    }

    Ok((manifest, proofs))
}

fn verify_issuer_signature(manifest: &Manifest) -> Result<(), Failure> {
    let issuer_sig = manifest
        .issuer_sig
        .as_ref()
        .ok_or_else(|| Failure::new(ErrorCode::IssuerSignatureInvalid))?;
    let alg = SigAlg::parse(&issuer_sig.alg)
        .ok_or_else(|| Failure::with_detail(ErrorCode::InvalidStructure, "unknown issuerSig.alg"))?;
    let payload = manifest.signing_payload()?;
    verify_signature(alg, &issuer_sig.pub_key_jwk, &payload, &issuer_sig.sig_b64url)
}

struct PackCredentialStore<'a> {
    source: &'a dyn ByteSource,
    cred_to_path: HashMap<String, String>,
}

impl CredentialStore for PackCredentialStore<'_> {
    fn lookup(&self, cred_id: &str) -> Option<PubKeyJwk> {
        let path = self.cred_to_path.get(cred_id)?;
        let bytes = self.source.read(path).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// Verify an entire pack: recompute `files{}`, `packId`, the Merkle root,
/// and (if present) the issuer signature and its trust, then run the
/// Receipt Verifier over every receipt.
///
/// Fatal conditions (`manifest_file_hash_mismatch`, `pack_id_mismatch`,
/// `merkle_root_mismatch`, an untrusted or invalid issuer signature)
/// short-circuit the whole run and return `Err` with no partial report,
/// per the Pack Engine's contract. Individual receipt failures do not
/// short-circuit; they are captured in the returned report.
///
/// # Errors
///
/// Returns the first fatal [`Failure`] encountered.
pub fn verify_pack(
    source: &dyn ByteSource,
    manifest: &Manifest,
    trust_mode: &TrustMode,
    at: chrono::DateTime<chrono::Utc>,
) -> Result<PackVerificationReport, Failure> {
    if manifest.ver != MANIFEST_VERSION {
        return Err(Failure::with_detail(
            ErrorCode::VersionMismatch,
            format!("expected ver {MANIFEST_VERSION}, got {}", manifest.ver),
        ));
    }

    for (path, recorded) in &manifest.files {
        let recomputed = file_entry_for(source, path)?;
        if recomputed.sha256 != recorded.sha256 || recomputed.bytes != recorded.bytes {
            return Err(Failure::with_detail(
                ErrorCode::ManifestFileHashMismatch,
                format!("{path} does not match its recorded hash/length"),
            ));
        }
    }

    let recomputed_pack_id = manifest.compute_pack_id()?;
    if recomputed_pack_id != manifest.pack.pack_id {
        return Err(Failure::new(ErrorCode::PackIdMismatch));
    }

    let leaf_hashes: Vec<String> = manifest.receipts.iter().map(|r| r.receipt_hash.clone()).collect();
    let recomputed_root = merkle_root(&leaf_hashes)?;
    if recomputed_root != manifest.merkle.root {
        return Err(Failure::new(ErrorCode::MerkleRootMismatch));
    }

    if manifest.issuer_sig.is_some() {
        verify_issuer_signature(manifest)?;
        let issuer_sig = manifest.issuer_sig.as_ref().expect("checked above");
        pbi_trust::evaluate_issuer(trust_mode, &issuer_sig.pub_key_jwk, &manifest.issuer, at)?;
    }

    let cred_to_path: HashMap<String, String> = manifest
        .receipts
        .iter()
        .map(|r| (r.cred_id.clone(), pubkey_path(&r.cred_id)))
        .collect();
    let credential_store = PackCredentialStore { source, cred_to_path };

    let mut per_receipt = Vec::with_capacity(manifest.receipts.len());
    let mut verified_count = 0usize;

    for row in &manifest.receipts {
        let result = (|| -> Result<(), Failure> {
            let receipt: Receipt = read_json(source, &row.receipt_path)?;
            let action: Action = read_json(source, &row.action_path)?;
            let receipt_hash = receipt.receipt_hash()?;
            let action_hash = action.action_hash()?;
            if receipt_hash != row.receipt_hash
                || action_hash != row.action_hash
                || receipt.author_sig.cred_id != row.cred_id
            {
                return Err(Failure::with_detail(
                    ErrorCode::ManifestFileHashMismatch,
                    format!("receipt {} disagrees with its manifest row", row.id),
                ));
            }
            pbi_receipt::verify_receipt(&receipt, Some(&action), &manifest.policy, &credential_store, None)
        })();

        if result.is_ok() {
            verified_count += 1;
        }
        per_receipt.push(ReceiptVerificationResult { id: row.id.clone(), result });
    }

    Ok(PackVerificationReport {
        total: manifest.receipts.len(),
        verified_count,
        per_receipt,
    })
}

struct ProofCredentialStore<'a> {
    leaf: &'a ProofLeaf,
}

impl CredentialStore for ProofCredentialStore<'_> {
    fn lookup(&self, cred_id: &str) -> Option<PubKeyJwk> {
        if cred_id == self.leaf.cred_id {
            Some(self.leaf.pub_key_jwk.clone())
        } else {
            None
        }
    }
}

/// Verify a single standalone proof, the air-gapped scenario: no
/// [`ByteSource`] is consulted, every input lives inside `proof` itself.
///
/// # Errors
///
/// Returns `version_mismatch`, `merkle_root_mismatch`, a trust failure, or
/// whatever [`pbi_receipt::verify_receipt`] returns for the embedded
/// receipt.
pub fn verify_proof(
    proof: &Proof,
    trust_mode: &TrustMode,
    at: chrono::DateTime<chrono::Utc>,
) -> Result<(), Failure> {
    if proof.ver != PROOF_VERSION {
        return Err(Failure::with_detail(
            ErrorCode::VersionMismatch,
            format!("expected ver {PROOF_VERSION}, got {}", proof.ver),
        ));
    }

    let recomputed_pack_id = proof.manifest.compute_pack_id()?;
    if recomputed_pack_id != proof.manifest.pack.pack_id || recomputed_pack_id != proof.pack_id {
        return Err(Failure::new(ErrorCode::PackIdMismatch));
    }

    if proof.manifest.issuer_sig.is_some() {
        verify_issuer_signature(&proof.manifest)?;
        let issuer_sig = proof.manifest.issuer_sig.as_ref().expect("checked above");
        pbi_trust::evaluate_issuer(trust_mode, &issuer_sig.pub_key_jwk, &proof.manifest.issuer, at)?;
    }

    let recomputed_receipt_hash = proof.leaf.receipt.receipt_hash()?;
    if recomputed_receipt_hash != proof.leaf.receipt_hash {
        return Err(Failure::new(ErrorCode::MerkleRootMismatch));
    }

    let folded = fold_proof(&proof.leaf.receipt_hash, proof.merkle.index, &proof.merkle.siblings)?;
    if folded != proof.merkle.root || folded != proof.manifest.merkle.root {
        return Err(Failure::new(ErrorCode::MerkleRootMismatch));
    }

    let recomputed_action_hash = proof.leaf.action.action_hash()?;
    if recomputed_action_hash != proof.leaf.action_hash || recomputed_action_hash != proof.leaf.receipt.action_hash {
        return Err(Failure::new(ErrorCode::ActionHashMismatch));
    }

    let credential_store = ProofCredentialStore { leaf: &proof.leaf };
    pbi_receipt::verify_receipt(
        &proof.leaf.receipt,
        Some(&proof.leaf.action),
        &proof.manifest.policy,
        &credential_store,
        None,
    )
}

#[cfg(test)]
mod tests;
