// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

//! Document shapes for the PBI verification core.
//!
//! Every type here is a plain, immutable-after-construction value with a
//! `ver` discriminator and, where the system says so, a canonical SHA-256
//! hash derived through [`pbi_canon`]. Nothing in this crate performs
//! verification; see `pbi-receipt`, `pbi-pack`, and `pbi-trust` for that.

use pbi_error::{ErrorCode, Failure};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The `ver` discriminator for [`Action`].
pub const ACTION_VERSION: &str = "pbi-action-1.0";
/// The `ver` discriminator for [`Receipt`].
pub const RECEIPT_VERSION: &str = "pbi-receipt-1.0";
/// The `ver` discriminator for [`Manifest`].
pub const MANIFEST_VERSION: &str = "pbi-pack-1.1";
/// The `ver` discriminator for [`Proof`].
pub const PROOF_VERSION: &str = "pbi-proof-1.0";
/// The `ver` discriminator for issuer [`TrustRoots`].
pub const TRUST_ISSUER_VERSION: &str = "pbi-trust-1.0";
/// The `ver` discriminator for attestor [`TrustRoots`].
pub const TRUST_ATTESTOR_VERSION: &str = "pbi-attestor-trust-1.0";
/// The `ver` discriminator for a [`ConformanceVectorFile`].
pub const CONFORMANCE_VERSION: &str = "pbi-conf-1.0";
/// The `ver` discriminator for a [`SignedTrustBundle`].
pub const SIGNED_BUNDLE_VERSION: &str = "pbi-signed-trust-bundle-1.0";

fn canon_hash<T: Serialize>(value: &T) -> Result<String, Failure> {
    let bytes = pbi_canon::canonicalize_serializable(value)
        .map_err(|_| Failure::new(ErrorCode::NonfiniteNumber))?;
    Ok(pbi_crypto::sha256_hex(&bytes))
}

/// A JSON Web Key as embedded in receipts, manifests, and trust roots.
///
/// Kept as an explicit struct rather than `serde_json::Value` so the field
/// set hashed under `canonical(pubKeyJwk)` is exactly the set this crate
/// controls; unknown members are not silently dropped because the system
/// never requires them — callers that parse third-party JWKs with extra
/// members should normalize to this shape before computing `keyId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PubKeyJwk {
    /// Key type: `"EC"` for P-256 (ES256) keys, `"OKP"` for Ed25519 keys.
    pub kty: String,
    /// Curve name: `"P-256"` or `"Ed25519"`.
    pub crv: String,
    /// The public x-coordinate (EC) or the raw public key (OKP), base64url.
    pub x: String,
    /// The public y-coordinate, base64url. Present for EC keys, absent for
    /// OKP (Ed25519) keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    /// Optional key id, carried through but not hashed into `keyId`
    /// (`keyId` is always `SHA-256(canonical(pubKeyJwk))` including this
    /// field when present — callers should omit it unless the spec source
    /// they're matching set it).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// The registration-time algorithm identifier, e.g. `-7` for ES256.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<i64>,
}

impl PubKeyJwk {
    /// `keyId := SHA-256(canonical(pubKeyJwk))`.
    ///
    /// # Errors
    ///
    /// Propagates a canonicalization failure (never expected for this type,
    /// which carries only strings and a small integer).
    pub fn key_id(&self) -> Result<String, Failure> {
        canon_hash(self)
    }
}

/// The canonical description of the operation being presence-gated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Must equal [`ACTION_VERSION`].
    pub ver: String,
    /// Audience / relying domain.
    pub aud: String,
    /// Free-form label describing why this action is being gated.
    pub purpose: String,
    /// The HTTP-style method the action represents.
    pub method: String,
    /// The HTTP-style path the action represents.
    pub path: String,
    /// The query string, verbatim (empty string if none).
    pub query: String,
    /// Arbitrary action parameters; keys and values are any JSON.
    pub params: BTreeMap<String, serde_json::Value>,
}

impl Action {
    /// `actionHash := SHA-256(canonical(action))`.
    ///
    /// # Errors
    ///
    /// Returns a [`Failure`] with [`ErrorCode::NonfiniteNumber`] if any
    /// value in `params` contains a non-finite number.
    pub fn action_hash(&self) -> Result<String, Failure> {
        canon_hash(self)
    }
}

/// The lifecycle state of a server-minted [`Challenge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeState {
    /// Minted, not yet consumed, not yet expired.
    Issued,
    /// Consumed exactly once; terminal.
    Consumed,
    /// Past its deadline without being consumed; terminal.
    Expired,
}

/// A server-minted, single-use, time-bounded challenge.
///
/// This is server-side bookkeeping, not a wire document — it is what an
/// implementation of `ChallengeStore` keeps per outstanding challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// Opaque identifier the receipt references.
    pub challenge_id: String,
    /// The opaque 32-byte value exposed as base64url, as signed by the
    /// authenticator.
    pub value_b64url: String,
    /// The purpose this challenge was minted for.
    pub purpose: String,
    /// The action hash this challenge is bound to.
    pub action_hash_hex: String,
    /// RFC 3339 deadline after which the challenge is expired.
    pub expires_at: chrono::DateTime<chrono::Utc>,
    /// Current lifecycle state.
    pub state: ChallengeState,
}

/// The `authorSig` sub-record of a [`Receipt`]: the raw WebAuthn assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSig {
    /// Always `"webauthn-es256"`.
    pub alg: String,
    /// The credential identifier, base64url.
    pub cred_id: String,
    /// The raw `authenticatorData` bytes, base64url.
    pub authenticator_data: String,
    /// The raw `clientDataJSON` bytes, base64url.
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: String,
    /// The ASN.1 DER ECDSA signature, base64url.
    pub signature: String,
}

/// The algorithm identifier expected in [`AuthorSig::alg`].
pub const AUTHOR_SIG_ALG: &str = "webauthn-es256";

/// The signed evidence of a presence ceremony.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// Must equal [`RECEIPT_VERSION`].
    pub ver: String,
    /// The challenge this receipt answers.
    pub challenge_id: String,
    /// The base64url challenge value; must match
    /// `clientDataJSON.challenge`.
    pub challenge: String,
    /// `SHA-256(canonical(action))`, hex.
    pub action_hash: String,
    /// Audience / relying domain, echoed from the action.
    pub aud: String,
    /// Purpose, echoed from the action.
    pub purpose: String,
    /// The raw WebAuthn assertion.
    pub author_sig: AuthorSig,
}

impl Receipt {
    /// `receiptHash := SHA-256(canonical(receipt))`.
    ///
    /// # Errors
    ///
    /// Propagates a canonicalization failure (not expected — every field of
    /// `Receipt` is a string).
    pub fn receipt_hash(&self) -> Result<String, Failure> {
        canon_hash(self)
    }
}

/// The set of constraints a receipt verifier must enforce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerificationPolicy {
    /// Ordered set of hostnames; a receipt's `rpIdHash` must match one.
    pub rp_id_allow_list: Vec<String>,
    /// Ordered set of exact origin strings.
    pub origin_allow_list: Vec<String>,
    /// Whether the `UP` flag must be set. Defaults to `true`.
    #[serde(default = "default_true", rename = "requireUP")]
    pub require_up: bool,
    /// Whether the `UV` flag must be set. Defaults to `true`.
    #[serde(default = "default_true", rename = "requireUV")]
    pub require_uv: bool,
}

fn default_true() -> bool {
    true
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            rp_id_allow_list: Vec::new(),
            origin_allow_list: Vec::new(),
            require_up: true,
            require_uv: true,
        }
    }
}

/// The `issuer {name, aud}` block carried by a [`Manifest`] and matched
/// against trust-root issuer constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerIdentity {
    /// The issuer's human-readable name.
    pub name: String,
    /// The audience this issuer signs for.
    pub aud: String,
}

/// The Merkle summary block embedded in a sealed [`Manifest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MerkleSummary {
    /// Always `"sha256"`.
    pub algo: String,
    /// Always `"receiptHashHex"`.
    pub leaf: String,
    /// The Merkle root, 64-hex.
    pub root: String,
    /// The number of leaves (receipts) committed.
    pub count: u64,
}

/// One row of a [`Manifest`]'s `receipts[]` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManifestReceiptEntry {
    /// The receipt's id (its filename stem).
    pub id: String,
    /// Path to the receipt file, relative to the pack root.
    pub receipt_path: String,
    /// Path to the action file, relative to the pack root.
    pub action_path: String,
    /// The credential id this receipt was signed with.
    pub cred_id: String,
    /// The receipt's canonical hash.
    pub receipt_hash: String,
    /// The action's canonical hash.
    pub action_hash: String,
}

/// The algorithm dispatch for an issuer signature, per the system's
/// "issuer-signature algorithm is a field-declared value" resolution:
/// `issuerSig.alg` is read and dispatched on, unknown values are rejected
/// as `invalid_structure` rather than assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SigAlg {
    /// ECDSA P-256 over SHA-256, DER-encoded.
    Es256,
    /// Ed25519.
    Ed25519,
}

impl SigAlg {
    /// Parse the wire string, returning `None` for anything other than
    /// `"es256"` or `"ed25519"` — callers must map `None` to
    /// `invalid_structure`, never guess.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "es256" => Some(Self::Es256),
            "ed25519" => Some(Self::Ed25519),
            _ => None,
        }
    }

    /// The wire string for this algorithm.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Es256 => "es256",
            Self::Ed25519 => "ed25519",
        }
    }
}

/// The issuer signature block of a sealed [`Manifest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSig {
    /// `"es256"` or `"ed25519"`; dispatch, never hardcode.
    pub alg: String,
    /// `SHA-256(canonical(issuer_pubKeyJwk))`.
    pub key_id: String,
    /// RFC 3339 signing timestamp.
    pub signed_at: chrono::DateTime<chrono::Utc>,
    /// The issuer's public key.
    pub pub_key_jwk: PubKeyJwk,
    /// The signature bytes, base64url. Kept as the literal `sig_b64url`
    /// on the wire per the spec's document shape — this field is the one
    /// member of `issuerSig` that is not camelCased.
    #[serde(rename = "sig_b64url")]
    pub sig_b64url: String,
}

/// The `pack {packId, prevPackId?}` block of a [`Manifest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PackIdentity {
    /// `SHA-256(canonical(manifest_without_packId_and_issuerSig))`.
    pub pack_id: String,
    /// Links to a predecessor pack's `packId`, forming a chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_pack_id: Option<String>,
}

/// A pack's root document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Must equal [`MANIFEST_VERSION`].
    pub ver: String,
    /// RFC 3339 creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// The signing issuer's identity.
    pub issuer: IssuerIdentity,
    /// The verification policy every receipt in this pack was checked
    /// against.
    pub policy: VerificationPolicy,
    /// This pack's identity and chain-of-custody link.
    pub pack: PackIdentity,
    /// The Merkle summary over `receipts[]`.
    pub merkle: MerkleSummary,
    /// One row per sealed receipt, in canonical (lexicographic filename)
    /// order.
    pub receipts: Vec<ManifestReceiptEntry>,
    /// `path -> {sha256, bytes}` for every receipt, action, and pubkey file
    /// in the pack. Proof files are never included.
    pub files: BTreeMap<String, FileEntry>,
    /// Present once the manifest has been signed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_sig: Option<IssuerSig>,
}

/// A single `files{}` entry as it actually appears on the wire: hex hash,
/// not a raw byte array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FileEntry {
    /// `sha256(file_bytes)`, lowercase hex.
    pub sha256: String,
    /// The file's length in bytes.
    pub bytes: u64,
}

impl Manifest {
    /// The manifest with both `pack.packId` and `issuerSig` cleared, i.e.
    /// the closure `packId` is computed over.
    #[must_use]
    pub fn without_pack_id_and_issuer_sig(&self) -> Manifest {
        let mut m = self.clone();
        m.pack.pack_id.clear();
        m.issuer_sig = None;
        m
    }

    /// The manifest with only `issuerSig` cleared, i.e. the closure the
    /// issuer signature is computed over.
    #[must_use]
    pub fn without_issuer_sig(&self) -> Manifest {
        let mut m = self.clone();
        m.issuer_sig = None;
        m
    }

    /// `packId := SHA-256(canonical(manifest_without_packId_and_issuerSig))`.
    ///
    /// # Errors
    ///
    /// Propagates a canonicalization failure (e.g. a non-finite number
    /// smuggled into an action's `params` and echoed nowhere in this
    /// struct — not expected in practice since this type carries no
    /// `params`, but the call is fallible because canonicalization is).
    pub fn compute_pack_id(&self) -> Result<String, Failure> {
        canon_hash(&self.without_pack_id_and_issuer_sig())
    }

    /// The bytes an issuer signs: `canonical(manifest_without_issuerSig)`.
    ///
    /// # Errors
    ///
    /// Propagates a canonicalization failure.
    pub fn signing_payload(&self) -> Result<Vec<u8>, Failure> {
        pbi_canon::canonicalize_serializable(&self.without_issuer_sig())
            .map_err(|_| Failure::new(ErrorCode::NonfiniteNumber))
    }
}

/// The Merkle block embedded in a [`Proof`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProofMerkle {
    /// Always `"sha256"`.
    pub algo: String,
    /// Always `"receiptHashHex"`.
    pub leaf: String,
    /// The Merkle root this proof folds to.
    pub root: String,
    /// This leaf's index among the pack's receipts.
    pub index: u64,
    /// The sibling hashes needed to fold up to `root`, bottom level first.
    pub siblings: Vec<String>,
}

/// The `leaf {}` block of a [`Proof`]: everything needed to independently
/// recompute and verify one receipt without the rest of the pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProofLeaf {
    /// The receipt's id.
    pub id: String,
    /// The credential id this receipt was signed with.
    pub cred_id: String,
    /// The receipt's canonical hash; must recompute from `receipt`.
    pub receipt_hash: String,
    /// The action's canonical hash; must match `receipt.actionHash`.
    pub action_hash: String,
    /// The embedded receipt document.
    pub receipt: Receipt,
    /// The embedded action document.
    pub action: Action,
    /// The credential's public key.
    pub pub_key_jwk: PubKeyJwk,
}

/// A standalone, offline-verifiable slice of a pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    /// Must equal [`PROOF_VERSION`].
    pub ver: String,
    /// RFC 3339 creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// The pack this proof was extracted from.
    pub pack_id: String,
    /// The pack's predecessor, if chained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_pack_id: Option<String>,
    /// The Merkle fold data for this specific leaf.
    pub merkle: ProofMerkle,
    /// The entire signed manifest this proof was extracted from.
    pub manifest: Manifest,
    /// The leaf payload: receipt, action, and public key, embedded in
    /// full.
    pub leaf: ProofLeaf,
}

/// One trusted key entry in a [`TrustRoots`] document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrustedKeyEntry {
    /// `SHA-256(canonical(pubKeyJwk))`; must match the recomputed value.
    pub key_id: String,
    /// The trusted public key.
    pub pub_key_jwk: PubKeyJwk,
    /// The earliest evaluation time this key is valid at, if bounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_before: Option<chrono::DateTime<chrono::Utc>>,
    /// The latest evaluation time this key is valid at. `None`/`null`
    /// means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_after: Option<chrono::DateTime<chrono::Utc>>,
    /// An issuer-only constraint: the manifest's `issuer {name, aud}` must
    /// match bit-for-bit when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<IssuerIdentity>,
    /// An attestor-only constraint: the caller-supplied key id must match
    /// when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

/// A time-scoped revocation entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Revocation {
    /// The revoked key's id.
    pub key_id: String,
    /// The revocation becomes active at this time (`revokedAt <= at`).
    pub revoked_at: chrono::DateTime<chrono::Utc>,
    /// An optional human-readable reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A trust roots document: either an issuer roots file
/// (`pbi-trust-1.0`) or an attestor roots file
/// (`pbi-attestor-trust-1.0`), distinguished only by `ver` and by which of
/// `trustedIssuers`/`trustedAttestors` is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrustRoots {
    /// [`TRUST_ISSUER_VERSION`] or [`TRUST_ATTESTOR_VERSION`].
    pub ver: String,
    /// Trusted issuer keys. Empty for an attestor-roots document.
    #[serde(default)]
    pub trusted_issuers: Vec<TrustedKeyEntry>,
    /// Trusted attestor keys. Empty for an issuer-roots document.
    #[serde(default)]
    pub trusted_attestors: Vec<TrustedKeyEntry>,
    /// Hard (unconditional) revocations.
    #[serde(default)]
    pub revoked_key_ids: Vec<String>,
    /// Time-scoped revocations.
    #[serde(default)]
    pub revocations: Vec<Revocation>,
}

impl TrustRoots {
    /// Build an empty issuer-roots document.
    #[must_use]
    pub fn new_issuer_roots() -> Self {
        Self {
            ver: TRUST_ISSUER_VERSION.to_string(),
            trusted_issuers: Vec::new(),
            trusted_attestors: Vec::new(),
            revoked_key_ids: Vec::new(),
            revocations: Vec::new(),
        }
    }

    /// Build an empty attestor-roots document.
    #[must_use]
    pub fn new_attestor_roots() -> Self {
        Self {
            ver: TRUST_ATTESTOR_VERSION.to_string(),
            trusted_issuers: Vec::new(),
            trusted_attestors: Vec::new(),
            revoked_key_ids: Vec::new(),
            revocations: Vec::new(),
        }
    }

    /// Among `trustedIssuers`, the entry effective at `at`: not hard- or
    /// time-revoked, and inside its validity window — picking the entry
    /// with the latest `notBefore` if more than one qualifies, which is
    /// the rotation bookkeeping a multi-key issuer history needs.
    ///
    /// Returns `None` if no issuer key is currently effective.
    #[must_use]
    pub fn current_issuer(&self, at: chrono::DateTime<chrono::Utc>) -> Option<&TrustedKeyEntry> {
        self.trusted_issuers
            .iter()
            .filter(|e| !self.is_hard_revoked(&e.key_id))
            .filter(|e| !self.is_time_revoked(&e.key_id, at))
            .filter(|e| e.not_before.is_none_or(|nb| at >= nb))
            .filter(|e| e.not_after.is_none_or(|na| at <= na))
            .max_by_key(|e| e.not_before)
    }

    /// Whether `key_id` appears in `revokedKeyIds[]`.
    #[must_use]
    pub fn is_hard_revoked(&self, key_id: &str) -> bool {
        self.revoked_key_ids.iter().any(|k| k == key_id)
    }

    /// Whether `key_id` has an active time-scoped revocation as of `at`.
    #[must_use]
    pub fn is_time_revoked(&self, key_id: &str, at: chrono::DateTime<chrono::Utc>) -> bool {
        self.revocations
            .iter()
            .any(|r| r.key_id == key_id && r.revoked_at <= at)
    }
}

/// A [`TrustRoots`] document (almost always an attestor-roots one)
/// wrapped in a signature minted by a root key, so that a trust-roots
/// file can itself be distributed and authenticated rather than placed
/// on disk out of band. Carries the same `alg`/`keyId`/`signedAt`/
/// `pubKeyJwk`/`sigB64url` shape as [`IssuerSig`] since signing a bundle
/// is the same operation as signing a manifest, just over a different
/// payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignedTrustBundle {
    /// Must equal [`SIGNED_BUNDLE_VERSION`].
    pub ver: String,
    /// The trust-roots document being distributed.
    pub bundle: TrustRoots,
    /// Present once the bundle has been signed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<IssuerSig>,
}

impl SignedTrustBundle {
    /// The bundle with `sig` cleared, i.e. the closure the signature is
    /// computed over.
    #[must_use]
    pub fn without_sig(&self) -> SignedTrustBundle {
        let mut b = self.clone();
        b.sig = None;
        b
    }

    /// The bytes a root key signs: `canonical(bundle_without_sig)`.
    ///
    /// # Errors
    ///
    /// Propagates a canonicalization failure.
    pub fn signing_payload(&self) -> Result<Vec<u8>, Failure> {
        pbi_canon::canonicalize_serializable(&self.without_sig())
            .map_err(|_| Failure::new(ErrorCode::NonfiniteNumber))
    }
}

/// The expected outcome of one conformance case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ConformanceExpectation {
    /// The case must verify successfully.
    Ok,
    /// The case must fail with this code.
    Error {
        /// The expected failure code.
        code: ErrorCode,
    },
}

/// One case in a [`ConformanceVectorFile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConformanceCase {
    /// A short, stable case identifier (e.g. `"valid_01"`).
    pub name: String,
    /// A human-readable description of what this case mutates.
    pub desc: String,
    /// The rpId to scope verification to.
    pub rp_id: String,
    /// The origin to scope verification to.
    pub origin: String,
    /// The action the receipt is bound to.
    pub action: Action,
    /// The receipt under test.
    pub receipt: Receipt,
    /// The credential's public key.
    pub pub_key_jwk: PubKeyJwk,
    /// What a conforming implementation must report for this case.
    pub expect: ConformanceExpectation,
}

/// A full conformance vector file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConformanceVectorFile {
    /// Must equal [`CONFORMANCE_VERSION`].
    pub ver: String,
    /// The spec identifier this vector file targets.
    pub spec: String,
    /// RFC 3339 generation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// The cases, in the order they must be evaluated and reported.
    pub cases: Vec<ConformanceCase>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_action() -> Action {
        let mut params = BTreeMap::new();
        params.insert("to".to_string(), serde_json::json!("phi_1q2w3e4r5t"));
        params.insert("amountPhi".to_string(), serde_json::json!("13.000000"));
        params.insert("nonce".to_string(), serde_json::json!("00000001"));
        Action {
            ver: ACTION_VERSION.to_string(),
            aud: "pbi.kojib.com".to_string(),
            purpose: "transfer".to_string(),
            method: "POST".to_string(),
            path: "/v1/phi/transfer".to_string(),
            query: String::new(),
            params,
        }
    }

    #[test]
    fn action_hash_is_64_hex_and_deterministic() {
        let a = sample_action();
        let h1 = a.action_hash().unwrap();
        let h2 = a.action_hash().unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(h1.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn changing_a_param_changes_the_action_hash() {
        let mut a = sample_action();
        let base = a.action_hash().unwrap();
        a.params
            .insert("amountPhi".to_string(), serde_json::json!("14.000000"));
        let mutated = a.action_hash().unwrap();
        assert_ne!(base, mutated);
    }

    #[test]
    fn pub_key_jwk_key_id_is_stable_under_field_order() {
        let jwk = PubKeyJwk {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: "abc".to_string(),
            y: Some("def".to_string()),
            kid: None,
            alg: None,
        };
        assert_eq!(jwk.key_id().unwrap(), jwk.key_id().unwrap());
    }

    #[test]
    fn verification_policy_defaults_require_both_flags() {
        let json = r#"{"rpIdAllowList":["a"],"originAllowList":["b"]}"#;
        let p: VerificationPolicy = serde_json::from_str(json).unwrap();
        assert!(p.require_up);
        assert!(p.require_uv);
    }

    #[test]
    fn sig_alg_parse_rejects_unknown_values() {
        assert_eq!(SigAlg::parse("es256"), Some(SigAlg::Es256));
        assert_eq!(SigAlg::parse("ed25519"), Some(SigAlg::Ed25519));
        assert_eq!(SigAlg::parse("rs256"), None);
    }

    #[test]
    fn manifest_pack_id_ignores_issuer_sig() {
        let manifest = sample_manifest();
        let id_before = manifest.compute_pack_id().unwrap();

        let mut signed = manifest.clone();
        signed.issuer_sig = Some(IssuerSig {
            alg: "es256".to_string(),
            key_id: "a".repeat(64),
            signed_at: chrono::Utc::now(),
            pub_key_jwk: PubKeyJwk {
                kty: "EC".to_string(),
                crv: "P-256".to_string(),
                x: "x".to_string(),
                y: Some("y".to_string()),
                kid: None,
                alg: None,
            },
            sig_b64url: "sig".to_string(),
        });
        let id_after = signed.compute_pack_id().unwrap();
        assert_eq!(id_before, id_after);
    }

    #[test]
    fn manifest_pack_id_changes_when_merkle_root_changes() {
        let manifest = sample_manifest();
        let id_before = manifest.compute_pack_id().unwrap();

        let mut mutated = manifest.clone();
        mutated.merkle.root = "f".repeat(64);
        let id_after = mutated.compute_pack_id().unwrap();
        assert_ne!(id_before, id_after);
    }

    #[test]
    fn canonical_action_bytes_are_sorted_and_whitespace_free() {
        let bytes = pbi_canon::canonicalize_serializable(&sample_action()).unwrap();
        let canonical = String::from_utf8(bytes).unwrap();
        assert_eq!(
            canonical,
            r#"{"aud":"pbi.kojib.com","method":"POST","params":{"amountPhi":"13.000000","nonce":"00000001","to":"phi_1q2w3e4r5t"},"path":"/v1/phi/transfer","purpose":"transfer","query":"","ver":"pbi-action-1.0"}"#
        );
    }

    #[test]
    fn current_issuer_skips_revoked_and_out_of_window_entries() {
        let mut roots = TrustRoots::new_issuer_roots();
        let entry = TrustedKeyEntry {
            key_id: "a".repeat(64),
            pub_key_jwk: sample_jwk(),
            not_before: None,
            not_after: None,
            issuer: None,
            kid: None,
        };
        roots.trusted_issuers.push(entry.clone());
        let now = chrono::Utc::now();
        assert!(roots.current_issuer(now).is_some());

        roots.revoked_key_ids.push(entry.key_id.clone());
        assert!(roots.current_issuer(now).is_none());
    }

    #[test]
    fn signed_trust_bundle_signing_payload_excludes_only_sig() {
        let bundle = SignedTrustBundle {
            ver: SIGNED_BUNDLE_VERSION.to_string(),
            bundle: TrustRoots::new_attestor_roots(),
            sig: None,
        };
        let mut signed = bundle.clone();
        signed.sig = Some(IssuerSig {
            alg: "es256".to_string(),
            key_id: "a".repeat(64),
            signed_at: chrono::Utc::now(),
            pub_key_jwk: sample_jwk(),
            sig_b64url: "sig".to_string(),
        });
        assert_eq!(bundle.signing_payload().unwrap(), signed.signing_payload().unwrap());
    }

    fn sample_jwk() -> PubKeyJwk {
        PubKeyJwk {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: "x".to_string(),
            y: Some("y".to_string()),
            kid: None,
            alg: None,
        }
    }

    fn sample_manifest() -> Manifest {
        Manifest {
            ver: MANIFEST_VERSION.to_string(),
            created_at: chrono::Utc::now(),
            issuer: IssuerIdentity {
                name: "kojib".to_string(),
                aud: "pbi.kojib.com".to_string(),
            },
            policy: VerificationPolicy::default(),
            pack: PackIdentity {
                pack_id: String::new(),
                prev_pack_id: None,
            },
            merkle: MerkleSummary {
                algo: "sha256".to_string(),
                leaf: "receiptHashHex".to_string(),
                root: "a".repeat(64),
                count: 1,
            },
            receipts: Vec::new(),
            files: BTreeMap::new(),
            issuer_sig: None,
        }
    }
}
