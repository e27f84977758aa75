use std::collections::BTreeMap;

use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use pbi_core::{Action, AuthorSig, IssuerIdentity, PubKeyJwk, Receipt, VerificationPolicy, ACTION_VERSION, AUTHOR_SIG_ALG, RECEIPT_VERSION};
use rand_core::OsRng;
use tempfile::TempDir;

use super::*;

const RP_ID: &str = "api.kojib.com";
const ORIGIN: &str = "https://pbi.kojib.com";

fn write_pack_fixture(dir: &TempDir, count: usize) {
    std::fs::create_dir_all(dir.path().join("receipts")).unwrap();
    std::fs::create_dir_all(dir.path().join("actions")).unwrap();
    std::fs::create_dir_all(dir.path().join("pubkeys")).unwrap();

    for i in 0..count {
        let id = format!("r{i:02}");
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);
        let encoded = verifying_key.to_encoded_point(false);
        let jwk = PubKeyJwk {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: pbi_crypto::base64url_encode(encoded.x().unwrap()),
            y: Some(pbi_crypto::base64url_encode(encoded.y().unwrap())),
            kid: None,
            alg: None,
        };
        let cred_id = format!("cred-{i}");

        let mut params = BTreeMap::new();
        params.insert("to".to_string(), serde_json::json!("phi_1q2w3e4r5t"));
        params.insert("amountPhi".to_string(), serde_json::json!("13.000000"));
        params.insert("nonce".to_string(), serde_json::json!(format!("{i:08}")));
        let action = Action {
            ver: ACTION_VERSION.to_string(),
            aud: "pbi.kojib.com".to_string(),
            purpose: "transfer".to_string(),
            method: "POST".to_string(),
            path: "/v1/phi/transfer".to_string(),
            query: String::new(),
            params,
        };
        let action_hash = action.action_hash().unwrap();

        let challenge_value = pbi_crypto::base64url_encode(&[i as u8; 32]);
        let client_data = serde_json::json!({
            "type": "webauthn.get",
            "challenge": challenge_value,
            "origin": ORIGIN,
        });
        let client_data_bytes = serde_json::to_vec(&client_data).unwrap();

        let mut authenticator_data = Vec::new();
        authenticator_data.extend_from_slice(&pbi_crypto::sha256(RP_ID.as_bytes()));
        authenticator_data.push(0x05);
        authenticator_data.extend_from_slice(&pbi_crypto::u32_to_be_bytes(1));

        let client_data_hash = pbi_crypto::sha256(&client_data_bytes);
        let mut signed_message = authenticator_data.clone();
        signed_message.extend_from_slice(&client_data_hash);
        let signature: Signature = signing_key.sign(&signed_message);

        let receipt = Receipt {
            ver: RECEIPT_VERSION.to_string(),
            challenge_id: format!("chal-{i}"),
            challenge: challenge_value,
            action_hash,
            aud: "pbi.kojib.com".to_string(),
            purpose: "transfer".to_string(),
            author_sig: AuthorSig {
                alg: AUTHOR_SIG_ALG.to_string(),
                cred_id,
                authenticator_data: pbi_crypto::base64url_encode(&authenticator_data),
                client_data_json: pbi_crypto::base64url_encode(&client_data_bytes),
                signature: pbi_crypto::base64url_encode(signature.to_der().as_bytes()),
            },
        };

        std::fs::write(
            dir.path().join("receipts").join(format!("{id}.json")),
            serde_json::to_string_pretty(&receipt).unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("actions").join(format!("{id}.json")),
            serde_json::to_string_pretty(&action).unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("pubkeys").join(format!("{}.jwk.json", receipt.author_sig.cred_id)),
            serde_json::to_string_pretty(&jwk).unwrap(),
        )
        .unwrap();
    }
}

fn policy() -> VerificationPolicy {
    VerificationPolicy {
        rp_id_allow_list: vec![RP_ID.to_string()],
        origin_allow_list: vec![ORIGIN.to_string()],
        require_up: true,
        require_uv: true,
    }
}

fn issuer() -> IssuerIdentity {
    IssuerIdentity { name: "kojib".to_string(), aud: "pbi.kojib.com".to_string() }
}

#[test]
fn seal_then_verify_whole_pack_succeeds() {
    let dir = TempDir::new().unwrap();
    write_pack_fixture(&dir, 3);
    let source = FsByteSource::new(dir.path());
    let signing_key = IssuerSigningKey::Es256(SigningKey::random(&mut OsRng));

    let (manifest, proofs) = seal(
        &source,
        issuer(),
        policy(),
        chrono::Utc::now(),
        None,
        &signing_key,
    )
    .unwrap();
    assert_eq!(proofs.len(), 3);

    let report = verify_pack(&source, &manifest, &TrustMode::None, chrono::Utc::now()).unwrap();
    assert!(report.all_verified(), "{:?}", report.per_receipt);
}

#[test]
fn every_sealed_proof_verifies_independently() {
    let dir = TempDir::new().unwrap();
    write_pack_fixture(&dir, 5);
    let source = FsByteSource::new(dir.path());
    let signing_key = IssuerSigningKey::Es256(SigningKey::random(&mut OsRng));

    let (_manifest, proofs) = seal(&source, issuer(), policy(), chrono::Utc::now(), None, &signing_key).unwrap();

    for proof in &proofs {
        verify_proof(proof, &TrustMode::None, chrono::Utc::now()).unwrap();
    }
}

#[test]
fn single_leaf_pack_has_empty_sibling_list() {
    let dir = TempDir::new().unwrap();
    write_pack_fixture(&dir, 1);
    let source = FsByteSource::new(dir.path());
    let signing_key = IssuerSigningKey::Es256(SigningKey::random(&mut OsRng));

    let (manifest, proofs) = seal(&source, issuer(), policy(), chrono::Utc::now(), None, &signing_key).unwrap();
    assert_eq!(manifest.merkle.root, manifest.receipts[0].receipt_hash);
    assert!(proofs[0].merkle.siblings.is_empty());
}

#[test]
fn tampering_a_receipt_file_fails_manifest_file_hash_check() {
    let dir = TempDir::new().unwrap();
    write_pack_fixture(&dir, 2);
    let source = FsByteSource::new(dir.path());
    let signing_key = IssuerSigningKey::Es256(SigningKey::random(&mut OsRng));

    let (manifest, _proofs) = seal(&source, issuer(), policy(), chrono::Utc::now(), None, &signing_key).unwrap();

    let receipt_path = dir.path().join("receipts").join("r00.json");
    let mut bytes = std::fs::read(&receipt_path).unwrap();
    bytes.push(b' ');
    std::fs::write(&receipt_path, bytes).unwrap();

    let result = verify_pack(&source, &manifest, &TrustMode::None, chrono::Utc::now());
    assert_eq!(result.unwrap_err().code, ErrorCode::ManifestFileHashMismatch);
}

#[test]
fn reordering_receipts_in_the_manifest_breaks_verification() {
    let dir = TempDir::new().unwrap();
    write_pack_fixture(&dir, 3);
    let source = FsByteSource::new(dir.path());
    let signing_key = IssuerSigningKey::Es256(SigningKey::random(&mut OsRng));

    let (mut manifest, _proofs) = seal(&source, issuer(), policy(), chrono::Utc::now(), None, &signing_key).unwrap();
    manifest.receipts.swap(0, 1);

    let result = verify_pack(&source, &manifest, &TrustMode::None, chrono::Utc::now());
    assert!(result.is_err());
}

#[test]
fn removing_issuer_sig_does_not_change_the_pack_id() {
    let dir = TempDir::new().unwrap();
    write_pack_fixture(&dir, 2);
    let source = FsByteSource::new(dir.path());
    let signing_key = IssuerSigningKey::Es256(SigningKey::random(&mut OsRng));

    let (manifest, _proofs) = seal(&source, issuer(), policy(), chrono::Utc::now(), None, &signing_key).unwrap();
    let mut unsigned = manifest.clone();
    unsigned.issuer_sig = None;

    assert_eq!(manifest.compute_pack_id().unwrap(), unsigned.compute_pack_id().unwrap());
}

#[test]
fn ed25519_issuer_signatures_round_trip() {
    let dir = TempDir::new().unwrap();
    write_pack_fixture(&dir, 1);
    let source = FsByteSource::new(dir.path());
    let signing_key = IssuerSigningKey::Ed25519(ed25519_dalek::SigningKey::generate(&mut OsRng));

    let (manifest, _proofs) = seal(&source, issuer(), policy(), chrono::Utc::now(), None, &signing_key).unwrap();
    assert_eq!(manifest.issuer_sig.as_ref().unwrap().alg, "ed25519");

    let report = verify_pack(&source, &manifest, &TrustMode::None, chrono::Utc::now()).unwrap();
    assert!(report.all_verified());
}

#[test]
fn revoked_issuer_fails_trust_even_with_a_valid_signature() {
    let dir = TempDir::new().unwrap();
    write_pack_fixture(&dir, 1);
    let source = FsByteSource::new(dir.path());
    let signing_key = IssuerSigningKey::Es256(SigningKey::random(&mut OsRng));

    let (manifest, _proofs) = seal(&source, issuer(), policy(), chrono::Utc::now(), None, &signing_key).unwrap();
    let issuer_key_id = manifest.issuer_sig.as_ref().unwrap().key_id.clone();

    let mut roots = pbi_core::TrustRoots::new_issuer_roots();
    roots.trusted_issuers.push(pbi_core::TrustedKeyEntry {
        key_id: issuer_key_id.clone(),
        pub_key_jwk: manifest.issuer_sig.as_ref().unwrap().pub_key_jwk.clone(),
        not_before: None,
        not_after: None,
        issuer: None,
        kid: None,
    });
    roots.revoked_key_ids.push(issuer_key_id);

    let result = verify_pack(&source, &manifest, &TrustMode::Trust(roots), chrono::Utc::now());
    assert_eq!(result.unwrap_err().code, ErrorCode::IssuerRevoked);
}
