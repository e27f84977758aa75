use std::collections::BTreeMap;

use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use pbi_core::{
    Action, AuthorSig, ConformanceCase, ConformanceExpectation, ConformanceVectorFile, PubKeyJwk,
    Receipt, ACTION_VERSION, AUTHOR_SIG_ALG, CONFORMANCE_VERSION, RECEIPT_VERSION,
};
use pbi_error::ErrorCode;
use rand::{RngCore, SeedableRng};
use rand::rngs::StdRng;

const RP_ID: &str = "api.kojib.com";
const ORIGIN: &str = "https://pbi.kojib.com";
const AUD: &str = "pbi.kojib.com";
const PURPOSE: &str = "transfer";

/// A fixed generation timestamp so the vector file this function produces
/// is byte-identical across runs for a given seed — wall-clock time plays
/// no role in conformance fixtures that get committed to a repository.
fn fixed_generation_time() -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
        .expect("valid constant")
        .with_timezone(&chrono::Utc)
}

fn baseline_action() -> Action {
    let mut params = BTreeMap::new();
    params.insert("to".to_string(), serde_json::json!("phi_1q2w3e4r5t"));
    params.insert("amountPhi".to_string(), serde_json::json!("13.000000"));
    params.insert("nonce".to_string(), serde_json::json!("00000001"));
    Action {
        ver: ACTION_VERSION.to_string(),
        aud: AUD.to_string(),
        purpose: PURPOSE.to_string(),
        method: "POST".to_string(),
        path: "/v1/phi/transfer".to_string(),
        query: String::new(),
        params,
    }
}

struct Baseline {
    action: Action,
    receipt: Receipt,
    pub_key_jwk: PubKeyJwk,
}

fn build_baseline(rng: &mut StdRng) -> Baseline {
    let signing_key = SigningKey::random(rng);
    let verifying_key = VerifyingKey::from(&signing_key);
    let encoded = verifying_key.to_encoded_point(false);
    let pub_key_jwk = PubKeyJwk {
        kty: "EC".to_string(),
        crv: "P-256".to_string(),
        x: pbi_crypto::base64url_encode(encoded.x().expect("uncompressed x")),
        y: Some(pbi_crypto::base64url_encode(encoded.y().expect("uncompressed y"))),
        kid: None,
        alg: None,
    };

    let action = baseline_action();
    let action_hash = action.action_hash().expect("action hashes");

    let mut challenge_bytes = [0u8; 32];
    rng.fill_bytes(&mut challenge_bytes);
    let challenge_value = pbi_crypto::base64url_encode(&challenge_bytes);

    let client_data = serde_json::json!({
        "type": "webauthn.get",
        "challenge": challenge_value,
        "origin": ORIGIN,
    });
    let client_data_bytes = serde_json::to_vec(&client_data).expect("serializes");

    let mut authenticator_data = Vec::new();
    authenticator_data.extend_from_slice(&pbi_crypto::sha256(RP_ID.as_bytes()));
    authenticator_data.push(0x05); // UP | UV
    authenticator_data.extend_from_slice(&pbi_crypto::u32_to_be_bytes(1));

    let client_data_hash = pbi_crypto::sha256(&client_data_bytes);
    let mut signed_message = authenticator_data.clone();
    signed_message.extend_from_slice(&client_data_hash);
    let signature: Signature = signing_key.sign(&signed_message);

    let receipt = Receipt {
        ver: RECEIPT_VERSION.to_string(),
        challenge_id: "chal-seed".to_string(),
        challenge: challenge_value,
        action_hash,
        aud: AUD.to_string(),
        purpose: PURPOSE.to_string(),
        author_sig: AuthorSig {
            alg: AUTHOR_SIG_ALG.to_string(),
            cred_id: "cred-seed".to_string(),
            authenticator_data: pbi_crypto::base64url_encode(&authenticator_data),
            client_data_json: pbi_crypto::base64url_encode(&client_data_bytes),
            signature: pbi_crypto::base64url_encode(signature.to_der().as_bytes()),
        },
    };

    Baseline { action, receipt, pub_key_jwk }
}

fn decode_client_data(receipt: &Receipt) -> serde_json::Value {
    let bytes = pbi_crypto::base64url_decode(&receipt.author_sig.client_data_json).expect("valid base64url");
    serde_json::from_slice(&bytes).expect("valid json")
}

fn encode_client_data(value: &serde_json::Value) -> String {
    pbi_crypto::base64url_encode(&serde_json::to_vec(value).expect("serializes"))
}

fn case(name: &str, desc: &str, action: Action, receipt: Receipt, pub_key_jwk: PubKeyJwk, expect: ConformanceExpectation) -> ConformanceCase {
    ConformanceCase {
        name: name.to_string(),
        desc: desc.to_string(),
        rp_id: RP_ID.to_string(),
        origin: ORIGIN.to_string(),
        action,
        receipt,
        pub_key_jwk,
        expect,
    }
}

/// Generate the eight seed conformance cases: one valid baseline, then
/// one minimal single-field mutation per failure code, deterministic
/// given `seed`.
#[must_use]
pub fn generate_seed_vectors(seed: u64) -> ConformanceVectorFile {
    let mut rng = StdRng::seed_from_u64(seed);
    let baseline = build_baseline(&mut rng);

    let mut cases = Vec::with_capacity(8);

    cases.push(case(
        "valid_01",
        "untouched baseline",
        baseline.action.clone(),
        baseline.receipt.clone(),
        baseline.pub_key_jwk.clone(),
        ConformanceExpectation::Ok,
    ));

    {
        let mut receipt = baseline.receipt.clone();
        let mut client_data = decode_client_data(&receipt);
        client_data["origin"] = serde_json::json!("https://evil.example");
        receipt.author_sig.client_data_json = encode_client_data(&client_data);
        cases.push(case(
            "invalid_origin_01",
            "clientDataJSON.origin mutated to an unlisted origin",
            baseline.action.clone(),
            receipt,
            baseline.pub_key_jwk.clone(),
            ConformanceExpectation::Error { code: ErrorCode::OriginNotAllowed },
        ));
    }

    {
        let mut receipt = baseline.receipt.clone();
        let mut client_data = decode_client_data(&receipt);
        client_data["type"] = serde_json::json!("webauthn.create");
        receipt.author_sig.client_data_json = encode_client_data(&client_data);
        cases.push(case(
            "webauthn_type_mismatch_01",
            "clientDataJSON.type mutated away from webauthn.get",
            baseline.action.clone(),
            receipt,
            baseline.pub_key_jwk.clone(),
            ConformanceExpectation::Error { code: ErrorCode::WebauthnTypeMismatch },
        ));
    }

    {
        let mut receipt = baseline.receipt.clone();
        let mut fresh = [0u8; 32];
        rng.fill_bytes(&mut fresh);
        receipt.challenge = pbi_crypto::base64url_encode(&fresh);
        cases.push(case(
            "challenge_mismatch_01",
            "receipt.challenge replaced with a fresh random value",
            baseline.action.clone(),
            receipt,
            baseline.pub_key_jwk.clone(),
            ConformanceExpectation::Error { code: ErrorCode::ChallengeMismatch },
        ));
    }

    {
        let mut receipt = baseline.receipt.clone();
        let mut authenticator_data =
            pbi_crypto::base64url_decode(&receipt.author_sig.authenticator_data).expect("valid base64url");
        let evil_rp_id_hash = pbi_crypto::sha256(b"evil.example");
        authenticator_data[0..32].copy_from_slice(&evil_rp_id_hash);
        receipt.author_sig.authenticator_data = pbi_crypto::base64url_encode(&authenticator_data);
        cases.push(case(
            "rpId_not_allowed_01",
            "authenticatorData's rpIdHash overwritten with an unlisted rpId's hash",
            baseline.action.clone(),
            receipt,
            baseline.pub_key_jwk.clone(),
            ConformanceExpectation::Error { code: ErrorCode::RpIdNotAllowed },
        ));
    }

    {
        let mut receipt = baseline.receipt.clone();
        let mut authenticator_data =
            pbi_crypto::base64url_decode(&receipt.author_sig.authenticator_data).expect("valid base64url");
        authenticator_data[32] = 0x01; // UP only, UV cleared
        receipt.author_sig.authenticator_data = pbi_crypto::base64url_encode(&authenticator_data);
        cases.push(case(
            "flags_policy_violation_uv_01",
            "authenticatorData flags byte cleared to UP-only while requireUV is true",
            baseline.action.clone(),
            receipt,
            baseline.pub_key_jwk.clone(),
            ConformanceExpectation::Error { code: ErrorCode::FlagsPolicyViolation },
        ));
    }

    {
        let mut action = baseline.action.clone();
        action
            .params
            .insert("amountPhi".to_string(), serde_json::json!("14.000000"));
        cases.push(case(
            "action_hash_mismatch_01",
            "action.params.amountPhi changed while the receipt keeps the original actionHash",
            action,
            baseline.receipt.clone(),
            baseline.pub_key_jwk.clone(),
            ConformanceExpectation::Error { code: ErrorCode::ActionHashMismatch },
        ));
    }

    {
        let mut receipt = baseline.receipt.clone();
        let mut signature_bytes =
            pbi_crypto::base64url_decode(&receipt.author_sig.signature).expect("valid base64url");
        let last = signature_bytes.len() - 1;
        signature_bytes[last] ^= 0x01;
        receipt.author_sig.signature = pbi_crypto::base64url_encode(&signature_bytes);
        cases.push(case(
            "invalid_signature_01",
            "last signature byte XORed with 0x01",
            baseline.action.clone(),
            receipt,
            baseline.pub_key_jwk.clone(),
            ConformanceExpectation::Error { code: ErrorCode::SignatureInvalid },
        ));
    }

    ConformanceVectorFile {
        ver: CONFORMANCE_VERSION.to_string(),
        spec: "pbi-verification-core".to_string(),
        created_at: fixed_generation_time(),
        cases,
    }
}
