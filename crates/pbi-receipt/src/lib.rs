// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

use std::collections::HashMap;
use std::sync::Mutex;

use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::{EncodedPoint, FieldBytes};
use pbi_core::{Action, PubKeyJwk, Receipt, VerificationPolicy, AUTHOR_SIG_ALG, RECEIPT_VERSION};
use pbi_error::{ErrorCode, Failure};

/// Resolves a credential id to the authenticator's registered public key.
///
/// Modeled as an abstract capability rather than a singleton: a pack-verify
/// run constructs one backed by `pubkeys/<credId>.jwk.json` files, an online
/// verifier constructs one backed by a database. Neither introduces shared
/// mutable state into the verifier.
pub trait CredentialStore {
    /// Look up the public key registered for `cred_id`. Returns `None` if
    /// no such credential is known.
    fn lookup(&self, cred_id: &str) -> Option<PubKeyJwk>;
}

/// The result of attempting to consume a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// The challenge existed, was `Issued`, and is now `Consumed`.
    Consumed,
    /// The challenge id is not recognised.
    Unknown,
    /// The challenge existed but is past its deadline.
    Expired,
    /// The challenge existed but was already `Consumed`.
    AlreadyUsed,
}

/// Marks a server-issued challenge one-shot consumed. Only used in online
/// mode; offline verification (e.g. pack verification) never supplies one.
///
/// The `mark_consumed` call is the linearization point for single-use
/// enforcement; implementations must make it strongly consistent under
/// concurrent calls for the same challenge id.
pub trait ChallengeStore {
    /// Attempt to consume `challenge_id`, returning its outcome.
    fn mark_consumed(&self, challenge_id: &str) -> ChallengeOutcome;
}

/// A monotonic wall-clock reading, reserved for future replay-window
/// checks. The verifier proper is clock-free today; this capability exists
/// so that the pipeline's signature does not need to change when such a
/// check is added.
pub trait Clock {
    /// The current time.
    fn now(&self) -> chrono::DateTime<chrono::Utc>;
}

/// A [`Clock`] backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}

/// An in-memory [`CredentialStore`], useful for tests, the CLI's
/// single-receipt verification path, and the conformance harness.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    keys: HashMap<String, PubKeyJwk>,
}

impl InMemoryCredentialStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a credential's public key.
    pub fn insert(&mut self, cred_id: impl Into<String>, key: PubKeyJwk) {
        self.keys.insert(cred_id.into(), key);
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn lookup(&self, cred_id: &str) -> Option<PubKeyJwk> {
        self.keys.get(cred_id).cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChallengeBookkeeping {
    Issued,
    Consumed,
    Expired,
}

/// An in-memory [`ChallengeStore`], useful for tests and an online-mode
/// reference implementation.
#[derive(Debug, Default)]
pub struct InMemoryChallengeStore {
    states: Mutex<HashMap<String, ChallengeBookkeeping>>,
}

impl InMemoryChallengeStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh, not-yet-expired challenge.
    pub fn issue(&self, challenge_id: impl Into<String>) {
        self.states
            .lock()
            .expect("challenge store mutex poisoned")
            .insert(challenge_id.into(), ChallengeBookkeeping::Issued);
    }

    /// Mark a challenge expired without consuming it.
    pub fn expire(&self, challenge_id: impl Into<String>) {
        self.states
            .lock()
            .expect("challenge store mutex poisoned")
            .insert(challenge_id.into(), ChallengeBookkeeping::Expired);
    }
}

impl ChallengeStore for InMemoryChallengeStore {
    fn mark_consumed(&self, challenge_id: &str) -> ChallengeOutcome {
        let mut states = self.states.lock().expect("challenge store mutex poisoned");
        match states.get(challenge_id).copied() {
            None => ChallengeOutcome::Unknown,
            Some(ChallengeBookkeeping::Expired) => ChallengeOutcome::Expired,
            Some(ChallengeBookkeeping::Consumed) => ChallengeOutcome::AlreadyUsed,
            Some(ChallengeBookkeeping::Issued) => {
                states.insert(challenge_id.to_string(), ChallengeBookkeeping::Consumed);
                ChallengeOutcome::Consumed
            }
        }
    }
}

const UP_BIT: u8 = 0x01;
const UV_BIT: u8 = 0x04;

struct ParsedClientData {
    ty: String,
    challenge: String,
    origin: String,
}

fn parse_client_data(bytes: &[u8]) -> Result<ParsedClientData, Failure> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| Failure::with_detail(ErrorCode::InvalidStructure, "clientDataJSON is not UTF-8"))?;
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|_| Failure::with_detail(ErrorCode::InvalidStructure, "clientDataJSON is not valid JSON"))?;
    let obj = value
        .as_object()
        .ok_or_else(|| Failure::with_detail(ErrorCode::InvalidStructure, "clientDataJSON is not a JSON object"))?;
    let ty = obj
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| Failure::with_detail(ErrorCode::InvalidStructure, "clientDataJSON.type missing"))?
        .to_string();
    let challenge = obj
        .get("challenge")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| Failure::with_detail(ErrorCode::InvalidStructure, "clientDataJSON.challenge missing"))?
        .to_string();
    let origin = obj
        .get("origin")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| Failure::with_detail(ErrorCode::InvalidStructure, "clientDataJSON.origin missing"))?
        .to_string();
    Ok(ParsedClientData { ty, challenge, origin })
}

struct ParsedAuthenticatorData {
    rp_id_hash: [u8; 32],
    flags: u8,
}

fn parse_authenticator_data(bytes: &[u8]) -> Result<ParsedAuthenticatorData, Failure> {
    if bytes.len() < 37 {
        return Err(Failure::with_detail(
            ErrorCode::InvalidStructure,
            "authenticatorData must be at least 37 bytes",
        ));
    }
    let mut rp_id_hash = [0u8; 32];
    rp_id_hash.copy_from_slice(&bytes[0..32]);
    Ok(ParsedAuthenticatorData {
        rp_id_hash,
        flags: bytes[32],
    })
}

fn verifying_key_from_jwk(jwk: &PubKeyJwk) -> Result<VerifyingKey, Failure> {
    if jwk.kty != "EC" || jwk.crv != "P-256" {
        return Err(Failure::with_detail(
            ErrorCode::InvalidStructure,
            "pubKeyJwk must be an EC P-256 key",
        ));
    }
    let y = jwk
        .y
        .as_deref()
        .ok_or_else(|| Failure::with_detail(ErrorCode::InvalidStructure, "pubKeyJwk.y missing"))?;
    let x_bytes = pbi_crypto::base64url_decode(&jwk.x)
        .map_err(|_| Failure::with_detail(ErrorCode::InvalidStructure, "pubKeyJwk.x is not valid base64url"))?;
    let y_bytes = pbi_crypto::base64url_decode(y)
        .map_err(|_| Failure::with_detail(ErrorCode::InvalidStructure, "pubKeyJwk.y is not valid base64url"))?;
    if x_bytes.len() != 32 || y_bytes.len() != 32 {
        return Err(Failure::with_detail(
            ErrorCode::InvalidStructure,
            "pubKeyJwk.x/y must each be 32 bytes",
        ));
    }
    let x_arr = *FieldBytes::from_slice(&x_bytes);
    let y_arr = *FieldBytes::from_slice(&y_bytes);
    let encoded = EncodedPoint::from_affine_coordinates(&x_arr, &y_arr, false);
    VerifyingKey::from_encoded_point(&encoded)
        .map_err(|_| Failure::with_detail(ErrorCode::InvalidStructure, "pubKeyJwk is not a valid P-256 point"))
}

/// Run the normative receipt-verification pipeline.
///
/// The check order is load-bearing: structural validation, then version,
/// then (if `action` is supplied) action-hash recomputation, then
/// `clientDataJSON` parsing and its type/challenge/origin checks, then
/// `authenticatorData` parsing and its rpId/flags checks, then credential
/// lookup, then ECDSA signature verification, and only then (if
/// `challenge_store` is supplied) the one-shot challenge consume. Every
/// cryptographic step happens after every scoping step, so that a
/// verification failure never leaks timing information tied to key
/// material.
///
/// # Errors
///
/// Returns the first [`Failure`] encountered in the ordering above.
pub fn verify_receipt(
    receipt: &Receipt,
    action: Option<&Action>,
    policy: &VerificationPolicy,
    credential_store: &dyn CredentialStore,
    challenge_store: Option<&dyn ChallengeStore>,
) -> Result<(), Failure> {
    if receipt.author_sig.alg != AUTHOR_SIG_ALG {
        return Err(Failure::with_detail(
            ErrorCode::InvalidStructure,
            format!("authorSig.alg must be \"{AUTHOR_SIG_ALG}\""),
        ));
    }
    pbi_crypto::require_hex64("receipt.actionHash", &receipt.action_hash)
        .map_err(|_| Failure::with_detail(ErrorCode::InvalidStructure, "receipt.actionHash is not 64-hex"))?;

    if receipt.ver != RECEIPT_VERSION {
        return Err(Failure::with_detail(
            ErrorCode::VersionMismatch,
            format!("expected ver {RECEIPT_VERSION}, got {}", receipt.ver),
        ));
    }

    if let Some(action) = action {
        let computed = action.action_hash()?;
        if computed != receipt.action_hash {
            return Err(Failure::new(ErrorCode::ActionHashMismatch));
        }
    }

    let client_data_bytes = pbi_crypto::base64url_decode(&receipt.author_sig.client_data_json)
        .map_err(|_| Failure::with_detail(ErrorCode::InvalidStructure, "clientDataJSON is not valid base64url"))?;
    let client_data = parse_client_data(&client_data_bytes)?;

    if client_data.ty != "webauthn.get" {
        return Err(Failure::new(ErrorCode::WebauthnTypeMismatch));
    }

    if client_data.challenge != receipt.challenge {
        return Err(Failure::new(ErrorCode::ChallengeMismatch));
    }

    let origin_allowed = policy
        .origin_allow_list
        .iter()
        .any(|allowed| allowed.trim() == client_data.origin);
    if !origin_allowed {
        return Err(Failure::new(ErrorCode::OriginNotAllowed));
    }

    let authenticator_data_bytes =
        pbi_crypto::base64url_decode(&receipt.author_sig.authenticator_data).map_err(|_| {
            Failure::with_detail(ErrorCode::InvalidStructure, "authenticatorData is not valid base64url")
        })?;
    let authenticator_data = parse_authenticator_data(&authenticator_data_bytes)?;

    let rp_id_allowed = policy
        .rp_id_allow_list
        .iter()
        .any(|rp_id| pbi_crypto::sha256(rp_id.trim().as_bytes()) == authenticator_data.rp_id_hash);
    if !rp_id_allowed {
        return Err(Failure::new(ErrorCode::RpIdNotAllowed));
    }

    if policy.require_up && authenticator_data.flags & UP_BIT == 0 {
        return Err(Failure::with_detail(ErrorCode::FlagsPolicyViolation, "UP flag not set"));
    }
    if policy.require_uv && authenticator_data.flags & UV_BIT == 0 {
        return Err(Failure::with_detail(ErrorCode::FlagsPolicyViolation, "UV flag not set"));
    }

    let pub_key = credential_store
        .lookup(&receipt.author_sig.cred_id)
        .ok_or_else(|| Failure::new(ErrorCode::CredentialUnknown))?;
    let verifying_key = verifying_key_from_jwk(&pub_key)?;

    let signature_bytes = pbi_crypto::base64url_decode(&receipt.author_sig.signature)
        .map_err(|_| Failure::with_detail(ErrorCode::InvalidStructure, "signature is not valid base64url"))?;
    let signature = Signature::from_der(&signature_bytes)
        .map_err(|_| Failure::with_detail(ErrorCode::InvalidStructure, "signature is not valid ASN.1 DER"))?;

    let client_data_hash = pbi_crypto::sha256(&client_data_bytes);
    let mut signed_message = Vec::with_capacity(authenticator_data_bytes.len() + 32);
    signed_message.extend_from_slice(&authenticator_data_bytes);
    signed_message.extend_from_slice(&client_data_hash);

    verifying_key
        .verify(&signed_message, &signature)
        .map_err(|_| Failure::new(ErrorCode::SignatureInvalid))?;

    if let Some(challenge_store) = challenge_store {
        match challenge_store.mark_consumed(&receipt.challenge_id) {
            ChallengeOutcome::Consumed => {}
            ChallengeOutcome::Unknown => return Err(Failure::new(ErrorCode::ChallengeUnknown)),
            ChallengeOutcome::Expired => return Err(Failure::new(ErrorCode::ChallengeExpired)),
            ChallengeOutcome::AlreadyUsed => return Err(Failure::new(ErrorCode::ChallengeAlreadyUsed)),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Signer;
    use p256::ecdsa::SigningKey;
    use pbi_core::{AuthorSig, RECEIPT_VERSION};
    use rand_core::OsRng;
    use std::collections::BTreeMap;

    const RP_ID: &str = "api.kojib.com";
    const ORIGIN: &str = "https://pbi.kojib.com";

    struct Fixture {
        receipt: Receipt,
        action: Action,
        policy: VerificationPolicy,
        store: InMemoryCredentialStore,
    }

    fn build_fixture(flags: u8, tamper_signature: bool) -> Fixture {
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

        let mut params = BTreeMap::new();
        params.insert("to".to_string(), serde_json::json!("phi_1q2w3e4r5t"));
        params.insert("amountPhi".to_string(), serde_json::json!("13.000000"));
        params.insert("nonce".to_string(), serde_json::json!("00000001"));
        let action = Action {
            ver: pbi_core::ACTION_VERSION.to_string(),
            aud: "pbi.kojib.com".to_string(),
            purpose: "transfer".to_string(),
            method: "POST".to_string(),
            path: "/v1/phi/transfer".to_string(),
            query: String::new(),
            params,
        };
        let action_hash = action.action_hash().unwrap();

        let challenge_value = pbi_crypto::base64url_encode(&[7u8; 32]);

        let client_data = serde_json::json!({
            "type": "webauthn.get",
            "challenge": challenge_value,
            "origin": ORIGIN,
        });
        let client_data_bytes = serde_json::to_vec(&client_data).unwrap();

        let mut authenticator_data = Vec::new();
        authenticator_data.extend_from_slice(&pbi_crypto::sha256(RP_ID.as_bytes()));
        authenticator_data.push(flags);
        authenticator_data.extend_from_slice(&pbi_crypto::u32_to_be_bytes(1));

        let client_data_hash = pbi_crypto::sha256(&client_data_bytes);
        let mut signed_message = authenticator_data.clone();
        signed_message.extend_from_slice(&client_data_hash);
        let signature: Signature = signing_key.sign(&signed_message);
        let mut signature_der = signature.to_der().as_bytes().to_vec();
        if tamper_signature {
            let last = signature_der.len() - 1;
            signature_der[last] ^= 0x01;
        }

        let cred_id = "cred-1".to_string();
        let receipt = Receipt {
            ver: RECEIPT_VERSION.to_string(),
            challenge_id: "chal-1".to_string(),
            challenge: challenge_value,
            action_hash,
            aud: "pbi.kojib.com".to_string(),
            purpose: "transfer".to_string(),
            author_sig: AuthorSig {
                alg: AUTHOR_SIG_ALG.to_string(),
                cred_id: cred_id.clone(),
                authenticator_data: pbi_crypto::base64url_encode(&authenticator_data),
                client_data_json: pbi_crypto::base64url_encode(&client_data_bytes),
                signature: pbi_crypto::base64url_encode(&signature_der),
            },
        };

        let mut store = InMemoryCredentialStore::new();
        store.insert(cred_id, jwk);

        let policy = VerificationPolicy {
            rp_id_allow_list: vec![RP_ID.to_string()],
            origin_allow_list: vec![ORIGIN.to_string()],
            require_up: true,
            require_uv: true,
        };

        Fixture { receipt, action, policy, store }
    }

    #[test]
    fn valid_receipt_verifies() {
        let f = build_fixture(0x05, false);
        let result = verify_receipt(&f.receipt, Some(&f.action), &f.policy, &f.store, None);
        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let f = build_fixture(0x05, true);
        let result = verify_receipt(&f.receipt, Some(&f.action), &f.policy, &f.store, None);
        assert_eq!(result.unwrap_err().code, ErrorCode::SignatureInvalid);
    }

    #[test]
    fn missing_uv_flag_is_rejected() {
        let f = build_fixture(0x01, false);
        let result = verify_receipt(&f.receipt, Some(&f.action), &f.policy, &f.store, None);
        assert_eq!(result.unwrap_err().code, ErrorCode::FlagsPolicyViolation);
    }

    #[test]
    fn wrong_origin_is_rejected() {
        let mut f = build_fixture(0x05, false);
        f.policy.origin_allow_list = vec!["https://evil.example".to_string()];
        let result = verify_receipt(&f.receipt, Some(&f.action), &f.policy, &f.store, None);
        assert_eq!(result.unwrap_err().code, ErrorCode::OriginNotAllowed);
    }

    #[test]
    fn mismatched_action_is_rejected() {
        let mut f = build_fixture(0x05, false);
        f.action
            .params
            .insert("amountPhi".to_string(), serde_json::json!("14.000000"));
        let result = verify_receipt(&f.receipt, Some(&f.action), &f.policy, &f.store, None);
        assert_eq!(result.unwrap_err().code, ErrorCode::ActionHashMismatch);
    }

    #[test]
    fn unknown_credential_is_rejected() {
        let mut f = build_fixture(0x05, false);
        f.receipt.author_sig.cred_id = "does-not-exist".to_string();
        let result = verify_receipt(&f.receipt, Some(&f.action), &f.policy, &f.store, None);
        assert_eq!(result.unwrap_err().code, ErrorCode::CredentialUnknown);
    }

    #[test]
    fn short_authenticator_data_is_structural() {
        let mut f = build_fixture(0x05, false);
        f.receipt.author_sig.authenticator_data = pbi_crypto::base64url_encode(&[0u8; 36]);
        let result = verify_receipt(&f.receipt, Some(&f.action), &f.policy, &f.store, None);
        assert_eq!(result.unwrap_err().code, ErrorCode::InvalidStructure);
    }

    #[test]
    fn online_mode_consumes_the_challenge_exactly_once() {
        let f = build_fixture(0x05, false);
        let challenge_store = InMemoryChallengeStore::new();
        challenge_store.issue(f.receipt.challenge_id.clone());

        let first = verify_receipt(
            &f.receipt,
            Some(&f.action),
            &f.policy,
            &f.store,
            Some(&challenge_store),
        );
        assert!(first.is_ok());

        let second = verify_receipt(
            &f.receipt,
            Some(&f.action),
            &f.policy,
            &f.store,
            Some(&challenge_store),
        );
        assert_eq!(second.unwrap_err().code, ErrorCode::ChallengeAlreadyUsed);
    }
}
