// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

use pbi_core::{IssuerIdentity, PubKeyJwk, TrustRoots};
use pbi_error::{ErrorCode, Failure};

/// How a pack verification run resolves issuer/attestor trust.
///
/// - `None`: no policy file supplied. Any signature that cryptographically
///   verifies is accepted. Development only.
/// - `Jwk`: a bare set of public keys, trusted as-is; no rotation,
///   revocation, or validity-window bookkeeping.
/// - `Trust`: the full policy document, with rotation, revocation
///   (hard and time-scoped), validity windows, and name/audience or `kid`
///   constraints. The production default.
#[derive(Debug, Clone)]
pub enum TrustMode {
    /// Accept any key.
    None,
    /// Accept only keys in this set, unconditionally.
    Jwk(Vec<PubKeyJwk>),
    /// Evaluate against a full trust-roots document.
    Trust(TrustRoots),
}

struct Codes {
    untrusted: ErrorCode,
    revoked: ErrorCode,
    not_yet_valid: ErrorCode,
    expired: ErrorCode,
}

const ISSUER_CODES: Codes = Codes {
    untrusted: ErrorCode::IssuerUntrusted,
    revoked: ErrorCode::IssuerRevoked,
    not_yet_valid: ErrorCode::IssuerNotYetValid,
    expired: ErrorCode::IssuerExpired,
};

const ATTESTOR_CODES: Codes = Codes {
    untrusted: ErrorCode::AttestorUntrusted,
    revoked: ErrorCode::AttestorRevoked,
    not_yet_valid: ErrorCode::AttestorNotYetValid,
    expired: ErrorCode::AttestorExpired,
};

fn evaluate_against_roots(
    roots: &TrustRoots,
    entries: &[pbi_core::TrustedKeyEntry],
    pub_key_jwk: &PubKeyJwk,
    supplied_kid: Option<&str>,
    at: chrono::DateTime<chrono::Utc>,
    codes: &Codes,
) -> Result<pbi_core::TrustedKeyEntry, Failure> {
    let key_id = pub_key_jwk.key_id()?;

    if roots.is_hard_revoked(&key_id) {
        return Err(Failure::new(codes.revoked));
    }
    if roots.is_time_revoked(&key_id, at) {
        return Err(Failure::new(codes.revoked));
    }

    let entry = entries
        .iter()
        .find(|e| e.key_id == key_id)
        .ok_or_else(|| Failure::new(codes.untrusted))?;

    if let Some(expected_kid) = &entry.kid {
        if supplied_kid != Some(expected_kid.as_str()) {
            return Err(Failure::new(ErrorCode::AttestorKidMismatch));
        }
    }

    if let Some(not_before) = entry.not_before {
        if at < not_before {
            return Err(Failure::new(codes.not_yet_valid));
        }
    }
    if let Some(not_after) = entry.not_after {
        if at > not_after {
            return Err(Failure::new(codes.expired));
        }
    }

    Ok(entry.clone())
}

/// Evaluate trust for a manifest's issuer key.
///
/// # Errors
///
/// Returns the first applicable failure: `issuer_revoked`,
/// `issuer_untrusted`, `issuer_not_yet_valid`, `issuer_expired`, or
/// `issuer_constraint_mismatch`.
pub fn evaluate_issuer(
    mode: &TrustMode,
    pub_key_jwk: &PubKeyJwk,
    manifest_issuer: &IssuerIdentity,
    at: chrono::DateTime<chrono::Utc>,
) -> Result<(), Failure> {
    match mode {
        TrustMode::None => Ok(()),
        TrustMode::Jwk(keys) => {
            if keys.contains(pub_key_jwk) {
                Ok(())
            } else {
                Err(Failure::new(ErrorCode::IssuerUntrusted))
            }
        }
        TrustMode::Trust(roots) => {
            let entry = evaluate_against_roots(
                roots,
                &roots.trusted_issuers,
                pub_key_jwk,
                None,
                at,
                &ISSUER_CODES,
            )?;
            if let Some(constraint) = &entry.issuer {
                if constraint != manifest_issuer {
                    return Err(Failure::new(ErrorCode::IssuerConstraintMismatch));
                }
            }
            Ok(())
        }
    }
}

/// Evaluate trust for an attestor key, optionally scoped to a
/// caller-supplied key id (`kid`) that must match the trust root's `kid`
/// constraint when one is present.
///
/// # Errors
///
/// Returns the first applicable failure: `attestor_revoked`,
/// `attestor_untrusted`, `attestor_kid_mismatch`, `attestor_not_yet_valid`,
/// or `attestor_expired`.
pub fn evaluate_attestor(
    mode: &TrustMode,
    pub_key_jwk: &PubKeyJwk,
    supplied_kid: Option<&str>,
    at: chrono::DateTime<chrono::Utc>,
) -> Result<(), Failure> {
    match mode {
        TrustMode::None => Ok(()),
        TrustMode::Jwk(keys) => {
            if keys.contains(pub_key_jwk) {
                Ok(())
            } else {
                Err(Failure::new(ErrorCode::AttestorUntrusted))
            }
        }
        TrustMode::Trust(roots) => {
            evaluate_against_roots(
                roots,
                &roots.trusted_attestors,
                pub_key_jwk,
                supplied_kid,
                at,
                &ATTESTOR_CODES,
            )
            .map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbi_core::TrustedKeyEntry;

    fn jwk(x: &str) -> PubKeyJwk {
        PubKeyJwk {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: x.to_string(),
            y: Some("y".to_string()),
            kid: None,
            alg: None,
        }
    }

    fn roots_with(entry: TrustedKeyEntry) -> TrustRoots {
        let mut roots = TrustRoots::new_issuer_roots();
        roots.trusted_issuers.push(entry);
        roots
    }

    #[test]
    fn none_mode_accepts_anything() {
        let k = jwk("x1");
        let issuer = IssuerIdentity { name: "a".to_string(), aud: "b".to_string() };
        assert!(evaluate_issuer(&TrustMode::None, &k, &issuer, chrono::Utc::now()).is_ok());
    }

    #[test]
    fn jwk_mode_rejects_keys_outside_the_set() {
        let trusted = jwk("x1");
        let other = jwk("x2");
        let issuer = IssuerIdentity { name: "a".to_string(), aud: "b".to_string() };
        let mode = TrustMode::Jwk(vec![trusted]);
        assert!(evaluate_issuer(&mode, &other, &issuer, chrono::Utc::now()).is_err());
    }

    #[test]
    fn trust_mode_rejects_hard_revoked_keys() {
        let k = jwk("x1");
        let key_id = k.key_id().unwrap();
        let mut roots = roots_with(TrustedKeyEntry {
            key_id: key_id.clone(),
            pub_key_jwk: k.clone(),
            not_before: None,
            not_after: None,
            issuer: None,
            kid: None,
        });
        roots.revoked_key_ids.push(key_id);
        let issuer = IssuerIdentity { name: "a".to_string(), aud: "b".to_string() };
        let result = evaluate_issuer(&TrustMode::Trust(roots), &k, &issuer, chrono::Utc::now());
        assert_eq!(result.unwrap_err().code, ErrorCode::IssuerRevoked);
    }

    #[test]
    fn trust_mode_rejects_outside_validity_window() {
        let k = jwk("x1");
        let key_id = k.key_id().unwrap();
        let now = chrono::Utc::now();
        let roots = roots_with(TrustedKeyEntry {
            key_id,
            pub_key_jwk: k.clone(),
            not_before: Some(now + chrono::Duration::days(1)),
            not_after: None,
            issuer: None,
            kid: None,
        });
        let issuer = IssuerIdentity { name: "a".to_string(), aud: "b".to_string() };
        let result = evaluate_issuer(&TrustMode::Trust(roots), &k, &issuer, now);
        assert_eq!(result.unwrap_err().code, ErrorCode::IssuerNotYetValid);
    }

    #[test]
    fn trust_mode_enforces_issuer_constraint() {
        let k = jwk("x1");
        let key_id = k.key_id().unwrap();
        let roots = roots_with(TrustedKeyEntry {
            key_id,
            pub_key_jwk: k.clone(),
            not_before: None,
            not_after: None,
            issuer: Some(IssuerIdentity { name: "kojib".to_string(), aud: "pbi.kojib.com".to_string() }),
            kid: None,
        });
        let wrong_issuer = IssuerIdentity { name: "other".to_string(), aud: "pbi.kojib.com".to_string() };
        let result = evaluate_issuer(&TrustMode::Trust(roots), &k, &wrong_issuer, chrono::Utc::now());
        assert_eq!(result.unwrap_err().code, ErrorCode::IssuerConstraintMismatch);
    }

    #[test]
    fn attestor_kid_mismatch_is_rejected() {
        let k = jwk("x1");
        let key_id = k.key_id().unwrap();
        let mut roots = TrustRoots::new_attestor_roots();
        roots.trusted_attestors.push(TrustedKeyEntry {
            key_id,
            pub_key_jwk: k.clone(),
            not_before: None,
            not_after: None,
            issuer: None,
            kid: Some("expected-kid".to_string()),
        });
        let result = evaluate_attestor(
            &TrustMode::Trust(roots),
            &k,
            Some("wrong-kid"),
            chrono::Utc::now(),
        );
        assert_eq!(result.unwrap_err().code, ErrorCode::AttestorKidMismatch);
    }
}
