// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

//! Shared plumbing for the `pbi-*` binaries: JSON output, tracing
//! initialization, and PEM private-key loading. None of this crate's
//! logic performs verification itself — it is a thin shell over
//! `pbi-receipt`, `pbi-pack`, and `pbi-trust`.

use anyhow::{Context, Result};
use pbi_core::{PubKeyJwk, TrustRoots};
use pbi_pack::IssuerSigningKey;
use pbi_trust::TrustMode;
use serde::Serialize;

/// Exit code for a verification failure (the operation ran, but the
/// thing under test did not verify).
pub const EXIT_VERIFICATION_FAILED: i32 = 1;
/// Exit code for a usage error: bad flags, unreadable files, malformed
/// JSON that isn't itself the thing being verified.
pub const EXIT_USAGE_ERROR: i32 = 2;

/// Initialize `tracing` the way every `pbi-*` binary does: an
/// `EnvFilter` defaulting to `info`, or `debug` for this crate's own
/// target when `--debug` is passed. CLI tools are the only place in this
/// workspace that log; the library crates are silent by design.
pub fn init_tracing(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("pbi_cli=debug,pbi_pack=debug,pbi_receipt=debug")
    } else {
        tracing_subscriber::EnvFilter::new("pbi_cli=info")
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Print `value` as JSON to stdout, pretty-printed if `pretty` is set.
///
/// # Errors
///
/// Returns an error if serialization fails (never expected for the
/// plain-data types this crate prints).
pub fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    println!("{}", rendered.context("serializing output")?);
    Ok(())
}

/// The uniform outcome shape every verification-flavored binary prints:
/// `{ok, code?, detail?}`, matching the conformance harness's wire
/// contract so the same JSON a human reads from a terminal is exactly
/// what an automated caller would parse.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    /// Whether the operation verified.
    pub ok: bool,
    /// The stable failure code, present iff `ok` is `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<pbi_error::ErrorCode>,
    /// An optional free-form detail, present iff `ok` is `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Outcome {
    /// A successful outcome.
    #[must_use]
    pub fn ok() -> Self {
        Self { ok: true, code: None, detail: None }
    }

    /// A failed outcome carrying the failure's code and detail.
    #[must_use]
    pub fn from_failure(failure: &pbi_error::Failure) -> Self {
        Self { ok: false, code: Some(failure.code), detail: failure.detail.clone() }
    }

    /// Print this outcome as JSON and return the process exit code that
    /// should follow it: `0` if `ok`, [`EXIT_VERIFICATION_FAILED`]
    /// otherwise.
    pub fn print_and_exit_code(&self, pretty: bool) -> Result<i32> {
        print_json(self, pretty)?;
        Ok(if self.ok { 0 } else { EXIT_VERIFICATION_FAILED })
    }
}

/// Load a private signing key from a PEM file, dispatching on the PEM
/// label the way the pack engine dispatches on `SigAlg`: a `"EC PRIVATE
/// KEY"` label is a SEC1-encoded P-256 key (ES256); a `"PRIVATE KEY"`
/// label is PKCS8, tried as Ed25519 first and falling back to P-256
/// since PKCS8 doesn't name the curve at the label level.
///
/// # Errors
///
/// Returns an error if the file cannot be read, isn't valid PEM, or its
/// key material doesn't parse under either supported encoding.
pub fn load_signing_key_from_pem(path: &std::path::Path) -> Result<IssuerSigningKey> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading private key {}", path.display()))?;
    let parsed = pem::parse(&text).with_context(|| format!("parsing PEM {}", path.display()))?;

    match parsed.tag() {
        "EC PRIVATE KEY" => {
            let key = p256::ecdsa::SigningKey::from_sec1_der(parsed.contents())
                .context("decoding SEC1 P-256 private key")?;
            Ok(IssuerSigningKey::Es256(key))
        }
        "PRIVATE KEY" => {
            use ed25519_dalek::pkcs8::DecodePrivateKey as _;
            if let Ok(key) = ed25519_dalek::SigningKey::from_pkcs8_der(parsed.contents()) {
                return Ok(IssuerSigningKey::Ed25519(key));
            }
            use p256::pkcs8::DecodePrivateKey as _;
            let key = p256::ecdsa::SigningKey::from_pkcs8_der(parsed.contents())
                .context("PRIVATE KEY PEM is neither valid PKCS8 Ed25519 nor PKCS8 P-256")?;
            Ok(IssuerSigningKey::Es256(key))
        }
        other => anyhow::bail!("unsupported PEM label {other:?}; expected EC PRIVATE KEY or PRIVATE KEY"),
    }
}

/// Load a [`PubKeyJwk`] from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid JWK.
pub fn load_pub_key_jwk(path: &std::path::Path) -> Result<PubKeyJwk> {
    let bytes = std::fs::read(path).with_context(|| format!("reading public key {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing public key JWK {}", path.display()))
}

/// Load one or more trust-roots documents and merge them into a single
/// [`TrustMode::Trust`]. With zero paths, returns [`TrustMode::None`]:
/// development-mode, any cryptographically valid signature is accepted.
///
/// Merging is a plain union of `trustedIssuers`/`trustedAttestors`/
/// `revokedKeyIds`/`revocations` across every supplied file — callers
/// that need issuer roots and attestor roots to stay logically separate
/// should pass them as separate invocations of the commands that accept
/// this, not rely on the merge to keep them apart.
///
/// # Errors
///
/// Returns an error if any path cannot be read or parsed as a
/// [`TrustRoots`] document.
pub fn load_trust_mode(paths: &[std::path::PathBuf]) -> Result<TrustMode> {
    if paths.is_empty() {
        return Ok(TrustMode::None);
    }
    let mut merged: Option<TrustRoots> = None;
    for path in paths {
        let bytes = std::fs::read(path).with_context(|| format!("reading trust roots {}", path.display()))?;
        let roots: TrustRoots =
            serde_json::from_slice(&bytes).with_context(|| format!("parsing trust roots {}", path.display()))?;
        match &mut merged {
            None => merged = Some(roots),
            Some(acc) => {
                acc.trusted_issuers.extend(roots.trusted_issuers);
                acc.trusted_attestors.extend(roots.trusted_attestors);
                acc.revoked_key_ids.extend(roots.revoked_key_ids);
                acc.revocations.extend(roots.revocations);
            }
        }
    }
    Ok(TrustMode::Trust(merged.expect("paths is non-empty")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_trust_paths_yield_none_mode() {
        let mode = load_trust_mode(&[]).unwrap();
        assert!(matches!(mode, TrustMode::None));
    }

    #[test]
    fn outcome_ok_serializes_without_code_or_detail() {
        let rendered = serde_json::to_string(&Outcome::ok()).unwrap();
        assert_eq!(rendered, r#"{"ok":true}"#);
    }

    #[test]
    fn outcome_from_failure_carries_code_and_detail() {
        let failure = pbi_error::Failure::with_detail(pbi_error::ErrorCode::IssuerRevoked, "key r1 is revoked");
        let outcome = Outcome::from_failure(&failure);
        assert!(!outcome.ok);
        assert_eq!(outcome.code, Some(pbi_error::ErrorCode::IssuerRevoked));
        assert_eq!(outcome.detail.as_deref(), Some("key r1 is revoked"));
    }
}
