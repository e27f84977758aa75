// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The layer of the system a given [`ErrorCode`] originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Malformed input caught before any scoping or cryptographic work.
    Structural,
    /// A receipt-verification rule was violated.
    Semantic,
    /// A pack, Merkle, or trust-policy check failed.
    TrustAndPack,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Structural => "structural",
            Category::Semantic => "semantic",
            Category::TrustAndPack => "trust_and_pack",
        };
        f.write_str(s)
    }
}

/// Every error code the PBI verification core can return.
///
/// `code()` returns the exact wire string; this is what conformance vectors,
/// CLI JSON output, and cross-implementation comparisons key on. The variant
/// names and `code()` strings intentionally diverge in casing for a few
/// WebAuthn-derived fields (`rpId`) because the wire contract keeps that
/// casing; `code()` is the single source of truth, never derive it from the
/// variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // ---- Structural ----------------------------------------------------
    /// A required field is missing or has the wrong type; malformed
    /// base64url/hex; a JWK is missing required members.
    InvalidStructure,
    /// `ver` does not match the document's expected discriminator.
    VersionMismatch,
    /// A number encountered during canonicalization was `NaN` or infinite.
    NonfiniteNumber,

    // ---- Semantic (receipt) ---------------------------------------------
    /// An action was supplied and its canonical SHA-256 differs from
    /// `receipt.actionHash`.
    ActionHashMismatch,
    /// Parsed `clientDataJSON.type != "webauthn.get"`.
    WebauthnTypeMismatch,
    /// Parsed `clientDataJSON.challenge != receipt.challenge`.
    ChallengeMismatch,
    /// Parsed `clientDataJSON.origin` is not in `policy.originAllowList`.
    OriginNotAllowed,
    /// `authenticatorData[0..32]` matches no `SHA-256(rpId)` in
    /// `policy.rpIdAllowList`.
    #[serde(rename = "rpId_not_allowed")]
    RpIdNotAllowed,
    /// `UP` missing when `requireUP`, or `UV` missing when `requireUV`.
    FlagsPolicyViolation,
    /// `credentialStore.lookup(credId)` returned none.
    CredentialUnknown,
    /// ECDSA-over-SHA-256 verification of `signature` failed.
    SignatureInvalid,
    /// Online mode only: challenge id not recognised.
    ChallengeUnknown,
    /// Online mode only: challenge past its deadline.
    ChallengeExpired,
    /// Online mode only: challenge already in `Consumed` state.
    ChallengeAlreadyUsed,

    // ---- Trust / pack ----------------------------------------------------
    /// The recomputed Merkle root does not match the declared root.
    MerkleRootMismatch,
    /// The recomputed `packId` does not match the declared `packId`.
    PackIdMismatch,
    /// A file's recomputed hash/length does not match the manifest's
    /// `files{}` entry.
    ManifestFileHashMismatch,
    /// The issuer signature did not verify over the signing payload.
    IssuerSignatureInvalid,
    /// The issuer key is not present in the trust roots.
    IssuerUntrusted,
    /// The issuer key is revoked (hard or time-scoped).
    IssuerRevoked,
    /// The evaluation time is before the issuer key's `notBefore`.
    IssuerNotYetValid,
    /// The evaluation time is after the issuer key's `notAfter`.
    IssuerExpired,
    /// The manifest's issuer `{name, aud}` does not match the trust-root
    /// constraint attached to the key.
    IssuerConstraintMismatch,
    /// The attestor key is not present in the trust roots.
    AttestorUntrusted,
    /// The attestor key is revoked (hard or time-scoped).
    AttestorRevoked,
    /// The trust-root entry has a `kid` and the caller-supplied key id
    /// differs.
    AttestorKidMismatch,
    /// The evaluation time is before the attestor key's `notBefore`.
    AttestorNotYetValid,
    /// The evaluation time is after the attestor key's `notAfter`.
    AttestorExpired,
}

impl ErrorCode {
    /// The stable wire string for this code, e.g. `"origin_not_allowed"`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidStructure => "invalid_structure",
            Self::VersionMismatch => "version_mismatch",
            Self::NonfiniteNumber => "nonfinite_number",

            Self::ActionHashMismatch => "action_hash_mismatch",
            Self::WebauthnTypeMismatch => "webauthn_type_mismatch",
            Self::ChallengeMismatch => "challenge_mismatch",
            Self::OriginNotAllowed => "origin_not_allowed",
            Self::RpIdNotAllowed => "rpId_not_allowed",
            Self::FlagsPolicyViolation => "flags_policy_violation",
            Self::CredentialUnknown => "credential_unknown",
            Self::SignatureInvalid => "signature_invalid",
            Self::ChallengeUnknown => "challenge_unknown",
            Self::ChallengeExpired => "challenge_expired",
            Self::ChallengeAlreadyUsed => "challenge_already_used",

            Self::MerkleRootMismatch => "merkle_root_mismatch",
            Self::PackIdMismatch => "pack_id_mismatch",
            Self::ManifestFileHashMismatch => "manifest_file_hash_mismatch",
            Self::IssuerSignatureInvalid => "issuer_signature_invalid",
            Self::IssuerUntrusted => "issuer_untrusted",
            Self::IssuerRevoked => "issuer_revoked",
            Self::IssuerNotYetValid => "issuer_not_yet_valid",
            Self::IssuerExpired => "issuer_expired",
            Self::IssuerConstraintMismatch => "issuer_constraint_mismatch",
            Self::AttestorUntrusted => "attestor_untrusted",
            Self::AttestorRevoked => "attestor_revoked",
            Self::AttestorKidMismatch => "attestor_kid_mismatch",
            Self::AttestorNotYetValid => "attestor_not_yet_valid",
            Self::AttestorExpired => "attestor_expired",
        }
    }

    /// Which layer this code belongs to.
    #[must_use]
    pub fn category(&self) -> Category {
        match self {
            Self::InvalidStructure | Self::VersionMismatch | Self::NonfiniteNumber => {
                Category::Structural
            }
            Self::ActionHashMismatch
            | Self::WebauthnTypeMismatch
            | Self::ChallengeMismatch
            | Self::OriginNotAllowed
            | Self::RpIdNotAllowed
            | Self::FlagsPolicyViolation
            | Self::CredentialUnknown
            | Self::SignatureInvalid
            | Self::ChallengeUnknown
            | Self::ChallengeExpired
            | Self::ChallengeAlreadyUsed => Category::Semantic,
            Self::MerkleRootMismatch
            | Self::PackIdMismatch
            | Self::ManifestFileHashMismatch
            | Self::IssuerSignatureInvalid
            | Self::IssuerUntrusted
            | Self::IssuerRevoked
            | Self::IssuerNotYetValid
            | Self::IssuerExpired
            | Self::IssuerConstraintMismatch
            | Self::AttestorUntrusted
            | Self::AttestorRevoked
            | Self::AttestorKidMismatch
            | Self::AttestorNotYetValid
            | Self::AttestorExpired => Category::TrustAndPack,
        }
    }

    /// A short human-readable description, suitable for `--pretty` CLI
    /// output; never parsed by callers.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidStructure => "required field missing, wrong type, or malformed encoding",
            Self::VersionMismatch => "document version discriminator did not match",
            Self::NonfiniteNumber => "a number was NaN or infinite during canonicalization",
            Self::ActionHashMismatch => "the action's canonical hash does not match receipt.actionHash",
            Self::WebauthnTypeMismatch => "clientDataJSON.type was not \"webauthn.get\"",
            Self::ChallengeMismatch => "clientDataJSON.challenge did not match receipt.challenge",
            Self::OriginNotAllowed => "clientDataJSON.origin is not in the policy's origin allow-list",
            Self::RpIdNotAllowed => "authenticatorData's rpIdHash matched no allow-listed rpId",
            Self::FlagsPolicyViolation => "UP or UV flag requirement was not satisfied",
            Self::CredentialUnknown => "the credential store has no key for this credId",
            Self::SignatureInvalid => "the WebAuthn ECDSA signature did not verify",
            Self::ChallengeUnknown => "the challenge id is not recognised by the challenge store",
            Self::ChallengeExpired => "the challenge is past its deadline",
            Self::ChallengeAlreadyUsed => "the challenge was already consumed",
            Self::MerkleRootMismatch => "the recomputed Merkle root did not match the declared root",
            Self::PackIdMismatch => "the recomputed packId did not match the declared packId",
            Self::ManifestFileHashMismatch => "a file's hash or length did not match the manifest",
            Self::IssuerSignatureInvalid => "the issuer signature did not verify",
            Self::IssuerUntrusted => "the issuer key is not a trusted issuer",
            Self::IssuerRevoked => "the issuer key is revoked",
            Self::IssuerNotYetValid => "the evaluation time is before the issuer key's notBefore",
            Self::IssuerExpired => "the evaluation time is after the issuer key's notAfter",
            Self::IssuerConstraintMismatch => "the manifest issuer {name, aud} did not match the trust-root constraint",
            Self::AttestorUntrusted => "the attestor key is not a trusted attestor",
            Self::AttestorRevoked => "the attestor key is revoked",
            Self::AttestorKidMismatch => "the trust root's kid did not match the supplied key id",
            Self::AttestorNotYetValid => "the evaluation time is before the attestor key's notBefore",
            Self::AttestorExpired => "the evaluation time is after the attestor key's notAfter",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl std::error::Error for ErrorCode {}

/// A structured verification failure: a stable code plus an optional
/// free-form human detail. This is the value every public operation in the
/// core returns instead of a success variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Failure {
    /// The stable, closed-set failure code.
    pub code: ErrorCode,
    /// Optional free-form detail. Never parsed by callers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Failure {
    /// Construct a failure with no detail.
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self { code, detail: None }
    }

    /// Construct a failure with an attached detail message.
    #[must_use]
    pub fn with_detail(code: ErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: Some(detail.into()),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(d) => write!(f, "{}: {d}", self.code.code()),
            None => write!(f, "{}", self.code.code()),
        }
    }
}

impl std::error::Error for Failure {}

/// All error codes, in definition order. Used by the exhaustiveness catalog
/// test and by anything that wants to enumerate the full taxonomy (e.g. the
/// conformance vector generator's documentation output).
pub const ALL_CODES: &[ErrorCode] = &[
    ErrorCode::InvalidStructure,
    ErrorCode::VersionMismatch,
    ErrorCode::NonfiniteNumber,
    ErrorCode::ActionHashMismatch,
    ErrorCode::WebauthnTypeMismatch,
    ErrorCode::ChallengeMismatch,
    ErrorCode::OriginNotAllowed,
    ErrorCode::RpIdNotAllowed,
    ErrorCode::FlagsPolicyViolation,
    ErrorCode::CredentialUnknown,
    ErrorCode::SignatureInvalid,
    ErrorCode::ChallengeUnknown,
    ErrorCode::ChallengeExpired,
    ErrorCode::ChallengeAlreadyUsed,
    ErrorCode::MerkleRootMismatch,
    ErrorCode::PackIdMismatch,
    ErrorCode::ManifestFileHashMismatch,
    ErrorCode::IssuerSignatureInvalid,
    ErrorCode::IssuerUntrusted,
    ErrorCode::IssuerRevoked,
    ErrorCode::IssuerNotYetValid,
    ErrorCode::IssuerExpired,
    ErrorCode::IssuerConstraintMismatch,
    ErrorCode::AttestorUntrusted,
    ErrorCode::AttestorRevoked,
    ErrorCode::AttestorKidMismatch,
    ErrorCode::AttestorNotYetValid,
    ErrorCode::AttestorExpired,
];
