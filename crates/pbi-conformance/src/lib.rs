// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

mod seed;

pub use seed::generate_seed_vectors;

use std::io::Write as _;
use std::process::{Command, Stdio};

use pbi_core::{Action, ConformanceExpectation, ConformanceVectorFile, PubKeyJwk, Receipt};
use pbi_error::{ErrorCode, Failure};
use pbi_receipt::InMemoryCredentialStore;
use serde::{Deserialize, Serialize};

/// The request body written to an external verifier's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRequest {
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
}

/// The response an external verifier writes to its stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    /// Whether verification succeeded.
    pub ok: bool,
    /// Present iff `ok` is `false`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    /// An optional free-form detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// The outcome of running one conformance case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseOutcome {
    /// The case's name, e.g. `"valid_01"`.
    pub name: String,
    /// The expected outcome, rendered as `"ok"` or `"err:<code>"`.
    pub expected: String,
    /// The actual outcome, rendered the same way.
    pub actual: String,
}

impl CaseOutcome {
    /// `true` iff `expected == actual`.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.expected == self.actual
    }
}

fn render_expectation(expect: &ConformanceExpectation) -> String {
    match expect {
        ConformanceExpectation::Ok => "ok".to_string(),
        ConformanceExpectation::Error { code } => format!("err:{}", code.code()),
    }
}

/// Default policy derived from a case: every rpId/origin the harness is
/// told about is allow-listed, and both presence flags are required, per
/// the seed scenarios' baseline.
fn default_policy(rp_id: &str, origin: &str) -> pbi_core::VerificationPolicy {
    pbi_core::VerificationPolicy {
        rp_id_allow_list: vec![rp_id.to_string()],
        origin_allow_list: vec![origin.to_string()],
        require_up: true,
        require_uv: true,
    }
}

/// Run every case in `vectors` against the in-process Receipt Verifier.
#[must_use]
pub fn run_in_process(vectors: &ConformanceVectorFile) -> Vec<CaseOutcome> {
    vectors
        .cases
        .iter()
        .map(|case| {
            let mut store = InMemoryCredentialStore::new();
            store.insert(case.receipt.author_sig.cred_id.clone(), case.pub_key_jwk.clone());
            let policy = default_policy(&case.rp_id, &case.origin);

            let result = pbi_receipt::verify_receipt(&case.receipt, Some(&case.action), &policy, &store, None);
            let actual = match result {
                Ok(()) => "ok".to_string(),
                Err(failure) => format!("err:{}", failure.code.code()),
            };
            CaseOutcome {
                name: case.name.clone(),
                expected: render_expectation(&case.expect),
                actual,
            }
        })
        .collect()
}

/// Run every case in `vectors` against an external verifier subprocess,
/// speaking the wire contract: one `{rpId, origin, action, receipt,
/// pubKeyJwk}` JSON object on stdin per invocation, one `{ok, code?,
/// detail?}` JSON object read back from stdout, exit code mirroring `ok`.
///
/// A fresh subprocess is spawned per case; implementations that want a
/// long-running process should wrap this with their own pooling.
///
/// # Errors
///
/// Returns a [`Failure`] if the subprocess cannot be spawned, its stdout
/// is not valid JSON, or its exit code disagrees with its own `ok` field.
pub fn run_external(
    vectors: &ConformanceVectorFile,
    program: &str,
    args: &[String],
) -> Result<Vec<CaseOutcome>, Failure> {
    vectors
        .cases
        .iter()
        .map(|case| run_external_case(case, program, args))
        .collect()
}

fn run_external_case(
    case: &pbi_core::ConformanceCase,
    program: &str,
    args: &[String],
) -> Result<CaseOutcome, Failure> {
    let request = WireRequest {
        rp_id: case.rp_id.clone(),
        origin: case.origin.clone(),
        action: case.action.clone(),
        receipt: case.receipt.clone(),
        pub_key_jwk: case.pub_key_jwk.clone(),
    };
    let request_bytes = serde_json::to_vec(&request)
        .map_err(|e| Failure::with_detail(ErrorCode::InvalidStructure, e.to_string()))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| Failure::with_detail(ErrorCode::InvalidStructure, format!("spawn {program}: {e}")))?;

    child
        .stdin
        .take()
        .expect("piped stdin")
        .write_all(&request_bytes)
        .map_err(|e| Failure::with_detail(ErrorCode::InvalidStructure, e.to_string()))?;

    let output = child
        .wait_with_output()
        .map_err(|e| Failure::with_detail(ErrorCode::InvalidStructure, e.to_string()))?;

    if output.stdout.len() > 10 * 1024 * 1024 {
        return Err(Failure::with_detail(
            ErrorCode::InvalidStructure,
            "external verifier response exceeded the 10 MiB buffer",
        ));
    }

    let response: WireResponse = serde_json::from_slice(&output.stdout).map_err(|e| {
        Failure::with_detail(ErrorCode::InvalidStructure, format!("malformed response from {program}: {e}"))
    })?;

    let exit_ok = output.status.success();
    if exit_ok != response.ok {
        return Err(Failure::with_detail(
            ErrorCode::InvalidStructure,
            format!("{program} exit code disagreed with its own ok field for case {}", case.name),
        ));
    }

    let actual = if response.ok {
        "ok".to_string()
    } else {
        let code = response
            .code
            .ok_or_else(|| Failure::with_detail(ErrorCode::InvalidStructure, "ok:false response missing code"))?;
        format!("err:{}", code.code())
    };

    Ok(CaseOutcome { name: case.name.clone(), expected: render_expectation(&case.expect), actual })
}

/// `true` iff every outcome's `expected` matched its `actual`.
#[must_use]
pub fn all_passed(outcomes: &[CaseOutcome]) -> bool {
    outcomes.iter().all(CaseOutcome::passed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_process_run_against_the_seed_vectors_passes_every_case() {
        let vectors = generate_seed_vectors(42);
        let outcomes = run_in_process(&vectors);
        assert_eq!(outcomes.len(), 8);
        for outcome in &outcomes {
            assert!(outcome.passed(), "case {} expected {} got {}", outcome.name, outcome.expected, outcome.actual);
        }
        assert!(all_passed(&outcomes));
    }

    #[test]
    fn seed_generation_is_deterministic() {
        let a = generate_seed_vectors(7);
        let b = generate_seed_vectors(7);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
