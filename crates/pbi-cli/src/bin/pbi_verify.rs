// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use std::path::PathBuf;

use clap::Parser;
use pbi_core::{Action, Receipt, VerificationPolicy};
use pbi_error::{ErrorCode, Failure};
use pbi_receipt::InMemoryCredentialStore;

/// Verify a single receipt against an action, a public key, and an
/// rpId/origin policy.
#[derive(Parser, Debug)]
#[command(name = "pbi-verify", version, about = "Verify a single PBI receipt")]
struct Cli {
    /// Path to the receipt JSON document.
    #[arg(long = "receipt")]
    receipt: PathBuf,

    /// Path to the credential's public key JWK.
    #[arg(long = "pubkey")]
    pubkey: PathBuf,

    /// Allow-listed rpId. Repeatable.
    #[arg(long = "rpId", required = true)]
    rp_id: Vec<String>,

    /// Allow-listed origin. Repeatable.
    #[arg(long = "origin", required = true)]
    origin: Vec<String>,

    /// Path to the action JSON document the receipt is bound to. Omit to
    /// skip action-hash recomputation (the receipt is still checked
    /// against its own embedded `actionHash` shape, but nothing is
    /// compared against it).
    #[arg(long = "action")]
    action: Option<PathBuf>,

    /// The credential id the receipt is expected to carry. Omit to skip
    /// this check entirely.
    #[arg(long = "credId")]
    cred_id: Option<String>,

    /// Disable the authenticator user-presence requirement. The policy
    /// requires `UP` by default.
    #[arg(long = "no-requireUP", action = clap::ArgAction::SetFalse, default_value_t = true)]
    require_up: bool,

    /// Disable the authenticator user-verification requirement. The
    /// policy requires `UV` by default.
    #[arg(long = "no-requireUV", action = clap::ArgAction::SetFalse, default_value_t = true)]
    require_uv: bool,

    /// Pretty-print the JSON result.
    #[arg(long)]
    pretty: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

fn main() {
    let cli = Cli::parse();
    pbi_cli::init_tracing(cli.debug);

    let receipt_bytes = match std::fs::read(&cli.receipt) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("error: reading receipt {}: {e}", cli.receipt.display());
            std::process::exit(pbi_cli::EXIT_USAGE_ERROR);
        }
    };
    let receipt: Receipt = match serde_json::from_slice(&receipt_bytes) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: parsing receipt {}: {e}", cli.receipt.display());
            std::process::exit(pbi_cli::EXIT_USAGE_ERROR);
        }
    };

    let action: Option<Action> = match &cli.action {
        Some(path) => match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(a) => Some(a),
                Err(e) => {
                    eprintln!("error: parsing action {}: {e}", path.display());
                    std::process::exit(pbi_cli::EXIT_USAGE_ERROR);
                }
            },
            Err(e) => {
                eprintln!("error: reading action {}: {e}", path.display());
                std::process::exit(pbi_cli::EXIT_USAGE_ERROR);
            }
        },
        None => None,
    };

    let pub_key_jwk = match pbi_cli::load_pub_key_jwk(&cli.pubkey) {
        Ok(k) => k,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(pbi_cli::EXIT_USAGE_ERROR);
        }
    };

    if let Some(expected_cred_id) = &cli.cred_id {
        if *expected_cred_id != receipt.author_sig.cred_id {
            let failure = Failure::with_detail(
                ErrorCode::InvalidStructure,
                format!("--credId {expected_cred_id} does not match receipt.authorSig.credId {}", receipt.author_sig.cred_id),
            );
            match pbi_cli::Outcome::from_failure(&failure).print_and_exit_code(cli.pretty) {
                Ok(code) => std::process::exit(code),
                Err(e) => {
                    eprintln!("error: {e:#}");
                    std::process::exit(pbi_cli::EXIT_USAGE_ERROR);
                }
            }
        }
    }

    let mut store = InMemoryCredentialStore::new();
    store.insert(receipt.author_sig.cred_id.clone(), pub_key_jwk);

    let policy = VerificationPolicy {
        rp_id_allow_list: cli.rp_id.clone(),
        origin_allow_list: cli.origin.clone(),
        require_up: cli.require_up,
        require_uv: cli.require_uv,
    };

    tracing::debug!(credId = %receipt.author_sig.cred_id, "verifying receipt");

    let outcome = match pbi_receipt::verify_receipt(&receipt, action.as_ref(), &policy, &store, None) {
        Ok(()) => pbi_cli::Outcome::ok(),
        Err(failure) => pbi_cli::Outcome::from_failure(&failure),
    };

    match outcome.print_and_exit_code(cli.pretty) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(pbi_cli::EXIT_USAGE_ERROR);
        }
    }
}
