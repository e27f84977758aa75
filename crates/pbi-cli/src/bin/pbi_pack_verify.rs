// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pbi_core::{Manifest, Proof};
use pbi_pack::FsByteSource;
use serde::Serialize;

/// Verify a whole pack directory, or a single air-gapped proof file.
#[derive(Parser, Debug)]
#[command(name = "pbi-pack-verify", version, about = "Verify a PBI pack or a standalone proof")]
struct Cli {
    /// A pack directory containing `manifest.json`. Mutually exclusive
    /// with `--proof`.
    #[arg(conflicts_with = "proof")]
    pack_dir: Option<PathBuf>,

    /// A standalone proof JSON file, verified without touching a
    /// filesystem pack. Mutually exclusive with the positional pack
    /// directory.
    #[arg(long = "proof")]
    proof: Option<PathBuf>,

    /// A trust-roots document to evaluate the issuer signature against.
    /// Repeatable; omit entirely to run in development mode, where any
    /// cryptographically valid issuer signature is accepted.
    #[arg(long = "trust")]
    trust: Vec<PathBuf>,

    /// Evaluation instant, RFC 3339. Defaults to the current time.
    #[arg(long = "at")]
    at: Option<String>,

    /// Pretty-print the JSON report.
    #[arg(long)]
    pretty: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Serialize)]
struct PackReport {
    ok: bool,
    #[serde(rename = "verifiedCount")]
    verified_count: usize,
    total: usize,
    #[serde(rename = "perReceipt")]
    per_receipt: Vec<ReceiptRow>,
}

#[derive(Serialize)]
struct ReceiptRow {
    id: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<pbi_error::ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    pbi_cli::init_tracing(cli.debug);

    let at = match &cli.at {
        Some(s) => chrono::DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("parsing --at {s}"))?
            .with_timezone(&chrono::Utc),
        None => chrono::Utc::now(),
    };

    let trust_mode = pbi_cli::load_trust_mode(&cli.trust)?;

    if let Some(proof_path) = &cli.proof {
        let bytes = std::fs::read(proof_path).with_context(|| format!("reading proof {}", proof_path.display()))?;
        let proof: Proof =
            serde_json::from_slice(&bytes).with_context(|| format!("parsing proof {}", proof_path.display()))?;

        let outcome = match pbi_pack::verify_proof(&proof, &trust_mode, at) {
            Ok(()) => pbi_cli::Outcome::ok(),
            Err(failure) => pbi_cli::Outcome::from_failure(&failure),
        };
        let code = outcome.print_and_exit_code(cli.pretty)?;
        std::process::exit(code);
    }

    let pack_dir = cli
        .pack_dir
        .clone()
        .context("expected a pack directory argument or --proof <file>")?;
    let manifest_bytes = std::fs::read(pack_dir.join("manifest.json"))
        .with_context(|| format!("reading {}/manifest.json", pack_dir.display()))?;
    let manifest: Manifest =
        serde_json::from_slice(&manifest_bytes).context("parsing manifest.json")?;
    let source = FsByteSource::new(pack_dir.clone());

    tracing::info!(dir = %pack_dir.display(), "verifying pack");

    match pbi_pack::verify_pack(&source, &manifest, &trust_mode, at) {
        Ok(report) => {
            let all_ok = report.all_verified();
            let rendered = PackReport {
                ok: all_ok,
                verified_count: report.verified_count,
                total: report.total,
                per_receipt: report
                    .per_receipt
                    .into_iter()
                    .map(|r| match r.result {
                        Ok(()) => ReceiptRow { id: r.id, ok: true, code: None, detail: None },
                        Err(failure) => {
                            ReceiptRow { id: r.id, ok: false, code: Some(failure.code), detail: failure.detail }
                        }
                    })
                    .collect(),
            };
            pbi_cli::print_json(&rendered, cli.pretty)?;
            std::process::exit(if all_ok { 0 } else { pbi_cli::EXIT_VERIFICATION_FAILED });
        }
        Err(failure) => {
            pbi_cli::print_json(&pbi_cli::Outcome::from_failure(&failure), cli.pretty)?;
            std::process::exit(pbi_cli::EXIT_VERIFICATION_FAILED);
        }
    }
}
