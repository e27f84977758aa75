// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pbi_core::{IssuerIdentity, VerificationPolicy};
use pbi_pack::FsByteSource;
use serde::Serialize;

/// Seal a receipts directory into a signed, Merkle-committed manifest
/// plus one offline-verifiable proof per receipt.
#[derive(Parser, Debug)]
#[command(name = "pbi-pack-seal", version, about = "Seal a receipts directory into a signed pack")]
struct Cli {
    /// The pack directory, containing `receipts/`, `actions/`, and
    /// `pubkeys/` subdirectories.
    #[arg(long = "dir")]
    dir: PathBuf,

    /// PEM-encoded issuer private key (SEC1 EC or PKCS8 Ed25519/EC).
    #[arg(long = "privkey")]
    privkey: PathBuf,

    /// Issuer name recorded in the manifest.
    #[arg(long = "issuerName", default_value = "issuer")]
    issuer_name: String,

    /// Issuer audience recorded in the manifest.
    #[arg(long = "issuerAud", default_value = "")]
    issuer_aud: String,

    /// Allow-listed rpId embedded in the manifest's verification policy.
    /// Repeatable.
    #[arg(long = "rpId", required = true)]
    rp_id: Vec<String>,

    /// Allow-listed origin embedded in the manifest's verification
    /// policy. Repeatable.
    #[arg(long = "origin", required = true)]
    origin: Vec<String>,

    /// Creation timestamp, RFC 3339. Defaults to the current time.
    #[arg(long = "createdAt")]
    created_at: Option<String>,

    /// The previous pack's `packId`, chaining this pack onto it.
    #[arg(long = "prevPackId")]
    prev_pack_id: Option<String>,

    /// Disable the authenticator user-presence requirement embedded in
    /// the manifest's verification policy. Required by default.
    #[arg(long = "no-requireUP", action = clap::ArgAction::SetFalse, default_value_t = true)]
    require_up: bool,

    /// Disable the authenticator user-verification requirement embedded
    /// in the manifest's verification policy. Required by default.
    #[arg(long = "no-requireUV", action = clap::ArgAction::SetFalse, default_value_t = true)]
    require_uv: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Serialize)]
struct SealSummary {
    #[serde(rename = "packId")]
    pack_id: String,
    #[serde(rename = "merkleRoot")]
    merkle_root: String,
    #[serde(rename = "receiptCount")]
    receipt_count: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    pbi_cli::init_tracing(cli.debug);

    let created_at = match &cli.created_at {
        Some(s) => chrono::DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("parsing --createdAt {s}"))?
            .with_timezone(&chrono::Utc),
        None => chrono::Utc::now(),
    };

    let signing_key = pbi_cli::load_signing_key_from_pem(&cli.privkey)?;
    let source = FsByteSource::new(cli.dir.clone());

    let issuer = IssuerIdentity { name: cli.issuer_name.clone(), aud: cli.issuer_aud.clone() };
    let policy = VerificationPolicy {
        rp_id_allow_list: cli.rp_id.clone(),
        origin_allow_list: cli.origin.clone(),
        require_up: cli.require_up,
        require_uv: cli.require_uv,
    };

    tracing::info!(dir = %cli.dir.display(), "sealing pack");

    let (manifest, proofs) = match pbi_pack::seal(&source, issuer, policy, created_at, cli.prev_pack_id.clone(), &signing_key)
    {
        Ok(pair) => pair,
        Err(failure) => {
            eprintln!("error: {failure}");
            std::process::exit(pbi_cli::EXIT_VERIFICATION_FAILED);
        }
    };

    std::fs::write(
        cli.dir.join("manifest.json"),
        format!("{}\n", serde_json::to_string_pretty(&manifest).context("serializing manifest")?),
    )
    .context("writing manifest.json")?;

    let proofs_dir = cli.dir.join("proofs");
    std::fs::create_dir_all(&proofs_dir).context("creating proofs/")?;
    for proof in &proofs {
        let path = proofs_dir.join(format!("{}.proof.json", proof.leaf.id));
        std::fs::write(&path, format!("{}\n", serde_json::to_string_pretty(proof).context("serializing proof")?))
            .with_context(|| format!("writing {}", path.display()))?;
    }

    pbi_cli::print_json(
        &SealSummary {
            pack_id: manifest.pack.pack_id.clone(),
            merkle_root: manifest.merkle.root.clone(),
            receipt_count: manifest.merkle.count,
        },
        true,
    )?;

    Ok(())
}
