// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pbi_core::{SignedTrustBundle, SIGNED_BUNDLE_VERSION};

/// Check that a signed attestor trust bundle was minted by a root key
/// listed in a roots file, then print the adopted bundle.
#[derive(Parser, Debug)]
#[command(name = "pbi-attestor-trust-verify", version, about = "Verify a signed attestor trust bundle")]
struct Cli {
    /// The signed bundle JSON document.
    #[arg(long = "bundle")]
    bundle: PathBuf,

    /// The roots document listing the authorities allowed to mint
    /// bundles, evaluated with the attestor trust engine: the bundle's
    /// signing key must appear in `trustedAttestors` and not be revoked
    /// or outside its validity window.
    #[arg(long = "roots")]
    roots: PathBuf,

    /// Evaluation instant, RFC 3339. Defaults to the current time.
    #[arg(long = "at")]
    at: Option<String>,

    /// Pretty-print the JSON result.
    #[arg(long)]
    pretty: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

fn verify(cli: &Cli) -> Result<Result<SignedTrustBundle, pbi_error::Failure>> {
    let at = match &cli.at {
        Some(s) => chrono::DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("parsing --at {s}"))?
            .with_timezone(&chrono::Utc),
        None => chrono::Utc::now(),
    };

    let bundle_bytes =
        std::fs::read(&cli.bundle).with_context(|| format!("reading bundle {}", cli.bundle.display()))?;
    let bundle: SignedTrustBundle = serde_json::from_slice(&bundle_bytes)
        .with_context(|| format!("parsing bundle {}", cli.bundle.display()))?;

    let roots_bytes =
        std::fs::read(&cli.roots).with_context(|| format!("reading roots {}", cli.roots.display()))?;
    let roots: pbi_core::TrustRoots = serde_json::from_slice(&roots_bytes)
        .with_context(|| format!("parsing roots {}", cli.roots.display()))?;

    let outcome = (|| -> Result<(), pbi_error::Failure> {
        if bundle.ver != SIGNED_BUNDLE_VERSION {
            return Err(pbi_error::Failure::with_detail(
                pbi_error::ErrorCode::VersionMismatch,
                format!("expected ver {SIGNED_BUNDLE_VERSION}, got {}", bundle.ver),
            ));
        }
        let sig = bundle
            .sig
            .as_ref()
            .ok_or_else(|| pbi_error::Failure::new(pbi_error::ErrorCode::IssuerSignatureInvalid))?;
        let alg = pbi_core::SigAlg::parse(&sig.alg)
            .ok_or_else(|| pbi_error::Failure::with_detail(pbi_error::ErrorCode::InvalidStructure, "unknown sig.alg"))?;
        let payload = bundle.signing_payload()?;
        pbi_pack::verify_signature(alg, &sig.pub_key_jwk, &payload, &sig.sig_b64url)?;
        pbi_trust::evaluate_attestor(&pbi_trust::TrustMode::Trust(roots), &sig.pub_key_jwk, None, at)
    })();

    Ok(outcome.map(|()| bundle))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    pbi_cli::init_tracing(cli.debug);

    match verify(&cli)? {
        Ok(bundle) => {
            pbi_cli::print_json(&bundle, cli.pretty)?;
            std::process::exit(0);
        }
        Err(failure) => {
            pbi_cli::print_json(&pbi_cli::Outcome::from_failure(&failure), cli.pretty)?;
            std::process::exit(pbi_cli::EXIT_VERIFICATION_FAILED);
        }
    }
}
