// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

//! Builds two chained packs end to end, verifies them, then narrates two
//! deliberate negative paths: revoking the issuer key, and letting it
//! expire. Nothing here is load-bearing for the library crates; this is
//! a demonstration harness only.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use pbi_core::{
    Action, AuthorSig, IssuerIdentity, PubKeyJwk, Receipt, TrustedKeyEntry, TrustRoots,
    VerificationPolicy, ACTION_VERSION, AUTHOR_SIG_ALG, RECEIPT_VERSION,
};
use pbi_pack::{FsByteSource, IssuerSigningKey};
use pbi_trust::TrustMode;
use rand_core::OsRng;
use serde::Serialize;

const RP_ID: &str = "api.kojib.com";
const ORIGIN: &str = "https://pbi.kojib.com";
const AUD: &str = "pbi.kojib.com";
const PURPOSE: &str = "transfer";

/// Build two chained PBI packs and narrate the happy path plus two
/// negative trust-policy paths.
#[derive(Parser, Debug)]
#[command(name = "pbi-pack-demo", version, about = "Narrated end-to-end PBI pack demo")]
struct Cli {
    /// Directory the demo writes its packs into. Removed and recreated
    /// if it already exists.
    #[arg(long = "outDir", default_value = "pbi-pack-demo")]
    out_dir: PathBuf,

    /// PEM-encoded issuer private key. Omit to generate an ephemeral
    /// ES256 key for this run only.
    #[arg(long = "privkey")]
    privkey: Option<PathBuf>,

    /// Pretty-print the JSON narration.
    #[arg(long)]
    pretty: bool,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[derive(Serialize)]
struct Step {
    name: String,
    expected: String,
    actual: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl Step {
    fn matched(&self) -> bool {
        self.expected == self.actual
    }
}

fn render(result: &Result<pbi_pack::PackVerificationReport, pbi_error::Failure>) -> (String, Option<String>) {
    match result {
        Ok(report) if report.all_verified() => ("ok".to_string(), None),
        Ok(report) => (
            "err:partial".to_string(),
            Some(format!("{}/{} receipts verified", report.verified_count, report.total)),
        ),
        Err(failure) => (format!("err:{}", failure.code.code()), failure.detail.clone()),
    }
}

fn write_fixture_pack(dir: &Path, prefix: &str, count: usize, nonce_start: u32) -> Result<()> {
    std::fs::create_dir_all(dir.join("receipts"))?;
    std::fs::create_dir_all(dir.join("actions"))?;
    std::fs::create_dir_all(dir.join("pubkeys"))?;

    for i in 0..count {
        let id = format!("{prefix}{i:02}");
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);
        let encoded = verifying_key.to_encoded_point(false);
        let jwk = PubKeyJwk {
            kty: "EC".to_string(),
            crv: "P-256".to_string(),
            x: pbi_crypto::base64url_encode(encoded.x().expect("uncompressed x")),
            y: Some(pbi_crypto::base64url_encode(encoded.y().expect("uncompressed y"))),
            kid: None,
            alg: None,
        };
        let cred_id = format!("cred-{prefix}{i}");

        let mut params = BTreeMap::new();
        params.insert("to".to_string(), serde_json::json!("phi_1q2w3e4r5t"));
        params.insert("amountPhi".to_string(), serde_json::json!("13.000000"));
        params.insert("nonce".to_string(), serde_json::json!(format!("{:08}", nonce_start + i as u32)));
        let action = Action {
            ver: ACTION_VERSION.to_string(),
            aud: AUD.to_string(),
            purpose: PURPOSE.to_string(),
            method: "POST".to_string(),
            path: "/v1/phi/transfer".to_string(),
            query: String::new(),
            params,
        };
        let action_hash = action.action_hash().map_err(|e| anyhow::anyhow!("{e}"))?;

        let challenge_value = pbi_crypto::base64url_encode(&[(nonce_start as u8).wrapping_add(i as u8); 32]);
        let client_data = serde_json::json!({
            "type": "webauthn.get",
            "challenge": challenge_value,
            "origin": ORIGIN,
        });
        let client_data_bytes = serde_json::to_vec(&client_data)?;

        let mut authenticator_data = Vec::new();
        authenticator_data.extend_from_slice(&pbi_crypto::sha256(RP_ID.as_bytes()));
        authenticator_data.push(0x05);
        authenticator_data.extend_from_slice(&pbi_crypto::u32_to_be_bytes(1));

        let client_data_hash = pbi_crypto::sha256(&client_data_bytes);
        let mut signed_message = authenticator_data.clone();
        signed_message.extend_from_slice(&client_data_hash);
        let signature: Signature = signing_key.sign(&signed_message);

        let receipt = Receipt {
            ver: RECEIPT_VERSION.to_string(),
            challenge_id: format!("chal-{prefix}{i}"),
            challenge: challenge_value,
            action_hash,
            aud: AUD.to_string(),
            purpose: PURPOSE.to_string(),
            author_sig: AuthorSig {
                alg: AUTHOR_SIG_ALG.to_string(),
                cred_id,
                authenticator_data: pbi_crypto::base64url_encode(&authenticator_data),
                client_data_json: pbi_crypto::base64url_encode(&client_data_bytes),
                signature: pbi_crypto::base64url_encode(signature.to_der().as_bytes()),
            },
        };

        std::fs::write(dir.join("receipts").join(format!("{id}.json")), format!("{}\n", serde_json::to_string_pretty(&receipt)?))?;
        std::fs::write(dir.join("actions").join(format!("{id}.json")), format!("{}\n", serde_json::to_string_pretty(&action)?))?;
        std::fs::write(
            dir.join("pubkeys").join(format!("{}.jwk.json", receipt.author_sig.cred_id)),
            format!("{}\n", serde_json::to_string_pretty(&jwk)?),
        )?;
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<Vec<Step>> {
    if cli.out_dir.exists() {
        std::fs::remove_dir_all(&cli.out_dir).context("clearing previous demo output")?;
    }
    std::fs::create_dir_all(&cli.out_dir)?;

    let signing_key = match &cli.privkey {
        Some(path) => pbi_cli::load_signing_key_from_pem(path)?,
        None => IssuerSigningKey::Es256(SigningKey::random(&mut OsRng)),
    };
    let issuer = IssuerIdentity { name: "kojib-demo".to_string(), aud: AUD.to_string() };
    let policy = VerificationPolicy {
        rp_id_allow_list: vec![RP_ID.to_string()],
        origin_allow_list: vec![ORIGIN.to_string()],
        require_up: true,
        require_uv: true,
    };

    let mut steps = Vec::new();
    let now = chrono::Utc::now();

    let pack1_dir = cli.out_dir.join("pack-01");
    write_fixture_pack(&pack1_dir, "r", 3, 0)?;
    let source1 = FsByteSource::new(pack1_dir.clone());
    let (manifest1, _proofs1) = pbi_pack::seal(&source1, issuer.clone(), policy.clone(), now, None, &signing_key)
        .map_err(|e| anyhow::anyhow!("sealing pack 1: {e}"))?;
    std::fs::write(pack1_dir.join("manifest.json"), format!("{}\n", serde_json::to_string_pretty(&manifest1)?))?;

    let pack2_dir = cli.out_dir.join("pack-02");
    write_fixture_pack(&pack2_dir, "s", 2, 100)?;
    let source2 = FsByteSource::new(pack2_dir.clone());
    let (manifest2, _proofs2) = pbi_pack::seal(
        &source2,
        issuer.clone(),
        policy.clone(),
        now,
        Some(manifest1.pack.pack_id.clone()),
        &signing_key,
    )
    .map_err(|e| anyhow::anyhow!("sealing pack 2: {e}"))?;
    std::fs::write(pack2_dir.join("manifest.json"), format!("{}\n", serde_json::to_string_pretty(&manifest2)?))?;

    let result = pbi_pack::verify_pack(&source1, &manifest1, &TrustMode::None, now);
    let (actual, detail) = render(&result);
    steps.push(Step { name: "pack_01_verifies_in_development_mode".to_string(), expected: "ok".to_string(), actual, detail });

    let result = pbi_pack::verify_pack(&source2, &manifest2, &TrustMode::None, now);
    let (actual, detail) = render(&result);
    steps.push(Step {
        name: "pack_02_verifies_and_chains_to_pack_01".to_string(),
        expected: "ok".to_string(),
        actual,
        detail,
    });
    let chain_ok = manifest2.pack.prev_pack_id.as_deref() == Some(manifest1.pack.pack_id.as_str());
    steps.push(Step {
        name: "pack_02_prev_pack_id_matches_pack_01".to_string(),
        expected: "ok".to_string(),
        actual: if chain_ok { "ok".to_string() } else { "err:chain_broken".to_string() },
        detail: None,
    });

    let issuer_sig = manifest2.issuer_sig.as_ref().expect("sealed pack always carries an issuerSig");
    let key_id = issuer_sig.key_id.clone();

    let mut roots = TrustRoots::new_issuer_roots();
    roots.trusted_issuers.push(TrustedKeyEntry {
        key_id: key_id.clone(),
        pub_key_jwk: issuer_sig.pub_key_jwk.clone(),
        not_before: None,
        not_after: None,
        issuer: None,
        kid: None,
    });

    let result = pbi_pack::verify_pack(&source2, &manifest2, &TrustMode::Trust(roots.clone()), now);
    let (actual, detail) = render(&result);
    steps.push(Step {
        name: "pack_02_verifies_against_a_trust_roots_file".to_string(),
        expected: "ok".to_string(),
        actual,
        detail,
    });

    let mut revoked_roots = roots.clone();
    revoked_roots.revoked_key_ids.push(key_id.clone());
    let result = pbi_pack::verify_pack(&source2, &manifest2, &TrustMode::Trust(revoked_roots), now);
    let (actual, detail) = render(&result);
    steps.push(Step {
        name: "revoking_the_issuer_key_fails_trust".to_string(),
        expected: "err:issuer_revoked".to_string(),
        actual,
        detail,
    });

    let mut expired_roots = roots;
    expired_roots.trusted_issuers[0].not_after = Some(now - chrono::Duration::days(1));
    let result = pbi_pack::verify_pack(&source2, &manifest2, &TrustMode::Trust(expired_roots), now);
    let (actual, detail) = render(&result);
    steps.push(Step {
        name: "an_issuer_key_past_not_after_fails_trust".to_string(),
        expected: "err:issuer_expired".to_string(),
        actual,
        detail,
    });

    Ok(steps)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    pbi_cli::init_tracing(cli.debug);

    tracing::info!(outDir = %cli.out_dir.display(), "running pack demo");
    let steps = run(&cli)?;
    let all_matched = steps.iter().all(Step::matched);

    pbi_cli::print_json(&steps, cli.pretty)?;
    std::process::exit(if all_matched { 0 } else { pbi_cli::EXIT_VERIFICATION_FAILED });
}
