// SPDX-License-Identifier: MIT OR Apache-2.0
//! CLI entry point for the offline settlement-evidence-bundle verifier.

use anyhow::{Context, Result};
use clap::Parser;
use settld_verify_core::bundle::verify_bundle;
use settld_verify_core::kinds::BundleKind;
use settld_verify_core::zip_safe::{safe_unzip, UnzipBudgets};
use settld_verify_core::VerifyConfig;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

mod args;
mod output;
mod trust;

use args::{Cli, Command, VerifyArgs, VerifyReleaseArgs};
use output::{
    ErrorEntry, Mode, ReleaseIdentity, Summary, Target, Tool, VerifyCliOutput, VerifyReleaseOutput,
    WarningEntry, EXIT_OK, EXIT_RELEASE_OK, EXIT_USAGE, EXIT_VERIFY_FAILED,
};

const TOOL_NAME: &str = "settld-verify";
const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");
const TOOL_COMMIT: &str = "unknown";

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Verify(args) => run_verify(args),
        Command::VerifyRelease(args) => run_verify_release(args),
    }
}

fn run_verify(args: VerifyArgs) -> ExitCode {
    match verify_impl(&args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("settld-verify: {:#}", e);
            ExitCode::from(EXIT_USAGE)
        }
    }
}

fn verify_impl(args: &VerifyArgs) -> Result<u8> {
    let strict = !args.no_strict;
    info!(input = %args.input.display(), strict, "starting bundle verification");

    let resolved_dir = resolve_input(&args.input)?;

    let manifest_path = resolved_dir.join("manifest.json");
    let manifest_raw: serde_json::Value = serde_json::from_slice(
        &std::fs::read(&manifest_path).with_context(|| format!("cannot read {}", manifest_path.display()))?,
    )
    .with_context(|| format!("{} is not valid JSON", manifest_path.display()))?;
    let schema_tag = manifest_raw.get("schemaVersion").and_then(serde_json::Value::as_str).unwrap_or_default();
    let kind = BundleKind::from_schema_tag(schema_tag)
        .with_context(|| format!("unrecognized manifest schemaVersion {schema_tag:?}"))?;

    let trust = trust::load_trust_anchors(&args.env_prefix)?;
    if strict {
        trust::require_non_empty_for_strict(&trust)?;
    }

    let config = VerifyConfig::default().strict(strict).hash_concurrency(args.hash_concurrency);
    let result = verify_bundle(&resolved_dir, kind, &config, &trust);

    let mut errors: Vec<ErrorEntry> = Vec::new();
    let mut warnings: Vec<WarningEntry> = Vec::new();
    let mut verification_ok = true;

    match &result {
        Ok(verdict) => {
            warnings.extend(verdict.warnings.iter().map(WarningEntry::from));
        }
        Err(e) => {
            verification_ok = false;
            errors.push(ErrorEntry::from(e));
        }
    }

    let mut ok = verification_ok;
    if ok && args.fail_on_warnings && !warnings.is_empty() {
        ok = false;
        errors.push(ErrorEntry {
            code: settld_verify_core::error::codes::FAIL_ON_WARNINGS.to_string(),
            path: None,
            message: "warnings present under --fail-on-warnings".to_string(),
            detail: None,
        });
    }

    output::sort_errors(&mut errors);
    output::sort_warnings(&mut warnings);

    let summary = Summary {
        tenant_id: manifest_raw.get("tenantId").and_then(serde_json::Value::as_str).map(str::to_string),
        period: manifest_raw.get("scope").and_then(serde_json::Value::as_str).map(str::to_string),
        bundle_type: Some(kind.schema_tag().to_string()),
        manifest_hash: result.as_ref().ok().map(|v| v.manifest_hash.clone()),
    };

    let report = VerifyCliOutput {
        schema_version: "VerifyCliOutput.v1",
        tool: Tool { name: TOOL_NAME, version: TOOL_VERSION, commit: TOOL_COMMIT },
        mode: Mode { strict, fail_on_warnings: args.fail_on_warnings },
        target: Target {
            kind: kind.schema_tag(),
            input: args.input.display().to_string(),
            resolved: resolved_dir.display().to_string(),
            dir: resolved_dir.display().to_string(),
        },
        ok,
        verification_ok,
        errors,
        warnings,
        summary,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        render_human(&report);
    }

    if ok {
        info!("verification PASSED");
        Ok(EXIT_OK)
    } else {
        warn!("verification FAILED");
        Ok(EXIT_VERIFY_FAILED)
    }
}

fn render_human(report: &VerifyCliOutput) {
    println!("{} {} — {}", TOOL_NAME, TOOL_VERSION, report.target.kind);
    println!("target: {}", report.target.input);
    println!("mode: strict={} failOnWarnings={}", report.mode.strict, report.mode.fail_on_warnings);
    if let Some(hash) = &report.summary.manifest_hash {
        println!("manifestHash: {hash}");
    }
    if report.errors.is_empty() {
        println!("ok: {}", report.ok);
    } else {
        println!("ok: false");
        for e in &report.errors {
            match &e.path {
                Some(p) => println!("  error [{}] {}: {}", e.code, p, e.message),
                None => println!("  error [{}] {}", e.code, e.message),
            }
        }
    }
    for w in &report.warnings {
        match &w.path {
            Some(p) => println!("  warning [{}] {}: {}", w.code, p, w.message),
            None => println!("  warning [{}] {}", w.code, w.message),
        }
    }
}

/// Extract `input` to a temp directory via the safe-unzip front door (C3)
/// when it's a zip file, else treat it as a bundle directory directly.
fn resolve_input(input: &Path) -> Result<PathBuf> {
    let is_zip = input.extension().and_then(std::ffi::OsStr::to_str).map(|ext| ext.eq_ignore_ascii_case("zip")).unwrap_or(false);
    if is_zip {
        safe_unzip(input, &UnzipBudgets::default(), None).context("failed to extract zip bundle")
    } else {
        Ok(input.to_path_buf())
    }
}

fn run_verify_release(args: VerifyReleaseArgs) -> ExitCode {
    match verify_release_impl(&args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("settld-verify verify-release: {:#}", e);
            ExitCode::from(output::EXIT_RELEASE_OTHER)
        }
    }
}

fn verify_release_impl(args: &VerifyReleaseArgs) -> Result<u8> {
    let result = settld_verify_core::verify_release(&args.release_dir, &args.trust);

    let (ok, signature_ok, artifacts_ok, errors, warnings, identity, exit_code) = match result {
        Ok(verdict) => (
            true,
            true,
            true,
            Vec::new(),
            verdict.warnings.iter().map(WarningEntry::from).collect(),
            ReleaseIdentity { tag: verdict.summary.tag, version: verdict.summary.version, commit: verdict.summary.commit },
            EXIT_RELEASE_OK,
        ),
        Err(e) => {
            let signature_codes = [
                "RELEASE_SIGNER_UNAUTHORIZED",
                "RELEASE_SIGNER_REVOKED",
                "RELEASE_SIGNATURE_UNSUPPORTED_ALGORITHM",
                "RELEASE_SIGNATURE_INVALID",
                "RELEASE_SIGNATURE_QUORUM_NOT_SATISFIED",
            ];
            let asset_codes = [
                "RELEASE_ASSET_MISSING",
                "RELEASE_ASSET_SIZE_MISMATCH",
                "RELEASE_ASSET_HASH_MISMATCH",
                "RELEASE_ASSET_DUPLICATE_PATH",
            ];
            let signature_ok = !signature_codes.contains(&e.code);
            let artifacts_ok = !asset_codes.contains(&e.code);
            let exit_code = output::release_exit_code_for(e.code);
            (false, signature_ok, artifacts_ok, vec![ErrorEntry::from(&e)], Vec::new(), ReleaseIdentity { tag: None, version: None, commit: None }, exit_code)
        }
    };

    let mut errors = errors;
    let mut warnings = warnings;
    output::sort_errors(&mut errors);
    output::sort_warnings(&mut warnings);

    let report = VerifyReleaseOutput {
        schema_version: "VerifyReleaseOutput.v1",
        ok,
        release: identity,
        signature_ok,
        artifacts_ok,
        errors,
        warnings,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "release: tag={:?} version={:?} commit={:?}",
            report.release.tag, report.release.version, report.release.commit
        );
        println!("ok: {} signatureOk: {} artifactsOk: {}", report.ok, report.signature_ok, report.artifacts_ok);
        for e in &report.errors {
            println!("  error [{}] {}", e.code, e.message);
        }
    }

    if report.ok {
        info!("release verification PASSED");
    } else {
        warn!("release verification FAILED");
    }
    Ok(exit_code)
}
