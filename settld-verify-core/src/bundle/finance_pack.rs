// SPDX-License-Identifier: MIT OR Apache-2.0
//! FinancePackBundle.v1: wraps an embedded MonthProofBundle, verifies the
//! `GLBatch.v1`/`JournalCsv.v1` artifact hashes and the journal CSV's
//! byte-SHA, and recomputes `reconcile.json` for canonical-string equality.

use super::{
    assert_header, declared_head_from_snapshot, load_governance_context, verify_attestation_and_report,
    verify_bundle, TrustAnchors, Verdict,
};
use crate::canonical::{canonical_string, canonical_without_fields};
use crate::config::VerifyConfig;
use crate::crypto::sha256_hex;
use crate::error::{codes, VerifyError, VerifyResult};
use crate::kinds::BundleKind;
use crate::manifest::verify_manifest;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

const EMBEDDED_MONTH_PROOF_PATH: &str = "month";

fn read_json(path: &Path) -> VerifyResult<Value> {
    let bytes = fs::read(path).map_err(|e| {
        VerifyError::new(codes::SCHEMA_INVALID, format!("cannot read {}: {e}", path.display()))
            .with_path(path.display().to_string())
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| VerifyError::new(codes::INVALID_JSON, format!("invalid JSON in {}: {e}", path.display())))
}

/// Verify a hash-then-sign artifact's own `artifactHash` and that
/// `artifactType == schemaVersion == expected_type`. Returns the hash.
fn verify_artifact_hash(raw: &Value, expected_type: &str) -> VerifyResult<String> {
    let schema_version = raw.get("schemaVersion").and_then(Value::as_str).unwrap_or_default();
    let artifact_type = raw.get("artifactType").and_then(Value::as_str).unwrap_or_default();
    if schema_version != expected_type || artifact_type != expected_type {
        return Err(VerifyError::new(
            codes::UNSUPPORTED_ARTIFACT_TYPE,
            format!("expected artifactType/schemaVersion {expected_type}, found {artifact_type}/{schema_version}"),
        ));
    }
    let declared = raw.get("artifactHash").and_then(Value::as_str).ok_or_else(|| {
        VerifyError::new(codes::SCHEMA_INVALID, format!("{expected_type} missing artifactHash"))
    })?;
    let recomputed = sha256_hex(&canonical_without_fields(raw, &["artifactHash"])?);
    if recomputed != declared {
        return Err(VerifyError::new(
            codes::ARTIFACT_HASH_MISMATCH,
            format!("expected {declared}, computed {recomputed}"),
        )
        .with_detail(json!({"expected": declared, "actual": recomputed})));
    }
    Ok(recomputed)
}

fn sum_amounts(entries: &Value) -> i64 {
    entries
        .as_array()
        .map(|rows| rows.iter().filter_map(|r| r.get("amountCents").and_then(Value::as_i64)).sum())
        .unwrap_or(0)
}

fn recompute_reconcile(gl_batch: &Value, gl_batch_hash: &str, journal_csv: &Value, journal_csv_hash: &str, csv_sha256: &str) -> Value {
    let gl_total = sum_amounts(gl_batch.get("entries").unwrap_or(&Value::Null));
    let journal_total = sum_amounts(journal_csv.get("entries").unwrap_or(&Value::Null));
    json!({
        "schemaVersion": "Reconcile.v1",
        "glBatchHash": gl_batch_hash,
        "journalCsvHash": journal_csv_hash,
        "journalCsvSha256": csv_sha256,
        "totals": {"glBatchCents": gl_total, "journalCsvCents": journal_total},
        "balanced": gl_total == journal_total,
    })
}

pub fn verify(bundle_root: &Path, config: &VerifyConfig, trust: &TrustAnchors) -> VerifyResult<Verdict> {
    assert_header(bundle_root, BundleKind::FinancePack)?;
    let manifest = verify_manifest(bundle_root, BundleKind::FinancePack, config.strict, config.hash_concurrency)?;
    let mut warnings = manifest.warnings.clone();

    let month_proof_root = bundle_root.join(EMBEDDED_MONTH_PROOF_PATH);
    let month_proof_verdict = verify_bundle(&month_proof_root, BundleKind::MonthProof, config, trust)?;
    warnings.extend(month_proof_verdict.warnings.clone());

    let gl_batch = read_json(&bundle_root.join("finance/GLBatch.v1.json"))?;
    let gl_batch_hash = verify_artifact_hash(&gl_batch, "GLBatch.v1")?;

    let journal_csv = read_json(&bundle_root.join("finance/JournalCsv.v1.json"))?;
    let journal_csv_hash = verify_artifact_hash(&journal_csv, "JournalCsv.v1")?;

    let csv_bytes = fs::read(bundle_root.join("finance/JournalCsv.v1.csv")).map_err(|e| {
        VerifyError::new(codes::SCHEMA_INVALID, format!("cannot read JournalCsv.v1.csv: {e}"))
    })?;
    let csv_sha256 = sha256_hex(&csv_bytes);
    let declared_csv_sha256 = journal_csv.get("csvSha256").and_then(Value::as_str).ok_or_else(|| {
        VerifyError::new(codes::SCHEMA_INVALID, "JournalCsv.v1.json missing csvSha256")
    })?;
    if csv_sha256 != declared_csv_sha256 {
        return Err(VerifyError::new(
            codes::JOURNAL_CSV_SHA_MISMATCH,
            format!("expected {declared_csv_sha256}, computed {csv_sha256}"),
        ));
    }

    let on_disk_reconcile = read_json(&bundle_root.join("finance/reconcile.json"))?;
    let recomputed_reconcile = recompute_reconcile(&gl_batch, &gl_batch_hash, &journal_csv, &journal_csv_hash, &csv_sha256);
    if canonical_string(&on_disk_reconcile)? != canonical_string(&recomputed_reconcile)? {
        return Err(VerifyError::new(
            codes::RECONCILE_MISMATCH,
            "recomputed reconcile.json does not canonically match the on-disk file",
        )
        .with_path("finance/reconcile.json"));
    }

    let bootstrap_keys = crate::keys::load_public_keys(bundle_root)?;
    let global_head = declared_head_from_snapshot(&bundle_root.join("governance/global/snapshot.json"))?;
    let tenant_head = declared_head_from_snapshot(&bundle_root.join("governance/tenant/snapshot.json"))?;
    let global_events = super::load_and_verify_event_stream(
        &bundle_root.join("governance/global/events"),
        &bootstrap_keys,
        global_head,
        config.strict,
    )?;
    let tenant_events = super::load_and_verify_event_stream(
        &bundle_root.join("governance/tenant/events"),
        &bootstrap_keys,
        tenant_head,
        config.strict,
    )?;
    let governance = load_governance_context(bundle_root, config.strict, trust, &global_events, &tenant_events)?;
    warnings.extend(governance.warnings.clone());

    let heads = json!({"monthProof": month_proof_verdict.manifest_hash});
    warnings.extend(verify_attestation_and_report(
        bundle_root,
        BundleKind::FinancePack,
        &manifest,
        &heads,
        config.strict,
        &governance,
        trust,
    )?);

    Ok(Verdict { ok: true, warnings, manifest_hash: manifest.doc.manifest_hash })
}
