// SPDX-License-Identifier: MIT OR Apache-2.0
//! InvoiceBundle.v1: wraps an embedded JobProofBundle, recomputes the
//! invoice total, verifies the pricing matrix signatures (§4.11b), and
//! checks evidence-ref consistency between the metering report and the
//! embedded job proof's manifest.

use super::{
    assert_header, declared_head_from_snapshot, load_governance_context, verify_attestation_and_report,
    verify_bundle, TrustAnchors, Verdict,
};
use crate::config::VerifyConfig;
use crate::error::{codes, VerifyError, VerifyResult};
use crate::kinds::BundleKind;
use crate::manifest::verify_manifest;
use crate::pricing::{parse_pricing_matrix_signatures, verify_pricing_matrix_signatures};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

const EMBEDDED_JOB_PROOF_PATH: &str = "payload/job_proof_bundle";

fn read_json(path: &Path) -> VerifyResult<Value> {
    let bytes = fs::read(path).map_err(|e| {
        VerifyError::new(codes::SCHEMA_INVALID, format!("cannot read {}: {e}", path.display()))
            .with_path(path.display().to_string())
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| VerifyError::new(codes::INVALID_JSON, format!("invalid JSON in {}: {e}", path.display())))
}

fn recompute_invoice_total(claim: &Value) -> VerifyResult<(i64, i64)> {
    let lines = claim.get("lines").and_then(Value::as_array).ok_or_else(|| {
        VerifyError::new(codes::SCHEMA_INVALID, "invoice_claim.json missing lines[]")
    })?;
    let mut total = 0i64;
    for (i, line) in lines.iter().enumerate() {
        let quantity = line.get("quantity").and_then(Value::as_i64).ok_or_else(|| {
            VerifyError::new(codes::SCHEMA_INVALID, format!("invoice line {i} missing quantity"))
        })?;
        let unit_price = line.get("unitPriceCents").and_then(Value::as_i64).ok_or_else(|| {
            VerifyError::new(codes::SCHEMA_INVALID, format!("invoice line {i} missing unitPriceCents"))
        })?;
        let amount = quantity * unit_price;
        let declared_amount = line.get("amountCents").and_then(Value::as_i64);
        if let Some(declared) = declared_amount {
            if declared != amount {
                return Err(VerifyError::new(
                    codes::INVOICE_TOTAL_MISMATCH,
                    format!("invoice line {i} amountCents mismatch: declared {declared}, computed {amount}"),
                ));
            }
        }
        total += amount;
    }
    let declared_total = claim.get("totalCents").and_then(Value::as_i64).ok_or_else(|| {
        VerifyError::new(codes::SCHEMA_INVALID, "invoice_claim.json missing totalCents")
    })?;
    Ok((total, declared_total))
}

pub fn verify(bundle_root: &Path, config: &VerifyConfig, trust: &TrustAnchors) -> VerifyResult<Verdict> {
    assert_header(bundle_root, BundleKind::Invoice)?;
    let manifest = verify_manifest(bundle_root, BundleKind::Invoice, config.strict, config.hash_concurrency)?;
    let mut warnings = manifest.warnings.clone();

    let job_proof_root = bundle_root.join(EMBEDDED_JOB_PROOF_PATH);
    let job_proof_verdict = verify_bundle(&job_proof_root, BundleKind::JobProof, config, trust)?;
    warnings.extend(job_proof_verdict.warnings.clone());

    let job_proof_manifest = read_json(&job_proof_root.join("manifest.json"))?;
    let job_proof_manifest_files = job_proof_manifest
        .get("files")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let metering = read_json(&bundle_root.join("metering/metering_report.json"))?;
    let embedded_path = metering
        .get("jobProof")
        .and_then(|j| j.get("embeddedPath"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    if embedded_path != EMBEDDED_JOB_PROOF_PATH {
        return Err(VerifyError::new(
            codes::METERING_REPORT_EMBEDDED_PATH_MISMATCH,
            format!("metering report embeddedPath {embedded_path} does not match {EMBEDDED_JOB_PROOF_PATH}"),
        ));
    }
    let declared_job_proof_hash = metering.get("jobProof").and_then(|j| j.get("manifestHash")).and_then(Value::as_str);
    if let Some(declared) = declared_job_proof_hash {
        if declared != job_proof_verdict.manifest_hash {
            return Err(VerifyError::new(
                codes::JOB_PROOF_BUNDLE_HASH_MISMATCH,
                format!("expected {declared}, computed {}", job_proof_verdict.manifest_hash),
            ));
        }
    }

    if let Some(evidence_refs) = metering.get("evidenceRefs").and_then(Value::as_array) {
        for (i, er) in evidence_refs.iter().enumerate() {
            let name = er.get("name").and_then(Value::as_str).ok_or_else(|| {
                VerifyError::new(codes::SCHEMA_INVALID, format!("metering evidenceRefs[{i}] missing name"))
            })?;
            let expected_sha = er.get("sha256").and_then(Value::as_str);
            let matched = job_proof_manifest_files.iter().find(|f| f.get("name").and_then(Value::as_str) == Some(name));
            match (matched, expected_sha) {
                (Some(entry), Some(expected)) => {
                    let actual = entry.get("sha256").and_then(Value::as_str).unwrap_or_default();
                    if actual != expected {
                        return Err(VerifyError::new(
                            codes::EVIDENCE_REF_MISMATCH,
                            format!("evidenceRefs[{i}] ({name}) sha256 mismatch"),
                        ));
                    }
                }
                (None, _) => {
                    return Err(VerifyError::new(
                        codes::EVIDENCE_REF_MISMATCH,
                        format!("evidenceRefs[{i}] ({name}) not present in embedded job proof manifest"),
                    ))
                }
                _ => {}
            }
        }
    }

    let claim = read_json(&bundle_root.join("invoice/invoice_claim.json"))?;
    let (computed_total, declared_total) = recompute_invoice_total(&claim)?;
    if computed_total != declared_total {
        return Err(VerifyError::new(
            codes::INVOICE_TOTAL_MISMATCH,
            format!("invoice total mismatch: declared {declared_total}, computed {computed_total}"),
        ));
    }

    let pricing_matrix_path = bundle_root.join("pricing/pricing_matrix.json");
    let pricing_matrix_bytes = fs::read(&pricing_matrix_path).map_err(|e| {
        VerifyError::new(codes::SCHEMA_INVALID, format!("cannot read pricing_matrix.json: {e}"))
    })?;
    let pricing_matrix_value: Value = serde_json::from_slice(&pricing_matrix_bytes)
        .map_err(|e| VerifyError::new(codes::INVALID_JSON, format!("invalid pricing_matrix.json: {e}")))?;
    let signatures_path = bundle_root.join("pricing/pricing_matrix_signatures.json");
    if signatures_path.exists() {
        let signatures_raw = read_json(&signatures_path)?;
        let signatures_doc = parse_pricing_matrix_signatures(&signatures_raw)?;
        let (_valid_signers, pricing_warnings) = verify_pricing_matrix_signatures(
            &signatures_doc,
            &pricing_matrix_bytes,
            &pricing_matrix_value,
            config.strict,
            &trust.pricing_signers,
            trust.pricing_signer_key_ids.as_ref(),
        )?;
        warnings.extend(pricing_warnings);
    } else if config.strict {
        return Err(VerifyError::new(
            codes::PRICING_MATRIX_SIGNATURE_MISSING,
            "strict mode requires pricing/pricing_matrix_signatures.json",
        ));
    } else {
        warnings.push(crate::error::Warning::new(
            codes::PRICING_MATRIX_SIGNATURES_MISSING_LENIENT,
            "pricing matrix signatures absent; accepted under lenient mode",
        ));
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

    let heads = json!({
        "jobProof": job_proof_verdict.manifest_hash,
    });
    warnings.extend(verify_attestation_and_report(
        bundle_root,
        BundleKind::Invoice,
        &manifest,
        &heads,
        config.strict,
        &governance,
        trust,
    )?);

    Ok(Verdict { ok: true, warnings, manifest_hash: manifest.doc.manifest_hash })
}
