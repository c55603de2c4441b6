// SPDX-License-Identifier: MIT OR Apache-2.0
//! ClosePack.v1: wraps an embedded InvoiceBundle, recomputes
//! `EvidenceIndex.v1` from the metering report and job event stream, and
//! (when their definitions are present) recomputes `SlaEvaluation.v1` and
//! `AcceptanceEvaluation.v1`.

use super::{
    assert_header, declared_head_from_snapshot, load_governance_context, verify_attestation_and_report,
    verify_bundle, TrustAnchors, Verdict,
};
use crate::canonical::canonical_string;
use crate::config::VerifyConfig;
use crate::error::{codes, VerifyError, VerifyResult};
use crate::event_chain::load_jsonl_events;
use crate::kinds::BundleKind;
use crate::manifest::verify_manifest;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

const EMBEDDED_INVOICE_PATH: &str = "payload/invoice_bundle";
const EMBEDDED_JOB_PROOF_PATH: &str = "payload/job_proof_bundle";

fn read_json(path: &Path) -> VerifyResult<Value> {
    let bytes = fs::read(path).map_err(|e| {
        VerifyError::new(codes::SCHEMA_INVALID, format!("cannot read {}: {e}", path.display()))
            .with_path(path.display().to_string())
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| VerifyError::new(codes::INVALID_JSON, format!("invalid JSON in {}: {e}", path.display())))
}

fn build_evidence_index(tenant_id: &str, metering: &Value, job_events: &[crate::event_chain::Event]) -> Value {
    let metering_refs = metering
        .get("evidenceRefs")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let metering_entries: Vec<Value> = job_events
        .iter()
        .filter(|e| e.event_type == "METERING_RECORDED")
        .map(|e| json!({"eventId": e.id, "at": e.at, "payload": e.payload}))
        .collect();
    json!({
        "schemaVersion": "EvidenceIndex.v1",
        "tenantId": tenant_id,
        "meteringRefs": metering_refs,
        "meteringEvents": metering_entries,
    })
}

fn recompute_from_definition(definition: &Value, job_events: &[crate::event_chain::Event], schema_tag: &str) -> Value {
    let metric = definition.get("metric").and_then(Value::as_str).unwrap_or_default();
    let threshold = definition.get("thresholdCents").and_then(Value::as_i64);
    let observed: Vec<Value> = job_events
        .iter()
        .filter(|e| e.event_type == "METERING_RECORDED")
        .filter_map(|e| e.payload.get(metric).cloned().map(|v| json!({"eventId": e.id, "value": v})))
        .collect();
    let passed = match threshold {
        Some(limit) => observed
            .iter()
            .all(|row| row.get("value").and_then(Value::as_i64).map(|v| v <= limit).unwrap_or(true)),
        None => true,
    };
    json!({
        "schemaVersion": schema_tag,
        "metric": metric,
        "observed": observed,
        "passed": passed,
    })
}

pub fn verify(bundle_root: &Path, config: &VerifyConfig, trust: &TrustAnchors) -> VerifyResult<Verdict> {
    assert_header(bundle_root, BundleKind::ClosePack)?;
    let manifest = verify_manifest(bundle_root, BundleKind::ClosePack, config.strict, config.hash_concurrency)?;
    let mut warnings = manifest.warnings.clone();

    let invoice_root = bundle_root.join(EMBEDDED_INVOICE_PATH);
    let invoice_verdict = verify_bundle(&invoice_root, BundleKind::Invoice, config, trust)?;
    warnings.extend(invoice_verdict.warnings.clone());

    let metering = read_json(&invoice_root.join("metering/metering_report.json"))?;
    let job_events = load_jsonl_events(&invoice_root.join(EMBEDDED_JOB_PROOF_PATH).join("events/events.jsonl"))?;

    let tenant_id = manifest.doc.tenant_id.clone().unwrap_or_default();
    let on_disk_index = read_json(&bundle_root.join("evidence/evidence_index.json"))?;
    let recomputed_index = build_evidence_index(&tenant_id, &metering, &job_events);
    if canonical_string(&on_disk_index)? != canonical_string(&recomputed_index)? {
        return Err(VerifyError::new(
            codes::CLOSEPACK_EVIDENCE_INDEX_MISMATCH,
            "recomputed evidence_index.json does not canonically match the on-disk file",
        )
        .with_path("evidence/evidence_index.json"));
    }

    let sla_definition_path = bundle_root.join("sla/sla_definition.json");
    if sla_definition_path.exists() {
        let definition = read_json(&sla_definition_path)?;
        let on_disk = read_json(&bundle_root.join("sla/sla_evaluation.json"))?;
        let recomputed = recompute_from_definition(&definition, &job_events, "SlaEvaluation.v1");
        if canonical_string(&on_disk)? != canonical_string(&recomputed)? {
            return Err(VerifyError::new(
                codes::SLA_EVALUATION_MISMATCH,
                "recomputed sla_evaluation.json does not canonically match the on-disk file",
            )
            .with_path("sla/sla_evaluation.json"));
        }
    }

    let acceptance_definition_path = bundle_root.join("acceptance/acceptance_definition.json");
    if acceptance_definition_path.exists() {
        let definition = read_json(&acceptance_definition_path)?;
        let on_disk = read_json(&bundle_root.join("acceptance/acceptance_evaluation.json"))?;
        let recomputed = recompute_from_definition(&definition, &job_events, "AcceptanceEvaluation.v1");
        if canonical_string(&on_disk)? != canonical_string(&recomputed)? {
            return Err(VerifyError::new(
                codes::ACCEPTANCE_EVALUATION_MISMATCH,
                "recomputed acceptance_evaluation.json does not canonically match the on-disk file",
            )
            .with_path("acceptance/acceptance_evaluation.json"));
        }
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

    let heads = json!({"invoice": invoice_verdict.manifest_hash});
    warnings.extend(verify_attestation_and_report(
        bundle_root,
        BundleKind::ClosePack,
        &manifest,
        &heads,
        config.strict,
        &governance,
        trust,
    )?);

    Ok(Verdict { ok: true, warnings, manifest_hash: manifest.doc.manifest_hash })
}
