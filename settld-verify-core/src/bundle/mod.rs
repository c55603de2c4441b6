// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bundle verifiers (C11): compose C1-C10 per bundle kind and enforce the
//! cross-document consistency rules in §4.11/§6. Every kind shares the same
//! skeleton (header -> manifest -> governance -> sub-bundles -> attestation
//! + report -> kind-specific checks -> verdict); the shared plumbing lives
//! here and each kind module in this directory supplies only the parts that
//! differ.

pub mod close_pack;
pub mod finance_pack;
pub mod invoice;
pub mod job_proof;
pub mod month_proof;

use crate::attestation::{verify_bundle_head_attestation, AttestationInput, BundleHeadAttestation};
use crate::config::VerifyConfig;
use crate::error::{codes, VerifyError, VerifyResult, Warning};
use crate::event_chain::{load_jsonl_events, load_jsonl_payload_material, verify_event_chain, ChainInput, Event};
use crate::governance::{
    accept_policy_v1_under_mode, apply_timelines, authorize_server_signer_for_policy,
    derive_key_timeline_from_revocation_list, derive_server_key_timeline_from_governance_events,
    parse_policy_v2, parse_revocation_list_v1, verify_policy_v2_signature,
    verify_revocation_list_signature, verify_revocation_pointer, GovernancePolicyV2,
    PolicyDocumentKind, Timeline,
};
use crate::keys::{load_public_keys, KeyId, KeyMap};
use crate::kinds::BundleKind;
use crate::manifest::{verify_manifest, ManifestOutcome};
use crate::report::{verify_verification_report, ReportInput, VerificationReport};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Env/caller-provided public keys the bundle itself cannot assert about
/// itself: governance roots, time authorities, and pricing signers.
#[derive(Debug, Clone, Default)]
pub struct TrustAnchors {
    pub governance_roots: HashMap<KeyId, String>,
    pub time_authorities: HashMap<KeyId, String>,
    pub pricing_signers: HashMap<KeyId, String>,
    pub pricing_signer_key_ids: Option<std::collections::HashSet<KeyId>>,
    /// Parsed from `*_TRUSTED_SETTLEMENT_DECISION_SIGNER_KEYS_JSON`. Not yet
    /// cross-checked by `provenance::verify_provenance_ref`: signer
    /// authorization for `PROOF_EVALUATED`/`DECISION_RECORDED` events is
    /// already gated by the governance policy v2 path (same mechanism as
    /// C9/C10). Kept here so the env loader has a typed home for the value.
    pub settlement_decision_signers: HashMap<KeyId, String>,
}

/// The aggregate result of one `verify_*_bundle` call.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub ok: bool,
    pub warnings: Vec<Warning>,
    pub manifest_hash: String,
}

/// The governance view a bundle verifier threads through C6/C9/C10: the key
/// map merged with every derived timeline, the parsed v2 policy (if any),
/// the same timelines kept separately for the prospective-time check, and
/// any lenient warnings raised while assembling this view.
pub struct GovernanceContext {
    pub keys: KeyMap,
    pub policy: Option<GovernancePolicyV2>,
    pub signer_timelines: HashMap<KeyId, Timeline>,
    pub warnings: Vec<Warning>,
}

fn merge_timeline(into: &mut HashMap<KeyId, Timeline>, from: HashMap<KeyId, Timeline>) {
    for (key_id, timeline) in from {
        let entry = into.entry(key_id).or_default();
        if let Some(v) = timeline.valid_from {
            entry.valid_from = Some(entry.valid_from.map_or(v, |e| e.min(v)));
        }
        if let Some(v) = timeline.rotated_at {
            entry.rotated_at = Some(entry.rotated_at.map_or(v, |e| e.min(v)));
        }
        if let Some(v) = timeline.revoked_at {
            entry.revoked_at = Some(entry.revoked_at.map_or(v, |e| e.min(v)));
        }
    }
}

/// Load `keys/public_keys.json`, then (if present) the governance policy and
/// revocation list, deriving the merged authorization view. Governance
/// events in `global_events`/`tenant_events` (already chain-verified by the
/// caller) additionally contribute `SERVER_SIGNER_KEY_*` timelines.
pub fn load_governance_context(
    bundle_root: &Path,
    strict: bool,
    trust: &TrustAnchors,
    global_events: &[Event],
    tenant_events: &[Event],
) -> VerifyResult<GovernanceContext> {
    let base_keys = load_public_keys(bundle_root)?;
    let mut warnings = Vec::new();
    let mut timelines: HashMap<KeyId, Timeline> = HashMap::new();
    let mut governed = std::collections::HashSet::new();

    let policy_path = bundle_root.join("governance/policy.json");
    let policy = if policy_path.exists() {
        let raw: Value = serde_json::from_slice(&fs::read(&policy_path).map_err(|e| {
            VerifyError::new(codes::SCHEMA_INVALID, format!("cannot read governance/policy.json: {e}"))
        })?)
        .map_err(|e| VerifyError::new(codes::INVALID_JSON, format!("invalid governance/policy.json: {e}")))?;

        let schema_version = raw.get("schemaVersion").and_then(Value::as_str).unwrap_or_default();
        if schema_version == "GovernancePolicy.v2" {
            let policy = parse_policy_v2(&raw)?;
            verify_policy_v2_signature(&raw, &policy, &trust.governance_roots)?;

            let list_path = bundle_root.join(&policy.revocation_list.path);
            let list_bytes = fs::read(&list_path).map_err(|e| {
                VerifyError::new(codes::SCHEMA_INVALID, format!("cannot read {}: {e}", policy.revocation_list.path))
                    .with_path(policy.revocation_list.path.clone())
            })?;
            verify_revocation_pointer(&policy.revocation_list, &list_bytes)?;
            let list_raw: Value = serde_json::from_slice(&list_bytes).map_err(|e| {
                VerifyError::new(codes::INVALID_JSON, format!("invalid revocation list: {e}"))
            })?;
            let list = parse_revocation_list_v1(&list_raw)?;
            verify_revocation_list_signature(&list_raw, &list, &trust.governance_roots)?;
            merge_timeline(&mut timelines, derive_key_timeline_from_revocation_list(&list));

            Some(policy)
        } else {
            warnings.push(accept_policy_v1_under_mode(&raw, strict)?);
            None
        }
    } else {
        warnings.push(Warning::new(
            codes::GOVERNANCE_DIRECTORY_ABSENT_LENIENT,
            "governance/policy.json absent; accepted under lenient mode",
        ));
        None
    };

    for events in [global_events, tenant_events] {
        let (event_timelines, event_governed) = derive_server_key_timeline_from_governance_events(events)?;
        merge_timeline(&mut timelines, event_timelines);
        governed.extend(event_governed);
    }

    let keys = apply_timelines(&base_keys, &timelines, &governed);

    Ok(GovernanceContext { keys, policy, signer_timelines: timelines, warnings })
}

/// Load and C6-verify an `events.jsonl`/`payload_material.jsonl` pair at
/// `dir`, returning the verified events for downstream consumption.
pub fn load_and_verify_event_stream(
    dir: &Path,
    keys: &KeyMap,
    declared_head: Option<(String, String)>,
    strict: bool,
) -> VerifyResult<Vec<Event>> {
    let events = load_jsonl_events(&dir.join("events.jsonl"))?;
    let payload_material = load_jsonl_payload_material(&dir.join("payload_material.jsonl"))?;
    let input = ChainInput { events: &events, payload_material: &payload_material, keys, declared_head, strict };
    verify_event_chain(&input)?;
    crate::provenance::verify_all_provenance_refs(&events)?;
    Ok(events)
}

/// Enforce governance scope isolation: no `TENANT_POLICY_UPDATED` in the
/// global stream, no `SERVER_SIGNER_KEY_*` in the tenant stream.
pub fn enforce_governance_scope_isolation(global_events: &[Event], tenant_events: &[Event]) -> VerifyResult<()> {
    if global_events.iter().any(|e| e.event_type == "TENANT_POLICY_UPDATED") {
        return Err(VerifyError::new(
            codes::GOVERNANCE_SCOPE_VIOLATION,
            "TENANT_POLICY_UPDATED event found in the global governance stream",
        ));
    }
    if tenant_events.iter().any(|e| e.event_type.starts_with("SERVER_SIGNER_KEY_")) {
        return Err(VerifyError::new(
            codes::GOVERNANCE_SCOPE_VIOLATION,
            "SERVER_SIGNER_KEY_* event found in the tenant governance stream",
        ));
    }
    Ok(())
}

/// Read a `snapshot.json`'s optional declared chain head
/// (`{"chainHead": {"chainHash", "eventId"}}`), used as the expected head an
/// event stream must terminate at.
pub fn declared_head_from_snapshot(snapshot_path: &Path) -> VerifyResult<Option<(String, String)>> {
    if !snapshot_path.exists() {
        return Ok(None);
    }
    let raw = read_json(snapshot_path)?;
    let Some(head) = raw.get("chainHead") else {
        return Ok(None);
    };
    let chain_hash = head.get("chainHash").and_then(Value::as_str).map(str::to_string);
    let event_id = head.get("eventId").and_then(Value::as_str).map(str::to_string);
    match (chain_hash, event_id) {
        (Some(h), Some(id)) => Ok(Some((h, id))),
        _ => Ok(None),
    }
}

fn read_json(path: &Path) -> VerifyResult<Value> {
    let bytes = fs::read(path).map_err(|e| {
        VerifyError::new(codes::SCHEMA_INVALID, format!("cannot read {}: {e}", path.display()))
            .with_path(path.display().to_string())
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        VerifyError::new(codes::INVALID_JSON, format!("invalid JSON in {}: {e}", path.display()))
            .with_path(path.display().to_string())
    })
}

/// Read and assert a kind's type-asserting header file (`nooterra.json`/
/// `settld.json`), if the kind declares one.
pub fn assert_header(bundle_root: &Path, kind: BundleKind) -> VerifyResult<()> {
    let Some((file, expected_type)) = kind.header_file() else {
        return Ok(());
    };
    let raw = read_json(&bundle_root.join(file))?;
    let actual_type = raw.get("type").and_then(Value::as_str).unwrap_or_default();
    if actual_type != expected_type {
        return Err(VerifyError::new(
            codes::BUNDLE_TYPE_MISMATCH,
            format!("expected type {expected_type} in {file}, found {actual_type}"),
        )
        .with_path(file));
    }
    Ok(())
}

/// Verify the outer bundle's head attestation (C9) and verification report
/// (C10) against the already-verified manifest and the sub-bundle heads
/// observed during recursion. Returns any lenient warnings (e.g. the
/// attestation/report being absent outside strict mode).
#[allow(clippy::too_many_arguments)]
pub fn verify_attestation_and_report(
    bundle_root: &Path,
    kind: BundleKind,
    manifest: &ManifestOutcome,
    heads: &Value,
    strict: bool,
    governance: &GovernanceContext,
    trust: &TrustAnchors,
) -> VerifyResult<Vec<Warning>> {
    let mut warnings = Vec::new();

    let attestation_path = bundle_root.join("attestation/bundle_head_attestation.json");
    if attestation_path.exists() {
        let raw = read_json(&attestation_path)?;
        let doc: BundleHeadAttestation = serde_json::from_value(raw.clone()).map_err(|e| {
            VerifyError::new(codes::SCHEMA_INVALID, format!("invalid bundle head attestation: {e}"))
        })?;
        let input = AttestationInput {
            raw: &raw,
            doc: &doc,
            expected_kind: kind.schema_tag(),
            expected_manifest_hash: &manifest.doc.manifest_hash,
            expected_tenant_id: manifest.doc.tenant_id.as_deref(),
            expected_scope: manifest.doc.scope.as_deref(),
            expected_heads: heads,
            subject_type: kind.schema_tag(),
            strict,
            keys: &governance.keys,
            policy: governance.policy.as_ref(),
            signer_timelines: &governance.signer_timelines,
            trusted_time_authorities: &trust.time_authorities,
        };
        verify_bundle_head_attestation(&input)?;
    } else if strict {
        return Err(VerifyError::new(
            codes::SCHEMA_INVALID,
            "strict mode requires attestation/bundle_head_attestation.json",
        ));
    } else {
        warnings.push(Warning::new(
            codes::BUNDLE_HEAD_ATTESTATION_MISSING_LENIENT,
            "bundle head attestation absent; accepted under lenient mode",
        ));
    }

    let report_path = bundle_root.join("verify/verification_report.json");
    if report_path.exists() {
        let raw = read_json(&report_path)?;
        let doc: VerificationReport = serde_json::from_value(raw.clone()).map_err(|e| {
            VerifyError::new(codes::SCHEMA_INVALID, format!("invalid verification report: {e}"))
        })?;
        let attestation_raw = read_json(&attestation_path).unwrap_or(Value::Null);
        let expected_attestation_hash = attestation_raw
            .get("attestationHash")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let input = ReportInput {
            raw: &raw,
            doc: &doc,
            expected_subject_type: kind.schema_tag(),
            expected_manifest_hash: &manifest.doc.manifest_hash,
            expected_attestation_hash,
            strict,
            keys: &governance.keys,
            policy: governance.policy.as_ref(),
            signer_timelines: &governance.signer_timelines,
            trusted_time_authorities: &trust.time_authorities,
        };
        verify_verification_report(&input)?;
    } else if strict {
        return Err(VerifyError::new(
            codes::SCHEMA_INVALID,
            "strict mode requires verify/verification_report.json",
        ));
    } else {
        warnings.push(crate::report::missing_report_warning());
    }

    Ok(warnings)
}

/// Authorization entry point kind modules use for server-governed signers
/// outside C9/C10 (e.g. a pricing matrix signer or a settlement decision
/// signer) that still participate in the bundle-head-attestation policy.
pub fn authorize_bundle_signer(
    governance: &GovernanceContext,
    document_kind: PolicyDocumentKind,
    subject_type: &str,
    signer_key_id: &str,
    signer_scope: &str,
) -> VerifyResult<()> {
    let policy = governance.policy.as_ref().ok_or_else(|| {
        VerifyError::new(codes::TRUST_ANCHOR_MISSING, "governance policy required for signer authorization")
    })?;
    let key_meta = governance.keys.get(signer_key_id).ok_or_else(|| {
        VerifyError::new(codes::SCHEMA_INVALID, format!("unknown signerKeyId {signer_key_id}"))
    })?;
    authorize_server_signer_for_policy(policy, document_kind, subject_type, signer_key_id, signer_scope, key_meta)
}

/// Top-level dispatch: verify a bundle directory of the given `kind`.
pub fn verify_bundle(
    bundle_root: &Path,
    kind: BundleKind,
    config: &VerifyConfig,
    trust: &TrustAnchors,
) -> VerifyResult<Verdict> {
    match kind {
        BundleKind::JobProof => job_proof::verify(bundle_root, config, trust),
        BundleKind::MonthProof => month_proof::verify(bundle_root, config, trust),
        BundleKind::Invoice => invoice::verify(bundle_root, config, trust),
        BundleKind::FinancePack => finance_pack::verify(bundle_root, config, trust),
        BundleKind::ClosePack => close_pack::verify(bundle_root, config, trust),
    }
}
