// SPDX-License-Identifier: MIT OR Apache-2.0
//! JobProofBundle.v1 (leaf bundle): the main job event stream plus the two
//! governance streams, with scope isolation and provenance-ref checks.

use super::{
    assert_header, declared_head_from_snapshot, enforce_governance_scope_isolation,
    load_and_verify_event_stream, load_governance_context, verify_attestation_and_report, TrustAnchors,
    Verdict,
};
use crate::config::VerifyConfig;
use crate::error::VerifyResult;
use crate::kinds::BundleKind;
use crate::manifest::verify_manifest;
use serde_json::json;
use std::path::Path;

pub fn verify(bundle_root: &Path, config: &VerifyConfig, trust: &TrustAnchors) -> VerifyResult<Verdict> {
    assert_header(bundle_root, BundleKind::JobProof)?;
    let manifest = verify_manifest(bundle_root, BundleKind::JobProof, config.strict, config.hash_concurrency)?;
    let mut warnings = manifest.warnings.clone();

    // Governance streams are verified against an empty key map first so we
    // can bootstrap SERVER_SIGNER_KEY_* timelines from them before the main
    // stream (which may itself reference governed keys) is checked.
    let bootstrap_keys = crate::keys::load_public_keys(bundle_root)?;
    let global_head = declared_head_from_snapshot(&bundle_root.join("governance/global/snapshot.json"))?;
    let tenant_head = declared_head_from_snapshot(&bundle_root.join("governance/tenant/snapshot.json"))?;
    let global_events = load_and_verify_event_stream(
        &bundle_root.join("governance/global/events"),
        &bootstrap_keys,
        global_head,
        config.strict,
    )?;
    let tenant_events = load_and_verify_event_stream(
        &bundle_root.join("governance/tenant/events"),
        &bootstrap_keys,
        tenant_head,
        config.strict,
    )?;
    enforce_governance_scope_isolation(&global_events, &tenant_events)?;

    let governance = load_governance_context(bundle_root, config.strict, trust, &global_events, &tenant_events)?;
    warnings.extend(governance.warnings.clone());

    let job_head = declared_head_from_snapshot(&bundle_root.join("job/snapshot.json"))?;
    let job_events =
        load_and_verify_event_stream(&bundle_root.join("events"), &governance.keys, job_head.clone(), config.strict)?;

    let heads = json!({
        "job": job_events.last().map(|e| e.chain_hash.clone()),
        "governanceGlobal": global_events.last().map(|e| e.chain_hash.clone()),
        "governanceTenant": tenant_events.last().map(|e| e.chain_hash.clone()),
    });

    warnings.extend(verify_attestation_and_report(
        bundle_root,
        BundleKind::JobProof,
        &manifest,
        &heads,
        config.strict,
        &governance,
        trust,
    )?);

    Ok(Verdict { ok: true, warnings, manifest_hash: manifest.doc.manifest_hash })
}
