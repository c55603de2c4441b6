// SPDX-License-Identifier: MIT OR Apache-2.0
//! MonthProofBundle.v1 (leaf bundle): a free-headed event stream (no
//! declared chain head to bind against) plus the two governance streams.

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
    assert_header(bundle_root, BundleKind::MonthProof)?;
    let manifest = verify_manifest(bundle_root, BundleKind::MonthProof, config.strict, config.hash_concurrency)?;
    let mut warnings = manifest.warnings.clone();

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

    // The month stream has no externally declared head to bind against; it
    // is free to terminate wherever its own last event lands.
    let month_events = load_and_verify_event_stream(&bundle_root.join("events"), &governance.keys, None, config.strict)?;

    let heads = json!({
        "month": month_events.last().map(|e| e.chain_hash.clone()),
        "governanceGlobal": global_events.last().map(|e| e.chain_hash.clone()),
        "governanceTenant": tenant_events.last().map(|e| e.chain_hash.clone()),
    });

    warnings.extend(verify_attestation_and_report(
        bundle_root,
        BundleKind::MonthProof,
        &manifest,
        &heads,
        config.strict,
        &governance,
        trust,
    )?);

    Ok(Verdict { ok: true, warnings, manifest_hash: manifest.doc.manifest_hash })
}
