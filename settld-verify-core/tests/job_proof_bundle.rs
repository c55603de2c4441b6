// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end `JobProofBundle.v1` scenarios driven through the public
//! `verify_bundle` entry point, exercising the full manifest/governance/
//! event-chain pipeline rather than any single module in isolation.

mod common;

use common::{job_proof_required_files_present_on_disk, write_file, write_leaf_scaffolding, write_manifest, write_unsigned_event};
use settld_verify_core::bundle::{verify_bundle, TrustAnchors};
use settld_verify_core::config::VerifyConfig;
use settld_verify_core::error::codes;
use settld_verify_core::kinds::BundleKind;

#[test]
fn accepts_a_minimal_bundle_leniently_with_expected_warnings() {
    let dir = tempfile::tempdir().unwrap();
    write_leaf_scaffolding(dir.path(), true);
    write_manifest(dir.path(), BundleKind::JobProof, "tenant-1", "tenant", job_proof_required_files_present_on_disk());

    let config = VerifyConfig::default().strict(false);
    let verdict = verify_bundle(dir.path(), BundleKind::JobProof, &config, &TrustAnchors::default()).unwrap();

    let seen: Vec<&str> = verdict.warnings.iter().map(|w| w.code).collect();
    assert!(seen.contains(&codes::MANIFEST_REQUIRED_FILES_MISSING_LENIENT), "{seen:?}");
    assert!(seen.contains(&codes::GOVERNANCE_DIRECTORY_ABSENT_LENIENT), "{seen:?}");
    assert!(seen.contains(&codes::BUNDLE_HEAD_ATTESTATION_MISSING_LENIENT), "{seen:?}");
    assert!(seen.contains(&codes::VERIFICATION_REPORT_MISSING_LENIENT), "{seen:?}");
    assert_eq!(verdict.manifest_hash.len(), 64);
}

#[test]
fn rejects_the_same_fixture_under_strict_mode_for_missing_required_files() {
    let dir = tempfile::tempdir().unwrap();
    write_leaf_scaffolding(dir.path(), true);
    write_manifest(dir.path(), BundleKind::JobProof, "tenant-1", "tenant", job_proof_required_files_present_on_disk());

    let config = VerifyConfig::default().strict(true);
    let err = verify_bundle(dir.path(), BundleKind::JobProof, &config, &TrustAnchors::default()).unwrap_err();
    assert_eq!(err.code, codes::MANIFEST_MISSING_REQUIRED_FILES);
}

#[test]
fn accepts_a_governance_policy_v1_leniently_in_place_of_the_absent_directory_warning() {
    let dir = tempfile::tempdir().unwrap();
    write_leaf_scaffolding(dir.path(), true);
    write_file(dir.path(), "governance/policy.json", br#"{"schemaVersion":"GovernancePolicy.v1"}"#);
    write_manifest(dir.path(), BundleKind::JobProof, "tenant-1", "tenant", job_proof_required_files_present_on_disk());

    let config = VerifyConfig::default().strict(false);
    let verdict = verify_bundle(dir.path(), BundleKind::JobProof, &config, &TrustAnchors::default()).unwrap();

    let seen: Vec<&str> = verdict.warnings.iter().map(|w| w.code).collect();
    assert!(seen.contains(&codes::GOVERNANCE_POLICY_V1_ACCEPTED_LENIENT), "{seen:?}");
    assert!(!seen.contains(&codes::GOVERNANCE_DIRECTORY_ABSENT_LENIENT), "{seen:?}");
}

/// Strict mode rejects a `GovernancePolicy.v1` document outright. The
/// manifest's required-file set is fully satisfied (with placeholder
/// attestation/report bytes, never parsed because the policy check fails
/// first) so the decisive error is the policy one, not a manifest one.
#[test]
fn rejects_a_governance_policy_v1_outright_under_strict_mode() {
    let dir = tempfile::tempdir().unwrap();
    write_leaf_scaffolding(dir.path(), true);
    write_file(dir.path(), "governance/policy.json", br#"{"schemaVersion":"GovernancePolicy.v1"}"#);
    write_file(dir.path(), "attestation/bundle_head_attestation.json", b"{}");
    write_file(dir.path(), "verify/verification_report.json", b"{}");
    write_manifest(dir.path(), BundleKind::JobProof, "tenant-1", "tenant", BundleKind::JobProof.required_files());

    let config = VerifyConfig::default().strict(true);
    let err = verify_bundle(dir.path(), BundleKind::JobProof, &config, &TrustAnchors::default()).unwrap_err();
    assert_eq!(err.code, codes::GOVERNANCE_POLICY_V1_UNDER_STRICT);
}

#[test]
fn rejects_a_tampered_job_event_payload_hash() {
    let dir = tempfile::tempdir().unwrap();
    write_leaf_scaffolding(dir.path(), true);
    write_unsigned_event(dir.path(), "events", "JOB_NOTE_ADDED", serde_json::json!({"note": "hello"}));

    // Flip the stored payloadHash so it no longer matches the recomputed
    // one, without touching payload_material.jsonl.
    let events_path = dir.path().join("events/events.jsonl");
    let mut line: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&events_path).unwrap().trim()).unwrap();
    line["payloadHash"] = serde_json::json!("0".repeat(64));
    std::fs::write(&events_path, format!("{line}\n")).unwrap();

    write_manifest(dir.path(), BundleKind::JobProof, "tenant-1", "tenant", job_proof_required_files_present_on_disk());

    let config = VerifyConfig::default().strict(false);
    let err = verify_bundle(dir.path(), BundleKind::JobProof, &config, &TrustAnchors::default()).unwrap_err();
    assert_eq!(err.code, codes::PAYLOAD_HASH_MISMATCH);
}
