// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared fixture builders for the end-to-end bundle tests in this
//! directory. These build the smallest on-disk bundle tree that satisfies
//! each kind's manifest and governance scaffolding, with zero-length event
//! streams where the scenario under test doesn't care about signed events.

use chrono::{DateTime, Utc};
use settld_verify_core::canonical::{canonical, canonical_without_fields};
use settld_verify_core::crypto::sha256_hex;
use settld_verify_core::kinds::BundleKind;
use std::fs;
use std::path::Path;

pub fn write_file(root: &Path, rel: &str, bytes: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, bytes).unwrap();
}

/// The base scaffolding every `JobProofBundle.v1`/`MonthProofBundle.v1`
/// needs besides `manifest.json`: empty job/governance event streams (zero
/// events each, so no signing is required), empty snapshots, and an empty
/// key map. Callers add `attestation/bundle_head_attestation.json` and
/// `verify/verification_report.json` (and any governance policy) on top.
pub fn write_leaf_scaffolding(dir: &Path, with_job_snapshot: bool) {
    write_file(dir, "events/events.jsonl", b"");
    write_file(dir, "events/payload_material.jsonl", b"");
    if with_job_snapshot {
        write_file(dir, "job/snapshot.json", b"{}");
    }
    write_file(dir, "keys/public_keys.json", br#"{"keys":[]}"#);
    write_file(dir, "governance/global/events/events.jsonl", b"");
    write_file(dir, "governance/global/events/payload_material.jsonl", b"");
    write_file(dir, "governance/global/snapshot.json", b"{}");
    write_file(dir, "governance/tenant/events/events.jsonl", b"");
    write_file(dir, "governance/tenant/events/payload_material.jsonl", b"");
    write_file(dir, "governance/tenant/snapshot.json", b"{}");
}

/// Build and write `manifest.json` for `dir`, listing exactly `files`
/// (relative paths, already present on disk) with their recomputed SHA-256
/// and size. Returns the manifest document's own recomputed `manifestHash`.
pub fn write_manifest(dir: &Path, kind: BundleKind, tenant_id: &str, scope: &str, files: &[&str]) -> String {
    let mut entries = Vec::new();
    for rel in files {
        let bytes = fs::read(dir.join(rel)).unwrap_or_else(|e| panic!("reading {rel}: {e}"));
        entries.push(serde_json::json!({
            "name": rel,
            "sha256": sha256_hex(&bytes),
            "sizeBytes": bytes.len(),
        }));
    }
    let doc = serde_json::json!({
        "schemaVersion": kind.schema_tag(),
        "kind": kind.schema_tag(),
        "tenantId": tenant_id,
        "scope": scope,
        "files": entries,
    });
    let hash = sha256_hex(&canonical_without_fields(&doc, &["manifestHash"]).unwrap());
    let mut full = doc.as_object().unwrap().clone();
    full.insert("manifestHash".to_string(), serde_json::json!(hash));
    let manifest = serde_json::Value::Object(full);
    write_file(dir, "manifest.json", manifest.to_string().as_bytes());
    hash
}

/// Write a single unsigned event (must be a `SignerKind::None` type, e.g.
/// `JOB_NOTE_ADDED`) as a one-line `events.jsonl`/`payload_material.jsonl`
/// pair at `dir`/`rel_dir`, chained from an empty stream.
pub fn write_unsigned_event(dir: &Path, rel_dir: &str, event_type: &str, payload: serde_json::Value) {
    let at: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
    let actor = serde_json::json!({"kind": "system"});
    let material = serde_json::json!({
        "v": 1,
        "id": "evt-0",
        "at": at.to_rfc3339(),
        "streamId": "stream-1",
        "type": event_type,
        "actor": actor,
        "payload": payload,
    });
    let payload_hash = sha256_hex(&canonical(&material).unwrap());
    let chain_envelope = serde_json::json!({
        "v": 1,
        "prevChainHash": serde_json::Value::Null,
        "payloadHash": payload_hash,
    });
    let chain_hash = sha256_hex(&canonical(&chain_envelope).unwrap());

    let mut event_line = material.as_object().unwrap().clone();
    event_line.insert("payloadHash".to_string(), serde_json::json!(payload_hash));
    event_line.insert("prevChainHash".to_string(), serde_json::Value::Null);
    event_line.insert("chainHash".to_string(), serde_json::json!(chain_hash));
    event_line.insert("signature".to_string(), serde_json::Value::Null);
    event_line.insert("signerKeyId".to_string(), serde_json::Value::Null);

    write_file(dir, &format!("{rel_dir}/events.jsonl"), format!("{}\n", serde_json::Value::Object(event_line)).as_bytes());
    write_file(dir, &format!("{rel_dir}/payload_material.jsonl"), format!("{material}\n").as_bytes());
}

pub fn job_proof_required_files_present_on_disk() -> &'static [&'static str] {
    &[
        "events/events.jsonl",
        "events/payload_material.jsonl",
        "job/snapshot.json",
        "keys/public_keys.json",
        "governance/global/events/events.jsonl",
        "governance/global/events/payload_material.jsonl",
        "governance/global/snapshot.json",
        "governance/tenant/events/events.jsonl",
        "governance/tenant/events/payload_material.jsonl",
        "governance/tenant/snapshot.json",
    ]
}
