// SPDX-License-Identifier: MIT OR Apache-2.0
//! Governance policy + revocation engine (C7): parses v1/v2 governance
//! policies, verifies the v2 root signature, derives key timelines from
//! revocation lists and governance events, and authorizes a signer against
//! subject/scope/keyId/purpose.
//!
//! Per the "Arena of key metadata" design note, every timeline derivation
//! here is a pure function from an immutable input to a brand-new map —
//! nothing is mutated in place, so C6/C9/C10 can all hold read-only views
//! produced by composing these functions.

use crate::canonical::canonical_without_fields;
use crate::crypto::sha256_hex;
use crate::error::{codes, VerifyError, VerifyResult, Warning};
use crate::event_chain::Event;
use crate::keys::{KeyId, KeyMap, KeyMeta};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// Which list inside a policy a document kind is authorized against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDocumentKind {
    VerificationReport,
    BundleHeadAttestation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyRule {
    #[serde(rename = "subjectType")]
    pub subject_type: String,
    #[serde(rename = "allowedScopes")]
    pub allowed_scopes: Vec<String>,
    #[serde(rename = "allowedKeyIds")]
    pub allowed_key_ids: Vec<String>,
    #[serde(rename = "requireGoverned")]
    pub require_governed: bool,
    #[serde(rename = "requiredPurpose")]
    pub required_purpose: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevocationPointer {
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GovernancePolicyV2 {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    pub algorithms: Vec<String>,
    #[serde(rename = "verificationReportSigners")]
    pub verification_report_signers: Vec<PolicyRule>,
    #[serde(rename = "bundleHeadAttestationSigners")]
    pub bundle_head_attestation_signers: Vec<PolicyRule>,
    #[serde(rename = "revocationList")]
    pub revocation_list: RevocationPointer,
    #[serde(rename = "policyHash")]
    pub policy_hash: String,
    #[serde(rename = "signerKeyId")]
    pub signer_key_id: String,
    pub signature: String,
}

/// Parse and structurally validate a `GovernancePolicy.v2` document. Every
/// rule must require `purpose == "server"` and the algorithm list must
/// include Ed25519 — this system signs nothing else.
pub fn parse_policy_v2(raw: &Value) -> VerifyResult<GovernancePolicyV2> {
    let policy: GovernancePolicyV2 = serde_json::from_value(raw.clone()).map_err(|e| {
        VerifyError::new(codes::SCHEMA_INVALID, format!("invalid GovernancePolicy.v2: {e}"))
    })?;
    if policy.schema_version != "GovernancePolicy.v2" {
        return Err(VerifyError::new(
            codes::SCHEMA_INVALID,
            format!("unexpected policy schemaVersion: {}", policy.schema_version),
        ));
    }
    if !policy.algorithms.iter().any(|a| a.eq_ignore_ascii_case("ed25519")) {
        return Err(VerifyError::new(
            codes::SCHEMA_INVALID,
            "policy algorithms must include ed25519",
        ));
    }
    for rule in policy.verification_report_signers.iter().chain(policy.bundle_head_attestation_signers.iter()) {
        if rule.required_purpose != "server" {
            return Err(VerifyError::new(
                codes::SCHEMA_INVALID,
                format!("policy rule for {} must requirePurpose == \"server\"", rule.subject_type),
            ));
        }
        for scope in &rule.allowed_scopes {
            if scope != "global" && scope != "tenant" {
                return Err(VerifyError::new(
                    codes::SCHEMA_INVALID,
                    format!("policy rule allowedScopes entry invalid: {scope}"),
                ));
            }
        }
    }
    Ok(policy)
}

/// Verify the policy's own `policyHash` and its root signature under a
/// trusted governance root key.
pub fn verify_policy_v2_signature(
    raw: &Value,
    policy: &GovernancePolicyV2,
    trusted_governance_roots: &HashMap<KeyId, String>,
) -> VerifyResult<()> {
    let canonical_bytes = canonical_without_fields(raw, &["policyHash", "signature"])?;
    let recomputed = sha256_hex(&canonical_bytes);
    if recomputed != policy.policy_hash {
        return Err(VerifyError::new(
            codes::POLICY_HASH_MISMATCH,
            format!("expected {}, computed {recomputed}", policy.policy_hash),
        )
        .with_detail(serde_json::json!({"expected": policy.policy_hash, "actual": recomputed})));
    }
    let pub_pem = trusted_governance_roots.get(&policy.signer_key_id).ok_or_else(|| {
        VerifyError::new(
            codes::TRUST_ANCHOR_MISSING,
            format!("policy signerKeyId {} is not a trusted governance root", policy.signer_key_id),
        )
    })?;
    let ok = crate::crypto::verify_ed25519_over_hex(&policy.policy_hash, &policy.signature, pub_pem)?;
    if !ok {
        return Err(VerifyError::new(
            codes::GOVERNANCE_POLICY_SIGNATURE_INVALID,
            "governance policy v2 signature invalid",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
struct RotationRow {
    #[serde(rename = "oldKeyId")]
    old_key_id: String,
    #[serde(rename = "newKeyId")]
    new_key_id: String,
    #[serde(rename = "rotatedAt")]
    rotated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
struct RevocationRow {
    #[serde(rename = "keyId")]
    key_id: String,
    #[serde(rename = "revokedAt")]
    revoked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RevocationListV1 {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    rotations: Vec<RotationRow>,
    revocations: Vec<RevocationRow>,
    #[serde(rename = "signerKeyId")]
    pub signer_key_id: String,
    pub signature: String,
    #[serde(rename = "listHash")]
    pub list_hash: String,
}

pub fn parse_revocation_list_v1(raw: &Value) -> VerifyResult<RevocationListV1> {
    let list: RevocationListV1 = serde_json::from_value(raw.clone()).map_err(|e| {
        VerifyError::new(codes::SCHEMA_INVALID, format!("invalid RevocationList.v1: {e}"))
    })?;
    if list.schema_version != "RevocationList.v1" {
        return Err(VerifyError::new(
            codes::SCHEMA_INVALID,
            format!("unexpected revocation list schemaVersion: {}", list.schema_version),
        ));
    }
    Ok(list)
}

pub fn verify_revocation_list_signature(
    raw: &Value,
    list: &RevocationListV1,
    trusted_governance_roots: &HashMap<KeyId, String>,
) -> VerifyResult<()> {
    let canonical_bytes = canonical_without_fields(raw, &["listHash", "signature"])?;
    let recomputed = sha256_hex(&canonical_bytes);
    if recomputed != list.list_hash {
        return Err(VerifyError::new(
            codes::REVOCATION_LIST_HASH_MISMATCH,
            format!("expected {}, computed {recomputed}", list.list_hash),
        ));
    }
    let pub_pem = trusted_governance_roots.get(&list.signer_key_id).ok_or_else(|| {
        VerifyError::new(
            codes::TRUST_ANCHOR_MISSING,
            format!("revocation list signerKeyId {} is not a trusted governance root", list.signer_key_id),
        )
    })?;
    let ok = crate::crypto::verify_ed25519_over_hex(&list.list_hash, &list.signature, pub_pem)?;
    if !ok {
        return Err(VerifyError::new(
            codes::GOVERNANCE_POLICY_SIGNATURE_INVALID,
            "revocation list signature invalid",
        ));
    }
    Ok(())
}

/// Verify the policy's `revocationList` pointer resolves to the bytes
/// actually loaded for `list_raw` (the file at `path` hashing to `sha256`).
pub fn verify_revocation_pointer(pointer: &RevocationPointer, list_bytes: &[u8]) -> VerifyResult<()> {
    let actual = sha256_hex(list_bytes);
    if actual != pointer.sha256 {
        return Err(VerifyError::new(
            codes::SHA256_MISMATCH,
            format!("revocation list at {} does not match policy pointer hash", pointer.path),
        )
        .with_path(pointer.path.clone()));
    }
    Ok(())
}

/// A per-key timeline: the earliest applicable `validFrom`/`rotatedAt`/
/// `revokedAt` observed across every contributing source (revocation list
/// rows, governance events). Per §9 Open Question (b), duplicate rows for
/// the same key take the *earliest* timestamp, never the latest.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timeline {
    pub valid_from: Option<DateTime<Utc>>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

fn take_earliest(existing: &mut Option<DateTime<Utc>>, candidate: DateTime<Utc>) {
    *existing = Some(match existing {
        Some(current) if *current < candidate => *current,
        _ => candidate,
    });
}

/// Derive `{keyId -> Timeline}` from a revocation list's rotation and
/// revocation rows.
pub fn derive_key_timeline_from_revocation_list(list: &RevocationListV1) -> HashMap<KeyId, Timeline> {
    let mut timelines: HashMap<KeyId, Timeline> = HashMap::new();
    for row in &list.rotations {
        let entry = timelines.entry(row.old_key_id.clone()).or_default();
        take_earliest(&mut entry.rotated_at, row.rotated_at);
        // A rotation also establishes the new key's validity start.
        let new_entry = timelines.entry(row.new_key_id.clone()).or_default();
        take_earliest(&mut new_entry.valid_from, row.rotated_at);
    }
    for row in &list.revocations {
        let entry = timelines.entry(row.key_id.clone()).or_default();
        take_earliest(&mut entry.revoked_at, row.revoked_at);
    }
    timelines
}

/// Consume `SERVER_SIGNER_KEY_{REGISTERED,ROTATED,REVOKED}` governance
/// events into the same `{keyId -> Timeline}` shape, additionally marking
/// every key touched as `serverGoverned`.
pub fn derive_server_key_timeline_from_governance_events(
    events: &[Event],
) -> VerifyResult<(HashMap<KeyId, Timeline>, std::collections::HashSet<KeyId>)> {
    let mut timelines: HashMap<KeyId, Timeline> = HashMap::new();
    let mut governed: std::collections::HashSet<KeyId> = std::collections::HashSet::new();

    for event in events {
        match event.event_type.as_str() {
            "SERVER_SIGNER_KEY_REGISTERED" => {
                let key_id = payload_str(&event.payload, "keyId")?;
                governed.insert(key_id.clone());
                let entry = timelines.entry(key_id).or_default();
                if let Some(valid_from) = payload_time(&event.payload, "validFrom")? {
                    take_earliest(&mut entry.valid_from, valid_from);
                } else {
                    take_earliest(&mut entry.valid_from, event.at);
                }
            }
            "SERVER_SIGNER_KEY_ROTATED" => {
                let key_id = payload_str(&event.payload, "keyId")?;
                governed.insert(key_id.clone());
                let entry = timelines.entry(key_id).or_default();
                take_earliest(&mut entry.rotated_at, event.at);
            }
            "SERVER_SIGNER_KEY_REVOKED" => {
                let key_id = payload_str(&event.payload, "keyId")?;
                governed.insert(key_id.clone());
                let entry = timelines.entry(key_id).or_default();
                take_earliest(&mut entry.revoked_at, event.at);
            }
            _ => {}
        }
    }
    Ok((timelines, governed))
}

fn payload_str(payload: &Value, field: &str) -> VerifyResult<String> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| VerifyError::new(codes::SCHEMA_INVALID, format!("governance event payload missing {field}")))
}

fn payload_time(payload: &Value, field: &str) -> VerifyResult<Option<DateTime<Utc>>> {
    match payload.get(field).and_then(Value::as_str) {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|e| VerifyError::new(codes::SCHEMA_INVALID, format!("invalid {field}: {e}"))),
        None => Ok(None),
    }
}

/// Apply a derived timeline over a bundle's initial key map, producing a
/// brand-new map (never mutating `base` in place).
pub fn apply_timelines(
    base: &KeyMap,
    timelines: &HashMap<KeyId, Timeline>,
    governed: &std::collections::HashSet<KeyId>,
) -> KeyMap {
    let mut out = base.clone();
    for (key_id, timeline) in timelines {
        let entry = out.entry(key_id.clone()).or_insert_with(KeyMeta::default);
        if let Some(valid_from) = timeline.valid_from {
            entry.valid_from = Some(entry.valid_from.map_or(valid_from, |existing| existing.min(valid_from)));
        }
        if let Some(rotated_at) = timeline.rotated_at {
            entry.rotated_at = Some(entry.rotated_at.map_or(rotated_at, |existing| existing.min(rotated_at)));
        }
        if let Some(revoked_at) = timeline.revoked_at {
            entry.revoked_at = Some(entry.revoked_at.map_or(revoked_at, |existing| existing.min(revoked_at)));
        }
    }
    for key_id in governed {
        if let Some(entry) = out.get_mut(key_id) {
            entry.server_governed = true;
        }
    }
    out
}

/// Select the rule for `subject_type` from the appropriate list and
/// authorize `signer_key_id`/`signer_scope`/`key_meta` against it.
pub fn authorize_server_signer_for_policy(
    policy: &GovernancePolicyV2,
    document_kind: PolicyDocumentKind,
    subject_type: &str,
    signer_key_id: &str,
    signer_scope: &str,
    key_meta: &KeyMeta,
) -> VerifyResult<()> {
    let rules = match document_kind {
        PolicyDocumentKind::VerificationReport => &policy.verification_report_signers,
        PolicyDocumentKind::BundleHeadAttestation => &policy.bundle_head_attestation_signers,
    };
    let rule = rules.iter().find(|r| r.subject_type == subject_type).ok_or_else(|| {
        VerifyError::new(
            codes::SIGNER_SCOPE_NOT_ALLOWED,
            format!("no policy rule for subjectType {subject_type}"),
        )
    })?;
    if !rule.allowed_scopes.iter().any(|s| s == signer_scope) {
        return Err(VerifyError::new(
            codes::SIGNER_SCOPE_NOT_ALLOWED,
            format!("scope {signer_scope} not allowed for subjectType {subject_type}"),
        ));
    }
    if !rule.allowed_key_ids.iter().any(|k| k == signer_key_id) {
        return Err(VerifyError::new(
            codes::SIGNER_KEYID_NOT_ALLOWED,
            format!("keyId {signer_key_id} not allowed for subjectType {subject_type}"),
        ));
    }
    if rule.require_governed && !key_meta.server_governed {
        return Err(VerifyError::new(
            codes::SERVER_SIGNER_KEY_NOT_GOVERNED,
            "policy requires a governed server key",
        ));
    }
    if key_meta.purpose.as_deref() != Some(rule.required_purpose.as_str()) {
        return Err(VerifyError::new(
            codes::SERVER_SIGNER_KEY_NOT_GOVERNED,
            format!("key purpose must be {}", rule.required_purpose),
        ));
    }
    Ok(())
}

/// Prospective-timeline enforcement shared by C9/C10 (§4.7): given the
/// signer's derived `Timeline` and the document's resolved effective
/// signing time, reject `SIGNER_REVOKED`/`SIGNER_ROTATED` if the boundary
/// has passed; if the boundary hasn't passed but the clock itself isn't
/// trustworthy, reject `SIGNING_TIME_UNPROVABLE` rather than silently
/// accepting an unprovable past.
pub fn check_signer_prospective_timeline(
    timeline: &Timeline,
    effective: crate::timestamp::EffectiveTime,
) -> VerifyResult<()> {
    if let Some(revoked_at) = timeline.revoked_at {
        if effective.at >= revoked_at {
            return Err(VerifyError::new(codes::SIGNER_REVOKED, "signer key revoked at or before effective signing time"));
        }
        if !effective.trustworthy {
            return Err(VerifyError::new(
                codes::SIGNING_TIME_UNPROVABLE,
                "signing time is not provably before the signer's revocation boundary",
            ));
        }
    }
    if let Some(rotated_at) = timeline.rotated_at {
        if effective.at >= rotated_at {
            return Err(VerifyError::new(codes::SIGNER_ROTATED, "signer key rotated at or before effective signing time"));
        }
        if !effective.trustworthy {
            return Err(VerifyError::new(
                codes::SIGNING_TIME_UNPROVABLE,
                "signing time is not provably before the signer's rotation boundary",
            ));
        }
    }
    Ok(())
}

/// Accept a `GovernancePolicy.v1` document under non-strict mode, emitting
/// the lenient warning; reject it outright under strict mode (scenario 3 of
/// §8).
pub fn accept_policy_v1_under_mode(raw: &Value, strict: bool) -> VerifyResult<Warning> {
    let schema_version = raw.get("schemaVersion").and_then(Value::as_str).unwrap_or_default();
    if schema_version != "GovernancePolicy.v1" {
        return Err(VerifyError::new(
            codes::SCHEMA_INVALID,
            format!("unexpected policy schemaVersion: {schema_version}"),
        ));
    }
    if strict {
        return Err(VerifyError::new(
            codes::GOVERNANCE_POLICY_V1_UNDER_STRICT,
            "strict requires GovernancePolicy.v2",
        ));
    }
    Ok(Warning::new(
        codes::GOVERNANCE_POLICY_V1_ACCEPTED_LENIENT,
        "GovernancePolicy.v1 accepted under lenient mode",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonical;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use chrono::TimeZone;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use serde_json::json;

    fn demo_keypair() -> (SigningKey, String) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        let pem = pem::encode(&pem::Pem::new("PUBLIC KEY".to_string(), verifying_key.to_bytes().to_vec()));
        (signing_key, pem)
    }

    fn build_signed_policy_v2() -> (Value, GovernancePolicyV2, SigningKey, String) {
        let (signing_key, pem) = demo_keypair();
        let unsigned = json!({
            "schemaVersion": "GovernancePolicy.v2",
            "algorithms": ["ed25519"],
            "verificationReportSigners": [{
                "subjectType": "JobProofBundle.v1",
                "allowedScopes": ["tenant"],
                "allowedKeyIds": ["key-1"],
                "requireGoverned": true,
                "requiredPurpose": "server",
            }],
            "bundleHeadAttestationSigners": [{
                "subjectType": "JobProofBundle.v1",
                "allowedScopes": ["tenant"],
                "allowedKeyIds": ["key-1"],
                "requireGoverned": true,
                "requiredPurpose": "server",
            }],
            "revocationList": {"path": "governance/revocation_list.json", "sha256": "0".repeat(64)},
            "signerKeyId": "root-1",
        });
        let policy_hash = sha256_hex(&canonical_without_fields(&unsigned, &["policyHash", "signature"]).unwrap());
        let signature = BASE64.encode(signing_key.sign(policy_hash.as_bytes()).to_bytes());
        let mut full = unsigned.as_object().unwrap().clone();
        full.insert("policyHash".to_string(), json!(policy_hash));
        full.insert("signature".to_string(), json!(signature));
        let raw = Value::Object(full);
        let policy = parse_policy_v2(&raw).unwrap();
        (raw, policy, signing_key, pem)
    }

    #[test]
    fn parses_and_verifies_a_v2_policy() {
        let (raw, policy, _sk, pem) = build_signed_policy_v2();
        let mut roots = HashMap::new();
        roots.insert("root-1".to_string(), pem);
        assert!(verify_policy_v2_signature(&raw, &policy, &roots).is_ok());
    }

    #[test]
    fn rejects_tampered_policy_hash() {
        let (mut raw, mut policy, _sk, pem) = build_signed_policy_v2();
        raw["policyHash"] = json!("f".repeat(64));
        policy.policy_hash = "f".repeat(64);
        let mut roots = HashMap::new();
        roots.insert("root-1".to_string(), pem);
        let err = verify_policy_v2_signature(&raw, &policy, &roots).unwrap_err();
        assert_eq!(err.code, codes::POLICY_HASH_MISMATCH);
    }

    #[test]
    fn authorize_checks_scope_keyid_and_purpose() {
        let (_raw, policy, _sk, _pem) = build_signed_policy_v2();
        let meta = KeyMeta {
            purpose: Some("server".to_string()),
            server_governed: true,
            ..Default::default()
        };
        assert!(authorize_server_signer_for_policy(
            &policy,
            PolicyDocumentKind::BundleHeadAttestation,
            "JobProofBundle.v1",
            "key-1",
            "tenant",
            &meta
        )
        .is_ok());

        let err = authorize_server_signer_for_policy(
            &policy,
            PolicyDocumentKind::BundleHeadAttestation,
            "JobProofBundle.v1",
            "key-1",
            "global",
            &meta,
        )
        .unwrap_err();
        assert_eq!(err.code, codes::SIGNER_SCOPE_NOT_ALLOWED);

        let err = authorize_server_signer_for_policy(
            &policy,
            PolicyDocumentKind::BundleHeadAttestation,
            "JobProofBundle.v1",
            "key-2",
            "tenant",
            &meta,
        )
        .unwrap_err();
        assert_eq!(err.code, codes::SIGNER_KEYID_NOT_ALLOWED);
    }

    #[test]
    fn revocation_timeline_takes_earliest_duplicate() {
        let list = RevocationListV1 {
            schema_version: "RevocationList.v1".to_string(),
            rotations: vec![],
            revocations: vec![
                RevocationRow { key_id: "key-1".to_string(), revoked_at: Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap() },
                RevocationRow { key_id: "key-1".to_string(), revoked_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() },
            ],
            signer_key_id: "root-1".to_string(),
            signature: String::new(),
            list_hash: String::new(),
        };
        let timelines = derive_key_timeline_from_revocation_list(&list);
        let timeline = timelines.get("key-1").unwrap();
        assert_eq!(timeline.revoked_at.unwrap(), Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn policy_v1_rejected_strict_accepted_lenient() {
        let raw = json!({"schemaVersion": "GovernancePolicy.v1"});
        let err = accept_policy_v1_under_mode(&raw, true).unwrap_err();
        assert_eq!(err.code, codes::GOVERNANCE_POLICY_V1_UNDER_STRICT);
        let warning = accept_policy_v1_under_mode(&raw, false).unwrap();
        assert_eq!(warning.code, codes::GOVERNANCE_POLICY_V1_ACCEPTED_LENIENT);
    }

    #[test]
    fn canonical_idempotence_holds_for_policy_doc() {
        let (raw, _policy, _sk, _pem) = build_signed_policy_v2();
        let once = canonical(&raw).unwrap();
        let parsed = crate::canonical::parse(&once).unwrap();
        let twice = canonical(&parsed).unwrap();
        assert_eq!(once, twice);
    }
}
