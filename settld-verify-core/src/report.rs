// SPDX-License-Identifier: MIT OR Apache-2.0
//! Verification-report verifier (C10): same signing discipline as C9, bound
//! to `subject.manifestHash` and the embedded bundle-head attestation's
//! `attestationHash` rather than directly to a `heads` block.

use crate::canonical::canonical_without_fields;
use crate::crypto::{sha256_hex, verify_ed25519_over_hex};
use crate::error::{codes, VerifyError, VerifyResult, Warning};
use crate::governance::{
    authorize_server_signer_for_policy, check_signer_prospective_timeline, GovernancePolicyV2,
    PolicyDocumentKind, Timeline,
};
use crate::keys::{check_usable_at, KeyId, KeyMap};
use crate::timestamp::{resolve_effective_time, TimestampProofV1};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct ReportSubject {
    #[serde(rename = "type")]
    pub subject_type: String,
    #[serde(rename = "manifestHash")]
    pub manifest_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddedAttestationRef {
    #[serde(rename = "attestationHash")]
    pub attestation_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportSignerInfo {
    #[serde(rename = "keyId")]
    pub key_id: String,
    pub purpose: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerificationReport {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    pub subject: ReportSubject,
    #[serde(rename = "bundleHeadAttestation")]
    pub bundle_head_attestation: EmbeddedAttestationRef,
    pub outcome: String,
    pub warnings: Vec<Value>,
    pub signer: Option<ReportSignerInfo>,
    #[serde(rename = "signerKeyId")]
    pub signer_key_id: Option<String>,
    #[serde(rename = "signerScope")]
    pub signer_scope: Option<String>,
    #[serde(rename = "signedAt")]
    pub signed_at: Option<DateTime<Utc>>,
    pub signature: Option<String>,
    #[serde(rename = "timestampProof")]
    pub timestamp_proof: Option<TimestampProofV1>,
    #[serde(rename = "reportHash")]
    pub report_hash: Option<String>,
}

const CLOSED_REPORT_WARNING_CODES: &[&str] = &[
    codes::VERIFICATION_REPORT_MISSING_LENIENT,
    codes::GOVERNANCE_POLICY_V1_ACCEPTED_LENIENT,
    codes::MANIFEST_REQUIRED_FILES_MISSING_LENIENT,
    codes::PRICING_MATRIX_SIGNATURES_MISSING_LENIENT,
    codes::PRICING_MATRIX_SIGNATURE_V1_BYTES_LEGACY_LENIENT,
    codes::BUNDLE_HEAD_ATTESTATION_MISSING_LENIENT,
    codes::GOVERNANCE_DIRECTORY_ABSENT_LENIENT,
];

pub struct ReportInput<'a> {
    pub raw: &'a Value,
    pub doc: &'a VerificationReport,
    pub expected_subject_type: &'a str,
    pub expected_manifest_hash: &'a str,
    pub expected_attestation_hash: &'a str,
    pub strict: bool,
    pub keys: &'a KeyMap,
    pub policy: Option<&'a GovernancePolicyV2>,
    pub signer_timelines: &'a HashMap<KeyId, Timeline>,
    pub trusted_time_authorities: &'a HashMap<KeyId, String>,
}

pub fn verify_verification_report(input: &ReportInput) -> VerifyResult<()> {
    let doc = input.doc;

    if doc.schema_version != "VerificationReport.v1" {
        return Err(VerifyError::new(
            codes::SCHEMA_INVALID,
            format!("unexpected report schemaVersion: {}", doc.schema_version),
        ));
    }
    if doc.subject.subject_type != input.expected_subject_type {
        return Err(VerifyError::new(codes::BUNDLE_TYPE_MISMATCH, "report subject.type does not match bundle kind"));
    }
    if doc.subject.manifest_hash != input.expected_manifest_hash {
        return Err(VerifyError::new(
            codes::MANIFEST_HASH_MISMATCH,
            "report subject.manifestHash does not match bundle manifestHash",
        )
        .with_detail(serde_json::json!({
            "expected": input.expected_manifest_hash,
            "actual": doc.subject.manifest_hash,
        })));
    }
    if doc.bundle_head_attestation.attestation_hash != input.expected_attestation_hash {
        return Err(VerifyError::new(
            codes::ATTESTATION_HASH_MISMATCH,
            "report's embedded bundleHeadAttestation.attestationHash does not match the verified attestation",
        )
        .with_detail(serde_json::json!({
            "expected": input.expected_attestation_hash,
            "actual": doc.bundle_head_attestation.attestation_hash,
        })));
    }

    for warning in &doc.warnings {
        let code = warning.get("code").and_then(Value::as_str).unwrap_or_default();
        if !CLOSED_REPORT_WARNING_CODES.contains(&code) {
            return Err(VerifyError::new(
                codes::SCHEMA_INVALID,
                format!("report contains an unrecognized warning code: {code}"),
            ));
        }
    }

    if let Some(signer) = &doc.signer {
        if let Some(signer_key_id) = &doc.signer_key_id {
            if &signer.key_id != signer_key_id {
                return Err(VerifyError::new(
                    codes::SCHEMA_INVALID,
                    "report signer.keyId does not match top-level signerKeyId",
                ));
            }
        }
    }

    if input.strict && (doc.signer_key_id.is_none() || doc.signature.is_none()) {
        return Err(VerifyError::new(
            codes::SCHEMA_INVALID,
            "strict mode requires a signed verification report",
        ));
    }

    if let Some(declared_hash) = &doc.report_hash {
        let recomputed = sha256_hex(&canonical_without_fields(
            input.raw,
            &["reportHash", "signature"],
        )?);
        if &recomputed != declared_hash {
            return Err(VerifyError::new(
                codes::REPORT_HASH_MISMATCH,
                format!("expected {declared_hash}, computed {recomputed}"),
            )
            .with_detail(serde_json::json!({"expected": declared_hash, "actual": recomputed})));
        }
    }

    if let (Some(signer_key_id), Some(signature)) = (&doc.signer_key_id, &doc.signature) {
        let key_meta = input.keys.get(signer_key_id).ok_or_else(|| {
            VerifyError::new(codes::SCHEMA_INVALID, format!("unknown report signerKeyId {signer_key_id}"))
        })?;
        let hash_to_verify = doc.report_hash.clone().unwrap_or_else(|| {
            sha256_hex(&canonical_without_fields(input.raw, &["reportHash", "signature"]).unwrap_or_default())
        });
        let ok = verify_ed25519_over_hex(&hash_to_verify, signature, &key_meta.public_key_pem)?;
        if !ok {
            return Err(VerifyError::new(codes::SCHEMA_INVALID, "report signature invalid"));
        }

        if input.strict {
            let policy = input.policy.ok_or_else(|| {
                VerifyError::new(codes::TRUST_ANCHOR_MISSING, "strict mode requires a governance policy")
            })?;
            let signer_scope = doc.signer_scope.as_deref().unwrap_or("tenant");
            authorize_server_signer_for_policy(
                policy,
                PolicyDocumentKind::VerificationReport,
                input.expected_subject_type,
                signer_key_id,
                signer_scope,
                key_meta,
            )
            .map_err(|e| e.wrap(codes::REPORT_SIGNER_NOT_AUTHORIZED, "verification report signer not authorized"))?;
        }

        let effective = resolve_effective_time(
            input.raw,
            doc.timestamp_proof.as_ref(),
            doc.signed_at.unwrap_or_default(),
            input.trusted_time_authorities,
        )?;
        check_usable_at(key_meta, effective.at)?;

        let timeline = input.signer_timelines.get(signer_key_id).copied().unwrap_or_default();
        check_signer_prospective_timeline(&timeline, effective)?;
    }

    Ok(())
}

/// Build the lenient warning emitted when a bundle omits its verification
/// report entirely (non-strict only; strict mode treats it as a hard error
/// at the bundle-verifier layer).
pub fn missing_report_warning() -> Warning {
    Warning::new(
        codes::VERIFICATION_REPORT_MISSING_LENIENT,
        "verification report absent; accepted under lenient mode",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::canonical;
    use crate::keys::KeyMeta;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use chrono::TimeZone;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use serde_json::json;

    fn signed_report(manifest_hash: &str, attestation_hash: &str) -> (Value, VerificationReport, KeyMap) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        let pem = pem::encode(&pem::Pem::new("PUBLIC KEY".to_string(), verifying_key.to_bytes().to_vec()));

        let unsigned = json!({
            "schemaVersion": "VerificationReport.v1",
            "subject": {"type": "JobProofBundle.v1", "manifestHash": manifest_hash},
            "bundleHeadAttestation": {"attestationHash": attestation_hash},
            "outcome": "ok",
            "warnings": [],
            "signer": {"keyId": "key-1", "purpose": "server"},
            "signerKeyId": "key-1",
            "signerScope": "tenant",
            "signedAt": "2026-01-01T00:00:00Z",
        });
        let report_hash = sha256_hex(&canonical_without_fields(&unsigned, &["reportHash", "signature"]).unwrap());
        let signature = BASE64.encode(signing_key.sign(report_hash.as_bytes()).to_bytes());
        let mut full = unsigned.as_object().unwrap().clone();
        full.insert("reportHash".to_string(), json!(report_hash));
        full.insert("signature".to_string(), json!(signature));
        let raw = Value::Object(full);
        let doc: VerificationReport = serde_json::from_value(raw.clone()).unwrap();

        let mut keys = KeyMap::new();
        keys.insert(
            "key-1".to_string(),
            KeyMeta {
                public_key_pem: pem,
                purpose: Some("server".to_string()),
                valid_from: Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
                server_governed: true,
                ..Default::default()
            },
        );
        (raw, doc, keys)
    }

    #[test]
    fn accepts_a_consistent_report_non_strict() {
        let (raw, doc, keys) = signed_report(&"a".repeat(64), &"b".repeat(64));
        let input = ReportInput {
            raw: &raw,
            doc: &doc,
            expected_subject_type: "JobProofBundle.v1",
            expected_manifest_hash: &"a".repeat(64),
            expected_attestation_hash: &"b".repeat(64),
            strict: false,
            keys: &keys,
            policy: None,
            signer_timelines: &HashMap::new(),
            trusted_time_authorities: &HashMap::new(),
        };
        assert!(verify_verification_report(&input).is_ok());
    }

    #[test]
    fn rejects_attestation_hash_mismatch() {
        let (raw, doc, keys) = signed_report(&"a".repeat(64), &"b".repeat(64));
        let input = ReportInput {
            raw: &raw,
            doc: &doc,
            expected_subject_type: "JobProofBundle.v1",
            expected_manifest_hash: &"a".repeat(64),
            expected_attestation_hash: &"c".repeat(64),
            strict: false,
            keys: &keys,
            policy: None,
            signer_timelines: &HashMap::new(),
            trusted_time_authorities: &HashMap::new(),
        };
        let err = verify_verification_report(&input).unwrap_err();
        assert_eq!(err.code, codes::ATTESTATION_HASH_MISMATCH);
    }

    #[test]
    fn rejects_unrecognized_warning_code() {
        let (mut raw, _doc, keys) = signed_report(&"a".repeat(64), &"b".repeat(64));
        raw["warnings"] = json!([{"code": "NOT_A_REAL_CODE", "message": "x"}]);
        let doc: VerificationReport = serde_json::from_value(raw.clone()).unwrap();
        let input = ReportInput {
            raw: &raw,
            doc: &doc,
            expected_subject_type: "JobProofBundle.v1",
            expected_manifest_hash: &"a".repeat(64),
            expected_attestation_hash: &"b".repeat(64),
            strict: false,
            keys: &keys,
            policy: None,
            signer_timelines: &HashMap::new(),
            trusted_time_authorities: &HashMap::new(),
        };
        let err = verify_verification_report(&input).unwrap_err();
        assert_eq!(err.code, codes::SCHEMA_INVALID);
    }

    #[test]
    fn idempotent_canonical_for_report_doc() {
        let (raw, _doc, _keys) = signed_report(&"a".repeat(64), &"b".repeat(64));
        let once = canonical(&raw).unwrap();
        let parsed = crate::canonical::parse(&once).unwrap();
        let twice = canonical(&parsed).unwrap();
        assert_eq!(once, twice);
    }
}
