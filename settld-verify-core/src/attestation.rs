// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bundle-head attestation verifier (C9): checks an attestation's schema,
//! scope, head references, and signature under governance policy (C7) and
//! timestamp-proof (C8) authorization.

use crate::canonical::canonical_without_fields;
use crate::crypto::{sha256_hex, verify_ed25519_over_hex};
use crate::error::{codes, VerifyError, VerifyResult};
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
pub struct BundleHeadAttestation {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    pub kind: String,
    #[serde(rename = "tenantId")]
    pub tenant_id: Option<String>,
    pub scope: Option<String>,
    #[serde(rename = "manifestHash")]
    pub manifest_hash: String,
    pub heads: Value,
    #[serde(rename = "signerKeyId")]
    pub signer_key_id: Option<String>,
    #[serde(rename = "signerScope")]
    pub signer_scope: Option<String>,
    #[serde(rename = "signedAt")]
    pub signed_at: Option<DateTime<Utc>>,
    pub signature: Option<String>,
    #[serde(rename = "timestampProof")]
    pub timestamp_proof: Option<TimestampProofV1>,
    #[serde(rename = "attestationHash")]
    pub attestation_hash: Option<String>,
}

pub struct AttestationInput<'a> {
    pub raw: &'a Value,
    pub doc: &'a BundleHeadAttestation,
    pub expected_kind: &'static str,
    pub expected_manifest_hash: &'a str,
    pub expected_tenant_id: Option<&'a str>,
    pub expected_scope: Option<&'a str>,
    pub expected_heads: &'a Value,
    pub subject_type: &'a str,
    pub strict: bool,
    pub keys: &'a KeyMap,
    pub policy: Option<&'a GovernancePolicyV2>,
    pub signer_timelines: &'a HashMap<KeyId, Timeline>,
    pub trusted_time_authorities: &'a HashMap<KeyId, String>,
}

pub fn verify_bundle_head_attestation(input: &AttestationInput) -> VerifyResult<()> {
    let doc = input.doc;

    if doc.schema_version != "BundleHeadAttestation.v1" {
        return Err(VerifyError::new(
            codes::SCHEMA_INVALID,
            format!("unexpected attestation schemaVersion: {}", doc.schema_version),
        ));
    }
    if doc.kind != input.expected_kind {
        return Err(VerifyError::new(
            codes::BUNDLE_TYPE_MISMATCH,
            format!("attestation kind {} does not match bundle kind {}", doc.kind, input.expected_kind),
        ));
    }
    if let Some(expected_tenant) = input.expected_tenant_id {
        if doc.tenant_id.as_deref() != Some(expected_tenant) {
            return Err(VerifyError::new(codes::SCHEMA_INVALID, "attestation tenantId mismatch"));
        }
    }
    if let Some(expected_scope) = input.expected_scope {
        if doc.scope.as_deref() != Some(expected_scope) {
            return Err(VerifyError::new(codes::SCHEMA_INVALID, "attestation scope mismatch"));
        }
    }
    if doc.manifest_hash != input.expected_manifest_hash {
        return Err(VerifyError::new(
            codes::ATTESTATION_HASH_MISMATCH,
            "attestation manifestHash does not match bundle manifestHash",
        )
        .with_detail(serde_json::json!({
            "expected": input.expected_manifest_hash,
            "actual": doc.manifest_hash,
        })));
    }

    if input.strict && (doc.signer_key_id.is_none() || doc.signature.is_none()) {
        return Err(VerifyError::new(
            codes::SCHEMA_INVALID,
            "strict mode requires a signed bundle head attestation",
        ));
    }

    if let Some(declared_hash) = &doc.attestation_hash {
        let recomputed = sha256_hex(&canonical_without_fields(
            input.raw,
            &["attestationHash", "signature"],
        )?);
        if &recomputed != declared_hash {
            return Err(VerifyError::new(
                codes::ATTESTATION_HASH_MISMATCH,
                format!("expected {declared_hash}, computed {recomputed}"),
            )
            .with_detail(serde_json::json!({"expected": declared_hash, "actual": recomputed})));
        }
    }

    if let (Some(signer_key_id), Some(signature)) = (&doc.signer_key_id, &doc.signature) {
        let key_meta = input.keys.get(signer_key_id).ok_or_else(|| {
            VerifyError::new(codes::SCHEMA_INVALID, format!("unknown attestation signerKeyId {signer_key_id}"))
        })?;
        let hash_to_verify = doc.attestation_hash.clone().unwrap_or_else(|| {
            sha256_hex(&canonical_without_fields(input.raw, &["attestationHash", "signature"]).unwrap_or_default())
        });
        let ok = verify_ed25519_over_hex(&hash_to_verify, signature, &key_meta.public_key_pem)?;
        if !ok {
            return Err(VerifyError::new(codes::SCHEMA_INVALID, "attestation signature invalid"));
        }

        if input.strict {
            let policy = input.policy.ok_or_else(|| {
                VerifyError::new(codes::TRUST_ANCHOR_MISSING, "strict mode requires a governance policy")
            })?;
            let signer_scope = doc.signer_scope.as_deref().or(doc.scope.as_deref()).unwrap_or("tenant");
            authorize_server_signer_for_policy(
                policy,
                PolicyDocumentKind::BundleHeadAttestation,
                input.subject_type,
                signer_key_id,
                signer_scope,
                key_meta,
            )
            .map_err(|e| e.wrap(codes::ATTESTATION_SIGNER_NOT_AUTHORIZED, "attestation signer not authorized"))?;
        }

        if key_meta.valid_from.is_none() && input.strict {
            return Err(VerifyError::new(codes::KEY_NOT_YET_VALID, "signer key missing validFrom"));
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

    if doc.heads != *input.expected_heads {
        return Err(VerifyError::new(
            codes::HEADS_MISMATCH,
            "attestation heads do not match the sub-bundle heads observed during verification",
        )
        .with_detail(serde_json::json!({"expected": input.expected_heads, "actual": doc.heads})));
    }

    Ok(())
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

    fn signed_attestation(manifest_hash: &str, heads: Value) -> (Value, BundleHeadAttestation, KeyMap) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        let pem = pem::encode(&pem::Pem::new("PUBLIC KEY".to_string(), verifying_key.to_bytes().to_vec()));

        let unsigned = json!({
            "schemaVersion": "BundleHeadAttestation.v1",
            "kind": "JobProofBundle.v1",
            "tenantId": "tenant-1",
            "scope": "tenant",
            "manifestHash": manifest_hash,
            "heads": heads,
            "signerKeyId": "key-1",
            "signerScope": "tenant",
            "signedAt": "2026-01-01T00:00:00Z",
        });
        let attestation_hash = sha256_hex(&canonical_without_fields(&unsigned, &["attestationHash", "signature"]).unwrap());
        let signature = BASE64.encode(signing_key.sign(attestation_hash.as_bytes()).to_bytes());
        let mut full = unsigned.as_object().unwrap().clone();
        full.insert("attestationHash".to_string(), json!(attestation_hash));
        full.insert("signature".to_string(), json!(signature));
        let raw = Value::Object(full);
        let doc: BundleHeadAttestation = serde_json::from_value(raw.clone()).unwrap();

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
    fn accepts_a_consistent_attestation_non_strict() {
        let heads = json!({"jobProof": "h1"});
        let (raw, doc, keys) = signed_attestation(&"a".repeat(64), heads.clone());
        let input = AttestationInput {
            raw: &raw,
            doc: &doc,
            expected_kind: "JobProofBundle.v1",
            expected_manifest_hash: &"a".repeat(64),
            expected_tenant_id: Some("tenant-1"),
            expected_scope: Some("tenant"),
            expected_heads: &heads,
            subject_type: "JobProofBundle.v1",
            strict: false,
            keys: &keys,
            policy: None,
            signer_timelines: &HashMap::new(),
            trusted_time_authorities: &HashMap::new(),
        };
        assert!(verify_bundle_head_attestation(&input).is_ok());
    }

    #[test]
    fn rejects_manifest_hash_mismatch() {
        let heads = json!({"jobProof": "h1"});
        let (raw, doc, keys) = signed_attestation(&"a".repeat(64), heads.clone());
        let input = AttestationInput {
            raw: &raw,
            doc: &doc,
            expected_kind: "JobProofBundle.v1",
            expected_manifest_hash: &"b".repeat(64),
            expected_tenant_id: Some("tenant-1"),
            expected_scope: Some("tenant"),
            expected_heads: &heads,
            subject_type: "JobProofBundle.v1",
            strict: false,
            keys: &keys,
            policy: None,
            signer_timelines: &HashMap::new(),
            trusted_time_authorities: &HashMap::new(),
        };
        let err = verify_bundle_head_attestation(&input).unwrap_err();
        assert_eq!(err.code, codes::ATTESTATION_HASH_MISMATCH);
    }

    #[test]
    fn rejects_heads_mismatch() {
        let heads = json!({"jobProof": "h1"});
        let (raw, doc, keys) = signed_attestation(&"a".repeat(64), heads.clone());
        let input = AttestationInput {
            raw: &raw,
            doc: &doc,
            expected_kind: "JobProofBundle.v1",
            expected_manifest_hash: &"a".repeat(64),
            expected_tenant_id: Some("tenant-1"),
            expected_scope: Some("tenant"),
            expected_heads: &json!({"jobProof": "different"}),
            subject_type: "JobProofBundle.v1",
            strict: false,
            keys: &keys,
            policy: None,
            signer_timelines: &HashMap::new(),
            trusted_time_authorities: &HashMap::new(),
        };
        let err = verify_bundle_head_attestation(&input).unwrap_err();
        assert_eq!(err.code, codes::HEADS_MISMATCH);
    }

    #[test]
    fn idempotent_canonical_for_attestation_doc() {
        let heads = json!({"jobProof": "h1"});
        let (raw, _doc, _keys) = signed_attestation(&"a".repeat(64), heads);
        let once = canonical(&raw).unwrap();
        let parsed = crate::canonical::parse(&once).unwrap();
        let twice = canonical(&parsed).unwrap();
        assert_eq!(once, twice);
    }
}
