// SPDX-License-Identifier: MIT OR Apache-2.0
//! Timestamp-proof verifier (C8): validates a detached time-authority
//! signature binding a document-core hash, and isolates the
//! trustworthy-time predicate that C9/C10 compose with their timeline
//! checks (per the "Trustworthy-time predicate" design note — rotation and
//! revocation enforcement must never silently downgrade to an untrusted
//! clock).

use crate::canonical::canonical_without_fields;
use crate::crypto::{sha256_hex, verify_ed25519_over_hex};
use crate::error::{codes, VerifyError, VerifyResult};
use crate::keys::KeyId;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize, serde::Serialize)]
pub struct TimestampProofV1 {
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "messageHash")]
    pub message_hash: String,
    #[serde(rename = "signerKeyId")]
    pub signer_key_id: String,
    pub signature: String,
}

/// The outcome of resolving a document's effective signing time: either a
/// timestamp-proof-backed instant (`trustworthy = true`) or a fallback to
/// the document's self-declared `signedAt` (`trustworthy = false`).
#[derive(Debug, Clone, Copy)]
pub struct EffectiveTime {
    pub at: DateTime<Utc>,
    pub trustworthy: bool,
}

/// Verify an embedded `TimestampProof.v1` against `document_core_with_proof`
/// (the full document, including the `timestampProof` field itself — the
/// message hash is computed over the document with that field removed) and
/// a map of trusted time-authority public keys.
pub fn verify_timestamp_proof_v1(
    document_core_with_proof: &Value,
    proof: &TimestampProofV1,
    trusted_time_authorities: &HashMap<KeyId, String>,
) -> VerifyResult<DateTime<Utc>> {
    if proof.kind != "ed25519_time_authority" {
        return Err(VerifyError::new(
            codes::TIMESTAMP_PROOF_INVALID,
            format!("unsupported timestamp proof kind: {}", proof.kind),
        ));
    }
    if proof.message_hash.len() != 64 || !proof.message_hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(VerifyError::new(
            codes::TIMESTAMP_PROOF_INVALID,
            "messageHash must be a lowercase 64-char hex string",
        ));
    }

    let core_bytes = canonical_without_fields(document_core_with_proof, &["timestampProof"])?;
    let recomputed = sha256_hex(&core_bytes);
    if recomputed != proof.message_hash {
        return Err(VerifyError::new(
            codes::TIMESTAMP_PROOF_HASH_MISMATCH,
            format!("expected {}, computed {recomputed}", proof.message_hash),
        )
        .with_detail(serde_json::json!({"expected": proof.message_hash, "actual": recomputed})));
    }

    let pub_pem = trusted_time_authorities.get(&proof.signer_key_id).ok_or_else(|| {
        VerifyError::new(
            codes::TRUST_ANCHOR_MISSING,
            format!("timestamp proof signerKeyId {} is not a trusted time authority", proof.signer_key_id),
        )
    })?;

    let ok = verify_ed25519_over_hex(&proof.message_hash, &proof.signature, pub_pem)?;
    if !ok {
        return Err(VerifyError::new(
            codes::TIMESTAMP_PROOF_INVALID,
            "timestamp proof signature invalid",
        ));
    }

    Ok(proof.timestamp)
}

/// Resolve the effective signing time for a signing document: if
/// `timestamp_proof` is present and verifies, its timestamp is
/// trustworthy; otherwise fall back to `self_declared_signed_at` with
/// `trustworthy = false`.
pub fn resolve_effective_time(
    document_core_with_proof: &Value,
    timestamp_proof: Option<&TimestampProofV1>,
    self_declared_signed_at: DateTime<Utc>,
    trusted_time_authorities: &HashMap<KeyId, String>,
) -> VerifyResult<EffectiveTime> {
    match timestamp_proof {
        Some(proof) => {
            let at = verify_timestamp_proof_v1(document_core_with_proof, proof, trusted_time_authorities)?;
            Ok(EffectiveTime { at, trustworthy: true })
        }
        None => Ok(EffectiveTime { at: self_declared_signed_at, trustworthy: false }),
    }
}
