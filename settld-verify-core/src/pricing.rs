// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pricing matrix signatures (§4.11b): `PricingMatrixSignatures.v2` binds
//! the canonical hash of `pricing_matrix.json`; the legacy v1 byte-hash
//! form is tolerated only outside strict mode.

use crate::canonical::canonical;
use crate::crypto::{sha256_hex, verify_ed25519_over_hex};
use crate::error::{codes, VerifyError, VerifyResult, Warning};
use crate::keys::KeyId;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Deserialize)]
pub struct PricingSignatureEntry {
    #[serde(rename = "signerKeyId")]
    pub signer_key_id: String,
    pub signature: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PricingMatrixSignaturesDoc {
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,
    #[serde(rename = "pricingMatrixHash")]
    pub pricing_matrix_hash: Option<String>,
    #[serde(rename = "pricingMatrixSha256")]
    pub pricing_matrix_sha256: Option<String>,
    pub signatures: Vec<PricingSignatureEntry>,
}

pub fn parse_pricing_matrix_signatures(raw: &Value) -> VerifyResult<PricingMatrixSignaturesDoc> {
    let doc: PricingMatrixSignaturesDoc = serde_json::from_value(raw.clone()).map_err(|e| {
        VerifyError::new(codes::SCHEMA_INVALID, format!("invalid PricingMatrixSignatures document: {e}"))
    })?;
    match doc.schema_version.as_str() {
        "PricingMatrixSignatures.v1" | "PricingMatrixSignatures.v2" => Ok(doc),
        other => Err(VerifyError::new(
            codes::SCHEMA_INVALID,
            format!("unexpected PricingMatrixSignatures schemaVersion: {other}"),
        )),
    }
}

/// Verify a `PricingMatrixSignatures` document against the pricing matrix it
/// binds, returning any lenient warnings raised along the way. Returns the
/// set of signer key ids whose signature verified.
pub fn verify_pricing_matrix_signatures(
    doc: &PricingMatrixSignaturesDoc,
    pricing_matrix_raw_bytes: &[u8],
    pricing_matrix_canonical_value: &Value,
    strict: bool,
    trusted_pricing_signers: &HashMap<KeyId, String>,
    trusted_pricing_signer_key_ids: Option<&HashSet<KeyId>>,
) -> VerifyResult<(HashSet<KeyId>, Vec<Warning>)> {
    let mut warnings = Vec::new();

    let bound_hash = match doc.schema_version.as_str() {
        "PricingMatrixSignatures.v2" => {
            let declared = doc.pricing_matrix_hash.as_deref().ok_or_else(|| {
                VerifyError::new(codes::SCHEMA_INVALID, "PricingMatrixSignatures.v2 missing pricingMatrixHash")
            })?;
            let recomputed = sha256_hex(&canonical(pricing_matrix_canonical_value)?);
            if recomputed != declared {
                return Err(VerifyError::new(
                    codes::PRICING_MATRIX_SIGNATURE_PAYLOAD_MISMATCH,
                    format!("expected {declared}, computed {recomputed}"),
                )
                .with_detail(serde_json::json!({"expected": declared, "actual": recomputed})));
            }
            declared.to_string()
        }
        "PricingMatrixSignatures.v1" => {
            if strict {
                return Err(VerifyError::new(
                    codes::PRICING_MATRIX_SIGNATURE_V1_BYTES_LEGACY_STRICT_REJECTED,
                    "strict mode rejects PricingMatrixSignatures.v1 byte-hash binding",
                ));
            }
            let declared = doc.pricing_matrix_sha256.as_deref().ok_or_else(|| {
                VerifyError::new(codes::SCHEMA_INVALID, "PricingMatrixSignatures.v1 missing pricingMatrixSha256")
            })?;
            let recomputed = sha256_hex(pricing_matrix_raw_bytes);
            if recomputed != declared {
                return Err(VerifyError::new(
                    codes::PRICING_MATRIX_SIGNATURE_PAYLOAD_MISMATCH,
                    format!("expected {declared}, computed {recomputed}"),
                )
                .with_detail(serde_json::json!({"expected": declared, "actual": recomputed})));
            }
            warnings.push(Warning::new(
                codes::PRICING_MATRIX_SIGNATURE_V1_BYTES_LEGACY_LENIENT,
                "PricingMatrixSignatures.v1 byte-hash binding accepted under lenient mode",
            ));
            declared.to_string()
        }
        other => {
            return Err(VerifyError::new(
                codes::SCHEMA_INVALID,
                format!("unexpected PricingMatrixSignatures schemaVersion: {other}"),
            ))
        }
    };

    let mut valid_signers = HashSet::new();
    for entry in &doc.signatures {
        if let Some(allowed) = trusted_pricing_signer_key_ids {
            if !allowed.contains(&entry.signer_key_id) {
                continue;
            }
        }
        let Some(pub_pem) = trusted_pricing_signers.get(&entry.signer_key_id) else {
            continue;
        };
        if verify_ed25519_over_hex(&bound_hash, &entry.signature, pub_pem)? {
            valid_signers.insert(entry.signer_key_id.clone());
        }
    }

    if strict && valid_signers.is_empty() {
        return Err(VerifyError::new(
            codes::PRICING_MATRIX_SIGNATURE_MISSING,
            "strict mode requires at least one valid pricing matrix signature from a trusted signer",
        ));
    }
    if !strict && valid_signers.is_empty() {
        warnings.push(Warning::new(
            codes::PRICING_MATRIX_SIGNATURES_MISSING_LENIENT,
            "no valid pricing matrix signatures found; accepted under lenient mode",
        ));
    }

    Ok((valid_signers, warnings))
}
