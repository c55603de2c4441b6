// SPDX-License-Identifier: MIT OR Apache-2.0
//! Release-index verifier (C12): a trust-quorum check over a released
//! artifact set, independent of the bundle verifiers in `bundle/`. Trust is
//! supplied as a standalone `ReleaseTrust.v2` file rather than derived from
//! a bundle's own governance documents.

use crate::canonical::canonical;
use crate::crypto::{sha256_hex, verify_ed25519_over_hex};
use crate::error::{codes, VerifyError, VerifyResult, Warning};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct TrustKeyEntry {
    #[serde(rename = "keyId")]
    key_id: String,
    #[serde(rename = "publicKeyPem")]
    public_key_pem: String,
    #[serde(rename = "notBeforeEpochSeconds")]
    not_before_epoch_seconds: Option<i64>,
    #[serde(rename = "notAfterEpochSeconds")]
    not_after_epoch_seconds: Option<i64>,
    #[serde(rename = "revokedAtEpochSeconds")]
    revoked_at_epoch_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ReleasePolicy {
    #[serde(rename = "minSignatures")]
    min_signatures: u32,
    #[serde(rename = "requiredKeyIds", default)]
    required_key_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseTrustDoc {
    #[serde(rename = "schemaVersion")]
    schema_version: String,
    keys: Vec<TrustKeyEntry>,
    policy: ReleasePolicy,
}

#[derive(Debug, Deserialize)]
struct SignatureEntry {
    #[serde(rename = "keyId")]
    key_id: String,
    algorithm: String,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct SignaturesDoc {
    signatures: Vec<SignatureEntry>,
}

#[derive(Debug, Deserialize)]
struct ArtifactEntry {
    path: String,
    #[serde(rename = "sizeBytes")]
    size_bytes: Option<u64>,
    sha256: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseIndexDoc {
    tag: Option<String>,
    version: Option<String>,
    commit: Option<String>,
    toolchain: Option<ToolchainInfo>,
    artifacts: Vec<ArtifactEntry>,
}

#[derive(Debug, Deserialize)]
struct ToolchainInfo {
    #[serde(rename = "buildEpochSeconds")]
    build_epoch_seconds: Option<i64>,
}

/// Identity of the release that was verified, surfaced in the CLI's
/// `VerifyReleaseOutput.v1`.
#[derive(Debug, Clone, Default)]
pub struct ReleaseSummary {
    pub tag: Option<String>,
    pub version: Option<String>,
    pub commit: Option<String>,
}

pub struct ReleaseVerdict {
    pub summary: ReleaseSummary,
    pub warnings: Vec<Warning>,
}

fn read_json(path: &Path) -> VerifyResult<(Vec<u8>, Value)> {
    let bytes = fs::read(path).map_err(|e| {
        VerifyError::new(codes::SCHEMA_INVALID, format!("cannot read {}: {e}", path.display()))
            .with_path(path.display().to_string())
    })?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| VerifyError::new(codes::INVALID_JSON, format!("invalid JSON in {}: {e}", path.display())))?;
    Ok((bytes, value))
}

/// Verify `release_index_v1.json` + `release_index_v1.sig` under
/// `release_dir` against the `ReleaseTrust.v2` file at `trust_path`.
pub fn verify_release(release_dir: &Path, trust_path: &Path) -> VerifyResult<ReleaseVerdict> {
    let (_trust_bytes, trust_value) = read_json(trust_path)?;
    let trust_doc: ReleaseTrustDoc = serde_json::from_value(trust_value)
        .map_err(|e| VerifyError::new(codes::RELEASE_TRUST_INVALID, format!("invalid trust file: {e}")))?;
    if trust_doc.schema_version != "ReleaseTrust.v2" {
        return Err(VerifyError::new(
            codes::RELEASE_TRUST_INVALID,
            format!("unsupported trust schemaVersion {}", trust_doc.schema_version),
        ));
    }
    let trust_keys: std::collections::HashMap<String, &TrustKeyEntry> =
        trust_doc.keys.iter().map(|k| (k.key_id.clone(), k)).collect();
    let has_time_based_keys = trust_doc
        .keys
        .iter()
        .any(|k| k.not_before_epoch_seconds.is_some() || k.not_after_epoch_seconds.is_some() || k.revoked_at_epoch_seconds.is_some());

    let (_index_bytes, index_value) = read_json(&release_dir.join("release_index_v1.json"))?;
    let index_doc: ReleaseIndexDoc = serde_json::from_value(index_value.clone())
        .map_err(|e| VerifyError::new(codes::SCHEMA_INVALID, format!("invalid release_index_v1.json: {e}")))?;

    let build_epoch_seconds = index_doc.toolchain.as_ref().and_then(|t| t.build_epoch_seconds);
    if has_time_based_keys && build_epoch_seconds.is_none() {
        return Err(VerifyError::new(
            codes::RELEASE_TOOLCHAIN_EPOCH_MISSING,
            "trust file carries time-based keys but release_index_v1.json has no toolchain.buildEpochSeconds",
        ));
    }

    let index_hash = sha256_hex(&canonical(&index_value)?);

    let (_sig_bytes, sig_value) = read_json(&release_dir.join("release_index_v1.sig"))?;
    let sig_doc: SignaturesDoc = serde_json::from_value(sig_value)
        .map_err(|e| VerifyError::new(codes::SCHEMA_INVALID, format!("invalid release_index_v1.sig: {e}")))?;

    let mut valid_signers: HashSet<String> = HashSet::new();
    for entry in &sig_doc.signatures {
        let key = trust_keys.get(&entry.key_id).ok_or_else(|| {
            VerifyError::new(codes::RELEASE_SIGNER_UNAUTHORIZED, format!("unknown signer keyId {}", entry.key_id))
        })?;
        if let Some(at) = build_epoch_seconds {
            if let Some(revoked_at) = key.revoked_at_epoch_seconds {
                if at >= revoked_at {
                    return Err(VerifyError::new(
                        codes::RELEASE_SIGNER_REVOKED,
                        format!("signer {} revoked before build time", entry.key_id),
                    ));
                }
            }
            if let Some(not_before) = key.not_before_epoch_seconds {
                if at < not_before {
                    return Err(VerifyError::new(
                        codes::RELEASE_SIGNER_UNAUTHORIZED,
                        format!("signer {} not yet valid at build time", entry.key_id),
                    ));
                }
            }
            if let Some(not_after) = key.not_after_epoch_seconds {
                if at > not_after {
                    return Err(VerifyError::new(
                        codes::RELEASE_SIGNER_UNAUTHORIZED,
                        format!("signer {} expired before build time", entry.key_id),
                    ));
                }
            }
        }
        if entry.algorithm != "ed25519" {
            return Err(VerifyError::new(
                codes::RELEASE_SIGNATURE_UNSUPPORTED_ALGORITHM,
                format!("signer {} uses unsupported algorithm {}", entry.key_id, entry.algorithm),
            ));
        }
        let ok = verify_ed25519_over_hex(&index_hash, &entry.signature, &key.public_key_pem)?;
        if !ok {
            return Err(VerifyError::new(
                codes::RELEASE_SIGNATURE_INVALID,
                format!("signature from {} does not verify", entry.key_id),
            ));
        }
        valid_signers.insert(entry.key_id.clone());
    }

    let has_quorum = valid_signers.len() as u32 >= trust_doc.policy.min_signatures
        && trust_doc.policy.required_key_ids.iter().all(|k| valid_signers.contains(k));
    if !has_quorum {
        return Err(VerifyError::new(
            codes::RELEASE_SIGNATURE_QUORUM_NOT_SATISFIED,
            format!(
                "{} valid signer(s), policy requires {} (+ required key ids)",
                valid_signers.len(),
                trust_doc.policy.min_signatures
            ),
        ));
    }

    let mut seen_paths: HashSet<String> = HashSet::new();
    for artifact in &index_doc.artifacts {
        if !seen_paths.insert(artifact.path.clone()) {
            return Err(VerifyError::new(
                codes::RELEASE_ASSET_DUPLICATE_PATH,
                format!("duplicate artifact path {}", artifact.path),
            ));
        }
        let asset_path = release_dir.join(&artifact.path);
        let bytes = fs::read(&asset_path).map_err(|_| {
            VerifyError::new(codes::RELEASE_ASSET_MISSING, format!("missing artifact {}", artifact.path))
                .with_path(artifact.path.clone())
        })?;
        if let Some(expected_size) = artifact.size_bytes {
            if bytes.len() as u64 != expected_size {
                return Err(VerifyError::new(
                    codes::RELEASE_ASSET_SIZE_MISMATCH,
                    format!("{}: expected {} bytes, found {}", artifact.path, expected_size, bytes.len()),
                )
                .with_path(artifact.path.clone()));
            }
        }
        let actual_sha256 = sha256_hex(&bytes);
        if actual_sha256 != artifact.sha256 {
            return Err(VerifyError::new(
                codes::RELEASE_ASSET_HASH_MISMATCH,
                format!("{}: expected {}, computed {}", artifact.path, artifact.sha256, actual_sha256),
            )
            .with_path(artifact.path.clone()));
        }
    }

    Ok(ReleaseVerdict {
        summary: ReleaseSummary { tag: index_doc.tag, version: index_doc.version, commit: index_doc.commit },
        warnings: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;
    use serde_json::json;
    use std::io::Write;

    fn write_json(path: &Path, value: &Value) {
        let mut f = fs::File::create(path).unwrap();
        f.write_all(serde_json::to_vec(value).unwrap().as_slice()).unwrap();
    }

    fn keypair() -> (SigningKey, String, String) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        let pem = pem::encode(&pem::Pem::new("PUBLIC KEY".to_string(), verifying_key.to_bytes().to_vec()));
        let key_id = crate::crypto::key_id_from_pem(&pem);
        (signing_key, pem, key_id)
    }

    #[test]
    fn accepts_a_quorum_satisfying_release() {
        let dir = tempfile::tempdir().unwrap();
        let (signing_key, pem, key_id) = keypair();

        let asset_bytes = b"binary contents";
        fs::write(dir.path().join("settld-verify"), asset_bytes).unwrap();

        let index = json!({
            "schemaVersion": "ReleaseIndex.v1",
            "tag": "v1.2.3",
            "version": "1.2.3",
            "commit": "abc123",
            "toolchain": {"buildEpochSeconds": 1_700_000_000},
            "artifacts": [{"path": "settld-verify", "sizeBytes": asset_bytes.len(), "sha256": sha256_hex(asset_bytes)}],
        });
        write_json(&dir.path().join("release_index_v1.json"), &index);
        let index_hash = sha256_hex(&canonical(&index).unwrap());
        let sig = signing_key.sign(index_hash.as_bytes());
        let sig_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, sig.to_bytes());
        write_json(
            &dir.path().join("release_index_v1.sig"),
            &json!({"signatures": [{"keyId": key_id.clone(), "algorithm": "ed25519", "signature": sig_b64}]}),
        );

        let trust = json!({
            "schemaVersion": "ReleaseTrust.v2",
            "keys": [{"keyId": key_id, "publicKeyPem": pem}],
            "policy": {"minSignatures": 1, "requiredKeyIds": []},
        });
        let trust_path = dir.path().join("trust.json");
        write_json(&trust_path, &trust);

        let verdict = verify_release(dir.path(), &trust_path).unwrap();
        assert_eq!(verdict.summary.tag.as_deref(), Some("v1.2.3"));
    }

    #[test]
    fn rejects_quorum_shortfall() {
        let dir = tempfile::tempdir().unwrap();
        let (_signing_key, pem, key_id) = keypair();

        let index = json!({
            "schemaVersion": "ReleaseIndex.v1",
            "tag": "v1.0.0",
            "artifacts": [],
        });
        write_json(&dir.path().join("release_index_v1.json"), &index);
        write_json(&dir.path().join("release_index_v1.sig"), &json!({"signatures": []}));

        let trust = json!({
            "schemaVersion": "ReleaseTrust.v2",
            "keys": [{"keyId": key_id, "publicKeyPem": pem}],
            "policy": {"minSignatures": 1, "requiredKeyIds": []},
        });
        let trust_path = dir.path().join("trust.json");
        write_json(&trust_path, &trust);

        let err = verify_release(dir.path(), &trust_path).unwrap_err();
        assert_eq!(err.code, codes::RELEASE_SIGNATURE_QUORUM_NOT_SATISFIED);
    }

    #[test]
    fn rejects_tampered_artifact_hash() {
        let dir = tempfile::tempdir().unwrap();
        let (signing_key, pem, key_id) = keypair();

        fs::write(dir.path().join("settld-verify"), b"tampered").unwrap();

        let index = json!({
            "schemaVersion": "ReleaseIndex.v1",
            "tag": "v1.0.0",
            "artifacts": [{"path": "settld-verify", "sha256": sha256_hex(b"original")}],
        });
        write_json(&dir.path().join("release_index_v1.json"), &index);
        let index_hash = sha256_hex(&canonical(&index).unwrap());
        let sig = signing_key.sign(index_hash.as_bytes());
        let sig_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, sig.to_bytes());
        write_json(
            &dir.path().join("release_index_v1.sig"),
            &json!({"signatures": [{"keyId": key_id.clone(), "algorithm": "ed25519", "signature": sig_b64}]}),
        );

        let trust = json!({
            "schemaVersion": "ReleaseTrust.v2",
            "keys": [{"keyId": key_id, "publicKeyPem": pem}],
            "policy": {"minSignatures": 1, "requiredKeyIds": []},
        });
        let trust_path = dir.path().join("trust.json");
        write_json(&trust_path, &trust);

        let err = verify_release(dir.path(), &trust_path).unwrap_err();
        assert_eq!(err.code, codes::RELEASE_ASSET_HASH_MISMATCH);
    }
}
