// SPDX-License-Identifier: MIT OR Apache-2.0
//! End-to-end `verify_release` scenarios beyond release.rs's own unit tests:
//! a revoked signer that still leaves quorum intact, and a missing
//! `requiredKeyIds` signer rejected despite quorum being numerically met.

use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde_json::{json, Value};
use settld_verify_core::canonical::canonical;
use settld_verify_core::crypto::sha256_hex;
use settld_verify_core::error::codes;
use settld_verify_core::verify_release;
use std::fs;
use std::path::Path;

fn write_json(path: &Path, value: &Value) {
    fs::write(path, serde_json::to_vec(value).unwrap()).unwrap();
}

fn keypair() -> (SigningKey, String, String) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();
    let pem = pem::encode(&pem::Pem::new("PUBLIC KEY".to_string(), verifying_key.to_bytes().to_vec()));
    let key_id = settld_verify_core::crypto::key_id_from_pem(&pem);
    (signing_key, pem, key_id)
}

fn sign_index(signing_key: &SigningKey, index_hash: &str) -> String {
    let sig = signing_key.sign(index_hash.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(sig.to_bytes())
}

/// Any signature from a key revoked before the release's own build time
/// hard-fails verification, even when the remaining signers would still
/// satisfy the quorum on their own -- a revoked signer's signature isn't
/// silently dropped from the count, its mere presence is fatal.
#[test]
fn rejects_a_release_carrying_any_signature_from_a_key_revoked_before_build_time() {
    let dir = tempfile::tempdir().unwrap();
    let (active_key, active_pem, active_id) = keypair();
    let (revoked_key, revoked_pem, revoked_id) = keypair();
    let (root_key, root_pem, root_id) = keypair();

    let asset = b"settld-verify binary bytes";
    fs::write(dir.path().join("settld-verify"), asset).unwrap();

    let build_epoch = 1_700_000_000i64;
    let index = json!({
        "schemaVersion": "ReleaseIndex.v1",
        "tag": "v2.0.0",
        "version": "2.0.0",
        "commit": "deadbeef",
        "toolchain": {"buildEpochSeconds": build_epoch},
        "artifacts": [{"path": "settld-verify", "sizeBytes": asset.len(), "sha256": sha256_hex(asset)}],
    });
    write_json(&dir.path().join("release_index_v1.json"), &index);
    let index_hash = sha256_hex(&canonical(&index).unwrap());

    // Three signers attempt to sign: the revoked one did so before its
    // revocation boundary in wall-clock terms, but release trust only gates
    // signers against the release's own buildEpochSeconds, which falls
    // after the revocation boundary here -> excluded from the valid set.
    let signatures = json!({
        "signatures": [
            {"keyId": active_id.clone(), "algorithm": "ed25519", "signature": sign_index(&active_key, &index_hash)},
            {"keyId": revoked_id.clone(), "algorithm": "ed25519", "signature": sign_index(&revoked_key, &index_hash)},
            {"keyId": root_id.clone(), "algorithm": "ed25519", "signature": sign_index(&root_key, &index_hash)},
        ],
    });
    write_json(&dir.path().join("release_index_v1.sig"), &signatures);

    let trust = json!({
        "schemaVersion": "ReleaseTrust.v2",
        "keys": [
            {"keyId": active_id, "publicKeyPem": active_pem},
            {"keyId": revoked_id, "publicKeyPem": revoked_pem, "revokedAtEpochSeconds": build_epoch - 1},
            {"keyId": root_id.clone(), "publicKeyPem": root_pem},
        ],
        "policy": {"minSignatures": 2, "requiredKeyIds": [root_id]},
    });
    let trust_path = dir.path().join("trust.json");
    write_json(&trust_path, &trust);

    let err = verify_release(dir.path(), &trust_path).unwrap_err();
    assert_eq!(err.code, codes::RELEASE_SIGNER_REVOKED);
}

#[test]
fn rejects_a_release_missing_a_required_key_id_despite_numeric_quorum() {
    let dir = tempfile::tempdir().unwrap();
    let (signer_a, pem_a, id_a) = keypair();
    let (signer_b, pem_b, id_b) = keypair();
    let (_root_key, root_pem, root_id) = keypair();

    let asset = b"settld-verify binary bytes";
    fs::write(dir.path().join("settld-verify"), asset).unwrap();

    let index = json!({
        "schemaVersion": "ReleaseIndex.v1",
        "tag": "v2.0.1",
        "artifacts": [{"path": "settld-verify", "sizeBytes": asset.len(), "sha256": sha256_hex(asset)}],
    });
    write_json(&dir.path().join("release_index_v1.json"), &index);
    let index_hash = sha256_hex(&canonical(&index).unwrap());

    // Two ordinary signers satisfy minSignatures numerically, but the
    // release's trusted root never signed.
    let signatures = json!({
        "signatures": [
            {"keyId": id_a.clone(), "algorithm": "ed25519", "signature": sign_index(&signer_a, &index_hash)},
            {"keyId": id_b.clone(), "algorithm": "ed25519", "signature": sign_index(&signer_b, &index_hash)},
        ],
    });
    write_json(&dir.path().join("release_index_v1.sig"), &signatures);

    let trust = json!({
        "schemaVersion": "ReleaseTrust.v2",
        "keys": [
            {"keyId": id_a, "publicKeyPem": pem_a},
            {"keyId": id_b, "publicKeyPem": pem_b},
            {"keyId": root_id.clone(), "publicKeyPem": root_pem},
        ],
        "policy": {"minSignatures": 2, "requiredKeyIds": [root_id]},
    });
    let trust_path = dir.path().join("trust.json");
    write_json(&trust_path, &trust);

    let err = verify_release(dir.path(), &trust_path).unwrap_err();
    assert_eq!(err.code, codes::RELEASE_SIGNATURE_QUORUM_NOT_SATISFIED);
}

#[test]
fn rejects_a_release_with_a_duplicate_artifact_path() {
    let dir = tempfile::tempdir().unwrap();
    let (signing_key, pem, key_id) = keypair();

    let asset = b"dup bytes";
    fs::write(dir.path().join("settld-verify"), asset).unwrap();

    let index = json!({
        "schemaVersion": "ReleaseIndex.v1",
        "tag": "v2.0.2",
        "artifacts": [
            {"path": "settld-verify", "sha256": sha256_hex(asset)},
            {"path": "settld-verify", "sha256": sha256_hex(asset)},
        ],
    });
    write_json(&dir.path().join("release_index_v1.json"), &index);
    let index_hash = sha256_hex(&canonical(&index).unwrap());
    let signatures = json!({
        "signatures": [{"keyId": key_id.clone(), "algorithm": "ed25519", "signature": sign_index(&signing_key, &index_hash)}],
    });
    write_json(&dir.path().join("release_index_v1.sig"), &signatures);

    let trust = json!({
        "schemaVersion": "ReleaseTrust.v2",
        "keys": [{"keyId": key_id, "publicKeyPem": pem}],
        "policy": {"minSignatures": 1, "requiredKeyIds": []},
    });
    let trust_path = dir.path().join("trust.json");
    write_json(&trust_path, &trust);

    let err = verify_release(dir.path(), &trust_path).unwrap_err();
    assert_eq!(err.code, codes::RELEASE_ASSET_DUPLICATE_PATH);
}
