// SPDX-License-Identifier: MIT OR Apache-2.0
//! Crypto primitives (C2): SHA-256, HMAC-SHA-256, Ed25519 verification over
//! a hex digest, and key-id derivation from a PEM-encoded public key.

use crate::error::{codes, VerifyError, VerifyResult};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

pub type Hex64 = String;

pub fn sha256_hex(bytes: &[u8]) -> Hex64 {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn sha256_utf8(s: &str) -> Hex64 {
    sha256_hex(s.as_bytes())
}

pub fn hmac_sha256_hex(secret: &[u8], msg: &[u8]) -> VerifyResult<Hex64> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|e| VerifyError::new(codes::SCHEMA_INVALID, format!("invalid HMAC key: {e}")))?;
    mac.update(msg);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build the webhook signing message `timestamp + "." + canonical(body)` and
/// return its HMAC-SHA-256 hex digest.
pub fn hmac_webhook_signature(
    secret: &[u8],
    timestamp: &str,
    canonical_body: &[u8],
) -> VerifyResult<Hex64> {
    let mut msg = Vec::with_capacity(timestamp.len() + 1 + canonical_body.len());
    msg.extend_from_slice(timestamp.as_bytes());
    msg.push(b'.');
    msg.extend_from_slice(canonical_body);
    hmac_sha256_hex(secret, &msg)
}

/// Verify an Ed25519 signature over the ASCII bytes of a lowercase hex
/// digest string (not the raw digest bytes). This wire contract is load
/// bearing: every signed document in this system signs over a hex string.
pub fn verify_ed25519_over_hex(hash_hex: &str, sig_b64: &str, pub_pem: &str) -> VerifyResult<bool> {
    let verifying_key = parse_ed25519_public_key_pem(pub_pem)?;
    let sig_bytes = BASE64
        .decode(sig_b64.trim())
        .map_err(|e| VerifyError::new(codes::SCHEMA_INVALID, format!("invalid base64 signature: {e}")))?;
    let sig_array: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| VerifyError::new(codes::SCHEMA_INVALID, "signature must be 64 bytes"))?;
    let signature = Signature::from_bytes(&sig_array);
    Ok(verifying_key.verify(hash_hex.as_bytes(), &signature).is_ok())
}

pub fn parse_ed25519_public_key_pem(pub_pem: &str) -> VerifyResult<VerifyingKey> {
    let parsed = pem::parse(pub_pem)
        .map_err(|e| VerifyError::new(codes::SCHEMA_INVALID, format!("invalid PEM: {e}")))?;
    let contents = parsed.contents();
    // SPKI-wrapped Ed25519 public keys are 44 bytes; raw keys are 32.
    let raw: [u8; 32] = if contents.len() == 32 {
        contents
            .try_into()
            .map_err(|_| VerifyError::new(codes::SCHEMA_INVALID, "malformed Ed25519 public key"))?
    } else if contents.len() >= 32 {
        contents[contents.len() - 32..]
            .try_into()
            .map_err(|_| VerifyError::new(codes::SCHEMA_INVALID, "malformed SPKI Ed25519 public key"))?
    } else {
        return Err(VerifyError::new(
            codes::SCHEMA_INVALID,
            "public key too short to be Ed25519",
        ));
    };
    VerifyingKey::from_bytes(&raw)
        .map_err(|e| VerifyError::new(codes::SCHEMA_INVALID, format!("invalid Ed25519 public key: {e}")))
}

/// Stable key id derived from the PEM body: sha256 of the exact PEM text as
/// supplied (not the decoded DER), so two byte-identical PEM blocks always
/// produce the same id regardless of how they were loaded.
pub fn key_id_from_pem(pub_pem: &str) -> String {
    sha256_utf8(pub_pem.trim())
}
