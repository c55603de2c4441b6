// SPDX-License-Identifier: MIT OR Apache-2.0
//! Key metadata: the immutable mapping from `keyId` to lifecycle facts,
//! derived from a bundle's `keys/public_keys.json` and then updated
//! (functionally, never in place) by revocation-list rows and governance
//! events. Shared, read-only, by C6/C9/C10 within one verification call.

use crate::error::{codes, VerifyError, VerifyResult};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

pub type KeyId = String;

#[derive(Debug, Clone, Default)]
pub struct KeyMeta {
    pub public_key_pem: String,
    pub purpose: Option<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub server_governed: bool,
}

pub type KeyMap = HashMap<KeyId, KeyMeta>;

#[derive(Debug, Deserialize)]
struct PublicKeysDoc {
    keys: Vec<PublicKeyEntry>,
}

#[derive(Debug, Deserialize)]
struct PublicKeyEntry {
    #[serde(rename = "keyId")]
    key_id: String,
    #[serde(rename = "publicKeyPem")]
    public_key_pem: String,
    purpose: Option<String>,
    #[serde(rename = "validFrom")]
    valid_from: Option<DateTime<Utc>>,
    #[serde(rename = "validTo")]
    valid_to: Option<DateTime<Utc>>,
    #[serde(rename = "rotatedAt")]
    rotated_at: Option<DateTime<Utc>>,
    #[serde(rename = "revokedAt")]
    revoked_at: Option<DateTime<Utc>>,
    #[serde(rename = "serverGoverned", default)]
    server_governed: bool,
}

/// Parse `keys/public_keys.json` into the initial key map for a bundle.
pub fn load_public_keys(bundle_root: &Path) -> VerifyResult<KeyMap> {
    let path = bundle_root.join("keys/public_keys.json");
    let bytes = std::fs::read(&path).map_err(|e| {
        VerifyError::new(codes::SCHEMA_INVALID, format!("cannot read keys/public_keys.json: {e}"))
            .with_path("keys/public_keys.json")
    })?;
    let doc: PublicKeysDoc = serde_json::from_slice(&bytes).map_err(|e| {
        VerifyError::new(codes::SCHEMA_INVALID, format!("invalid keys/public_keys.json: {e}"))
            .with_path("keys/public_keys.json")
    })?;
    let mut map = HashMap::new();
    for entry in doc.keys {
        map.insert(
            entry.key_id,
            KeyMeta {
                public_key_pem: entry.public_key_pem,
                purpose: entry.purpose,
                valid_from: entry.valid_from,
                valid_to: entry.valid_to,
                rotated_at: entry.rotated_at,
                revoked_at: entry.revoked_at,
                server_governed: entry.server_governed,
            },
        );
    }
    Ok(map)
}

/// Is `key_id` usable (not-yet-valid / expired) at `at`, independent of
/// rotation/revocation, which are gated separately by their own
/// prospective-timeline rules?
pub fn check_usable_at(meta: &KeyMeta, at: DateTime<Utc>) -> VerifyResult<()> {
    if let Some(valid_from) = meta.valid_from {
        if at < valid_from {
            return Err(VerifyError::new(codes::KEY_NOT_YET_VALID, "key not yet valid at this time"));
        }
    }
    if let Some(valid_to) = meta.valid_to {
        if at > valid_to {
            return Err(VerifyError::new(codes::KEY_EXPIRED, "key expired before this time"));
        }
    }
    Ok(())
}

/// Rotation/revocation check, applied only for SERVER-required signer roles
/// per §4.6 ("rotation/revocation are prospective controls that apply only
/// when the timestamp is authoritative").
pub fn check_not_revoked_or_rotated(meta: &KeyMeta, at: DateTime<Utc>) -> VerifyResult<()> {
    if let Some(revoked_at) = meta.revoked_at {
        if at >= revoked_at {
            return Err(VerifyError::new(codes::KEY_REVOKED, "key revoked at or before this time"));
        }
    }
    if let Some(rotated_at) = meta.rotated_at {
        if at >= rotated_at {
            return Err(VerifyError::new(codes::KEY_ROTATED, "key rotated at or before this time"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn rejects_key_used_before_valid_from() {
        let meta = KeyMeta {
            valid_from: Some(at(2026, 1, 1)),
            ..Default::default()
        };
        assert!(check_usable_at(&meta, at(2025, 12, 31)).is_err());
        assert!(check_usable_at(&meta, at(2026, 1, 2)).is_ok());
    }

    #[test]
    fn rejects_key_used_after_revocation() {
        let meta = KeyMeta {
            revoked_at: Some(at(2026, 6, 1)),
            ..Default::default()
        };
        assert!(check_not_revoked_or_rotated(&meta, at(2026, 6, 1)).is_err());
        assert!(check_not_revoked_or_rotated(&meta, at(2026, 5, 31)).is_ok());
    }
}
