// SPDX-License-Identifier: MIT OR Apache-2.0
//! Env-based trust anchor loader (§6). Every value is a JSON object mapping
//! `keyId -> publicKeyPem`, except the key-ids-only form which accepts a
//! bare JSON array of `keyId` strings.

use anyhow::{Context, Result};
use settld_verify_core::bundle::TrustAnchors;
use std::collections::{HashMap, HashSet};

fn load_key_map(env_var: &str) -> Result<HashMap<String, String>> {
    match std::env::var(env_var) {
        Ok(raw) if !raw.trim().is_empty() => {
            let value: serde_json::Value =
                serde_json::from_str(&raw).with_context(|| format!("{env_var} is not valid JSON"))?;
            let obj = value
                .as_object()
                .with_context(|| format!("{env_var} must be a JSON object of keyId -> publicKeyPem"))?;
            let mut map = HashMap::new();
            for (k, v) in obj {
                let pem = v.as_str().with_context(|| format!("{env_var}.{k} must be a PEM string"))?;
                map.insert(k.clone(), pem.to_string());
            }
            Ok(map)
        }
        _ => Ok(HashMap::new()),
    }
}

fn load_key_id_set(env_var: &str) -> Result<Option<HashSet<String>>> {
    match std::env::var(env_var) {
        Ok(raw) if !raw.trim().is_empty() => {
            let value: serde_json::Value =
                serde_json::from_str(&raw).with_context(|| format!("{env_var} is not valid JSON"))?;
            let arr = value.as_array().with_context(|| format!("{env_var} must be a JSON array of keyId"))?;
            let ids = arr
                .iter()
                .map(|v| v.as_str().map(str::to_string).ok_or_else(|| anyhow::anyhow!("{env_var} entries must be strings")))
                .collect::<Result<HashSet<_>>>()?;
            Ok(Some(ids))
        }
        _ => Ok(None),
    }
}

/// Load trust anchors from environment variables prefixed with `prefix`
/// (e.g. `SETTLD` yields `SETTLD_TRUSTED_GOVERNANCE_ROOT_KEYS_JSON`). In
/// strict mode, every key map other than the key-ids-only form must be
/// non-empty or the caller should treat that as a fatal condition.
pub fn load_trust_anchors(prefix: &str) -> Result<TrustAnchors> {
    let governance_roots = load_key_map(&format!("{prefix}_TRUSTED_GOVERNANCE_ROOT_KEYS_JSON"))?;
    let time_authorities = load_key_map(&format!("{prefix}_TRUSTED_TIME_AUTHORITY_KEYS_JSON"))?;
    let pricing_signers = load_key_map(&format!("{prefix}_TRUSTED_PRICING_SIGNER_KEYS_JSON"))?;
    let pricing_signer_key_ids = load_key_id_set(&format!("{prefix}_TRUSTED_PRICING_SIGNER_KEY_IDS_JSON"))?;
    let settlement_decision_signers =
        load_key_map(&format!("{prefix}_TRUSTED_SETTLEMENT_DECISION_SIGNER_KEYS_JSON"))?;

    Ok(TrustAnchors {
        governance_roots,
        time_authorities,
        pricing_signers,
        pricing_signer_key_ids,
        settlement_decision_signers,
    })
}

/// Strict mode requires non-empty governance root and time authority trust;
/// an empty set for either is a fatal configuration error rather than a
/// silent no-op, per §6 ("Empty/missing in strict mode => fatal with a
/// stable code").
pub fn require_non_empty_for_strict(trust: &TrustAnchors) -> Result<()> {
    if trust.governance_roots.is_empty() {
        anyhow::bail!("strict mode requires a non-empty *_TRUSTED_GOVERNANCE_ROOT_KEYS_JSON");
    }
    if trust.time_authorities.is_empty() {
        anyhow::bail!("strict mode requires a non-empty *_TRUSTED_TIME_AUTHORITY_KEYS_JSON");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn loads_a_key_map_from_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(
            "TESTPFX_TRUSTED_GOVERNANCE_ROOT_KEYS_JSON",
            r#"{"root-1":"-----BEGIN PUBLIC KEY-----\nabc\n-----END PUBLIC KEY-----"}"#,
        );
        let trust = load_trust_anchors("TESTPFX").unwrap();
        assert_eq!(trust.governance_roots.len(), 1);
        std::env::remove_var("TESTPFX_TRUSTED_GOVERNANCE_ROOT_KEYS_JSON");
    }

    #[test]
    fn missing_env_var_yields_empty_map() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("TESTPFX2_TRUSTED_GOVERNANCE_ROOT_KEYS_JSON");
        let trust = load_trust_anchors("TESTPFX2").unwrap();
        assert!(trust.governance_roots.is_empty());
        assert!(require_non_empty_for_strict(&trust).is_err());
    }
}
