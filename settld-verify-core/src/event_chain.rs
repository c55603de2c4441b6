// SPDX-License-Identifier: MIT OR Apache-2.0
//! Event-chain verifier (C6): validates a stream of chained, optionally
//! signed events against a parallel payload-material stream and snapshot
//! heads, enforcing the closed signer-kind policy per event type.

use crate::canonical::canonical;
use crate::crypto::{sha256_hex, verify_ed25519_over_hex};
use crate::error::{codes, VerifyError, VerifyResult};
use crate::keys::{check_not_revoked_or_rotated, check_usable_at, KeyMap};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub v: u32,
    pub id: String,
    pub at: DateTime<Utc>,
    #[serde(rename = "streamId")]
    pub stream_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub actor: Value,
    pub payload: Value,
    #[serde(rename = "payloadHash")]
    pub payload_hash: String,
    #[serde(rename = "prevChainHash")]
    pub prev_chain_hash: Option<String>,
    #[serde(rename = "chainHash")]
    pub chain_hash: String,
    pub signature: Option<String>,
    #[serde(rename = "signerKeyId")]
    pub signer_key_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayloadMaterial {
    pub v: u32,
    pub id: String,
    /// Kept as the raw JSON value rather than parsed into a `DateTime`, so
    /// hashing replays the producer's exact byte representation instead of
    /// a reformatted one.
    pub at: Value,
    #[serde(rename = "streamId")]
    pub stream_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub actor: Value,
    pub payload: Value,
}

/// Closed set of signer requirements an event `type` can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerKind {
    Robot,
    Operator,
    RobotOrOperator,
    ServerOrOperator,
    ServerOrRobot,
    Server,
    None,
}

/// Total function over the closed event-type set this system recognizes.
/// An unrecognized `type` is a schema error, not a silently-permissive
/// default — the recognized set is closed, not "anything goes".
pub fn signer_kind_for_type(event_type: &str) -> VerifyResult<SignerKind> {
    use SignerKind::*;
    let kind = match event_type {
        "JOB_CREATED" => Server,
        "JOB_STARTED" | "JOB_COMPLETED" => RobotOrOperator,
        "METERING_RECORDED" => Robot,
        "PROOF_EVALUATED" => Server,
        "DECISION_RECORDED" => ServerOrOperator,
        "SETTLEMENT_HELD" | "SETTLEMENT_RELEASED" | "SETTLED" | "SETTLEMENT_FORFEITED" => Server,
        "TENANT_POLICY_UPDATED" => Operator,
        "SERVER_SIGNER_KEY_REGISTERED"
        | "SERVER_SIGNER_KEY_ROTATED"
        | "SERVER_SIGNER_KEY_REVOKED" => Server,
        "INVOICE_ISSUED" => ServerOrOperator,
        "SLA_BREACH_DETECTED" => ServerOrRobot,
        "GOVERNANCE_SNAPSHOT_TAKEN" | "JOB_NOTE_ADDED" => None,
        other => {
            return Err(VerifyError::new(
                codes::SCHEMA_INVALID,
                format!("unrecognized event type: {other}"),
            ))
        }
    };
    Ok(kind)
}

pub struct ChainInput<'a> {
    pub events: &'a [Event],
    pub payload_material: &'a [PayloadMaterial],
    pub keys: &'a KeyMap,
    pub declared_head: Option<(String, String)>,
    pub strict: bool,
}

/// Compute the canonical `payloadHash` for index `i` from untrusted
/// payload-material fields.
fn recompute_payload_hash(m: &PayloadMaterial) -> VerifyResult<String> {
    let envelope = serde_json::json!({
        "v": m.v,
        "id": m.id,
        "at": m.at,
        "streamId": m.stream_id,
        "type": m.event_type,
        "actor": m.actor,
        "payload": m.payload,
    });
    Ok(sha256_hex(&canonical(&envelope)?))
}

fn recompute_chain_hash(prev: &Option<String>, payload_hash: &str) -> VerifyResult<String> {
    let envelope = serde_json::json!({
        "v": 1,
        "prevChainHash": prev,
        "payloadHash": payload_hash,
    });
    Ok(sha256_hex(&canonical(&envelope)?))
}

pub fn verify_event_chain(input: &ChainInput) -> VerifyResult<()> {
    if input.events.len() != input.payload_material.len() {
        return Err(VerifyError::new(
            codes::SCHEMA_INVALID,
            format!(
                "events ({}) and payload_material ({}) length mismatch",
                input.events.len(),
                input.payload_material.len()
            ),
        ));
    }

    let mut prior_chain_hash: Option<String> = None;
    for (i, (event, material)) in input.events.iter().zip(input.payload_material.iter()).enumerate() {
        let path = format!("events[{i}]");

        if event.v != material.v
            || event.id != material.id
            || event.stream_id != material.stream_id
            || event.event_type != material.event_type
        {
            return Err(VerifyError::new(
                codes::SCHEMA_INVALID,
                "event and payload_material field mismatch (v/id/streamId/type)",
            )
            .with_path(path));
        }
        let event_actor_canon = canonical(&event.actor)?;
        let material_actor_canon = canonical(&material.actor)?;
        let event_payload_canon = canonical(&event.payload)?;
        let material_payload_canon = canonical(&material.payload)?;
        if event_actor_canon != material_actor_canon || event_payload_canon != material_payload_canon {
            return Err(VerifyError::new(
                codes::SCHEMA_INVALID,
                "event and payload_material actor/payload mismatch",
            )
            .with_path(path));
        }

        let recomputed_payload_hash = recompute_payload_hash(material)?;
        if recomputed_payload_hash != event.payload_hash {
            return Err(VerifyError::new(
                codes::PAYLOAD_HASH_MISMATCH,
                format!("expected {}, computed {}", event.payload_hash, recomputed_payload_hash),
            )
            .with_path(path));
        }

        let expected_prev = if i == 0 { None } else { prior_chain_hash.clone() };
        if event.prev_chain_hash != expected_prev {
            return Err(VerifyError::new(
                codes::CHAIN_HASH_MISMATCH,
                "prevChainHash does not match prior event's chainHash",
            )
            .with_path(path));
        }

        let recomputed_chain_hash = recompute_chain_hash(&event.prev_chain_hash, &event.payload_hash)?;
        if recomputed_chain_hash != event.chain_hash {
            return Err(VerifyError::new(
                codes::CHAIN_HASH_MISMATCH,
                format!("expected {}, computed {}", event.chain_hash, recomputed_chain_hash),
            )
            .with_path(path));
        }

        let required_kind = signer_kind_for_type(&event.event_type)?;
        if required_kind != SignerKind::None
            && (event.signature.is_none() || event.signer_key_id.is_none())
        {
            return Err(
                VerifyError::new(codes::SCHEMA_INVALID, "signature required for this event type")
                    .with_path(path),
            );
        }

        if let (Some(signature), Some(signer_key_id)) = (&event.signature, &event.signer_key_id) {
            let key_meta = input.keys.get(signer_key_id).ok_or_else(|| {
                VerifyError::new(codes::SCHEMA_INVALID, format!("unknown signerKeyId {signer_key_id}"))
                    .with_path(path.clone())
            })?;
            let ok = verify_ed25519_over_hex(&event.payload_hash, signature, &key_meta.public_key_pem)?;
            if !ok {
                return Err(VerifyError::new(codes::SCHEMA_INVALID, "event signature invalid")
                    .with_path(path.clone()));
            }
            check_usable_at(key_meta, event.at).map_err(|e| e.with_path(path.clone()))?;
            if required_kind == SignerKind::Server {
                check_not_revoked_or_rotated(key_meta, event.at).map_err(|e| e.with_path(path.clone()))?;
                if input.strict {
                    if !key_meta.server_governed {
                        return Err(VerifyError::new(
                            codes::SERVER_SIGNER_KEY_NOT_GOVERNED,
                            "server signer key is not governed",
                        )
                        .with_path(path.clone()));
                    }
                    if key_meta.valid_from.is_none() {
                        return Err(VerifyError::new(
                            codes::KEY_NOT_YET_VALID,
                            "governed server key missing validFrom",
                        )
                        .with_path(path.clone()));
                    }
                    if key_meta.purpose.as_deref() != Some("server") {
                        return Err(VerifyError::new(
                            codes::SERVER_SIGNER_KEY_NOT_GOVERNED,
                            "server signer key purpose must be 'server'",
                        )
                        .with_path(path));
                    }
                }
            }
        }

        prior_chain_hash = Some(event.chain_hash.clone());
    }

    if let Some((expected_hash, expected_id)) = &input.declared_head {
        let last = input.events.last();
        let ok = last.map(|e| &e.chain_hash == expected_hash && &e.id == expected_id).unwrap_or(false);
        if !ok {
            return Err(VerifyError::new(
                codes::CHAIN_HASH_MISMATCH,
                "declared head does not match last event in stream",
            ));
        }
    }

    Ok(())
}

/// Load an `events.jsonl`/`payload_material.jsonl` pair from disk.
pub fn load_jsonl_events(path: &Path) -> VerifyResult<Vec<Event>> {
    load_jsonl(path)
}

pub fn load_jsonl_payload_material(path: &Path) -> VerifyResult<Vec<PayloadMaterial>> {
    load_jsonl(path)
}

fn load_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> VerifyResult<Vec<T>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        VerifyError::new(codes::SCHEMA_INVALID, format!("cannot read {}: {e}", path.display()))
            .with_path(path.display().to_string())
    })?;
    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: T = serde_json::from_str(line).map_err(|e| {
            VerifyError::new(codes::INVALID_JSON, format!("line {i}: {e}"))
                .with_path(path.display().to_string())
        })?;
        out.push(parsed);
    }
    Ok(out)
}
