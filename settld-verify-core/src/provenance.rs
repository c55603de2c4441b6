// SPDX-License-Identifier: MIT OR Apache-2.0
//! Provenance refs inside event streams (§4.11a): every settlement-outcome
//! event must reference the `PROOF_EVALUATED`/`DECISION_RECORDED` event it
//! acted on, and the facts the decision was made against must still be
//! fresh relative to the events preceding it.

use crate::canonical::canonical;
use crate::crypto::sha256_hex;
use crate::error::{codes, VerifyError, VerifyResult};
use crate::event_chain::Event;
use serde_json::Value;

const SETTLEMENT_OUTCOME_TYPES: &[&str] =
    &["SETTLEMENT_HELD", "SETTLEMENT_RELEASED", "SETTLED", "SETTLEMENT_FORFEITED"];

fn str_field<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload.get(field).and_then(Value::as_str)
}

/// Validate the `decisionRef` embedded in a settlement-outcome event's
/// payload against the `PROOF_EVALUATED`/`DECISION_RECORDED` event it names,
/// then re-derive `ZoneCoverageFacts.v1` from the events preceding that
/// decision and require it still canonicalizes to the `factsHash` the
/// decision declared.
pub fn verify_provenance_ref(events: &[Event], settlement_index: usize) -> VerifyResult<()> {
    let settlement = &events[settlement_index];
    if !SETTLEMENT_OUTCOME_TYPES.contains(&settlement.event_type.as_str()) {
        return Ok(());
    }

    let decision_ref = settlement.payload.get("decisionRef").ok_or_else(|| {
        VerifyError::new(codes::PROVENANCE_REF_MISMATCH, "settlement event missing decisionRef")
            .with_path(settlement.id.clone())
    })?;
    let ref_event_id = str_field(decision_ref, "eventId").ok_or_else(|| {
        VerifyError::new(codes::PROVENANCE_REF_MISMATCH, "decisionRef missing eventId")
    })?;

    let (decision_index, decision) = events
        .iter()
        .enumerate()
        .find(|(_, e)| e.id == ref_event_id && e.stream_id == settlement.stream_id)
        .ok_or_else(|| {
            VerifyError::new(
                codes::PROVENANCE_REF_MISMATCH,
                format!("referenced event {ref_event_id} not found in stream"),
            )
        })?;

    if decision.event_type != "PROOF_EVALUATED" && decision.event_type != "DECISION_RECORDED" {
        return Err(VerifyError::new(
            codes::PROVENANCE_REF_MISMATCH,
            format!("referenced event {ref_event_id} has unexpected type {}", decision.event_type),
        ));
    }

    let chain_fields: &[(&str, &str)] = &[
        ("chainHash", &decision.chain_hash),
        ("payloadHash", &decision.payload_hash),
    ];
    for (field, actual) in chain_fields {
        if let Some(expected) = str_field(decision_ref, field) {
            if expected != *actual {
                return Err(VerifyError::new(
                    codes::PROVENANCE_REF_MISMATCH,
                    format!("decisionRef.{field} does not match referenced event"),
                )
                .with_detail(serde_json::json!({"expected": expected, "actual": actual})));
            }
        }
    }
    if let Some(expected) = str_field(decision_ref, "signerKeyId") {
        if Some(expected) != decision.signer_key_id.as_deref() {
            return Err(VerifyError::new(codes::PROVENANCE_REF_MISMATCH, "decisionRef.signerKeyId does not match referenced event"));
        }
    }
    if let Some(expected) = str_field(decision_ref, "signature") {
        if Some(expected) != decision.signature.as_deref() {
            return Err(VerifyError::new(codes::PROVENANCE_REF_MISMATCH, "decisionRef.signature does not match referenced event"));
        }
    }

    for field in ["evaluationId", "evaluatedAtChainHash", "factsHash", "status"] {
        if let Some(expected) = str_field(decision_ref, field) {
            let actual = str_field(&decision.payload, field);
            if actual != Some(expected) {
                return Err(VerifyError::new(
                    codes::PROVENANCE_REF_MISMATCH,
                    format!("decisionRef.{field} does not match referenced event payload"),
                )
                .with_detail(serde_json::json!({"expected": expected, "actual": actual})));
            }
        }
    }

    if let Some(declared_facts_hash) = str_field(&decision.payload, "factsHash") {
        let facts = build_zone_coverage_facts(events, decision_index);
        let recomputed = sha256_hex(&canonical(&facts)?);
        if recomputed != declared_facts_hash {
            return Err(VerifyError::new(
                codes::FACTS_HASH_STALE,
                format!("expected {declared_facts_hash}, recomputed {recomputed}"),
            )
            .with_path(decision.id.clone())
            .with_detail(serde_json::json!({"expected": declared_facts_hash, "actual": recomputed})));
        }
    }

    Ok(())
}

/// Deterministically rebuild the `ZoneCoverageFacts.v1` snapshot from every
/// `METERING_RECORDED` event in the same stream strictly before
/// `decision_index`, in event order.
fn build_zone_coverage_facts(events: &[Event], decision_index: usize) -> Value {
    let decision = &events[decision_index];
    let facts: Vec<&Value> = events[..decision_index]
        .iter()
        .filter(|e| e.stream_id == decision.stream_id && e.event_type == "METERING_RECORDED")
        .map(|e| &e.payload)
        .collect();
    serde_json::json!({
        "schemaVersion": "ZoneCoverageFacts.v1",
        "streamId": decision.stream_id,
        "asOfChainHash": events[..decision_index]
            .iter()
            .rev()
            .find(|e| e.stream_id == decision.stream_id)
            .map(|e| e.chain_hash.clone()),
        "facts": facts,
    })
}

/// Run provenance-ref verification over every settlement-outcome event in
/// the stream, short-circuiting on the first failure (per the documented
/// C11 ordering).
pub fn verify_all_provenance_refs(events: &[Event]) -> VerifyResult<()> {
    for i in 0..events.len() {
        verify_provenance_ref(events, i)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn event(id: &str, stream_id: &str, event_type: &str, payload: Value, chain_hash: &str) -> Event {
        Event {
            v: 1,
            id: id.to_string(),
            at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            stream_id: stream_id.to_string(),
            event_type: event_type.to_string(),
            actor: json!({"kind": "server"}),
            payload,
            payload_hash: "p".repeat(64),
            prev_chain_hash: None,
            chain_hash: chain_hash.to_string(),
            signature: Some("sig".to_string()),
            signer_key_id: Some("key-1".to_string()),
        }
    }

    #[test]
    fn accepts_a_matching_decision_ref() {
        let metering = event("e1", "s1", "METERING_RECORDED", json!({"zone": "a"}), "c1");
        let facts = build_zone_coverage_facts(&[metering.clone(), event("e2", "s1", "PROOF_EVALUATED", json!({}), "c2")], 1);
        let facts_hash = sha256_hex(&canonical(&facts).unwrap());
        let decision = event(
            "e2",
            "s1",
            "PROOF_EVALUATED",
            json!({"evaluationId": "ev-1", "evaluatedAtChainHash": "c1", "factsHash": facts_hash, "status": "accepted"}),
            "c2",
        );
        let settlement = event(
            "e3",
            "s1",
            "SETTLEMENT_HELD",
            json!({"decisionRef": {
                "eventId": "e2",
                "chainHash": "c2",
                "payloadHash": "p".repeat(64),
                "signerKeyId": "key-1",
                "signature": "sig",
                "evaluationId": "ev-1",
                "evaluatedAtChainHash": "c1",
                "factsHash": facts_hash,
                "status": "accepted",
            }}),
            "c3",
        );
        let events = vec![metering, decision, settlement];
        assert!(verify_provenance_ref(&events, 2).is_ok());
    }

    #[test]
    fn rejects_missing_referenced_event() {
        let settlement = event(
            "e3",
            "s1",
            "SETTLEMENT_HELD",
            json!({"decisionRef": {"eventId": "missing"}}),
            "c3",
        );
        let events = vec![settlement];
        let err = verify_provenance_ref(&events, 0).unwrap_err();
        assert_eq!(err.code, codes::PROVENANCE_REF_MISMATCH);
    }

    #[test]
    fn rejects_stale_facts_hash() {
        let metering = event("e1", "s1", "METERING_RECORDED", json!({"zone": "a"}), "c1");
        let decision = event(
            "e2",
            "s1",
            "PROOF_EVALUATED",
            json!({"evaluationId": "ev-1", "evaluatedAtChainHash": "c1", "factsHash": "f".repeat(64), "status": "accepted"}),
            "c2",
        );
        let settlement = event(
            "e3",
            "s1",
            "SETTLEMENT_HELD",
            json!({"decisionRef": {"eventId": "e2"}}),
            "c3",
        );
        let events = vec![metering, decision, settlement];
        let err = verify_provenance_ref(&events, 2).unwrap_err();
        assert_eq!(err.code, codes::FACTS_HASH_STALE);
    }
}
