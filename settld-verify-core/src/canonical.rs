// SPDX-License-Identifier: MIT OR Apache-2.0
//! RFC-8785-style canonical JSON encoding (C1).
//!
//! Every hash in this crate is taken over the byte string this module
//! produces, never over a re-serialized `serde_json::Value` with default
//! settings — key order and number formatting are both underspecified by
//! `serde_json::to_vec` and must not be allowed to drift between platforms.

use crate::error::{codes, VerifyError, VerifyResult};
use serde_json::{Map, Number, Value};

/// Produce the canonical byte string of `value`.
pub fn canonical(value: &Value) -> VerifyResult<Vec<u8>> {
    let mut out = Vec::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

/// Produce the canonical byte string, UTF-8 decoded. Hashing should prefer
/// [`canonical`] and feed the raw bytes to the digest; this is a convenience
/// for callers that want to compare/print the canonical form.
pub fn canonical_string(value: &Value) -> VerifyResult<String> {
    let bytes = canonical(value)?;
    String::from_utf8(bytes)
        .map_err(|e| VerifyError::new(codes::INVALID_JSON, format!("canonical output not UTF-8: {e}")))
}

/// Canonicalize `doc` after removing `omit` top-level fields. This is the
/// shape every hash-then-sign document in this system uses: recompute the
/// hash of the document with its own hash field (and, usually, `signature`)
/// stripped out.
pub fn canonical_without_fields(doc: &Value, omit: &[&str]) -> VerifyResult<Vec<u8>> {
    let Value::Object(map) = doc else {
        return Err(VerifyError::new(
            codes::SCHEMA_INVALID,
            "expected a JSON object to canonicalize",
        ));
    };
    let mut pruned = Map::with_capacity(map.len());
    for (k, v) in map {
        if !omit.contains(&k.as_str()) {
            pruned.insert(k.clone(), v.clone());
        }
    }
    canonical(&Value::Object(pruned))
}

/// Re-parse canonical bytes back into a `Value`. Used by the idempotence
/// property test: `canonical(parse(canonical(v))) == canonical(v)`.
pub fn parse(bytes: &[u8]) -> VerifyResult<Value> {
    serde_json::from_slice(bytes)
        .map_err(|e| VerifyError::new(codes::INVALID_JSON, format!("invalid JSON: {e}")))
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> VerifyResult<()> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => write_number(n, out)?,
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            // RFC 8785 orders object keys by the lexicographic order of
            // their UTF-16 code unit sequences.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| utf16_units(a).cmp(&utf16_units(b)));
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out);
                out.push(b':');
                // unwrap: key came from this same map
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn utf16_units(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for ch in s.chars() {
        match ch {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\u{0008}' => out.extend_from_slice(b"\\b"),
            '\u{000C}' => out.extend_from_slice(b"\\f"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                out.extend_from_slice(format!("\\u{:04x}", c as u32).as_bytes());
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

fn write_number(n: &Number, out: &mut Vec<u8>) -> VerifyResult<()> {
    if let Some(i) = n.as_i64() {
        out.extend_from_slice(i.to_string().as_bytes());
        return Ok(());
    }
    if let Some(u) = n.as_u64() {
        out.extend_from_slice(u.to_string().as_bytes());
        return Ok(());
    }
    let f = n
        .as_f64()
        .ok_or_else(|| VerifyError::new(codes::INVALID_JSON, "number has no numeric representation"))?;
    if !f.is_finite() {
        return Err(VerifyError::new(
            codes::INVALID_JSON,
            "non-finite numbers cannot be canonicalized",
        ));
    }
    out.extend_from_slice(format_shortest_roundtrip(f).as_bytes());
    Ok(())
}

/// Shortest decimal string that round-trips back to the same f64, matching
/// the intent of RFC 8785's number serialization (ECMAScript `Number::
/// toString`). Rust's own `f64` `Display` already produces the shortest
/// round-trippable decimal; we only need to normalize integral floats to
/// carry no exponent and no trailing `.0` divergence from JSON's grammar.
fn format_shortest_roundtrip(f: f64) -> String {
    if f == 0.0 {
        return if f.is_sign_negative() { "-0".to_string() } else { "0".to_string() };
    }
    let s = format!("{f}");
    if let Some(stripped) = s.strip_suffix(".0") {
        stripped.to_string()
    } else {
        s
    }
}
