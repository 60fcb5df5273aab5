//! Envelope extraction from request parts and plaintext rewrite.

use crate::domain::{InvalidReason, SecureError};
use serde_json::{Map, Value};
use shared_crypto::{Envelope, ENVELOPE_VERSION};

/// Request part an envelope was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeSource {
    Body,
    Query,
}

/// Find the envelope, preferring the body over the query.
///
/// # Errors
/// - `UnsupportedEnvelopeVersion` if a part has all three fields but `v != 1`
/// - `MissingEnvelope` if neither part carries one
pub fn extract_envelope(
    body: Option<&Value>,
    query: &Value,
) -> Result<(Envelope, EnvelopeSource), SecureError> {
    if let Some(envelope) = body.map(parse_record).transpose()?.flatten() {
        return Ok((envelope, EnvelopeSource::Body));
    }
    if let Some(envelope) = parse_record(query)? {
        return Ok((envelope, EnvelopeSource::Query));
    }
    Err(SecureError::invalid(InvalidReason::MissingEnvelope))
}

fn parse_record(value: &Value) -> Result<Option<Envelope>, SecureError> {
    let Value::Object(record) = value else {
        return Ok(None);
    };

    let (Some(v), Some(iv), Some(ciphertext)) = (
        field(record, "v"),
        field(record, "iv"),
        field(record, "ciphertext"),
    ) else {
        return Ok(None);
    };

    let version = v.trim().parse::<f64>().ok().filter(|v| v.is_finite());
    if version != Some(f64::from(ENVELOPE_VERSION)) {
        return Err(SecureError::invalid(
            InvalidReason::UnsupportedEnvelopeVersion,
        ));
    }

    Ok(Some(Envelope {
        v: ENVELOPE_VERSION,
        iv,
        ciphertext,
    }))
}

/// String, number, or first string of an array. Empty counts as absent.
fn field(record: &Map<String, Value>, key: &str) -> Option<String> {
    let value = match record.get(key)? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.first()?.as_str()?.to_string(),
        _ => return None,
    };
    (!value.is_empty()).then_some(value)
}

/// Split decrypted plaintext into the new (body, query) pair.
///
/// A plaintext object whose keys are only `body` and/or `query` sets both
/// parts. Any other plaintext replaces the part the envelope came from and
/// clears the other. Non-object parts become `{}`.
pub fn rewrite_parts(plaintext: Value, source: EnvelopeSource) -> (Value, Value) {
    if let Value::Object(mut map) = plaintext {
        let split = !map.is_empty() && map.keys().all(|k| k == "body" || k == "query");
        if split {
            let body = ensure_record(map.remove("body"));
            let query = ensure_record(map.remove("query"));
            return (body, query);
        }
        return place(Value::Object(map), source);
    }
    place(Value::Object(Map::new()), source)
}

fn place(value: Value, source: EnvelopeSource) -> (Value, Value) {
    let empty = Value::Object(Map::new());
    match source {
        EnvelopeSource::Body => (value, empty),
        EnvelopeSource::Query => (empty, value),
    }
}

fn ensure_record(value: Option<Value>) -> Value {
    match value {
        Some(Value::Object(map)) => Value::Object(map),
        _ => Value::Object(Map::new()),
    }
}
