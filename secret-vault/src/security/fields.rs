//! Field-selective encryption of JSON documents.
//!
//! Only the named fields are replaced with envelopes. The set of replaced
//! fields, and whether each held a string or structured JSON, is recorded on
//! the document under [`ENCRYPTED_FIELDS_KEY`] so the reverse transform needs
//! no outside knowledge.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use super::envelope::EncryptedEnvelope;
use super::error::{CryptoError, CryptoResult};
use super::Sealer;

/// Bookkeeping key written next to the encrypted fields.
pub const ENCRYPTED_FIELDS_KEY: &str = "__encrypted_fields";

const ENCODING_TEXT: &str = "text";
const ENCODING_JSON: &str = "json";

/// Replace each present, non-null field in `field_names` with an envelope of
/// its serialized form. Strings are sealed raw, everything else as JSON.
pub fn encrypt_fields<S>(
    sealer: &S,
    doc: &Value,
    field_names: &[&str],
    expires_at: Option<DateTime<Utc>>,
) -> CryptoResult<Value>
where
    S: Sealer + ?Sized,
{
    let source = doc
        .as_object()
        .ok_or_else(|| CryptoError::InvalidDocument("expected a JSON object".into()))?;

    let mut output = source.clone();
    let mut recorded = match source.get(ENCRYPTED_FIELDS_KEY) {
        Some(Value::Object(existing)) => existing.clone(),
        _ => Map::new(),
    };

    for name in field_names {
        let value = match source.get(*name) {
            Some(Value::Null) | None => continue,
            Some(value) => value,
        };

        let (serialized, encoding) = match value {
            Value::String(text) => (text.clone(), ENCODING_TEXT),
            other => (
                serde_json::to_string(other).map_err(|e| CryptoError::Encoding(e.to_string()))?,
                ENCODING_JSON,
            ),
        };

        let envelope = sealer.seal(&serialized, expires_at)?;
        let sealed =
            serde_json::to_value(envelope).map_err(|e| CryptoError::Encoding(e.to_string()))?;

        output.insert((*name).to_string(), sealed);
        recorded.insert((*name).to_string(), Value::String(encoding.to_string()));
    }

    if !recorded.is_empty() {
        output.insert(ENCRYPTED_FIELDS_KEY.to_string(), Value::Object(recorded));
    }

    Ok(Value::Object(output))
}

/// Reverse [`encrypt_fields`]. A field that fails to open is left as its
/// envelope and logged; the other fields are still restored.
pub fn decrypt_fields<S>(sealer: &S, doc: &Value) -> CryptoResult<Value>
where
    S: Sealer + ?Sized,
{
    let source = doc
        .as_object()
        .ok_or_else(|| CryptoError::InvalidDocument("expected a JSON object".into()))?;

    let mut output = source.clone();
    let recorded = match output.remove(ENCRYPTED_FIELDS_KEY) {
        Some(Value::Object(recorded)) => recorded,
        _ => return Ok(Value::Object(output)),
    };

    for (name, encoding) in recorded {
        let Some(sealed) = output.get(&name) else {
            continue;
        };

        match open_field(sealer, sealed, encoding.as_str()) {
            Ok(restored) => {
                output.insert(name, restored);
            }
            Err(e) => {
                warn!("Leaving field '{}' encrypted: {}", name, e);
            }
        }
    }

    Ok(Value::Object(output))
}

fn open_field<S>(sealer: &S, sealed: &Value, encoding: Option<&str>) -> CryptoResult<Value>
where
    S: Sealer + ?Sized,
{
    let envelope: EncryptedEnvelope = serde_json::from_value(sealed.clone())
        .map_err(|e| CryptoError::Encoding(format!("not an envelope: {}", e)))?;
    let plaintext = sealer.open(&envelope)?;

    match encoding {
        Some(ENCODING_JSON) => {
            serde_json::from_str(&plaintext).map_err(|e| CryptoError::Encoding(e.to_string()))
        }
        _ => Ok(Value::String(plaintext)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{EncryptionEngine, EngineKey};
    use serde_json::json;

    fn engine() -> EncryptionEngine {
        EncryptionEngine::from_key(EngineKey::from_slice(&[9u8; 32]).unwrap(), 1)
    }

    #[test]
    fn test_selected_fields_round_trip() {
        let engine = engine();
        let doc = json!({"public": "p", "secretA": "a", "secretB": "b", "n": 42});

        let sealed = engine.encrypt_fields(&doc, &["secretA", "secretB"], None).unwrap();
        assert_eq!(sealed["public"], "p");
        assert_eq!(sealed["n"], 42);
        assert_ne!(sealed["secretA"], "a");
        assert_ne!(sealed["secretB"], "b");
        assert!(EncryptedEnvelope::looks_like(&sealed["secretA"]));
        assert!(sealed.get(ENCRYPTED_FIELDS_KEY).is_some());

        let restored = engine.decrypt_fields(&sealed).unwrap();
        assert_eq!(restored, doc);
    }

    #[test]
    fn test_structured_fields_keep_shape() {
        let engine = engine();
        let doc = json!({
            "config": {"region": "eu-west-1", "retries": 3},
            "tags": ["a", "b"],
            "numeric_string": "42"
        });

        let sealed = engine
            .encrypt_fields(&doc, &["config", "tags", "numeric_string"], None)
            .unwrap();
        let restored = engine.decrypt_fields(&sealed).unwrap();

        assert_eq!(restored, doc);
        assert_eq!(restored["numeric_string"], json!("42"));
    }

    #[test]
    fn test_missing_and_null_fields_skipped() {
        let engine = engine();
        let doc = json!({"present": "x", "nothing": null});

        let sealed = engine
            .encrypt_fields(&doc, &["present", "nothing", "absent"], None)
            .unwrap();
        assert_eq!(sealed["nothing"], Value::Null);
        assert!(sealed.get("absent").is_none());
        assert_eq!(sealed[ENCRYPTED_FIELDS_KEY], json!({"present": "text"}));
    }

    #[test]
    fn test_no_fields_leaves_doc_untouched() {
        let engine = engine();
        let doc = json!({"a": 1});
        let sealed = engine.encrypt_fields(&doc, &[], None).unwrap();
        assert_eq!(sealed, doc);
        assert_eq!(engine.decrypt_fields(&sealed).unwrap(), doc);
    }

    #[test]
    fn test_one_bad_field_does_not_abort() {
        let engine = engine();
        let doc = json!({"good": "g", "bad": "b"});

        let mut sealed = engine.encrypt_fields(&doc, &["good", "bad"], None).unwrap();
        let tag = sealed["bad"]["auth_tag"].as_str().unwrap().to_string();
        let flipped = if tag.starts_with('0') {
            format!("1{}", &tag[1..])
        } else {
            format!("0{}", &tag[1..])
        };
        sealed["bad"]["auth_tag"] = json!(flipped);

        let restored = engine.decrypt_fields(&sealed).unwrap();
        assert_eq!(restored["good"], "g");
        assert!(EncryptedEnvelope::looks_like(&restored["bad"]));
        assert!(restored.get(ENCRYPTED_FIELDS_KEY).is_none());
    }

    #[test]
    fn test_non_object_rejected() {
        let engine = engine();
        assert!(matches!(
            engine.encrypt_fields(&json!([1, 2]), &["a"], None),
            Err(CryptoError::InvalidDocument(_))
        ));
    }
}
