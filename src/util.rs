//! Small helpers shared across layers: wall-clock time, log anonymization and
//! checked JSON field extraction.

use crate::error::MetaError;
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// A parsed JSON object.
pub type JsonObject = Map<String, Value>;

/// Wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Mask an identifier for logging.
///
/// Short ids keep their first and last character, longer ones keep four
/// characters at each end.
pub fn anonymize(value: &str) -> String {
    const MASK: &str = "******";
    let chars: Vec<char> = value.chars().collect();
    match chars.len() {
        0..=2 => MASK.to_string(),
        3..=20 => format!("{}{MASK}{}", chars[0], chars[chars.len() - 1]),
        n => {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[n - 4..].iter().collect();
            format!("{head}{MASK}{tail}")
        }
    }
}

/// Parse `text` as a JSON object.
pub fn parse_object(text: &str) -> Result<JsonObject, MetaError> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(MetaError::NotAnObject),
        Err(err) => Err(MetaError::Malformed(err.to_string())),
    }
}

/// Read a mandatory unsigned 32-bit field.
pub fn require_u32(obj: &JsonObject, key: &'static str) -> Result<u32, MetaError> {
    optional_u32(obj, key)?.ok_or(MetaError::MissingField(key))
}

/// Read an optional unsigned 32-bit field; present but malformed is an error.
pub fn optional_u32(obj: &JsonObject, key: &'static str) -> Result<Option<u32>, MetaError> {
    match obj.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .filter(|v| *v <= u64::from(u32::MAX))
            .map(|v| Some(v as u32))
            .ok_or(MetaError::InvalidField(key)),
    }
}

/// Read a mandatory signed 64-bit field.
pub fn require_i64(obj: &JsonObject, key: &'static str) -> Result<i64, MetaError> {
    optional_i64(obj, key)?.ok_or(MetaError::MissingField(key))
}

/// Read an optional signed 64-bit field; present but malformed is an error.
pub fn optional_i64(obj: &JsonObject, key: &'static str) -> Result<Option<i64>, MetaError> {
    match obj.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or(MetaError::InvalidField(key)),
    }
}

/// Read a mandatory string field no longer than `max_len` bytes.
pub fn require_str<'a>(
    obj: &'a JsonObject,
    key: &'static str,
    max_len: usize,
) -> Result<&'a str, MetaError> {
    let value = obj.get(key).ok_or(MetaError::MissingField(key))?;
    value
        .as_str()
        .filter(|s| s.len() <= max_len)
        .ok_or(MetaError::InvalidField(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_anonymize() {
        assert_eq!(anonymize(""), "******");
        assert_eq!(anonymize("ab"), "******");
        assert_eq!(anonymize("abc"), "a******c");
        assert_eq!(
            anonymize("0123456789abcdefghijklmnop"),
            "0123******mnop"
        );
    }

    #[test]
    fn test_u32_bounds() {
        let doc = obj(json!({"ok": 7, "big": 4294967296u64, "neg": -1, "text": "7"}));
        assert_eq!(require_u32(&doc, "ok"), Ok(7));
        assert_eq!(require_u32(&doc, "big"), Err(MetaError::InvalidField("big")));
        assert_eq!(require_u32(&doc, "neg"), Err(MetaError::InvalidField("neg")));
        assert_eq!(require_u32(&doc, "text"), Err(MetaError::InvalidField("text")));
        assert_eq!(require_u32(&doc, "absent"), Err(MetaError::MissingField("absent")));
        assert_eq!(optional_u32(&doc, "absent"), Ok(None));
    }

    #[test]
    fn test_i64_bounds() {
        let doc = obj(json!({"neg": -5, "huge": u64::MAX, "float": 1.5}));
        assert_eq!(require_i64(&doc, "neg"), Ok(-5));
        assert_eq!(require_i64(&doc, "huge"), Err(MetaError::InvalidField("huge")));
        assert_eq!(require_i64(&doc, "float"), Err(MetaError::InvalidField("float")));
    }

    #[test]
    fn test_parse_object_rejects_non_objects() {
        assert_eq!(parse_object("[1,2]"), Err(MetaError::NotAnObject));
        assert!(matches!(parse_object("{"), Err(MetaError::Malformed(_))));
        assert!(parse_object("{}").unwrap().is_empty());
    }

    #[test]
    fn test_require_str_length() {
        let doc = obj(json!({"name": "camera"}));
        assert_eq!(require_str(&doc, "name", 16), Ok("camera"));
        assert_eq!(require_str(&doc, "name", 3), Err(MetaError::InvalidField("name")));
    }
}
