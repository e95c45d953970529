//! Marker-based JSON encoding shared by the envelope and the catalog payload.
//!
//! Plain JSON has no byte arrays and no maps with ordered, non-object
//! semantics, so two conventions are layered on top of it:
//!
//! - a string starting with [`BYTES_MARKER`] carries base64-encoded bytes;
//! - an array whose first element is [`MAP_MARKER`] carries `[key, value]`
//!   pairs.
//!
//! [`revive`] rewrites a parsed document bottom-up so that bytes become
//! arrays of numbers and marker arrays become objects, after which plain
//! `serde` deserialization applies. The `bytes`, `nonce` and map helpers
//! below produce the marker form on serialization.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::de::{self, DeserializeOwned, MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::defaults::{BYTES_MARKER, MAP_MARKER, NONCE_LENGTH};
use crate::error::{Error, Result};

/// Encode bytes as a marker string.
pub fn encode_bytes(data: &[u8]) -> String {
    format!("{}{}", BYTES_MARKER, STANDARD.encode(data))
}

/// Decode a marker string back into bytes.
pub fn decode_bytes(text: &str) -> Result<Vec<u8>> {
    let payload = text
        .strip_prefix(BYTES_MARKER)
        .ok_or_else(|| Error::Decode(format!("missing {} prefix", BYTES_MARKER)))?;
    STANDARD
        .decode(payload)
        .map_err(|e| Error::Decode(format!("invalid base64 payload: {}", e)))
}

/// Rewrite marker strings and marker arrays into plain JSON values.
pub fn revive(value: Value) -> Result<Value> {
    match value {
        Value::String(text) if text.starts_with(BYTES_MARKER) => {
            let bytes = decode_bytes(&text)?;
            Ok(Value::Array(bytes.into_iter().map(Value::from).collect()))
        }
        Value::Array(items) => {
            let items = items.into_iter().map(revive).collect::<Result<Vec<_>>>()?;
            match items.first() {
                Some(Value::String(first)) if first == MAP_MARKER => map_from_pairs(items),
                _ => Ok(Value::Array(items)),
            }
        }
        Value::Object(fields) => {
            let mut revived = Map::with_capacity(fields.len());
            for (key, field) in fields {
                revived.insert(key, revive(field)?);
            }
            Ok(Value::Object(revived))
        }
        other => Ok(other),
    }
}

fn map_from_pairs(items: Vec<Value>) -> Result<Value> {
    let mut map = Map::with_capacity(items.len().saturating_sub(1));
    for (position, pair) in items.into_iter().enumerate().skip(1) {
        let Value::Array(mut pair) = pair else {
            return Err(Error::Decode(format!(
                "map element {} is not a [key, value] pair",
                position
            )));
        };
        if pair.len() != 2 {
            return Err(Error::Decode(format!(
                "map element {} has {} items instead of 2",
                position,
                pair.len()
            )));
        }
        let value = pair.pop().unwrap_or(Value::Null);
        let Some(Value::String(key)) = pair.pop() else {
            return Err(Error::Decode(format!(
                "map element {} does not have a string key",
                position
            )));
        };
        map.insert(key, value);
    }
    Ok(Value::Object(map))
}

/// Parse marker-encoded JSON text into `T`.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T> {
    let raw: Value =
        serde_json::from_str(text).map_err(|e| Error::Decode(format!("invalid JSON: {}", e)))?;
    from_revived(raw)
}

/// Parse marker-encoded JSON held in raw bytes (must be UTF-8).
pub fn decode_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    let text = std::str::from_utf8(data)
        .map_err(|e| Error::Decode(format!("payload is not UTF-8: {}", e)))?;
    decode(text)
}

fn from_revived<T: DeserializeOwned>(raw: Value) -> Result<T> {
    let revived = revive(raw)?;
    serde_json::from_value(revived).map_err(|e| Error::Decode(format!("unexpected shape: {}", e)))
}

/// Serialize `value` into marker-encoded JSON text.
pub fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// `#[serde(with = "wire::bytes")]` for byte buffers.
pub mod bytes {
    use super::*;

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode_bytes(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
        deserializer.deserialize_any(BytesVisitor)
    }

    struct BytesVisitor;

    impl<'de> Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "a {} string or an array of bytes", BYTES_MARKER)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
            decode_bytes(v).map_err(E::custom)
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<Self::Value, E> {
            Ok(v.to_vec())
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(byte) = seq.next_element::<u8>()? {
                out.push(byte);
            }
            Ok(out)
        }
    }
}

/// `#[serde(with = "wire::nonce")]` for fixed-length nonces.
pub mod nonce {
    use super::*;

    pub fn serialize<S: Serializer>(
        nonce: &[u8; NONCE_LENGTH],
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        super::bytes::serialize(nonce, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<[u8; NONCE_LENGTH], D::Error> {
        let data = super::bytes::deserialize(deserializer)?;
        let len = data.len();
        data.try_into()
            .map_err(|_| de::Error::invalid_length(len, &"a 12-byte nonce"))
    }
}

/// Serialize a map as `["map://", [key, value], ...]`.
pub fn serialize_map<S, K, V>(map: &BTreeMap<K, V>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
    K: Serialize,
    V: Serialize,
{
    let mut seq = serializer.serialize_seq(Some(map.len() + 1))?;
    seq.serialize_element(MAP_MARKER)?;
    for pair in map {
        seq.serialize_element(&pair)?;
    }
    seq.end()
}

/// Deserialize a map from either a JSON object or a marker array.
pub fn deserialize_map<'de, D, K, V>(deserializer: D) -> std::result::Result<BTreeMap<K, V>, D::Error>
where
    D: Deserializer<'de>,
    K: Deserialize<'de> + Ord,
    V: Deserialize<'de>,
{
    deserializer.deserialize_any(MapVisitor(PhantomData))
}

struct MapVisitor<K, V>(PhantomData<(K, V)>);

impl<'de, K, V> Visitor<'de> for MapVisitor<K, V>
where
    K: Deserialize<'de> + Ord,
    V: Deserialize<'de>,
{
    type Value = BTreeMap<K, V>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "an object or a {} array", MAP_MARKER)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((key, value)) = access.next_entry()? {
            map.insert(key, value);
        }
        Ok(map)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
        let marker: Option<String> = seq.next_element()?;
        if marker.as_deref() != Some(MAP_MARKER) {
            return Err(de::Error::custom(format!(
                "array does not start with {}",
                MAP_MARKER
            )));
        }
        let mut map = BTreeMap::new();
        while let Some((key, value)) = seq.next_element::<(K, V)>()? {
            map.insert(key, value);
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        #[serde(with = "bytes")]
        blob: Vec<u8>,
        #[serde(with = "nonce")]
        nonce: [u8; NONCE_LENGTH],
        #[serde(
            serialize_with = "serialize_map",
            deserialize_with = "deserialize_map"
        )]
        lookup: BTreeMap<String, u32>,
    }

    fn sample() -> Sample {
        let mut lookup = BTreeMap::new();
        lookup.insert("a".to_string(), 1);
        lookup.insert("b".to_string(), 2);
        Sample {
            blob: vec![0, 1, 2, 255],
            nonce: [7u8; NONCE_LENGTH],
            lookup,
        }
    }

    #[test]
    fn test_encode_uses_markers() {
        let text = encode(&sample()).unwrap();
        let raw: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(raw["blob"], json!("base64://AAEC/w=="));
        assert_eq!(raw["lookup"], json!(["map://", ["a", 1], ["b", 2]]));
    }

    #[test]
    fn test_decode_after_encode() {
        let text = encode(&sample()).unwrap();
        let decoded: Sample = decode(&text).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_revive_bytes_into_numbers() {
        let revived = revive(json!({"k": "base64://AAEC"})).unwrap();
        assert_eq!(revived, json!({"k": [0, 1, 2]}));
    }

    #[test]
    fn test_revive_plain_strings_untouched() {
        let revived = revive(json!(["hello", "base6"])).unwrap();
        assert_eq!(revived, json!(["hello", "base6"]));
    }

    #[test]
    fn test_revive_nested_map_values() {
        let revived = revive(json!(["map://", ["x", ["map://", ["y", "base64://AQ=="]]]])).unwrap();
        assert_eq!(revived, json!({"x": {"y": [1]}}));
    }

    #[test]
    fn test_revive_rejects_bad_base64() {
        let result = revive(json!("base64://not valid!!"));
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_revive_rejects_malformed_pairs() {
        assert!(revive(json!(["map://", "loose"])).is_err());
        assert!(revive(json!(["map://", ["k"]])).is_err());
        assert!(revive(json!(["map://", ["k", 1, 2]])).is_err());
        assert!(revive(json!(["map://", [1, 2]])).is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_nonce_length() {
        let text = r#"{"blob":"base64://AA==","nonce":"base64://AAEC","lookup":{}}"#;
        let result: Result<Sample> = decode(text);
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let result: Result<Sample> = decode("{not json");
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_decode_slice_rejects_non_utf8() {
        let result: Result<Value> = decode_slice(&[0xff, 0xfe]);
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_direct_serde_accepts_marker_forms() {
        let text = encode(&sample()).unwrap();
        let decoded: Sample = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, sample());
    }
}
