//! Best-effort payload decoding
//!
//! Payloads are tried in a fixed order: JSON, then the schema mapped to the
//! topic, then UTF-8 text. Anything left is reported as an opaque blob.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Result of decoding a payload; always renderable
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Json(Value),
    Schema { type_name: String, value: Value },
    Text(String),
    Binary { len: usize },
}

impl Decoded {
    /// JSON view used in prompts and capture files
    pub fn to_value(&self) -> Value {
        match self {
            Decoded::Json(v) => v.clone(),
            Decoded::Schema { value, .. } => value.clone(),
            Decoded::Text(s) => Value::String(s.clone()),
            Decoded::Binary { len } => Value::String(format!("<binary data, {len} bytes>")),
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Decoded::Binary { .. })
    }
}

impl fmt::Display for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decoded::Json(v) | Decoded::Schema { value: v, .. } => write!(f, "{v}"),
            Decoded::Text(s) => f.write_str(s),
            Decoded::Binary { len } => write!(f, "<binary data, {len} bytes>"),
        }
    }
}

/// Typed binary decoder keyed by schema type name
pub trait SchemaDecoder: Send + Sync {
    /// Decode a payload, `None` when it does not fit the schema
    fn decode(&self, payload: &[u8]) -> Option<Value>;
}

/// Schemaless protobuf wire-format decoder
///
/// Produces an object keyed by field number. Repeated fields become arrays.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtoWireDecoder;

impl SchemaDecoder for ProtoWireDecoder {
    fn decode(&self, payload: &[u8]) -> Option<Value> {
        if payload.is_empty() {
            return None;
        }
        decode_message(payload, 0).map(Value::Object)
    }
}

const MAX_NESTING: usize = 8;

fn read_varint(buf: &[u8], pos: &mut usize) -> Option<u64> {
    let mut result: u64 = 0;
    for shift in (0..64).step_by(7) {
        let byte = *buf.get(*pos)?;
        *pos += 1;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
    }
    None
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Option<&'a [u8]> {
    let end = pos.checked_add(len)?;
    let slice = buf.get(*pos..end)?;
    *pos = end;
    Some(slice)
}

fn decode_message(buf: &[u8], depth: usize) -> Option<Map<String, Value>> {
    let mut fields = Map::new();
    let mut pos = 0;

    while pos < buf.len() {
        let tag = read_varint(buf, &mut pos)?;
        let field = tag >> 3;
        if field == 0 {
            return None;
        }

        let value = match tag & 0x7 {
            0 => json!(read_varint(buf, &mut pos)?),
            1 => {
                let raw = u64::from_le_bytes(take(buf, &mut pos, 8)?.try_into().ok()?);
                let float = f64::from_bits(raw);
                if float.is_finite() {
                    json!(float)
                } else {
                    json!(raw)
                }
            }
            2 => {
                let len = usize::try_from(read_varint(buf, &mut pos)?).ok()?;
                length_delimited(take(buf, &mut pos, len)?, depth)
            }
            5 => {
                let raw = u32::from_le_bytes(take(buf, &mut pos, 4)?.try_into().ok()?);
                json!(f32::from_bits(raw))
            }
            _ => return None,
        };

        let key = field.to_string();
        match fields.get_mut(&key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                fields.insert(key, value);
            }
        }
    }

    Some(fields)
}

fn length_delimited(bytes: &[u8], depth: usize) -> Value {
    if let Ok(text) = std::str::from_utf8(bytes) {
        if text.chars().all(|c| !c.is_control() || c.is_whitespace()) {
            return Value::String(text.to_string());
        }
    }
    if depth < MAX_NESTING && !bytes.is_empty() {
        if let Some(nested) = decode_message(bytes, depth + 1) {
            return Value::Object(nested);
        }
    }
    Value::String(format!("<{} bytes>", bytes.len()))
}

/// Topic-to-schema mapping plus the registered decoders
#[derive(Clone)]
pub struct DecoderSet {
    mappings: HashMap<String, String>,
    decoders: HashMap<String, Arc<dyn SchemaDecoder>>,
    fallback: Arc<dyn SchemaDecoder>,
}

impl Default for DecoderSet {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

impl DecoderSet {
    /// `mappings` maps a topic suffix to a schema type name
    pub fn new(mappings: HashMap<String, String>) -> Self {
        Self {
            mappings,
            decoders: HashMap::new(),
            fallback: Arc::new(ProtoWireDecoder),
        }
    }

    /// Register a decoder for a type name
    pub fn register(&mut self, type_name: impl Into<String>, decoder: Arc<dyn SchemaDecoder>) {
        self.decoders.insert(type_name.into(), decoder);
    }

    /// Schema type mapped to a key: exact entry first, then suffix match
    pub fn type_for(&self, key: &str) -> Option<&str> {
        if let Some(t) = self.mappings.get(key) {
            return Some(t.as_str());
        }
        self.mappings
            .iter()
            .filter(|(suffix, _)| key.ends_with(&format!("/{}", suffix.trim_start_matches('/'))))
            .max_by_key(|(suffix, _)| suffix.len())
            .map(|(_, t)| t.as_str())
    }

    /// Ordered fallback chain; never fails
    pub fn decode(&self, key: &str, payload: &[u8]) -> Decoded {
        try_json(payload)
            .or_else(|| self.try_schema(key, payload))
            .or_else(|| try_text(payload))
            .unwrap_or(Decoded::Binary { len: payload.len() })
    }

    fn try_schema(&self, key: &str, payload: &[u8]) -> Option<Decoded> {
        let type_name = self.type_for(key)?;
        let decoder = self.decoders.get(type_name).unwrap_or(&self.fallback);
        decoder.decode(payload).map(|value| Decoded::Schema {
            type_name: type_name.to_string(),
            value,
        })
    }
}

fn try_json(payload: &[u8]) -> Option<Decoded> {
    serde_json::from_slice::<Value>(payload).ok().map(Decoded::Json)
}

fn try_text(payload: &[u8]) -> Option<Decoded> {
    std::str::from_utf8(payload)
        .ok()
        .map(|s| Decoded::Text(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped() -> DecoderSet {
        let mut mappings = HashMap::new();
        mappings.insert("camera/front/compressed".to_string(), "CompressedImage".to_string());
        DecoderSet::new(mappings)
    }

    #[test]
    fn test_json_wins_over_mapping() {
        let set = mapped();
        let decoded = set.decode("nodewarden/local/m1/camera/front/compressed", br#"{"ok":true}"#);
        assert_eq!(decoded, Decoded::Json(json!({"ok": true})));
    }

    #[test]
    fn test_mapped_schema_decode() {
        let set = mapped();
        let decoded = set.decode("nodewarden/local/m1/camera/front/compressed", &[0x08, 0x96, 0x01]);
        assert_eq!(
            decoded,
            Decoded::Schema {
                type_name: "CompressedImage".to_string(),
                value: json!({"1": 150}),
            }
        );
    }

    #[test]
    fn test_text_then_binary_fallback() {
        let set = mapped();
        assert_eq!(set.decode("other", b"hello"), Decoded::Text("hello".into()));

        let decoded = set.decode("nodewarden/local/m1/camera/front/compressed", &[0xff, 0xff, 0xff]);
        assert_eq!(decoded, Decoded::Binary { len: 3 });
        assert_eq!(decoded.to_string(), "<binary data, 3 bytes>");
    }

    #[test]
    fn test_unmapped_binary_is_blob() {
        let set = DecoderSet::default();
        assert_eq!(set.decode("x", &[0x08, 0x96, 0x01]), Decoded::Binary { len: 3 });
    }

    #[test]
    fn test_custom_decoder_is_preferred() {
        struct Fixed;
        impl SchemaDecoder for Fixed {
            fn decode(&self, _payload: &[u8]) -> Option<Value> {
                Some(json!("fixed"))
            }
        }

        let mut set = mapped();
        set.register("CompressedImage", Arc::new(Fixed));
        let decoded = set.decode("a/camera/front/compressed", &[0xff]);
        assert_eq!(decoded.to_value(), json!("fixed"));
    }

    #[test]
    fn test_proto_wire_nested_and_repeated() {
        // field 1: "hi", field 2: {1: 7}, field 3 twice
        let payload = [
            0x0a, 0x02, b'h', b'i', 0x12, 0x02, 0x08, 0x07, 0x18, 0x01, 0x18, 0x02,
        ];
        let value = ProtoWireDecoder.decode(&payload).unwrap();
        assert_eq!(value, json!({"1": "hi", "2": {"1": 7}, "3": [1, 2]}));
    }

    #[test]
    fn test_proto_wire_rejects_truncated() {
        assert!(ProtoWireDecoder.decode(&[0x0a, 0x05, b'a']).is_none());
        assert!(ProtoWireDecoder.decode(&[]).is_none());
    }
}
