//! Pluggable body codecs.
//!
//! The handshake names a codec by type tag; everything after it (header and
//! body frames) is encoded with that codec. [`BodyCodec`] is an enum over the
//! supported wire formats (postcard for the compact binary encoding, JSON
//! for a self-describing one), and [`CodecRegistry`] maps type tags to
//! constructors. The registry is an explicit object owned by the server and
//! client, populated at startup and read-only afterwards.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, WirecallError};
use crate::protocol::Header;

/// Type tag for the postcard (binary) codec.
pub const POSTCARD_TYPE: &str = "application/postcard";

/// Type tag for the JSON codec.
pub const JSON_TYPE: &str = "application/json";

/// Codec for encoding/decoding message headers and bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyCodec {
    /// Compact binary codec.
    Postcard(PostcardCodec),
    /// Self-describing text codec.
    Json(JsonCodec),
}

impl BodyCodec {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            BodyCodec::Postcard(_) => PostcardCodec::encode(value),
            BodyCodec::Json(_) => JsonCodec::encode(value),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        match self {
            BodyCodec::Postcard(_) => PostcardCodec::decode(data),
            BodyCodec::Json(_) => JsonCodec::decode(data),
        }
    }

    pub fn encode_header(&self, header: &Header) -> Result<Vec<u8>> {
        self.encode(header)
    }

    pub fn decode_header(&self, data: &[u8]) -> Result<Header> {
        self.decode(data)
    }

    /// Placeholder body for error responses, where no reply value exists.
    pub fn encode_unit(&self) -> Result<Vec<u8>> {
        self.encode(&())
    }
}

/// Postcard codec: small frames, not human-readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostcardCodec;

impl PostcardCodec {
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(value)?)
    }

    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(postcard::from_bytes(data)?)
    }
}

/// JSON codec: interoperable and easy to eyeball in a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

type CodecConstructor = fn() -> BodyCodec;

/// Registry mapping codec type tags to constructors.
///
/// [`CodecRegistry::default`] knows both built-in codecs; `register` exists
/// so embedders can add their own tags at startup.
pub struct CodecRegistry {
    constructors: HashMap<String, CodecConstructor>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self {
            constructors: HashMap::new(),
        };
        registry.register(POSTCARD_TYPE, || BodyCodec::Postcard(PostcardCodec));
        registry.register(JSON_TYPE, || BodyCodec::Json(JsonCodec));
        registry
    }
}

impl CodecRegistry {
    /// An empty registry, for embedders that want full control over the
    /// supported tags.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    pub fn register(&mut self, codec_type: impl Into<String>, constructor: CodecConstructor) {
        self.constructors.insert(codec_type.into(), constructor);
    }

    /// Builds the codec for a type tag. An unknown tag is a reportable
    /// condition, not a panic.
    pub fn lookup(&self, codec_type: &str) -> Result<BodyCodec> {
        match self.constructors.get(codec_type) {
            Some(constructor) => Ok(constructor()),
            None => Err(WirecallError::UnsupportedCodec(codec_type.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Args {
        a: i64,
        b: i64,
    }

    #[test]
    fn test_postcard_round_trip() {
        let codec = CodecRegistry::default().lookup(POSTCARD_TYPE).unwrap();
        let args = Args { a: 3, b: 4 };

        let encoded = codec.encode(&args).unwrap();
        let decoded: Args = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, args);
    }

    #[test]
    fn test_json_round_trip() {
        let codec = CodecRegistry::default().lookup(JSON_TYPE).unwrap();
        let header = Header::request("Arith.Sum", 1);

        let encoded = codec.encode_header(&header).unwrap();
        let decoded = codec.decode_header(&encoded).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_unknown_tag_is_reportable() {
        let registry = CodecRegistry::default();
        assert!(matches!(
            registry.lookup("application/gob"),
            Err(WirecallError::UnsupportedCodec(_))
        ));
    }

    #[test]
    fn test_empty_registry_knows_nothing() {
        let registry = CodecRegistry::empty();
        assert!(registry.lookup(POSTCARD_TYPE).is_err());
    }

    #[test]
    fn test_malformed_body_is_an_error() {
        let codec = CodecRegistry::default().lookup(JSON_TYPE).unwrap();
        let result: Result<Args> = codec.decode(b"{not json");
        assert!(result.is_err());
    }
}
