//! Payload codecs for queue items.
//!
//! A codec is bound to a queue at construction, so every item written by
//! that queue is decoded with the same strategy it was encoded with.
//!
//! # Wire formats
//!
//! * [`JsonCodec`]: one format-version byte (`0x01`) followed by the
//!   serde_json encoding of the value.
//! * [`Utf8Codec`]: the raw UTF-8 bytes of a `String`.
//! * [`RawCodec`]: the bytes themselves.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// Current version byte written by [`JsonCodec`].
pub const JSON_FORMAT_V1: u8 = 0x01;

/// Round-trip contract: `decode(&encode(x)?)? == x`.
pub trait PayloadCodec<T> {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Versioned JSON encoding for any serde type.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T: Serialize + DeserializeOwned> PayloadCodec<T> for JsonCodec<T> {
    fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let mut bytes = vec![JSON_FORMAT_V1];
        serde_json::to_writer(&mut bytes, value).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, CodecError> {
        match bytes.split_first() {
            Some((&JSON_FORMAT_V1, body)) => {
                serde_json::from_slice(body).map_err(|e| CodecError::Decode(e.to_string()))
            }
            Some((&version, _)) => Err(CodecError::UnsupportedVersion(version)),
            None => Err(CodecError::Decode("empty payload".to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl PayloadCodec<String> for Utf8Codec {
    fn encode(&self, value: &String) -> Result<Vec<u8>, CodecError> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl PayloadCodec<Vec<u8>> for RawCodec {
    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>, CodecError> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(bytes.to_vec())
    }
}
