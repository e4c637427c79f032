//! Envelope codecs.
//!
//! [`ContentTypeCodec`] is what subscriptions use unless told otherwise: it
//! picks JSON or bincode from the `content-type` attribute and falls back to
//! JSON when the attribute is absent.

use crate::error::DecodeError;
use crate::ports::EnvelopeCodec;
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// Attribute naming the payload encoding.
pub const CONTENT_TYPE_ATTRIBUTE: &str = "content-type";

pub const JSON_CONTENT_TYPE: &str = "application/json";

pub const BINCODE_CONTENT_TYPE: &str = "application/x-bincode";

/// Decodes JSON payloads, ignoring attributes.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl<T: DeserializeOwned> EnvelopeCodec<T> for JsonCodec {
    fn decode(&self, _attributes: &HashMap<String, String>, payload: &[u8]) -> Result<T, DecodeError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// Decodes bincode payloads, ignoring attributes.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl<T: DeserializeOwned> EnvelopeCodec<T> for BincodeCodec {
    fn decode(&self, _attributes: &HashMap<String, String>, payload: &[u8]) -> Result<T, DecodeError> {
        Ok(bincode::deserialize(payload)?)
    }
}

/// Selects the codec from the `content-type` attribute.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentTypeCodec;

impl<T: DeserializeOwned> EnvelopeCodec<T> for ContentTypeCodec {
    fn decode(&self, attributes: &HashMap<String, String>, payload: &[u8]) -> Result<T, DecodeError> {
        // Parameters such as "; charset=utf-8" do not affect the choice.
        let content_type = attributes
            .get(CONTENT_TYPE_ATTRIBUTE)
            .map(|v| v.split(';').next().unwrap_or_default().trim());

        match content_type {
            None | Some(JSON_CONTENT_TYPE) => JsonCodec.decode(attributes, payload),
            Some(BINCODE_CONTENT_TYPE) => BincodeCodec.decode(attributes, payload),
            Some(other) => Err(DecodeError::UnsupportedContentType(other.to_string())),
        }
    }
}
