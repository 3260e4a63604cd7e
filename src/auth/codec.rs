//! Byte and URL codecs used to build access tokens
//!
//! Both codecs are capability traits so the token builder never depends on
//! which library performs the encoding. The defaults are backed by the
//! `base64` and `urlencoding` crates.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// Codec failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("invalid base64 input: {0}")]
    InvalidBase64(String),
    #[error("failed to escape value: {0}")]
    Escape(String),
    #[error("failed to unescape value: {0}")]
    Unescape(String),
}

/// Reversible binary to text encoding
pub trait Base64Codec: Send + Sync {
    fn encode(&self, input: &[u8]) -> String;

    fn decode(&self, input: &str) -> Result<Vec<u8>, CodecError>;
}

/// Percent-encoding for URL-safe transport of arbitrary text
pub trait UrlCodec: Send + Sync {
    fn escape(&self, raw: &str) -> Result<String, CodecError>;

    fn unescape(&self, encoded: &str) -> Result<String, CodecError>;
}

/// Standard alphabet base64 with padding and no line breaks
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardBase64;

impl Base64Codec for StandardBase64 {
    fn encode(&self, input: &[u8]) -> String {
        STANDARD.encode(input)
    }

    fn decode(&self, input: &str) -> Result<Vec<u8>, CodecError> {
        STANDARD
            .decode(input.trim())
            .map_err(|e| CodecError::InvalidBase64(e.to_string()))
    }
}

/// Percent-encoder that leaves only `A-Z a-z 0-9 - _ . ~` unescaped
#[derive(Debug, Clone, Copy, Default)]
pub struct PercentCodec;

impl UrlCodec for PercentCodec {
    fn escape(&self, raw: &str) -> Result<String, CodecError> {
        Ok(urlencoding::encode(raw).into_owned())
    }

    fn unescape(&self, encoded: &str) -> Result<String, CodecError> {
        urlencoding::decode(encoded)
            .map(|decoded| decoded.into_owned())
            .map_err(|e| CodecError::Unescape(e.to_string()))
    }
}
