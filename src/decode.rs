//! Response payload decoders.

use bytes::Bytes;
use http::StatusCode;
use serde::de::DeserializeOwned;

/// A payload that could not be decoded.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DecodeError(pub String);

/// Turns a response body into a value.
///
/// A decoder is only invoked for statuses that carry a payload; its failure
/// always ends the call, even if the status would otherwise be retried.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use callwire::decode::{DecodeError, Decoder};
/// use http::StatusCode;
///
/// struct Lines;
///
/// impl Decoder<Vec<String>> for Lines {
///     fn decode(&self, _status: StatusCode, body: &Bytes) -> Result<Vec<String>, DecodeError> {
///         let text = std::str::from_utf8(body).map_err(|e| DecodeError(e.to_string()))?;
///         Ok(text.lines().map(str::to_string).collect())
///     }
/// }
///
/// let lines = Lines.decode(StatusCode::OK, &Bytes::from("a\nb")).unwrap();
/// assert_eq!(lines, vec!["a", "b"]);
/// ```
pub trait Decoder<T>: Send + Sync {
    /// Decodes `body`, received with `status`.
    fn decode(&self, status: StatusCode, body: &Bytes) -> Result<T, DecodeError>;
}

/// Decodes JSON with `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl<T: DeserializeOwned> Decoder<T> for JsonDecoder {
    fn decode(&self, _status: StatusCode, body: &Bytes) -> Result<T, DecodeError> {
        serde_json::from_slice(body).map_err(|e| DecodeError(e.to_string()))
    }
}

/// Decodes the body as UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextDecoder;

impl Decoder<String> for TextDecoder {
    fn decode(&self, _status: StatusCode, body: &Bytes) -> Result<String, DecodeError> {
        String::from_utf8(body.to_vec()).map_err(|e| DecodeError(e.to_string()))
    }
}

/// Returns the body unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesDecoder;

impl Decoder<Bytes> for BytesDecoder {
    fn decode(&self, _status: StatusCode, body: &Bytes) -> Result<Bytes, DecodeError> {
        Ok(body.clone())
    }
}

/// Discards the body.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreBody;

impl Decoder<()> for IgnoreBody {
    fn decode(&self, _status: StatusCode, _body: &Bytes) -> Result<(), DecodeError> {
        Ok(())
    }
}
