//! Base64 encoding and decoding utilities.
//!
//! The h402 protocol carries JSON documents inside HTTP headers: the
//! payment envelope travels in `X-PAYMENT` and the settlement receipt
//! comes back in `X-Payment-Response`, both base64-encoded. This module
//! provides [`Base64Bytes`], the wrapper type used on those paths.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use std::fmt::Display;

/// A wrapper for base64-encoded byte data.
///
/// Holds the *encoded* form. [`Base64Bytes::encode`] produces it from raw
/// bytes and [`Base64Bytes::decode`] recovers them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes(pub Vec<u8>);

impl Base64Bytes {
    /// Decodes the base64 string bytes to raw binary data.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is not valid base64.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        b64.decode(&self.0)
    }

    /// Encodes raw binary data into base64 string bytes.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Self {
        let encoded = b64.encode(input.as_ref());
        Self(encoded.into_bytes())
    }

    /// Consumes the wrapper and returns the encoded form as a `String`.
    ///
    /// Base64 output is always ASCII, so this never loses data.
    #[must_use]
    pub fn into_string(self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl AsRef<[u8]> for Base64Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for Base64Bytes {
    fn from(slice: &[u8]) -> Self {
        Self(slice.to_vec())
    }
}

impl From<&str> for Base64Bytes {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl Display for Base64Bytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let raw = br#"{"success":true,"transaction":"0xabc","namespace":"evm"}"#;
        let encoded = Base64Bytes::encode(raw);
        assert_eq!(encoded.decode().unwrap(), raw.to_vec());
    }

    #[test]
    fn decode_rejects_invalid_input() {
        let bogus = Base64Bytes::from("not base64!!");
        assert!(bogus.decode().is_err());
    }

    #[test]
    fn into_string_matches_display() {
        let encoded = Base64Bytes::encode(b"h402");
        assert_eq!(encoded.to_string(), encoded.clone().into_string());
    }
}
