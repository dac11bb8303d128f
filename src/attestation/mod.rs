//! Hardware attestation
//!
//! An enclave publishes its attestation at `/.well-known/tinfoil-attestation`
//! as a small JSON envelope:
//!
//! ```json
//! { "format": "https://tinfoil.sh/predicate/aws-nitro-enclave/v1", "body": "<base64>" }
//! ```
//!
//! The body is a Nitro attestation document, verified by [`nitro::HardwareVerifier`].
//! Older enclaves serve the base64 document as a bare JSON string. Raw
//! COSE_Sign1 bytes are accepted as well, so documents obtained some other way
//! need no wrapping.

pub mod nitro;
pub mod types;

pub use nitro::{HardwareVerifier, ValidationTime, VerifiedDocument};
pub use types::{MeasurementSet, PredicateType, RegisterIndex, DEFAULT_REGISTERS};

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Format string older enclaves publish instead of the predicate URI.
const LEGACY_NITRO_FORMAT: &str = "awsnitro";

/// JSON envelope around an attestation document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub format: String,
    pub body: String,
}

impl Document {
    /// Decode the base64 body, rejecting formats other than AWS Nitro.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        let is_nitro = self.format == LEGACY_NITRO_FORMAT
            || PredicateType::from_uri(&self.format) == Some(PredicateType::AwsNitroEnclaveV1);
        if !is_nitro {
            return Err(Error::MalformedDocument(format!(
                "unsupported attestation format {}",
                self.format
            )));
        }

        base64::engine::general_purpose::STANDARD
            .decode(self.body.trim())
            .map_err(|e| Error::MalformedDocument(format!("invalid base64 body: {}", e)))
    }
}

/// Unwrap a JSON envelope if present, otherwise return the bytes as given.
pub fn decode_document(bytes: &[u8]) -> Result<Vec<u8>> {
    let invalid = |e: serde_json::Error| Error::MalformedDocument(format!("invalid attestation envelope: {}", e));

    match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') => {
            let document: Document = serde_json::from_slice(bytes).map_err(invalid)?;
            document.decode_body()
        }
        Some(b'"') => {
            let body: String = serde_json::from_slice(bytes).map_err(invalid)?;
            Document {
                format: LEGACY_NITRO_FORMAT.to_string(),
                body,
            }
            .decode_body()
        }
        _ => Ok(bytes.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_bytes_pass_through() {
        let raw = [0x84, 0x44, 0xa1, 0x01, 0x38, 0x22];
        assert_eq!(decode_document(&raw).unwrap(), raw.to_vec());
    }

    #[test]
    fn test_bare_string_body() {
        assert_eq!(decode_document(br#""AQID""#).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_envelope_errors() {
        let missing_body = br#"{"format": "awsnitro"}"#;
        assert!(matches!(decode_document(missing_body), Err(Error::MalformedDocument(_))));

        let bad_base64 = br#" {"format": "awsnitro", "body": "***"}"#;
        assert!(matches!(decode_document(bad_base64), Err(Error::MalformedDocument(_))));
    }
}
