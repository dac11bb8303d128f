//! Sigstore bundle container
//!
//! Only the fields needed for offline verification are decoded; each of them
//! is required unless the bundle format itself makes it optional.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::error::{Error, Result};

pub const BUNDLE_MEDIA_TYPE_PREFIX: &str = "application/vnd.dev.sigstore.bundle";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub media_type: String,
    pub verification_material: VerificationMaterial,
    pub dsse_envelope: DsseEnvelope,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMaterial {
    /// v0.3 bundles carry the leaf alone.
    #[serde(default)]
    pub certificate: Option<RawBytes>,
    /// v0.1 and v0.2 bundles carry a chain, leaf first.
    #[serde(default)]
    pub x509_certificate_chain: Option<CertificateChain>,
    pub tlog_entries: Vec<TlogEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBytes {
    pub raw_bytes: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CertificateChain {
    pub certificates: Vec<RawBytes>,
}

/// A Rekor entry. Integers are strings, as protobuf JSON encodes int64.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlogEntry {
    pub log_index: String,
    pub log_id: LogId,
    pub kind_version: KindVersion,
    pub integrated_time: String,
    #[serde(default)]
    pub inclusion_promise: Option<InclusionPromise>,
    pub canonicalized_body: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogId {
    pub key_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KindVersion {
    pub kind: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionPromise {
    pub signed_entry_timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DsseEnvelope {
    pub payload: String,
    pub payload_type: String,
    pub signatures: Vec<DsseSignature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DsseSignature {
    pub sig: String,
    #[serde(default)]
    pub keyid: String,
}

/// Decode standard base64, naming the field on failure.
pub(crate) fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| Error::MalformedBundle(format!("{} is not valid base64: {}", field, e)))
}

impl Bundle {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let bundle: Bundle =
            serde_json::from_slice(bytes).map_err(|e| Error::MalformedBundle(format!("invalid bundle: {}", e)))?;

        if !bundle.media_type.starts_with(BUNDLE_MEDIA_TYPE_PREFIX) {
            return Err(Error::MalformedBundle(format!(
                "unsupported media type {}",
                bundle.media_type
            )));
        }
        if bundle.dsse_envelope.signatures.is_empty() {
            return Err(Error::MalformedBundle("DSSE envelope has no signatures".into()));
        }
        Ok(bundle)
    }

    /// DER of the signing certificate.
    pub fn leaf_certificate(&self) -> Result<Vec<u8>> {
        let material = &self.verification_material;
        let raw = match (&material.certificate, &material.x509_certificate_chain) {
            (Some(cert), _) => cert,
            (None, Some(chain)) => chain
                .certificates
                .first()
                .ok_or_else(|| Error::MalformedBundle("empty certificate chain".into()))?,
            (None, None) => return Err(Error::MalformedBundle("no signing certificate".into())),
        };
        decode_b64("certificate", &raw.raw_bytes)
    }

    pub fn payload(&self) -> Result<Vec<u8>> {
        decode_b64("DSSE payload", &self.dsse_envelope.payload)
    }
}
