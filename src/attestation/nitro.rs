//! AWS Nitro Enclaves attestation documents
//!
//! A document is a COSE_Sign1 structure whose payload is a CBOR map produced
//! by the Nitro Secure Module. The payload carries the PCR values, the
//! enclave's leaf certificate and the CA bundle leading back to the AWS root.
//!
//! Verification order:
//! 1. Decode the envelope, keeping the protected header and payload bytes
//!    exactly as received, and validate the payload syntactically
//! 2. Validate the certificate chain leaf -> cabundle -> configured root
//! 3. Verify the ES384 signature over the received bytes with the leaf key
//! 4. Extract the PCRs

use std::collections::BTreeMap;

use coset::{iana, CborSerializable, CoseSign1, RegisteredLabelWithPrivate};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use time::OffsetDateTime;

use super::types::{MeasurementSet, PredicateType, RegisterIndex};
use crate::cert::{verify_chain, CertError, HashAlgorithm, ParsedCert, SignatureEncoding};
use crate::error::{Error, Result};

/// AWS Nitro Enclaves root certificate (G1).
///
/// Published at <https://aws-nitro-enclaves.amazonaws.com/AWS_NitroEnclaves_Root-G1.zip>.
pub const AWS_NITRO_ROOT_G1_PEM: &str = include_str!("static/aws_nitro_root_g1.pem");

/// SHA-256 of the DER encoding of [`AWS_NITRO_ROOT_G1_PEM`], as published by AWS.
pub const AWS_NITRO_ROOT_G1_SHA256: &str = "641a0321a3e244efe456463195d606317ed7cdcc3c1756e09893f3c68f79bb5b";

const MAX_PCRS: usize = 32;
const MAX_CERT_LEN: usize = 1024;
const MAX_PUBLIC_KEY_LEN: usize = 1024;
const MAX_USER_DATA_LEN: usize = 512;
const MAX_NONCE_LEN: usize = 512;
const ES384_SIGNATURE_LEN: usize = 96;

/// Point in time the document's certificate chain is validated at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationTime {
    /// Wall clock at verification.
    #[default]
    Now,
    /// The `timestamp` field of the document itself.
    DocumentTimestamp,
    /// A fixed unix time in seconds.
    At(u64),
}

/// Payload of a Nitro attestation document.
#[derive(Debug, Clone, Deserialize)]
pub struct AttestationDoc {
    pub module_id: String,
    pub digest: String,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
    pub pcrs: BTreeMap<RegisterIndex, ByteBuf>,
    pub certificate: ByteBuf,
    pub cabundle: Vec<ByteBuf>,
    #[serde(default)]
    pub public_key: Option<ByteBuf>,
    #[serde(default)]
    pub user_data: Option<ByteBuf>,
    #[serde(default)]
    pub nonce: Option<ByteBuf>,
}

impl AttestationDoc {
    /// Decode the CBOR payload and check its shape.
    pub fn from_cbor(payload: &[u8]) -> Result<Self> {
        let doc: AttestationDoc = ciborium::de::from_reader(payload)
            .map_err(|e| Error::MalformedDocument(format!("invalid attestation payload: {}", e)))?;
        doc.validate_syntax()?;
        Ok(doc)
    }

    fn validate_syntax(&self) -> Result<()> {
        let malformed = |msg: String| Err(Error::MalformedDocument(msg));

        if self.module_id.is_empty() {
            return malformed("empty module_id".into());
        }
        if self.digest != "SHA384" {
            return malformed(format!("unsupported digest {}", self.digest));
        }
        if self.timestamp == 0 {
            return malformed("zero timestamp".into());
        }
        if self.pcrs.is_empty() || self.pcrs.len() > MAX_PCRS {
            return malformed(format!("{} PCRs, expected 1..={}", self.pcrs.len(), MAX_PCRS));
        }
        for (index, value) in &self.pcrs {
            if *index as usize >= MAX_PCRS {
                return malformed(format!("PCR index {} out of range", index));
            }
            if ![32, 48, 64].contains(&value.len()) {
                return malformed(format!("PCR{} has length {}", index, value.len()));
            }
        }
        if self.cabundle.is_empty() {
            return malformed("empty cabundle".into());
        }
        for cert in self.cabundle.iter().chain(std::iter::once(&self.certificate)) {
            if cert.is_empty() || cert.len() > MAX_CERT_LEN {
                return malformed(format!("certificate length {} out of range", cert.len()));
            }
        }

        let optional = [
            ("public_key", &self.public_key, MAX_PUBLIC_KEY_LEN),
            ("user_data", &self.user_data, MAX_USER_DATA_LEN),
            ("nonce", &self.nonce, MAX_NONCE_LEN),
        ];
        for (name, value, max) in optional {
            if let Some(value) = value {
                if value.len() > max {
                    return malformed(format!("{} longer than {} bytes", name, max));
                }
            }
        }
        Ok(())
    }

    pub fn measurements(&self) -> MeasurementSet {
        let mut set = MeasurementSet::new(PredicateType::AwsNitroEnclaveV1);
        for (index, value) in &self.pcrs {
            set.insert(*index, value.to_vec());
        }
        set
    }
}

/// A document whose signature and chain have been verified.
#[derive(Debug, Clone)]
pub struct VerifiedDocument {
    pub module_id: String,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
    pub measurements: MeasurementSet,
    pub public_key: Option<Vec<u8>>,
    pub user_data: Option<Vec<u8>>,
    pub nonce: Option<Vec<u8>>,
}

/// Verifies Nitro attestation documents against a fixed root certificate.
#[derive(Debug, Clone)]
pub struct HardwareVerifier {
    root: ParsedCert,
    validation_time: ValidationTime,
}

impl HardwareVerifier {
    pub fn new(root: ParsedCert) -> Self {
        Self {
            root,
            validation_time: ValidationTime::default(),
        }
    }

    /// Verifier trusting the bundled AWS Nitro root.
    pub fn aws() -> Result<Self> {
        Self::from_pem(AWS_NITRO_ROOT_G1_PEM.as_bytes())
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let root = ParsedCert::from_pem(pem).map_err(|e| Error::Config(format!("Nitro root certificate: {}", e)))?;
        Ok(Self::new(root))
    }

    pub fn with_validation_time(mut self, validation_time: ValidationTime) -> Self {
        self.validation_time = validation_time;
        self
    }

    pub fn root(&self) -> &ParsedCert {
        &self.root
    }

    /// Verify a document and return its PCRs.
    ///
    /// Accepts raw COSE_Sign1 bytes or the JSON envelope served by an
    /// enclave (see [`super::decode_document`]).
    pub fn verify(&self, document: &[u8]) -> Result<MeasurementSet> {
        self.verify_document(document).map(|doc| doc.measurements)
    }

    pub fn verify_document(&self, document: &[u8]) -> Result<VerifiedDocument> {
        let cose_bytes = super::decode_document(document)?;
        let sign1 = parse_cose_sign1(&cose_bytes)?;

        match &sign1.protected.header.alg {
            Some(RegisteredLabelWithPrivate::Assigned(iana::Algorithm::ES384)) => {}
            other => {
                return Err(Error::MalformedDocument(format!(
                    "unsupported COSE algorithm {:?}",
                    other
                )))
            }
        }

        let payload = sign1
            .payload
            .as_deref()
            .ok_or_else(|| Error::MalformedDocument("COSE_Sign1 has no payload".into()))?;
        let doc = AttestationDoc::from_cbor(payload)?;

        let leaf = self.validate_chain(&doc)?;

        if sign1.signature.len() != ES384_SIGNATURE_LEN {
            return Err(Error::SignatureInvalid(format!(
                "ES384 signature has length {}",
                sign1.signature.len()
            )));
        }
        let key = leaf.public_key().map_err(untrusted)?;
        sign1
            .verify_signature(b"", |signature, data| {
                key.verify(HashAlgorithm::Sha384, data, signature, SignatureEncoding::Fixed)
            })
            .map_err(|e| Error::SignatureInvalid(format!("attestation document: {}", e)))?;

        Ok(VerifiedDocument {
            measurements: doc.measurements(),
            module_id: doc.module_id,
            timestamp: doc.timestamp,
            public_key: doc.public_key.map(ByteBuf::into_vec),
            user_data: doc.user_data.map(ByteBuf::into_vec),
            nonce: doc.nonce.map(ByteBuf::into_vec),
        })
    }

    /// Validate leaf -> cabundle -> root and return the parsed leaf.
    ///
    /// `cabundle[0]` is the root as shipped inside the document; it is
    /// replaced by the configured root so that trust never comes from the
    /// document itself.
    fn validate_chain(&self, doc: &AttestationDoc) -> Result<ParsedCert> {
        let parse = |der: &[u8]| ParsedCert::from_der(der).map_err(|e| Error::MalformedDocument(e.to_string()));

        let leaf = parse(&doc.certificate)?;
        let intermediates = doc.cabundle[1..]
            .iter()
            .rev()
            .map(|der| parse(der))
            .collect::<Result<Vec<_>>>()?;

        let mut chain = Vec::with_capacity(intermediates.len() + 2);
        chain.push(&leaf);
        chain.extend(intermediates.iter());
        chain.push(&self.root);

        verify_chain(&chain, self.validation_secs(doc)).map_err(untrusted)?;
        Ok(leaf)
    }

    fn validation_secs(&self, doc: &AttestationDoc) -> u64 {
        match self.validation_time {
            ValidationTime::Now => u64::try_from(OffsetDateTime::now_utc().unix_timestamp()).unwrap_or(0),
            ValidationTime::DocumentTimestamp => doc.timestamp / 1000,
            ValidationTime::At(secs) => secs,
        }
    }
}

fn untrusted(err: CertError) -> Error {
    Error::UntrustedSigner(format!("attestation certificate chain: {}", err))
}

/// The NSM emits untagged COSE_Sign1 but tagged input is accepted as well.
fn parse_cose_sign1(bytes: &[u8]) -> Result<CoseSign1> {
    use coset::TaggedCborSerializable;

    CoseSign1::from_tagged_slice(bytes)
        .or_else(|_| CoseSign1::from_slice(bytes))
        .map_err(|e| Error::MalformedDocument(format!("invalid COSE_Sign1: {:?}", e)))
}
