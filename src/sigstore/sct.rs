//! Signed certificate timestamps embedded in Fulcio leaves (RFC 6962)
//!
//! Fulcio logs every leaf as a precertificate before issuing it and embeds
//! the CT log's promise in the final certificate. The promise signs the
//! precertificate TBS, which is the leaf's TBS without the SCT list
//! extension, together with a hash of the issuer's public key.

use der::asn1::OctetStringRef;
use der::oid::ObjectIdentifier;
use der::{Decode, Encode};
use sha2::{Digest, Sha256};

use super::trust_root::TrustedRoot;
use crate::cert::{HashAlgorithm, ParsedCert, SignatureEncoding};
use crate::error::{Error, Result};

pub const SCT_LIST_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.11129.2.4.2");

const SCT_VERSION_V1: u8 = 0;
const SIGNATURE_TYPE_CERTIFICATE_TIMESTAMP: u8 = 0;
const ENTRY_TYPE_PRECERT: u16 = 1;
const HASH_SHA256: u8 = 4;
const HASH_SHA384: u8 = 5;
const SIGNATURE_ECDSA: u8 = 3;

/// One decoded `SignedCertificateTimestamp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sct {
    pub log_id: Vec<u8>,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
    pub extensions: Vec<u8>,
    pub hash_algorithm: u8,
    pub signature_algorithm: u8,
    pub signature: Vec<u8>,
}

/// Big-endian reader over TLS presentation-language structures.
struct TlsReader<'a> {
    bytes: &'a [u8],
}

impl<'a> TlsReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < len {
            return Err(Error::MalformedBundle("truncated SCT list".into()));
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Ok(head)
    }

    fn uint(&mut self, width: usize) -> Result<u64> {
        Ok(self.take(width)?.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// A length-prefixed opaque vector with a `width`-byte length.
    fn vector(&mut self, width: usize) -> Result<&'a [u8]> {
        let len = self.uint(width)? as usize;
        self.take(len)
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Sct {
    fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = TlsReader::new(bytes);
        let version = reader.uint(1)? as u8;
        if version != SCT_VERSION_V1 {
            return Err(Error::MalformedBundle(format!("unsupported SCT version {}", version)));
        }
        let sct = Sct {
            log_id: reader.take(32)?.to_vec(),
            timestamp: reader.uint(8)?,
            extensions: reader.vector(2)?.to_vec(),
            hash_algorithm: reader.uint(1)? as u8,
            signature_algorithm: reader.uint(1)? as u8,
            signature: reader.vector(2)?.to_vec(),
        };
        if !reader.is_empty() {
            return Err(Error::MalformedBundle("trailing bytes after SCT".into()));
        }
        Ok(sct)
    }

    /// The `digitally-signed` input for a precertificate entry.
    fn signed_data(&self, issuer_key_hash: &[u8], precert_tbs: &[u8]) -> Vec<u8> {
        let mut data = Vec::with_capacity(precert_tbs.len() + self.extensions.len() + 50);
        data.push(SCT_VERSION_V1);
        data.push(SIGNATURE_TYPE_CERTIFICATE_TIMESTAMP);
        data.extend_from_slice(&self.timestamp.to_be_bytes());
        data.extend_from_slice(&ENTRY_TYPE_PRECERT.to_be_bytes());
        data.extend_from_slice(issuer_key_hash);
        data.extend_from_slice(&(precert_tbs.len() as u32).to_be_bytes()[1..]);
        data.extend_from_slice(precert_tbs);
        data.extend_from_slice(&(self.extensions.len() as u16).to_be_bytes());
        data.extend_from_slice(&self.extensions);
        data
    }
}

/// Decode the SCT list extension of `leaf`. A leaf without one yields an
/// empty list.
pub fn embedded_scts(leaf: &ParsedCert) -> Result<Vec<Sct>> {
    let Some(value) = leaf.extension(&SCT_LIST_OID) else {
        return Ok(Vec::new());
    };
    let list = OctetStringRef::from_der(value)
        .map_err(|e| Error::MalformedBundle(format!("SCT list extension: {}", e)))?;

    let mut outer = TlsReader::new(list.as_bytes());
    let mut entries = TlsReader::new(outer.vector(2)?);
    if !outer.is_empty() {
        return Err(Error::MalformedBundle("trailing bytes after SCT list".into()));
    }

    let mut scts = Vec::new();
    while !entries.is_empty() {
        scts.push(Sct::parse(entries.vector(2)?)?);
    }
    Ok(scts)
}

/// The leaf's TBS with the SCT list extension removed, DER encoded.
fn precert_tbs(leaf: &ParsedCert) -> Result<Vec<u8>> {
    let mut tbs = leaf.certificate().tbs_certificate.clone();
    if let Some(extensions) = tbs.extensions.as_mut() {
        extensions.retain(|ext| ext.extn_id != SCT_LIST_OID);
    }
    tbs.to_der()
        .map_err(|e| Error::MalformedBundle(format!("re-encoding precertificate: {}", e)))
}

/// Require at least `threshold` SCTs, from distinct trusted CT logs, that
/// verify for `leaf` as issued by `issuer`.
pub fn verify_scts(leaf: &ParsedCert, issuer: &ParsedCert, root: &TrustedRoot, threshold: usize) -> Result<()> {
    if threshold == 0 {
        return Ok(());
    }

    let scts = embedded_scts(leaf)?;
    let issuer_spki = issuer
        .certificate()
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| Error::Internal(format!("encoding issuer key: {}", e)))?;
    let issuer_key_hash = Sha256::digest(&issuer_spki);
    let tbs = precert_tbs(leaf)?;

    let mut verified_logs: Vec<&[u8]> = Vec::new();
    let mut last_error = None;
    for sct in &scts {
        match verify_sct(sct, &issuer_key_hash, &tbs, root) {
            Ok(()) if !verified_logs.contains(&sct.log_id.as_slice()) => verified_logs.push(&sct.log_id),
            Ok(()) => {}
            Err(e) => last_error = Some(e),
        }
    }

    if verified_logs.len() < threshold {
        return Err(Error::UntrustedSigner(format!(
            "signing certificate has {} verified SCTs of {} required{}",
            verified_logs.len(),
            threshold,
            last_error.map(|e| format!(": {}", e)).unwrap_or_default()
        )));
    }
    Ok(())
}

fn verify_sct(sct: &Sct, issuer_key_hash: &[u8], precert_tbs: &[u8], root: &TrustedRoot) -> Result<()> {
    let log = root
        .ctlog(&sct.log_id)
        .ok_or_else(|| Error::UntrustedSigner(format!("unknown CT log {}", hex::encode(&sct.log_id))))?;
    let at = i64::try_from(sct.timestamp / 1000).unwrap_or(i64::MAX);
    if !log.valid_for.contains(at) {
        return Err(Error::UntrustedSigner(format!("SCT time {} outside the CT log key validity", at)));
    }

    let hash = match (sct.hash_algorithm, sct.signature_algorithm) {
        (HASH_SHA256, SIGNATURE_ECDSA) => HashAlgorithm::Sha256,
        (HASH_SHA384, SIGNATURE_ECDSA) => HashAlgorithm::Sha384,
        (h, s) => {
            return Err(Error::UntrustedSigner(format!("unsupported SCT signature scheme {}/{}", h, s)))
        }
    };

    log.key
        .verify(
            hash,
            &sct.signed_data(issuer_key_hash, precert_tbs),
            &sct.signature,
            SignatureEncoding::Der,
        )
        .map_err(|e| Error::UntrustedSigner(format!("SCT from {}: {}", log.base_url, e)))
}
