//! X.509 certificate chain validation
//!
//! Both attestation formats end in an ECDSA certificate chain: AWS Nitro uses
//! P-384 throughout, Fulcio issues P-256 leaves from a P-384 intermediate.
//! Signatures are always checked over the TBS bytes exactly as they appear in
//! the received DER, never over a re-encoding.

use der::asn1::AnyRef;
use der::oid::db::rfc5280::{ID_CE_BASIC_CONSTRAINTS, ID_CE_SUBJECT_ALT_NAME};
use der::oid::ObjectIdentifier;
use der::{Decode, Encode, Reader, SliceReader};
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use sha2::{Digest, Sha256, Sha384};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{BasicConstraints, SubjectAltName};
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::Certificate;

const ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const ECDSA_WITH_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");
const ID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const SECP256R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const SECP384R1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

#[derive(Debug, thiserror::Error)]
pub enum CertError {
    #[error("failed to parse certificate: {0}")]
    Parse(String),

    #[error("unsupported public key: {0}")]
    UnsupportedKey(String),

    #[error("unsupported signature algorithm {0}")]
    UnsupportedAlgorithm(ObjectIdentifier),

    #[error("issuer of '{subject}' does not match subject of '{issuer}'")]
    IssuerMismatch { subject: String, issuer: String },

    #[error("'{0}' is not a certificate authority")]
    NotCa(String),

    #[error("path length constraint of '{0}' exceeded")]
    PathLength(String),

    #[error("'{subject}' is not valid at {at} (valid {not_before}..{not_after})")]
    NotValidAt {
        subject: String,
        at: u64,
        not_before: u64,
        not_after: u64,
    },

    #[error("signature verification failed: {0}")]
    BadSignature(String),
}

/// Hash used by an ECDSA signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
}

impl HashAlgorithm {
    fn digest(self, message: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(message).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(message).to_vec(),
        }
    }
}

/// How signature bytes are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    /// ASN.1 `Ecdsa-Sig-Value`, as in X.509 and most DSSE signatures.
    Der,
    /// Fixed-width `r || s`, as in COSE.
    Fixed,
}

/// ECDSA verifying key taken from a certificate.
#[derive(Debug, Clone)]
pub enum PublicKey {
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
}

impl PublicKey {
    pub fn from_spki(spki: &SubjectPublicKeyInfoOwned) -> Result<Self, CertError> {
        if spki.algorithm.oid != ID_EC_PUBLIC_KEY {
            return Err(CertError::UnsupportedKey(format!(
                "algorithm {} is not id-ecPublicKey",
                spki.algorithm.oid
            )));
        }
        let curve = spki
            .algorithm
            .parameters
            .as_ref()
            .ok_or_else(|| CertError::UnsupportedKey("missing curve parameter".into()))
            .and_then(|params| {
                params
                    .to_der()
                    .and_then(|der| ObjectIdentifier::from_der(&der))
                    .map_err(|e| CertError::UnsupportedKey(format!("invalid curve parameter: {}", e)))
            })?;
        let point = spki
            .subject_public_key
            .as_bytes()
            .ok_or_else(|| CertError::UnsupportedKey("public key is not octet aligned".into()))?;

        match curve {
            SECP256R1 => p256::ecdsa::VerifyingKey::from_sec1_bytes(point)
                .map(PublicKey::P256)
                .map_err(|e| CertError::UnsupportedKey(format!("invalid P-256 point: {}", e))),
            SECP384R1 => p384::ecdsa::VerifyingKey::from_sec1_bytes(point)
                .map(PublicKey::P384)
                .map_err(|e| CertError::UnsupportedKey(format!("invalid P-384 point: {}", e))),
            other => Err(CertError::UnsupportedKey(format!("curve {}", other))),
        }
    }

    /// The hash an unqualified signature with this key is expected to use.
    pub fn default_hash(&self) -> HashAlgorithm {
        match self {
            PublicKey::P256(_) => HashAlgorithm::Sha256,
            PublicKey::P384(_) => HashAlgorithm::Sha384,
        }
    }

    pub fn verify(
        &self,
        hash: HashAlgorithm,
        message: &[u8],
        signature: &[u8],
        encoding: SignatureEncoding,
    ) -> Result<(), CertError> {
        let prehash = hash.digest(message);
        let bad = |e: p256::ecdsa::Error| CertError::BadSignature(e.to_string());

        match self {
            PublicKey::P256(key) => {
                let sig = match encoding {
                    SignatureEncoding::Der => p256::ecdsa::Signature::from_der(signature),
                    SignatureEncoding::Fixed => p256::ecdsa::Signature::from_slice(signature),
                }
                .map_err(bad)?;
                key.verify_prehash(&prehash, &sig).map_err(bad)
            }
            PublicKey::P384(key) => {
                let sig = match encoding {
                    SignatureEncoding::Der => p384::ecdsa::Signature::from_der(signature),
                    SignatureEncoding::Fixed => p384::ecdsa::Signature::from_slice(signature),
                }
                .map_err(bad)?;
                key.verify_prehash(&prehash, &sig).map_err(bad)
            }
        }
    }
}

/// A decoded certificate together with the DER it was decoded from.
#[derive(Debug, Clone)]
pub struct ParsedCert {
    der: Vec<u8>,
    cert: Certificate,
}

impl ParsedCert {
    pub fn from_der(der: &[u8]) -> Result<Self, CertError> {
        let cert = Certificate::from_der(der).map_err(|e| CertError::Parse(e.to_string()))?;
        Ok(Self {
            der: der.to_vec(),
            cert,
        })
    }

    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self, CertError> {
        let block = pem::parse(pem_bytes).map_err(|e| CertError::Parse(format!("invalid PEM: {}", e)))?;
        if block.tag() != "CERTIFICATE" {
            return Err(CertError::Parse(format!("unexpected PEM tag {}", block.tag())));
        }
        Self::from_der(block.contents())
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn certificate(&self) -> &Certificate {
        &self.cert
    }

    pub fn subject(&self) -> String {
        self.cert.tbs_certificate.subject.to_string()
    }

    pub fn public_key(&self) -> Result<PublicKey, CertError> {
        PublicKey::from_spki(&self.cert.tbs_certificate.subject_public_key_info)
    }

    /// The `tbsCertificate` element exactly as encoded in the received DER.
    pub fn tbs_bytes(&self) -> Result<&[u8], CertError> {
        let parse = |e: der::Error| CertError::Parse(format!("malformed certificate framing: {}", e));
        let outer = AnyRef::from_der(&self.der).map_err(parse)?;
        let mut reader = SliceReader::new(outer.value()).map_err(parse)?;
        reader.tlv_bytes().map_err(parse)
    }

    /// Raw value of the extension with the given OID, if present.
    pub fn extension(&self, oid: &ObjectIdentifier) -> Option<&[u8]> {
        self.cert
            .tbs_certificate
            .extensions
            .as_ref()?
            .iter()
            .find(|ext| &ext.extn_id == oid)
            .map(|ext| ext.extn_value.as_bytes())
    }

    fn basic_constraints(&self) -> Option<BasicConstraints> {
        self.extension(&ID_CE_BASIC_CONSTRAINTS)
            .and_then(|bytes| BasicConstraints::from_der(bytes).ok())
    }

    pub fn is_ca(&self) -> bool {
        self.basic_constraints().map(|bc| bc.ca).unwrap_or(false)
    }

    /// URI entries of the subject alternative name extension.
    pub fn san_uris(&self) -> Vec<String> {
        let Some(bytes) = self.extension(&ID_CE_SUBJECT_ALT_NAME) else {
            return Vec::new();
        };
        let Ok(san) = SubjectAltName::from_der(bytes) else {
            return Vec::new();
        };
        san.0
            .iter()
            .filter_map(|name| match name {
                GeneralName::UniformResourceIdentifier(uri) => Some(uri.to_string()),
                _ => None,
            })
            .collect()
    }

    /// Check the validity window against `at` (seconds since the unix epoch).
    pub fn check_validity(&self, at: u64) -> Result<(), CertError> {
        let validity = &self.cert.tbs_certificate.validity;
        let not_before = validity.not_before.to_unix_duration().as_secs();
        let not_after = validity.not_after.to_unix_duration().as_secs();
        if at < not_before || at > not_after {
            return Err(CertError::NotValidAt {
                subject: self.subject(),
                at,
                not_before,
                not_after,
            });
        }
        Ok(())
    }

    /// Verify that `issuer` signed this certificate.
    pub fn verify_issued_by(&self, issuer: &ParsedCert) -> Result<(), CertError> {
        if self.cert.tbs_certificate.issuer != issuer.cert.tbs_certificate.subject {
            return Err(CertError::IssuerMismatch {
                subject: self.subject(),
                issuer: issuer.subject(),
            });
        }

        let hash = match self.cert.signature_algorithm.oid {
            ECDSA_WITH_SHA256 => HashAlgorithm::Sha256,
            ECDSA_WITH_SHA384 => HashAlgorithm::Sha384,
            other => return Err(CertError::UnsupportedAlgorithm(other)),
        };
        let signature = self
            .cert
            .signature
            .as_bytes()
            .ok_or_else(|| CertError::BadSignature("signature is not octet aligned".into()))?;

        issuer
            .public_key()?
            .verify(hash, self.tbs_bytes()?, signature, SignatureEncoding::Der)
            .map_err(|e| CertError::BadSignature(format!("'{}': {}", self.subject(), e)))
    }
}

/// Validate `chain`, ordered leaf first and trust anchor last.
///
/// Every link must be signed by the next certificate, every issuer must be a
/// CA whose path length constraint admits the CAs below it, and every
/// certificate (anchor included) must be valid at `at`.
pub fn verify_chain(chain: &[&ParsedCert], at: u64) -> Result<(), CertError> {
    for cert in chain {
        cert.check_validity(at)?;
    }

    for (depth, pair) in chain.windows(2).enumerate() {
        let (subject, issuer) = (pair[0], pair[1]);

        let constraints = issuer
            .basic_constraints()
            .filter(|bc| bc.ca)
            .ok_or_else(|| CertError::NotCa(issuer.subject()))?;
        if let Some(max) = constraints.path_len_constraint {
            if depth > usize::from(max) {
                return Err(CertError::PathLength(issuer.subject()));
            }
        }

        subject.verify_issued_by(issuer)?;
    }

    Ok(())
}
