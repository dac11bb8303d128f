//! Sigstore verification for code provenance
//!
//! The release workflow of an enclave repository builds the enclave image
//! and publishes a build attestation through GitHub: an in-toto statement
//! whose subject is the image digest and whose predicate lists the expected
//! PCR values. The statement is wrapped in a DSSE envelope, signed with a
//! short-lived Fulcio certificate and logged in Rekor.
//!
//! [`TransparencyVerifier::verify`] checks, without any network access:
//! 1. The Rekor entry is signed by a trusted log and commits to the envelope
//! 2. The Fulcio certificate chains to a trusted CA at the log time and
//!    carries an SCT from a trusted CT log
//! 3. The certificate identity is the expected repository's release workflow
//! 4. The DSSE signature over the statement
//! 5. The statement is for the expected digest, and yields the PCRs

pub mod bundle;
pub mod identity;
pub mod sct;
pub mod tlog;
pub mod trust_root;

pub use bundle::Bundle;
pub use identity::{CertificateIdentity, IdentityPolicy, GITHUB_ACTIONS_ISSUER};
pub use trust_root::TrustedRoot;

use std::collections::HashMap;

use serde::Deserialize;

use crate::attestation::types::{MeasurementSet, PredicateType, RegisterIndex};
use crate::cert::{verify_chain, ParsedCert, SignatureEncoding};
use crate::error::{Error, Result};
use bundle::decode_b64;

/// DSSE payload type of an in-toto statement.
pub const IN_TOTO_PAYLOAD_TYPE: &str = "application/vnd.in-toto+json";

/// In-toto statement from the decoded payload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InTotoStatement {
    #[serde(rename = "_type")]
    #[allow(dead_code)]
    type_: String,
    subject: Vec<Subject>,
    predicate_type: String,
    predicate: Predicate,
}

/// Predicate entries in document order. A key appearing twice is an error
/// rather than last-one-wins.
#[derive(Debug)]
struct Predicate(Vec<(String, serde_json::Value)>);

impl<'de> Deserialize<'de> for Predicate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct PredicateVisitor;

        impl<'de> serde::de::Visitor<'de> for PredicateVisitor {
            type Value = Predicate;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a predicate object")
            }

            fn visit_map<A: serde::de::MapAccess<'de>>(self, mut map: A) -> std::result::Result<Predicate, A::Error> {
                let mut entries: Vec<(String, serde_json::Value)> = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, serde_json::Value>()? {
                    if entries.iter().any(|(k, _)| *k == key) {
                        return Err(serde::de::Error::custom(format!("duplicate predicate key {}", key)));
                    }
                    entries.push((key, value));
                }
                Ok(Predicate(entries))
            }
        }

        deserializer.deserialize_map(PredicateVisitor)
    }
}

#[derive(Debug, Deserialize)]
struct Subject {
    #[allow(dead_code)]
    name: String,
    digest: HashMap<String, String>,
}

/// Compute DSSE Pre-Authentication Encoding (PAE)
///
/// PAE(type, body) = "DSSEv1" + SP + LEN(type) + SP + type + SP + LEN(body) + SP + body
/// Where:
///   SP = ASCII space (0x20)
///   LEN(s) = ASCII decimal encoding of the byte length of s
fn compute_pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let type_bytes = payload_type.as_bytes();
    let type_len = type_bytes.len().to_string();
    let body_len = payload.len().to_string();

    let mut pae = Vec::new();
    pae.extend_from_slice(b"DSSEv1");
    pae.push(0x20); // SP
    pae.extend_from_slice(type_len.as_bytes());
    pae.push(0x20); // SP
    pae.extend_from_slice(type_bytes);
    pae.push(0x20); // SP
    pae.extend_from_slice(body_len.as_bytes());
    pae.push(0x20); // SP
    pae.extend_from_slice(payload);

    pae
}

/// Lowercase a 64 character hex SHA-256 digest, or reject it.
fn normalize_digest(digest: &str) -> Result<String> {
    if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::IdentityMismatch(format!(
            "expected digest {} is not a hex SHA-256 digest",
            digest
        )));
    }
    Ok(digest.to_ascii_lowercase())
}

/// Digits of a `PCR<digits>` key. Other keys are not register claims.
fn register_digits(key: &str) -> Option<&str> {
    let digits = key.strip_prefix("PCR")?;
    (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())).then_some(digits)
}

/// Register index of a canonical `PCR<n>` key (`PCR1`, never `PCR01`).
fn register_index(key: &str) -> Option<RegisterIndex> {
    let digits = register_digits(key)?;
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    digits.parse().ok()
}

fn extract_measurements(statement: &InTotoStatement) -> Result<MeasurementSet> {
    let predicate = match PredicateType::from_uri(&statement.predicate_type) {
        Some(PredicateType::AwsNitroEnclaveV1) => PredicateType::AwsNitroEnclaveV1,
        _ => {
            return Err(Error::MissingClaim(format!(
                "unsupported predicate type {}",
                statement.predicate_type
            )))
        }
    };

    let mut set = MeasurementSet::new(predicate);
    for (key, value) in &statement.predicate.0 {
        if register_digits(key).is_none() {
            continue;
        }
        let index = register_index(key)
            .ok_or_else(|| Error::MalformedBundle(format!("{} is not a canonical register key", key)))?;
        if set.contains(index) {
            return Err(Error::MalformedBundle(format!("PCR{} claimed more than once", index)));
        }
        let value = value
            .as_str()
            .ok_or_else(|| Error::MalformedBundle(format!("{} is not a string", key)))?;
        set.insert_hex(index, value)
            .map_err(|e| Error::MalformedBundle(format!("{} is not hex: {}", key, e)))?;
    }

    if set.is_empty() {
        return Err(Error::MissingClaim("predicate has no PCR values".into()));
    }
    Ok(set)
}

/// SCTs from distinct CT logs a Fulcio leaf must carry by default.
pub const DEFAULT_SCT_THRESHOLD: usize = 1;

/// Verifies Sigstore bundles against a trusted root and identity policy.
#[derive(Debug, Clone)]
pub struct TransparencyVerifier {
    trusted_root: TrustedRoot,
    policy: IdentityPolicy,
    sct_threshold: usize,
}

impl TransparencyVerifier {
    pub fn new(trusted_root: TrustedRoot) -> Self {
        Self {
            trusted_root,
            policy: IdentityPolicy::default(),
            sct_threshold: DEFAULT_SCT_THRESHOLD,
        }
    }

    pub fn with_policy(mut self, policy: IdentityPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Zero disables SCT checks.
    pub fn with_sct_threshold(mut self, threshold: usize) -> Self {
        self.sct_threshold = threshold;
        self
    }

    pub fn policy(&self) -> &IdentityPolicy {
        &self.policy
    }

    /// Verify `bundle_bytes` for `expected_digest` built from
    /// `expected_repository` (`owner/name`) and return the claimed PCRs.
    pub fn verify(
        &self,
        expected_digest: &str,
        bundle_bytes: &[u8],
        expected_repository: &str,
    ) -> Result<MeasurementSet> {
        let expected_digest = normalize_digest(expected_digest)?;

        let bundle = Bundle::from_json(bundle_bytes)?;
        let payload = bundle.payload()?;
        let signatures = bundle
            .dsse_envelope
            .signatures
            .iter()
            .map(|s| decode_b64("DSSE signature", &s.sig))
            .collect::<Result<Vec<_>>>()?;

        let entry = tlog::verify_entries(
            &bundle.verification_material.tlog_entries,
            &self.trusted_root,
            &payload,
            &signatures,
        )?;

        let leaf = ParsedCert::from_der(&bundle.leaf_certificate()?)
            .map_err(|e| Error::MalformedBundle(format!("signing certificate: {}", e)))?;
        let issuer = self.validate_chain(&leaf, entry.integrated_time)?;
        sct::verify_scts(&leaf, issuer, &self.trusted_root, self.sct_threshold)?;
        self.policy
            .check(&CertificateIdentity::from_cert(&leaf), expected_repository)?;

        verify_dsse(&leaf, &bundle.dsse_envelope.payload_type, &payload, &signatures)?;

        if bundle.dsse_envelope.payload_type != IN_TOTO_PAYLOAD_TYPE {
            return Err(Error::MalformedBundle(format!(
                "unexpected payload type {}",
                bundle.dsse_envelope.payload_type
            )));
        }
        let statement: InTotoStatement = serde_json::from_slice(&payload)
            .map_err(|e| Error::MalformedBundle(format!("invalid in-toto statement: {}", e)))?;
        let measurements = extract_measurements(&statement)?;

        let digest_matches = statement
            .subject
            .iter()
            .filter_map(|subject| subject.digest.get("sha256"))
            .any(|digest| digest.to_ascii_lowercase() == expected_digest);
        if !digest_matches {
            return Err(Error::IdentityMismatch(format!(
                "bundle does not attest digest {}",
                expected_digest
            )));
        }

        Ok(measurements)
    }

    /// Chain the leaf to one of the trusted Fulcio CAs at `at` and return
    /// the certificate that issued it.
    fn validate_chain(&self, leaf: &ParsedCert, at: i64) -> Result<&ParsedCert> {
        let at_secs = u64::try_from(at)
            .map_err(|_| Error::MalformedBundle(format!("negative integration time {}", at)))?;

        let mut last_error = None;
        for ca in self.trusted_root.certificate_authorities() {
            let Some(issuer) = ca.chain.first() else {
                continue;
            };
            if !ca.valid_for.contains(at) {
                continue;
            }
            let mut chain = Vec::with_capacity(ca.chain.len() + 1);
            chain.push(leaf);
            chain.extend(ca.chain.iter());
            match verify_chain(&chain, at_secs) {
                Ok(()) => return Ok(issuer),
                Err(e) => last_error = Some(e),
            }
        }

        Err(Error::UntrustedSigner(match last_error {
            Some(e) => format!("signing certificate: {}", e),
            None => format!("no certificate authority valid at {}", at),
        }))
    }
}

/// At least one envelope signature must verify with the leaf key.
fn verify_dsse(leaf: &ParsedCert, payload_type: &str, payload: &[u8], signatures: &[Vec<u8>]) -> Result<()> {
    let key = leaf
        .public_key()
        .map_err(|e| Error::UntrustedSigner(format!("signing certificate: {}", e)))?;
    let pae = compute_pae(payload_type, payload);
    let hash = key.default_hash();

    let verified = signatures.iter().any(|signature| {
        // DER when it starts with a SEQUENCE, raw r||s otherwise
        let encoding = if signature.first() == Some(&0x30) {
            SignatureEncoding::Der
        } else {
            SignatureEncoding::Fixed
        };
        key.verify(hash, &pae, signature, encoding).is_ok()
    });
    if !verified {
        return Err(Error::SignatureInvalid("DSSE signature verification failed".into()));
    }
    Ok(())
}
