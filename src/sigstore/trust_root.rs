//! Sigstore trusted root (`trusted_root.json`)
//!
//! The file is distributed through Sigstore's TUF repository. The Fulcio
//! certificate authorities, the Rekor transparency logs and the certificate
//! transparency logs are used; timestamp authorities are ignored.

use der::Decode;
use serde::Deserialize;
use time::OffsetDateTime;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use super::bundle::decode_b64;
use crate::cert::{ParsedCert, PublicKey};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrustedRootJson {
    media_type: String,
    #[serde(default)]
    tlogs: Vec<TlogJson>,
    #[serde(default)]
    certificate_authorities: Vec<CertificateAuthorityJson>,
    #[serde(default)]
    ctlogs: Vec<TlogJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TlogJson {
    base_url: String,
    public_key: PublicKeyJson,
    log_id: LogIdJson,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyJson {
    #[serde(default)]
    raw_bytes: Option<String>,
    valid_for: ValidityJson,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogIdJson {
    key_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertificateAuthorityJson {
    uri: String,
    cert_chain: CertChainJson,
    valid_for: ValidityJson,
}

#[derive(Debug, Deserialize)]
struct CertChainJson {
    certificates: Vec<RawBytesJson>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBytesJson {
    raw_bytes: String,
}

#[derive(Debug, Deserialize)]
struct ValidityJson {
    #[serde(with = "time::serde::rfc3339")]
    start: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    end: Option<OffsetDateTime>,
}

/// Half-open window `[start, end)` during which a trust anchor is in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityPeriod {
    pub start: i64,
    pub end: Option<i64>,
}

impl ValidityPeriod {
    pub fn contains(&self, unix_secs: i64) -> bool {
        unix_secs >= self.start && self.end.map_or(true, |end| unix_secs < end)
    }
}

impl From<ValidityJson> for ValidityPeriod {
    fn from(json: ValidityJson) -> Self {
        Self {
            start: json.start.unix_timestamp(),
            end: json.end.map(OffsetDateTime::unix_timestamp),
        }
    }
}

/// A Fulcio CA: its chain ordered from the issuing certificate to the root.
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    pub uri: String,
    pub chain: Vec<ParsedCert>,
    pub valid_for: ValidityPeriod,
}

/// A Rekor or CT log instance and the key its promises verify with.
#[derive(Debug, Clone)]
pub struct TransparencyLog {
    pub base_url: String,
    pub log_id: Vec<u8>,
    pub key: PublicKey,
    pub valid_for: ValidityPeriod,
}

#[derive(Debug, Clone)]
pub struct TrustedRoot {
    certificate_authorities: Vec<CertificateAuthority>,
    tlogs: Vec<TransparencyLog>,
    ctlogs: Vec<TransparencyLog>,
}

/// Logs whose key is not an ECDSA key this crate can verify with are skipped.
fn parse_logs(logs: Vec<TlogJson>) -> Result<Vec<TransparencyLog>> {
    let mut parsed = Vec::with_capacity(logs.len());
    for log in logs {
        let Some(raw) = log.public_key.raw_bytes else {
            continue;
        };
        let spki = decode_b64("log key", &raw).map_err(|e| Error::Config(format!("trusted root: {}", e)))?;
        let key = match SubjectPublicKeyInfoOwned::from_der(&spki)
            .ok()
            .and_then(|spki| PublicKey::from_spki(&spki).ok())
        {
            Some(key) => key,
            None => continue,
        };
        let log_id =
            decode_b64("log id", &log.log_id.key_id).map_err(|e| Error::Config(format!("trusted root: {}", e)))?;
        parsed.push(TransparencyLog {
            base_url: log.base_url,
            log_id,
            key,
            valid_for: log.public_key.valid_for.into(),
        });
    }
    Ok(parsed)
}

impl TrustedRoot {
    pub fn new(
        certificate_authorities: Vec<CertificateAuthority>,
        tlogs: Vec<TransparencyLog>,
        ctlogs: Vec<TransparencyLog>,
    ) -> Self {
        Self {
            certificate_authorities,
            tlogs,
            ctlogs,
        }
    }

    /// Parse `trusted_root.json`.
    ///
    /// A root left without any CA or any usable Rekor log is rejected. CT
    /// logs may be absent; SCT checks then fail unless disabled.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config = |msg: String| Error::Config(format!("trusted root: {}", msg));

        let json: TrustedRootJson = serde_json::from_slice(bytes).map_err(|e| config(e.to_string()))?;
        if !json.media_type.starts_with("application/vnd.dev.sigstore.trustedroot") {
            return Err(config(format!("unexpected media type {}", json.media_type)));
        }

        let mut certificate_authorities = Vec::with_capacity(json.certificate_authorities.len());
        for ca in json.certificate_authorities {
            let chain = ca
                .cert_chain
                .certificates
                .iter()
                .map(|raw| {
                    let der = decode_b64("CA certificate", &raw.raw_bytes).map_err(|e| config(e.to_string()))?;
                    ParsedCert::from_der(&der).map_err(|e| config(format!("{}: {}", ca.uri, e)))
                })
                .collect::<Result<Vec<_>>>()?;
            if chain.is_empty() {
                return Err(config(format!("{} has an empty certificate chain", ca.uri)));
            }
            certificate_authorities.push(CertificateAuthority {
                uri: ca.uri,
                chain,
                valid_for: ca.valid_for.into(),
            });
        }

        let tlogs = parse_logs(json.tlogs)?;
        let ctlogs = parse_logs(json.ctlogs)?;

        if certificate_authorities.is_empty() {
            return Err(config("no certificate authorities".into()));
        }
        if tlogs.is_empty() {
            return Err(config("no usable transparency logs".into()));
        }

        Ok(Self::new(certificate_authorities, tlogs, ctlogs))
    }

    pub fn certificate_authorities(&self) -> &[CertificateAuthority] {
        &self.certificate_authorities
    }

    pub fn tlog(&self, log_id: &[u8]) -> Option<&TransparencyLog> {
        self.tlogs.iter().find(|tlog| tlog.log_id == log_id)
    }

    pub fn ctlog(&self, log_id: &[u8]) -> Option<&TransparencyLog> {
        self.ctlogs.iter().find(|ctlog| ctlog.log_id == log_id)
    }
}
