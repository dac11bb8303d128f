//! Fulcio certificate identity
//!
//! Fulcio records the OIDC token claims in custom extensions under
//! 1.3.6.1.4.1.57264.1. The v1 extensions hold the raw string, the v2
//! extensions a DER UTF8String.

use der::asn1::Utf8StringRef;
use der::oid::ObjectIdentifier;
use der::Decode;

use crate::cert::ParsedCert;
use crate::error::{Error, Result};

/// Issuer of tokens minted for GitHub Actions workflows.
pub const GITHUB_ACTIONS_ISSUER: &str = "https://token.actions.githubusercontent.com";

const GITHUB_URL: &str = "https://github.com/";

const OID_ISSUER_V1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.1");
const OID_WORKFLOW_REPOSITORY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.5");
const OID_ISSUER_V2: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.8");
const OID_BUILD_SIGNER_URI: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.9");
const OID_SOURCE_REPOSITORY_URI: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.57264.1.12");

/// Claims read from a Fulcio leaf certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateIdentity {
    pub issuer: Option<String>,
    pub source_repository_uri: Option<String>,
    pub workflow_repository: Option<String>,
    pub build_signer_uri: Option<String>,
    pub san_uris: Vec<String>,
}

fn raw_string(cert: &ParsedCert, oid: &ObjectIdentifier) -> Option<String> {
    cert.extension(oid)
        .and_then(|bytes| std::str::from_utf8(bytes).ok())
        .map(str::to_string)
}

fn der_string(cert: &ParsedCert, oid: &ObjectIdentifier) -> Option<String> {
    cert.extension(oid)
        .and_then(|bytes| Utf8StringRef::from_der(bytes).ok())
        .map(|s| s.as_str().to_string())
}

impl CertificateIdentity {
    pub fn from_cert(cert: &ParsedCert) -> Self {
        Self {
            issuer: der_string(cert, &OID_ISSUER_V2).or_else(|| raw_string(cert, &OID_ISSUER_V1)),
            source_repository_uri: der_string(cert, &OID_SOURCE_REPOSITORY_URI),
            workflow_repository: raw_string(cert, &OID_WORKFLOW_REPOSITORY),
            build_signer_uri: der_string(cert, &OID_BUILD_SIGNER_URI),
            san_uris: cert.san_uris(),
        }
    }

    /// `owner/name` of the repository the workflow ran in.
    pub fn repository(&self) -> Option<&str> {
        self.source_repository_uri
            .as_deref()
            .and_then(|uri| uri.strip_prefix(GITHUB_URL))
            .or(self.workflow_repository.as_deref())
    }
}

/// What a signing identity must look like to be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPolicy {
    pub oidc_issuer: String,
    /// Only accept workflows that ran for a tag (`@refs/tags/...`).
    pub require_release_tag: bool,
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        Self {
            oidc_issuer: GITHUB_ACTIONS_ISSUER.to_string(),
            require_release_tag: true,
        }
    }
}

/// `owner/name` with both parts non-empty and no further separators.
pub fn is_repository_name(name: &str) -> bool {
    match name.split_once('/') {
        Some((owner, repo)) => !owner.is_empty() && !repo.is_empty() && !repo.contains('/'),
        None => false,
    }
}

impl IdentityPolicy {
    pub fn check(&self, identity: &CertificateIdentity, expected_repository: &str) -> Result<()> {
        match identity.issuer.as_deref() {
            Some(issuer) if issuer == self.oidc_issuer => {}
            Some(issuer) => {
                return Err(Error::UntrustedSigner(format!(
                    "certificate issued for OIDC issuer {}, expected {}",
                    issuer, self.oidc_issuer
                )))
            }
            None => return Err(Error::UntrustedSigner("certificate has no OIDC issuer".into())),
        }

        if !is_repository_name(expected_repository) {
            return Err(Error::IdentityMismatch(format!(
                "expected repository {} is not of the form owner/name",
                expected_repository
            )));
        }
        let repository = identity
            .repository()
            .ok_or_else(|| Error::IdentityMismatch("certificate names no repository".into()))?;
        if repository != expected_repository {
            return Err(Error::IdentityMismatch(format!(
                "certificate is for repository {}, expected {}",
                repository, expected_repository
            )));
        }

        let workflow_prefix = format!("{}{}/.github/workflows/", GITHUB_URL, expected_repository);
        let workflow = identity
            .san_uris
            .iter()
            .chain(identity.build_signer_uri.iter())
            .find(|uri| uri.starts_with(&workflow_prefix))
            .ok_or_else(|| {
                Error::IdentityMismatch(format!("no workflow identity under {}", workflow_prefix))
            })?;
        if self.require_release_tag && !workflow.contains("@refs/tags/") {
            return Err(Error::IdentityMismatch(format!(
                "workflow {} did not run for a release tag",
                workflow
            )));
        }

        Ok(())
    }
}
