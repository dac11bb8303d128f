//! Verifier configuration
//!
//! Loaded from a JSON file. Every field has a default, so `{}` is a valid
//! configuration apart from the Sigstore trusted root, which has to be
//! supplied before a transparency verifier can be built.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::attestation::nitro::{HardwareVerifier, ValidationTime};
use crate::attestation::types::{RegisterIndex, DEFAULT_REGISTERS};
use crate::error::{Error, Result};
use crate::sigstore::{
    IdentityPolicy, TransparencyVerifier, TrustedRoot, DEFAULT_SCT_THRESHOLD, GITHUB_ACTIONS_ISSUER,
};
use crate::verifier::VerificationOrchestrator;

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_ATTESTATION_PATH: &str = "/.well-known/tinfoil-attestation";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Sigstore `trusted_root.json`.
    pub sigstore_trusted_root: Option<PathBuf>,
    /// PEM root for Nitro documents. The bundled AWS root when unset.
    pub nitro_root_cert: Option<PathBuf>,
    pub oidc_issuer: String,
    pub require_release_tag: bool,
    /// Embedded SCTs from distinct trusted CT logs the Fulcio leaf needs.
    pub sct_threshold: usize,
    pub registers: Vec<RegisterIndex>,
    pub hardware_validation_time: ValidationTime,
    pub github_api_url: String,
    pub attestation_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sigstore_trusted_root: None,
            nitro_root_cert: None,
            oidc_issuer: GITHUB_ACTIONS_ISSUER.to_string(),
            require_release_tag: true,
            sct_threshold: DEFAULT_SCT_THRESHOLD,
            registers: DEFAULT_REGISTERS.to_vec(),
            hardware_validation_time: ValidationTime::Now,
            github_api_url: DEFAULT_GITHUB_API_URL.to_string(),
            attestation_path: DEFAULT_ATTESTATION_PATH.to_string(),
        }
    }
}

impl Config {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config: Config = serde_json::from_slice(bytes).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_json(&bytes)
    }

    fn validate(&self) -> Result<()> {
        if self.registers.is_empty() {
            return Err(Error::Config("registers must not be empty".into()));
        }
        if !self.attestation_path.starts_with('/') {
            return Err(Error::Config(format!(
                "attestation_path {} must start with '/'",
                self.attestation_path
            )));
        }
        if self.oidc_issuer.is_empty() {
            return Err(Error::Config("oidc_issuer must not be empty".into()));
        }
        Ok(())
    }

    pub fn identity_policy(&self) -> IdentityPolicy {
        IdentityPolicy {
            oidc_issuer: self.oidc_issuer.clone(),
            require_release_tag: self.require_release_tag,
        }
    }

    pub fn transparency_verifier(&self) -> Result<TransparencyVerifier> {
        let path = self
            .sigstore_trusted_root
            .as_ref()
            .ok_or_else(|| Error::Config("sigstore_trusted_root is not set".into()))?;
        let root = TrustedRoot::from_json(&std::fs::read(path)?)?;
        Ok(TransparencyVerifier::new(root)
            .with_policy(self.identity_policy())
            .with_sct_threshold(self.sct_threshold))
    }

    pub fn hardware_verifier(&self) -> Result<HardwareVerifier> {
        let verifier = match &self.nitro_root_cert {
            Some(path) => HardwareVerifier::from_pem(&std::fs::read(path)?)?,
            None => HardwareVerifier::aws()?,
        };
        Ok(verifier.with_validation_time(self.hardware_validation_time))
    }

    /// A fresh orchestrator for one run.
    pub fn orchestrator(&self) -> Result<VerificationOrchestrator> {
        let transparency = Arc::new(self.transparency_verifier()?);
        let hardware = Arc::new(self.hardware_verifier()?);
        Ok(VerificationOrchestrator::new(transparency, hardware).with_registers(self.registers.clone()))
    }
}
