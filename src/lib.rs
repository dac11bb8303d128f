//! # Tinfoil Verifier
//!
//! Checks that an AWS Nitro enclave runs exactly the code a GitHub release
//! attests to.
//!
//! ## Two Attestations, One Comparison
//!
//! ### Transparency (Sigstore)
//! - Parses the Sigstore bundle GitHub Actions published for the image digest
//! - Verifies the Rekor signed entry timestamp against the trusted root
//! - Validates the Fulcio certificate chain at the logged integration time
//! - Checks the signing identity is a release workflow of the expected repository
//! - **Cryptographically verifies** the DSSE signature over the in-toto statement
//! - Extracts the claimed PCR values
//!
//! ### Hardware (AWS Nitro)
//! - Decodes the COSE_Sign1 attestation document
//! - Validates the certificate chain up to the AWS Nitro root
//! - Verifies the ES384 signature over the exact signed bytes
//! - Extracts the PCR values the hardware reported
//!
//! ### Comparison
//! - Compares the configured registers (PCR0, PCR1 and PCR2 by default)
//! - Succeeds only when both attestations verified and every register matches
//!
//! ## Example
//!
//! ```rust,ignore
//! use tinfoil_verifier::{config::Config, fetch::{verify_remote, Fetcher}};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("verifier.json".as_ref())?;
//!     let fetcher = Fetcher::new(&config)?;
//!     let release = fetcher.fetch_latest_release("tinfoilsh/confidential-inference").await?;
//!
//!     let report = verify_remote(
//!         config.orchestrator()?,
//!         &fetcher,
//!         "tinfoilsh/confidential-inference",
//!         &release.digest,
//!         "inference.tinfoil.sh",
//!     )
//!     .await;
//!
//!     assert!(report.result.success());
//!     Ok(())
//! }
//! ```

pub mod attestation;
pub mod cert;
pub mod compare;
pub mod config;
pub mod error;
pub mod event_log;
pub mod fetch;
pub mod sigstore;
pub mod verifier;

#[cfg(test)]
mod test_util;

pub use attestation::{HardwareVerifier, MeasurementSet, RegisterIndex};
pub use compare::{compare, Comparison, Outcome, RegisterComparison};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use event_log::{EventLog, EventLogEntry, Stage};
pub use sigstore::{TransparencyVerifier, TrustedRoot};
pub use verifier::{Phase, VerificationOrchestrator, VerificationReport, VerificationResult};
