//! Error types for the verifier

use serde::Serialize;
use thiserror::Error;

use crate::attestation::types::RegisterIndex;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed bundle: {0}")]
    MalformedBundle(String),

    #[error("Malformed attestation document: {0}")]
    MalformedDocument(String),

    #[error("Untrusted signer: {0}")]
    UntrustedSigner(String),

    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Identity mismatch: {0}")]
    IdentityMismatch(String),

    #[error("Missing claim: {0}")]
    MissingClaim(String),

    #[error("Register PCR{0} missing")]
    RegisterMissing(RegisterIndex),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Attestation fetch failed: {0}")]
    Fetch(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serializable classification of an [`Error`].
///
/// Transport failures (`Http`, `Fetch`) collapse into [`ErrorKind::Transport`]
/// so callers can tell "could not obtain the bytes" apart from "the bytes did
/// not validate".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    MalformedBundle,
    MalformedDocument,
    UntrustedSigner,
    SignatureInvalid,
    IdentityMismatch,
    MissingClaim,
    RegisterMissing,
    Transport,
    Config,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedBundle(_) => ErrorKind::MalformedBundle,
            Error::MalformedDocument(_) => ErrorKind::MalformedDocument,
            Error::UntrustedSigner(_) => ErrorKind::UntrustedSigner,
            Error::SignatureInvalid(_) => ErrorKind::SignatureInvalid,
            Error::IdentityMismatch(_) => ErrorKind::IdentityMismatch,
            Error::MissingClaim(_) => ErrorKind::MissingClaim,
            Error::RegisterMissing(_) => ErrorKind::RegisterMissing,
            Error::Http(_) | Error::Fetch(_) => ErrorKind::Transport,
            Error::Config(_) | Error::Io(_) => ErrorKind::Config,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True when the failure happened before any attestation bytes were
    /// available, i.e. retrying the fetch may help.
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kinds() {
        assert!(Error::Fetch("HTTP 404".into()).is_transport());
        assert!(!Error::SignatureInvalid("bad".into()).is_transport());
        assert_eq!(Error::RegisterMissing(1).kind(), ErrorKind::RegisterMissing);
    }

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::IdentityMismatch).unwrap();
        assert_eq!(json, "\"IdentityMismatch\"");
    }
}
