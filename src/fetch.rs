//! Retrieval of attestation inputs over HTTPS
//!
//! Bundles come from the GitHub attestations API, hardware documents from the
//! enclave itself. Nothing fetched here is trusted until a verifier accepts it.

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::verifier::{VerificationOrchestrator, VerificationReport};

const USER_AGENT: &str = concat!("tinfoil-verifier/", env!("CARGO_PKG_VERSION"));

/// Marker preceding the image digest in release notes.
const EIF_HASH_MARKER: &str = "EIF hash: ";

#[derive(Debug, Deserialize)]
struct AttestationResponse {
    attestations: Vec<AttestationEntry>,
}

#[derive(Debug, Deserialize)]
struct AttestationEntry {
    bundle: Box<RawValue>,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    tag_name: String,
    #[serde(default)]
    body: Option<String>,
}

/// Latest published release and the image digest announced with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub tag: String,
    pub digest: String,
}

pub struct Fetcher {
    client: reqwest::Client,
    github_api_url: String,
    attestation_path: String,
}

impl Fetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            github_api_url: config.github_api_url.trim_end_matches('/').to_string(),
            attestation_path: config.attestation_path.clone(),
        })
    }

    fn bundle_url(&self, repo: &str, digest: &str) -> String {
        format!("{}/repos/{}/attestations/sha256:{}", self.github_api_url, repo, digest)
    }

    fn release_url(&self, repo: &str) -> String {
        format!("{}/repos/{}/releases/latest", self.github_api_url, repo)
    }

    fn document_url(&self, domain: &str) -> String {
        format!("https://{}{}", domain.trim_end_matches('/'), self.attestation_path)
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        log::debug!("GET {}", url);
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(Error::Fetch(format!(
                "{}: HTTP {}: {}",
                url,
                response.status(),
                response.status().canonical_reason().unwrap_or("Unknown error")
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// First Sigstore bundle GitHub holds for `repo` at `digest`, as raw JSON.
    pub async fn fetch_attestation_bundle(&self, repo: &str, digest: &str) -> Result<Vec<u8>> {
        let body = self.get(&self.bundle_url(repo, digest)).await?;
        first_bundle(&body)
    }

    /// Attestation document served by the enclave at `domain`.
    pub async fn fetch_attestation_document(&self, domain: &str) -> Result<Vec<u8>> {
        self.get(&self.document_url(domain)).await
    }

    pub async fn fetch_latest_release(&self, repo: &str) -> Result<Release> {
        let body = self.get(&self.release_url(repo)).await?;
        let release: ReleaseResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::Fetch(format!("failed to parse release: {}", e)))?;

        let digest = release
            .body
            .as_deref()
            .and_then(parse_eif_hash)
            .ok_or_else(|| Error::Fetch(format!("release {} does not announce an EIF hash", release.tag_name)))?;

        Ok(Release {
            tag: release.tag_name,
            digest,
        })
    }
}

fn first_bundle(body: &[u8]) -> Result<Vec<u8>> {
    let response: AttestationResponse = serde_json::from_slice(body)
        .map_err(|e| Error::Fetch(format!("failed to parse attestation response: {}", e)))?;

    response
        .attestations
        .into_iter()
        .next()
        .map(|entry| entry.bundle.get().as_bytes().to_vec())
        .ok_or_else(|| Error::Fetch("no attestations found".into()))
}

/// Digest following the first `EIF hash: ` marker, lowercased.
fn parse_eif_hash(body: &str) -> Option<String> {
    body.match_indices(EIF_HASH_MARKER).find_map(|(at, marker)| {
        let candidate = body.get(at + marker.len()..at + marker.len() + 64)?;
        let boundary = body[at + marker.len() + 64..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_ascii_hexdigit());
        (boundary && candidate.bytes().all(|b| b.is_ascii_hexdigit())).then(|| candidate.to_ascii_lowercase())
    })
}

/// Fetch both inputs concurrently and run `orchestrator` over them.
///
/// Retrieval failures do not short-circuit: they are reported as transport
/// errors under their stage while the other side is still verified.
pub async fn verify_remote(
    orchestrator: VerificationOrchestrator,
    fetcher: &Fetcher,
    repo: &str,
    digest: &str,
    domain: &str,
) -> VerificationReport {
    let (bundle, document) = tokio::join!(
        fetcher.fetch_attestation_bundle(repo, digest),
        fetcher.fetch_attestation_document(domain),
    );
    orchestrator.run_fetched(digest, bundle, document, repo).await
}
