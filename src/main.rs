use std::path::PathBuf;

use clap::Parser;
use log::info;
use time::format_description::well_known::Rfc3339;

use tinfoil_verifier::attestation::types::RegisterIndex;
use tinfoil_verifier::config::Config;
use tinfoil_verifier::fetch::Fetcher;
use tinfoil_verifier::verifier::VerificationReport;

#[derive(Parser, Clone)]
#[command(about = "Verify that an AWS Nitro enclave runs the code a GitHub release attests to")]
struct Cli {
    #[arg(long, help = "GitHub repository (owner/name) the enclave image is built from")]
    repo: String,
    #[arg(long, help = "SHA-256 digest of the enclave image; defaults to the latest release's EIF hash")]
    digest: Option<String>,
    #[arg(
        long,
        help = "Enclave domain to fetch the attestation document from",
        required_unless_present = "attestation_file",
        conflicts_with = "attestation_file"
    )]
    domain: Option<String>,
    #[arg(long, help = "Read the attestation document from a file instead of the enclave")]
    attestation_file: Option<PathBuf>,
    #[arg(long, help = "Read the Sigstore bundle from a file instead of the GitHub API")]
    bundle_file: Option<PathBuf>,
    #[arg(long, help = "Path to a JSON configuration file")]
    config: Option<PathBuf>,
    #[arg(long, help = "Path to the Sigstore trusted_root.json; overrides the configuration")]
    trusted_root: Option<PathBuf>,
    #[arg(long, value_delimiter = ',', help = "Registers to compare, e.g. 0,1,2; overrides the configuration")]
    registers: Option<Vec<RegisterIndex>>,
    #[arg(long, help = "Print the result as JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(path) = cli.trusted_root.clone() {
        config.sigstore_trusted_root = Some(path);
    }
    if let Some(registers) = cli.registers.clone() {
        anyhow::ensure!(!registers.is_empty(), "--registers must name at least one register");
        config.registers = registers;
    }

    let fetcher = Fetcher::new(&config)?;
    let orchestrator = config.orchestrator()?;

    let digest = match cli.digest.clone() {
        Some(digest) => digest,
        None => {
            let release = fetcher.fetch_latest_release(&cli.repo).await?;
            info!("Latest release of {} is {} with digest {}", cli.repo, release.tag, release.digest);
            release.digest
        }
    };

    let bundle = async {
        match &cli.bundle_file {
            Some(path) => std::fs::read(path).map_err(tinfoil_verifier::Error::from),
            None => fetcher.fetch_attestation_bundle(&cli.repo, &digest).await,
        }
    };
    let document = async {
        match (&cli.attestation_file, &cli.domain) {
            (Some(path), _) => std::fs::read(path).map_err(tinfoil_verifier::Error::from),
            (None, Some(domain)) => fetcher.fetch_attestation_document(domain).await,
            (None, None) => Err(tinfoil_verifier::Error::Config("no attestation source".into())),
        }
    };
    let (bundle, document) = tokio::join!(bundle, document);

    let report = orchestrator.run_fetched(&digest, bundle, document, &cli.repo).await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report.result)?);
    } else {
        print_report(&report)?;
    }

    if !report.result.success() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(report: &VerificationReport) -> anyhow::Result<()> {
    for event in &report.events {
        println!("{} [{}] {}", event.timestamp.format(&Rfc3339)?, event.stage, event.message);
    }
    for error in report.result.errors() {
        eprintln!("error: {} ({:?}): {}", error.stage, error.kind, error.message);
    }
    Ok(())
}
