//! DTE CLI - command-line front end for electronic tax documents
//!
//! Inspects and validates folio authorizations, signs and verifies XML
//! documents, and queries the tax authority for submission status.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use dte_client::config::ENVIRONMENT_ENV_VAR;
use dte_client::{ClientConfig, DteClient, Environment};
use dte_core::{Certificate, CertificateIdentity, FolioAuthorization, Rut, XmlDocument};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dte")]
#[command(about = "Sign, check and track electronic tax documents", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to $DTE_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Folio authorization (CAF) commands
    #[command(subcommand)]
    Caf(CafCommands),

    /// Sign an XML document
    Sign {
        /// Document to sign
        input: PathBuf,

        /// Signer certificate (PEM)
        #[arg(long)]
        cert: PathBuf,

        /// Signer private key (PEM)
        #[arg(long)]
        key: PathBuf,

        /// `ID` of the element to sign; the whole document if omitted
        #[arg(short, long)]
        reference: Option<String>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Verify the signature of an XML document
    Verify {
        /// Signed document
        input: PathBuf,

        /// `ID` of the signed element; the whole document if omitted
        #[arg(short, long)]
        reference: Option<String>,
    },

    /// Query the status of an uploaded submission
    Status {
        /// Tracking id returned by the upload
        track_id: u64,

        /// Company taxpayer id (e.g. 76192083-9)
        #[arg(long)]
        company: String,

        /// Signer certificate (PEM)
        #[arg(long)]
        cert: PathBuf,

        /// Signer private key (PEM)
        #[arg(long)]
        key: PathBuf,

        /// Also ask for the detailed report by email
        #[arg(long)]
        email: bool,
    },

    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum CafCommands {
    /// Show the contents of a CAF file
    Inspect {
        file: PathBuf,
    },

    /// Check the authority signature and the embedded key pair
    Validate {
        file: PathBuf,

        /// Directory of authority certificates (overrides configuration)
        #[arg(long)]
        authority_dir: Option<PathBuf>,
    },

    /// Check that a folio can be stamped with this CAF today
    Check {
        file: PathBuf,

        folio: u64,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dte=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().or_else(ClientConfig::default_path);
    let config = load_config(config_path.as_deref())?;

    match cli.command {
        Commands::Caf(cmd) => handle_caf_command(cmd, &config),
        Commands::Sign {
            input,
            cert,
            key,
            reference,
            output,
        } => handle_sign(&input, &cert, &key, reference.as_deref(), output.as_deref()),
        Commands::Verify { input, reference } => handle_verify(&input, reference.as_deref()),
        Commands::Status {
            track_id,
            company,
            cert,
            key,
            email,
        } => handle_status(config, track_id, &company, &cert, &key, email).await,
        Commands::Config(cmd) => handle_config_command(cmd, &config, config_path.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    let mut config = ClientConfig::load_or_default(path)
        .with_context(|| format!("loading configuration from {:?}", path))?;
    if let Ok(environment) = std::env::var(ENVIRONMENT_ENV_VAR) {
        config.environment = environment.parse::<Environment>()?;
    }
    debug!(environment = %config.environment, "configuration loaded");
    Ok(config)
}

fn load_certificate(cert: &Path, key: &Path) -> Result<Certificate> {
    let cert_pem = fs::read_to_string(cert).with_context(|| format!("reading {}", cert.display()))?;
    let key_pem = fs::read_to_string(key).with_context(|| format!("reading {}", key.display()))?;
    Ok(Certificate::from_pem(&cert_pem, &key_pem)?)
}

fn load_caf(file: &Path) -> Result<FolioAuthorization> {
    let bytes = fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    Ok(FolioAuthorization::load(&bytes)?)
}

fn handle_caf_command(cmd: CafCommands, config: &ClientConfig) -> Result<()> {
    match cmd {
        CafCommands::Inspect { file } => {
            let caf = load_caf(&file)?;
            let (low, high) = caf.range();
            let now = Utc::now();

            println!("Folio Authorization:");
            println!("  Issuer: {} ({})", caf.issuer(), caf.company_name());
            println!(
                "  Document Type: {} ({})",
                caf.document_type(),
                dte_core::types::document_type_name(caf.document_type()).unwrap_or("unknown")
            );
            println!("  Folios: {}-{}", low, high);
            println!("  Issued: {}", caf.issued_on());
            println!("  Authority Key: {}", caf.key_id());
            match caf.environment() {
                Some(environment) => println!("  Environment: {}", environment),
                None => println!("  Environment: unknown"),
            }
            println!("  Expiry: {}", caf.expiry().status_message(now));
        }

        CafCommands::Validate {
            file,
            authority_dir,
        } => {
            let caf = load_caf(&file)?;
            let mut config = config.clone();
            if authority_dir.is_some() {
                config.authority_certs_dir = authority_dir;
            }
            let keyring = config.load_authority_keyring()?;
            caf.validate(&keyring)?;

            if caf.is_synthetic() {
                println!("✓ Key pair OK (synthetic authorization, authority signature not checked)");
            } else {
                println!("✓ Authority signature and key pair OK (key id {})", caf.key_id());
            }
        }

        CafCommands::Check { file, folio } => {
            let caf = load_caf(&file)?;
            caf.check_folio(caf.document_type(), folio)?;
            caf.check_valid(None)?;
            println!("✓ Folio {} can be stamped", folio);
            if caf.expiry().is_warning_period(Utc::now()) {
                println!("\n⚠️  WARNING: {}", caf.expiry().status_message(Utc::now()));
            }
        }
    }
    Ok(())
}

fn handle_sign(
    input: &Path,
    cert: &Path,
    key: &Path,
    reference: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let certificate = load_certificate(cert, key)?;
    let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let mut document = XmlDocument::from_bytes(&bytes)?;
    dte_core::sign(&mut document, reference, &certificate)?;

    let signed = document.to_bytes();
    match output {
        Some(path) => {
            fs::write(path, &signed)?;
            info!(output = %path.display(), "document signed");
            println!("✓ Signed {} -> {}", input.display(), path.display());
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&signed)?;
        }
    }
    Ok(())
}

fn handle_verify(input: &Path, reference: Option<&str>) -> Result<()> {
    let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let document = XmlDocument::from_bytes(&bytes)?;
    let verified = dte_core::verify_detailed(&document, reference)?;

    println!("✓ Signature valid");
    if let Some(der) = verified.certificate_der {
        let identity = CertificateIdentity::from_der(&der)?;
        println!("  Signer: {} ({})", identity.holder_name, identity.holder_id);
        println!("  Issuer: {}", identity.issuer);
        println!("  Valid: {} to {}", identity.not_before, identity.not_after);
    }
    Ok(())
}

async fn handle_status(
    config: ClientConfig,
    track_id: u64,
    company: &str,
    cert: &Path,
    key: &Path,
    email: bool,
) -> Result<()> {
    let company: Rut = company.parse()?;
    let certificate = load_certificate(cert, key)?;
    let client = DteClient::with_http(config)?;

    let status = client.poll_status(&certificate, track_id, &company).await?;
    println!("Submission {}:", track_id);
    println!("  Status: {} - {}", status.code, status.description);
    if let Some(message) = &status.remote_message {
        println!("  Message: {}", message);
    }
    for counts in &status.counts {
        println!(
            "  Type {}: reported {}, accepted {}, rejected {}, flagged {}",
            counts
                .document_type
                .map(|t| t.to_string())
                .unwrap_or_else(|| "?".into()),
            counts.reported,
            counts.accepted,
            counts.rejected,
            counts.flagged
        );
    }
    if status.is_terminal() {
        println!("  Result: {}", status.summary());
    } else {
        println!("  Still in progress; poll again later");
    }

    if email {
        let reply = client
            .request_status_by_email(&certificate, track_id, &company)
            .await?;
        println!("  Email report: {}", reply.description);
    }
    Ok(())
}

fn handle_config_command(
    cmd: ConfigCommands,
    config: &ClientConfig,
    path: Option<&Path>,
) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigCommands::Init { force } => {
            let path = path.context("no configuration path available")?;
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            ClientConfig::default().save(path)?;
            println!("✓ Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}
