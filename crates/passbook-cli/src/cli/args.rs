use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "passbook",
    version,
    about = "Build, sign and check .pkpass bundles"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build and sign a pass archive
    Generate(GenerateArgs),
    /// Check a field set without touching assets or signing
    Validate(ValidateArgs),
    /// Re-hash an archive's entries against its manifest
    Verify(VerifyArgs),
    Version,
}

#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Pass style (boardingPass, coupon, eventTicket, storeCard, generic)
    #[arg(long)]
    pub style: String,

    /// JSON file with the pass fields
    #[arg(long)]
    pub fields: PathBuf,

    /// Image asset as NAME=PATH, e.g. icon=images/icon.png (repeatable)
    #[arg(long = "image", value_name = "NAME=PATH", value_parser = parse_image)]
    pub images: Vec<(String, PathBuf)>,

    /// YAML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Signer certificate + key (PEM)
    #[arg(long)]
    pub signer_cert: Option<PathBuf>,

    /// CA certificate (PEM)
    #[arg(long)]
    pub ca_cert: Option<PathBuf>,

    /// Signer key passphrase (prefer PASSBOOK_CERT_PASSPHRASE)
    #[arg(long)]
    pub passphrase: Option<String>,

    /// openssl executable
    #[arg(long)]
    pub openssl: Option<PathBuf>,

    /// Deflate level 0-9
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=9))]
    pub compression: Option<u32>,

    /// Set relevantDate (RFC 3339)
    #[arg(long, value_parser = parse_date)]
    pub relevant_date: Option<DateTime<Utc>>,

    /// Output path, or `-` to stream to stdout
    #[arg(long, short)]
    pub output: PathBuf,
}

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    #[arg(long)]
    pub style: String,

    #[arg(long)]
    pub fields: PathBuf,
}

#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// .pkpass archive to check
    pub archive: PathBuf,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_image(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected NAME=PATH, got {raw:?}")),
    }
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 date {raw:?}: {e}"))
}
