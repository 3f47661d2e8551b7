//! Signed pass bundle generation.
//!
//! This crate builds `.pkpass` archives, providing:
//!
//! - Field validation and style normalization
//! - A SHA-1 digest manifest over every archived file
//! - Zip assembly with streamed image assets
//! - Detached manifest signatures via `openssl smime`
//! - Whole-buffer or streaming delivery of the finished archive
//!
//! # Quick Start
//!
//! ```no_run
//! use passbook_core::{AssetSource, Credentials, FieldSet, PassPipeline};
//! use serde_json::json;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let fields = FieldSet::from_value(json!({
//!     "description": "Boarding pass",
//!     "formatVersion": 1,
//!     "organizationName": "Skyways",
//!     "passTypeIdentifier": "pass.com.skyways.boarding",
//!     "serialNumber": "SK-0001",
//!     "teamIdentifier": "A1B2C3D4E5",
//!     "structure": {"transitType": "PKTransitTypeAir"}
//! }))?;
//!
//! let archive = PassPipeline::builder("boardingPass", fields)
//!     .credentials(Credentials::new("certs/pass.pem", "certs/wwdr.pem", "secret"))
//!     .image("icon", AssetSource::path("images/icon.png"))
//!     .build()?
//!     .run_to_completion()
//!     .await?;
//! std::fs::write("boarding.pkpass", &archive)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `PASSBOOK_SIGNER_CERT` | Signer certificate + key (PEM) |
//! | `PASSBOOK_CA_CERT` | CA certificate (PEM) |
//! | `PASSBOOK_CERT_PASSPHRASE` | Signer key passphrase |
//! | `PASSBOOK_OPENSSL` | openssl executable (default: `openssl`) |
//! | `PASSBOOK_COMPRESSION` | Deflate level 0-9 (default: 1) |

pub mod archive;
pub mod assets;
pub mod config;
pub mod credentials;
pub mod digest;
pub mod error;
pub mod fields;
pub mod pipeline;
pub mod signing;
pub mod template;
mod validate;
pub mod verify;

pub use archive::{ArchiveAssembler, CompressionLevel};
pub use assets::{resolve_assets, AssetSource, PausedAsset};
pub use config::PassbookConfig;
pub use credentials::Credentials;
pub use digest::{sha1_hex, sha256_prefixed, DigestAccumulator};
pub use error::{ErrorClass, PassError, PassResult};
pub use fields::{FieldSet, PassStyle};
pub use pipeline::{PassPipeline, PassStream, PipelineBuilder, PipelineState};
pub use signing::{extract_signature, OpensslSigner, SignatureService};
pub use template::PassTemplate;
pub use validate::validate_fields;
pub use verify::{verify_archive, DigestMismatch, VerifyReport};
