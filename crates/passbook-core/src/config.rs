//! Generator configuration.
//!
//! Precedence, lowest first: defaults, YAML file, environment, explicit
//! overrides applied by the caller (CLI flags).
//!
//! ```yaml
//! credentials:
//!   signer_cert: certs/pass.pem
//!   ca_cert: certs/wwdr.pem
//! openssl: /usr/local/bin/openssl
//! compression_level: 1
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::archive::CompressionLevel;
use crate::credentials::Credentials;
use crate::error::{PassError, PassResult};
use crate::signing::OpensslSigner;

/// Settings shared by every generated pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PassbookConfig {
    #[serde(default)]
    pub credentials: Credentials,

    /// Signer executable.
    #[serde(default = "default_openssl")]
    pub openssl: PathBuf,

    /// Deflate level 0-9.
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
}

fn default_openssl() -> PathBuf {
    PathBuf::from("openssl")
}

fn default_compression_level() -> u32 {
    CompressionLevel::default().level()
}

impl Default for PassbookConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            openssl: default_openssl(),
            compression_level: default_compression_level(),
        }
    }
}

impl PassbookConfig {
    /// Defaults overlaid with the environment.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `PASSBOOK_SIGNER_CERT` | Signer certificate + key (PEM) |
    /// | `PASSBOOK_CA_CERT` | CA certificate (PEM) |
    /// | `PASSBOOK_CERT_PASSPHRASE` | Signer key passphrase |
    /// | `PASSBOOK_OPENSSL` | openssl executable |
    /// | `PASSBOOK_COMPRESSION` | Deflate level 0-9 |
    pub fn from_env() -> PassResult<Self> {
        Self::default().with_env_overrides()
    }

    /// Load a YAML config file.
    pub async fn load(path: impl AsRef<Path>) -> PassResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PassError::Config {
                message: format!("failed to read {}: {}", path.display(), e),
            })?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parse YAML content.
    pub fn parse(content: &str) -> PassResult<Self> {
        let config: PassbookConfig =
            serde_yaml::from_str(content).map_err(|e| PassError::Config {
                message: format!("failed to parse config: {}", e),
            })?;
        if config.compression_level > 9 {
            return Err(PassError::Config {
                message: format!(
                    "compression_level must be 0-9, got {}",
                    config.compression_level
                ),
            });
        }
        Ok(config)
    }

    /// Apply environment variables on top of the current values.
    pub fn with_env_overrides(self) -> PassResult<Self> {
        self.apply(|key| std::env::var(key).ok())
    }

    fn apply(mut self, lookup: impl Fn(&str) -> Option<String>) -> PassResult<Self> {
        self.credentials = Credentials::from_lookup(&lookup).or(self.credentials);
        if let Some(program) = lookup("PASSBOOK_OPENSSL") {
            self.openssl = PathBuf::from(program);
        }
        if let Some(level) = lookup("PASSBOOK_COMPRESSION") {
            self.compression_level = level
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|l| *l <= 9)
                .ok_or_else(|| PassError::Config {
                    message: format!("PASSBOOK_COMPRESSION must be 0-9, got {level:?}"),
                })?;
        }
        Ok(self)
    }

    /// Explicit values win over whatever is configured.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials.or(self.credentials);
        self
    }

    pub fn signer(&self) -> OpensslSigner {
        OpensslSigner::with_program(&self.openssl)
    }

    pub fn compression(&self) -> CompressionLevel {
        CompressionLevel::new(self.compression_level)
    }
}
