//! Signing credential bundle.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PassError, PassResult};

/// Signer certificate, CA (WWDR) certificate and key passphrase.
///
/// The signer PEM holds both the pass certificate and its encrypted private key.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Pass signing certificate + key (PEM).
    #[serde(default)]
    pub signer_cert: Option<PathBuf>,

    /// Intermediate CA certificate (PEM).
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,

    /// Passphrase for the signer key.
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl Credentials {
    pub fn new(
        signer_cert: impl Into<PathBuf>,
        ca_cert: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            signer_cert: Some(signer_cert.into()),
            ca_cert: Some(ca_cert.into()),
            passphrase: Some(passphrase.into()),
        }
    }

    /// Read credentials from the environment.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `PASSBOOK_SIGNER_CERT` | Signer certificate + key (PEM) |
    /// | `PASSBOOK_CA_CERT` | CA certificate (PEM) |
    /// | `PASSBOOK_CERT_PASSPHRASE` | Signer key passphrase |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            signer_cert: lookup("PASSBOOK_SIGNER_CERT").map(PathBuf::from),
            ca_cert: lookup("PASSBOOK_CA_CERT").map(PathBuf::from),
            passphrase: lookup("PASSBOOK_CERT_PASSPHRASE"),
        }
    }

    /// Fill any unset value from `other`.
    pub fn or(self, other: Credentials) -> Self {
        Self {
            signer_cert: self.signer_cert.or(other.signer_cert),
            ca_cert: self.ca_cert.or(other.ca_cert),
            passphrase: self.passphrase.or(other.passphrase),
        }
    }

    /// All three parts must be present and non-empty.
    pub fn validate(&self) -> PassResult<()> {
        self.signer_cert_path()?;
        self.ca_cert_path()?;
        self.passphrase()?;
        Ok(())
    }

    pub fn signer_cert_path(&self) -> PassResult<&Path> {
        non_empty_path(self.signer_cert.as_deref(), "signer certificate")
    }

    pub fn ca_cert_path(&self) -> PassResult<&Path> {
        non_empty_path(self.ca_cert.as_deref(), "CA certificate")
    }

    pub fn passphrase(&self) -> PassResult<&str> {
        match self.passphrase.as_deref() {
            Some(p) if !p.is_empty() => Ok(p),
            _ => Err(PassError::InvalidCredentials {
                reason: "no passphrase given".into(),
            }),
        }
    }
}

fn non_empty_path<'a>(path: Option<&'a Path>, what: &str) -> PassResult<&'a Path> {
    match path {
        Some(p) if !p.as_os_str().is_empty() => Ok(p),
        _ => Err(PassError::InvalidCredentials {
            reason: format!("no {what} given"),
        }),
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("signer_cert", &self.signer_cert)
            .field("ca_cert", &self.ca_cert)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
