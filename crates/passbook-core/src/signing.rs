//! Detached manifest signatures.
//!
//! The default [`SignatureService`] shells out to `openssl smime`. The payload
//! goes in on stdin; the signature is the base64 body found in the fourth
//! blank-line separated section of the S/MIME output. That framing is what
//! existing pass tooling produces and is kept byte-for-byte.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::credentials::Credentials;
use crate::error::{PassError, PassResult};

/// Environment variable the passphrase is handed to the child through.
const PASSIN_ENV: &str = "PASSBOOK_SIGNER_PASSPHRASE";

/// Zero-based index of the signature section in the S/MIME output.
const SIGNATURE_SECTION: usize = 3;

/// Produces a detached signature over an opaque payload.
#[async_trait]
pub trait SignatureService: Send + Sync {
    async fn sign(&self, payload: Bytes, credentials: &Credentials) -> PassResult<Bytes>;
}

/// Signs by running `openssl smime -sign -binary`.
#[derive(Debug, Clone)]
pub struct OpensslSigner {
    program: PathBuf,
}

impl Default for OpensslSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl OpensslSigner {
    /// Use `openssl` from `PATH`.
    pub fn new() -> Self {
        Self::with_program("openssl")
    }

    /// Use a specific openssl-compatible executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    fn args(credentials: &Credentials) -> PassResult<Vec<OsString>> {
        let signer = credentials.signer_cert_path()?;
        let ca = credentials.ca_cert_path()?;
        Ok(vec![
            "smime".into(),
            "-sign".into(),
            "-binary".into(),
            "-signer".into(),
            signer.as_os_str().to_owned(),
            "-certfile".into(),
            ca.as_os_str().to_owned(),
            "-passin".into(),
            format!("env:{PASSIN_ENV}").into(),
        ])
    }
}

#[async_trait]
impl SignatureService for OpensslSigner {
    async fn sign(&self, payload: Bytes, credentials: &Credentials) -> PassResult<Bytes> {
        let args = Self::args(credentials)?;
        let passphrase = credentials.passphrase()?;

        debug!(program = %self.program.display(), bytes = payload.len(), "spawning signer");
        let mut child = Command::new(&self.program)
            .args(&args)
            .env(PASSIN_ENV, passphrase)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PassError::signing(format!("failed to spawn {}: {e}", self.program.display()))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PassError::signing("signer stdin unavailable"))?;

        let feed = async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| PassError::signing(format!("waiting for signer: {e}")))?;

        // Any diagnostic output means the signature cannot be trusted.
        if !output.stderr.is_empty() {
            let message = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
            warn!(status = ?output.status.code(), "signer wrote to stderr");
            return Err(PassError::Signing { message });
        }
        if let Err(e) = fed {
            return Err(PassError::signing(format!("writing manifest to signer: {e}")));
        }
        if !output.status.success() {
            return Err(PassError::signing(format!(
                "signer exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let signature = extract_signature(&stdout)?;
        debug!(bytes = signature.len(), "manifest signed");
        Ok(signature)
    }
}

/// Pull the detached signature out of `openssl smime` text output.
pub fn extract_signature(output: &str) -> PassResult<Bytes> {
    let section = output
        .split("\n\n")
        .nth(SIGNATURE_SECTION)
        .ok_or_else(|| PassError::signing("signer output has no signature section"))?;

    let body: String = section.chars().filter(|c| !c.is_whitespace()).collect();
    if body.is_empty() {
        return Err(PassError::signing("signer output has an empty signature section"));
    }

    BASE64
        .decode(body.as_bytes())
        .map(Bytes::from)
        .map_err(|e| PassError::signing(format!("signature is not valid base64: {e}")))
}
