//! Per-entry content digests backing `manifest.json`.
//!
//! The verifier on the device expects lowercase hex SHA-1 over the raw entry
//! bytes. The algorithm is part of the wire format and must not change.

use std::collections::BTreeMap;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{PassError, PassResult};

/// Hex SHA-1 of an in-memory buffer.
pub fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}

/// `sha256:<hex>` fingerprint of a finished archive. Informational only.
pub fn sha256_prefixed(bytes: &[u8]) -> String {
    let hash = <sha2::Sha256 as sha2::Digest>::digest(bytes);
    format!("sha256:{}", hex::encode(hash))
}

/// Accumulates `entry name -> digest` for one pipeline run.
#[derive(Debug, Default)]
pub struct DigestAccumulator {
    hashes: BTreeMap<String, String>,
}

impl DigestAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Digest a complete buffer.
    pub fn add_bytes(&mut self, name: &str, content: &[u8]) -> PassResult<String> {
        self.ensure_new(name)?;
        let digest = sha1_hex(content);
        self.record(name, digest.clone(), content.len() as u64);
        Ok(digest)
    }

    /// Digest a chunk stream. Completes only after the sender side has closed.
    pub async fn add_stream(
        &mut self,
        name: &str,
        mut chunks: mpsc::Receiver<Bytes>,
    ) -> PassResult<String> {
        self.ensure_new(name)?;

        let mut hasher = Sha1::new();
        let mut total = 0u64;
        while let Some(chunk) = chunks.recv().await {
            total += chunk.len() as u64;
            hasher.update(&chunk);
        }

        let digest = hex::encode(hasher.finalize());
        self.record(name, digest.clone(), total);
        Ok(digest)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.hashes.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Serialize the manifest. Call once per run and share the result.
    pub fn manifest_bytes(&self) -> PassResult<Bytes> {
        serde_json::to_vec(&self.hashes)
            .map(Bytes::from)
            .map_err(|e| PassError::assembly(format!("serializing manifest: {e}")))
    }

    pub fn into_manifest(self) -> BTreeMap<String, String> {
        self.hashes
    }

    fn ensure_new(&self, name: &str) -> PassResult<()> {
        if self.hashes.contains_key(name) {
            return Err(PassError::DuplicateEntry {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn record(&mut self, name: &str, digest: String, bytes: u64) {
        debug!(entry = name, digest = %digest, bytes, "digested entry");
        self.hashes.insert(name.to_string(), digest);
    }
}
