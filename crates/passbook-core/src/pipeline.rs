//! Pass generation pipeline.
//!
//! A run walks a fixed dependency graph:
//!
//! ```text
//! Validating -> AssemblingMetadata -> AssemblingAssets -> ComputingManifest
//!     -> { archive manifest.json || sign manifest } -> ArchivingSignature
//!     -> Finalizing -> Delivered
//! ```
//!
//! Validation happens in [`PipelineBuilder::build`], before any I/O. Every
//! later step is an awaited join; the first failure ends the run and is the
//! only error reported. The manifest is serialized exactly once and the same
//! buffer feeds both the archive and the signer.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::archive::{ArchiveAssembler, CompressionLevel};
use crate::assets::{resolve_assets, AssetSource, PausedAsset};
use crate::credentials::Credentials;
use crate::digest::{sha256_prefixed, DigestAccumulator};
use crate::error::{PassError, PassResult};
use crate::fields::{FieldSet, PassStyle};
use crate::signing::{OpensslSigner, SignatureService};
use crate::validate::validate_fields;

/// Pass metadata entry.
pub const PASS_JSON: &str = "pass.json";
/// Digest manifest entry.
pub const MANIFEST_JSON: &str = "manifest.json";
/// Detached signature entry.
pub const SIGNATURE: &str = "signature";

/// Chunks buffered between the run and a streaming consumer.
const STREAM_CAPACITY: usize = 4;

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Validating,
    AssemblingMetadata,
    AssemblingAssets,
    ComputingManifest,
    /// Manifest archiving and signing, joined.
    ArchivingManifestAndSigning,
    ArchivingSignature,
    Finalizing,
    Delivered,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

/// Collects run inputs; [`PipelineBuilder::build`] validates them.
pub struct PipelineBuilder {
    style: String,
    fields: FieldSet,
    images: Vec<(String, AssetSource)>,
    credentials: Credentials,
    signer: Option<Arc<dyn SignatureService>>,
    compression: CompressionLevel,
}

impl PipelineBuilder {
    pub fn new(style: impl Into<String>, fields: FieldSet) -> Self {
        Self {
            style: style.into(),
            fields,
            images: Vec::new(),
            credentials: Credentials::default(),
            signer: None,
            compression: CompressionLevel::default(),
        }
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Supply an image explicitly (buffer, path or stream). Wins over a field value.
    pub fn image(mut self, name: impl Into<String>, source: AssetSource) -> Self {
        self.images.push((name.into(), source));
        self
    }

    /// Replace the default `openssl` signer.
    pub fn signer(mut self, signer: Arc<dyn SignatureService>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn compression(mut self, level: CompressionLevel) -> Self {
        self.compression = level;
        self
    }

    /// Run every configuration check and resolve assets. Performs no I/O.
    pub fn build(self) -> PassResult<PassPipeline> {
        let PipelineBuilder {
            style,
            mut fields,
            images,
            credentials,
            signer,
            compression,
        } = self;

        let style: PassStyle = style.parse()?;
        fields.normalize_style(style)?;
        let assets = resolve_assets(&mut fields, images)?;
        validate_fields(&fields, style)?;
        credentials.validate()?;

        debug!(style = %style, assets = assets.len(), "pass validated");
        Ok(PassPipeline {
            style,
            fields,
            assets,
            credentials,
            signer: signer.unwrap_or_else(|| Arc::new(OpensslSigner::new())),
            archive: ArchiveAssembler::new(compression),
            digests: DigestAccumulator::new(),
            state: PipelineState::Validating,
        })
    }
}

impl std::fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("style", &self.style)
            .field("fields", &self.fields)
            .field("images", &self.images)
            .field("credentials", &self.credentials)
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

/// One validated pass generation. Consumed by either delivery mode.
pub struct PassPipeline {
    style: PassStyle,
    fields: FieldSet,
    assets: Vec<PausedAsset>,
    credentials: Credentials,
    signer: Arc<dyn SignatureService>,
    archive: ArchiveAssembler,
    digests: DigestAccumulator,
    state: PipelineState,
}

impl PassPipeline {
    pub fn builder(style: impl Into<String>, fields: FieldSet) -> PipelineBuilder {
        PipelineBuilder::new(style, fields)
    }

    pub fn style(&self) -> PassStyle {
        self.style
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Fields that will be written to `pass.json` (images already stripped).
    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    /// Archive entry names this run will produce, in write order.
    pub fn planned_entries(&self) -> Vec<String> {
        std::iter::once(PASS_JSON.to_string())
            .chain(self.assets.iter().map(|a| a.entry_name().to_string()))
            .chain([MANIFEST_JSON.to_string(), SIGNATURE.to_string()])
            .collect()
    }

    /// Generate the pass and return the whole archive.
    pub async fn run_to_completion(self) -> PassResult<Bytes> {
        self.execute().await
    }

    /// Generate the pass in a background task and relay the archive as it is written.
    ///
    /// Each entry's bytes are yielded once the entry is complete, so consumers
    /// see data while later entries (and the signature) are still in flight.
    /// On failure the last item is the error and the bytes before it are not a
    /// valid container. Must be called from within a tokio runtime.
    pub fn run_streaming(mut self) -> PassStream {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        self.archive.tap(tx.clone());
        tokio::spawn(async move {
            if let Err(e) = self.execute().await {
                if tx.send(Err(e)).await.is_err() {
                    debug!("pass stream consumer went away");
                }
            }
        });
        PassStream {
            inner: ReceiverStream::new(rx),
        }
    }

    async fn execute(mut self) -> PassResult<Bytes> {
        match self.generate().await {
            Ok(archive) => {
                self.transition(PipelineState::Delivered);
                info!(
                    style = %self.style,
                    serial = ?self.fields.get("serialNumber"),
                    entries = self.digests.len() + 2,
                    bytes = archive.len(),
                    sha256 = %sha256_prefixed(&archive),
                    "pass generated"
                );
                Ok(archive)
            }
            Err(e) => {
                warn!(state = ?self.state, class = %e.class(), error = %e, "pass generation failed");
                self.transition(PipelineState::Failed);
                Err(e)
            }
        }
    }

    async fn generate(&mut self) -> PassResult<Bytes> {
        self.transition(PipelineState::AssemblingMetadata);
        let pass_json = Bytes::from(self.fields.to_bytes()?);
        {
            let (archive, digests) = (&self.archive, &mut self.digests);
            tokio::try_join!(
                archive.add_entry(PASS_JSON, pass_json.clone()),
                async { digests.add_bytes(PASS_JSON, &pass_json) },
            )?;
        }

        self.transition(PipelineState::AssemblingAssets);
        for asset in std::mem::take(&mut self.assets) {
            let entry = asset.entry_name().to_string();
            // Both sinks must be attached before the first byte is read.
            let (attached, sinks) = asset.attach();
            let (archive, digests) = (&self.archive, &mut self.digests);
            tokio::try_join!(
                archive.add_stream(&entry, sinks.archive),
                digests.add_stream(&entry, sinks.digest),
                attached.release(),
            )?;
        }

        self.transition(PipelineState::ComputingManifest);
        let manifest = self.digests.manifest_bytes()?;

        self.transition(PipelineState::ArchivingManifestAndSigning);
        let ((), signature) = tokio::try_join!(
            self.archive.add_entry(MANIFEST_JSON, manifest.clone()),
            self.signer.sign(manifest.clone(), &self.credentials),
        )?;

        self.transition(PipelineState::ArchivingSignature);
        self.archive.add_entry(SIGNATURE, signature).await?;

        self.transition(PipelineState::Finalizing);
        self.archive.finalize().await
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(from = ?self.state, to = ?next, "pipeline transition");
        self.state = next;
    }
}

impl std::fmt::Debug for PassPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassPipeline")
            .field("style", &self.style)
            .field("assets", &self.assets)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Live archive bytes from [`PassPipeline::run_streaming`].
#[derive(Debug)]
pub struct PassStream {
    inner: ReceiverStream<PassResult<Bytes>>,
}

impl Stream for PassStream {
    type Item = PassResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
