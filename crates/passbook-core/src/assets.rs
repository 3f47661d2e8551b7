//! Image asset resolution and the attach-then-release stream handoff.
//!
//! Assets arrive as JSON field values (paths) or explicit [`AssetSource`]s.
//! Resolution turns them into [`PausedAsset`]s: nothing is read until both the
//! archive sink and the digest sink are attached and the asset is released.
//!
//! ```text
//! PausedAsset --attach()--> (AttachedAsset, AssetSinks { archive, digest })
//! AttachedAsset --release()--> pumps chunks into both sinks, then closes them
//! ```

use std::fmt;
use std::path::PathBuf;

use bytes::{Bytes, BytesMut};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{PassError, PassResult};
use crate::fields::{image_entry_name, image_names, is_image_name, json_type, FieldSet};

/// Read size per chunk when pumping files and streams.
const CHUNK_SIZE: usize = 16 * 1024;

/// Chunks buffered per sink before the pump waits for the consumer.
const SINK_CAPACITY: usize = 8;

/// Where an asset's bytes come from.
pub enum AssetSource {
    /// In-memory content.
    Buffer(Bytes),
    /// Filesystem path, opened lazily on release.
    Path(PathBuf),
    /// Any async byte stream.
    Stream(Box<dyn AsyncRead + Send + Unpin>),
}

impl AssetSource {
    pub fn buffer(bytes: impl Into<Bytes>) -> Self {
        Self::Buffer(bytes.into())
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    pub fn stream(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Stream(Box::new(reader))
    }

    /// Classify a raw image field value. Only strings (paths) are valid JSON assets.
    pub fn from_field(field: &str, value: Value) -> PassResult<Self> {
        match value {
            Value::String(path) => Ok(Self::Path(PathBuf::from(path))),
            other => Err(PassError::InvalidAssetType {
                field: field.to_string(),
                actual: json_type(&other).to_string(),
            }),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Path(_) => "path",
            Self::Stream(_) => "stream",
        }
    }
}

impl fmt::Debug for AssetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(bytes) => f.debug_tuple("Buffer").field(&bytes.len()).finish(),
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Resolve every image into a paused asset, removing image keys from `fields`.
///
/// Explicit sources win over field values for the same image name; `null` and
/// empty-string field values mean "no image". Assets are
/// returned in vocabulary order (base images, then high-resolution variants).
pub fn resolve_assets(
    fields: &mut FieldSet,
    explicit: Vec<(String, AssetSource)>,
) -> PassResult<Vec<PausedAsset>> {
    let mut explicit_sources: Vec<(String, AssetSource)> = Vec::with_capacity(explicit.len());
    for (name, source) in explicit {
        if !is_image_name(&name) {
            return Err(PassError::UnknownImage { name });
        }
        if explicit_sources.iter().any(|(existing, _)| *existing == name) {
            return Err(PassError::DuplicateEntry {
                name: image_entry_name(&name),
            });
        }
        explicit_sources.push((name, source));
    }

    let mut assets = Vec::new();
    for name in image_names() {
        let field_value = fields.remove(&name);

        let position = explicit_sources
            .iter()
            .position(|(existing, _)| *existing == name);
        let explicit_source = position.map(|idx| explicit_sources.swap_remove(idx).1);

        let source = match (explicit_source, field_value) {
            (Some(source), _) => source,
            (None, None | Some(Value::Null)) => continue,
            (None, Some(Value::String(path))) if path.is_empty() => continue,
            (None, Some(value)) => AssetSource::from_field(&name, value)?,
        };

        debug!(image = %name, kind = source.kind(), "resolved image asset");
        assets.push(PausedAsset::new(name, source));
    }

    Ok(assets)
}

/// An asset that has not produced any bytes yet.
#[derive(Debug)]
pub struct PausedAsset {
    name: String,
    entry_name: String,
    source: AssetSource,
}

/// Receiving ends of an attached asset.
#[derive(Debug)]
pub struct AssetSinks {
    pub archive: mpsc::Receiver<Bytes>,
    pub digest: mpsc::Receiver<Bytes>,
}

/// An asset whose sinks are wired up; bytes flow on [`AttachedAsset::release`].
#[derive(Debug)]
pub struct AttachedAsset {
    name: String,
    source: AssetSource,
    archive: mpsc::Sender<Bytes>,
    digest: mpsc::Sender<Bytes>,
}

impl PausedAsset {
    pub fn new(name: impl Into<String>, source: AssetSource) -> Self {
        let name = name.into();
        let entry_name = image_entry_name(&name);
        Self {
            name,
            entry_name,
            source,
        }
    }

    /// Image key, e.g. `icon2x`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Archive entry name, e.g. `icon@2x.png`.
    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    /// Wire both sinks. No bytes are read until the returned asset is released.
    pub fn attach(self) -> (AttachedAsset, AssetSinks) {
        let (archive_tx, archive_rx) = mpsc::channel(SINK_CAPACITY);
        let (digest_tx, digest_rx) = mpsc::channel(SINK_CAPACITY);
        (
            AttachedAsset {
                name: self.name,
                source: self.source,
                archive: archive_tx,
                digest: digest_tx,
            },
            AssetSinks {
                archive: archive_rx,
                digest: digest_rx,
            },
        )
    }
}

impl AttachedAsset {
    /// Pump the asset into both sinks and close them. Returns the byte count.
    pub async fn release(self) -> PassResult<u64> {
        let AttachedAsset {
            name,
            source,
            archive,
            digest,
        } = self;

        let total = match source {
            AssetSource::Buffer(bytes) => {
                let len = bytes.len() as u64;
                forward(&name, &archive, &digest, bytes).await?;
                len
            }
            AssetSource::Path(path) => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|source| PassError::AssetIo {
                        name: name.clone(),
                        path: Some(path.clone()),
                        source,
                    })?;
                pump(&name, Some(path), file, &archive, &digest).await?
            }
            AssetSource::Stream(reader) => pump(&name, None, reader, &archive, &digest).await?,
        };

        debug!(image = %name, bytes = total, "asset drained");
        Ok(total)
    }
}

async fn pump<R: AsyncRead + Unpin>(
    name: &str,
    path: Option<PathBuf>,
    mut reader: R,
    archive: &mpsc::Sender<Bytes>,
    digest: &mpsc::Sender<Bytes>,
) -> PassResult<u64> {
    let mut total = 0u64;
    loop {
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        let n = reader
            .read_buf(&mut buf)
            .await
            .map_err(|source| PassError::AssetIo {
                name: name.to_string(),
                path: path.clone(),
                source,
            })?;
        if n == 0 {
            break;
        }
        total += n as u64;
        forward(name, archive, digest, buf.freeze()).await?;
    }
    Ok(total)
}

async fn forward(
    name: &str,
    archive: &mpsc::Sender<Bytes>,
    digest: &mpsc::Sender<Bytes>,
    chunk: Bytes,
) -> PassResult<()> {
    let (a, d) = tokio::join!(archive.send(chunk.clone()), digest.send(chunk));
    if a.is_err() || d.is_err() {
        return Err(PassError::assembly(format!(
            "sink for {name} closed before the asset was drained"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn drain(mut rx: mpsc::Receiver<Bytes>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[test]
    fn resolves_paths_and_strips_image_fields() {
        let mut fields = FieldSet::new()
            .with("description", "x")
            .with("icon", "/tmp/icon.png")
            .with("logo2x", "/tmp/logo@2x.png");

        let assets = resolve_assets(&mut fields, Vec::new()).unwrap();
        let names: Vec<&str> = assets.iter().map(PausedAsset::entry_name).collect();
        assert_eq!(names, ["icon.png", "logo@2x.png"]);
        assert!(!fields.contains_key("icon"));
        assert!(!fields.contains_key("logo2x"));
        assert!(fields.contains_key("description"));
    }

    #[test]
    fn empty_image_values_are_skipped() {
        let mut fields = FieldSet::new()
            .with("icon", "")
            .with("logo", json!(null))
            .with("strip", "/tmp/strip.png");

        let assets = resolve_assets(&mut fields, Vec::new()).unwrap();
        let names: Vec<&str> = assets.iter().map(PausedAsset::entry_name).collect();
        assert_eq!(names, ["strip.png"]);
        assert!(!fields.contains_key("icon"));
        assert!(!fields.contains_key("logo"));
    }

    #[test]
    fn non_string_image_value_is_rejected() {
        let mut fields = FieldSet::new().with("icon", json!(42));
        let err = resolve_assets(&mut fields, Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "icon cannot be number");
    }

    #[test]
    fn explicit_source_overrides_field_value() {
        let mut fields = FieldSet::new().with("icon", json!({"not": "valid"}));
        let assets = resolve_assets(
            &mut fields,
            vec![("icon".into(), AssetSource::buffer(&b"png"[..]))],
        )
        .unwrap();
        assert_eq!(assets.len(), 1);
        assert!(matches!(assets[0].source, AssetSource::Buffer(_)));
        assert!(!fields.contains_key("icon"));
    }

    #[test]
    fn unknown_and_duplicate_explicit_images_rejected() {
        let err = resolve_assets(
            &mut FieldSet::new(),
            vec![("banner".into(), AssetSource::buffer(&b"x"[..]))],
        )
        .unwrap_err();
        assert!(matches!(err, PassError::UnknownImage { .. }));

        let err = resolve_assets(
            &mut FieldSet::new(),
            vec![
                ("icon".into(), AssetSource::buffer(&b"a"[..])),
                ("icon".into(), AssetSource::buffer(&b"b"[..])),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, PassError::DuplicateEntry { name } if name == "icon.png"));
    }

    #[tokio::test]
    async fn nothing_flows_before_release() {
        let asset = PausedAsset::new("icon", AssetSource::buffer(&b"png-bytes"[..]));
        let (attached, mut sinks) = asset.attach();
        assert!(sinks.archive.try_recv().is_err());
        assert!(sinks.digest.try_recv().is_err());

        let (released, archived, digested) =
            tokio::join!(attached.release(), drain(sinks.archive), drain(sinks.digest));
        assert_eq!(released.unwrap(), 9);
        assert_eq!(archived, b"png-bytes");
        assert_eq!(digested, b"png-bytes");
    }

    #[tokio::test]
    async fn stream_source_is_fanned_out_in_chunks() {
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let asset = PausedAsset::new(
            "strip",
            AssetSource::stream(std::io::Cursor::new(payload.clone())),
        );
        let (attached, sinks) = asset.attach();

        let (released, archived, digested) =
            tokio::join!(attached.release(), drain(sinks.archive), drain(sinks.digest));
        assert_eq!(released.unwrap(), payload.len() as u64);
        assert_eq!(archived, payload);
        assert_eq!(digested, payload);
    }

    #[tokio::test]
    async fn missing_file_surfaces_on_release() {
        let asset = PausedAsset::new("icon", AssetSource::path("/definitely/not/here.png"));
        let (attached, sinks) = asset.attach();
        drop(sinks);
        let err = attached.release().await.unwrap_err();
        assert!(matches!(err, PassError::AssetIo { name, .. } if name == "icon"));
    }
}
