//! Zip assembly for `.pkpass` bundles.
//!
//! Entries are written one at a time under a lock, so callers may submit
//! several `add_*` calls concurrently and every entry still lands in the
//! container exactly once and unbroken. Timestamps are pinned to the zip epoch
//! so identical inputs produce identical entries.
//!
//! With a tap installed, the bytes of each entry are relayed as soon as the
//! zip writer has patched its local header, and the central directory follows
//! on [`ArchiveAssembler::finalize`].

use std::collections::BTreeSet;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{PassError, PassResult};

/// Deflate level for pass archives.
///
/// # Examples
///
/// ```
/// use passbook_core::archive::CompressionLevel;
///
/// assert_eq!(CompressionLevel::default().level(), 1);
/// assert_eq!(CompressionLevel::new(42).level(), 9);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    /// Stored entries, no compression.
    pub const NONE: CompressionLevel = CompressionLevel(0);

    /// Fastest deflate; what pass producers have always used.
    pub const FAST: CompressionLevel = CompressionLevel(1);

    /// Smallest output.
    pub const MAX: CompressionLevel = CompressionLevel(9);

    /// Creates a compression level from 0-9. Values greater than 9 are clamped.
    #[must_use]
    pub fn new(level: u32) -> Self {
        CompressionLevel(level.min(9))
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.0
    }

    fn file_options(&self) -> SimpleFileOptions {
        let options = SimpleFileOptions::default()
            .last_modified_time(zip::DateTime::default())
            .unix_permissions(0o644);

        if self.0 == 0 {
            options.compression_method(CompressionMethod::Stored)
        } else {
            options
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(self.0 as i64))
        }
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self::FAST
    }
}

impl From<u32> for CompressionLevel {
    fn from(level: u32) -> Self {
        CompressionLevel::new(level)
    }
}

/// Largest slice relayed to a tap in one send.
const TAP_CHUNK: usize = 64 * 1024;

#[derive(Debug, Default)]
struct SpoolBuf {
    cursor: Cursor<Vec<u8>>,
    /// Bytes the zip writer will not seek back into.
    settled: u64,
    /// Bytes already relayed to the tap.
    relayed: u64,
}

/// In-memory zip target shared between the writer and the assembler.
///
/// `ZipWriter` owns one handle and flushes it whenever an entry is complete;
/// a flush marks everything before the cursor as settled.
#[derive(Debug, Clone, Default)]
struct Spool(Arc<StdMutex<SpoolBuf>>);

impl Spool {
    fn lock(&self) -> MutexGuard<'_, SpoolBuf> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Settled bytes not yet relayed.
    fn take_settled(&self) -> Bytes {
        let mut buf = self.lock();
        let (from, to) = (buf.relayed as usize, buf.settled as usize);
        if to <= from {
            return Bytes::new();
        }
        let chunk = Bytes::copy_from_slice(&buf.cursor.get_ref()[from..to]);
        buf.relayed = buf.settled;
        chunk
    }

    /// The whole container, and the part of it not yet relayed.
    fn finish(&self) -> (Bytes, Bytes) {
        let mut buf = self.lock();
        let bytes = Bytes::from(std::mem::take(&mut buf.cursor).into_inner());
        let relayed = (buf.relayed as usize).min(bytes.len());
        let rest = bytes.slice(relayed..);
        (bytes, rest)
    }
}

impl Write for Spool {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self.lock();
        if buf.cursor.position() < buf.relayed {
            return Err(io::Error::other("cannot rewrite archive bytes already relayed"));
        }
        buf.cursor.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut buf = self.lock();
        buf.settled = buf.settled.max(buf.cursor.position());
        Ok(())
    }
}

impl Read for Spool {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.lock().cursor.read(out)
    }
}

impl Seek for Spool {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.lock().cursor.seek(pos)
    }
}

struct ArchiveState {
    writer: Option<ZipWriter<Spool>>,
    names: BTreeSet<String>,
    tap: Option<mpsc::Sender<PassResult<Bytes>>>,
}

impl ArchiveState {
    fn writer(&mut self, name: &str) -> PassResult<&mut ZipWriter<Spool>> {
        self.writer
            .as_mut()
            .ok_or_else(|| PassError::assembly(format!("cannot add {name}: archive finalized")))
    }

    /// Start a new entry. Completes the previous one, settling its bytes.
    fn begin(&mut self, name: &str, options: SimpleFileOptions) -> PassResult<()> {
        self.writer(name)?;
        if !self.names.insert(name.to_string()) {
            return Err(PassError::assembly(format!("{name} is already in the archive")));
        }
        self.writer(name)?.start_file(name, options)?;
        Ok(())
    }
}

/// In-memory zip writer fed by the pipeline.
pub struct ArchiveAssembler {
    state: Mutex<ArchiveState>,
    spool: Spool,
    options: SimpleFileOptions,
}

impl ArchiveAssembler {
    pub fn new(level: CompressionLevel) -> Self {
        let spool = Spool::default();
        let mut writer = ZipWriter::new(spool.clone());
        writer.set_flush_on_finish_file(true);
        Self {
            state: Mutex::new(ArchiveState {
                writer: Some(writer),
                names: BTreeSet::new(),
                tap: None,
            }),
            spool,
            options: level.file_options(),
        }
    }

    /// Relay archive bytes to `tap` while the archive is being written.
    ///
    /// A closed tap fails the next entry with an assembly error.
    pub fn tap(&mut self, tap: mpsc::Sender<PassResult<Bytes>>) {
        self.state.get_mut().tap = Some(tap);
    }

    /// Add a complete entry.
    pub async fn add_entry(&self, name: &str, content: Bytes) -> PassResult<()> {
        let mut state = self.state.lock().await;
        state.begin(name, self.options)?;
        self.relay_settled(&state).await?;
        state
            .writer(name)?
            .write_all(&content)
            .map_err(|e| PassError::assembly(format!("writing {name}: {e}")))?;
        debug!(entry = name, bytes = content.len(), "archived entry");
        Ok(())
    }

    /// Add an entry whose content arrives as chunks; returns once the sender closes.
    ///
    /// The lock is held for the whole entry, so other entries queue behind it.
    pub async fn add_stream(&self, name: &str, mut chunks: mpsc::Receiver<Bytes>) -> PassResult<u64> {
        let mut state = self.state.lock().await;
        state.begin(name, self.options)?;
        self.relay_settled(&state).await?;
        let writer = state.writer(name)?;

        let mut total = 0u64;
        while let Some(chunk) = chunks.recv().await {
            writer
                .write_all(&chunk)
                .map_err(|e| PassError::assembly(format!("writing {name}: {e}")))?;
            total += chunk.len() as u64;
        }
        debug!(entry = name, bytes = total, "archived streamed entry");
        Ok(total)
    }

    /// Entry names written so far.
    pub async fn entry_names(&self) -> Vec<String> {
        self.state.lock().await.names.iter().cloned().collect()
    }

    /// Write the central directory and hand back the finished container.
    ///
    /// With a tap installed, the remaining bytes are relayed before this returns.
    pub async fn finalize(&self) -> PassResult<Bytes> {
        let mut state = self.state.lock().await;
        let writer = state
            .writer
            .take()
            .ok_or_else(|| PassError::assembly("archive already finalized"))?;
        writer.finish()?;

        let (bytes, rest) = self.spool.finish();
        if let Some(tap) = state.tap.take() {
            relay(&tap, rest).await?;
        }
        debug!(entries = state.names.len(), bytes = bytes.len(), "archive finalized");
        Ok(bytes)
    }

    async fn relay_settled(&self, state: &ArchiveState) -> PassResult<()> {
        match &state.tap {
            Some(tap) => relay(tap, self.spool.take_settled()).await,
            None => Ok(()),
        }
    }
}

async fn relay(tap: &mpsc::Sender<PassResult<Bytes>>, bytes: Bytes) -> PassResult<()> {
    let mut offset = 0;
    while offset < bytes.len() {
        let end = (offset + TAP_CHUNK).min(bytes.len());
        tap.send(Ok(bytes.slice(offset..end)))
            .await
            .map_err(|_| PassError::assembly("archive consumer went away"))?;
        offset = end;
    }
    Ok(())
}

impl std::fmt::Debug for ArchiveAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveAssembler").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn read_entry(archive: &[u8], name: &str) -> Vec<u8> {
        let mut zip = ZipArchive::new(Cursor::new(archive)).unwrap();
        let mut file = zip.by_name(name).unwrap();
        let mut out = Vec::new();
        file.read_to_end(&mut out).unwrap();
        out
    }

    #[tokio::test]
    async fn buffer_and_stream_entries_roundtrip() {
        let archive = ArchiveAssembler::new(CompressionLevel::default());
        archive
            .add_entry("pass.json", Bytes::from_static(br#"{"a":1}"#))
            .await
            .unwrap();

        let (tx, rx) = mpsc::channel(2);
        let producer = async move {
            tx.send(Bytes::from_static(b"chunk-1/")).await.unwrap();
            tx.send(Bytes::from_static(b"chunk-2")).await.unwrap();
        };
        let (_, written) = tokio::join!(producer, archive.add_stream("icon.png", rx));
        assert_eq!(written.unwrap(), 15);

        let bytes = archive.finalize().await.unwrap();
        assert_eq!(read_entry(&bytes, "pass.json"), br#"{"a":1}"#);
        assert_eq!(read_entry(&bytes, "icon.png"), b"chunk-1/chunk-2");
    }

    #[tokio::test]
    async fn concurrent_adds_keep_entries_whole() {
        let archive = ArchiveAssembler::new(CompressionLevel::MAX);
        let (tx, rx) = mpsc::channel(1);
        let producer = async move {
            for _ in 0..10 {
                tx.send(Bytes::from_static(b"abc")).await.unwrap();
                tokio::task::yield_now().await;
            }
        };

        let (_, streamed, buffered) = tokio::join!(
            producer,
            archive.add_stream("strip.png", rx),
            archive.add_entry("footer.png", Bytes::from_static(b"footer")),
        );
        streamed.unwrap();
        buffered.unwrap();

        let bytes = archive.finalize().await.unwrap();
        assert_eq!(read_entry(&bytes, "strip.png"), b"abc".repeat(10));
        assert_eq!(read_entry(&bytes, "footer.png"), b"footer");
    }

    #[tokio::test]
    async fn duplicate_and_late_entries_fail() {
        let archive = ArchiveAssembler::new(CompressionLevel::NONE);
        archive.add_entry("signature", Bytes::new()).await.unwrap();
        let err = archive.add_entry("signature", Bytes::new()).await.unwrap_err();
        assert!(err.to_string().contains("already in the archive"));

        archive.finalize().await.unwrap();
        let err = archive.add_entry("late", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, PassError::Assembly { .. }));
        assert!(archive.finalize().await.is_err());
    }

    #[tokio::test]
    async fn identical_inputs_give_identical_archives() {
        async fn build() -> Bytes {
            let archive = ArchiveAssembler::new(CompressionLevel::default());
            archive
                .add_entry("pass.json", Bytes::from_static(b"{}"))
                .await
                .unwrap();
            archive.finalize().await.unwrap()
        }
        assert_eq!(build().await, build().await);
    }

    #[tokio::test]
    async fn tap_relays_completed_entries_before_finalize() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut archive = ArchiveAssembler::new(CompressionLevel::default());
        archive.tap(tx);

        archive
            .add_entry("pass.json", Bytes::from_static(br#"{"a":1}"#))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err(), "open entry must not be relayed");

        archive
            .add_entry("icon.png", Bytes::from(vec![9u8; 200_000]))
            .await
            .unwrap();
        let first = rx.try_recv().unwrap().unwrap();
        assert!(first.starts_with(b"PK\x03\x04"));

        let bytes = archive.finalize().await.unwrap();
        let mut relayed = first.to_vec();
        while let Ok(chunk) = rx.try_recv() {
            relayed.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(relayed, bytes);
        assert_eq!(read_entry(&relayed, "icon.png"), vec![9u8; 200_000]);
    }

    #[tokio::test]
    async fn closed_tap_fails_next_entry() {
        let (tx, rx) = mpsc::channel(1);
        let mut archive = ArchiveAssembler::new(CompressionLevel::NONE);
        archive.tap(tx);
        drop(rx);

        archive
            .add_entry("pass.json", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        let err = archive
            .add_entry("icon.png", Bytes::from_static(b"png"))
            .await
            .unwrap_err();
        assert!(matches!(err, PassError::Assembly { .. }));
    }
}
