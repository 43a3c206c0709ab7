use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::artifact::store::ArtifactFormat;
use crate::error::PipelineError;

/// Size the zip output is cut into before it is handed to the uploader
pub const ARCHIVE_CHUNK_SIZE: usize = 256 * 1024;

/// A file ready to be appended to the archive
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub format: ArtifactFormat,
    pub bytes: Bytes,
}

/// `Write` sink that forwards zip output as byte chunks over a bounded channel.
/// Runs on a blocking thread, so sends block until the uploader catches up.
///
/// Once `discard` is raised nothing more is sent and buffered bytes are
/// dropped.
struct ChunkWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buffer: BytesMut,
    chunk_size: usize,
    discard: Arc<AtomicBool>,
}

impl ChunkWriter {
    fn new(
        tx: mpsc::Sender<io::Result<Bytes>>,
        chunk_size: usize,
        discard: Arc<AtomicBool>,
    ) -> Self {
        Self {
            tx,
            buffer: BytesMut::with_capacity(chunk_size),
            chunk_size,
            discard,
        }
    }

    fn discarding(&self) -> bool {
        self.discard.load(Ordering::SeqCst)
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.discarding() {
            self.buffer.clear();
            return Ok(());
        }
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = self.buffer.split().freeze();
        self.tx.blocking_send(Ok(chunk)).map_err(|_| {
            io::Error::new(
                io::ErrorKind::BrokenPipe,
                "archive upload stopped reading",
            )
        })
    }
}

impl Write for ChunkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.discarding() {
            return Ok(buf.len());
        }
        self.buffer.extend_from_slice(buf);
        if self.buffer.len() >= self.chunk_size {
            self.send_buffered()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

fn entry_options(format: ArtifactFormat) -> SimpleFileOptions {
    // PNG is already compressed
    let method = match format {
        ArtifactFormat::Raster => CompressionMethod::Stored,
        ArtifactFormat::Vector => CompressionMethod::Deflated,
    };
    SimpleFileOptions::default().compression_method(method)
}

fn zip_error(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::TransientIo(format!("failed to write archive: {e}"))
}

fn write_entries(
    entries: &mut mpsc::Receiver<ArchiveEntry>,
    chunks: mpsc::Sender<io::Result<Bytes>>,
    chunk_size: usize,
) -> Result<usize, PipelineError> {
    // No entries means no bytes, and so no upload
    let Some(first) = entries.blocking_recv() else {
        return Ok(0);
    };

    let discard = Arc::new(AtomicBool::new(false));
    let mut zip = ZipWriter::new_stream(ChunkWriter::new(chunks, chunk_size, discard.clone()));
    let written = match append_entries(&mut zip, first, entries) {
        Ok(written) => written,
        Err(e) => {
            // Dropping the writer still emits a central directory; it must
            // not reach the upload behind a half-written entry
            discard.store(true, Ordering::SeqCst);
            drop(zip);
            return Err(e);
        }
    };

    // The chunk channel closes when the sink drops, after the final flush
    let mut sink = zip.finish().map_err(zip_error)?;
    sink.flush().map_err(zip_error)?;
    Ok(written)
}

fn append_entries<W: Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    first: ArchiveEntry,
    entries: &mut mpsc::Receiver<ArchiveEntry>,
) -> Result<usize, PipelineError> {
    let mut written = 0;
    let mut next = Some(first);
    while let Some(entry) = next {
        zip.start_file(entry.name.as_str(), entry_options(entry.format))
            .map_err(zip_error)?;
        zip.write_all(&entry.bytes).map_err(zip_error)?;
        written += 1;
        debug!(name = %entry.name, bytes = entry.bytes.len(), "appended archive entry");
        next = entries.blocking_recv();
    }
    Ok(written)
}

/// Build the zip on a blocking thread from `entries` as they arrive.
///
/// Resolves to the number of entries written. On failure an error item is
/// pushed onto `chunks` so the upload aborts rather than completing a
/// truncated archive.
pub fn spawn_zip_producer(
    mut entries: mpsc::Receiver<ArchiveEntry>,
    chunks: mpsc::Sender<io::Result<Bytes>>,
    chunk_size: usize,
) -> JoinHandle<Result<usize, PipelineError>> {
    tokio::task::spawn_blocking(move || {
        let failures = chunks.clone();
        let result = write_entries(&mut entries, chunks, chunk_size.max(1));
        if let Err(e) = &result {
            if failures
                .blocking_send(Err(io::Error::other(e.to_string())))
                .is_err()
            {
                debug!("archive upload already stopped");
            }
        }
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use zip::ZipArchive;

    async fn drain(mut rx: mpsc::Receiver<io::Result<Bytes>>) -> (Vec<u8>, usize) {
        let mut out = Vec::new();
        let mut chunks = 0;
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk.unwrap());
            chunks += 1;
        }
        (out, chunks)
    }

    #[tokio::test]
    async fn test_producer_writes_readable_zip_in_chunks() {
        let (entry_tx, entry_rx) = mpsc::channel(2);
        let (chunk_tx, chunk_rx) = mpsc::channel(2);
        let producer = spawn_zip_producer(entry_rx, chunk_tx, 64);

        let feed = async move {
            for i in 0..3 {
                entry_tx
                    .send(ArchiveEntry {
                        name: format!("guest_{i}.svg"),
                        format: ArtifactFormat::Vector,
                        bytes: Bytes::from(format!("<svg>{}</svg>", "x".repeat(200))),
                    })
                    .await
                    .unwrap();
            }
        };
        let ((), (bytes, chunks)) = tokio::join!(feed, drain(chunk_rx));

        assert_eq!(producer.await.unwrap().unwrap(), 3);
        assert!(chunks > 1);
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 3);
        let mut content = String::new();
        archive
            .by_name("guest_1.svg")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert!(content.starts_with("<svg>"));
    }

    #[test]
    fn test_discarding_writer_sends_nothing() {
        let (tx, mut rx) = mpsc::channel(4);
        let discard = Arc::new(AtomicBool::new(false));
        let mut writer = ChunkWriter::new(tx, 4, discard.clone());

        writer.write_all(b"ab").unwrap();
        discard.store(true, Ordering::SeqCst);
        writer.write_all(b"cdefgh").unwrap();
        writer.flush().unwrap();

        assert!(rx.try_recv().is_err());
        assert!(writer.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_producer_fails_when_upload_stops_reading() {
        let (entry_tx, entry_rx) = mpsc::channel(1);
        let (chunk_tx, chunk_rx) = mpsc::channel(1);
        drop(chunk_rx);
        let producer = spawn_zip_producer(entry_rx, chunk_tx, 16);

        entry_tx
            .send(ArchiveEntry {
                name: "guest.svg".to_string(),
                format: ArtifactFormat::Vector,
                bytes: Bytes::from("<svg>".repeat(100)),
            })
            .await
            .unwrap();
        drop(entry_tx);

        let result = producer.await.unwrap();
        assert!(matches!(result, Err(PipelineError::TransientIo(_))));
    }

    #[tokio::test]
    async fn test_no_entries_produces_no_bytes() {
        let (entry_tx, entry_rx) = mpsc::channel::<ArchiveEntry>(1);
        let (chunk_tx, chunk_rx) = mpsc::channel(1);
        drop(entry_tx);

        let producer = spawn_zip_producer(entry_rx, chunk_tx, 64);
        let (bytes, chunks) = drain(chunk_rx).await;

        assert_eq!(producer.await.unwrap().unwrap(), 0);
        assert!(bytes.is_empty());
        assert_eq!(chunks, 0);
    }
}
