mod manifest;
mod writer;

pub use manifest::{ArchiveItem, ArchiveManifest, ArchiveRequest, MissingFile};
pub use writer::{spawn_zip_producer, ArchiveEntry, ARCHIVE_CHUNK_SIZE};

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::artifact::keys::{file_stem, KeyParts};
use crate::artifact::raster::RasterConverter;
use crate::artifact::store::{
    Artifact, ArtifactFormat, ArtifactLocation, ArtifactStore, ResolvedArtifact,
};
use crate::error::PipelineError;

/// Chunks buffered between the zip producer and the uploader
const CHUNK_CHANNEL_CAPACITY: usize = 8;

/// Bundles many guests' artifacts into one zip uploaded to object storage.
///
/// Artifacts are fetched in slices of `concurrency`, normalized to one format
/// and fed to a zip producer whose output streams straight into a multipart
/// upload, so the archive is never held in memory as a whole.
#[derive(Clone)]
pub struct BatchArchiver {
    store: ArtifactStore,
    converter: RasterConverter,
    concurrency: usize,
    target_format: ArtifactFormat,
    default_prefix: String,
}

struct Collected {
    added: Vec<String>,
    missing: Vec<MissingFile>,
}

impl BatchArchiver {
    pub fn new(
        store: ArtifactStore,
        converter: RasterConverter,
        concurrency: usize,
        target_format: ArtifactFormat,
        default_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            converter,
            concurrency: concurrency.max(1),
            target_format,
            default_prefix: default_prefix.into(),
        }
    }

    pub fn target_format(&self) -> ArtifactFormat {
        self.target_format
    }

    pub fn archive_key(&self, destination_prefix: Option<&str>) -> String {
        let prefix = destination_prefix
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| self.default_prefix.trim_matches('/'));
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let id = Uuid::new_v4().simple();
        if prefix.is_empty() {
            format!("guests_{stamp}_{id}.zip")
        } else {
            format!("{prefix}/guests_{stamp}_{id}.zip")
        }
    }

    /// Archive `items`, returning what was added and what was missing.
    ///
    /// Per-item failures land in `missing_files`. Only a failed upload or a
    /// broken zip producer fails the call. When nothing could be added no
    /// object is created and `archive_location` is `None`.
    pub async fn archive(
        &self,
        items: Vec<ArchiveItem>,
        destination_prefix: Option<&str>,
    ) -> Result<ArchiveManifest, PipelineError> {
        let started = Instant::now();
        let archive_key = self.archive_key(destination_prefix);
        let requested = items.len();

        let (entry_tx, entry_rx) = mpsc::channel(self.concurrency);
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);

        let producer = spawn_zip_producer(entry_rx, chunk_tx, ARCHIVE_CHUNK_SIZE);
        let upload = self
            .store
            .upload_archive(&archive_key, ReceiverStream::new(chunk_rx).boxed());
        let produced = async {
            producer.await.map_err(|e| {
                PipelineError::WorkerPanicked(format!("archive producer failed: {e}"))
            })?
        };

        let (collected, uploaded, written) =
            tokio::try_join!(self.collect(items, entry_tx), upload, produced)?;

        let mut manifest = ArchiveManifest {
            added_files: collected.added,
            missing_files: collected.missing,
            ..Default::default()
        };
        if let Some(bytes) = uploaded {
            manifest.archive_location = Some(self.store.locator(&archive_key));
            manifest.archive_key = Some(archive_key);
            manifest.archive_bytes = Some(bytes);
        }

        metrics::counter!("guest_artifacts_archive_files_total", "outcome" => "added")
            .increment(manifest.added_files.len() as u64);
        metrics::counter!("guest_artifacts_archive_files_total", "outcome" => "missing")
            .increment(manifest.missing_files.len() as u64);
        metrics::histogram!("guest_artifacts_archive_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        info!(
            requested,
            added = manifest.added_files.len(),
            missing = manifest.missing_files.len(),
            entries = written,
            location = manifest.archive_location.as_deref().unwrap_or("none"),
            "archive finished"
        );

        Ok(manifest)
    }

    async fn collect(
        &self,
        items: Vec<ArchiveItem>,
        entries: mpsc::Sender<ArchiveEntry>,
    ) -> Result<Collected, PipelineError> {
        let mut collected = Collected {
            added: Vec::with_capacity(items.len()),
            missing: Vec::new(),
        };
        let mut seen_names: HashMap<String, usize> = HashMap::new();

        for slice in items.chunks(self.concurrency) {
            let fetched = join_all(slice.iter().map(|item| self.fetch(item))).await;

            for (item, result) in slice.iter().zip(fetched) {
                match result {
                    Ok((stem, artifact)) => {
                        let name = unique_name(&mut seen_names, &stem, artifact.format());
                        let entry = ArchiveEntry {
                            name: name.clone(),
                            format: artifact.format(),
                            bytes: artifact.into_bytes(),
                        };
                        entries.send(entry).await.map_err(|_| {
                            PipelineError::TransientIo(
                                "archive writer stopped accepting entries".to_string(),
                            )
                        })?;
                        collected.added.push(name);
                    }
                    Err(e) => {
                        warn!(guest_id = %item.guest_id, error = %e, "leaving artifact out of archive");
                        collected.missing.push(MissingFile {
                            item: item.clone(),
                            reason: e.reason(),
                            attempted_keys: e.attempted_keys().to_vec(),
                        });
                    }
                }
            }
        }

        Ok(collected)
    }

    async fn fetch(&self, item: &ArchiveItem) -> Result<(String, Artifact), PipelineError> {
        let primary = ArtifactLocation::new(item.key.as_str(), ArtifactFormat::Vector);
        let fallback = ArtifactLocation::new(item.fallback_key.as_str(), ArtifactFormat::Raster);
        let resolved = self.store.resolve_readable(&primary, &fallback).await?;
        let artifact = self.normalize(resolved).await?;

        let stem = file_stem(&KeyParts {
            event_id: "",
            display_name: &item.display_name,
            table_no: &item.table_no,
            others: &item.others,
            subject_id: &item.guest_id,
        });
        Ok((stem, artifact))
    }

    async fn normalize(&self, resolved: ResolvedArtifact) -> Result<Artifact, PipelineError> {
        match (self.target_format, resolved.artifact) {
            (ArtifactFormat::Raster, Artifact::Vector(svg)) => {
                let png = self.converter.convert(svg).await.map_err(|e| match e {
                    PipelineError::ConversionFailed(msg) => PipelineError::ConversionFailed(
                        format!("{}: {msg}", resolved.key),
                    ),
                    other => other,
                })?;
                Ok(Artifact::Raster(png))
            }
            // Rasters are never traced back to vectors
            (_, artifact) => Ok(artifact),
        }
    }
}

fn unique_name(seen: &mut HashMap<String, usize>, stem: &str, format: ArtifactFormat) -> String {
    let count = seen.entry(format!("{stem}.{}", format.extension())).or_insert(0);
    *count += 1;
    if *count == 1 {
        format!("{stem}.{}", format.extension())
    } else {
        format!("{stem}_{count}.{}", format.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_name_suffixes_repeats() {
        let mut seen = HashMap::new();
        assert_eq!(unique_name(&mut seen, "ada_1_0_x", ArtifactFormat::Raster), "ada_1_0_x.png");
        assert_eq!(unique_name(&mut seen, "ada_1_0_x", ArtifactFormat::Raster), "ada_1_0_x_2.png");
        assert_eq!(unique_name(&mut seen, "ada_1_0_x", ArtifactFormat::Vector), "ada_1_0_x.svg");
    }

    #[test]
    fn test_archive_key_uses_prefix() {
        let archiver = BatchArchiver::new(
            ArtifactStore::new(
                std::sync::Arc::new(common_s3::MockS3Client::new()),
                "bucket",
                None,
            )
            .unwrap(),
            RasterConverter::fit(10, 10).unwrap(),
            4,
            ArtifactFormat::Raster,
            "archives",
        );

        let key = archiver.archive_key(Some("/exports/evt-1/"));
        assert!(key.starts_with("exports/evt-1/guests_"));
        assert!(key.ends_with(".zip"));
        assert!(archiver.archive_key(None).starts_with("archives/guests_"));
        assert_ne!(archiver.archive_key(None), archiver.archive_key(None));
    }
}
