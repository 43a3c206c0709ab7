use std::sync::Arc;
use std::time::Duration;

use common_s3::S3Client;
use tokio_util::sync::CancellationToken;

use crate::archive::BatchArchiver;
use crate::artifact::color::ArtifactColors;
use crate::artifact::keys::KeyScheme;
use crate::artifact::lifecycle::RecolorPolicy;
use crate::artifact::raster::RasterConverter;
use crate::artifact::service::ArtifactService;
use crate::artifact::store::{ArtifactFormat, ArtifactStore};
use crate::batch::BatchSettings;
use crate::error::PipelineError;
use crate::guests::GuestStore;
use crate::import::{ImportWorker, Importer};
use crate::notify::{Notifier, NotifyWorker, Senders};

/// Validated pipeline settings, independent of where they were read from
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub bucket: String,
    pub public_base_url: Option<String>,
    pub vector_namespace: String,
    pub raster_namespace: String,
    pub raster: RasterConverter,
    pub archive_concurrency: usize,
    pub archive_prefix: String,
    pub archive_format: ArtifactFormat,
    pub import_batch: BatchSettings,
    pub notify_batch: BatchSettings,
    pub default_colors: ArtifactColors,
    pub recolor_policy: RecolorPolicy,
    pub max_import_bytes: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            bucket: "guest-artifacts".to_string(),
            public_base_url: None,
            vector_namespace: "qr_codes".to_string(),
            raster_namespace: "qr_codes_png".to_string(),
            raster: RasterConverter::default(),
            archive_concurrency: 10,
            archive_prefix: "archives".to_string(),
            archive_format: ArtifactFormat::Raster,
            import_batch: BatchSettings {
                batch_size: 20,
                inter_batch_delay: Duration::ZERO,
            },
            notify_batch: BatchSettings {
                batch_size: 10,
                inter_batch_delay: Duration::from_secs(1),
            },
            default_colors: ArtifactColors::default(),
            recolor_policy: RecolorPolicy::Regenerate,
            max_import_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Everything a request handler needs, wired once at startup
pub struct AppContext {
    pub guests: Arc<dyn GuestStore>,
    pub store: ArtifactStore,
    pub artifacts: Arc<ArtifactService>,
    pub archiver: BatchArchiver,
    pub importer: Importer,
    pub notifier: Notifier,
    pub settings: PipelineSettings,
    pub shutdown: CancellationToken,
}

impl AppContext {
    pub fn new(
        s3: Arc<dyn S3Client>,
        guests: Arc<dyn GuestStore>,
        senders: Senders,
        settings: PipelineSettings,
    ) -> Result<Self, PipelineError> {
        let store = ArtifactStore::new(
            s3,
            settings.bucket.clone(),
            settings.public_base_url.clone(),
        )?;

        let artifacts = Arc::new(ArtifactService::new(
            store.clone(),
            KeyScheme::new(
                settings.vector_namespace.clone(),
                settings.raster_namespace.clone(),
            ),
            settings.raster,
            guests.clone(),
            settings.recolor_policy,
        ));

        let archiver = BatchArchiver::new(
            store.clone(),
            settings.raster,
            settings.archive_concurrency,
            settings.archive_format,
            settings.archive_prefix.clone(),
        );

        let notify_worker = Arc::new(NotifyWorker::new(
            guests.clone(),
            artifacts.clone(),
            senders,
        ));
        let import_worker = Arc::new(ImportWorker::new(
            guests.clone(),
            artifacts.clone(),
            notify_worker.clone(),
            settings.default_colors,
        ));

        Ok(Self {
            guests,
            store,
            artifacts,
            archiver,
            importer: Importer::new(import_worker, settings.import_batch),
            notifier: Notifier::new(notify_worker, settings.notify_batch),
            settings,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }
}
