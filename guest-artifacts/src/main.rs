use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Error};
use aws_sdk_s3::config::{Builder, Region};
use envconfig::Envconfig;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use common_s3::{S3Client, S3Impl};
use guest_artifacts::api::create_router;
use guest_artifacts::api::metrics::setup_metrics_routes;
use guest_artifacts::config::Config;
use guest_artifacts::context::AppContext;
use guest_artifacts::guests::{GuestStore, MemoryGuestStore, PgGuestStore};
use guest_artifacts::notify::{build_http_client, EmailSender, Senders, WhatsAppSender};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

async fn build_s3_client(config: &Config) -> Arc<dyn S3Client> {
    let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new(config.s3_region.clone()));
    if let Some(endpoint) = &config.s3_endpoint {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let mut s3_config = Builder::from(&config_loader.load().await);
    if config.s3_endpoint.is_some() {
        // custom s3 endpoints need force_path_style set
        s3_config = s3_config.force_path_style(true);
    }

    Arc::new(S3Impl::new(aws_sdk_s3::Client::from_conf(s3_config.build())))
}

async fn build_guest_store(config: &Config) -> Result<Arc<dyn GuestStore>, Error> {
    if config.uses_memory_store() {
        warn!("Using the in-memory guest store, guests will not survive a restart");
        return Ok(Arc::new(MemoryGuestStore::new()));
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_pg_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await
        .context("failed to connect to postgres")?;

    if config.run_migrations {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
    }

    Ok(Arc::new(PgGuestStore::new(pool)))
}

fn build_senders(config: &Config) -> Result<Senders, Error> {
    let client = build_http_client(config.http_timeout())?;
    let mut senders = Senders::new();

    match config.email_settings() {
        Some(settings) => {
            senders = senders.with_sender(Arc::new(EmailSender::new(client.clone(), settings)))
        }
        None => info!("EMAIL_API_URL not set, email delivery disabled"),
    }
    match config.whatsapp_settings() {
        Some(settings) => {
            senders = senders.with_sender(Arc::new(WhatsAppSender::new(client, settings)))
        }
        None => info!("WHATSAPP_PHONE_NUMBER_ID not set, whatsapp delivery disabled"),
    }

    Ok(senders)
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("failed to listen for SIGTERM: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping new batch chunks");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env().context("failed to load configuration from env")?;
    let settings = config.pipeline_settings()?;

    let s3 = build_s3_client(&config).await;
    let guests = build_guest_store(&config).await?;
    let senders = build_senders(&config)?;

    let context = Arc::new(AppContext::new(s3, guests, senders, settings)?);
    let shutdown = context.shutdown.clone();

    let app = setup_metrics_routes(create_router(context))?;

    let bind = config.bind();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("Listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Shut down cleanly");
    Ok(())
}
