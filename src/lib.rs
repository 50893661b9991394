pub mod catalog;
pub mod fetch;
pub mod models;
pub mod retry;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod sync;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info};
use tokio_util::sync::CancellationToken;

use catalog::SensorCatalog;
use fetch::{build_device_url, redacted, HttpSource, ResilientFetcher};
use scheduler::Scheduler;
use settings::Settings;
use store::{SqliteBackend, TabularStore};
use sync::SyncEngine;

/// Each poll consumes only the latest reading.
const READINGS_PER_POLL: u32 = 1;

/// Everything the poll loop needs, built once at startup.
pub struct AppContext {
    pub settings: Settings,
    pub catalog: Arc<SensorCatalog>,
    pub source: HttpSource,
    pub backend: SqliteBackend,
}

impl AppContext {
    pub fn build(settings: Settings) -> Result<Self> {
        settings.validate().context("invalid settings")?;
        let credentials = settings
            .credentials()
            .context("station credentials unavailable")?;

        let url = build_device_url(
            &settings.api_base_url,
            &credentials.device_id,
            &credentials.api_key,
            &credentials.application_key,
            READINGS_PER_POLL,
        )?;
        info!("Polling station endpoint {}", redacted(&url));
        let source = HttpSource::new(url, settings.request_timeout())?;

        let catalog = SensorCatalog::load(&settings.catalog_path)?;
        if catalog.is_empty() {
            error!(
                "Sensor catalog {} has no entries; readings will not be written",
                settings.catalog_path.display()
            );
        }

        let backend = SqliteBackend::open(settings.database_path.clone())?;

        Ok(Self {
            settings,
            catalog: Arc::new(catalog),
            source,
            backend,
        })
    }

    pub fn into_scheduler(self) -> Scheduler<HttpSource, SqliteBackend> {
        let cadence = self.settings.cadence();
        Scheduler::new(
            ResilientFetcher::new(self.source),
            SyncEngine::new(self.catalog, TabularStore::new(self.backend)),
            cadence,
        )
    }
}

pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("weather-sync starting up...");

    let settings = Settings::from_env()?;
    let context = AppContext::build(settings)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async move {
        let cancel_token = CancellationToken::new();
        let shutdown = cancel_token.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupt received; stopping before the next cycle");
                    shutdown.cancel();
                }
                Err(err) => error!("Failed to listen for Ctrl-C: {err}"),
            }
        });

        context.into_scheduler().run(cancel_token).await
    })
}
