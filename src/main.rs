mod config;
mod error;
mod logger;
mod record;
mod sensor;
mod store;
mod upload;

use crate::config::{Config, Overrides};
use crate::logger::SensorLogger;
use crate::sensor::SensorClient;
use crate::store::FirestoreStore;
use crate::upload::{BlobStore, GcsUploader};
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "sensor-logger", version, about = "Plant sensor logging daemon")]
struct Cli {
    /// Sensor API base URL (overrides SENSOR_API_BASE)
    #[arg(long)]
    sensor_base: Option<String>,
    /// Seconds between meter/soil readings (overrides LOGGER_INTERVAL_SECONDS)
    #[arg(long)]
    interval_seconds: Option<u64>,
    /// Seconds between camera captures (overrides LOGGER_IMAGE_INTERVAL_SECONDS)
    #[arg(long)]
    image_interval_seconds: Option<u64>,
}

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sensor_logger=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env(Overrides {
        sensor_api_base: cli.sensor_base,
        interval_seconds: cli.interval_seconds,
        image_interval_seconds: cli.image_interval_seconds,
    })?;
    init_tracing()?;

    tracing::info!(
        sensor_base = %config.sensor_api_base,
        collection = %config.firestore_collection,
        "starting sensor logger"
    );

    let sensors = Arc::new(SensorClient::new(&config));
    let store = Arc::new(FirestoreStore::new(&config));
    let uploader: Option<Arc<dyn BlobStore>> = match GcsUploader::from_config(&config) {
        Some(uploader) => Some(Arc::new(uploader)),
        None => {
            tracing::warn!("GCS_BUCKET_NAME not set; image capture disabled");
            None
        }
    };

    let stop = CancellationToken::new();
    let signal_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_stop.cancel();
        }
    });

    let logger = SensorLogger::new(sensors, store, uploader, config.quiet_hours);
    logger
        .run(config.interval, config.image_interval, stop)
        .await;

    tracing::info!("sensor logger stopped");
    Ok(())
}
