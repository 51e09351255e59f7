use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;
use url::Url;

const DEFAULT_SENSOR_API_BASE: &str = "http://192.168.11.226:8000";
const DEFAULT_FIRESTORE_BASE: &str = "https://firestore.googleapis.com";
const DEFAULT_STORAGE_BASE: &str = "https://storage.googleapis.com";
const DEFAULT_COLLECTION: &str = "sensor_logs";
const DEFAULT_CAPTURE_FOLDER: &str = "logger-captures";

/// Values the CLI may pin ahead of the environment. Flag > env > default.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub sensor_api_base: Option<String>,
    pub interval_seconds: Option<u64>,
    pub image_interval_seconds: Option<u64>,
}

/// Local-time window during which image capture is skipped. May cross
/// midnight (e.g. 22 -> 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl QuietHours {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour > self.end_hour {
            hour >= self.start_hour || hour < self.end_hour
        } else {
            self.start_hour <= hour && hour < self.end_hour
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sensor_api_base: String,
    pub interval: Duration,
    pub image_interval: Duration,
    pub sensor_timeout: Duration,
    pub image_timeout: Duration,
    pub image_width: u32,
    pub image_height: u32,

    pub gcs_bucket: Option<String>,
    pub capture_folder: String,
    pub storage_base: String,
    pub storage_token: Option<String>,

    pub firestore_project: String,
    pub firestore_database: String,
    pub firestore_collection: String,
    pub firestore_base: String,
    pub firestore_token: Option<String>,

    pub quiet_hours: Option<QuietHours>,
}

impl Config {
    pub fn from_env(overrides: Overrides) -> Result<Self> {
        dotenv().ok();

        let sensor_api_base = overrides
            .sensor_api_base
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| env_optional("SENSOR_API_BASE"))
            .unwrap_or_else(|| DEFAULT_SENSOR_API_BASE.to_string());
        let sensor_api_base = sensor_api_base.trim_end_matches('/').to_string();
        Url::parse(&sensor_api_base).context("invalid SENSOR_API_BASE")?;

        let interval_seconds = match overrides.interval_seconds {
            Some(value) => value,
            None => env_u64("LOGGER_INTERVAL_SECONDS", Some(60))?,
        };
        let image_interval_seconds = match overrides.image_interval_seconds {
            Some(value) => value,
            None => env_u64("LOGGER_IMAGE_INTERVAL_SECONDS", Some(1800))?,
        };
        if interval_seconds == 0 {
            bail!("LOGGER_INTERVAL_SECONDS must be positive");
        }
        if image_interval_seconds == 0 {
            bail!("LOGGER_IMAGE_INTERVAL_SECONDS must be positive");
        }

        let sensor_timeout =
            Duration::from_secs(env_u64("LOGGER_SENSOR_TIMEOUT_SECONDS", Some(10))?);
        let image_timeout =
            Duration::from_secs(env_u64("LOGGER_IMAGE_TIMEOUT_SECONDS", Some(30))?);

        let image_width = env_u64("LOGGER_IMAGE_WIDTH", Some(1920))? as u32;
        let image_height = env_u64("LOGGER_IMAGE_HEIGHT", Some(1080))? as u32;

        let gcs_bucket = env_optional("GCS_BUCKET_NAME");
        let capture_folder = env_string(
            "LOGGER_CAPTURE_FOLDER",
            Some(DEFAULT_CAPTURE_FOLDER.to_string()),
        )?;
        let storage_base = env_string(
            "LOGGER_STORAGE_BASE",
            Some(DEFAULT_STORAGE_BASE.to_string()),
        )?
        .trim_end_matches('/')
        .to_string();
        let storage_token = env_optional("LOGGER_STORAGE_TOKEN");

        let firestore_project =
            env_string("FIRESTORE_PROJECT_ID", None).context("FIRESTORE_PROJECT_ID is required")?;
        let firestore_database =
            env_string("FIRESTORE_DATABASE", Some("(default)".to_string()))?;
        let firestore_collection =
            env_string("FIRESTORE_COLLECTION", Some(DEFAULT_COLLECTION.to_string()))?;
        let firestore_base = env_string(
            "LOGGER_FIRESTORE_BASE",
            Some(DEFAULT_FIRESTORE_BASE.to_string()),
        )?
        .trim_end_matches('/')
        .to_string();
        let firestore_token = env_optional("LOGGER_FIRESTORE_TOKEN");

        let quiet_hours = quiet_hours_from_env()?;

        Ok(Self {
            sensor_api_base,
            interval: Duration::from_secs(interval_seconds),
            image_interval: Duration::from_secs(image_interval_seconds),
            sensor_timeout,
            image_timeout,
            image_width,
            image_height,
            gcs_bucket,
            capture_folder,
            storage_base,
            storage_token,
            firestore_project,
            firestore_database,
            firestore_collection,
            firestore_base,
            firestore_token,
            quiet_hours,
        })
    }
}

fn quiet_hours_from_env() -> Result<Option<QuietHours>> {
    let start = env_optional("LOGGER_QUIET_START_HOUR");
    let end = env_optional("LOGGER_QUIET_END_HOUR");
    match (start, end) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) => {
            let start_hour = start
                .parse::<u32>()
                .context("invalid LOGGER_QUIET_START_HOUR")?;
            let end_hour = end.parse::<u32>().context("invalid LOGGER_QUIET_END_HOUR")?;
            if start_hour > 23 || end_hour > 23 {
                bail!("quiet hours must be within 0..=23");
            }
            Ok(Some(QuietHours {
                start_hour,
                end_hour,
            }))
        }
        _ => bail!("LOGGER_QUIET_START_HOUR and LOGGER_QUIET_END_HOUR must be set together"),
    }
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
