use crate::config::Config;
use crate::error::LoggerError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

pub const METER_ENDPOINT: &str = "/sensor/meter";
pub const SOIL_ENDPOINT: &str = "/sensor/soil";
pub const IMAGE_ENDPOINT: &str = "/image";

#[derive(Debug, Clone, PartialEq)]
pub struct MeterReading {
    pub temperature: f64,
    pub humidity: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoilReading {
    pub moisture_percent: f64,
    /// Raw ADC value; some probe firmwares omit it.
    pub raw_value: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ImageData {
    pub bytes: Bytes,
    pub content_type: String,
}

// Wire shapes. Everything is optional so a sparse payload surfaces as a
// missing-field error rather than a generic parse failure.
#[derive(Debug, Deserialize)]
struct RawMeter {
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawSoil {
    #[serde(default)]
    moisture_percent: Option<f64>,
    #[serde(default)]
    raw_value: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    #[serde(default)]
    data_base64: Option<String>,
    #[serde(default)]
    format: Option<String>,
}

/// The sensor rig's HTTP surface. Trait seam so the scheduler can be driven
/// against fakes in tests.
#[async_trait]
pub trait SensorApi: Send + Sync {
    async fn fetch_meter(&self) -> Result<MeterReading, LoggerError>;
    async fn fetch_soil(&self) -> Result<SoilReading, LoggerError>;
    async fn fetch_image(&self) -> Result<ImageData, LoggerError>;
}

pub struct SensorClient {
    http: Client,
    base: String,
    sensor_timeout: Duration,
    image_timeout: Duration,
    image_width: u32,
    image_height: u32,
}

impl SensorClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: Client::new(),
            base: config.sensor_api_base.clone(),
            sensor_timeout: config.sensor_timeout,
            image_timeout: config.image_timeout,
            image_width: config.image_width,
            image_height: config.image_height,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        query: &[(&str, u32)],
        timeout: Duration,
    ) -> Result<T, LoggerError> {
        let url = format!("{}{}", self.base, endpoint);
        let response = self
            .http
            .get(&url)
            .query(query)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| LoggerError::connectivity(endpoint, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoggerError::Status { endpoint, status });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| LoggerError::connectivity(endpoint, err))?;
        serde_json::from_slice(&body).map_err(|err| LoggerError::Malformed {
            endpoint,
            detail: err.to_string(),
        })
    }
}

#[async_trait]
impl SensorApi for SensorClient {
    async fn fetch_meter(&self) -> Result<MeterReading, LoggerError> {
        let raw: RawMeter = self
            .get_json(METER_ENDPOINT, &[], self.sensor_timeout)
            .await?;
        Ok(MeterReading {
            temperature: require(raw.temperature, METER_ENDPOINT, "temperature")?,
            humidity: require(raw.humidity, METER_ENDPOINT, "humidity")?,
        })
    }

    async fn fetch_soil(&self) -> Result<SoilReading, LoggerError> {
        let raw: RawSoil = self
            .get_json(SOIL_ENDPOINT, &[], self.sensor_timeout)
            .await?;
        Ok(SoilReading {
            moisture_percent: require(raw.moisture_percent, SOIL_ENDPOINT, "moisture_percent")?,
            raw_value: raw.raw_value,
        })
    }

    async fn fetch_image(&self) -> Result<ImageData, LoggerError> {
        let query = [("width", self.image_width), ("height", self.image_height)];
        let raw: RawImage = self
            .get_json(IMAGE_ENDPOINT, &query, self.image_timeout)
            .await?;

        let encoded = require(raw.data_base64, IMAGE_ENDPOINT, "data_base64")?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|err| LoggerError::Malformed {
                endpoint: IMAGE_ENDPOINT,
                detail: format!("invalid base64 image data: {err}"),
            })?;

        let format = raw
            .format
            .map(|f| f.trim().to_ascii_lowercase())
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| "jpeg".to_string());

        Ok(ImageData {
            bytes: Bytes::from(bytes),
            content_type: format!("image/{format}"),
        })
    }
}

fn require<T>(
    value: Option<T>,
    endpoint: &'static str,
    field: &'static str,
) -> Result<T, LoggerError> {
    value.ok_or(LoggerError::MissingField { endpoint, field })
}
