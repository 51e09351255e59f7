use chrono::{DateTime, Utc};

/// Which sensor a persisted record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSource {
    TemperatureHumidity,
    SoilMoisture,
    Image,
}

impl RecordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordSource::TemperatureHumidity => "temperature_humidity",
            RecordSource::SoilMoisture => "soil_moisture",
            RecordSource::Image => "image",
        }
    }
}

/// One sensor fetch. `captured_at` is assigned by the logger at fetch time,
/// never taken from the sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub values: ReadingValues,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadingValues {
    Meter {
        temperature: f64,
        humidity: f64,
    },
    Soil {
        moisture_percent: f64,
        raw_value: Option<i64>,
    },
}

impl Reading {
    pub fn meter(temperature: f64, humidity: f64, captured_at: DateTime<Utc>) -> Self {
        Self {
            values: ReadingValues::Meter {
                temperature,
                humidity,
            },
            captured_at,
        }
    }

    pub fn soil(
        moisture_percent: f64,
        raw_value: Option<i64>,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            values: ReadingValues::Soil {
                moisture_percent,
                raw_value,
            },
            captured_at,
        }
    }

    pub fn source(&self) -> RecordSource {
        match self.values {
            ReadingValues::Meter { .. } => RecordSource::TemperatureHumidity,
            ReadingValues::Soil { .. } => RecordSource::SoilMoisture,
        }
    }
}

/// A camera frame that has already been handed to object storage. Only the
/// returned URI is kept; the bytes are gone.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageCapture {
    pub blob_uri: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordPayload {
    Reading(Reading),
    Image(ImageCapture),
}

/// What actually gets appended to the store. `unix_timestamp` and `date` are
/// denormalized from `written_at` so dashboard queries can filter without
/// timestamp arithmetic.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub source: RecordSource,
    pub payload: RecordPayload,
    pub written_at: DateTime<Utc>,
    pub unix_timestamp: f64,
    pub date: String,
}

impl LogRecord {
    pub fn from_reading(reading: Reading, written_at: DateTime<Utc>) -> Self {
        Self {
            source: reading.source(),
            payload: RecordPayload::Reading(reading),
            written_at,
            unix_timestamp: unix_seconds(written_at),
            date: written_at.format("%Y-%m-%d").to_string(),
        }
    }

    pub fn from_capture(capture: ImageCapture, written_at: DateTime<Utc>) -> Self {
        Self {
            source: RecordSource::Image,
            payload: RecordPayload::Image(capture),
            written_at,
            unix_timestamp: unix_seconds(written_at),
            date: written_at.format("%Y-%m-%d").to_string(),
        }
    }
}

fn unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}
