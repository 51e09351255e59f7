use crate::config::Config;
use crate::error::LoggerError;
use crate::record::{LogRecord, ReadingValues, RecordPayload};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;

const STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Durable store collaborator: append-only, best effort. On failure the
/// caller logs and discards the record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn append(&self, record: &LogRecord) -> Result<(), LoggerError>;
}

/// Firestore REST append. Documents land in one collection with
/// store-assigned ids; the logger never reads them back.
pub struct FirestoreStore {
    http: Client,
    base: String,
    project: String,
    database: String,
    collection: String,
    token: Option<String>,
}

impl FirestoreStore {
    pub fn new(config: &Config) -> Self {
        Self {
            http: Client::new(),
            base: config.firestore_base.clone(),
            project: config.firestore_project.clone(),
            database: config.firestore_database.clone(),
            collection: config.firestore_collection.clone(),
            token: config.firestore_token.clone(),
        }
    }

    fn documents_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/databases/{}/documents/{}",
            self.base, self.project, self.database, self.collection
        )
    }
}

#[async_trait]
impl RecordStore for FirestoreStore {
    async fn append(&self, record: &LogRecord) -> Result<(), LoggerError> {
        let body = json!({ "fields": encode_fields(record) });

        let mut request = self
            .http
            .post(self.documents_url())
            .timeout(STORE_TIMEOUT)
            .json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| LoggerError::store(format!("{}: {err}", self.collection)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoggerError::store(format!(
                "{}: unexpected status {status}",
                self.collection
            )));
        }
        Ok(())
    }
}

/// Firestore's typed-value encoding. Integers are strings on the wire per the
/// REST API.
fn encode_fields(record: &LogRecord) -> Value {
    let mut fields = Map::new();
    fields.insert("source".into(), string_value(record.source.as_str()));
    fields.insert("written_at".into(), timestamp_value(record.written_at));
    fields.insert(
        "unix_timestamp".into(),
        json!({ "doubleValue": record.unix_timestamp }),
    );
    fields.insert("date".into(), string_value(&record.date));

    match &record.payload {
        RecordPayload::Reading(reading) => {
            fields.insert("captured_at".into(), timestamp_value(reading.captured_at));
            match reading.values {
                ReadingValues::Meter {
                    temperature,
                    humidity,
                } => {
                    fields.insert("temperature".into(), json!({ "doubleValue": temperature }));
                    fields.insert("humidity".into(), json!({ "doubleValue": humidity }));
                }
                ReadingValues::Soil {
                    moisture_percent,
                    raw_value,
                } => {
                    fields.insert(
                        "soil_moisture".into(),
                        json!({ "doubleValue": moisture_percent }),
                    );
                    if let Some(raw) = raw_value {
                        fields.insert(
                            "soil_raw".into(),
                            json!({ "integerValue": raw.to_string() }),
                        );
                    }
                }
            }
        }
        RecordPayload::Image(capture) => {
            fields.insert("captured_at".into(), timestamp_value(capture.captured_at));
            fields.insert("image_uri".into(), string_value(&capture.blob_uri));
        }
    }

    Value::Object(fields)
}

fn string_value(value: &str) -> Value {
    json!({ "stringValue": value })
}

fn timestamp_value(at: DateTime<Utc>) -> Value {
    json!({ "timestampValue": at.to_rfc3339_opts(SecondsFormat::Micros, true) })
}
