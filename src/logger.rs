use crate::config::QuietHours;
use crate::error::LoggerError;
use crate::record::{ImageCapture, LogRecord, Reading};
use crate::sensor::SensorApi;
use crate::store::RecordStore;
use crate::upload::BlobStore;
use chrono::{Local, Timelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Drives the two logging cadences: a fine interval for meter + soil readings
/// and a coarse interval for camera captures. Handler failures are logged at
/// the tick boundary and the tick is skipped; the next scheduled tick is the
/// only retry.
pub struct SensorLogger {
    sensors: Arc<dyn SensorApi>,
    store: Arc<dyn RecordStore>,
    uploader: Option<Arc<dyn BlobStore>>,
    quiet_hours: Option<QuietHours>,
}

impl SensorLogger {
    pub fn new(
        sensors: Arc<dyn SensorApi>,
        store: Arc<dyn RecordStore>,
        uploader: Option<Arc<dyn BlobStore>>,
        quiet_hours: Option<QuietHours>,
    ) -> Self {
        Self {
            sensors,
            store,
            uploader,
            quiet_hours,
        }
    }

    /// Runs until `stop` is cancelled. Both cadences fire immediately on
    /// entry, then on a fixed schedule anchored at loop start; a handler that
    /// overruns its interval causes missed ticks to be skipped, never bunched.
    /// When both cadences are due at once the fine tick wins (biased select).
    /// Cancellation is observed between ticks only — an in-flight handler
    /// always runs to completion.
    pub async fn run(
        &self,
        fine_interval: Duration,
        coarse_interval: Duration,
        stop: CancellationToken,
    ) {
        let mut fine = tokio::time::interval(fine_interval);
        fine.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut coarse = tokio::time::interval(coarse_interval);
        coarse.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            fine_secs = fine_interval.as_secs_f64(),
            coarse_secs = coarse_interval.as_secs_f64(),
            "sensor logger started"
        );

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    tracing::info!("stop requested; exiting scheduler loop");
                    return;
                }
                _ = fine.tick() => self.fine_tick().await,
                _ = coarse.tick() => self.coarse_tick().await,
            }
        }
    }

    /// One fine tick: meter then soil. The two handlers are independent; a
    /// meter failure never suppresses the soil fetch.
    async fn fine_tick(&self) {
        if let Err(err) = self.log_meter().await {
            tracing::warn!(
                cadence = "fine",
                handler = "meter",
                kind = err.kind(),
                error = %err,
                "meter tick failed"
            );
        }
        if let Err(err) = self.log_soil().await {
            tracing::warn!(
                cadence = "fine",
                handler = "soil",
                kind = err.kind(),
                error = %err,
                "soil tick failed"
            );
        }
    }

    async fn coarse_tick(&self) {
        let Some(uploader) = self.uploader.clone() else {
            tracing::debug!(cadence = "coarse", "no uploader configured; image capture disabled");
            return;
        };
        if let Some(window) = &self.quiet_hours {
            let hour = Local::now().hour();
            if window.contains(hour) {
                tracing::info!(cadence = "coarse", hour, "quiet hours; skipping image capture");
                return;
            }
        }
        match self.capture_image(uploader.as_ref()).await {
            Ok(uri) => tracing::info!(cadence = "coarse", uri = %uri, "image capture logged"),
            Err(err) => tracing::warn!(
                cadence = "coarse",
                handler = "image",
                kind = err.kind(),
                error = %err,
                "image tick failed"
            ),
        }
    }

    async fn log_meter(&self) -> Result<(), LoggerError> {
        let meter = self.sensors.fetch_meter().await?;
        tracing::info!(
            temperature = meter.temperature,
            humidity = meter.humidity,
            "meter reading"
        );
        let reading = Reading::meter(meter.temperature, meter.humidity, Utc::now());
        self.store
            .append(&LogRecord::from_reading(reading, Utc::now()))
            .await
    }

    async fn log_soil(&self) -> Result<(), LoggerError> {
        let soil = self.sensors.fetch_soil().await?;
        tracing::info!(
            moisture_percent = soil.moisture_percent,
            raw_value = soil.raw_value,
            "soil reading"
        );
        let reading = Reading::soil(soil.moisture_percent, soil.raw_value, Utc::now());
        self.store
            .append(&LogRecord::from_reading(reading, Utc::now()))
            .await
    }

    /// Fetch a frame, upload it, then log the returned URI. A fetch failure
    /// skips the upload; an upload failure discards the bytes — no local
    /// fallback, no record either way.
    async fn capture_image(&self, uploader: &dyn BlobStore) -> Result<String, LoggerError> {
        let image = self.sensors.fetch_image().await?;
        let captured_at = Utc::now();
        let blob_uri = uploader.upload(image.bytes, &image.content_type).await?;
        let capture = ImageCapture {
            blob_uri: blob_uri.clone(),
            captured_at,
        };
        self.store
            .append(&LogRecord::from_capture(capture, Utc::now()))
            .await?;
        Ok(blob_uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordPayload, RecordSource};
    use crate::sensor::{ImageData, MeterReading, SoilReading};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSensors {
        fail_meter: bool,
        fail_soil: bool,
        fail_image: bool,
        meter_calls: AtomicUsize,
        soil_calls: AtomicUsize,
        image_calls: AtomicUsize,
    }

    fn fetch_error(endpoint: &'static str) -> LoggerError {
        LoggerError::Status {
            endpoint,
            status: reqwest::StatusCode::REQUEST_TIMEOUT,
        }
    }

    #[async_trait]
    impl SensorApi for FakeSensors {
        async fn fetch_meter(&self) -> Result<MeterReading, LoggerError> {
            self.meter_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_meter {
                return Err(fetch_error("/sensor/meter"));
            }
            Ok(MeterReading {
                temperature: 24.5,
                humidity: 55.0,
            })
        }

        async fn fetch_soil(&self) -> Result<SoilReading, LoggerError> {
            self.soil_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_soil {
                return Err(fetch_error("/sensor/soil"));
            }
            Ok(SoilReading {
                moisture_percent: 41.2,
                raw_value: Some(612),
            })
        }

        async fn fetch_image(&self) -> Result<ImageData, LoggerError> {
            self.image_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_image {
                return Err(fetch_error("/image"));
            }
            Ok(ImageData {
                bytes: Bytes::from_static(b"jpegbytes"),
                content_type: "image/jpeg".to_string(),
            })
        }
    }

    #[derive(Default)]
    struct FakeStore {
        records: Mutex<Vec<LogRecord>>,
        fail: bool,
        append_delay: Option<Duration>,
    }

    #[async_trait]
    impl RecordStore for FakeStore {
        async fn append(&self, record: &LogRecord) -> Result<(), LoggerError> {
            if let Some(delay) = self.append_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(LoggerError::store("store down"));
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    struct FakeUploader {
        uri: &'static str,
        fail: bool,
        uploads: AtomicUsize,
    }

    impl FakeUploader {
        fn returning(uri: &'static str) -> Self {
            Self {
                uri,
                fail: false,
                uploads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BlobStore for FakeUploader {
        async fn upload(&self, _bytes: Bytes, _content_type: &str) -> Result<String, LoggerError> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LoggerError::upload("bucket rejected write"));
            }
            Ok(self.uri.to_string())
        }
    }

    fn logger(
        sensors: Arc<FakeSensors>,
        store: Arc<FakeStore>,
        uploader: Option<Arc<FakeUploader>>,
    ) -> SensorLogger {
        SensorLogger::new(
            sensors,
            store,
            uploader.map(|u| u as Arc<dyn BlobStore>),
            None,
        )
    }

    fn sources(store: &FakeStore) -> Vec<RecordSource> {
        store.records.lock().unwrap().iter().map(|r| r.source).collect()
    }

    #[tokio::test]
    async fn meter_failure_does_not_suppress_soil() {
        let sensors = Arc::new(FakeSensors {
            fail_meter: true,
            ..Default::default()
        });
        let store = Arc::new(FakeStore::default());
        let logger = logger(sensors.clone(), store.clone(), None);

        logger.fine_tick().await;

        assert_eq!(sensors.meter_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sensors.soil_calls.load(Ordering::SeqCst), 1);
        assert_eq!(sources(&store), vec![RecordSource::SoilMoisture]);
    }

    #[tokio::test]
    async fn successful_fine_tick_writes_both_records() {
        let sensors = Arc::new(FakeSensors::default());
        let store = Arc::new(FakeStore::default());
        logger(sensors, store.clone(), None).fine_tick().await;

        let records = store.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source, RecordSource::TemperatureHumidity);
        match &records[0].payload {
            RecordPayload::Reading(reading) => assert_eq!(
                reading.values,
                crate::record::ReadingValues::Meter {
                    temperature: 24.5,
                    humidity: 55.0
                }
            ),
            RecordPayload::Image(_) => panic!("expected a reading"),
        }
        assert_eq!(records[1].source, RecordSource::SoilMoisture);
        assert!(records[0].written_at <= records[1].written_at);
    }

    #[tokio::test]
    async fn upload_failure_writes_no_record() {
        let sensors = Arc::new(FakeSensors::default());
        let store = Arc::new(FakeStore::default());
        let uploader = Arc::new(FakeUploader {
            fail: true,
            ..FakeUploader::returning("gs://unused")
        });
        logger(sensors.clone(), store.clone(), Some(uploader.clone()))
            .coarse_tick()
            .await;

        assert_eq!(sensors.image_calls.load(Ordering::SeqCst), 1);
        assert_eq!(uploader.uploads.load(Ordering::SeqCst), 1);
        assert!(store.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn image_fetch_failure_skips_upload() {
        let sensors = Arc::new(FakeSensors {
            fail_image: true,
            ..Default::default()
        });
        let store = Arc::new(FakeStore::default());
        let uploader = Arc::new(FakeUploader::returning("gs://unused"));
        logger(sensors, store.clone(), Some(uploader.clone()))
            .coarse_tick()
            .await;

        assert_eq!(uploader.uploads.load(Ordering::SeqCst), 0);
        assert!(store.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn capture_record_carries_uploader_uri() {
        let sensors = Arc::new(FakeSensors::default());
        let store = Arc::new(FakeStore::default());
        let uploader = Arc::new(FakeUploader::returning("gs://bucket/img123.jpg"));
        logger(sensors, store.clone(), Some(uploader)).coarse_tick().await;

        let records = store.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        match &records[0].payload {
            RecordPayload::Image(capture) => {
                assert_eq!(capture.blob_uri, "gs://bucket/img123.jpg");
            }
            RecordPayload::Reading(_) => panic!("expected an image capture"),
        }
    }

    #[tokio::test]
    async fn repeated_failures_accumulate_no_state() {
        let sensors = Arc::new(FakeSensors {
            fail_meter: true,
            fail_soil: true,
            ..Default::default()
        });
        let store = Arc::new(FakeStore::default());
        let logger = logger(sensors.clone(), store.clone(), None);

        for _ in 0..5 {
            logger.fine_tick().await;
        }

        assert_eq!(sensors.meter_calls.load(Ordering::SeqCst), 5);
        assert_eq!(sensors.soil_calls.load(Ordering::SeqCst), 5);
        assert!(store.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_discards_record_and_keeps_going() {
        let sensors = Arc::new(FakeSensors::default());
        let store = Arc::new(FakeStore {
            fail: true,
            ..Default::default()
        });
        let logger = logger(sensors.clone(), store.clone(), None);

        logger.fine_tick().await;
        logger.fine_tick().await;

        assert_eq!(sensors.meter_calls.load(Ordering::SeqCst), 2);
        assert!(store.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fine_tick_wins_when_both_cadences_are_due() {
        let sensors = Arc::new(FakeSensors::default());
        let store = Arc::new(FakeStore::default());
        let uploader = Arc::new(FakeUploader::returning("gs://bucket/img.jpg"));
        let logger = Arc::new(logger(sensors, store.clone(), Some(uploader)));

        // Both intervals fire immediately on entry; the biased select order
        // makes the fine tick run first, then the coarse tick.
        let stop = CancellationToken::new();
        let handle = {
            let logger = logger.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                logger
                    .run(Duration::from_secs(60), Duration::from_secs(60), stop)
                    .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        stop.cancel();
        handle.await.unwrap();

        assert_eq!(
            sources(&store),
            vec![
                RecordSource::TemperatureHumidity,
                RecordSource::SoilMoisture,
                RecordSource::Image
            ]
        );
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_tick_then_exits() {
        let sensors = Arc::new(FakeSensors::default());
        let store = Arc::new(FakeStore {
            append_delay: Some(Duration::from_millis(60)),
            ..Default::default()
        });
        let logger = Arc::new(logger(sensors.clone(), store.clone(), None));

        let stop = CancellationToken::new();
        let handle = {
            let logger = logger.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                logger
                    .run(Duration::from_millis(30), Duration::from_secs(60), stop)
                    .await;
            })
        };

        // Cancel while the first fine tick is still appending; the tick must
        // finish both handlers before the loop observes the cancellation.
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.cancel();
        handle.await.unwrap();

        assert_eq!(
            sources(&store),
            vec![RecordSource::TemperatureHumidity, RecordSource::SoilMoisture]
        );
        assert_eq!(sensors.meter_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_cadence_never_delays_the_other() {
        let sensors = Arc::new(FakeSensors {
            fail_image: true,
            ..Default::default()
        });
        let store = Arc::new(FakeStore::default());
        let uploader = Arc::new(FakeUploader::returning("gs://unused"));
        let logger = Arc::new(logger(sensors.clone(), store.clone(), Some(uploader)));

        let stop = CancellationToken::new();
        let handle = {
            let logger = logger.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                logger
                    .run(Duration::from_millis(25), Duration::from_millis(25), stop)
                    .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(90)).await;
        stop.cancel();
        handle.await.unwrap();

        // The coarse cadence failed every time, yet fine readings kept
        // landing on schedule.
        let meter_writes = sources(&store)
            .iter()
            .filter(|s| **s == RecordSource::TemperatureHumidity)
            .count();
        assert!(meter_writes >= 2, "expected repeated fine ticks, got {meter_writes}");
        assert!(sensors.image_calls.load(Ordering::SeqCst) >= 2);
        assert!(sources(&store).iter().all(|s| *s != RecordSource::Image));
    }

    #[tokio::test]
    async fn quiet_hours_skip_image_capture_only() {
        let sensors = Arc::new(FakeSensors::default());
        let store = Arc::new(FakeStore::default());
        let uploader = Arc::new(FakeUploader::returning("gs://unused"));
        // Window built around the current local hour so the skip is
        // deterministic whenever the test runs.
        let hour = Local::now().hour();
        let logger = SensorLogger::new(
            sensors.clone(),
            store.clone(),
            Some(uploader.clone() as Arc<dyn BlobStore>),
            Some(QuietHours {
                start_hour: hour,
                end_hour: (hour + 1) % 24,
            }),
        );

        logger.coarse_tick().await;
        logger.fine_tick().await;

        assert_eq!(sensors.image_calls.load(Ordering::SeqCst), 0);
        assert_eq!(uploader.uploads.load(Ordering::SeqCst), 0);
        assert_eq!(store.records.lock().unwrap().len(), 2);
    }
}
