use crate::catalog::{CatalogEntry, CatalogStore, PhotoStatus};
use crate::config::EventQueueConfig;
use crate::error::IngestError;
use crate::keys::{decode_event_key, is_thumbnail_key, parse_photo_key, thumbnail_key_for};
use crate::labeler::LabelDetector;
use crate::thumbnail::{render_png_thumbnail, THUMBNAIL_CONTENT_TYPE};
use crate::object_store::ObjectStore;
use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client as SqsClient;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// S3 event notification envelope, as delivered through SQS.
#[derive(Debug, Deserialize)]
pub struct S3EventEnvelope {
    #[serde(rename = "Records", default)]
    pub records: Vec<S3EventRecord>,
}

#[derive(Debug, Deserialize)]
pub struct S3EventRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Deserialize)]
pub struct S3Entity {
    pub bucket: S3BucketRef,
    pub object: S3ObjectRef,
}

#[derive(Debug, Deserialize)]
pub struct S3BucketRef {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct S3ObjectRef {
    /// URL-encoded object key (unquote-plus semantics).
    pub key: String,
}

/// What happened to one event record.
#[derive(Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Catalog entry written.
    Processed,
    /// Key was under the thumbnail namespace; skipped with no side effects.
    Skipped,
}

/// Asynchronous ingestion worker.
///
/// Long-polls the upload event queue and runs the linear pipeline for each
/// new object: parse key, detect labels, fetch bytes, render thumbnail, write
/// catalog entry last. A message is only deleted from the queue once every
/// step succeeded (or the record was guard-skipped); otherwise the visibility
/// timeout redelivers it, so delivery is at least once and duplicate
/// processing is tolerated rather than locked out.
pub struct IngestWorker {
    sqs: SqsClient,
    queue_url: String,
    wait_time_secs: i32,
    max_messages: i32,
    objects: Arc<dyn ObjectStore>,
    catalog: Arc<dyn CatalogStore>,
    detector: Arc<dyn LabelDetector>,
}

impl IngestWorker {
    /// Create a new ingest worker polling the configured queue
    pub async fn new(
        config: &EventQueueConfig,
        region: &str,
        objects: Arc<dyn ObjectStore>,
        catalog: Arc<dyn CatalogStore>,
        detector: Arc<dyn LabelDetector>,
    ) -> Result<Self> {
        let mut config_builder = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()));

        if let Some(ref endpoint_url) = config.endpoint_url {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }

        let sqs = SqsClient::new(&config_builder.load().await);

        info!(queue_url = %config.queue_url, "Ingest worker initialized");

        Ok(Self {
            sqs,
            queue_url: config.queue_url.clone(),
            wait_time_secs: config.wait_time_secs,
            max_messages: config.max_messages,
            objects,
            catalog,
            detector,
        })
    }

    /// Start consuming upload events
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        info!("Starting ingest worker");

        loop {
            let response = self
                .sqs
                .receive_message()
                .queue_url(&self.queue_url)
                .wait_time_seconds(self.wait_time_secs)
                .max_number_of_messages(self.max_messages)
                .send()
                .await;

            let messages = match response {
                Ok(output) => output.messages.unwrap_or_default(),
                Err(e) => {
                    error!(error = %e, "Failed to receive from event queue");
                    metrics::counter!("photobank.queue.errors").increment(1);
                    continue;
                }
            };

            for message in messages {
                match self.process_message(&message).await {
                    Ok(()) => {
                        // Ack: delete the message so it is not redelivered.
                        if let Some(receipt) = message.receipt_handle() {
                            if let Err(e) = self
                                .sqs
                                .delete_message()
                                .queue_url(&self.queue_url)
                                .receipt_handle(receipt)
                                .send()
                                .await
                            {
                                warn!(error = %e, "Failed to delete processed message");
                            }
                        }
                        metrics::counter!("photobank.events.processed").increment(1);
                    }
                    Err(e) => {
                        // Leave the message unacked; the queue redelivers it
                        // after the visibility timeout expires.
                        error!(error = %e, "Failed to process upload event");
                        metrics::counter!("photobank.events.failed").increment(1);
                    }
                }
            }
        }
    }

    /// Process a single queue message, which may carry several event records.
    async fn process_message(&self, message: &Message) -> Result<()> {
        let body = message.body().context("Message has no body")?;

        let envelope: S3EventEnvelope =
            serde_json::from_str(body).context("Failed to deserialize S3 event envelope")?;

        for record in &envelope.records {
            self.ingest(&record.s3.bucket.name, &record.s3.object.key)
                .await?;
        }

        Ok(())
    }

    /// Run the pipeline for one newly created object.
    #[instrument(skip(self), fields(bucket = %bucket))]
    pub async fn ingest(&self, bucket: &str, raw_key: &str) -> Result<IngestOutcome, IngestError> {
        let key = decode_event_key(raw_key);

        // Thumbnail writes also raise ObjectCreated events; skipping them here
        // breaks the feedback loop between raw uploads and pipeline output.
        if is_thumbnail_key(&key) {
            debug!(key = %key, "Skipping thumbnail object");
            metrics::counter!("photobank.events.skipped").increment(1);
            return Ok(IngestOutcome::Skipped);
        }

        let parsed = parse_photo_key(&key)?;

        info!(
            owner_id = %parsed.owner_id,
            photo_id = %parsed.photo_id,
            "Ingesting photo"
        );

        let detected = self
            .detector
            .detect_labels(bucket, &key)
            .await
            .context("Label detection failed")?;

        let bytes = self
            .objects
            .fetch_object(&key)
            .await
            .context("Failed to fetch uploaded photo")?;

        let thumbnail = render_png_thumbnail(&bytes)?;
        let thumbnail_key = thumbnail_key_for(&key);

        self.objects
            .put_object(&thumbnail_key, thumbnail, THUMBNAIL_CONTENT_TYPE)
            .await
            .context("Failed to write thumbnail")?;

        let labels: Vec<String> = detected.iter().map(|l| l.name.clone()).collect();
        let confidence = detected
            .into_iter()
            .map(|l| (l.name, l.confidence))
            .collect();

        // The catalog entry is the last write: readers never observe a photo
        // whose thumbnail or labels are still missing.
        let entry = CatalogEntry {
            owner_id: parsed.owner_id,
            photo_id: parsed.photo_id.clone(),
            raw_object_key: key,
            thumbnail_object_key: thumbnail_key,
            labels,
            confidence,
            created_at: Utc::now(),
            status: PhotoStatus::Processed,
            content_type: THUMBNAIL_CONTENT_TYPE.to_string(),
        };

        self.catalog
            .put_entry(&entry)
            .await
            .context("Failed to write catalog entry")?;

        info!(photo_id = %parsed.photo_id, "Photo ingested");
        metrics::counter!("photobank.photos.ingested").increment(1);

        Ok(IngestOutcome::Processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MockCatalogStore;
    use crate::labeler::{DetectedLabel, MockLabelDetector};
    use crate::object_store::MockObjectStore;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use mockall::predicate::eq;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    async fn worker(
        objects: MockObjectStore,
        catalog: MockCatalogStore,
        detector: MockLabelDetector,
    ) -> IngestWorker {
        let config = EventQueueConfig {
            queue_url: "http://localhost:4566/000000000000/photobank-events".to_string(),
            wait_time_secs: 0,
            max_messages: 1,
            endpoint_url: Some("http://localhost:4566".to_string()),
        };
        IngestWorker::new(
            &config,
            "us-east-1",
            Arc::new(objects),
            Arc::new(catalog),
            Arc::new(detector),
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_event_envelope_decoding() {
        let json = r#"{
            "Records": [{
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": {"name": "photo-bucket"},
                    "object": {"key": "u1/photos/abc.jpg", "size": 1024}
                }
            }]
        }"#;

        let envelope: S3EventEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.records.len(), 1);
        assert_eq!(envelope.records[0].s3.bucket.name, "photo-bucket");
        assert_eq!(envelope.records[0].s3.object.key, "u1/photos/abc.jpg");
    }

    #[test]
    fn test_event_envelope_without_records() {
        // s3:TestEvent messages have no Records array.
        let envelope: S3EventEnvelope =
            serde_json::from_str(r#"{"Service":"Amazon S3","Event":"s3:TestEvent"}"#).unwrap();
        assert!(envelope.records.is_empty());
    }

    #[tokio::test]
    async fn test_thumbnail_keys_skipped_without_side_effects() {
        // No expectations: any store or detector call would panic the test.
        let worker = worker(
            MockObjectStore::new(),
            MockCatalogStore::new(),
            MockLabelDetector::new(),
        )
        .await;

        let outcome = worker
            .ingest("photo-bucket", "u1/thumbnails/abc.png")
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_foreign_category_key_rejected_without_side_effects() {
        // A category the substitution rule cannot rewrite would make the
        // thumbnail land on the source key and re-trigger ingestion; the
        // parser must refuse it before any store or detector call runs.
        let worker = worker(
            MockObjectStore::new(),
            MockCatalogStore::new(),
            MockLabelDetector::new(),
        )
        .await;

        let result = worker.ingest("photo-bucket", "u1/videos/abc.jpg").await;
        assert!(matches!(result, Err(IngestError::MalformedKey(_))));
    }

    #[tokio::test]
    async fn test_malformed_key_is_structural_error() {
        let worker = worker(
            MockObjectStore::new(),
            MockCatalogStore::new(),
            MockLabelDetector::new(),
        )
        .await;

        let result = worker.ingest("photo-bucket", "orphan.jpg").await;
        assert!(matches!(result, Err(IngestError::MalformedKey(_))));
    }

    #[tokio::test]
    async fn test_ingest_writes_thumbnail_and_entry() {
        let mut objects = MockObjectStore::new();
        objects
            .expect_fetch_object()
            .with(eq("u1/photos/abc.jpg"))
            .returning(|_| Ok(png_bytes(600, 300)));
        objects
            .expect_put_object()
            .withf(|key, body, content_type| {
                let decoded = image::load_from_memory(body).unwrap();
                key == "u1/thumbnails/abc.jpg"
                    && content_type == "image/png"
                    && decoded.width() == 300
                    && decoded.height() == 150
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut catalog = MockCatalogStore::new();
        catalog
            .expect_put_entry()
            .withf(|entry| {
                entry.owner_id == "u1"
                    && entry.photo_id == "abc"
                    && entry.raw_object_key == "u1/photos/abc.jpg"
                    && entry.thumbnail_object_key == "u1/thumbnails/abc.jpg"
                    && entry.labels == vec!["cat".to_string(), "dog".to_string()]
                    && entry.confidence["cat"] == 95.57
                    && entry.confidence["dog"] == 70.0
                    && entry.status == PhotoStatus::Processed
                    && entry.content_type == "image/png"
            })
            .times(1)
            .returning(|_| Ok(()));

        let mut detector = MockLabelDetector::new();
        detector
            .expect_detect_labels()
            .with(eq("photo-bucket"), eq("u1/photos/abc.jpg"))
            .returning(|_, _| {
                Ok(vec![
                    DetectedLabel {
                        name: "cat".to_string(),
                        confidence: 95.57,
                    },
                    DetectedLabel {
                        name: "dog".to_string(),
                        confidence: 70.0,
                    },
                ])
            });

        let worker = worker(objects, catalog, detector).await;
        let outcome = worker
            .ingest("photo-bucket", "u1/photos/abc.jpg")
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Processed);
    }

    #[tokio::test]
    async fn test_no_entry_written_when_thumbnail_write_fails() {
        let mut objects = MockObjectStore::new();
        objects
            .expect_fetch_object()
            .returning(|_| Ok(png_bytes(100, 100)));
        objects
            .expect_put_object()
            .returning(|_, _, _| Err(anyhow::anyhow!("s3 unavailable")));

        // put_entry must not run; no expectation set.
        let catalog = MockCatalogStore::new();

        let mut detector = MockLabelDetector::new();
        detector.expect_detect_labels().returning(|_, _| Ok(vec![]));

        let worker = worker(objects, catalog, detector).await;
        let result = worker.ingest("photo-bucket", "u1/photos/abc.jpg").await;
        assert!(matches!(result, Err(IngestError::Dependency(_))));
    }

    #[tokio::test]
    async fn test_url_encoded_event_key_decoded() {
        let worker = worker(
            MockObjectStore::new(),
            MockCatalogStore::new(),
            MockLabelDetector::new(),
        )
        .await;

        // Encoded thumbnail key must still hit the guard after decoding.
        let outcome = worker
            .ingest("photo-bucket", "u1%2Fthumbnails%2Fabc.png")
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Skipped);
    }
}
