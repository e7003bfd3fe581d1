use crate::config::RekognitionConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_rekognition::types::{Image, S3Object};
use aws_sdk_rekognition::Client as RekognitionClient;
use tracing::{debug, instrument};

/// One detected label, confidence in [0, 100] rounded to 2 decimal places.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedLabel {
    pub name: String,
    pub confidence: f64,
}

/// Ranked label detection for an image already in the object store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LabelDetector: Send + Sync {
    /// Detect labels for the object at `key` in `bucket`. Order of the
    /// returned labels is the detector's confidence ranking.
    async fn detect_labels(&self, bucket: &str, key: &str) -> Result<Vec<DetectedLabel>>;
}

/// Rekognition-backed label detector
pub struct RekognitionLabelDetector {
    client: RekognitionClient,
    max_labels: i32,
    min_confidence: f32,
}

impl RekognitionLabelDetector {
    pub fn new(client: RekognitionClient, config: &RekognitionConfig) -> Self {
        Self {
            client,
            max_labels: config.max_labels,
            min_confidence: config.min_confidence,
        }
    }
}

#[async_trait]
impl LabelDetector for RekognitionLabelDetector {
    #[instrument(skip(self))]
    async fn detect_labels(&self, bucket: &str, key: &str) -> Result<Vec<DetectedLabel>> {
        let image = Image::builder()
            .s3_object(
                S3Object::builder()
                    .bucket(bucket)
                    .name(key)
                    .build(),
            )
            .build();

        let response = self
            .client
            .detect_labels()
            .image(image)
            .max_labels(self.max_labels)
            .min_confidence(self.min_confidence)
            .send()
            .await
            .context("Rekognition detect_labels failed")?;

        let labels: Vec<DetectedLabel> = response
            .labels()
            .iter()
            .filter_map(|label| {
                let name = label.name()?.to_string();
                let confidence = round_confidence(label.confidence().unwrap_or(0.0));
                Some(DetectedLabel { name, confidence })
            })
            .collect();

        debug!(bucket = %bucket, key = %key, count = labels.len(), "Detected labels");

        Ok(labels)
    }
}

/// Round a detector confidence to 2 decimal places.
pub fn round_confidence(confidence: f32) -> f64 {
    (confidence as f64 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_confidence() {
        assert_eq!(round_confidence(95.567), 95.57);
        assert_eq!(round_confidence(70.0), 70.0);
        assert_eq!(round_confidence(99.994), 99.99);
        assert_eq!(round_confidence(99.995), 100.0);
    }
}
