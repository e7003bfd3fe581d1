use crate::config::DynamoDbConfig;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::types::{AttributeValue, DeleteRequest, WriteRequest};
use aws_sdk_dynamodb::Client as DynamoDbClient;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info, instrument};

/// Largest batch the DynamoDB BatchWriteItem call accepts.
pub const MAX_ENTRY_DELETE_BATCH: usize = 25;

/// Wire format for `created_at`, kept as a sortable plain string.
const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Processing state of a catalog entry. Entries are only ever written after
/// the pipeline has fully completed, so `Processed` is the only state
/// currently persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoStatus {
    Processed,
}

impl PhotoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoStatus::Processed => "PROCESSED",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "PROCESSED" => Ok(PhotoStatus::Processed),
            other => bail!("unknown photo status: {other}"),
        }
    }
}

/// One processed photo, as persisted in the catalog.
///
/// Created exactly once by the ingestion pipeline, never mutated, destroyed
/// only by an explicit delete. Addressed solely by the (owner_id, photo_id)
/// composite key.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub owner_id: String,
    pub photo_id: String,
    pub raw_object_key: String,
    pub thumbnail_object_key: String,
    /// Label names in the detector's confidence ranking.
    pub labels: Vec<String>,
    /// Label name -> confidence in [0, 100], 2 decimal places.
    pub confidence: HashMap<String, f64>,
    pub created_at: DateTime<Utc>,
    pub status: PhotoStatus,
    /// MIME type of the generated thumbnail.
    pub content_type: String,
}

impl CatalogEntry {
    pub fn partition_key(owner_id: &str) -> String {
        format!("USER#{owner_id}")
    }

    pub fn sort_key(photo_id: &str) -> String {
        format!("PHOTO#{photo_id}")
    }
}

/// Catalog persistence capability keyed by (owner_id, photo_id).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Persist an entry, overwriting any previous entry under the same key.
    async fn put_entry(&self, entry: &CatalogEntry) -> Result<()>;

    /// Point lookup by composite key.
    async fn get_entry(&self, owner_id: &str, photo_id: &str) -> Result<Option<CatalogEntry>>;

    /// Delete one entry. Deleting a missing entry is not an error.
    async fn delete_entry(&self, owner_id: &str, photo_id: &str) -> Result<()>;

    /// All entries belonging to an owner, following pagination until the
    /// store reports no more pages. Order is the store's sort-key order.
    async fn entries_for_owner(&self, owner_id: &str) -> Result<Vec<CatalogEntry>>;

    /// Delete up to [`MAX_ENTRY_DELETE_BATCH`] entries in one request.
    async fn delete_entries(&self, owner_id: &str, photo_ids: Vec<String>) -> Result<()>;
}

/// DynamoDB-backed catalog store
///
/// Table schema: `PK = "USER#{owner_id}"`, `SK = "PHOTO#{photo_id}"`, plus the
/// [`CatalogEntry`] attributes. Items are validated into typed entries at this
/// boundary; nothing dict-shaped escapes it.
pub struct DynamoCatalogStore {
    client: DynamoDbClient,
    table: String,
}

impl DynamoCatalogStore {
    /// Create a new DynamoDB catalog store
    pub async fn new(config: &DynamoDbConfig, region: &str) -> Result<Self> {
        let mut config_builder = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()));

        // Custom endpoint for DynamoDB Local testing
        if let Some(ref endpoint_url) = config.endpoint_url {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }

        let client = DynamoDbClient::new(&config_builder.load().await);

        info!(table = %config.table, "DynamoDB catalog store initialized");

        Ok(Self {
            client,
            table: config.table.clone(),
        })
    }
}

#[async_trait]
impl CatalogStore for DynamoCatalogStore {
    #[instrument(skip(self, entry), fields(owner_id = %entry.owner_id, photo_id = %entry.photo_id))]
    async fn put_entry(&self, entry: &CatalogEntry) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(to_item(entry)))
            .send()
            .await
            .context("DynamoDB put_item failed")?;

        debug!(photo_id = %entry.photo_id, "Catalog entry written");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_entry(&self, owner_id: &str, photo_id: &str) -> Result<Option<CatalogEntry>> {
        let response = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("PK", AttributeValue::S(CatalogEntry::partition_key(owner_id)))
            .key("SK", AttributeValue::S(CatalogEntry::sort_key(photo_id)))
            .send()
            .await
            .context("DynamoDB get_item failed")?;

        response.item().map(from_item).transpose()
    }

    #[instrument(skip(self))]
    async fn delete_entry(&self, owner_id: &str, photo_id: &str) -> Result<()> {
        self.client
            .delete_item()
            .table_name(&self.table)
            .key("PK", AttributeValue::S(CatalogEntry::partition_key(owner_id)))
            .key("SK", AttributeValue::S(CatalogEntry::sort_key(photo_id)))
            .send()
            .await
            .context("DynamoDB delete_item failed")?;

        debug!(owner_id = %owner_id, photo_id = %photo_id, "Catalog entry deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn entries_for_owner(&self, owner_id: &str) -> Result<Vec<CatalogEntry>> {
        let mut entries = Vec::new();
        let mut last_evaluated_key: Option<HashMap<String, AttributeValue>> = None;

        loop {
            let mut query = self
                .client
                .query()
                .table_name(&self.table)
                .key_condition_expression("PK = :pk")
                .expression_attribute_values(
                    ":pk",
                    AttributeValue::S(CatalogEntry::partition_key(owner_id)),
                );

            if let Some(lek) = last_evaluated_key.take() {
                query = query.set_exclusive_start_key(Some(lek));
            }

            let response = query.send().await.context("DynamoDB query failed")?;

            for item in response.items() {
                entries.push(from_item(item)?);
            }

            match response.last_evaluated_key() {
                Some(lek) => last_evaluated_key = Some(lek.clone()),
                None => break,
            }
        }

        debug!(owner_id = %owner_id, count = entries.len(), "Queried catalog entries");
        Ok(entries)
    }

    #[instrument(skip(self, photo_ids), fields(count = photo_ids.len()))]
    async fn delete_entries(&self, owner_id: &str, photo_ids: Vec<String>) -> Result<()> {
        if photo_ids.is_empty() {
            return Ok(());
        }

        let requests = photo_ids
            .into_iter()
            .map(|photo_id| {
                let delete = DeleteRequest::builder()
                    .key("PK", AttributeValue::S(CatalogEntry::partition_key(owner_id)))
                    .key("SK", AttributeValue::S(CatalogEntry::sort_key(&photo_id)))
                    .build()
                    .context("Failed to build delete request")?;
                Ok(WriteRequest::builder().delete_request(delete).build())
            })
            .collect::<Result<Vec<_>>>()?;

        self.client
            .batch_write_item()
            .request_items(&self.table, requests)
            .send()
            .await
            .context("DynamoDB batch_write_item failed")?;

        Ok(())
    }
}

/// Serialize an entry into a DynamoDB item.
fn to_item(entry: &CatalogEntry) -> HashMap<String, AttributeValue> {
    let labels = entry
        .labels
        .iter()
        .map(|label| AttributeValue::S(label.clone()))
        .collect();

    let confidence = entry
        .confidence
        .iter()
        .map(|(label, score)| (label.clone(), AttributeValue::N(score.to_string())))
        .collect();

    HashMap::from([
        (
            "PK".to_string(),
            AttributeValue::S(CatalogEntry::partition_key(&entry.owner_id)),
        ),
        (
            "SK".to_string(),
            AttributeValue::S(CatalogEntry::sort_key(&entry.photo_id)),
        ),
        (
            "photo_id".to_string(),
            AttributeValue::S(entry.photo_id.clone()),
        ),
        (
            "s3_photo".to_string(),
            AttributeValue::S(entry.raw_object_key.clone()),
        ),
        (
            "s3_thumbnail".to_string(),
            AttributeValue::S(entry.thumbnail_object_key.clone()),
        ),
        ("labels".to_string(), AttributeValue::L(labels)),
        ("confidence".to_string(), AttributeValue::M(confidence)),
        (
            "created_at".to_string(),
            AttributeValue::S(entry.created_at.format(CREATED_AT_FORMAT).to_string()),
        ),
        (
            "status".to_string(),
            AttributeValue::S(entry.status.as_str().to_string()),
        ),
        (
            "content_type".to_string(),
            AttributeValue::S(entry.content_type.clone()),
        ),
    ])
}

/// Decode and validate a DynamoDB item into a typed entry.
fn from_item(item: &HashMap<String, AttributeValue>) -> Result<CatalogEntry> {
    let string_attr = |name: &str| -> Result<String> {
        item.get(name)
            .and_then(|av| av.as_s().ok())
            .cloned()
            .ok_or_else(|| anyhow!("catalog item missing string attribute {name}"))
    };

    let pk = string_attr("PK")?;
    let owner_id = pk
        .strip_prefix("USER#")
        .ok_or_else(|| anyhow!("catalog item has malformed PK: {pk}"))?
        .to_string();

    // Absent labels/confidence decode as empty; present-but-malformed
    // elements are an error like every other attribute.
    let labels: Vec<String> = match item.get("labels") {
        Some(av) => av
            .as_l()
            .map_err(|_| anyhow!("catalog item has non-list labels"))?
            .iter()
            .map(|av| {
                av.as_s()
                    .cloned()
                    .map_err(|_| anyhow!("catalog item has non-string label"))
            })
            .collect::<Result<_>>()?,
        None => Vec::new(),
    };

    let confidence: HashMap<String, f64> = match item.get("confidence") {
        Some(av) => av
            .as_m()
            .map_err(|_| anyhow!("catalog item has non-map confidence"))?
            .iter()
            .map(|(label, av)| {
                let score = av
                    .as_n()
                    .map_err(|_| anyhow!("catalog item has non-numeric confidence for {label}"))?
                    .parse::<f64>()
                    .with_context(|| format!("catalog item has unparsable confidence for {label}"))?;
                Ok((label.clone(), score))
            })
            .collect::<Result<_>>()?,
        None => HashMap::new(),
    };

    let created_at_raw = string_attr("created_at")?;
    let created_at = NaiveDateTime::parse_from_str(&created_at_raw, CREATED_AT_FORMAT)
        .with_context(|| format!("catalog item has malformed created_at: {created_at_raw}"))?
        .and_utc();

    Ok(CatalogEntry {
        owner_id,
        photo_id: string_attr("photo_id")?,
        raw_object_key: string_attr("s3_photo")?,
        thumbnail_object_key: string_attr("s3_thumbnail")?,
        labels,
        confidence,
        created_at,
        status: PhotoStatus::parse(&string_attr("status")?)?,
        content_type: string_attr("content_type")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_entry() -> CatalogEntry {
        CatalogEntry {
            owner_id: "u1".to_string(),
            photo_id: "abc".to_string(),
            raw_object_key: "u1/photos/abc.jpg".to_string(),
            thumbnail_object_key: "u1/thumbnails/abc.jpg".to_string(),
            labels: vec!["cat".to_string(), "dog".to_string()],
            confidence: HashMap::from([("cat".to_string(), 95.57), ("dog".to_string(), 70.0)]),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            status: PhotoStatus::Processed,
            content_type: "image/png".to_string(),
        }
    }

    #[test]
    fn test_composite_key_format() {
        assert_eq!(CatalogEntry::partition_key("u1"), "USER#u1");
        assert_eq!(CatalogEntry::sort_key("abc"), "PHOTO#abc");
    }

    #[test]
    fn test_item_round_trip() {
        let entry = sample_entry();
        let item = to_item(&entry);

        assert_eq!(item["PK"], AttributeValue::S("USER#u1".to_string()));
        assert_eq!(item["SK"], AttributeValue::S("PHOTO#abc".to_string()));
        assert_eq!(item["status"], AttributeValue::S("PROCESSED".to_string()));
        assert_eq!(
            item["created_at"],
            AttributeValue::S("2024-03-01 12:00:00".to_string())
        );

        let decoded = from_item(&item).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_from_item_rejects_missing_fields() {
        let mut item = to_item(&sample_entry());
        item.remove("s3_thumbnail");
        assert!(from_item(&item).is_err());
    }

    #[test]
    fn test_from_item_rejects_unknown_status() {
        let mut item = to_item(&sample_entry());
        item.insert(
            "status".to_string(),
            AttributeValue::S("PENDING".to_string()),
        );
        assert!(from_item(&item).is_err());
    }

    #[test]
    fn test_from_item_rejects_non_string_label() {
        let mut item = to_item(&sample_entry());
        item.insert(
            "labels".to_string(),
            AttributeValue::L(vec![
                AttributeValue::S("cat".to_string()),
                AttributeValue::N("42".to_string()),
            ]),
        );
        assert!(from_item(&item).is_err());
    }

    #[test]
    fn test_from_item_rejects_malformed_confidence() {
        let mut item = to_item(&sample_entry());
        item.insert(
            "confidence".to_string(),
            AttributeValue::M(HashMap::from([(
                "cat".to_string(),
                AttributeValue::S("95.57".to_string()),
            )])),
        );
        assert!(from_item(&item).is_err());

        let mut item = to_item(&sample_entry());
        item.insert(
            "confidence".to_string(),
            AttributeValue::M(HashMap::from([(
                "cat".to_string(),
                AttributeValue::N("not-a-number".to_string()),
            )])),
        );
        assert!(from_item(&item).is_err());
    }

    #[test]
    fn test_from_item_defaults_absent_labels() {
        let mut item = to_item(&sample_entry());
        item.remove("labels");
        item.remove("confidence");
        let decoded = from_item(&item).unwrap();
        assert!(decoded.labels.is_empty());
        assert!(decoded.confidence.is_empty());
    }

    #[test]
    fn test_labels_preserve_order() {
        let item = to_item(&sample_entry());
        let decoded = from_item(&item).unwrap();
        assert_eq!(decoded.labels, vec!["cat", "dog"]);
    }
}
