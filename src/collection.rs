use crate::catalog::{CatalogEntry, CatalogStore, MAX_ENTRY_DELETE_BATCH};
use crate::error::CollectionError;
use crate::keys::owner_prefix;
use crate::object_store::{ObjectStore, MAX_DELETE_BATCH};
use chrono::{DateTime, Utc};
use futures::future::try_join;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// One photo in a list response: identifying fields plus two freshly minted
/// time-limited read URLs. URLs are generated per request, never stored.
#[derive(Debug, Clone, Serialize)]
pub struct PhotoSummary {
    pub photo_id: String,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub content_type: String,
    pub labels: Vec<String>,
    pub photo_url: String,
    pub thumbnail_url: String,
}

/// Outcome of a bulk delete.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteAllSummary {
    /// Number of catalog entries removed.
    pub deleted_count: usize,
}

/// List/delete operations on a user's photo collection.
///
/// Dependencies are injected explicitly; the service holds no other state.
/// Delete operations are not atomic across the two stores: a crash between
/// object and metadata deletion can orphan either side, and callers must
/// tolerate eventual consistency after partial failures.
pub struct CollectionService {
    objects: Arc<dyn ObjectStore>,
    catalog: Arc<dyn CatalogStore>,
}

impl CollectionService {
    pub fn new(objects: Arc<dyn ObjectStore>, catalog: Arc<dyn CatalogStore>) -> Self {
        Self { objects, catalog }
    }

    /// List every catalog entry belonging to `owner_id`, each with fresh
    /// presigned URLs for the raw photo and the thumbnail.
    #[instrument(skip(self))]
    pub async fn list_photos(&self, owner_id: &str) -> Result<Vec<PhotoSummary>, CollectionError> {
        let entries = self.catalog.entries_for_owner(owner_id).await?;

        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            summaries.push(self.summarize(entry).await?);
        }

        Ok(summaries)
    }

    async fn summarize(&self, entry: CatalogEntry) -> Result<PhotoSummary, CollectionError> {
        let (photo_url, thumbnail_url) = try_join(
            self.objects.presigned_get_url(&entry.raw_object_key),
            self.objects.presigned_get_url(&entry.thumbnail_object_key),
        )
        .await?;

        Ok(PhotoSummary {
            photo_id: entry.photo_id,
            created_at: entry.created_at,
            status: entry.status.as_str().to_string(),
            content_type: entry.content_type,
            labels: entry.labels,
            photo_url,
            thumbnail_url,
        })
    }

    /// Delete one photo: both objects first, then the catalog entry as the
    /// final, authoritative step. If an object delete fails the entry is left
    /// intact so the photo does not vanish from listings while its objects
    /// may still exist.
    #[instrument(skip(self))]
    pub async fn delete_photo(
        &self,
        owner_id: &str,
        photo_id: &str,
    ) -> Result<(), CollectionError> {
        let entry = self
            .catalog
            .get_entry(owner_id, photo_id)
            .await?
            .ok_or(CollectionError::NotFound)?;

        self.objects.delete_object(&entry.raw_object_key).await?;
        self.objects
            .delete_object(&entry.thumbnail_object_key)
            .await?;

        self.catalog.delete_entry(owner_id, photo_id).await?;

        metrics::counter!("photobank.photos.deleted").increment(1);
        info!(owner_id = %owner_id, photo_id = %photo_id, "Photo deleted");

        Ok(())
    }

    /// Delete everything under the owner's namespace: enumerate all objects
    /// (raw photos and thumbnails), batch-delete them, then remove every
    /// catalog entry. Returns the number of catalog entries removed. On a
    /// mid-way failure the error carries the count processed so far.
    #[instrument(skip(self))]
    pub async fn delete_all_photos(
        &self,
        owner_id: &str,
    ) -> Result<DeleteAllSummary, CollectionError> {
        let fail = |source: anyhow::Error, deleted_count: usize| CollectionError::DeleteAllFailed {
            deleted_count,
            source,
        };

        let keys = self
            .objects
            .list_keys(&owner_prefix(owner_id))
            .await
            .map_err(|e| fail(e, 0))?;

        for chunk in keys.chunks(MAX_DELETE_BATCH) {
            self.objects
                .delete_objects(chunk.to_vec())
                .await
                .map_err(|e| fail(e, 0))?;
        }

        let entries = self
            .catalog
            .entries_for_owner(owner_id)
            .await
            .map_err(|e| fail(e, 0))?;

        let photo_ids: Vec<String> = entries.into_iter().map(|e| e.photo_id).collect();

        let mut deleted_count = 0;
        for chunk in photo_ids.chunks(MAX_ENTRY_DELETE_BATCH) {
            self.catalog
                .delete_entries(owner_id, chunk.to_vec())
                .await
                .map_err(|e| fail(e, deleted_count))?;
            deleted_count += chunk.len();
        }

        metrics::counter!("photobank.photos.deleted").increment(deleted_count as u64);
        info!(owner_id = %owner_id, deleted_count, "Collection deleted");

        Ok(DeleteAllSummary { deleted_count })
    }
}
