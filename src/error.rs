use thiserror::Error;

/// Failures raised by a single pipeline invocation.
///
/// Everything after the thumbnail-namespace guard is propagated back to the
/// event queue so its redelivery policy governs retries; nothing is
/// caught-and-suppressed inside the pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The object key does not follow the `{owner}/{category}/{filename}`
    /// convention. Structural, not transient: redelivery will fail the same
    /// way, but the queue's dead-letter policy owns that decision.
    #[error("object key has unexpected structure: {0}")]
    MalformedKey(String),

    /// An external dependency (store, detector) failed.
    #[error(transparent)]
    Dependency(#[from] anyhow::Error),
}

/// Failures surfaced by the collection service.
///
/// The service catches dependency errors internally and returns these
/// structured results so the API layer can translate them uniformly.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// No catalog entry exists for the requested (owner, photo) pair.
    #[error("photo not found")]
    NotFound,

    /// Bulk delete failed part-way through. `deleted_count` is the number of
    /// catalog entries removed before the failure (best-effort accounting,
    /// not transactional).
    #[error("bulk delete failed after removing {deleted_count} catalog entries")]
    DeleteAllFailed {
        deleted_count: usize,
        #[source]
        source: anyhow::Error,
    },

    /// An external dependency failed.
    #[error(transparent)]
    Dependency(#[from] anyhow::Error),
}
