//! Photobank Service
//!
//! Photo-management backend: users upload images over HTTP, an asynchronous
//! pipeline labels them with Rekognition and renders thumbnails, and a REST
//! API guarded by Cognito bearer tokens lists and deletes each user's
//! collection. One process runs both halves: the ingest worker long-polling
//! the upload event queue, and the axum API server.
//!
//! ## Architecture
//!
//! ```text
//! Client                      S3 Bucket                 DynamoDB
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────┐
//! │ POST /upload │──────────▶│ {owner}/     │          │ PK USER#...  │
//! └──────────────┘           │   photos/    │          │ SK PHOTO#... │
//!        │                   │   thumbnails/│          └──────────────┘
//!        │                   └──────────────┘                 ▲
//!        ▼                          │ ObjectCreated           │
//! ┌──────────────┐                  ▼                         │
//! │ GET /photos  │           ┌──────────────┐                 │
//! │ DELETE ...   │           │ SQS queue    │                 │
//! └──────────────┘           └──────────────┘                 │
//!        │                          │                         │
//!        ▼                          ▼                         │
//! ┌──────────────┐           ┌──────────────┐                 │
//! │ Collection   │           │ Ingest       │─────────────────┘
//! │ Service      │           │ Worker       │──▶ Rekognition
//! └──────────────┘           └──────────────┘
//! ```
//!
//! The ingest worker writes the catalog entry last, so listings never show a
//! photo whose thumbnail or labels are missing. Delivery from the queue is at
//! least once; duplicate events re-derive identical content and are tolerated
//! rather than deduplicated.

pub mod api;
pub mod auth;
pub mod catalog;
pub mod collection;
pub mod config;
pub mod error;
pub mod keys;
pub mod labeler;
pub mod object_store;
pub mod pipeline;
pub mod thumbnail;

pub use catalog::{CatalogEntry, CatalogStore, DynamoCatalogStore, PhotoStatus};
pub use collection::{CollectionService, DeleteAllSummary, PhotoSummary};
pub use config::Config;
pub use error::{CollectionError, IngestError};
pub use labeler::{DetectedLabel, LabelDetector, RekognitionLabelDetector};
pub use object_store::{ObjectStore, S3ObjectStore};
pub use pipeline::{IngestOutcome, IngestWorker};
