//! Image Service
//!
//! CRUD over images split across two stores: the raw bytes live in a blob
//! store (S3) and a string attribute map lives in a metadata store
//! (PostgreSQL), both keyed by an identity issued at upload time.
//!
//! ## Architecture
//!
//! ```text
//!  HTTP / request event
//!          │
//!          ▼
//!  ┌──────────────┐      ┌──────────────┐      ┌──────────────┐
//!  │ Router       │─────▶│ Image        │─────▶│ Blob Store   │  images/{id}.jpg
//!  │ create/list/ │      │ Service      │      └──────────────┘
//!  │ read/remove  │      └──────────────┘      ┌──────────────┐
//!  └──────────────┘             └─────────────▶│ Metadata     │  images(image_id, attributes)
//!                                              │ Store        │
//!                                              └──────────────┘
//! ```
//!
//! Upload and delete both touch the blob store first. See [`orchestrator`]
//! for what each partial failure leaves behind.

pub mod api;
pub mod blob_store;
pub mod config;
pub mod error;
pub mod memory;
pub mod metadata_store;
pub mod model;
pub mod orchestrator;
pub mod router;

pub use api::AppState;
pub use blob_store::{AccessLink, BlobKeyLayout, BlobStore, S3BlobStore};
pub use config::{Backend, Config, ConfigError};
pub use error::{ImageError, StoreError};
pub use memory::{InMemoryBlobStore, InMemoryMetadataStore};
pub use metadata_store::{MetadataStore, PgMetadataStore};
pub use model::{Attributes, ImageFilter, ImageId, ImageRecord, UploadRequest};
pub use orchestrator::{ImageService, NewImage};
pub use router::{dispatch, Operation, RequestEvent, ResponseEvent};
