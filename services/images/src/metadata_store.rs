use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::model::{Attributes, ImageId, ImageRecord};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::{debug, info, instrument};

/// Storage for image metadata records keyed by image identity
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or replace the record of `id`
    async fn put(&self, id: &ImageId, attributes: &Attributes) -> Result<(), StoreError>;

    /// Every stored record, in no particular order
    async fn scan_all(&self) -> Result<Vec<ImageRecord>, StoreError>;

    /// Delete the record of `id`; deleting a missing record succeeds
    async fn remove(&self, id: &ImageId) -> Result<(), StoreError>;

    /// Cheap connectivity probe used by readiness checks
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Convert a raw row into a typed record, rejecting anything that is not a
/// string to string mapping.
pub(crate) fn record_from_row(
    image_id: String,
    attributes: serde_json::Value,
) -> Result<ImageRecord, StoreError> {
    let id = ImageId::parse(&image_id).map_err(|e| StoreError::InvalidRecord {
        image_id: image_id.clone(),
        message: e.to_string(),
    })?;

    let metadata = match attributes {
        serde_json::Value::Null => Attributes::new(),
        value => serde_json::from_value(value).map_err(|e| StoreError::InvalidRecord {
            image_id: image_id.clone(),
            message: e.to_string(),
        })?,
    };

    Ok(ImageRecord {
        image_id: id,
        metadata,
    })
}

/// PostgreSQL-backed metadata store
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::metadata("connect", e))?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::metadata("migrate", e))?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    #[instrument(skip(self, attributes), fields(image_id = %id, attribute_count = attributes.len()))]
    async fn put(&self, id: &ImageId, attributes: &Attributes) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO images (image_id, attributes, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (image_id) DO UPDATE SET attributes = EXCLUDED.attributes
            "#,
        )
        .bind(id.as_str())
        .bind(Json(attributes))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::metadata("put", e))?;

        debug!("Metadata record saved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn scan_all(&self) -> Result<Vec<ImageRecord>, StoreError> {
        let rows: Vec<(String, serde_json::Value)> =
            sqlx::query_as("SELECT image_id, attributes FROM images")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::metadata("scan", e))?;

        debug!(row_count = rows.len(), "Scanned metadata table");

        rows.into_iter()
            .map(|(image_id, attributes)| record_from_row(image_id, attributes))
            .collect()
    }

    #[instrument(skip(self), fields(image_id = %id))]
    async fn remove(&self, id: &ImageId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM images WHERE image_id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::metadata("remove", e))?;

        debug!(rows_affected = result.rows_affected(), "Metadata record deleted");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::metadata("health_check", e))?;
        Ok(())
    }
}
