use crate::model::ImageId;
use thiserror::Error;

/// Boxed source error carried by store faults
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Fault raised by a blob or metadata store adapter
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("blob store {operation} failed for {key}: {source}")]
    Blob {
        operation: &'static str,
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("metadata store {operation} failed: {source}")]
    Metadata {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("metadata record {image_id} is malformed: {message}")]
    InvalidRecord { image_id: String, message: String },
}

impl StoreError {
    pub fn blob(
        operation: &'static str,
        key: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Blob {
            operation,
            key: key.into(),
            source: source.into(),
        }
    }

    pub fn metadata(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Metadata {
            operation,
            source: source.into(),
        }
    }
}

/// Failure of an image operation, as reported to the caller
#[derive(Error, Debug)]
pub enum ImageError {
    /// Malformed or missing input, detected before any store is touched
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The blob was removed but its metadata record survived
    #[error("image {image_id} was only partially deleted: {source}")]
    IncompleteDelete {
        image_id: ImageId,
        #[source]
        source: StoreError,
    },

    #[error("Invalid request")]
    Routing,
}

impl ImageError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// HTTP status reported for this failure.
    ///
    /// Only an unroutable request is a client error; a request that routed
    /// but could not be carried out, malformed input included, is a 500.
    pub fn status_code(&self) -> u16 {
        match self {
            ImageError::Routing => 400,
            ImageError::Validation(_)
            | ImageError::Store(_)
            | ImageError::IncompleteDelete { .. } => 500,
        }
    }
}
