use crate::error::ImageError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Attribute name to value mapping attached to an image
pub type Attributes = HashMap<String, String>;

/// Opaque identity joining a blob and its metadata record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(String);

impl ImageId {
    /// Issue a fresh identity from a random v4 UUID
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept a caller-supplied identity.
    ///
    /// Issued identities are hyphenated UUIDs, so anything outside
    /// `[A-Za-z0-9_-]` can never name an image and would leak out of the
    /// blob key namespace.
    pub fn parse(raw: &str) -> Result<Self, ImageError> {
        if raw.is_empty() {
            return Err(ImageError::validation("image id must not be empty"));
        }

        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ImageError::validation(format!(
                "image id {:?} contains invalid characters",
                raw
            )));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata record as returned by the metadata store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_id: ImageId,
    pub metadata: Attributes,
}

/// Attribute predicate applied when listing images.
///
/// A record matches when it carries every filtered attribute with exactly the
/// filtered value. Extra attributes on the record are ignored, so an empty
/// filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageFilter {
    required: Attributes,
}

impl ImageFilter {
    pub fn new(required: Attributes) -> Self {
        Self { required }
    }

    pub fn matches(&self, attributes: &Attributes) -> bool {
        self.required
            .iter()
            .all(|(name, value)| attributes.get(name) == Some(value))
    }
}

/// Upload body as sent by clients
#[derive(Debug, Clone, Deserialize)]
pub struct UploadRequest {
    /// Image bytes, base64 encoded
    #[serde(with = "base64_serde")]
    pub image_data: Vec<u8>,
    #[serde(default)]
    pub metadata: Attributes,
    /// Overrides the configured default content type
    #[serde(default)]
    pub content_type: Option<String>,
}

impl UploadRequest {
    /// Decode an upload body, reporting any problem as a validation fault
    pub fn from_json(body: &str) -> Result<Self, ImageError> {
        serde_json::from_str(body)
            .map_err(|e| ImageError::validation(format!("invalid upload body: {}", e)))
    }
}

/// Base64 serialization helper
mod base64_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
