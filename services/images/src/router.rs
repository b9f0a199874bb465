//! Maps inbound request events onto image operations and turns their
//! outcomes into JSON response events.

use crate::error::ImageError;
use crate::model::{ImageFilter, ImageId, ImageRecord, UploadRequest};
use crate::orchestrator::{ImageService, NewImage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{error, info, warn};

/// Path parameter carrying the image identity
pub const IMAGE_ID_PARAM: &str = "imageId";

const IMAGE_RESOURCE_PREFIX: &str = "/image/";

/// Inbound request in API gateway proxy shape
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    pub http_method: String,
    pub resource: String,
    #[serde(default)]
    pub query_string_parameters: Option<HashMap<String, String>>,
    #[serde(default)]
    pub path_parameters: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Outbound response; `body` is serialized JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEvent {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ResponseEvent {
    fn json(status_code: u16, body: &impl Serialize) -> Self {
        let body = serde_json::to_string(body).unwrap_or_else(|e| {
            error!(error = %e, "Failed to serialize response body");
            r#"{"error":"Failed to serialize response"}"#.to_string()
        });

        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        Self {
            status_code,
            headers,
            body,
        }
    }

    pub(crate) fn from_error(error: &ImageError) -> Self {
        Self::json(
            error.status_code(),
            &ErrorBody {
                error: error.to_string(),
            },
        )
    }
}

/// Image operation selected by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    List,
    Read,
    Remove,
}

impl Operation {
    /// Resolve method and resource against the routing table
    pub fn route(method: &str, resource: &str) -> Option<Self> {
        match (method.to_ascii_uppercase().as_str(), resource) {
            ("POST", "/upload") => Some(Operation::Create),
            ("GET", "/images") => Some(Operation::List),
            ("GET", r) if r.starts_with(IMAGE_RESOURCE_PREFIX) => Some(Operation::Read),
            ("DELETE", r) if r.starts_with(IMAGE_RESOURCE_PREFIX) => Some(Operation::Remove),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::List => "list",
            Operation::Read => "read",
            Operation::Remove => "remove",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Image identity segment of a concrete `/image/{id}` path
pub fn image_id_from_path(path: &str) -> Option<&str> {
    path.strip_prefix(IMAGE_RESOURCE_PREFIX)
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct CreatedBody {
    message: &'static str,
    image_id: ImageId,
}

#[derive(Debug, Serialize)]
struct ListBody {
    message: &'static str,
    images: Vec<ImageRecord>,
}

#[derive(Debug, Serialize)]
struct ReadBody {
    message: &'static str,
    image_url: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    message: &'static str,
}

/// Route `event` to the matching image operation and build its response
pub async fn dispatch(service: &ImageService, event: RequestEvent) -> ResponseEvent {
    let Some(operation) = Operation::route(&event.http_method, &event.resource) else {
        warn!(
            method = %event.http_method,
            resource = %event.resource,
            "Invalid request received"
        );
        return ResponseEvent::from_error(&ImageError::Routing);
    };

    info!(operation = %operation, resource = %event.resource, "Dispatching request");

    let result = match operation {
        Operation::Create => create(service, &event).await,
        Operation::List => list(service, &event).await,
        Operation::Read => read(service, &event).await,
        Operation::Remove => remove(service, &event).await,
    };

    result.unwrap_or_else(|e| {
        error!(operation = %operation, error = %e, "Request failed");
        ResponseEvent::from_error(&e)
    })
}

async fn create(service: &ImageService, event: &RequestEvent) -> Result<ResponseEvent, ImageError> {
    let body = event
        .body
        .as_deref()
        .filter(|body| !body.trim().is_empty())
        .ok_or_else(|| ImageError::validation("request body is required"))?;

    let request = UploadRequest::from_json(body)?;
    let image_id = service
        .upload(NewImage {
            payload: request.image_data,
            attributes: request.metadata,
            content_type: request.content_type,
        })
        .await?;

    Ok(ResponseEvent::json(
        200,
        &CreatedBody {
            message: "Image uploaded successfully",
            image_id,
        },
    ))
}

async fn list(service: &ImageService, event: &RequestEvent) -> Result<ResponseEvent, ImageError> {
    let filter = ImageFilter::new(event.query_string_parameters.clone().unwrap_or_default());
    let images = service.list(&filter).await?;

    Ok(ResponseEvent::json(
        200,
        &ListBody {
            message: "Listed images successfully",
            images,
        },
    ))
}

async fn read(service: &ImageService, event: &RequestEvent) -> Result<ResponseEvent, ImageError> {
    let image_id = path_image_id(event)?;
    let link = service.view(&image_id).await?;

    Ok(ResponseEvent::json(
        200,
        &ReadBody {
            message: "Generated image URL successfully",
            image_url: link.url,
            expires_at: link.expires_at,
        },
    ))
}

async fn remove(service: &ImageService, event: &RequestEvent) -> Result<ResponseEvent, ImageError> {
    let image_id = path_image_id(event)?;
    service.delete(&image_id).await?;

    Ok(ResponseEvent::json(
        200,
        &MessageBody {
            message: "Image deleted successfully",
        },
    ))
}

fn path_image_id(event: &RequestEvent) -> Result<ImageId, ImageError> {
    let raw = event
        .path_parameters
        .as_ref()
        .and_then(|params| params.get(IMAGE_ID_PARAM))
        .ok_or_else(|| ImageError::validation("missing path parameter imageId"))?;

    ImageId::parse(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::MockBlobStore;
    use crate::error::StoreError;
    use crate::memory::{InMemoryBlobStore, InMemoryMetadataStore};
    use crate::metadata_store::MockMetadataStore;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn memory_service() -> ImageService {
        ImageService::with_defaults(
            Arc::new(InMemoryBlobStore::default()),
            Arc::new(InMemoryMetadataStore::new()),
        )
    }

    fn body_json(response: &ResponseEvent) -> Value {
        serde_json::from_str(&response.body).unwrap()
    }

    fn upload_event(metadata: Value) -> RequestEvent {
        RequestEvent {
            http_method: "POST".to_string(),
            resource: "/upload".to_string(),
            body: Some(
                json!({
                    "image_data": STANDARD.encode(b"0123456789"),
                    "metadata": metadata,
                })
                .to_string(),
            ),
            ..Default::default()
        }
    }

    fn list_event(filter: &[(&str, &str)]) -> RequestEvent {
        RequestEvent {
            http_method: "GET".to_string(),
            resource: "/images".to_string(),
            query_string_parameters: Some(
                filter
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn image_event(method: &str, image_id: &str) -> RequestEvent {
        RequestEvent {
            http_method: method.to_string(),
            resource: "/image/{imageId}".to_string(),
            path_parameters: Some(HashMap::from([(
                IMAGE_ID_PARAM.to_string(),
                image_id.to_string(),
            )])),
            ..Default::default()
        }
    }

    fn listed_ids(response: &ResponseEvent) -> Vec<String> {
        body_json(response)["images"]
            .as_array()
            .unwrap()
            .iter()
            .map(|image| image["image_id"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_routing_table() {
        assert_eq!(Operation::route("POST", "/upload"), Some(Operation::Create));
        assert_eq!(Operation::route("GET", "/images"), Some(Operation::List));
        assert_eq!(Operation::route("GET", "/image/{imageId}"), Some(Operation::Read));
        assert_eq!(Operation::route("delete", "/image/abc"), Some(Operation::Remove));
        assert_eq!(Operation::route("POST", "/invalid"), None);
        assert_eq!(Operation::route("PUT", "/upload"), None);
        assert_eq!(Operation::route("GET", "/upload"), None);
    }

    #[test]
    fn test_operation_tokens() {
        assert_eq!(Operation::Create.to_string(), "create");
        assert_eq!(Operation::Remove.as_str(), "remove");
    }

    #[test]
    fn test_image_id_from_path() {
        assert_eq!(image_id_from_path("/image/abc"), Some("abc"));
        assert_eq!(image_id_from_path("/image/"), None);
        assert_eq!(image_id_from_path("/image/a/b"), None);
        assert_eq!(image_id_from_path("/images"), None);
    }

    #[test]
    fn test_request_event_deserializes_gateway_shape() {
        let event: RequestEvent = serde_json::from_value(json!({
            "httpMethod": "GET",
            "resource": "/image/{imageId}",
            "pathParameters": {"imageId": "123"},
            "queryStringParameters": null
        }))
        .unwrap();

        assert_eq!(event.http_method, "GET");
        assert_eq!(event.path_parameters.unwrap()["imageId"], "123");
        assert!(event.query_string_parameters.is_none());
        assert!(event.body.is_none());
    }

    #[tokio::test]
    async fn test_invalid_request() {
        let event = RequestEvent {
            http_method: "POST".to_string(),
            resource: "/invalid".to_string(),
            ..Default::default()
        };

        let response = dispatch(&memory_service(), event).await;
        assert_eq!(response.status_code, 400);
        assert_eq!(body_json(&response)["error"], "Invalid request");
        assert_eq!(response.headers["Content-Type"], "application/json");
    }

    #[tokio::test]
    async fn test_upload_success() {
        let response = dispatch(&memory_service(), upload_event(json!({"tag": "test"}))).await;

        assert_eq!(response.status_code, 200);
        let body = body_json(&response);
        assert_eq!(body["message"], "Image uploaded successfully");
        assert!(!body["image_id"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_validation_faults() {
        let service = memory_service();

        let mut missing_body = upload_event(json!({}));
        missing_body.body = None;
        assert_eq!(dispatch(&service, missing_body).await.status_code, 500);

        let mut bad_base64 = upload_event(json!({}));
        bad_base64.body = Some(r#"{"image_data": "%%%"}"#.to_string());
        let response = dispatch(&service, bad_base64).await;
        assert_eq!(response.status_code, 500);
        assert!(body_json(&response)["error"].is_string());

        let non_string = upload_event(json!({"count": 3}));
        let response = dispatch(&service, non_string).await;
        assert_eq!(response.status_code, 500);
        assert_eq!(response.headers["Content-Type"], "application/json");

        // Nothing reached the stores
        let listed = dispatch(&service, list_event(&[])).await;
        assert!(listed_ids(&listed).is_empty());
    }

    #[tokio::test]
    async fn test_list_with_null_query_matches_everything() {
        let service = memory_service();
        dispatch(&service, upload_event(json!({"tag": "a"}))).await;
        dispatch(&service, upload_event(json!({}))).await;

        let mut event = list_event(&[]);
        event.query_string_parameters = None;
        let response = dispatch(&service, event).await;

        assert_eq!(response.status_code, 200);
        assert_eq!(listed_ids(&response).len(), 2);
    }

    #[tokio::test]
    async fn test_image_lifecycle() {
        let service = memory_service();

        let created = dispatch(&service, upload_event(json!({"tag": "cat"}))).await;
        let x = body_json(&created)["image_id"].as_str().unwrap().to_string();

        let cats = dispatch(&service, list_event(&[("tag", "cat")])).await;
        assert_eq!(listed_ids(&cats), vec![x.clone()]);
        assert_eq!(body_json(&cats)["images"][0]["metadata"]["tag"], "cat");

        let dogs = dispatch(&service, list_event(&[("tag", "dog")])).await;
        assert!(listed_ids(&dogs).is_empty());

        let read = dispatch(&service, image_event("GET", &x)).await;
        assert_eq!(read.status_code, 200);
        assert!(body_json(&read)["image_url"].as_str().unwrap().contains(&x));

        let deleted = dispatch(&service, image_event("DELETE", &x)).await;
        assert_eq!(deleted.status_code, 200);
        assert_eq!(body_json(&deleted)["message"], "Image deleted successfully");

        let all = dispatch(&service, list_event(&[])).await;
        assert!(!listed_ids(&all).contains(&x));

        // Link issuance does not check existence
        let read_again = dispatch(&service, image_event("GET", &x)).await;
        assert_eq!(read_again.status_code, 200);
    }

    #[tokio::test]
    async fn test_missing_or_invalid_image_id() {
        let service = memory_service();

        let mut no_params = image_event("GET", "abc");
        no_params.path_parameters = None;
        assert_eq!(dispatch(&service, no_params).await.status_code, 500);

        let traversal = image_event("DELETE", "../other");
        let response = dispatch(&service, traversal).await;
        assert_eq!(response.status_code, 500);
        assert!(body_json(&response)["error"]
            .as_str()
            .unwrap()
            .contains("invalid characters"));
    }

    #[tokio::test]
    async fn test_store_fault_maps_to_500() {
        let mut blobs = MockBlobStore::new();
        blobs
            .expect_remove()
            .returning(|_| Err(StoreError::blob("remove", "images/abc.jpg", "access denied")));

        let service = ImageService::with_defaults(Arc::new(blobs), Arc::new(MockMetadataStore::new()));
        let response = dispatch(&service, image_event("DELETE", "abc")).await;

        assert_eq!(response.status_code, 500);
        let error = body_json(&response)["error"].as_str().unwrap().to_string();
        assert!(error.contains("access denied"));
        assert!(body_json(&response).get("message").is_none());
    }
}
