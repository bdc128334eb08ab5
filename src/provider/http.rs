//! JSON-over-HTTP recognition provider.
//!
//! Endpoints, relative to the configured base URL:
//!
//! | call                 | request                                   |
//! |----------------------|-------------------------------------------|
//! | detect faces         | `POST /detect`                            |
//! | create collection    | `PUT /collections/{id}`                   |
//! | delete collection    | `DELETE /collections/{id}`                |
//! | index face           | `POST /collections/{id}/faces`            |
//! | search by image      | `POST /collections/{id}/search`           |
//! | remove face          | `DELETE /collections/{id}/faces/{face}`   |
//!
//! Images travel base64-encoded. HTTP 404 maps to `NotFound` and 409 to
//! `AlreadyExists`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{DetectedFace, FaceMatch, FaceProvider, IndexedFace, ProviderError};
use crate::config::ProviderConfig;

pub struct HttpFaceProvider {
    endpoint: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct ImageRequest {
    image: String,
}

#[derive(Debug, Serialize)]
struct IndexRequest {
    image: String,
    external_ref: String,
}

#[derive(Debug, Serialize)]
struct SearchRequest {
    image: String,
    max_results: usize,
    min_similarity: f64,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    faces: Vec<DetectedFace>,
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    #[serde(default)]
    face: Option<IndexedFace>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    matches: Vec<FaceMatch>,
}

impl HttpFaceProvider {
    /// The agent pools connections and is shared by all calls.
    pub fn new(endpoint: &str, api_key: Option<&str>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.map(|s| s.to_string()),
            agent,
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            &config.endpoint,
            config.api_key.as_deref(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let url = format!("{}/{}", self.endpoint, path);
        let mut req = self
            .agent
            .request(method, &url)
            .set("Content-Type", "application/json");

        if let Some(ref api_key) = self.api_key {
            req = req.set("Authorization", &format!("Bearer {}", api_key));
        }
        req
    }

    fn send_json<B: Serialize>(
        &self,
        method: &str,
        path: &str,
        body: &B,
    ) -> Result<ureq::Response, ProviderError> {
        self.request(method, path)
            .send_json(body)
            .map_err(map_ureq_error)
    }

    fn call(&self, method: &str, path: &str) -> Result<ureq::Response, ProviderError> {
        self.request(method, path).call().map_err(map_ureq_error)
    }
}

fn parse<T: DeserializeOwned>(response: ureq::Response) -> Result<T, ProviderError> {
    response
        .into_json()
        .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
}

fn map_ureq_error(err: ureq::Error) -> ProviderError {
    match err {
        ureq::Error::Status(404, _) => ProviderError::NotFound,
        ureq::Error::Status(409, _) => ProviderError::AlreadyExists,
        ureq::Error::Status(code, response) => ProviderError::Status {
            code,
            message: response.into_string().unwrap_or_default(),
        },
        ureq::Error::Transport(transport) => {
            if is_timeout(&transport) {
                ProviderError::Timeout
            } else {
                ProviderError::Transport(transport.to_string())
            }
        }
    }
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(transport);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ) {
                return true;
            }
        }
        source = err.source();
    }
    false
}

impl FaceProvider for HttpFaceProvider {
    fn detect_faces(&self, image: &[u8]) -> Result<Vec<DetectedFace>, ProviderError> {
        let body = ImageRequest {
            image: BASE64.encode(image),
        };
        let response: DetectResponse = parse(self.send_json("POST", "detect", &body)?)?;
        Ok(response.faces)
    }

    fn create_collection(&self, collection_id: &str) -> Result<(), ProviderError> {
        self.call("PUT", &collection_path(collection_id))?;
        Ok(())
    }

    fn delete_collection(&self, collection_id: &str) -> Result<(), ProviderError> {
        self.call("DELETE", &collection_path(collection_id))?;
        Ok(())
    }

    fn index_face(
        &self,
        collection_id: &str,
        image: &[u8],
        external_ref: &str,
    ) -> Result<Option<IndexedFace>, ProviderError> {
        let body = IndexRequest {
            image: BASE64.encode(image),
            external_ref: external_ref.to_string(),
        };
        let path = format!("{}/faces", collection_path(collection_id));
        let response: IndexResponse = parse(self.send_json("POST", &path, &body)?)?;
        Ok(response.face)
    }

    fn search_faces_by_image(
        &self,
        collection_id: &str,
        image: &[u8],
        max_results: usize,
        min_similarity: f64,
    ) -> Result<Vec<FaceMatch>, ProviderError> {
        let body = SearchRequest {
            image: BASE64.encode(image),
            max_results,
            min_similarity,
        };
        let path = format!("{}/search", collection_path(collection_id));
        let response: SearchResponse = parse(self.send_json("POST", &path, &body)?)?;
        Ok(response.matches)
    }

    fn remove_face(&self, collection_id: &str, external_face_id: &str) -> Result<(), ProviderError> {
        let path = format!(
            "{}/faces/{}",
            collection_path(collection_id),
            urlencoding::encode(external_face_id)
        );
        self.call("DELETE", &path)?;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "HTTP"
    }
}

/// Ids are single path segments, so reserved characters are percent-encoded.
fn collection_path(collection_id: &str) -> String {
    format!("collections/{}", urlencoding::encode(collection_id))
}
