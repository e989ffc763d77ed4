//! Request/response seam between the pipeline and the sandbox service.
//!
//! Everything above this module speaks [`ApiRequest`] and [`ApiResponse`];
//! [`HttpTransport`] is the production implementation and tests script their
//! own.

mod http;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub use http::HttpTransport;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// A JSON request against the service. `path` is relative to the API base
/// URL unless it is already absolute (service-provided log URLs).
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub bearer: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            bearer: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Attaches a JSON body.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, TransportError> {
        let value = serde_json::to_value(body).map_err(|err| TransportError::Decode {
            path: self.path.clone(),
            message: format!("failed to encode request body: {err}"),
        })?;
        self.body = Some(value);
        Ok(self)
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    #[must_use]
    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn decode<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        serde_json::from_value(self.body.clone()).map_err(|err| TransportError::Decode {
            path: path.to_string(),
            message: err.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("{path}: not authorized (HTTP {status})")]
    Unauthorized { path: String, status: u16 },
    #[error("{path}: HTTP {status}: {message}")]
    Status {
        path: String,
        status: u16,
        message: String,
    },
    #[error("{path}: {message}")]
    Network { path: String, message: String },
    #[error("{path}: invalid response: {message}")]
    Decode { path: String, message: String },
}

impl TransportError {
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Maps a non-success status code.
    pub fn from_status(path: &str, status: u16, message: impl Into<String>) -> Self {
        if matches!(status, 401 | 403) {
            Self::Unauthorized {
                path: path.to_string(),
                status,
            }
        } else {
            Self::Status {
                path: path.to_string(),
                status,
                message: message.into(),
            }
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError>;

    /// Raw upload of archive bytes to a presigned URL.
    async fn put_bytes(&self, url: &str, bytes: Vec<u8>) -> Result<(), TransportError>;
}

/// Sends `request` and decodes the JSON response body.
pub(crate) async fn call<T: DeserializeOwned>(
    transport: &dyn Transport,
    request: ApiRequest,
) -> Result<T, TransportError> {
    let path = request.path.clone();
    let response = transport.request(request).await?;
    response.decode(&path)
}
