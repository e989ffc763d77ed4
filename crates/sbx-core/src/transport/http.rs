use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::Value;
use url::Url;

use super::{ApiRequest, ApiResponse, Method, Transport, TransportError};
use crate::config::ClientConfig;

const USER_AGENT: &str = concat!("sbx-core/", env!("CARGO_PKG_VERSION"));
const API_KEY_HEADER: &str = "X-API-Key";

/// [`Transport`] over HTTPS. Service calls carry the API key; uploads to
/// presigned URLs go through a separate client that carries nothing.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    api: reqwest::Client,
    upload: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let base = config.api_url().clone();
        let mut headers = HeaderMap::new();
        if let Some(key) = config.api_key() {
            let value = HeaderValue::from_str(key).map_err(|err| TransportError::Network {
                path: base.to_string(),
                message: format!("API key is not a valid header value: {err}"),
            })?;
            headers.insert(API_KEY_HEADER, value);
        }
        let api = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()
            .map_err(|err| network(base.as_str(), &err))?;
        let upload = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| network(base.as_str(), &err))?;
        Ok(Self { api, upload, base })
    }

    fn resolve(&self, path: &str) -> Result<Url, TransportError> {
        let resolved = if path.starts_with("http://") || path.starts_with("https://") {
            Url::parse(path)
        } else {
            self.base.join(path.trim_start_matches('/'))
        };
        resolved.map_err(|err| TransportError::Network {
            path: path.to_string(),
            message: format!("invalid request URL: {err}"),
        })
    }
}

fn network(path: &str, err: &reqwest::Error) -> TransportError {
    TransportError::Network {
        path: path.to_string(),
        message: err.to_string(),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.resolve(&request.path)?;
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.api.request(method, url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| network(&request.path, &err))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| network(&request.path, &err))?;
        if !status.is_success() {
            tracing::debug!(
                method = request.method.as_str(),
                path = %request.path,
                status = status.as_u16(),
                "api_request_rejected"
            );
            return Err(TransportError::from_status(
                &request.path,
                status.as_u16(),
                text.trim(),
            ));
        }
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|err| TransportError::Decode {
                path: request.path.clone(),
                message: err.to_string(),
            })?
        };
        Ok(ApiResponse {
            status: status.as_u16(),
            body,
        })
    }

    async fn put_bytes(&self, url: &str, bytes: Vec<u8>) -> Result<(), TransportError> {
        let target = Url::parse(url).map_err(|err| TransportError::Network {
            path: url.to_string(),
            message: format!("invalid upload URL: {err}"),
        })?;
        let response = self
            .upload
            .put(target)
            .header(CONTENT_TYPE, "application/gzip")
            .body(bytes)
            .send()
            .await
            .map_err(|err| network(url, &err))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await.unwrap_or_default();
        Err(TransportError::from_status(url, status.as_u16(), text.trim()))
    }
}
