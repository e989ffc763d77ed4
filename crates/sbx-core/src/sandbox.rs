//! Sandboxes started from built templates.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use sbx_domain::{
    CreateSandboxRequest, CreateSandboxResponse, RefreshTokenResponse, SandboxInfoResponse,
};

use crate::auth::{TokenCache, TokenRecord};
use crate::error::BuildError;
use crate::transport::{self, ApiRequest, ApiResponse, Transport, TransportError};

pub const DEFAULT_SANDBOX_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SandboxOptions {
    pub timeout: Duration,
    pub metadata: BTreeMap<String, String>,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SANDBOX_TIMEOUT,
            metadata: BTreeMap::new(),
        }
    }
}

/// Turns a template into a running sandbox.
#[async_trait]
pub trait SandboxFactory: Send + Sync {
    async fn create(
        &self,
        template_id: &str,
        options: SandboxOptions,
    ) -> Result<Sandbox, BuildError>;
}

/// A template that finished building and can start sandboxes.
#[derive(Clone)]
pub struct TemplateHandle {
    template_id: String,
    build_id: String,
    factory: Arc<dyn SandboxFactory>,
}

impl fmt::Debug for TemplateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateHandle")
            .field("template_id", &self.template_id)
            .field("build_id", &self.build_id)
            .finish_non_exhaustive()
    }
}

impl TemplateHandle {
    pub fn new(
        template_id: impl Into<String>,
        build_id: impl Into<String>,
        factory: Arc<dyn SandboxFactory>,
    ) -> Self {
        Self {
            template_id: template_id.into(),
            build_id: build_id.into(),
            factory,
        }
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    pub fn build_id(&self) -> &str {
        &self.build_id
    }

    pub async fn create_sandbox(&self, options: SandboxOptions) -> Result<Sandbox, BuildError> {
        self.factory.create(&self.template_id, options).await
    }
}

/// Creates sandboxes through the service API and seeds their tokens into a
/// [`TokenCache`].
pub struct HttpSandboxFactory {
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenCache>,
}

impl HttpSandboxFactory {
    pub fn new(transport: Arc<dyn Transport>, tokens: Arc<TokenCache>) -> Self {
        Self { transport, tokens }
    }
}

#[async_trait]
impl SandboxFactory for HttpSandboxFactory {
    async fn create(
        &self,
        template_id: &str,
        options: SandboxOptions,
    ) -> Result<Sandbox, BuildError> {
        let failed = |source| BuildError::SandboxRequestFailed {
            operation: "create",
            source,
        };
        let body = CreateSandboxRequest {
            template_id: template_id.to_string(),
            timeout: options.timeout.as_secs(),
            metadata: (!options.metadata.is_empty()).then_some(options.metadata),
        };
        let request = ApiRequest::post("sandboxes").json(&body).map_err(failed)?;
        let created: CreateSandboxResponse = transport::call(self.transport.as_ref(), request)
            .await
            .map_err(failed)?;
        self.tokens.store(
            &created.sandbox_id,
            created.auth_token.clone(),
            created.token_expires_at,
        );
        tracing::debug!(
            sandbox_id = %created.sandbox_id,
            template_id = %created.template_id,
            "sandbox_created"
        );
        Ok(Sandbox::new(
            created.sandbox_id,
            created.template_id,
            &created.auth_token,
            self.transport.clone(),
            self.tokens.clone(),
        ))
    }
}

/// The transport as seen by one sandbox: every request carries that
/// sandbox's current bearer token.
pub struct SandboxConnection {
    transport: Arc<dyn Transport>,
    token: RwLock<String>,
}

impl SandboxConnection {
    pub fn new(transport: Arc<dyn Transport>, token: &str) -> Self {
        Self {
            transport,
            token: RwLock::new(token.to_string()),
        }
    }

    pub fn token(&self) -> String {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update_token(&self, token: &str) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token.to_string();
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let request = request.bearer(self.token());
        self.transport.request(request).await
    }
}

pub struct Sandbox {
    id: String,
    template_id: String,
    connection: SandboxConnection,
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenCache>,
}

impl fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("template_id", &self.template_id)
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    pub fn new(
        id: String,
        template_id: String,
        token: &str,
        transport: Arc<dyn Transport>,
        tokens: Arc<TokenCache>,
    ) -> Self {
        Self {
            id,
            template_id,
            connection: SandboxConnection::new(transport.clone(), token),
            transport,
            tokens,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    pub fn connection(&self) -> &SandboxConnection {
        &self.connection
    }

    /// Asks the service for a new token without touching the cache.
    pub async fn fetch_token(&self) -> Result<TokenRecord, BuildError> {
        let request = ApiRequest::post(format!("sandboxes/{}/token", self.id));
        let response: RefreshTokenResponse = transport::call(self.transport.as_ref(), request)
            .await
            .map_err(|err| BuildError::TokenUnavailable {
                sandbox_id: self.id.clone(),
                reason: err.to_string(),
            })?;
        Ok(TokenRecord::new(
            response.auth_token,
            response.token_expires_at,
        ))
    }

    /// Returns a token with enough lifetime left, refreshing it first when
    /// needed, and hands it to the connection.
    pub async fn ensure_token(&self) -> Result<String, BuildError> {
        let token = self
            .tokens
            .ensure_valid(&self.id, || self.fetch_token())
            .await?;
        self.connection.update_token(&token);
        Ok(token)
    }

    /// Sends a sandbox-scoped request. A rejected token is refreshed once and
    /// the request retried with the new one.
    pub async fn call(
        &self,
        operation: &'static str,
        request: ApiRequest,
    ) -> Result<ApiResponse, BuildError> {
        let failed = |source| BuildError::SandboxRequestFailed { operation, source };
        self.ensure_token().await?;
        match self.connection.send(request.clone()).await {
            Err(err) if err.is_auth_failure() => {
                tracing::debug!(sandbox_id = %self.id, operation, "sandbox_token_rejected");
                let token = self
                    .tokens
                    .refresh_with(&self.id, || self.fetch_token())
                    .await?;
                self.connection.update_token(&token);
                self.connection.send(request).await.map_err(failed)
            }
            other => other.map_err(failed),
        }
    }

    pub async fn info(&self) -> Result<SandboxInfoResponse, BuildError> {
        let path = format!("sandboxes/{}", self.id);
        let response = self.call("info", ApiRequest::get(path.clone())).await?;
        response
            .decode(&path)
            .map_err(|source| BuildError::SandboxRequestFailed {
                operation: "info",
                source,
            })
    }

    pub async fn kill(&self) -> Result<(), BuildError> {
        self.call("kill", ApiRequest::delete(format!("sandboxes/{}", self.id)))
            .await?;
        tracing::debug!(sandbox_id = %self.id, "sandbox_killed");
        Ok(())
    }
}
