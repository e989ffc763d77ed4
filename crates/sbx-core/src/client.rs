use std::sync::Arc;

use sbx_domain::BuildSpecification;

use crate::auth::TokenCache;
use crate::build::{BuildOrchestrator, BuildOutcome};
use crate::config::ClientConfig;
use crate::error::BuildError;
use crate::sandbox::{HttpSandboxFactory, Sandbox, SandboxFactory, SandboxOptions, TemplateHandle};
use crate::transport::{HttpTransport, Transport};

/// A finished template build: the handle to start sandboxes from and what
/// the pipeline did to get there.
#[derive(Debug)]
pub struct BuiltTemplate {
    pub template: TemplateHandle,
    pub outcome: BuildOutcome,
}

/// Session against the sandbox service. Owns the transport and the token
/// cache shared by every sandbox it creates.
pub struct Client {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenCache>,
    factory: Arc<dyn SandboxFactory>,
}

impl Client {
    pub fn from_env() -> Result<Self, BuildError> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn new(config: ClientConfig) -> Result<Self, BuildError> {
        if config.api_key().is_none() {
            return Err(BuildError::MissingApiKey);
        }
        let transport = HttpTransport::new(&config).map_err(|source| {
            BuildError::SandboxRequestFailed {
                operation: "connect",
                source,
            }
        })?;
        Ok(Self::with_transport(
            config,
            Arc::new(transport),
            Arc::new(TokenCache::new()),
        ))
    }

    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        tokens: Arc<TokenCache>,
    ) -> Self {
        let factory = Arc::new(HttpSandboxFactory::new(transport.clone(), tokens.clone()));
        Self {
            config,
            transport,
            tokens,
            factory,
        }
    }

    #[must_use]
    pub fn with_sandbox_factory(mut self, factory: Arc<dyn SandboxFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    /// A pipeline bound to this session; add a log callback or cancel signal
    /// before handing it to [`Client::build_template_with`].
    pub fn orchestrator(&self) -> BuildOrchestrator {
        BuildOrchestrator::new(self.transport.clone(), *self.config.polling())
    }

    pub async fn build_template(
        &self,
        spec: &BuildSpecification,
    ) -> Result<BuiltTemplate, BuildError> {
        self.build_template_with(&self.orchestrator(), spec).await
    }

    pub async fn build_template_with(
        &self,
        orchestrator: &BuildOrchestrator,
        spec: &BuildSpecification,
    ) -> Result<BuiltTemplate, BuildError> {
        let outcome = orchestrator.build(spec).await?;
        let template = TemplateHandle::new(
            outcome.build.template_id.clone(),
            outcome.build.build_id.clone(),
            self.factory.clone(),
        );
        Ok(BuiltTemplate { template, outcome })
    }

    /// Starts a sandbox from an already built template.
    pub async fn create_sandbox(
        &self,
        template_id: &str,
        options: SandboxOptions,
    ) -> Result<Sandbox, BuildError> {
        self.factory.create(template_id, options).await
    }
}
