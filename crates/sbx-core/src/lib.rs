#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]

//! Template build pipeline and sandbox session client.
//!
//! A [`Client`] turns a [`BuildSpecification`] into a remote template:
//! copy steps are fingerprinted, missing content is archived and uploaded,
//! the build is submitted, its logs are streamed and its status is polled
//! until the published template is confirmed stable. The resulting
//! [`TemplateHandle`] creates sandboxes whose bearer tokens live in a
//! [`TokenCache`].

pub mod auth;
pub mod build;
pub mod client;
pub mod config;
pub mod content;
pub mod diagnostics;
pub mod error;
pub mod sandbox;
pub(crate) mod timings;
pub mod transport;
pub mod upload;

pub use auth::{MissingToken, TokenCache, TokenRecord, MIN_TOKEN_LIFETIME};
pub use build::{
    BuildHandle, BuildOrchestrator, BuildOutcome, CancelSignal, Canceller, LogCallback,
    LogLine, PreparedCopy, PreparedSpecification, PreparedStep, StabilityOutcome,
};
pub use client::{BuiltTemplate, Client};
pub use config::{ClientConfig, ConfigError, EnvSnapshot, PollingConfig, StabilityPolicy};
pub use content::{
    combine, ArchiveBuilder, ContentArchive, EntryKind, Fingerprinter, ResolvedFile, StepContent,
};
pub use error::BuildError;
pub use sandbox::{
    HttpSandboxFactory, Sandbox, SandboxConnection, SandboxFactory, SandboxOptions,
    TemplateHandle,
};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport, TransportError};
pub use upload::{UploadAction, UploadCoordinator, UploadDescriptor, UploadRecord};

pub use sbx_domain::{
    BuildSpecification, BuildStatus, CopyStep, FileContext, Fingerprint, LogLevel,
    ReadinessProbe, RegistryCredentials, Resources, SpecificationError, Step, TemplateBuilder,
};
