#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod dockerfile;
pub mod fingerprint;
pub mod probe;
pub mod status;
pub mod step;
pub mod template;
pub mod wire;

pub use fingerprint::Fingerprint;
pub use probe::ReadinessProbe;
pub use status::{BuildStatus, LogLevel, TemplateStatus};
pub use step::{CopyStep, EnvStep, RunStep, Step, StepKind, UserStep, WorkdirStep};
pub use template::{
    BuildSpecification, FileContext, RegistryCredentials, Resources, SpecificationError,
    TemplateBuilder,
};
pub use wire::{
    BuildStatusResponse, CreateSandboxRequest, CreateSandboxResponse, LogsResponse,
    RefreshTokenResponse, SandboxInfoResponse, SubmitBuildRequest, SubmitBuildResponse,
    TemplateStatusResponse, UploadLinkRequest, UploadLinkResponse, WireStep,
};
