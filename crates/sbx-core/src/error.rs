use serde_json::{json, Value};

use sbx_domain::{Fingerprint, SpecificationError};

use crate::config::ConfigError;
use crate::diagnostics;
use crate::transport::TransportError;

/// Failures of the template pipeline and of sandbox sessions built on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("[SBX100] invalid template specification: {0}")]
    InvalidSpecification(#[from] SpecificationError),
    #[error("[SBX110] build context content is unreadable at {path}: {reason}")]
    ContentUnreadable { path: String, reason: String },
    #[error("[SBX111] failed to create content archive: {reason}")]
    ArchiveCreationFailed { reason: String },
    #[error("[SBX120] failed to obtain upload target for {fingerprint}: {source}")]
    UploadLinkFailed {
        fingerprint: Fingerprint,
        source: TransportError,
    },
    #[error("[SBX121] failed to transfer content {fingerprint}: {source}")]
    TransferFailed {
        fingerprint: Fingerprint,
        source: TransportError,
    },
    #[error("[SBX130] build submission was rejected: {0}")]
    BuildSubmissionFailed(#[source] TransportError),
    #[error("[SBX140] build failed: {message}")]
    BuildFailed { build_id: String, message: String },
    #[error("[SBX141] status check for build {build_id} failed: {source}")]
    StatusCheckFailed {
        build_id: String,
        source: TransportError,
    },
    #[error("[SBX200] no valid token for sandbox {sandbox_id}: {reason}")]
    TokenUnavailable { sandbox_id: String, reason: String },
    #[error("[SBX300] sandbox request `{operation}` failed: {source}")]
    SandboxRequestFailed {
        operation: &'static str,
        source: TransportError,
    },
    #[error("[SBX301] SBX_API_KEY is not set")]
    MissingApiKey,
    #[error("[SBX302] invalid client configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("[SBX199] build cancelled during {phase}")]
    Cancelled { phase: &'static str },
}

impl BuildError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSpecification(_) => diagnostics::build::INVALID_SPECIFICATION,
            Self::ContentUnreadable { .. } => diagnostics::build::CONTENT_UNREADABLE,
            Self::ArchiveCreationFailed { .. } => diagnostics::build::ARCHIVE_CREATION_FAILED,
            Self::UploadLinkFailed { .. } => diagnostics::build::UPLOAD_LINK_FAILED,
            Self::TransferFailed { .. } => diagnostics::build::TRANSFER_FAILED,
            Self::BuildSubmissionFailed(_) => diagnostics::build::SUBMISSION_FAILED,
            Self::BuildFailed { .. } => diagnostics::build::BUILD_FAILED,
            Self::StatusCheckFailed { .. } => diagnostics::build::STATUS_CHECK_FAILED,
            Self::TokenUnavailable { .. } => diagnostics::auth::TOKEN_UNAVAILABLE,
            Self::SandboxRequestFailed { .. } => diagnostics::sandbox::REQUEST_FAILED,
            Self::MissingApiKey => diagnostics::sandbox::MISSING_API_KEY,
            Self::InvalidConfig(_) => diagnostics::sandbox::INVALID_CONFIG,
            Self::Cancelled { .. } => diagnostics::build::CANCELLED,
        }
    }

    /// Structured context for callers that render errors as JSON.
    #[must_use]
    pub fn details(&self) -> Value {
        let mut details = match self {
            Self::InvalidSpecification(reason) => json!({ "reason": reason.to_string() }),
            Self::ContentUnreadable { path, reason } => json!({ "path": path, "reason": reason }),
            Self::ArchiveCreationFailed { reason } => json!({ "reason": reason }),
            Self::UploadLinkFailed {
                fingerprint,
                source,
            }
            | Self::TransferFailed {
                fingerprint,
                source,
            } => json!({
                "fingerprint": fingerprint.as_str(),
                "transport": source.to_string(),
            }),
            Self::BuildSubmissionFailed(source) => json!({ "transport": source.to_string() }),
            Self::BuildFailed { build_id, message } => {
                json!({ "build_id": build_id, "message": message })
            }
            Self::StatusCheckFailed { build_id, source } => json!({
                "build_id": build_id,
                "transport": source.to_string(),
            }),
            Self::TokenUnavailable { sandbox_id, reason } => {
                json!({ "sandbox_id": sandbox_id, "reason": reason })
            }
            Self::SandboxRequestFailed { operation, source } => json!({
                "operation": operation,
                "transport": source.to_string(),
            }),
            Self::MissingApiKey => json!({ "env": "SBX_API_KEY" }),
            Self::InvalidConfig(reason) => json!({ "reason": reason.to_string() }),
            Self::Cancelled { phase } => json!({ "phase": phase }),
        };
        if let Value::Object(ref mut map) = details {
            map.insert("code".into(), Value::String(self.code().to_string()));
        }
        details
    }

    /// Whether the failure came from the service rejecting credentials.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::UploadLinkFailed { source, .. }
            | Self::TransferFailed { source, .. }
            | Self::StatusCheckFailed { source, .. }
            | Self::SandboxRequestFailed { source, .. }
            | Self::BuildSubmissionFailed(source) => source.is_auth_failure(),
            _ => false,
        }
    }
}
