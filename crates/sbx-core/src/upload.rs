//! Content-addressed upload of copy-step archives.

use std::collections::HashSet;
use std::sync::Arc;

use time::OffsetDateTime;

use sbx_domain::{CopyStep, Fingerprint, UploadLinkRequest, UploadLinkResponse};

use crate::content::{ArchiveBuilder, StepContent};
use crate::error::BuildError;
use crate::transport::{self, ApiRequest, Transport, TransportError};

const UPLOAD_LINK_PATH: &str = "templates/files";

/// The service's answer to "is this content stored yet".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadDescriptor {
    pub fingerprint: Fingerprint,
    pub already_present: bool,
    pub upload_target: Option<String>,
    pub expires_at: Option<OffsetDateTime>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadAction {
    Transferred { bytes: u64 },
    AlreadyPresent,
    /// An earlier step of the same build already handled this fingerprint.
    DuplicateInBuild,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadRecord {
    pub step_index: usize,
    pub fingerprint: Fingerprint,
    pub action: UploadAction,
}

/// Uploads copy-step content the service does not have yet. One coordinator
/// serves one build; its record of handled fingerprints dies with it.
pub struct UploadCoordinator {
    transport: Arc<dyn Transport>,
    archives: ArchiveBuilder,
    handled: HashSet<Fingerprint>,
}

impl UploadCoordinator {
    pub fn new(transport: Arc<dyn Transport>, archives: ArchiveBuilder) -> Self {
        Self {
            transport,
            archives,
            handled: HashSet::new(),
        }
    }

    /// Asks the service whether it already holds `content`. The reported
    /// `content_length` is the summed size of the selected regular files
    /// before archiving, not the size of the compressed archive.
    pub async fn request_descriptor(
        &self,
        content: &StepContent,
    ) -> Result<UploadDescriptor, BuildError> {
        let link_failed = |source| BuildError::UploadLinkFailed {
            fingerprint: content.fingerprint.clone(),
            source,
        };
        let request = ApiRequest::post(UPLOAD_LINK_PATH)
            .json(&UploadLinkRequest {
                files_hash: content.fingerprint.clone(),
                content_length: content.content_length,
            })
            .map_err(link_failed)?;
        let response: UploadLinkResponse = transport::call(self.transport.as_ref(), request)
            .await
            .map_err(link_failed)?;
        Ok(UploadDescriptor {
            fingerprint: content.fingerprint.clone(),
            already_present: response.present,
            upload_target: response.upload_url,
            expires_at: response.expires_at,
        })
    }

    /// Makes sure the service holds the content of `step`, transferring it at
    /// most once per fingerprint.
    pub async fn ensure_uploaded(
        &mut self,
        step_index: usize,
        step: &CopyStep,
        content: &StepContent,
    ) -> Result<UploadRecord, BuildError> {
        let fingerprint = content.fingerprint.clone();
        let record = |action| UploadRecord {
            step_index,
            fingerprint: fingerprint.clone(),
            action,
        };
        if self.handled.contains(&fingerprint) {
            tracing::debug!(
                step = step_index,
                fingerprint = fingerprint.short(),
                "upload_duplicate_skipped"
            );
            return Ok(record(UploadAction::DuplicateInBuild));
        }

        let descriptor = self.request_descriptor(content).await?;
        if descriptor.already_present {
            tracing::debug!(
                step = step_index,
                fingerprint = fingerprint.short(),
                "upload_skipped_present"
            );
            self.handled.insert(fingerprint.clone());
            return Ok(record(UploadAction::AlreadyPresent));
        }
        let Some(target) = descriptor.upload_target else {
            return Err(BuildError::UploadLinkFailed {
                fingerprint: fingerprint.clone(),
                source: TransportError::Decode {
                    path: UPLOAD_LINK_PATH.into(),
                    message: "content is not present and no upload_url was returned".into(),
                },
            });
        };

        // The whole compressed archive is held in memory for the transfer.
        let archives = self.archives.clone();
        let sources = step.sources.clone();
        let bytes = tokio::task::spawn_blocking(move || {
            let archive = archives.build(&sources)?;
            archive.read_bytes()
        })
        .await
        .map_err(|err| BuildError::ArchiveCreationFailed {
            reason: format!("archive task failed: {err}"),
        })??;
        let size = bytes.len() as u64;

        self.transport
            .put_bytes(&target, bytes)
            .await
            .map_err(|source| BuildError::TransferFailed {
                fingerprint: fingerprint.clone(),
                source,
            })?;
        tracing::debug!(
            step = step_index,
            fingerprint = fingerprint.short(),
            bytes = size,
            "upload_transferred"
        );
        self.handled.insert(fingerprint.clone());
        Ok(record(UploadAction::Transferred { bytes: size }))
    }
}
