//! The template build pipeline.
//!
//! Phases run strictly in order: validate, fingerprint copy content, upload
//! what the service lacks, submit, stream logs, poll the build to a terminal
//! status and finally confirm that the published template stays active.

mod cancel;
mod logs;
mod status;

use std::sync::Arc;

use time::OffsetDateTime;

use sbx_domain::{
    BuildSpecification, BuildStatus, CopyStep, Fingerprint, Step, SubmitBuildRequest,
    SubmitBuildResponse, WireStep,
};

pub use cancel::{CancelSignal, Canceller};
pub use logs::{LogCallback, LogLine};
pub use status::StabilityOutcome;

use self::cancel::Interrupted;
use self::logs::LogStream;
use self::status::{StabilityMonitor, StatusPoller};
use crate::config::PollingConfig;
use crate::content::{ArchiveBuilder, Fingerprinter, StepContent};
use crate::error::BuildError;
use crate::timings::TimingGuard;
use crate::transport::{self, ApiRequest, Transport};
use crate::upload::{UploadCoordinator, UploadRecord};

const SUBMIT_PATH: &str = "templates/builds";

/// A submitted build as observed so far.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildHandle {
    pub build_id: String,
    pub template_id: String,
    pub status: BuildStatus,
    pub created_at: OffsetDateTime,
    pub log_offset: u64,
    logs_path: String,
}

impl BuildHandle {
    pub fn logs_path(&self) -> &str {
        &self.logs_path
    }
}

/// A copy step together with the fingerprint of the content it selects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedCopy {
    step: CopyStep,
    content: StepContent,
}

impl PreparedCopy {
    pub fn step(&self) -> &CopyStep {
        &self.step
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.content.fingerprint
    }

    pub fn content(&self) -> &StepContent {
        &self.content
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreparedStep {
    Copy(PreparedCopy),
    Other(Step),
}

impl PreparedStep {
    fn to_wire(&self) -> WireStep {
        match self {
            Self::Copy(copy) => {
                WireStep::encode(&Step::Copy(copy.step.clone()), Some(copy.fingerprint()))
            }
            Self::Other(step) => WireStep::encode(step, None),
        }
    }
}

/// A validated specification whose copy steps all carry fingerprints. Only
/// [`BuildOrchestrator::prepare`] produces one.
#[derive(Clone, Debug)]
pub struct PreparedSpecification {
    spec: BuildSpecification,
    steps: Vec<PreparedStep>,
    archives: ArchiveBuilder,
}

impl PreparedSpecification {
    pub fn specification(&self) -> &BuildSpecification {
        &self.spec
    }

    pub fn steps(&self) -> &[PreparedStep] {
        &self.steps
    }

    pub fn copies(&self) -> impl Iterator<Item = (usize, &PreparedCopy)> {
        self.steps.iter().enumerate().filter_map(|(idx, step)| match step {
            PreparedStep::Copy(copy) => Some((idx, copy)),
            PreparedStep::Other(_) => None,
        })
    }

    pub fn to_request(&self) -> SubmitBuildRequest {
        let steps = self.steps.iter().map(PreparedStep::to_wire).collect();
        SubmitBuildRequest::new(&self.spec, steps)
    }
}

/// What each phase of a finished build did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildOutcome {
    pub build: BuildHandle,
    pub uploads: Vec<UploadRecord>,
    pub stability: StabilityOutcome,
    pub warnings: Vec<String>,
}

pub struct BuildOrchestrator {
    transport: Arc<dyn Transport>,
    polling: PollingConfig,
    log_callback: Option<LogCallback>,
    cancel: CancelSignal,
}

fn interrupted(phase: &'static str) -> impl Fn(Interrupted) -> BuildError {
    move |_| BuildError::Cancelled { phase }
}

impl BuildOrchestrator {
    pub fn new(transport: Arc<dyn Transport>, polling: PollingConfig) -> Self {
        Self {
            transport,
            polling,
            log_callback: None,
            cancel: CancelSignal::never(),
        }
    }

    /// Registers a receiver for build log lines; without one, logs are not
    /// fetched at all.
    #[must_use]
    pub fn with_log_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(LogLine) + Send + Sync + 'static,
    {
        self.log_callback = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn validate(spec: &BuildSpecification) -> Result<(), BuildError> {
        spec.validate().map_err(BuildError::from)
    }

    /// Fingerprints every copy step in authoring order.
    pub async fn prepare(
        &self,
        spec: &BuildSpecification,
    ) -> Result<PreparedSpecification, BuildError> {
        let _timing = TimingGuard::new("build.prepare");
        let spec = spec.clone();
        tokio::task::spawn_blocking(move || {
            let fingerprinter = Fingerprinter::new(&spec.context)?;
            let steps = spec
                .steps
                .iter()
                .map(|step| -> Result<PreparedStep, BuildError> {
                    match step {
                        Step::Copy(copy) => Ok(PreparedStep::Copy(PreparedCopy {
                            step: copy.clone(),
                            content: fingerprinter.fingerprint_step(copy)?,
                        })),
                        other => Ok(PreparedStep::Other(other.clone())),
                    }
                })
                .collect::<Result<Vec<_>, BuildError>>()?;
            Ok::<_, BuildError>(PreparedSpecification {
                archives: fingerprinter.archive_builder(),
                spec,
                steps,
            })
        })
        .await
        .map_err(|err| BuildError::ContentUnreadable {
            path: ".".into(),
            reason: format!("fingerprint task failed: {err}"),
        })?
    }

    pub async fn upload(
        &self,
        prepared: &PreparedSpecification,
    ) -> Result<Vec<UploadRecord>, BuildError> {
        let _timing = TimingGuard::new("build.upload");
        let mut coordinator =
            UploadCoordinator::new(self.transport.clone(), prepared.archives.clone());
        let mut records = Vec::new();
        for (index, copy) in prepared.copies() {
            self.cancel.check().map_err(interrupted("upload"))?;
            records.push(
                coordinator
                    .ensure_uploaded(index, &copy.step, &copy.content)
                    .await?,
            );
        }
        Ok(records)
    }

    pub async fn submit(
        &self,
        prepared: &PreparedSpecification,
    ) -> Result<BuildHandle, BuildError> {
        let _timing = TimingGuard::new("build.submit");
        let request = ApiRequest::post(SUBMIT_PATH)
            .json(&prepared.to_request())
            .map_err(BuildError::BuildSubmissionFailed)?;
        let response: SubmitBuildResponse = transport::call(self.transport.as_ref(), request)
            .await
            .map_err(BuildError::BuildSubmissionFailed)?;
        let logs_path = response
            .logs_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| format!("{SUBMIT_PATH}/{}/logs", response.build_id));
        tracing::debug!(
            build_id = %response.build_id,
            template_id = %response.template_id,
            status = %response.status,
            "build_submitted"
        );
        Ok(BuildHandle {
            build_id: response.build_id,
            template_id: response.template_id,
            status: BuildStatus::Building,
            created_at: OffsetDateTime::now_utc(),
            log_offset: 0,
            logs_path,
        })
    }

    /// Forwards build output to the registered callback. Streaming problems
    /// never fail the build.
    pub async fn stream_logs(&self, handle: &mut BuildHandle) {
        let Some(callback) = self.log_callback.clone() else {
            return;
        };
        let _timing = TimingGuard::new("build.logs");
        let mut stream = LogStream::new(
            self.transport.clone(),
            &handle.build_id,
            handle.logs_path.clone(),
            handle.log_offset,
            self.polling.log_interval,
            callback,
        );
        stream.run(&self.cancel).await;
        handle.log_offset = stream.offset();
    }

    pub async fn wait_for_terminal(&self, handle: &mut BuildHandle) -> Result<(), BuildError> {
        let _timing = TimingGuard::new("build.status");
        StatusPoller::new(self.transport.clone(), self.polling.build_interval)
            .wait(handle, &self.cancel)
            .await
            .map(|_| ())
    }

    pub async fn confirm_stability(&self, template_id: &str) -> StabilityOutcome {
        let _timing = TimingGuard::new("build.stability");
        StabilityMonitor::new(self.transport.clone(), self.polling.stability)
            .confirm(template_id, &self.cancel)
            .await
    }

    /// Runs every phase. Validation failures surface before any request is
    /// made; a template that never settles only produces a warning.
    pub async fn build(&self, spec: &BuildSpecification) -> Result<BuildOutcome, BuildError> {
        let _timing = TimingGuard::new("build.total");
        Self::validate(spec)?;
        tracing::debug!(
            phase = "validate",
            steps = spec.steps.len(),
            "build_phase_done"
        );

        self.cancel.check().map_err(interrupted("prepare"))?;
        let prepared = self.prepare(spec).await?;
        tracing::debug!(
            phase = "prepare",
            copies = prepared.copies().count(),
            "build_phase_done"
        );

        self.cancel.check().map_err(interrupted("upload"))?;
        let uploads = self.upload(&prepared).await?;
        tracing::debug!(
            phase = "upload",
            records = uploads.len(),
            "build_phase_done"
        );

        self.cancel.check().map_err(interrupted("submit"))?;
        let mut handle = self.submit(&prepared).await?;

        self.stream_logs(&mut handle).await;
        self.cancel.check().map_err(interrupted("logs"))?;

        self.wait_for_terminal(&mut handle).await?;
        tracing::debug!(
            phase = "status",
            build_id = %handle.build_id,
            status = %handle.status,
            "build_phase_done"
        );

        let stability = self.confirm_stability(&handle.template_id).await;
        let mut warnings = Vec::new();
        if !stability.confirmed {
            let policy = self.polling.stability;
            let warning = if stability.cancelled {
                format!(
                    "template {} built, stability confirmation was cancelled",
                    handle.template_id
                )
            } else {
                format!(
                    "template {} built but was not observed active {} times in a row within {:?}",
                    handle.template_id, policy.threshold, policy.max_wait
                )
            };
            tracing::warn!(
                template_id = %handle.template_id,
                polls = stability.polls,
                "template_stability_unconfirmed"
            );
            warnings.push(warning);
        }
        Ok(BuildOutcome {
            build: handle,
            uploads,
            stability,
            warnings,
        })
    }
}
