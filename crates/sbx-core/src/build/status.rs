use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use sbx_domain::{BuildStatusResponse, TemplateStatus, TemplateStatusResponse};

use super::cancel::CancelSignal;
use super::BuildHandle;
use crate::config::StabilityPolicy;
use crate::error::BuildError;
use crate::transport::{self, ApiRequest, Transport};

/// Polls a submitted build at a fixed interval until it reaches a terminal
/// status.
pub(crate) struct StatusPoller {
    transport: Arc<dyn Transport>,
    interval: Duration,
}

impl StatusPoller {
    pub(crate) fn new(transport: Arc<dyn Transport>, interval: Duration) -> Self {
        Self {
            transport,
            interval,
        }
    }

    pub(crate) async fn wait(
        &self,
        handle: &mut BuildHandle,
        cancel: &CancelSignal,
    ) -> Result<BuildStatusResponse, BuildError> {
        let path = format!("templates/builds/{}", handle.build_id);
        loop {
            let status: BuildStatusResponse =
                transport::call(self.transport.as_ref(), ApiRequest::get(path.clone()))
                    .await
                    .map_err(|source| BuildError::StatusCheckFailed {
                        build_id: handle.build_id.clone(),
                        source,
                    })?;
            handle.status = status.status.clone();
            if status.status.is_failed() {
                return Err(BuildError::BuildFailed {
                    build_id: handle.build_id.clone(),
                    message: status
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "no error message reported".to_string()),
                });
            }
            if status.status.is_terminal() {
                return Ok(status);
            }
            tracing::debug!(
                build_id = %handle.build_id,
                status = %status.status,
                progress = status.progress,
                "build_status_pending"
            );
            cancel
                .sleep(self.interval)
                .await
                .map_err(|_| BuildError::Cancelled { phase: "status" })?;
        }
    }
}

/// Result of watching the published template after the build finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StabilityOutcome {
    pub confirmed: bool,
    pub polls: u32,
    pub consecutive_active: u32,
    pub elapsed: Duration,
    pub cancelled: bool,
}

/// Requires the template to be observed active a number of times in a row.
/// Any other observation, including a failed request, resets the count.
pub(crate) struct StabilityMonitor {
    transport: Arc<dyn Transport>,
    policy: StabilityPolicy,
}

impl StabilityMonitor {
    pub(crate) fn new(transport: Arc<dyn Transport>, policy: StabilityPolicy) -> Self {
        Self { transport, policy }
    }

    async fn observe(&self, path: &str) -> bool {
        match transport::call::<TemplateStatusResponse>(
            self.transport.as_ref(),
            ApiRequest::get(path.to_string()),
        )
        .await
        {
            Ok(response) => TemplateStatus::from(response).is_confirmed_active(),
            Err(err) => {
                tracing::debug!(path, error = %err, "template_status_unavailable");
                false
            }
        }
    }

    pub(crate) async fn confirm(
        &self,
        template_id: &str,
        cancel: &CancelSignal,
    ) -> StabilityOutcome {
        let path = format!("templates/{template_id}");
        let started = Instant::now();
        let mut polls = 0u32;
        let mut consecutive = 0u32;
        loop {
            polls += 1;
            if self.observe(&path).await {
                consecutive += 1;
            } else {
                consecutive = 0;
            }
            let outcome = |confirmed, cancelled| StabilityOutcome {
                confirmed,
                polls,
                consecutive_active: consecutive,
                elapsed: started.elapsed(),
                cancelled,
            };
            if consecutive >= self.policy.threshold {
                return outcome(true, false);
            }
            if started.elapsed() >= self.policy.max_wait {
                return outcome(false, false);
            }
            if cancel.sleep(self.policy.interval).await.is_err() {
                return outcome(false, true);
            }
        }
    }
}
