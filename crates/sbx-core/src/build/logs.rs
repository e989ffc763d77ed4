use std::sync::Arc;
use std::time::Duration;

use sbx_domain::{LogLevel, LogsResponse};

use super::cancel::CancelSignal;
use crate::transport::{self, ApiRequest, Transport, TransportError};

/// One line of remote build output with its inferred severity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub level: LogLevel,
    pub message: String,
}

const LOG_TARGET: &str = "sbx::build_log";

pub type LogCallback = Arc<dyn Fn(LogLine) + Send + Sync>;

/// Incremental reader of a build's log, resuming from the last offset seen.
pub(crate) struct LogStream {
    transport: Arc<dyn Transport>,
    build_id: String,
    path: String,
    offset: u64,
    interval: Duration,
    callback: LogCallback,
}

impl LogStream {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        build_id: &str,
        path: String,
        offset: u64,
        interval: Duration,
        callback: LogCallback,
    ) -> Self {
        Self {
            transport,
            build_id: build_id.to_string(),
            path,
            offset,
            interval,
            callback,
        }
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    /// Fetches and forwards new lines. Returns whether the log is finished.
    pub(crate) async fn poll_once(&mut self) -> Result<bool, TransportError> {
        let request = ApiRequest::get(self.path.clone()).query("offset", self.offset);
        let batch: LogsResponse = transport::call(self.transport.as_ref(), request).await?;
        for raw in &batch.logs {
            let message = raw.trim_end();
            if message.trim().is_empty() {
                continue;
            }
            let level = LogLevel::classify(message);
            match level {
                LogLevel::Error => {
                    tracing::error!(target: LOG_TARGET, build_id = %self.build_id, "{message}");
                }
                LogLevel::Warn => {
                    tracing::warn!(target: LOG_TARGET, build_id = %self.build_id, "{message}");
                }
                LogLevel::Info => {
                    tracing::info!(target: LOG_TARGET, build_id = %self.build_id, "{message}");
                }
            }
            (self.callback)(LogLine {
                level,
                message: message.to_string(),
            });
        }
        self.offset = self.offset.max(batch.offset);
        let terminal = batch.status.as_ref().is_some_and(|s| s.is_terminal());
        Ok(batch.complete || terminal)
    }

    /// Streams until the log completes, the build turns terminal or the
    /// signal fires. A failed fetch ends streaming without failing the build.
    pub(crate) async fn run(&mut self, cancel: &CancelSignal) {
        loop {
            match self.poll_once().await {
                Ok(true) => return,
                Ok(false) => {}
                Err(err) => {
                    tracing::debug!(
                        build_id = %self.build_id,
                        offset = self.offset,
                        error = %err,
                        "build_log_stream_stopped"
                    );
                    return;
                }
            }
            if cancel.sleep(self.interval).await.is_err() {
                return;
            }
        }
    }
}
