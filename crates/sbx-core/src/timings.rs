use std::sync::OnceLock;
use std::time::Instant;

use crate::config::is_truthy;

fn timings_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        std::env::var("SBX_TIMINGS")
            .ok()
            .is_some_and(|raw| is_truthy(&raw))
    })
}

/// Logs how long a pipeline phase took when `SBX_TIMINGS` is enabled.
pub(crate) struct TimingGuard {
    label: &'static str,
    start: Instant,
}

impl TimingGuard {
    pub(crate) fn new(label: &'static str) -> Option<Self> {
        timings_enabled().then(|| Self {
            label,
            start: Instant::now(),
        })
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        tracing::info!(
            sbx_timing = self.label,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "timing"
        );
    }
}
