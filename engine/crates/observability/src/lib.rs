use tracing_subscriber::{fmt, EnvFilter};

pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Timing of one scoped script run.
#[derive(Debug, Clone)]
pub struct RunMetrics {
    pub run_id: u64,
    pub duration_us: u128,
    /// Slow-run threshold in microseconds (0 = never warn).
    pub budget_us: u128,
    /// Whether the run surfaced a script error.
    pub failed: bool,
    /// Native objects reclaimed after the run.
    pub reclaimed: usize,
}

impl RunMetrics {
    pub fn exceeded_budget(&self) -> bool {
        self.budget_us > 0 && self.duration_us > self.budget_us
    }

    pub fn log(&self) {
        if self.exceeded_budget() {
            tracing::warn!(
                run = self.run_id,
                duration_us = self.duration_us,
                failed = self.failed,
                reclaimed = self.reclaimed,
                "script run exceeded budget ({}us > {}us)",
                self.duration_us,
                self.budget_us
            );
        } else {
            tracing::debug!(
                run = self.run_id,
                duration_us = self.duration_us,
                failed = self.failed,
                reclaimed = self.reclaimed,
                "script run completed"
            );
        }
    }
}
