//! Per-run counters for the sampling loop.
//!
//! Owned by the orchestrator's single thread, so plain integers are
//! enough; no atomics.

/// Counters describing what the sampling loop has done so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeMetrics {
    /// Cycles that woke up and attempted a sample.
    cycles: u64,
    /// Readings written to the channel.
    published: u64,
    /// Cycles skipped because sampling failed.
    sample_failures: u64,
    /// Publish attempts that failed.
    publish_failures: u64,
    /// Successful channel reopen operations.
    reconnects: u64,
    /// Tick counter regressions observed between consecutive samples.
    regressions: u64,
    /// Most recently published percentage.
    last_percent: Option<f64>,
}

impl ProbeMetrics {
    /// Create an empty metrics set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the start of a cycle.
    pub fn record_cycle(&mut self) {
        self.cycles += 1;
    }

    /// Record a successful publish.
    pub fn record_published(&mut self, percent: f64) {
        self.published += 1;
        self.last_percent = Some(percent);
    }

    /// Record a failed sample.
    pub fn record_sample_failure(&mut self) {
        self.sample_failures += 1;
    }

    /// Record a failed publish.
    pub fn record_publish_failure(&mut self) {
        self.publish_failures += 1;
    }

    /// Record a successful channel reopen.
    pub fn record_reconnect(&mut self) {
        self.reconnects += 1;
    }

    /// Record a counter regression.
    pub fn record_regression(&mut self) {
        self.regressions += 1;
    }

    /// Cycles attempted.
    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Readings published.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Sample failures.
    #[must_use]
    pub fn sample_failures(&self) -> u64 {
        self.sample_failures
    }

    /// Publish failures.
    #[must_use]
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures
    }

    /// Channel reopens.
    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Counter regressions.
    #[must_use]
    pub fn regressions(&self) -> u64 {
        self.regressions
    }

    /// Last published percentage, if any.
    #[must_use]
    pub fn last_percent(&self) -> Option<f64> {
        self.last_percent
    }
}
