//! Fixed-interval sampling loop.
//!
//! Each cycle:
//! 1. Check for a stop request
//! 2. Sleep for the configured interval
//! 3. Check for a stop request again (never observed mid-sleep)
//! 4. Sample tick counters; on failure skip the cycle, keeping the baseline
//! 5. Compute utilization against the previous snapshot
//! 6. Publish; on failure report and carry on (optionally reopening the
//!    channel, unless a stop request is already pending)
//! 7. Retain the new snapshot as the baseline
//!
//! Everything runs on the caller's thread. The loop owns the sampler, the
//! publisher, and the previous snapshot, so no locking is needed.

use crate::channel::Publisher;
use crate::sampler::{CounterSampler, TickSnapshot};
use crate::utilization::cpu_delta;
use probe_common::config::ProbeConfig;
use probe_common::error::ProbeResult;
use probe_common::metrics::ProbeMetrics;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// What a single cycle did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// A reading was published.
    Published(f64),
    /// Sampling failed; nothing was published and the baseline is unchanged.
    SampleSkipped,
    /// The reading was computed but could not be published.
    PublishFailed(f64),
}

/// Why [`SamplingLoop::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The stop predicate returned true.
    StopRequested,
    /// The configured cycle limit was reached.
    CycleLimit,
}

/// Periodic sample → compute → publish orchestrator.
pub struct SamplingLoop<S: CounterSampler, P: Publisher> {
    sampler: S,
    publisher: P,
    previous: TickSnapshot,
    interval: Duration,
    reconnect_on_failure: bool,
    max_cycles: u64,
    metrics: ProbeMetrics,
}

impl<S: CounterSampler, P: Publisher> SamplingLoop<S, P> {
    /// Take the baseline sample and build the loop.
    ///
    /// # Errors
    ///
    /// Returns the sampler's error if the baseline cannot be obtained; the
    /// probe cannot start without one.
    pub fn start(mut sampler: S, publisher: P, config: &ProbeConfig) -> ProbeResult<Self> {
        let previous = sampler.sample()?;
        debug!(?previous, "Baseline sample taken");

        Ok(Self {
            sampler,
            publisher,
            previous,
            interval: config.sample_interval,
            reconnect_on_failure: config.reconnect_on_failure,
            max_cycles: config.max_cycles,
            metrics: ProbeMetrics::new(),
        })
    }

    /// Run cycles until `should_stop` returns true or the cycle limit is hit.
    ///
    /// `should_stop` is polled before sleeping and again after waking, so a
    /// stop request takes effect within one interval plus any blocked I/O.
    ///
    /// # Errors
    ///
    /// Returns an unrecoverable sampler or publisher error, or the error from
    /// reopening the channel after a failed publish (when
    /// `reconnect_on_failure` is set and no stop is pending).
    pub fn run<F: Fn() -> bool>(&mut self, should_stop: F) -> ProbeResult<StopReason> {
        info!(
            interval_ms = self.interval.as_millis(),
            max_cycles = self.max_cycles,
            "Entering sampling loop"
        );

        let reason = loop {
            if should_stop() {
                break StopReason::StopRequested;
            }

            if !self.interval.is_zero() {
                std::thread::sleep(self.interval);
            }

            if should_stop() {
                break StopReason::StopRequested;
            }

            self.cycle(&should_stop)?;

            if self.max_cycles > 0 && self.metrics.cycles() >= self.max_cycles {
                info!(cycles = self.metrics.cycles(), "Maximum cycle count reached");
                break StopReason::CycleLimit;
            }
        };

        info!(
            ?reason,
            cycles = self.metrics.cycles(),
            published = self.metrics.published(),
            "Sampling loop exited"
        );
        Ok(reason)
    }

    /// Execute steps 4-7 of one cycle without sleeping.
    ///
    /// # Errors
    ///
    /// Returns an error if the sampler or publisher fails unrecoverably, or
    /// if a configured reconnect fails.
    pub fn run_cycle(&mut self) -> ProbeResult<CycleOutcome> {
        self.cycle(&|| false)
    }

    fn cycle(&mut self, should_stop: &dyn Fn() -> bool) -> ProbeResult<CycleOutcome> {
        self.metrics.record_cycle();

        let current = match self.sampler.sample() {
            Ok(snapshot) => snapshot,
            Err(e) if !e.is_recoverable() => {
                error!(error = %e, "Sampler failed unrecoverably");
                return Err(e);
            }
            Err(e) => {
                warn!(error = %e, cycle = self.metrics.cycles(), "Sampling failed, skipping cycle");
                self.metrics.record_sample_failure();
                return Ok(CycleOutcome::SampleSkipped);
            }
        };

        if current.regressed_from(&self.previous) {
            // Published value is still the wrapped delta.
            warn!(
                previous = ?self.previous,
                current = ?current,
                "Tick counter went backwards; reading for this cycle is unreliable"
            );
            self.metrics.record_regression();
        }

        let percent = cpu_delta(&self.previous, &current);
        self.previous = current;

        match self.publisher.publish(percent) {
            Ok(()) => {
                trace!(percent, cycle = self.metrics.cycles(), "Reading published");
                self.metrics.record_published(percent);
                Ok(CycleOutcome::Published(percent))
            }
            Err(e) if !e.is_recoverable() => {
                error!(error = %e, percent, "Publisher failed unrecoverably");
                self.metrics.record_publish_failure();
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, percent, "Failed to publish reading");
                self.metrics.record_publish_failure();

                if self.reconnect_on_failure {
                    self.reconnect(should_stop)?;
                }

                Ok(CycleOutcome::PublishFailed(percent))
            }
        }
    }

    /// Reopen the publisher unless a stop is pending.
    ///
    /// A reconnect that fails because a stop arrived while it was blocked is
    /// not an error; the caller observes the stop at the next check.
    fn reconnect(&mut self, should_stop: &dyn Fn() -> bool) -> ProbeResult<()> {
        if should_stop() {
            debug!("Stop pending, not reopening channel");
            return Ok(());
        }

        match self.publisher.reconnect() {
            Ok(()) => {
                self.metrics.record_reconnect();
                Ok(())
            }
            Err(e) if should_stop() => {
                info!(reason = %e, "Reopen interrupted by stop request");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to reopen channel");
                Err(e)
            }
        }
    }

    /// Snapshot the next delta will be computed against.
    #[must_use]
    pub fn previous(&self) -> TickSnapshot {
        self.previous
    }

    /// Counters for this run.
    #[must_use]
    pub fn metrics(&self) -> &ProbeMetrics {
        &self.metrics
    }

    /// Mutable access to the publisher.
    pub fn publisher_mut(&mut self) -> &mut P {
        &mut self.publisher
    }

    /// Consume the loop, returning the sampler and publisher for teardown.
    pub fn into_parts(self) -> (S, P) {
        (self.sampler, self.publisher)
    }
}
