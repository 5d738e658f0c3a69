//! Platform tick counter acquisition.
//!
//! The sampling loop only sees [`CounterSampler`] and [`TickSnapshot`];
//! each target platform contributes one implementation:
//! - Linux: [`ProcStatSampler`] reads the aggregate `cpu` line of `/proc/stat`
//! - macOS: [`MachSampler`] sums `PROCESSOR_CPU_LOAD_INFO` across CPUs
//!
//! [`SimulatedSampler`] produces synthetic counters for tests and for
//! running the daemon without touching the host.

use probe_common::error::{ProbeError, ProbeResult};
use std::collections::VecDeque;

/// Cumulative scheduler ticks since boot, summed across all processing units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickSnapshot {
    /// Ticks spent in user mode.
    pub user: u64,
    /// Ticks spent in kernel mode.
    pub system: u64,
    /// Ticks spent idle.
    pub idle: u64,
    /// Ticks spent in user mode at lowered priority.
    pub nice: u64,
}

impl TickSnapshot {
    /// Create a snapshot from raw counters.
    #[must_use]
    pub const fn new(user: u64, system: u64, idle: u64, nice: u64) -> Self {
        Self {
            user,
            system,
            idle,
            nice,
        }
    }

    /// Sum of all four counters (wrapping).
    #[must_use]
    pub fn total(&self) -> u64 {
        self.active().wrapping_add(self.idle)
    }

    /// Sum of the non-idle counters (wrapping). `nice` counts as active.
    #[must_use]
    pub fn active(&self) -> u64 {
        self.user
            .wrapping_add(self.system)
            .wrapping_add(self.nice)
    }

    /// Returns true if any counter is lower than in `prev`.
    ///
    /// A regression cannot be told apart from a 64-bit wraparound; this is
    /// purely diagnostic and does not change how deltas are computed.
    #[must_use]
    pub fn regressed_from(&self, prev: &TickSnapshot) -> bool {
        self.user < prev.user
            || self.system < prev.system
            || self.idle < prev.idle
            || self.nice < prev.nice
    }
}

/// Source of aggregate tick counters.
///
/// Implementations query current process-wide platform state, capture all
/// four counters from a single underlying read, and release any transient
/// platform buffers before returning. Retry policy belongs to the caller.
pub trait CounterSampler {
    /// Take one snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Sample`] if the platform query fails. No partial
    /// data is returned.
    fn sample(&mut self) -> ProbeResult<TickSnapshot>;
}

impl<S: CounterSampler + ?Sized> CounterSampler for Box<S> {
    fn sample(&mut self) -> ProbeResult<TickSnapshot> {
        (**self).sample()
    }
}

/// Linux sampler backed by `/proc/stat`.
///
/// The kernel's aggregate `cpu` line is already the sum over every online
/// CPU. Only user, nice, system, and idle are read; iowait, irq, softirq,
/// and steal are left out so the classification matches other platforms.
#[cfg(target_os = "linux")]
#[derive(Debug, Default)]
pub struct ProcStatSampler;

#[cfg(target_os = "linux")]
impl ProcStatSampler {
    /// Create a new `/proc/stat` sampler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "linux")]
impl CounterSampler for ProcStatSampler {
    fn sample(&mut self) -> ProbeResult<TickSnapshot> {
        use procfs::{CurrentSI, KernelStats};

        let stats = KernelStats::current()
            .map_err(|e| ProbeError::Sample(format!("failed to read /proc/stat: {e}")))?;
        let cpu = stats.total;

        Ok(TickSnapshot::new(cpu.user, cpu.system, cpu.idle, cpu.nice))
    }
}

/// macOS sampler backed by the Mach host processor info service.
#[cfg(target_os = "macos")]
#[derive(Debug, Default)]
pub struct MachSampler;

#[cfg(target_os = "macos")]
impl MachSampler {
    /// Create a new Mach sampler.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "macos")]
#[allow(deprecated)] // libc points at the mach2 crate for these bindings
impl CounterSampler for MachSampler {
    fn sample(&mut self) -> ProbeResult<TickSnapshot> {
        let mut cpu_count: libc::natural_t = 0;
        let mut info: libc::processor_info_array_t = std::ptr::null_mut();
        let mut info_count: libc::mach_msg_type_number_t = 0;

        // SAFETY: all out-pointers reference live locals; the kernel fills them
        // on KERN_SUCCESS and leaves them untouched otherwise.
        let kr = unsafe {
            libc::host_processor_info(
                libc::mach_host_self(),
                libc::PROCESSOR_CPU_LOAD_INFO,
                &mut cpu_count,
                &mut info,
                &mut info_count,
            )
        };
        if kr != libc::KERN_SUCCESS {
            return Err(ProbeError::Sample(format!(
                "host_processor_info failed with kern_return {kr}"
            )));
        }

        // SAFETY: on success `info` points at `cpu_count` consecutive
        // processor_cpu_load_info records allocated in our task.
        let loads = unsafe {
            std::slice::from_raw_parts(
                info.cast::<libc::processor_cpu_load_info>(),
                cpu_count as usize,
            )
        };

        let mut snapshot = TickSnapshot::default();
        for load in loads {
            snapshot.user += u64::from(load.cpu_ticks[libc::CPU_STATE_USER as usize]);
            snapshot.system += u64::from(load.cpu_ticks[libc::CPU_STATE_SYSTEM as usize]);
            snapshot.idle += u64::from(load.cpu_ticks[libc::CPU_STATE_IDLE as usize]);
            snapshot.nice += u64::from(load.cpu_ticks[libc::CPU_STATE_NICE as usize]);
        }

        let bytes = info_count as usize * std::mem::size_of::<libc::integer_t>();
        // SAFETY: releases exactly the region handed to us above; `loads` is
        // not used past this point.
        unsafe {
            libc::vm_deallocate(
                libc::mach_task_self(),
                info as libc::vm_address_t,
                bytes as libc::vm_size_t,
            );
        }

        Ok(snapshot)
    }
}

/// Create the counter sampler for the build target.
///
/// # Errors
///
/// Returns [`ProbeError::Sample`] on platforms without a counter source.
pub fn platform_sampler() -> ProbeResult<Box<dyn CounterSampler + Send>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(ProcStatSampler::new()))
    }
    #[cfg(target_os = "macos")]
    {
        Ok(Box::new(MachSampler::new()))
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Err(ProbeError::Sample(format!(
            "no tick counter source for {}",
            std::env::consts::OS
        )))
    }
}

/// Synthetic counter source.
///
/// Scripted results are returned first, in order. Once the script is
/// exhausted every call advances the running counters by `step`.
#[derive(Debug, Default)]
pub struct SimulatedSampler {
    script: VecDeque<ProbeResult<TickSnapshot>>,
    current: TickSnapshot,
    step: TickSnapshot,
    calls: u64,
}

impl SimulatedSampler {
    /// Create a sampler that advances by `step` on every call.
    #[must_use]
    pub fn new(step: TickSnapshot) -> Self {
        Self {
            script: VecDeque::new(),
            current: TickSnapshot::default(),
            step,
            calls: 0,
        }
    }

    /// Create a sampler with a steady load of `percent` over 100 ticks per call.
    #[must_use]
    pub fn with_load(percent: u8) -> Self {
        let busy = u64::from(percent.min(100));
        Self::new(TickSnapshot::new(busy, 0, 100 - busy, 0))
    }

    /// Create a sampler that replays `script` before falling back to `step`.
    #[must_use]
    pub fn scripted(script: Vec<ProbeResult<TickSnapshot>>, step: TickSnapshot) -> Self {
        let mut sampler = Self::new(step);
        sampler.script = script.into();
        sampler
    }

    /// Number of `sample` calls made so far.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl CounterSampler for SimulatedSampler {
    fn sample(&mut self) -> ProbeResult<TickSnapshot> {
        self.calls += 1;

        if let Some(next) = self.script.pop_front() {
            if let Ok(snapshot) = &next {
                self.current = *snapshot;
            }
            return next;
        }

        self.current = TickSnapshot::new(
            self.current.user.wrapping_add(self.step.user),
            self.current.system.wrapping_add(self.step.system),
            self.current.idle.wrapping_add(self.step.idle),
            self.current.nice.wrapping_add(self.step.nice),
        );
        Ok(self.current)
    }
}
