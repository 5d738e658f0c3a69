//! Delta-based CPU utilization.
//!
//! Counter differences use modular `u64` subtraction. A counter that went
//! backwards is therefore indistinguishable from one that wrapped: both
//! yield a huge delta. The result is neither clamped nor flagged, so for
//! that one cycle the percentage can land near 0 or far outside
//! `[0, 100]`. Callers must not assume a bounded value.

use crate::sampler::TickSnapshot;

/// Percentage of non-idle ticks between two snapshots.
///
/// `nice` ticks count as active. Returns exactly `0.0` when the modular
/// total delta is zero, so identical snapshots never divide by zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn cpu_delta(prev: &TickSnapshot, cur: &TickSnapshot) -> f64 {
    let d_user = cur.user.wrapping_sub(prev.user);
    let d_system = cur.system.wrapping_sub(prev.system);
    let d_idle = cur.idle.wrapping_sub(prev.idle);
    let d_nice = cur.nice.wrapping_sub(prev.nice);

    let d_active = d_user.wrapping_add(d_system).wrapping_add(d_nice);
    let d_total = d_active.wrapping_add(d_idle);
    if d_total == 0 {
        return 0.0;
    }

    100.0 * d_active as f64 / d_total as f64
}
