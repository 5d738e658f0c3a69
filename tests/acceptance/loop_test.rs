//! Sampling loop acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Every cycle publishes one reading computed from consecutive samples
//! - A reader hanging up turns publishes into failures without stopping the loop
//! - A missing baseline aborts startup and removes the channel entry

use super::common::{fifo_dir, spawn_reader, spawn_short_reader};
use probe_common::{ChannelState, ProbeConfig, ProbeError};
use probe_runtime::{
    Channel, CycleOutcome, SamplingLoop, SimulatedSampler, StopReason, TickSnapshot,
};
use std::time::Duration;

fn config(max_cycles: u64) -> ProbeConfig {
    ProbeConfig {
        sample_interval: Duration::ZERO,
        max_cycles,
        ..ProbeConfig::default()
    }
}

#[test]
fn test_loop_publishes_each_cycle() {
    let fifo = fifo_dir();
    let mut channel = Channel::create(&fifo.path, 0o666).unwrap();
    let reader = spawn_reader(&fifo.path);
    channel.attach_writer().unwrap();

    let mut probe =
        SamplingLoop::start(SimulatedSampler::with_load(25), channel, &config(5)).unwrap();
    let reason = probe.run(|| false).unwrap();
    assert_eq!(reason, StopReason::CycleLimit);
    assert_eq!(probe.metrics().published(), 5);

    let (_, mut channel) = probe.into_parts();
    channel.close();

    let readings = reader.join().unwrap();
    assert_eq!(readings.len(), 5);
    assert!(readings.iter().all(|r| r.cpu_percent == 25.0));
    assert!(readings.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn test_reader_hangup_does_not_stop_loop() {
    let fifo = fifo_dir();
    let mut channel = Channel::create(&fifo.path, 0o666).unwrap();
    let reader = spawn_short_reader(&fifo.path, 2);
    channel.attach_writer().unwrap();

    let mut probe =
        SamplingLoop::start(SimulatedSampler::with_load(60), channel, &config(0)).unwrap();
    assert_eq!(probe.run_cycle().unwrap(), CycleOutcome::Published(60.0));
    assert_eq!(probe.run_cycle().unwrap(), CycleOutcome::Published(60.0));

    let readings = reader.join().unwrap();
    assert_eq!(readings.len(), 2);

    for _ in 0..3 {
        assert_eq!(probe.run_cycle().unwrap(), CycleOutcome::PublishFailed(60.0));
    }
    assert_eq!(probe.publisher_mut().state(), ChannelState::Failed);
    assert_eq!(probe.metrics().cycles(), 5);
    assert_eq!(probe.metrics().publish_failures(), 3);

    let (_, mut channel) = probe.into_parts();
    channel.close();
    assert!(!fifo.path.exists());
}

#[test]
fn test_baseline_failure_tears_down_channel() {
    let fifo = fifo_dir();
    let mut channel = Channel::create(&fifo.path, 0o666).unwrap();
    let reader = spawn_reader(&fifo.path);
    channel.attach_writer().unwrap();

    let sampler = SimulatedSampler::scripted(
        vec![Err(ProbeError::Sample("host info unavailable".into()))],
        TickSnapshot::default(),
    );
    let result = SamplingLoop::start(sampler, channel, &config(1));
    assert!(matches!(result, Err(ProbeError::Sample(_))));

    // Channel was dropped with the failed loop: reader sees EOF, entry gone
    assert!(reader.join().unwrap().is_empty());
    assert!(!fifo.path.exists());
}
