//! Channel lifecycle acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - A stale entry at the channel path is replaced by a fresh FIFO
//! - The FIFO is readable and writable by any local user
//! - An independent reader receives one well-formed line per publish
//! - Teardown removes the entry and may be repeated safely
//! - Reconnecting replaces the entry and serves the next reader

use super::common::{fifo_dir, is_fifo, now_secs, spawn_reader, spawn_short_reader};
use probe_common::{ChannelState, ProbeError};
use probe_runtime::{Channel, Publisher};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Inode and change time of the entry at `path`, if any.
fn entry_identity(path: &Path) -> Option<(u64, i64, i64)> {
    fs::metadata(path)
        .ok()
        .map(|m| (m.ino(), m.ctime(), m.ctime_nsec()))
}

#[test]
fn test_stale_entry_is_replaced() {
    let fifo = fifo_dir();
    fs::write(&fifo.path, "left over from a previous run").unwrap();
    assert!(!is_fifo(&fifo.path));

    let channel = Channel::create(&fifo.path, 0o666).unwrap();
    assert!(is_fifo(&fifo.path));
    assert_eq!(channel.state(), ChannelState::AwaitingReader);
}

#[test]
fn test_fifo_is_world_accessible() {
    let fifo = fifo_dir();
    // A restrictive umask must not narrow the configured mode
    // SAFETY: umask only affects this process's file creation mask.
    let previous = unsafe { libc::umask(0o077) };
    let channel = Channel::create(&fifo.path, 0o666);
    unsafe { libc::umask(previous) };

    let _channel = channel.unwrap();
    let mode = fs::metadata(&fifo.path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o666);
}

#[test]
fn test_reader_receives_wire_format() {
    let fifo = fifo_dir();
    let mut channel = Channel::create(&fifo.path, 0o666).unwrap();
    let reader = spawn_reader(&fifo.path);

    channel.attach_writer().unwrap();
    let before = now_secs();
    for percent in [0.0, 15.0, 33.333, 99.96, 100.0] {
        channel.publish(percent).unwrap();
    }
    let after = now_secs();
    channel.close();

    let readings = reader.join().unwrap();
    let percents: Vec<f64> = readings.iter().map(|r| r.cpu_percent).collect();
    assert_eq!(percents, vec![0.0, 15.0, 33.3, 100.0, 100.0]);

    for reading in &readings {
        assert!(reading.timestamp >= before && reading.timestamp <= after);
        assert!(!reading.raw.contains(' '));
    }
}

#[test]
fn test_open_blocks_until_reader_attaches() {
    let fifo = fifo_dir();
    let path = fifo.path.clone();

    // Channel::open creates the FIFO and waits; the reader can only
    // attach once the entry exists.
    let writer = std::thread::spawn(move || {
        let mut channel = Channel::open(&path, 0o666).unwrap();
        channel.publish_at(42.0, 7).unwrap();
        channel.close();
    });

    while !is_fifo(&fifo.path) {
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    let readings = spawn_reader(&fifo.path).join().unwrap();
    writer.join().unwrap();

    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].raw, "{\"cpu_percent\":42.0,\"timestamp\":7}");
    assert!(!fifo.path.exists());
}

#[test]
fn test_open_in_missing_directory_fails() {
    let fifo = fifo_dir();
    let path = fifo.path.join("nested").join("shinobi.pipe");

    let result = Channel::open(&path, 0o666);
    assert!(matches!(result, Err(ProbeError::Open { .. })));
    assert!(!path.exists());
}

#[test]
fn test_teardown_is_idempotent() {
    let fifo = fifo_dir();
    let mut channel = Channel::create(&fifo.path, 0o666).unwrap();

    channel.close();
    channel.close();
    assert!(!fifo.path.exists());
    assert_eq!(channel.state(), ChannelState::Unopened);

    // Publishing after teardown is a write failure, not a crash
    assert!(matches!(channel.publish(1.0), Err(ProbeError::Write(_))));
}

#[test]
fn test_reconnect_serves_next_reader() {
    let fifo = fifo_dir();
    let mut channel = Channel::create(&fifo.path, 0o666).unwrap();
    let first = spawn_short_reader(&fifo.path, 1);
    channel.attach_writer().unwrap();

    channel.publish_at(10.0, 1).unwrap();
    assert_eq!(first.join().unwrap().len(), 1);

    // First reader is gone
    assert!(matches!(channel.publish_at(20.0, 2), Err(ProbeError::Write(_))));
    assert_eq!(channel.state(), ChannelState::Failed);

    let stale = entry_identity(&fifo.path);
    assert!(stale.is_some());
    // Coarse filesystem clocks would otherwise give the new entry the same ctime
    thread::sleep(Duration::from_millis(20));

    // The second reader must only attach to the recreated entry
    let path = fifo.path.clone();
    let second = thread::spawn(move || {
        while !is_fifo(&path) || entry_identity(&path) == stale {
            thread::sleep(Duration::from_millis(5));
        }
        spawn_reader(&path).join().unwrap()
    });

    channel.reconnect().unwrap();
    assert_eq!(channel.state(), ChannelState::Open);
    assert_ne!(entry_identity(&fifo.path), stale);

    channel.publish_at(30.0, 3).unwrap();
    channel.close();

    let readings = second.join().unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].raw, "{\"cpu_percent\":30.0,\"timestamp\":3}");
    assert!(!fifo.path.exists());
}

#[test]
fn test_failed_reconnect_leaves_nothing_behind() {
    let fifo = fifo_dir();
    let run_dir = fifo.dir.path().join("run");
    fs::create_dir(&run_dir).unwrap();
    let path = run_dir.join("shinobi.pipe");

    let mut channel = Channel::create(&path, 0o666).unwrap();
    fs::remove_dir_all(&run_dir).unwrap();

    let result = channel.reconnect();
    assert!(matches!(result, Err(ProbeError::Open { .. })));
    assert_eq!(channel.state(), ChannelState::Unopened);
    assert!(!path.exists());
    assert!(!run_dir.exists());
}
