//! Common utilities for integration tests.
//!
//! Provides helpers for:
//! - Creating FIFO paths in throwaway directories
//! - Spawning line-oriented readers on the far end of the channel
//! - Parsing wire lines the way a consumer would

#![allow(dead_code)] // Not every helper is used by every test module

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tempfile::TempDir;

/// A parsed wire line.
#[derive(Debug, Clone, PartialEq)]
pub struct WireReading {
    /// Raw line without the trailing newline.
    pub raw: String,
    /// Value of `cpu_percent`.
    pub cpu_percent: f64,
    /// Value of `timestamp`.
    pub timestamp: u64,
}

/// Temporary directory plus the FIFO path inside it.
pub struct FifoDir {
    /// Kept alive for the duration of the test.
    pub dir: TempDir,
    /// Path where the channel will live.
    pub path: PathBuf,
}

/// Create a fresh temporary directory for a channel.
pub fn fifo_dir() -> FifoDir {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("shinobi.pipe");
    FifoDir { dir, path }
}

/// Check whether `path` is a FIFO.
pub fn is_fifo(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false)
}

/// Parse one wire line, asserting the exact shape of the message.
///
/// The line must be a JSON object with exactly `cpu_percent` and
/// `timestamp`, both numeric, and the percentage must carry exactly one
/// decimal digit in its textual form.
pub fn parse_line(line: &str) -> WireReading {
    let value: serde_json::Value =
        serde_json::from_str(line).unwrap_or_else(|e| panic!("invalid JSON {line:?}: {e}"));
    let object = value.as_object().expect("reading must be a JSON object");
    assert_eq!(object.len(), 2, "unexpected fields in {line:?}");

    let cpu_percent = object["cpu_percent"]
        .as_f64()
        .expect("cpu_percent must be numeric");
    let timestamp = object["timestamp"]
        .as_u64()
        .expect("timestamp must be an unsigned integer");

    let percent_text = line
        .strip_prefix("{\"cpu_percent\":")
        .and_then(|rest| rest.split(',').next())
        .expect("cpu_percent must be the first field");
    let decimals = percent_text.split('.').nth(1).map_or(0, str::len);
    assert_eq!(decimals, 1, "cpu_percent must have one decimal in {line:?}");

    WireReading {
        raw: line.to_string(),
        cpu_percent,
        timestamp,
    }
}

/// Spawn a reader that consumes lines until the writer closes.
pub fn spawn_reader(path: &Path) -> JoinHandle<Vec<WireReading>> {
    let path = path.to_path_buf();
    thread::spawn(move || {
        let file = File::open(&path).expect("reader failed to open FIFO");
        BufReader::new(file)
            .lines()
            .map(|line| parse_line(&line.expect("read failed")))
            .collect()
    })
}

/// Spawn a reader that consumes exactly `count` lines, then hangs up.
pub fn spawn_short_reader(path: &Path, count: usize) -> JoinHandle<Vec<WireReading>> {
    let path = path.to_path_buf();
    thread::spawn(move || {
        let file = File::open(&path).expect("reader failed to open FIFO");
        let mut reader = BufReader::new(file);
        let mut readings = Vec::with_capacity(count);
        for _ in 0..count {
            let mut line = String::new();
            reader.read_line(&mut line).expect("read failed");
            assert!(line.ends_with('\n'), "line not newline-terminated: {line:?}");
            readings.push(parse_line(line.trim_end_matches('\n')));
        }
        readings
    })
}

/// Current unix time in seconds.
pub fn now_secs() -> u64 {
    probe_runtime::unix_now()
}
