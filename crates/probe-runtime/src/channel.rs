//! Named pipe publish channel.
//!
//! The channel is a FIFO at a well-known path with exactly one writer (this
//! process) and at most one reader. Lifecycle:
//!
//! 1. [`Channel::create`] removes any stale entry and makes a fresh FIFO
//! 2. [`Channel::attach_writer`] opens it for writing, **blocking the calling
//!    thread until a reader opens the other end**
//! 3. [`Channel::publish`] writes one newline-terminated JSON reading per call
//! 4. [`Channel::close`] drops the handle and removes the entry
//!
//! Writes may block when the reader stops draining the pipe; nothing is
//! buffered or dropped here. A write to a pipe whose reader has gone away
//! fails with `EPIPE` (the Rust runtime ignores `SIGPIPE`).

use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use probe_common::error::{ProbeError, ProbeResult};
use probe_common::state::ChannelState;
use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::os::fd::FromRawFd;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Size of the fixed buffer a reading is formatted into.
pub const MESSAGE_CAPACITY: usize = 128;

/// Sink for utilization readings.
///
/// Implemented by [`Channel`]; the sampling loop depends only on this trait.
pub trait Publisher {
    /// Publish one reading.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Write`] if the reading could not be delivered.
    fn publish(&mut self, percent: f64) -> ProbeResult<()>;

    /// Tear down and re-establish the sink. May block.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Open`] if the sink cannot be re-established.
    fn reconnect(&mut self) -> ProbeResult<()>;
}

/// Single-writer FIFO publish endpoint.
#[derive(Debug)]
pub struct Channel {
    path: PathBuf,
    mode: u32,
    writer: Option<File>,
    state: ChannelState,
}

impl Channel {
    /// Create the FIFO and block until a reader attaches.
    ///
    /// Equivalent to [`Channel::create`] followed by
    /// [`Channel::attach_writer`]. The entry is removed again if the
    /// open-for-write step fails.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Open`] if the entry cannot be created or opened.
    pub fn open(path: impl Into<PathBuf>, mode: u32) -> ProbeResult<Self> {
        let mut channel = Self::create(path, mode)?;
        channel.attach_writer()?;
        Ok(channel)
    }

    /// Replace any entry at `path` with a fresh FIFO carrying `mode`.
    ///
    /// Does not block. The returned channel is `AwaitingReader`.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Open`] if the stale entry cannot be removed or
    /// the FIFO cannot be created.
    pub fn create(path: impl Into<PathBuf>, mode: u32) -> ProbeResult<Self> {
        let path = path.into();
        let mut channel = Self {
            path,
            mode,
            writer: None,
            state: ChannelState::Unopened,
        };

        if let Err(e) = channel.make_fifo() {
            channel.state.transition_to(ChannelState::Failed)?;
            return Err(channel.open_error(&e));
        }

        channel.state.transition_to(ChannelState::AwaitingReader)?;
        info!(path = %channel.path.display(), mode = %format!("{mode:#o}"), "Channel created");
        Ok(channel)
    }

    /// Open the FIFO for writing.
    ///
    /// **Blocks until a reader opens the FIFO.** There is no timeout. The
    /// open is not restarted on `EINTR`, so a delivered signal whose
    /// handler was installed without `SA_RESTART` ends the wait with an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Open`] if the open call fails, and
    /// [`ProbeError::InvalidStateTransition`] unless the channel is
    /// `AwaitingReader`.
    pub fn attach_writer(&mut self) -> ProbeResult<()> {
        if self.state != ChannelState::AwaitingReader {
            return Err(ProbeError::InvalidStateTransition {
                from: self.state.to_string(),
                to: ChannelState::Open.to_string(),
            });
        }

        debug!(path = %self.path.display(), "Waiting for reader to attach");
        let opened = nix::fcntl::open(
            self.path.as_path(),
            OFlag::O_WRONLY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
        .map_err(io::Error::from);

        match opened {
            Ok(fd) => {
                // SAFETY: fd was just returned by open(2) and has no other owner.
                self.writer = Some(unsafe { File::from_raw_fd(fd) });
                self.state.transition_to(ChannelState::Open)?;
                info!(path = %self.path.display(), "Reader attached");
                Ok(())
            }
            Err(e) => {
                self.state.transition_to(ChannelState::Failed)?;
                Err(self.open_error(&e))
            }
        }
    }

    /// Publish a reading stamped with the current wall-clock time.
    ///
    /// # Errors
    ///
    /// See [`Channel::publish_at`].
    pub fn publish(&mut self, percent: f64) -> ProbeResult<()> {
        self.publish_at(percent, unix_now())
    }

    /// Publish a reading with an explicit unix timestamp.
    ///
    /// The message is formatted into a [`MESSAGE_CAPACITY`] byte buffer and
    /// handed to a single `write` call. May block under backpressure.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Write`] if `percent` is not finite or the
    /// message does not fit the buffer (nothing is written in either case),
    /// no write handle is held, the write fails, or fewer bytes than
    /// requested are accepted. Write failures move the channel to `Failed`.
    ///
    /// `Failed` is sticky: the handle is kept and later publishes are still
    /// attempted, and one that succeeds (for example after a new reader
    /// opened the FIFO) returns `Ok` while [`Channel::state`] stays
    /// `Failed`. The state records that a write has failed since the
    /// channel was opened, not that the pipe is currently broken.
    pub fn publish_at(&mut self, percent: f64, timestamp: u64) -> ProbeResult<()> {
        let mut buf = [0u8; MESSAGE_CAPACITY];
        let len = encode_reading(&mut buf, percent, timestamp)?;

        let Some(writer) = self.writer.as_mut() else {
            return Err(ProbeError::Write(format!(
                "channel is {}, no write handle",
                self.state
            )));
        };

        match writer.write(&buf[..len]) {
            Ok(n) if n == len => Ok(()),
            Ok(n) => {
                self.state.transition_to(ChannelState::Failed)?;
                Err(ProbeError::Write(format!(
                    "short write: {n} of {len} bytes accepted"
                )))
            }
            Err(e) => {
                self.state.transition_to(ChannelState::Failed)?;
                Err(ProbeError::Write(e.to_string()))
            }
        }
    }

    /// Release the write handle and remove the filesystem entry.
    ///
    /// Best effort: removal errors are logged, never returned. Safe to call
    /// any number of times.
    pub fn close(&mut self) {
        if self.writer.take().is_some() {
            debug!(path = %self.path.display(), "Write handle released");
        }

        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Channel entry removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove channel entry"),
        }

        self.state = ChannelState::Unopened;
    }

    /// Filesystem path of the channel.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    #[allow(clippy::cast_possible_truncation)] // mode_t is u16 on macOS; validated to 0o777
    fn make_fifo(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed stale channel entry"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        nix::unistd::mkfifo(
            self.path.as_path(),
            Mode::from_bits_truncate(self.mode as nix::libc::mode_t),
        )
        .map_err(io::Error::from)?;

        // mkfifo applies the umask; force the configured bits.
        fs::set_permissions(&self.path, fs::Permissions::from_mode(self.mode))
    }

    fn open_error(&self, e: &io::Error) -> ProbeError {
        ProbeError::Open {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

impl Publisher for Channel {
    fn publish(&mut self, percent: f64) -> ProbeResult<()> {
        Channel::publish(self, percent)
    }

    fn reconnect(&mut self) -> ProbeResult<()> {
        info!(path = %self.path.display(), "Reopening channel");
        self.close();
        *self = Self::open(self.path.clone(), self.mode)?;
        Ok(())
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if self.state != ChannelState::Unopened {
            self.close();
        }
    }
}

/// Format one reading into `buf`, returning the number of bytes used.
///
/// Layout: `{"cpu_percent":<one decimal>,"timestamp":<unix seconds>}\n`.
///
/// # Errors
///
/// Returns [`ProbeError::Write`] if `percent` is NaN or infinite (JSON has
/// no spelling for either) or the message does not fit in `buf`.
pub fn encode_reading(buf: &mut [u8], percent: f64, timestamp: u64) -> ProbeResult<usize> {
    if !percent.is_finite() {
        return Err(ProbeError::Write(format!(
            "reading {percent} is not a finite number"
        )));
    }

    let capacity = buf.len();
    let mut cursor = Cursor::new(buf);
    writeln!(
        cursor,
        "{{\"cpu_percent\":{percent:.1},\"timestamp\":{timestamp}}}"
    )
    .map_err(|_| {
        ProbeError::Write(format!("reading does not fit in {capacity} byte buffer"))
    })?;

    usize::try_from(cursor.position())
        .map_err(|_| ProbeError::Write("message length overflow".into()))
}

/// Current wall-clock time in whole unix seconds.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
