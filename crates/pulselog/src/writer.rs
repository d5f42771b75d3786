//! Typed append-only logging API for producer threads.
//!
//! Each [`Writer`] is used from exactly one producer thread and is lock-free
//! and allocation-free on the logging hot path. Every operation emits a
//! single frame, except [`Writer::log_format`], which brackets its argument
//! frames with `START_FMT`/`END_FMT`. [`LockedWriter`] serializes one writer
//! across multiple producer threads with a mutex; it is a convenience
//! wrapper, not part of the hot-path contract.

use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::entry::Entry;
use crate::event::{encode_pid_tag, Event, HistTsEntry, Timestamp, MAX_LENGTH};
use crate::fifo::ByteFifo;

/// One argument of a formatted record.
#[derive(Debug, Clone, Copy)]
pub enum LogArg<'a> {
    /// Matches `%s`.
    Str(&'a str),
    /// Matches `%t`.
    Timestamp(Timestamp),
    /// Matches `%d`.
    Int(i32),
    /// Matches `%f`.
    Float(f32),
}

impl LogArg<'_> {
    fn matches(&self, specifier: u8) -> bool {
        matches!(
            (self, specifier),
            (Self::Str(_), b's')
                | (Self::Timestamp(_), b't')
                | (Self::Int(_), b'd')
                | (Self::Float(_), b'f')
        )
    }
}

/// Appends typed event frames to a producer ring.
///
/// A writer is *enabled* only if it has a backing ring and has not been
/// disabled. When disabled, every logging operation is a no-op with no side
/// effect and no allocation.
pub struct Writer {
    /// Backing ring; absent for a permanently disabled writer.
    fifo: Option<Arc<ByteFifo>>,
    /// Per-writer enable flag.
    enabled: AtomicBool,
    /// Cached `(pid, process name)` payload, built once at construction.
    pid_tag: Vec<u8>,
}

impl Writer {
    /// Creates a writer backed by `fifo`.
    #[must_use]
    pub fn new(fifo: Arc<ByteFifo>) -> Self {
        Self {
            fifo: Some(fifo),
            enabled: AtomicBool::new(true),
            pid_tag: build_pid_tag(),
        }
    }

    /// Creates a writer with no backing ring; it stays disabled forever.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            fifo: None,
            enabled: AtomicBool::new(false),
            pid_tag: Vec::new(),
        }
    }

    /// Returns whether logging operations currently reach the ring.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Sets the enable flag and returns the previous state.
    ///
    /// Enabling a writer with no backing ring leaves it disabled.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let enabled = enabled && self.fifo.is_some();
        self.enabled.swap(enabled, Ordering::Relaxed)
    }

    /// Emits a `STRING` frame, truncating to the maximum payload length.
    pub fn log(&self, string: &str) {
        let bytes = string.as_bytes();
        let len = bytes.len().min(MAX_LENGTH);
        self.log_event(Event::String, &bytes[..len]);
    }

    /// Formats into a bounded stack buffer and emits the result as one
    /// `STRING` frame. Output past the maximum payload length is dropped.
    pub fn log_fmt(&self, args: fmt::Arguments<'_>) {
        if !self.is_enabled() {
            return;
        }
        let mut buf = TruncateBuf::default();
        let _ = buf.write_fmt(args);
        self.log_event(Event::String, buf.as_bytes());
    }

    /// Reads the monotonic clock and emits a `TIMESTAMP` frame.
    ///
    /// On clock failure the frame is silently dropped (an error line goes to
    /// the trace log).
    pub fn log_timestamp(&self) {
        if !self.is_enabled() {
            return;
        }
        if let Some(ts) = Timestamp::now() {
            self.log_timestamp_at(ts);
        } else {
            tracing::error!("failed to read the monotonic clock");
        }
    }

    /// Emits a `TIMESTAMP` frame with a caller-supplied time.
    pub fn log_timestamp_at(&self, ts: Timestamp) {
        self.log_event(Event::Timestamp, &ts.to_bytes());
    }

    /// Emits an `INTEGER` frame.
    pub fn log_integer(&self, x: i32) {
        self.log_event(Event::Integer, &x.to_le_bytes());
    }

    /// Emits a `FLOAT` frame.
    pub fn log_float(&self, x: f32) {
        self.log_event(Event::Float, &x.to_le_bytes());
    }

    /// Emits a `PID` frame carrying the cached process id and name.
    pub fn log_pid(&self) {
        self.log_event(Event::Pid, &self.pid_tag);
    }

    /// Emits a `HASH` frame.
    pub fn log_hash(&self, hash: u64) {
        self.log_event(Event::Hash, &hash.to_le_bytes());
    }

    /// Reads the monotonic clock and emits a histogram sample for `hash`.
    pub fn log_hist_ts(&self, hash: u64) {
        self.log_hist_event(Event::HistogramEntryTs, hash);
    }

    /// Reads the monotonic clock and emits a histogram flush for `hash`.
    pub fn log_hist_flush(&self, hash: u64) {
        self.log_hist_event(Event::HistogramFlush, hash);
    }

    fn log_hist_event(&self, event: Event, hash: u64) {
        if !self.is_enabled() {
            return;
        }
        if let Some(ts) = Timestamp::now() {
            self.log_event(event, &HistTsEntry { hash, ts }.to_bytes());
        } else {
            tracing::error!("failed to read the monotonic clock");
        }
    }

    /// Emits a `START_FMT` frame, truncating the format string to the
    /// maximum payload length.
    pub fn log_start(&self, fmt: &str) {
        let bytes = fmt.as_bytes();
        let len = bytes.len().min(MAX_LENGTH);
        self.log_event(Event::StartFmt, &bytes[..len]);
    }

    /// Emits the `END_FMT` sentinel.
    pub fn log_end(&self) {
        self.log_event(Event::EndFmt, &[]);
    }

    /// Emits a complete formatted record: `START_FMT`, `TIMESTAMP`, `HASH`,
    /// one frame per consuming `%` specifier, then `END_FMT`.
    ///
    /// Specifiers: `%s` string, `%t` timestamp, `%d` integer, `%f` float,
    /// `%p` pid (consumes no argument), `%%` literal percent. A trailing
    /// lone `%` ends the scan. An argument that does not match its
    /// specifier is logged with a warning and emitted as provided.
    pub fn log_format(&self, fmt: &str, hash: u64, args: &[LogArg<'_>]) {
        if !self.is_enabled() {
            return;
        }
        self.log_start(fmt);
        self.log_timestamp();
        self.log_hash(hash);

        let bytes = fmt.as_bytes();
        let mut args = args.iter();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] != b'%' {
                i += 1;
                continue;
            }
            i += 1;
            let Some(&specifier) = bytes.get(i) else {
                break;
            };
            match specifier {
                b's' | b't' | b'd' | b'f' => match args.next() {
                    Some(arg) => {
                        if !arg.matches(specifier) {
                            tracing::warn!(
                                "argument {arg:?} does not match specifier %{}",
                                specifier as char
                            );
                        }
                        self.emit_arg(arg);
                    }
                    None => {
                        tracing::warn!("missing argument for specifier %{}", specifier as char);
                    }
                },
                b'p' => self.log_pid(),
                b'%' => {}
                other => {
                    tracing::warn!("parsed invalid format specifier: {}", other as char);
                }
            }
            i += 1;
        }
        self.log_end();
    }

    fn emit_arg(&self, arg: &LogArg<'_>) {
        match arg {
            LogArg::Str(s) => self.log(s),
            LogArg::Timestamp(ts) => self.log_timestamp_at(*ts),
            LogArg::Int(x) => self.log_integer(*x),
            LogArg::Float(x) => self.log_float(*x),
        }
    }

    /// Validates and writes one frame. Oversize payloads and the reserved
    /// tag drop silently.
    fn log_event(&self, event: Event, data: &[u8]) {
        if !self.is_enabled() {
            return;
        }
        if data.len() > MAX_LENGTH || event == Event::Reserved {
            return;
        }
        if let Some(fifo) = &self.fifo {
            Entry::new(event, data).write_to(fifo);
        }
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::disabled()
    }
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("enabled", &self.is_enabled())
            .field("has_fifo", &self.fifo.is_some())
            .finish_non_exhaustive()
    }
}

/// Builds the cached pid tag from the current process.
fn build_pid_tag() -> Vec<u8> {
    let name = std::env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default();
    encode_pid_tag(std::process::id(), &name)
}

/// Bounded formatting target that drops bytes past the maximum payload.
struct TruncateBuf {
    buf: [u8; MAX_LENGTH],
    len: usize,
}

impl Default for TruncateBuf {
    fn default() -> Self {
        Self {
            buf: [0; MAX_LENGTH],
            len: 0,
        }
    }
}

impl TruncateBuf {
    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl fmt::Write for TruncateBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = MAX_LENGTH - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

/// A [`Writer`] shared by multiple producer threads behind a mutex.
///
/// The lock spans the whole operation, including any clock read; producers
/// that need hard real-time behavior should own a plain [`Writer`] instead.
pub struct LockedWriter {
    inner: Mutex<Writer>,
}

impl LockedWriter {
    /// Creates a locked writer backed by `fifo`.
    #[must_use]
    pub fn new(fifo: Arc<ByteFifo>) -> Self {
        Self {
            inner: Mutex::new(Writer::new(fifo)),
        }
    }

    /// Creates a locked writer with no backing ring.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            inner: Mutex::new(Writer::disabled()),
        }
    }

    /// See [`Writer::log`].
    pub fn log(&self, string: &str) {
        self.inner.lock().log(string);
    }

    /// See [`Writer::log_fmt`].
    pub fn log_fmt(&self, args: fmt::Arguments<'_>) {
        self.inner.lock().log_fmt(args);
    }

    /// See [`Writer::log_timestamp`].
    pub fn log_timestamp(&self) {
        self.inner.lock().log_timestamp();
    }

    /// See [`Writer::log_timestamp_at`].
    pub fn log_timestamp_at(&self, ts: Timestamp) {
        self.inner.lock().log_timestamp_at(ts);
    }

    /// See [`Writer::log_integer`].
    pub fn log_integer(&self, x: i32) {
        self.inner.lock().log_integer(x);
    }

    /// See [`Writer::log_float`].
    pub fn log_float(&self, x: f32) {
        self.inner.lock().log_float(x);
    }

    /// See [`Writer::log_pid`].
    pub fn log_pid(&self) {
        self.inner.lock().log_pid();
    }

    /// See [`Writer::log_hash`].
    pub fn log_hash(&self, hash: u64) {
        self.inner.lock().log_hash(hash);
    }

    /// See [`Writer::log_hist_ts`].
    pub fn log_hist_ts(&self, hash: u64) {
        self.inner.lock().log_hist_ts(hash);
    }

    /// See [`Writer::log_hist_flush`].
    pub fn log_hist_flush(&self, hash: u64) {
        self.inner.lock().log_hist_flush(hash);
    }

    /// See [`Writer::log_start`].
    pub fn log_start(&self, fmt: &str) {
        self.inner.lock().log_start(fmt);
    }

    /// See [`Writer::log_end`].
    pub fn log_end(&self) {
        self.inner.lock().log_end();
    }

    /// See [`Writer::log_format`].
    pub fn log_format(&self, fmt: &str, hash: u64, args: &[LogArg<'_>]) {
        self.inner.lock().log_format(fmt, hash, args);
    }

    /// See [`Writer::is_enabled`].
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.lock().is_enabled()
    }

    /// See [`Writer::set_enabled`].
    pub fn set_enabled(&self, enabled: bool) -> bool {
        self.inner.lock().set_enabled(enabled)
    }
}

impl std::fmt::Debug for LockedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedWriter").finish_non_exhaustive()
    }
}
