//! # Pulselog
//!
//! A non-blocking in-process event log for real-time audio threads.
//!
//! Producer threads (typically hard real-time audio callbacks) emit
//! structured trace events (formatted messages, timestamps, integers,
//! floats, process tags, latency-histogram samples) without taking a lock
//! and without allocating. A separate dump path consumes the events
//! asynchronously, and a merger combines several producer streams into a
//! single timestamp-ordered timeline.
//!
//! ## Design Principles
//!
//! 1. **Zero allocations on the logging hot path**: frames are assembled in
//!    a stack buffer and committed with a single FIFO write
//! 2. **No locks on the logging hot path**: one SPSC byte ring per producer
//! 3. **The reader never stalls the writer**: on overrun the oldest bytes
//!    are overwritten and surfaced as a lost-byte count, never backpressure
//! 4. **Frames are traversable backwards**: every frame carries a trailing
//!    length duplicate, so a snapshot can trim a partial record at its tail
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use pulselog::{ByteFifo, LogArg, Reader, Writer};
//!
//! let fifo = Arc::new(ByteFifo::new(4096));
//! let writer = Writer::new(Arc::clone(&fifo));
//! let reader = Reader::new(fifo);
//!
//! writer.log_format("period=%d frames", 0xA1B2_0042, &[LogArg::Int(256)]);
//!
//! let mut out = Vec::new();
//! reader.dump(&mut out, 0).unwrap();
//! assert!(String::from_utf8(out).unwrap().contains("period=<256> frames"));
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Allow unsafe in the fifo module for the lock-free byte ring
#![allow(unsafe_code)]

pub mod config;
mod dump;
pub mod entry;
pub mod event;
pub mod fifo;
mod histogram;
pub mod merge;
pub mod reader;
pub mod writer;

pub use entry::{EntryIterator, FormatEntry, HistogramEntry, SnapshotEntry};
pub use event::{Event, Timestamp, MAX_LENGTH, OVERHEAD};
pub use fifo::{ByteFifo, Iovec};
pub use merge::{MergeReader, MergeThread, Merger, NamedReader};
pub use reader::{Reader, Snapshot};
pub use writer::{LockedWriter, LogArg, Writer};

/// Result type for pulselog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for pulselog
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O failure while writing rendered text to a sink or spawning the
    /// merge thread.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
