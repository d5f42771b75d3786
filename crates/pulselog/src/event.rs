//! Event tags, the frame layout descriptor, and payload codecs.
//!
//! Every record on the wire is a frame:
//!
//! ```text
//! +------+--------+-------------+----------------+
//! | type |  len   |  payload…   |  len (repeat)  |
//! | 1 B  |  1 B   |  ≤ 255 B    |      1 B       |
//! +------+--------+-------------+----------------+
//! ```
//!
//! The trailing length duplicate makes frames traversable backwards from any
//! known end-of-frame boundary, which is what snapshot recovery is built on.
//! All multi-byte payload fields are read and written with explicit byte
//! copies; payloads sit at arbitrary offsets and must never be cast through
//! misaligned pointers.

/// Kinds of event frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Event {
    /// Invalid sentinel; never written.
    Reserved = 0,
    /// Raw text bytes, no terminator.
    String = 1,
    /// Monotonic `(sec, nsec)` pair.
    Timestamp = 2,
    /// Little-endian `i32`.
    Integer = 3,
    /// Little-endian `f32`.
    Float = 4,
    /// Process id followed by up to 15 bytes of process name.
    Pid = 5,
    /// Index of the source stream; inserted only by the merger.
    Author = 6,
    /// Start of a formatted record; payload is the format string.
    StartFmt = 7,
    /// Opaque 64-bit identifier of a format call site.
    Hash = 8,
    /// Zero-length end-of-record sentinel.
    EndFmt = 9,
    /// Histogram sample: `(hash, timestamp)`, plus an author after a merge.
    HistogramEntryTs = 10,
    /// Render request for accumulated samples: `(hash, timestamp)`.
    HistogramFlush = 11,
}

impl Event {
    /// Exclusive upper bound of the valid tag range.
    pub(crate) const UPPER_BOUND: u8 = 12;

    /// Decodes a wire tag. `Reserved` and out-of-range tags yield `None`.
    #[must_use]
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::String),
            2 => Some(Self::Timestamp),
            3 => Some(Self::Integer),
            4 => Some(Self::Float),
            5 => Some(Self::Pid),
            6 => Some(Self::Author),
            7 => Some(Self::StartFmt),
            8 => Some(Self::Hash),
            9 => Some(Self::EndFmt),
            10 => Some(Self::HistogramEntryTs),
            11 => Some(Self::HistogramFlush),
            _ => None,
        }
    }
}

// Frame layout descriptor. Every offset below derives from this one shape:
// | type: u8 | length: u8 | data: length bytes | length: u8 |
/// Byte offset of the event tag within a frame.
pub(crate) const OFFSET_EVENT: usize = 0;
/// Byte offset of the leading length within a frame.
pub(crate) const OFFSET_LENGTH: usize = 1;
/// Byte offset of the first payload byte within a frame.
pub(crate) const OFFSET_DATA: usize = 2;
/// Framing bytes around a payload: tag, leading length, trailing length.
pub const OVERHEAD: usize = 3;
/// Maximum payload length of a single frame.
pub const MAX_LENGTH: usize = 255;
/// Maximum encoded size of a single frame.
pub const MAX_FRAME: usize = MAX_LENGTH + OVERHEAD;

/// Encoded size of a frame carrying `len` payload bytes.
#[must_use]
pub(crate) const fn frame_size(len: usize) -> usize {
    len + OVERHEAD
}

/// Copies up to eight little-endian bytes into a `u64`. Short slices
/// zero-extend.
#[must_use]
pub(crate) fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    let n = bytes.len().min(8);
    raw[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(raw)
}

/// Copies up to four little-endian bytes into an `i32`. Short slices
/// zero-extend.
#[must_use]
pub(crate) fn read_i32_le(bytes: &[u8]) -> i32 {
    let mut raw = [0u8; 4];
    let n = bytes.len().min(4);
    raw[..n].copy_from_slice(&bytes[..n]);
    i32::from_le_bytes(raw)
}

/// Copies up to four little-endian bytes into an `f32`.
#[must_use]
pub(crate) fn read_f32_le(bytes: &[u8]) -> f32 {
    let mut raw = [0u8; 4];
    let n = bytes.len().min(4);
    raw[..n].copy_from_slice(&bytes[..n]);
    f32::from_le_bytes(raw)
}

/// A monotonic point in time as a `(seconds, nanoseconds)` pair.
///
/// Serializes to 16 little-endian bytes (`i64` seconds, `i64` nanoseconds).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    /// Whole seconds.
    pub sec: i64,
    /// Nanoseconds within the second.
    pub nsec: i64,
}

/// Encoded size of a [`Timestamp`] payload.
pub(crate) const TIMESTAMP_SIZE: usize = 16;

impl Timestamp {
    /// Creates a timestamp from raw fields.
    #[must_use]
    pub const fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }

    /// Reads the monotonic clock.
    ///
    /// Returns `None` if the clock read fails; callers drop the frame.
    #[cfg(unix)]
    #[must_use]
    pub fn now() -> Option<Self> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        // SAFETY: clock_gettime writes into the timespec we own and
        // CLOCK_MONOTONIC is a valid clock id.
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
        if rc != 0 {
            return None;
        }
        #[allow(clippy::unnecessary_cast)] // libc time field widths vary by platform
        let (sec, nsec) = (ts.tv_sec as i64, ts.tv_nsec as i64);
        Some(Self { sec, nsec })
    }

    /// Reads the monotonic clock.
    #[cfg(not(unix))]
    #[must_use]
    pub fn now() -> Option<Self> {
        use std::sync::OnceLock;
        use std::time::Instant;

        static START: OnceLock<Instant> = OnceLock::new();
        let elapsed = START.get_or_init(Instant::now).elapsed();
        Some(Self {
            sec: i64::try_from(elapsed.as_secs()).ok()?,
            nsec: i64::from(elapsed.subsec_nanos()),
        })
    }

    /// Encodes to the 16-byte wire shape.
    #[must_use]
    pub(crate) fn to_bytes(self) -> [u8; TIMESTAMP_SIZE] {
        let mut raw = [0u8; TIMESTAMP_SIZE];
        raw[..8].copy_from_slice(&self.sec.to_le_bytes());
        raw[8..].copy_from_slice(&self.nsec.to_le_bytes());
        raw
    }

    /// Decodes from a payload; `None` if the payload is too short.
    #[must_use]
    pub(crate) fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < TIMESTAMP_SIZE {
            return None;
        }
        let sec = i64::from_le_bytes(bytes[..8].try_into().ok()?);
        let nsec = i64::from_le_bytes(bytes[8..16].try_into().ok()?);
        Some(Self { sec, nsec })
    }
}

impl std::fmt::Display for Timestamp {
    /// Renders as `[sec.msec]` with a three-digit millisecond field.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}.{:03}]", self.sec, self.nsec / 1_000_000)
    }
}

/// Histogram sample payload: `(hash, timestamp)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistTsEntry {
    /// Call-site identifier the sample belongs to.
    pub hash: u64,
    /// When the sample was taken.
    pub ts: Timestamp,
}

/// Encoded size of a [`HistTsEntry`] payload.
pub(crate) const HIST_TS_SIZE: usize = 8 + TIMESTAMP_SIZE;

/// Encoded size of a histogram payload carrying an author index.
pub(crate) const HIST_TS_AUTHOR_SIZE: usize = HIST_TS_SIZE + 4;

impl HistTsEntry {
    /// Encodes to the 24-byte wire shape.
    #[must_use]
    pub(crate) fn to_bytes(self) -> [u8; HIST_TS_SIZE] {
        let mut raw = [0u8; HIST_TS_SIZE];
        raw[..8].copy_from_slice(&self.hash.to_le_bytes());
        raw[8..].copy_from_slice(&self.ts.to_bytes());
        raw
    }

    /// Decodes from a payload; `None` if the payload is too short.
    #[must_use]
    pub(crate) fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HIST_TS_SIZE {
            return None;
        }
        let hash = u64::from_le_bytes(bytes[..8].try_into().ok()?);
        let ts = Timestamp::from_bytes(&bytes[8..])?;
        Some(Self { hash, ts })
    }
}

/// Maximum number of process-name bytes carried in a pid tag.
pub(crate) const MAX_PROCESS_NAME: usize = 15;

/// Encodes a pid tag: little-endian pid followed by a truncated name.
#[must_use]
pub(crate) fn encode_pid_tag(pid: u32, name: &str) -> Vec<u8> {
    let name = name.as_bytes();
    let n = name.len().min(MAX_PROCESS_NAME);
    let mut tag = Vec::with_capacity(4 + n);
    tag.extend_from_slice(&pid.to_le_bytes());
    tag.extend_from_slice(&name[..n]);
    tag
}

/// Splits a pid tag payload into `(pid, name bytes)`.
#[must_use]
pub(crate) fn decode_pid_tag(data: &[u8]) -> Option<(u32, &[u8])> {
    if data.len() < 4 {
        return None;
    }
    let pid = u32::from_le_bytes(data[..4].try_into().ok()?);
    Some((pid, &data[4..]))
}
