//! Snapshot acquisition over a producer ring.
//!
//! A [`Snapshot`] is a detached copy of the ring's readable bytes, trimmed to
//! complete records: the tail may hold a partially written frame and the head
//! may have been overrun by the producer, so both ends are walked back to
//! known-good record boundaries before anything downstream trusts the bytes.

use std::sync::Arc;

use crate::dump::Dumper;
use crate::entry::EntryIterator;
use crate::event::{frame_size, Event, OFFSET_EVENT, OFFSET_LENGTH};
use crate::fifo::ByteFifo;
use crate::Result;

/// Frame types that can begin a record.
const STARTING_TYPES: &[Event] = &[Event::StartFmt, Event::HistogramEntryTs];

/// Frame types that can end a record.
const ENDING_TYPES: &[Event] = &[
    Event::EndFmt,
    Event::HistogramEntryTs,
    Event::HistogramFlush,
];

/// Consumes event frames from one producer ring.
///
/// Exactly one reader may consume a given ring; the ring enforces
/// single-consumer discipline only by contract.
pub struct Reader {
    fifo: Arc<ByteFifo>,
}

impl Reader {
    /// Creates a reader over `fifo`.
    #[must_use]
    pub fn new(fifo: Arc<ByteFifo>) -> Self {
        Self { fifo }
    }

    /// Copies the ring's readable bytes and trims them to complete records.
    ///
    /// The ring's consumer index advances past everything covered by the
    /// returned snapshot, so the next snapshot starts where this one ended.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let capacity = self.fifo.capacity();
        let (iov, lost) = self.fifo.obtain(capacity);
        let avail = iov[0].len + iov[1].len;
        if avail == 0 {
            return Snapshot::empty();
        }

        let mut data = vec![0u8; avail].into_boxed_slice();
        self.fifo.copy_out(iov[0], &mut data[..iov[0].len]);
        if iov[1].len > 0 {
            self.fifo.copy_out(iov[1], &mut data[iov[0].len..]);
        }

        // The copy may end mid-frame and begin mid-record. Walk back from the
        // end to the last record-ending frame, then keep walking back to the
        // earliest record-starting frame still reachable by consistent
        // backward iteration.
        let (begin, end) = match find_last_entry_of_types(&data, 0, avail, ENDING_TYPES) {
            None => (0, 0),
            Some(last_end) => {
                let end = last_end + frame_size(data[last_end + OFFSET_LENGTH] as usize);
                let mut first_start = None;
                let mut cursor = end;
                while let Some(start) = find_last_entry_of_types(&data, 0, cursor, STARTING_TYPES)
                {
                    first_start = Some(start);
                    cursor = start;
                }
                (first_start.unwrap_or(end), end)
            }
        };

        self.fifo.release(end);

        Snapshot {
            data,
            begin,
            end,
            lost,
        }
    }

    /// Takes a snapshot and renders it as text into `sink`, one line per
    /// record, left-padded by `indent` spaces.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `sink` fails.
    pub fn dump(&self, sink: &mut impl std::io::Write, indent: usize) -> Result<()> {
        let snapshot = self.snapshot();
        self.dump_snapshot(&snapshot, sink, indent)
    }

    /// Renders an already-acquired snapshot as text into `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `sink` fails.
    pub fn dump_snapshot(
        &self,
        snapshot: &Snapshot,
        sink: &mut impl std::io::Write,
        indent: usize,
    ) -> Result<()> {
        Dumper::new(sink, indent, None).dump(snapshot)
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("capacity", &self.fifo.capacity())
            .finish_non_exhaustive()
    }
}

/// Scans backwards from `back` for the latest frame whose type is in
/// `types`, verifying at every step that the trailing length byte agrees
/// with the previous frame's leading length and that the frames abut. Any
/// violation aborts the scan, which bounds the damage a stray byte at the
/// trim boundary can do.
fn find_last_entry_of_types(
    data: &[u8],
    front: usize,
    back: usize,
    types: &[Event],
) -> Option<usize> {
    let mut back = back;
    while back > front {
        // the previous frame's trailing length byte sits at back - 1
        let prev_len = data[back - 1] as usize;
        let prev = back.checked_sub(frame_size(prev_len))?;
        if prev < front || prev + frame_size(data[prev + OFFSET_LENGTH] as usize) != back {
            // prev points at an out-of-limits or inconsistent frame
            return None;
        }
        if let Some(event) = Event::from_u8(data[prev + OFFSET_EVENT]) {
            if types.contains(&event) {
                return Some(prev);
            }
        }
        back = prev;
    }
    None
}

/// A detached, trimmed copy of a ring's readable bytes.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Raw copied bytes, untrimmed.
    data: Box<[u8]>,
    /// Offset of the first complete record.
    begin: usize,
    /// Offset just past the last complete record.
    end: usize,
    /// Bytes discarded by producer overrun before the copy was taken.
    lost: u64,
}

impl Snapshot {
    fn empty() -> Self {
        Self::default()
    }

    /// Raw copied bytes, including any head bytes trimmed from the record
    /// range.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Cursor on the first complete record.
    #[must_use]
    pub fn begin(&self) -> EntryIterator<'_> {
        EntryIterator::new(&self.data, self.begin)
    }

    /// Offset of the first complete record within [`data`](Self::data).
    #[must_use]
    pub fn begin_offset(&self) -> usize {
        self.begin
    }

    /// Offset just past the last complete record.
    #[must_use]
    pub fn end_offset(&self) -> usize {
        self.end
    }

    /// Bytes lost to producer overrun before the copy was taken. Head bytes
    /// trimmed for not starting on a clean record boundary are reported
    /// separately via [`begin_offset`](Self::begin_offset).
    #[must_use]
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Whether the snapshot holds no complete records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}
