//! Frame codec and traversal.
//!
//! [`Entry`] assembles one frame in a stack buffer and commits it with a
//! single FIFO write, so the producer publishes the whole frame or nothing.
//! [`EntryIterator`] walks frames in both directions over a snapshot byte
//! region; [`SnapshotEntry`] is the tagged facade over the two record shapes
//! the merger understands.

use crate::event::{
    frame_size, read_i32_le, read_u64_le, Event, HistTsEntry, Timestamp, HIST_TS_AUTHOR_SIZE,
    HIST_TS_SIZE, MAX_FRAME, OFFSET_DATA, OFFSET_EVENT, OFFSET_LENGTH, OVERHEAD,
};
use crate::fifo::ByteFifo;

/// One frame about to be written: an event tag plus its payload.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    event: Event,
    data: &'a [u8],
}

impl<'a> Entry<'a> {
    /// Creates a frame. The payload must fit in a single frame.
    #[must_use]
    pub fn new(event: Event, data: &'a [u8]) -> Self {
        debug_assert!(data.len() <= crate::event::MAX_LENGTH);
        Self { event, data }
    }

    /// Assembles the frame in a stack buffer and commits it with one FIFO
    /// write.
    pub fn write_to(&self, fifo: &ByteFifo) {
        let len = self.data.len();
        let mut frame = [0u8; MAX_FRAME];
        frame[OFFSET_EVENT] = self.event as u8;
        #[allow(clippy::cast_possible_truncation)] // len <= MAX_LENGTH
        let len_byte = len as u8;
        frame[OFFSET_LENGTH] = len_byte;
        frame[OFFSET_DATA..OFFSET_DATA + len].copy_from_slice(self.data);
        frame[OFFSET_DATA + len] = len_byte;
        fifo.write(&frame[..frame_size(len)]);
    }
}

/// A cursor over the frames of a contiguous byte region.
///
/// Moving forward adds `payload length + overhead`; moving backward reads the
/// previous frame's trailing length byte, which sits immediately before the
/// cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryIterator<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> EntryIterator<'a> {
    /// Creates a cursor at `pos` within `buf`.
    #[must_use]
    pub(crate) fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    /// Byte offset of the cursor within the region.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Raw event tag of the current frame.
    #[must_use]
    pub fn raw_type(&self) -> u8 {
        self.buf.get(self.pos + OFFSET_EVENT).copied().unwrap_or(0)
    }

    /// Decoded event tag of the current frame, if valid.
    #[must_use]
    pub fn event(&self) -> Option<Event> {
        Event::from_u8(self.raw_type())
    }

    /// Payload length of the current frame.
    #[must_use]
    pub fn length(&self) -> usize {
        self.buf.get(self.pos + OFFSET_LENGTH).copied().unwrap_or(0) as usize
    }

    /// Payload bytes of the current frame. Out-of-range frames yield an
    /// empty slice.
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        let start = self.pos + OFFSET_DATA;
        self.buf.get(start..start + self.length()).unwrap_or(&[])
    }

    /// Cursor advanced past the current frame.
    #[must_use]
    pub fn next(self) -> Self {
        Self {
            buf: self.buf,
            pos: self.pos + frame_size(self.length()),
        }
    }

    /// Cursor moved to the previous frame, trusting its trailing length
    /// byte.
    #[must_use]
    pub fn prev(self) -> Self {
        let prev_len = self.buf.get(self.pos.wrapping_sub(1)).copied().unwrap_or(0) as usize;
        Self {
            buf: self.buf,
            pos: self.pos.saturating_sub(frame_size(prev_len)),
        }
    }

    /// Confirms the leading length equals the trailing length.
    #[must_use]
    pub fn has_consistent_length(&self) -> bool {
        let len = self.length();
        let trailing = self.pos + frame_size(len) - 1;
        #[allow(clippy::cast_possible_truncation)] // len came from a u8
        let expected = len as u8;
        self.buf.get(trailing).copied() == Some(expected)
    }

    /// Copies the full current frame (header, payload, trailer) into another
    /// ring.
    pub fn copy_to(&self, dst: &ByteFifo) {
        let end = self.pos + frame_size(self.length());
        if let Some(frame) = self.buf.get(self.pos..end) {
            dst.write(frame);
        }
    }
}

/// A complete formatted record: `START_FMT … END_FMT`.
#[derive(Debug, Clone, Copy)]
pub struct FormatEntry<'a> {
    head: EntryIterator<'a>,
}

impl<'a> FormatEntry<'a> {
    /// Wraps a cursor positioned on a `START_FMT` frame.
    #[must_use]
    pub fn new(head: EntryIterator<'a>) -> Self {
        Self { head }
    }

    /// The format-string bytes.
    #[must_use]
    pub fn format_string(&self) -> &'a [u8] {
        self.head.payload()
    }

    /// The record timestamp, from the frame after `START_FMT`.
    #[must_use]
    pub fn timestamp(&self) -> Option<Timestamp> {
        Timestamp::from_bytes(self.head.next().payload())
    }

    /// The call-site hash, from the frame after the timestamp.
    #[must_use]
    pub fn hash(&self) -> u64 {
        read_u64_le(self.head.next().next().payload())
    }

    /// The source stream index, present only after a merge pass.
    #[must_use]
    pub fn author(&self) -> Option<i32> {
        let it = self.head.next().next().next();
        (it.event() == Some(Event::Author)).then(|| read_i32_le(it.payload()))
    }

    /// Cursor on the first argument frame.
    #[must_use]
    pub fn args(&self) -> EntryIterator<'a> {
        let it = self.head.next().next().next();
        if it.event() == Some(Event::Author) {
            it.next()
        } else {
            it
        }
    }

    /// Copies the whole record into `dst`, inserting an `AUTHOR` frame after
    /// the hash. Returns the cursor positioned after the record.
    pub fn copy_with_author(&self, dst: &ByteFifo, author: i32) -> EntryIterator<'a> {
        let mut it = self.head;
        // copy start, timestamp, hash
        it.copy_to(dst);
        it = it.next();
        it.copy_to(dst);
        it = it.next();
        it.copy_to(dst);
        Entry::new(Event::Author, &author.to_le_bytes()).write_to(dst);
        // copy the rest up to and including END_FMT
        loop {
            it = it.next();
            it.copy_to(dst);
            if it.event() == Some(Event::EndFmt) || it.offset() >= it.buf.len() {
                break;
            }
        }
        it.next()
    }
}

/// A histogram record: one `HISTOGRAM_ENTRY_TS` or `HISTOGRAM_FLUSH` frame.
#[derive(Debug, Clone, Copy)]
pub struct HistogramEntry<'a> {
    head: EntryIterator<'a>,
}

impl<'a> HistogramEntry<'a> {
    /// Wraps a cursor positioned on a histogram frame.
    #[must_use]
    pub fn new(head: EntryIterator<'a>) -> Self {
        Self { head }
    }

    /// The sample timestamp.
    #[must_use]
    pub fn timestamp(&self) -> Option<Timestamp> {
        HistTsEntry::from_bytes(self.head.payload()).map(|e| e.ts)
    }

    /// The call-site hash the sample belongs to.
    #[must_use]
    pub fn hash(&self) -> u64 {
        read_u64_le(self.head.payload())
    }

    /// The source stream index, present only after a merge pass.
    #[must_use]
    pub fn author(&self) -> Option<i32> {
        let payload = self.head.payload();
        (payload.len() == HIST_TS_AUTHOR_SIZE).then(|| read_i32_le(&payload[HIST_TS_SIZE..]))
    }

    /// Copies the record into `dst`, rewriting the payload from
    /// `(hash, timestamp)` to `(hash, timestamp, author)` and updating both
    /// length fields. Returns the cursor positioned after the record.
    pub fn copy_with_author(&self, dst: &ByteFifo, author: i32) -> EntryIterator<'a> {
        let payload = self.head.payload();
        let mut frame = [0u8; OVERHEAD + HIST_TS_AUTHOR_SIZE];
        frame[OFFSET_EVENT] = self.head.raw_type();
        #[allow(clippy::cast_possible_truncation)]
        let len_byte = HIST_TS_AUTHOR_SIZE as u8;
        frame[OFFSET_LENGTH] = len_byte;
        let n = payload.len().min(HIST_TS_SIZE);
        frame[OFFSET_DATA..OFFSET_DATA + n].copy_from_slice(&payload[..n]);
        frame[OFFSET_DATA + HIST_TS_SIZE..OFFSET_DATA + HIST_TS_AUTHOR_SIZE]
            .copy_from_slice(&author.to_le_bytes());
        frame[OFFSET_DATA + HIST_TS_AUTHOR_SIZE] = len_byte;
        dst.write(&frame);
        self.head.next()
    }
}

/// A record facade dispatched on the leading frame tag.
///
/// Only formatted records and histogram records are meaningful at the merge
/// boundary; other frame types are not records.
#[derive(Debug, Clone, Copy)]
pub enum SnapshotEntry<'a> {
    /// A `START_FMT … END_FMT` record.
    Format(FormatEntry<'a>),
    /// A histogram sample or flush record.
    Histogram(HistogramEntry<'a>),
}

impl<'a> SnapshotEntry<'a> {
    /// Builds the facade for the record under `it`, or `None` for
    /// unsupported frame types.
    #[must_use]
    pub fn build(it: EntryIterator<'a>) -> Option<Self> {
        match it.event() {
            Some(Event::StartFmt) => Some(Self::Format(FormatEntry::new(it))),
            Some(Event::HistogramEntryTs | Event::HistogramFlush) => {
                Some(Self::Histogram(HistogramEntry::new(it)))
            }
            _ => {
                tracing::warn!("tried to build a record of type {}", it.raw_type());
                None
            }
        }
    }

    /// The record timestamp.
    #[must_use]
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::Format(e) => e.timestamp(),
            Self::Histogram(e) => e.timestamp(),
        }
    }

    /// The source stream index, present only after a merge pass.
    #[must_use]
    pub fn author(&self) -> Option<i32> {
        match self {
            Self::Format(e) => e.author(),
            Self::Histogram(e) => e.author(),
        }
    }

    /// Copies the record into `dst` with the given author tag. Returns the
    /// cursor positioned after the record.
    pub fn copy_with_author(&self, dst: &ByteFifo, author: i32) -> EntryIterator<'a> {
        match self {
            Self::Format(e) => e.copy_with_author(dst, author),
            Self::Histogram(e) => e.copy_with_author(dst, author),
        }
    }
}
