//! Timestamp-ordered merging of several producer streams.
//!
//! A [`Merger`] periodically drains the snapshots of its registered readers
//! into a single merged ring, tagging every record with the index of the
//! stream it came from. Records are emitted in timestamp order, ties broken
//! by stream index, so interleavings are stable. A [`MergeReader`] renders
//! the merged ring with per-stream names, and a [`MergeThread`] runs merge
//! passes on a cooperative background thread.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::config::MergeThreadConfig;
use crate::dump::Dumper;
use crate::entry::{EntryIterator, SnapshotEntry};
use crate::event::Timestamp;
use crate::fifo::ByteFifo;
use crate::reader::{Reader, Snapshot};
use crate::Result;

/// A reader registered with the merger, tagged with a stream name.
pub struct NamedReader {
    name: String,
    reader: Arc<Reader>,
}

impl NamedReader {
    /// Pairs a reader with the name shown for its records.
    #[must_use]
    pub fn new(reader: Arc<Reader>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reader,
        }
    }

    /// The stream name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying reader.
    #[must_use]
    pub fn reader(&self) -> &Arc<Reader> {
        &self.reader
    }
}

impl std::fmt::Debug for NamedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedReader")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Item placed in the merge heap: the timestamp of the next record of one
/// snapshot, plus the snapshot's stream index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MergeItem {
    ts: Timestamp,
    index: usize,
}

impl Ord for MergeItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // earlier timestamp first; equal timestamps order by stream index
        self.ts
            .cmp(&other.ts)
            .then_with(|| self.index.cmp(&other.index))
    }
}

impl PartialOrd for MergeItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Combines N named producer streams into one timestamp-ordered stream in a
/// dedicated merged ring.
pub struct Merger {
    /// Destination ring; a merger without one merges into nothing.
    fifo: Option<Arc<ByteFifo>>,
    /// Registered source streams; the position in this table is the author
    /// index embedded in merged records.
    readers: Arc<RwLock<Vec<NamedReader>>>,
}

impl Merger {
    /// Creates a merger writing into `fifo`.
    #[must_use]
    pub fn new(fifo: Option<Arc<ByteFifo>>) -> Self {
        Self {
            fifo,
            readers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Registers another source stream. Its author index is its position in
    /// registration order.
    pub fn add_reader(&self, reader: NamedReader) {
        self.readers.write().push(reader);
    }

    /// Shared handle to the stream-name table, for merge readers.
    #[must_use]
    pub(crate) fn named_readers(&self) -> Arc<RwLock<Vec<NamedReader>>> {
        Arc::clone(&self.readers)
    }

    /// Runs one merge pass: snapshots every registered reader and drains the
    /// snapshots into the merged ring in timestamp order, tagging each
    /// record with its stream index.
    pub fn merge(&self) {
        let Some(fifo) = &self.fifo else {
            return;
        };

        let readers = self.readers.read();
        let snapshots: Vec<Snapshot> = readers.iter().map(|r| r.reader().snapshot()).collect();
        drop(readers);

        let mut offsets: Vec<usize> = snapshots.iter().map(|s| s.begin().offset()).collect();
        let mut heap: BinaryHeap<Reverse<MergeItem>> = BinaryHeap::new();
        for (index, snapshot) in snapshots.iter().enumerate() {
            push_next(&mut heap, snapshot, offsets[index], index);
        }

        while let Some(Reverse(item)) = heap.pop() {
            let index = item.index;
            let snapshot = &snapshots[index];
            let it = EntryIterator::new(snapshot.data(), offsets[index]);
            offsets[index] = match SnapshotEntry::build(it) {
                #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                Some(entry) => entry.copy_with_author(fifo, index as i32).offset(),
                // not a record boundary; skip one frame and keep going
                None => it.next().offset(),
            };
            push_next(&mut heap, snapshot, offsets[index], index);
        }
    }
}

impl std::fmt::Debug for Merger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Merger")
            .field("readers", &self.readers.read().len())
            .field("has_fifo", &self.fifo.is_some())
            .finish_non_exhaustive()
    }
}

/// Queues the timestamp of the record at `offset`, if the snapshot has one.
fn push_next(
    heap: &mut BinaryHeap<Reverse<MergeItem>>,
    snapshot: &Snapshot,
    offset: usize,
    index: usize,
) {
    if offset >= snapshot.end_offset() {
        return;
    }
    let it = EntryIterator::new(snapshot.data(), offset);
    if let Some(ts) = SnapshotEntry::build(it).and_then(|entry| entry.timestamp()) {
        heap.push(Reverse(MergeItem { ts, index }));
    }
}

/// A reader over the merged ring that knows the per-stream names.
pub struct MergeReader {
    reader: Reader,
    names: Arc<RwLock<Vec<NamedReader>>>,
}

impl MergeReader {
    /// Creates a reader over the merged ring, sharing the merger's
    /// stream-name table.
    #[must_use]
    pub fn new(fifo: Arc<ByteFifo>, merger: &Merger) -> Self {
        Self {
            reader: Reader::new(fifo),
            names: merger.named_readers(),
        }
    }

    /// Copies and trims the merged ring's readable bytes.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.reader.snapshot()
    }

    /// Takes a snapshot and renders it as text, prefixing each record body
    /// with the name of the stream it came from.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `sink` fails.
    pub fn dump(&self, sink: &mut impl std::io::Write, indent: usize) -> Result<()> {
        let snapshot = self.snapshot();
        let names: Vec<String> = self
            .names
            .read()
            .iter()
            .map(|r| r.name().to_owned())
            .collect();
        Dumper::new(sink, indent, Some(&names)).dump(&snapshot)
    }
}

impl std::fmt::Debug for MergeReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeReader").finish_non_exhaustive()
    }
}

/// Control block shared with the background merge thread.
struct MergeThreadState {
    control: Mutex<MergeControl>,
    cond: Condvar,
}

struct MergeControl {
    /// Remaining armed time in microseconds; merging happens while positive.
    timeout_us: i64,
    /// Cooperative exit flag, checked on every wake.
    exit: bool,
}

/// Background thread that periodically runs merge passes while armed.
///
/// [`wakeup`](Self::wakeup) arms the thread for the configured wakeup
/// period; the armed time decays by one sleep period per pass, so merging
/// continues for a while after the last wakeup. Dropping the handle exits
/// the thread cooperatively and joins it.
pub struct MergeThread {
    state: Arc<MergeThreadState>,
    config: MergeThreadConfig,
    handle: Option<JoinHandle<()>>,
}

impl MergeThread {
    /// Spawns the merge thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to spawn the thread.
    pub fn spawn(merger: Arc<Merger>, config: MergeThreadConfig) -> Result<Self> {
        let state = Arc::new(MergeThreadState {
            control: Mutex::new(MergeControl {
                timeout_us: 0,
                exit: false,
            }),
            cond: Condvar::new(),
        });

        let thread_state = Arc::clone(&state);
        let handle = std::thread::Builder::new()
            .name("pulselog-merge".into())
            .spawn(move || run_merge_loop(&thread_state, &merger, config))?;

        Ok(Self {
            state,
            config,
            handle: Some(handle),
        })
    }

    /// Arms the thread for the configured wakeup period.
    pub fn wakeup(&self) {
        self.set_timeout(duration_us(self.config.wakeup_period));
    }

    fn set_timeout(&self, timeout_us: i64) {
        let mut control = self.state.control.lock();
        control.timeout_us = timeout_us;
        self.state.cond.notify_one();
    }
}

impl Drop for MergeThread {
    fn drop(&mut self) {
        {
            let mut control = self.state.control.lock();
            control.exit = true;
            control.timeout_us = 0;
            self.state.cond.notify_one();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for MergeThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeThread")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn run_merge_loop(state: &MergeThreadState, merger: &Merger, config: MergeThreadConfig) {
    let sleep_us = duration_us(config.sleep_period);
    loop {
        let do_merge;
        {
            let mut control = state.control.lock();
            if control.timeout_us > 0 {
                let _ = state.cond.wait_for(&mut control, config.sleep_period);
            } else {
                state.cond.wait(&mut control);
            }
            if control.exit {
                break;
            }
            do_merge = control.timeout_us > 0;
            control.timeout_us -= sleep_us;
        }
        if do_merge {
            merger.merge();
        }
    }
}

fn duration_us(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_BUFFER_SIZE;
    use crate::entry::{Entry, FormatEntry, HistogramEntry};
    use crate::event::{Event, HistTsEntry};
    use crate::writer::Writer;

    fn stream(capacity: usize) -> (Writer, Arc<Reader>) {
        let fifo = Arc::new(ByteFifo::new(capacity));
        let writer = Writer::new(Arc::clone(&fifo));
        let reader = Arc::new(Reader::new(fifo));
        (writer, reader)
    }

    /// Emits a complete formatted record with a caller-chosen timestamp.
    fn emit_record(writer: &Writer, fmt: &str, hash: u64, ts: Timestamp) {
        writer.log_start(fmt);
        writer.log_timestamp_at(ts);
        writer.log_hash(hash);
        writer.log_end();
    }

    fn merged_records(snapshot: &Snapshot) -> Vec<(u64, Option<i32>, Timestamp)> {
        let mut out = Vec::new();
        let mut it = snapshot.begin();
        while it.offset() < snapshot.end_offset() {
            match it.event() {
                Some(Event::StartFmt) => {
                    let entry = FormatEntry::new(it);
                    out.push((entry.hash(), entry.author(), entry.timestamp().unwrap()));
                    it = entry.args();
                    while it.event() != Some(Event::EndFmt) {
                        it = it.next();
                    }
                    it = it.next();
                }
                Some(Event::HistogramEntryTs | Event::HistogramFlush) => {
                    let entry = HistogramEntry::new(it);
                    out.push((entry.hash(), entry.author(), entry.timestamp().unwrap()));
                    it = it.next();
                }
                other => panic!("unexpected frame {other:?}"),
            }
        }
        out
    }

    #[test]
    fn test_merge_orders_by_timestamp() {
        let (writer_a, reader_a) = stream(MIN_BUFFER_SIZE);
        let (writer_b, reader_b) = stream(MIN_BUFFER_SIZE);
        let merged = Arc::new(ByteFifo::new(2048));

        let merger = Merger::new(Some(Arc::clone(&merged)));
        merger.add_reader(NamedReader::new(reader_a, "fast"));
        merger.add_reader(NamedReader::new(reader_b, "deep"));

        emit_record(&writer_a, "a", 0xA, Timestamp::new(1, 0));
        emit_record(&writer_b, "b", 0xB, Timestamp::new(0, 999_000_000));
        merger.merge();

        let snapshot = Reader::new(merged).snapshot();
        let records = merged_records(&snapshot);
        assert_eq!(records.len(), 2);
        // stream B logged earlier, so it comes out first, and both records
        // carry their source index
        assert_eq!(records[0], (0xB, Some(1), Timestamp::new(0, 999_000_000)));
        assert_eq!(records[1], (0xA, Some(0), Timestamp::new(1, 0)));
    }

    #[test]
    fn test_merge_ties_break_by_stream_index() {
        let (writer_a, reader_a) = stream(MIN_BUFFER_SIZE);
        let (writer_b, reader_b) = stream(MIN_BUFFER_SIZE);
        let merged = Arc::new(ByteFifo::new(2048));

        let merger = Merger::new(Some(Arc::clone(&merged)));
        merger.add_reader(NamedReader::new(reader_a, "a"));
        merger.add_reader(NamedReader::new(reader_b, "b"));

        let ts = Timestamp::new(5, 0);
        emit_record(&writer_b, "b", 0xB, ts);
        emit_record(&writer_a, "a", 0xA, ts);
        merger.merge();

        let snapshot = Reader::new(merged).snapshot();
        let records = merged_records(&snapshot);
        assert_eq!(records[0].1, Some(0));
        assert_eq!(records[1].1, Some(1));
    }

    #[test]
    fn test_merge_is_order_preserving_within_a_stream() {
        let (writer, reader) = stream(2048);
        let merged = Arc::new(ByteFifo::new(4096));

        let merger = Merger::new(Some(Arc::clone(&merged)));
        merger.add_reader(NamedReader::new(reader, "solo"));

        for i in 0..5u32 {
            emit_record(&writer, "r", u64::from(i), Timestamp::new(i64::from(i), 0));
        }
        merger.merge();

        let snapshot = Reader::new(merged).snapshot();
        let records = merged_records(&snapshot);
        assert_eq!(records.len(), 5);
        for window in records.windows(2) {
            assert!(window[0].2 <= window[1].2);
        }
    }

    #[test]
    fn test_merge_rewrites_histogram_payloads() {
        let fifo = Arc::new(ByteFifo::new(MIN_BUFFER_SIZE));
        let reader = Arc::new(Reader::new(Arc::clone(&fifo)));
        let merged = Arc::new(ByteFifo::new(MIN_BUFFER_SIZE));

        let merger = Merger::new(Some(Arc::clone(&merged)));
        merger.add_reader(NamedReader::new(reader, "hist"));

        let sample = HistTsEntry {
            hash: 0x99,
            ts: Timestamp::new(3, 0),
        };
        Entry::new(Event::HistogramEntryTs, &sample.to_bytes()).write_to(&fifo);
        merger.merge();

        let snapshot = Reader::new(merged).snapshot();
        let records = merged_records(&snapshot);
        assert_eq!(records, vec![(0x99, Some(0), Timestamp::new(3, 0))]);
    }

    #[test]
    fn test_merge_preserves_multiset_across_streams() {
        let (writer_a, reader_a) = stream(2048);
        let (writer_b, reader_b) = stream(2048);
        let merged = Arc::new(ByteFifo::new(8192));

        let merger = Merger::new(Some(Arc::clone(&merged)));
        merger.add_reader(NamedReader::new(reader_a, "a"));
        merger.add_reader(NamedReader::new(reader_b, "b"));

        let mut expected = Vec::new();
        for i in 0..4u64 {
            emit_record(&writer_a, "a", 0x100 + i, Timestamp::new(10, i64::try_from(i).unwrap()));
            emit_record(&writer_b, "b", 0x200 + i, Timestamp::new(9, i64::try_from(i).unwrap()));
            expected.push(0x100 + i);
            expected.push(0x200 + i);
        }
        merger.merge();

        let snapshot = Reader::new(merged).snapshot();
        let mut hashes: Vec<u64> = merged_records(&snapshot).iter().map(|r| r.0).collect();
        hashes.sort_unstable();
        expected.sort_unstable();
        assert_eq!(hashes, expected);
    }

    #[test]
    fn test_merge_without_fifo_is_a_no_op() {
        let (writer, reader) = stream(MIN_BUFFER_SIZE);
        let merger = Merger::new(None);
        merger.add_reader(NamedReader::new(Arc::clone(&reader), "x"));

        emit_record(&writer, "x", 1, Timestamp::new(1, 0));
        merger.merge();

        // the source snapshot was never consumed
        assert!(!reader.snapshot().is_empty());
    }

    #[test]
    fn test_merge_reader_prepends_stream_names() {
        let (writer, reader) = stream(MIN_BUFFER_SIZE);
        let merged = Arc::new(ByteFifo::new(2048));

        let merger = Merger::new(Some(Arc::clone(&merged)));
        merger.add_reader(NamedReader::new(reader, "capture"));

        emit_record(&writer, "xruns=%d", 0x42, Timestamp::new(2, 0));
        merger.merge();

        let merge_reader = MergeReader::new(merged, &merger);
        let mut out = Vec::new();
        merge_reader.dump(&mut out, 0).unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("capture: "), "got: {out}");
    }

    #[test]
    fn test_merge_thread_runs_while_armed() {
        let (writer, reader) = stream(MIN_BUFFER_SIZE);
        let merged = Arc::new(ByteFifo::new(2048));

        let merger = Arc::new(Merger::new(Some(Arc::clone(&merged))));
        merger.add_reader(NamedReader::new(reader, "rt"));

        let config = MergeThreadConfig {
            sleep_period: Duration::from_millis(5),
            wakeup_period: Duration::from_millis(100),
        };
        let thread = MergeThread::spawn(Arc::clone(&merger), config).unwrap();

        emit_record(&writer, "tick", 7, Timestamp::new(1, 0));
        thread.wakeup();
        std::thread::sleep(Duration::from_millis(100));

        let snapshot = Reader::new(Arc::clone(&merged)).snapshot();
        assert!(!snapshot.is_empty());

        drop(thread); // exits cooperatively and joins
    }
}
