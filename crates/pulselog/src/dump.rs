//! Text rendering of snapshots.
//!
//! Each formatted record becomes one line: `[sec.msec] HHHH-NNNN [name: ]
//! body`, where the call-site hash renders as sixteen bits in hex and the
//! low 16 bits in decimal. Histogram samples accumulate in transient maps
//! keyed by `(hash, author)` and render as column charts when a flush record
//! arrives.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io;

use fxhash::FxHashMap;

use crate::entry::{EntryIterator, FormatEntry, HistogramEntry};
use crate::event::{
    decode_pid_tag, read_f32_le, read_i32_le, Event, HistTsEntry, Timestamp, HIST_TS_AUTHOR_SIZE,
    HIST_TS_SIZE,
};
use crate::histogram::{delta_ms, draw_histogram, MAX_HISTOGRAM_HEIGHT};
use crate::reader::Snapshot;
use crate::Result;

/// Renders one snapshot into a text sink.
pub(crate) struct Dumper<'a, W: io::Write> {
    sink: &'a mut W,
    indent: usize,
    /// Stream names by author index; `None` for single-stream dumps.
    names: Option<&'a [String]>,
}

impl<'a, W: io::Write> Dumper<'a, W> {
    pub(crate) fn new(sink: &'a mut W, indent: usize, names: Option<&'a [String]>) -> Self {
        Self {
            sink,
            indent,
            names,
        }
    }

    /// Walks the snapshot records and writes one line per record.
    pub(crate) fn dump(&mut self, snapshot: &Snapshot) -> Result<()> {
        let mut timestamp = String::new();
        let mut body = String::new();

        // overrun loss plus head bytes discarded for not starting on a clean
        // record boundary
        let lost = snapshot.lost() + snapshot.begin_offset() as u64;
        if lost > 0 {
            let _ = write!(body, "warning: lost {lost} bytes worth of events");
            self.dump_line(&timestamp, &mut body)?;
        }

        let mut last_ts: FxHashMap<(u64, i32), Timestamp> = FxHashMap::default();
        let mut hists: BTreeMap<(u64, i32), Vec<i64>> = BTreeMap::new();

        let mut it = snapshot.begin();
        let end = snapshot.end_offset();
        while it.offset() < end {
            match it.event() {
                Some(Event::StartFmt) => {
                    it = self.handle_format(&FormatEntry::new(it), &mut timestamp, &mut body);
                }
                Some(Event::HistogramEntryTs) => {
                    if let Some((hash, ts, author)) = decode_hist_payload(it.payload()) {
                        let key = (hash, author);
                        if let Some(prev) = last_ts.get(&key) {
                            hists.entry(key).or_default().push(delta_ms(*prev, ts));
                        }
                        last_ts.insert(key, ts);
                    } else {
                        tracing::warn!("short histogram payload: {} bytes", it.length());
                    }
                    it = it.next();
                }
                Some(Event::HistogramFlush) => {
                    // every key renders under the flush record's own author
                    let flush_author = HistogramEntry::new(it).author().unwrap_or(-1);
                    body.push_str("Histograms:\n");
                    for ((hash, _), samples) in &hists {
                        #[allow(clippy::cast_possible_truncation)]
                        let short_hash = *hash as u32;
                        let _ = write!(body, "Histogram {short_hash:X} - ");
                        self.append_author(flush_author, &mut body);
                        draw_histogram(&mut body, samples, MAX_HISTOGRAM_HEIGHT);
                    }
                    hists.clear();
                    last_ts.clear();
                    it = it.next();
                }
                Some(Event::EndFmt) => {
                    body.push_str("warning: got to end format event");
                    it = it.next();
                }
                _ => {
                    let _ = write!(body, "warning: unexpected event {}", it.raw_type());
                    it = it.next();
                }
            }

            if !body.is_empty() {
                self.dump_line(&timestamp, &mut body)?;
            }
        }
        Ok(())
    }

    /// Renders one formatted record, interleaving literal text and typed
    /// arguments, and returns the cursor positioned after `END_FMT`.
    fn handle_format<'s>(
        &mut self,
        entry: &FormatEntry<'s>,
        timestamp: &mut String,
        body: &mut String,
    ) -> EntryIterator<'s> {
        timestamp.clear();
        if let Some(ts) = entry.timestamp() {
            let _ = write!(timestamp, "{ts}");
        }

        // compact call-site tag: bits 16..32 in hex, low 16 bits in decimal
        let hash = entry.hash();
        let _ = write!(body, "{:04X}-{} ", (hash >> 16) & 0xFFFF, hash & 0xFFFF);

        self.append_author(entry.author().unwrap_or(-1), body);

        let fmt = entry.format_string();
        let mut arg = entry.args();

        let mut i = 0;
        while i < fmt.len() {
            if fmt[i] != b'%' {
                body.push(fmt[i] as char);
                i += 1;
                continue;
            }
            i += 1;
            let Some(&specifier) = fmt.get(i) else {
                break;
            };
            if specifier == b'%' {
                body.push('%');
                i += 1;
                continue;
            }

            if arg.event() == Some(Event::EndFmt) {
                break;
            }
            let event = arg.event();
            let datum = arg.payload();

            match specifier {
                b's' => {
                    warn_if_mismatch(event, Event::String, 's');
                    body.push_str(&String::from_utf8_lossy(datum));
                }
                b't' => {
                    warn_if_mismatch(event, Event::Timestamp, 't');
                    append_timestamp(body, datum);
                }
                b'd' => {
                    warn_if_mismatch(event, Event::Integer, 'd');
                    let _ = write!(body, "<{}>", read_i32_le(datum));
                }
                b'f' => {
                    warn_if_mismatch(event, Event::Float, 'f');
                    let _ = write!(body, "<{}>", read_f32_le(datum));
                }
                b'p' => {
                    warn_if_mismatch(event, Event::Pid, 'p');
                    append_pid(body, datum);
                }
                other => {
                    tracing::warn!("encountered unknown format character {}", other as char);
                }
            }
            arg = arg.next();
            i += 1;
        }

        if arg.event() != Some(Event::EndFmt) {
            tracing::warn!("expected end of format, got {}", arg.raw_type());
        }
        arg.next()
    }

    /// Prepends `"{name}: "` when a name table is present and knows the
    /// author.
    fn append_author(&self, author: i32, body: &mut String) {
        if let Some(names) = self.names {
            if let Some(name) = usize::try_from(author).ok().and_then(|i| names.get(i)) {
                let _ = write!(body, "{name}: ");
            }
        }
    }

    /// Writes one finished line: indent, timestamp, space, body.
    fn dump_line(&mut self, timestamp: &str, body: &mut String) -> Result<()> {
        writeln!(self.sink, "{:indent$}{timestamp} {body}", "", indent = self.indent)?;
        body.clear();
        Ok(())
    }
}

/// Splits a histogram payload into `(hash, timestamp, author)`; the author
/// is `-1` for streams that have not passed through the merger.
fn decode_hist_payload(payload: &[u8]) -> Option<(u64, Timestamp, i32)> {
    let entry = HistTsEntry::from_bytes(payload)?;
    let author = if payload.len() == HIST_TS_AUTHOR_SIZE {
        read_i32_le(&payload[HIST_TS_SIZE..])
    } else {
        -1
    };
    Some((entry.hash, entry.ts, author))
}

fn warn_if_mismatch(event: Option<Event>, expected: Event, specifier: char) {
    if event != Some(expected) {
        tracing::warn!(
            "incompatible event {:?} for {} specifier",
            event,
            specifier
        );
    }
}

fn append_timestamp(body: &mut String, datum: &[u8]) {
    if let Some(ts) = Timestamp::from_bytes(datum) {
        let _ = write!(body, "{ts}");
    }
}

fn append_pid(body: &mut String, datum: &[u8]) {
    if let Some((pid, name)) = decode_pid_tag(datum) {
        let _ = write!(body, "<PID: {pid}, name: {}>", String::from_utf8_lossy(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::sync::Arc;

    use crate::config::MIN_BUFFER_SIZE;
    use crate::entry::Entry;
    use crate::fifo::ByteFifo;
    use crate::reader::Reader;
    use crate::writer::{LogArg, Writer};

    fn ring(capacity: usize) -> (Arc<ByteFifo>, Writer, Reader) {
        let fifo = Arc::new(ByteFifo::new(capacity));
        let writer = Writer::new(Arc::clone(&fifo));
        let reader = Reader::new(Arc::clone(&fifo));
        (fifo, writer, reader)
    }

    fn dump_to_string(reader: &Reader, indent: usize) -> String {
        let mut out = Vec::new();
        reader.dump(&mut out, indent).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_format_line_rendering() {
        let (_fifo, writer, reader) = ring(MIN_BUFFER_SIZE);
        writer.log_format(
            "x=%d pid=%p",
            0xDEAD_BEEF_CAFE_BABE,
            &[LogArg::Int(7)],
        );

        let out = dump_to_string(&reader, 0);
        // bits 16..32 are 0xCAFE in hex, low 16 bits 0xBABE = 47806 decimal
        assert!(out.contains("CAFE-47806"), "got: {out}");
        assert!(out.contains("x=<7> pid=<PID: "), "got: {out}");
        assert!(out.starts_with('['), "got: {out}");
    }

    #[test]
    fn test_indent_left_pads_lines() {
        let (_fifo, writer, reader) = ring(MIN_BUFFER_SIZE);
        writer.log_format("hi", 1, &[]);

        let out = dump_to_string(&reader, 4);
        assert!(out.starts_with("    ["), "got: {out}");
    }

    #[test]
    fn test_literal_percent_and_string_arg() {
        let (_fifo, writer, reader) = ring(MIN_BUFFER_SIZE);
        writer.log_format("%s is 100%%", 2, &[LogArg::Str("load")]);

        let out = dump_to_string(&reader, 0);
        assert!(out.contains("load is 100%"), "got: {out}");
    }

    #[test]
    fn test_mismatched_arg_formats_per_specifier() {
        let (_fifo, writer, reader) = ring(MIN_BUFFER_SIZE);
        // float argument against %d renders through the integer path
        writer.log_format("v=%d", 3, &[LogArg::Float(1.0)]);

        let out = dump_to_string(&reader, 0);
        assert!(out.contains("v=<"), "got: {out}");
    }

    #[test]
    fn test_lost_bytes_warning_line() {
        let (_fifo, writer, reader) = ring(MIN_BUFFER_SIZE);
        for i in 0..100 {
            writer.log_format("fill %d", 9, &[LogArg::Int(i)]);
        }

        let out = dump_to_string(&reader, 0);
        assert!(out.contains("warning: lost"), "got: {out}");
    }

    #[test]
    fn test_stray_end_fmt_warns() {
        let (fifo, _writer, reader) = ring(MIN_BUFFER_SIZE);
        // a stray END_FMT is a complete-but-meaningless record
        Entry::new(Event::StartFmt, b"ok").write_to(&fifo);
        Entry::new(Event::Timestamp, &Timestamp::new(1, 0).to_bytes()).write_to(&fifo);
        Entry::new(Event::Hash, &1u64.to_le_bytes()).write_to(&fifo);
        Entry::new(Event::EndFmt, &[]).write_to(&fifo);
        Entry::new(Event::EndFmt, &[]).write_to(&fifo);

        let out = dump_to_string(&reader, 0);
        assert!(out.contains("warning: got to end format event"), "got: {out}");
    }

    #[test]
    fn test_histogram_accumulate_and_flush() {
        let (fifo, _writer, reader) = ring(MIN_BUFFER_SIZE);
        let hash = 0x51u64;
        let samples = [
            Timestamp::new(1, 0),
            Timestamp::new(1, 5_000_000),
        ];
        for ts in samples {
            Entry::new(
                Event::HistogramEntryTs,
                &HistTsEntry { hash, ts }.to_bytes(),
            )
            .write_to(&fifo);
        }
        Entry::new(
            Event::HistogramFlush,
            &HistTsEntry {
                hash,
                ts: Timestamp::new(1, 6_000_000),
            }
            .to_bytes(),
        )
        .write_to(&fifo);

        let out = dump_to_string(&reader, 0);
        assert!(out.contains("Histograms:"), "got: {out}");
        assert!(out.contains("Histogram 51 - "), "got: {out}");
        // one sample: the 5 ms delta between the two entries
        assert!(out.contains("[1]"), "got: {out}");
        assert!(out.lines().any(|l| l.trim() == "5"), "got: {out}");
    }

    #[test]
    fn test_flush_clears_accumulators() {
        let (fifo, _writer, reader) = ring(2048);
        let hash = 0x7u64;
        for msec in [0, 5] {
            Entry::new(
                Event::HistogramEntryTs,
                &HistTsEntry {
                    hash,
                    ts: Timestamp::new(1, msec * 1_000_000),
                }
                .to_bytes(),
            )
            .write_to(&fifo);
        }
        for _ in 0..2 {
            Entry::new(
                Event::HistogramFlush,
                &HistTsEntry {
                    hash,
                    ts: Timestamp::new(2, 0),
                }
                .to_bytes(),
            )
            .write_to(&fifo);
        }

        let out = dump_to_string(&reader, 0);
        // the second flush renders an empty histogram set
        let after_first = &out[out.find("Histograms:").unwrap() + 1..];
        let second = after_first.find("Histograms:").unwrap();
        assert!(!after_first[second..].contains("Histogram 7"), "got: {out}");
    }

    #[test]
    fn test_flush_renders_keys_under_flush_author() {
        let (fifo, _writer, reader) = ring(MIN_BUFFER_SIZE);
        let hash = 0x31u64;

        // merged-style payloads: (hash, timestamp, author)
        let hist_with_author = |ts: Timestamp, author: i32| {
            let mut payload = HistTsEntry { hash, ts }.to_bytes().to_vec();
            payload.extend_from_slice(&author.to_le_bytes());
            payload
        };

        // samples accumulated under author 0, flush emitted by author 1
        for nsec in [0, 5_000_000] {
            Entry::new(
                Event::HistogramEntryTs,
                &hist_with_author(Timestamp::new(1, nsec), 0),
            )
            .write_to(&fifo);
        }
        Entry::new(
            Event::HistogramFlush,
            &hist_with_author(Timestamp::new(2, 0), 1),
        )
        .write_to(&fifo);

        let snapshot = reader.snapshot();
        let names = vec!["zero".to_owned(), "one".to_owned()];
        let mut out = Vec::new();
        Dumper::new(&mut out, 0, Some(&names)).dump(&snapshot).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains("Histogram 31 - one: "), "got: {out}");
        assert!(!out.contains("zero: "), "got: {out}");
    }

    #[test]
    fn test_dump_to_file_sink() {
        let (_fifo, writer, reader) = ring(MIN_BUFFER_SIZE);
        writer.log_format("to disk", 4, &[]);

        let mut file = tempfile::tempfile().map(std::io::BufWriter::new).unwrap();
        reader.dump(&mut file, 2).unwrap();
        file.flush().unwrap();
    }
}
