//! Inter-arrival histogram accumulation and ASCII rendering.
//!
//! Samples are millisecond deltas between consecutive histogram timestamps
//! sharing a `(hash, author)` key. Rendering buckets them by exact value and
//! draws a column chart: a top row of counts, bars top to bottom, then the
//! x-axis labels.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::event::Timestamp;

/// Tallest bar drawn before counts are scaled down.
pub(crate) const MAX_HISTOGRAM_HEIGHT: i64 = 10;

const UNDERSCORES: &str = "________________";
const SPACES: &str = "                ";

/// Millisecond delta between two monotonic timestamps.
#[must_use]
pub(crate) fn delta_ms(t1: Timestamp, t2: Timestamp) -> i64 {
    (t2.sec - t1.sec) * 1000 + t2.nsec / 1_000_000 - t1.nsec / 1_000_000
}

/// Decimal width of a non-negative value; zero and negatives have width 0.
fn width_of(mut x: i64) -> usize {
    let mut width = 0;
    while x > 0 {
        width += 1;
        x /= 10;
    }
    width
}

/// Counts samples by exact value.
fn build_buckets(samples: &[i64]) -> BTreeMap<i64, i64> {
    let mut buckets = BTreeMap::new();
    for &x in samples {
        *buckets.entry(x).or_insert(0) += 1;
    }
    buckets
}

/// Draws a column chart of `samples` into `body`.
///
/// Bars taller than `max_height` are scaled down by
/// `(height + max_height) / max_height`; the y-axis labels keep the true
/// counts.
pub(crate) fn draw_histogram(body: &mut String, samples: &[i64], max_height: i64) {
    if samples.is_empty() {
        return;
    }
    let buckets = build_buckets(samples);
    let max_label = *buckets.keys().next_back().unwrap_or(&0);
    let max_val = *buckets.values().max().unwrap_or(&0);

    let mut height = max_val;
    let left_padding = width_of(max_val);
    let col_width = (width_of(max_label) + 1).max(3).max(left_padding + 2);
    let mut scaling_factor = 1;
    if height > max_height {
        scaling_factor = (height + max_height) / max_height;
        height /= scaling_factor;
    }

    body.push('\n');
    let _ = write!(body, "{:width$}", "", width = left_padding + 2);
    for count in buckets.values() {
        let _ = write!(body, "[{count:>width$}]", width = col_width - 2);
    }
    body.push('\n');

    let mut row = height * scaling_factor;
    while row > 0 {
        let _ = write!(body, "{row:>left_padding$}|");
        for &count in buckets.values() {
            let fill = if row == scaling_factor {
                UNDERSCORES
            } else {
                SPACES
            };
            let fill_width = (col_width - 2).min(fill.len());
            let cell = if count < row {
                if row == scaling_factor {
                    "__"
                } else {
                    "  "
                }
            } else {
                "[]"
            };
            let _ = write!(body, "{}{cell}", &fill[..fill_width]);
        }
        body.push('\n');
        row -= scaling_factor;
    }

    let _ = write!(body, "{:width$}", "", width = left_padding + 1);
    for label in buckets.keys() {
        let _ = write!(body, "{label:>col_width$}");
    }
    body.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_ms() {
        let t1 = Timestamp::new(1, 500_000_000);
        let t2 = Timestamp::new(2, 250_000_000);
        assert_eq!(delta_ms(t1, t2), 750);
        assert_eq!(delta_ms(t1, t1), 0);
    }

    #[test]
    fn test_build_buckets() {
        let buckets = build_buckets(&[5, 5, 7, 5]);
        assert_eq!(buckets.get(&5), Some(&3));
        assert_eq!(buckets.get(&7), Some(&1));
    }

    #[test]
    fn test_single_sample_chart() {
        let mut body = String::new();
        draw_histogram(&mut body, &[5], MAX_HISTOGRAM_HEIGHT);

        let lines: Vec<&str> = body.lines().collect();
        // leading blank line, count row, one bar row, label row
        assert_eq!(lines.len(), 4);
        assert!(lines[1].contains("[1]"));
        assert!(lines[2].contains("[]"));
        assert!(lines[3].trim_end().ends_with('5'));
    }

    #[test]
    fn test_bar_heights_track_counts() {
        let mut body = String::new();
        draw_histogram(&mut body, &[3, 3, 3, 9], MAX_HISTOGRAM_HEIGHT);

        let lines: Vec<&str> = body.lines().collect();
        // y-axis runs from 3 down to 1
        assert!(lines[2].starts_with("3|"));
        assert!(lines.last().unwrap().contains('9'));
        // the count-3 column is full height, the count-1 column is not
        let top_bar = lines[2];
        assert_eq!(top_bar.matches("[]").count(), 1);
    }

    #[test]
    fn test_scaling_caps_height() {
        let samples = vec![4; 100];
        let mut body = String::new();
        draw_histogram(&mut body, &samples, MAX_HISTOGRAM_HEIGHT);

        let lines: Vec<&str> = body.lines().collect();
        // 100 samples scale by (100 + 10) / 10 = 11 -> 9 bar rows
        let bar_rows = lines.len() - 3;
        assert!(bar_rows <= usize::try_from(MAX_HISTOGRAM_HEIGHT).unwrap());
        assert!(lines[1].contains("[100]"));
    }

    #[test]
    fn test_empty_samples_draw_nothing() {
        let mut body = String::new();
        draw_histogram(&mut body, &[], MAX_HISTOGRAM_HEIGHT);
        assert!(body.is_empty());
    }
}
