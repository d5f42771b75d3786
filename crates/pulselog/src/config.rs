//! Buffer sizing and merge scheduling configuration.

use std::time::Duration;

/// Default byte capacity for a producer ring.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Minimum byte capacity (must hold at least a couple of maximum-size frames).
pub const MIN_BUFFER_SIZE: usize = 512;

/// Maximum byte capacity (prevent excessive memory usage).
pub const MAX_BUFFER_SIZE: usize = 1 << 24; // 16 MiB

/// Scheduling parameters for the background merge thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeThreadConfig {
    /// Pause between successive merge passes while the thread is armed.
    pub sleep_period: Duration,

    /// How long a [`wakeup`](crate::MergeThread::wakeup) keeps the thread
    /// armed. Larger than `sleep_period` so merging continues for a while
    /// after the last burst of activity.
    pub wakeup_period: Duration,
}

impl Default for MergeThreadConfig {
    fn default() -> Self {
        Self {
            sleep_period: Duration::from_secs(1),
            wakeup_period: Duration::from_secs(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_periods() {
        let config = MergeThreadConfig::default();
        assert!(config.wakeup_period > config.sleep_period);
    }

    #[test]
    fn test_buffer_bounds() {
        assert!(MIN_BUFFER_SIZE >= 2 * crate::event::MAX_FRAME);
        assert!(DEFAULT_BUFFER_SIZE <= MAX_BUFFER_SIZE);
    }
}
