use std::time::Duration;

/// Weight of the previous estimate in the exponential smoothing.
pub const SMOOTHING_OLD: f64 = 0.7;
/// Weight of the new sample.
pub const SMOOTHING_NEW: f64 = 0.3;

/// Fixed part of the reliable-channel resend delay.
pub const RESEND_DELAY_BASE: Duration = Duration::from_millis(20);
/// Resend delay used before the first round-trip sample exists.
pub const RESEND_DELAY_UNSAMPLED: Duration = Duration::from_millis(100);

/// Round-trip-time estimate for one connection.
///
/// Unsampled until the first pong; thereafter an exponentially smoothed
/// average with weights 0.7/0.3.
#[derive(Debug, Clone, Copy, Default)]
pub struct RttTracker {
    average: Option<Duration>,
}

impl RttTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, sample: Duration) {
        self.average = Some(match self.average {
            None => sample,
            Some(avg) => avg.mul_f64(SMOOTHING_OLD) + sample.mul_f64(SMOOTHING_NEW),
        });
    }

    pub fn average(&self) -> Option<Duration> {
        self.average
    }

    /// Delay before an unacknowledged reliable message is retransmitted:
    /// `20ms + 2 × average`, or 100ms until a sample exists.
    pub fn resend_delay(&self) -> Duration {
        match self.average {
            None => RESEND_DELAY_UNSAMPLED,
            Some(avg) => RESEND_DELAY_BASE + avg * 2,
        }
    }
}

/// Offset between the remote peer's transport clock and ours, in seconds.
///
/// Seeded by the first pong and exponentially smoothed thereafter with the
/// same weights as the round-trip average.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteClock {
    offset: Option<f64>,
}

impl RemoteClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one pong. `remote_seconds` is the remote transport time carried
    /// in the pong, `local_seconds` our transport time at receipt, and `rtt`
    /// the round trip of the originating ping.
    pub fn update(&mut self, remote_seconds: f64, local_seconds: f64, rtt: Duration) {
        let sample = remote_seconds + rtt.as_secs_f64() / 2.0 - local_seconds;
        self.offset = Some(match self.offset {
            None => sample,
            Some(prev) => prev * SMOOTHING_OLD + sample * SMOOTHING_NEW,
        });
    }

    pub fn offset_seconds(&self) -> Option<f64> {
        self.offset
    }
}
