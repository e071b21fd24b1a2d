use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Hard protocol ceiling on any datagram: the payload bit-length field is a
/// u16, so `floor(65535 / 8) - 1` bytes.
pub const PROTOCOL_MAX_MTU: usize = 65535 / 8 - 1;

/// Smallest MTU the transport will operate with.
pub const MINIMUM_MTU: usize = 128;

/// Path MTU every probe run starts from.
pub const PROBE_FLOOR: usize = 512;

/// Growth factor applied before the first probe failure.
const PROBE_GROWTH: f64 = 1.25;

/// Extra settle time added before the first probe after connecting.
const PROBE_INITIAL_GRACE: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    None,
    InProgress,
    Finished,
}

/// Path-MTU discovery for one connection.
///
/// Probes grow geometrically until a send failure, then bisect between the
/// largest size that succeeded and the smallest that failed. The owning
/// connection's `current_mtu` only ever grows while probing and freezes at
/// `Finished`.
#[derive(Debug, Clone, Copy)]
pub struct MtuProbe {
    status: ProbeStatus,
    largest_successful: usize,
    smallest_failed: Option<usize>,
    attempt_size: usize,
    attempt_at: Instant,
    fail_count: u32,
}

impl MtuProbe {
    pub fn new(now: Instant) -> Self {
        Self {
            status: ProbeStatus::None,
            largest_successful: PROBE_FLOOR,
            smallest_failed: None,
            attempt_size: 0,
            attempt_at: now,
            fail_count: 0,
        }
    }

    /// Arms the probe when a connection reaches `Connected`.
    pub fn start(&mut self, now: Instant, frequency: Duration, rtt_hint: Duration) {
        self.status = ProbeStatus::InProgress;
        self.largest_successful = PROBE_FLOOR;
        self.smallest_failed = None;
        self.fail_count = 0;
        self.attempt_at = now + frequency + PROBE_INITIAL_GRACE + rtt_hint;
    }

    /// One heartbeat step. Returns the size of a probe datagram to emit.
    pub fn heartbeat(
        &mut self,
        now: Instant,
        current_mtu: &mut usize,
        auto_expand: bool,
        frequency: Duration,
    ) -> Option<usize> {
        if self.status != ProbeStatus::InProgress {
            return None;
        }
        if !auto_expand {
            self.status = ProbeStatus::Finished;
            return None;
        }
        if now < self.attempt_at {
            return None;
        }

        let size = match self.smallest_failed {
            None => (*current_mtu as f64 * PROBE_GROWTH) as usize,
            Some(failed) => (failed + self.largest_successful) / 2,
        }
        .min(PROTOCOL_MAX_MTU);

        if size <= self.largest_successful {
            debug!(mtu = *current_mtu, "MTU probing finished");
            self.status = ProbeStatus::Finished;
            return None;
        }

        self.attempt_size = size;
        self.attempt_at = now + frequency;
        trace!(size, "attempting MTU probe");
        Some(size)
    }

    /// A probe datagram failed to send (don't-fragment rejection or an
    /// explicit socket error).
    pub fn on_send_failure(&mut self, size: usize, max_fails: u32) {
        if self.status != ProbeStatus::InProgress {
            return;
        }
        self.smallest_failed = Some(match self.smallest_failed {
            None => size,
            Some(prev) => prev.min(size),
        });
        self.fail_count += 1;
        if self.fail_count >= max_fails {
            debug!(
                largest = self.largest_successful,
                "MTU probing finished after repeated send failures"
            );
            self.status = ProbeStatus::Finished;
        }
    }

    /// The remote confirmed receipt of a probe of `size` bytes.
    pub fn on_success(&mut self, size: usize, current_mtu: &mut usize) {
        if size < self.largest_successful {
            return;
        }
        self.largest_successful = size;
        if size >= *current_mtu {
            *current_mtu = size;
            debug!(mtu = size, "expanded MTU");
        }
    }

    pub fn status(&self) -> ProbeStatus {
        self.status
    }

    pub fn largest_successful(&self) -> usize {
        self.largest_successful
    }

    pub fn smallest_failed(&self) -> Option<usize> {
        self.smallest_failed
    }

    pub fn attempt_size(&self) -> usize {
        self.attempt_size
    }
}
