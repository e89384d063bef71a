//! Transfer timing measurements

use std::time::{Duration, Instant};

/// Completion instants of the most recent send and receive transfers
///
/// The engine stamps these as transfers finish; callers read them through
/// `LinkController::timings` to surface round-trip latency.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransferTimings {
    /// When the last bulk OUT transfer completed
    pub last_send_at: Option<Instant>,
    /// When the last non-empty bulk IN transfer completed
    pub last_receive_at: Option<Instant>,
}

impl TransferTimings {
    /// Send-to-receive latency of the last completed echo exchange
    ///
    /// `None` until one send and one later receive have both completed.
    pub fn latency(&self) -> Option<Duration> {
        let sent = self.last_send_at?;
        let received = self.last_receive_at?;
        received.checked_duration_since(sent)
    }

    pub fn record_send(&mut self) {
        self.last_send_at = Some(Instant::now());
    }

    pub fn record_receive(&mut self) {
        self.last_receive_at = Some(Instant::now());
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_requires_both_stamps() {
        let mut timings = TransferTimings::default();
        assert!(timings.latency().is_none());

        timings.record_send();
        assert!(timings.latency().is_none());

        timings.record_receive();
        assert!(timings.latency().is_some());
    }

    #[test]
    fn test_receive_before_send_is_not_a_latency() {
        let mut timings = TransferTimings::default();
        timings.record_receive();
        std::thread::sleep(Duration::from_millis(2));
        timings.record_send();

        // checked_duration_since refuses the negative interval
        assert!(timings.latency().is_none());
    }

    #[test]
    fn test_clear() {
        let mut timings = TransferTimings::default();
        timings.record_send();
        timings.record_receive();
        timings.clear();

        assert!(timings.last_send_at.is_none());
        assert!(timings.last_receive_at.is_none());
    }
}
