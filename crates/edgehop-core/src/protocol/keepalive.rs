//! Keep-alive bookkeeping for a connection.
//!
//! Either side sends `CALV` on a fixed period. Receiving *any* frame counts
//! as proof of life; if nothing arrives within `rate × lives` the connection
//! is declared flatlined and closed.

use std::time::{Duration, Instant};

/// Default send period for `CALV`.
pub const KEEP_ALIVE_RATE: Duration = Duration::from_secs(3);

/// How many missed periods before the peer is declared dead.
pub const KEEP_ALIVES_UNTIL_DEATH: u32 = 3;

/// Tracks when to send the next keep-alive and when the peer flatlines.
#[derive(Debug, Clone)]
pub struct KeepAliveSchedule {
    rate: Duration,
    lives: u32,
    last_heard: Instant,
    last_sent: Instant,
}

impl KeepAliveSchedule {
    pub fn new(rate: Duration, lives: u32, now: Instant) -> Self {
        Self {
            rate,
            lives,
            last_heard: now,
            last_sent: now,
        }
    }

    /// Schedule with the default 3 s × 3 policy.
    pub fn with_defaults(now: Instant) -> Self {
        Self::new(KEEP_ALIVE_RATE, KEEP_ALIVES_UNTIL_DEATH, now)
    }

    /// Replaces the send period (the peer can adjust it via options).
    pub fn set_rate(&mut self, rate: Duration) {
        self.rate = rate;
    }

    pub fn rate(&self) -> Duration {
        self.rate
    }

    /// Call on every inbound frame, whatever its opcode.
    pub fn record_inbound(&mut self, now: Instant) {
        self.last_heard = now;
    }

    /// Call when a `CALV` has been written.
    pub fn record_sent(&mut self, now: Instant) {
        self.last_sent = now;
    }

    /// When the next `CALV` is due.
    pub fn next_send(&self) -> Instant {
        self.last_sent + self.rate
    }

    /// The instant at which, absent inbound traffic, the peer is dead.
    pub fn deadline(&self) -> Instant {
        self.last_heard + self.rate * self.lives
    }

    /// True once the flatline deadline has passed.
    pub fn is_flatlined(&self, now: Instant) -> bool {
        now >= self.deadline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_schedule_is_not_flatlined() {
        let now = Instant::now();
        let ka = KeepAliveSchedule::with_defaults(now);
        assert!(!ka.is_flatlined(now));
        assert!(!ka.is_flatlined(now + Duration::from_secs(8)));
    }

    #[test]
    fn test_flatline_after_rate_times_lives() {
        let now = Instant::now();
        let ka = KeepAliveSchedule::with_defaults(now);
        assert!(ka.is_flatlined(now + Duration::from_secs(9)));
    }

    #[test]
    fn test_inbound_frame_extends_deadline() {
        let now = Instant::now();
        let mut ka = KeepAliveSchedule::with_defaults(now);
        ka.record_inbound(now + Duration::from_secs(8));
        assert!(!ka.is_flatlined(now + Duration::from_secs(9)));
        assert!(ka.is_flatlined(now + Duration::from_secs(17)));
    }

    #[test]
    fn test_next_send_follows_last_sent_by_one_period() {
        let now = Instant::now();
        let mut ka = KeepAliveSchedule::with_defaults(now);
        assert_eq!(ka.next_send(), now + Duration::from_secs(3));
        ka.record_sent(now + Duration::from_secs(3));
        assert_eq!(ka.next_send(), now + Duration::from_secs(6));
    }

    #[test]
    fn test_custom_rate_scales_deadline() {
        let now = Instant::now();
        let ka = KeepAliveSchedule::new(Duration::from_secs(1), 2, now);
        assert!(!ka.is_flatlined(now + Duration::from_millis(1999)));
        assert!(ka.is_flatlined(now + Duration::from_secs(2)));
    }
}
