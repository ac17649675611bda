//! Pluggable congestion control (§3 "congestion state", §4.9).
//!
//! `Reno` is built by *composing* a `Tahoe` core as a field rather than
//! inheriting from it, adding only the fast-recovery bookkeeping Tahoe
//! doesn't have.

pub trait CongestionControl {
    /// Maximum number of unacknowledged bytes allowed in flight right now,
    /// aligned down to a whole number of `mss`-sized segments.
    fn window(&self) -> i64;
    fn mss(&self) -> i64;
    /// A new cumulative ack arrived covering `acked_bytes` new bytes (may be 0).
    fn on_new_ack(&mut self, acked_bytes: i64);
    /// A duplicate ack arrived (repeats the last cumulative ack).
    fn on_duplicate_ack(&mut self);
    /// The retransmission timer fired.
    fn on_timeout(&mut self);
    /// Bytes at the front of the send buffer that should not be re-sent by
    /// the normal send loop right now, because a fast retransmit already put
    /// them back on the wire and they're still in flight.
    fn skip_sending(&self) -> i64 {
        0
    }
}

/// No congestion control: window is unbounded, matching the original's
/// pass-through strategy used when a connection opts out.
pub struct NoCongestionControl {
    mss: i64,
}

impl NoCongestionControl {
    pub fn new(mss: i64) -> Self {
        NoCongestionControl { mss }
    }
}

impl CongestionControl for NoCongestionControl {
    fn window(&self) -> i64 {
        i64::MAX
    }
    fn mss(&self) -> i64 {
        self.mss
    }
    fn on_new_ack(&mut self, _acked_bytes: i64) {}
    fn on_duplicate_ack(&mut self) {}
    fn on_timeout(&mut self) {}
}

/// Slow start + AIMD congestion avoidance with a 3-duplicate-ack fast
/// retransmit threshold (§4.9).
pub struct Tahoe {
    mss: i64,
    cwnd: f64,
    ssthresh: f64,
    dup_acks: u32,
}

impl Tahoe {
    pub fn new(mss: i64) -> Self {
        Tahoe::with_ssthresh(mss, 64 * mss)
    }

    /// Same as [`Tahoe::new`], but with a configurable initial threshold
    /// instead of the arbitrary `64 * mss` default.
    pub fn with_ssthresh(mss: i64, ssthresh: i64) -> Self {
        Tahoe {
            mss,
            cwnd: mss as f64,
            ssthresh: ssthresh as f64,
            dup_acks: 0,
        }
    }

    fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh
    }

    /// `mss * floor(num_bytes / mss)`: round down to a whole number of segments.
    fn align_mss(&self, num_bytes: i64) -> i64 {
        self.mss * (num_bytes / self.mss)
    }

    /// The outstanding cap aligned to a whole number of segments.
    fn max_outstanding(&self) -> i64 {
        self.align_mss(self.cwnd as i64)
    }

    /// `max(mss, mss * floor(max_outstanding / 2 / mss))`.
    fn loss_threshold(&self) -> i64 {
        self.mss.max(self.align_mss(self.max_outstanding() / 2))
    }

    fn enter_loss_recovery(&mut self) {
        self.ssthresh = self.loss_threshold() as f64;
        self.cwnd = self.mss as f64;
        self.dup_acks = 0;
    }
}

impl CongestionControl for Tahoe {
    fn window(&self) -> i64 {
        self.max_outstanding()
    }

    fn mss(&self) -> i64 {
        self.mss
    }

    fn on_new_ack(&mut self, acked_bytes: i64) {
        self.dup_acks = 0;
        if acked_bytes <= 0 {
            return;
        }
        if self.in_slow_start() {
            self.cwnd += self.mss.min(acked_bytes) as f64;
            if self.cwnd >= self.ssthresh {
                self.cwnd = self.ssthresh;
            }
        } else {
            // Additive increase: roughly one MSS per round trip.
            self.cwnd += (acked_bytes as f64 * self.mss as f64) / self.cwnd;
        }
    }

    fn on_duplicate_ack(&mut self) {
        self.dup_acks += 1;
        if self.dup_acks == 3 {
            self.enter_loss_recovery();
        }
    }

    fn on_timeout(&mut self) {
        self.enter_loss_recovery();
    }
}

/// Tahoe core plus fast-recovery bookkeeping (§4.9, §9 composition note).
/// During fast recovery the effective window is inflated by one MSS per
/// additional duplicate ack; any new ack that covers new data ends
/// recovery and deflates back to `ssthresh`. `skip` tracks how many bytes
/// of the fast-retransmitted segment are still presumed in flight, so the
/// normal send loop doesn't re-emit them a second time.
pub struct Reno {
    core: Tahoe,
    dup_acks: u32,
    in_fast_recovery: bool,
    recovery_cwnd: f64,
    skip: i64,
}

impl Reno {
    pub fn new(mss: i64) -> Self {
        Reno::with_ssthresh(mss, 64 * mss)
    }

    pub fn with_ssthresh(mss: i64, ssthresh: i64) -> Self {
        Reno {
            core: Tahoe::with_ssthresh(mss, ssthresh),
            dup_acks: 0,
            in_fast_recovery: false,
            recovery_cwnd: 0.0,
            skip: 0,
        }
    }

    pub fn in_fast_recovery(&self) -> bool {
        self.in_fast_recovery
    }
}

impl CongestionControl for Reno {
    fn window(&self) -> i64 {
        if self.in_fast_recovery {
            self.core.align_mss(self.recovery_cwnd as i64)
        } else {
            self.core.window()
        }
    }

    fn mss(&self) -> i64 {
        self.core.mss()
    }

    fn on_new_ack(&mut self, acked_bytes: i64) {
        if self.in_fast_recovery {
            if acked_bytes > 0 {
                self.in_fast_recovery = false;
                self.dup_acks = 0;
                self.core.cwnd = self.core.ssthresh;
            }
        } else {
            self.dup_acks = 0;
            self.core.on_new_ack(acked_bytes);
        }
        self.skip = (self.skip - acked_bytes.max(0)).max(0);
    }

    fn on_duplicate_ack(&mut self) {
        self.dup_acks += 1;
        if self.in_fast_recovery {
            self.recovery_cwnd = self.core.ssthresh + self.dup_acks as f64 * self.core.mss as f64;
            return;
        }
        if self.dup_acks == 3 {
            self.core.ssthresh = self.core.loss_threshold() as f64;
            self.core.cwnd = self.core.ssthresh;
            self.in_fast_recovery = true;
            self.recovery_cwnd = self.core.ssthresh + self.dup_acks as f64 * self.core.mss as f64;
            self.skip = self.core.mss;
        }
    }

    fn on_timeout(&mut self) {
        self.in_fast_recovery = false;
        self.dup_acks = 0;
        self.skip = 0;
        self.core.on_timeout();
    }

    fn skip_sending(&self) -> i64 {
        self.skip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tahoe_slow_start_doubles_cwnd_per_round() {
        let mut t = Tahoe::new(1000);
        assert_eq!(t.window(), 1000);
        t.on_new_ack(1000);
        assert_eq!(t.window(), 2000);
        t.on_new_ack(1000);
        assert_eq!(t.window(), 3000);
    }

    #[test]
    fn tahoe_three_dup_acks_halves_and_resets() {
        // max_outstanding at cwnd=3000, mss=1000 is 3000; loss_threshold is
        // max(1000, 1000 * floor(3000/2/1000)) = max(1000, 1000) = 1000.
        let mut t = Tahoe::new(1000);
        t.on_new_ack(1000); // cwnd = 2000
        t.on_new_ack(1000); // cwnd = 3000
        t.on_duplicate_ack();
        t.on_duplicate_ack();
        assert_eq!(t.window(), 3000); // not yet triggered
        t.on_duplicate_ack();
        assert_eq!(t.window(), 1000); // reset to one mss
        assert_eq!(t.ssthresh, 1000.0);
    }

    #[test]
    fn tahoe_initial_ssthresh_is_configurable() {
        let t = Tahoe::with_ssthresh(1000, 100_000);
        assert_eq!(t.ssthresh, 100_000.0);
    }

    #[test]
    fn tahoe_window_is_aligned_to_whole_segments() {
        let mut t = Tahoe::new(1000);
        t.on_new_ack(1000); // cwnd = 2000
        t.on_new_ack(500); // cwnd = 2500, but window rounds down to 2000
        assert_eq!(t.window(), 2000);
    }

    #[test]
    fn reno_enters_and_exits_fast_recovery() {
        let mut r = Reno::new(1000);
        for _ in 0..10 {
            r.on_new_ack(1000);
        }
        assert!(!r.in_fast_recovery());
        r.on_duplicate_ack();
        r.on_duplicate_ack();
        assert!(!r.in_fast_recovery());
        r.on_duplicate_ack();
        assert!(r.in_fast_recovery());
        assert_eq!(r.skip_sending(), 1000);
        let inflated = r.window();
        r.on_duplicate_ack();
        assert!(r.window() > inflated);
        r.on_new_ack(1000); // new data acked, exit recovery
        assert!(!r.in_fast_recovery());
        assert_eq!(r.skip_sending(), 0);
    }

    #[test]
    fn no_congestion_control_window_is_unbounded() {
        let n = NoCongestionControl::new(1000);
        assert_eq!(n.window(), i64::MAX);
    }
}
