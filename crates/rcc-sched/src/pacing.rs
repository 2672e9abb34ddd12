//! Pacing the executor loop to wall-clock time.
//!
//! The loop never skips cycles to catch up. Falling behind only produces a
//! one-shot warning, cleared by a one-shot notice once the loop is back on
//! schedule.

use std::time::{Duration, Instant};

/// One-shot timing signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingWarning {
    /// The loop is more than the lag threshold behind schedule.
    FallingBehind(Duration),
    /// The loop is back on schedule after falling behind.
    CaughtUp,
}

/// What the loop should do before its next pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaceDecision {
    pub sleep: Option<Duration>,
    pub warning: Option<TimingWarning>,
}

/// Tracks the next cycle boundary.
#[derive(Debug, Clone)]
pub struct Pacer {
    lag_warning: Duration,
    next_boundary: Option<Instant>,
    behind: bool,
}

impl Pacer {
    pub fn new(lag_warning: Duration) -> Self {
        Self {
            lag_warning,
            next_boundary: None,
            behind: false,
        }
    }

    /// Forget the schedule; the next pass starts a fresh one.
    pub fn reset(&mut self) {
        self.next_boundary = None;
        self.behind = false;
    }

    pub fn is_behind(&self) -> bool {
        self.behind
    }

    /// Called after a pass finished at `now`.
    ///
    /// Lag is only reported when `report_lag` is set (realtime nets).
    pub fn advance(&mut self, now: Instant, cycle_time: Duration, report_lag: bool) -> PaceDecision {
        let boundary = match self.next_boundary {
            Some(previous) => previous + cycle_time,
            None => now + cycle_time,
        };
        self.next_boundary = Some(boundary);

        let mut decision = PaceDecision::default();
        if now < boundary {
            decision.sleep = Some(boundary - now);
            if self.behind {
                self.behind = false;
                decision.warning = Some(TimingWarning::CaughtUp);
            }
        } else {
            let lag = now - boundary;
            if report_lag && !self.behind && lag > self.lag_warning {
                self.behind = true;
                decision.warning = Some(TimingWarning::FallingBehind(lag));
            }
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CYCLE: Duration = Duration::from_millis(10);

    #[test]
    fn sleeps_until_next_boundary() {
        let mut pacer = Pacer::new(Duration::from_millis(500));
        let t0 = Instant::now();
        let d = pacer.advance(t0, CYCLE, true);
        assert_eq!(d.sleep, Some(CYCLE));
        assert_eq!(d.warning, None);

        let d = pacer.advance(t0 + Duration::from_millis(13), CYCLE, true);
        assert_eq!(d.sleep, Some(Duration::from_millis(7)));
    }

    #[test]
    fn warns_once_when_behind_and_once_when_caught_up() {
        let mut pacer = Pacer::new(Duration::from_millis(500));
        let t0 = Instant::now();
        pacer.advance(t0, CYCLE, true);

        let late = t0 + Duration::from_millis(700);
        let d = pacer.advance(late, CYCLE, true);
        assert_eq!(d.sleep, None);
        assert!(matches!(d.warning, Some(TimingWarning::FallingBehind(_))));
        assert!(pacer.is_behind());

        let d = pacer.advance(late + Duration::from_millis(1), CYCLE, true);
        assert_eq!(d.warning, None);

        // boundaries keep advancing by one cycle, so the loop eventually gets ahead
        let mut now = late;
        let mut caught_up = 0;
        for _ in 0..200 {
            if let Some(TimingWarning::CaughtUp) = pacer.advance(now, CYCLE, true).warning {
                caught_up += 1;
            }
            now += Duration::from_millis(1);
        }
        assert_eq!(caught_up, 1);
        assert!(!pacer.is_behind());
    }

    #[test]
    fn non_realtime_lag_is_silent() {
        let mut pacer = Pacer::new(Duration::from_millis(500));
        let t0 = Instant::now();
        pacer.advance(t0, CYCLE, false);
        let d = pacer.advance(t0 + Duration::from_secs(2), CYCLE, false);
        assert_eq!(d, PaceDecision::default());
    }
}
