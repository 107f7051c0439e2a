//! Cooking timers

use chrono::{DateTime, Local};
use galley_api::{TimerInfo, TimerKey};
use galley_config::PauseAccounting;
use galley_store::TimerSnapshot;
use galley_util::elapsed_between;
use std::time::Duration;

/// Alert raised by a timer while advancing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerSignal {
    /// Remaining time entered the alert window
    Warning { remaining: Duration },
    /// Remaining time reached zero
    Overdue,
    /// Still overdue after another reminder interval
    Reminder { overdue_for: Duration },
}

/// A running cooking timer.
///
/// Remaining time is always derived from `start_time` and the clock, never
/// decremented, so a late or skipped tick cannot make it drift.
#[derive(Debug, Clone)]
pub struct ActiveTimer {
    pub key: TimerKey,
    pub start_time: DateTime<Local>,
    pub estimated_duration: Duration,
    pub remaining_time: Duration,
    pub alert_threshold: Duration,
    pub is_running: bool,
    pub is_paused: bool,
    pub is_overdue: bool,
    pub paused_at: Option<DateTime<Local>>,
    pub paused_accumulated: Duration,
    warning_issued: bool,
    overdue_since: Option<DateTime<Local>>,
    last_reminder: Option<DateTime<Local>>,
}

impl ActiveTimer {
    pub fn new(
        key: TimerKey,
        estimated_duration: Duration,
        alert_threshold: Duration,
        start_time: DateTime<Local>,
    ) -> Self {
        Self {
            key,
            start_time,
            estimated_duration,
            remaining_time: estimated_duration,
            alert_threshold,
            is_running: true,
            is_paused: false,
            is_overdue: false,
            paused_at: None,
            paused_accumulated: Duration::ZERO,
            warning_issued: false,
            overdue_since: None,
            last_reminder: None,
        }
    }

    /// Rebuild a timer saved by a previous run.
    ///
    /// A paused timer comes back paused, with its remaining time frozen at
    /// the moment it was paused.
    pub fn from_snapshot(
        snapshot: TimerSnapshot,
        alert_threshold: Duration,
        now: DateTime<Local>,
    ) -> Self {
        let mut timer = Self::new(
            snapshot.key,
            snapshot.estimated_duration,
            alert_threshold,
            snapshot.start_time,
        );
        timer.paused_accumulated = snapshot.paused_accumulated;
        timer.paused_at = snapshot.paused_at;
        timer.is_paused = snapshot.paused_at.is_some();
        timer.warning_issued = snapshot.warning_issued;
        timer.remaining_time = timer.compute_remaining(snapshot.paused_at.unwrap_or(now));
        timer
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            key: self.key.clone(),
            start_time: self.start_time,
            estimated_duration: self.estimated_duration,
            paused_at: self.paused_at,
            paused_accumulated: self.paused_accumulated,
            warning_issued: self.warning_issued,
        }
    }

    /// Cooking time counted so far
    pub fn elapsed(&self, now: DateTime<Local>) -> Duration {
        elapsed_between(self.start_time, now).saturating_sub(self.paused_accumulated)
    }

    /// Remaining time as of `now`, without updating the timer
    pub fn compute_remaining(&self, now: DateTime<Local>) -> Duration {
        if self.is_overdue {
            return Duration::ZERO;
        }
        self.estimated_duration.saturating_sub(self.elapsed(now))
    }

    /// Recompute remaining time and report any alerts that became due.
    ///
    /// Paused or stopped timers are left untouched.
    pub fn advance(
        &mut self,
        now: DateTime<Local>,
        reminder_interval: Option<Duration>,
    ) -> Vec<TimerSignal> {
        let mut signals = Vec::new();

        if !self.is_running || self.is_paused {
            return signals;
        }

        if self.is_overdue {
            self.remaining_time = Duration::ZERO;
            if let Some(interval) = reminder_interval
                && let Some(last) = self.last_reminder
                && elapsed_between(last, now) >= interval
            {
                self.last_reminder = Some(now);
                signals.push(TimerSignal::Reminder {
                    overdue_for: self.overdue_for(now),
                });
            }
            return signals;
        }

        let remaining = self.compute_remaining(now);
        self.remaining_time = remaining;

        // A fresh countdown re-arms the warning
        if remaining == self.estimated_duration {
            self.warning_issued = false;
        }

        if remaining.is_zero() {
            self.mark_overdue(now);
            signals.push(TimerSignal::Overdue);
        } else if remaining <= self.alert_threshold && !self.warning_issued {
            self.warning_issued = true;
            signals.push(TimerSignal::Warning { remaining });
        }

        signals
    }

    /// Freeze the countdown. Returns false if already paused.
    pub fn pause(&mut self, now: DateTime<Local>) -> bool {
        if self.is_paused {
            return false;
        }
        self.is_paused = true;
        self.paused_at = Some(now);
        true
    }

    /// Continue the countdown. Returns false if not paused.
    pub fn resume(&mut self, now: DateTime<Local>, accounting: PauseAccounting) -> bool {
        if !self.is_paused {
            return false;
        }

        if accounting == PauseAccounting::Compensated
            && let Some(paused_at) = self.paused_at
        {
            self.paused_accumulated += elapsed_between(paused_at, now);
        }

        self.is_paused = false;
        self.paused_at = None;
        true
    }

    /// Latch the overdue flag without waiting for the countdown.
    /// Returns false if it was already latched.
    pub fn force_overdue(&mut self, now: DateTime<Local>) -> bool {
        if self.is_overdue {
            return false;
        }
        self.mark_overdue(now);
        true
    }

    /// Time since the timer went overdue
    pub fn overdue_for(&self, now: DateTime<Local>) -> Duration {
        self.overdue_since
            .map(|since| elapsed_between(since, now))
            .unwrap_or(Duration::ZERO)
    }

    fn mark_overdue(&mut self, now: DateTime<Local>) {
        self.is_overdue = true;
        self.remaining_time = Duration::ZERO;
        self.overdue_since = Some(now);
        self.last_reminder = Some(now);
    }

    pub fn info(&self) -> TimerInfo {
        TimerInfo {
            key: self.key.clone(),
            start_time: self.start_time,
            estimated_duration: self.estimated_duration,
            remaining_time: self.remaining_time,
            alert_threshold: self.alert_threshold,
            is_running: self.is_running,
            is_paused: self.is_paused,
            is_overdue: self.is_overdue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use galley_util::to_chrono;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn after(base: DateTime<Local>, n: u64) -> DateTime<Local> {
        base + to_chrono(secs(n))
    }

    fn timer(duration: u64, threshold: u64, start: DateTime<Local>) -> ActiveTimer {
        ActiveTimer::new(TimerKey::order("1"), secs(duration), secs(threshold), start)
    }

    #[test]
    fn test_countdown_reaches_zero_and_latches() {
        let start = galley_util::now();
        let mut t = timer(1800, 180, start);

        for s in 1..=1800 {
            t.advance(after(start, s), None);
            assert!(t.remaining_time <= t.estimated_duration);
        }

        assert_eq!(t.remaining_time, Duration::ZERO);
        assert!(t.is_overdue);
    }

    #[test]
    fn test_zero_duration_is_overdue_on_first_tick() {
        let start = galley_util::now();
        let mut t = timer(0, 0, start);

        let signals = t.advance(start, None);
        assert_eq!(signals, vec![TimerSignal::Overdue]);
        assert!(t.is_overdue);
        assert_eq!(t.remaining_time, Duration::ZERO);
    }

    #[test]
    fn test_overdue_is_monotonic_even_if_clock_goes_back() {
        let start = galley_util::now();
        let mut t = timer(10, 1, start);

        t.advance(after(start, 11), None);
        assert!(t.is_overdue);

        t.advance(start, None);
        assert!(t.is_overdue);
        assert_eq!(t.remaining_time, Duration::ZERO);
    }

    #[test]
    fn test_clock_before_start_counts_as_no_elapsed_time() {
        let start = galley_util::now();
        let mut t = timer(60, 6, start);

        t.advance(start - chrono::Duration::seconds(30), None);
        assert_eq!(t.remaining_time, secs(60));
    }

    #[test]
    fn test_warning_fires_once() {
        let start = galley_util::now();
        let mut t = timer(100, 10, start);

        assert!(t.advance(after(start, 50), None).is_empty());

        let signals = t.advance(after(start, 91), None);
        assert_eq!(signals, vec![TimerSignal::Warning { remaining: secs(9) }]);

        assert!(t.advance(after(start, 92), None).is_empty());
        assert!(t.advance(after(start, 95), None).is_empty());
    }

    #[test]
    fn test_warning_is_rearmed_by_fresh_countdown() {
        let start = galley_util::now();
        let mut t = timer(100, 10, start);

        t.advance(after(start, 95), None);

        // Clock jumps back to the start: countdown is fresh again
        assert!(t.advance(start, None).is_empty());
        let signals = t.advance(after(start, 95), None);
        assert!(matches!(signals[..], [TimerSignal::Warning { .. }]));
    }

    #[test]
    fn test_overdue_reminders() {
        let start = galley_util::now();
        let mut t = timer(10, 1, start);
        let every = Some(secs(30));

        assert_eq!(t.advance(after(start, 10), every), vec![TimerSignal::Overdue]);
        assert!(t.advance(after(start, 20), every).is_empty());
        assert_eq!(
            t.advance(after(start, 40), every),
            vec![TimerSignal::Reminder { overdue_for: secs(30) }]
        );
        assert!(t.advance(after(start, 41), every).is_empty());
        assert_eq!(
            t.advance(after(start, 70), every),
            vec![TimerSignal::Reminder { overdue_for: secs(60) }]
        );

        // Disabled reminders
        assert!(t.advance(after(start, 500), None).is_empty());
    }

    #[test]
    fn test_paused_timer_is_frozen() {
        let start = galley_util::now();
        let mut t = timer(600, 60, start);

        t.advance(after(start, 100), None);
        assert!(t.pause(after(start, 100)));
        assert!(!t.pause(after(start, 110)));

        t.advance(after(start, 400), None);
        assert_eq!(t.remaining_time, secs(500));
        assert!(t.is_paused);
    }

    #[test]
    fn test_compensated_resume_excludes_paused_time() {
        let start = galley_util::now();
        let mut t = timer(600, 60, start);

        t.advance(after(start, 100), None);
        t.pause(after(start, 100));
        assert!(t.resume(after(start, 400), PauseAccounting::Compensated));
        assert!(!t.resume(after(start, 401), PauseAccounting::Compensated));

        t.advance(after(start, 450), None);
        // 150s of cooking: 100 before the pause, 50 after
        assert_eq!(t.remaining_time, secs(450));
        assert_eq!(t.paused_accumulated, secs(300));
    }

    #[test]
    fn test_legacy_resume_counts_paused_time() {
        let start = galley_util::now();
        let mut t = timer(600, 60, start);
        let mut never_paused = timer(600, 60, start);

        t.advance(after(start, 100), None);
        t.pause(after(start, 100));
        t.resume(after(start, 400), PauseAccounting::Legacy);

        t.advance(after(start, 450), None);
        never_paused.advance(after(start, 450), None);

        assert_eq!(t.remaining_time, never_paused.remaining_time);
        assert_eq!(t.remaining_time, secs(150));
    }

    #[test]
    fn test_force_overdue() {
        let start = galley_util::now();
        let mut t = timer(600, 60, start);

        assert!(t.force_overdue(after(start, 5)));
        assert!(!t.force_overdue(after(start, 6)));
        assert!(t.is_overdue);
        assert_eq!(t.compute_remaining(after(start, 7)), Duration::ZERO);
        assert_eq!(t.overdue_for(after(start, 15)), secs(10));
    }

    #[test]
    fn test_snapshot_keeps_pause_bookkeeping() {
        let start = galley_util::now();
        let mut t = timer(600, 60, start);

        t.pause(after(start, 100));
        t.resume(after(start, 160), PauseAccounting::Compensated);
        t.pause(after(start, 200));

        let restored = ActiveTimer::from_snapshot(t.snapshot(), secs(60), after(start, 900));
        assert!(restored.is_paused);
        assert_eq!(restored.paused_accumulated, secs(60));
        // 140s of cooking before the second pause
        assert_eq!(restored.remaining_time, secs(460));

        let mut restored = restored;
        restored.resume(after(start, 1000), PauseAccounting::Compensated);
        restored.advance(after(start, 1010), None);
        assert_eq!(restored.remaining_time, secs(450));
    }
}
