use log::warn;
use std::time::{Duration, Instant};

/// Sleep-timer setting, cycled by a single user action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SleepSetting {
    #[default]
    Off,
    ThirtyMin,
    SixtyMin,
}

impl SleepSetting {
    pub fn next(self) -> Self {
        match self {
            Self::Off => Self::ThirtyMin,
            Self::ThirtyMin => Self::SixtyMin,
            Self::SixtyMin => Self::Off,
        }
    }

    /// Delay until auto-stop, or None when the timer is off.
    pub fn delay(self) -> Option<Duration> {
        match self {
            Self::Off => None,
            Self::ThirtyMin => Some(Duration::from_secs(30 * 60)),
            Self::SixtyMin => Some(Duration::from_secs(60 * 60)),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::ThirtyMin => "30m",
            Self::SixtyMin => "60m",
        }
    }
}

/// Deadline-based sleep timer. The deadline is an absolute instant so the
/// countdown survives event-loop stalls; remaining time is recomputed from
/// it rather than decremented.
///
/// Invariant: `deadline.is_some()` exactly when `setting != Off`.
#[derive(Debug, Default)]
pub struct SleepTimer {
    setting: SleepSetting,
    deadline: Option<Instant>,
}

impl SleepTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn setting(&self) -> SleepSetting {
        self.setting
    }

    /// Advance Off -> 30m -> 60m -> Off. Entering Off clears the deadline
    /// without any auto-stop.
    pub fn cycle(&mut self, now: Instant) {
        self.setting = self.setting.next();
        self.deadline = self.setting.delay().map(|d| now + d);
    }

    /// Disarm the timer.
    pub fn clear(&mut self) {
        self.setting = SleepSetting::Off;
        self.deadline = None;
    }

    /// Returns true exactly once when the armed deadline has been reached;
    /// the timer resets to Off at that point. The caller decides whether to
    /// stop playback (only if something is actually playing).
    pub fn tick(&mut self, now: Instant) -> bool {
        match (self.setting, self.deadline) {
            (SleepSetting::Off, _) => {
                self.deadline = None;
                false
            }
            (_, None) => {
                warn!("sleep timer armed without a deadline, resetting to off");
                self.clear();
                false
            }
            (_, Some(deadline)) => {
                if now >= deadline {
                    self.clear();
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Time left until auto-stop, for the countdown label.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariant(timer: &SleepTimer) {
        assert_eq!(
            timer.deadline.is_some(),
            timer.setting() != SleepSetting::Off
        );
    }

    #[test]
    fn three_clicks_return_to_off() {
        let now = Instant::now();
        let mut timer = SleepTimer::new();
        assert_eq!(timer.setting(), SleepSetting::Off);

        timer.cycle(now);
        assert_eq!(timer.setting(), SleepSetting::ThirtyMin);
        assert_invariant(&timer);

        timer.cycle(now);
        assert_eq!(timer.setting(), SleepSetting::SixtyMin);
        assert_invariant(&timer);

        timer.cycle(now);
        assert_eq!(timer.setting(), SleepSetting::Off);
        assert_invariant(&timer);
    }

    #[test]
    fn deadlines_match_setting() {
        let now = Instant::now();
        let mut timer = SleepTimer::new();
        timer.cycle(now);
        assert_eq!(timer.remaining(now), Some(Duration::from_secs(1800)));
        // Cycling again re-arms a fresh 60 minutes from now
        timer.cycle(now);
        assert_eq!(timer.remaining(now), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn expiry_fires_exactly_once() {
        let now = Instant::now();
        let mut timer = SleepTimer::new();
        timer.cycle(now); // 30m

        assert!(!timer.tick(now + Duration::from_secs(1799)));
        assert!(timer.tick(now + Duration::from_secs(1800)));
        assert_eq!(timer.setting(), SleepSetting::Off);
        assert_invariant(&timer);
        // Timer is disarmed, no further stop actions
        assert!(!timer.tick(now + Duration::from_secs(7200)));
    }

    #[test]
    fn manual_cycle_to_off_clears_pending_stop() {
        let now = Instant::now();
        let mut timer = SleepTimer::new();
        timer.cycle(now); // 30m
        timer.cycle(now); // 60m
        timer.cycle(now); // off
        assert!(!timer.tick(now + Duration::from_secs(100_000)));
        assert_invariant(&timer);
    }

    #[test]
    fn remaining_counts_down() {
        let now = Instant::now();
        let mut timer = SleepTimer::new();
        assert_eq!(timer.remaining(now), None);
        timer.cycle(now);
        let later = now + Duration::from_secs(600);
        assert_eq!(timer.remaining(later), Some(Duration::from_secs(1200)));
        // Past the deadline, remaining saturates at zero
        let past = now + Duration::from_secs(4000);
        assert_eq!(timer.remaining(past), Some(Duration::ZERO));
    }

    #[test]
    fn inconsistent_state_resets_defensively() {
        let mut timer = SleepTimer {
            setting: SleepSetting::ThirtyMin,
            deadline: None,
        };
        assert!(!timer.tick(Instant::now()));
        assert_eq!(timer.setting(), SleepSetting::Off);
    }
}
