//! Simulation tick clock

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A discrete simulation step
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tick(pub u64);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    pub fn offset(self, ticks: u64) -> Tick {
        Tick(self.0.saturating_add(ticks))
    }

    /// Ticks from `self` until `later`, zero if `later` is already past
    pub fn until(self, later: Tick) -> u64 {
        later.0.saturating_sub(self.0)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Highest supported simulation rate; keeps the tick period non-zero
pub const MAX_TICK_RATE: u32 = 1000;

/// Monotonic source of "now" for one session.
///
/// Only the session task advances it; every component reads it. A clock
/// exists from session creation, so there is no uninitialized state to
/// guard against at call sites.
#[derive(Debug, Clone)]
pub struct TickClock {
    tick: Tick,
    tick_rate: u32,
}

impl TickClock {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick: Tick::ZERO,
            tick_rate: tick_rate.clamp(1, MAX_TICK_RATE),
        }
    }

    pub fn now(&self) -> Tick {
        self.tick
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// Step the simulation forward by one tick
    pub(crate) fn advance(&mut self) -> Tick {
        self.tick = self.tick.offset(1);
        self.tick
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate
    }

    /// Convert a wall-clock span into a whole number of ticks (rounded up).
    ///
    /// Whole-second spans are exact at any rate.
    pub fn ticks_for(&self, span: Duration) -> u64 {
        let ticks = (span.as_micros() * self.tick_rate as u128).div_ceil(1_000_000);
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }

    /// Convert a tick count into seconds
    pub fn seconds(&self, ticks: u64) -> f32 {
        ticks as f32 / self.tick_rate as f32
    }

    /// Seconds from now until `deadline`, zero once it has passed
    pub fn seconds_until(&self, deadline: Tick) -> f32 {
        self.seconds(self.tick.until(deadline))
    }
}

/// Format seconds as `m : ss` for the match clock
pub fn format_clock(seconds: f32) -> String {
    let whole = seconds.max(0.0) as u32;
    format!("{} : {:02}", whole / 60, whole % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_monotonically() {
        let mut clock = TickClock::new(30);
        assert_eq!(clock.now(), Tick::ZERO);
        assert_eq!(clock.advance(), Tick(1));
        assert_eq!(clock.advance(), Tick(2));
        assert_eq!(clock.now(), Tick(2));
    }

    #[test]
    fn test_ticks_for_duration() {
        let clock = TickClock::new(30);
        assert_eq!(clock.ticks_for(Duration::from_secs(3)), 90);
        assert_eq!(clock.ticks_for(Duration::from_millis(10)), 1);
        assert_eq!(clock.ticks_for(Duration::ZERO), 0);
    }

    #[test]
    fn test_whole_seconds_are_exact_at_default_rate() {
        let clock = TickClock::new(30);
        assert_eq!(clock.ticks_for(Duration::from_secs(300)), 9000);
        assert_eq!(clock.ticks_for(Duration::from_secs(1)), 30);
        assert_eq!(TickClock::new(7).ticks_for(Duration::from_secs(3)), 21);
        assert_eq!(TickClock::new(30).ticks_for(Duration::from_millis(1500)), 45);
    }

    #[test]
    fn test_tick_duration_never_zero() {
        assert!(TickClock::new(u32::MAX).tick_duration() > Duration::ZERO);
        assert_eq!(TickClock::new(u32::MAX).tick_rate(), MAX_TICK_RATE);
        assert_eq!(TickClock::new(20).tick_duration(), Duration::from_millis(50));
    }

    #[test]
    fn test_seconds_until_saturates() {
        let mut clock = TickClock::new(10);
        let deadline = Tick(5);
        assert!((clock.seconds_until(deadline) - 0.5).abs() < 1e-6);
        for _ in 0..8 {
            clock.advance();
        }
        assert_eq!(clock.seconds_until(deadline), 0.0);
    }

    #[test]
    fn test_zero_tick_rate_is_clamped() {
        let clock = TickClock::new(0);
        assert_eq!(clock.tick_rate(), 1);
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(125.7), "2 : 05");
        assert_eq!(format_clock(-3.0), "0 : 00");
    }
}
