//! # Scene Tick Loop
//!
//! Deadline-based pacing for the scene thread.
//!
//! Each tick has a deadline one period after the previous one. A tick that
//! starts past its deadline is late; if the loop falls more than a full
//! period behind, the backlog is dropped instead of replayed in a burst.

use std::time::{Duration, Instant};

/// Spin instead of sleeping for the last stretch before a deadline.
const SPIN_WINDOW: Duration = Duration::from_micros(500);

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Ticks recorded.
    pub total_ticks: u64,
    /// Ticks that started after their deadline or overran the period.
    pub late_ticks: u64,
    /// Longest time spent inside a tick.
    pub longest_tick: Duration,
    /// Total time spent inside ticks.
    pub busy: Duration,
}

impl TickStats {
    /// Mean time spent inside a tick.
    #[must_use]
    pub fn mean_tick(&self) -> Duration {
        match u32::try_from(self.total_ticks) {
            Ok(0) => Duration::ZERO,
            Ok(ticks) => self.busy / ticks,
            Err(_) => Duration::ZERO,
        }
    }
}

/// Paces the scene script at a fixed rate.
pub struct TickLoop {
    period: Duration,
    deadline: Instant,
    previous_start: Option<Instant>,
    started_late: bool,
    stats: TickStats,
}

impl TickLoop {
    /// Creates a loop ticking `tick_rate` times per second.
    ///
    /// # Panics
    ///
    /// Panics if `tick_rate` is zero.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        assert!(tick_rate > 0, "tick_rate must be greater than zero");
        let period = Duration::from_secs(1) / tick_rate;
        Self {
            period,
            deadline: Instant::now() + period,
            previous_start: None,
            started_late: false,
            stats: TickStats::default(),
        }
    }

    /// Target time between tick starts.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Blocks until the next deadline and starts a tick.
    ///
    /// Returns the tick start and the time elapsed since the previous tick
    /// started (one period for the first tick).
    pub fn wait(&mut self) -> (Instant, Duration) {
        let now = Instant::now();
        self.started_late = now > self.deadline;
        if let Some(remaining) = self.deadline.checked_duration_since(now) {
            if remaining > SPIN_WINDOW {
                std::thread::sleep(remaining - SPIN_WINDOW);
            }
            while Instant::now() < self.deadline {
                std::hint::spin_loop();
            }
        }

        let start = Instant::now();
        self.deadline += self.period;
        if start > self.deadline {
            // More than a period behind
            self.deadline = start + self.period;
        }

        let dt = self
            .previous_start
            .map_or(self.period, |previous| start.duration_since(previous));
        self.previous_start = Some(start);
        (start, dt)
    }

    /// Records the end of the tick started at `start`.
    pub fn record(&mut self, start: Instant) {
        let spent = start.elapsed();
        self.stats.total_ticks += 1;
        self.stats.busy += spent;
        self.stats.longest_tick = self.stats.longest_tick.max(spent);
        if self.started_late || spent > self.period {
            self.stats.late_ticks += 1;
        }
    }

    /// Returns the statistics so far.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }
}
