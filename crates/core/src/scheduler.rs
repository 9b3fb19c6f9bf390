//! Periodic tick scheduler.
//!
//! The PMC and RTT are clocked by free-running periodic timers: each fires at
//! a fixed rate and is reloaded immediately. Time is counted in host cycles;
//! [`Scheduler::advance`] moves the clock forward and reports every firing
//! that fell inside the interval, oldest deadline first.

use crate::savestate::SchedulerState;

/// Devices driven by a periodic tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TickSource {
    Pmc = 0,
    Rtt = 1,
}

impl TickSource {
    /// Number of tick sources
    pub const COUNT: usize = 2;
    pub const ALL: [TickSource; TickSource::COUNT] = [TickSource::Pmc, TickSource::Rtt];
}

/// One reloading countdown timer
#[derive(Debug, Clone)]
struct PeriodicTimer {
    source: TickSource,
    /// Host cycles between firings
    period: u64,
    /// Absolute host cycle of the next firing
    deadline: u64,
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    timers: [PeriodicTimer; TickSource::COUNT],
    /// Current host time in cycles
    now: u64,
}

impl Scheduler {
    /// Create a scheduler with every source ticking at `tick_hz`.
    pub fn new(host_clock_hz: u64, tick_hz: u32) -> Self {
        let period = (host_clock_hz / u64::from(tick_hz.max(1))).max(1);
        let timer = |source| PeriodicTimer { source, period, deadline: period };
        Scheduler { timers: TickSource::ALL.map(timer), now: 0 }
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn period(&self, source: TickSource) -> u64 {
        self.timers[source as usize].period
    }

    /// Host cycles until the next firing of any source.
    pub fn cycles_until_next(&self) -> u64 {
        self.timers.iter().map(|t| t.deadline).min().unwrap_or(u64::MAX).saturating_sub(self.now)
    }

    /// Advance host time by `cycles` and return the sources that fired.
    pub fn advance(&mut self, cycles: u64) -> Vec<TickSource> {
        let target = self.now.saturating_add(cycles);
        let mut fired = Vec::new();
        loop {
            // Earliest deadline wins; ties go to the lower source index
            let next = self
                .timers
                .iter_mut()
                .filter(|t| t.deadline <= target)
                .min_by_key(|t| t.deadline);
            let Some(timer) = next else { break };
            self.now = timer.deadline;
            timer.deadline += timer.period;
            fired.push(timer.source);
        }
        self.now = target;
        fired
    }

    pub fn save_state(&self) -> SchedulerState {
        SchedulerState {
            now: self.now,
            deadlines: self.timers.iter().map(|t| t.deadline).collect(),
        }
    }

    pub fn load_state(&mut self, s: &SchedulerState) {
        self.now = s.now;
        for (timer, &deadline) in self.timers.iter_mut().zip(&s.deadlines) {
            timer.deadline = deadline;
        }
    }
}
