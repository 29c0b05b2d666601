// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.

//! Alias-keyed timers: `each` (repeating) and `after` (one-shot). A timer
//! that falls behind (the event loop was busy past its deadline) is
//! coalesced rather than fired once per missed tick — it reschedules from
//! "now," so a stalled loop never produces a burst of catch-up calls.

use std::collections::HashMap;
use std::time::{Duration, Instant};

struct TimerEntry {
    period: Option<Duration>,
    next_fire: Instant,
    handler: String,
}

#[derive(Default)]
pub struct Timers {
    entries: HashMap<String, TimerEntry>,
}

impl Timers {
    pub fn new() -> Timers {
        Timers { entries: HashMap::new() }
    }

    pub fn each(&mut self, period: Duration, alias: impl Into<String>, handler: impl Into<String>) {
        self.entries.insert(
            alias.into(),
            TimerEntry { period: Some(period), next_fire: Instant::now() + period, handler: handler.into() },
        );
    }

    pub fn after(&mut self, delay: Duration, alias: impl Into<String>, handler: impl Into<String>) {
        self.entries.insert(
            alias.into(),
            TimerEntry { period: None, next_fire: Instant::now() + delay, handler: handler.into() },
        );
    }

    /// Returns `true` if a timer with that alias existed and was removed.
    pub fn stop(&mut self, alias: &str) -> bool {
        self.entries.remove(alias).is_some()
    }

    /// How long the event loop's poll call may block before the soonest
    /// timer needs to fire.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.next_fire).min()
    }

    /// Removes and returns the handler names of every timer due at `now`.
    /// One-shot (`after`) timers are dropped; repeating (`each`) timers
    /// are rescheduled to `now + period`.
    pub fn take_due(&mut self, now: Instant) -> Vec<String> {
        let due_aliases: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.next_fire <= now)
            .map(|(alias, _)| alias.clone())
            .collect();

        let mut handlers = Vec::with_capacity(due_aliases.len());
        for alias in due_aliases {
            if let Some(entry) = self.entries.get_mut(&alias) {
                handlers.push(entry.handler.clone());
                match entry.period {
                    Some(period) => entry.next_fire = now + period,
                    None => {
                        self.entries.remove(&alias);
                    }
                }
            }
        }
        handlers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn after_fires_once_then_is_gone() {
        let mut timers = Timers::new();
        timers.after(Duration::from_millis(0), "once", "ping");

        let now = Instant::now() + Duration::from_millis(1);
        assert_eq!(timers.take_due(now), vec!["ping".to_string()]);
        assert_eq!(timers.take_due(now), Vec::<String>::new());
    }

    #[test]
    fn each_reschedules_instead_of_bursting() {
        let mut timers = Timers::new();
        timers.each(Duration::from_millis(10), "tick", "on_tick");

        let far_future = Instant::now() + Duration::from_secs(10);
        let fired = timers.take_due(far_future);
        assert_eq!(fired, vec!["on_tick".to_string()]);

        // Still scheduled, deadline moved forward from `far_future`, not
        // accumulated as nine hundred missed ticks.
        assert!(timers.next_deadline().unwrap() > far_future);
    }

    #[test]
    fn stop_removes_a_pending_timer() {
        let mut timers = Timers::new();
        timers.after(Duration::from_secs(60), "later", "h");
        assert!(timers.stop("later"));
        assert!(!timers.stop("later"));
    }
}
