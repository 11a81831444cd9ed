//! Sliding-window mutation counts per agent.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use mgp_policy::MutationRateSnapshot;
use parking_lot::Mutex;

#[derive(Debug)]
pub struct MutationRateTracker {
    window_secs: u64,
    events: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl MutationRateTracker {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window_secs,
            events: Mutex::new(HashMap::new()),
        }
    }

    fn window(&self) -> Duration {
        Duration::seconds(i64::from(u32::try_from(self.window_secs).unwrap_or(u32::MAX)))
    }

    pub fn record(&self, agent_id: &str, at: DateTime<Utc>) {
        self.events
            .lock()
            .entry(agent_id.to_string())
            .or_default()
            .push_back(at);
    }

    /// Mutations by `agent_id` inside the window ending at `now`.
    pub fn snapshot(&self, agent_id: &str, now: DateTime<Utc>) -> MutationRateSnapshot {
        let cutoff = now - self.window();
        let mut events = self.events.lock();
        let count = match events.get_mut(agent_id) {
            Some(times) => {
                while times.front().is_some_and(|t| *t < cutoff) {
                    times.pop_front();
                }
                times.len() as u64
            }
            None => 0,
        };
        if count == 0 {
            events.remove(agent_id);
        }
        MutationRateSnapshot {
            count,
            window_secs: self.window_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn old_events_leave_the_window() {
        let tracker = MutationRateTracker::new(3600);
        let now = Utc::now();
        tracker.record("a", now - Duration::seconds(7200));
        tracker.record("a", now - Duration::seconds(60));
        tracker.record("a", now);
        tracker.record("b", now);

        let snap = tracker.snapshot("a", now);
        assert_eq!(snap.count, 2);
        assert_eq!(snap.window_secs, 3600);
        assert_eq!(tracker.snapshot("c", now).count, 0);
    }

    #[test]
    fn quiet_agents_are_forgotten() {
        let tracker = MutationRateTracker::new(60);
        let now = Utc::now();
        tracker.record("a", now - Duration::seconds(600));
        assert_eq!(tracker.snapshot("a", now).count, 0);
        assert!(tracker.events.lock().is_empty());
    }
}
