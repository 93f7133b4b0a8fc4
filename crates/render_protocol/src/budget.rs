use std::sync::Mutex;
use std::time::Duration;

use crate::CacheControl;

/// Per-priority time budget for blocking loads.
///
/// Entry `i` is the time left for requests of priority `i`; priorities past
/// the end use the last entry. Spending at priority `i` charges entries `0..=i`
/// and caps every later entry at the one before it, so the entries stay
/// non-increasing. Lower priorities are the urgent ones.
#[derive(Debug, Default)]
pub struct IoBudget {
    state: Mutex<IoBudgetState>,
}

#[derive(Debug, Default)]
struct IoBudgetState {
    remaining: Vec<Duration>,
    epoch: u64,
}

impl IoBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_left(&self, priority: usize) -> Duration {
        let state = self.lock();
        match state.remaining.len() {
            0 => Duration::ZERO,
            len => state.remaining[priority.min(len - 1)],
        }
    }

    pub fn spend(&self, priority: usize, elapsed: Duration) {
        let mut state = self.lock();
        for (index, remaining) in state.remaining.iter_mut().enumerate() {
            if index <= priority {
                *remaining = remaining.saturating_sub(elapsed);
            }
        }
        let mut ceiling = Duration::MAX;
        for remaining in state.remaining.iter_mut() {
            *remaining = (*remaining).min(ceiling);
            ceiling = *remaining;
        }
    }

    /// Number of `prepare_next_frame` calls seen so far.
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, IoBudgetState> {
        self.state
            .lock()
            .unwrap_or_else(|_| panic!("io budget lock poisoned"))
    }
}

impl CacheControl for IoBudget {
    fn prepare_next_frame(&self) {
        self.lock().epoch += 1;
    }

    fn reset_budget(&self, budget: &[Duration]) {
        let mut state = self.lock();
        state.remaining.clear();
        let mut ceiling = Duration::MAX;
        for &entry in budget {
            let entry = entry.min(ceiling);
            state.remaining.push(entry);
            ceiling = entry;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_installs_non_increasing_budget() {
        let budget = IoBudget::new();
        assert_eq!(budget.time_left(0), Duration::ZERO);

        budget.reset_budget(&[Duration::from_millis(100), Duration::from_millis(10)]);
        assert_eq!(budget.time_left(0), Duration::from_millis(100));
        assert_eq!(budget.time_left(1), Duration::from_millis(10));
        assert_eq!(budget.time_left(7), Duration::from_millis(10));

        budget.reset_budget(&[Duration::from_millis(5), Duration::from_millis(10)]);
        assert_eq!(budget.time_left(1), Duration::from_millis(5));
    }

    #[test]
    fn spending_caps_later_priorities_at_earlier_ones() {
        let budget = IoBudget::new();
        budget.reset_budget(&[Duration::from_millis(100), Duration::from_millis(10)]);

        budget.spend(0, Duration::from_millis(95));
        assert_eq!(budget.time_left(0), Duration::from_millis(5));
        assert_eq!(budget.time_left(1), Duration::from_millis(5));

        budget.spend(1, Duration::from_millis(20));
        assert_eq!(budget.time_left(0), Duration::ZERO);
        assert_eq!(budget.time_left(1), Duration::ZERO);
    }

    #[test]
    fn prepare_next_frame_advances_epoch() {
        let budget = IoBudget::new();
        budget.prepare_next_frame();
        budget.prepare_next_frame();
        assert_eq!(budget.epoch(), 2);
    }
}
