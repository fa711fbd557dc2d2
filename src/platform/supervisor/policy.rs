use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Capped exponential backoff plus a rolling restart budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Restarts allowed inside one `window`.
    pub max_restarts: u32,
    pub window: Duration,
}

impl RestartPolicy {
    pub fn new(
        initial_backoff: Duration,
        max_backoff: Duration,
        max_restarts: u32,
        window: Duration,
    ) -> Self {
        Self {
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
            max_restarts,
            window,
        }
    }

    /// Delay before the restart that follows `consecutive_failures` failures
    /// (1-based): `initial`, `2 * initial`, ... capped at `max_backoff`.
    pub fn backoff_for(&self, consecutive_failures: u32) -> Duration {
        let doublings = consecutive_failures.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1_u32 << doublings)
            .min(self.max_backoff)
    }

    pub fn budget(&self) -> RestartBudget {
        RestartBudget::new(self.max_restarts, self.window)
    }
}

/// Restart timestamps inside the rolling window.
#[derive(Debug, Clone)]
pub struct RestartBudget {
    max_restarts: u32,
    window: Duration,
    restarts: VecDeque<Instant>,
}

impl RestartBudget {
    pub fn new(max_restarts: u32, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
            restarts: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while self
            .restarts
            .front()
            .is_some_and(|at| now.saturating_duration_since(*at) >= self.window)
        {
            self.restarts.pop_front();
        }
    }

    pub fn remaining(&mut self, now: Instant) -> u32 {
        self.prune(now);
        let used = u32::try_from(self.restarts.len()).unwrap_or(u32::MAX);
        self.max_restarts.saturating_sub(used)
    }

    /// Spend one restart, or report that the window's budget is gone.
    pub fn try_charge(&mut self, now: Instant) -> bool {
        if self.remaining(now) == 0 {
            return false;
        }
        self.restarts.push_back(now);
        true
    }

    pub fn reset(&mut self) {
        self.restarts.clear();
    }
}
