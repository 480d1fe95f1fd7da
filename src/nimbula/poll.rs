//! Convergence Poller
//!
//! The backend provisions and tears down resources asynchronously. A
//! [`Poller`] re-reads a resource at a fixed interval until its observed
//! state is acceptable, the deadline passes, or the caller cancels.
//!
//! Time comes from `tokio::time`, so tests drive it with a paused clock.

use super::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(20 * 60);

/// States of one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Waiting,
    Converged,
    TimedOut,
    Failed,
}

/// Verdict on a single observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Not there yet; read again
    Wait,
    /// Acceptable state reached
    Done,
    /// A state that can never converge
    Fail(String),
}

/// Pure bookkeeping for one wait: observations in, state out
#[derive(Debug, Clone)]
pub struct Convergence {
    started: Instant,
    deadline: Duration,
    reads: u32,
    state: PollState,
}

impl Convergence {
    pub fn new(started: Instant, deadline: Duration) -> Self {
        Self {
            started,
            deadline,
            reads: 0,
            state: PollState::Waiting,
        }
    }

    /// Record one observation made at `now`
    pub fn observe(&mut self, check: &Check, now: Instant) -> PollState {
        if self.state != PollState::Waiting {
            return self.state;
        }
        self.reads += 1;
        self.state = match check {
            Check::Done => PollState::Converged,
            Check::Fail(_) => PollState::Failed,
            Check::Wait if self.elapsed(now) >= self.deadline => PollState::TimedOut,
            Check::Wait => PollState::Waiting,
        };
        self.state
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn reads(&self) -> u32 {
        self.reads
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// Time left before the deadline
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_sub(self.elapsed(now))
    }
}

/// Result of a successful wait
#[derive(Debug, Clone)]
pub struct Converged<T> {
    /// Final observation; `None` when the resource is gone
    pub observed: Option<T>,
    pub reads: u32,
    pub elapsed: Duration,
}

/// Fixed-interval poll loop with an overall deadline
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for Poller {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            deadline: DEFAULT_DEADLINE,
        }
    }
}

impl Poller {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }

    /// Read until `check` accepts the observation
    ///
    /// `read` yields `Ok(None)` when the resource does not exist. A read error
    /// ends the wait with that error. `cancel` resolving abandons the wait
    /// with [`Error::Cancelled`]; pass `std::future::pending()` for none.
    pub async fn wait<T, R, Fut, C, K>(
        &self,
        resource: &str,
        goal: &str,
        mut read: R,
        check: C,
        cancel: K,
    ) -> Result<Converged<T>>
    where
        R: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
        C: Fn(Option<&T>) -> Check,
        K: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        let mut convergence = Convergence::new(Instant::now(), self.deadline);

        loop {
            let observed = tokio::select! {
                _ = &mut cancel => return Err(self.cancelled(resource)),
                observed = read() => observed?,
            };

            let verdict = check(observed.as_ref());
            let now = Instant::now();
            match convergence.observe(&verdict, now) {
                PollState::Converged => {
                    tracing::debug!(
                        "{} reached '{}' after {} reads",
                        resource,
                        goal,
                        convergence.reads()
                    );
                    return Ok(Converged {
                        observed,
                        reads: convergence.reads(),
                        elapsed: convergence.elapsed(now),
                    });
                }
                PollState::Failed => {
                    let reason = match verdict {
                        Check::Fail(reason) => reason,
                        _ => "unknown failure".to_string(),
                    };
                    return Err(Error::Failed {
                        resource: resource.to_string(),
                        reason,
                    });
                }
                PollState::TimedOut => {
                    tracing::warn!("Gave up waiting for {} to {}", resource, goal);
                    return Err(Error::Timeout {
                        resource: resource.to_string(),
                        goal: goal.to_string(),
                        waited: convergence.elapsed(now),
                    });
                }
                PollState::Waiting => {}
            }

            let pause = self.interval.min(convergence.remaining(now));
            tracing::trace!("{} not yet '{}', sleeping {:?}", resource, goal, pause);
            tokio::select! {
                _ = &mut cancel => return Err(self.cancelled(resource)),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    fn cancelled(&self, resource: &str) -> Error {
        tracing::info!("Wait for {} cancelled", resource);
        Error::Cancelled {
            resource: resource.to_string(),
        }
    }
}
