//! Waiter - Poll a remote object until it reaches a target state
//!
//! A [`StateWaiter`] repeatedly calls a refresh function and classifies the
//! returned state string as pending or target. Anything else aborts the wait.

use std::future::Future;
use std::time::Duration;

use log::{debug, trace};

/// Number of consecutive "not found" refreshes tolerated before giving up
pub const DEFAULT_NOT_FOUND_CHECKS: u32 = 20;

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("timeout while waiting for state to become '{}' (last state: '{}', timeout: {:?})", expected.join(", "), last_state.as_deref().unwrap_or(""), timeout)]
    Timeout {
        last_state: Option<String>,
        expected: Vec<String>,
        timeout: Duration,
    },

    #[error("unexpected state '{state}', wanted target '{}'", expected.join(", "))]
    UnexpectedState {
        state: String,
        expected: Vec<String>,
    },

    #[error("couldn't find resource ({checks} retries)")]
    NotFound { checks: u32 },

    #[error("{0}")]
    Refresh(Box<dyn std::error::Error + Send + Sync>),
}

impl WaitError {
    pub fn refresh(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        WaitError::Refresh(Box::new(err))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::Timeout { .. })
    }
}

/// Outcome of a single refresh: the observed object (if any) and its state
pub struct Refresh<T> {
    pub value: Option<T>,
    pub state: String,
}

impl<T> Refresh<T> {
    pub fn found(value: T, state: impl Into<String>) -> Self {
        Self {
            value: Some(value),
            state: state.into(),
        }
    }

    /// Nothing observed yet; counts against the not-found budget
    pub fn missing() -> Self {
        Self {
            value: None,
            state: String::new(),
        }
    }
}

/// Poll configuration
#[derive(Debug, Clone)]
pub struct StateWaiter {
    pub pending: Vec<String>,
    pub target: Vec<String>,
    pub timeout: Duration,
    /// Wait before the first refresh
    pub delay: Duration,
    /// Wait between refreshes
    pub poll_interval: Duration,
    /// Consecutive target observations needed before returning
    pub continuous_target_occurrence: u32,
    pub not_found_checks: u32,
}

impl StateWaiter {
    pub fn new(pending: &[&str], target: &[&str], timeout: Duration) -> Self {
        Self {
            pending: pending.iter().map(|s| s.to_string()).collect(),
            target: target.iter().map(|s| s.to_string()).collect(),
            timeout,
            delay: Duration::ZERO,
            poll_interval: Duration::from_secs(10),
            continuous_target_occurrence: 1,
            not_found_checks: DEFAULT_NOT_FOUND_CHECKS,
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn continuous_target_occurrence(mut self, count: u32) -> Self {
        self.continuous_target_occurrence = count.max(1);
        self
    }

    pub fn not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    /// Replace both delay and poll interval, used to speed up polling
    pub fn with_override(mut self, interval: Option<Duration>) -> Self {
        if let Some(interval) = interval {
            self.delay = interval;
            self.poll_interval = interval;
        }
        self
    }

    /// Poll `refresh` until a target state is observed often enough.
    ///
    /// Returns the value observed with the final target state.
    pub async fn wait<T, E, F, Fut>(&self, mut refresh: F) -> Result<T, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Refresh<T>, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut last_state: Option<String> = None;

        let polling = async {
            tokio::time::sleep(self.delay).await;

            let mut target_seen = 0u32;
            let mut not_found = 0u32;
            loop {
                let Refresh { value, state } = refresh().await.map_err(WaitError::refresh)?;
                trace!("refreshed state: '{}'", state);

                match value {
                    None => {
                        target_seen = 0;
                        not_found += 1;
                        if not_found > self.not_found_checks {
                            return Err(WaitError::NotFound { checks: not_found });
                        }
                    }
                    Some(value) => {
                        not_found = 0;
                        last_state = Some(state.clone());

                        if self.target.contains(&state) {
                            target_seen += 1;
                            if target_seen >= self.continuous_target_occurrence {
                                return Ok(value);
                            }
                        } else if self.pending.contains(&state) {
                            target_seen = 0;
                        } else {
                            return Err(WaitError::UnexpectedState {
                                state,
                                expected: self.target.clone(),
                            });
                        }
                    }
                }

                debug!(
                    "waiting {:?} for state to become '{}'",
                    self.poll_interval,
                    self.target.join(", ")
                );
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        let result = tokio::time::timeout(self.timeout, polling).await;
        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(WaitError::Timeout {
                last_state,
                expected: self.target.clone(),
                timeout: self.timeout,
            }),
        }
    }
}
