//! Bounded retry with exponential backoff around remote calls.
//!
//! The sync core never retries on its own; adapters wrap their fetch and
//! freshness closures in `with_backoff` so a transient outage costs a few
//! delayed attempts before the dataset is reported as failed.

use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

use crate::logging::{self, DataSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub tries: u32,
    /// Delay before the second attempt, in seconds.
    pub delay_secs: u64,
    /// Upper bound on any single delay, in seconds.
    pub max_delay_secs: u64,
    /// Multiplier applied to the delay after every failure.
    pub backoff: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            tries: 5,
            delay_secs: 15,
            max_delay_secs: 60,
            backoff: 2,
        }
    }
}

impl RetryPolicy {
    /// `tries` attempts with no waiting in between.
    pub fn immediate(tries: u32) -> Self {
        RetryPolicy {
            tries,
            delay_secs: 0,
            max_delay_secs: 0,
            backoff: 1,
        }
    }

    /// Delays slept between attempts, in order.
    pub fn delays(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        let mut delay = self.delay_secs.min(self.max_delay_secs);
        for _ in 1..self.tries.max(1) {
            delays.push(Duration::from_secs(delay));
            delay = delay.saturating_mul(self.backoff).min(self.max_delay_secs);
        }
        delays
    }
}

/// Runs `op` until it succeeds or the policy's attempts are exhausted,
/// returning the last error.
pub fn with_backoff<T, E, F>(
    policy: &RetryPolicy,
    source: DataSource,
    label: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    let delays = policy.delays();
    let attempts = delays.len() + 1;
    let mut delays = delays.into_iter();
    let mut attempt = 1;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => {
                let Some(delay) = delays.next() else {
                    return Err(e);
                };
                logging::warn(
                    source.clone(),
                    Some(label),
                    &format!(
                        "attempt {}/{} failed: {}; retrying in {}s",
                        attempt,
                        attempts,
                        e,
                        delay.as_secs()
                    ),
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delays_double_up_to_cap() {
        let secs: Vec<u64> = RetryPolicy::default()
            .delays()
            .iter()
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(secs, vec![15, 30, 60, 60]);
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let mut calls = 0;
        let result: Result<u32, String> =
            with_backoff(&RetryPolicy::immediate(3), DataSource::System, "t", || {
                calls += 1;
                if calls < 3 { Err("boom".to_string()) } else { Ok(calls) }
            });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn test_gives_up_after_last_attempt() {
        let mut calls = 0;
        let result: Result<(), String> =
            with_backoff(&RetryPolicy::immediate(2), DataSource::System, "t", || {
                calls += 1;
                Err(format!("failure {}", calls))
            });
        assert_eq!(result, Err("failure 2".to_string()));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_zero_tries_still_runs_once() {
        let mut calls = 0;
        let _: Result<(), &str> =
            with_backoff(&RetryPolicy::immediate(0), DataSource::System, "t", || {
                calls += 1;
                Err("x")
            });
        assert_eq!(calls, 1);
    }
}
