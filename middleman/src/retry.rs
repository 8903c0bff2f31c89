// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Retry strategies
//!
//! Handshakes over a best-effort transport re-send their CONNECT request because either
//! the request or the answer may be lost. A [`RetryStrategy`] bounds the number of
//! attempts and decides how long to wait for an answer before the next one.
//!

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder, backoff::Backoff};

use std::{fmt::Debug, time::Duration};

/// Schedule of attempts.
pub trait RetryStrategy: Debug + Send + Sync {
    /// Maximum number of attempts.
    fn max_retries(&self) -> usize;

    /// Wait before the next attempt, or `None` when the schedule is exhausted.
    fn next_backoff(&mut self) -> Option<Duration>;
}

/// Waits the same duration between attempts.
#[derive(Debug, Default)]
pub struct FixedIntervalStrategy {
    max_retries: usize,
    duration: Duration,
}

impl FixedIntervalStrategy {
    pub fn new(max_retries: usize, duration: Duration) -> Self {
        FixedIntervalStrategy {
            max_retries,
            duration,
        }
    }
}

impl RetryStrategy for FixedIntervalStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        Some(self.duration)
    }
}

/// Doubles the wait after every attempt, with a little jitter.
#[derive(Debug)]
pub struct ExponentialBackoffStrategy {
    max_retries: usize,
    inner: ExponentialBackoff,
}

impl ExponentialBackoffStrategy {
    /// Starts at `initial` and gives up once `max_elapsed` has passed.
    pub fn new(max_retries: usize, initial: Duration, max_elapsed: Duration) -> Self {
        let inner = ExponentialBackoffBuilder::new()
            .with_initial_interval(initial)
            .with_multiplier(2.0)
            .with_randomization_factor(0.1)
            .with_max_interval(max_elapsed)
            .with_max_elapsed_time(Some(max_elapsed))
            .build();
        ExponentialBackoffStrategy { max_retries, inner }
    }
}

impl RetryStrategy for ExponentialBackoffStrategy {
    fn max_retries(&self) -> usize {
        self.max_retries
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.inner.next_backoff()
    }
}
