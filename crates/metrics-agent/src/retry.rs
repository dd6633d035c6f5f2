// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// A backoff wait was interrupted by shutdown.
    #[error("cancelled after {attempts} attempt(s), last error: {last}")]
    Cancelled { attempts: usize, last: E },

    #[error("giving up after {attempts} attempt(s): {last}")]
    Exhausted { attempts: usize, last: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> usize {
        match self {
            RetryError::Cancelled { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_last(self) -> E {
        match self {
            RetryError::Cancelled { last, .. } | RetryError::Exhausted { last, .. } => last,
        }
    }
}

/// Fixed backoff schedule: one immediate attempt, then one retry after each interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    intervals: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(5),
        ])
    }
}

impl RetryPolicy {
    pub fn new(intervals: Vec<Duration>) -> Self {
        RetryPolicy { intervals }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        RetryPolicy::new(Vec::new())
    }

    pub fn intervals(&self) -> &[Duration] {
        &self.intervals
    }

    pub fn max_attempts(&self) -> usize {
        self.intervals.len() + 1
    }

    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_when(cancel, |_| true, op).await
    }

    /// Like [`RetryPolicy::run`], but stops at the first error `retryable` rejects.
    ///
    /// The first attempt always runs, even when `cancel` already fired; only
    /// the waits between attempts observe cancellation.
    pub async fn run_when<T, E, F, Fut, R>(
        &self,
        cancel: &CancellationToken,
        retryable: R,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempts = 0;
        let mut waits = self.intervals.iter();
        loop {
            attempts += 1;
            let last = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            if !retryable(&last) {
                return Err(RetryError::Exhausted { attempts, last });
            }
            let Some(wait) = waits.next() else {
                return Err(RetryError::Exhausted { attempts, last });
            };

            debug!("Attempt {attempts} failed: {last}, retrying in {wait:?}");
            tokio::select! {
                () = tokio::time::sleep(*wait) => {}
                () = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts, last });
                }
            }
        }
    }
}
