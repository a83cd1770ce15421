//! Bounded polling for blocking code paths that can be cancelled from another thread.

use std::{
    ops::ControlFlow,
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context as _, Result, anyhow};
use tokio_util::sync::CancellationToken;

const EXPONENTIAL_BACKOFF_MAX_WAIT_DURATION: Duration = Duration::from_secs(60);

/// The granularity with which sleeping threads check for cancellation.
const CANCELLATION_CHECK_INTERVAL: Duration = Duration::from_millis(25);

/// The error returned when a poll was aborted through its [`CancellationToken`].
///
/// Callers that need to tell cancellation apart from other failures can downcast the returned
/// [`anyhow::Error`] to this type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("polling was cancelled")]
pub struct Cancelled;

/// A function that polls a fallible attempt for some period of time and errors if it fails to get
/// a result within that period.
///
/// Given an attempt that returns a [`Result<ControlFlow<O, ()>>`], this function calls it
/// repeatedly (with some wait period) until it returns a [`ControlFlow::Break`] or an [`Err`], in
/// which case polling stops and the error is returned.
///
/// If the attempt keeps returning [`ControlFlow::Continue`] and fails to return a [`Break`] within
/// the permitted polling duration then this function returns an [`Err`]. If the token is
/// cancelled before or between attempts the error is [`Cancelled`].
///
/// [`Break`]: ControlFlow::Break
pub fn poll<O>(
    polling_duration: Duration,
    polling_wait_behavior: PollingWaitBehavior,
    cancellation: &CancellationToken,
    mut attempt: impl FnMut() -> Result<ControlFlow<O, ()>>,
) -> Result<O> {
    let mut retries = 0;
    let mut total_wait_duration = Duration::ZERO;
    let max_allowed_wait_duration = polling_duration;

    loop {
        if cancellation.is_cancelled() {
            break Err(Cancelled.into());
        }
        if total_wait_duration >= max_allowed_wait_duration {
            break Err(anyhow!(
                "Polling failed after {} retries and a total of {:?} of wait time",
                retries,
                total_wait_duration
            ));
        }

        match attempt().context("Polled attempt returned an error during polling loop")? {
            ControlFlow::Continue(()) => {
                let next_wait_duration = polling_wait_behavior
                    .wait_duration(retries)
                    .min(max_allowed_wait_duration - total_wait_duration);
                total_wait_duration += next_wait_duration;
                retries += 1;

                if !sleep_unless_cancelled(next_wait_duration, cancellation) {
                    break Err(Cancelled.into());
                }
            }
            ControlFlow::Break(output) => {
                break Ok(output);
            }
        }
    }
}

/// Sleeps for `duration` while watching the token. Returns `false` if the sleep was cut short
/// by a cancellation.
pub fn sleep_unless_cancelled(duration: Duration, cancellation: &CancellationToken) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancellation.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(CANCELLATION_CHECK_INTERVAL));
    }
}

/// Whether an error chain ends in a [`Cancelled`] poll.
pub fn is_cancelled(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| cause.is::<Cancelled>())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PollingWaitBehavior {
    Constant(Duration),
    #[default]
    ExponentialBackoff,
}

impl PollingWaitBehavior {
    /// The wait before the next attempt, after `retries` attempts that asked to continue.
    /// Exponential waits are capped at 60 seconds.
    pub fn wait_duration(&self, retries: u32) -> Duration {
        match self {
            Self::Constant(duration) => *duration,
            Self::ExponentialBackoff => Duration::from_secs(2u64.saturating_pow(retries))
                .min(EXPONENTIAL_BACKOFF_MAX_WAIT_DURATION),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn exponential_backoff_is_capped() {
        // Arrange
        let behavior = PollingWaitBehavior::ExponentialBackoff;

        // Act
        let waits = [0, 3, 6, 64, u32::MAX].map(|retries| behavior.wait_duration(retries));

        // Assert
        assert_eq!(
            waits,
            [
                Duration::from_secs(1),
                Duration::from_secs(8),
                EXPONENTIAL_BACKOFF_MAX_WAIT_DURATION,
                EXPONENTIAL_BACKOFF_MAX_WAIT_DURATION,
                EXPONENTIAL_BACKOFF_MAX_WAIT_DURATION,
            ]
        );
    }

    #[test]
    fn poll_returns_the_first_break() {
        // Arrange
        let attempts = AtomicUsize::new(0);

        // Act
        let result = poll(
            Duration::from_secs(5),
            PollingWaitBehavior::Constant(Duration::from_millis(1)),
            &CancellationToken::new(),
            || match attempts.fetch_add(1, Ordering::SeqCst) {
                0..=2 => Ok(ControlFlow::Continue(())),
                attempt => Ok(ControlFlow::Break(attempt)),
            },
        );

        // Assert
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn poll_gives_up_after_the_polling_duration() {
        // Act
        let result = poll::<()>(
            Duration::from_millis(50),
            PollingWaitBehavior::Constant(Duration::from_millis(10)),
            &CancellationToken::new(),
            || Ok(ControlFlow::Continue(())),
        );

        // Assert
        let error = result.unwrap_err();
        assert!(!is_cancelled(&error));
        assert!(error.to_string().contains("Polling failed"), "{error}");
    }

    #[test]
    fn poll_stops_on_the_first_error() {
        // Arrange
        let attempts = AtomicUsize::new(0);

        // Act
        let result = poll::<()>(
            Duration::from_secs(5),
            PollingWaitBehavior::Constant(Duration::from_millis(1)),
            &CancellationToken::new(),
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("endpoint refused"))
            },
        );

        // Assert
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancellation_interrupts_a_long_wait() {
        // Arrange
        let cancellation = CancellationToken::new();
        let canceller = {
            let cancellation = cancellation.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                cancellation.cancel();
            })
        };
        let started = Instant::now();

        // Act
        let result = poll::<()>(
            Duration::from_secs(30),
            PollingWaitBehavior::Constant(Duration::from_secs(10)),
            &cancellation,
            || Ok(ControlFlow::Continue(())),
        );
        canceller.join().unwrap();

        // Assert
        assert!(is_cancelled(&result.unwrap_err()));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn an_already_cancelled_token_never_attempts() {
        // Arrange
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let attempts = Arc::new(AtomicUsize::new(0));

        // Act
        let result = poll::<()>(
            Duration::from_secs(1),
            PollingWaitBehavior::default(),
            &cancellation,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok(ControlFlow::Continue(()))
            },
        );

        // Assert
        assert!(is_cancelled(&result.unwrap_err()));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}
