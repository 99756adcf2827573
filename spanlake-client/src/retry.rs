//! Retry classification, jittered exponential backoff and caller deadlines.
//!
//! Retry loops in this crate are bounded by a [`Deadline`] only, never by an
//! attempt count.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tonic::Code;
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(20);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(32);
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.3;

/// `Internal` errors are only retried when the message names one of these
/// transport framing anomalies.
// TODO: switch to a structured error detail once the server attaches one to
// these failures; matching on message text breaks on any wording change.
const RETRYABLE_INTERNAL_MESSAGES: [&str; 4] = [
    "stream terminated by RST_STREAM",
    "HTTP/2 error code: INTERNAL_ERROR",
    "Connection closed with unknown cause",
    "Received unexpected EOS on DATA frame from server",
];

/// Jittered exponential backoff.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            DEFAULT_INITIAL_BACKOFF,
            DEFAULT_MAX_BACKOFF,
            DEFAULT_BACKOFF_MULTIPLIER,
        )
    }
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        let initial = initial.max(Duration::from_nanos(1));
        Self {
            initial,
            max: max.max(initial),
            multiplier: multiplier.max(1.0),
            current: initial,
        }
    }

    /// Returns a delay drawn uniformly from `(0, current]` and grows `current`.
    pub fn next_delay(&mut self) -> Duration {
        let upper = self.current.as_nanos().max(1) as u64;
        let delay = Duration::from_nanos(rand::thread_rng().gen_range(1..=upper));
        let grown = self.current.as_secs_f64() * self.multiplier;
        self.current = Duration::from_secs_f64(grown.min(self.max.as_secs_f64()));
        delay
    }

    /// The server retry hint wins over the computed delay.
    pub fn delay_for(&mut self, err: &Error) -> Duration {
        let computed = self.next_delay();
        err.retry_delay().unwrap_or(computed)
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Transient transport failures that may be retried at the single-RPC level.
pub fn is_retryable_transport(err: &Error) -> bool {
    match err.code() {
        Code::Unavailable | Code::ResourceExhausted => true,
        Code::Internal => RETRYABLE_INTERNAL_MESSAGES
            .iter()
            .any(|needle| err.message().contains(needle)),
        _ => false,
    }
}

/// Errors that restart a whole transaction attempt.
pub(crate) fn is_transaction_retryable(err: &Error) -> bool {
    err.is_aborted() || err.is_session_not_found() || err.is_inline_begin_failed()
}

/// Partitioned DML restarts on `Aborted` and on the EOS flavour of `Internal`.
pub(crate) fn is_partitioned_dml_retryable(err: &Error) -> bool {
    err.is_aborted()
        || (err.code() == Code::Internal
            && err
                .message()
                .contains("Received unexpected EOS on DATA frame from server"))
}

/// Point in time after which operations stop retrying. `Deadline::none()`
/// never expires; cancellation then happens by dropping the future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map(Self::after).unwrap_or_else(Self::none)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.0
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }

    /// The earlier of the two deadlines.
    pub fn min(self, other: Deadline) -> Deadline {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Deadline(Some(a.min(b))),
            (Some(a), None) | (None, Some(a)) => Deadline(Some(a)),
            (None, None) => Deadline(None),
        }
    }

    /// Sleeps for `delay`, or fails with `DeadlineExceeded` if the deadline
    /// would pass first. `last` is the error that triggered the retry.
    pub async fn sleep(&self, delay: Duration, last: Option<&Error>) -> Result<()> {
        match self.remaining() {
            Some(left) if left < delay => {
                tokio::time::sleep(left).await;
                Err(deadline_exceeded(last))
            }
            _ => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
        }
    }

    /// Runs `fut` to completion or until the deadline passes.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.remaining() {
            None => fut.await,
            Some(left) => match tokio::time::timeout(left, fut).await {
                Ok(result) => result,
                Err(_) => Err(deadline_exceeded(None)),
            },
        }
    }
}

fn deadline_exceeded(last: Option<&Error>) -> Error {
    let err = Error::new(Code::DeadlineExceeded, "context deadline exceeded");
    match last {
        Some(last) => err.with_additional_info(format!("last error: {last}")),
        None => err,
    }
}

/// Retries a single RPC on transient transport errors until `deadline`.
pub(crate) async fn retry_transient<T, F, Fut>(deadline: Deadline, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = Backoff::default();
    loop {
        match deadline.run(op()).await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable_transport(&err) => {
                let delay = backoff.delay_for(&err);
                debug!(code = ?err.code(), delay_ms = delay.as_millis() as u64, "retrying rpc");
                deadline.sleep(delay, Some(&err)).await?;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let mut backoff = Backoff::new(
            Duration::from_millis(20),
            Duration::from_millis(40),
            2.0,
        );
        let first = backoff.next_delay();
        assert!(first <= Duration::from_millis(20));
        assert!(first > Duration::ZERO);
        backoff.next_delay();
        for _ in 0..10 {
            assert!(backoff.next_delay() <= Duration::from_millis(40));
        }
        backoff.reset();
        assert!(backoff.next_delay() <= Duration::from_millis(20));
    }

    #[test]
    fn server_delay_overrides_computed_delay() {
        let mut backoff = Backoff::default();
        let err = Error::new(Code::Aborted, "aborted").with_retry_delay(Duration::from_secs(3));
        assert_eq!(backoff.delay_for(&err), Duration::from_secs(3));
    }

    #[test]
    fn internal_errors_are_retried_only_for_known_messages() {
        assert!(is_retryable_transport(&Error::new(Code::Unavailable, "x")));
        assert!(is_retryable_transport(&Error::new(
            Code::ResourceExhausted,
            "x"
        )));
        assert!(is_retryable_transport(&Error::internal(
            "stream terminated by RST_STREAM with error code: 2"
        )));
        assert!(!is_retryable_transport(&Error::internal("boom")));
        assert!(!is_retryable_transport(&Error::new(Code::Aborted, "x")));
        assert!(!is_retryable_transport(&Error::new(
            Code::DeadlineExceeded,
            "x"
        )));
    }

    #[test]
    fn partitioned_dml_retry_set_is_narrow() {
        assert!(is_partitioned_dml_retryable(&Error::new(Code::Aborted, "x")));
        assert!(is_partitioned_dml_retryable(&Error::internal(
            "Received unexpected EOS on DATA frame from server"
        )));
        assert!(!is_partitioned_dml_retryable(&Error::internal(
            "stream terminated by RST_STREAM"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_sleep_fails_when_delay_exceeds_remaining() {
        let deadline = Deadline::after(Duration::from_millis(50));
        assert!(deadline.sleep(Duration::from_millis(10), None).await.is_ok());
        let last = Error::new(Code::Unavailable, "down");
        let err = deadline
            .sleep(Duration::from_secs(1), Some(&last))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
        assert!(err.additional_info().unwrap().contains("down"));
        assert!(deadline.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn retry_transient_retries_until_success() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let value = retry_transient(Deadline::after(Duration::from_secs(5)), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::new(Code::Unavailable, "flaky"))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_transient_propagates_permanent_errors() {
        let err = retry_transient(Deadline::none(), || async {
            Err::<(), _>(Error::invalid_argument("nope"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn deadline_min_prefers_earliest() {
        let none = Deadline::none();
        let soon = Deadline::after(Duration::from_secs(1));
        let later = Deadline::after(Duration::from_secs(10));
        assert_eq!(none.min(soon), soon);
        assert_eq!(later.min(soon), soon);
        assert_eq!(none.min(none), none);
    }
}
