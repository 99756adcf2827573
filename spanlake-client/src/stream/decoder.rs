//! Resumable decoding of server-streaming results.
//!
//! Messages are held back until a later resume token proves the server can
//! replay from past them. A retryable failure then reopens the stream from the
//! last token and drops only unconfirmed messages. Once too many bytes pile
//! up without a token the stream stops being resumable and messages flow
//! straight through.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::StreamExt;
use prost::Message;
use tracing::debug;

use crate::error::{Error, Result};
use crate::proto::PartialResultSet;
use crate::retry::{is_retryable_transport, Backoff, Deadline};
use crate::transport::PartialResultStream;

pub(crate) const DEFAULT_MAX_BYTES_BETWEEN_TOKENS: usize = 128 * 1024 * 1024;

/// Opens (and reopens) the underlying RPC.
#[async_trait]
pub(crate) trait StreamSource: Send {
    /// Opens the stream; an empty `resume_token` starts from the beginning.
    async fn open(&mut self, resume_token: &[u8]) -> Result<PartialResultStream>;

    /// Whether a "session not found" before the first resume token may be
    /// recovered by switching sessions.
    fn can_replace_session(&self) -> bool {
        false
    }

    async fn replace_session(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DecoderState {
    Unconnected,
    QueueingRetryable,
    QueueingUnretryable,
    Aborted,
    Finished,
}

pub(crate) struct ResumableStream<S> {
    source: S,
    state: DecoderState,
    stream: Option<PartialResultStream>,
    queue: VecDeque<PartialResultSet>,
    /// Leading queue entries that are safe to hand out.
    confirmed: usize,
    resume_token: Vec<u8>,
    bytes_between_tokens: usize,
    max_bytes_between_tokens: usize,
    err: Option<Error>,
    backoff: Backoff,
    deadline: Deadline,
}

impl<S: StreamSource> ResumableStream<S> {
    pub(crate) fn new(source: S, deadline: Deadline) -> Self {
        Self {
            source,
            state: DecoderState::Unconnected,
            stream: None,
            queue: VecDeque::new(),
            confirmed: 0,
            resume_token: Vec::new(),
            bytes_between_tokens: 0,
            max_bytes_between_tokens: DEFAULT_MAX_BYTES_BETWEEN_TOKENS,
            err: None,
            backoff: Backoff::default(),
            deadline,
        }
    }

    pub(crate) fn with_max_bytes_between_tokens(mut self, max: usize) -> Self {
        self.max_bytes_between_tokens = max;
        self
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> DecoderState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn resume_token(&self) -> &[u8] {
        &self.resume_token
    }

    /// The error that ended the stream, if any. Taken at most once.
    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.err.take()
    }

    /// Returns the next confirmed message, or `None` at the end of the stream
    /// or after a terminal error (see [`take_error`](Self::take_error)).
    pub(crate) async fn next(&mut self) -> Option<PartialResultSet> {
        loop {
            if self.confirmed > 0 {
                self.confirmed -= 1;
                return self.queue.pop_front();
            }
            match self.state {
                DecoderState::Finished => return self.queue.pop_front(),
                DecoderState::Aborted => return None,
                DecoderState::Unconnected => self.connect().await,
                DecoderState::QueueingRetryable | DecoderState::QueueingUnretryable => {
                    self.receive().await
                }
            }
        }
    }

    async fn connect(&mut self) {
        if self.deadline.is_expired() {
            self.abort(self.deadline_error());
            return;
        }
        let opened = self
            .deadline
            .run(self.source.open(&self.resume_token))
            .await;
        match opened {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = DecoderState::QueueingRetryable;
            }
            Err(err) => self.on_error(err, true).await,
        }
    }

    async fn receive(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            self.state = DecoderState::Unconnected;
            return;
        };
        let received = self.deadline.run(async { Ok(stream.next().await) }).await;
        match received {
            Ok(Some(Ok(msg))) => self.push(msg),
            Ok(Some(Err(status))) => {
                self.stream = None;
                self.on_error(Error::from(status), false).await;
            }
            Ok(None) => {
                self.stream = None;
                self.state = DecoderState::Finished;
            }
            Err(err) => {
                self.stream = None;
                self.abort(err);
            }
        }
    }

    fn push(&mut self, msg: PartialResultSet) {
        let has_token = !msg.resume_token.is_empty();
        if has_token {
            self.resume_token = msg.resume_token.clone();
            self.bytes_between_tokens = 0;
            self.queue.push_back(msg);
            self.confirmed = self.queue.len();
            self.state = DecoderState::QueueingRetryable;
            return;
        }
        self.bytes_between_tokens += msg.encoded_len();
        self.queue.push_back(msg);
        if self.state == DecoderState::QueueingRetryable
            && self.bytes_between_tokens > self.max_bytes_between_tokens
        {
            debug!(
                bytes = self.bytes_between_tokens,
                "result stream exceeded buffer limit without a resume token, no longer resumable"
            );
            self.state = DecoderState::QueueingUnretryable;
        }
        if self.state == DecoderState::QueueingUnretryable {
            self.confirmed = self.queue.len();
        }
    }

    async fn on_error(&mut self, err: Error, opening: bool) {
        let resumable = opening || self.state == DecoderState::QueueingRetryable;
        if err.is_session_not_found()
            && self.resume_token.is_empty()
            && self.source.can_replace_session()
            && resumable
        {
            debug!("session not found before first resume token, switching sessions");
            if let Err(replace_err) = self.source.replace_session().await {
                self.abort(replace_err);
                return;
            }
            self.reset_queue();
            self.state = DecoderState::Unconnected;
            return;
        }
        if resumable && is_retryable_transport(&err) {
            self.reset_queue();
            let delay = self.backoff.delay_for(&err);
            debug!(code = ?err.code(), delay_ms = delay.as_millis() as u64, "resuming result stream");
            match self.deadline.sleep(delay, Some(&err)).await {
                Ok(()) => self.state = DecoderState::Unconnected,
                Err(deadline_err) => self.abort(deadline_err),
            }
            return;
        }
        self.abort(err);
    }

    fn reset_queue(&mut self) {
        self.queue.clear();
        self.confirmed = 0;
        self.bytes_between_tokens = 0;
    }

    fn abort(&mut self, err: Error) {
        self.reset_queue();
        self.stream = None;
        self.err = Some(err);
        self.state = DecoderState::Aborted;
    }

    fn deadline_error(&self) -> Error {
        Error::new(tonic::Code::DeadlineExceeded, "context deadline exceeded")
    }
}
