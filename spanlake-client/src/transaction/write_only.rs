//! Blind writes: single-use commits and non-atomic batch writes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::time::Instant;
use tonic::Code;
use tracing::{debug, instrument};

use super::read_write::CommitResponse;
use super::ClientContext;
use crate::error::{Error, Result};
use crate::mutation::{mutations_to_proto, Mutation, MutationGroup};
use crate::options::{request_options, ApplyOptions, BatchWriteOptions};
use crate::proto::{commit_request, BatchWriteRequest, BatchWriteResponse, CommitRequest};
use crate::retry::{Backoff, Deadline};
use crate::session::SessionHandle;
use crate::timestamp_bound::from_timestamp;
use crate::transport::BatchWriteStream;

const APPLY_METHOD: &str = "ApplyAtLeastOnce";

/// Commits `mutations` in a single-use transaction, without replay
/// protection: a retried call may apply them twice.
#[instrument(skip_all, fields(mutations = mutations.len()))]
pub(crate) async fn apply_at_least_once(
    ctx: &ClientContext,
    mutations: &[Mutation],
    opts: &ApplyOptions,
) -> Result<CommitResponse> {
    let timer = ctx.metrics.start_operation(APPLY_METHOD);
    let result = commit_single_use(ctx, mutations, opts).await;
    timer.finish(result.as_ref().map_or_else(Error::code, |_| Code::Ok));
    result
}

async fn commit_single_use(
    ctx: &ClientContext,
    mutations: &[Mutation],
    opts: &ApplyOptions,
) -> Result<CommitResponse> {
    let tx_options = opts.transaction_options();
    let req = CommitRequest {
        session: String::new(),
        mutations: mutations_to_proto(mutations)?,
        return_commit_stats: opts.commit_options.return_commit_stats,
        request_options: tx_options.commit_request_options(),
        max_commit_delay: opts.commit_options.max_commit_delay_proto(),
        transaction: Some(commit_request::Transaction::SingleUseTransaction(
            tx_options.read_write_options(),
        )),
    };
    let deadline = Deadline::from_timeout(tx_options.timeout);
    let mut backoff = Backoff::default();
    let mut reuse: Option<SessionHandle> = None;
    loop {
        let handle = match reuse.take() {
            Some(handle) => handle,
            None => ctx.pool.take(deadline).await?,
        };
        let started = Instant::now();
        let committed = deadline
            .run(handle.session().commit(req.clone(), ctx.route_to_leader()))
            .await;
        let code = committed.as_ref().map_or_else(Error::code, |_| Code::Ok);
        ctx.metrics.record_attempt(APPLY_METHOD, code, started.elapsed());
        match committed {
            Ok(resp) => return CommitResponse::from_proto(resp),
            Err(err) if err.is_session_not_found() => {
                debug!(session = %handle.name(), "session expired, retrying commit");
                handle.destroy();
            }
            Err(err) if err.is_aborted() => {
                reuse = Some(handle);
                let delay = backoff.delay_for(&err);
                debug!(delay_ms = delay.as_millis() as u64, "single-use commit aborted, retrying");
                deadline.sleep(delay, Some(&err)).await?;
            }
            Err(err) => return Err(err.during_commit()),
        }
    }
}

/// Outcome of one or more mutation groups of a batch write.
#[derive(Debug, Clone)]
pub struct BatchWriteResult {
    /// Positions of the groups this result covers in the request.
    pub indexes: Vec<i32>,
    /// `None` when the groups were committed.
    pub status: Option<Error>,
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl From<BatchWriteResponse> for BatchWriteResult {
    fn from(resp: BatchWriteResponse) -> Self {
        let status = resp
            .status
            .filter(|s| s.code != Code::Ok as i32)
            .map(|s| Error::new(Code::from(s.code), s.message));
        Self {
            indexes: resp.indexes,
            status,
            commit_timestamp: resp.commit_timestamp.as_ref().and_then(from_timestamp),
        }
    }
}

/// Streams the results of a batch write. The request is only sent on the
/// first call to [`next`](Self::next).
pub struct BatchWriteResponseIterator {
    ctx: Arc<ClientContext>,
    request: BatchWriteRequest,
    handle: Option<SessionHandle>,
    stream: Option<BatchWriteStream>,
    received: bool,
    done: bool,
    stopped: bool,
    err: Option<Error>,
}

impl BatchWriteResponseIterator {
    pub(crate) fn new(
        ctx: Arc<ClientContext>,
        groups: &[MutationGroup],
        opts: &BatchWriteOptions,
    ) -> Self {
        let encoded: Result<Vec<_>> = groups.iter().map(MutationGroup::to_proto).collect();
        let (mutation_groups, err) = match encoded {
            Ok(groups) => (groups, None),
            Err(err) => (Vec::new(), Some(err)),
        };
        Self {
            ctx,
            request: BatchWriteRequest {
                session: String::new(),
                request_options: request_options(opts.priority, "", &opts.transaction_tag),
                mutation_groups,
                exclude_txn_from_change_streams: opts.exclude_txn_from_change_streams,
            },
            handle: None,
            stream: None,
            received: false,
            done: false,
            stopped: false,
            err,
        }
    }

    /// Returns the next result, `Ok(None)` once every group is reported.
    pub async fn next(&mut self) -> Result<Option<BatchWriteResult>> {
        if self.stopped {
            return Err(Error::failed_precondition("next called after stop"));
        }
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        if self.done {
            return Ok(None);
        }
        loop {
            let received = match self.stream.as_mut() {
                Some(stream) => stream.next().await.map(|item| item.map_err(Error::from)),
                None => match self.open().await {
                    Ok(stream) => {
                        self.stream = Some(stream);
                        continue;
                    }
                    Err(err) => Some(Err(err)),
                },
            };
            match received {
                Some(Ok(resp)) => {
                    self.received = true;
                    return Ok(Some(resp.into()));
                }
                Some(Err(err)) => {
                    if err.is_session_not_found() && !self.received {
                        self.stream = None;
                        if let Some(handle) = self.handle.take() {
                            debug!(session = %handle.name(), "session expired, retrying batch write");
                            handle.destroy();
                        }
                        continue;
                    }
                    return Err(self.fail(err));
                }
                None => {
                    self.done = true;
                    self.stream = None;
                    self.release(None);
                    return Ok(None);
                }
            }
        }
    }

    async fn open(&mut self) -> Result<BatchWriteStream> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => self.ctx.pool.take(Deadline::none()).await?,
        };
        let session = handle.session().clone();
        self.handle = Some(handle);
        let mut req = self.request.clone();
        req.session = session.name().to_string();
        session.touch();
        let resp = session
            .rpc()
            .batch_write(session.channel(), session.request(req, self.ctx.route_to_leader()))
            .await?;
        session.metrics().record_gfe_latency(resp.metadata());
        Ok(resp.into_inner())
    }

    fn fail(&mut self, err: Error) -> Error {
        self.err = Some(err.clone());
        self.stream = None;
        self.release(Some(&err));
        err
    }

    fn release(&mut self, err: Option<&Error>) {
        if let Some(handle) = self.handle.take() {
            if err.is_some_and(Error::is_session_not_found) {
                handle.destroy();
            } else {
                handle.recycle();
            }
        }
    }

    /// Stops reading results and returns the session to the pool.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.stream = None;
        self.release(None);
    }
}
