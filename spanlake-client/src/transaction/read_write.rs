use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;
use tonic::Code;
use tracing::{debug, instrument};

use super::{context, ClientContext, ReadContext, TxCore};
use crate::error::{Error, Result};
use crate::mutation::{mutations_to_proto, Mutation};
use crate::options::{request_options, Priority, QueryOptions, TransactionOptions};
use crate::proto::{
    self, commit_request, execute_batch_dml_request, transaction_selector::Selector,
    CommitRequest, ExecuteBatchDmlRequest, TransactionSelector,
};
use crate::retry::{is_transaction_retryable, Backoff, Deadline};
use crate::session::{Session, SessionHandle};
use crate::statement::Statement;
use crate::stream::extract_row_count;
use crate::timestamp_bound::from_timestamp;

/// Outcome of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResponse {
    pub commit_ts: DateTime<Utc>,
    /// Present when `CommitOptions::return_commit_stats` was set.
    pub commit_stats: Option<CommitStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitStats {
    pub mutation_count: i64,
}

impl CommitResponse {
    pub(crate) fn from_proto(resp: proto::CommitResponse) -> Result<Self> {
        let commit_ts = resp
            .commit_timestamp
            .as_ref()
            .and_then(from_timestamp)
            .ok_or_else(|| Error::internal("commit response carries no commit timestamp"))?;
        Ok(Self {
            commit_ts,
            commit_stats: resp.commit_stats.map(|stats| CommitStats {
                mutation_count: stats.mutation_count,
            }),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No transaction id yet; the first statement begins inline.
    Idle,
    Beginning,
    Active,
    Aborted,
    Closed,
}

struct RwState {
    phase: Phase,
    tx_id: Option<Vec<u8>>,
    session: Arc<Session>,
    handle: Option<SessionHandle>,
    mutations: Vec<Mutation>,
}

struct RwInner {
    ctx: Arc<ClientContext>,
    options: TransactionOptions,
    state: Mutex<RwState>,
    ready: Notify,
    seqno: AtomicI64,
    deadline: Deadline,
}

/// A locking read-write transaction. Handed to the callback of
/// [`Client::read_write_transaction`](crate::Client::read_write_transaction);
/// clones share the same transaction.
#[derive(Clone)]
pub struct ReadWriteTransaction {
    inner: Arc<RwInner>,
}

impl ReadContext for ReadWriteTransaction {
    fn tx_core(&self) -> Arc<dyn TxCore> {
        self.inner.clone()
    }
}

impl ReadWriteTransaction {
    fn new(
        ctx: Arc<ClientContext>,
        options: TransactionOptions,
        handle: SessionHandle,
        prepared: Option<Vec<u8>>,
        deadline: Deadline,
    ) -> Self {
        let phase = if prepared.is_some() {
            Phase::Active
        } else {
            Phase::Idle
        };
        Self {
            inner: Arc::new(RwInner {
                ctx,
                options,
                state: Mutex::new(RwState {
                    phase,
                    tx_id: prepared,
                    session: handle.session().clone(),
                    handle: Some(handle),
                    mutations: Vec::new(),
                }),
                ready: Notify::new(),
                seqno: AtomicI64::new(0),
                deadline,
            }),
        }
    }

    /// Buffers mutations; they are applied atomically at commit.
    pub fn buffer_write(&self, mutations: impl IntoIterator<Item = Mutation>) -> Result<()> {
        let mut state = self.inner.lock();
        if state.phase == Phase::Closed {
            return Err(Error::transaction_closed());
        }
        state.mutations.extend(mutations);
        Ok(())
    }

    /// Runs a DML statement and returns the number of affected rows.
    pub async fn update(&self, stmt: Statement) -> Result<i64> {
        self.update_with_options(stmt, &QueryOptions::default())
            .await
    }

    pub async fn update_with_options(&self, stmt: Statement, opts: &QueryOptions) -> Result<i64> {
        let inner = &self.inner;
        let (session, selector) = inner.acquire().await?;
        let begins = begins_inline(&selector);
        let mut req = context::build_sql_request(inner.as_ref(), &stmt, opts);
        req.transaction = Some(selector);
        let rs = match session.execute_sql(req, inner.route_to_leader()).await {
            Ok(rs) => rs,
            Err(err) if begins => {
                inner.set_transaction_id(None);
                if err.is_session_not_found() {
                    return Err(err);
                }
                return Err(Error::inline_begin_failed().with_source(err));
            }
            Err(err) => return Err(inner.update_tx_state(err)),
        };
        if begins {
            inner.take_inline_id(rs.metadata.as_ref().and_then(|m| m.transaction.as_ref()))?;
        }
        let stats = rs.stats.ok_or_else(|| {
            Error::invalid_argument(format!("query passed to update: {:?}", stmt.sql))
        })?;
        extract_row_count(&stats)
    }

    /// Runs several DML statements in one round trip. Returns the row count
    /// of each statement; on the first failing statement the error carries
    /// the counts of the statements before it.
    pub async fn batch_update(&self, stmts: Vec<Statement>) -> Result<Vec<i64>> {
        self.batch_update_with_options(stmts, &QueryOptions::default())
            .await
    }

    pub async fn batch_update_with_options(
        &self,
        stmts: Vec<Statement>,
        opts: &QueryOptions,
    ) -> Result<Vec<i64>> {
        let inner = &self.inner;
        let (session, selector) = inner.acquire().await?;
        let begins = begins_inline(&selector);
        let req = ExecuteBatchDmlRequest {
            session: String::new(),
            transaction: Some(selector),
            statements: stmts
                .iter()
                .map(|stmt| {
                    let (params, param_types) = stmt.to_params();
                    execute_batch_dml_request::Statement {
                        sql: stmt.sql.clone(),
                        params,
                        param_types,
                    }
                })
                .collect(),
            seqno: inner.next_seqno(),
            request_options: request_options(
                opts.priority,
                &opts.request_tag,
                &inner.options.transaction_tag,
            ),
        };
        let resp = match session.execute_batch_dml(req, inner.route_to_leader()).await {
            Ok(resp) => resp,
            Err(err) if begins => {
                inner.set_transaction_id(None);
                if err.is_session_not_found() {
                    return Err(err);
                }
                return Err(Error::inline_begin_failed().with_source(err));
            }
            Err(err) => return Err(inner.update_tx_state(err)),
        };
        if begins {
            let first = resp.result_sets.first();
            inner.take_inline_id(
                first
                    .and_then(|rs| rs.metadata.as_ref())
                    .and_then(|m| m.transaction.as_ref()),
            )?;
        }
        let mut counts = Vec::with_capacity(resp.result_sets.len());
        for rs in &resp.result_sets {
            let stats = rs
                .stats
                .as_ref()
                .ok_or_else(|| Error::internal("batch update result carries no stats"))?;
            counts.push(extract_row_count(stats)?);
        }
        if let Some(status) = resp.status.filter(|s| s.code != Code::Ok as i32) {
            let err = Error::new(Code::from(status.code), status.message)
                .with_additional_info(format!("row counts of succeeded statements: {counts:?}"));
            return Err(inner.update_tx_state(err));
        }
        Ok(counts)
    }

    /// Begins the transaction with an explicit RPC.
    pub(crate) async fn begin(&self) -> Result<()> {
        let inner = &self.inner;
        let session = inner.lock().session.clone();
        let opts = &inner.options;
        let begun = inner
            .deadline
            .run(session.begin_transaction(
                opts.read_write_options(),
                request_options(Priority::Unspecified, "", &opts.transaction_tag),
                inner.route_to_leader(),
            ))
            .await;
        match begun {
            Ok(tx) => {
                inner.set_transaction_id(Some(tx.id));
                Ok(())
            }
            Err(err) => Err(inner.update_tx_state(err)),
        }
    }

    fn has_id(&self) -> bool {
        self.inner.lock().tx_id.is_some()
    }

    fn is_aborted(&self) -> bool {
        self.inner.lock().phase == Phase::Aborted
    }

    pub(crate) async fn commit_inner(&self) -> Result<CommitResponse> {
        let inner = &self.inner;
        let needs_begin = {
            let state = inner.lock();
            match state.phase {
                Phase::Closed => return Err(Error::transaction_closed()),
                Phase::Aborted => {
                    return Err(Error::new(Code::Aborted, "transaction has been aborted"))
                }
                _ => state.tx_id.is_none(),
            }
        };
        if needs_begin {
            self.begin().await?;
        }
        let (session, tx_id, mutations) = {
            let mut state = inner.lock();
            let Some(tx_id) = state.tx_id.clone() else {
                return Err(Error::internal("transaction has no id to commit"));
            };
            let mutations = mutations_to_proto(&state.mutations)?;
            state.phase = Phase::Closed;
            (state.session.clone(), tx_id, mutations)
        };
        inner.ready.notify_waiters();

        let commit_options = inner.options.commit_options;
        let req = CommitRequest {
            session: String::new(),
            mutations,
            return_commit_stats: commit_options.return_commit_stats,
            request_options: inner.options.commit_request_options(),
            max_commit_delay: commit_options.max_commit_delay_proto(),
            transaction: Some(commit_request::Transaction::TransactionId(tx_id)),
        };
        let committed = inner
            .deadline
            .run(session.commit(req, inner.route_to_leader()))
            .await;
        match committed {
            Ok(resp) => CommitResponse::from_proto(resp),
            Err(err) => Err(inner.update_tx_state(err.during_commit())),
        }
    }

    /// Rolls back if a transaction was begun. Failures are only logged.
    pub(crate) async fn rollback_quiet(&self) {
        let inner = &self.inner;
        let (session, tx_id) = {
            let mut state = inner.lock();
            if state.phase == Phase::Closed {
                return;
            }
            state.phase = Phase::Closed;
            (state.session.clone(), state.tx_id.clone())
        };
        inner.ready.notify_waiters();
        let Some(tx_id) = tx_id else { return };
        if let Err(err) = session.rollback(tx_id, inner.route_to_leader()).await {
            debug!(session = %session.name(), error = %err, "rollback failed");
        }
    }

    fn take_handle(&self) -> Option<SessionHandle> {
        self.inner.lock().handle.take()
    }
}

fn begins_inline(selector: &TransactionSelector) -> bool {
    matches!(selector.selector, Some(Selector::Begin(_)))
}

impl RwInner {
    fn lock(&self) -> MutexGuard<'_, RwState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Records the id an inline begin returned, or fails the statement.
    fn take_inline_id(&self, tx: Option<&proto::Transaction>) -> Result<()> {
        match tx {
            Some(tx) if !tx.id.is_empty() => {
                self.set_transaction_id(Some(tx.id.clone()));
                Ok(())
            }
            _ => {
                self.set_transaction_id(None);
                Err(Error::inline_begin_failed())
            }
        }
    }

    fn id_selector(id: &[u8]) -> TransactionSelector {
        TransactionSelector {
            selector: Some(Selector::Id(id.to_vec())),
        }
    }
}

#[async_trait]
impl TxCore for RwInner {
    async fn acquire(&self) -> Result<(Arc<Session>, TransactionSelector)> {
        loop {
            let notified = {
                let mut state = self.lock();
                match state.phase {
                    Phase::Closed => return Err(Error::transaction_closed()),
                    Phase::Aborted => {
                        return Err(Error::new(Code::Aborted, "transaction has been aborted"))
                    }
                    Phase::Active => {
                        let Some(id) = &state.tx_id else {
                            return Err(Error::internal("transaction has no id"));
                        };
                        return Ok((state.session.clone(), Self::id_selector(id)));
                    }
                    Phase::Idle => {
                        state.phase = Phase::Beginning;
                        let selector = TransactionSelector {
                            selector: Some(Selector::Begin(self.options.read_write_options())),
                        };
                        return Ok((state.session.clone(), selector));
                    }
                    Phase::Beginning => self.ready.notified(),
                }
            };
            notified.await;
        }
    }

    fn reopen_selector(&self, initial: &TransactionSelector) -> TransactionSelector {
        if begins_inline(initial) {
            if let Some(id) = &self.lock().tx_id {
                return Self::id_selector(id);
            }
        }
        initial.clone()
    }

    fn set_transaction_id(&self, id: Option<Vec<u8>>) {
        {
            let mut state = self.lock();
            match id {
                Some(id) => {
                    state.tx_id = Some(id);
                    if matches!(state.phase, Phase::Idle | Phase::Beginning) {
                        state.phase = Phase::Active;
                    }
                }
                None if state.phase == Phase::Beginning => state.phase = Phase::Idle,
                None => {}
            }
        }
        self.ready.notify_waiters();
    }

    fn update_tx_state(&self, err: Error) -> Error {
        if err.is_aborted() {
            self.lock().phase = Phase::Aborted;
            self.ready.notify_waiters();
        }
        err
    }

    fn ctx(&self) -> &ClientContext {
        &self.ctx
    }

    fn route_to_leader(&self) -> bool {
        self.ctx.route_to_leader()
    }

    fn transaction_tag(&self) -> &str {
        &self.options.transaction_tag
    }

    fn next_seqno(&self) -> i64 {
        self.seqno.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn deadline(&self) -> Deadline {
        self.deadline
    }
}

/// A pre-begun transaction id from a prepared write session is only valid
/// for transactions with the options it was begun with.
fn usable_prepared(options: &TransactionOptions, handle: &mut SessionHandle) -> Option<Vec<u8>> {
    let prepared = handle.take_prepared_transaction()?;
    (options.read_write_options() == TransactionOptions::default().read_write_options())
        .then_some(prepared)
}

/// Runs `f` in a read-write transaction until it commits, retrying the whole
/// attempt on `Aborted`, on expired sessions and on failed inline begins.
/// Only the deadline bounds the loop.
#[instrument(skip_all, fields(tag = %options.transaction_tag))]
pub(crate) async fn run_with_retry<F, Fut>(
    ctx: &Arc<ClientContext>,
    options: TransactionOptions,
    mut f: F,
) -> Result<CommitResponse>
where
    F: FnMut(ReadWriteTransaction) -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
{
    const METHOD: &str = "ReadWriteTransaction";
    let deadline = Deadline::from_timeout(options.timeout);
    let timer = ctx.metrics.start_operation(METHOD);
    let mut backoff = Backoff::default();
    let mut reuse: Option<SessionHandle> = None;
    let mut attempt: u32 = 0;
    let result = loop {
        let started = Instant::now();
        let mut handle = match reuse.take() {
            Some(handle) => handle,
            None => match ctx.pool.take_write_session(deadline).await {
                Ok(handle) => handle,
                Err(err) => break Err(err),
            },
        };
        let prepared = usable_prepared(&options, &mut handle);
        let tx = ReadWriteTransaction::new(ctx.clone(), options.clone(), handle, prepared, deadline);

        // Retries begin explicitly so a statement failing again cannot
        // leave the attempt without a transaction.
        let begun = if attempt > 0 && !tx.has_id() {
            tx.begin().await
        } else {
            Ok(())
        };
        let outcome = match begun {
            Ok(()) => match context::scope_read_write(f(tx.clone())).await {
                Ok(()) => tx.commit_inner().await,
                Err(err) => {
                    if !is_transaction_retryable(&err) {
                        tx.rollback_quiet().await;
                    }
                    Err(err)
                }
            },
            Err(err) => Err(err),
        };
        let code = outcome.as_ref().map_or_else(Error::code, |_| Code::Ok);
        ctx.metrics.record_attempt(METHOD, code, started.elapsed());

        let handle = tx.take_handle();
        attempt += 1;
        match outcome {
            Ok(resp) => break Ok(resp),
            Err(err) if err.is_session_not_found() => {
                if let Some(handle) = handle {
                    handle.destroy();
                }
                if deadline.is_expired() {
                    break Err(err);
                }
                debug!(attempt, "session expired, retrying transaction on a new session");
            }
            Err(err) if err.is_inline_begin_failed() => {
                debug!(attempt, "inline begin failed, retrying with explicit begin");
                reuse = handle;
            }
            Err(err) if err.is_aborted() => {
                reuse = handle;
                let delay = backoff.delay_for(&err);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "transaction aborted, retrying");
                if let Err(err) = deadline.sleep(delay, Some(&err)).await {
                    break Err(err);
                }
            }
            Err(err) => break Err(err),
        }
    };
    timer.finish(result.as_ref().map_or_else(Error::code, |_| Code::Ok));
    result
}

/// A read-write transaction driven by the caller: begin, statements, then
/// [`commit`](Self::commit) or [`rollback`](Self::rollback). Nothing is
/// retried; after an `Aborted` commit call
/// [`reset_for_retry`](Self::reset_for_retry) and replay the statements.
pub struct ReadWriteStmtBasedTransaction {
    tx: ReadWriteTransaction,
}

impl Deref for ReadWriteStmtBasedTransaction {
    type Target = ReadWriteTransaction;

    fn deref(&self) -> &ReadWriteTransaction {
        &self.tx
    }
}

impl ReadWriteStmtBasedTransaction {
    #[instrument(skip_all)]
    pub(crate) async fn begin(ctx: Arc<ClientContext>, options: TransactionOptions) -> Result<Self> {
        let deadline = Deadline::from_timeout(options.timeout);
        let handle = ctx.pool.take_write_session(deadline).await?;
        Self::begin_on(ctx, options, handle, deadline).await
    }

    async fn begin_on(
        ctx: Arc<ClientContext>,
        options: TransactionOptions,
        mut handle: SessionHandle,
        deadline: Deadline,
    ) -> Result<Self> {
        loop {
            let prepared = usable_prepared(&options, &mut handle);
            let tx = ReadWriteTransaction::new(ctx.clone(), options.clone(), handle, prepared, deadline);
            if tx.has_id() {
                return Ok(Self { tx });
            }
            match tx.begin().await {
                Ok(()) => return Ok(Self { tx }),
                Err(err) if err.is_session_not_found() => {
                    if let Some(expired) = tx.take_handle() {
                        expired.destroy();
                    }
                    handle = ctx.pool.take_write_session(deadline).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Commits the buffered mutations. Errors other than `Aborted` roll the
    /// transaction back; the session goes back to the pool unless the
    /// transaction aborted, in which case it is kept for
    /// [`reset_for_retry`](Self::reset_for_retry).
    pub async fn commit(&mut self) -> Result<CommitResponse> {
        let result = self.tx.commit_inner().await;
        match &result {
            Err(err) if err.is_aborted() => {}
            Err(err) => {
                self.tx.rollback_quiet().await;
                self.release(Some(err));
            }
            Ok(_) => self.release(None),
        }
        result
    }

    pub async fn rollback(&mut self) {
        self.tx.rollback_quiet().await;
        self.release(None);
    }

    /// Starts a new transaction on the same session after this one aborted.
    pub async fn reset_for_retry(&mut self) -> Result<()> {
        if !self.tx.is_aborted() {
            return Err(Error::failed_precondition(
                "reset_for_retry should only be called on an active transaction that was aborted",
            ));
        }
        let ctx = self.tx.inner.ctx.clone();
        let options = self.tx.inner.options.clone();
        let deadline = self.tx.inner.deadline;
        let handle = match self.tx.take_handle() {
            Some(handle) => handle,
            None => ctx.pool.take_write_session(deadline).await?,
        };
        *self = Self::begin_on(ctx, options, handle, deadline).await?;
        Ok(())
    }

    fn release(&self, err: Option<&Error>) {
        if let Some(handle) = self.tx.take_handle() {
            if err.is_some_and(Error::is_session_not_found) {
                handle.destroy();
            } else {
                handle.recycle();
            }
        }
    }
}
