use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::debug;

use super::{ClientContext, ReadContext, TxCore};
use crate::error::{Error, Result};
use crate::proto::{self, transaction_selector::Selector, TransactionSelector};
use crate::retry::Deadline;
use crate::session::{Session, SessionHandle};
use crate::timestamp_bound::{from_timestamp, TimestampBound};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    New,
    /// A `BeginTransaction` is in flight; other readers wait for it.
    Init,
    Active,
    Closed,
}

struct RoState {
    phase: Phase,
    bound: TimestampBound,
    timeout: Option<Duration>,
    tx_id: Option<Vec<u8>>,
    read_ts: Option<DateTime<Utc>>,
    session: Option<Arc<Session>>,
    handle: Option<SessionHandle>,
}

struct RoInner {
    ctx: Arc<ClientContext>,
    single_use: bool,
    state: Mutex<RoState>,
    ready: Notify,
}

/// A snapshot read. Single-use transactions allow exactly one read or query
/// and pick their snapshot per request; multi-use ones begin a transaction
/// on the first read and share its timestamp across every later read,
/// including concurrent ones.
#[derive(Clone)]
pub struct ReadOnlyTransaction {
    inner: Arc<RoInner>,
}

impl ReadOnlyTransaction {
    pub(crate) fn new(ctx: Arc<ClientContext>, single_use: bool) -> Self {
        Self {
            inner: Arc::new(RoInner {
                ctx,
                single_use,
                state: Mutex::new(RoState {
                    phase: Phase::New,
                    bound: TimestampBound::Strong,
                    timeout: None,
                    tx_id: None,
                    read_ts: None,
                    session: None,
                    handle: None,
                }),
                ready: Notify::new(),
            }),
        }
    }

    /// Picks the snapshot. Only takes effect before the first read.
    pub fn with_timestamp_bound(self, bound: TimestampBound) -> Self {
        {
            let mut state = self.inner.lock();
            if state.phase == Phase::New {
                state.bound = bound;
            }
        }
        self
    }

    /// Bounds how long each read or query keeps retrying transient stream
    /// failures. Without it a read retries until its future is dropped.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.inner.lock().timeout = Some(timeout);
        self
    }

    /// Timestamp the reads observed. Available once the first read returned
    /// its metadata (single-use) or the begin completed (multi-use).
    pub fn timestamp(&self) -> Result<DateTime<Utc>> {
        self.inner
            .lock()
            .read_ts
            .ok_or_else(|| Error::internal("read timestamp is unavailable"))
    }

    /// Returns the session to the pool. Reads after this fail.
    pub fn close(&self) {
        let handle = {
            let mut state = self.inner.lock();
            state.phase = Phase::Closed;
            state.handle.take()
        };
        self.inner.ready.notify_waiters();
        if let Some(handle) = handle {
            handle.recycle();
        }
    }
}

impl ReadContext for ReadOnlyTransaction {
    fn tx_core(&self) -> Arc<dyn TxCore> {
        self.inner.clone()
    }
}

impl RoInner {
    fn lock(&self) -> MutexGuard<'_, RoState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn acquire_single_use(&self) -> Result<(Arc<Session>, TransactionSelector)> {
        let bound = {
            let mut state = self.lock();
            if state.phase != Phase::New {
                return Err(Error::transaction_closed());
            }
            state.phase = Phase::Closed;
            state.bound
        };
        let handle = self.ctx.pool.take(Deadline::none()).await?;
        let session = handle.session().clone();
        {
            let mut state = self.lock();
            state.session = Some(session.clone());
            state.handle = Some(handle);
        }
        let selector = TransactionSelector {
            selector: Some(Selector::SingleUse(bound.to_read_only_options())),
        };
        Ok((session, selector))
    }

    async fn acquire_multi_use(&self) -> Result<(Arc<Session>, TransactionSelector)> {
        let bound = loop {
            let notified = {
                let mut state = self.lock();
                match state.phase {
                    Phase::Closed => return Err(Error::transaction_closed()),
                    Phase::Active => return self.active_selector(&state),
                    Phase::New => {
                        state.bound.check_multi_use()?;
                        state.phase = Phase::Init;
                        break state.bound;
                    }
                    Phase::Init => self.ready.notified(),
                }
            };
            notified.await;
        };

        let begun = self.begin(bound).await;
        let mut state = self.lock();
        let outcome = match begun {
            Ok((handle, _)) if state.phase == Phase::Closed => {
                drop(state);
                debug!(session = %handle.name(), "transaction closed while it was beginning");
                handle.recycle();
                self.ready.notify_waiters();
                return Err(Error::transaction_closed());
            }
            Ok((handle, tx)) => {
                state.tx_id = Some(tx.id);
                state.read_ts = tx.read_timestamp.as_ref().and_then(from_timestamp);
                state.session = Some(handle.session().clone());
                state.handle = Some(handle);
                state.phase = Phase::Active;
                self.active_selector(&state)
            }
            Err(err) => {
                if state.phase == Phase::Init {
                    state.phase = Phase::New;
                }
                Err(err)
            }
        };
        drop(state);
        self.ready.notify_waiters();
        outcome
    }

    async fn begin(&self, bound: TimestampBound) -> Result<(SessionHandle, proto::Transaction)> {
        let mut handle = self.ctx.pool.take(Deadline::none()).await?;
        loop {
            let begun = handle
                .session()
                .begin_transaction(bound.to_read_only_options(), None, false)
                .await;
            match begun {
                Ok(tx) => return Ok((handle, tx)),
                Err(err) if err.is_session_not_found() => {
                    debug!(session = %handle.name(), "session expired before begin, retrying");
                    handle.destroy();
                    handle = self.ctx.pool.take(Deadline::none()).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn active_selector(&self, state: &RoState) -> Result<(Arc<Session>, TransactionSelector)> {
        match (&state.session, &state.tx_id) {
            (Some(session), Some(id)) => Ok((
                session.clone(),
                TransactionSelector {
                    selector: Some(Selector::Id(id.clone())),
                },
            )),
            _ => Err(Error::internal("read-only transaction has no transaction id")),
        }
    }
}

#[async_trait]
impl TxCore for RoInner {
    async fn acquire(&self) -> Result<(Arc<Session>, TransactionSelector)> {
        if self.single_use {
            self.acquire_single_use().await
        } else {
            self.acquire_multi_use().await
        }
    }

    fn set_timestamp(&self, ts: DateTime<Utc>) {
        let mut state = self.lock();
        if state.read_ts.is_none() {
            state.read_ts = Some(ts);
        }
    }

    fn release(&self, err: Option<&Error>) {
        let expired = err.is_some_and(Error::is_session_not_found);
        let handle = {
            let mut state = self.lock();
            if self.single_use || expired {
                state.handle.take()
            } else {
                None
            }
        };
        match handle {
            Some(handle) if expired => handle.destroy(),
            Some(handle) => handle.recycle(),
            None => {}
        }
    }

    fn can_replace_session(&self) -> bool {
        self.single_use
    }

    fn deadline(&self) -> Deadline {
        Deadline::from_timeout(self.lock().timeout)
    }

    async fn replace_session(&self) -> Result<Arc<Session>> {
        let old = self.lock().handle.take();
        if let Some(old) = old {
            debug!(session = %old.name(), "replacing expired session");
            old.destroy();
        }
        let handle = self.ctx.pool.take(Deadline::none()).await?;
        let session = handle.session().clone();
        let mut state = self.lock();
        state.session = Some(session.clone());
        state.handle = Some(handle);
        Ok(session)
    }

    fn ctx(&self) -> &ClientContext {
        &self.ctx
    }
}
