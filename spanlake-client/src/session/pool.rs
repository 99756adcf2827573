//! Session pool: hands sessions out to transactions, takes them back, and
//! keeps between `min_opened` and `max_opened` of them alive.

use std::backtrace::Backtrace;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::Code;
use tracing::{debug, info, warn};

use super::id::{HandleId, HandleIdGenerator};
use super::{maintainer, Session, SessionClient};
use crate::config::SessionPoolConfig;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::retry::Deadline;

/// Shared handle to the pool; cheap to clone.
#[derive(Clone)]
pub struct SessionPool {
    inner: Arc<PoolInner>,
}

pub(super) struct PoolInner {
    pub(super) client: SessionClient,
    pub(super) config: SessionPoolConfig,
    pub(super) metrics: Metrics,
    pub(super) shutdown: CancellationToken,
    state: Mutex<PoolState>,
    ids: HandleIdGenerator,
    drained: Notify,
}

pub(super) struct PoolState {
    /// Most recently used at the front.
    pub(super) idle: VecDeque<IdleSession>,
    /// Idle sessions carrying a prepared read-write transaction.
    pub(super) idle_write: VecDeque<IdleSession>,
    pub(super) in_use: HashMap<HandleId, Checkout>,
    /// Every live session: idle, checked out, or briefly held by the
    /// maintainer.
    pub(super) num_opened: u64,
    pub(super) closed: bool,
    waiters: VecDeque<Waiter>,
    creating: u64,
    batch_creating: u64,
    next_waiter: u64,
}

pub(super) struct IdleSession {
    pub(super) session: Arc<Session>,
    pub(super) tx_id: Option<Vec<u8>>,
    /// When a caller last returned the session. Keep-alive pings do not
    /// move it, so idle expiry still applies to pinged sessions.
    pub(super) since: Instant,
    pub(super) pinged: Instant,
}

impl IdleSession {
    pub(super) fn new(session: Arc<Session>, tx_id: Option<Vec<u8>>) -> Self {
        let now = Instant::now();
        Self {
            session,
            tx_id,
            since: now,
            pinged: now,
        }
    }

    pub(super) fn mark_pinged(self) -> Self {
        Self {
            pinged: Instant::now(),
            ..self
        }
    }

    pub(super) fn with_transaction(self, tx_id: Vec<u8>) -> Self {
        Self {
            tx_id: Some(tx_id),
            ..self
        }
    }
}

pub(super) struct Checkout {
    pub(super) session: Arc<Session>,
    pub(super) checked_out_at: Instant,
    pub(super) long_running: bool,
    pub(super) backtrace: Option<String>,
}

struct Waiter {
    id: u64,
    write: bool,
    tx: oneshot::Sender<Result<Grant>>,
}

struct Grant {
    id: HandleId,
    session: Arc<Session>,
    tx_id: Option<Vec<u8>>,
}

impl PoolState {
    pub(super) fn idle_len(&self) -> usize {
        self.idle.len() + self.idle_write.len()
    }

    fn pop_idle(&mut self, write: bool) -> Option<IdleSession> {
        if write {
            self.idle_write.pop_front().or_else(|| self.idle.pop_front())
        } else {
            self.idle.pop_front().or_else(|| self.idle_write.pop_front())
        }
    }

    /// Parks `idle` by last use, newest first. Sessions coming back from
    /// the maintainer keep their original place.
    pub(super) fn push_idle(&mut self, idle: IdleSession) {
        let list = if idle.tx_id.is_some() {
            &mut self.idle_write
        } else {
            &mut self.idle
        };
        let at = list
            .iter()
            .position(|other| other.since <= idle.since)
            .unwrap_or(list.len());
        list.insert(at, idle);
    }
}

/// Point-in-time view of the pool's bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct SessionPoolSnapshot {
    pub open: u64,
    pub idle: usize,
    pub idle_write: usize,
    pub in_use: usize,
    pub creating: u64,
    pub waiters: usize,
    pub min_opened: u64,
    pub max_opened: u64,
    pub closed: bool,
}

fn pool_closed() -> Error {
    Error::failed_precondition("invalid session pool: the pool has been closed")
}

impl SessionPool {
    /// Validates `config`, starts filling the pool up to `min_opened` in the
    /// background and spawns the maintainer. Must be called inside a tokio
    /// runtime.
    pub fn new(client: SessionClient, config: SessionPoolConfig) -> Result<Self> {
        config.validate()?;
        let metrics = client.metrics().clone();
        let inner = Arc::new(PoolInner {
            client,
            config,
            metrics,
            shutdown: CancellationToken::new(),
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                idle_write: VecDeque::new(),
                in_use: HashMap::new(),
                num_opened: 0,
                closed: false,
                waiters: VecDeque::new(),
                creating: 0,
                batch_creating: 0,
                next_waiter: 0,
            }),
            ids: HandleIdGenerator::new(),
            drained: Notify::new(),
        });
        inner.replenish();
        maintainer::spawn(&inner);
        info!(
            database = %inner.client.database(),
            min_opened = inner.config.min_opened,
            max_opened = inner.config.max_opened,
            "session pool started"
        );
        Ok(Self { inner })
    }

    pub fn config(&self) -> &SessionPoolConfig {
        &self.inner.config
    }

    pub(crate) fn client(&self) -> &SessionClient {
        &self.inner.client
    }

    /// Takes a session for reads. Waits in FIFO order behind earlier callers
    /// when none is idle.
    pub async fn take(&self, deadline: Deadline) -> Result<SessionHandle> {
        self.take_inner(deadline, false).await
    }

    /// Like [`take`](Self::take) but prefers a session that already carries
    /// a prepared read-write transaction.
    pub async fn take_write_session(&self, deadline: Deadline) -> Result<SessionHandle> {
        self.take_inner(deadline, true).await
    }

    async fn take_inner(&self, deadline: Deadline, write: bool) -> Result<SessionHandle> {
        let deadline = deadline.min(Deadline::after(self.inner.config.acquire_timeout()));
        let (mut rx, waiter_id) = {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(pool_closed());
            }
            if let Some(idle) = state.pop_idle(write) {
                let grant = self.inner.check_out(&mut state, idle, write);
                self.inner.publish_counts(&state);
                return Ok(SessionHandle::new(grant, self.inner.clone()));
            }
            let (tx, rx) = oneshot::channel();
            let id = state.next_waiter;
            state.next_waiter += 1;
            state.waiters.push_back(Waiter { id, write, tx });
            (rx, id)
        };
        self.inner.grow();

        let outcome = match deadline.remaining() {
            None => Some((&mut rx).await),
            Some(left) => tokio::time::timeout(left, &mut rx).await.ok(),
        };
        match outcome {
            Some(Ok(Ok(grant))) => Ok(SessionHandle::new(grant, self.inner.clone())),
            Some(Ok(Err(err))) => Err(err),
            Some(Err(_)) => Err(pool_closed()),
            None => {
                let err = {
                    let mut state = self.inner.lock();
                    let position = state.waiters.iter().position(|w| w.id == waiter_id);
                    match position {
                        Some(position) => {
                            state.waiters.remove(position);
                            Some(self.inner.timeout_error(&state))
                        }
                        None => None,
                    }
                };
                match err {
                    Some(err) => {
                        self.inner.metrics.record_get_session_timeout();
                        Err(err)
                    }
                    // Granted right as the timer fired.
                    None => match rx.try_recv() {
                        Ok(Ok(grant)) => Ok(SessionHandle::new(grant, self.inner.clone())),
                        Ok(Err(err)) => Err(err),
                        Err(_) => Err(pool_closed()),
                    },
                }
            }
        }
    }

    pub fn snapshot(&self) -> SessionPoolSnapshot {
        let state = self.inner.lock();
        SessionPoolSnapshot {
            open: state.num_opened,
            idle: state.idle.len(),
            idle_write: state.idle_write.len(),
            in_use: state.in_use.len(),
            creating: state.creating + state.batch_creating,
            waiters: state.waiters.len(),
            min_opened: self.inner.config.min_opened,
            max_opened: self.inner.config.max_opened,
            closed: state.closed,
        }
    }

    /// Deletes idle sessions, then waits up to `close_timeout_ms` for
    /// checked-out ones to come back before deleting them as well. Pending
    /// and later `take` calls fail.
    pub async fn close(&self) {
        let (idle, waiters) = {
            let mut guard = self.inner.lock();
            let state = &mut *guard;
            if state.closed {
                return;
            }
            state.closed = true;
            let idle: Vec<IdleSession> = state
                .idle
                .drain(..)
                .chain(state.idle_write.drain(..))
                .collect();
            state.num_opened -= idle.len() as u64;
            (idle, std::mem::take(&mut state.waiters))
        };
        drop(waiters);
        self.inner.shutdown.cancel();

        let client = &self.inner.client;
        futures::future::join_all(idle.iter().map(|idle| client.delete_session(&idle.session)))
            .await;

        let deadline = Deadline::after(Duration::from_millis(self.inner.config.close_timeout_ms));
        loop {
            let drained = self.inner.drained.notified();
            if self.inner.lock().in_use.is_empty() {
                break;
            }
            if deadline.run(async {
                drained.await;
                Ok(())
            })
            .await
            .is_err()
            {
                break;
            }
        }

        let leftover: Vec<Checkout> = {
            let mut state = self.inner.lock();
            let leftover: Vec<Checkout> = state.in_use.drain().map(|(_, c)| c).collect();
            state.num_opened -= leftover.len() as u64;
            self.inner.publish_counts(&state);
            leftover
        };
        if !leftover.is_empty() {
            warn!(
                sessions = leftover.len(),
                "closing session pool with sessions still checked out"
            );
        }
        futures::future::join_all(
            leftover
                .iter()
                .map(|checkout| client.delete_session(&checkout.session)),
        )
        .await;
        info!(database = %client.database(), "session pool closed");
    }
}

impl PoolInner {
    pub(super) fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn check_out(&self, state: &mut PoolState, idle: IdleSession, write: bool) -> Grant {
        let id = self.ids.next();
        idle.session.touch();
        let backtrace = self
            .config
            .track_session_handles
            .then(|| Backtrace::force_capture().to_string());
        state.in_use.insert(
            id,
            Checkout {
                session: idle.session.clone(),
                checked_out_at: Instant::now(),
                long_running: false,
                backtrace,
            },
        );
        self.metrics.record_session_acquired();
        Grant {
            id,
            session: idle.session,
            tx_id: if write { idle.tx_id } else { None },
        }
    }

    /// Hands `idle` to the oldest live waiter, or parks it in the idle list.
    pub(super) fn deliver(&self, state: &mut PoolState, mut idle: IdleSession) {
        while let Some(waiter) = state.waiters.pop_front() {
            let grant = self.check_out(state, idle, waiter.write);
            match waiter.tx.send(Ok(grant)) {
                Ok(()) => return,
                // The waiting future was dropped; take the session back.
                Err(Ok(grant)) => {
                    state.in_use.remove(&grant.id);
                    self.metrics.record_session_released();
                    idle = IdleSession::new(grant.session, grant.tx_id);
                }
                Err(Err(_)) => return,
            }
        }
        state.push_idle(idle);
    }

    fn timeout_error(&self, state: &PoolState) -> Error {
        if state.num_opened >= self.config.max_opened {
            Error::new(
                Code::ResourceExhausted,
                format!(
                    "No session available in the pool. Maximum number of sessions in use: {}",
                    self.config.max_opened
                ),
            )
        } else {
            Error::new(
                Code::DeadlineExceeded,
                "timeout / context deadline exceeded while waiting for a session",
            )
        }
    }

    pub(super) fn publish_counts(&self, state: &PoolState) {
        self.metrics.set_session_counts(
            state.num_opened,
            state.in_use.len() as u64,
            self.config.max_opened,
        );
    }

    /// Starts one creation per uncovered waiter, within `max_opened` and
    /// `max_burst`.
    fn grow(self: &Arc<Self>) {
        let mut started = 0;
        {
            let mut state = self.lock();
            while !state.closed
                && state.waiters.len() as u64 > state.creating
                && state.num_opened + state.creating + state.batch_creating < self.config.max_opened
                && state.creating < self.config.max_burst
            {
                state.creating += 1;
                started += 1;
            }
        }
        for _ in 0..started {
            let pool = self.clone();
            tokio::spawn(async move { pool.create_one().await });
        }
    }

    async fn create_one(self: Arc<Self>) {
        let deadline = Deadline::after(self.config.acquire_timeout());
        let result = self.client.create_session(deadline).await;
        let mut state = self.lock();
        state.creating -= 1;
        match result {
            Ok(session) if state.closed => {
                drop(state);
                self.spawn_delete(session);
            }
            Ok(session) => {
                state.num_opened += 1;
                self.deliver(&mut state, IdleSession::new(session, None));
                self.publish_counts(&state);
            }
            Err(err) => {
                warn!(error = %err, "failed to create session");
                if let Some(waiter) = state.waiters.pop_front() {
                    let _ = waiter.tx.send(Err(err));
                }
            }
        }
    }

    /// Batch-creates whatever is missing to reach `min_opened`.
    pub(super) fn replenish(self: &Arc<Self>) {
        let deficit = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            let have = state.num_opened + state.creating + state.batch_creating;
            let deficit = self
                .config
                .min_opened
                .saturating_sub(have)
                .min(self.config.max_opened.saturating_sub(have));
            state.batch_creating += deficit;
            deficit
        };
        if deficit == 0 {
            return;
        }
        debug!(sessions = deficit, "replenishing session pool");
        let pool = self.clone();
        tokio::spawn(async move {
            let deadline = Deadline::after(pool.config.acquire_timeout());
            let mut rx = pool
                .client
                .batch_create_sessions(deficit as usize, true, deadline);
            let mut outstanding = deficit;
            while let Some(item) = rx.recv().await {
                let Ok(session) = item else { continue };
                outstanding -= 1;
                let mut state = pool.lock();
                state.batch_creating -= 1;
                if state.closed {
                    drop(state);
                    pool.spawn_delete(session);
                    continue;
                }
                state.num_opened += 1;
                pool.deliver(&mut state, IdleSession::new(session, None));
                pool.publish_counts(&state);
            }
            if outstanding > 0 {
                pool.lock().batch_creating -= outstanding;
            }
        });
    }

    fn recycle(self: &Arc<Self>, id: HandleId, session: &Arc<Session>) {
        let mut state = self.lock();
        if state.in_use.remove(&id).is_none() {
            return;
        }
        self.metrics.record_session_released();
        if state.closed {
            state.num_opened -= 1;
            if state.in_use.is_empty() {
                self.drained.notify_waiters();
            }
            drop(state);
            self.spawn_delete(session.clone());
            return;
        }
        self.deliver(&mut state, IdleSession::new(session.clone(), None));
        self.publish_counts(&state);
    }

    fn destroy(self: &Arc<Self>, id: HandleId, session: &Arc<Session>) {
        {
            let mut state = self.lock();
            if state.in_use.remove(&id).is_none() {
                return;
            }
            self.metrics.record_session_released();
            state.num_opened -= 1;
            if state.closed && state.in_use.is_empty() {
                self.drained.notify_waiters();
            }
            self.publish_counts(&state);
        }
        debug!(session = %session.name(), "destroying session");
        self.spawn_delete(session.clone());
        self.grow();
        self.replenish();
    }

    /// Drops a session the maintainer already took out of the idle lists.
    pub(super) fn discard(&self, state: &mut PoolState, session: Arc<Session>) {
        state.num_opened -= 1;
        self.publish_counts(state);
        self.spawn_delete(session);
    }

    fn spawn_delete(&self, session: Arc<Session>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(session = %session.name(), "no runtime to delete session on");
            return;
        };
        let client = self.client.clone();
        runtime.spawn(async move { client.delete_session(&session).await });
    }

    fn set_long_running(&self, id: HandleId, eligible: bool) {
        if let Some(checkout) = self.lock().in_use.get_mut(&id) {
            checkout.long_running = eligible;
        }
    }
}

/// A checked-out session. Dropping the handle returns the session to the
/// pool; [`destroy`](Self::destroy) removes it instead.
pub struct SessionHandle {
    id: HandleId,
    session: Arc<Session>,
    pool: Option<Arc<PoolInner>>,
    prepared_tx: Option<Vec<u8>>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("session", &self.session.name())
            .finish()
    }
}

impl SessionHandle {
    fn new(grant: Grant, pool: Arc<PoolInner>) -> Self {
        Self {
            id: grant.id,
            session: grant.session,
            pool: Some(pool),
            prepared_tx: grant.tx_id,
        }
    }

    /// A handle over a session the pool does not own.
    pub(crate) fn detached(session: Arc<Session>) -> Self {
        Self {
            id: HandleId::new(0),
            session,
            pool: None,
            prepared_tx: None,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn name(&self) -> &str {
        self.session.name()
    }

    pub(crate) fn take_prepared_transaction(&mut self) -> Option<Vec<u8>> {
        self.prepared_tx.take()
    }

    /// Exempts this checkout from inactive transaction removal.
    pub(crate) fn set_long_running(&self, eligible: bool) {
        if let Some(pool) = &self.pool {
            pool.set_long_running(self.id, eligible);
        }
    }

    pub fn recycle(mut self) {
        if let Some(pool) = self.pool.take() {
            pool.recycle(self.id, &self.session);
        }
    }

    pub fn destroy(mut self) {
        if let Some(pool) = self.pool.take() {
            pool.destroy(self.id, &self.session);
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.recycle(self.id, &self.session);
        }
    }
}
