use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::options::{request_options, QueryOptions, ReadOptions};
use crate::proto::{ExecuteSqlRequest, ReadRequest, TransactionSelector};
use crate::retry::Deadline;
use crate::session::{Session, SessionPool};
use crate::statement::Statement;

/// State shared by every transaction a client creates.
#[doc(hidden)]
pub struct ClientContext {
    pub(crate) pool: SessionPool,
    /// Defaults from the client configuration.
    pub(crate) query_options: QueryOptions,
    pub(crate) disable_route_to_leader: bool,
    pub(crate) metrics: Metrics,
}

impl ClientContext {
    pub(crate) fn route_to_leader(&self) -> bool {
        !self.disable_route_to_leader
    }
}

/// What the read surface and result streams need from a transaction.
#[async_trait]
pub trait TxCore: Send + Sync {
    /// The session to run the next read on and the selector naming the
    /// transaction. May wait for a concurrent begin to finish.
    async fn acquire(&self) -> Result<(Arc<Session>, TransactionSelector)>;

    /// Selector for reopening a stream first opened with `initial`; inline
    /// begins switch to the id they produced.
    fn reopen_selector(&self, initial: &TransactionSelector) -> TransactionSelector {
        initial.clone()
    }

    /// Outcome of an inline begin; `None` means it failed.
    fn set_transaction_id(&self, _id: Option<Vec<u8>>) {}

    fn set_timestamp(&self, _ts: DateTime<Utc>) {}

    /// Lets the transaction observe an error before it is returned.
    fn update_tx_state(&self, err: Error) -> Error {
        err
    }

    /// Called once per finished stream.
    fn release(&self, _err: Option<&Error>) {}

    fn can_replace_session(&self) -> bool {
        false
    }

    async fn replace_session(&self) -> Result<Arc<Session>> {
        Err(Error::failed_precondition(
            "this transaction cannot switch sessions",
        ))
    }

    fn ctx(&self) -> &ClientContext;

    fn route_to_leader(&self) -> bool {
        false
    }

    fn transaction_tag(&self) -> &str {
        ""
    }

    /// Sequence number for DML and SQL requests; zero when unused.
    fn next_seqno(&self) -> i64 {
        0
    }

    fn deadline(&self) -> Deadline {
        Deadline::none()
    }
}

tokio::task_local! {
    static IN_READ_WRITE: ();
}

pub(crate) fn in_read_write() -> bool {
    IN_READ_WRITE.try_with(|_| ()).is_ok()
}

/// Runs `fut` marked as the body of a read-write transaction.
pub(crate) async fn scope_read_write<F: Future>(fut: F) -> F::Output {
    IN_READ_WRITE.scope((), fut).await
}

pub(crate) fn build_read_request(
    core: &dyn TxCore,
    table: &str,
    keys: crate::proto::KeySet,
    columns: &[&str],
    opts: &ReadOptions,
) -> ReadRequest {
    ReadRequest {
        table: table.to_string(),
        index: opts.index.clone().unwrap_or_default(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        key_set: Some(keys),
        limit: opts.limit,
        request_options: request_options(opts.priority, &opts.request_tag, core.transaction_tag()),
        data_boost_enabled: opts.data_boost_enabled,
        ..Default::default()
    }
}

pub(crate) fn build_sql_request(
    core: &dyn TxCore,
    stmt: &Statement,
    opts: &QueryOptions,
) -> ExecuteSqlRequest {
    let (params, param_types) = stmt.to_params();
    let optimizer = opts.optimizer.or(&core.ctx().query_options.optimizer);
    ExecuteSqlRequest {
        sql: stmt.sql.clone(),
        params,
        param_types,
        query_mode: opts.mode.to_proto(),
        seqno: core.next_seqno(),
        query_options: optimizer.to_proto(),
        request_options: request_options(opts.priority, &opts.request_tag, core.transaction_tag()),
        data_boost_enabled: opts.data_boost_enabled,
        ..Default::default()
    }
}
