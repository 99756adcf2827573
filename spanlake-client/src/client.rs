use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::ClientConfig;
use crate::database::DatabaseName;
use crate::error::{Error, Result};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::mutation::{Mutation, MutationGroup};
use crate::options::{ApplyOptions, BatchWriteOptions, PartitionedUpdateOptions, TransactionOptions};
use crate::session::id::next_client_id;
use crate::session::{SessionClient, SessionPool};
use crate::statement::Statement;
use crate::timestamp_bound::TimestampBound;
use crate::transaction::{
    in_read_write, pdml, read_write, write_only, BatchReadOnlyTransaction,
    BatchReadOnlyTransactionId, BatchWriteResponseIterator, ClientContext, CommitResponse,
    ReadOnlyTransaction, ReadWriteStmtBasedTransaction, ReadWriteTransaction,
};
use crate::transport::{GrpcTransport, SpannerRpc};

/// Entry point for reading and writing one database.
///
/// A client owns a session pool; clones share it. Call [`close`](Self::close)
/// before dropping the last clone so pooled sessions are deleted on the
/// server instead of expiring there.
///
/// ```rust,ignore
/// use spanlake_client::{Client, ReadContext, Statement};
///
/// let client = Client::new("projects/p/instances/i/databases/d").await?;
/// let mut rows = client.single().query(Statement::new("SELECT 1"));
/// while let Some(row) = rows.next().await? {
///     let one: i64 = row.column(0)?;
/// }
/// client.close().await;
/// # Ok::<(), spanlake_client::Error>(())
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    database: DatabaseName,
    client_id: String,
    config: ClientConfig,
    ctx: Arc<ClientContext>,
}

impl Client {
    /// Connects with the configuration loaded from the environment.
    pub async fn new(database: &str) -> Result<Self> {
        let config =
            ClientConfig::load().map_err(|err| Error::invalid_argument(format!("{err:#}")))?;
        Self::with_config(database, config).await
    }

    pub async fn with_config(database: &str, config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let name = DatabaseName::parse(database)?;
        let transport = GrpcTransport::connect(&config, &name).await?;
        Self::with_transport(database, config, Arc::new(transport))
    }

    /// Builds a client on top of an existing transport. Must be called
    /// inside a tokio runtime: the session pool starts filling right away.
    pub fn with_transport(
        database: &str,
        config: ClientConfig,
        rpc: Arc<dyn SpannerRpc>,
    ) -> Result<Self> {
        config.validate()?;
        let name = DatabaseName::parse(database)?;
        let path = name.to_string();
        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| next_client_id(&path));
        let metrics = if config.enable_metrics {
            Metrics::new(&path, &client_id, 0)
        } else {
            Metrics::noop()
        };
        let sessions = SessionClient::new(
            rpc,
            path.clone(),
            config.session_labels.clone(),
            config.database_role.clone(),
            config.disable_route_to_leader,
            metrics.clone(),
        );
        let pool = SessionPool::new(sessions, config.session_pool.clone())?;
        let ctx = Arc::new(ClientContext {
            pool,
            query_options: config.query_options(),
            disable_route_to_leader: config.disable_route_to_leader,
            metrics,
        });
        info!(database = %path, client_id = %client_id, "client created");
        Ok(Self {
            inner: Arc::new(ClientInner {
                database: name,
                client_id,
                config,
                ctx,
            }),
        })
    }

    pub fn database(&self) -> &DatabaseName {
        &self.inner.database
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> &SessionPool {
        &self.inner.ctx.pool
    }

    /// `None` when metrics are disabled.
    pub fn metrics_snapshot(&self) -> Option<MetricsSnapshot> {
        self.inner.ctx.metrics.snapshot()
    }

    /// A read-only transaction good for exactly one read or query.
    pub fn single(&self) -> ReadOnlyTransaction {
        ReadOnlyTransaction::new(self.inner.ctx.clone(), true)
    }

    /// A read-only transaction whose reads share one snapshot. Call
    /// [`ReadOnlyTransaction::close`] when done with it.
    pub fn read_only_transaction(&self) -> ReadOnlyTransaction {
        ReadOnlyTransaction::new(self.inner.ctx.clone(), false)
    }

    /// Begins a read-only transaction whose reads can be partitioned and run
    /// from several processes.
    pub async fn batch_read_only_transaction(
        &self,
        bound: TimestampBound,
    ) -> Result<BatchReadOnlyTransaction> {
        BatchReadOnlyTransaction::begin(self.inner.ctx.clone(), bound).await
    }

    /// Joins a batch transaction begun elsewhere.
    pub fn batch_read_only_transaction_from_id(
        &self,
        id: BatchReadOnlyTransactionId,
    ) -> BatchReadOnlyTransaction {
        BatchReadOnlyTransaction::from_id(self.inner.ctx.clone(), id)
    }

    /// Runs `f` in a read-write transaction and commits it, calling `f`
    /// again whenever the transaction aborts. `f` must be safe to repeat.
    pub async fn read_write_transaction<F, Fut>(&self, f: F) -> Result<DateTime<Utc>>
    where
        F: FnMut(ReadWriteTransaction) -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        self.read_write_transaction_with_options(TransactionOptions::default(), f)
            .await
            .map(|resp| resp.commit_ts)
    }

    pub async fn read_write_transaction_with_options<F, Fut>(
        &self,
        options: TransactionOptions,
        f: F,
    ) -> Result<CommitResponse>
    where
        F: FnMut(ReadWriteTransaction) -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        if in_read_write() {
            return Err(Error::nested_transaction());
        }
        read_write::run_with_retry(&self.inner.ctx, options, f).await
    }

    /// Begins a read-write transaction the caller commits or rolls back
    /// itself. Nothing is retried automatically.
    pub async fn begin_read_write_transaction(
        &self,
        options: TransactionOptions,
    ) -> Result<ReadWriteStmtBasedTransaction> {
        ReadWriteStmtBasedTransaction::begin(self.inner.ctx.clone(), options).await
    }

    /// Runs a partitioned DML statement and returns a lower bound of the
    /// number of rows it modified.
    pub async fn partitioned_update(&self, stmt: Statement) -> Result<i64> {
        self.partitioned_update_with_options(stmt, PartitionedUpdateOptions::default())
            .await
    }

    pub async fn partitioned_update_with_options(
        &self,
        stmt: Statement,
        options: PartitionedUpdateOptions,
    ) -> Result<i64> {
        pdml::partitioned_update(&self.inner.ctx, stmt, options).await
    }

    /// Applies `mutations` atomically. With [`ApplyOptions::at_least_once`]
    /// they are committed in a single-use transaction that may apply them
    /// more than once.
    pub async fn apply(
        &self,
        mutations: Vec<Mutation>,
        options: ApplyOptions,
    ) -> Result<CommitResponse> {
        if options.at_least_once {
            return write_only::apply_at_least_once(&self.inner.ctx, &mutations, &options).await;
        }
        if in_read_write() {
            return Err(Error::nested_transaction());
        }
        read_write::run_with_retry(&self.inner.ctx, options.transaction_options(), move |tx| {
            let mutations = mutations.clone();
            async move { tx.buffer_write(mutations) }
        })
        .await
    }

    /// Applies mutation groups non-atomically; each group commits on its
    /// own and results arrive as a stream.
    pub fn batch_write(
        &self,
        groups: &[MutationGroup],
        options: &BatchWriteOptions,
    ) -> BatchWriteResponseIterator {
        BatchWriteResponseIterator::new(self.inner.ctx.clone(), groups, options)
    }

    /// Closes the session pool, deleting its sessions. Transactions still
    /// running fail with `FailedPrecondition` on their next session request.
    pub async fn close(&self) {
        info!(database = %self.inner.database, "closing client");
        self.inner.ctx.pool.close().await;
    }
}
