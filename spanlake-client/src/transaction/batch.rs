//! Batch read-only transactions: one snapshot on a dedicated session, split
//! into partitions that can run anywhere, including other processes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prost::Message;
use tracing::{debug, instrument};

use super::{context, ClientContext, ReadContext, TxCore};
use crate::error::{Error, Result};
use crate::key::KeySet;
use crate::options::{PartitionOptions, QueryOptions, ReadOptions};
use crate::proto::{
    transaction_selector::Selector, ExecuteSqlRequest, PartitionQueryRequest,
    PartitionReadRequest, PartitionResponse, ReadRequest, TransactionSelector,
};
use crate::retry::{retry_transient, Deadline};
use crate::session::Session;
use crate::statement::Statement;
use crate::stream::{RowIterator, StreamRequest};
use crate::timestamp_bound::{from_timestamp, to_timestamp, TimestampBound};

const ENVELOPE_VERSION: u32 = 1;

/// Everything needed to rebuild a batch transaction in another process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReadOnlyTransactionId {
    pub transaction_id: Vec<u8>,
    pub session_name: String,
    pub read_timestamp: DateTime<Utc>,
}

#[derive(Clone, PartialEq, Message)]
struct IdEnvelope {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(bytes = "vec", tag = "2")]
    transaction_id: Vec<u8>,
    #[prost(string, tag = "3")]
    session_name: String,
    #[prost(message, optional, tag = "4")]
    read_timestamp: Option<prost_types::Timestamp>,
}

impl BatchReadOnlyTransactionId {
    pub fn serialize(&self) -> Vec<u8> {
        IdEnvelope {
            version: ENVELOPE_VERSION,
            transaction_id: self.transaction_id.clone(),
            session_name: self.session_name.clone(),
            read_timestamp: Some(to_timestamp(self.read_timestamp)),
        }
        .encode_to_vec()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let envelope = IdEnvelope::decode(data).map_err(|err| {
            Error::invalid_argument(format!("malformed batch transaction id: {err}"))
        })?;
        check_version(envelope.version)?;
        let read_timestamp = envelope
            .read_timestamp
            .as_ref()
            .and_then(from_timestamp)
            .ok_or_else(|| Error::invalid_argument("batch transaction id has no read timestamp"))?;
        Ok(Self {
            transaction_id: envelope.transaction_id,
            session_name: envelope.session_name,
            read_timestamp,
        })
    }
}

fn check_version(version: u32) -> Result<()> {
    if version != ENVELOPE_VERSION {
        return Err(Error::invalid_argument(format!(
            "unsupported serialization version {version}"
        )));
    }
    Ok(())
}

/// One shard of a partitioned read or query. Opaque; serialize it to hand
/// it to another worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    token: Vec<u8>,
    request: PartitionedRequest,
}

#[derive(Debug, Clone, PartialEq)]
enum PartitionedRequest {
    Read(ReadRequest),
    Query(ExecuteSqlRequest),
}

#[derive(Clone, PartialEq, Message)]
struct PartitionEnvelope {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(bytes = "vec", tag = "2")]
    token: Vec<u8>,
    #[prost(oneof = "envelope::Request", tags = "3, 4")]
    request: Option<envelope::Request>,
}

mod envelope {
    use crate::proto::{ExecuteSqlRequest, ReadRequest};

    #[derive(Clone, PartialEq, prost::Oneof)]
    pub(super) enum Request {
        #[prost(message, tag = "3")]
        Read(ReadRequest),
        #[prost(message, tag = "4")]
        Query(ExecuteSqlRequest),
    }
}

impl Partition {
    pub fn token(&self) -> &[u8] {
        &self.token
    }

    pub fn is_query(&self) -> bool {
        matches!(self.request, PartitionedRequest::Query(_))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let request = match &self.request {
            PartitionedRequest::Read(req) => envelope::Request::Read(req.clone()),
            PartitionedRequest::Query(req) => envelope::Request::Query(req.clone()),
        };
        PartitionEnvelope {
            version: ENVELOPE_VERSION,
            token: self.token.clone(),
            request: Some(request),
        }
        .encode_to_vec()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let envelope = PartitionEnvelope::decode(data)
            .map_err(|err| Error::invalid_argument(format!("malformed partition: {err}")))?;
        check_version(envelope.version)?;
        let request = match envelope.request {
            Some(envelope::Request::Read(req)) => PartitionedRequest::Read(req),
            Some(envelope::Request::Query(req)) => PartitionedRequest::Query(req),
            None => return Err(Error::invalid_argument("partition carries no request")),
        };
        Ok(Self {
            token: envelope.token,
            request,
        })
    }
}

struct BatchInner {
    ctx: Arc<ClientContext>,
    id: BatchReadOnlyTransactionId,
    session: Arc<Session>,
    closed: AtomicBool,
}

/// A read-only snapshot on a session of its own, so that its id can be
/// shipped to other processes.
#[derive(Clone)]
pub struct BatchReadOnlyTransaction {
    inner: Arc<BatchInner>,
}

impl ReadContext for BatchReadOnlyTransaction {
    fn tx_core(&self) -> Arc<dyn TxCore> {
        self.inner.clone()
    }
}

impl BatchReadOnlyTransaction {
    #[instrument(skip(ctx))]
    pub(crate) async fn begin(ctx: Arc<ClientContext>, bound: TimestampBound) -> Result<Self> {
        bound.check_multi_use()?;
        let client = ctx.pool.client();
        let session = client.create_session(Deadline::none()).await?;
        let begun = session
            .begin_transaction(bound.to_read_only_options(), None, ctx.route_to_leader())
            .await
            .and_then(|tx| {
                let read_timestamp = tx
                    .read_timestamp
                    .as_ref()
                    .and_then(from_timestamp)
                    .ok_or_else(|| Error::internal("read timestamp is unavailable"))?;
                Ok((tx.id, read_timestamp))
            });
        let (transaction_id, read_timestamp) = match begun {
            Ok(begun) => begun,
            Err(err) => {
                client.delete_session(&session).await;
                return Err(err);
            }
        };
        let id = BatchReadOnlyTransactionId {
            transaction_id,
            session_name: session.name().to_string(),
            read_timestamp,
        };
        Ok(Self::with_session(ctx, id, session))
    }

    /// Attaches to a transaction begun elsewhere.
    pub(crate) fn from_id(ctx: Arc<ClientContext>, id: BatchReadOnlyTransactionId) -> Self {
        let session = ctx.pool.client().session_with_id(id.session_name.clone());
        Self::with_session(ctx, id, session)
    }

    fn with_session(
        ctx: Arc<ClientContext>,
        id: BatchReadOnlyTransactionId,
        session: Arc<Session>,
    ) -> Self {
        Self {
            inner: Arc::new(BatchInner {
                ctx,
                id,
                session,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &BatchReadOnlyTransactionId {
        &self.inner.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.inner.id.read_timestamp
    }

    pub async fn partition_read(
        &self,
        table: &str,
        keys: KeySet,
        columns: &[&str],
        opts: PartitionOptions,
    ) -> Result<Vec<Partition>> {
        self.partition_read_with_options(table, keys, columns, opts, &ReadOptions::default())
            .await
    }

    pub async fn partition_read_using_index(
        &self,
        table: &str,
        index: &str,
        keys: KeySet,
        columns: &[&str],
        opts: PartitionOptions,
    ) -> Result<Vec<Partition>> {
        self.partition_read_with_options(table, keys, columns, opts, &ReadOptions::using_index(index))
            .await
    }

    /// Splits a read into partitions. `read_opts` are carried into every
    /// partition; the row limit does not apply to partitioned reads.
    pub async fn partition_read_with_options(
        &self,
        table: &str,
        keys: KeySet,
        columns: &[&str],
        opts: PartitionOptions,
        read_opts: &ReadOptions,
    ) -> Result<Vec<Partition>> {
        let (session, selector) = self.inner.acquire().await?;
        let mut template =
            context::build_read_request(self.inner.as_ref(), table, keys.to_proto()?, columns, read_opts);
        template.limit = 0;
        template.session = session.name().to_string();
        template.transaction = Some(selector.clone());
        let req = PartitionReadRequest {
            session: session.name().to_string(),
            transaction: Some(selector),
            table: template.table.clone(),
            index: template.index.clone(),
            columns: template.columns.clone(),
            key_set: template.key_set.clone(),
            partition_options: Some(opts.to_proto()),
        };
        let session = &session;
        let resp = retry_transient(Deadline::none(), || {
            let req = session.request(req.clone(), false);
            async move {
                let resp = session.rpc().partition_read(session.channel(), req).await?;
                session.metrics().record_gfe_latency(resp.metadata());
                Ok(resp.into_inner())
            }
        })
        .await?;
        Ok(partitions(resp, |token| {
            let mut req = template.clone();
            req.partition_token = token.to_vec();
            PartitionedRequest::Read(req)
        }))
    }

    pub async fn partition_query(
        &self,
        stmt: Statement,
        opts: PartitionOptions,
    ) -> Result<Vec<Partition>> {
        self.partition_query_with_options(stmt, opts, &QueryOptions::default())
            .await
    }

    pub async fn partition_query_with_options(
        &self,
        stmt: Statement,
        opts: PartitionOptions,
        query_opts: &QueryOptions,
    ) -> Result<Vec<Partition>> {
        let (session, selector) = self.inner.acquire().await?;
        let mut template = context::build_sql_request(self.inner.as_ref(), &stmt, query_opts);
        template.session = session.name().to_string();
        template.transaction = Some(selector.clone());
        let req = PartitionQueryRequest {
            session: session.name().to_string(),
            transaction: Some(selector),
            sql: template.sql.clone(),
            params: template.params.clone(),
            param_types: template.param_types.clone(),
            partition_options: Some(opts.to_proto()),
        };
        let session = &session;
        let resp = retry_transient(Deadline::none(), || {
            let req = session.request(req.clone(), false);
            async move {
                let resp = session.rpc().partition_query(session.channel(), req).await?;
                session.metrics().record_gfe_latency(resp.metadata());
                Ok(resp.into_inner())
            }
        })
        .await?;
        Ok(partitions(resp, |token| {
            let mut req = template.clone();
            req.partition_token = token.to_vec();
            PartitionedRequest::Query(req)
        }))
    }

    /// Runs one partition. Partitions of any transaction with the same id
    /// can be executed here.
    pub fn execute(&self, partition: &Partition) -> RowIterator {
        let request = match &partition.request {
            PartitionedRequest::Read(req) => StreamRequest::Read(req.clone()),
            PartitionedRequest::Query(req) => StreamRequest::Sql(req.clone()),
        };
        RowIterator::new(self.inner.clone(), request)
    }

    /// Marks the transaction unusable locally. The server session stays
    /// alive until [`cleanup`](Self::cleanup) or its expiry.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Closes the transaction and deletes its session. Call it from exactly
    /// one of the processes sharing the transaction, once all are done.
    pub async fn cleanup(&self) {
        self.close();
        debug!(session = %self.inner.session.name(), "cleaning up batch transaction");
        self.inner
            .ctx
            .pool
            .client()
            .delete_session(&self.inner.session)
            .await;
    }
}

fn partitions(
    resp: PartitionResponse,
    build: impl Fn(&[u8]) -> PartitionedRequest,
) -> Vec<Partition> {
    resp.partitions
        .into_iter()
        .map(|p| Partition {
            request: build(&p.partition_token),
            token: p.partition_token,
        })
        .collect()
}

#[async_trait]
impl TxCore for BatchInner {
    async fn acquire(&self) -> Result<(Arc<Session>, TransactionSelector)> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::transaction_closed());
        }
        Ok((
            self.session.clone(),
            TransactionSelector {
                selector: Some(Selector::Id(self.id.transaction_id.clone())),
            },
        ))
    }

    fn ctx(&self) -> &ClientContext {
        &self.ctx
    }
}
