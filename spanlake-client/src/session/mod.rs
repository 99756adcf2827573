//! Sessions, the session client that creates them and the pool that caches
//! them.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tonic::metadata::MetadataMap;
use tonic::Request;

use crate::error::Result;
use crate::metrics::Metrics;
use crate::proto::{
    self, BeginTransactionRequest, CommitRequest, CommitResponse, ExecuteBatchDmlRequest,
    ExecuteBatchDmlResponse, ExecuteSqlRequest, ResultSet, RollbackRequest,
};
use crate::transport::{self, SpannerRpc};

pub mod client;
pub mod id;
mod maintainer;
pub mod pool;

pub use client::{BatchCreateError, SessionClient};
pub use id::{HandleId, HandleIdGenerator};
pub use pool::{SessionHandle, SessionPool, SessionPoolSnapshot};

/// A server side session. Every RPC issued for it travels on the channel it
/// was created on.
pub struct Session {
    name: String,
    channel: usize,
    multiplexed: bool,
    rpc: Arc<dyn SpannerRpc>,
    md: MetadataMap,
    metrics: Metrics,
    created_at: Instant,
    last_use: Mutex<Instant>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("channel", &self.channel)
            .field("multiplexed", &self.multiplexed)
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        name: String,
        channel: usize,
        multiplexed: bool,
        rpc: Arc<dyn SpannerRpc>,
        md: MetadataMap,
        metrics: Metrics,
    ) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            name,
            channel,
            multiplexed,
            rpc,
            md,
            metrics,
            created_at: now,
            last_use: Mutex::new(now),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn is_multiplexed(&self) -> bool {
        self.multiplexed
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_use
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .elapsed()
    }

    pub(crate) fn touch(&self) {
        *self.last_use.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    pub(crate) fn rpc(&self) -> &dyn SpannerRpc {
        self.rpc.as_ref()
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub(crate) fn request<T>(&self, message: T, route_to_leader: bool) -> Request<T> {
        transport::request(message, &self.md, route_to_leader)
    }

    pub(crate) async fn begin_transaction(
        &self,
        options: proto::TransactionOptions,
        request_options: Option<proto::RequestOptions>,
        route_to_leader: bool,
    ) -> Result<proto::Transaction> {
        self.touch();
        let req = BeginTransactionRequest {
            session: self.name.clone(),
            options: Some(options),
            request_options,
        };
        let resp = self
            .rpc
            .begin_transaction(self.channel, self.request(req, route_to_leader))
            .await?;
        self.metrics.record_gfe_latency(resp.metadata());
        Ok(resp.into_inner())
    }

    pub(crate) async fn execute_sql(
        &self,
        mut req: ExecuteSqlRequest,
        route_to_leader: bool,
    ) -> Result<ResultSet> {
        self.touch();
        req.session = self.name.clone();
        let resp = self
            .rpc
            .execute_sql(self.channel, self.request(req, route_to_leader))
            .await?;
        self.metrics.record_gfe_latency(resp.metadata());
        Ok(resp.into_inner())
    }

    pub(crate) async fn execute_batch_dml(
        &self,
        mut req: ExecuteBatchDmlRequest,
        route_to_leader: bool,
    ) -> Result<ExecuteBatchDmlResponse> {
        self.touch();
        req.session = self.name.clone();
        let resp = self
            .rpc
            .execute_batch_dml(self.channel, self.request(req, route_to_leader))
            .await?;
        self.metrics.record_gfe_latency(resp.metadata());
        Ok(resp.into_inner())
    }

    pub(crate) async fn commit(
        &self,
        mut req: CommitRequest,
        route_to_leader: bool,
    ) -> Result<CommitResponse> {
        self.touch();
        req.session = self.name.clone();
        let resp = self
            .rpc
            .commit(self.channel, self.request(req, route_to_leader))
            .await?;
        self.metrics.record_gfe_latency(resp.metadata());
        Ok(resp.into_inner())
    }

    pub(crate) async fn rollback(&self, transaction_id: Vec<u8>, route_to_leader: bool) -> Result<()> {
        self.touch();
        let req = RollbackRequest {
            session: self.name.clone(),
            transaction_id,
        };
        self.rpc
            .rollback(self.channel, self.request(req, route_to_leader))
            .await?;
        Ok(())
    }

    /// Keepalive probe.
    pub(crate) async fn ping(&self) -> Result<()> {
        let req = ExecuteSqlRequest {
            sql: "SELECT 1".to_string(),
            ..Default::default()
        };
        self.execute_sql(req, false).await.map(|_| ())
    }
}
