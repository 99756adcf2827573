//! RPC seam between the client runtime and the wire.
//!
//! Every call names the channel it must travel on; sessions remember the
//! channel they were created on and all their RPCs reuse it.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::{Request, Response, Status};

use crate::proto::{
    BatchCreateSessionsRequest, BatchCreateSessionsResponse, BatchWriteRequest,
    BatchWriteResponse, BeginTransactionRequest, CommitRequest, CommitResponse,
    CreateSessionRequest, DeleteSessionRequest, ExecuteBatchDmlRequest, ExecuteBatchDmlResponse,
    ExecuteSqlRequest, PartialResultSet, PartitionQueryRequest, PartitionReadRequest,
    PartitionResponse, ReadRequest, ResultSet, RollbackRequest, Session, Transaction,
};

pub mod grpc;

pub use grpc::GrpcTransport;

pub type PartialResultStream = BoxStream<'static, Result<PartialResultSet, Status>>;
pub type BatchWriteStream = BoxStream<'static, Result<BatchWriteResponse, Status>>;

pub(crate) const RESOURCE_PREFIX_HEADER: &str = "google-cloud-resource-prefix";
pub(crate) const ROUTE_TO_LEADER_HEADER: &str = "x-goog-spanner-route-to-leader";
pub(crate) const SERVER_TIMING_HEADER: &str = "server-timing";

/// The data-plane RPCs the runtime issues.
#[async_trait]
pub trait SpannerRpc: Send + Sync + 'static {
    /// Number of channels calls may be spread across; always at least one.
    fn num_channels(&self) -> usize;

    async fn create_session(
        &self,
        channel: usize,
        req: Request<CreateSessionRequest>,
    ) -> Result<Response<Session>, Status>;

    async fn batch_create_sessions(
        &self,
        channel: usize,
        req: Request<BatchCreateSessionsRequest>,
    ) -> Result<Response<BatchCreateSessionsResponse>, Status>;

    async fn delete_session(
        &self,
        channel: usize,
        req: Request<DeleteSessionRequest>,
    ) -> Result<Response<()>, Status>;

    async fn execute_sql(
        &self,
        channel: usize,
        req: Request<ExecuteSqlRequest>,
    ) -> Result<Response<ResultSet>, Status>;

    async fn execute_streaming_sql(
        &self,
        channel: usize,
        req: Request<ExecuteSqlRequest>,
    ) -> Result<Response<PartialResultStream>, Status>;

    async fn execute_batch_dml(
        &self,
        channel: usize,
        req: Request<ExecuteBatchDmlRequest>,
    ) -> Result<Response<ExecuteBatchDmlResponse>, Status>;

    async fn streaming_read(
        &self,
        channel: usize,
        req: Request<ReadRequest>,
    ) -> Result<Response<PartialResultStream>, Status>;

    async fn begin_transaction(
        &self,
        channel: usize,
        req: Request<BeginTransactionRequest>,
    ) -> Result<Response<Transaction>, Status>;

    async fn commit(
        &self,
        channel: usize,
        req: Request<CommitRequest>,
    ) -> Result<Response<CommitResponse>, Status>;

    async fn rollback(
        &self,
        channel: usize,
        req: Request<RollbackRequest>,
    ) -> Result<Response<()>, Status>;

    async fn partition_query(
        &self,
        channel: usize,
        req: Request<PartitionQueryRequest>,
    ) -> Result<Response<PartitionResponse>, Status>;

    async fn partition_read(
        &self,
        channel: usize,
        req: Request<PartitionReadRequest>,
    ) -> Result<Response<PartitionResponse>, Status>;

    async fn batch_write(
        &self,
        channel: usize,
        req: Request<BatchWriteRequest>,
    ) -> Result<Response<BatchWriteStream>, Status>;
}

/// Metadata attached to every call made on behalf of one database.
pub(crate) fn database_metadata(database: &str) -> MetadataMap {
    let mut md = MetadataMap::new();
    if let Ok(value) = AsciiMetadataValue::try_from(database) {
        md.insert(RESOURCE_PREFIX_HEADER, value);
    }
    md
}

/// Wraps `message` in a request carrying `md`, plus the leader routing hint
/// when `route_to_leader` is set.
pub(crate) fn request<T>(message: T, md: &MetadataMap, route_to_leader: bool) -> Request<T> {
    let mut req = Request::new(message);
    *req.metadata_mut() = md.clone();
    if route_to_leader {
        req.metadata_mut()
            .insert(ROUTE_TO_LEADER_HEADER, AsciiMetadataValue::from_static("true"));
    }
    req
}
