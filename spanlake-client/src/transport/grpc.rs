//! `tonic` implementation of [`SpannerRpc`] over a fixed set of channels.

use async_trait::async_trait;
use futures::StreamExt;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};
use tonic::{Code, Request, Response, Status};
use tracing::{debug, info};

use super::{BatchWriteStream, PartialResultStream, SpannerRpc};
use crate::config::ClientConfig;
use crate::database::DatabaseName;
use crate::error::{Error, Result};
use crate::proto::admin::{GetInstanceRequest, Instance};
use crate::proto::{
    BatchCreateSessionsRequest, BatchCreateSessionsResponse, BatchWriteRequest,
    BeginTransactionRequest, CommitRequest, CommitResponse, CreateSessionRequest,
    DeleteSessionRequest, ExecuteBatchDmlRequest, ExecuteBatchDmlResponse, ExecuteSqlRequest,
    PartitionQueryRequest, PartitionReadRequest, PartitionResponse, ReadRequest, ResultSet,
    RollbackRequest, Session, Transaction,
};

const GET_INSTANCE: &str = "/google.spanner.admin.instance.v1.InstanceAdmin/GetInstance";

pub struct GrpcTransport {
    channels: Vec<Channel>,
    authorization: Option<AsciiMetadataValue>,
}

impl GrpcTransport {
    /// Opens `config.num_channels` lazily connected channels. With
    /// resource based routing enabled the instance endpoint is looked up
    /// first and used instead of the configured one when present.
    pub async fn connect(config: &ClientConfig, database: &DatabaseName) -> Result<Self> {
        let (endpoint, authorization) = match &config.emulator_host {
            Some(host) => (format!("http://{host}"), None),
            None => (
                config.endpoint.clone(),
                bearer(config.access_token.as_deref())?,
            ),
        };
        let mut transport = Self {
            channels: open_channels(&endpoint, config)?,
            authorization,
        };
        if config.resource_based_routing && config.emulator_host.is_none() {
            if let Some(uri) = transport.instance_endpoint(database).await? {
                info!(endpoint = %uri, "routing to instance endpoint");
                transport.channels = open_channels(&uri, config)?;
            }
        }
        Ok(transport)
    }

    async fn instance_endpoint(&self, database: &DatabaseName) -> Result<Option<String>> {
        let req = GetInstanceRequest {
            name: database.instance_path(),
            field_mask: Some(prost_types::FieldMask {
                paths: vec!["endpoint_uris".to_string()],
            }),
        };
        match self
            .unary::<_, Instance>(0, Request::new(req), GET_INSTANCE)
            .await
        {
            Ok(resp) => Ok(resp.into_inner().endpoint_uris.into_iter().next().map(|uri| {
                if uri.contains("://") {
                    uri
                } else {
                    format!("https://{uri}")
                }
            })),
            Err(status) if status.code() == Code::PermissionDenied => {
                debug!(
                    instance = %database.instance_path(),
                    "no permission to look up the instance endpoint, using the default"
                );
                Ok(None)
            }
            Err(status) => Err(status.into()),
        }
    }

    fn grpc(&self, channel: usize) -> Grpc<Channel> {
        let channel = &self.channels[channel % self.channels.len()];
        Grpc::new(channel.clone())
    }

    fn authorize<T>(&self, mut req: Request<T>) -> Request<T> {
        if let Some(token) = &self.authorization {
            req.metadata_mut().insert("authorization", token.clone());
        }
        req
    }

    async fn unary<Req, Resp>(
        &self,
        channel: usize,
        req: Request<Req>,
        path: &'static str,
    ) -> Result<Response<Resp>, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.grpc(channel);
        grpc.ready()
            .await
            .map_err(|e| Status::new(Code::Unknown, format!("Service was not ready: {e}")))?;
        let codec = ProstCodec::<Req, Resp>::default();
        grpc.unary(self.authorize(req), PathAndQuery::from_static(path), codec)
            .await
    }

    async fn server_streaming<Req, Resp>(
        &self,
        channel: usize,
        req: Request<Req>,
        path: &'static str,
    ) -> Result<Response<futures::stream::BoxStream<'static, Result<Resp, Status>>>, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.grpc(channel);
        grpc.ready()
            .await
            .map_err(|e| Status::new(Code::Unknown, format!("Service was not ready: {e}")))?;
        let codec = ProstCodec::<Req, Resp>::default();
        let resp = grpc
            .server_streaming(self.authorize(req), PathAndQuery::from_static(path), codec)
            .await?;
        Ok(resp.map(|stream| stream.boxed()))
    }
}

fn bearer(token: Option<&str>) -> Result<Option<AsciiMetadataValue>> {
    token
        .map(|token| {
            AsciiMetadataValue::try_from(format!("Bearer {token}"))
                .map_err(|err| Error::invalid_argument("access token is not valid ASCII").with_source(err))
        })
        .transpose()
}

fn open_channels(uri: &str, config: &ClientConfig) -> Result<Vec<Channel>> {
    (0..config.num_channels.max(1))
        .map(|_| {
            let mut endpoint = Endpoint::from_shared(uri.to_string())
                .map_err(|err| {
                    Error::invalid_argument(format!("invalid endpoint {uri:?}")).with_source(err)
                })?
                .connect_timeout(config.connect_timeout());
            if uri.starts_with("https://") {
                endpoint = endpoint
                    .tls_config(ClientTlsConfig::new().with_native_roots())
                    .map_err(|err| {
                        Error::invalid_argument(format!("tls setup failed for {uri:?}"))
                            .with_source(err)
                    })?;
            }
            Ok(endpoint.connect_lazy())
        })
        .collect()
}

#[async_trait]
impl SpannerRpc for GrpcTransport {
    fn num_channels(&self) -> usize {
        self.channels.len()
    }

    async fn create_session(
        &self,
        channel: usize,
        req: Request<CreateSessionRequest>,
    ) -> Result<Response<Session>, Status> {
        self.unary(channel, req, "/google.spanner.v1.Spanner/CreateSession")
            .await
    }

    async fn batch_create_sessions(
        &self,
        channel: usize,
        req: Request<BatchCreateSessionsRequest>,
    ) -> Result<Response<BatchCreateSessionsResponse>, Status> {
        self.unary(channel, req, "/google.spanner.v1.Spanner/BatchCreateSessions")
            .await
    }

    async fn delete_session(
        &self,
        channel: usize,
        req: Request<DeleteSessionRequest>,
    ) -> Result<Response<()>, Status> {
        self.unary(channel, req, "/google.spanner.v1.Spanner/DeleteSession")
            .await
    }

    async fn execute_sql(
        &self,
        channel: usize,
        req: Request<ExecuteSqlRequest>,
    ) -> Result<Response<ResultSet>, Status> {
        self.unary(channel, req, "/google.spanner.v1.Spanner/ExecuteSql")
            .await
    }

    async fn execute_streaming_sql(
        &self,
        channel: usize,
        req: Request<ExecuteSqlRequest>,
    ) -> Result<Response<PartialResultStream>, Status> {
        self.server_streaming(channel, req, "/google.spanner.v1.Spanner/ExecuteStreamingSql")
            .await
    }

    async fn execute_batch_dml(
        &self,
        channel: usize,
        req: Request<ExecuteBatchDmlRequest>,
    ) -> Result<Response<ExecuteBatchDmlResponse>, Status> {
        self.unary(channel, req, "/google.spanner.v1.Spanner/ExecuteBatchDml")
            .await
    }

    async fn streaming_read(
        &self,
        channel: usize,
        req: Request<ReadRequest>,
    ) -> Result<Response<PartialResultStream>, Status> {
        self.server_streaming(channel, req, "/google.spanner.v1.Spanner/StreamingRead")
            .await
    }

    async fn begin_transaction(
        &self,
        channel: usize,
        req: Request<BeginTransactionRequest>,
    ) -> Result<Response<Transaction>, Status> {
        self.unary(channel, req, "/google.spanner.v1.Spanner/BeginTransaction")
            .await
    }

    async fn commit(
        &self,
        channel: usize,
        req: Request<CommitRequest>,
    ) -> Result<Response<CommitResponse>, Status> {
        self.unary(channel, req, "/google.spanner.v1.Spanner/Commit")
            .await
    }

    async fn rollback(
        &self,
        channel: usize,
        req: Request<RollbackRequest>,
    ) -> Result<Response<()>, Status> {
        self.unary(channel, req, "/google.spanner.v1.Spanner/Rollback")
            .await
    }

    async fn partition_query(
        &self,
        channel: usize,
        req: Request<PartitionQueryRequest>,
    ) -> Result<Response<PartitionResponse>, Status> {
        self.unary(channel, req, "/google.spanner.v1.Spanner/PartitionQuery")
            .await
    }

    async fn partition_read(
        &self,
        channel: usize,
        req: Request<PartitionReadRequest>,
    ) -> Result<Response<PartitionResponse>, Status> {
        self.unary(channel, req, "/google.spanner.v1.Spanner/PartitionRead")
            .await
    }

    async fn batch_write(
        &self,
        channel: usize,
        req: Request<BatchWriteRequest>,
    ) -> Result<Response<BatchWriteStream>, Status> {
        self.server_streaming(channel, req, "/google.spanner.v1.Spanner/BatchWrite")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_is_prefixed() {
        let value = bearer(Some("abc")).unwrap().unwrap();
        assert_eq!(value, "Bearer abc");
        assert!(bearer(None).unwrap().is_none());
        assert!(bearer(Some("caf\u{e9}")).is_err());
    }

    #[tokio::test]
    async fn channels_are_opened_lazily() {
        let config = ClientConfig {
            num_channels: 3,
            ..Default::default()
        };
        let channels = open_channels("http://127.0.0.1:9010", &config).unwrap();
        assert_eq!(channels.len(), 3);
        assert!(open_channels("not a uri", &config).is_err());
    }
}
