use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tonic::metadata::MetadataMap;
use tracing::{debug, warn};

use super::Session;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::proto::{self, BatchCreateSessionsRequest, CreateSessionRequest, DeleteSessionRequest};
use crate::retry::{retry_transient, Deadline};
use crate::transport::{self, SpannerRpc};

/// A batch creation that stopped early. `unfulfilled` sessions of the
/// requested batch were never delivered.
#[derive(Debug)]
pub struct BatchCreateError {
    pub error: Error,
    pub unfulfilled: usize,
}

/// Creates and deletes sessions for one database, spreading them over the
/// transport's channels.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<SessionClientInner>,
}

struct SessionClientInner {
    rpc: Arc<dyn SpannerRpc>,
    database: String,
    md: MetadataMap,
    labels: HashMap<String, String>,
    database_role: String,
    route_to_leader: bool,
    metrics: Metrics,
    next_channel: AtomicUsize,
}

impl SessionClient {
    pub fn new(
        rpc: Arc<dyn SpannerRpc>,
        database: impl Into<String>,
        labels: HashMap<String, String>,
        database_role: Option<String>,
        disable_route_to_leader: bool,
        metrics: Metrics,
    ) -> Self {
        let database = database.into();
        Self {
            inner: Arc::new(SessionClientInner {
                md: transport::database_metadata(&database),
                rpc,
                database,
                labels,
                database_role: database_role.unwrap_or_default(),
                route_to_leader: !disable_route_to_leader,
                metrics,
                next_channel: AtomicUsize::new(0),
            }),
        }
    }

    pub fn database(&self) -> &str {
        &self.inner.database
    }

    pub fn num_channels(&self) -> usize {
        self.inner.rpc.num_channels().max(1)
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub(crate) fn route_to_leader(&self) -> bool {
        self.inner.route_to_leader
    }

    fn next_channel(&self) -> usize {
        self.inner.next_channel.fetch_add(1, Ordering::Relaxed) % self.num_channels()
    }

    fn template(&self, multiplexed: bool) -> proto::Session {
        proto::Session {
            labels: self.inner.labels.clone(),
            creator_role: self.inner.database_role.clone(),
            multiplexed,
            ..Default::default()
        }
    }

    fn wrap(&self, name: String, channel: usize, multiplexed: bool) -> Arc<Session> {
        Session::new(
            name,
            channel,
            multiplexed,
            self.inner.rpc.clone(),
            self.inner.md.clone(),
            self.inner.metrics.clone(),
        )
    }

    /// Creates one session on the next channel in round-robin order.
    pub async fn create_session(&self, deadline: Deadline) -> Result<Arc<Session>> {
        self.create(deadline, false).await
    }

    /// Creates one multiplexed session, which may serve many transactions at
    /// once and is never returned to a pool.
    pub async fn create_multiplexed_session(&self, deadline: Deadline) -> Result<Arc<Session>> {
        self.create(deadline, true).await
    }

    async fn create(&self, deadline: Deadline, multiplexed: bool) -> Result<Arc<Session>> {
        let channel = self.next_channel();
        let inner = &self.inner;
        let session = retry_transient(deadline, || {
            let req = transport::request(
                CreateSessionRequest {
                    database: inner.database.clone(),
                    session: Some(self.template(multiplexed)),
                },
                &inner.md,
                inner.route_to_leader,
            );
            async move {
                let resp = inner.rpc.create_session(channel, req).await?;
                inner.metrics.record_gfe_latency(resp.metadata());
                Ok(resp.into_inner())
            }
        })
        .await?;
        debug!(session = %session.name, channel, multiplexed, "created session");
        Ok(self.wrap(session.name, channel, multiplexed))
    }

    /// Creates `count` sessions in the background. With
    /// `distribute_over_channels` each channel gets `count / C` sessions and
    /// the first one also takes the remainder; otherwise they all go to the
    /// next channel. Sessions are delivered one at a time as they arrive.
    pub fn batch_create_sessions(
        &self,
        count: usize,
        distribute_over_channels: bool,
        deadline: Deadline,
    ) -> mpsc::UnboundedReceiver<std::result::Result<Arc<Session>, BatchCreateError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let plan = if distribute_over_channels {
            split_over_channels(count, self.num_channels())
        } else {
            vec![(self.next_channel(), count)]
        };
        for (channel, share) in plan.into_iter().filter(|(_, share)| *share > 0) {
            let client = self.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                client.fill_channel(channel, share, deadline, tx).await;
            });
        }
        rx
    }

    async fn fill_channel(
        &self,
        channel: usize,
        mut remaining: usize,
        deadline: Deadline,
        tx: mpsc::UnboundedSender<std::result::Result<Arc<Session>, BatchCreateError>>,
    ) {
        let inner = &self.inner;
        while remaining > 0 {
            let wanted = remaining;
            let result = retry_transient(deadline, || {
                let req = transport::request(
                    BatchCreateSessionsRequest {
                        database: inner.database.clone(),
                        session_template: Some(self.template(false)),
                        session_count: i32::try_from(wanted).unwrap_or(i32::MAX),
                    },
                    &inner.md,
                    inner.route_to_leader,
                );
                async move {
                    let resp = inner.rpc.batch_create_sessions(channel, req).await?;
                    inner.metrics.record_gfe_latency(resp.metadata());
                    Ok(resp.into_inner())
                }
            })
            .await;
            match result {
                Ok(resp) if resp.session.is_empty() => {
                    let error = Error::internal("BatchCreateSessions returned no sessions");
                    let _ = tx.send(Err(BatchCreateError {
                        error,
                        unfulfilled: remaining,
                    }));
                    return;
                }
                Ok(resp) => {
                    for session in resp.session.into_iter().take(remaining) {
                        remaining -= 1;
                        let session = self.wrap(session.name, channel, false);
                        if tx.send(Ok(session)).is_err() {
                            return;
                        }
                    }
                }
                Err(error) => {
                    warn!(error = %error, channel, unfulfilled = remaining, "batch session creation failed");
                    let _ = tx.send(Err(BatchCreateError {
                        error,
                        unfulfilled: remaining,
                    }));
                    return;
                }
            }
        }
    }

    /// Best effort: one attempt, failures are only logged.
    pub async fn delete_session(&self, session: &Session) {
        let req = transport::request(
            DeleteSessionRequest {
                name: session.name().to_string(),
            },
            &self.inner.md,
            false,
        );
        if let Err(status) = self.inner.rpc.delete_session(session.channel(), req).await {
            debug!(session = %session.name(), code = ?status.code(), "failed to delete session");
        }
    }

    /// Rehydrates a session known only by name, e.g. from a serialized batch
    /// transaction id.
    pub(crate) fn session_with_id(&self, name: impl Into<String>) -> Arc<Session> {
        self.wrap(name.into(), self.next_channel(), false)
    }
}

fn split_over_channels(count: usize, channels: usize) -> Vec<(usize, usize)> {
    let channels = channels.max(1);
    let per_channel = count / channels;
    let remainder = count % channels;
    (0..channels)
        .map(|channel| {
            let extra = if channel == 0 { remainder } else { 0 };
            (channel, per_channel + extra)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remainder_goes_to_first_channel() {
        assert_eq!(split_over_channels(10, 4), vec![(0, 4), (1, 2), (2, 2), (3, 2)]);
        assert_eq!(split_over_channels(3, 4), vec![(0, 3), (1, 0), (2, 0), (3, 0)]);
        assert_eq!(split_over_channels(8, 4), vec![(0, 2), (1, 2), (2, 2), (3, 2)]);
        assert_eq!(split_over_channels(5, 0), vec![(0, 5)]);
    }
}
