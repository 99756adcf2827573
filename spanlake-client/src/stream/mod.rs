//! Streaming results: the resumable decoder, row reassembly, and the
//! [`RowIterator`] handed to callers.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tonic::Code;

use crate::error::{Error, Result};
use crate::proto::{
    result_set_stats::RowCount, transaction_selector::Selector, ExecuteSqlRequest, PartialResultSet,
    QueryPlan, ReadRequest, ResultSetMetadata, ResultSetStats, TransactionSelector,
};
use crate::row::Row;
use crate::session::Session;
use crate::timestamp_bound::from_timestamp;
use crate::transaction::TxCore;
use crate::transport::PartialResultStream;

pub(crate) mod assembler;
pub(crate) mod decoder;

use assembler::RowAssembler;
use decoder::{ResumableStream, StreamSource};

/// The streaming request behind an iterator.
#[derive(Debug, Clone)]
pub(crate) enum StreamRequest {
    Sql(ExecuteSqlRequest),
    Read(ReadRequest),
}

impl StreamRequest {
    fn set_transaction(&mut self, selector: TransactionSelector) {
        match self {
            Self::Sql(req) => req.transaction = Some(selector),
            Self::Read(req) => req.transaction = Some(selector),
        }
    }
}

/// Opens the request on the transaction's session, resuming from a token when
/// asked to.
struct TxStreamSource {
    tx: Arc<dyn TxCore>,
    session: Arc<Session>,
    request: StreamRequest,
    selector: TransactionSelector,
}

impl TxStreamSource {
    fn begins_inline(&self) -> bool {
        matches!(self.selector.selector, Some(Selector::Begin(_)))
    }
}

#[async_trait]
impl StreamSource for TxStreamSource {
    async fn open(&mut self, resume_token: &[u8]) -> Result<PartialResultStream> {
        let selector = self.tx.reopen_selector(&self.selector);
        let inline_begin = matches!(selector.selector, Some(Selector::Begin(_)));
        self.request.set_transaction(selector);
        let route = self.tx.route_to_leader();
        let session = &self.session;
        session.touch();
        let opened = match &mut self.request {
            StreamRequest::Sql(req) => {
                req.session = session.name().to_string();
                req.resume_token = resume_token.to_vec();
                session
                    .rpc()
                    .execute_streaming_sql(session.channel(), session.request(req.clone(), route))
                    .await
            }
            StreamRequest::Read(req) => {
                req.session = session.name().to_string();
                req.resume_token = resume_token.to_vec();
                session
                    .rpc()
                    .streaming_read(session.channel(), session.request(req.clone(), route))
                    .await
            }
        };
        match opened {
            Ok(resp) => {
                session.metrics().record_gfe_latency(resp.metadata());
                Ok(resp.into_inner())
            }
            Err(status) if inline_begin => {
                tracing::debug!(code = ?status.code(), "inline begin failed while opening stream");
                self.tx.set_transaction_id(None);
                Err(Error::inline_begin_failed().with_source(status))
            }
            Err(status) => Err(self.tx.update_tx_state(status.into())),
        }
    }

    fn can_replace_session(&self) -> bool {
        self.tx.can_replace_session()
    }

    async fn replace_session(&mut self) -> Result<()> {
        self.session = self.tx.replace_session().await?;
        Ok(())
    }
}

/// Rows of a read or query, produced lazily: nothing is sent until the
/// first call to [`next`](Self::next).
///
/// Dropping or [`stop`](Self::stop)ping the iterator releases the session it
/// holds.
pub struct RowIterator {
    tx: Arc<dyn TxCore>,
    request: Option<StreamRequest>,
    decoder: Option<ResumableStream<TxStreamSource>>,
    assembler: RowAssembler,
    rows: VecDeque<Row>,
    metadata: Option<ResultSetMetadata>,
    stats: Option<ResultSetStats>,
    err: Option<Error>,
    begin_pending: bool,
    done: bool,
    stopped: bool,
    released: bool,
}

impl RowIterator {
    pub(crate) fn new(tx: Arc<dyn TxCore>, request: StreamRequest) -> Self {
        Self {
            tx,
            request: Some(request),
            decoder: None,
            assembler: RowAssembler::new(),
            rows: VecDeque::new(),
            metadata: None,
            stats: None,
            err: None,
            begin_pending: false,
            done: false,
            stopped: false,
            released: false,
        }
    }

    /// An iterator that fails on the first call without touching the
    /// transaction.
    pub(crate) fn failed(tx: Arc<dyn TxCore>, err: Error) -> Self {
        let mut it = Self::new(tx, StreamRequest::Sql(ExecuteSqlRequest::default()));
        it.request = None;
        it.err = Some(err);
        it.released = true;
        it
    }

    /// Returns the next row, `Ok(None)` once the results are exhausted.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        if self.stopped {
            return Err(Error::failed_precondition("next called after stop"));
        }
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        loop {
            if let Some(row) = self.rows.pop_front() {
                return Ok(Some(row));
            }
            if self.done {
                return Ok(None);
            }
            if self.decoder.is_none() {
                self.start().await?;
            }
            let Some(decoder) = self.decoder.as_mut() else {
                return Err(self.fail(Error::internal("result stream is not open")));
            };
            match decoder.next().await {
                Some(mut msg) => {
                    if let Err(err) = self.absorb(&mut msg) {
                        return Err(self.fail(err));
                    }
                }
                None => {
                    let stream_err = decoder.take_error();
                    self.decoder = None;
                    self.finish(stream_err)?;
                }
            }
        }
    }

    async fn start(&mut self) -> Result<()> {
        let Some(mut request) = self.request.take() else {
            return Err(self.fail(Error::internal("result stream has no request")));
        };
        let (session, selector) = match self.tx.acquire().await {
            Ok(acquired) => acquired,
            Err(err) => {
                // Nothing was borrowed.
                self.released = true;
                self.err = Some(err.clone());
                return Err(err);
            }
        };
        request.set_transaction(selector.clone());
        let source = TxStreamSource {
            tx: self.tx.clone(),
            session,
            request,
            selector,
        };
        self.begin_pending = source.begins_inline();
        self.decoder = Some(ResumableStream::new(source, self.tx.deadline()));
        Ok(())
    }

    fn absorb(&mut self, msg: &mut PartialResultSet) -> Result<()> {
        let embedded = msg.metadata.as_ref().and_then(|m| m.transaction.as_ref());
        if self.begin_pending {
            self.begin_pending = false;
            match embedded {
                Some(tx) if !tx.id.is_empty() => self.tx.set_transaction_id(Some(tx.id.clone())),
                _ => {
                    self.tx.set_transaction_id(None);
                    return Err(Error::inline_begin_failed());
                }
            }
        }
        if let Some(ts) = embedded
            .and_then(|tx| tx.read_timestamp.as_ref())
            .and_then(from_timestamp)
        {
            self.tx.set_timestamp(ts);
        }
        if self.metadata.is_none() {
            self.metadata = msg.metadata.clone();
        }
        if let Some(stats) = msg.stats.take() {
            self.stats = Some(stats);
        }
        let rows = self.assembler.add(msg)?;
        self.rows.extend(rows);
        Ok(())
    }

    fn finish(&mut self, stream_err: Option<Error>) -> Result<()> {
        if let Some(err) = stream_err {
            if self.begin_pending {
                self.begin_pending = false;
                self.tx.set_transaction_id(None);
            }
            let err = self.tx.update_tx_state(err);
            return Err(self.fail(err));
        }
        if !self.assembler.is_done() {
            return Err(self.fail(Error::malformed_stream(
                Code::FailedPrecondition,
                "read completed with active stream",
            )));
        }
        if self.begin_pending {
            self.begin_pending = false;
            self.tx.set_transaction_id(None);
            return Err(self.fail(Error::inline_begin_failed()));
        }
        self.done = true;
        self.release(None);
        Ok(())
    }

    fn fail(&mut self, err: Error) -> Error {
        self.err = Some(err.clone());
        self.decoder = None;
        self.release(Some(&err));
        err
    }

    fn release(&mut self, err: Option<&Error>) {
        if self.begin_pending {
            // Stopped before the server answered the inline begin; the next
            // statement has to begin the transaction again.
            self.begin_pending = false;
            self.tx.set_transaction_id(None);
        }
        if !self.released {
            self.released = true;
            self.tx.release(err);
        }
    }

    /// Ends the iteration early and releases the session. Later calls to
    /// `next` fail.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.decoder = None;
        self.request = None;
        let err = self.err.clone();
        self.release(err.as_ref());
    }

    /// Drains the iterator.
    pub async fn collect(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Adapts the iterator to a [`Stream`] that ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Row>> + Send {
        futures::stream::unfold(Some(self), |state| async move {
            let mut it = state?;
            match it.next().await {
                Ok(Some(row)) => Some((Ok(row), Some(it))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    /// Result metadata, available once the first message arrived.
    pub fn metadata(&self) -> Option<&ResultSetMetadata> {
        self.metadata.as_ref()
    }

    /// Plan of a query run in plan or profile mode; available after the
    /// results are exhausted.
    pub fn query_plan(&self) -> Option<&QueryPlan> {
        self.stats.as_ref().and_then(|s| s.query_plan.as_ref())
    }

    pub fn query_stats(&self) -> Option<&prost_types::Struct> {
        self.stats.as_ref().and_then(|s| s.query_stats.as_ref())
    }

    /// Rows modified by a DML statement, exact or lower bound.
    pub fn row_count(&self) -> Option<i64> {
        self.stats
            .as_ref()
            .and_then(|stats| extract_row_count(stats).ok())
    }
}

impl Drop for RowIterator {
    fn drop(&mut self) {
        let err = self.err.take();
        self.release(err.as_ref());
    }
}

pub(crate) fn extract_row_count(stats: &ResultSetStats) -> Result<i64> {
    match stats.row_count {
        Some(RowCount::RowCountExact(n)) | Some(RowCount::RowCountLowerBound(n)) => Ok(n),
        None => Err(Error::internal("missing RowCount")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_count_prefers_whichever_is_present() {
        let exact = ResultSetStats {
            row_count: Some(RowCount::RowCountExact(3)),
            ..Default::default()
        };
        let lower = ResultSetStats {
            row_count: Some(RowCount::RowCountLowerBound(10)),
            ..Default::default()
        };
        assert_eq!(extract_row_count(&exact).unwrap(), 3);
        assert_eq!(extract_row_count(&lower).unwrap(), 10);
        let err = extract_row_count(&ResultSetStats::default()).unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(err.message(), "missing RowCount");
    }
}
