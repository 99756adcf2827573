//! Partitioned DML: one statement applied by the server in independent
//! subtransactions.

use tokio::time::Instant;
use tonic::Code;
use tracing::{debug, instrument};

use super::ClientContext;
use crate::error::{Error, Result};
use crate::options::{request_options, PartitionedUpdateOptions, QueryMode};
use crate::proto::{
    transaction_options, transaction_selector::Selector, ExecuteSqlRequest, TransactionOptions,
    TransactionSelector,
};
use crate::retry::{is_partitioned_dml_retryable, Backoff, Deadline};
use crate::session::SessionHandle;
use crate::statement::Statement;
use crate::stream::extract_row_count;

const METHOD: &str = "PartitionedUpdate";

/// Runs `stmt` as partitioned DML and returns a lower bound of the rows it
/// modified. The statement must be idempotent: on `Aborted` the whole
/// statement runs again in a new transaction.
#[instrument(skip_all)]
pub(crate) async fn partitioned_update(
    ctx: &ClientContext,
    stmt: Statement,
    opts: PartitionedUpdateOptions,
) -> Result<i64> {
    let deadline = Deadline::from_timeout(opts.timeout);
    let timer = ctx.metrics.start_operation(METHOD);
    let result = run(ctx, &stmt, &opts, deadline).await;
    timer.finish(result.as_ref().map_or_else(Error::code, |_| Code::Ok));
    result
}

async fn run(
    ctx: &ClientContext,
    stmt: &Statement,
    opts: &PartitionedUpdateOptions,
    deadline: Deadline,
) -> Result<i64> {
    let (params, param_types) = stmt.to_params();
    let template = ExecuteSqlRequest {
        sql: stmt.sql.clone(),
        params,
        param_types,
        query_mode: QueryMode::Normal.to_proto(),
        request_options: request_options(opts.priority, &opts.request_tag, ""),
        ..Default::default()
    };
    let tx_options = TransactionOptions {
        exclude_txn_from_change_streams: opts.exclude_txn_from_change_streams,
        mode: Some(transaction_options::Mode::PartitionedDml(
            transaction_options::PartitionedDml {},
        )),
    };

    let mut handle = take_long_running(ctx, deadline).await?;
    let mut backoff = Backoff::default();
    loop {
        let started = Instant::now();
        let attempt = execute(ctx, &handle, &template, &tx_options, deadline).await;
        let code = attempt.as_ref().map_or_else(Error::code, |_| Code::Ok);
        ctx.metrics.record_attempt(METHOD, code, started.elapsed());
        match attempt {
            Ok(count) => return Ok(count),
            Err(err) if err.is_session_not_found() => {
                debug!(session = %handle.name(), "session expired, retrying partitioned update");
                handle.destroy();
                handle = take_long_running(ctx, deadline).await?;
            }
            Err(err) if is_partitioned_dml_retryable(&err) => {
                let delay = backoff.delay_for(&err);
                debug!(code = ?err.code(), delay_ms = delay.as_millis() as u64, "retrying partitioned update");
                deadline.sleep(delay, Some(&err)).await?;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn take_long_running(ctx: &ClientContext, deadline: Deadline) -> Result<SessionHandle> {
    let handle = ctx.pool.take(deadline).await?;
    handle.set_long_running(true);
    Ok(handle)
}

async fn execute(
    ctx: &ClientContext,
    handle: &SessionHandle,
    template: &ExecuteSqlRequest,
    tx_options: &TransactionOptions,
    deadline: Deadline,
) -> Result<i64> {
    let session = handle.session();
    let route = ctx.route_to_leader();
    let tx = deadline
        .run(session.begin_transaction(tx_options.clone(), None, route))
        .await?;
    let mut req = template.clone();
    req.transaction = Some(TransactionSelector {
        selector: Some(Selector::Id(tx.id)),
    });
    req.seqno = 1;
    let rs = deadline.run(session.execute_sql(req, route)).await?;
    let stats = rs.stats.ok_or_else(|| {
        Error::invalid_argument(format!("query passed to partitioned update: {:?}", template.sql))
    })?;
    extract_row_count(&stats)
}
