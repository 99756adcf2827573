mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use common::{
    connect, field, first_chunk, int64, session_not_found, string, FakeServer, Rpc, Step,
};
use spanlake_client::proto::{commit_request, transaction_options, TypeCode};
use spanlake_client::value::ToValue;
use spanlake_client::{
    ApplyOptions, CommitOptions, Error, KeySet, Mutation, MutationGroup, ReadContext, Statement,
    TransactionOptions,
};
use tonic::{Code, Status};

const UPDATE: &str = "UPDATE Singers SET Name = 'x' WHERE true";

fn singers(server: &FakeServer) {
    server.create_table(
        "Singers",
        &[("SingerId", TypeCode::Int64), ("Name", TypeCode::String)],
    );
}

fn insert_singer(id: i64, name: &str) -> Mutation {
    Mutation::insert(
        "Singers",
        ["SingerId", "Name"],
        vec![id.to_value(), name.to_value()],
    )
}

#[tokio::test]
async fn apply_commits_mutations_with_stats() -> Result<()> {
    let server = FakeServer::new();
    singers(&server);
    let client = connect(&server)?;

    let options = ApplyOptions {
        commit_options: CommitOptions {
            return_commit_stats: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let resp = client
        .apply(vec![insert_singer(1, "Marc"), insert_singer(2, "Alice")], options)
        .await?;
    assert_eq!(resp.commit_stats.map(|s| s.mutation_count), Some(2));
    assert_eq!(server.row_count("Singers"), 2);
    assert_eq!(server.calls(Rpc::BeginTransaction), 1);

    let rows = client
        .single()
        .read("Singers", KeySet::all(), &["Name"])
        .collect()
        .await?;
    assert_eq!(rows.len(), 2);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn apply_at_least_once_uses_a_single_use_commit() -> Result<()> {
    let server = FakeServer::new();
    singers(&server);
    let client = connect(&server)?;

    client
        .apply(vec![insert_singer(1, "Marc")], ApplyOptions::at_least_once())
        .await?;
    assert_eq!(server.calls(Rpc::BeginTransaction), 0);
    let commits = server.commits();
    assert!(matches!(
        commits[0].transaction,
        Some(commit_request::Transaction::SingleUseTransaction(_))
    ));

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn aborted_commits_rerun_the_transaction() -> Result<()> {
    let server = FakeServer::new();
    singers(&server);
    server.abort_next_commits(2, Duration::from_millis(10));
    let client = connect(&server)?;

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let started = std::time::Instant::now();
    client
        .read_write_transaction(move |tx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { tx.buffer_write([insert_singer(7, "Ana")]) }
        })
        .await?;

    assert!(started.elapsed() >= Duration::from_millis(20));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(server.calls(Rpc::Commit), 3);
    assert_eq!(server.row_count("Singers"), 1);
    let begins = server.begins();
    assert_eq!(begins.len(), 3);
    assert!(begins.iter().all(|b| b.session == begins[0].session));

    let snapshot = client.metrics_snapshot().expect("metrics enabled");
    let op = snapshot
        .operations
        .iter()
        .find(|m| m.method == "ReadWriteTransaction")
        .expect("operation recorded");
    assert_eq!(op.count, 1);
    let attempts = snapshot
        .attempts
        .iter()
        .find(|m| m.method == "ReadWriteTransaction")
        .expect("attempts recorded");
    assert_eq!(attempts.count, 3);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn first_statement_begins_the_transaction_inline() -> Result<()> {
    let server = FakeServer::new();
    server.set_dml(UPDATE, 3);
    let client = connect(&server)?;

    let updated = Arc::new(AtomicUsize::new(0));
    let counter = updated.clone();
    client
        .read_write_transaction(move |tx| {
            let counter = counter.clone();
            async move {
                let n = tx.update(Statement::new(UPDATE)).await?;
                counter.store(n as usize, Ordering::SeqCst);
                Ok(())
            }
        })
        .await?;

    assert_eq!(updated.load(Ordering::SeqCst), 3);
    assert_eq!(server.calls(Rpc::BeginTransaction), 0);
    let requests = server.sql_requests();
    assert_eq!(requests[0].seqno, 1);
    assert!(matches!(
        server.commits()[0].transaction,
        Some(commit_request::Transaction::TransactionId(ref id)) if !id.is_empty()
    ));

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn expired_session_at_commit_retries_on_a_new_session() -> Result<()> {
    let server = FakeServer::new();
    server.set_dml(UPDATE, 1);
    server.fail_next(Rpc::Commit, session_not_found("gone"));
    let client = connect(&server)?;

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    client
        .read_write_transaction(move |tx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                tx.update(Statement::new(UPDATE)).await?;
                Ok(())
            }
        })
        .await?;

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    let requests = server.sql_requests();
    assert_eq!(requests.len(), 2);
    assert_ne!(requests[0].session, requests[1].session);
    assert_eq!(client.pool().snapshot().in_use, 0);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn callback_errors_roll_back_and_surface() -> Result<()> {
    let server = FakeServer::new();
    server.set_dml(UPDATE, 1);
    let client = connect(&server)?;

    let err = client
        .read_write_transaction(|tx| async move {
            tx.update(Statement::new(UPDATE)).await?;
            Err(Error::invalid_argument("rejected by caller"))
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(err.message(), "rejected by caller");
    assert_eq!(server.rollbacks().len(), 1);
    assert_eq!(server.calls(Rpc::Commit), 0);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn nested_read_write_transactions_are_rejected() -> Result<()> {
    let server = FakeServer::new();
    let client = connect(&server)?;

    let inner = client.clone();
    let err = client
        .read_write_transaction(move |_tx| {
            let inner = inner.clone();
            async move {
                inner
                    .read_write_transaction(|_tx| async { Ok(()) })
                    .await
                    .map(|_| ())
            }
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::FailedPrecondition);
    assert!(err.message().contains("nested transactions"));

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn apply_inside_a_read_write_transaction_is_rejected() -> Result<()> {
    let server = FakeServer::new();
    singers(&server);
    let client = connect(&server)?;

    let inner = client.clone();
    let err = client
        .read_write_transaction(move |_tx| {
            let inner = inner.clone();
            async move {
                inner
                    .apply(vec![insert_singer(1, "Marc")], ApplyOptions::default())
                    .await
                    .map(|_| ())
            }
        })
        .await
        .unwrap_err();

    assert_eq!(err.code(), Code::FailedPrecondition);
    assert!(err.message().contains("nested transactions"));
    assert_eq!(server.row_count("Singers"), 0);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn dropping_an_unanswered_first_read_lets_the_transaction_continue() -> Result<()> {
    let server = FakeServer::new();
    let slow = "SELECT Name FROM Singers";
    server.script_query(
        slow,
        vec![vec![
            Step::Pause(Duration::from_secs(5)),
            Step::Message(first_chunk(
                vec![field("Name", TypeCode::String)],
                vec![string("Marc")],
            )),
        ]],
    );
    server.set_dml(UPDATE, 2);
    let client = connect(&server)?;

    let updated = Arc::new(AtomicUsize::new(0));
    let counter = updated.clone();
    client
        .read_write_transaction(move |tx| {
            let counter = counter.clone();
            async move {
                let mut rows = tx.query(Statement::new(slow));
                let first = tokio::time::timeout(Duration::from_millis(50), rows.next()).await;
                assert!(first.is_err(), "the first row should still be pending");
                drop(rows);

                let n = tokio::time::timeout(Duration::from_secs(2), tx.update(Statement::new(UPDATE)))
                    .await
                    .map_err(|_| Error::internal("update waited on the abandoned begin"))??;
                counter.store(n as usize, Ordering::SeqCst);
                Ok(())
            }
        })
        .await?;

    assert_eq!(updated.load(Ordering::SeqCst), 2);
    assert_eq!(server.calls(Rpc::Commit), 1);
    assert_eq!(client.pool().snapshot().in_use, 0);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn statement_based_transaction_resets_after_abort() -> Result<()> {
    let server = FakeServer::new();
    server.set_dml(UPDATE, 4);
    server.abort_next_commits(1, Duration::from_millis(1));
    let client = connect(&server)?;

    let mut tx = client
        .begin_read_write_transaction(TransactionOptions::default())
        .await?;
    assert_eq!(tx.update(Statement::new(UPDATE)).await?, 4);
    let err = tx.commit().await.unwrap_err();
    assert!(err.is_aborted());

    tx.reset_for_retry().await?;
    assert_eq!(tx.update(Statement::new(UPDATE)).await?, 4);
    tx.commit().await?;

    let begins = server.begins();
    assert_eq!(begins.len(), 2);
    assert_eq!(begins[0].session, begins[1].session);
    assert_eq!(server.calls(Rpc::Commit), 2);
    assert_eq!(client.pool().snapshot().in_use, 0);

    let err = tx.reset_for_retry().await.unwrap_err();
    assert_eq!(err.code(), Code::FailedPrecondition);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn batch_update_reports_counts_before_the_failure() -> Result<()> {
    let server = FakeServer::new();
    server.set_dml(UPDATE, 2);
    let client = connect(&server)?;

    let mut tx = client
        .begin_read_write_transaction(TransactionOptions::default())
        .await?;
    let counts = tx
        .batch_update(vec![Statement::new(UPDATE), Statement::new(UPDATE)])
        .await?;
    assert_eq!(counts, vec![2, 2]);

    let err = tx
        .batch_update(vec![Statement::new(UPDATE), Statement::new("UPDATE Missing")])
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(
        err.additional_info(),
        Some("row counts of succeeded statements: [2]")
    );

    tx.rollback().await;
    assert_eq!(server.rollbacks().len(), 1);
    assert_eq!(client.pool().snapshot().in_use, 0);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn partitioned_update_retries_aborts() -> Result<()> {
    let server = FakeServer::new();
    let sql = "DELETE FROM Singers WHERE true";
    server.set_dml(sql, 7);
    server.fail_next(Rpc::ExecuteSql, Status::aborted("transaction was aborted"));
    let client = connect(&server)?;

    let count = client.partitioned_update(Statement::new(sql)).await?;
    assert_eq!(count, 7);

    let begins = server.begins();
    assert_eq!(begins.len(), 2);
    assert!(begins.iter().all(|b| matches!(
        b.options.as_ref().and_then(|o| o.mode.as_ref()),
        Some(transaction_options::Mode::PartitionedDml(_))
    )));
    assert!(server.sql_requests().iter().all(|r| r.seqno == 1));
    assert_eq!(client.pool().snapshot().in_use, 0);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn batch_write_streams_group_results() -> Result<()> {
    let server = FakeServer::new();
    singers(&server);
    server.fail_next(Rpc::BatchWrite, session_not_found("gone"));
    let client = connect(&server)?;

    let groups = vec![
        MutationGroup::new(vec![insert_singer(1, "Marc")]),
        MutationGroup::new(vec![insert_singer(2, "Alice"), insert_singer(3, "Bo")]),
    ];
    let mut results = client.batch_write(&groups, &Default::default());
    let mut indexes = Vec::new();
    while let Some(result) = results.next().await? {
        assert!(result.status.is_none());
        assert!(result.commit_timestamp.is_some());
        indexes.extend(result.indexes);
    }

    assert_eq!(indexes, vec![0, 1]);
    assert_eq!(server.calls(Rpc::BatchWrite), 2);
    assert_eq!(server.row_count("Singers"), 3);
    assert_eq!(client.pool().snapshot().in_use, 0);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn buffered_writes_follow_reads_in_the_same_transaction() -> Result<()> {
    let server = FakeServer::new();
    singers(&server);
    server.insert_row("Singers", vec![int64(1), string("Marc")]);
    let client = connect(&server)?;

    client
        .read_write_transaction(|tx| async move {
            let rows = tx.read("Singers", KeySet::all(), &["SingerId"]).collect().await?;
            let next = rows.len() as i64 + 1;
            tx.buffer_write([insert_singer(next, "Nova")])
        })
        .await?;

    assert_eq!(server.row_count("Singers"), 2);
    assert_eq!(server.calls(Rpc::BeginTransaction), 0);
    client.close().await;
    Ok(())
}
