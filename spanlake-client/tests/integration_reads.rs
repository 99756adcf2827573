mod common;

use std::time::Duration;

use anyhow::Result;
use common::{
    array_field, chunk, connect, field, first_chunk, int64, list, session_not_found, string,
    FakeServer, Rpc, Step,
};
use spanlake_client::proto::{transaction_selector::Selector, PartialResultSet, TypeCode};
use spanlake_client::{Key, KeySet, ReadContext, Statement, TimestampBound};
use tonic::{Code, Status};

fn singers(server: &FakeServer) {
    server.create_table(
        "Singers",
        &[("SingerId", TypeCode::Int64), ("Name", TypeCode::String)],
    );
    server.insert_row("Singers", vec![int64(1), string("Marc")]);
    server.insert_row("Singers", vec![int64(2), string("Catalina")]);
}

fn names_query(server: &FakeServer, attempts: Vec<Vec<Step>>) -> Statement {
    let sql = "SELECT Name FROM Singers";
    server.script_query(sql, attempts);
    Statement::new(sql)
}

fn with_token(mut msg: PartialResultSet, token: &str) -> PartialResultSet {
    msg.resume_token = token.as_bytes().to_vec();
    msg
}

#[tokio::test]
async fn read_row_returns_the_row_or_not_found() -> Result<()> {
    let server = FakeServer::new();
    singers(&server);
    let client = connect(&server)?;

    let row = client
        .single()
        .read_row("Singers", Key::new().part(2i64), &["SingerId", "Name"])
        .await?;
    assert_eq!(row.column::<i64>(0)?, 2);
    assert_eq!(row.column_by_name::<String>("Name")?, "Catalina");

    let err = client
        .single()
        .read_row("Singers", Key::new().part(9i64), &["Name"])
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
    assert!(err.message().contains("row not found(Table: Singers"));

    assert_eq!(client.pool().snapshot().in_use, 0);
    client.close().await;
    Ok(())
}

#[tokio::test]
async fn read_all_and_by_index() -> Result<()> {
    let server = FakeServer::new();
    singers(&server);
    server.create_index("SingersByName", "Singers", "Name");
    let client = connect(&server)?;

    let rows = client
        .single()
        .read("Singers", KeySet::all(), &["SingerId"])
        .collect()
        .await?;
    assert_eq!(rows.len(), 2);

    let row = client
        .single()
        .read_row_using_index("Singers", "SingersByName", Key::new().part("Marc"), &["SingerId"])
        .await?;
    assert_eq!(row.column::<i64>(0)?, 1);
    assert_eq!(server.read_requests()[1].index, "SingersByName");

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn chunked_values_are_merged_into_rows() -> Result<()> {
    let server = FakeServer::new();
    let sql = "SELECT Word, Tags FROM Docs";
    let fields = vec![
        field("Word", TypeCode::String),
        array_field("Tags", TypeCode::String),
    ];
    server.script_query(
        sql,
        vec![vec![
            Step::Message(PartialResultSet {
                chunked_value: true,
                ..first_chunk(fields, vec![string("hel")])
            }),
            Step::Message(PartialResultSet {
                chunked_value: true,
                ..chunk(vec![string("lo"), list(vec![string("a"), string("b")])])
            }),
            Step::Message(chunk(vec![list(vec![string("c"), string("d")])])),
        ]],
    );
    let client = connect(&server)?;

    let rows = client.single().query(Statement::new(sql)).collect().await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].column::<String>(0)?, "hello");
    assert_eq!(rows[0].column::<Vec<String>>(1)?, vec!["a", "bc", "d"]);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn stream_resumes_from_last_token_after_unavailable() -> Result<()> {
    let server = FakeServer::new();
    let fields = vec![field("Name", TypeCode::String)];
    let stmt = names_query(
        &server,
        vec![
            vec![
                Step::Message(with_token(first_chunk(fields, vec![string("a")]), "t1")),
                Step::Fail(Status::unavailable("connection reset")),
            ],
            vec![Step::Message(with_token(chunk(vec![string("b")]), "t2"))],
        ],
    );
    let client = connect(&server)?;

    let rows = client.single().query(stmt).collect().await?;
    let names: Vec<String> = rows
        .iter()
        .map(|r| r.column::<String>(0))
        .collect::<Result<_, _>>()?;
    assert_eq!(names, vec!["a", "b"]);

    let requests = server.sql_requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].resume_token.is_empty());
    assert_eq!(requests[1].resume_token, b"t1");

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn expired_session_before_first_token_switches_sessions() -> Result<()> {
    let server = FakeServer::new();
    let fields = vec![field("Name", TypeCode::String)];
    let stmt = names_query(
        &server,
        vec![vec![Step::Message(first_chunk(fields, vec![string("Marc")]))]],
    );
    server.fail_next(Rpc::ExecuteStreamingSql, session_not_found("gone"));
    let client = connect(&server)?;

    let rows = client.single().query(stmt).collect().await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(server.calls(Rpc::ExecuteStreamingSql), 2);
    assert_eq!(server.calls(Rpc::CreateSession), 2);

    let snapshot = client.pool().snapshot();
    assert_eq!(snapshot.in_use, 0);
    assert_eq!(snapshot.open, 1);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn expired_session_after_a_token_is_reported() -> Result<()> {
    let server = FakeServer::new();
    let fields = vec![field("Name", TypeCode::String)];
    let stmt = names_query(
        &server,
        vec![vec![
            Step::Message(with_token(first_chunk(fields, vec![string("a")]), "t1")),
            Step::Fail(session_not_found("gone")),
        ]],
    );
    let client = connect(&server)?;

    let mut rows = client.single().query(stmt);
    let first = rows.next().await?.expect("first row");
    assert_eq!(first.column::<String>(0)?, "a");
    let err = rows.next().await.unwrap_err();
    assert!(err.is_session_not_found());
    assert_eq!(server.calls(Rpc::ExecuteStreamingSql), 1);

    let snapshot = client.pool().snapshot();
    assert_eq!(snapshot.in_use, 0);
    assert_eq!(snapshot.open, 0);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn concurrent_reads_share_one_snapshot() -> Result<()> {
    let server = FakeServer::new();
    let fields = vec![field("Name", TypeCode::String)];
    let stmt = names_query(
        &server,
        vec![vec![Step::Message(first_chunk(fields, vec![string("Marc")]))]],
    );
    let client = connect(&server)?;

    let tx = client.read_only_transaction();
    let (a, b) = tokio::join!(
        tx.query(stmt.clone()).collect(),
        tx.query(stmt.clone()).collect()
    );
    assert_eq!(a?.len(), 1);
    assert_eq!(b?.len(), 1);
    assert!(tx.timestamp().is_ok());
    assert_eq!(server.calls(Rpc::BeginTransaction), 1);

    let ids: Vec<Vec<u8>> = server
        .sql_requests()
        .into_iter()
        .map(|req| match req.transaction.and_then(|t| t.selector) {
            Some(Selector::Id(id)) => id,
            other => panic!("unexpected selector {other:?}"),
        })
        .collect();
    assert_eq!(ids.len(), 2);
    assert_eq!(ids[0], ids[1]);

    tx.close();
    assert!(tx.query(stmt).collect().await.is_err());
    assert_eq!(client.pool().snapshot().in_use, 0);
    client.close().await;
    Ok(())
}

#[tokio::test]
async fn single_use_allows_one_read() -> Result<()> {
    let server = FakeServer::new();
    singers(&server);
    let client = connect(&server)?;

    let tx = client.single();
    tx.read("Singers", KeySet::all(), &["Name"]).collect().await?;
    assert!(tx.timestamp().is_ok());
    let err = tx
        .read("Singers", KeySet::all(), &["Name"])
        .collect()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    client.close().await;
    Ok(())
}

#[tokio::test]
async fn multi_use_rejects_bounded_staleness() -> Result<()> {
    let server = FakeServer::new();
    singers(&server);
    let client = connect(&server)?;

    let tx = client
        .read_only_transaction()
        .with_timestamp_bound(TimestampBound::max_staleness(Duration::from_secs(10)));
    let err = tx
        .read("Singers", KeySet::all(), &["Name"])
        .collect()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
    assert_eq!(server.calls(Rpc::BeginTransaction), 0);

    tx.close();
    client.close().await;
    Ok(())
}

#[tokio::test]
async fn read_timeout_bounds_stream_retries() -> Result<()> {
    let server = FakeServer::new();
    let stmt = names_query(
        &server,
        vec![vec![Step::Fail(Status::unavailable("connection reset"))]],
    );
    let client = connect(&server)?;

    let err = client
        .single()
        .with_timeout(Duration::from_millis(100))
        .query(stmt)
        .collect()
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);
    assert!(server.calls(Rpc::ExecuteStreamingSql) >= 1);
    assert_eq!(client.pool().snapshot().in_use, 0);

    client.close().await;
    Ok(())
}
