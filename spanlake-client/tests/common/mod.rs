//! In-memory stand-in for the database service. Tables are keyed by their
//! first column, queries are scripted per SQL text and any RPC can be made
//! to fail with a queued status.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::{stream, StreamExt};
use prost_types::value::Kind;
use prost_types::{ListValue, Timestamp, Value};
use spanlake_client::error::status_with_retry_delay;
use spanlake_client::proto::{
    commit_request, commit_response, mutation, result_set_stats::RowCount, rpc,
    struct_type::Field, transaction_options, transaction_selector::Selector,
    BatchCreateSessionsRequest, BatchCreateSessionsResponse, BatchWriteRequest,
    BatchWriteResponse, BeginTransactionRequest, CommitRequest, CommitResponse,
    CreateSessionRequest, DeleteSessionRequest, ExecuteBatchDmlRequest, ExecuteBatchDmlResponse,
    ExecuteSqlRequest, KeySet, Mutation, PartialResultSet, Partition, PartitionQueryRequest,
    PartitionReadRequest, PartitionResponse, ReadRequest, ResultSet, ResultSetMetadata,
    ResultSetStats, RollbackRequest, Session, StructType, Transaction, TransactionSelector, Type,
    TypeCode,
};
use spanlake_client::transport::{BatchWriteStream, PartialResultStream, SpannerRpc};
use spanlake_client::{Client, ClientConfig};
use tonic::{Code, Request, Response, Status};

/// Statement the pool's keep-alive sends.
pub const PING: &str = "SELECT 1";

pub const DATABASE: &str = "projects/test-project/instances/test-instance/databases/test-db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rpc {
    CreateSession,
    BatchCreateSessions,
    DeleteSession,
    ExecuteSql,
    ExecuteStreamingSql,
    ExecuteBatchDml,
    StreamingRead,
    BeginTransaction,
    Commit,
    Rollback,
    PartitionQuery,
    PartitionRead,
    BatchWrite,
}

/// One item of a scripted result stream.
#[derive(Clone)]
pub enum Step {
    Message(PartialResultSet),
    Fail(Status),
    /// Holds the stream back before the next step.
    Pause(Duration),
}

struct Table {
    columns: Vec<(String, TypeCode)>,
    rows: BTreeMap<String, Vec<Value>>,
}

#[derive(Default)]
struct State {
    sessions: HashSet<String>,
    next_session: u64,
    next_tx: u64,
    transactions: HashSet<Vec<u8>>,
    pdml: HashSet<Vec<u8>>,
    tables: HashMap<String, Table>,
    /// index name -> (table, column position)
    indexes: HashMap<String, (String, usize)>,
    queries: HashMap<String, VecDeque<Vec<Step>>>,
    dml: HashMap<String, i64>,
    faults: HashMap<Rpc, VecDeque<Status>>,
    calls: HashMap<Rpc, usize>,
    partitions: usize,
    begins: Vec<BeginTransactionRequest>,
    commits: Vec<CommitRequest>,
    sql_requests: Vec<ExecuteSqlRequest>,
    read_requests: Vec<ReadRequest>,
    rollbacks: Vec<Vec<u8>>,
    deleted: Vec<String>,
}

pub struct FakeServer {
    state: Mutex<State>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                partitions: 2,
                ..Default::default()
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn create_table(&self, name: &str, columns: &[(&str, TypeCode)]) {
        self.lock().tables.insert(
            name.to_string(),
            Table {
                columns: columns.iter().map(|(c, t)| (c.to_string(), *t)).collect(),
                rows: BTreeMap::new(),
            },
        );
    }

    /// Declares a unique index on `column` of `table`.
    pub fn create_index(&self, name: &str, table: &str, column: &str) {
        let mut state = self.lock();
        let position = state.tables[table]
            .columns
            .iter()
            .position(|(c, _)| c == column)
            .unwrap();
        state
            .indexes
            .insert(name.to_string(), (table.to_string(), position));
    }

    pub fn insert_row(&self, table: &str, values: Vec<Value>) {
        let mut state = self.lock();
        let table = state.tables.get_mut(table).unwrap();
        table.rows.insert(key_of(&values[0]), values);
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables[table].rows.len()
    }

    /// Queues result streams for `sql`. Each execution takes the next one;
    /// the last one is replayed once the others are used up.
    pub fn script_query(&self, sql: &str, attempts: Vec<Vec<Step>>) {
        self.lock()
            .queries
            .insert(sql.to_string(), attempts.into_iter().collect());
    }

    pub fn set_dml(&self, sql: &str, row_count: i64) {
        self.lock().dml.insert(sql.to_string(), row_count);
    }

    pub fn set_partitions(&self, n: usize) {
        self.lock().partitions = n;
    }

    pub fn fail_next(&self, rpc: Rpc, status: Status) {
        self.lock().faults.entry(rpc).or_default().push_back(status);
    }

    pub fn abort_next_commits(&self, n: usize, retry_delay: Duration) {
        for _ in 0..n {
            self.fail_next(
                Rpc::Commit,
                status_with_retry_delay(Code::Aborted, "transaction was aborted", retry_delay),
            );
        }
    }

    /// Forgets every session, as if the server garbage collected them.
    pub fn expire_all_sessions(&self) {
        self.lock().sessions.clear();
    }

    pub fn calls(&self, rpc: Rpc) -> usize {
        self.lock().calls.get(&rpc).copied().unwrap_or(0)
    }

    pub fn begins(&self) -> Vec<BeginTransactionRequest> {
        self.lock().begins.clone()
    }

    pub fn commits(&self) -> Vec<CommitRequest> {
        self.lock().commits.clone()
    }

    pub fn sql_requests(&self) -> Vec<ExecuteSqlRequest> {
        self.lock().sql_requests.clone()
    }

    pub fn read_requests(&self) -> Vec<ReadRequest> {
        self.lock().read_requests.clone()
    }

    pub fn rollbacks(&self) -> Vec<Vec<u8>> {
        self.lock().rollbacks.clone()
    }

    pub fn deleted_sessions(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    /// Sessions the keep-alive pinged, in order.
    pub fn pinged_sessions(&self) -> Vec<String> {
        self.lock()
            .sql_requests
            .iter()
            .filter(|req| req.sql == PING)
            .map(|req| req.session.clone())
            .collect()
    }

    pub fn live_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Records the call and returns the queued fault for it, if any.
    fn enter(&self, rpc: Rpc) -> Result<MutexGuard<'_, State>, Status> {
        let mut state = self.lock();
        *state.calls.entry(rpc).or_default() += 1;
        if let Some(status) = state.faults.get_mut(&rpc).and_then(VecDeque::pop_front) {
            return Err(status);
        }
        Ok(state)
    }
}

impl State {
    fn new_session(&mut self, database: &str) -> Session {
        self.next_session += 1;
        let name = format!("{database}/sessions/s{}", self.next_session);
        self.sessions.insert(name.clone());
        Session {
            name,
            ..Default::default()
        }
    }

    fn check_session(&self, name: &str) -> Result<(), Status> {
        if self.sessions.contains(name) {
            Ok(())
        } else {
            Err(session_not_found(name))
        }
    }

    fn new_transaction(&mut self, read_only: bool) -> Transaction {
        self.next_tx += 1;
        let id = format!("tx-{}", self.next_tx).into_bytes();
        self.transactions.insert(id.clone());
        Transaction {
            id,
            read_timestamp: read_only.then(now),
        }
    }

    /// The transaction to report in result metadata for `selector`.
    fn selected(&mut self, selector: &Option<TransactionSelector>) -> Result<Option<Transaction>, Status> {
        match selector.as_ref().and_then(|s| s.selector.as_ref()) {
            Some(Selector::Begin(opts)) => {
                let read_only = matches!(opts.mode, Some(transaction_options::Mode::ReadOnly(_)));
                Ok(Some(self.new_transaction(read_only)))
            }
            Some(Selector::SingleUse(_)) | None => Ok(Some(Transaction {
                id: Vec::new(),
                read_timestamp: Some(now()),
            })),
            Some(Selector::Id(id)) if self.transactions.contains(id) => Ok(None),
            Some(Selector::Id(_)) => Err(Status::failed_precondition("unknown transaction")),
        }
    }

    fn next_script(&mut self, sql: &str) -> Option<Vec<Step>> {
        let attempts = self.queries.get_mut(sql)?;
        if attempts.len() > 1 {
            attempts.pop_front()
        } else {
            attempts.front().cloned()
        }
    }

    fn read(&self, req: &ReadRequest) -> Result<(StructType, Vec<Vec<Value>>), Status> {
        let table = self
            .tables
            .get(&req.table)
            .ok_or_else(|| Status::not_found(format!("Table not found: {}", req.table)))?;
        let key_column = if req.index.is_empty() {
            0
        } else {
            match self.indexes.get(&req.index) {
                Some((t, position)) if *t == req.table => *position,
                _ => return Err(Status::not_found(format!("Index not found: {}", req.index))),
            }
        };
        let positions = req
            .columns
            .iter()
            .map(|c| {
                table
                    .columns
                    .iter()
                    .position(|(name, _)| name == c)
                    .ok_or_else(|| Status::not_found(format!("Column not found: {c}")))
            })
            .collect::<Result<Vec<_>, Status>>()?;
        let key_set = req.key_set.clone().unwrap_or_default();
        let wanted: HashSet<String> = key_set
            .keys
            .iter()
            .filter_map(|k| k.values.first().map(key_of))
            .collect();
        let mut rows: Vec<Vec<Value>> = table
            .rows
            .values()
            .filter(|row| key_set.all || wanted.contains(&key_of(&row[key_column])))
            .map(|row| positions.iter().map(|p| row[*p].clone()).collect())
            .collect();
        if req.limit > 0 {
            rows.truncate(req.limit as usize);
        }
        let fields = positions
            .iter()
            .map(|p| field(&table.columns[*p].0, table.columns[*p].1))
            .collect();
        Ok((StructType { fields }, rows))
    }

    fn apply(&mut self, mutations: &[Mutation]) -> Result<(), Status> {
        for m in mutations {
            match &m.operation {
                Some(mutation::Operation::Insert(w))
                | Some(mutation::Operation::Update(w))
                | Some(mutation::Operation::InsertOrUpdate(w))
                | Some(mutation::Operation::Replace(w)) => self.write(w)?,
                Some(mutation::Operation::Delete(d)) => {
                    let table = self.table_mut(&d.table)?;
                    let key_set = d.key_set.clone().unwrap_or_default();
                    if key_set.all {
                        table.rows.clear();
                    }
                    for key in &key_set.keys {
                        if let Some(k) = key.values.first() {
                            table.rows.remove(&key_of(k));
                        }
                    }
                }
                None => return Err(Status::invalid_argument("empty mutation")),
            }
        }
        Ok(())
    }

    fn write(&mut self, w: &mutation::Write) -> Result<(), Status> {
        let table = self.table_mut(&w.table)?;
        let positions = w
            .columns
            .iter()
            .map(|c| {
                table
                    .columns
                    .iter()
                    .position(|(name, _)| name == c)
                    .ok_or_else(|| Status::not_found(format!("Column not found: {c}")))
            })
            .collect::<Result<Vec<_>, Status>>()?;
        if positions.first() != Some(&0) {
            return Err(Status::invalid_argument("the key column must come first"));
        }
        let width = table.columns.len();
        for values in &w.values {
            let key = key_of(&values.values[0]);
            let row = table
                .rows
                .entry(key)
                .or_insert_with(|| vec![null(); width]);
            for (p, v) in positions.iter().zip(&values.values) {
                row[*p] = v.clone();
            }
        }
        Ok(())
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, Status> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Status::not_found(format!("Table not found: {name}")))
    }
}

#[async_trait]
impl SpannerRpc for FakeServer {
    fn num_channels(&self) -> usize {
        1
    }

    async fn create_session(
        &self,
        _channel: usize,
        req: Request<CreateSessionRequest>,
    ) -> Result<Response<Session>, Status> {
        let mut state = self.enter(Rpc::CreateSession)?;
        let database = req.into_inner().database;
        Ok(Response::new(state.new_session(&database)))
    }

    async fn batch_create_sessions(
        &self,
        _channel: usize,
        req: Request<BatchCreateSessionsRequest>,
    ) -> Result<Response<BatchCreateSessionsResponse>, Status> {
        let mut state = self.enter(Rpc::BatchCreateSessions)?;
        let req = req.into_inner();
        let session = (0..req.session_count)
            .map(|_| state.new_session(&req.database))
            .collect();
        Ok(Response::new(BatchCreateSessionsResponse { session }))
    }

    async fn delete_session(
        &self,
        _channel: usize,
        req: Request<DeleteSessionRequest>,
    ) -> Result<Response<()>, Status> {
        let mut state = self.enter(Rpc::DeleteSession)?;
        let name = req.into_inner().name;
        state.sessions.remove(&name);
        state.deleted.push(name);
        Ok(Response::new(()))
    }

    async fn execute_sql(
        &self,
        _channel: usize,
        req: Request<ExecuteSqlRequest>,
    ) -> Result<Response<ResultSet>, Status> {
        let mut state = self.enter(Rpc::ExecuteSql)?;
        let req = req.into_inner();
        state.sql_requests.push(req.clone());
        state.check_session(&req.session)?;
        if req.sql == PING {
            return Ok(Response::new(ResultSet {
                metadata: Some(ResultSetMetadata {
                    row_type: Some(StructType {
                        fields: vec![field("", TypeCode::Int64)],
                    }),
                    ..Default::default()
                }),
                rows: vec![ListValue {
                    values: vec![int64(1)],
                }],
                stats: None,
            }));
        }
        let count = *state
            .dml
            .get(&req.sql)
            .ok_or_else(|| Status::invalid_argument(format!("unknown statement: {}", req.sql)))?;
        let pdml = matches!(
            req.transaction.as_ref().and_then(|t| t.selector.as_ref()),
            Some(Selector::Id(id)) if state.pdml.contains(id)
        );
        let transaction = state.selected(&req.transaction)?;
        let row_count = if pdml {
            RowCount::RowCountLowerBound(count)
        } else {
            RowCount::RowCountExact(count)
        };
        Ok(Response::new(ResultSet {
            metadata: Some(ResultSetMetadata {
                row_type: Some(StructType::default()),
                transaction,
                undeclared_parameters: None,
            }),
            rows: Vec::new(),
            stats: Some(ResultSetStats {
                row_count: Some(row_count),
                ..Default::default()
            }),
        }))
    }

    async fn execute_streaming_sql(
        &self,
        _channel: usize,
        req: Request<ExecuteSqlRequest>,
    ) -> Result<Response<PartialResultStream>, Status> {
        let mut state = self.enter(Rpc::ExecuteStreamingSql)?;
        let req = req.into_inner();
        state.sql_requests.push(req.clone());
        state.check_session(&req.session)?;
        let transaction = state.selected(&req.transaction)?;
        let mut steps = if let Some(steps) = state.next_script(&req.sql) {
            steps
        } else if let Some(count) = state.dml.get(&req.sql) {
            vec![Step::Message(PartialResultSet {
                metadata: Some(ResultSetMetadata {
                    row_type: Some(StructType::default()),
                    ..Default::default()
                }),
                stats: Some(ResultSetStats {
                    row_count: Some(RowCount::RowCountExact(*count)),
                    ..Default::default()
                }),
                ..Default::default()
            })]
        } else {
            return Err(Status::invalid_argument(format!("unknown statement: {}", req.sql)));
        };
        if req.resume_token.is_empty() {
            attach_transaction(&mut steps, transaction);
        }
        Ok(Response::new(into_stream(steps)))
    }

    async fn execute_batch_dml(
        &self,
        _channel: usize,
        req: Request<ExecuteBatchDmlRequest>,
    ) -> Result<Response<ExecuteBatchDmlResponse>, Status> {
        let mut state = self.enter(Rpc::ExecuteBatchDml)?;
        let req = req.into_inner();
        state.check_session(&req.session)?;
        let mut transaction = state.selected(&req.transaction)?;
        let mut result_sets = Vec::new();
        let mut status = None;
        for stmt in &req.statements {
            let Some(count) = state.dml.get(&stmt.sql) else {
                status = Some(rpc::Status {
                    code: Code::InvalidArgument as i32,
                    message: format!("unknown statement: {}", stmt.sql),
                    details: Vec::new(),
                });
                break;
            };
            result_sets.push(ResultSet {
                metadata: Some(ResultSetMetadata {
                    row_type: Some(StructType::default()),
                    transaction: transaction.take(),
                    undeclared_parameters: None,
                }),
                rows: Vec::new(),
                stats: Some(ResultSetStats {
                    row_count: Some(RowCount::RowCountExact(*count)),
                    ..Default::default()
                }),
            });
        }
        Ok(Response::new(ExecuteBatchDmlResponse {
            result_sets,
            status,
        }))
    }

    async fn streaming_read(
        &self,
        _channel: usize,
        req: Request<ReadRequest>,
    ) -> Result<Response<PartialResultStream>, Status> {
        let mut state = self.enter(Rpc::StreamingRead)?;
        let req = req.into_inner();
        state.read_requests.push(req.clone());
        state.check_session(&req.session)?;
        let transaction = state.selected(&req.transaction)?;
        let (row_type, rows) = state.read(&req)?;
        let mut steps = vec![Step::Message(PartialResultSet {
            metadata: Some(ResultSetMetadata {
                row_type: Some(row_type),
                ..Default::default()
            }),
            values: rows.into_iter().flatten().collect(),
            ..Default::default()
        })];
        attach_transaction(&mut steps, transaction);
        Ok(Response::new(into_stream(steps)))
    }

    async fn begin_transaction(
        &self,
        _channel: usize,
        req: Request<BeginTransactionRequest>,
    ) -> Result<Response<Transaction>, Status> {
        let mut state = self.enter(Rpc::BeginTransaction)?;
        let req = req.into_inner();
        state.begins.push(req.clone());
        state.check_session(&req.session)?;
        let mode = req.options.as_ref().and_then(|o| o.mode.as_ref());
        let read_only = matches!(mode, Some(transaction_options::Mode::ReadOnly(_)));
        let tx = state.new_transaction(read_only);
        if matches!(mode, Some(transaction_options::Mode::PartitionedDml(_))) {
            state.pdml.insert(tx.id.clone());
        }
        Ok(Response::new(tx))
    }

    async fn commit(
        &self,
        _channel: usize,
        req: Request<CommitRequest>,
    ) -> Result<Response<CommitResponse>, Status> {
        let mut state = self.enter(Rpc::Commit)?;
        let req = req.into_inner();
        state.check_session(&req.session)?;
        match &req.transaction {
            Some(commit_request::Transaction::TransactionId(id)) => {
                if !state.transactions.remove(id) {
                    return Err(Status::failed_precondition("unknown transaction"));
                }
            }
            Some(commit_request::Transaction::SingleUseTransaction(_)) => {}
            None => return Err(Status::invalid_argument("commit without a transaction")),
        }
        state.apply(&req.mutations)?;
        let commit_stats = req
            .return_commit_stats
            .then(|| commit_response::CommitStats {
                mutation_count: req.mutations.len() as i64,
            });
        state.commits.push(req);
        Ok(Response::new(CommitResponse {
            commit_timestamp: Some(now()),
            commit_stats,
        }))
    }

    async fn rollback(
        &self,
        _channel: usize,
        req: Request<RollbackRequest>,
    ) -> Result<Response<()>, Status> {
        let mut state = self.enter(Rpc::Rollback)?;
        let req = req.into_inner();
        state.transactions.remove(&req.transaction_id);
        state.rollbacks.push(req.transaction_id);
        Ok(Response::new(()))
    }

    async fn partition_query(
        &self,
        _channel: usize,
        req: Request<PartitionQueryRequest>,
    ) -> Result<Response<PartitionResponse>, Status> {
        let state = self.enter(Rpc::PartitionQuery)?;
        let req = req.into_inner();
        state.check_session(&req.session)?;
        Ok(Response::new(partitions(&state, &req.sql)))
    }

    async fn partition_read(
        &self,
        _channel: usize,
        req: Request<PartitionReadRequest>,
    ) -> Result<Response<PartitionResponse>, Status> {
        let state = self.enter(Rpc::PartitionRead)?;
        let req = req.into_inner();
        state.check_session(&req.session)?;
        Ok(Response::new(partitions(&state, &req.table)))
    }

    async fn batch_write(
        &self,
        _channel: usize,
        req: Request<BatchWriteRequest>,
    ) -> Result<Response<BatchWriteStream>, Status> {
        let mut state = self.enter(Rpc::BatchWrite)?;
        let req = req.into_inner();
        state.check_session(&req.session)?;
        let mut responses = Vec::new();
        for (i, group) in req.mutation_groups.iter().enumerate() {
            let status = match state.apply(&group.mutations) {
                Ok(()) => rpc::Status::default(),
                Err(status) => rpc::Status {
                    code: status.code() as i32,
                    message: status.message().to_string(),
                    details: Vec::new(),
                },
            };
            let committed = status.code == Code::Ok as i32;
            responses.push(Ok(BatchWriteResponse {
                indexes: vec![i as i32],
                status: Some(status),
                commit_timestamp: committed.then(now),
            }));
        }
        Ok(Response::new(stream::iter(responses).boxed()))
    }
}

fn partitions(state: &State, target: &str) -> PartitionResponse {
    PartitionResponse {
        partitions: (0..state.partitions)
            .map(|i| Partition {
                partition_token: format!("{target}#{i}").into_bytes(),
            })
            .collect(),
        transaction: None,
    }
}

fn attach_transaction(steps: &mut [Step], transaction: Option<Transaction>) {
    let Some(transaction) = transaction else { return };
    let first = steps.iter_mut().find_map(|step| match step {
        Step::Message(msg) => Some(msg),
        _ => None,
    });
    if let Some(first) = first {
        first
            .metadata
            .get_or_insert_with(ResultSetMetadata::default)
            .transaction = Some(transaction);
    }
}

fn into_stream(steps: Vec<Step>) -> PartialResultStream {
    stream::iter(steps)
        .filter_map(|step| async move {
            match step {
                Step::Message(msg) => Some(Ok(msg)),
                Step::Fail(status) => Some(Err(status)),
                Step::Pause(delay) => {
                    tokio::time::sleep(delay).await;
                    None
                }
            }
        })
        .boxed()
}

fn key_of(value: &Value) -> String {
    format!("{:?}", value.kind)
}

fn now() -> Timestamp {
    let now = Utc::now();
    Timestamp {
        seconds: now.timestamp(),
        nanos: now.timestamp_subsec_nanos() as i32,
    }
}

pub fn session_not_found(name: &str) -> Status {
    Status::not_found(format!("Session not found: {name}"))
}

pub fn null() -> Value {
    Value {
        kind: Some(Kind::NullValue(0)),
    }
}

pub fn string(s: &str) -> Value {
    Value {
        kind: Some(Kind::StringValue(s.to_string())),
    }
}

pub fn int64(n: i64) -> Value {
    string(&n.to_string())
}

pub fn list(values: Vec<Value>) -> Value {
    Value {
        kind: Some(Kind::ListValue(ListValue { values })),
    }
}

pub fn field(name: &str, code: TypeCode) -> Field {
    Field {
        name: name.to_string(),
        r#type: Some(Type {
            code: code as i32,
            ..Default::default()
        }),
    }
}

pub fn array_field(name: &str, element: TypeCode) -> Field {
    Field {
        name: name.to_string(),
        r#type: Some(Type {
            code: TypeCode::Array as i32,
            array_element_type: Some(Box::new(Type {
                code: element as i32,
                ..Default::default()
            })),
            ..Default::default()
        }),
    }
}

/// First message of a result stream: column metadata plus values.
pub fn first_chunk(fields: Vec<Field>, values: Vec<Value>) -> PartialResultSet {
    PartialResultSet {
        metadata: Some(ResultSetMetadata {
            row_type: Some(StructType { fields }),
            ..Default::default()
        }),
        values,
        ..Default::default()
    }
}

pub fn chunk(values: Vec<Value>) -> PartialResultSet {
    PartialResultSet {
        values,
        ..Default::default()
    }
}

/// Pool settings for tests: sessions are created on demand and none are
/// prepared for writes.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.session_pool.min_opened = 0;
    config.session_pool.max_opened = 10;
    config.session_pool.write_sessions = 0.0;
    config.session_pool.acquire_timeout_ms = 5_000;
    config.session_pool.close_timeout_ms = 200;
    config
}

pub fn connect(server: &Arc<FakeServer>) -> Result<Client> {
    connect_with(server, test_config())
}

pub fn connect_with(server: &Arc<FakeServer>, config: ClientConfig) -> Result<Client> {
    let rpc: Arc<dyn SpannerRpc> = server.clone();
    Ok(Client::with_transport(DATABASE, config, rpc)?)
}

pub fn key_set_of(keys: &[Value]) -> KeySet {
    KeySet {
        keys: keys
            .iter()
            .map(|k| ListValue {
                values: vec![k.clone()],
            })
            .collect(),
        ..Default::default()
    }
}
