//! Wire messages for the `google.spanner.v1` data plane.
//!
//! The messages are declared by hand with `prost` derives instead of being
//! generated at build time, so the crate builds without `protoc`. Field tags
//! match the published protos; only the messages and fields the client
//! issues or consumes are declared, unknown fields are skipped on decode.

#![allow(clippy::derive_partial_eq_without_eq)]

use std::collections::HashMap;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Session {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(map = "string, string", tag = "2")]
    pub labels: HashMap<String, String>,
    #[prost(message, optional, tag = "3")]
    pub create_time: Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "4")]
    pub approximate_last_use_time: Option<::prost_types::Timestamp>,
    #[prost(string, tag = "5")]
    pub creator_role: String,
    #[prost(bool, tag = "6")]
    pub multiplexed: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateSessionRequest {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(message, optional, tag = "2")]
    pub session: Option<Session>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchCreateSessionsRequest {
    #[prost(string, tag = "1")]
    pub database: String,
    #[prost(message, optional, tag = "2")]
    pub session_template: Option<Session>,
    #[prost(int32, tag = "3")]
    pub session_count: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchCreateSessionsResponse {
    #[prost(message, repeated, tag = "1")]
    pub session: Vec<Session>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DeleteSessionRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestOptions {
    #[prost(enumeration = "request_options::Priority", tag = "1")]
    pub priority: i32,
    #[prost(string, tag = "2")]
    pub request_tag: String,
    #[prost(string, tag = "3")]
    pub transaction_tag: String,
}

pub mod request_options {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Priority {
        Unspecified = 0,
        Low = 1,
        Medium = 2,
        High = 3,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Type {
    #[prost(enumeration = "TypeCode", tag = "1")]
    pub code: i32,
    #[prost(message, optional, boxed, tag = "2")]
    pub array_element_type: Option<Box<Type>>,
    #[prost(message, optional, tag = "3")]
    pub struct_type: Option<StructType>,
    #[prost(enumeration = "TypeAnnotationCode", tag = "4")]
    pub type_annotation: i32,
    #[prost(string, tag = "5")]
    pub proto_type_fqn: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StructType {
    #[prost(message, repeated, tag = "1")]
    pub fields: Vec<struct_type::Field>,
}

pub mod struct_type {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Field {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(message, optional, tag = "2")]
        pub r#type: Option<super::Type>,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TypeCode {
    Unspecified = 0,
    Bool = 1,
    Int64 = 2,
    Float64 = 3,
    Float32 = 15,
    Timestamp = 4,
    Date = 5,
    String = 6,
    Bytes = 7,
    Array = 8,
    Struct = 9,
    Numeric = 10,
    Json = 11,
    Proto = 13,
    Enum = 14,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TypeAnnotationCode {
    Unspecified = 0,
    PgNumeric = 2,
    PgJsonb = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyRange {
    #[prost(oneof = "key_range::StartKeyType", tags = "1, 2")]
    pub start_key_type: Option<key_range::StartKeyType>,
    #[prost(oneof = "key_range::EndKeyType", tags = "3, 4")]
    pub end_key_type: Option<key_range::EndKeyType>,
}

pub mod key_range {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum StartKeyType {
        #[prost(message, tag = "1")]
        StartClosed(::prost_types::ListValue),
        #[prost(message, tag = "2")]
        StartOpen(::prost_types::ListValue),
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum EndKeyType {
        #[prost(message, tag = "3")]
        EndClosed(::prost_types::ListValue),
        #[prost(message, tag = "4")]
        EndOpen(::prost_types::ListValue),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeySet {
    #[prost(message, repeated, tag = "1")]
    pub keys: Vec<::prost_types::ListValue>,
    #[prost(message, repeated, tag = "2")]
    pub ranges: Vec<KeyRange>,
    #[prost(bool, tag = "3")]
    pub all: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Mutation {
    #[prost(oneof = "mutation::Operation", tags = "1, 2, 3, 4, 5")]
    pub operation: Option<mutation::Operation>,
}

pub mod mutation {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Write {
        #[prost(string, tag = "1")]
        pub table: String,
        #[prost(string, repeated, tag = "2")]
        pub columns: Vec<String>,
        #[prost(message, repeated, tag = "3")]
        pub values: Vec<::prost_types::ListValue>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Delete {
        #[prost(string, tag = "1")]
        pub table: String,
        #[prost(message, optional, tag = "2")]
        pub key_set: Option<super::KeySet>,
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Operation {
        #[prost(message, tag = "1")]
        Insert(Write),
        #[prost(message, tag = "2")]
        Update(Write),
        #[prost(message, tag = "3")]
        InsertOrUpdate(Write),
        #[prost(message, tag = "4")]
        Replace(Write),
        #[prost(message, tag = "5")]
        Delete(Delete),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionOptions {
    #[prost(bool, tag = "5")]
    pub exclude_txn_from_change_streams: bool,
    #[prost(oneof = "transaction_options::Mode", tags = "1, 3, 2")]
    pub mode: Option<transaction_options::Mode>,
}

pub mod transaction_options {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ReadWrite {
        #[prost(enumeration = "read_write::ReadLockMode", tag = "1")]
        pub read_lock_mode: i32,
    }

    pub mod read_write {
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
        )]
        #[repr(i32)]
        pub enum ReadLockMode {
            Unspecified = 0,
            Pessimistic = 1,
            Optimistic = 2,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PartitionedDml {}

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ReadOnly {
        #[prost(bool, tag = "6")]
        pub return_read_timestamp: bool,
        #[prost(oneof = "read_only::TimestampBound", tags = "1, 2, 3, 4, 5")]
        pub timestamp_bound: Option<read_only::TimestampBound>,
    }

    pub mod read_only {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum TimestampBound {
            #[prost(bool, tag = "1")]
            Strong(bool),
            #[prost(message, tag = "2")]
            MinReadTimestamp(::prost_types::Timestamp),
            #[prost(message, tag = "3")]
            MaxStaleness(::prost_types::Duration),
            #[prost(message, tag = "4")]
            ReadTimestamp(::prost_types::Timestamp),
            #[prost(message, tag = "5")]
            ExactStaleness(::prost_types::Duration),
        }
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Mode {
        #[prost(message, tag = "1")]
        ReadWrite(ReadWrite),
        #[prost(message, tag = "3")]
        PartitionedDml(PartitionedDml),
        #[prost(message, tag = "2")]
        ReadOnly(ReadOnly),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Transaction {
    #[prost(bytes = "vec", tag = "1")]
    pub id: Vec<u8>,
    #[prost(message, optional, tag = "2")]
    pub read_timestamp: Option<::prost_types::Timestamp>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransactionSelector {
    #[prost(oneof = "transaction_selector::Selector", tags = "1, 2, 3")]
    pub selector: Option<transaction_selector::Selector>,
}

pub mod transaction_selector {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Selector {
        #[prost(message, tag = "1")]
        SingleUse(super::TransactionOptions),
        #[prost(bytes, tag = "2")]
        Id(Vec<u8>),
        #[prost(message, tag = "3")]
        Begin(super::TransactionOptions),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlanNode {
    #[prost(int32, tag = "1")]
    pub index: i32,
    #[prost(enumeration = "plan_node::Kind", tag = "2")]
    pub kind: i32,
    #[prost(string, tag = "3")]
    pub display_name: String,
    #[prost(message, repeated, tag = "4")]
    pub child_links: Vec<plan_node::ChildLink>,
    #[prost(message, optional, tag = "6")]
    pub metadata: Option<::prost_types::Struct>,
    #[prost(message, optional, tag = "7")]
    pub execution_stats: Option<::prost_types::Struct>,
}

pub mod plan_node {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ChildLink {
        #[prost(int32, tag = "1")]
        pub child_index: i32,
        #[prost(string, tag = "2")]
        pub r#type: String,
        #[prost(string, tag = "3")]
        pub variable: String,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Kind {
        Unspecified = 0,
        Relational = 1,
        Scalar = 2,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryPlan {
    #[prost(message, repeated, tag = "1")]
    pub plan_nodes: Vec<PlanNode>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResultSetMetadata {
    #[prost(message, optional, tag = "1")]
    pub row_type: Option<StructType>,
    #[prost(message, optional, tag = "2")]
    pub transaction: Option<Transaction>,
    #[prost(message, optional, tag = "3")]
    pub undeclared_parameters: Option<StructType>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResultSetStats {
    #[prost(message, optional, tag = "1")]
    pub query_plan: Option<QueryPlan>,
    #[prost(message, optional, tag = "2")]
    pub query_stats: Option<::prost_types::Struct>,
    #[prost(oneof = "result_set_stats::RowCount", tags = "3, 4")]
    pub row_count: Option<result_set_stats::RowCount>,
}

pub mod result_set_stats {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum RowCount {
        #[prost(int64, tag = "3")]
        RowCountExact(i64),
        #[prost(int64, tag = "4")]
        RowCountLowerBound(i64),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResultSet {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<ResultSetMetadata>,
    #[prost(message, repeated, tag = "2")]
    pub rows: Vec<::prost_types::ListValue>,
    #[prost(message, optional, tag = "3")]
    pub stats: Option<ResultSetStats>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PartialResultSet {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<ResultSetMetadata>,
    #[prost(message, repeated, tag = "2")]
    pub values: Vec<::prost_types::Value>,
    #[prost(bool, tag = "3")]
    pub chunked_value: bool,
    #[prost(bytes = "vec", tag = "4")]
    pub resume_token: Vec<u8>,
    #[prost(message, optional, tag = "5")]
    pub stats: Option<ResultSetStats>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteSqlRequest {
    #[prost(string, tag = "1")]
    pub session: String,
    #[prost(message, optional, tag = "2")]
    pub transaction: Option<TransactionSelector>,
    #[prost(string, tag = "3")]
    pub sql: String,
    #[prost(message, optional, tag = "4")]
    pub params: Option<::prost_types::Struct>,
    #[prost(map = "string, message", tag = "5")]
    pub param_types: HashMap<String, Type>,
    #[prost(bytes = "vec", tag = "6")]
    pub resume_token: Vec<u8>,
    #[prost(enumeration = "execute_sql_request::QueryMode", tag = "7")]
    pub query_mode: i32,
    #[prost(bytes = "vec", tag = "8")]
    pub partition_token: Vec<u8>,
    #[prost(int64, tag = "9")]
    pub seqno: i64,
    #[prost(message, optional, tag = "10")]
    pub query_options: Option<execute_sql_request::QueryOptions>,
    #[prost(message, optional, tag = "11")]
    pub request_options: Option<RequestOptions>,
    #[prost(bool, tag = "16")]
    pub data_boost_enabled: bool,
}

pub mod execute_sql_request {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct QueryOptions {
        #[prost(string, tag = "1")]
        pub optimizer_version: String,
        #[prost(string, tag = "2")]
        pub optimizer_statistics_package: String,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum QueryMode {
        Normal = 0,
        Plan = 1,
        Profile = 2,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteBatchDmlRequest {
    #[prost(string, tag = "1")]
    pub session: String,
    #[prost(message, optional, tag = "2")]
    pub transaction: Option<TransactionSelector>,
    #[prost(message, repeated, tag = "3")]
    pub statements: Vec<execute_batch_dml_request::Statement>,
    #[prost(int64, tag = "4")]
    pub seqno: i64,
    #[prost(message, optional, tag = "5")]
    pub request_options: Option<RequestOptions>,
}

pub mod execute_batch_dml_request {
    use std::collections::HashMap;

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Statement {
        #[prost(string, tag = "1")]
        pub sql: String,
        #[prost(message, optional, tag = "2")]
        pub params: Option<::prost_types::Struct>,
        #[prost(map = "string, message", tag = "3")]
        pub param_types: HashMap<String, super::Type>,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecuteBatchDmlResponse {
    #[prost(message, repeated, tag = "1")]
    pub result_sets: Vec<ResultSet>,
    #[prost(message, optional, tag = "2")]
    pub status: Option<rpc::Status>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PartitionOptions {
    #[prost(int64, tag = "1")]
    pub partition_size_bytes: i64,
    #[prost(int64, tag = "2")]
    pub max_partitions: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PartitionQueryRequest {
    #[prost(string, tag = "1")]
    pub session: String,
    #[prost(message, optional, tag = "2")]
    pub transaction: Option<TransactionSelector>,
    #[prost(string, tag = "3")]
    pub sql: String,
    #[prost(message, optional, tag = "4")]
    pub params: Option<::prost_types::Struct>,
    #[prost(map = "string, message", tag = "5")]
    pub param_types: HashMap<String, Type>,
    #[prost(message, optional, tag = "6")]
    pub partition_options: Option<PartitionOptions>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PartitionReadRequest {
    #[prost(string, tag = "1")]
    pub session: String,
    #[prost(message, optional, tag = "2")]
    pub transaction: Option<TransactionSelector>,
    #[prost(string, tag = "3")]
    pub table: String,
    #[prost(string, tag = "4")]
    pub index: String,
    #[prost(string, repeated, tag = "5")]
    pub columns: Vec<String>,
    #[prost(message, optional, tag = "6")]
    pub key_set: Option<KeySet>,
    #[prost(message, optional, tag = "9")]
    pub partition_options: Option<PartitionOptions>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Partition {
    #[prost(bytes = "vec", tag = "1")]
    pub partition_token: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PartitionResponse {
    #[prost(message, repeated, tag = "1")]
    pub partitions: Vec<Partition>,
    #[prost(message, optional, tag = "2")]
    pub transaction: Option<Transaction>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadRequest {
    #[prost(string, tag = "1")]
    pub session: String,
    #[prost(message, optional, tag = "2")]
    pub transaction: Option<TransactionSelector>,
    #[prost(string, tag = "3")]
    pub table: String,
    #[prost(string, tag = "4")]
    pub index: String,
    #[prost(string, repeated, tag = "5")]
    pub columns: Vec<String>,
    #[prost(message, optional, tag = "6")]
    pub key_set: Option<KeySet>,
    #[prost(int64, tag = "8")]
    pub limit: i64,
    #[prost(bytes = "vec", tag = "9")]
    pub resume_token: Vec<u8>,
    #[prost(bytes = "vec", tag = "10")]
    pub partition_token: Vec<u8>,
    #[prost(message, optional, tag = "11")]
    pub request_options: Option<RequestOptions>,
    #[prost(bool, tag = "15")]
    pub data_boost_enabled: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BeginTransactionRequest {
    #[prost(string, tag = "1")]
    pub session: String,
    #[prost(message, optional, tag = "2")]
    pub options: Option<TransactionOptions>,
    #[prost(message, optional, tag = "3")]
    pub request_options: Option<RequestOptions>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommitRequest {
    #[prost(string, tag = "1")]
    pub session: String,
    #[prost(message, repeated, tag = "4")]
    pub mutations: Vec<Mutation>,
    #[prost(bool, tag = "5")]
    pub return_commit_stats: bool,
    #[prost(message, optional, tag = "6")]
    pub request_options: Option<RequestOptions>,
    #[prost(message, optional, tag = "8")]
    pub max_commit_delay: Option<::prost_types::Duration>,
    #[prost(oneof = "commit_request::Transaction", tags = "2, 3")]
    pub transaction: Option<commit_request::Transaction>,
}

pub mod commit_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Transaction {
        #[prost(bytes, tag = "2")]
        TransactionId(Vec<u8>),
        #[prost(message, tag = "3")]
        SingleUseTransaction(super::TransactionOptions),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CommitResponse {
    #[prost(message, optional, tag = "1")]
    pub commit_timestamp: Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "2")]
    pub commit_stats: Option<commit_response::CommitStats>,
}

pub mod commit_response {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct CommitStats {
        #[prost(int64, tag = "1")]
        pub mutation_count: i64,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RollbackRequest {
    #[prost(string, tag = "1")]
    pub session: String,
    #[prost(bytes = "vec", tag = "2")]
    pub transaction_id: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchWriteRequest {
    #[prost(string, tag = "1")]
    pub session: String,
    #[prost(message, optional, tag = "3")]
    pub request_options: Option<RequestOptions>,
    #[prost(message, repeated, tag = "4")]
    pub mutation_groups: Vec<batch_write_request::MutationGroup>,
    #[prost(bool, tag = "5")]
    pub exclude_txn_from_change_streams: bool,
}

pub mod batch_write_request {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct MutationGroup {
        #[prost(message, repeated, tag = "1")]
        pub mutations: Vec<super::Mutation>,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchWriteResponse {
    #[prost(int32, repeated, tag = "1")]
    pub indexes: Vec<i32>,
    #[prost(message, optional, tag = "2")]
    pub status: Option<rpc::Status>,
    #[prost(message, optional, tag = "3")]
    pub commit_timestamp: Option<::prost_types::Timestamp>,
}

/// `google.rpc` error model messages carried in status details.
pub mod rpc {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Status {
        #[prost(int32, tag = "1")]
        pub code: i32,
        #[prost(string, tag = "2")]
        pub message: String,
        #[prost(message, repeated, tag = "3")]
        pub details: Vec<::prost_types::Any>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RetryInfo {
        #[prost(message, optional, tag = "1")]
        pub retry_delay: Option<::prost_types::Duration>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ResourceInfo {
        #[prost(string, tag = "1")]
        pub resource_type: String,
        #[prost(string, tag = "2")]
        pub resource_name: String,
        #[prost(string, tag = "3")]
        pub owner: String,
        #[prost(string, tag = "4")]
        pub description: String,
    }

    pub const RETRY_INFO_TYPE_URL: &str = "type.googleapis.com/google.rpc.RetryInfo";
    pub const RESOURCE_INFO_TYPE_URL: &str = "type.googleapis.com/google.rpc.ResourceInfo";
}

/// The slice of `google.spanner.admin.instance.v1` used for endpoint lookup.
pub mod admin {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct GetInstanceRequest {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(message, optional, tag = "2")]
        pub field_mask: Option<::prost_types::FieldMask>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Instance {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(string, repeated, tag = "8")]
        pub endpoint_uris: Vec<String>,
    }
}
