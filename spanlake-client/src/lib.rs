//! Client runtime for Spanner-compatible SQL databases.
//!
//! A [`Client`] keeps a pool of server sessions and hands them to
//! transactions: single-use and multi-use snapshot reads, retried read-write
//! transactions, caller-driven read-write transactions, partitioned reads,
//! partitioned DML and blind writes. Query results arrive as resumable
//! streams that are reassembled into [`Row`]s.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spanlake_client::value::ToValue;
//! use spanlake_client::{Client, Mutation, Statement};
//!
//! let client = Client::new("projects/p/instances/i/databases/d").await?;
//! client
//!     .read_write_transaction(|tx| async move {
//!         let stmt = Statement::new("UPDATE Accounts SET Balance = Balance - 1 WHERE Id = @id")
//!             .bind("id", 7i64);
//!         let n = tx.update(stmt).await?;
//!         tx.buffer_write([Mutation::insert(
//!             "Audit",
//!             ["Id", "Rows"],
//!             vec![7i64.to_value(), n.to_value()],
//!         )])
//!     })
//!     .await?;
//! client.close().await;
//! # Ok::<(), spanlake_client::Error>(())
//! ```

pub mod client;
pub mod config;
pub mod database;
pub mod error;
pub mod key;
pub mod metrics;
pub mod mutation;
pub mod options;
pub mod proto;
pub mod retry;
pub mod row;
pub mod session;
pub mod statement;
pub mod stream;
pub mod timestamp_bound;
pub mod transaction;
pub mod transport;
pub mod value;

pub use client::Client;
pub use config::{ClientConfig, SessionPoolConfig};
pub use database::DatabaseName;
pub use error::{Error, ErrorKind, Result};
pub use key::{Key, KeyRange, KeyRangeKind, KeySet};
pub use mutation::{Mutation, MutationGroup};
pub use options::{
    ApplyOptions, BatchWriteOptions, CommitOptions, PartitionOptions, PartitionedUpdateOptions,
    Priority, QueryMode, QueryOptions, ReadOptions, TransactionOptions,
};
pub use row::Row;
pub use statement::Statement;
pub use stream::RowIterator;
pub use timestamp_bound::TimestampBound;
pub use transaction::{
    BatchReadOnlyTransaction, BatchReadOnlyTransactionId, BatchWriteResponseIterator,
    BatchWriteResult, CommitResponse, Partition, ReadContext, ReadOnlyTransaction,
    ReadWriteStmtBasedTransaction, ReadWriteTransaction,
};
pub use value::{GenericColumnValue, Json, Numeric};
