//! Transactions: single and multi-use read-only, locking and statement-based
//! read-write, batch read-only, partitioned DML and blind writes.
//!
//! Every variant reads through [`ReadContext`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::key::{Key, KeySet};
use crate::options::{QueryMode, QueryOptions, ReadOptions};
use crate::proto::QueryPlan;
use crate::row::Row;
use crate::statement::Statement;
use crate::stream::{RowIterator, StreamRequest};

pub mod batch;
mod context;
pub(crate) mod pdml;
pub mod read_only;
pub mod read_write;
pub mod write_only;

pub(crate) use context::{in_read_write, scope_read_write};
#[doc(hidden)]
pub use context::{ClientContext, TxCore};

pub use batch::{BatchReadOnlyTransaction, BatchReadOnlyTransactionId, Partition};
pub use read_only::ReadOnlyTransaction;
pub use read_write::{CommitResponse, CommitStats, ReadWriteStmtBasedTransaction, ReadWriteTransaction};
pub use write_only::{BatchWriteResponseIterator, BatchWriteResult};

/// Reads and queries shared by all transaction types.
#[async_trait]
pub trait ReadContext: Send + Sync {
    #[doc(hidden)]
    fn tx_core(&self) -> Arc<dyn TxCore>;

    /// Reads `columns` of the rows of `table` identified by `keys`.
    fn read(&self, table: &str, keys: KeySet, columns: &[&str]) -> RowIterator {
        self.read_with_options(table, keys, columns, &ReadOptions::default())
    }

    /// Reads through a secondary index; `keys` are index keys.
    fn read_using_index(
        &self,
        table: &str,
        index: &str,
        keys: KeySet,
        columns: &[&str],
    ) -> RowIterator {
        self.read_with_options(table, keys, columns, &ReadOptions::using_index(index))
    }

    fn read_with_options(
        &self,
        table: &str,
        keys: KeySet,
        columns: &[&str],
        opts: &ReadOptions,
    ) -> RowIterator {
        let core = self.tx_core();
        match keys.to_proto() {
            Ok(keys) => {
                let req = context::build_read_request(core.as_ref(), table, keys, columns, opts);
                RowIterator::new(core, StreamRequest::Read(req))
            }
            Err(err) => RowIterator::failed(core, err),
        }
    }

    fn query(&self, stmt: Statement) -> RowIterator {
        self.query_with_options(stmt, &QueryOptions::default())
    }

    /// Runs `stmt` with per-call options. Optimizer settings left unset fall
    /// back to the client's.
    fn query_with_options(&self, stmt: Statement, opts: &QueryOptions) -> RowIterator {
        let core = self.tx_core();
        let req = context::build_sql_request(core.as_ref(), &stmt, opts);
        RowIterator::new(core, StreamRequest::Sql(req))
    }

    /// Runs `stmt` in profile mode; the plan and statistics are available on
    /// the iterator once it is exhausted.
    fn query_with_stats(&self, stmt: Statement) -> RowIterator {
        self.query_with_options(stmt, &QueryOptions::with_mode(QueryMode::Profile))
    }

    /// Returns the plan of `stmt` without running it.
    async fn analyze_query(&self, stmt: Statement) -> Result<QueryPlan> {
        let mut rows = self.query_with_options(stmt, &QueryOptions::with_mode(QueryMode::Plan));
        while rows.next().await?.is_some() {}
        rows.query_plan()
            .cloned()
            .ok_or_else(|| Error::internal("query plan unavailable"))
    }

    /// Reads a single row by primary key.
    async fn read_row(&self, table: &str, key: Key, columns: &[&str]) -> Result<Row> {
        self.read_row_with_options(table, key, columns, &ReadOptions::default())
            .await
    }

    async fn read_row_with_options(
        &self,
        table: &str,
        key: Key,
        columns: &[&str],
        opts: &ReadOptions,
    ) -> Result<Row> {
        let mut rows = self.read_with_options(table, key.clone().into(), columns, opts);
        let row = rows.next().await;
        rows.stop();
        row?.ok_or_else(|| {
            Error::row_not_found(format!("row not found(Table: {table}, PrimaryKey: {key})"))
        })
    }

    /// Reads the single row matching `key` in a unique index.
    async fn read_row_using_index(
        &self,
        table: &str,
        index: &str,
        key: Key,
        columns: &[&str],
    ) -> Result<Row> {
        let mut rows = self.read_using_index(table, index, key.clone().into(), columns);
        let first = rows.next().await?;
        let Some(row) = first else {
            return Err(Error::row_not_found(format!(
                "row not found(Table: {table}, IndexKey: {key}, Index: {index})"
            )));
        };
        let second = rows.next().await;
        rows.stop();
        if second?.is_some() {
            return Err(Error::failed_precondition(format!(
                "more than one row found by index(Table: {table}, IndexKey: {key}, Index: {index})"
            )));
        }
        Ok(row)
    }
}
