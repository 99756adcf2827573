//! Per-call options for reads, queries, transactions and writes.

use std::time::Duration;

use crate::proto::{self, execute_sql_request, request_options, transaction_options};
use crate::timestamp_bound::to_duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Unspecified,
    Low,
    Medium,
    High,
}

impl Priority {
    fn to_proto(self) -> i32 {
        let priority = match self {
            Priority::Unspecified => request_options::Priority::Unspecified,
            Priority::Low => request_options::Priority::Low,
            Priority::Medium => request_options::Priority::Medium,
            Priority::High => request_options::Priority::High,
        };
        priority as i32
    }
}

pub(crate) fn request_options(
    priority: Priority,
    request_tag: &str,
    transaction_tag: &str,
) -> Option<proto::RequestOptions> {
    if priority == Priority::Unspecified && request_tag.is_empty() && transaction_tag.is_empty() {
        return None;
    }
    Some(proto::RequestOptions {
        priority: priority.to_proto(),
        request_tag: request_tag.to_string(),
        transaction_tag: transaction_tag.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryMode {
    #[default]
    Normal,
    /// Returns only the query plan, no rows.
    Plan,
    /// Returns rows, the plan and execution statistics.
    Profile,
}

impl QueryMode {
    pub(crate) fn to_proto(self) -> i32 {
        let mode = match self {
            QueryMode::Normal => execute_sql_request::QueryMode::Normal,
            QueryMode::Plan => execute_sql_request::QueryMode::Plan,
            QueryMode::Profile => execute_sql_request::QueryMode::Profile,
        };
        mode as i32
    }
}

/// Optimizer hints sent with every query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OptimizerOptions {
    pub version: Option<String>,
    pub statistics_package: Option<String>,
}

impl OptimizerOptions {
    /// Fields set in `self` win over `fallback`.
    pub(crate) fn or(&self, fallback: &OptimizerOptions) -> OptimizerOptions {
        OptimizerOptions {
            version: self.version.clone().or_else(|| fallback.version.clone()),
            statistics_package: self
                .statistics_package
                .clone()
                .or_else(|| fallback.statistics_package.clone()),
        }
    }

    pub(crate) fn to_proto(&self) -> Option<execute_sql_request::QueryOptions> {
        if self.version.is_none() && self.statistics_package.is_none() {
            return None;
        }
        Some(execute_sql_request::QueryOptions {
            optimizer_version: self.version.clone().unwrap_or_default(),
            optimizer_statistics_package: self.statistics_package.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryOptions {
    pub mode: QueryMode,
    pub optimizer: OptimizerOptions,
    pub priority: Priority,
    pub request_tag: String,
    pub data_boost_enabled: bool,
}

impl QueryOptions {
    pub fn with_mode(mode: QueryMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadOptions {
    /// Secondary index to read through instead of the primary key.
    pub index: Option<String>,
    /// Maximum rows to return; zero means no limit.
    pub limit: i64,
    pub priority: Priority,
    pub request_tag: String,
    pub data_boost_enabled: bool,
}

impl ReadOptions {
    pub fn using_index(index: impl Into<String>) -> Self {
        Self {
            index: Some(index.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadLockMode {
    #[default]
    Unspecified,
    Pessimistic,
    Optimistic,
}

impl ReadLockMode {
    pub(crate) fn to_proto(self) -> i32 {
        use transaction_options::read_write::ReadLockMode as Wire;
        let mode = match self {
            ReadLockMode::Unspecified => Wire::Unspecified,
            ReadLockMode::Pessimistic => Wire::Pessimistic,
            ReadLockMode::Optimistic => Wire::Optimistic,
        };
        mode as i32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitOptions {
    pub return_commit_stats: bool,
    /// How long the server may delay the commit to batch it with others.
    pub max_commit_delay: Option<Duration>,
}

impl CommitOptions {
    pub(crate) fn max_commit_delay_proto(&self) -> Option<prost_types::Duration> {
        self.max_commit_delay.map(to_duration)
    }
}

/// Options of a read-write transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    pub commit_options: CommitOptions,
    pub transaction_tag: String,
    pub commit_priority: Priority,
    pub read_lock_mode: ReadLockMode,
    pub exclude_txn_from_change_streams: bool,
    /// Deadline for the whole retry loop. `None` uses the client default.
    pub timeout: Option<Duration>,
}

impl TransactionOptions {
    pub(crate) fn read_write_options(&self) -> proto::TransactionOptions {
        proto::TransactionOptions {
            exclude_txn_from_change_streams: self.exclude_txn_from_change_streams,
            mode: Some(transaction_options::Mode::ReadWrite(
                transaction_options::ReadWrite {
                    read_lock_mode: self.read_lock_mode.to_proto(),
                },
            )),
        }
    }

    pub(crate) fn commit_request_options(&self) -> Option<proto::RequestOptions> {
        request_options(self.commit_priority, "", &self.transaction_tag)
    }
}

/// Options of [`crate::Client::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApplyOptions {
    /// Skip replay protection: one single-use commit that may apply twice.
    pub at_least_once: bool,
    pub priority: Priority,
    pub transaction_tag: String,
    pub exclude_txn_from_change_streams: bool,
    pub commit_options: CommitOptions,
}

impl ApplyOptions {
    pub fn at_least_once() -> Self {
        Self {
            at_least_once: true,
            ..Default::default()
        }
    }

    pub(crate) fn transaction_options(&self) -> TransactionOptions {
        TransactionOptions {
            commit_options: self.commit_options,
            transaction_tag: self.transaction_tag.clone(),
            commit_priority: self.priority,
            exclude_txn_from_change_streams: self.exclude_txn_from_change_streams,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchWriteOptions {
    pub priority: Priority,
    pub transaction_tag: String,
    pub exclude_txn_from_change_streams: bool,
}

/// Hints for partition generation; the server may return a different count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PartitionOptions {
    pub partition_bytes: i64,
    pub max_partitions: i64,
}

impl PartitionOptions {
    pub(crate) fn to_proto(self) -> proto::PartitionOptions {
        proto::PartitionOptions {
            partition_size_bytes: self.partition_bytes,
            max_partitions: self.max_partitions,
        }
    }
}

/// Options of a partitioned DML statement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionedUpdateOptions {
    pub priority: Priority,
    pub request_tag: String,
    pub exclude_txn_from_change_streams: bool,
    pub timeout: Option<Duration>,
}
