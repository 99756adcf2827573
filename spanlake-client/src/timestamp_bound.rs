use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::proto::transaction_options::{self, read_only};
use crate::proto::TransactionOptions;

/// Policy choosing the snapshot a read-only transaction observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampBound {
    /// Observe every transaction committed before the read starts.
    #[default]
    Strong,
    /// Read at exactly `now - staleness`.
    ExactStaleness(Duration),
    /// Let the server pick a timestamp no staler than the bound. Single-use only.
    MaxStaleness(Duration),
    /// Let the server pick a timestamp at or after the bound. Single-use only.
    MinReadTimestamp(DateTime<Utc>),
    ReadTimestamp(DateTime<Utc>),
}

impl TimestampBound {
    pub fn strong() -> Self {
        Self::Strong
    }

    pub fn exact_staleness(staleness: Duration) -> Self {
        Self::ExactStaleness(staleness)
    }

    pub fn max_staleness(staleness: Duration) -> Self {
        Self::MaxStaleness(staleness)
    }

    pub fn min_read_timestamp(ts: DateTime<Utc>) -> Self {
        Self::MinReadTimestamp(ts)
    }

    pub fn read_timestamp(ts: DateTime<Utc>) -> Self {
        Self::ReadTimestamp(ts)
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self, Self::MaxStaleness(_) | Self::MinReadTimestamp(_))
    }

    /// Bounded staleness cannot be used for transactions that read more than once.
    pub(crate) fn check_multi_use(&self) -> Result<()> {
        if self.is_bounded() {
            return Err(Error::invalid_argument(format!(
                "timestamp bound {self} is only supported by single-use transactions"
            )));
        }
        Ok(())
    }

    pub(crate) fn to_proto(self) -> read_only::TimestampBound {
        match self {
            Self::Strong => read_only::TimestampBound::Strong(true),
            Self::ExactStaleness(d) => read_only::TimestampBound::ExactStaleness(to_duration(d)),
            Self::MaxStaleness(d) => read_only::TimestampBound::MaxStaleness(to_duration(d)),
            Self::MinReadTimestamp(ts) => {
                read_only::TimestampBound::MinReadTimestamp(to_timestamp(ts))
            }
            Self::ReadTimestamp(ts) => read_only::TimestampBound::ReadTimestamp(to_timestamp(ts)),
        }
    }

    pub(crate) fn to_read_only_options(self) -> TransactionOptions {
        TransactionOptions {
            mode: Some(transaction_options::Mode::ReadOnly(
                transaction_options::ReadOnly {
                    return_read_timestamp: true,
                    timestamp_bound: Some(self.to_proto()),
                },
            )),
            ..Default::default()
        }
    }
}

impl fmt::Display for TimestampBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strong => f.write_str("(strong)"),
            Self::ExactStaleness(d) => write!(f, "(exactStaleness: {d:?})"),
            Self::MaxStaleness(d) => write!(f, "(maxStaleness: {d:?})"),
            Self::MinReadTimestamp(ts) => write!(f, "(minReadTimestamp: {ts})"),
            Self::ReadTimestamp(ts) => write!(f, "(readTimestamp: {ts})"),
        }
    }
}

pub(crate) fn to_duration(d: Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: d.as_secs() as i64,
        nanos: d.subsec_nanos() as i32,
    }
}

pub(crate) fn to_timestamp(ts: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: ts.timestamp(),
        nanos: ts.timestamp_subsec_nanos() as i32,
    }
}

pub(crate) fn from_timestamp(ts: &prost_types::Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.seconds, u32::try_from(ts.nanos).ok()?)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn bounded_staleness_is_single_use_only() {
        assert!(TimestampBound::max_staleness(Duration::from_secs(5))
            .check_multi_use()
            .is_err());
        assert!(TimestampBound::exact_staleness(Duration::from_secs(5))
            .check_multi_use()
            .is_ok());
        assert!(TimestampBound::strong().check_multi_use().is_ok());
    }

    #[test]
    fn read_only_options_request_the_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let options = TimestampBound::read_timestamp(ts).to_read_only_options();
        match options.mode {
            Some(transaction_options::Mode::ReadOnly(ro)) => {
                assert!(ro.return_read_timestamp);
                assert_eq!(
                    ro.timestamp_bound,
                    Some(read_only::TimestampBound::ReadTimestamp(to_timestamp(ts)))
                );
            }
            other => panic!("unexpected mode {other:?}"),
        }
    }

    #[test]
    fn timestamps_convert_both_ways() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(from_timestamp(&to_timestamp(ts)), Some(ts));
        assert_eq!(TimestampBound::Strong.to_string(), "(strong)");
    }
}
