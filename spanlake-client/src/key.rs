use std::fmt;

use prost_types::value::Kind;
use prost_types::ListValue;

use crate::error::{Error, Result};
use crate::proto::{self, key_range, TypeCode};
use crate::value::{GenericColumnValue, ToValue};

/// Builds a [`Key`] from a list of encodable parts.
///
/// ```
/// use spanlake_client::key;
/// let k = key!["alice", 7i64];
/// assert_eq!(k.len(), 2);
/// ```
#[macro_export]
macro_rules! key {
    ($($part:expr),* $(,)?) => {
        $crate::key::Key::from_parts(vec![$($crate::value::ToValue::to_value(&$part)),*])
    };
}

/// Primary key or index key: an ordered tuple of scalar parts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Key(Vec<GenericColumnValue>);

impl Key {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(parts: Vec<GenericColumnValue>) -> Self {
        Self(parts)
    }

    pub fn part(mut self, value: impl ToValue) -> Self {
        self.0.push(value.to_value());
        self
    }

    pub fn parts(&self) -> &[GenericColumnValue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn to_proto(&self) -> Result<ListValue> {
        let values = self
            .0
            .iter()
            .map(|part| match part.ty.code() {
                TypeCode::Array | TypeCode::Struct => Err(Error::invalid_argument(format!(
                    "key part type {} is not supported",
                    part.ty.describe()
                ))),
                _ => Ok(part.value.clone()),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ListValue { values })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match &part.value.kind {
                Some(Kind::NullValue(_)) | None => f.write_str("<null>")?,
                Some(Kind::StringValue(s)) if part.ty.code() == TypeCode::String => {
                    write!(f, "{s:?}")?
                }
                Some(Kind::StringValue(s)) => f.write_str(s)?,
                Some(Kind::BoolValue(b)) => write!(f, "{b}")?,
                Some(Kind::NumberValue(n)) => write!(f, "{n}")?,
                Some(other) => write!(f, "{other:?}")?,
            }
        }
        f.write_str(")")
    }
}

impl From<Key> for KeySet {
    fn from(key: Key) -> Self {
        KeySet::from_keys([key])
    }
}

/// Which ends of a [`KeyRange`] are included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyRangeKind {
    ClosedClosed,
    #[default]
    ClosedOpen,
    OpenClosed,
    OpenOpen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    pub start: Key,
    pub end: Key,
    pub kind: KeyRangeKind,
}

impl KeyRange {
    pub fn new(start: Key, end: Key, kind: KeyRangeKind) -> Self {
        Self { start, end, kind }
    }

    /// All keys that start with `prefix`.
    pub fn prefix(prefix: Key) -> Self {
        Self::new(prefix.clone(), prefix, KeyRangeKind::ClosedClosed)
    }

    pub(crate) fn to_proto(&self) -> Result<proto::KeyRange> {
        let start = self.start.to_proto()?;
        let end = self.end.to_proto()?;
        let (start_key_type, end_key_type) = match self.kind {
            KeyRangeKind::ClosedClosed => (
                key_range::StartKeyType::StartClosed(start),
                key_range::EndKeyType::EndClosed(end),
            ),
            KeyRangeKind::ClosedOpen => (
                key_range::StartKeyType::StartClosed(start),
                key_range::EndKeyType::EndOpen(end),
            ),
            KeyRangeKind::OpenClosed => (
                key_range::StartKeyType::StartOpen(start),
                key_range::EndKeyType::EndClosed(end),
            ),
            KeyRangeKind::OpenOpen => (
                key_range::StartKeyType::StartOpen(start),
                key_range::EndKeyType::EndOpen(end),
            ),
        };
        Ok(proto::KeyRange {
            start_key_type: Some(start_key_type),
            end_key_type: Some(end_key_type),
        })
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (open, close) = match self.kind {
            KeyRangeKind::ClosedClosed => ("[", "]"),
            KeyRangeKind::ClosedOpen => ("[", ")"),
            KeyRangeKind::OpenClosed => ("(", "]"),
            KeyRangeKind::OpenOpen => ("(", ")"),
        };
        write!(f, "{open}{},{}{close}", self.start, self.end)
    }
}

impl From<KeyRange> for KeySet {
    fn from(range: KeyRange) -> Self {
        KeySet {
            ranges: vec![range],
            ..Default::default()
        }
    }
}

/// Union of keys, key ranges and the "every row" marker.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeySet {
    pub all: bool,
    pub keys: Vec<Key>,
    pub ranges: Vec<KeyRange>,
}

impl KeySet {
    pub fn all() -> Self {
        Self {
            all: true,
            ..Default::default()
        }
    }

    pub fn from_keys(keys: impl IntoIterator<Item = Key>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn union(sets: impl IntoIterator<Item = KeySet>) -> Self {
        sets.into_iter().fold(KeySet::default(), |mut acc, set| {
            acc.all |= set.all;
            acc.keys.extend(set.keys);
            acc.ranges.extend(set.ranges);
            acc
        })
    }

    pub(crate) fn to_proto(&self) -> Result<proto::KeySet> {
        if self.all {
            return Ok(proto::KeySet {
                all: true,
                ..Default::default()
            });
        }
        Ok(proto::KeySet {
            keys: self.keys.iter().map(Key::to_proto).collect::<Result<_>>()?,
            ranges: self
                .ranges
                .iter()
                .map(KeyRange::to_proto)
                .collect::<Result<_>>()?,
            all: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::string_value;

    #[test]
    fn keys_render_strings_quoted() {
        let k = crate::key!["alice", 3i64];
        assert_eq!(k.to_string(), "(\"alice\",3)");
        let range = KeyRange::new(crate::key![1i64], crate::key![9i64], KeyRangeKind::OpenClosed);
        assert_eq!(range.to_string(), "((1),(9)]");
    }

    #[test]
    fn array_key_parts_are_rejected() {
        let k = Key::new().part(vec![1i64, 2]);
        let err = k.to_proto().unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn all_wins_in_a_union() {
        let set = KeySet::union([crate::key!["a"].into(), KeySet::all()]);
        let proto = set.to_proto().unwrap();
        assert!(proto.all);
        assert!(proto.keys.is_empty());
    }

    #[test]
    fn ranges_map_to_the_right_bounds() {
        let range = KeyRange::new(crate::key!["a"], crate::key!["m"], KeyRangeKind::ClosedOpen);
        let proto = range.to_proto().unwrap();
        assert_eq!(
            proto.start_key_type,
            Some(key_range::StartKeyType::StartClosed(ListValue {
                values: vec![string_value("a")]
            }))
        );
        assert!(matches!(
            proto.end_key_type,
            Some(key_range::EndKeyType::EndOpen(_))
        ));
    }
}
