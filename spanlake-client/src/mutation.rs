use prost_types::ListValue;

use crate::error::{Error, Result};
use crate::key::KeySet;
use crate::proto::{self, mutation};
use crate::value::{GenericColumnValue, StructBinder};

/// Builds a `Vec<GenericColumnValue>` from a list of encodable values.
///
/// ```
/// use spanlake_client::values;
/// let row = values!["alice", 30i64];
/// assert_eq!(row.len(), 2);
/// ```
#[macro_export]
macro_rules! values {
    ($($value:expr),* $(,)?) => {
        vec![$($crate::value::ToValue::to_value(&$value)),*]
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Insert,
    Update,
    InsertOrUpdate,
    Replace,
    Delete,
}

/// A buffered write, applied atomically with the rest of its transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    op: Op,
    table: String,
    columns: Vec<String>,
    values: Vec<GenericColumnValue>,
    key_set: Option<KeySet>,
}

impl Mutation {
    fn write<I, S>(op: Op, table: impl Into<String>, columns: I, values: Vec<GenericColumnValue>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            op,
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            values,
            key_set: None,
        }
    }

    fn write_map<I, S>(op: Op, table: impl Into<String>, row: I) -> Self
    where
        I: IntoIterator<Item = (S, GenericColumnValue)>,
        S: Into<String>,
    {
        let (columns, values): (Vec<String>, Vec<GenericColumnValue>) =
            row.into_iter().map(|(c, v)| (c.into(), v)).unzip();
        Self::write(op, table, columns, values)
    }

    fn write_struct<T>(op: Op, table: impl Into<String>, binder: &StructBinder<T>, row: &T) -> Self {
        Self::write_map(op, table, binder.encode(row))
    }

    /// Inserts a row; fails at commit if it already exists.
    pub fn insert<I, S>(table: impl Into<String>, columns: I, values: Vec<GenericColumnValue>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::write(Op::Insert, table, columns, values)
    }

    pub fn insert_map<I, S>(table: impl Into<String>, row: I) -> Self
    where
        I: IntoIterator<Item = (S, GenericColumnValue)>,
        S: Into<String>,
    {
        Self::write_map(Op::Insert, table, row)
    }

    pub fn insert_struct<T>(table: impl Into<String>, binder: &StructBinder<T>, row: &T) -> Self {
        Self::write_struct(Op::Insert, table, binder, row)
    }

    /// Updates an existing row; fails at commit if it does not exist.
    pub fn update<I, S>(table: impl Into<String>, columns: I, values: Vec<GenericColumnValue>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::write(Op::Update, table, columns, values)
    }

    pub fn update_map<I, S>(table: impl Into<String>, row: I) -> Self
    where
        I: IntoIterator<Item = (S, GenericColumnValue)>,
        S: Into<String>,
    {
        Self::write_map(Op::Update, table, row)
    }

    pub fn update_struct<T>(table: impl Into<String>, binder: &StructBinder<T>, row: &T) -> Self {
        Self::write_struct(Op::Update, table, binder, row)
    }

    /// Inserts the row, or updates the named columns if it exists.
    pub fn insert_or_update<I, S>(
        table: impl Into<String>,
        columns: I,
        values: Vec<GenericColumnValue>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::write(Op::InsertOrUpdate, table, columns, values)
    }

    pub fn insert_or_update_map<I, S>(table: impl Into<String>, row: I) -> Self
    where
        I: IntoIterator<Item = (S, GenericColumnValue)>,
        S: Into<String>,
    {
        Self::write_map(Op::InsertOrUpdate, table, row)
    }

    pub fn insert_or_update_struct<T>(
        table: impl Into<String>,
        binder: &StructBinder<T>,
        row: &T,
    ) -> Self {
        Self::write_struct(Op::InsertOrUpdate, table, binder, row)
    }

    /// Deletes any existing row and inserts this one; unnamed columns become NULL.
    pub fn replace<I, S>(table: impl Into<String>, columns: I, values: Vec<GenericColumnValue>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::write(Op::Replace, table, columns, values)
    }

    pub fn replace_map<I, S>(table: impl Into<String>, row: I) -> Self
    where
        I: IntoIterator<Item = (S, GenericColumnValue)>,
        S: Into<String>,
    {
        Self::write_map(Op::Replace, table, row)
    }

    pub fn replace_struct<T>(table: impl Into<String>, binder: &StructBinder<T>, row: &T) -> Self {
        Self::write_struct(Op::Replace, table, binder, row)
    }

    /// Deletes every row in `keys`. Missing rows are not an error.
    pub fn delete(table: impl Into<String>, keys: impl Into<KeySet>) -> Self {
        Self {
            op: Op::Delete,
            table: table.into(),
            columns: Vec::new(),
            values: Vec::new(),
            key_set: Some(keys.into()),
        }
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[GenericColumnValue] {
        &self.values
    }

    pub(crate) fn to_proto(&self) -> Result<proto::Mutation> {
        let operation = if self.op == Op::Delete {
            let key_set = self
                .key_set
                .as_ref()
                .map(KeySet::to_proto)
                .transpose()?
                .unwrap_or_default();
            mutation::Operation::Delete(mutation::Delete {
                table: self.table.clone(),
                key_set: Some(key_set),
            })
        } else {
            if self.columns.len() != self.values.len() {
                return Err(Error::invalid_argument(format!(
                    "mutation on table {} has {} columns but {} values",
                    self.table,
                    self.columns.len(),
                    self.values.len()
                )));
            }
            let write = mutation::Write {
                table: self.table.clone(),
                columns: self.columns.clone(),
                values: vec![ListValue {
                    values: self.values.iter().map(|v| v.value.clone()).collect(),
                }],
            };
            match self.op {
                Op::Insert => mutation::Operation::Insert(write),
                Op::Update => mutation::Operation::Update(write),
                Op::InsertOrUpdate => mutation::Operation::InsertOrUpdate(write),
                Op::Replace | Op::Delete => mutation::Operation::Replace(write),
            }
        };
        Ok(proto::Mutation {
            operation: Some(operation),
        })
    }
}

pub(crate) fn mutations_to_proto(mutations: &[Mutation]) -> Result<Vec<proto::Mutation>> {
    mutations.iter().map(Mutation::to_proto).collect()
}

/// Mutations applied atomically together by a batch write; different groups
/// commit independently.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MutationGroup {
    pub mutations: Vec<Mutation>,
}

impl MutationGroup {
    pub fn new(mutations: Vec<Mutation>) -> Self {
        Self { mutations }
    }

    pub(crate) fn to_proto(&self) -> Result<proto::batch_write_request::MutationGroup> {
        Ok(proto::batch_write_request::MutationGroup {
            mutations: mutations_to_proto(&self.mutations)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key;
    use crate::value::ToValue;

    #[test]
    fn write_mutations_carry_one_row() {
        let m = Mutation::insert("Users", ["name", "email"], crate::values!["alice", "a@example.com"]);
        let proto = m.to_proto().unwrap();
        match proto.operation {
            Some(mutation::Operation::Insert(write)) => {
                assert_eq!(write.table, "Users");
                assert_eq!(write.columns, vec!["name", "email"]);
                assert_eq!(write.values.len(), 1);
                assert_eq!(write.values[0].values.len(), 2);
            }
            other => panic!("unexpected operation {other:?}"),
        }
    }

    #[test]
    fn arity_mismatch_is_invalid_argument() {
        let m = Mutation::update("Users", ["name", "email"], vec!["alice".to_value()]);
        let err = m.to_proto().unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn map_variant_keeps_pairs_aligned() {
        let m = Mutation::insert_or_update_map("Users", [("name", "bob".to_value()), ("age", 4i64.to_value())]);
        assert_eq!(m.columns(), ["name", "age"]);
        assert_eq!(m.values()[1], 4i64.to_value());
        assert_eq!(m.op(), Op::InsertOrUpdate);
    }

    #[test]
    fn delete_uses_key_set() {
        let m = Mutation::delete("Users", key!["alice"]);
        let proto = m.to_proto().unwrap();
        match proto.operation {
            Some(mutation::Operation::Delete(delete)) => {
                assert_eq!(delete.key_set.unwrap().keys.len(), 1);
            }
            other => panic!("unexpected operation {other:?}"),
        }
    }
}
