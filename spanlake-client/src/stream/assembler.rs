//! Reassembles rows from partial result messages.
//!
//! A message carries a run of cell values that continue the current row. When
//! `chunked_value` is set its last value is only a prefix and is merged with
//! the first value of the next message.

use std::mem;
use std::sync::Arc;

use prost_types::value::Kind;
use prost_types::{ListValue, Value};
use tonic::Code;

use crate::error::{Error, Result};
use crate::proto::{struct_type::Field, PartialResultSet};
use crate::row::Row;
use crate::value::kind_name;

#[derive(Debug, Default)]
pub(crate) struct RowAssembler {
    fields: Option<Arc<Vec<Field>>>,
    pending: Vec<Value>,
    chunked: bool,
}

impl RowAssembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fields(&self) -> Option<&Arc<Vec<Field>>> {
        self.fields.as_ref()
    }

    /// True when no partial row or partial value is outstanding.
    pub(crate) fn is_done(&self) -> bool {
        self.pending.is_empty() && !self.chunked
    }

    /// Consumes the values of `msg` and returns every row they complete.
    pub(crate) fn add(&mut self, msg: &mut PartialResultSet) -> Result<Vec<Row>> {
        if self.fields.is_none() {
            if let Some(row_type) = msg.metadata.as_ref().and_then(|m| m.row_type.as_ref()) {
                self.fields = Some(Arc::new(row_type.fields.clone()));
            }
        }
        let mut rows = Vec::new();
        if msg.values.is_empty() {
            return Ok(rows);
        }

        let mut values = mem::take(&mut msg.values).into_iter().peekable();
        if self.chunked {
            self.chunked = false;
            let Some(last) = self.pending.pop() else {
                return Err(Error::malformed_stream(
                    Code::FailedPrecondition,
                    "got invalid chunked PartialResultSet with empty Row",
                ));
            };
            match values.next() {
                Some(first) => self.pending.push(merge(last, first)?),
                None => self.pending.push(last),
            }
            let is_last = values.peek().is_none();
            rows.extend(self.try_emit(msg.chunked_value, is_last));
        }
        while let Some(value) = values.next() {
            self.pending.push(value);
            let is_last = values.peek().is_none();
            rows.extend(self.try_emit(msg.chunked_value, is_last));
        }
        if msg.chunked_value {
            self.chunked = true;
        }
        Ok(rows)
    }

    /// A row is complete when it reaches the column count, unless its final
    /// cell is the still-open prefix of a chunked message.
    fn try_emit(&mut self, chunked: bool, is_last: bool) -> Option<Row> {
        let fields = self.fields.as_ref()?;
        if self.pending.len() == fields.len() && (!chunked || !is_last) {
            let values = mem::take(&mut self.pending);
            return Some(Row::from_parts(Arc::clone(fields), values));
        }
        None
    }
}

fn is_mergeable(value: &Value) -> bool {
    matches!(
        value.kind,
        Some(Kind::StringValue(_)) | Some(Kind::ListValue(_))
    )
}

/// Joins a chunked prefix `a` with its continuation `b`.
fn merge(a: Value, b: Value) -> Result<Value> {
    match (a.kind, b.kind) {
        (Some(Kind::StringValue(mut head)), Some(Kind::StringValue(tail))) => {
            head.push_str(&tail);
            Ok(Value {
                kind: Some(Kind::StringValue(head)),
            })
        }
        (Some(Kind::ListValue(head)), Some(Kind::ListValue(tail))) => {
            Ok(Value {
                kind: Some(Kind::ListValue(merge_lists(head, tail)?)),
            })
        }
        (Some(a @ (Kind::StringValue(_) | Kind::ListValue(_))), b) => {
            let a = Value { kind: Some(a) };
            let b = Value { kind: b };
            Err(Error::malformed_stream(
                Code::FailedPrecondition,
                format!(
                    "incompatible type in chunked PartialResultSet. expected ({}), got ({})",
                    kind_name(&a),
                    kind_name(&b)
                ),
            ))
        }
        (a, _) => Err(Error::malformed_stream(
            Code::FailedPrecondition,
            format!(
                "unsupported type merge ({})",
                kind_name(&Value { kind: a })
            ),
        )),
    }
}

fn merge_lists(mut head: ListValue, tail: ListValue) -> Result<ListValue> {
    let mut tail = tail.values.into_iter().peekable();
    if head.values.last().is_some_and(is_mergeable) && tail.peek().is_some() {
        if let (Some(last), Some(first)) = (head.values.pop(), tail.next()) {
            head.values.push(merge(last, first)?);
        }
    }
    head.values.extend(tail);
    Ok(head)
}
