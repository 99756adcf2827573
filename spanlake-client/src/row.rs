use std::sync::Arc;

use prost_types::Value;
use tonic::Code;

use crate::error::{Error, Result};
use crate::proto::{struct_type::Field, Type};
use crate::value::{FromValue, GenericColumnValue, StructBinder};

/// One fully assembled result row. Rows share their column descriptors and
/// stay valid after the iterator that produced them moves on.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    fields: Arc<Vec<Field>>,
    values: Vec<Value>,
}

impl Row {
    /// Builds a row by hand, e.g. for tests of code that consumes rows.
    pub fn new<S: Into<String>>(
        column_names: impl IntoIterator<Item = S>,
        values: Vec<GenericColumnValue>,
    ) -> Result<Self> {
        let names: Vec<String> = column_names.into_iter().map(Into::into).collect();
        if names.len() != values.len() {
            return Err(Error::invalid_argument(format!(
                "{} column names but {} values",
                names.len(),
                values.len()
            )));
        }
        let (fields, values) = names
            .into_iter()
            .zip(values)
            .map(|(name, cell)| {
                (
                    Field {
                        name,
                        r#type: Some(cell.ty),
                    },
                    cell.value,
                )
            })
            .unzip();
        Ok(Self {
            fields: Arc::new(fields),
            values,
        })
    }

    pub(crate) fn from_parts(fields: Arc<Vec<Field>>, values: Vec<Value>) -> Self {
        Self { fields, values }
    }

    pub fn size(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn column_name(&self, i: usize) -> Option<&str> {
        self.fields.get(i).map(|f| f.name.as_str())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn column_type(&self, i: usize) -> Option<&Type> {
        self.fields.get(i).and_then(|f| f.r#type.as_ref())
    }

    /// Position of the column called `name`. Matching is case-sensitive and a
    /// name used by more than one column is rejected.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        let mut matches = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.name == name)
            .map(|(i, _)| i);
        let first = matches
            .next()
            .ok_or_else(|| Error::new(Code::NotFound, format!("column {name:?} not found")))?;
        if matches.next().is_some() {
            return Err(Error::failed_precondition(format!(
                "ambiguous column name {name:?}"
            )));
        }
        Ok(first)
    }

    pub fn column_value(&self, i: usize) -> Result<GenericColumnValue> {
        let value = self.values.get(i).ok_or_else(|| {
            Error::new(
                Code::OutOfRange,
                format!("column index {i} out of range [0,{})", self.values.len()),
            )
        })?;
        let ty = self.column_type(i).cloned().unwrap_or_default();
        Ok(GenericColumnValue::new(ty, value.clone()))
    }

    /// Decodes column `i`.
    pub fn column<T: FromValue>(&self, i: usize) -> Result<T> {
        let cell = self.column_value(i)?;
        T::from_value(&cell.value, &cell.ty).map_err(|err| decode_column_error(i, &err))
    }

    pub fn column_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
        self.column(self.column_index(name)?)
    }

    /// Every cell with its declared type, in column order.
    pub fn columns(&self) -> Vec<GenericColumnValue> {
        self.fields
            .iter()
            .zip(&self.values)
            .map(|(f, v)| GenericColumnValue::new(f.r#type.clone().unwrap_or_default(), v.clone()))
            .collect()
    }

    pub fn to_struct<T: Default>(&self, binder: &StructBinder<T>) -> Result<T> {
        binder.decode(&self.fields, &self.values)
    }
}

fn decode_column_error(i: usize, err: &Error) -> Error {
    Error::new(
        err.code(),
        format!("failed to decode column {i}, error = <{}>", err.message()),
    )
}
