use std::collections::HashSet;
use std::fmt;

use prost_types::Value;

use super::{as_list, is_null, list_value, FromValue, GenericColumnValue, ToValue};
use crate::error::{Error, Result};
use crate::proto::{struct_type, Type, TypeCode};

/// An ordered list of named, typed fields; the value form of a STRUCT column
/// or STRUCT query parameter.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructValue {
    fields: Vec<(String, GenericColumnValue)>,
}

impl StructValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, value: impl ToValue) -> Self {
        self.fields.push((name.into(), value.to_value()));
        self
    }

    /// Decodes the first field called `name`.
    pub fn get<T: FromValue>(&self, name: &str) -> Result<T> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .ok_or_else(|| Error::invalid_argument(format!("struct field {name:?} not found")))?
            .1
            .decode()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &GenericColumnValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl ToValue for StructValue {
    fn to_value(&self) -> GenericColumnValue {
        let ty = Type::structure(
            self.fields
                .iter()
                .map(|(name, value)| (name.clone(), value.ty.clone())),
        );
        let values = self.fields.iter().map(|(_, v)| v.value.clone()).collect();
        GenericColumnValue::new(ty, list_value(values))
    }
}

impl FromValue for StructValue {
    fn from_value(value: &Value, ty: &Type) -> Result<Self> {
        if ty.code() != TypeCode::Struct {
            return Err(super::type_mismatch::<Self>(ty));
        }
        if is_null(value) {
            return Err(super::null_not_supported::<Self>());
        }
        let values = as_list(value, "struct")?;
        let fields = ty.fields();
        check_field_count(fields, values)?;
        let fields = fields
            .iter()
            .zip(values)
            .map(|(field, value)| {
                let ty = field.r#type.clone().unwrap_or_default();
                (field.name.clone(), GenericColumnValue::new(ty, value.clone()))
            })
            .collect();
        Ok(Self { fields })
    }
}

fn check_field_count(fields: &[struct_type::Field], values: &[Value]) -> Result<()> {
    if fields.len() != values.len() {
        return Err(Error::failed_precondition(format!(
            "row has different number of fields({}) and values({})",
            fields.len(),
            values.len()
        )));
    }
    Ok(())
}

type Setter<T> = Box<dyn Fn(&mut T, &Value, &Type) -> Result<()> + Send + Sync>;
type Getter<T> = Box<dyn Fn(&T) -> GenericColumnValue + Send + Sync>;

struct Binding<T> {
    name: String,
    set: Setter<T>,
    get: Getter<T>,
}

/// Maps columns onto a user struct.
///
/// Each registered field names a column and supplies a getter and a setter.
/// Decoding walks the columns positionally and looks each one up by name,
/// exactly first and then ignoring ASCII case. Columns passed to
/// [`StructBinder::ignore`] are skipped; any other unmatched column is an
/// error.
///
/// ```
/// use spanlake_client::value::StructBinder;
///
/// #[derive(Default)]
/// struct Singer {
///     id: i64,
///     name: String,
/// }
///
/// let binder = StructBinder::<Singer>::new()
///     .field("SingerId", |s| s.id, |s, v| s.id = v)
///     .field("Name", |s| s.name.clone(), |s, v| s.name = v);
/// assert_eq!(binder.column_names(), vec!["SingerId", "Name"]);
/// ```
pub struct StructBinder<T> {
    bindings: Vec<Binding<T>>,
    ignored: Vec<String>,
}

impl<T> Default for StructBinder<T> {
    fn default() -> Self {
        Self {
            bindings: Vec::new(),
            ignored: Vec::new(),
        }
    }
}

impl<T> fmt::Debug for StructBinder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructBinder")
            .field("columns", &self.column_names())
            .field("ignored", &self.ignored)
            .finish()
    }
}

impl<T> StructBinder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field<V, G, S>(mut self, column: impl Into<String>, get: G, set: S) -> Self
    where
        V: ToValue + FromValue + 'static,
        G: Fn(&T) -> V + Send + Sync + 'static,
        S: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.bindings.push(Binding {
            name: column.into(),
            set: Box::new(move |target, value, ty| {
                set(target, V::from_value(value, ty)?);
                Ok(())
            }),
            get: Box::new(move |source| get(source).to_value()),
        });
        self
    }

    /// Skips `column` when decoding, and leaves it out when encoding.
    pub fn ignore(mut self, column: impl Into<String>) -> Self {
        self.ignored.push(column.into());
        self
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.bindings.iter().map(|b| b.name.as_str()).collect()
    }

    fn lookup(&self, column: &str) -> Option<&Binding<T>> {
        self.bindings
            .iter()
            .find(|b| b.name == column)
            .or_else(|| {
                self.bindings
                    .iter()
                    .find(|b| b.name.eq_ignore_ascii_case(column))
            })
    }

    fn is_ignored(&self, column: &str) -> bool {
        self.ignored.iter().any(|c| c.eq_ignore_ascii_case(column))
    }

    /// Builds a `T` from a row or STRUCT value described by `fields`.
    pub fn decode(&self, fields: &[struct_type::Field], values: &[Value]) -> Result<T>
    where
        T: Default,
    {
        check_field_count(fields, values)?;
        let mut seen = HashSet::with_capacity(fields.len());
        let mut target = T::default();
        for (i, (field, value)) in fields.iter().zip(values).enumerate() {
            if field.name.is_empty() {
                return Err(Error::invalid_argument(format!("unnamed field {i}")));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::invalid_argument(format!(
                    "duplicated column name {:?}",
                    field.name
                )));
            }
            if self.is_ignored(&field.name) {
                continue;
            }
            let binding = self.lookup(&field.name).ok_or_else(|| {
                Error::invalid_argument(format!("no binding for column {:?}", field.name))
            })?;
            let ty = field.r#type.clone().unwrap_or_default();
            (binding.set)(&mut target, value, &ty).map_err(|err| {
                Error::new(
                    err.code(),
                    format!(
                        "failed to decode column {}, error = <{}>",
                        field.name,
                        err.message()
                    ),
                )
            })?;
        }
        Ok(target)
    }

    /// Decodes a STRUCT cell.
    pub fn decode_value(&self, cell: &GenericColumnValue) -> Result<T>
    where
        T: Default,
    {
        if cell.ty.code() != TypeCode::Struct {
            return Err(super::type_mismatch::<T>(&cell.ty));
        }
        if cell.is_null() {
            return Err(super::null_not_supported::<T>());
        }
        self.decode(cell.ty.fields(), as_list(&cell.value, "struct")?)
    }

    /// Encodes `source` as `(column, value)` pairs in registration order.
    pub fn encode(&self, source: &T) -> Vec<(String, GenericColumnValue)> {
        self.bindings
            .iter()
            .filter(|b| !self.is_ignored(&b.name))
            .map(|b| (b.name.clone(), (b.get)(source)))
            .collect()
    }

    /// Encodes `source` as a STRUCT cell.
    pub fn to_struct_value(&self, source: &T) -> StructValue {
        self.encode(source)
            .into_iter()
            .fold(StructValue::new(), |acc, (name, value)| acc.field(name, value))
    }
}
