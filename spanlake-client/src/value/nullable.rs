use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use prost_types::Value;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{is_null, FromValue, GenericColumnValue, Json, Numeric, SpannerType, ToValue};
use crate::error::Result;
use crate::proto::Type;

/// A value that may be SQL NULL. When `valid` is false `value` is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NullValue<T> {
    pub value: T,
    pub valid: bool,
}

pub type NullInt64 = NullValue<i64>;
pub type NullString = NullValue<String>;
pub type NullFloat64 = NullValue<f64>;
pub type NullFloat32 = NullValue<f32>;
pub type NullBool = NullValue<bool>;
pub type NullNumeric = NullValue<Numeric>;
pub type NullDate = NullValue<NaiveDate>;
pub type NullTime = NullValue<DateTime<Utc>>;
pub type NullJson = NullValue<Json>;

impl<T> NullValue<T> {
    pub fn new(value: T) -> Self {
        Self { value, valid: true }
    }

    pub fn is_null(&self) -> bool {
        !self.valid
    }

    pub fn as_option(&self) -> Option<&T> {
        self.valid.then_some(&self.value)
    }

    pub fn into_option(self) -> Option<T> {
        if self.valid {
            Some(self.value)
        } else {
            None
        }
    }
}

impl<T: Default> NullValue<T> {
    pub fn null() -> Self {
        Self::default()
    }
}

impl<T: Default> From<Option<T>> for NullValue<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Self::new(value),
            None => Self::null(),
        }
    }
}

impl<T: fmt::Display> fmt::Display for NullValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_option() {
            Some(value) => value.fmt(f),
            None => f.write_str("<null>"),
        }
    }
}

impl<T: Serialize> Serialize for NullValue<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_option().serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de> + Default> Deserialize<'de> for NullValue<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Option::<T>::deserialize(deserializer)?.into())
    }
}

impl<T: SpannerType> SpannerType for NullValue<T> {
    fn spanner_type() -> Type {
        T::spanner_type()
    }
}

impl<T: ToValue + SpannerType> ToValue for NullValue<T> {
    fn to_value(&self) -> GenericColumnValue {
        match self.as_option() {
            Some(value) => value.to_value(),
            None => GenericColumnValue::null(T::spanner_type()),
        }
    }
}

impl<T: FromValue + Default> FromValue for NullValue<T> {
    fn from_value(value: &Value, ty: &Type) -> Result<Self> {
        if is_null(value) {
            return Ok(Self::null());
        }
        T::from_value(value, ty).map(Self::new)
    }
}
