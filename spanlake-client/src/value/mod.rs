//! Conversion between Rust values and the wire form of column values.
//!
//! Every cell travels as a `google.protobuf.Value` plus a declared [`Type`].
//! INT64 and NUMERIC are decimal strings, BYTES and PROTO are base64,
//! TIMESTAMP is RFC 3339 in UTC with nanoseconds and DATE is `YYYY-MM-DD`.

mod nullable;
mod numeric;
mod structs;
mod types;

use std::any::type_name;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use prost_types::value::Kind;
use prost_types::{ListValue, Value};
use serde::{Deserialize, Serialize};
use tonic::Code;

pub use nullable::{
    NullBool, NullDate, NullFloat32, NullFloat64, NullInt64, NullJson, NullNumeric, NullString,
    NullTime, NullValue,
};
pub use numeric::{Numeric, NUMERIC_PRECISION, NUMERIC_SCALE};
pub use structs::{StructBinder, StructValue};
pub use types::TypeName;

use crate::error::{Error, Result};
use crate::proto::{Type, TypeCode};

const COMMIT_TIMESTAMP_PLACEHOLDER: &str = "spanner.commit_timestamp()";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// A cell in its wire form together with its declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericColumnValue {
    pub ty: Type,
    pub value: Value,
}

impl GenericColumnValue {
    pub fn new(ty: Type, value: Value) -> Self {
        Self { ty, value }
    }

    pub fn null(ty: Type) -> Self {
        Self::new(ty, null_value())
    }

    /// ARRAY of already encoded elements, for element types that have no
    /// static Rust counterpart (structs, enums).
    pub fn array_of<I>(element: Type, items: I) -> Self
    where
        I: IntoIterator<Item = GenericColumnValue>,
    {
        let values = items.into_iter().map(|item| item.value).collect();
        Self::new(Type::array(element), list_value(values))
    }

    pub fn is_null(&self) -> bool {
        is_null(&self.value)
    }

    pub fn decode<T: FromValue>(&self) -> Result<T> {
        T::from_value(&self.value, &self.ty)
    }
}

/// Rust types with a fixed column type.
pub trait SpannerType {
    fn spanner_type() -> Type;
}

/// Encodes a Rust value into a typed cell.
pub trait ToValue {
    fn to_value(&self) -> GenericColumnValue;
}

/// Decodes a typed cell into a Rust value.
pub trait FromValue: Sized {
    fn from_value(value: &Value, ty: &Type) -> Result<Self>;
}

/// Sentinel that asks the server to fill a TIMESTAMP column with the commit
/// timestamp of the writing transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitTimestamp;

/// JSON column payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Json(pub serde_json::Value);

/// PROTO column holding a message of type `M`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProtoMessage<M>(pub M);

/// ENUM column value; the fully qualified enum name travels with the value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProtoEnum {
    pub value: i32,
    pub fqn: String,
}

impl ProtoEnum {
    pub fn new(value: i32, fqn: impl Into<String>) -> Self {
        Self {
            value,
            fqn: fqn.into(),
        }
    }
}

pub(crate) fn null_value() -> Value {
    Value {
        kind: Some(Kind::NullValue(0)),
    }
}

pub(crate) fn string_value(s: impl Into<String>) -> Value {
    Value {
        kind: Some(Kind::StringValue(s.into())),
    }
}

pub(crate) fn list_value(values: Vec<Value>) -> Value {
    Value {
        kind: Some(Kind::ListValue(ListValue { values })),
    }
}

pub(crate) fn is_null(value: &Value) -> bool {
    matches!(value.kind, Some(Kind::NullValue(_)))
}

pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value.kind {
        None => "<nil>",
        Some(Kind::NullValue(_)) => "NullValue",
        Some(Kind::NumberValue(_)) => "NumberValue",
        Some(Kind::StringValue(_)) => "StringValue",
        Some(Kind::BoolValue(_)) => "BoolValue",
        Some(Kind::StructValue(_)) => "StructValue",
        Some(Kind::ListValue(_)) => "ListValue",
    }
}

fn type_mismatch<T>(ty: &Type) -> Error {
    Error::invalid_argument(format!(
        "type {} cannot be decoded into Rust type {}",
        ty.describe(),
        type_name::<T>()
    ))
}

fn null_not_supported<T>() -> Error {
    Error::invalid_argument(format!(
        "destination {} cannot support NULL SQL values",
        type_name::<T>()
    ))
}

fn wire_mismatch(value: &Value, expected: &str) -> Error {
    Error::failed_precondition(format!(
        "cannot use {:?}(Kind: {}) as {expected} Value",
        value.kind,
        kind_name(value)
    ))
}

fn bad_encoding(value: &str, ty: &Type, detail: impl std::fmt::Display) -> Error {
    Error::new(
        Code::FailedPrecondition,
        format!("{value:?} wasn't correctly encoded as {}: <{detail}>", ty.describe()),
    )
}

/// Checks the declared type and rejects NULL for non-nullable targets.
fn expect_scalar<T>(value: &Value, ty: &Type, codes: &[TypeCode]) -> Result<()> {
    if !codes.contains(&ty.code()) {
        return Err(type_mismatch::<T>(ty));
    }
    if is_null(value) {
        return Err(null_not_supported::<T>());
    }
    Ok(())
}

fn as_str<'a>(value: &'a Value, expected: &str) -> Result<&'a str> {
    match &value.kind {
        Some(Kind::StringValue(s)) => Ok(s),
        _ => Err(wire_mismatch(value, expected)),
    }
}

pub(crate) fn as_list<'a>(value: &'a Value, expected: &str) -> Result<&'a [Value]> {
    match &value.kind {
        Some(Kind::ListValue(list)) => Ok(&list.values),
        _ => Err(wire_mismatch(value, expected)),
    }
}

fn encode_float(f: f64) -> Value {
    if f.is_nan() {
        string_value("NaN")
    } else if f == f64::INFINITY {
        string_value("Infinity")
    } else if f == f64::NEG_INFINITY {
        string_value("-Infinity")
    } else {
        Value {
            kind: Some(Kind::NumberValue(f)),
        }
    }
}

fn decode_float(value: &Value, ty: &Type) -> Result<f64> {
    match &value.kind {
        Some(Kind::NumberValue(n)) => Ok(*n),
        Some(Kind::StringValue(s)) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => Err(bad_encoding(other, ty, "unexpected string value")),
        },
        _ => Err(wire_mismatch(value, "float")),
    }
}

impl ToValue for GenericColumnValue {
    fn to_value(&self) -> GenericColumnValue {
        self.clone()
    }
}

impl FromValue for GenericColumnValue {
    fn from_value(value: &Value, ty: &Type) -> Result<Self> {
        Ok(Self::new(ty.clone(), value.clone()))
    }
}

impl SpannerType for bool {
    fn spanner_type() -> Type {
        Type::bool()
    }
}

impl ToValue for bool {
    fn to_value(&self) -> GenericColumnValue {
        GenericColumnValue::new(
            Type::bool(),
            Value {
                kind: Some(Kind::BoolValue(*self)),
            },
        )
    }
}

impl FromValue for bool {
    fn from_value(value: &Value, ty: &Type) -> Result<Self> {
        expect_scalar::<Self>(value, ty, &[TypeCode::Bool])?;
        match value.kind {
            Some(Kind::BoolValue(b)) => Ok(b),
            _ => Err(wire_mismatch(value, "bool")),
        }
    }
}

impl SpannerType for i64 {
    fn spanner_type() -> Type {
        Type::int64()
    }
}

impl ToValue for i64 {
    fn to_value(&self) -> GenericColumnValue {
        GenericColumnValue::new(Type::int64(), string_value(self.to_string()))
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value, ty: &Type) -> Result<Self> {
        expect_scalar::<Self>(value, ty, &[TypeCode::Int64, TypeCode::Enum])?;
        let s = as_str(value, "int64")?;
        s.parse().map_err(|e| bad_encoding(s, ty, e))
    }
}

impl SpannerType for f64 {
    fn spanner_type() -> Type {
        Type::float64()
    }
}

impl ToValue for f64 {
    fn to_value(&self) -> GenericColumnValue {
        GenericColumnValue::new(Type::float64(), encode_float(*self))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value, ty: &Type) -> Result<Self> {
        expect_scalar::<Self>(value, ty, &[TypeCode::Float64])?;
        decode_float(value, ty)
    }
}

impl SpannerType for f32 {
    fn spanner_type() -> Type {
        Type::float32()
    }
}

impl ToValue for f32 {
    fn to_value(&self) -> GenericColumnValue {
        GenericColumnValue::new(Type::float32(), encode_float(f64::from(*self)))
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value, ty: &Type) -> Result<Self> {
        expect_scalar::<Self>(value, ty, &[TypeCode::Float32])?;
        decode_float(value, ty).map(|f| f as f32)
    }
}

impl SpannerType for String {
    fn spanner_type() -> Type {
        Type::string()
    }
}

impl ToValue for String {
    fn to_value(&self) -> GenericColumnValue {
        GenericColumnValue::new(Type::string(), string_value(self.as_str()))
    }
}

impl FromValue for String {
    fn from_value(value: &Value, ty: &Type) -> Result<Self> {
        expect_scalar::<Self>(value, ty, &[TypeCode::String])?;
        as_str(value, "string").map(str::to_string)
    }
}

impl SpannerType for &str {
    fn spanner_type() -> Type {
        Type::string()
    }
}

impl ToValue for &str {
    fn to_value(&self) -> GenericColumnValue {
        GenericColumnValue::new(Type::string(), string_value(*self))
    }
}

impl SpannerType for Bytes {
    fn spanner_type() -> Type {
        Type::bytes()
    }
}

impl ToValue for Bytes {
    fn to_value(&self) -> GenericColumnValue {
        GenericColumnValue::new(Type::bytes(), string_value(BASE64.encode(self)))
    }
}

impl FromValue for Bytes {
    fn from_value(value: &Value, ty: &Type) -> Result<Self> {
        expect_scalar::<Self>(value, ty, &[TypeCode::Bytes, TypeCode::Proto])?;
        let s = as_str(value, "bytes")?;
        BASE64
            .decode(s)
            .map(Bytes::from)
            .map_err(|e| bad_encoding(s, ty, e))
    }
}

impl SpannerType for &[u8] {
    fn spanner_type() -> Type {
        Type::bytes()
    }
}

impl ToValue for &[u8] {
    fn to_value(&self) -> GenericColumnValue {
        GenericColumnValue::new(Type::bytes(), string_value(BASE64.encode(self)))
    }
}

impl SpannerType for NaiveDate {
    fn spanner_type() -> Type {
        Type::date()
    }
}

impl ToValue for NaiveDate {
    fn to_value(&self) -> GenericColumnValue {
        GenericColumnValue::new(Type::date(), string_value(self.format(DATE_FORMAT).to_string()))
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: &Value, ty: &Type) -> Result<Self> {
        expect_scalar::<Self>(value, ty, &[TypeCode::Date])?;
        let s = as_str(value, "date")?;
        NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| bad_encoding(s, ty, e))
    }
}

impl SpannerType for DateTime<Utc> {
    fn spanner_type() -> Type {
        Type::timestamp()
    }
}

impl ToValue for DateTime<Utc> {
    fn to_value(&self) -> GenericColumnValue {
        GenericColumnValue::new(
            Type::timestamp(),
            string_value(self.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        )
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: &Value, ty: &Type) -> Result<Self> {
        expect_scalar::<Self>(value, ty, &[TypeCode::Timestamp])?;
        let s = as_str(value, "timestamp")?;
        DateTime::parse_from_rfc3339(s)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| bad_encoding(s, ty, e))
    }
}

impl SpannerType for CommitTimestamp {
    fn spanner_type() -> Type {
        Type::timestamp()
    }
}

impl ToValue for CommitTimestamp {
    fn to_value(&self) -> GenericColumnValue {
        GenericColumnValue::new(Type::timestamp(), string_value(COMMIT_TIMESTAMP_PLACEHOLDER))
    }
}

impl SpannerType for Numeric {
    fn spanner_type() -> Type {
        Type::numeric()
    }
}

impl ToValue for Numeric {
    fn to_value(&self) -> GenericColumnValue {
        GenericColumnValue::new(Type::numeric(), string_value(self.to_string()))
    }
}

impl FromValue for Numeric {
    fn from_value(value: &Value, ty: &Type) -> Result<Self> {
        expect_scalar::<Self>(value, ty, &[TypeCode::Numeric])?;
        let s = as_str(value, "numeric")?;
        s.parse().map_err(|e: Error| bad_encoding(s, ty, e.message()))
    }
}

impl SpannerType for Json {
    fn spanner_type() -> Type {
        Type::json()
    }
}

impl ToValue for Json {
    fn to_value(&self) -> GenericColumnValue {
        GenericColumnValue::new(Type::json(), string_value(self.0.to_string()))
    }
}

impl FromValue for Json {
    fn from_value(value: &Value, ty: &Type) -> Result<Self> {
        expect_scalar::<Self>(value, ty, &[TypeCode::Json])?;
        let s = as_str(value, "json")?;
        serde_json::from_str(s)
            .map(Json)
            .map_err(|e| bad_encoding(s, ty, e))
    }
}

impl<M> SpannerType for ProtoMessage<M>
where
    M: prost::Message + prost::Name + Default,
{
    fn spanner_type() -> Type {
        Type::proto(M::full_name())
    }
}

impl<M> ToValue for ProtoMessage<M>
where
    M: prost::Message + prost::Name + Default,
{
    fn to_value(&self) -> GenericColumnValue {
        GenericColumnValue::new(
            Self::spanner_type(),
            string_value(BASE64.encode(self.0.encode_to_vec())),
        )
    }
}

impl<M> FromValue for ProtoMessage<M>
where
    M: prost::Message + prost::Name + Default,
{
    fn from_value(value: &Value, ty: &Type) -> Result<Self> {
        expect_scalar::<Self>(value, ty, &[TypeCode::Proto, TypeCode::Bytes])?;
        let s = as_str(value, "proto")?;
        let raw = BASE64.decode(s).map_err(|e| bad_encoding(s, ty, e))?;
        M::decode(raw.as_slice())
            .map(ProtoMessage)
            .map_err(|e| bad_encoding(s, ty, e))
    }
}

impl ToValue for ProtoEnum {
    fn to_value(&self) -> GenericColumnValue {
        GenericColumnValue::new(
            Type::proto_enum(self.fqn.clone()),
            string_value(self.value.to_string()),
        )
    }
}

impl FromValue for ProtoEnum {
    fn from_value(value: &Value, ty: &Type) -> Result<Self> {
        expect_scalar::<Self>(value, ty, &[TypeCode::Enum, TypeCode::Int64])?;
        let s = as_str(value, "enum")?;
        let number = s.parse().map_err(|e| bad_encoding(s, ty, e))?;
        Ok(Self::new(number, ty.proto_type_fqn.clone()))
    }
}

impl<T: SpannerType> SpannerType for Option<T> {
    fn spanner_type() -> Type {
        T::spanner_type()
    }
}

impl<T: ToValue + SpannerType> ToValue for Option<T> {
    fn to_value(&self) -> GenericColumnValue {
        match self {
            Some(inner) => inner.to_value(),
            None => GenericColumnValue::null(T::spanner_type()),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value, ty: &Type) -> Result<Self> {
        if is_null(value) {
            return Ok(None);
        }
        T::from_value(value, ty).map(Some)
    }
}

impl<T: SpannerType> SpannerType for Vec<T> {
    fn spanner_type() -> Type {
        Type::array(T::spanner_type())
    }
}

impl<T: ToValue + SpannerType> ToValue for Vec<T> {
    fn to_value(&self) -> GenericColumnValue {
        let values = self.iter().map(|item| item.to_value().value).collect();
        GenericColumnValue::new(Self::spanner_type(), list_value(values))
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value, ty: &Type) -> Result<Self> {
        if ty.code() != TypeCode::Array {
            return Err(type_mismatch::<Self>(ty));
        }
        if is_null(value) {
            return Err(null_not_supported::<Self>());
        }
        let element = ty
            .element()
            .ok_or_else(|| Error::failed_precondition("ARRAY type without element type"))?;
        as_list(value, "list")?
            .iter()
            .map(|item| T::from_value(item, element))
            .collect()
    }
}
