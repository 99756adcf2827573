use std::fmt;

use crate::proto::{struct_type, StructType, Type, TypeCode};

impl Type {
    pub fn scalar(code: TypeCode) -> Self {
        Self {
            code: code as i32,
            ..Default::default()
        }
    }

    pub fn bool() -> Self {
        Self::scalar(TypeCode::Bool)
    }

    pub fn int64() -> Self {
        Self::scalar(TypeCode::Int64)
    }

    pub fn float64() -> Self {
        Self::scalar(TypeCode::Float64)
    }

    pub fn float32() -> Self {
        Self::scalar(TypeCode::Float32)
    }

    pub fn string() -> Self {
        Self::scalar(TypeCode::String)
    }

    pub fn bytes() -> Self {
        Self::scalar(TypeCode::Bytes)
    }

    pub fn date() -> Self {
        Self::scalar(TypeCode::Date)
    }

    pub fn timestamp() -> Self {
        Self::scalar(TypeCode::Timestamp)
    }

    pub fn numeric() -> Self {
        Self::scalar(TypeCode::Numeric)
    }

    pub fn json() -> Self {
        Self::scalar(TypeCode::Json)
    }

    pub fn proto(fqn: impl Into<String>) -> Self {
        Self {
            code: TypeCode::Proto as i32,
            proto_type_fqn: fqn.into(),
            ..Default::default()
        }
    }

    pub fn proto_enum(fqn: impl Into<String>) -> Self {
        Self {
            code: TypeCode::Enum as i32,
            proto_type_fqn: fqn.into(),
            ..Default::default()
        }
    }

    pub fn array(element: Type) -> Self {
        Self {
            code: TypeCode::Array as i32,
            array_element_type: Some(Box::new(element)),
            ..Default::default()
        }
    }

    pub fn structure<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, Type)>,
        S: Into<String>,
    {
        Self {
            code: TypeCode::Struct as i32,
            struct_type: Some(StructType {
                fields: fields
                    .into_iter()
                    .map(|(name, ty)| struct_type::Field {
                        name: name.into(),
                        r#type: Some(ty),
                    })
                    .collect(),
            }),
            ..Default::default()
        }
    }

    /// Element type of an ARRAY, `None` for any other code.
    pub fn element(&self) -> Option<&Type> {
        self.array_element_type.as_deref()
    }

    pub fn fields(&self) -> &[struct_type::Field] {
        self.struct_type
            .as_ref()
            .map(|s| s.fields.as_slice())
            .unwrap_or(&[])
    }

    pub fn describe(&self) -> TypeName<'_> {
        TypeName(self)
    }
}

/// SQL-style rendering of a [`Type`], e.g. `ARRAY<STRUCT<a INT64>>`.
pub struct TypeName<'a>(&'a Type);

impl fmt::Display for TypeName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ty = self.0;
        match ty.code() {
            TypeCode::Array => match ty.element() {
                Some(element) => write!(f, "ARRAY<{}>", element.describe()),
                None => f.write_str("ARRAY<?>"),
            },
            TypeCode::Struct => {
                f.write_str("STRUCT<")?;
                for (i, field) in ty.fields().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match &field.r#type {
                        Some(inner) => write!(f, "{} {}", field.name, inner.describe())?,
                        None => write!(f, "{} ?", field.name)?,
                    }
                }
                f.write_str(">")
            }
            TypeCode::Proto => write!(f, "PROTO<{}>", ty.proto_type_fqn),
            TypeCode::Enum => write!(f, "ENUM<{}>", ty.proto_type_fqn),
            code => f.write_str(code_name(code)),
        }
    }
}

fn code_name(code: TypeCode) -> &'static str {
    match code {
        TypeCode::Unspecified => "TYPE_CODE_UNSPECIFIED",
        TypeCode::Bool => "BOOL",
        TypeCode::Int64 => "INT64",
        TypeCode::Float64 => "FLOAT64",
        TypeCode::Float32 => "FLOAT32",
        TypeCode::Timestamp => "TIMESTAMP",
        TypeCode::Date => "DATE",
        TypeCode::String => "STRING",
        TypeCode::Bytes => "BYTES",
        TypeCode::Array => "ARRAY",
        TypeCode::Struct => "STRUCT",
        TypeCode::Numeric => "NUMERIC",
        TypeCode::Json => "JSON",
        TypeCode::Proto => "PROTO",
        TypeCode::Enum => "ENUM",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_types_render_like_sql() {
        let ty = Type::array(Type::structure([
            ("id", Type::int64()),
            ("tags", Type::array(Type::string())),
        ]));
        assert_eq!(
            ty.describe().to_string(),
            "ARRAY<STRUCT<id INT64, tags ARRAY<STRING>>>"
        );
        assert_eq!(Type::proto("acme.Order").describe().to_string(), "PROTO<acme.Order>");
    }

    #[test]
    fn accessors_are_empty_for_scalars() {
        let ty = Type::numeric();
        assert!(ty.element().is_none());
        assert!(ty.fields().is_empty());
        assert_eq!(ty.code(), TypeCode::Numeric);
    }
}
