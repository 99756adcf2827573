use std::collections::{BTreeMap, HashMap};

use crate::proto::Type;
use crate::value::{GenericColumnValue, ToValue};

/// A SQL string with named parameters, referenced as `@name` in the text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub sql: String,
    params: BTreeMap<String, GenericColumnValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: BTreeMap::new(),
        }
    }

    /// Binds `@name`. A leading `@` in `name` is ignored.
    pub fn bind(mut self, name: &str, value: impl ToValue) -> Self {
        let name = name.strip_prefix('@').unwrap_or(name);
        self.params.insert(name.to_string(), value.to_value());
        self
    }

    pub fn params(&self) -> &BTreeMap<String, GenericColumnValue> {
        &self.params
    }

    /// Wire form of the parameters: values plus their declared types.
    pub(crate) fn to_params(&self) -> (Option<prost_types::Struct>, HashMap<String, Type>) {
        if self.params.is_empty() {
            return (None, HashMap::new());
        }
        let fields = self
            .params
            .iter()
            .map(|(name, cell)| (name.clone(), cell.value.clone()))
            .collect();
        let types = self
            .params
            .iter()
            .map(|(name, cell)| (name.clone(), cell.ty.clone()))
            .collect();
        (Some(prost_types::Struct { fields }), types)
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}
