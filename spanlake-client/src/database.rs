use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

const DATABASE_PATTERN: &str =
    r"^projects/(?P<project>[^/]+)/instances/(?P<instance>[^/]+)/databases/(?P<database>[^/]+)$";

fn database_regex() -> Result<&'static Regex> {
    static RE: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(DATABASE_PATTERN))
        .as_ref()
        .map_err(|err| Error::internal(format!("invalid database pattern: {err}")))
}

/// A validated `projects/{P}/instances/{I}/databases/{D}` path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatabaseName {
    project: String,
    instance: String,
    database: String,
}

impl DatabaseName {
    pub fn parse(path: &str) -> Result<Self> {
        let caps = database_regex()?.captures(path).ok_or_else(|| {
            Error::invalid_argument(format!(
                "database name {path:?} should conform to pattern {DATABASE_PATTERN:?}"
            ))
        })?;
        Ok(Self {
            project: caps["project"].to_string(),
            instance: caps["instance"].to_string(),
            database: caps["database"].to_string(),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// `projects/{P}/instances/{I}`, the name used by instance admin calls.
    pub fn instance_path(&self) -> String {
        format!("projects/{}/instances/{}", self.project, self.instance)
    }
}

impl fmt::Display for DatabaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "projects/{}/instances/{}/databases/{}",
            self.project, self.instance, self.database
        )
    }
}

#[cfg(test)]
mod tests {
    use tonic::Code;

    use super::*;

    #[test]
    fn parses_components() {
        let name = DatabaseName::parse("projects/p1/instances/i-2/databases/db_3").unwrap();
        assert_eq!(name.project(), "p1");
        assert_eq!(name.instance(), "i-2");
        assert_eq!(name.database(), "db_3");
        assert_eq!(name.instance_path(), "projects/p1/instances/i-2");
        assert_eq!(name.to_string(), "projects/p1/instances/i-2/databases/db_3");
    }

    #[test]
    fn rejects_malformed_paths() {
        for bad in [
            "",
            "projects/p/instances/i",
            "projects//instances/i/databases/d",
            "projects/p/instances/i/databases/d/extra",
            "project/p/instances/i/databases/d",
        ] {
            let err = DatabaseName::parse(bad).unwrap_err();
            assert_eq!(err.code(), Code::InvalidArgument, "{bad}");
            assert!(err.message().contains("should conform to pattern"));
        }
    }
}
