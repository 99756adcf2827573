//! Identifiers handed out by the session layer.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

macro_rules! define_id_type {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            pub fn id(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id_type!(HandleId, "Checkout ticket of one pooled session borrow");

/// Monotonic checkout ticket generator; one per pool.
#[derive(Debug)]
pub struct HandleIdGenerator {
    next_id: AtomicU64,
}

impl HandleIdGenerator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> HandleId {
        HandleId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for HandleIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands out `client-N` ids, numbered per database.
#[derive(Debug, Default)]
pub struct ClientIdGenerator {
    ids: Mutex<HashMap<String, u64>>,
}

impl ClientIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self, database: &str) -> String {
        let mut ids = self.ids.lock().unwrap_or_else(|p| p.into_inner());
        let next = ids.entry(database.to_string()).or_insert(0);
        *next += 1;
        format!("client-{next}")
    }
}

/// Process wide generator used when a client is built without an explicit id.
pub fn next_client_id(database: &str) -> String {
    static GENERATOR: OnceLock<ClientIdGenerator> = OnceLock::new();
    GENERATOR
        .get_or_init(ClientIdGenerator::new)
        .next_id(database)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_ids_increment_monotonically() {
        let ids = HandleIdGenerator::new();
        let first = ids.next();
        let second = ids.next();
        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert!(first < second);
        assert_eq!(second.to_string(), "2");
    }

    #[test]
    fn client_ids_are_numbered_per_database() {
        let ids = ClientIdGenerator::new();
        assert_eq!(ids.next_id("db-a"), "client-1");
        assert_eq!(ids.next_id("db-a"), "client-2");
        assert_eq!(ids.next_id("db-b"), "client-1");
    }
}
