//! Target registrations known to the mediator

use crate::handler::ConnectionId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

/// One registered target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredTarget {
    /// Public endpoint observed for the target's control connection
    pub endpoint: SocketAddr,
    /// Control connection that owns the registration
    pub connection: ConnectionId,
    /// Last REGISTER or keep-alive refresh
    pub refreshed_at: Instant,
}

/// Thread-safe table from target id to its observed endpoint
#[derive(Debug, Default)]
pub struct RegistrationTable {
    entries: RwLock<HashMap<String, RegisteredTarget>>,
}

impl RegistrationTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh `target_id`. Returns true for a new registration.
    ///
    /// A later registration from another connection takes the entry over.
    pub fn register(&self, target_id: &str, endpoint: SocketAddr, connection: ConnectionId) -> bool {
        let entry = RegisteredTarget {
            endpoint,
            connection,
            refreshed_at: Instant::now(),
        };
        let previous = self.entries.write().insert(target_id.to_owned(), entry);
        match previous {
            Some(previous) if previous.connection != connection || previous.endpoint != endpoint => {
                tracing::info!(
                    target_id = %target_id,
                    old = %previous.endpoint,
                    new = %endpoint,
                    "Target registration moved"
                );
                false
            }
            Some(_) => false,
            None => true,
        }
    }

    /// Remove `target_id` if `connection` owns it
    pub fn deregister(&self, target_id: &str, connection: ConnectionId) -> bool {
        let mut entries = self.entries.write();
        match entries.get(target_id) {
            Some(entry) if entry.connection == connection => {
                entries.remove(target_id);
                true
            }
            _ => false,
        }
    }

    /// Endpoint registered for `target_id`
    pub fn lookup(&self, target_id: &str) -> Option<SocketAddr> {
        self.entries.read().get(target_id).map(|entry| entry.endpoint)
    }

    /// Full entry for `target_id`, including its owner and refresh time
    pub fn get(&self, target_id: &str) -> Option<RegisteredTarget> {
        self.entries.read().get(target_id).copied()
    }

    /// Drop every registration owned by `connection`
    pub fn remove_connection(&self, connection: ConnectionId) -> Vec<String> {
        self.remove_where(|entry| entry.connection == connection)
    }

    /// Drop registrations not refreshed within `ttl` of `now`
    pub fn expire(&self, now: Instant, ttl: Duration) -> Vec<String> {
        self.remove_where(|entry| now.saturating_duration_since(entry.refreshed_at) > ttl)
    }

    fn remove_where(&self, predicate: impl Fn(&RegisteredTarget) -> bool) -> Vec<String> {
        let mut removed = Vec::new();
        self.entries.write().retain(|target_id, entry| {
            if predicate(entry) {
                removed.push(target_id.clone());
                false
            } else {
                true
            }
        });
        removed.sort();
        removed
    }

    /// Number of registered targets
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when no target is registered
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([203, 0, 113, 5], port))
    }

    #[test]
    fn test_register_and_lookup() {
        let table = RegistrationTable::new();
        let conn = ConnectionId::next();
        assert!(table.register("peer-A", addr(4000), conn));
        assert!(!table.register("peer-A", addr(4000), conn));
        assert_eq!(table.lookup("peer-A"), Some(addr(4000)));
        assert_eq!(table.lookup("peer-B"), None);
    }

    #[test]
    fn test_deregister_requires_owner() {
        let table = RegistrationTable::new();
        let owner = ConnectionId::next();
        let other = ConnectionId::next();
        table.register("peer-A", addr(4000), owner);

        assert!(!table.deregister("peer-A", other));
        assert!(table.deregister("peer-A", owner));
        assert!(table.is_empty());
    }

    #[test]
    fn test_newer_connection_takes_over() {
        let table = RegistrationTable::new();
        let old = ConnectionId::next();
        let new = ConnectionId::next();
        table.register("peer-A", addr(4000), old);
        table.register("peer-A", addr(4001), new);

        assert!(table.remove_connection(old).is_empty());
        assert_eq!(table.lookup("peer-A"), Some(addr(4001)));
    }

    #[test]
    fn test_remove_connection() {
        let table = RegistrationTable::new();
        let conn = ConnectionId::next();
        let other = ConnectionId::next();
        table.register("b", addr(1), conn);
        table.register("a", addr(1), conn);
        table.register("c", addr(2), other);

        assert_eq!(table.remove_connection(conn), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(table.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_stale_entries() {
        let table = RegistrationTable::new();
        let conn = ConnectionId::next();
        table.register("stale", addr(1), conn);
        tokio::time::advance(Duration::from_secs(10)).await;
        table.register("fresh", addr(2), conn);

        let removed = table.expire(Instant::now(), Duration::from_secs(5));
        assert_eq!(removed, vec!["stale".to_string()]);
        assert_eq!(table.lookup("fresh"), Some(addr(2)));
    }
}
