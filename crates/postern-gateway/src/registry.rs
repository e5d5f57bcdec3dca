//! Session registry
//!
//! Concurrent map from public session identifier to the worker owning that
//! session. A session appears here only once it is joinable (its first user
//! attached) and is removed exactly once when its worker terminates.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use postern_core::RouteError;
use postern_protocol::SessionId;

use crate::worker::Worker;

/// All currently joinable sessions
pub struct SessionRegistry {
    workers: DashMap<SessionId, Arc<Worker>>,
}

impl SessionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            workers: DashMap::new(),
        }
    }

    /// Register a worker under its session identifier
    ///
    /// Never overwrites: registering an identifier that is already present
    /// fails and leaves the existing entry untouched.
    pub fn add(&self, id: SessionId, worker: Arc<Worker>) -> Result<(), RouteError> {
        match self.workers.entry(id) {
            Entry::Occupied(entry) => Err(RouteError::SessionExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(worker);
                Ok(())
            }
        }
    }

    /// Remove a session, returning its worker if it was present
    pub fn remove(&self, id: &SessionId) -> Option<Arc<Worker>> {
        self.workers.remove(id).map(|(_, worker)| worker)
    }

    /// Look up the worker owning a session
    pub fn lookup(&self, id: &SessionId) -> Option<Arc<Worker>> {
        self.workers.get(id).map(|r| Arc::clone(&r))
    }

    /// Number of joinable sessions
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postern_core::GatewayConfig;
    use postern_session::ClientSession;

    fn spawn_test_worker(registry: &Arc<SessionRegistry>) -> Arc<Worker> {
        Worker::spawn(
            Arc::clone(registry),
            ClientSession::new("vnc"),
            &GatewayConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_add_and_lookup() {
        let registry = Arc::new(SessionRegistry::new());
        let worker = spawn_test_worker(&registry);
        let id = worker.id().clone();

        registry.add(id.clone(), Arc::clone(&worker)).unwrap();
        assert_eq!(registry.len(), 1);

        let found = registry.lookup(&id).unwrap();
        assert_eq!(found.id(), &id);
    }

    #[tokio::test]
    async fn test_add_never_overwrites() {
        let registry = Arc::new(SessionRegistry::new());
        let first = spawn_test_worker(&registry);
        let second = spawn_test_worker(&registry);
        let id = first.id().clone();

        registry.add(id.clone(), Arc::clone(&first)).unwrap();
        let result = registry.add(id.clone(), Arc::clone(&second));
        assert!(matches!(result, Err(RouteError::SessionExists(_))));

        // The original entry survived
        let found = registry.lookup(&id).unwrap();
        assert!(Arc::ptr_eq(&found, &first));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_is_exact() {
        let registry = Arc::new(SessionRegistry::new());
        let worker = spawn_test_worker(&registry);
        let id = worker.id().clone();

        registry.add(id.clone(), worker).unwrap();
        assert!(registry.remove(&id).is_some());
        assert!(registry.remove(&id).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_unknown_session() {
        let registry = SessionRegistry::new();
        let id = SessionId::generate();
        assert!(registry.lookup(&id).is_none());
    }
}
