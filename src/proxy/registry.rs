//! Server-side registry of proxy handles, keyed by connection

use std::collections::HashMap;

use crate::error::ProxyError;
use crate::protocol::{ConnectionId, ProxyId};
use crate::proxy::handle::ProxyHandle;

/// Result of a proxy request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyRequest {
    /// A new handle was created and registered
    Created(ProxyId),
    /// The connection already had a handle; nothing changed
    Existing(ProxyId),
}

impl ProxyRequest {
    pub fn id(&self) -> ProxyId {
        match self {
            Self::Created(id) | Self::Existing(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Maps each connection to its proxy handle
///
/// One entry per connection, no two entries with the same identifier.
/// Entries are only created by [`request`](Self::request) and only
/// removed by [`release`](Self::release).
#[derive(Debug, Default)]
pub struct ProxyRegistry {
    proxies: HashMap<ConnectionId, ProxyHandle>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a proxy for `connection`
    ///
    /// The identifier equals the connection id. A connection that already
    /// has a handle gets its existing identifier back and no new handle is
    /// created.
    pub fn request(&mut self, connection: ConnectionId) -> Result<ProxyRequest, ProxyError> {
        if let Some(handle) = self.proxies.get(&connection) {
            let id = handle.id().ok_or(ProxyError::Unassigned)?;
            return Ok(ProxyRequest::Existing(id));
        }

        let id = ProxyId::try_from(connection)?;
        if self.proxies.values().any(|handle| handle.id() == Some(id)) {
            return Err(ProxyError::DuplicateIdentifier(id));
        }

        let mut handle = ProxyHandle::new();
        handle.assign_id(id)?;
        // The only participant local to the server process is the host
        let local = connection.is_host().then_some(id);
        handle.activate(local)?;

        self.proxies.insert(connection, handle);
        Ok(ProxyRequest::Created(id))
    }

    /// Remove and destroy the handle for `connection`
    pub fn release(&mut self, connection: ConnectionId) -> Result<ProxyHandle, ProxyError> {
        let mut handle = self
            .proxies
            .remove(&connection)
            .ok_or(ProxyError::NotRegistered(connection))?;

        handle.destroy();
        Ok(handle)
    }

    pub fn get(&self, connection: ConnectionId) -> Option<&ProxyHandle> {
        self.proxies.get(&connection)
    }

    pub fn get_mut(&mut self, connection: ConnectionId) -> Option<&mut ProxyHandle> {
        self.proxies.get_mut(&connection)
    }

    /// Assigned identifier for `connection`
    pub fn proxy_id(&self, connection: ConnectionId) -> Option<ProxyId> {
        self.proxies.get(&connection).and_then(|handle| handle.id())
    }

    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.proxies.contains_key(&connection)
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// All registered identifiers, sorted
    pub fn ids(&self) -> Vec<ProxyId> {
        let mut ids: Vec<ProxyId> = self.proxies.values().filter_map(|h| h.id()).collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConnectionId, &ProxyHandle)> {
        self.proxies.iter()
    }

    /// Destroy every handle
    pub fn clear(&mut self) -> Vec<ProxyId> {
        let mut released = Vec::with_capacity(self.proxies.len());
        for (_, mut handle) in self.proxies.drain() {
            handle.destroy();
            released.extend(handle.id());
        }
        released.sort();
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::handle::HandleState;

    #[test]
    fn test_request_assigns_connection_id() {
        let mut registry = ProxyRegistry::new();
        let result = registry.request(ConnectionId::new(5)).unwrap();

        assert_eq!(result, ProxyRequest::Created(ProxyId::from_origin(5)));
        assert_eq!(registry.len(), 1);

        let handle = registry.get(ConnectionId::new(5)).unwrap();
        assert_eq!(handle.state(), HandleState::Active);
        assert!(!handle.is_local());
    }

    #[test]
    fn test_host_request_is_local() {
        let mut registry = ProxyRegistry::new();
        let result = registry.request(ConnectionId::HOST).unwrap();

        assert_eq!(result.id(), ProxyId::HOST);
        assert!(registry.get(ConnectionId::HOST).unwrap().is_local());
    }

    #[test]
    fn test_duplicate_request_is_idempotent() {
        let mut registry = ProxyRegistry::new();
        registry.request(ConnectionId::new(5)).unwrap();

        let again = registry.request(ConnectionId::new(5)).unwrap();
        assert_eq!(again, ProxyRequest::Existing(ProxyId::from_origin(5)));
        assert!(!again.is_new());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_release_unregistered_changes_nothing() {
        let mut registry = ProxyRegistry::new();
        registry.request(ConnectionId::new(2)).unwrap();

        let err = registry.release(ConnectionId::new(9)).unwrap_err();
        assert_eq!(err, ProxyError::NotRegistered(ConnectionId::new(9)));
        assert_eq!(registry.ids(), vec![ProxyId::from_origin(2)]);
    }

    #[test]
    fn test_release_destroys_handle() {
        let mut registry = ProxyRegistry::new();
        registry.request(ConnectionId::new(4)).unwrap();

        let handle = registry.release(ConnectionId::new(4)).unwrap();
        assert_eq!(handle.state(), HandleState::Destroyed);
        assert!(!registry.contains(ConnectionId::new(4)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_out_of_range_connection_rejected() {
        let mut registry = ProxyRegistry::new();
        let err = registry.request(ConnectionId::new(100_000)).unwrap_err();
        assert_eq!(err, ProxyError::IdentifierOutOfRange(ConnectionId::new(100_000)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear_destroys_all() {
        let mut registry = ProxyRegistry::new();
        registry.request(ConnectionId::new(3)).unwrap();
        registry.request(ConnectionId::HOST).unwrap();

        assert_eq!(registry.clear(), vec![ProxyId::HOST, ProxyId::from_origin(3)]);
        assert!(registry.is_empty());
    }
}
