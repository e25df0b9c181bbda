//! Individual proxy handle

use std::time::{Duration, Instant};

use crate::error::ProxyError;
use crate::protocol::ProxyId;

/// Handle lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Created, identifier not set yet
    Unassigned,
    /// Identifier set, not yet eligible for traffic
    Assigned,
    /// Eligible to send/receive packets
    Active,
    /// Torn down; terminal
    Destroyed,
}

impl HandleState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unassigned => "Unassigned",
            Self::Assigned => "Assigned",
            Self::Active => "Active",
            Self::Destroyed => "Destroyed",
        }
    }
}

/// Relay state for one participant
///
/// The identifier is write-once: it is set by whoever creates the handle
/// before the handle is exposed anywhere else, and any later attempt to
/// change it is refused.
#[derive(Debug)]
pub struct ProxyHandle {
    /// Assigned identifier, `None` until the handshake completes
    id: Option<ProxyId>,

    /// True when `id` is this process's own participant
    is_local: bool,

    /// Current state
    state: HandleState,

    /// Activation time
    activated_at: Option<Instant>,

    /// Packets produced or delivered through this handle
    packets: u64,
}

impl ProxyHandle {
    /// Create an unassigned handle
    pub fn new() -> Self {
        Self {
            id: None,
            is_local: false,
            state: HandleState::Unassigned,
            activated_at: None,
            packets: 0,
        }
    }

    /// Create a handle whose identifier is already known
    pub fn with_id(id: ProxyId) -> Self {
        let mut handle = Self::new();
        handle.id = Some(id);
        handle.state = HandleState::Assigned;
        handle
    }

    /// Set the identifier
    pub fn assign_id(&mut self, id: ProxyId) -> Result<(), ProxyError> {
        match (self.state, self.id) {
            (HandleState::Unassigned, _) => {
                self.id = Some(id);
                self.state = HandleState::Assigned;
                Ok(())
            }
            (HandleState::Active, Some(current)) => {
                tracing::warn!(
                    "Proxy {} is already active, ignoring identifier {}",
                    current,
                    id
                );
                Err(ProxyError::LateAssignment { current, attempted: id })
            }
            (HandleState::Assigned, Some(current)) => {
                tracing::warn!("Proxy identifier already set to {}, ignoring {}", current, id);
                Err(ProxyError::AlreadyAssigned { current, attempted: id })
            }
            (state, _) => Err(ProxyError::InvalidTransition {
                from: state.name(),
                to: HandleState::Assigned.name(),
            }),
        }
    }

    /// Make the handle eligible for traffic
    ///
    /// `local_id` is this process's own assigned identifier, if known.
    pub fn activate(&mut self, local_id: Option<ProxyId>) -> Result<(), ProxyError> {
        match self.state {
            HandleState::Assigned => {
                self.is_local = self.id.is_some() && self.id == local_id;
                self.state = HandleState::Active;
                self.activated_at = Some(Instant::now());
                Ok(())
            }
            HandleState::Active => Ok(()),
            HandleState::Unassigned => Err(ProxyError::Unassigned),
            HandleState::Destroyed => Err(ProxyError::InvalidTransition {
                from: HandleState::Destroyed.name(),
                to: HandleState::Active.name(),
            }),
        }
    }

    /// Tear the handle down. Returns false if it was already destroyed.
    pub fn destroy(&mut self) -> bool {
        if self.state == HandleState::Destroyed {
            return false;
        }
        self.state = HandleState::Destroyed;
        self.activated_at = None;
        true
    }

    pub fn id(&self) -> Option<ProxyId> {
        self.id
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == HandleState::Active
    }

    /// Count a packet that went through this handle
    pub fn record_packet(&mut self) {
        self.packets += 1;
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Time spent active, if active
    pub fn active_for(&self) -> Option<Duration> {
        self.activated_at.map(|t| t.elapsed())
    }
}

impl Default for ProxyHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_is_write_once_after_activation() {
        let mut handle = ProxyHandle::new();
        handle.assign_id(ProxyId::from_origin(5)).unwrap();
        handle.activate(None).unwrap();

        let err = handle.assign_id(ProxyId::from_origin(9)).unwrap_err();
        assert_eq!(
            err,
            ProxyError::LateAssignment {
                current: ProxyId::from_origin(5),
                attempted: ProxyId::from_origin(9),
            }
        );
        assert_eq!(handle.id(), Some(ProxyId::from_origin(5)));
        assert!(handle.is_active());
    }

    #[test]
    fn test_second_assignment_before_activation_rejected() {
        let mut handle = ProxyHandle::with_id(ProxyId::from_origin(3));
        assert!(handle.assign_id(ProxyId::from_origin(4)).is_err());
        assert_eq!(handle.id(), Some(ProxyId::from_origin(3)));
        assert_eq!(handle.state(), HandleState::Assigned);
    }

    #[test]
    fn test_activation_requires_identifier() {
        let mut handle = ProxyHandle::new();
        assert_eq!(handle.activate(None), Err(ProxyError::Unassigned));
        assert_eq!(handle.state(), HandleState::Unassigned);
    }

    #[test]
    fn test_is_local_only_for_own_identifier() {
        let own = ProxyId::from_origin(7);

        let mut mine = ProxyHandle::with_id(own);
        mine.activate(Some(own)).unwrap();
        assert!(mine.is_local());

        let mut theirs = ProxyHandle::with_id(ProxyId::from_origin(8));
        theirs.activate(Some(own)).unwrap();
        assert!(!theirs.is_local());

        let mut unknown = ProxyHandle::with_id(own);
        unknown.activate(None).unwrap();
        assert!(!unknown.is_local());
    }

    #[test]
    fn test_host_handle_is_local_in_host_process() {
        let mut host = ProxyHandle::with_id(ProxyId::HOST);
        host.activate(Some(ProxyId::HOST)).unwrap();
        assert!(host.is_local());
    }

    #[test]
    fn test_destroy_is_terminal() {
        let mut handle = ProxyHandle::with_id(ProxyId::from_origin(1));
        handle.activate(None).unwrap();
        assert!(handle.destroy());
        assert!(!handle.destroy());
        assert!(handle.activate(None).is_err());
        assert!(handle.active_for().is_none());
    }
}
