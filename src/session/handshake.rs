//! Per-participant handshake state machine
//!
//! ```text
//!  Unassigned ──► Requested ──► Assigned ──► Spawned ──► Active
//!       │             ▲  │          ▲                       │
//!       │             └──┘ retry    │                       │
//!       └───────── host path ───────┘                       │
//!                                                           ▼
//!  (any) ─────────────────────────────────────────────► Destroyed
//! ```
//!
//! The host participant skips `Requested`: its identifier is assigned in
//! the same process that runs the registry, so it goes straight from
//! `Unassigned` to `Assigned`.

use std::fmt;
use std::time::{Duration, Instant};

use crate::error::ProxyError;
use crate::protocol::ProxyId;

/// Where the local participant is in the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent yet
    Unassigned,
    /// RequestProxy sent, waiting for ProxyAssigned
    Requested { sent_at: Instant, attempts: u32 },
    /// Identifier known, own handle not spawned locally yet
    Assigned { id: ProxyId },
    /// Own handle exists locally
    Spawned { id: ProxyId },
    /// Eligible to send and receive packets
    Active { id: ProxyId, since: Instant },
    /// Torn down
    Destroyed,
}

impl Default for HandshakeState {
    fn default() -> Self {
        Self::Unassigned
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl HandshakeState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unassigned => "Unassigned",
            Self::Requested { .. } => "Requested",
            Self::Assigned { .. } => "Assigned",
            Self::Spawned { .. } => "Spawned",
            Self::Active { .. } => "Active",
            Self::Destroyed => "Destroyed",
        }
    }

    fn invalid(&self, to: &'static str) -> ProxyError {
        ProxyError::InvalidTransition {
            from: self.name(),
            to,
        }
    }

    /// `Unassigned → Requested`, or a retry while `Requested`
    pub fn request(&mut self) -> Result<(), ProxyError> {
        let attempts = match *self {
            Self::Unassigned => 1,
            Self::Requested { attempts, .. } => attempts + 1,
            _ => return Err(self.invalid("Requested")),
        };
        *self = Self::Requested {
            sent_at: Instant::now(),
            attempts,
        };
        Ok(())
    }

    /// `Requested → Assigned`; `Unassigned → Assigned` on the host path
    pub fn assign(&mut self, id: ProxyId) -> Result<(), ProxyError> {
        match *self {
            Self::Unassigned | Self::Requested { .. } => {
                *self = Self::Assigned { id };
                Ok(())
            }
            _ => Err(self.invalid("Assigned")),
        }
    }

    /// `Assigned → Spawned`
    pub fn spawned(&mut self) -> Result<(), ProxyError> {
        match *self {
            Self::Assigned { id } => {
                *self = Self::Spawned { id };
                Ok(())
            }
            _ => Err(self.invalid("Spawned")),
        }
    }

    /// `Spawned → Active`
    pub fn activate(&mut self) -> Result<(), ProxyError> {
        match *self {
            Self::Spawned { id } => {
                *self = Self::Active {
                    id,
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(self.invalid("Active")),
        }
    }

    /// Any state → `Destroyed`
    pub fn destroy(&mut self) {
        *self = Self::Destroyed;
    }

    /// Identifier assigned to the local participant, once known
    pub fn local_id(&self) -> Option<ProxyId> {
        match *self {
            Self::Assigned { id } | Self::Spawned { id } | Self::Active { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self, Self::Destroyed)
    }

    /// True if a request has been outstanding for longer than `timeout`
    pub fn request_expired(&self, timeout: Duration) -> bool {
        match self {
            Self::Requested { sent_at, .. } => sent_at.elapsed() >= timeout,
            _ => false,
        }
    }

    /// Number of RequestProxy messages sent so far
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Requested { attempts, .. } => *attempts,
            _ => 0,
        }
    }
}
