//! Connection state tracking.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use uuid::Uuid;

/// Connection state of the shared feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection and no attempt in flight
    Disconnected,
    /// An attempt is in flight
    Connecting,
    /// The connection is open
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Mutable connection bookkeeping, guarded by the manager's lock.
#[derive(Debug)]
pub(crate) struct InternalState {
    pub state: ConnectionState,
    /// Consecutive failed or closed attempts since the last successful connect
    pub reconnect_attempts: u32,
    /// Identifier of the open connection, for log correlation
    pub connection_id: Option<Uuid>,
    pub last_connected: Option<Instant>,
    pub last_message: Option<Instant>,
}

impl Default for InternalState {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            connection_id: None,
            last_connected: None,
            last_message: None,
        }
    }
}

impl InternalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// A successful connect clears the failure run.
    pub fn mark_connected(&mut self, connection_id: Uuid) {
        self.state = ConnectionState::Connected;
        self.reconnect_attempts = 0;
        self.connection_id = Some(connection_id);
        self.last_connected = Some(Instant::now());
    }

    pub fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.connection_id = None;
    }

    pub fn record_message(&mut self) {
        self.last_message = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "Disconnected");
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
    }

    #[test]
    fn test_internal_state_transitions() {
        let mut state = InternalState::new();
        assert!(state.state.is_disconnected());

        state.mark_connecting();
        assert_eq!(state.state, ConnectionState::Connecting);
        assert!(!state.state.is_disconnected());

        state.reconnect_attempts = 3;
        let id = Uuid::new_v4();
        state.mark_connected(id);
        assert!(state.state.is_connected());
        assert_eq!(state.reconnect_attempts, 0);
        assert_eq!(state.connection_id, Some(id));
        assert!(state.last_connected.is_some());

        state.mark_disconnected();
        assert!(state.state.is_disconnected());
        assert!(state.connection_id.is_none());
    }
}
