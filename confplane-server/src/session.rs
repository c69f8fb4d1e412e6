//! Session management.
//!
//! A session walks a fixed state machine:
//!
//! ```text
//! Connecting -> CapabilityExchange -> Authenticating -> Established
//!                      |                    |               |
//!                      +--------------------+---------------+--> Closing -> Closed
//! ```
//!
//! Capability negotiation and authentication are pure decisions; the
//! connection handler applies their outcomes to the session.

use crate::error::ServerError;
use confplane_broker::ReadWriteTransaction;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// TCP accepted, nothing received yet.
    Connecting,
    /// Waiting for the client HELLO.
    CapabilityExchange,
    /// Capabilities agreed, waiting for AUTH.
    Authenticating,
    /// Fully negotiated, commands accepted.
    Established,
    /// Teardown started, no further commands.
    Closing,
    /// Fully torn down.
    Closed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Connecting => "CONNECTING",
            SessionState::CapabilityExchange => "CAPABILITY_EXCHANGE",
            SessionState::Authenticating => "AUTHENTICATING",
            SessionState::Established => "ESTABLISHED",
            SessionState::Closing => "CLOSING",
            SessionState::Closed => "CLOSED",
        }
    }
}

/// Issues session ids, unique and monotonically increasing for the
/// server's lifetime. Ids are never reused while the server runs.
#[derive(Debug)]
pub struct SessionIdAllocator {
    next: AtomicU64,
}

impl Default for SessionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

/// Decides the capability set a session runs with.
///
/// The agreed set is the intersection of what the server advertises and
/// what the client offered. An empty intersection is a negotiation
/// failure; the session must close before reaching Established.
pub fn negotiate_capabilities(
    advertised: &BTreeSet<String>,
    offered: &[String],
) -> Result<BTreeSet<String>, ServerError> {
    let offered: BTreeSet<&str> = offered.iter().map(String::as_str).collect();
    let agreed: BTreeSet<String> = advertised
        .iter()
        .filter(|c| offered.contains(c.as_str()))
        .cloned()
        .collect();
    if agreed.is_empty() {
        return Err(ServerError::CapabilityMismatch(
            "no capabilities in common".to_string(),
        ));
    }
    Ok(agreed)
}

/// A client session.
pub struct Session {
    /// Unique session id.
    pub id: u64,

    /// Remote address.
    pub remote_addr: SocketAddr,

    state: SessionState,

    /// Negotiated protocol version.
    protocol_version: u16,

    /// Client name from HELLO.
    client_name: Option<String>,

    /// Agreed capability set.
    capabilities: BTreeSet<String>,

    /// Staged configuration changes awaiting COMMIT or CANCEL.
    pending: Option<ReadWriteTransaction>,

    request_count: u64,

    created_at: Instant,
    last_activity: Instant,
}

impl Session {
    /// Creates a new session in the Connecting state.
    pub fn new(id: u64, remote_addr: SocketAddr) -> Self {
        Self {
            id,
            remote_addr,
            state: SessionState::Connecting,
            protocol_version: 0,
            client_name: None,
            capabilities: BTreeSet::new(),
            pending: None,
            request_count: 0,
            created_at: Instant::now(),
            last_activity: Instant::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Moves the session to a new state. Transitions only move forward;
    /// an attempt to go backwards is a handler bug and is rejected.
    pub fn transition(&mut self, next: SessionState) -> Result<(), ServerError> {
        use SessionState::*;
        let legal = matches!(
            (self.state, next),
            (Connecting, CapabilityExchange)
                | (CapabilityExchange, Authenticating)
                | (Authenticating, Established)
                | (Connecting, Closing)
                | (CapabilityExchange, Closing)
                | (Authenticating, Closing)
                | (Established, Closing)
                | (Closing, Closed)
        );
        if !legal {
            return Err(ServerError::InvalidState {
                state: self.state.name(),
                operation: next.name(),
            });
        }
        tracing::debug!("session {}: {} -> {}", self.id, self.state.name(), next.name());
        self.state = next;
        Ok(())
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    /// Records the outcome of capability negotiation.
    pub fn complete_negotiation(
        &mut self,
        protocol_version: u16,
        client_name: Option<String>,
        capabilities: BTreeSet<String>,
    ) -> Result<(), ServerError> {
        self.transition(SessionState::Authenticating)?;
        self.protocol_version = protocol_version;
        self.client_name = client_name;
        self.capabilities = capabilities;
        Ok(())
    }

    /// Records a request.
    pub fn record_request(&mut self) {
        self.request_count += 1;
        self.last_activity = Instant::now();
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// Returns the time since last activity.
    pub fn idle_duration(&self) -> std::time::Duration {
        self.last_activity.elapsed()
    }

    /// Returns the session age.
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    /// Returns whether the session holds staged changes.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns the staged transaction, if any, for further edits.
    pub fn pending_mut(&mut self) -> Option<&mut ReadWriteTransaction> {
        self.pending.as_mut()
    }

    /// Stages a transaction for later COMMIT or CANCEL.
    pub fn set_pending(&mut self, txn: ReadWriteTransaction) {
        self.pending = Some(txn);
    }

    /// Returns the staged transaction, creating one with `stage` first
    /// if nothing is staged yet.
    pub fn pending_or_stage(
        &mut self,
        stage: impl FnOnce() -> ReadWriteTransaction,
    ) -> &mut ReadWriteTransaction {
        self.pending.get_or_insert_with(stage)
    }

    /// Takes the staged transaction out of the session.
    pub fn take_pending(&mut self) -> Option<ReadWriteTransaction> {
        self.pending.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn test_addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 12345)
    }

    fn caps(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_id_allocator_monotonic() {
        let ids = SessionIdAllocator::new();
        let a = ids.allocate();
        let b = ids.allocate();
        let c = ids.allocate();
        assert!(a < b && b < c);
        assert_eq!(a, 1);
    }

    #[test]
    fn test_full_lifecycle() {
        let mut session = Session::new(1, test_addr());
        assert_eq!(session.state(), SessionState::Connecting);

        session.transition(SessionState::CapabilityExchange).unwrap();
        session
            .complete_negotiation(
                1,
                Some("cli".to_string()),
                caps(&["urn:confplane:base:1.0"]),
            )
            .unwrap();
        assert_eq!(session.state(), SessionState::Authenticating);

        session.transition(SessionState::Established).unwrap();
        assert!(session.is_established());

        session.transition(SessionState::Closing).unwrap();
        session.transition(SessionState::Closed).unwrap();
    }

    #[test]
    fn test_backwards_transition_rejected() {
        let mut session = Session::new(1, test_addr());
        session.transition(SessionState::CapabilityExchange).unwrap();
        session
            .complete_negotiation(1, None, caps(&["urn:confplane:base:1.0"]))
            .unwrap();
        session.transition(SessionState::Established).unwrap();

        let err = session.transition(SessionState::CapabilityExchange);
        assert!(matches!(err, Err(ServerError::InvalidState { .. })));
    }

    #[test]
    fn test_close_allowed_from_any_live_state() {
        for reach in 0..4 {
            let mut session = Session::new(1, test_addr());
            let path = [
                SessionState::CapabilityExchange,
                SessionState::Authenticating,
                SessionState::Established,
            ];
            for state in path.iter().take(reach) {
                if *state == SessionState::Authenticating {
                    session
                        .complete_negotiation(1, None, caps(&["urn:confplane:base:1.0"]))
                        .unwrap();
                } else {
                    session.transition(*state).unwrap();
                }
            }
            session.transition(SessionState::Closing).unwrap();
            session.transition(SessionState::Closed).unwrap();
        }
    }

    #[test]
    fn test_negotiation_intersection() {
        let advertised = caps(&["urn:confplane:base:1.0", "urn:confplane:monitoring:1.0"]);
        let offered = vec![
            "urn:confplane:base:1.0".to_string(),
            "urn:other:thing:1.0".to_string(),
        ];
        let agreed = negotiate_capabilities(&advertised, &offered).unwrap();
        assert_eq!(agreed, caps(&["urn:confplane:base:1.0"]));
    }

    #[test]
    fn test_negotiation_empty_intersection_fails() {
        let advertised = caps(&["urn:confplane:base:1.0"]);
        let offered = vec!["urn:other:thing:1.0".to_string()];
        let err = negotiate_capabilities(&advertised, &offered).unwrap_err();
        assert!(matches!(err, ServerError::CapabilityMismatch(_)));

        let err = negotiate_capabilities(&advertised, &[]).unwrap_err();
        assert!(matches!(err, ServerError::CapabilityMismatch(_)));
    }
}
