//! Session registry: which viewers are streaming from this host, and where.
//!
//! The registry is the host's in-memory table of registered viewers.  Each
//! entry tracks:
//!
//! - The viewer's stable `client_id` and the `session_id` issued for the
//!   current registration.
//! - The datagram endpoint frame chunks are sent to.
//! - A handle to the viewer's control connection.
//! - The stream lifecycle state and the last frame sent.
//!
//! # Session lifecycle (for beginners)
//!
//! ```text
//! Idle  ──►  Streaming  ──►  Draining  ──►  Closed
//!   │                            ▲
//!   └────────────────────────────┘
//! ```
//!
//! - `Idle`: registered, nothing sent yet.
//! - `Streaming`: frames are flowing.
//! - `Draining`: stop requested or the connection was lost; the frame being
//!   sent is finished but no new frame starts.
//! - `Closed`: terminal; the entry is removed.
//!
//! Registering again with the same `client_id` replaces the old entry in one
//! step, so a reconnecting viewer never shows up twice.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use srvnc_core::protocol::messages::RejectReason;
use srvnc_core::{ClientId, FrameId, SessionId};
use tracing::{debug, info};
use uuid::Uuid;

/// Stream lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    Draining,
    Closed,
}

impl SessionState {
    /// Returns `true` if moving from `self` to `next` is a legal step.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Streaming) | (Idle, Draining) | (Streaming, Draining) | (Draining, Closed)
        )
    }
}

/// One registered viewer.
///
/// `C` is the control connection handle; the host uses
/// `Arc<ControlSender>`, tests use anything cloneable.
#[derive(Debug, Clone)]
pub struct Session<C> {
    pub session_id: SessionId,
    pub client_id: ClientId,
    pub endpoint: SocketAddr,
    pub control: C,
    pub state: SessionState,
    pub last_activity: Instant,
    pub last_sent_frame: Option<FrameId>,
}

/// Outcome of a successful [`SessionRegistry::register`].
#[derive(Debug)]
pub struct Registration<C> {
    pub session: Session<C>,
    /// Sessions this registration displaced: the same client's previous
    /// session, or another client that held the same endpoint.
    pub replaced: Vec<Session<C>>,
}

/// In-memory registry of active sessions.
///
/// Stored behind a `tokio::sync::RwLock` so the control server and every
/// stream coordinator can share it.
pub struct SessionRegistry<C> {
    sessions: HashMap<ClientId, Session<C>>,
    by_session: HashMap<SessionId, ClientId>,
    by_endpoint: HashMap<SocketAddr, ClientId>,
    max_sessions: usize,
}

impl<C: Clone> SessionRegistry<C> {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            by_session: HashMap::new(),
            by_endpoint: HashMap::new(),
            max_sessions,
        }
    }

    /// Registers a viewer, replacing any previous session of the same client.
    ///
    /// A fresh `session_id` is issued every time.  Re-registration never
    /// changes the number of sessions.
    ///
    /// # Errors
    ///
    /// Returns [`RejectReason::Capacity`] if this is a new client and the
    /// registry is full.
    pub fn register(
        &mut self,
        client_id: ClientId,
        endpoint: SocketAddr,
        control: C,
    ) -> Result<Registration<C>, RejectReason> {
        let mut replaced = Vec::new();

        if let Some(previous) = self.remove_client(client_id) {
            replaced.push(previous);
        }
        if let Some(&holder) = self.by_endpoint.get(&endpoint) {
            if let Some(displaced) = self.remove_client(holder) {
                info!(
                    "endpoint {endpoint} moved from client {} to {client_id}",
                    displaced.client_id
                );
                replaced.push(displaced);
            }
        }

        if replaced.is_empty() && self.sessions.len() >= self.max_sessions {
            return Err(RejectReason::Capacity);
        }

        let session = Session {
            session_id: Uuid::new_v4(),
            client_id,
            endpoint,
            control,
            state: SessionState::Idle,
            last_activity: Instant::now(),
            last_sent_frame: None,
        };
        self.by_session.insert(session.session_id, client_id);
        self.by_endpoint.insert(endpoint, client_id);
        self.sessions.insert(client_id, session.clone());

        debug!(
            session_id = %session.session_id,
            %client_id,
            %endpoint,
            replaced = replaced.len(),
            "session registered"
        );
        Ok(Registration { session, replaced })
    }

    /// Finds the session streaming to `endpoint`.
    pub fn resolve(&self, endpoint: SocketAddr) -> Option<Session<C>> {
        let client_id = self.by_endpoint.get(&endpoint)?;
        self.sessions.get(client_id).cloned()
    }

    pub fn get(&self, session_id: SessionId) -> Option<Session<C>> {
        let client_id = self.by_session.get(&session_id)?;
        self.sessions.get(client_id).cloned()
    }

    /// Marks the session as active now.  Returns `false` if it is unknown.
    pub fn touch(&mut self, session_id: SessionId) -> bool {
        self.with_session(session_id, |s| s.last_activity = Instant::now())
    }

    /// Records the last frame handed to the transport.
    pub fn record_sent(&mut self, session_id: SessionId, frame_id: FrameId) -> bool {
        self.with_session(session_id, |s| s.last_sent_frame = Some(frame_id))
    }

    /// Applies a lifecycle transition.
    ///
    /// Returns `false` for unknown sessions and illegal transitions.
    pub fn set_state(&mut self, session_id: SessionId, next: SessionState) -> bool {
        let mut applied = false;
        self.with_session(session_id, |s| {
            if s.state.can_transition_to(next) {
                s.state = next;
                applied = true;
            }
        });
        applied
    }

    /// Removes sessions idle for at least `timeout` and returns their ids.
    pub fn sweep(&mut self, timeout: Duration) -> Vec<Session<C>> {
        self.sweep_at(Instant::now(), timeout)
    }

    pub fn sweep_at(&mut self, now: Instant, timeout: Duration) -> Vec<Session<C>> {
        let expired: Vec<ClientId> = self
            .sessions
            .values()
            .filter(|s| now.saturating_duration_since(s.last_activity) >= timeout)
            .map(|s| s.client_id)
            .collect();
        let removed: Vec<Session<C>> = expired
            .into_iter()
            .filter_map(|client_id| self.remove_client(client_id))
            .collect();
        for session in &removed {
            info!(
                session_id = %session.session_id,
                "session expired after {:?} of inactivity",
                timeout
            );
        }
        removed
    }

    /// Removes a session.  A stale `session_id` (already replaced) is a no-op.
    pub fn remove(&mut self, session_id: SessionId) -> Option<Session<C>> {
        let client_id = *self.by_session.get(&session_id)?;
        self.remove_client(client_id)
    }

    pub fn all(&self) -> Vec<Session<C>> {
        self.sessions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_sessions
    }

    fn with_session(&mut self, session_id: SessionId, f: impl FnOnce(&mut Session<C>)) -> bool {
        let Some(client_id) = self.by_session.get(&session_id) else {
            return false;
        };
        match self.sessions.get_mut(client_id) {
            Some(session) => {
                f(session);
                true
            }
            None => false,
        }
    }

    fn remove_client(&mut self, client_id: ClientId) -> Option<Session<C>> {
        let session = self.sessions.remove(&client_id)?;
        self.by_session.remove(&session.session_id);
        if self.by_endpoint.get(&session.endpoint) == Some(&client_id) {
            self.by_endpoint.remove(&session.endpoint);
        }
        Some(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 20], port))
    }

    #[test]
    fn test_registry_starts_empty() {
        let registry: SessionRegistry<()> = SessionRegistry::new(4);
        assert!(registry.is_empty());
        assert!(registry.all().is_empty());
    }

    #[test]
    fn test_register_then_resolve_by_endpoint() {
        // Arrange
        let mut registry = SessionRegistry::new(4);
        let client = Uuid::new_v4();

        // Act
        let reg = registry.register(client, addr(10_000), "conn-a").expect("registered");

        // Assert
        let found = registry.resolve(addr(10_000)).expect("resolvable");
        assert_eq!(found.session_id, reg.session.session_id);
        assert_eq!(found.control, "conn-a");
        assert_eq!(found.state, SessionState::Idle);
        assert!(reg.replaced.is_empty());
    }

    #[test]
    fn test_reregistration_replaces_endpoint_and_keeps_size() {
        // Arrange
        let mut registry = SessionRegistry::new(4);
        let client = Uuid::new_v4();
        let first = registry.register(client, addr(10_000), "old").expect("first");

        // Act
        let second = registry.register(client, addr(10_001), "new").expect("second");

        // Assert
        assert_eq!(registry.len(), 1, "re-registration must not grow the registry");
        assert_ne!(first.session.session_id, second.session.session_id);
        assert_eq!(second.replaced.len(), 1);
        assert_eq!(second.replaced[0].control, "old");
        assert!(registry.resolve(addr(10_000)).is_none());
        assert_eq!(registry.resolve(addr(10_001)).expect("new").control, "new");
        assert!(registry.get(first.session.session_id).is_none());
    }

    #[test]
    fn test_full_registry_rejects_new_client_but_allows_reregistration() {
        let mut registry = SessionRegistry::new(1);
        let client = Uuid::new_v4();
        registry.register(client, addr(1), ()).expect("first");

        let other = registry.register(Uuid::new_v4(), addr(2), ());
        let again = registry.register(client, addr(3), ());

        assert_eq!(other.unwrap_err(), RejectReason::Capacity);
        assert!(again.is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_endpoint_taken_over_by_another_client_displaces_holder() {
        let mut registry = SessionRegistry::new(4);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        registry.register(a, addr(5), ()).expect("a");

        let reg = registry.register(b, addr(5), ()).expect("b");

        assert_eq!(reg.replaced.len(), 1);
        assert_eq!(reg.replaced[0].client_id, a);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve(addr(5)).expect("b").client_id, b);
    }

    #[test]
    fn test_state_transitions_follow_lifecycle() {
        let mut registry = SessionRegistry::new(4);
        let id = registry.register(Uuid::new_v4(), addr(1), ()).expect("reg").session.session_id;

        assert!(!registry.set_state(id, SessionState::Closed), "Idle → Closed is illegal");
        assert!(registry.set_state(id, SessionState::Streaming));
        assert!(!registry.set_state(id, SessionState::Idle), "no way back to Idle");
        assert!(registry.set_state(id, SessionState::Draining));
        assert!(registry.set_state(id, SessionState::Closed));
    }

    #[test]
    fn test_record_sent_and_touch_update_known_sessions_only() {
        let mut registry = SessionRegistry::new(4);
        let id = registry.register(Uuid::new_v4(), addr(1), ()).expect("reg").session.session_id;

        assert!(registry.record_sent(id, 42));
        assert!(registry.touch(id));
        assert!(!registry.touch(Uuid::new_v4()));
        assert_eq!(registry.get(id).expect("known").last_sent_frame, Some(42));
    }

    #[test]
    fn test_sweep_removes_only_inactive_sessions() {
        // Arrange
        let mut registry = SessionRegistry::new(4);
        let stale = registry.register(Uuid::new_v4(), addr(1), ()).expect("a").session;
        let fresh = registry.register(Uuid::new_v4(), addr(2), ()).expect("b").session;
        let later = Instant::now() + Duration::from_secs(30);
        // Simulate activity on `fresh` right before the sweep.
        registry
            .sessions
            .get_mut(&fresh.client_id)
            .expect("fresh")
            .last_activity = later;

        // Act
        let removed = registry.sweep_at(later + Duration::from_secs(1), Duration::from_secs(10));

        // Assert
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].session_id, stale.session_id);
        assert!(registry.get(fresh.session_id).is_some());
    }

    #[test]
    fn test_remove_with_stale_session_id_is_noop() {
        let mut registry = SessionRegistry::new(4);
        let client = Uuid::new_v4();
        let old = registry.register(client, addr(1), ()).expect("old").session;
        registry.register(client, addr(1), ()).expect("new");

        assert!(registry.remove(old.session_id).is_none());
        assert_eq!(registry.len(), 1);
    }
}
