//! Session table
//!
//! Keyed by remote address. The table is owned by a single engine and only
//! mutated from its actor, so relay target lists are always computed from a
//! consistent view.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use crate::state::{Session, SessionState};

/// Sessions of one reflector, at most one per address
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<SocketAddr, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the session for `address`
    ///
    /// The session (new or replaced) starts in `Linking` with fresh
    /// timestamps.
    pub fn upsert(&mut self, address: SocketAddr, identity: String, now: Instant) -> &Session {
        let session = self
            .sessions
            .entry(address)
            .and_modify(|s| {
                s.identity.clone_from(&identity);
                s.state = SessionState::Linking;
                s.last_seen = now;
                s.linked_at = now;
            })
            .or_insert_with(|| Session::new(address, identity.clone(), now));
        &*session
    }

    pub fn get(&self, address: &SocketAddr) -> Option<&Session> {
        self.sessions.get(address)
    }

    pub fn get_mut(&mut self, address: &SocketAddr) -> Option<&mut Session> {
        self.sessions.get_mut(address)
    }

    pub fn contains(&self, address: &SocketAddr) -> bool {
        self.sessions.contains_key(address)
    }

    /// Remove a session; removing an unknown address is a no-op
    pub fn remove(&mut self, address: &SocketAddr) -> Option<Session> {
        self.sessions.remove(address)
    }

    /// Visit every session
    pub fn for_each<F: FnMut(&Session)>(&self, mut f: F) {
        for session in self.sessions.values() {
            f(session);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Addresses of linked sessions, excluding `except`
    pub fn relay_targets(&self, except: SocketAddr) -> Vec<SocketAddr> {
        self.sessions
            .values()
            .filter(|s| s.is_linked() && s.address != except)
            .map(|s| s.address)
            .collect()
    }

    /// Addresses of every session regardless of state
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.sessions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of sessions in the `Linked` state
    pub fn linked_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_linked()).count()
    }
}
