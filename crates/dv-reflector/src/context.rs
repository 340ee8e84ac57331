//! Handles to every running reflector, built once at startup

use std::collections::BTreeMap;
use std::net::SocketAddr;

use dv_protocol::Protocol;
use tracing::warn;

use crate::error::ReflectorError;
use crate::server::ReflectorHandle;
use crate::state::ReflectorSnapshot;

/// Read-side view of the running engines, shared with the REST layer
#[derive(Debug, Clone, Default)]
pub struct ReflectorContext {
    reflectors: BTreeMap<Protocol, ReflectorHandle>,
}

impl ReflectorContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running reflector, replacing any previous one for the protocol
    pub fn insert(&mut self, handle: ReflectorHandle) {
        self.reflectors.insert(handle.protocol(), handle);
    }

    pub fn get(&self, protocol: Protocol) -> Option<&ReflectorHandle> {
        self.reflectors.get(&protocol)
    }

    /// Protocols with a running reflector, in a stable order
    pub fn protocols(&self) -> Vec<Protocol> {
        self.reflectors.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.reflectors.is_empty()
    }

    /// Snapshot of every reflector that answers
    pub async fn snapshots(&self) -> Vec<ReflectorSnapshot> {
        let mut snapshots = Vec::with_capacity(self.reflectors.len());
        for handle in self.reflectors.values() {
            match handle.snapshot().await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!("Skipping {} in status: {}", handle.protocol(), e),
            }
        }
        snapshots
    }

    /// Snapshot of one reflector
    pub async fn snapshot(&self, protocol: Protocol) -> Result<ReflectorSnapshot, ReflectorError> {
        self.get(protocol)
            .ok_or(ReflectorError::ActorClosed(protocol))?
            .snapshot()
            .await
    }

    /// Force-unlink a session on one reflector
    pub async fn force_unlink(
        &self,
        protocol: Protocol,
        address: SocketAddr,
    ) -> Result<(), ReflectorError> {
        self.get(protocol)
            .ok_or(ReflectorError::ActorClosed(protocol))?
            .force_unlink(address)
            .await
    }
}
