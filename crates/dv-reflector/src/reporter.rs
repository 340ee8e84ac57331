//! Event reporter
//!
//! Engines push events into a bounded channel with `try_send` and never wait
//! on it; when the channel is full the event is dropped. A reporter task
//! drains the channel and forwards each event as one JSON datagram.

use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::events::ReflectorEvent;

/// Default capacity of the reporter channel
pub const REPORTER_CAPACITY: usize = 1024;

/// Sending side of the reporter channel, shared by all engines
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<ReflectorEvent>>,
}

impl EventSink {
    /// Create a sink and the receiver that drains it
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ReflectorEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue an event without waiting
    pub fn emit(&self, event: ReflectorEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                trace!("Reporter channel full, dropping {:?}", event);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

/// Forward events to `target` as JSON datagrams, or discard them when `target` is `None`
pub async fn run_reporter(mut rx: mpsc::Receiver<ReflectorEvent>, target: Option<SocketAddr>) {
    let socket = match target {
        Some(target) => {
            let bind: SocketAddr = if target.is_ipv4() {
                ([0, 0, 0, 0], 0).into()
            } else {
                (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
            };
            match UdpSocket::bind(bind).await {
                Ok(socket) => {
                    info!("Reporter sending events to {}", target);
                    Some((socket, target))
                }
                Err(e) => {
                    warn!("Reporter socket bind failed, events will be discarded: {}", e);
                    None
                }
            }
        }
        None => None,
    };

    while let Some(event) = rx.recv().await {
        let Some((socket, target)) = &socket else {
            trace!("Event: {:?}", event);
            continue;
        };
        match serde_json::to_vec(&event) {
            Ok(payload) => {
                if let Err(e) = socket.send_to(&payload, *target).await {
                    warn!("Failed to send event to {}: {}", target, e);
                }
            }
            Err(e) => warn!("Failed to serialize event: {}", e),
        }
    }
    debug!("Reporter stopped");
}

/// Start the reporter task
pub fn spawn_reporter(
    target: Option<SocketAddr>,
    capacity: usize,
) -> (EventSink, JoinHandle<()>) {
    let (sink, rx) = EventSink::channel(capacity);
    let task = tokio::spawn(run_reporter(rx, target));
    (sink, task)
}
