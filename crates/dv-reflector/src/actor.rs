//! Reflector actor
//!
//! One actor task owns a [`Reflector`] and serializes everything that touches
//! it: inbound datagrams, the sweep/keepalive/stats timers and commands from
//! the rest of the process. Outbound datagrams go out with `try_send_to`, so a
//! slow or unreachable client never stalls the loop.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dv_reflector::actor::{run_reflector_actor, ActorTimers, ReflectorCommand};
//! use tokio::sync::{mpsc, Mutex};
//!
//! let (cmd_tx, cmd_rx) = mpsc::channel(32);
//! let commands = Arc::new(Mutex::new(cmd_rx));
//!
//! tokio::spawn(run_reflector_actor(reflector, socket, commands, sink, ActorTimers::default()));
//! cmd_tx.send(ReflectorCommand::Shutdown).await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::{Outbound, Reflector};
use crate::error::ReflectorError;
use crate::reporter::EventSink;
use crate::state::ReflectorSnapshot;

/// Largest datagram any of the protocols sends, with headroom
const RECV_BUFFER_LEN: usize = 2048;

/// Commands sent to the reflector actor
#[derive(Debug)]
pub enum ReflectorCommand {
    /// Report the current state
    Snapshot {
        response: oneshot::Sender<ReflectorSnapshot>,
    },

    /// Remove a session as if it had unlinked, notifying the client where the
    /// protocol allows
    ForceUnlink {
        address: SocketAddr,
        response: oneshot::Sender<Result<(), ReflectorError>>,
    },

    /// Disconnect every client and stop
    Shutdown,
}

/// Periodic work intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorTimers {
    pub sweep_interval: Duration,
    /// Only used by protocols whose reflector pings its clients
    pub keepalive_interval: Duration,
    pub stats_interval: Duration,
}

impl Default for ActorTimers {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(1),
            keepalive_interval: Duration::from_secs(3),
            stats_interval: Duration::from_secs(60),
        }
    }
}

/// Why the actor returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorExit {
    /// A shutdown command was processed
    Shutdown,
    /// Every command sender was dropped
    CommandsClosed,
}

fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Send datagrams without waiting on the socket
///
/// A failed send affects only that recipient.
fn dispatch(reflector: &mut Reflector, socket: &UdpSocket, outbound: Vec<Outbound>) {
    let mut sent = 0;
    let mut failed = 0;
    for datagram in outbound {
        for target in datagram.targets {
            match socket.try_send_to(&datagram.payload, target) {
                Ok(_) => sent += 1,
                Err(e) => {
                    failed += 1;
                    warn!(protocol = %reflector.protocol(), addr = %target, "Send failed: {}", e);
                }
            }
        }
    }
    reflector.record_sends(sent, failed);
}

fn flush_events(reflector: &mut Reflector, sink: &EventSink) {
    for event in reflector.drain_events() {
        sink.emit(event);
    }
}

/// Run a reflector until shutdown
///
/// `commands` is shared with the supervisor so a restarted actor keeps
/// serving the same handle. Returns `Err` when the engine reports an
/// internal inconsistency; the caller decides whether to restart.
pub async fn run_reflector_actor(
    mut reflector: Reflector,
    socket: Arc<UdpSocket>,
    commands: Arc<Mutex<mpsc::Receiver<ReflectorCommand>>>,
    sink: EventSink,
    timers: ActorTimers,
) -> Result<ActorExit, ReflectorError> {
    let protocol = reflector.protocol();
    let mut commands = commands.lock().await;
    let mut buf = vec![0u8; RECV_BUFFER_LEN];

    let mut sweep_timer = ticker(timers.sweep_interval);
    let mut keepalive_timer = ticker(timers.keepalive_interval);
    let mut stats_timer = ticker(timers.stats_interval);

    info!(protocol = %protocol, "Reflector actor started");

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, from) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        debug!(protocol = %protocol, "Receive error: {}", e);
                        continue;
                    }
                };
                let now = Instant::now().into_std();
                let outbound = reflector.handle_datagram(from, &buf[..len], now);
                dispatch(&mut reflector, &socket, outbound);
                flush_events(&mut reflector, &sink);
                reflector.check_invariants()?;
            }

            cmd = commands.recv() => {
                let Some(cmd) = cmd else {
                    info!(protocol = %protocol, "Command channel closed, stopping");
                    return Ok(ActorExit::CommandsClosed);
                };
                match cmd {
                    ReflectorCommand::Snapshot { response } => {
                        let mut snapshot = reflector.snapshot(Instant::now().into_std());
                        snapshot.local_addr = socket.local_addr().ok();
                        let _ = response.send(snapshot);
                    }

                    ReflectorCommand::ForceUnlink { address, response } => {
                        let result = reflector
                            .force_unlink(address)
                            .map(|outbound| dispatch(&mut reflector, &socket, outbound));
                        flush_events(&mut reflector, &sink);
                        let _ = response.send(result);
                    }

                    ReflectorCommand::Shutdown => {
                        let outbound = reflector.disconnect_all();
                        dispatch(&mut reflector, &socket, outbound);
                        flush_events(&mut reflector, &sink);
                        info!(protocol = %protocol, "Reflector actor stopped");
                        return Ok(ActorExit::Shutdown);
                    }
                }
            }

            _ = sweep_timer.tick() => {
                let removed = reflector.sweep(Instant::now().into_std());
                if removed > 0 {
                    debug!(protocol = %protocol, "Sweep removed {} sessions", removed);
                }
                flush_events(&mut reflector, &sink);
                reflector.check_invariants()?;
            }

            _ = keepalive_timer.tick() => {
                if let Some(ping) = reflector.keepalive() {
                    dispatch(&mut reflector, &socket, vec![ping]);
                }
            }

            _ = stats_timer.tick() => {
                reflector.emit_stats();
                flush_events(&mut reflector, &sink);
            }
        }
    }
}
