//! Reflector server, handle and supervisor
//!
//! [`ReflectorServer::bind`] opens the UDP socket up front so every
//! configuration error surfaces before any engine starts. [`ReflectorServer::run`]
//! then starts a supervisor task which spawns the actor and restarts it with
//! fresh state, on the same socket, if it panics or reports an internal
//! inconsistency. The rest of the process talks to the actor through a
//! cloneable [`ReflectorHandle`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dv_protocol::{create_frame_codec, CodecOptions, Protocol};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::acl::AccessControl;
use crate::actor::{run_reflector_actor, ActorExit, ActorTimers, ReflectorCommand};
use crate::engine::{Reflector, ReflectorConfig};
use crate::error::ReflectorError;
use crate::reporter::EventSink;
use crate::state::ReflectorSnapshot;

const COMMAND_CAPACITY: usize = 32;

/// Everything needed to start one reflector
#[derive(Debug, Clone)]
pub struct ReflectorSettings {
    pub protocol: Protocol,
    pub bind: SocketAddr,
    pub codec: CodecOptions,
    pub engine: ReflectorConfig,
    pub timers: ActorTimers,
    /// Pause before restarting a failed actor
    pub restart_delay: Duration,
}

impl ReflectorSettings {
    /// Defaults for `protocol`, listening on `bind`
    pub fn new(protocol: Protocol, bind: SocketAddr) -> Self {
        Self {
            protocol,
            bind,
            codec: CodecOptions::default(),
            engine: ReflectorConfig::default(),
            timers: ActorTimers::default(),
            restart_delay: Duration::from_secs(1),
        }
    }
}

/// Cloneable access to a running reflector
#[derive(Debug, Clone)]
pub struct ReflectorHandle {
    protocol: Protocol,
    commands: mpsc::Sender<ReflectorCommand>,
}

impl ReflectorHandle {
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn request<T>(
        &self,
        command: ReflectorCommand,
        response: oneshot::Receiver<T>,
    ) -> Result<T, ReflectorError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ReflectorError::ActorClosed(self.protocol))?;
        response
            .await
            .map_err(|_| ReflectorError::ActorClosed(self.protocol))
    }

    /// Current sessions, talker and counters
    pub async fn snapshot(&self) -> Result<ReflectorSnapshot, ReflectorError> {
        let (response, rx) = oneshot::channel();
        self.request(ReflectorCommand::Snapshot { response }, rx).await
    }

    /// Remove the session at `address`
    pub async fn force_unlink(&self, address: SocketAddr) -> Result<(), ReflectorError> {
        let (response, rx) = oneshot::channel();
        self.request(ReflectorCommand::ForceUnlink { address, response }, rx)
            .await?
    }

    /// Ask the actor to disconnect everyone and stop
    pub async fn shutdown(&self) -> Result<(), ReflectorError> {
        self.commands
            .send(ReflectorCommand::Shutdown)
            .await
            .map_err(|_| ReflectorError::ActorClosed(self.protocol))
    }
}

/// A bound, possibly running, reflector
pub struct ReflectorServer {
    settings: ReflectorSettings,
    /// Released by `stop` so the port is free again
    socket: Option<Arc<UdpSocket>>,
    acl: Arc<dyn AccessControl>,
    sink: EventSink,
    commands: Arc<Mutex<mpsc::Receiver<ReflectorCommand>>>,
    handle: ReflectorHandle,
    supervisor: Option<JoinHandle<()>>,
    stopped: bool,
}

impl ReflectorServer {
    /// Bind the UDP socket without starting the engine
    pub async fn bind(
        settings: ReflectorSettings,
        acl: Arc<dyn AccessControl>,
        sink: EventSink,
    ) -> Result<Self, ReflectorError> {
        let socket = UdpSocket::bind(settings.bind)
            .await
            .map_err(|source| ReflectorError::Bind {
                protocol: settings.protocol,
                addr: settings.bind,
                source,
            })?;
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        Ok(Self {
            handle: ReflectorHandle {
                protocol: settings.protocol,
                commands: tx,
            },
            settings,
            socket: Some(Arc::new(socket)),
            acl,
            sink,
            commands: Arc::new(Mutex::new(rx)),
            supervisor: None,
            stopped: false,
        })
    }

    pub fn protocol(&self) -> Protocol {
        self.settings.protocol
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ReflectorError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or(ReflectorError::ActorClosed(self.settings.protocol))?;
        Ok(socket.local_addr()?)
    }

    pub fn handle(&self) -> ReflectorHandle {
        self.handle.clone()
    }

    /// Start serving; calling it again returns the same handle
    pub fn run(&mut self) -> ReflectorHandle {
        let socket = match (&self.supervisor, &self.socket) {
            (None, Some(socket)) => Some(socket.clone()),
            _ => None,
        };
        if let Some(socket) = socket {
            let local = socket.local_addr().ok();
            info!(
                protocol = %self.settings.protocol,
                "Reflector listening on {}",
                local.map_or_else(|| self.settings.bind.to_string(), |a| a.to_string())
            );
            self.supervisor = Some(tokio::spawn(supervise(
                self.settings.clone(),
                socket,
                self.acl.clone(),
                self.sink.clone(),
                self.commands.clone(),
            )));
        }
        self.handle()
    }

    /// Stop serving and wait for the actor to finish; later calls do nothing
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Some(supervisor) = self.supervisor.take() {
            if let Err(e) = self.handle.shutdown().await {
                warn!("{}", e);
            }
            if let Err(e) = supervisor.await {
                warn!(protocol = %self.settings.protocol, "Supervisor ended abnormally: {}", e);
            }
        }

        // Fail any request that arrives from now on, and any still queued
        let mut commands = self.commands.lock().await;
        commands.close();
        while commands.try_recv().is_ok() {}

        // The actor has dropped its copy; this releases the port
        self.socket = None;
    }
}

/// Keep an actor running until it exits on request
async fn supervise(
    settings: ReflectorSettings,
    socket: Arc<UdpSocket>,
    acl: Arc<dyn AccessControl>,
    sink: EventSink,
    commands: Arc<Mutex<mpsc::Receiver<ReflectorCommand>>>,
) {
    let protocol = settings.protocol;
    loop {
        let reflector = Reflector::new(
            settings.engine,
            create_frame_codec(protocol, &settings.codec),
            acl.clone(),
        );
        let actor = tokio::spawn(run_reflector_actor(
            reflector,
            socket.clone(),
            commands.clone(),
            sink.clone(),
            settings.timers,
        ));

        match actor.await {
            Ok(Ok(ActorExit::Shutdown)) => break,
            Ok(Ok(ActorExit::CommandsClosed)) => break,
            Ok(Err(e)) => error!(protocol = %protocol, "Reflector failed, restarting: {}", e),
            Err(e) if e.is_panic() => error!(protocol = %protocol, "Reflector panicked, restarting"),
            Err(e) => {
                warn!(protocol = %protocol, "Reflector task cancelled: {}", e);
                break;
            }
        }
        tokio::time::sleep(settings.restart_delay).await;
    }
    info!(protocol = %protocol, "Reflector stopped");
}
