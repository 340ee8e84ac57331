//! Digital Voice Reflector Engine
//!
//! This crate provides the protocol-independent core of a P25, YSF, NXDN and
//! M17 reflector: it keeps track of linked clients, decides which client
//! currently holds the floor, and relays that client's voice frames to every
//! other linked client.
//!
//! # Architecture
//!
//! - [`Reflector`] is a synchronous state machine. It is handed datagrams and
//!   timer ticks along with the current time and returns the datagrams to send.
//! - [`actor::run_reflector_actor`] owns one `Reflector` and its UDP socket and
//!   serializes datagrams, timers and commands through a single `select!` loop.
//! - [`ReflectorServer`] binds the socket, supervises the actor and hands out
//!   [`ReflectorHandle`]s for snapshots, force-unlink and shutdown.
//! - [`ReflectorContext`] collects the handles of all running reflectors.
//!
//! Engines report what happens through [`ReflectorEvent`]s pushed into an
//! [`EventSink`] they never wait on.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dv_protocol::Protocol;
//! use dv_reflector::{AllowAll, EventSink, ReflectorServer, ReflectorSettings};
//!
//! # async fn example() -> Result<(), dv_reflector::ReflectorError> {
//! let settings = ReflectorSettings::new(Protocol::Ysf, "0.0.0.0:42000".parse().unwrap());
//! let mut server = ReflectorServer::bind(settings, Arc::new(AllowAll), EventSink::disabled()).await?;
//! let handle = server.run();
//!
//! let snapshot = handle.snapshot().await?;
//! println!("{} clients linked", snapshot.linked_count());
//!
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod acl;
pub mod actor;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod reporter;
pub mod server;
pub mod session;
pub mod state;
pub mod talker;

// Re-export actor types
pub use actor::{run_reflector_actor, ActorExit, ActorTimers, ReflectorCommand};

pub use acl::{AccessControl, AclFile, AclMode, AllowAll, CallsignAcl};
pub use context::ReflectorContext;
pub use engine::{Outbound, Reflector, ReflectorConfig};
pub use error::{AclError, ReflectorError};
pub use events::{ReflectorEvent, TransmissionEnd, UnlinkReason};
pub use reporter::{spawn_reporter, EventSink, REPORTER_CAPACITY};
pub use server::{ReflectorHandle, ReflectorServer, ReflectorSettings};
pub use session::SessionTable;
pub use state::{
    ReflectorSnapshot, ReflectorStats, Session, SessionSnapshot, SessionState, TalkerSnapshot,
};
pub use talker::{Acquisition, TalkerLock, Transmission};
