//! Digital Voice Simulation Library
//!
//! This crate provides virtual hotspots for testing reflectors without radios
//! or gateways. It includes:
//!
//! - **VirtualHotspot**: builds link, keepalive, voice, end-of-transmission
//!   and unlink datagrams for P25, YSF, NXDN and M17
//! - **HotspotClient**: drives a hotspot against a reflector over UDP
//!
//! # Example
//!
//! ```rust
//! use dv_sim::VirtualHotspot;
//! use dv_protocol::Protocol;
//!
//! let mut hotspot = VirtualHotspot::new("KO4UYJ", Protocol::M17).with_module('C');
//!
//! let connect = hotspot.link_frame();
//! assert_eq!(&connect[..4], b"CONN");
//!
//! let voice = hotspot.voice_frame();
//! let last = hotspot.end_frame();
//! assert_eq!(voice.len(), last.len());
//! ```

pub mod client;
pub mod hotspot;

pub use client::{HotspotClient, SimError};
pub use hotspot::{VirtualHotspot, VirtualHotspotConfig};
