//! Talker arbitration
//!
//! At most one client holds the floor at a time. A transmission ends with an
//! end-of-transmission frame, which opens a hang window reserved for the
//! client that just finished, or when the holder falls silent for longer
//! than the voice frame timeout.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use dv_protocol::VoiceHeader;

use crate::error::ReflectorError;

/// The transmission currently holding the floor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub address: SocketAddr,
    pub started_at: Instant,
    pub last_frame_at: Instant,
    /// Originating station, once a frame has carried it
    pub source: Option<String>,
    /// Destination, once a frame has carried it
    pub destination: Option<String>,
}

impl Transmission {
    fn new(address: SocketAddr, now: Instant) -> Self {
        Self {
            address,
            started_at: now,
            last_frame_at: now,
            source: None,
            destination: None,
        }
    }

    /// Time from the first to the last frame
    pub fn duration(&self) -> Duration {
        self.last_frame_at.saturating_duration_since(self.started_at)
    }
}

/// Outcome of [`TalkerLock::try_acquire`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// A new transmission started; `expired` is the silent transmission it replaced
    Started { expired: Option<Transmission> },
    /// The caller already holds the floor
    Continued,
    /// Someone else holds the floor, or the hang window belongs to someone else
    Denied,
}

#[cfg(test)]
impl Acquisition {
    fn is_granted(&self) -> bool {
        !matches!(self, Acquisition::Denied)
    }
}

/// Floor lock for one reflector
#[derive(Debug)]
pub struct TalkerLock {
    voice_frame_timeout: Duration,
    hang_time: Duration,
    holder: Option<Transmission>,
    last_holder: Option<SocketAddr>,
    hang_until: Option<Instant>,
}

impl TalkerLock {
    pub fn new(voice_frame_timeout: Duration, hang_time: Duration) -> Self {
        Self {
            voice_frame_timeout,
            hang_time,
            holder: None,
            last_holder: None,
            hang_until: None,
        }
    }

    fn hang_over(&self, now: Instant) -> bool {
        self.hang_until.map_or(true, |until| now >= until)
    }

    fn is_expired(&self, transmission: &Transmission, now: Instant) -> bool {
        now.saturating_duration_since(transmission.last_frame_at) > self.voice_frame_timeout
            && self.hang_until.map_or(true, |until| now > until)
    }

    /// Try to take the floor for `address`
    pub fn try_acquire(&mut self, address: SocketAddr, now: Instant) -> Acquisition {
        match &self.holder {
            Some(current) if current.address == address => Acquisition::Continued,
            Some(current) if self.is_expired(current, now) => {
                let expired = self.holder.replace(Transmission::new(address, now));
                Acquisition::Started { expired }
            }
            Some(_) => Acquisition::Denied,
            None if self.hang_over(now) || self.last_holder == Some(address) => {
                self.holder = Some(Transmission::new(address, now));
                Acquisition::Started { expired: None }
            }
            None => Acquisition::Denied,
        }
    }

    /// Record a relayed frame from the holder
    pub fn touch(&mut self, address: SocketAddr, now: Instant) -> Result<(), ReflectorError> {
        match &mut self.holder {
            Some(current) if current.address == address => {
                current.last_frame_at = now;
                Ok(())
            }
            _ => Err(ReflectorError::NotTalker(address)),
        }
    }

    /// Copy source/destination from a voice header into the current transmission
    pub fn annotate(&mut self, header: &VoiceHeader) {
        if let Some(current) = &mut self.holder {
            if let Some(source) = &header.source {
                current.source = Some(source.to_string());
            }
            if let Some(destination) = &header.destination {
                current.destination = Some(destination.to_string());
            }
        }
    }

    /// End the transmission of `address` and open the hang window
    pub fn release(&mut self, address: SocketAddr, now: Instant) -> Option<Transmission> {
        if self.holder.as_ref()?.address != address {
            return None;
        }
        self.last_holder = Some(address);
        self.hang_until = Some(now + self.hang_time);
        self.holder.take()
    }

    /// Release a holder that has been silent too long
    ///
    /// Silence does not open a new hang window.
    pub fn expire(&mut self, now: Instant) -> Option<Transmission> {
        let expired = self.holder.as_ref().is_some_and(|t| self.is_expired(t, now));
        if !expired {
            return None;
        }
        let transmission = self.holder.take()?;
        self.last_holder = Some(transmission.address);
        Some(transmission)
    }

    /// Drop the floor of a client whose session is going away
    pub fn evict(&mut self, address: SocketAddr) -> Option<Transmission> {
        if self.holder.as_ref()?.address != address {
            return None;
        }
        if self.last_holder == Some(address) {
            self.last_holder = None;
        }
        self.holder.take()
    }

    /// Forget a departed client's claim on the hang window
    pub fn forget(&mut self, address: SocketAddr) {
        if self.last_holder == Some(address) {
            self.last_holder = None;
        }
    }

    /// Current holder, unless its transmission has expired
    pub fn is_locked(&self, now: Instant) -> Option<SocketAddr> {
        self.holder
            .as_ref()
            .filter(|t| !self.is_expired(t, now))
            .map(|t| t.address)
    }

    pub fn holder(&self) -> Option<&Transmission> {
        self.holder.as_ref()
    }

    pub fn last_holder(&self) -> Option<SocketAddr> {
        self.last_holder
    }

    pub fn hang_until(&self) -> Option<Instant> {
        self.hang_until
    }

    /// Whether `address` would be refused by the hang window right now
    pub fn in_hang_for_other(&self, address: SocketAddr, now: Instant) -> bool {
        self.holder.is_none() && !self.hang_over(now) && self.last_holder != Some(address)
    }
}
