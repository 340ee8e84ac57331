//! Reflector engine
//!
//! The protocol-independent core of a reflector: session bookkeeping, talker
//! arbitration and relay dispatch. The engine does no I/O. The actor feeds it
//! datagrams and timer ticks together with the current time, and sends the
//! [`Outbound`] datagrams it returns.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dv_protocol::{Frame, FrameCodec, Handshake, Protocol, VoiceHeader};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace};

use crate::acl::AccessControl;
use crate::error::ReflectorError;
use crate::events::{ReflectorEvent, TransmissionEnd, UnlinkReason};
use crate::session::SessionTable;
use crate::state::{
    duration_ms, ReflectorSnapshot, ReflectorStats, Session, SessionState, TalkerSnapshot,
};
use crate::talker::{Acquisition, TalkerLock, Transmission};

/// Timing configuration of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectorConfig {
    /// Linked sessions silent for longer than this are removed
    pub session_timeout: Duration,
    /// A talker silent for longer than this loses the floor
    pub voice_frame_timeout: Duration,
    /// After an end of transmission only the previous talker may transmit for this long
    pub hang_time: Duration,
    /// Sessions still linking after this long are removed
    pub handshake_timeout: Duration,
    /// Minimum spacing between status replies
    pub status_interval: Duration,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(60),
            voice_frame_timeout: Duration::from_millis(1500),
            hang_time: Duration::from_millis(2000),
            handshake_timeout: Duration::from_secs(10),
            status_interval: Duration::from_secs(1),
        }
    }
}

/// A datagram to send, possibly to several clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub targets: Vec<SocketAddr>,
    pub payload: Vec<u8>,
}

impl Outbound {
    /// A datagram for a single client
    pub fn to(target: SocketAddr, payload: Vec<u8>) -> Self {
        Self {
            targets: vec![target],
            payload,
        }
    }
}

/// The reflector engine for one protocol
pub struct Reflector {
    config: ReflectorConfig,
    codec: Box<dyn FrameCodec>,
    acl: Arc<dyn AccessControl>,
    sessions: SessionTable,
    talker: TalkerLock,
    stats: ReflectorStats,
    last_status_reply: Option<Instant>,
    event_buffer: Vec<ReflectorEvent>,
}

impl Reflector {
    /// Create an engine speaking `codec`'s protocol
    pub fn new(
        config: ReflectorConfig,
        codec: Box<dyn FrameCodec>,
        acl: Arc<dyn AccessControl>,
    ) -> Self {
        Self {
            talker: TalkerLock::new(config.voice_frame_timeout, config.hang_time),
            config,
            codec,
            acl,
            sessions: SessionTable::new(),
            stats: ReflectorStats::default(),
            last_status_reply: None,
            event_buffer: Vec::new(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.codec.protocol()
    }

    pub fn config(&self) -> &ReflectorConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn talker(&self) -> &TalkerLock {
        &self.talker
    }

    pub fn stats(&self) -> &ReflectorStats {
        &self.stats
    }

    /// Handle one inbound datagram
    ///
    /// Returns the datagrams to send in response: acknowledgements to the
    /// sender and relayed voice for the other linked clients.
    pub fn handle_datagram(&mut self, from: SocketAddr, data: &[u8], now: Instant) -> Vec<Outbound> {
        self.stats.datagrams_received += 1;

        let frame = match self.codec.decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.malformed += 1;
                trace!(protocol = %self.protocol(), addr = %from, "Dropping datagram: {}", e);
                return Vec::new();
            }
        };

        trace!(protocol = %self.protocol(), addr = %from, "Received {}", frame.kind());
        match frame {
            Frame::Link { identity } => self.handle_login(from, identity, now),
            Frame::StatusRequest => self.handle_status_request(from, now),
            Frame::Keepalive { .. } => {
                if self.touch_known(from, now, "keepalive") {
                    trace!(protocol = %self.protocol(), addr = %from, "Keepalive");
                }
                Vec::new()
            }
            Frame::Unlink { .. } => self.handle_unlink(from),
            Frame::Voice(header) => self.handle_voice(from, data, &header, now),
        }
    }

    /// Refresh a known client and complete a pending handshake
    ///
    /// Returns false (and counts the datagram) for unknown addresses.
    fn touch_known(&mut self, from: SocketAddr, now: Instant, kind: &str) -> bool {
        let Some(session) = self.sessions.get_mut(&from) else {
            self.stats.unknown_source += 1;
            trace!(protocol = %self.protocol(), addr = %from, "Dropping {} from unknown client", kind);
            return false;
        };
        session.touch(now);
        if session.state == SessionState::Linking {
            self.mark_linked(from);
        }
        true
    }

    fn mark_linked(&mut self, address: SocketAddr) {
        let protocol = self.protocol();
        let Some(session) = self.sessions.get_mut(&address) else {
            return;
        };
        session.state = SessionState::Linked;
        info!(protocol = %protocol, addr = %address, callsign = %session.identity, "Client linked");
        self.event_buffer.push(ReflectorEvent::SessionLinked {
            protocol,
            address,
            callsign: session.identity.clone(),
        });
    }

    fn link_ack(&self, to: SocketAddr) -> Vec<Outbound> {
        self.codec
            .encode_link_ack()
            .map(|ack| Outbound::to(to, ack))
            .into_iter()
            .collect()
    }

    fn handle_login(&mut self, from: SocketAddr, identity: String, now: Instant) -> Vec<Outbound> {
        let protocol = self.protocol();
        let current = self.sessions.get(&from).map(|s| s.identity.clone());

        // Same client polling again
        if current.as_deref() == Some(identity.as_str()) {
            if let Some(session) = self.sessions.get_mut(&from) {
                session.touch(now);
            }
            trace!(protocol = %protocol, addr = %from, callsign = %identity, "Poll");
            return self.link_ack(from);
        }

        if !self.acl.is_allowed(&identity) {
            self.stats.denied_logins += 1;
            info!(protocol = %protocol, addr = %from, callsign = %identity, "Login refused by access list");
            return Vec::new();
        }

        if let Some(previous) = current {
            info!(
                protocol = %protocol,
                addr = %from,
                "{} replaced by {} on the same address",
                previous,
                identity
            );
            self.end_transmission_of(from, TransmissionEnd::Unlinked);
            self.talker.forget(from);
            self.event_buffer.push(ReflectorEvent::SessionUnlinked {
                protocol,
                address: from,
                callsign: previous,
                reason: UnlinkReason::Replaced,
            });
        }

        self.sessions.upsert(from, identity, now);
        match self.codec.handshake() {
            Handshake::SingleRoundTrip => self.mark_linked(from),
            Handshake::Confirmed => {
                debug!(protocol = %protocol, addr = %from, "Login accepted, awaiting confirmation");
            }
        }
        self.link_ack(from)
    }

    fn handle_status_request(&mut self, from: SocketAddr, now: Instant) -> Vec<Outbound> {
        if let Some(session) = self.sessions.get_mut(&from) {
            session.touch(now);
        }
        if let Some(last) = self.last_status_reply {
            if now.saturating_duration_since(last) < self.config.status_interval {
                trace!(protocol = %self.protocol(), addr = %from, "Status query rate limited");
                return Vec::new();
            }
        }
        let Some(reply) = self.codec.encode_status(self.sessions.linked_count()) else {
            return Vec::new();
        };
        self.last_status_reply = Some(now);
        self.stats.status_replies += 1;
        vec![Outbound::to(from, reply)]
    }

    fn handle_unlink(&mut self, from: SocketAddr) -> Vec<Outbound> {
        if self.remove_session(from, UnlinkReason::Requested).is_none() {
            self.stats.unknown_source += 1;
            trace!(protocol = %self.protocol(), addr = %from, "Dropping unlink from unknown client");
            return Vec::new();
        }
        self.codec
            .encode_unlink_ack()
            .map(|ack| Outbound::to(from, ack))
            .into_iter()
            .collect()
    }

    fn handle_voice(
        &mut self,
        from: SocketAddr,
        data: &[u8],
        header: &VoiceHeader,
        now: Instant,
    ) -> Vec<Outbound> {
        if !self.touch_known(from, now, "voice") {
            return Vec::new();
        }
        let protocol = self.protocol();

        match self.talker.try_acquire(from, now) {
            Acquisition::Denied => {
                self.stats.voice_dropped += 1;
                if self.talker.in_hang_for_other(from, now) {
                    debug!(protocol = %protocol, addr = %from, "Hang time, dropping voice frame");
                } else {
                    debug!(protocol = %protocol, addr = %from, "Floor busy, dropping voice frame");
                }
                return Vec::new();
            }
            Acquisition::Started { expired } => {
                if let Some(transmission) = expired {
                    self.emit_transmission_end(transmission, TransmissionEnd::Timeout);
                }
                self.talker.annotate(header);
                self.stats.transmissions += 1;
                let (source, destination) = self
                    .talker
                    .holder()
                    .map(|t| (t.source.clone(), t.destination.clone()))
                    .unwrap_or_default();
                let callsign = self.callsign_of(from);
                info!(protocol = %protocol, addr = %from, callsign = %callsign, "Transmission started");
                self.event_buffer.push(ReflectorEvent::TransmissionStarted {
                    protocol,
                    address: from,
                    callsign,
                    source,
                    destination,
                });
            }
            Acquisition::Continued => {
                if let Err(e) = self.talker.touch(from, now) {
                    error!(protocol = %protocol, "Talker lock out of step: {}", e);
                }
                self.talker.annotate(header);
            }
        }

        self.stats.voice_relayed += 1;
        let targets = self.sessions.relay_targets(from);
        let mut out = Vec::new();
        if !targets.is_empty() {
            out.push(Outbound {
                targets,
                payload: data.to_vec(),
            });
        }

        if header.end_of_transmission {
            if let Some(transmission) = self.talker.release(from, now) {
                self.emit_transmission_end(transmission, TransmissionEnd::EndOfTransmission);
            }
        }
        out
    }

    fn callsign_of(&self, address: SocketAddr) -> String {
        self.sessions
            .get(&address)
            .map(|s| s.identity.clone())
            .unwrap_or_default()
    }

    fn emit_transmission_end(&mut self, transmission: Transmission, reason: TransmissionEnd) {
        let protocol = self.protocol();
        let callsign = self.callsign_of(transmission.address);
        let duration_ms = duration_ms(transmission.duration());
        info!(
            protocol = %protocol,
            addr = %transmission.address,
            callsign = %callsign,
            "Transmission ended ({:?}, {} ms)",
            reason,
            duration_ms
        );
        self.event_buffer.push(ReflectorEvent::TransmissionEnded {
            protocol,
            address: transmission.address,
            callsign,
            source: transmission.source,
            destination: transmission.destination,
            reason,
            duration_ms,
        });
    }

    fn end_transmission_of(&mut self, address: SocketAddr, reason: TransmissionEnd) {
        if let Some(transmission) = self.talker.evict(address) {
            self.emit_transmission_end(transmission, reason);
        }
    }

    /// Remove a session, releasing the floor if it held it
    fn remove_session(&mut self, address: SocketAddr, reason: UnlinkReason) -> Option<Session> {
        let session = self.sessions.get_mut(&address)?;
        session.state = SessionState::Unlinking;

        self.end_transmission_of(address, TransmissionEnd::Unlinked);
        self.talker.forget(address);

        let session = self.sessions.remove(&address)?;
        let protocol = self.protocol();
        info!(
            protocol = %protocol,
            addr = %address,
            callsign = %session.identity,
            "Client unlinked ({:?})",
            reason
        );
        self.event_buffer.push(ReflectorEvent::SessionUnlinked {
            protocol,
            address,
            callsign: session.identity.clone(),
            reason,
        });
        Some(session)
    }

    /// Periodic housekeeping: silence watchdog and session expiry
    ///
    /// Returns the number of sessions removed. Sweeping again without new
    /// traffic changes nothing.
    pub fn sweep(&mut self, now: Instant) -> usize {
        if let Some(transmission) = self.talker.expire(now) {
            self.emit_transmission_end(transmission, TransmissionEnd::Timeout);
        }

        let expired: Vec<(SocketAddr, UnlinkReason)> = self
            .sessions
            .iter()
            .filter_map(|s| match s.state {
                SessionState::Linked if s.idle(now) > self.config.session_timeout => {
                    Some((s.address, UnlinkReason::Timeout))
                }
                SessionState::Linking
                    if now.saturating_duration_since(s.linked_at) > self.config.handshake_timeout =>
                {
                    Some((s.address, UnlinkReason::HandshakeTimeout))
                }
                _ => None,
            })
            .collect();

        for (address, reason) in &expired {
            self.remove_session(*address, *reason);
        }
        expired.len()
    }

    /// Keepalive datagram for every session, if the protocol has one
    pub fn keepalive(&self) -> Option<Outbound> {
        let payload = self.codec.encode_keepalive()?;
        let targets = self.sessions.addresses();
        if targets.is_empty() {
            return None;
        }
        Some(Outbound { targets, payload })
    }

    /// Remove a session on operator request
    pub fn force_unlink(&mut self, address: SocketAddr) -> Result<Vec<Outbound>, ReflectorError> {
        if !self.sessions.contains(&address) {
            return Err(ReflectorError::UnknownSession(address));
        }
        self.remove_session(address, UnlinkReason::Administrative);
        Ok(self
            .codec
            .encode_disconnect()
            .map(|disc| Outbound::to(address, disc))
            .into_iter()
            .collect())
    }

    /// Remove every session, returning the disconnect notices to send
    pub fn disconnect_all(&mut self) -> Vec<Outbound> {
        let targets = self.sessions.addresses();
        for address in &targets {
            self.remove_session(*address, UnlinkReason::Shutdown);
        }
        match self.codec.encode_disconnect() {
            Some(payload) if !targets.is_empty() => vec![Outbound { targets, payload }],
            _ => Vec::new(),
        }
    }

    /// Account for datagrams the actor handed to the socket
    pub fn record_sends(&mut self, sent: u64, failed: u64) {
        self.stats.datagrams_sent += sent;
        self.stats.send_failures += failed;
    }

    /// Queue a periodic counters event
    pub fn emit_stats(&mut self) {
        self.event_buffer.push(ReflectorEvent::Stats {
            protocol: self.protocol(),
            linked: self.sessions.linked_count(),
            stats: self.stats,
        });
    }

    /// Serializable view of the engine
    pub fn snapshot(&self, now: Instant) -> ReflectorSnapshot {
        let mut sessions: Vec<_> = self.sessions.iter().map(|s| s.snapshot(now)).collect();
        sessions.sort_by(|a, b| a.callsign.cmp(&b.callsign).then(a.address.cmp(&b.address)));

        let talker = self.talker.holder().map(|t| TalkerSnapshot {
            address: t.address,
            callsign: self.sessions.get(&t.address).map(|s| s.identity.clone()),
            source: t.source.clone(),
            destination: t.destination.clone(),
            duration_ms: duration_ms(now.saturating_duration_since(t.started_at)),
        });

        ReflectorSnapshot {
            protocol: self.protocol(),
            local_addr: None,
            sessions,
            talker,
            stats: self.stats,
        }
    }

    /// Verify that the floor holder is a linked session
    pub fn check_invariants(&self) -> Result<(), ReflectorError> {
        let Some(holder) = self.talker.holder() else {
            return Ok(());
        };
        match self.sessions.get(&holder.address) {
            Some(session) if session.is_linked() => Ok(()),
            Some(session) => Err(ReflectorError::Invariant(format!(
                "talker {} is {}",
                holder.address,
                session.state.name()
            ))),
            None => Err(ReflectorError::Invariant(format!(
                "talker {} has no session",
                holder.address
            ))),
        }
    }

    /// Drain pending events
    pub fn drain_events(&mut self) -> Vec<ReflectorEvent> {
        std::mem::take(&mut self.event_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{AclMode, AllowAll, CallsignAcl};
    use dv_protocol::m17::{M17Frame, M17Stream};
    use dv_protocol::p25::{P25Frame, TALK_GROUP_RECORD};
    use dv_protocol::ysf::{YsfFrame, STATUS_TAG};
    use dv_protocol::{create_frame_codec, CodecOptions, EncodeFrame};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 0, 2, 1], port))
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn engine(protocol: Protocol) -> Reflector {
        engine_with_acl(protocol, Arc::new(AllowAll))
    }

    fn engine_with_acl(protocol: Protocol, acl: Arc<dyn AccessControl>) -> Reflector {
        let options = CodecOptions {
            callsign: "REF001".into(),
            module: 'A',
            ..Default::default()
        };
        Reflector::new(
            ReflectorConfig::default(),
            create_frame_codec(protocol, &options),
            acl,
        )
    }

    fn p25_poll(call: &str) -> Vec<u8> {
        P25Frame::Poll {
            callsign: call.into(),
        }
        .encode()
    }

    fn p25_voice() -> Vec<u8> {
        P25Frame::voice_record(TALK_GROUP_RECORD, 1234, 10200)
            .unwrap()
            .encode()
    }

    fn p25_eot() -> Vec<u8> {
        P25Frame::terminator().encode()
    }

    #[test]
    fn test_poll_links_and_acks() {
        let mut r = engine(Protocol::P25);
        let now = Instant::now();

        let out = r.handle_datagram(addr(1), &p25_poll("KO4UYJ"), now);
        assert_eq!(out, vec![Outbound::to(addr(1), p25_poll("REF001"))]);
        assert!(r.sessions().get(&addr(1)).unwrap().is_linked());

        let events = r.drain_events();
        assert!(matches!(
            events.as_slice(),
            [ReflectorEvent::SessionLinked { callsign, .. }] if callsign == "KO4UYJ"
        ));
    }

    #[test]
    fn test_repeated_poll_is_keepalive() {
        let mut r = engine(Protocol::P25);
        let t0 = Instant::now();
        r.handle_datagram(addr(1), &p25_poll("KO4UYJ"), t0);
        r.drain_events();

        let out = r.handle_datagram(addr(1), &p25_poll("KO4UYJ"), t0 + ms(5000));
        assert_eq!(out.len(), 1);
        assert_eq!(r.sessions().get(&addr(1)).unwrap().last_seen, t0 + ms(5000));
        assert!(r.drain_events().is_empty());
    }

    #[test]
    fn test_unknown_source_voice_dropped_silently() {
        let mut r = engine(Protocol::P25);
        let out = r.handle_datagram(addr(9), &p25_voice(), Instant::now());
        assert!(out.is_empty());
        assert!(r.sessions().is_empty());
        assert_eq!(r.stats().unknown_source, 1);
    }

    #[test]
    fn test_malformed_counted() {
        let mut r = engine(Protocol::Ysf);
        assert!(r.handle_datagram(addr(1), b"garbage", Instant::now()).is_empty());
        assert_eq!(r.stats().malformed, 1);
    }

    #[test]
    fn test_voice_relayed_to_others_only() {
        let mut r = engine(Protocol::P25);
        let now = Instant::now();
        for (port, call) in [(1, "AAA"), (2, "BBB"), (3, "CCC")] {
            r.handle_datagram(addr(port), &p25_poll(call), now);
        }

        let out = r.handle_datagram(addr(1), &p25_voice(), now + ms(10));
        assert_eq!(out.len(), 1);
        let mut targets = out[0].targets.clone();
        targets.sort();
        assert_eq!(targets, vec![addr(2), addr(3)]);
        assert_eq!(out[0].payload, p25_voice());
    }

    #[test]
    fn test_eot_relayed_then_released() {
        let mut r = engine(Protocol::P25);
        let t0 = Instant::now();
        r.handle_datagram(addr(1), &p25_poll("AAA"), t0);
        r.handle_datagram(addr(2), &p25_poll("BBB"), t0);
        r.handle_datagram(addr(1), &p25_voice(), t0 + ms(10));
        r.drain_events();

        let out = r.handle_datagram(addr(1), &p25_eot(), t0 + ms(20));
        assert_eq!(out[0].targets, vec![addr(2)]);
        assert!(r.talker().holder().is_none());
        assert_eq!(r.talker().hang_until(), Some(t0 + ms(20) + r.config().hang_time));

        let events = r.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            ReflectorEvent::TransmissionEnded {
                reason: TransmissionEnd::EndOfTransmission,
                ..
            }
        )));
    }

    #[test]
    fn test_unlink_removes_session() {
        let mut r = engine(Protocol::P25);
        let now = Instant::now();
        r.handle_datagram(addr(1), &p25_poll("AAA"), now);
        r.drain_events();

        let unlink = P25Frame::Unlink {
            callsign: "AAA".into(),
        }
        .encode();
        let out = r.handle_datagram(addr(1), &unlink, now);
        assert!(out.is_empty());
        assert!(r.sessions().is_empty());
        assert!(matches!(
            r.drain_events().as_slice(),
            [ReflectorEvent::SessionUnlinked {
                reason: UnlinkReason::Requested,
                ..
            }]
        ));
    }

    #[test]
    fn test_unlink_of_talker_releases_floor() {
        let mut r = engine(Protocol::P25);
        let now = Instant::now();
        r.handle_datagram(addr(1), &p25_poll("AAA"), now);
        r.handle_datagram(addr(2), &p25_poll("BBB"), now);
        r.handle_datagram(addr(1), &p25_voice(), now);

        let unlink = P25Frame::Unlink {
            callsign: "AAA".into(),
        }
        .encode();
        r.handle_datagram(addr(1), &unlink, now + ms(10));
        assert!(r.talker().holder().is_none());
        assert!(r.check_invariants().is_ok());

        let out = r.handle_datagram(addr(2), &p25_voice(), now + ms(20));
        assert!(out.is_empty(), "no one left to relay to");
        assert_eq!(r.talker().holder().unwrap().address, addr(2));
    }

    #[test]
    fn test_denied_login_ignored() {
        let acl = Arc::new(CallsignAcl::new(AclMode::Deny, &["N0CALL"]));
        let mut r = engine_with_acl(Protocol::P25, acl);

        let out = r.handle_datagram(addr(1), &p25_poll("N0CALL"), Instant::now());
        assert!(out.is_empty());
        assert!(r.sessions().is_empty());
        assert_eq!(r.stats().denied_logins, 1);
    }

    #[test]
    fn test_denied_relogin_keeps_existing_session() {
        let acl = Arc::new(CallsignAcl::new(AclMode::Deny, &["N0CALL"]));
        let mut r = engine_with_acl(Protocol::P25, acl);
        let now = Instant::now();
        r.handle_datagram(addr(1), &p25_poll("KO4UYJ"), now);

        let out = r.handle_datagram(addr(1), &p25_poll("N0CALL"), now + ms(10));
        assert!(out.is_empty());
        let session = r.sessions().get(&addr(1)).unwrap();
        assert_eq!(session.identity, "KO4UYJ");
        assert!(session.is_linked());
    }

    #[test]
    fn test_new_identity_replaces_session() {
        let mut r = engine(Protocol::P25);
        let now = Instant::now();
        r.handle_datagram(addr(1), &p25_poll("KO4UYJ"), now);
        r.drain_events();

        r.handle_datagram(addr(1), &p25_poll("W1AW"), now + ms(10));
        assert_eq!(r.sessions().len(), 1);
        assert_eq!(r.sessions().get(&addr(1)).unwrap().identity, "W1AW");

        let events = r.drain_events();
        assert!(matches!(
            events.as_slice(),
            [
                ReflectorEvent::SessionUnlinked {
                    reason: UnlinkReason::Replaced,
                    ..
                },
                ReflectorEvent::SessionLinked { .. }
            ]
        ));
    }

    #[test]
    fn test_m17_handshake_needs_confirmation() {
        let mut r = engine(Protocol::M17);
        let t0 = Instant::now();
        let conn = M17Frame::Connect {
            callsign: "KO4UYJ".into(),
            module: 'A',
        }
        .encode();

        let out = r.handle_datagram(addr(1), &conn, t0);
        assert_eq!(out, vec![Outbound::to(addr(1), b"ACKN".to_vec())]);
        assert_eq!(
            r.sessions().get(&addr(1)).unwrap().state,
            SessionState::Linking
        );
        assert!(r.drain_events().is_empty());

        let pong = M17Frame::Pong {
            callsign: "KO4UYJ".into(),
        }
        .encode();
        r.handle_datagram(addr(1), &pong, t0 + ms(500));
        assert!(r.sessions().get(&addr(1)).unwrap().is_linked());
        assert!(matches!(
            r.drain_events().as_slice(),
            [ReflectorEvent::SessionLinked { .. }]
        ));
    }

    #[test]
    fn test_m17_linking_session_gets_no_relay() {
        let mut r = engine(Protocol::M17);
        let now = Instant::now();
        let conn = |call: &str| {
            M17Frame::Connect {
                callsign: call.into(),
                module: 'A',
            }
            .encode()
        };
        r.handle_datagram(addr(1), &conn("AAA"), now);
        r.handle_datagram(addr(2), &conn("BBB"), now);

        let stream = M17Frame::Stream(M17Stream::new(1, "AAA", "@ALL", 0, false)).encode();
        // the stream confirms AAA, but BBB is still linking
        let out = r.handle_datagram(addr(1), &stream, now + ms(10));
        assert!(out.is_empty());
        assert!(r.sessions().get(&addr(1)).unwrap().is_linked());
    }

    #[test]
    fn test_m17_handshake_timeout() {
        let mut r = engine(Protocol::M17);
        let t0 = Instant::now();
        let conn = M17Frame::Connect {
            callsign: "KO4UYJ".into(),
            module: 'A',
        }
        .encode();
        r.handle_datagram(addr(1), &conn, t0);

        assert_eq!(r.sweep(t0 + ms(5000)), 0);
        assert_eq!(r.sweep(t0 + r.config().handshake_timeout + ms(1)), 1);
        assert!(r.sessions().is_empty());
        assert!(matches!(
            r.drain_events().as_slice(),
            [ReflectorEvent::SessionUnlinked {
                reason: UnlinkReason::HandshakeTimeout,
                ..
            }]
        ));
    }

    #[test]
    fn test_m17_keepalive_and_force_unlink() {
        let mut r = engine(Protocol::M17);
        let now = Instant::now();
        assert!(r.keepalive().is_none());

        let conn = M17Frame::Connect {
            callsign: "KO4UYJ".into(),
            module: 'A',
        }
        .encode();
        r.handle_datagram(addr(1), &conn, now);

        let ping = r.keepalive().unwrap();
        assert_eq!(ping.targets, vec![addr(1)]);
        assert_eq!(&ping.payload[..4], b"PING");

        let out = r.force_unlink(addr(1)).unwrap();
        assert_eq!(out, vec![Outbound::to(addr(1), b"DISC".to_vec())]);
        assert!(matches!(
            r.force_unlink(addr(1)),
            Err(ReflectorError::UnknownSession(_))
        ));
    }

    #[test]
    fn test_ysf_status_rate_limited() {
        let mut r = engine(Protocol::Ysf);
        let t0 = Instant::now();

        let first = r.handle_datagram(addr(1), STATUS_TAG, t0);
        assert_eq!(first.len(), 1);
        assert!(matches!(
            YsfFrame::parse(&first[0].payload),
            Ok(YsfFrame::Status { count: 0, .. })
        ));

        assert!(r.handle_datagram(addr(2), STATUS_TAG, t0 + ms(500)).is_empty());
        assert_eq!(r.handle_datagram(addr(2), STATUS_TAG, t0 + ms(1000)).len(), 1);
        assert_eq!(r.stats().status_replies, 2);
    }

    #[test]
    fn test_sweep_evicts_silent_session() {
        let mut r = engine(Protocol::P25);
        let t0 = Instant::now();
        r.handle_datagram(addr(1), &p25_poll("AAA"), t0);
        r.handle_datagram(addr(2), &p25_poll("BBB"), t0 + ms(30_000));

        let later = t0 + r.config().session_timeout + ms(1);
        assert_eq!(r.sweep(later), 1);
        assert!(r.sessions().get(&addr(1)).is_none());
        assert!(r.sessions().get(&addr(2)).is_some());
        assert_eq!(r.sweep(later), 0);
    }

    #[test]
    fn test_sweep_expires_silent_talker() {
        let mut r = engine(Protocol::P25);
        let t0 = Instant::now();
        r.handle_datagram(addr(1), &p25_poll("AAA"), t0);
        r.handle_datagram(addr(1), &p25_voice(), t0);
        r.drain_events();

        r.sweep(t0 + r.config().voice_frame_timeout + ms(1));
        assert!(r.talker().holder().is_none());
        assert!(matches!(
            r.drain_events().as_slice(),
            [ReflectorEvent::TransmissionEnded {
                reason: TransmissionEnd::Timeout,
                ..
            }]
        ));
    }

    #[test]
    fn test_snapshot_reports_talker() {
        let mut r = engine(Protocol::P25);
        let t0 = Instant::now();
        r.handle_datagram(addr(1), &p25_poll("AAA"), t0);
        r.handle_datagram(addr(1), &p25_voice(), t0);

        let snap = r.snapshot(t0 + ms(250));
        assert_eq!(snap.protocol, Protocol::P25);
        assert_eq!(snap.linked_count(), 1);
        let talker = snap.talker.unwrap();
        assert_eq!(talker.callsign.as_deref(), Some("AAA"));
        assert_eq!(talker.destination.as_deref(), Some("10200"));
        assert_eq!(talker.duration_ms, 250);
    }

    #[test]
    fn test_disconnect_all() {
        let mut r = engine(Protocol::M17);
        let now = Instant::now();
        for (port, call) in [(1, "AAA"), (2, "BBB")] {
            let conn = M17Frame::Connect {
                callsign: call.into(),
                module: 'A',
            }
            .encode();
            r.handle_datagram(addr(port), &conn, now);
        }
        r.drain_events();

        let out = r.disconnect_all();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].targets.len(), 2);
        assert!(r.sessions().is_empty());
        assert_eq!(r.drain_events().len(), 2);
    }

    #[test]
    fn test_stats_event() {
        let mut r = engine(Protocol::Nxdn);
        r.emit_stats();
        assert!(matches!(
            r.drain_events().as_slice(),
            [ReflectorEvent::Stats {
                protocol: Protocol::Nxdn,
                linked: 0,
                ..
            }]
        ));
    }
}
