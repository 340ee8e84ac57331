//! Integration tests for the reflector engine
//!
//! These tests verify end-to-end behavior of the reflector including:
//! - Floor arbitration and hang time across several clients
//! - Session expiry and its effect on the floor
//! - Access control on login
//! - Per-protocol handshakes and status replies
//! - Full UDP round trips through the server and virtual hotspots

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dv_protocol::{create_frame_codec, CodecOptions, Protocol};
use dv_reflector::{
    AccessControl, AclMode, AllowAll, CallsignAcl, EventSink, Reflector, ReflectorConfig,
    ReflectorEvent, ReflectorServer, ReflectorSettings, TransmissionEnd, UnlinkReason,
};
use dv_sim::{HotspotClient, VirtualHotspot};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    pub fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([198, 51, 100, 7], port))
    }

    pub fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    pub fn reflector(protocol: Protocol) -> Reflector {
        reflector_with_acl(protocol, Arc::new(AllowAll))
    }

    pub fn reflector_with_acl(protocol: Protocol, acl: Arc<dyn AccessControl>) -> Reflector {
        Reflector::new(
            ReflectorConfig::default(),
            create_frame_codec(protocol, &CodecOptions::default()),
            acl,
        )
    }

    /// A linked client: its address and the hotspot producing its frames
    pub struct Station {
        pub address: SocketAddr,
        pub hotspot: VirtualHotspot,
    }

    /// Link `callsigns` on ports 1.. and confirm the handshake where needed
    pub fn link_all(r: &mut Reflector, callsigns: &[&str], now: Instant) -> Vec<Station> {
        let protocol = r.protocol();
        let stations: Vec<Station> = callsigns
            .iter()
            .enumerate()
            .map(|(i, call)| Station {
                address: addr(i as u16 + 1),
                hotspot: VirtualHotspot::new(*call, protocol),
            })
            .collect();
        for station in &stations {
            r.handle_datagram(station.address, &station.hotspot.link_frame(), now);
            r.handle_datagram(station.address, &station.hotspot.keepalive_frame(), now);
        }
        assert_eq!(r.sessions().linked_count(), callsigns.len());
        r.drain_events();
        stations
    }

    /// Addresses a voice datagram was relayed to
    pub fn relayed_to(out: &[dv_reflector::Outbound]) -> Vec<SocketAddr> {
        let mut targets: Vec<_> = out.iter().flat_map(|o| o.targets.clone()).collect();
        targets.sort();
        targets
    }
}

use helpers::*;

// ============================================================================
// Floor Arbitration
// ============================================================================

mod arbitration {
    use super::*;

    #[test]
    fn three_station_lock_and_hang() {
        let mut r = reflector(Protocol::P25);
        let t0 = Instant::now();
        let mut s = link_all(&mut r, &["AAA", "BBB", "CCC"], t0);
        let (a, b, c) = (s[0].address, s[1].address, s[2].address);

        // A talks: B and C hear it, A does not
        let voice = s[0].hotspot.voice_frame();
        let out = r.handle_datagram(a, &voice, t0 + ms(100));
        assert_eq!(relayed_to(&out), vec![b, c]);
        assert!(out.iter().all(|o| o.payload == voice));

        // B keys up over A: nothing is relayed
        let voice = s[1].hotspot.voice_frame();
        assert!(r.handle_datagram(b, &voice, t0 + ms(150)).is_empty());
        assert_eq!(r.stats().voice_dropped, 1);

        // A ends: the terminator is relayed and the hang window opens
        let eot = s[0].hotspot.end_frame();
        let out = r.handle_datagram(a, &eot, t0 + ms(200));
        assert_eq!(relayed_to(&out), vec![b, c]);
        assert!(r.talker().holder().is_none());

        // B inside the hang window: denied
        let voice = s[1].hotspot.voice_frame();
        assert!(r.handle_datagram(b, &voice, t0 + ms(1000)).is_empty());

        // B after the hang window: relayed to A and C
        let hang = r.config().hang_time;
        let voice = s[1].hotspot.voice_frame();
        let out = r.handle_datagram(b, &voice, t0 + ms(200) + hang);
        assert_eq!(relayed_to(&out), vec![a, c]);
        assert_eq!(r.talker().holder().unwrap().address, b);
    }

    #[test]
    fn previous_talker_may_reclaim_during_hang() {
        let mut r = reflector(Protocol::Ysf);
        let t0 = Instant::now();
        let mut s = link_all(&mut r, &["AAA", "BBB"], t0);
        let (a, b) = (s[0].address, s[1].address);

        let voice = s[0].hotspot.voice_frame();
        r.handle_datagram(a, &voice, t0);
        let eot = s[0].hotspot.end_frame();
        r.handle_datagram(a, &eot, t0 + ms(100));

        let voice = s[0].hotspot.voice_frame();
        let out = r.handle_datagram(a, &voice, t0 + ms(300));
        assert_eq!(relayed_to(&out), vec![b]);

        let events = r.drain_events();
        let started = events
            .iter()
            .filter(|e| matches!(e, ReflectorEvent::TransmissionStarted { .. }))
            .count();
        assert_eq!(started, 2);
    }

    #[test]
    fn silent_talker_loses_floor() {
        let mut r = reflector(Protocol::Nxdn);
        let t0 = Instant::now();
        let mut s = link_all(&mut r, &["AAA", "BBB"], t0);
        let (a, b) = (s[0].address, s[1].address);

        let voice = s[0].hotspot.voice_frame();
        r.handle_datagram(a, &voice, t0);
        r.drain_events();

        let timeout = r.config().voice_frame_timeout;
        let voice = s[1].hotspot.voice_frame();
        let out = r.handle_datagram(b, &voice, t0 + timeout + ms(1));
        assert_eq!(relayed_to(&out), vec![a]);

        let events = r.drain_events();
        assert!(matches!(
            events.first(),
            Some(ReflectorEvent::TransmissionEnded {
                reason: TransmissionEnd::Timeout,
                address,
                ..
            }) if *address == a
        ));
    }

    #[test]
    fn no_self_relay_for_any_protocol() {
        for protocol in Protocol::ALL {
            let mut r = reflector(protocol);
            let t0 = Instant::now();
            let mut s = link_all(&mut r, &["AAA", "BBB", "CCC", "DDD"], t0);
            for i in 0..10 {
                let voice = s[0].hotspot.voice_frame();
                let out = r.handle_datagram(s[0].address, &voice, t0 + ms(i * 20));
                assert!(!relayed_to(&out).contains(&s[0].address), "{protocol}");
                assert_eq!(relayed_to(&out).len(), 3, "{protocol}");
            }
        }
    }
}

// ============================================================================
// Session Expiry
// ============================================================================

mod expiry {
    use super::*;

    #[test]
    fn silent_talker_session_evicted_releases_lock() {
        let mut r = reflector(Protocol::P25);
        let t0 = Instant::now();
        let mut s = link_all(&mut r, &["AAA", "BBB"], t0);
        let a = s[0].address;

        let voice = s[0].hotspot.voice_frame();
        r.handle_datagram(a, &voice, t0);
        // B stays alive
        let keepalive = s[1].hotspot.keepalive_frame();
        r.handle_datagram(s[1].address, &keepalive, t0 + ms(30_000));

        let later = t0 + r.config().session_timeout + ms(1);
        assert_eq!(r.sweep(later), 1);
        assert!(r.sessions().get(&a).is_none());
        assert_eq!(r.talker().is_locked(later), None);
        assert!(r.check_invariants().is_ok());

        let events = r.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            ReflectorEvent::SessionUnlinked {
                reason: UnlinkReason::Timeout,
                ..
            }
        )));
    }

    #[test]
    fn sweep_is_idempotent() {
        let mut r = reflector(Protocol::Ysf);
        let t0 = Instant::now();
        link_all(&mut r, &["AAA", "BBB", "CCC"], t0);

        let later = t0 + r.config().session_timeout + ms(1);
        assert_eq!(r.sweep(later), 3);
        r.drain_events();
        assert_eq!(r.sweep(later), 0);
        assert_eq!(r.sweep(later + ms(1000)), 0);
        assert!(r.drain_events().is_empty());
    }

    #[test]
    fn traffic_keeps_session_alive() {
        let mut r = reflector(Protocol::Nxdn);
        let t0 = Instant::now();
        let s = link_all(&mut r, &["AAA"], t0);
        let timeout = r.config().session_timeout;

        let poll = s[0].hotspot.keepalive_frame();
        r.handle_datagram(s[0].address, &poll, t0 + timeout - ms(1));
        assert_eq!(r.sweep(t0 + timeout + ms(1)), 0);
    }
}

// ============================================================================
// Access Control
// ============================================================================

mod access_control {
    use super::*;

    #[test]
    fn denied_login_gets_no_reply_and_no_session() {
        let acl = Arc::new(CallsignAcl::new(AclMode::Deny, &["N0CALL"]));
        for protocol in Protocol::ALL {
            let mut r = reflector_with_acl(protocol, acl.clone());
            let hotspot = VirtualHotspot::new("N0CALL", protocol);

            let out = r.handle_datagram(addr(1), &hotspot.link_frame(), Instant::now());
            assert!(out.is_empty(), "{protocol}");
            assert!(r.sessions().is_empty(), "{protocol}");
            assert!(r.drain_events().is_empty(), "{protocol}");
        }
    }

    #[test]
    fn allow_list_admits_only_listed() {
        let acl = Arc::new(CallsignAcl::new(AclMode::Allow, &["KO4*"]));
        let mut r = reflector_with_acl(Protocol::P25, acl);
        let now = Instant::now();

        let allowed = VirtualHotspot::new("KO4UYJ", Protocol::P25);
        let other = VirtualHotspot::new("W1AW", Protocol::P25);
        assert_eq!(r.handle_datagram(addr(1), &allowed.link_frame(), now).len(), 1);
        assert!(r.handle_datagram(addr(2), &other.link_frame(), now).is_empty());
        assert_eq!(r.stats().denied_logins, 1);
    }

    #[test]
    fn denied_voice_from_unlinked_client_is_not_relayed() {
        let acl = Arc::new(CallsignAcl::new(AclMode::Deny, &["N0CALL"]));
        let mut r = reflector_with_acl(Protocol::Ysf, acl);
        let t0 = Instant::now();
        link_all(&mut r, &["AAA"], t0);

        let mut intruder = VirtualHotspot::new("N0CALL", Protocol::Ysf);
        r.handle_datagram(addr(9), &intruder.link_frame(), t0);
        let voice = intruder.voice_frame();
        assert!(r.handle_datagram(addr(9), &voice, t0).is_empty());
        assert_eq!(r.stats().unknown_source, 1);
    }
}

// ============================================================================
// Protocol Handshakes
// ============================================================================

mod handshakes {
    use super::*;

    #[test]
    fn m17_voice_confirms_link() {
        let mut r = reflector(Protocol::M17);
        let t0 = Instant::now();
        let mut a = VirtualHotspot::new("AAA", Protocol::M17);
        let b = VirtualHotspot::new("BBB", Protocol::M17);

        r.handle_datagram(addr(1), &a.link_frame(), t0);
        r.handle_datagram(addr(2), &b.link_frame(), t0);
        r.handle_datagram(addr(2), &b.keepalive_frame(), t0);

        // A's first stream frame confirms A and is relayed to B
        let voice = a.voice_frame();
        let out = r.handle_datagram(addr(1), &voice, t0 + ms(10));
        assert_eq!(relayed_to(&out), vec![addr(2)]);
        assert!(r.sessions().get(&addr(1)).unwrap().is_linked());
    }

    #[test]
    fn m17_disconnect_is_acknowledged() {
        let mut r = reflector(Protocol::M17);
        let now = Instant::now();
        let s = link_all(&mut r, &["AAA"], now);

        let out = r.handle_datagram(s[0].address, &s[0].hotspot.unlink_frame(), now);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload, b"DISC");
        assert!(r.sessions().is_empty());
    }

    #[test]
    fn m17_foreign_module_ignored() {
        let mut r = reflector(Protocol::M17);
        let hotspot = VirtualHotspot::new("AAA", Protocol::M17).with_module('Z');
        assert!(r.handle_datagram(addr(1), &hotspot.link_frame(), Instant::now()).is_empty());
        assert!(r.sessions().is_empty());
        assert_eq!(r.stats().malformed, 1);
    }

    #[test]
    fn nxdn_foreign_talk_group_ignored() {
        let mut r = reflector(Protocol::Nxdn);
        let hotspot = VirtualHotspot::new("AAA", Protocol::Nxdn).with_talk_group(31337);
        assert!(r.handle_datagram(addr(1), &hotspot.link_frame(), Instant::now()).is_empty());
        assert!(r.sessions().is_empty());
    }

    #[test]
    fn ysf_status_reports_linked_count() {
        let mut r = reflector(Protocol::Ysf);
        let t0 = Instant::now();
        link_all(&mut r, &["AAA", "BBB"], t0);

        let query = VirtualHotspot::new("REGISTRY", Protocol::Ysf)
            .status_request()
            .unwrap();
        let out = r.handle_datagram(addr(100), &query, t0);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].payload[39..42], b"002");

        // Rate limited
        assert!(r.handle_datagram(addr(100), &query, t0 + ms(10)).is_empty());
        assert!(r.sessions().get(&addr(100)).is_none());
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Voice,
        End,
        Poll,
        Unlink,
        Sweep,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            6 => Just(Op::Voice),
            2 => Just(Op::End),
            1 => Just(Op::Poll),
            1 => Just(Op::Unlink),
            1 => Just(Op::Sweep),
        ]
    }

    fn step() -> impl Strategy<Value = (usize, Op, u64)> {
        (0usize..4, op(), 0u64..2500)
    }

    proptest! {
        #[test]
        fn at_most_one_talker(steps in prop::collection::vec(step(), 1..80)) {
            let mut r = reflector(Protocol::P25);
            let mut now = Instant::now();
            let mut s = link_all(&mut r, &["AAA", "BBB", "CCC", "DDD"], now);
            let timeout = r.config().voice_frame_timeout;

            for (i, op, advance) in steps {
                now += ms(advance);
                let from = s[i].address;

                let before = r.talker().holder().cloned();
                let hang_until = r.talker().hang_until();
                let last_holder = r.talker().last_holder();
                let relayed_before = r.stats().voice_relayed;

                let frame = match op {
                    Op::Voice => Some(s[i].hotspot.voice_frame()),
                    Op::End => Some(s[i].hotspot.end_frame()),
                    Op::Poll => Some(s[i].hotspot.keepalive_frame()),
                    Op::Unlink => Some(s[i].hotspot.unlink_frame()),
                    Op::Sweep => None,
                };
                let out = match frame {
                    Some(frame) => r.handle_datagram(from, &frame, now),
                    None => {
                        r.sweep(now);
                        Vec::new()
                    }
                };

                if r.stats().voice_relayed > relayed_before {
                    match &before {
                        Some(holder) if holder.address != from => {
                            // only an expired holder can be replaced
                            prop_assert!(now.saturating_duration_since(holder.last_frame_at) > timeout);
                            prop_assert!(hang_until.map_or(true, |u| now > u));
                        }
                        Some(_) => {}
                        None => {
                            prop_assert!(
                                hang_until.map_or(true, |u| now >= u) || last_holder == Some(from)
                            );
                        }
                    }
                    prop_assert!(!relayed_to(&out).contains(&from));
                } else {
                    prop_assert!(out.iter().all(|o| o.targets == vec![from]));
                }

                prop_assert!(r.check_invariants().is_ok());
            }
        }

        #[test]
        fn one_session_per_address(
            steps in prop::collection::vec((0u16..6, 0usize..3, any::<bool>()), 1..60)
        ) {
            const CALLS: [&str; 3] = ["AAA", "BBB", "CCC"];
            let mut r = reflector(Protocol::Ysf);
            let mut model: HashMap<SocketAddr, &str> = HashMap::new();
            let now = Instant::now();

            for (port, call, link) in steps {
                let hotspot = VirtualHotspot::new(CALLS[call], Protocol::Ysf);
                let from = addr(port);
                if link {
                    r.handle_datagram(from, &hotspot.link_frame(), now);
                    model.insert(from, CALLS[call]);
                } else {
                    r.handle_datagram(from, &hotspot.unlink_frame(), now);
                    model.remove(&from);
                }

                prop_assert_eq!(r.sessions().len(), model.len());
                for (address, call) in &model {
                    let session = r.sessions().get(address);
                    prop_assert!(session.is_some());
                    prop_assert_eq!(session.map(|s| s.identity.as_str()), Some(*call));
                }
            }
        }
    }
}

// ============================================================================
// UDP End-to-End
// ============================================================================

mod udp {
    use super::*;
    use dv_reflector::{ActorTimers, ReflectorHandle, ReflectorSnapshot};

    const WAIT: Duration = Duration::from_secs(2);
    const QUIET: Duration = Duration::from_millis(150);

    async fn start(protocol: Protocol, settings: Option<ReflectorSettings>) -> (ReflectorServer, ReflectorHandle, SocketAddr) {
        let settings = settings
            .unwrap_or_else(|| ReflectorSettings::new(protocol, SocketAddr::from(([127, 0, 0, 1], 0))));
        let mut server = ReflectorServer::bind(settings, Arc::new(AllowAll), EventSink::disabled())
            .await
            .unwrap();
        let local = server.local_addr().unwrap();
        let handle = server.run();
        (server, handle, local)
    }

    async fn linked_client(protocol: Protocol, call: &str, reflector: SocketAddr) -> HotspotClient {
        let client = HotspotClient::connect(VirtualHotspot::new(call, protocol), reflector)
            .await
            .unwrap();
        client.link().await.unwrap();
        client.recv(WAIT).await.unwrap();
        if protocol == Protocol::M17 {
            client.keepalive().await.unwrap();
        }
        client
    }

    /// Poll until `count` sessions are linked; M17 links complete asynchronously
    async fn wait_linked(handle: &ReflectorHandle, count: usize) -> ReflectorSnapshot {
        tokio::time::timeout(WAIT, async {
            loop {
                let snapshot = handle.snapshot().await.unwrap();
                if snapshot.linked_count() == count {
                    return snapshot;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn relay_reaches_every_other_client() {
        for protocol in Protocol::ALL {
            let (mut server, handle, local) = start(protocol, None).await;
            let mut a = linked_client(protocol, "AAA", local).await;
            let b = linked_client(protocol, "BBB", local).await;
            let c = linked_client(protocol, "CCC", local).await;

            wait_linked(&handle, 3).await;

            let sent = a.voice().await.unwrap();
            assert_eq!(b.recv(WAIT).await.unwrap(), sent, "{protocol}");
            assert_eq!(c.recv(WAIT).await.unwrap(), sent, "{protocol}");
            assert_eq!(a.try_recv(QUIET).await.unwrap(), None, "{protocol}");

            let end = a.end().await.unwrap();
            assert_eq!(b.recv(WAIT).await.unwrap(), end, "{protocol}");

            server.stop().await;
        }
    }

    #[tokio::test]
    async fn force_unlink_over_handle() {
        let (mut server, handle, local) = start(Protocol::M17, None).await;
        let a = linked_client(Protocol::M17, "AAA", local).await;
        let snapshot = wait_linked(&handle, 1).await;
        assert_eq!(snapshot.sessions[0].callsign, "AAA");

        handle.force_unlink(a.local_addr().unwrap()).await.unwrap();
        assert_eq!(a.recv(WAIT).await.unwrap(), b"DISC");
        assert!(handle.snapshot().await.unwrap().sessions.is_empty());

        server.stop().await;
    }

    #[tokio::test]
    async fn sweeper_removes_silent_clients() {
        let mut settings =
            ReflectorSettings::new(Protocol::P25, SocketAddr::from(([127, 0, 0, 1], 0)));
        settings.engine.session_timeout = Duration::from_millis(200);
        settings.timers = ActorTimers {
            sweep_interval: Duration::from_millis(50),
            ..Default::default()
        };
        let (mut server, handle, local) = start(Protocol::P25, Some(settings)).await;

        let _a = linked_client(Protocol::P25, "AAA", local).await;
        assert_eq!(handle.snapshot().await.unwrap().sessions.len(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(handle.snapshot().await.unwrap().sessions.is_empty());

        server.stop().await;
    }

    #[tokio::test]
    async fn events_reach_the_sink() {
        let (sink, mut events) = EventSink::channel(64);
        let settings = ReflectorSettings::new(Protocol::Nxdn, SocketAddr::from(([127, 0, 0, 1], 0)));
        let mut server = ReflectorServer::bind(settings, Arc::new(AllowAll), sink)
            .await
            .unwrap();
        let local = server.local_addr().unwrap();
        server.run();

        let client = linked_client(Protocol::Nxdn, "AAA", local).await;
        let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert!(matches!(
            event,
            ReflectorEvent::SessionLinked { protocol: Protocol::Nxdn, ref callsign, .. } if callsign == "AAA"
        ));

        client.unlink().await.unwrap();
        let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert!(matches!(
            event,
            ReflectorEvent::SessionUnlinked { reason: UnlinkReason::Requested, .. }
        ));

        server.stop().await;
    }
}
