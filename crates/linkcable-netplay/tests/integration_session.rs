mod common;

use std::{
    sync::{
        Arc, OnceLock, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use bytes::BufMut;
use common::{Relay, RelayConfig, WAIT, expect_event};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use linkcable_netplay::{
    ChannelObserver, ClientConfig, ConnectionState, InputRejection, NetplayClient, NetplayError,
    NetplayEvent, NetplayObserver,
    test_support::{Applied, FakeCore},
};
use linkcable_netproto::{
    constants::PROTOCOL_VERSION,
    header::Header,
    messages::{
        room::{Join, ListKind, ListRooms, RoomInfo},
        session::{CoreFlags, DeleteCore},
        sync::{Event, EventKind, PushEvent, RollbackEnd, RollbackStart, SyncEvents},
    },
    msg_kind::MsgKind,
    packet::Packet,
};

fn connect(config: RelayConfig) -> (Relay, NetplayClient, Receiver<NetplayEvent>) {
    let relay = Relay::start(config);
    let (observer, events) = ChannelObserver::new();
    let client_config = ClientConfig {
        build_id: "deadbeef".to_string(),
        ..ClientConfig::default()
    };
    let client = NetplayClient::new(client_config, Arc::new(observer));
    client.connect("127.0.0.1", relay.port).unwrap();
    expect_event(&events, |e| *e == NetplayEvent::Connected);
    (relay, client, events)
}

/// Register and attach a core. Returns it with its assigned id.
fn attached_core(
    client: &NetplayClient,
    events: &Receiver<NetplayEvent>,
    frame: u32,
) -> (Arc<FakeCore>, u32) {
    let core = FakeCore::at_frame(frame);
    let nonce = client.register_core(core.clone()).unwrap();
    let NetplayEvent::CoreRegistered { info, .. } = expect_event(events, |e| {
        matches!(e, NetplayEvent::CoreRegistered { nonce: n, .. } if *n == nonce)
    }) else {
        unreachable!()
    };
    let core_id = client.attach_core(nonce).unwrap();
    assert_eq!(core_id, info.core_id);
    (core, core_id)
}

/// Register, attach and join a new room. Returns the core, its id and room.
fn joined_core(
    client: &NetplayClient,
    events: &Receiver<NetplayEvent>,
    frame: u32,
) -> (Arc<FakeCore>, u32, u32) {
    let (core, core_id) = attached_core(client, events, frame);
    client.join_room(0, core_id).unwrap();
    let NetplayEvent::RoomJoined { room_id, .. } = expect_event(events, |e| {
        matches!(e, NetplayEvent::RoomJoined { core_id: c, .. } if *c == core_id)
    }) else {
        unreachable!()
    };
    (core, core_id, room_id)
}

#[test]
fn connect_handshake_and_disconnect() {
    let (relay, client, events) = connect(RelayConfig::default());

    let Packet::Connect(hello) = relay.expect(|p| matches!(p, Packet::Connect(_))) else {
        unreachable!()
    };
    assert_eq!(hello.protocol_version, PROTOCOL_VERSION);
    assert_eq!(&hello.build_id[..4], &[0xde, 0xad, 0xbe, 0xef]);
    assert!(client.is_connected());
    assert!(matches!(
        client.connect("127.0.0.1", relay.port),
        Err(NetplayError::AlreadyConnected)
    ));

    client.disconnect().unwrap();
    relay.expect(|p| *p == Packet::Shutdown);
    expect_event(&events, |e| matches!(e, NetplayEvent::Disconnected { .. }));
    assert!(!client.is_connected());
}

#[test]
fn negative_ack_fails_connect() {
    let relay = Relay::start(RelayConfig {
        ack: -3,
        ..RelayConfig::default()
    });
    let (observer, events) = ChannelObserver::new();
    let client = NetplayClient::new(ClientConfig::default(), Arc::new(observer));

    assert!(matches!(
        client.connect("127.0.0.1", relay.port),
        Err(NetplayError::HandshakeRejected(-3))
    ));
    assert!(!client.is_connected());
    assert!(events.try_iter().all(|e| e != NetplayEvent::Connected));
}

#[test]
fn registration_moves_core_from_pending_to_attached() {
    let (relay, client, events) = connect(RelayConfig::default());
    let core = FakeCore::at_frame(600);

    let nonce = client.register_core(core.clone()).unwrap();
    core.set_frame(640);
    let Packet::RegisterCore(sent) = relay.expect(|p| matches!(p, Packet::RegisterCore(_))) else {
        unreachable!()
    };
    assert_eq!(sent.nonce, nonce);
    assert_eq!(sent.info.frame_offset, 600);
    assert_eq!(sent.info.game_title(), "LINK TEST");
    assert_eq!(sent.info.crc32, 0xC0FF_EE00);

    expect_event(&events, |e| {
        matches!(e, NetplayEvent::CoreRegistered { nonce: n, .. } if *n == nonce)
    });
    assert_eq!(client.pending_registrations(), 0);
    assert_eq!(client.core_ids(), vec![1]);
    let status = client.core_status(1).unwrap();
    assert_eq!(status.frame_offset, 600);
    assert!(!status.attached);

    assert_eq!(client.attach_core(nonce).unwrap(), 1);
    assert!(client.core_status(1).unwrap().attached);
    assert_eq!(core.hook_count(), 1);
    assert!(matches!(
        client.attach_core(nonce),
        Err(NetplayError::AlreadyAttached(1))
    ));
}

#[test]
fn input_reaches_the_core_at_its_tagged_frame() {
    let (relay, client, events) = connect(RelayConfig::default());
    let (core, core_id, _room) = joined_core(&client, &events, 1000);

    core.set_frame(1003);
    client.push_input(core_id, 0x55).unwrap();
    let Packet::Event(PushEvent { event }) = relay.expect(|p| matches!(p, Packet::Event(_))) else {
        unreachable!()
    };
    assert_eq!(event, Event::key_input(core_id, 0x55, 3));

    // The relay echoes the input back as Sync; a far-future event lets the
    // core thread return after applying it.
    relay.send(&Packet::Sync(SyncEvents {
        events: vec![Event {
            kind: EventKind::Frame,
            core_id,
            datum: 0,
            frame_id: 10_000,
        }],
    }));
    let done = core.run_frame_hooks_in_background();
    done.recv_timeout(WAIT).unwrap();

    assert_eq!(
        core.applied(),
        vec![Applied::Keys {
            frame: 1003,
            keys: 0x55
        }]
    );
}

#[test]
fn input_without_control_never_leaves_the_client() {
    let (relay, client, events) = connect(RelayConfig {
        flags: CoreFlags::ALLOW_OBSERVE,
        ..RelayConfig::default()
    });
    let (_core, core_id, _room) = joined_core(&client, &events, 0);

    client.push_input(core_id, 1).unwrap();
    expect_event(&events, |e| {
        *e == NetplayEvent::InputRejected {
            core_id,
            reason: InputRejection::NoControl,
        }
    });

    // Messages leave in order, so the List must be the next thing after Join.
    client.list_rooms(|_| {}).unwrap();
    relay.expect(|p| matches!(p, Packet::Join(_)));
    assert!(matches!(
        relay.seen.recv_timeout(WAIT).unwrap(),
        Packet::List(_)
    ));
}

#[test]
fn disconnect_releases_a_waiting_core() {
    let (_relay, client, events) = connect(RelayConfig::default());
    let (core, _core_id, _room) = joined_core(&client, &events, 0);

    let done = core.run_frame_hooks_in_background();
    assert!(done.recv_timeout(Duration::from_millis(50)).is_err());

    client.disconnect().unwrap();
    done.recv_timeout(WAIT).unwrap();
    assert!(core.applied().is_empty());
    assert_eq!(core.hook_count(), 0);
    assert!(client.core_ids().is_empty());
}

#[test]
fn server_shutdown_ends_the_session() {
    let (relay, client, events) = connect(RelayConfig::default());
    let (core, _core_id, _room) = joined_core(&client, &events, 0);
    let done = core.run_frame_hooks_in_background();

    relay.send(&Packet::Shutdown);
    expect_event(&events, |e| *e == NetplayEvent::ServerShutdown);
    expect_event(&events, |e| matches!(e, NetplayEvent::Disconnected { .. }));
    done.recv_timeout(WAIT).unwrap();
    assert!(!client.is_connected());
    assert!(client.core_ids().is_empty());
    client.disconnect().unwrap();
}

#[test]
fn malformed_messages_are_dropped() {
    let (relay, client, events) = connect(RelayConfig::default());

    let mut bytes = bytes::BytesMut::new();
    // Join declaring a 12-byte body.
    let mut bad_join = Header::new(MsgKind::Join);
    bad_join.body_size = 12;
    bytes.put_slice(&bad_join.to_bytes());
    bytes.put_slice(&[0u8; 12]);
    // Sync claiming three events but carrying one.
    let mut bad_sync = Header::new(MsgKind::Sync);
    bad_sync.body_size = 4 + 16;
    bytes.put_slice(&bad_sync.to_bytes());
    bytes.put_u32_le(3);
    bytes.put_slice(&[0u8; 16]);
    // Unknown kind.
    let unknown = Header {
        kind: 0x7777,
        body_size: 3,
        flags: 0,
    };
    bytes.put_slice(&unknown.to_bytes());
    bytes.put_slice(&[1, 2, 3]);
    relay.send_raw(bytes.freeze());

    relay.send(&Packet::Join(Join {
        room_id: 9,
        core_id: 4,
    }));
    expect_event(&events, |e| {
        *e == NetplayEvent::RoomJoined {
            room_id: 9,
            core_id: 4,
        }
    });
    assert!(client.is_connected());
}

#[test]
fn list_callbacks_fire_in_request_order() {
    let room = RoomInfo {
        room_id: 3,
        n_cores: 0,
        capacity: 2,
        flags: 0,
    };
    let (_relay, client, events) = connect(RelayConfig {
        rooms: vec![room],
        ..RelayConfig::default()
    });
    let (tx, rx) = unbounded();
    for tag in ["first", "second", "third"] {
        let tx = tx.clone();
        client
            .list_rooms(move |rooms| {
                tx.send((tag, rooms.to_vec())).unwrap();
            })
            .unwrap();
    }

    for tag in ["first", "second", "third"] {
        let (got, rooms) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(got, tag);
        assert_eq!(rooms, vec![room]);
    }
    expect_event(&events, |e| *e == NetplayEvent::RoomsListed(vec![room]));
}

#[test]
fn list_cores_reports_room_members() {
    let (relay, client, events) = connect(RelayConfig::default());
    let (_core, core_id, room_id) = joined_core(&client, &events, 0);

    let (tx, rx) = unbounded();
    client
        .list_cores(room_id, move |cores| {
            tx.send(cores.to_vec()).unwrap();
        })
        .unwrap();
    let Packet::List(list) = relay.expect(|p| matches!(p, Packet::List(_))) else {
        unreachable!()
    };
    assert_eq!(list.kind, ListKind::Cores);
    assert_eq!(list.parent, room_id);

    let cores = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(cores.len(), 1);
    assert_eq!(cores[0].core_id, core_id);
    assert_eq!(cores[0].game_code(), "AGB-LINK");
}

#[test]
fn join_first_room_prefers_a_room_with_space() {
    let full = RoomInfo {
        room_id: 1,
        n_cores: 2,
        capacity: 2,
        flags: 0,
    };
    let open = RoomInfo {
        room_id: 2,
        n_cores: 1,
        capacity: 4,
        flags: 0,
    };
    let (relay, client, events) = connect(RelayConfig {
        rooms: vec![full, open],
        ..RelayConfig::default()
    });
    let (_core, core_id) = attached_core(&client, &events, 0);

    assert_eq!(client.join_first_room(core_id).unwrap(), 2);
    relay.expect(|p| {
        *p == Packet::Join(Join {
            room_id: 2,
            core_id,
        })
    });
    expect_event(&events, |e| {
        *e == NetplayEvent::RoomJoined {
            room_id: 2,
            core_id,
        }
    });
    assert_eq!(client.core_status(core_id).unwrap().room_id, 2);
}

#[test]
fn rollback_suspends_and_resumes_input() {
    let (relay, client, events) = connect(RelayConfig::default());
    let (_core, core_id, _room) = joined_core(&client, &events, 0);

    relay.send(&Packet::RollbackStart(RollbackStart {
        core_ids: vec![core_id],
    }));
    expect_event(&events, |e| *e == NetplayEvent::RollbackStart(vec![core_id]));
    assert!(client.core_status(core_id).unwrap().suspended);

    client.push_input(core_id, 2).unwrap();
    expect_event(&events, |e| {
        *e == NetplayEvent::InputRejected {
            core_id,
            reason: InputRejection::Suspended,
        }
    });

    relay.send(&Packet::RollbackEnd(RollbackEnd {
        core_ids: vec![core_id],
    }));
    expect_event(&events, |e| *e == NetplayEvent::RollbackEnd(vec![core_id]));
    client.push_input(core_id, 3).unwrap();
    let Packet::Event(PushEvent { event }) = relay.expect(|p| matches!(p, Packet::Event(_))) else {
        unreachable!()
    };
    assert_eq!(event.datum, 3);
}

#[test]
fn clone_and_delete_core() {
    let (relay, client, events) = connect(RelayConfig::default());
    let (_source, source_id) = attached_core(&client, &events, 0);

    let clone = FakeCore::at_frame(50);
    let nonce = client
        .clone_core(source_id, clone.clone(), CoreFlags::ALLOW_OBSERVE)
        .unwrap();
    let Packet::CloneCore(sent) = relay.expect(|p| matches!(p, Packet::CloneCore(_))) else {
        unreachable!()
    };
    assert_eq!(sent.core_id, source_id);
    assert_eq!(sent.nonce, nonce);

    expect_event(&events, |e| {
        matches!(e, NetplayEvent::CoreRegistered { nonce: n, .. } if *n == nonce)
    });
    let clone_id = client.attach_core(nonce).unwrap();
    let status = client.core_status(clone_id).unwrap();
    assert_eq!(status.flags, CoreFlags::ALLOW_OBSERVE);
    assert_eq!(status.frame_offset, 50);
    assert_eq!(clone.hook_count(), 1);

    client.delete_core(clone_id).unwrap();
    relay.expect(|p| *p == Packet::DeleteCore(DeleteCore { core_id: clone_id }));
    assert_eq!(clone.hook_count(), 0);
    assert_eq!(client.core_ids(), vec![source_id]);
}

#[test]
fn reused_core_id_releases_the_displaced_core() {
    let (_relay, client, events) = connect(RelayConfig {
        fixed_core_id: Some(7),
        ..RelayConfig::default()
    });
    let (first, first_id, _room) = joined_core(&client, &events, 0);
    let waiting = first.run_frame_hooks_in_background();
    assert!(waiting.recv_timeout(Duration::from_millis(50)).is_err());

    let (second, second_id) = attached_core(&client, &events, 0);
    assert_eq!((first_id, second_id), (7, 7));
    waiting.recv_timeout(WAIT).unwrap();
    assert_eq!(first.hook_count(), 0);
    assert_eq!(second.hook_count(), 1);
    assert_eq!(client.core_ids(), vec![7]);

    client.disconnect().unwrap();
    assert_eq!(second.hook_count(), 0);
}

/// Calls back into the client from `connected`.
struct ReentrantObserver {
    client: OnceLock<Weak<NetplayClient>>,
    seen: Sender<(ConnectionState, Vec<u32>)>,
}

impl NetplayObserver for ReentrantObserver {
    fn connected(&self) {
        if let Some(client) = self.client.get().and_then(Weak::upgrade) {
            let _ = self.seen.send((client.state(), client.core_ids()));
        }
    }
}

#[test]
fn observer_may_call_the_client_while_connecting() {
    let relay = Relay::start(RelayConfig::default());
    let (seen_tx, seen) = unbounded();
    let observer = Arc::new(ReentrantObserver {
        client: OnceLock::new(),
        seen: seen_tx,
    });
    let client = Arc::new(NetplayClient::new(ClientConfig::default(), observer.clone()));
    let _ = observer.client.set(Arc::downgrade(&client));

    let (done_tx, done) = bounded(1);
    {
        let client = client.clone();
        let port = relay.port;
        thread::spawn(move || {
            let _ = done_tx.send(client.connect("127.0.0.1", port).is_ok());
        });
    }

    assert!(done.recv_timeout(WAIT).unwrap());
    let (state, cores) = seen.recv_timeout(WAIT).unwrap();
    assert!(matches!(
        state,
        ConnectionState::Connecting | ConnectionState::Connected
    ));
    assert!(cores.is_empty());
    assert_eq!(client.state(), ConnectionState::Connected);

    client.disconnect().unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[test]
fn callback_may_disconnect_the_client() {
    let (relay, client, events) = connect(RelayConfig::default());
    let client = Arc::new(client);
    let (result_tx, result) = bounded(1);
    {
        let inner = client.clone();
        client
            .list_rooms(move |_| {
                let _ = result_tx.send(inner.disconnect().is_ok());
            })
            .unwrap();
    }

    assert!(result.recv_timeout(WAIT).unwrap());
    relay.expect(|p| *p == Packet::Shutdown);
    expect_event(&events, |e| matches!(e, NetplayEvent::Disconnected { .. }));
    assert!(!client.is_connected());
}

#[test]
fn callback_may_send_while_the_outbound_queue_is_full() {
    let relay = Relay::start(RelayConfig::default());
    let (observer, _events) = ChannelObserver::new();
    let config = ClientConfig {
        queue_capacity: 0,
        ..ClientConfig::default()
    };
    let client = Arc::new(NetplayClient::new(config, Arc::new(observer)));
    client.connect("127.0.0.1", relay.port).unwrap();
    relay.pause_reading();

    let (joined_tx, joined) = bounded(1);
    {
        let inner = client.clone();
        client
            .list_rooms(move |_| {
                let _ = joined_tx.send(inner.join_room(0, 77).is_ok());
            })
            .unwrap();
    }

    // Keep sending until the socket and the queue are both full.
    let sent = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));
    let flood = {
        let (client, sent, stop) = (client.clone(), sent.clone(), stop.clone());
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) && client.join_room(1, 1).is_ok() {
                sent.fetch_add(1, Ordering::SeqCst);
            }
        })
    };
    let deadline = Instant::now() + Duration::from_secs(60);
    let mut stalled_at = usize::MAX;
    loop {
        thread::sleep(Duration::from_millis(200));
        let now = sent.load(Ordering::SeqCst);
        if now == stalled_at {
            break;
        }
        assert!(Instant::now() < deadline, "sender never stalled");
        stalled_at = now;
    }

    // The callback fires while nothing can be enqueued.
    relay.send(&Packet::ListRooms(ListRooms::default()));
    assert!(joined.recv_timeout(Duration::from_millis(100)).is_err());

    relay.resume_reading();
    assert!(joined.recv_timeout(WAIT).unwrap());
    stop.store(true, Ordering::SeqCst);
    flood.join().unwrap();
    assert!(sent.load(Ordering::SeqCst) > stalled_at);
    relay.expect(|p| {
        *p == Packet::Join(Join {
            room_id: 0,
            core_id: 77,
        })
    });
}
