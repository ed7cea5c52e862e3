#![allow(dead_code)]

use std::{thread, time::Duration};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender, unbounded};
use linkcable_netplay::{
    NetplayEvent,
    transport::{FrameReader, FrameWriter},
};
use linkcable_netproto::{
    codec::encode_message,
    messages::{
        room::{Join, ListCores, ListKind, ListRooms, RoomInfo},
        session::{Ack, CoreFlags, CoreInfo, RegisterCore},
        sync::{PushEvent, SyncEvents},
    },
    packet::Packet,
};
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
};

pub const WAIT: Duration = Duration::from_secs(5);

// ---- Fake relay ----

#[derive(Clone)]
pub struct RelayConfig {
    /// Reply sent in Ack.
    pub ack: i32,
    /// Flags echoed in registration replies.
    pub flags: CoreFlags,
    pub rooms: Vec<RoomInfo>,
    /// Assign this id to every registration instead of counting up.
    pub fixed_core_id: Option<u32>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ack: 0,
            flags: CoreFlags::empty(),
            rooms: Vec::new(),
            fixed_core_id: None,
        }
    }
}

/// A relay that serves a single client on a background thread.
pub struct Relay {
    pub port: u16,
    /// Every packet the relay decoded, in arrival order.
    pub seen: Receiver<Packet>,
    inject: mpsc::UnboundedSender<Bytes>,
    reading: watch::Sender<bool>,
}

impl Relay {
    pub fn start(config: RelayConfig) -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen_tx, seen) = unbounded();
        let (inject, inject_rx) = mpsc::unbounded_channel();
        let (reading, reading_rx) = watch::channel(true);

        thread::Builder::new()
            .name("fake-relay".into())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                runtime.block_on(serve(listener, config, seen_tx, inject_rx, reading_rx));
            })
            .unwrap();

        Self {
            port,
            seen,
            inject,
            reading,
        }
    }

    /// Stop reading from the socket, so the client's writes back up.
    pub fn pause_reading(&self) {
        self.reading.send_replace(false);
    }

    pub fn resume_reading(&self) {
        self.reading.send_replace(true);
    }

    /// Write a message to the client.
    pub fn send(&self, packet: &Packet) {
        self.send_raw(packet.encode().unwrap().to_bytes());
    }

    /// Write bytes to the client as they are.
    pub fn send_raw(&self, bytes: impl Into<Bytes>) {
        self.inject.send(bytes.into()).unwrap();
    }

    /// Wait for the first packet matching `pred`, skipping others.
    pub fn expect(&self, mut pred: impl FnMut(&Packet) -> bool) -> Packet {
        loop {
            let packet = self
                .seen
                .recv_timeout(WAIT)
                .expect("relay saw nothing in time");
            if pred(&packet) {
                return packet;
            }
        }
    }
}

async fn serve(
    listener: std::net::TcpListener,
    config: RelayConfig,
    seen: Sender<Packet>,
    mut inject: mpsc::UnboundedReceiver<Bytes>,
    mut reading: watch::Receiver<bool>,
) {
    let listener = TcpListener::from_std(listener).unwrap();
    let Ok((stream, _)) = listener.accept().await else {
        return;
    };
    let (read, write) = stream.into_split();
    let mut reader = FrameReader::new(read);
    let mut writer = FrameWriter::new(write);

    let Ok(hello) = reader.receive_frame().await else {
        return;
    };
    if let Ok(packet) = Packet::decode(&hello.header, &hello.body) {
        let _ = seen.send(packet);
    }
    let ack = encode_message(&Ack { reply: config.ack }).unwrap();
    if writer.send_frame(&ack).await.is_err() || config.ack < 0 {
        writer.shutdown().await;
        return;
    }

    // Read on a separate task so that injected writes never cut a frame in half.
    let (packets_tx, mut packets) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            while !*reading.borrow_and_update() {
                if reading.changed().await.is_err() {
                    return;
                }
            }
            let Ok(frame) = reader.receive_frame().await else {
                break;
            };
            if let Ok(packet) = Packet::decode(&frame.header, &frame.body) {
                if packets_tx.send(packet).is_err() {
                    break;
                }
            }
        }
    });

    let mut state = RelayState::new(config);
    loop {
        tokio::select! {
            packet = packets.recv() => {
                let Some(packet) = packet else { break };
                let _ = seen.send(packet.clone());
                let stop = packet == Packet::Shutdown;
                for reply in state.respond(packet) {
                    if writer.send_frame(&reply.encode().unwrap()).await.is_err() {
                        return;
                    }
                }
                if stop {
                    break;
                }
            }
            bytes = inject.recv() => {
                let Some(bytes) = bytes else { break };
                if writer.write_raw(&bytes).await.is_err() {
                    return;
                }
            }
        }
    }
    writer.shutdown().await;
}

struct RelayState {
    config: RelayConfig,
    next_core: u32,
    next_room: u32,
    cores: Vec<CoreInfo>,
}

impl RelayState {
    fn new(config: RelayConfig) -> Self {
        let next_room = config.rooms.iter().map(|r| r.room_id).max().unwrap_or(0) + 1;
        Self {
            config,
            next_core: 1,
            next_room,
            cores: Vec::new(),
        }
    }

    fn respond(&mut self, packet: Packet) -> Vec<Packet> {
        match packet {
            Packet::RegisterCore(RegisterCore { mut info, nonce }) => {
                info.core_id = self.config.fixed_core_id.unwrap_or(self.next_core);
                info.flags = self.config.flags;
                self.next_core += 1;
                self.cores.push(info.clone());
                vec![Packet::RegisterCore(RegisterCore { info, nonce })]
            }
            Packet::CloneCore(clone) => {
                let mut info = self
                    .cores
                    .iter()
                    .find(|c| c.core_id == clone.core_id)
                    .cloned()
                    .unwrap_or_default();
                info.core_id = self.next_core;
                info.room_id = 0;
                info.flags = clone.flags;
                self.next_core += 1;
                self.cores.push(info.clone());
                vec![Packet::RegisterCore(RegisterCore {
                    info,
                    nonce: clone.nonce,
                })]
            }
            Packet::Join(Join { room_id, core_id }) => {
                let room_id = if room_id == 0 {
                    let id = self.next_room;
                    self.next_room += 1;
                    self.config.rooms.push(RoomInfo {
                        room_id: id,
                        n_cores: 0,
                        capacity: 2,
                        flags: 0,
                    });
                    id
                } else {
                    room_id
                };
                if let Some(room) = self.config.rooms.iter_mut().find(|r| r.room_id == room_id) {
                    room.n_cores += 1;
                }
                if let Some(core) = self.cores.iter_mut().find(|c| c.core_id == core_id) {
                    core.room_id = room_id;
                }
                vec![Packet::Join(Join { room_id, core_id })]
            }
            Packet::List(list) => match list.kind {
                ListKind::Rooms => vec![Packet::ListRooms(ListRooms {
                    rooms: self.config.rooms.clone(),
                })],
                ListKind::Cores => vec![Packet::ListCores(ListCores {
                    parent: list.parent,
                    cores: self
                        .cores
                        .iter()
                        .filter(|c| c.room_id == list.parent)
                        .cloned()
                        .collect(),
                })],
            },
            Packet::Event(PushEvent { event }) => {
                vec![Packet::Sync(SyncEvents {
                    events: vec![event],
                })]
            }
            Packet::DeleteCore(delete) => {
                self.cores.retain(|c| c.core_id != delete.core_id);
                Vec::new()
            }
            _ => Vec::new(),
        }
    }
}

// ---- Observer helpers ----

/// Wait for the first event matching `pred`, skipping others.
pub fn expect_event(
    events: &Receiver<NetplayEvent>,
    mut pred: impl FnMut(&NetplayEvent) -> bool,
) -> NetplayEvent {
    loop {
        let event = events
            .recv_timeout(WAIT)
            .expect("observer heard nothing in time");
        if pred(&event) {
            return event;
        }
    }
}
