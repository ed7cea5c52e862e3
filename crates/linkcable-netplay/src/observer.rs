//! Session notifications.
//!
//! An observer is passed to [`crate::NetplayClient::new`]. Every method has an
//! empty default so implementors only override what they care about. Methods
//! run one at a time, in arrival order, on the client's dispatch thread and
//! may call back into the client. `input_rejected` is the exception: it runs
//! on the thread that pushed the input.

use crossbeam_channel::{Receiver, Sender, unbounded};
use linkcable_netproto::messages::{room::RoomInfo, session::CoreInfo};

/// Why a `push_input` call produced no outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRejection {
    /// The core is not attached to this session.
    UnknownCore,
    /// The relay did not grant control permission.
    NoControl,
    /// The core has not joined a room yet.
    NotInRoom,
    /// A rollback is in progress for this core.
    Suspended,
}

pub trait NetplayObserver: Send + Sync {
    /// The relay accepted the connection.
    fn connected(&self) {}

    /// The relay sent Shutdown.
    fn server_shutdown(&self) {}

    /// The connection worker stopped. Called once per connection.
    fn disconnected(&self, _reason: &str) {}

    /// The relay assigned an id to a registration made with `nonce`.
    fn core_registered(&self, _info: &CoreInfo, _nonce: u32) {}

    fn room_joined(&self, _room_id: u32, _core_id: u32) {}

    fn rooms_listed(&self, _rooms: &[RoomInfo]) {}

    fn cores_listed(&self, _cores: &[CoreInfo], _room_id: u32) {}

    /// The named cores are suspended. State correction, if any, belongs to
    /// the emulation engine and should start here.
    fn rollback_start(&self, _core_ids: &[u32]) {}

    /// The named cores resumed.
    fn rollback_end(&self, _core_ids: &[u32]) {}

    fn input_rejected(&self, _core_id: u32, _reason: InputRejection) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl NetplayObserver for NoopObserver {}

/// Owned form of every observer notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetplayEvent {
    Connected,
    ServerShutdown,
    Disconnected { reason: String },
    CoreRegistered { info: CoreInfo, nonce: u32 },
    RoomJoined { room_id: u32, core_id: u32 },
    RoomsListed(Vec<RoomInfo>),
    CoresListed { cores: Vec<CoreInfo>, room_id: u32 },
    RollbackStart(Vec<u32>),
    RollbackEnd(Vec<u32>),
    InputRejected { core_id: u32, reason: InputRejection },
}

/// Observer that forwards every notification into a channel, for UIs that
/// poll from their own thread.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: Sender<NetplayEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, Receiver<NetplayEvent>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    fn emit(&self, event: NetplayEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(event);
    }
}

impl NetplayObserver for ChannelObserver {
    fn connected(&self) {
        self.emit(NetplayEvent::Connected);
    }

    fn server_shutdown(&self) {
        self.emit(NetplayEvent::ServerShutdown);
    }

    fn disconnected(&self, reason: &str) {
        self.emit(NetplayEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    fn core_registered(&self, info: &CoreInfo, nonce: u32) {
        self.emit(NetplayEvent::CoreRegistered {
            info: info.clone(),
            nonce,
        });
    }

    fn room_joined(&self, room_id: u32, core_id: u32) {
        self.emit(NetplayEvent::RoomJoined { room_id, core_id });
    }

    fn rooms_listed(&self, rooms: &[RoomInfo]) {
        self.emit(NetplayEvent::RoomsListed(rooms.to_vec()));
    }

    fn cores_listed(&self, cores: &[CoreInfo], room_id: u32) {
        self.emit(NetplayEvent::CoresListed {
            cores: cores.to_vec(),
            room_id,
        });
    }

    fn rollback_start(&self, core_ids: &[u32]) {
        self.emit(NetplayEvent::RollbackStart(core_ids.to_vec()));
    }

    fn rollback_end(&self, core_ids: &[u32]) {
        self.emit(NetplayEvent::RollbackEnd(core_ids.to_vec()));
    }

    fn input_rejected(&self, core_id: u32, reason: InputRejection) {
        self.emit(NetplayEvent::InputRejected { core_id, reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_observer_forwards_in_order() {
        let (observer, rx) = ChannelObserver::new();
        observer.connected();
        observer.room_joined(4, 9);
        observer.rollback_start(&[9]);

        assert_eq!(rx.try_recv().unwrap(), NetplayEvent::Connected);
        assert_eq!(
            rx.try_recv().unwrap(),
            NetplayEvent::RoomJoined {
                room_id: 4,
                core_id: 9
            }
        );
        assert_eq!(rx.try_recv().unwrap(), NetplayEvent::RollbackStart(vec![9]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_observer_survives_dropped_receiver() {
        let (observer, rx) = ChannelObserver::new();
        drop(rx);
        observer.server_shutdown();
    }
}
