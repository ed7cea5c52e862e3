//! Shared session state: the core registry, outstanding list requests and
//! the handle to the outbound queue.
//!
//! Caller threads use the request methods; the connection worker feeds
//! every decoded packet to [`Session::handle_packet`].

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use linkcable_netproto::{
    messages::{
        Message,
        room::{Join, List, ListKind, RoomInfo},
        session::{CloneCore, CoreFlags, CoreInfo, DeleteCore, RegisterCore},
        sync::{Event, PushEvent},
    },
    packet::Packet,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    dispatch::Notifier,
    engine::{CoreHooks, EmulatedCore, Interrupted},
    error::NetplayError,
    observer::{InputRejection, NetplayObserver},
    outbound::OutboundQueue,
    registry::{Acknowledged, CoreEntry, CoreState, Registry, snapshot},
};

/// Called with the next room listing. Runs on the dispatch thread.
pub type RoomsCallback = Box<dyn FnOnce(&[RoomInfo]) + Send>;

/// Called with the next core listing for the requested room. Runs on the
/// dispatch thread.
pub type CoresCallback = Box<dyn FnOnce(&[CoreInfo]) + Send>;

/// Whether the worker keeps running after a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Point-in-time view of one core known to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreStatus {
    pub core_id: u32,
    pub room_id: u32,
    pub frame_offset: u32,
    pub flags: CoreFlags,
    pub attached: bool,
    pub suspended: bool,
}

/// Responses carry no request id, so they are matched by arrival order:
/// one FIFO for rooms and one FIFO per parent room for cores.
#[derive(Default)]
struct ListRequests {
    rooms: VecDeque<RoomsWaiter>,
    cores: HashMap<u32, VecDeque<CoresCallback>>,
}

enum RoomsWaiter {
    Callback(RoomsCallback),
    /// `join_first_room` waiting for the room to join. Answered on the
    /// worker; the send never blocks.
    FirstOpen(Sender<u32>),
}

pub struct Session {
    registry: Mutex<Registry>,
    lists: Mutex<ListRequests>,
    outbound: Mutex<Option<Arc<OutboundQueue>>>,
    /// Where notifications run while connected. Without one they run inline.
    notifier: Mutex<Option<Notifier>>,
    observer: Arc<dyn NetplayObserver>,
}

impl Session {
    pub fn new(observer: Arc<dyn NetplayObserver>) -> Self {
        Self {
            registry: Mutex::new(Registry::new()),
            lists: Mutex::new(ListRequests::default()),
            outbound: Mutex::new(None),
            notifier: Mutex::new(None),
            observer,
        }
    }

    pub fn observer(&self) -> &Arc<dyn NetplayObserver> {
        &self.observer
    }

    pub(crate) fn set_outbound(&self, queue: Option<Arc<OutboundQueue>>) {
        *self.outbound.lock() = queue;
    }

    pub(crate) fn set_notifier(&self, notifier: Option<Notifier>) {
        *self.notifier.lock() = notifier;
    }

    /// Run `job` on the dispatch thread, or right away when there is none.
    fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        let notifier = self.notifier.lock().clone();
        match notifier {
            Some(notifier) => notifier.post(job),
            None => job(),
        }
    }

    fn notify(&self, event: impl FnOnce(&dyn NetplayObserver) + Send + 'static) {
        let observer = self.observer.clone();
        self.dispatch(move || event(observer.as_ref()));
    }

    pub fn is_connected(&self) -> bool {
        self.outbound
            .lock()
            .as_ref()
            .is_some_and(|queue| !queue.is_closed())
    }

    fn queue(&self) -> Result<Arc<OutboundQueue>, NetplayError> {
        self.outbound
            .lock()
            .clone()
            .ok_or(NetplayError::NotConnected)
    }

    /// Enqueue a message. May block while the outbound queue is full.
    pub fn send<T: Message>(&self, msg: &T) -> Result<(), NetplayError> {
        // Never hold the handle lock while blocked on capacity.
        let queue = self.queue()?;
        queue.enqueue_message(msg)
    }

    // ---- Requests (any thread) ----

    /// Announce a local core to the relay. Returns the nonce the relay will
    /// echo back with the assigned core id.
    pub fn register_core(&self, core: Arc<dyn EmulatedCore>) -> Result<u32, NetplayError> {
        let queue = self.queue()?;
        let info = snapshot(core.as_ref());
        let nonce = self.insert_pending(core, info.clone());

        if let Err(e) = queue.enqueue_message(&RegisterCore { info, nonce }) {
            self.registry.lock().remove_pending(nonce);
            return Err(e);
        }
        info!(nonce, "core registration sent");
        Ok(nonce)
    }

    /// Ask the relay to give `core` a slot cloned from `source_core_id`.
    /// The answer arrives as a registration echo for the returned nonce.
    pub fn clone_core(
        &self,
        source_core_id: u32,
        core: Arc<dyn EmulatedCore>,
        flags: CoreFlags,
    ) -> Result<u32, NetplayError> {
        let queue = self.queue()?;
        let info = snapshot(core.as_ref());
        let nonce = self.insert_pending(core, info);

        let msg = CloneCore {
            core_id: source_core_id,
            flags,
            nonce,
        };
        if let Err(e) = queue.enqueue_message(&msg) {
            self.registry.lock().remove_pending(nonce);
            return Err(e);
        }
        info!(nonce, source_core_id, "core clone requested");
        Ok(nonce)
    }

    fn insert_pending(&self, core: Arc<dyn EmulatedCore>, info: CoreInfo) -> u32 {
        let mut registry = self.registry.lock();
        let nonce = registry.fresh_nonce();
        registry.insert_pending(nonce, core, info);
        nonce
    }

    /// Start delivering relay events to an acknowledged core. Returns its id.
    pub fn attach_core(&self, nonce: u32) -> Result<u32, NetplayError> {
        let sync = self.registry.lock().attach(nonce)?;
        let core = sync.core().clone();
        {
            let _paused = Interrupted::new(core.as_ref());
            core.install_hooks(sync.clone());
        }
        info!(nonce, core_id = sync.core_id(), "core attached");
        Ok(sync.core_id())
    }

    /// Forget a core locally and tell the relay to drop it.
    pub fn delete_core(&self, core_id: u32) -> Result<(), NetplayError> {
        let entry = self
            .registry
            .lock()
            .remove(core_id)
            .ok_or(NetplayError::UnknownCore(core_id))?;
        detach(entry);
        self.send(&DeleteCore { core_id })
    }

    /// Send local input for `core_id`, tagged with its relay frame.
    ///
    /// Input for a core that lacks control permission, is not in a room or
    /// is suspended is not sent; the observer hears about it instead.
    pub fn push_input(&self, core_id: u32, keys: u32) -> Result<(), NetplayError> {
        let Some(sync) = self.registry.lock().attached(core_id) else {
            return self.reject_input(core_id, InputRejection::UnknownCore);
        };
        if !sync.flags().contains(CoreFlags::ALLOW_CONTROL) {
            return self.reject_input(core_id, InputRejection::NoControl);
        }
        if sync.room_id() == 0 {
            return self.reject_input(core_id, InputRejection::NotInRoom);
        }
        if sync.is_suspended() {
            return self.reject_input(core_id, InputRejection::Suspended);
        }

        let frame_id = sync.current_frame();
        debug!(core_id, keys, frame_id, "pushing input");
        self.send(&PushEvent {
            event: Event::key_input(core_id, keys, frame_id),
        })
    }

    fn reject_input(&self, core_id: u32, reason: InputRejection) -> Result<(), NetplayError> {
        debug!(core_id, ?reason, "input rejected");
        self.observer.input_rejected(core_id, reason);
        Ok(())
    }

    /// Ask to join `room_id` (0 asks the relay for a new room).
    pub fn join_room(&self, room_id: u32, core_id: u32) -> Result<(), NetplayError> {
        self.send(&Join { room_id, core_id })
    }

    pub fn list_rooms(&self, callback: RoomsCallback) -> Result<(), NetplayError> {
        self.request_rooms(RoomsWaiter::Callback(callback))
    }

    fn request_rooms(&self, waiter: RoomsWaiter) -> Result<(), NetplayError> {
        let queue = self.queue()?;
        self.lists.lock().rooms.push_back(waiter);
        let sent = queue.enqueue_message(&List {
            kind: ListKind::Rooms,
            parent: 0,
        });
        if sent.is_err() {
            self.lists.lock().rooms.pop_back();
        }
        sent
    }

    pub fn list_cores(&self, room_id: u32, callback: CoresCallback) -> Result<(), NetplayError> {
        let queue = self.queue()?;
        self.lists
            .lock()
            .cores
            .entry(room_id)
            .or_default()
            .push_back(callback);
        let sent = queue.enqueue_message(&List {
            kind: ListKind::Cores,
            parent: room_id,
        });
        if sent.is_err() {
            if let Some(waiting) = self.lists.lock().cores.get_mut(&room_id) {
                waiting.pop_back();
            }
        }
        sent
    }

    /// List rooms, then join the first one with space, or a new room if
    /// none has any. Blocks the caller until the listing arrives. Returns the
    /// room id that was requested.
    pub fn join_first_room(&self, core_id: u32, timeout: Duration) -> Result<u32, NetplayError> {
        let (tx, rx) = bounded(1);
        self.request_rooms(RoomsWaiter::FirstOpen(tx))?;

        let room_id = match rx.recv_timeout(timeout) {
            Ok(room_id) => room_id,
            Err(RecvTimeoutError::Timeout) => return Err(NetplayError::Timeout("room list")),
            Err(RecvTimeoutError::Disconnected) => return Err(NetplayError::NotConnected),
        };
        self.join_room(room_id, core_id)?;
        Ok(room_id)
    }

    // ---- Inspection ----

    pub fn pending_registrations(&self) -> usize {
        self.registry.lock().pending_len()
    }

    pub fn core_ids(&self) -> Vec<u32> {
        self.registry.lock().core_ids()
    }

    pub fn core_status(&self, core_id: u32) -> Option<CoreStatus> {
        let registry = self.registry.lock();
        let entry = registry.get(core_id)?;
        Some(CoreStatus {
            core_id,
            room_id: entry.sync.room_id(),
            frame_offset: entry.sync.frame_offset(),
            flags: entry.sync.flags(),
            attached: entry.state == CoreState::Attached,
            suspended: entry.sync.is_suspended(),
        })
    }

    // ---- Inbound (worker thread, must not block) ----

    pub fn handle_packet(&self, packet: Packet) -> Flow {
        match packet {
            Packet::Shutdown => {
                info!("server shut down");
                self.notify(|observer| observer.server_shutdown());
                return Flow::Stop;
            }
            Packet::Sync(sync) => {
                let routed: Vec<_> = {
                    let registry = self.registry.lock();
                    sync.events
                        .into_iter()
                        .filter_map(|event| match registry.attached(event.core_id) {
                            Some(core) => Some((core, event)),
                            None => {
                                debug!(core_id = event.core_id, "event for unknown core dropped");
                                None
                            }
                        })
                        .collect()
                };
                for (core, event) in routed {
                    core.push_event(event);
                }
            }
            Packet::Join(join) => {
                if let Some(core) = self.registry.lock().sync(join.core_id) {
                    core.set_room(join.room_id);
                }
                info!(room_id = join.room_id, core_id = join.core_id, "joined room");
                self.notify(move |observer| observer.room_joined(join.room_id, join.core_id));
            }
            Packet::RegisterCore(reg) => self.on_register_ack(reg),
            Packet::ListRooms(list) => {
                let rooms = list.rooms;
                let waiter = self.lists.lock().rooms.pop_front();
                match waiter {
                    Some(RoomsWaiter::FirstOpen(reply)) => {
                        let _ = reply.send(first_open_room(&rooms));
                    }
                    Some(RoomsWaiter::Callback(callback)) => {
                        let rooms = rooms.clone();
                        self.dispatch(move || callback(&rooms));
                    }
                    None => {}
                }
                self.notify(move |observer| observer.rooms_listed(&rooms));
            }
            Packet::ListCores(list) => {
                let callback = {
                    let mut lists = self.lists.lock();
                    let callback = lists
                        .cores
                        .get_mut(&list.parent)
                        .and_then(VecDeque::pop_front);
                    if lists.cores.get(&list.parent).is_some_and(VecDeque::is_empty) {
                        lists.cores.remove(&list.parent);
                    }
                    callback
                };
                if let Some(callback) = callback {
                    let cores = list.cores.clone();
                    self.dispatch(move || callback(&cores));
                }
                self.notify(move |observer| observer.cores_listed(&list.cores, list.parent));
            }
            Packet::RollbackStart(rollback) => {
                self.set_suspended(&rollback.core_ids, true);
                self.notify(move |observer| observer.rollback_start(&rollback.core_ids));
            }
            Packet::RollbackEnd(rollback) => {
                self.set_suspended(&rollback.core_ids, false);
                self.notify(move |observer| observer.rollback_end(&rollback.core_ids));
            }
            other => {
                debug!(kind = ?other.msg_kind(), "ignoring message not meant for clients");
            }
        }
        Flow::Continue
    }

    fn on_register_ack(&self, reg: RegisterCore) {
        let acknowledged = self.registry.lock().acknowledge(reg.nonce, &reg.info);
        match acknowledged {
            Ok(Acknowledged { sync, displaced }) => {
                if let Some(previous) = displaced {
                    warn!(
                        core_id = sync.core_id(),
                        previous_nonce = previous.nonce,
                        "core id reused, releasing the core that held it"
                    );
                    detach(previous);
                }
                let mut info = reg.info;
                info.flags = sync.flags();
                info.frame_offset = sync.frame_offset();
                info!(nonce = reg.nonce, core_id = info.core_id, "core registered");
                let nonce = reg.nonce;
                self.notify(move |observer| observer.core_registered(&info, nonce));
            }
            Err(e) => debug!("registration echo ignored: {e}"),
        }
    }

    fn set_suspended(&self, core_ids: &[u32], suspended: bool) {
        let registry = self.registry.lock();
        for id in core_ids {
            match registry.sync(*id) {
                Some(core) => core.set_suspended(suspended),
                None => debug!(core_id = id, "rollback for unknown core"),
            }
        }
    }

    /// Drop the queue handle, forget every core and release every waiting
    /// core thread. Outstanding list callbacks are dropped uncalled.
    pub fn release_all(&self) {
        self.set_outbound(None);
        self.set_notifier(None);
        let entries = self.registry.lock().clear();
        if !entries.is_empty() {
            info!(count = entries.len(), "releasing cores");
        }
        for entry in entries {
            detach(entry);
        }
        let mut lists = self.lists.lock();
        lists.rooms.clear();
        lists.cores.clear();
    }
}

/// Room to join when the caller has no preference.
pub fn first_open_room(rooms: &[RoomInfo]) -> u32 {
    rooms
        .iter()
        .find(|room| room.has_space())
        .map_or(0, |room| room.room_id)
}

fn detach(entry: CoreEntry) {
    entry.sync.release();
    if entry.state == CoreState::Attached {
        let core = entry.sync.core().clone();
        let hooks: Arc<dyn CoreHooks> = entry.sync.clone();
        let _paused = Interrupted::new(core.as_ref());
        core.remove_hooks(&hooks);
    }
}
