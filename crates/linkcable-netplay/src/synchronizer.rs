//! Frame-gated event delivery for one attached core.
//!
//! The connection worker appends relay events in arrival order. The core's
//! own thread consumes them from its frame and reset hooks: every event whose
//! frame is due is applied in FIFO order, a head event from the future makes
//! the poll return, and an empty queue parks the core thread until the
//! worker delivers more or the session lets go of the core.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use linkcable_netproto::messages::{
    session::CoreFlags,
    sync::{Event, EventKind},
};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::engine::{CoreHooks, EmulatedCore};

/// How a poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The core has not joined a room; nothing was looked at.
    NotInRoom,
    /// A rollback is in progress; nothing was applied.
    Suspended,
    /// Due events (if any) were applied and the next one is in the future.
    Ahead,
    /// The session released this core while it was waiting.
    Released,
}

#[derive(Default)]
struct EventQueue {
    events: VecDeque<Event>,
    released: bool,
}

pub struct CoreSync {
    core_id: u32,
    core: Arc<dyn EmulatedCore>,
    frame_offset: u32,
    room_id: AtomicU32,
    flags: AtomicU32,
    suspended: AtomicBool,
    queue: Mutex<EventQueue>,
    arrived: Condvar,
}

impl CoreSync {
    pub fn new(
        core_id: u32,
        core: Arc<dyn EmulatedCore>,
        frame_offset: u32,
        flags: CoreFlags,
    ) -> Self {
        Self {
            core_id,
            core,
            frame_offset,
            room_id: AtomicU32::new(0),
            flags: AtomicU32::new(flags.bits()),
            suspended: AtomicBool::new(false),
            queue: Mutex::new(EventQueue::default()),
            arrived: Condvar::new(),
        }
    }

    pub fn core_id(&self) -> u32 {
        self.core_id
    }

    pub fn core(&self) -> &Arc<dyn EmulatedCore> {
        &self.core
    }

    pub fn frame_offset(&self) -> u32 {
        self.frame_offset
    }

    pub fn room_id(&self) -> u32 {
        self.room_id.load(Ordering::Acquire)
    }

    pub fn set_room(&self, room_id: u32) {
        self.room_id.store(room_id, Ordering::Release);
    }

    pub fn flags(&self) -> CoreFlags {
        CoreFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    /// Enter or leave a rollback. Entering also wakes a parked core thread.
    pub fn set_suspended(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::Release);
        if suspended {
            let _queue = self.queue.lock();
            self.arrived.notify_all();
        }
    }

    /// Local frame translated into relay frame numbering.
    pub fn current_frame(&self) -> u32 {
        self.core.frame_counter().wrapping_sub(self.frame_offset)
    }

    pub fn pending_events(&self) -> usize {
        self.queue.lock().events.len()
    }

    /// Append a relay event. Called by the connection worker only.
    pub fn push_event(&self, event: Event) {
        let mut queue = self.queue.lock();
        if queue.released {
            return;
        }
        queue.events.push_back(event);
        drop(queue);
        self.arrived.notify_one();
    }

    /// Wake any parked core thread for good and drop pending events.
    pub fn release(&self) {
        let mut queue = self.queue.lock();
        queue.released = true;
        queue.events.clear();
        drop(queue);
        self.arrived.notify_all();
        debug!(core_id = self.core_id, "core released");
    }

    /// Apply every due event, then return or park. Runs on the core thread.
    pub fn poll(&self) -> PollOutcome {
        if self.room_id() == 0 {
            return PollOutcome::NotInRoom;
        }

        loop {
            let mut queue = self.queue.lock();
            if queue.released {
                return PollOutcome::Released;
            }
            if self.is_suspended() {
                return PollOutcome::Suspended;
            }

            let current = self.current_frame();
            match queue.events.front() {
                Some(head) if head.frame_id > current => return PollOutcome::Ahead,
                Some(_) => {
                    // Pop before applying so a hook re-entered by `reset`
                    // never sees the same event again.
                    let Some(event) = queue.events.pop_front() else {
                        continue;
                    };
                    drop(queue);
                    self.apply(&event);
                }
                None => {
                    trace!(core_id = self.core_id, frame = current, "waiting for events");
                    self.arrived.wait(&mut queue);
                }
            }
        }
    }

    fn apply(&self, event: &Event) {
        trace!(
            core_id = self.core_id,
            kind = ?event.kind,
            frame_id = event.frame_id,
            "applying event"
        );
        match event.kind {
            EventKind::KeyInput => self.core.set_keys(event.datum),
            EventKind::Reset => self.core.reset(),
            EventKind::None | EventKind::Frame => {}
        }
    }
}

impl CoreHooks for CoreSync {
    fn on_frame_started(&self) {
        self.poll();
    }

    fn on_reset(&self) {
        self.poll();
    }
}
