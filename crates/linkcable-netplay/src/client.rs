use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use linkcable_netproto::messages::{
    room::RoomInfo,
    session::{CoreFlags, CoreInfo},
};
use parking_lot::Mutex;
use tracing::info;

use crate::{
    config::ClientConfig,
    engine::EmulatedCore,
    error::NetplayError,
    observer::NetplayObserver,
    session::{CoreStatus, Session},
    worker::{ConnectionState, Dial, Worker},
};

/// Client side of a netplay session with one relay.
///
/// Every method may be called from any thread, including from observer
/// methods and list callbacks. Requests are queued for the connection worker
/// and return once queued; replies arrive through the observer or the
/// callback passed with the request.
pub struct NetplayClient {
    config: ClientConfig,
    session: Arc<Session>,
    worker: Mutex<Option<Arc<Worker>>>,
    /// Set while a `connect` call is waiting for the handshake.
    connecting: AtomicBool,
}

impl NetplayClient {
    pub fn new(config: ClientConfig, observer: Arc<dyn NetplayObserver>) -> Self {
        Self {
            config,
            session: Arc::new(Session::new(observer)),
            worker: Mutex::new(None),
            connecting: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect and complete the handshake. Blocks until the relay answered,
    /// refused, or the connect timeout expired.
    pub fn connect(&self, host: &str, port: u16) -> Result<(), NetplayError> {
        if self.connecting.swap(true, Ordering::AcqRel) {
            return Err(NetplayError::AlreadyConnected);
        }
        let connected = self.start_worker(host, port);
        self.connecting.store(false, Ordering::Release);
        connected
    }

    fn start_worker(&self, host: &str, port: u16) -> Result<(), NetplayError> {
        let stale = {
            let mut slot = self.worker.lock();
            if slot.as_ref().is_some_and(|running| !running.is_finished()) {
                return Err(NetplayError::AlreadyConnected);
            }
            slot.take()
        };
        // Reap a worker that stopped on its own.
        if let Some(stale) = stale {
            stale.shutdown();
        }

        // The slot stays unlocked during the handshake so that observers can
        // call back into the client.
        let worker = Worker::spawn(Dial::new(&self.config, host, port), self.session.clone())?;
        *self.worker.lock() = Some(Arc::new(worker));
        Ok(())
    }

    /// Connect to the host and port from the configuration.
    pub fn connect_configured(&self) -> Result<(), NetplayError> {
        let host = self.config.host.clone();
        self.connect(&host, self.config.port)
    }

    /// Send Shutdown, stop the worker and release every core. Cores have to
    /// be registered again after the next connect.
    pub fn disconnect(&self) -> Result<(), NetplayError> {
        let worker = self
            .worker
            .lock()
            .clone()
            .ok_or(NetplayError::NotConnected)?;
        info!("disconnecting");
        // The worker stays in the slot until it has exited, so `state`
        // reports `Disconnecting` meanwhile.
        worker.shutdown();

        let mut slot = self.worker.lock();
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, &worker)) {
            *slot = None;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        let state = self
            .worker
            .lock()
            .as_ref()
            .map_or(ConnectionState::Closed, |worker| worker.state());
        if state == ConnectionState::Closed && self.connecting.load(Ordering::Acquire) {
            ConnectionState::Connecting
        } else {
            state
        }
    }

    pub fn register_core(&self, core: Arc<dyn EmulatedCore>) -> Result<u32, NetplayError> {
        self.session.register_core(core)
    }

    pub fn attach_core(&self, nonce: u32) -> Result<u32, NetplayError> {
        self.session.attach_core(nonce)
    }

    pub fn clone_core(
        &self,
        source_core_id: u32,
        core: Arc<dyn EmulatedCore>,
        flags: CoreFlags,
    ) -> Result<u32, NetplayError> {
        self.session.clone_core(source_core_id, core, flags)
    }

    pub fn delete_core(&self, core_id: u32) -> Result<(), NetplayError> {
        self.session.delete_core(core_id)
    }

    pub fn push_input(&self, core_id: u32, keys: u32) -> Result<(), NetplayError> {
        self.session.push_input(core_id, keys)
    }

    pub fn join_room(&self, room_id: u32, core_id: u32) -> Result<(), NetplayError> {
        self.session.join_room(room_id, core_id)
    }

    /// Join the first room with space, or a new room. Waits for the room list
    /// for at most the connect timeout.
    pub fn join_first_room(&self, core_id: u32) -> Result<u32, NetplayError> {
        self.session
            .join_first_room(core_id, self.config.connect_timeout())
    }

    /// Request the room list. `callback` runs on the dispatch thread, after
    /// any notifications already queued there.
    pub fn list_rooms<F>(&self, callback: F) -> Result<(), NetplayError>
    where
        F: FnOnce(&[RoomInfo]) + Send + 'static,
    {
        self.session.list_rooms(Box::new(callback))
    }

    /// Request the cores in `room_id`. Same callback rules as
    /// [`list_rooms`](Self::list_rooms).
    pub fn list_cores<F>(&self, room_id: u32, callback: F) -> Result<(), NetplayError>
    where
        F: FnOnce(&[CoreInfo]) + Send + 'static,
    {
        self.session.list_cores(room_id, Box::new(callback))
    }

    pub fn pending_registrations(&self) -> usize {
        self.session.pending_registrations()
    }

    pub fn core_ids(&self) -> Vec<u32> {
        self.session.core_ids()
    }

    pub fn core_status(&self, core_id: u32) -> Option<CoreStatus> {
        self.session.core_status(core_id)
    }
}

impl Drop for NetplayClient {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.shutdown();
        }
    }
}
