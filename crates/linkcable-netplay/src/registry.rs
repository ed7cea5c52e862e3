//! Local cores known to the session.
//!
//! A core moves through three states: `Pending` (registration sent, keyed by
//! nonce), `Acknowledged` (relay assigned an id, keyed by core id) and
//! `Attached` (hooks installed). Each transition moves the entry, so a core
//! can be in only one state and attaching twice fails.

use std::{collections::HashMap, sync::Arc};

use linkcable_netproto::messages::session::{CoreFlags, CoreInfo};
use tracing::debug;

use crate::{
    engine::{EmulatedCore, Interrupted},
    error::NetplayError,
    synchronizer::CoreSync,
};

/// Flags granted when the relay does not send any.
pub const DEFAULT_FLAGS: CoreFlags = CoreFlags::ALLOW_OBSERVE.union(CoreFlags::ALLOW_CONTROL);

/// A registration the relay has not answered yet.
pub struct PendingCore {
    pub core: Arc<dyn EmulatedCore>,
    /// Snapshot taken while the core was paused.
    pub info: CoreInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreState {
    Acknowledged,
    Attached,
}

pub struct CoreEntry {
    pub nonce: u32,
    pub sync: Arc<CoreSync>,
    pub state: CoreState,
}

pub struct Acknowledged {
    pub sync: Arc<CoreSync>,
    /// Entry that held the same core id before. The caller must detach it,
    /// nothing else can reach it any more.
    pub displaced: Option<CoreEntry>,
}

#[derive(Default)]
pub struct Registry {
    pending: HashMap<u32, PendingCore>,
    cores: HashMap<u32, CoreEntry>,
}

/// Read identity and frame counter from a paused core.
pub fn snapshot(core: &dyn EmulatedCore) -> CoreInfo {
    let _paused = Interrupted::new(core);
    let mut info = CoreInfo {
        platform: core.platform(),
        crc32: core.checksum(),
        frame_offset: core.frame_counter(),
        ..CoreInfo::default()
    };
    info.set_game_title(&core.game_title());
    info.set_game_code(&core.game_code());
    info
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn nonce_in_use(&self, nonce: u32) -> bool {
        self.pending.contains_key(&nonce) || self.cores.values().any(|e| e.nonce == nonce)
    }

    /// Pick a random nonce that no pending or known core uses.
    pub fn fresh_nonce(&self) -> u32 {
        loop {
            let nonce = rand::random::<u32>();
            if !self.nonce_in_use(nonce) {
                return nonce;
            }
        }
    }

    /// Store a registration under `nonce`.
    pub fn insert_pending(&mut self, nonce: u32, core: Arc<dyn EmulatedCore>, info: CoreInfo) {
        debug!(nonce, frame_offset = info.frame_offset, "registration pending");
        self.pending.insert(nonce, PendingCore { core, info });
    }

    pub fn remove_pending(&mut self, nonce: u32) -> Option<PendingCore> {
        self.pending.remove(&nonce)
    }

    /// The relay answered `nonce` with `assigned`. Moves the entry from
    /// pending to acknowledged, replacing any entry with the same core id.
    pub fn acknowledge(
        &mut self,
        nonce: u32,
        assigned: &CoreInfo,
    ) -> Result<Acknowledged, NetplayError> {
        let pending = self
            .pending
            .remove(&nonce)
            .ok_or(NetplayError::UnknownNonce(nonce))?;

        let flags = if assigned.flags.is_empty() {
            DEFAULT_FLAGS
        } else {
            assigned.flags
        };
        let sync = Arc::new(CoreSync::new(
            assigned.core_id,
            pending.core,
            pending.info.frame_offset,
            flags,
        ));
        sync.set_room(assigned.room_id);

        debug!(
            nonce,
            core_id = assigned.core_id,
            flags = flags.bits(),
            "registration acknowledged"
        );
        let displaced = self.cores.insert(
            assigned.core_id,
            CoreEntry {
                nonce,
                sync: sync.clone(),
                state: CoreState::Acknowledged,
            },
        );
        Ok(Acknowledged { sync, displaced })
    }

    /// Move an acknowledged core to attached and return its synchronizer.
    ///
    /// Fails with `UnknownNonce` if the relay has not answered `nonce` yet.
    pub fn attach(&mut self, nonce: u32) -> Result<Arc<CoreSync>, NetplayError> {
        let entry = self
            .cores
            .values_mut()
            .find(|e| e.nonce == nonce)
            .ok_or(NetplayError::UnknownNonce(nonce))?;
        if entry.state == CoreState::Attached {
            return Err(NetplayError::AlreadyAttached(entry.sync.core_id()));
        }
        entry.state = CoreState::Attached;
        Ok(entry.sync.clone())
    }

    pub fn get(&self, core_id: u32) -> Option<&CoreEntry> {
        self.cores.get(&core_id)
    }

    pub fn sync(&self, core_id: u32) -> Option<Arc<CoreSync>> {
        self.cores.get(&core_id).map(|e| e.sync.clone())
    }

    pub fn attached(&self, core_id: u32) -> Option<Arc<CoreSync>> {
        self.cores
            .get(&core_id)
            .filter(|e| e.state == CoreState::Attached)
            .map(|e| e.sync.clone())
    }

    pub fn remove(&mut self, core_id: u32) -> Option<CoreEntry> {
        self.cores.remove(&core_id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn is_pending(&self, nonce: u32) -> bool {
        self.pending.contains_key(&nonce)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.cores.is_empty() && self.pending.is_empty()
    }

    pub fn core_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.cores.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Forget everything, returning the entries that had an id.
    pub fn clear(&mut self) -> Vec<CoreEntry> {
        self.pending.clear();
        self.cores.drain().map(|(_, entry)| entry).collect()
    }
}
