use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    thread,
};

use crossbeam_channel::{Receiver, unbounded};
use parking_lot::Mutex;

use crate::engine::{CoreHooks, EmulatedCore};

/// Something the fake core was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Keys { frame: u32, keys: u32 },
    Reset { frame: u32 },
}

/// Core that records what it is told to do. `interrupt`/`resume` only count.
#[derive(Default)]
pub struct FakeCore {
    frame: AtomicU32,
    pub applied: Mutex<Vec<Applied>>,
    pub interrupts: AtomicU32,
    pub resumes: AtomicU32,
    hooks: Mutex<Vec<Arc<dyn CoreHooks>>>,
}

impl FakeCore {
    pub fn at_frame(frame: u32) -> Arc<Self> {
        let core = Self::default();
        core.frame.store(frame, Ordering::SeqCst);
        Arc::new(core)
    }

    pub fn set_frame(&self, frame: u32) {
        self.frame.store(frame, Ordering::SeqCst);
    }

    /// Advance one frame and run the installed hooks, as the engine would.
    pub fn step(&self) {
        self.frame.fetch_add(1, Ordering::SeqCst);
        self.run_frame_hooks();
    }

    /// Run the frame hooks without advancing.
    pub fn run_frame_hooks(&self) {
        let hooks = self.hooks.lock().clone();
        for hook in hooks {
            hook.on_frame_started();
        }
    }

    /// Run the frame hooks on another thread. The receiver gets a message
    /// once they return.
    pub fn run_frame_hooks_in_background(self: &Arc<Self>) -> Receiver<()> {
        let (tx, rx) = unbounded();
        let core = self.clone();
        thread::spawn(move || {
            core.run_frame_hooks();
            let _ = tx.send(());
        });
        rx
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.lock().len()
    }

    pub fn applied(&self) -> Vec<Applied> {
        self.applied.lock().clone()
    }
}

impl EmulatedCore for FakeCore {
    fn platform(&self) -> u32 {
        2
    }

    fn frame_counter(&self) -> u32 {
        self.frame.load(Ordering::SeqCst)
    }

    fn game_title(&self) -> String {
        "LINK TEST".to_string()
    }

    fn game_code(&self) -> String {
        "AGB-LINK".to_string()
    }

    fn checksum(&self) -> u32 {
        0xC0FF_EE00
    }

    fn set_keys(&self, keys: u32) {
        let frame = self.frame_counter();
        self.applied.lock().push(Applied::Keys { frame, keys });
    }

    fn reset(&self) {
        let frame = self.frame_counter();
        self.applied.lock().push(Applied::Reset { frame });
    }

    fn interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn install_hooks(&self, hooks: Arc<dyn CoreHooks>) {
        self.hooks.lock().push(hooks);
    }

    fn remove_hooks(&self, hooks: &Arc<dyn CoreHooks>) {
        self.hooks.lock().retain(|h| !Arc::ptr_eq(h, hooks));
    }
}
