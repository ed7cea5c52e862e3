//! Boundary with the emulation engine.
//!
//! The engine owns one thread per core. This crate only reads identifying
//! information, feeds keys and resets back in, and registers hooks that the
//! engine calls from the core's own thread.

use std::sync::Arc;

/// Hooks invoked by the engine on the core's own thread.
pub trait CoreHooks: Send + Sync {
    /// Called when the core starts a new video frame.
    fn on_frame_started(&self);

    /// Called after the core has been reset.
    fn on_reset(&self);
}

/// An emulated machine running on its own thread.
pub trait EmulatedCore: Send + Sync {
    /// Platform identifier reported to the relay.
    fn platform(&self) -> u32;

    /// Number of frames the core has run so far.
    fn frame_counter(&self) -> u32;

    fn game_title(&self) -> String;

    fn game_code(&self) -> String;

    /// CRC32 of the loaded ROM.
    fn checksum(&self) -> u32;

    /// Replace the currently held keys.
    fn set_keys(&self, keys: u32);

    fn reset(&self);

    /// Pause the core's thread at a safe point and return once it is paused.
    fn interrupt(&self);

    /// Undo one `interrupt`.
    fn resume(&self);

    /// Register hooks to be called on frame start and reset.
    fn install_hooks(&self, hooks: Arc<dyn CoreHooks>);

    /// Remove hooks previously passed to `install_hooks` (compared by pointer).
    fn remove_hooks(&self, hooks: &Arc<dyn CoreHooks>);
}

/// Keeps a core interrupted for as long as the guard lives.
pub struct Interrupted<'a> {
    core: &'a dyn EmulatedCore,
}

impl<'a> Interrupted<'a> {
    pub fn new(core: &'a dyn EmulatedCore) -> Self {
        core.interrupt();
        Self { core }
    }
}

impl Drop for Interrupted<'_> {
    fn drop(&mut self) {
        self.core.resume();
    }
}
