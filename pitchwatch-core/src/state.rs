//! Shared state published by the capture loop and read by the display.
//!
//! One writer (the capture thread), any number of readers. The label is an
//! `Arc` behind a `RwLock`, so a read holds the lock only long enough to
//! clone a pointer and never observes a half-written label.

use crate::note::NoteLabel;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct EngineState {
    label: RwLock<Arc<NoteLabel>>,
    running: AtomicBool,
    /// `f32` bits of the last frequency that passed the change gate.
    last_accepted: AtomicU32,
    generation: AtomicU64,
}

impl EngineState {
    pub fn new() -> Self {
        Self {
            label: RwLock::new(Arc::new(NoteLabel::AwaitingInput)),
            running: AtomicBool::new(false),
            last_accepted: AtomicU32::new(0.0_f32.to_bits()),
            generation: AtomicU64::new(0),
        }
    }

    /// The most recently published label.
    pub fn label(&self) -> Arc<NoteLabel> {
        Arc::clone(&self.label.read())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The frequency the current label was accepted at, 0 Hz for none.
    pub fn last_accepted_hz(&self) -> f32 {
        f32::from_bits(self.last_accepted.load(Ordering::SeqCst))
    }

    /// Increments on every publish. Compare to spot new labels cheaply.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub(crate) fn publish(&self, label: NoteLabel) {
        *self.label.write() = Arc::new(label);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Publishes a label that passed the change gate at `frequency_hz`.
    pub(crate) fn accept(&self, frequency_hz: f32, label: NoteLabel) {
        self.last_accepted
            .store(frequency_hz.to_bits(), Ordering::SeqCst);
        self.publish(label);
    }

    /// Publishes a start failure and forgets the last accepted frequency,
    /// so the next run reports its first reading even if it is unchanged.
    pub(crate) fn fail(&self, label: NoteLabel) {
        self.last_accepted.store(0.0_f32.to_bits(), Ordering::SeqCst);
        self.publish(label);
    }

    /// Replaces a failure label once capture is running again.
    pub(crate) fn clear_failure(&self) {
        if self.label().is_failure() {
            self.publish(NoteLabel::AwaitingInput);
        }
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new()
    }
}
