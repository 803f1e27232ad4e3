//! # Audio Capture Module
//!
//! The capture seam of the engine. An [`AudioSource`] opens a mono PCM
//! stream at a fixed sample rate; the [`CaptureStream`] it returns hands out
//! fixed-size blocks until it is closed, cancelled or the device goes away.
//!
//! ## Implementations
//! - [`CpalSource`]: the default input device through CPAL (feature `cpal-audio`)
//! - [`ToneSource`]: a synthetic sine wave for demos and tests

#[cfg(feature = "cpal-audio")]
mod microphone;
mod tone;

#[cfg(feature = "cpal-audio")]
pub use microphone::{CpalSource, CpalStream};
pub use tone::{ToneSource, ToneStream};

use crate::error::Result;
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One block of mono samples in `[-1.0, 1.0]`.
pub type SampleBlock = Vec<f32>;

/// Cooperative cancellation shared between the engine and an open stream.
///
/// Cancelling sets a sticky flag and wakes one waiter on [`wake`](Self::wake),
/// so a stream blocked in `select!` returns without waiting for more audio.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug)]
struct CancelInner {
    cancelled: AtomicBool,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                wake_tx,
                wake_rx,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let _ = self.inner.wake_tx.try_send(());
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Receives a message once [`cancel`](Self::cancel) has been called.
    pub fn wake(&self) -> &Receiver<()> {
        &self.inner.wake_rx
    }

    /// Sleeps for up to `timeout`. Returns `true` if cancelled meanwhile.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let _ = self.inner.wake_rx.recv_timeout(timeout);
        self.is_cancelled()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameters for [`AudioSource::open`].
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub sample_rate: u32,
    pub block_size: usize,
    /// Once cancelled, a blocked `read_block` must return promptly.
    pub cancel: CancelToken,
}

/// A capture device that can be opened repeatedly.
///
/// Opening happens on the capture thread, so streams need not be `Send`.
pub trait AudioSource: Send + Sync + 'static {
    type Stream: CaptureStream;

    /// Opens the device.
    ///
    /// # Errors
    /// `DeviceUnavailable` or `PermissionDenied`.
    fn open(&self, request: StreamRequest) -> Result<Self::Stream>;
}

/// An open capture stream. It owns the device until closed or dropped.
pub trait CaptureStream {
    /// Blocks until `block_size` samples are available.
    ///
    /// # Errors
    /// `StreamClosed` when the stream was closed or cancelled, or the
    /// device stopped delivering data.
    fn read_block(&mut self) -> Result<SampleBlock>;

    /// Whether the device is still in a recording state.
    fn is_recording(&self) -> bool;

    /// Releases the device. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;
}
