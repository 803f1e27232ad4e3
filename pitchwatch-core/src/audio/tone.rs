//! Synthetic sine source for running the engine without a microphone.

use super::{AudioSource, CancelToken, CaptureStream, SampleBlock, StreamRequest};
use crate::error::{Error, Result};
use std::f64::consts::PI;
use std::time::Duration;

/// Generates a continuous sine wave at a fixed frequency.
#[derive(Debug, Clone)]
pub struct ToneSource {
    frequency_hz: f64,
    amplitude: f32,
    paced: bool,
}

impl ToneSource {
    pub fn new(frequency_hz: f64) -> Self {
        Self {
            frequency_hz,
            amplitude: 0.5,
            paced: false,
        }
    }

    pub fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    /// Deliver blocks no faster than a real device would.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }
}

impl AudioSource for ToneSource {
    type Stream = ToneStream;

    fn open(&self, request: StreamRequest) -> Result<ToneStream> {
        if request.sample_rate == 0 {
            return Err(Error::DeviceUnavailable {
                message: "sample rate must be positive".to_string(),
            });
        }
        let block_duration =
            Duration::from_secs_f64(request.block_size as f64 / request.sample_rate as f64);
        Ok(ToneStream {
            source: self.clone(),
            sample_rate: request.sample_rate,
            block_size: request.block_size,
            block_duration,
            position: 0,
            open: true,
            cancel: request.cancel,
        })
    }
}

/// An open [`ToneSource`] stream.
#[derive(Debug)]
pub struct ToneStream {
    source: ToneSource,
    sample_rate: u32,
    block_size: usize,
    block_duration: Duration,
    /// Index of the next sample, so consecutive blocks stay phase-continuous.
    position: u64,
    open: bool,
    cancel: CancelToken,
}

impl CaptureStream for ToneStream {
    fn read_block(&mut self) -> Result<SampleBlock> {
        if !self.open || self.cancel.is_cancelled() {
            return Err(Error::StreamClosed);
        }
        if self.source.paced && self.cancel.wait_timeout(self.block_duration) {
            return Err(Error::StreamClosed);
        }

        let step = 2.0 * PI * self.source.frequency_hz / self.sample_rate as f64;
        let amplitude = self.source.amplitude as f64;
        let start = self.position;
        let block = (0..self.block_size as u64)
            .map(|i| (amplitude * (step * (start + i) as f64).sin()) as f32)
            .collect();
        self.position += self.block_size as u64;
        Ok(block)
    }

    fn is_recording(&self) -> bool {
        self.open
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }
}
