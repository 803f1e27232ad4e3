//! Microphone capture using CPAL (Cross-Platform Audio Library).
//!
//! Opens the default input device of the default host, picks a supported
//! configuration at the requested sample rate, mixes it down to mono `f32`
//! and accumulates the callback chunks into fixed-size blocks.

use super::{AudioSource, CancelToken, CaptureStream, SampleBlock, StreamRequest};
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    FromSample, Sample, SampleFormat, SampleRate, SizedSample, SupportedStreamConfigRange,
};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Callback chunks buffered between the audio thread and the capture loop.
const CHUNK_QUEUE: usize = 64;

/// Longest a `read_block` waits before re-checking the device state.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The system default microphone.
#[derive(Debug, Clone, Default)]
pub struct CpalSource;

impl CpalSource {
    pub fn new() -> Self {
        Self
    }
}

impl AudioSource for CpalSource {
    type Stream = CpalStream;

    fn open(&self, request: StreamRequest) -> Result<CpalStream> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable {
                message: "no input device available".to_string(),
            })?;
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let configs = device
            .supported_input_configs()
            .map_err(device_error)?
            .collect::<Vec<_>>();
        let supported = find_supported_config(configs, request.sample_rate)
            .ok_or_else(|| Error::DeviceUnavailable {
                message: format!(
                    "{name} has no f32/i16 input format at {} Hz",
                    request.sample_rate
                ),
            })?
            .with_sample_rate(SampleRate(request.sample_rate));

        let channels = supported.channels() as usize;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.config();
        info!(
            "Using input device {name}: {channels}ch {format:?} at {} Hz",
            request.sample_rate
        );

        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded(CHUNK_QUEUE);
        let recording = Arc::new(AtomicBool::new(true));
        let dropped = Arc::new(AtomicUsize::new(0));
        let shared = Shared {
            chunks: chunk_tx,
            recording: Arc::clone(&recording),
            dropped: Arc::clone(&dropped),
        };

        let stream = match format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, shared),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, shared),
            other => Err(Error::DeviceUnavailable {
                message: format!("unsupported sample format {other:?}"),
            }),
        }?;
        stream.play().map_err(device_error)?;

        Ok(CpalStream {
            stream: Some(stream),
            chunks: chunk_rx,
            pending: Vec::with_capacity(request.block_size * 2),
            block_size: request.block_size,
            recording,
            dropped,
            cancel: request.cancel,
        })
    }
}

/// An open CPAL input stream. Dropping it releases the device.
pub struct CpalStream {
    stream: Option<cpal::Stream>,
    chunks: Receiver<Vec<f32>>,
    pending: Vec<f32>,
    block_size: usize,
    recording: Arc<AtomicBool>,
    /// Chunks the callback discarded because the queue was full.
    dropped: Arc<AtomicUsize>,
    cancel: CancelToken,
}

/// Handles moved into the CPAL callbacks.
struct Shared {
    chunks: Sender<Vec<f32>>,
    recording: Arc<AtomicBool>,
    dropped: Arc<AtomicUsize>,
}

enum Wait {
    Chunk(Vec<f32>),
    Disconnected,
    Cancelled,
    Idle,
}

impl CaptureStream for CpalStream {
    fn read_block(&mut self) -> Result<SampleBlock> {
        loop {
            if self.pending.len() >= self.block_size {
                report_dropped(&self.dropped);
                let rest = self.pending.split_off(self.block_size);
                return Ok(std::mem::replace(&mut self.pending, rest));
            }
            if self.cancel.is_cancelled() || !self.is_recording() {
                return Err(Error::StreamClosed);
            }

            let chunks = &self.chunks;
            let wake = self.cancel.wake();
            let next = crossbeam_channel::select! {
                recv(chunks) -> msg => match msg {
                    Ok(chunk) => Wait::Chunk(chunk),
                    Err(_) => Wait::Disconnected,
                },
                recv(wake) -> _ => Wait::Cancelled,
                default(POLL_INTERVAL) => Wait::Idle,
            };

            match next {
                Wait::Chunk(chunk) => self.pending.extend_from_slice(&chunk),
                Wait::Disconnected => {
                    self.recording.store(false, Ordering::SeqCst);
                    return Err(Error::StreamClosed);
                }
                Wait::Cancelled => return Err(Error::StreamClosed),
                Wait::Idle => {}
            }
        }
    }

    fn is_recording(&self) -> bool {
        self.stream.is_some() && self.recording.load(Ordering::SeqCst)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            self.recording.store(false, Ordering::SeqCst);
            stream.pause().map_err(device_error)?;
            debug!("Input stream released");
        }
        Ok(())
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error releasing input stream: {e}");
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    shared: Shared,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let Shared {
        chunks,
        recording,
        dropped,
    } = shared;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                forward_chunk(&chunks, downmix(data, channels), &dropped);
            },
            move |err| {
                error!("An error occurred on the audio stream: {err}");
                recording.store(false, Ordering::SeqCst);
            },
            None,
        )
        .map_err(device_error)
}

/// Queues a chunk for the capture loop. A full queue means the loop is
/// behind; the chunk is dropped and counted.
fn forward_chunk(chunks: &Sender<Vec<f32>>, chunk: Vec<f32>, dropped: &AtomicUsize) {
    if let Err(TrySendError::Full(_)) = chunks.try_send(chunk) {
        dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Logs and resets the dropped chunk count. Returns how many were dropped.
fn report_dropped(dropped: &AtomicUsize) -> usize {
    let count = dropped.swap(0, Ordering::Relaxed);
    if count > 0 {
        warn!("Capture loop fell behind; dropped {count} audio chunks");
    }
    count
}

/// Averages interleaved frames into mono `f32`.
fn downmix<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    if channels <= 1 {
        return data.iter().map(|&s| s.to_sample::<f32>()).collect();
    }
    data.chunks(channels)
        .map(|frame| {
            frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() / frame.len() as f32
        })
        .collect()
}

/// Finds the best supported configuration for the target sample rate.
///
/// Only f32 and i16 formats whose range covers `target_rate` qualify.
/// Mono beats multi-channel, then f32 beats i16.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16))
        .filter(|c| c.min_sample_rate().0 <= target_rate && target_rate <= c.max_sample_rate().0)
        .min_by_key(|c| (c.channels() != 1, c.sample_format() != SampleFormat::F32))
}

fn device_error(err: impl std::fmt::Display) -> Error {
    classify_backend_message(err.to_string())
}

/// CPAL has no dedicated permission error; backends report it in text.
fn classify_backend_message(message: String) -> Error {
    let lower = message.to_lowercase();
    let denied = ["permission", "denied", "not permitted", "eacces", "unauthorized"]
        .iter()
        .any(|needle| lower.contains(needle));
    if denied {
        Error::PermissionDenied { message }
    } else {
        Error::DeviceUnavailable { message }
    }
}
