//! # Detection Engine
//!
//! Owns the capture thread and the shared [`EngineState`].
//!
//! ## Lifecycle
//! - `Idle → Running` on a successful [`start`](DetectionEngine::start)
//! - `Running → Idle` on [`stop`](DetectionEngine::stop), when the stream
//!   closes mid-loop, or when the engine is dropped
//!
//! Start failures never reach the caller as errors. They are published as
//! labels, so the display shows them like any other reading.
//!
//! ## Threads
//! - **Caller**: `start`, `stop` and state reads
//! - **Capture thread**: opens the device, runs the loop, releases the device

use crate::audio::{AudioSource, CancelToken, CaptureStream, StreamRequest};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::gate::ChangeGate;
use crate::note::{NoteLabel, NoteMapper};
use crate::pitch::PitchEstimator;
use crate::state::EngineState;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// An estimate that passed the change gate, with its label.
#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    pub frequency_hz: f32,
    pub label: NoteLabel,
}

/// Estimation, gating and mapping for a sequence of blocks.
///
/// This is the body of the capture loop without the device, usable on
/// offline buffers too.
pub struct BlockProcessor {
    estimator: PitchEstimator,
    mapper: NoteMapper,
    gate: ChangeGate,
    sample_rate: u32,
}

impl BlockProcessor {
    pub fn new(config: &EngineConfig) -> Self {
        Self::resume(config, 0.0)
    }

    /// A processor whose gate continues from `last_accepted_hz`.
    pub fn resume(config: &EngineConfig, last_accepted_hz: f32) -> Self {
        Self {
            estimator: PitchEstimator::new(config.estimator.clone()),
            mapper: NoteMapper::new(&config.mapping),
            gate: ChangeGate::resume(config.change_threshold_hz, last_accepted_hz),
            sample_rate: config.sample_rate,
        }
    }

    pub fn process(&mut self, block: &[f32]) -> Option<Accepted> {
        let estimate = self.estimator.estimate(block, self.sample_rate);
        self.observe(estimate)
    }

    /// Gates an estimate and maps it if it moved far enough.
    pub fn observe(&mut self, estimate: Option<f32>) -> Option<Accepted> {
        let frequency_hz = estimate.unwrap_or(0.0);
        if !self.gate.admit(frequency_hz) {
            return None;
        }
        Some(Accepted {
            frequency_hz,
            label: self.mapper.map(estimate),
        })
    }
}

type PermissionCheck = Box<dyn Fn() -> bool + Send + Sync>;

/// Audio worker thread management structure.
struct Worker {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

/// Continuously estimates the pitch of an [`AudioSource`] and publishes
/// note labels to a shared [`EngineState`].
pub struct DetectionEngine<S: AudioSource> {
    source: Arc<S>,
    config: EngineConfig,
    state: Arc<EngineState>,
    worker: Mutex<Option<Worker>>,
    permission: Option<PermissionCheck>,
}

impl<S: AudioSource> DetectionEngine<S> {
    /// Creates an idle engine.
    ///
    /// # Errors
    /// `InvalidConfig` if the configuration does not validate.
    pub fn new(source: S, config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let (_, max_lag) =
            PitchEstimator::new(config.estimator.clone()).lag_bounds(config.sample_rate);
        if config.block_size < 2 * max_lag {
            warn!(
                "Blocks of {} samples hold fewer than two periods of {} Hz",
                config.block_size, config.estimator.min_frequency_hz
            );
        }

        Ok(Self {
            source: Arc::new(source),
            config,
            state: Arc::new(EngineState::new()),
            worker: Mutex::new(None),
            permission: None,
        })
    }

    /// Consults `check` before every start. When it returns `false` the
    /// engine publishes [`NoteLabel::PermissionRequired`] and stays idle.
    pub fn with_permission_check(
        mut self,
        check: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        self.permission = Some(Box::new(check));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared state handle for display layers.
    pub fn state(&self) -> Arc<EngineState> {
        Arc::clone(&self.state)
    }

    pub fn label(&self) -> Arc<NoteLabel> {
        self.state.label()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// Opens the source and starts the capture thread.
    ///
    /// Does nothing while already running. Returns once the device is open
    /// or the failure has been published to the state.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if self.state.is_running() {
            debug!("Engine already running; start ignored");
            return;
        }
        // A loop that ended on its own leaves its worker behind.
        if let Some(finished) = worker.take() {
            reap(finished);
        }

        if let Some(check) = &self.permission {
            if !check() {
                warn!("Microphone permission not granted; capture not started");
                self.state.fail(NoteLabel::PermissionRequired);
                return;
            }
        }

        let cancel = CancelToken::new();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let source = Arc::clone(&self.source);
        let state = Arc::clone(&self.state);
        let config = self.config.clone();
        let loop_cancel = cancel.clone();

        let spawned = thread::Builder::new()
            .name("pitchwatch-capture".to_string())
            .spawn(move || {
                let request = StreamRequest {
                    sample_rate: config.sample_rate,
                    block_size: config.block_size,
                    cancel: loop_cancel.clone(),
                };
                let stream = match source.open(request) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                state.set_running(true);
                let _running = RunningGuard(&state);
                state.clear_failure();
                let _ = ready_tx.send(Ok(()));
                capture_loop(stream, &config, &state, &loop_cancel);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to spawn capture thread: {e}");
                self.state.fail(NoteLabel::CaptureFailed(e.to_string()));
                return;
            }
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(
                    "Pitch detection started ({} Hz, {} samples per block)",
                    self.config.sample_rate, self.config.block_size
                );
                *worker = Some(Worker { cancel, handle });
            }
            Ok(Err(e)) => {
                reap(Worker { cancel, handle });
                warn!("Failed to start capture: {e}");
                self.state.fail(failure_label(&e));
            }
            Err(_) => {
                reap(Worker { cancel, handle });
                self.state.fail(NoteLabel::CaptureFailed(
                    "capture thread exited before opening the device".to_string(),
                ));
            }
        }
    }

    /// Stops the capture thread and releases the device.
    ///
    /// Safe to call repeatedly and while a read is blocked. Release errors
    /// are logged, never returned.
    pub fn stop(&self) {
        let mut worker = self.worker.lock();
        let Some(active) = worker.take() else {
            debug!("Engine not running; stop ignored");
            return;
        };
        active.cancel.cancel();
        reap(active);
        self.state.set_running(false);
        info!("Pitch detection stopped");
    }
}

#[cfg(feature = "cpal-audio")]
impl DetectionEngine<crate::audio::CpalSource> {
    /// An engine on the default input device.
    pub fn with_microphone(config: EngineConfig) -> Result<Self> {
        Self::new(crate::audio::CpalSource::new(), config)
    }
}

impl<S: AudioSource> Drop for DetectionEngine<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Clears the running flag once the stream is gone, including on panic.
struct RunningGuard<'a>(&'a EngineState);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set_running(false);
    }
}

fn capture_loop<C: CaptureStream>(
    mut stream: C,
    config: &EngineConfig,
    state: &EngineState,
    cancel: &CancelToken,
) {
    let mut processor = BlockProcessor::resume(config, state.last_accepted_hz());

    while !cancel.is_cancelled() && stream.is_recording() {
        match stream.read_block() {
            Ok(_) if cancel.is_cancelled() => break,
            Ok(block) => {
                if let Some(accepted) = processor.process(&block) {
                    debug!(
                        "Publishing {} ({:.2} Hz)",
                        accepted.label, accepted.frequency_hz
                    );
                    state.accept(accepted.frequency_hz, accepted.label);
                }
            }
            Err(e) => {
                if !cancel.is_cancelled() {
                    warn!("Capture loop ended: {e}");
                }
                break;
            }
        }
    }

    if let Err(e) = stream.close() {
        warn!("Error releasing audio device: {e}");
    }
    debug!("Capture loop exited");
}

fn reap(worker: Worker) {
    if worker.handle.join().is_err() {
        error!("Capture thread panicked");
    }
}

fn failure_label(err: &Error) -> NoteLabel {
    match err {
        Error::PermissionDenied { .. } => NoteLabel::PermissionRequired,
        other => NoteLabel::CaptureFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleBlock;
    use std::f64::consts::PI;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    const SAMPLE_RATE: u32 = 44_100;
    const BLOCK: usize = 4096;

    fn sine(freq: f64) -> Vec<f32> {
        (0..BLOCK)
            .map(|i| (0.8 * (2.0 * PI * freq * i as f64 / SAMPLE_RATE as f64).sin()) as f32)
            .collect()
    }

    #[derive(Clone, Copy)]
    enum End {
        /// Block in `read_block` until cancelled.
        Hold,
        /// Report the device as gone.
        Close,
    }

    #[derive(Default)]
    struct Counters {
        opens: AtomicUsize,
        closes: AtomicUsize,
        holding: AtomicBool,
    }

    struct ScriptedSource {
        blocks: Vec<SampleBlock>,
        end: End,
        fail_with: Option<fn() -> Error>,
        counters: Arc<Counters>,
    }

    impl ScriptedSource {
        fn new(blocks: Vec<SampleBlock>, end: End) -> (Self, Arc<Counters>) {
            let counters = Arc::new(Counters::default());
            let source = Self {
                blocks,
                end,
                fail_with: None,
                counters: Arc::clone(&counters),
            };
            (source, counters)
        }

        fn failing(fail_with: fn() -> Error) -> (Self, Arc<Counters>) {
            let (mut source, counters) = Self::new(Vec::new(), End::Close);
            source.fail_with = Some(fail_with);
            (source, counters)
        }
    }

    struct ScriptedStream {
        blocks: std::vec::IntoIter<SampleBlock>,
        end: End,
        open: bool,
        cancel: CancelToken,
        counters: Arc<Counters>,
    }

    impl AudioSource for ScriptedSource {
        type Stream = ScriptedStream;

        fn open(&self, request: StreamRequest) -> Result<ScriptedStream> {
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            if let Some(fail_with) = self.fail_with {
                return Err(fail_with());
            }
            Ok(ScriptedStream {
                blocks: self.blocks.clone().into_iter(),
                end: self.end,
                open: true,
                cancel: request.cancel,
                counters: Arc::clone(&self.counters),
            })
        }
    }

    impl CaptureStream for ScriptedStream {
        fn read_block(&mut self) -> Result<SampleBlock> {
            if let Some(block) = self.blocks.next() {
                return Ok(block);
            }
            match self.end {
                End::Hold => {
                    self.counters.holding.store(true, Ordering::SeqCst);
                    while !self.cancel.wait_timeout(Duration::from_millis(20)) {}
                    Err(Error::StreamClosed)
                }
                End::Close => {
                    self.open = false;
                    Err(Error::StreamClosed)
                }
            }
        }

        fn is_recording(&self) -> bool {
            self.open
        }

        fn close(&mut self) -> Result<()> {
            if self.open {
                self.open = false;
                self.counters.closes.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    impl Drop for ScriptedStream {
        fn drop(&mut self) {
            let _ = self.close();
        }
    }

    fn wait_until(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn engine(source: ScriptedSource) -> DetectionEngine<ScriptedSource> {
        DetectionEngine::new(source, EngineConfig::default()).unwrap()
    }

    #[test]
    fn processor_gates_small_moves() {
        let mut processor = BlockProcessor::new(&EngineConfig::default());

        let first = processor.observe(Some(440.0)).unwrap();
        assert_eq!(first.label.to_string(), "A4 (440Hz)");
        assert!(processor.observe(Some(440.5)).is_none());
        let moved = processor.observe(Some(442.0)).unwrap();
        assert_eq!(moved.label.to_string(), "A4 (442Hz)");
    }

    #[test]
    fn processor_reports_silence_after_a_note() {
        let mut processor = BlockProcessor::new(&EngineConfig::default());
        assert!(processor.observe(None).is_none());
        assert!(processor.observe(Some(220.0)).is_some());
        let silent = processor.observe(None).unwrap();
        assert_eq!(silent.label, NoteLabel::Unvoiced);
        assert_eq!(silent.frequency_hz, 0.0);
        assert!(processor.observe(None).is_none());
    }

    #[test]
    fn processor_runs_the_estimator() {
        let mut processor = BlockProcessor::new(&EngineConfig::default());
        let accepted = processor.process(&sine(440.0)).unwrap();
        assert_eq!(accepted.label.to_string(), "A4 (440Hz)");
        assert!(processor.process(&sine(440.5)).is_none());
        assert!(processor.process(&sine(443.0)).is_some());
    }

    #[test]
    fn publishes_notes_and_suppresses_near_duplicates() {
        let (source, counters) = ScriptedSource::new(
            vec![sine(440.0), sine(440.5), sine(443.0)],
            End::Hold,
        );
        let engine = engine(source);
        let state = engine.state();

        engine.start();
        assert!(engine.is_running());
        wait_until("script to drain", || counters.holding.load(Ordering::SeqCst));

        assert_eq!(state.generation(), 2);
        assert_eq!(state.label().to_string(), "A4 (443Hz)");
        assert!((state.last_accepted_hz() - 443.0).abs() < 1.0);

        engine.stop();
        assert!(!engine.is_running());
    }

    #[test]
    fn leading_silence_keeps_awaiting_input() {
        let (source, counters) = ScriptedSource::new(vec![vec![0.0; BLOCK]; 3], End::Hold);
        let engine = engine(source);

        engine.start();
        wait_until("script to drain", || counters.holding.load(Ordering::SeqCst));
        assert_eq!(*engine.label(), NoteLabel::AwaitingInput);
        assert_eq!(engine.state().generation(), 0);
    }

    #[test]
    fn second_start_is_ignored() {
        let (source, counters) = ScriptedSource::new(Vec::new(), End::Hold);
        let engine = engine(source);

        engine.start();
        engine.start();
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);

        engine.stop();
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_is_idempotent() {
        let (source, counters) = ScriptedSource::new(Vec::new(), End::Hold);
        let engine = engine(source);

        engine.stop();
        engine.start();
        wait_until("blocked read", || counters.holding.load(Ordering::SeqCst));
        engine.stop();
        engine.stop();

        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        assert!(!engine.is_running());
    }

    #[test]
    fn restart_reopens_the_device() {
        let (source, counters) = ScriptedSource::new(Vec::new(), End::Hold);
        let engine = engine(source);

        engine.start();
        engine.stop();
        engine.start();
        assert!(engine.is_running());
        engine.stop();

        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn gate_history_survives_restart() {
        let (source, counters) = ScriptedSource::new(vec![sine(440.0)], End::Hold);
        let engine = engine(source);

        engine.start();
        wait_until("first run", || counters.holding.load(Ordering::SeqCst));
        engine.stop();
        counters.holding.store(false, Ordering::SeqCst);

        engine.start();
        wait_until("second run", || counters.holding.load(Ordering::SeqCst));
        engine.stop();
        assert_eq!(engine.state().generation(), 1);
    }

    #[test]
    fn device_failure_is_published_not_raised() {
        let (source, counters) = ScriptedSource::failing(|| Error::DeviceUnavailable {
            message: "no input device available".to_string(),
        });
        let engine = engine(source);

        engine.start();
        assert!(!engine.is_running());
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(
            engine.label().to_string(),
            "capture error: Audio device unavailable: no input device available"
        );
        engine.stop();
    }

    #[test]
    fn permission_denial_has_its_own_label() {
        let (source, _) = ScriptedSource::failing(|| Error::PermissionDenied {
            message: "access denied".to_string(),
        });
        let engine = engine(source);

        engine.start();
        assert!(!engine.is_running());
        assert_eq!(*engine.label(), NoteLabel::PermissionRequired);
    }

    #[test]
    fn permission_check_blocks_opening() {
        let (source, counters) = ScriptedSource::new(Vec::new(), End::Hold);
        let engine = engine(source).with_permission_check(|| false);

        engine.start();
        assert!(!engine.is_running());
        assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
        assert_eq!(engine.label().to_string(), "microphone permission required");
    }

    fn toggled_permission(
        source: ScriptedSource,
    ) -> (DetectionEngine<ScriptedSource>, Arc<AtomicBool>) {
        let granted = Arc::new(AtomicBool::new(true));
        let check = Arc::clone(&granted);
        let engine = engine(source).with_permission_check(move || check.load(Ordering::SeqCst));
        (engine, granted)
    }

    #[test]
    fn refused_start_does_not_mask_the_next_reading() {
        let (source, counters) = ScriptedSource::new(vec![sine(440.0)], End::Hold);
        let (engine, granted) = toggled_permission(source);

        engine.start();
        wait_until("first run", || counters.holding.load(Ordering::SeqCst));
        assert_eq!(engine.label().to_string(), "A4 (440Hz)");
        engine.stop();

        granted.store(false, Ordering::SeqCst);
        engine.start();
        assert_eq!(*engine.label(), NoteLabel::PermissionRequired);

        granted.store(true, Ordering::SeqCst);
        counters.holding.store(false, Ordering::SeqCst);
        engine.start();
        wait_until("second run", || counters.holding.load(Ordering::SeqCst));
        assert!(engine.is_running());
        assert_eq!(engine.label().to_string(), "A4 (440Hz)");
        engine.stop();
    }

    #[test]
    fn silent_run_after_refusal_awaits_input() {
        let (source, counters) = ScriptedSource::new(vec![vec![0.0; BLOCK]; 2], End::Hold);
        let (engine, granted) = toggled_permission(source);

        granted.store(false, Ordering::SeqCst);
        engine.start();
        assert_eq!(*engine.label(), NoteLabel::PermissionRequired);

        granted.store(true, Ordering::SeqCst);
        engine.start();
        wait_until("script to drain", || counters.holding.load(Ordering::SeqCst));
        assert!(engine.is_running());
        assert_eq!(*engine.label(), NoteLabel::AwaitingInput);
        engine.stop();
    }

    struct PanickingSource;

    impl AudioSource for PanickingSource {
        type Stream = ScriptedStream;

        fn open(&self, _request: StreamRequest) -> Result<ScriptedStream> {
            panic!("backend exploded");
        }
    }

    #[test]
    fn panic_while_opening_is_reported() {
        let engine = DetectionEngine::new(PanickingSource, EngineConfig::default()).unwrap();

        engine.start();
        assert!(!engine.is_running());
        assert!(engine.label().is_failure());
        assert_eq!(
            engine.label().to_string(),
            "capture error: capture thread exited before opening the device"
        );

        // The reaped worker does not block later calls.
        engine.start();
        engine.stop();
        assert!(!engine.is_running());
    }

    #[test]
    fn closed_stream_returns_engine_to_idle() {
        let (source, counters) = ScriptedSource::new(vec![sine(220.5)], End::Close);
        let engine = engine(source);

        engine.start();
        wait_until("loop exit", || !engine.is_running());
        assert_eq!(engine.label().to_string(), "A3 (220Hz)");

        // The finished worker is reaped and the device opened afresh.
        engine.start();
        wait_until("second loop exit", || !engine.is_running());
        assert_eq!(counters.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn drop_releases_the_device() {
        let (source, counters) = ScriptedSource::new(Vec::new(), End::Hold);
        {
            let engine = engine(source);
            engine.start();
        }
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let (source, _) = ScriptedSource::new(Vec::new(), End::Hold);
        let config = EngineConfig {
            sample_rate: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            DetectionEngine::new(source, config),
            Err(Error::InvalidConfig { .. })
        ));
    }
}
