//! Full-duplex engine: owns a capture source and a playback sink, runs a
//! worker thread that drains captured audio through the conversion and
//! spectral chain, and exposes a non-blocking pull interface to the
//! playback callback.
//!
//! The worker and the callback communicate exclusively through two
//! lock-free rings; no mutex or condition variable sits between them, so
//! the callback's execution time is bounded independent of worker
//! scheduling jitter.

mod output;
mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audio::{AudioPull, CaptureSource, PlaybackSink};
use crate::config::EngineConfig;
use crate::dsp::RingBuffer;
use output::OutputQueue;
use worker::{Worker, WorkerContext};

/// Optional hook the worker invokes once at startup, for platform-specific
/// scheduling concerns (thread priority, core affinity) that stay outside
/// the portable core.
pub type SchedulingHint = Arc<dyn Fn() + Send + Sync>;

/// Structured failure modes of `start()`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no capture source attached")]
    NoCaptureSource,
    #[error("no playback sink attached")]
    NoPlaybackSink,
}

/// Point-in-time snapshot of the engine's backpressure accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Frames waiting in the input ring.
    pub in_ring_frames: usize,
    /// Frames waiting in the output ring.
    pub out_ring_frames: usize,
    /// Cumulative frames dropped on full-ring writes.
    pub overflows: u64,
    /// Cumulative frames zero-filled on empty-ring pulls (post warm-up).
    pub underflows: u64,
}

/// Full-duplex audio engine.
///
/// Lifecycle: `Stopped` -> `start()` -> `Running` -> `stop()` ->
/// `Stopped`. All rings, scratch buffers and DSP state are allocated
/// fresh inside `start()`, sized from the sink's negotiated device
/// parameters. Dropping the engine stops it first, so the worker thread
/// never outlives the buffers it touches.
pub struct DuplexEngine {
    config: EngineConfig,
    source: Option<Arc<Mutex<Box<dyn CaptureSource>>>>,
    sink: Option<Arc<Mutex<Box<dyn PlaybackSink>>>>,
    scheduling_hint: Option<SchedulingHint>,
    running: Arc<AtomicBool>,
    overflows: Arc<AtomicU64>,
    in_ring: Option<Arc<RingBuffer>>,
    output: Option<Arc<OutputQueue>>,
    worker: Option<JoinHandle<()>>,
}

impl DuplexEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            source: None,
            sink: None,
            scheduling_hint: None,
            running: Arc::new(AtomicBool::new(false)),
            overflows: Arc::new(AtomicU64::new(0)),
            in_ring: None,
            output: None,
            worker: None,
        }
    }

    /// Attach the capture source the worker will drain.
    pub fn set_capture_source(&mut self, source: impl CaptureSource + 'static) {
        self.source = Some(Arc::new(Mutex::new(Box::new(source))));
    }

    /// Attach the playback sink whose callback pulls processed output.
    pub fn set_playback_sink(&mut self, sink: impl PlaybackSink + 'static) {
        self.sink = Some(Arc::new(Mutex::new(Box::new(sink))));
    }

    /// Install a hook the worker runs once at startup (e.g. platform
    /// thread-priority elevation).
    pub fn set_scheduling_hint(&mut self, hint: impl Fn() + Send + Sync + 'static) {
        self.scheduling_hint = Some(Arc::new(hint));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start the engine: negotiate device parameters, allocate and prime
    /// the rings, start both streams and spawn the worker.
    ///
    /// # Errors
    /// Fails without side effects (beyond completed allocations) if no
    /// source or sink is attached, if the configuration is invalid, or if
    /// either stream fails to start. A capture stream already started
    /// before a playback failure is stopped again as rollback.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            debug!("Engine already running");
            return Ok(());
        }

        let source = self.source.clone().ok_or(EngineError::NoCaptureSource)?;
        let sink = self.sink.clone().ok_or(EngineError::NoPlaybackSink)?;

        let params = sink.lock().params().context("Failed to read playback device parameters")?;
        info!(
            "Starting engine: {} channels, {} frames/burst, {} Hz, mode {}",
            params.channels, params.frames_per_burst, params.sample_rate, self.config.mode
        );
        if params.sample_rate % 3 != 0 {
            warn!("Native rate {} Hz is not a multiple of 3; the fixed-ratio stages assume an exact 3:1 reduction", params.sample_rate);
        }

        // Native-rate rings sized to ~ring_capacity_ms of audio: enough
        // slack to absorb scheduling jitter while staying low-latency.
        let capacity = self.config.ring_capacity_frames(params.sample_rate).max(params.frames_per_burst);
        let in_ring = Arc::new(RingBuffer::new(capacity, params.channels)?);
        let output = Arc::new(OutputQueue::new(RingBuffer::new(capacity, params.channels)?, self.config.warmup));

        // Prime the output ring with silence so the first playback
        // callbacks do not underflow before the worker produces output.
        let silence = vec![0.0f32; params.frames_per_burst * params.channels];
        for _ in 0..self.config.prime_bursts {
            output.ring.write_interleaved(&silence, params.frames_per_burst);
        }

        self.overflows.store(0, Ordering::Relaxed);
        let worker = Worker::new(WorkerContext {
            source: source.clone(),
            in_ring: in_ring.clone(),
            output: output.clone(),
            running: self.running.clone(),
            overflows: self.overflows.clone(),
            params,
            config: self.config.clone(),
            scheduling_hint: self.scheduling_hint.clone(),
        })?;

        source.lock().request_start().context("Failed to start capture stream")?;
        if let Err(e) = sink.lock().request_start(output.clone() as Arc<dyn AudioPull>) {
            // Roll back the already-started capture stream.
            if let Err(stop_err) = source.lock().request_stop() {
                warn!("Rollback stop of capture stream failed: {stop_err:#}");
            }
            return Err(e.context("Failed to start playback stream"));
        }
        output.mark_started();

        self.running.store(true, Ordering::Release);
        let handle = std::thread::Builder::new()
            .name("duplex-worker".into())
            .spawn(move || worker.run())
            .context("Failed to spawn worker thread")?;

        self.worker = Some(handle);
        self.in_ring = Some(in_ring);
        self.output = Some(output);
        info!("Engine running");
        Ok(())
    }

    /// Stop the engine: clear the running flag, join the worker (latency
    /// bounded by the capture read timeout), then best-effort stop both
    /// streams. Idempotent; stream-stop failures are diagnostics only.
    pub fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Worker thread panicked before join");
            }
        }

        if was_running {
            if let Some(sink) = &self.sink {
                if let Err(e) = sink.lock().request_stop() {
                    warn!("Failed to stop playback stream: {e:#}");
                }
            }
            if let Some(source) = &self.source {
                if let Err(e) = source.lock().request_stop() {
                    warn!("Failed to stop capture stream: {e:#}");
                }
            }
            info!("Engine stopped");
        }
    }

    /// Drain up to `frames` frames of processed output into `dst`,
    /// zero-filling any shortfall; always reports the full requested
    /// count, so the real-time caller never blocks or fails.
    ///
    /// This is the sink callback's path; no other thread may consume the
    /// output ring while a sink is pulling.
    pub fn pull_to(&self, dst: &mut [f32], frames: usize) -> usize {
        match &self.output {
            Some(output) => output.pull_to(dst, frames),
            None => {
                dst.fill(0.0);
                frames
            }
        }
    }

    /// Snapshot of ring occupancies and backpressure counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            in_ring_frames: self.in_ring.as_ref().map_or(0, |ring| ring.available_to_read()),
            out_ring_frames: self.output.as_ref().map_or(0, |output| output.ring.available_to_read()),
            overflows: self.overflows.load(Ordering::Relaxed),
            underflows: self.output.as_ref().map_or(0, |output| output.underflow_count()),
        }
    }
}

impl Drop for DuplexEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
