//! Capture side of the device boundary.
//!
//! `CaptureSource` is the contract the engine's worker thread drains audio
//! through: a start/stop lifecycle plus a bounded-timeout blocking read.
//! `CpalCapture` adapts the default cpal input device to that contract.
//! cpal streams are not `Send`, so the stream lives on a dedicated holder
//! thread; the device callback feeds a lock-free ring that the blocking
//! `read` polls with the caller's timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use tracing::{debug, info, warn};

use super::util::{adapt_channels, find_best_config, get_device_name};
use super::DeviceParams;
use crate::dsp::RingBuffer;

/// Poll interval while a blocking read waits for callback data.
const READ_POLL: Duration = Duration::from_micros(500);

/// How long `request_start` waits for the holder thread to report the
/// stream alive before giving up.
const START_TIMEOUT: Duration = Duration::from_secs(5);

/// A capture stream the engine can drain.
///
/// Exactly one thread (the engine worker) calls `read`.
pub trait CaptureSource: Send {
    /// Start the underlying stream. Idempotent.
    fn request_start(&mut self) -> Result<()>;

    /// Stop the underlying stream. Idempotent, best-effort.
    fn request_stop(&mut self) -> Result<()>;

    /// Blocking read of up to `max_frames` interleaved frames into `dst`,
    /// waiting at most `timeout`. Returns the frames actually read;
    /// `Ok(0)` means the timeout expired with no data, which callers treat
    /// as a transient glitch, never an error.
    fn read(&mut self, dst: &mut [f32], max_frames: usize, timeout: Duration) -> Result<usize>;
}

/// Default-input-device capture source backed by cpal.
pub struct CpalCapture {
    params: DeviceParams,
    ring: Arc<RingBuffer>,
    running: Arc<AtomicBool>,
    holder: Option<JoinHandle<()>>,
}

impl CpalCapture {
    /// Create a capture source targeting the engine's negotiated layout.
    ///
    /// The internal ring holds ~500 ms of audio so a slow first drain
    /// never loses the opening of the stream.
    pub fn new(params: DeviceParams) -> Result<Self> {
        let ring = Arc::new(RingBuffer::new(params.sample_rate as usize / 2, params.channels)?);
        Ok(Self {
            params,
            ring,
            running: Arc::new(AtomicBool::new(false)),
            holder: None,
        })
    }
}

impl CaptureSource for CpalCapture {
    fn request_start(&mut self) -> Result<()> {
        if self.holder.is_some() {
            debug!("Capture stream already running");
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);
        let (ready_tx, ready_rx) = mpsc::channel();
        let ring = self.ring.clone();
        let running = self.running.clone();
        let params = self.params;

        let holder = std::thread::Builder::new()
            .name("capture-stream".into())
            .spawn(move || hold_input_stream(params, ring, running, ready_tx))
            .context("Failed to spawn capture stream thread")?;
        self.holder = Some(holder);

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                if let Some(holder) = self.holder.take() {
                    let _ = holder.join();
                }
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                anyhow::bail!("Timed out waiting for capture stream to start")
            }
        }
    }

    fn request_stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(holder) = self.holder.take() {
            if holder.join().is_err() {
                warn!("Capture stream thread panicked during shutdown");
            }
        }
        Ok(())
    }

    fn read(&mut self, dst: &mut [f32], max_frames: usize, timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        loop {
            let available = self.ring.available_to_read();
            if available > 0 {
                return Ok(self.ring.read_interleaved(dst, max_frames.min(available)));
            }
            if Instant::now() >= deadline {
                return Ok(0); // timeout, not an error
            }
            std::thread::sleep(READ_POLL);
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        let _ = self.request_stop();
    }
}

/// Build the input stream, report readiness, then keep the stream alive
/// until the running flag clears. cpal streams are not `Send`, so the
/// stream must be created and dropped on this thread.
fn hold_input_stream(params: DeviceParams, ring: Arc<RingBuffer>, running: Arc<AtomicBool>, ready: mpsc::Sender<Result<()>>) {
    match build_input_stream(params, ring, running.clone()) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            while running.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(50));
            }
            drop(stream);
            debug!("Capture stream thread exiting");
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

fn build_input_stream(params: DeviceParams, ring: Arc<RingBuffer>, running: Arc<AtomicBool>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host.default_input_device().context("No input device available")?;
    info!("Using input device: {}", get_device_name(&device));

    let supported = device.supported_input_configs().context("Failed to get supported input configs")?;
    let config = find_best_config(supported, params.sample_rate)?;
    let device_channels = config.channels() as usize;
    if config.sample_rate() != params.sample_rate {
        warn!("Input device runs at {} Hz, engine expects {} Hz", config.sample_rate(), params.sample_rate);
    }
    debug!("Audio capture config: {} Hz, {} channels, {:?}", config.sample_rate(), config.channels(), config.sample_format());

    let stream_config: StreamConfig = config.config();
    let err_fn = |err| {
        tracing::error!("Audio capture error: {}", err);
    };

    let target_channels = params.channels;
    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            let (frames, wrote) = if device_channels == target_channels {
                let frames = data.len() / target_channels;
                (frames, ring.write_interleaved(data, frames))
            } else {
                let adapted = adapt_channels(data, device_channels, target_channels);
                let frames = adapted.len() / target_channels;
                (frames, ring.write_interleaved(&adapted, frames))
            };
            if wrote < frames {
                // Ring full: the burst tail is dropped. Warn only once.
                static DROPPED: AtomicU64 = AtomicU64::new(0);
                if DROPPED.fetch_add((frames - wrote) as u64, Ordering::Relaxed) == 0 {
                    warn!("Capture ring full, dropping frames");
                }
            }
        },
        err_fn,
        None,
    )?;

    stream.play().context("Failed to start capture stream")?;
    Ok(stream)
}
