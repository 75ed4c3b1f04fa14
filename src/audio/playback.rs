//! Playback side of the device boundary.
//!
//! `PlaybackSink` owns the real-time render callback; on start it is
//! handed an `AudioPull`, the engine's non-blocking output tap, and calls
//! `pull_to` from the callback for every burst. The pull contract never
//! blocks and never comes up short: shortfall is zero-filled inside the
//! engine, so the hard-real-time callback is bounded regardless of worker
//! pace. `CpalPlayback` adapts the default cpal output device, holding the
//! non-`Send` stream on its own thread like the capture side.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use tracing::{debug, info, warn};

use super::util::{adapt_channels, find_best_config, get_device_name};
use super::DeviceParams;

/// How long `request_start` waits for the holder thread to report the
/// stream alive before giving up.
const START_TIMEOUT: Duration = Duration::from_secs(5);

/// Non-blocking pull contract exposed to the playback callback.
pub trait AudioPull: Send + Sync {
    /// Drain up to `frames` interleaved frames into `dst`, zero-filling
    /// any shortfall. Always reports the full requested count as
    /// delivered, so the caller never blocks or fails on its account.
    fn pull_to(&self, dst: &mut [f32], frames: usize) -> usize;
}

/// A playback stream that renders whatever its pull source provides.
pub trait PlaybackSink: Send {
    /// Negotiated device parameters; the engine reads these once at start.
    fn params(&self) -> Result<DeviceParams>;

    /// Start the stream, invoking `puller.pull_to` from the real-time
    /// render callback for every burst. Idempotent.
    fn request_start(&mut self, puller: Arc<dyn AudioPull>) -> Result<()>;

    /// Stop the stream. Idempotent, best-effort.
    fn request_stop(&mut self) -> Result<()>;
}

/// Default-output-device playback sink backed by cpal.
pub struct CpalPlayback {
    params: DeviceParams,
    running: Arc<AtomicBool>,
    holder: Option<JoinHandle<()>>,
}

impl CpalPlayback {
    /// Probe the default output device and negotiate parameters around the
    /// requested burst size.
    pub fn new(frames_per_burst: usize) -> Result<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device().context("No output device available")?;
        info!("Using output device: {}", get_device_name(&device));

        let sample_rate = device
            .default_output_config()
            .map(|config| config.sample_rate())
            .context("Failed to get default output config")?;
        let supported = device.supported_output_configs().context("Failed to get supported output configs")?;
        let config = find_best_config(supported, sample_rate)?;

        let params = DeviceParams {
            channels: config.channels() as usize,
            frames_per_burst,
            sample_rate: config.sample_rate(),
        };
        debug!("Audio playback config: {} Hz, {} channels, burst {}", params.sample_rate, params.channels, params.frames_per_burst);

        Ok(Self {
            params,
            running: Arc::new(AtomicBool::new(false)),
            holder: None,
        })
    }
}

impl PlaybackSink for CpalPlayback {
    fn params(&self) -> Result<DeviceParams> {
        Ok(self.params)
    }

    fn request_start(&mut self, puller: Arc<dyn AudioPull>) -> Result<()> {
        if self.holder.is_some() {
            debug!("Playback stream already running");
            return Ok(());
        }

        self.running.store(true, Ordering::SeqCst);
        let (ready_tx, ready_rx) = mpsc::channel();
        let running = self.running.clone();
        let params = self.params;

        let holder = std::thread::Builder::new()
            .name("playback-stream".into())
            .spawn(move || hold_output_stream(params, puller, running, ready_tx))
            .context("Failed to spawn playback stream thread")?;
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
                anyhow::bail!("Timed out waiting for playback stream to start")
            }
        }
    }

    fn request_stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(holder) = self.holder.take() {
            if holder.join().is_err() {
                warn!("Playback stream thread panicked during shutdown");
            }
        }
        Ok(())
    }
}

impl Drop for CpalPlayback {
    fn drop(&mut self) {
        let _ = self.request_stop();
    }
}

/// Build the output stream, report readiness, then keep the stream alive
/// until the running flag clears. cpal streams are not `Send`, so the
/// stream must be created and dropped on this thread.
fn hold_output_stream(params: DeviceParams, puller: Arc<dyn AudioPull>, running: Arc<AtomicBool>, ready: mpsc::Sender<Result<()>>) {
    match build_output_stream(params, puller) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            while running.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(50));
            }
            drop(stream);
            debug!("Playback stream thread exiting");
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

fn build_output_stream(params: DeviceParams, puller: Arc<dyn AudioPull>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host.default_output_device().context("No output device available")?;

    let supported = device.supported_output_configs().context("Failed to get supported output configs")?;
    let config = find_best_config(supported, params.sample_rate)?;
    let device_channels = config.channels() as usize;
    let stream_config: StreamConfig = config.config();

    let err_fn = |err| {
        tracing::error!("Audio playback error: {}", err);
    };

    let engine_channels = params.channels;
    let mut pull_buf: Vec<f32> = Vec::new();
    let stream = device.build_output_stream(
        &stream_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let frames = data.len() / device_channels;
            if device_channels == engine_channels {
                puller.pull_to(data, frames);
            } else {
                pull_buf.resize(frames * engine_channels, 0.0);
                puller.pull_to(&mut pull_buf, frames);
                data.copy_from_slice(&adapt_channels(&pull_buf, engine_channels, device_channels));
            }
        },
        err_fn,
        None,
    )?;

    stream.play().context("Failed to start playback stream")?;
    Ok(stream)
}
