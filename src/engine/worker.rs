//! The engine worker thread: drains the capture source through the
//! conversion and spectral chain into the output ring.
//!
//! The loop is soft-real-time: its only blocking point is the
//! bounded-timeout capture read, which also bounds how quickly a stop
//! request is observed. Every buffer here is worker-exclusive; the two
//! native-rate rings are the only state shared with other threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::debug;

use super::output::OutputQueue;
use super::SchedulingHint;
use crate::audio::util::{deinterleave, duplicate_to_channels, interleave, mix_to_mono};
use crate::audio::{CaptureSource, DeviceParams};
use crate::config::{EngineConfig, PipelineMode};
use crate::dsp::resampler::RATIO;
use crate::dsp::{ResampleMode, Resampler3x, RingBuffer, SpectralProcessor};

/// Everything the worker needs, handed over by the engine at start.
pub(crate) struct WorkerContext {
    pub source: Arc<Mutex<Box<dyn CaptureSource>>>,
    pub in_ring: Arc<RingBuffer>,
    pub output: Arc<OutputQueue>,
    pub running: Arc<AtomicBool>,
    pub overflows: Arc<AtomicU64>,
    pub params: DeviceParams,
    pub config: EngineConfig,
    pub scheduling_hint: Option<SchedulingHint>,
}

pub(crate) struct Worker {
    source: Arc<Mutex<Box<dyn CaptureSource>>>,
    in_ring: Arc<RingBuffer>,
    output: Arc<OutputQueue>,
    running: Arc<AtomicBool>,
    overflows: Arc<AtomicU64>,
    params: DeviceParams,
    config: EngineConfig,
    scheduling_hint: Option<SchedulingHint>,

    // DSP state, rebuilt fresh on every engine start.
    down: Vec<Resampler3x>,
    up_channels: Vec<Resampler3x>,
    up_mono: Resampler3x,
    stft: SpectralProcessor,
    mid_ring: RingBuffer, // intermediate-rate mono queue, worker-exclusive

    // Scratch buffers sized from the negotiated device parameters.
    burst_in: Vec<f32>,
    xfer: Vec<f32>,
    ch_native: Vec<Vec<f32>>,
    ch_mid: Vec<Vec<f32>>,
    ch_up: Vec<Vec<f32>>,
    mono_mid: Vec<f32>,
    hop_in: Vec<f32>,
    hop_out: Vec<f32>,
    up_out: Vec<f32>,
    out_inter: Vec<f32>,

    // Previous snapshot values for the periodic diagnostics.
    last_hops: u64,
    last_pushed: u64,
    last_popped: u64,
}

impl Worker {
    pub(crate) fn new(ctx: WorkerContext) -> Result<Self> {
        let WorkerContext { source, in_ring, output, running, overflows, params, config, scheduling_hint } = ctx;

        let ch = params.channels;
        let fpb = params.frames_per_burst;
        let hop = config.spectral.hop_size;

        let stft = SpectralProcessor::new(config.spectral)?;
        let mid_capacity = (config.ring_capacity_frames(params.sample_rate) / RATIO).max(hop * 2);
        let mid_ring = RingBuffer::new(mid_capacity, 1)?;

        let mid_len = (fpb / RATIO).max(1);
        Ok(Self {
            source,
            in_ring,
            output,
            running,
            overflows,
            params,
            scheduling_hint,
            down: vec![Resampler3x::new(ResampleMode::DownBy3); ch],
            up_channels: vec![Resampler3x::new(ResampleMode::UpBy3); ch],
            up_mono: Resampler3x::new(ResampleMode::UpBy3),
            stft,
            mid_ring,
            burst_in: vec![0.0; fpb * ch],
            xfer: vec![0.0; fpb * ch],
            ch_native: vec![vec![0.0; fpb]; ch],
            ch_mid: vec![vec![0.0; mid_len]; ch],
            ch_up: vec![vec![0.0; fpb]; ch],
            mono_mid: vec![0.0; mid_len],
            hop_in: vec![0.0; hop],
            hop_out: vec![0.0; hop],
            up_out: vec![0.0; hop * RATIO],
            out_inter: vec![0.0; fpb.max(hop * RATIO) * ch],
            last_hops: 0,
            last_pushed: 0,
            last_popped: 0,
            config,
        })
    }

    /// Loop until the running flag clears: read one capture burst, then
    /// drain complete bursts end-to-end while both rings have room.
    pub(crate) fn run(mut self) {
        if let Some(hint) = self.scheduling_hint.take() {
            hint();
        }
        for stage in self.down.iter_mut().chain(self.up_channels.iter_mut()) {
            stage.reset();
        }
        self.up_mono.reset();

        let fpb = self.params.frames_per_burst;
        let mut last_log = Instant::now();

        while self.running.load(Ordering::Acquire) {
            let got = {
                let mut source = self.source.lock();
                match source.read(&mut self.burst_in, fpb, self.config.read_timeout) {
                    Ok(n) => n,
                    Err(e) => {
                        // Transient glitch: skip this iteration and retry.
                        debug!("Capture read error (retrying): {e:#}");
                        continue;
                    }
                }
            };
            if got == 0 {
                continue; // timeout
            }

            let wrote = self.in_ring.write_interleaved(&self.burst_in, got);
            if wrote < got {
                self.overflows.fetch_add((got - wrote) as u64, Ordering::Relaxed);
            }

            while self.in_ring.available_to_read() >= fpb && self.output.ring.available_to_write() >= fpb {
                let rd = self.in_ring.read_interleaved(&mut self.xfer, fpb);
                if rd == fpb {
                    self.process_burst();
                }
            }

            if last_log.elapsed() >= self.config.stats_interval {
                last_log = Instant::now();
                self.log_stats();
            }
        }
        debug!("Worker thread exiting");
    }

    /// Run one device burst through the stages the pipeline mode selects.
    fn process_burst(&mut self) {
        let ch = self.params.channels;
        let fpb = self.params.frames_per_burst;

        match self.config.mode {
            PipelineMode::Passthrough => {
                let wrote = self.output.ring.write_interleaved(&self.xfer, fpb);
                if wrote < fpb {
                    self.overflows.fetch_add((fpb - wrote) as u64, Ordering::Relaxed);
                }
            }
            PipelineMode::ResampleOnly => {
                deinterleave(&self.xfer, fpb, &mut self.ch_native);

                let mut low = usize::MAX;
                for c in 0..ch {
                    let produced = self.down[c].process(&self.ch_native[c][..fpb], &mut self.ch_mid[c]);
                    low = low.min(produced);
                }

                let mut up_frames = usize::MAX;
                for c in 0..ch {
                    let produced = self.up_channels[c].process(&self.ch_mid[c][..low], &mut self.ch_up[c]);
                    up_frames = up_frames.min(produced);
                }

                interleave(&self.ch_up, up_frames, &mut self.out_inter);
                let wrote = self.output.ring.write_interleaved(&self.out_inter, up_frames);
                if wrote < up_frames {
                    self.overflows.fetch_add((up_frames - wrote) as u64, Ordering::Relaxed);
                }
            }
            PipelineMode::ResampleAndSpectral => {
                deinterleave(&self.xfer, fpb, &mut self.ch_native);

                let mut low = usize::MAX;
                for c in 0..ch {
                    let produced = self.down[c].process(&self.ch_native[c][..fpb], &mut self.ch_mid[c]);
                    low = low.min(produced);
                }

                mix_to_mono(&self.ch_mid, low, &mut self.mono_mid);
                let wrote = self.mid_ring.write_interleaved(&self.mono_mid, low);
                if wrote < low {
                    self.overflows.fetch_add((low - wrote) as u64, Ordering::Relaxed);
                }

                // Feed the spectral stage hop by hop, popping an equal
                // block back out each time, then return to native rate.
                let hop = self.stft.config().hop_size;
                while self.mid_ring.available_to_read() >= hop {
                    self.mid_ring.read_interleaved(&mut self.hop_in, hop);
                    self.stft.push_time_domain(&self.hop_in[..hop]);

                    let got = self.stft.pop_time_domain(&mut self.hop_out[..hop]);
                    if got == hop {
                        let up = self.up_mono.process(&self.hop_out[..hop], &mut self.up_out);
                        duplicate_to_channels(&self.up_out[..up], ch, &mut self.out_inter);
                        let wrote = self.output.ring.write_interleaved(&self.out_inter, up);
                        if wrote < up {
                            self.overflows.fetch_add((up - wrote) as u64, Ordering::Relaxed);
                        }
                    }
                }
            }
        }
    }

    /// Periodic diagnostic snapshot: ring occupancies, cumulative
    /// overflow/underflow counts, spectral deltas since the last snapshot.
    fn log_stats(&mut self) {
        let hops = self.stft.hops_processed();
        let pushed = self.stft.frames_pushed();
        let popped = self.stft.frames_popped();

        debug!(
            "Stats: in_ring={} out_ring={} overflows={} underflows={} | hops +{} (tot {}), push +{}, pop +{}",
            self.in_ring.available_to_read(),
            self.output.ring.available_to_read(),
            self.overflows.load(Ordering::Relaxed),
            self.output.underflow_count(),
            hops - self.last_hops,
            hops,
            pushed - self.last_pushed,
            popped - self.last_popped,
        );

        self.last_hops = hops;
        self.last_pushed = pushed;
        self.last_popped = popped;
    }
}
