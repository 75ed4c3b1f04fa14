//! Engine configuration and CLI argument parsing.

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dsp::SpectralConfig;

/// Which stages the worker loop runs between the input and output rings.
///
/// A single configurable pipeline replaces separate engine variants: the
/// mode is chosen at construction and the worker executes only the stages
/// it selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineMode {
    /// Copy captured bursts straight to the output ring.
    Passthrough,
    /// Per-channel decimate x3 then interpolate x3 round trip.
    ResampleOnly,
    /// Decimate, mix to mono, spectral round trip, interpolate, duplicate.
    #[default]
    ResampleAndSpectral,
}

impl std::fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineMode::Passthrough => write!(f, "passthrough"),
            PipelineMode::ResampleOnly => write!(f, "resample-only"),
            PipelineMode::ResampleAndSpectral => write!(f, "resample-and-spectral"),
        }
    }
}

/// Engine tunables. Defaults match the production sizes; tests shrink
/// them where smaller fixtures make assertions sharper.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Processing stages the worker runs.
    pub mode: PipelineMode,
    /// Sizing of the spectral stage.
    pub spectral: SpectralConfig,
    /// Capacity of the native-rate rings in milliseconds of audio.
    pub ring_capacity_ms: u32,
    /// Bursts of silence pre-filled into the output ring at start.
    pub prime_bursts: usize,
    /// Grace window after start during which output shortfall is expected
    /// and excluded from underflow accounting.
    pub warmup: Duration,
    /// Timeout of the worker's blocking capture read; also bounds how
    /// quickly the worker observes a stop request.
    pub read_timeout: Duration,
    /// Interval between diagnostic snapshots.
    pub stats_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::default(),
            spectral: SpectralConfig::default(),
            ring_capacity_ms: 200,
            prime_bursts: 4,
            warmup: Duration::from_millis(300),
            read_timeout: Duration::from_millis(10),
            stats_interval: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    /// Ring capacity in frames for the given native rate.
    pub fn ring_capacity_frames(&self, sample_rate: u32) -> usize {
        (sample_rate as usize * self.ring_capacity_ms as usize / 1000).max(1)
    }
}

/// Duplex engine demo configuration.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "duplex-engine")]
#[command(author, version, about = "A full-duplex low-latency audio streaming engine", long_about = None)]
pub struct AppConfig {
    /// Processing stages to run between capture and playback
    #[arg(long, value_enum, default_value = "resample-and-spectral")]
    pub mode: PipelineMode,

    /// Frames per device burst (should be divisible by 3 for a clean
    /// decimation round trip)
    #[arg(long, default_value = "480")]
    pub frames_per_burst: usize,

    /// Spectral transform length (power of two)
    #[arg(long, default_value = "512")]
    pub fft_size: usize,

    /// New samples consumed per spectral hop
    #[arg(long, default_value = "96")]
    pub hop_size: usize,

    /// Overlap history carried between spectral frames
    #[arg(long, default_value = "384")]
    pub history_size: usize,

    /// Ring buffer capacity in milliseconds of audio
    #[arg(long, default_value = "200")]
    pub ring_ms: u32,

    /// Bursts of silence primed into the output ring at start
    #[arg(long, default_value = "4")]
    pub prime_bursts: usize,

    /// Warm-up grace window in milliseconds during which underflows are
    /// not counted
    #[arg(long, default_value = "300")]
    pub warmup_ms: u64,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl AppConfig {
    /// Parse configuration from command line arguments.
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Build the engine configuration this CLI selection describes.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            mode: self.mode,
            spectral: SpectralConfig {
                fft_size: self.fft_size,
                hop_size: self.hop_size,
                history_size: self.history_size,
                ..SpectralConfig::default()
            },
            ring_capacity_ms: self.ring_ms,
            prime_bursts: self.prime_bursts,
            warmup: Duration::from_millis(self.warmup_ms),
            ..EngineConfig::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.frames_per_burst == 0 {
            anyhow::bail!("frames-per-burst must be positive");
        }
        if self.ring_ms == 0 {
            anyhow::bail!("ring-ms must be positive");
        }
        self.engine_config().spectral.validate()?;
        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!("Configuration:");
        info!("  Pipeline mode: {}", self.mode);
        info!("  Frames per burst: {}", self.frames_per_burst);
        info!("  Spectral sizing: fft {}, hop {}, history {}", self.fft_size, self.hop_size, self.history_size);
        info!("  Ring capacity: {} ms", self.ring_ms);
        info!("  Priming: {} bursts", self.prime_bursts);
        info!("  Warm-up window: {} ms", self.warmup_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_engine_config_matches_production_sizes() {
        let config = EngineConfig::default();
        assert_eq!(config.spectral.fft_size, 512);
        assert_eq!(config.spectral.hop_size, 96);
        assert_eq!(config.spectral.history_size, 384);
        assert_eq!(config.ring_capacity_frames(48_000), 9_600);
    }

    #[test]
    fn validation_rejects_bad_spectral_sizes() {
        let mut config = AppConfig::try_parse_from(["duplex-engine"]).unwrap();
        assert!(config.validate().is_ok());
        config.fft_size = 500;
        assert!(config.validate().is_err());
    }
}
