//! A full-duplex, low-latency audio streaming engine.
//!
//! Captured audio flows through a fixed-ratio sample-rate conversion and
//! a streaming spectral (STFT overlap-add) processing stage, then out to
//! a real-time playback callback. A lock-free SPSC ring buffer on each
//! side of the soft-real-time worker thread absorbs timing mismatches, so
//! the hard-real-time callback never blocks: shortfall is zero-filled and
//! accounted as underflow instead.

pub mod audio;
pub mod config;
pub mod dsp;
pub mod engine;

pub use config::{AppConfig, EngineConfig, PipelineMode};
pub use engine::{DuplexEngine, EngineError, EngineStats};
