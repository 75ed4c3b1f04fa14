//! Device boundary: the capture-source and playback-sink contracts the
//! engine is written against, plus cpal-backed default-device
//! implementations of both.

mod capture;
mod playback;
pub mod util;

pub use capture::{CaptureSource, CpalCapture};
pub use playback::{AudioPull, CpalPlayback, PlaybackSink};

/// Negotiated device parameters, read once at engine start from the
/// playback sink. The design assumes the native rate supports an exact
/// 3:1 reduction to the intermediate rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceParams {
    /// Interleaved channels per frame (mono or stereo).
    pub channels: usize,
    /// Frames the device produces or consumes per callback burst.
    pub frames_per_burst: usize,
    /// Native sample rate in Hz.
    pub sample_rate: u32,
}
