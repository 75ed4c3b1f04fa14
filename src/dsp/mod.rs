//! Signal-processing core: the lock-free frame ring, the fixed-ratio
//! resampler and the streaming spectral processor.

pub mod resampler;
pub mod ring_buffer;
pub mod spectral;

pub use resampler::{ResampleMode, Resampler3x};
pub use ring_buffer::RingBuffer;
pub use spectral::{SpectralConfig, SpectralProcessor};
