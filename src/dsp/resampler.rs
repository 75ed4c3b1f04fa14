//! Fixed-ratio (x3) sample-rate conversion.
//!
//! Two independent modes: decimation averages non-overlapping input
//! triples, interpolation expands each input sample into three via linear
//! interpolation toward its successor. The ratio is fixed; the engine's
//! native/intermediate rates are assumed to be an exact 3:1 pair.

/// Conversion direction, selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleMode {
    /// Average each group of three input samples into one output sample.
    DownBy3,
    /// Expand each input sample into three via linear interpolation.
    UpBy3,
}

/// The fixed conversion ratio between the native and intermediate rates.
pub const RATIO: usize = 3;

/// Fixed-ratio x3 resampler.
///
/// Both modes are stateless between calls: decimation drops a trailing
/// remainder of fewer than three samples rather than carrying it over, and
/// interpolation holds the final input sample of a call instead of
/// extrapolating into the next one.
#[derive(Debug, Clone)]
pub struct Resampler3x {
    mode: ResampleMode,
}

impl Resampler3x {
    pub fn new(mode: ResampleMode) -> Self {
        Self { mode }
    }

    /// Clear retained state. The fixed-ratio modes carry nothing between
    /// calls, so this is a no-op kept so the engine can treat every DSP
    /// stage uniformly on start.
    pub fn reset(&mut self) {}

    /// Convert `input` into `output`, returning the frames produced.
    ///
    /// Output is clamped to `output.len()`; neither mode fails.
    pub fn process(&mut self, input: &[f32], output: &mut [f32]) -> usize {
        match self.mode {
            ResampleMode::DownBy3 => down_by_3(input, output),
            ResampleMode::UpBy3 => up_by_3(input, output),
        }
    }
}

fn down_by_3(input: &[f32], output: &mut [f32]) -> usize {
    let produced = (input.len() / RATIO).min(output.len());
    for (out, triple) in output[..produced].iter_mut().zip(input.chunks_exact(RATIO)) {
        *out = (triple[0] + triple[1] + triple[2]) * (1.0 / 3.0);
    }
    produced
}

fn up_by_3(input: &[f32], output: &mut [f32]) -> usize {
    if input.is_empty() {
        return 0;
    }
    let produced_max = (input.len() * RATIO).min(output.len());
    let mut out_idx = 0;

    // Each input sample interpolates toward the next; the last one holds.
    for (i, &x0) in input.iter().enumerate() {
        if out_idx + RATIO > produced_max {
            break;
        }
        let x1 = if i + 1 < input.len() { input[i + 1] } else { x0 };
        let d = (x1 - x0) * (1.0 / 3.0);
        output[out_idx] = x0;
        output[out_idx + 1] = x0 + d;
        output[out_idx + 2] = x0 + 2.0 * d;
        out_idx += RATIO;
    }
    out_idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimates_constant_triples_to_their_mean() {
        let mut resampler = Resampler3x::new(ResampleMode::DownBy3);
        let input = vec![5.0f32; 9];
        let mut output = vec![0.0f32; 16];
        let produced = resampler.process(&input, &mut output);
        assert_eq!(produced, 3);
        assert_eq!(&output[..3], &[5.0, 5.0, 5.0]);
    }

    #[test]
    fn decimation_drops_trailing_remainder() {
        let mut resampler = Resampler3x::new(ResampleMode::DownBy3);
        let input = vec![5.0f32; 10];
        let mut output = vec![0.0f32; 16];
        assert_eq!(resampler.process(&input, &mut output), 3);
    }

    #[test]
    fn decimation_averages_each_triple() {
        let mut resampler = Resampler3x::new(ResampleMode::DownBy3);
        let input = [0.0, 3.0, 6.0, 1.0, 1.0, 1.0];
        let mut output = vec![0.0f32; 4];
        let produced = resampler.process(&input, &mut output);
        assert_eq!(produced, 2);
        assert!((output[0] - 3.0).abs() < 1e-6);
        assert!((output[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn interpolation_holds_a_lone_sample() {
        let mut resampler = Resampler3x::new(ResampleMode::UpBy3);
        let mut output = vec![0.0f32; 8];
        let produced = resampler.process(&[9.0], &mut output);
        assert_eq!(produced, 3);
        assert_eq!(&output[..3], &[9.0, 9.0, 9.0]);
    }

    #[test]
    fn interpolation_fills_thirds_between_samples() {
        let mut resampler = Resampler3x::new(ResampleMode::UpBy3);
        let mut output = vec![0.0f32; 8];
        let produced = resampler.process(&[0.0, 3.0], &mut output);
        assert_eq!(produced, 6);
        // The final input sample holds its value rather than extrapolating.
        for (i, expected) in [0.0, 1.0, 2.0, 3.0, 3.0, 3.0].iter().enumerate() {
            assert!((output[i] - expected).abs() < 1e-6, "sample {i}: {} != {expected}", output[i]);
        }
    }

    #[test]
    fn both_modes_clamp_to_output_capacity() {
        let mut down = Resampler3x::new(ResampleMode::DownBy3);
        let mut up = Resampler3x::new(ResampleMode::UpBy3);
        let input = vec![1.0f32; 30];
        let mut small = vec![0.0f32; 4];
        assert_eq!(down.process(&input, &mut small), 4);
        // Interpolation emits whole triples only, so 4 slots fit one triple.
        assert_eq!(up.process(&input, &mut small), 3);
    }
}
