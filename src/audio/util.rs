//! Shared audio utilities: channel layout conversions and device config
//! selection for the cpal-backed capture and playback implementations.

use anyhow::Result;
use cpal::traits::DeviceTrait;
use cpal::{Device, SampleFormat, SupportedStreamConfig, SupportedStreamConfigRange};

/// Get a human-readable device name, or "Unknown" if unavailable.
pub fn get_device_name(device: &Device) -> String {
    device.description().ok().map(|desc| desc.name().to_string()).unwrap_or_else(|| "Unknown".to_string())
}

/// Find the best matching audio configuration.
///
/// Searches for a configuration that:
/// 1. Supports mono or stereo (max 2 channels)
/// 2. Uses F32 sample format (universally supported on modern hardware)
/// 3. Matches the target sample rate, or uses the closest available rate
pub fn find_best_config(configs: impl Iterator<Item = SupportedStreamConfigRange>, target_sample_rate: u32) -> Result<SupportedStreamConfig> {
    let mut f32_configs: Vec<SupportedStreamConfigRange> = Vec::new();

    for config in configs {
        if config.channels() > 2 {
            continue;
        }
        if config.sample_format() == SampleFormat::F32 {
            f32_configs.push(config);
        }
    }

    if f32_configs.is_empty() {
        anyhow::bail!("No F32 audio configuration found - this is unexpected on modern hardware");
    }

    for config in &f32_configs {
        let min_rate = config.min_sample_rate();
        let max_rate = config.max_sample_rate();

        if target_sample_rate >= min_rate && target_sample_rate <= max_rate {
            return Ok((*config).with_sample_rate(target_sample_rate));
        }
    }

    // No exact match: use the first config clamped to its nearest rate.
    let config = &f32_configs[0];
    let rate = if target_sample_rate < config.min_sample_rate() {
        config.min_sample_rate()
    } else {
        config.max_sample_rate()
    };
    Ok((*config).with_sample_rate(rate))
}

/// Split `frames` interleaved frames into per-channel streams.
///
/// `channels[c]` must each hold at least `frames` samples.
pub fn deinterleave(interleaved: &[f32], frames: usize, channels: &mut [Vec<f32>]) {
    let ch = channels.len();
    for i in 0..frames {
        for (c, channel) in channels.iter_mut().enumerate() {
            channel[i] = interleaved[i * ch + c];
        }
    }
}

/// Interleave `frames` frames from per-channel streams into `out`.
pub fn interleave(channels: &[Vec<f32>], frames: usize, out: &mut [f32]) {
    let ch = channels.len();
    for i in 0..frames {
        for (c, channel) in channels.iter().enumerate() {
            out[i * ch + c] = channel[i];
        }
    }
}

/// Mix per-channel streams to mono by averaging, writing `frames` samples.
pub fn mix_to_mono(channels: &[Vec<f32>], frames: usize, out: &mut [f32]) {
    let scale = 1.0 / channels.len() as f32;
    for (i, sample) in out[..frames].iter_mut().enumerate() {
        *sample = channels.iter().map(|c| c[i]).sum::<f32>() * scale;
    }
}

/// Duplicate a mono stream across `channels` interleaved output channels.
pub fn duplicate_to_channels(mono: &[f32], channels: usize, out: &mut [f32]) {
    for (i, &sample) in mono.iter().enumerate() {
        for c in 0..channels {
            out[i * channels + c] = sample;
        }
    }
}

/// Convert an interleaved buffer between channel layouts: averaging when
/// narrowing, duplicating the last source channel when widening.
pub fn adapt_channels(data: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to {
        return data.to_vec();
    }
    let frames = data.len() / from;
    let mut out = vec![0.0f32; frames * to];
    if to < from {
        let scale = 1.0 / from as f32;
        for i in 0..frames {
            let mixed = data[i * from..(i + 1) * from].iter().sum::<f32>() * scale;
            for c in 0..to {
                out[i * to + c] = mixed;
            }
        }
    } else {
        for i in 0..frames {
            for c in 0..to {
                out[i * to + c] = data[i * from + c.min(from - 1)];
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deinterleave_interleave_round_trip() {
        let interleaved = vec![1.0f32, -1.0, 2.0, -2.0, 3.0, -3.0];
        let mut channels = vec![vec![0.0f32; 3], vec![0.0f32; 3]];
        deinterleave(&interleaved, 3, &mut channels);
        assert_eq!(channels[0], vec![1.0, 2.0, 3.0]);
        assert_eq!(channels[1], vec![-1.0, -2.0, -3.0]);

        let mut out = vec![0.0f32; 6];
        interleave(&channels, 3, &mut out);
        assert_eq!(out, interleaved);
    }

    #[test]
    fn mixdown_averages_channels() {
        let channels = vec![vec![0.5f32, 1.0], vec![1.0f32, -1.0]];
        let mut mono = vec![0.0f32; 2];
        mix_to_mono(&channels, 2, &mut mono);
        assert_eq!(mono, vec![0.75, 0.0]);
    }

    #[test]
    fn duplication_fans_mono_out_to_stereo() {
        let mut out = vec![0.0f32; 4];
        duplicate_to_channels(&[0.25, -0.5], 2, &mut out);
        assert_eq!(out, vec![0.25, 0.25, -0.5, -0.5]);
    }

    #[test]
    fn channel_adaptation_narrows_and_widens() {
        let stereo = vec![0.5f32, 1.0, -0.5, -1.0];
        assert_eq!(adapt_channels(&stereo, 2, 1), vec![0.75, -0.75]);
        assert_eq!(adapt_channels(&[0.5, -0.5], 1, 2), vec![0.5, 0.5, -0.5, -0.5]);
    }
}
