use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result, bail};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

const RESAMPLE_CHUNK: usize = 1024;

/// Decoded mono PCM.
pub struct Sample {
    pub samples: Vec<f32>,
    pub sample_rate: usize,
}

pub fn low_pass_filter(samples: &[f32], sample_rate: usize, cutoff_freq: f32) -> Vec<f32> {
    // IIR low pass filter
    // y[n] = alpha * x[n] + (1.0 - alpha) * y[n-1]

    let fc = cutoff_freq / sample_rate as f32;
    let alpha = 2.0 * std::f32::consts::PI * fc / (2.0 * std::f32::consts::PI * fc + 1.0);

    let mut filtered = Vec::with_capacity(samples.len());
    let mut prev = match samples.first() {
        Some(&first) => first,
        None => return filtered,
    };
    filtered.push(prev);

    for &x in &samples[1..] {
        prev = alpha * x + (1.0 - alpha) * prev;
        filtered.push(prev);
    }
    filtered
}

pub fn downsample(samples: &[f32], sample_rate: usize, factor: usize) -> Vec<f32> {
    if factor <= 1 {
        return samples.to_vec();
    }
    /*
        When downsampling by a factor, the Nyquist frequency of the new sample rate
        will be (sample_rate/factor)/2. To prevent aliasing, we need to filter out
        frequencies above this threshold. Using 0.45 instead of 0.5 provides a small
        margin to account for the non-ideal nature of our simple filter.
    */
    let cutoff_freq = (sample_rate / factor) as f32 * 0.45;
    let filtered = low_pass_filter(samples, sample_rate, cutoff_freq);

    filtered.into_iter().step_by(factor).collect()
}

impl Sample {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Converts to `target_rate` with a windowed sinc resampler.
    pub fn resample(self, target_rate: usize) -> Result<Sample> {
        if self.sample_rate == target_rate || self.samples.is_empty() {
            return Ok(Sample {
                samples: self.samples,
                sample_rate: target_rate,
            });
        }

        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            oversampling_factor: 64,
            interpolation: SincInterpolationType::Linear,
            window: WindowFunction::BlackmanHarris2,
        };
        let mut resampler = SincFixedIn::<f32>::new(
            target_rate as f64 / self.sample_rate as f64,
            2.0,
            params,
            RESAMPLE_CHUNK,
            1,
        )?;

        let mut output = Vec::new();
        for chunk in self.samples.chunks(RESAMPLE_CHUNK) {
            let mut padded = chunk.to_vec();
            padded.resize(RESAMPLE_CHUNK, 0.0);
            let result = resampler.process(&[padded], None)?;
            output.extend_from_slice(&result[0]);
        }

        // Drop the tail produced by zero padding the last chunk.
        let expected = self.samples.len() * target_rate / self.sample_rate;
        output.truncate(expected);

        Ok(Sample {
            samples: output,
            sample_rate: target_rate,
        })
    }

    pub fn read_mp3(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut decoder = minimp3::Decoder::new(reader);

        let mut mono_samples = Vec::new();
        let mut sampling_rate = 0;

        while let Ok(minimp3::Frame {
            data,
            sample_rate,
            channels,
            ..
        }) = decoder.next_frame()
        {
            if sampling_rate == 0 {
                sampling_rate = sample_rate;
            }

            match channels {
                1 => {
                    mono_samples.extend(data.iter().map(|&s| s as f32));
                }
                2 => {
                    mono_samples.reserve(data.len() / 2);

                    for chunk in data.chunks_exact(2) {
                        let avg = (chunk[0] as f32 + chunk[1] as f32) * 0.5;
                        mono_samples.push(avg);
                    }
                }
                _ => bail!(
                    "unsupported number of channels in {}: {}",
                    path.display(),
                    channels
                ),
            }
        }
        if sampling_rate <= 0 {
            bail!("no audio frames decoded from {}", path.display());
        }
        Ok(Sample {
            samples: mono_samples,
            sample_rate: sampling_rate as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downsample_length() {
        let samples = vec![1.0; 4000];
        let out = downsample(&samples, 44_100, 4);
        assert_eq!(out.len(), 1000);
    }

    #[test]
    fn test_downsample_factor_one_is_identity() {
        let samples = vec![0.5, -0.25, 0.125];
        assert_eq!(downsample(&samples, 8000, 1), samples);
    }

    #[test]
    fn test_low_pass_keeps_dc() {
        let samples = vec![2.0; 256];
        let out = low_pass_filter(&samples, 44_100, 5000.0);
        assert!(out.iter().all(|&v| (v - 2.0).abs() < 1e-4));
    }

    #[test]
    fn test_low_pass_empty() {
        assert!(low_pass_filter(&[], 44_100, 5000.0).is_empty());
    }

    #[test]
    fn test_duration_ms() {
        let sample = Sample {
            samples: vec![0.0; 22_050],
            sample_rate: 44_100,
        };
        assert_eq!(sample.duration_ms(), 500);
    }

    #[test]
    fn test_resample_same_rate_is_noop() {
        let sample = Sample {
            samples: vec![0.1, 0.2, 0.3],
            sample_rate: 44_100,
        };
        let out = sample.resample(44_100).unwrap();
        assert_eq!(out.samples, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_resample_length() {
        let sample = Sample {
            samples: vec![0.0; 48_000],
            sample_rate: 48_000,
        };
        let out = sample.resample(44_100).unwrap();
        assert_eq!(out.sample_rate, 44_100);
        assert!(out.samples.len() <= 44_100);
        assert!(out.samples.len() > 40_000);
    }
}
