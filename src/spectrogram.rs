use std::f32::consts::PI;

use log::debug;
use microfft::Complex32;

use crate::{
    config::Config,
    error::{Error, Result},
    sample::downsample,
};

/// Hamming coefficients for a frame of `size` samples.
pub fn hamming_window(size: usize) -> Vec<f32> {
    let n = size as f32;
    (0..size)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f32 / n).cos())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSize {
    S2,
    S4,
    S8,
    S16,
    S32,
    S64,
    S128,
    S256,
    S512,
    S1024,
    S2048,
    S4096,
    S8192,
}

impl From<WindowSize> for usize {
    fn from(window_size: WindowSize) -> Self {
        match window_size {
            WindowSize::S2 => 2,
            WindowSize::S4 => 4,
            WindowSize::S8 => 8,
            WindowSize::S16 => 16,
            WindowSize::S32 => 32,
            WindowSize::S64 => 64,
            WindowSize::S128 => 128,
            WindowSize::S256 => 256,
            WindowSize::S512 => 512,
            WindowSize::S1024 => 1024,
            WindowSize::S2048 => 2048,
            WindowSize::S4096 => 4096,
            WindowSize::S8192 => 8192,
        }
    }
}

// microfft only exposes fixed-size transforms.
macro_rules! rfft {
    ($frame:expr, $n:literal, $transform:path) => {{
        let mut array = [0.0f32; $n];
        array.copy_from_slice($frame);
        $transform(&mut array).to_vec()
    }};
}

/// Real FFT of one frame; returns `window_size / 2` coefficients.
///
/// microfft packs the Nyquist coefficient into the imaginary part of the DC bin,
/// that term is cleared here.
pub fn apply_fft(frame: &[f32], window_size: WindowSize) -> Result<Vec<Complex32>> {
    let size: usize = window_size.into();
    if frame.len() != size {
        return Err(Error::InvalidInput(format!(
            "frame has {} samples, window expects {}",
            frame.len(),
            size
        )));
    }

    let mut spectrum = match window_size {
        WindowSize::S2 => rfft!(frame, 2, microfft::real::rfft_2),
        WindowSize::S4 => rfft!(frame, 4, microfft::real::rfft_4),
        WindowSize::S8 => rfft!(frame, 8, microfft::real::rfft_8),
        WindowSize::S16 => rfft!(frame, 16, microfft::real::rfft_16),
        WindowSize::S32 => rfft!(frame, 32, microfft::real::rfft_32),
        WindowSize::S64 => rfft!(frame, 64, microfft::real::rfft_64),
        WindowSize::S128 => rfft!(frame, 128, microfft::real::rfft_128),
        WindowSize::S256 => rfft!(frame, 256, microfft::real::rfft_256),
        WindowSize::S512 => rfft!(frame, 512, microfft::real::rfft_512),
        WindowSize::S1024 => rfft!(frame, 1024, microfft::real::rfft_1024),
        WindowSize::S2048 => rfft!(frame, 2048, microfft::real::rfft_2048),
        WindowSize::S4096 => rfft!(frame, 4096, microfft::real::rfft_4096),
        WindowSize::S8192 => rfft!(frame, 8192, microfft::real::rfft_8192),
    };
    if let Some(dc) = spectrum.first_mut() {
        dc.im = 0.0;
    }
    Ok(spectrum)
}

/// Magnitude spectrogram, one row of `bins` magnitudes per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    pub frames: Vec<Vec<f32>>,
    pub bins: usize,
}

impl Spectrogram {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Short-time Fourier analysis over decimated, Hamming-windowed frames.
pub struct SpectralAnalyzer {
    config: Config,
    window: Vec<f32>,
}

impl SpectralAnalyzer {
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            window: hamming_window(config.window_size.into()),
            config: config.clone(),
        })
    }

    pub fn analyze(&self, samples: &[f32], sample_rate: usize) -> Result<Spectrogram> {
        if samples.is_empty() {
            return Err(Error::InvalidInput("empty sample sequence".into()));
        }
        if sample_rate != self.config.sample_rate {
            return Err(Error::InvalidInput(format!(
                "expected samples at {} Hz, got {} Hz",
                self.config.sample_rate, sample_rate
            )));
        }

        let decimated = downsample(samples, sample_rate, self.config.downsample_factor);
        let w_size = self.window.len();
        if decimated.len() < w_size {
            return Err(Error::InvalidInput(format!(
                "{} samples after decimation, at least {} needed for one window",
                decimated.len(),
                w_size
            )));
        }

        let hop = self.config.hop_size;
        let frame_count = (decimated.len() - w_size) / hop + 1;
        let mut frames = Vec::with_capacity(frame_count);
        let mut buffer = vec![0.0f32; w_size];

        for i in 0..frame_count {
            let start = i * hop;
            for ((out, &x), &w) in buffer
                .iter_mut()
                .zip(&decimated[start..start + w_size])
                .zip(&self.window)
            {
                *out = x * w;
            }
            let spectrum = apply_fft(&buffer, self.config.window_size)?;
            frames.push(spectrum.iter().map(|c| c.norm_sqr().sqrt()).collect());
        }

        debug!(
            "analyzed {} samples into {} frames of {} bins",
            samples.len(),
            frames.len(),
            self.config.bins()
        );

        Ok(Spectrogram {
            frames,
            bins: self.config.bins(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Peak {
    pub frame: u32,
    pub bin: u32,
}

/// Keeps the strongest bin of every band in every frame when it rises above
/// the local noise floor.
pub struct PeakSelector {
    config: Config,
}

impl PeakSelector {
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
        })
    }

    /// Peaks ordered by (frame, bin). Frames starting at or after `duration_ms`
    /// are ignored.
    pub fn extract_peaks(&self, spectrogram: &Spectrogram, duration_ms: u64) -> Vec<Peak> {
        let frame_count = spectrogram
            .frames
            .iter()
            .enumerate()
            .take_while(|(i, _)| self.config.frame_to_ms(*i as u32) < duration_ms)
            .count();
        if frame_count == 0 {
            return Vec::new();
        }

        let strongest: Vec<Vec<(usize, f32)>> = spectrogram.frames[..frame_count]
            .iter()
            .map(|frame| self.strongest_bins(frame))
            .collect();

        // Every frame has one candidate per band, so the mean of the frame means
        // is the mean over all candidates of the neighborhood.
        let frame_means: Vec<f64> = strongest
            .iter()
            .map(|bins| bins.iter().map(|&(_, m)| m as f64).sum::<f64>() / bins.len() as f64)
            .collect();

        let k = self.config.noise_floor_frames;
        let mut peaks = Vec::new();
        for (t, bins) in strongest.iter().enumerate() {
            let lo = t.saturating_sub(k);
            let hi = (t + k).min(frame_count - 1);
            let floor = frame_means[lo..=hi].iter().sum::<f64>() / (hi - lo + 1) as f64;
            let threshold = (floor * self.config.threshold_ratio as f64) as f32;

            for &(bin, magnitude) in bins {
                if magnitude > threshold && magnitude > self.config.min_magnitude {
                    peaks.push(Peak {
                        frame: t as u32,
                        bin: bin as u32,
                    });
                }
            }
        }

        debug!("selected {} peaks from {} frames", peaks.len(), frame_count);
        peaks
    }

    fn strongest_bins(&self, frame: &[f32]) -> Vec<(usize, f32)> {
        self.config
            .bands
            .iter()
            .map(|&(start, end)| {
                let end = end.min(frame.len());
                let mut max_bin = start;
                let mut max_magnitude = 0.0f32;
                for bin in start..end {
                    if frame[bin] > max_magnitude {
                        max_magnitude = frame[bin];
                        max_bin = bin;
                    }
                }
                (max_bin, max_magnitude)
            })
            .collect()
    }
}
