use crate::{
    error::{Error, Result},
    spectrogram::WindowSize,
};

/// Bit widths of the three fields packed into an [`Address`](crate::fingerprint::Address).
///
/// Layout from most to least significant bit: anchor bin, target bin, time gap in ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressLayout {
    pub freq_bits: u32,
    pub delta_bits: u32,
}

impl AddressLayout {
    pub fn total_bits(&self) -> u32 {
        self.freq_bits.saturating_mul(2).saturating_add(self.delta_bits)
    }

    pub fn max_freq(&self) -> u32 {
        low_mask(self.freq_bits)
    }

    pub fn max_delta(&self) -> u32 {
        low_mask(self.delta_bits)
    }

    /// Every field must be at least one bit wide and the three must fit 32 bits.
    pub fn check(&self) -> Result<()> {
        if self.freq_bits == 0 || self.delta_bits == 0 || self.total_bits() > 32 {
            return Err(Error::EncodingRange(format!(
                "address layout {}+{}+{} bits does not fit 32 bits",
                self.freq_bits, self.freq_bits, self.delta_bits
            )));
        }
        Ok(())
    }
}

impl Default for AddressLayout {
    fn default() -> Self {
        /*
            9 bits for the anchor bin
            9 bits for the target bin
            14 bits for the time gap in milliseconds
        */
        Self {
            freq_bits: 9,
            delta_bits: 14,
        }
    }
}

fn low_mask(bits: u32) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1u32 << bits) - 1
    }
}

/// Analysis, pairing and scoring parameters shared by every component.
///
/// Ingestion and recognition must run with the same configuration, otherwise
/// addresses computed for a clip will never line up with the catalog.
#[derive(Debug, Clone)]
pub struct Config {
    /// Rate (Hz) of the samples handed to the analyzer.
    pub sample_rate: usize,
    /// Decimation applied before the FFT.
    pub downsample_factor: usize,
    pub window_size: WindowSize,
    /// Samples between the starts of two consecutive frames, after decimation.
    pub hop_size: usize,
    /// Half-open bin ranges, one peak candidate per band and frame.
    pub bands: Vec<(usize, usize)>,
    /// Half-width, in frames, of the neighborhood used for the noise floor.
    pub noise_floor_frames: usize,
    pub threshold_ratio: f32,
    pub min_magnitude: f32,
    pub target_zone_ms: u32,
    pub max_bin_distance: u32,
    pub fan_out: usize,
    pub layout: AddressLayout,
    /// Width of one alignment histogram bucket.
    pub bucket_ms: u32,
    pub min_score: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            downsample_factor: 4,
            window_size: WindowSize::S1024,
            hop_size: 512,
            bands: vec![(0, 10), (10, 20), (20, 40), (40, 80), (80, 160), (160, 512)],
            noise_floor_frames: 3,
            threshold_ratio: 1.0,
            min_magnitude: 1e-3,
            target_zone_ms: 500,
            max_bin_distance: 256,
            fan_out: 10,
            layout: AddressLayout::default(),
            bucket_ms: 50,
            min_score: 1,
        }
    }
}

impl Config {
    /// Sample rate seen by the FFT, after decimation.
    pub fn analysis_rate(&self) -> usize {
        self.sample_rate / self.downsample_factor.max(1)
    }

    /// Number of magnitude bins per spectrogram frame.
    pub fn bins(&self) -> usize {
        usize::from(self.window_size) / 2
    }

    /// Start time of `frames` frames, in whole milliseconds.
    pub fn frame_to_ms(&self, frames: u32) -> u64 {
        frames as u64 * self.hop_size as u64 * 1000 / self.analysis_rate() as u64
    }

    pub fn validate(&self) -> Result<()> {
        if self.downsample_factor == 0 {
            return Err(Error::InvalidInput("downsample factor must be positive".into()));
        }
        if self.analysis_rate() == 0 {
            return Err(Error::InvalidInput(format!(
                "sample rate {} is too low for downsample factor {}",
                self.sample_rate, self.downsample_factor
            )));
        }
        let window: usize = self.window_size.into();
        if self.hop_size == 0 || self.hop_size > window {
            return Err(Error::InvalidInput(format!(
                "hop size {} must be in 1..={}",
                self.hop_size, window
            )));
        }
        if self.bucket_ms == 0 {
            return Err(Error::InvalidInput("bucket width must be positive".into()));
        }
        if self.fan_out == 0 {
            return Err(Error::InvalidInput("fan out must be positive".into()));
        }
        if self.bands.is_empty() {
            return Err(Error::InvalidInput("at least one band is required".into()));
        }
        let bins = self.bins();
        for &(start, end) in &self.bands {
            if start >= end || end > bins {
                return Err(Error::InvalidInput(format!(
                    "band {start}..{end} is empty or exceeds {bins} bins"
                )));
            }
        }

        let layout = self.layout;
        layout.check()?;
        if (bins - 1) as u64 > layout.max_freq() as u64 {
            return Err(Error::EncodingRange(format!(
                "{} frequency bits cannot hold bin {}",
                layout.freq_bits,
                bins - 1
            )));
        }
        if self.target_zone_ms > layout.max_delta() {
            return Err(Error::EncodingRange(format!(
                "{} delta bits cannot hold a {} ms target zone",
                layout.delta_bits, self.target_zone_ms
            )));
        }
        Ok(())
    }
}
