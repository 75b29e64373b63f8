use std::collections::{HashMap, hash_map};

use log::debug;

use crate::{
    config::{AddressLayout, Config},
    error::{Error, Result},
    spectrogram::Peak,
};

/// Song id used for query signatures; never assigned to a catalog song.
pub const QUERY_SONG_ID: u32 = 0;

/// Packed (anchor bin, target bin, time gap) of one peak pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u32);

impl Address {
    pub fn pack(
        layout: &AddressLayout,
        anchor_bin: u32,
        target_bin: u32,
        delta_ms: u32,
    ) -> Result<Self> {
        layout.check()?;
        let max_freq = layout.max_freq();
        if anchor_bin > max_freq || target_bin > max_freq {
            return Err(Error::EncodingRange(format!(
                "bin pair ({anchor_bin}, {target_bin}) exceeds {} bits",
                layout.freq_bits
            )));
        }
        if delta_ms > layout.max_delta() {
            return Err(Error::EncodingRange(format!(
                "time gap {delta_ms} ms exceeds {} bits",
                layout.delta_bits
            )));
        }
        let target_shift = layout.delta_bits;
        let anchor_shift = layout.delta_bits + layout.freq_bits;
        Ok(Address(
            (anchor_bin << anchor_shift) | (target_bin << target_shift) | delta_ms,
        ))
    }

    /// Returns `(anchor_bin, target_bin, delta_ms)`.
    pub fn unpack(&self, layout: &AddressLayout) -> Result<(u32, u32, u32)> {
        layout.check()?;
        let target_shift = layout.delta_bits;
        let anchor_shift = layout.delta_bits + layout.freq_bits;
        Ok((
            (self.0 >> anchor_shift) & layout.max_freq(),
            (self.0 >> target_shift) & layout.max_freq(),
            self.0 & layout.max_delta(),
        ))
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for Address {
    fn from(value: u32) -> Self {
        Address(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Couple {
    pub anchor_time_ms: u32,
    pub song_id: u32,
}

/// Address to couples multi-map. Couples are only ever appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprints {
    map: HashMap<Address, Vec<Couple>>,
}

impl Fingerprints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, address: Address, couple: Couple) {
        self.map.entry(address).or_default().push(couple);
    }

    pub fn get(&self, address: &Address) -> Option<&[Couple]> {
        self.map.get(address).map(Vec::as_slice)
    }

    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.map.keys().copied().collect();
        addresses.sort_unstable();
        addresses
    }

    pub fn iter(&self) -> hash_map::Iter<'_, Address, Vec<Couple>> {
        self.map.iter()
    }

    /// Number of distinct addresses.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<'a> IntoIterator for &'a Fingerprints {
    type Item = (&'a Address, &'a Vec<Couple>);
    type IntoIter = hash_map::Iter<'a, Address, Vec<Couple>>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.iter()
    }
}

/// Pairs every anchor peak with the later peaks of its target zone.
pub struct FingerprintEncoder {
    config: Config,
}

impl FingerprintEncoder {
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
        })
    }

    pub fn fingerprint(&self, peaks: &[Peak], song_id: u32) -> Result<Fingerprints> {
        let mut peaks = peaks.to_vec();
        peaks.sort_unstable();

        let config = &self.config;
        let mut fingerprints = Fingerprints::new();

        for (i, anchor) in peaks.iter().enumerate() {
            let anchor_time_ms = ms_to_u32(config.frame_to_ms(anchor.frame))?;
            let mut targets = 0;

            for target in &peaks[i + 1..] {
                if target.frame == anchor.frame {
                    continue;
                }
                let delta_ms = config.frame_to_ms(target.frame - anchor.frame);
                if delta_ms > config.target_zone_ms as u64 {
                    break;
                }
                if target.bin.abs_diff(anchor.bin) > config.max_bin_distance {
                    continue;
                }

                let address =
                    Address::pack(&config.layout, anchor.bin, target.bin, delta_ms as u32)?;
                fingerprints.push(
                    address,
                    Couple {
                        anchor_time_ms,
                        song_id,
                    },
                );

                targets += 1;
                if targets == config.fan_out {
                    break;
                }
            }
        }

        debug!(
            "encoded {} peaks into {} addresses for song {}",
            peaks.len(),
            fingerprints.len(),
            song_id
        );
        Ok(fingerprints)
    }
}

fn ms_to_u32(ms: u64) -> Result<u32> {
    u32::try_from(ms)
        .map_err(|_| Error::EncodingRange(format!("anchor time {ms} ms does not fit 32 bits")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::spectrogram::tests::test_config;

    fn peak(frame: u32, bin: u32) -> Peak {
        Peak { frame, bin }
    }

    fn sample_peaks() -> Vec<Peak> {
        vec![
            peak(0, 12),
            peak(0, 90),
            peak(1, 33),
            peak(2, 200),
            peak(3, 12),
            peak(5, 64),
            peak(9, 150),
            peak(14, 90),
            peak(30, 7),
            peak(31, 300),
        ]
    }

    #[test]
    fn test_pack_unpack() {
        let layout = AddressLayout::default();
        for &(a, b, d) in &[(0, 0, 0), (511, 511, 16_383), (12, 300, 96), (1, 2, 3)] {
            let address = Address::pack(&layout, a, b, d).unwrap();
            assert_eq!(address.unpack(&layout).unwrap(), (a, b, d));
        }
    }

    #[test]
    fn test_pack_matches_bit_layout() {
        let address = Address::pack(&AddressLayout::default(), 3, 5, 7).unwrap();
        assert_eq!(address.value(), (3 << 23) | (5 << 14) | 7);
    }

    #[test]
    fn test_pack_rejects_out_of_range_values() {
        let layout = AddressLayout::default();
        assert!(matches!(
            Address::pack(&layout, 512, 0, 0),
            Err(Error::EncodingRange(_))
        ));
        assert!(matches!(
            Address::pack(&layout, 0, 512, 0),
            Err(Error::EncodingRange(_))
        ));
        assert!(matches!(
            Address::pack(&layout, 0, 0, 16_384),
            Err(Error::EncodingRange(_))
        ));
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let encoder = FingerprintEncoder::new(&test_config()).unwrap();
        let a = encoder.fingerprint(&sample_peaks(), 3).unwrap();
        let mut shuffled = sample_peaks();
        shuffled.reverse();
        let b = encoder.fingerprint(&shuffled, 3).unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_location_invariance() {
        let config = test_config();
        let encoder = FingerprintEncoder::new(&config).unwrap();
        let k = 17;
        let shifted: Vec<Peak> = sample_peaks()
            .iter()
            .map(|p| peak(p.frame + k, p.bin))
            .collect();

        let original = encoder.fingerprint(&sample_peaks(), 1).unwrap();
        let moved = encoder.fingerprint(&shifted, 1).unwrap();
        assert_eq!(original.addresses(), moved.addresses());

        let shift_ms = config.frame_to_ms(k) as u32;
        for (address, couples) in &original {
            let expected: Vec<u32> = couples.iter().map(|c| c.anchor_time_ms + shift_ms).collect();
            let actual: Vec<u32> = moved
                .get(address)
                .unwrap()
                .iter()
                .map(|c| c.anchor_time_ms)
                .collect();
            assert_eq!(expected, actual);
        }
    }

    #[test]
    fn test_bounded_pairing() {
        let config = test_config();
        let encoder = FingerprintEncoder::new(&config).unwrap();
        let fingerprints = encoder.fingerprint(&sample_peaks(), 1).unwrap();

        for (address, couples) in &fingerprints {
            let (anchor_bin, target_bin, delta_ms) = address.unpack(&config.layout).unwrap();
            assert!(delta_ms > 0);
            assert!(delta_ms <= config.target_zone_ms);
            assert!(anchor_bin.abs_diff(target_bin) <= config.max_bin_distance);
            for couple in couples {
                assert_eq!(couple.song_id, 1);
            }
        }
        // frames 14 and 30 are 512 ms apart, beyond the 500 ms zone
        let anchor_14 = config.frame_to_ms(14) as u32;
        assert!(
            fingerprints
                .iter()
                .flat_map(|(_, couples)| couples)
                .all(|c| c.anchor_time_ms != anchor_14)
        );
    }

    #[test]
    fn test_same_frame_peaks_are_not_paired() {
        let encoder = FingerprintEncoder::new(&test_config()).unwrap();
        let fingerprints = encoder.fingerprint(&[peak(4, 10), peak(4, 20)], 1).unwrap();
        assert!(fingerprints.is_empty());
    }

    #[test]
    fn test_fan_out_limits_targets() {
        let config = Config {
            fan_out: 2,
            ..test_config()
        };
        let encoder = FingerprintEncoder::new(&config).unwrap();
        let peaks: Vec<Peak> = (0..6).map(|f| peak(f, 40 + f)).collect();
        let fingerprints = encoder.fingerprint(&peaks, 1).unwrap();
        let anchors_at_zero = fingerprints
            .iter()
            .flat_map(|(_, couples)| couples)
            .filter(|c| c.anchor_time_ms == 0)
            .count();
        assert_eq!(anchors_at_zero, 2);
    }

    #[test]
    fn test_collisions_are_appended() {
        let encoder = FingerprintEncoder::new(&test_config()).unwrap();
        // the same (bin, bin, gap) triple at two positions
        let peaks = vec![peak(0, 10), peak(1, 20), peak(40, 10), peak(41, 20)];
        let fingerprints = encoder.fingerprint(&peaks, 9).unwrap();
        let address = Address::pack(&AddressLayout::default(), 10, 20, 32).unwrap();
        let times: HashSet<u32> = fingerprints
            .get(&address)
            .unwrap()
            .iter()
            .map(|c| c.anchor_time_ms)
            .collect();
        assert_eq!(times, HashSet::from([0, 1280]));
    }

    #[test]
    fn test_layout_wider_than_address_is_rejected() {
        let layout = AddressLayout {
            freq_bits: 16,
            delta_bits: 16,
        };
        assert!(matches!(
            Address::pack(&layout, 3, 5, 7),
            Err(Error::EncodingRange(_))
        ));
        assert!(matches!(
            Address::from(7).unpack(&layout),
            Err(Error::EncodingRange(_))
        ));
    }

    #[test]
    fn test_zero_width_field_is_rejected() {
        let layout = AddressLayout {
            freq_bits: 0,
            delta_bits: 14,
        };
        assert!(matches!(
            Address::pack(&layout, 0, 0, 7),
            Err(Error::EncodingRange(_))
        ));
    }
}
