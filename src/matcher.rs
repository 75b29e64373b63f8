use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};

use log::debug;

use crate::{
    config::Config,
    error::Result,
    fingerprint::{Address, FingerprintEncoder, Fingerprints, QUERY_SONG_ID},
    spectrogram::{PeakSelector, SpectralAnalyzer},
    store::FingerprintStore,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub song_id: u32,
    /// Distinct addresses agreeing on the best alignment.
    pub score: f64,
    /// Start of the clip inside the song, rounded down to the bucket width.
    pub offset_ms: i64,
}

/// Recognizes clips against the songs held by a [`FingerprintStore`].
pub struct MatchEngine<'a, S: FingerprintStore + ?Sized> {
    analyzer: SpectralAnalyzer,
    selector: PeakSelector,
    encoder: FingerprintEncoder,
    bucket_ms: i64,
    min_score: usize,
    store: &'a S,
}

impl<'a, S: FingerprintStore + ?Sized> MatchEngine<'a, S> {
    pub fn new(config: &Config, store: &'a S) -> Result<Self> {
        Ok(Self {
            analyzer: SpectralAnalyzer::new(config)?,
            selector: PeakSelector::new(config)?,
            encoder: FingerprintEncoder::new(config)?,
            bucket_ms: config.bucket_ms as i64,
            min_score: config.min_score,
            store,
        })
    }

    /// Ranked matches for a clip, with the time the search took.
    pub fn find_matches(
        &self,
        samples: &[f32],
        duration_ms: u64,
        sample_rate: usize,
    ) -> Result<(Vec<Match>, Duration)> {
        let start = Instant::now();

        let spectrogram = self.analyzer.analyze(samples, sample_rate)?;
        let peaks = self.selector.extract_peaks(&spectrogram, duration_ms);
        let signature = self.encoder.fingerprint(&peaks, QUERY_SONG_ID)?;
        let matches = self.match_signature(&signature)?;

        Ok((matches, start.elapsed()))
    }

    /// Scores every song sharing addresses with `signature`.
    ///
    /// Each couple votes for the offset between its anchor and the query
    /// anchor of the same address. A song's score is the number of distinct
    /// addresses in its most voted offset bucket, so hash collisions spread
    /// over many buckets do not add up.
    pub fn match_signature(&self, signature: &Fingerprints) -> Result<Vec<Match>> {
        if signature.is_empty() {
            return Ok(Vec::new());
        }

        let couples = self.store.get_couples(&signature.addresses())?;

        let mut votes: HashSet<(u32, i64, Address)> = HashSet::new();
        let mut histograms: HashMap<u32, HashMap<i64, usize>> = HashMap::new();

        for (address, stored) in &couples {
            let Some(query) = signature.get(address) else {
                continue;
            };
            for couple in stored {
                for occurrence in query {
                    let delta = couple.anchor_time_ms as i64 - occurrence.anchor_time_ms as i64;
                    let bucket = delta.div_euclid(self.bucket_ms);
                    if votes.insert((couple.song_id, bucket, *address)) {
                        *histograms
                            .entry(couple.song_id)
                            .or_default()
                            .entry(bucket)
                            .or_insert(0) += 1;
                    }
                }
            }
        }

        let mut matches: Vec<Match> = histograms
            .into_iter()
            .filter_map(|(song_id, histogram)| {
                // ties go to the bucket closest to the start of the song
                let (bucket, count) = histogram.into_iter().max_by(|a, b| {
                    a.1.cmp(&b.1)
                        .then(b.0.abs().cmp(&a.0.abs()))
                        .then(b.0.cmp(&a.0))
                })?;
                (count >= self.min_score).then(|| Match {
                    song_id,
                    score: count as f64,
                    offset_ms: bucket * self.bucket_ms,
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.song_id.cmp(&b.song_id))
        });

        debug!(
            "{} query addresses, {} stored hits, {} candidate songs",
            signature.len(),
            couples.len(),
            matches.len()
        );
        Ok(matches)
    }
}
