use std::{fs, path::Path};

use anyhow::{Context, Result};
use log::{info, warn};

use db::{DbClient, SongData};
use sample::Sample;

pub mod config;
pub mod db;
pub mod error;
pub mod fingerprint;
pub mod matcher;
pub mod sample;
pub mod spectrogram;
pub mod store;

pub use config::{AddressLayout, Config};
pub use error::Error;
pub use fingerprint::{Address, Couple, FingerprintEncoder, Fingerprints, QUERY_SONG_ID};
pub use matcher::{Match, MatchEngine};
pub use spectrogram::{Peak, PeakSelector, SpectralAnalyzer, Spectrogram};
pub use store::{FingerprintStore, MemoryStore};

fn load_clip(path: &Path, config: &Config) -> Result<Sample> {
    Sample::read_mp3(path)?
        .resample(config.sample_rate)
        .with_context(|| format!("resampling {}", path.display()))
}

fn is_mp3(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("mp3")
}

/// Analysis pipeline that writes songs into a catalog.
struct Indexer<'a> {
    db_client: &'a DbClient,
    analyzer: SpectralAnalyzer,
    selector: PeakSelector,
    encoder: FingerprintEncoder,
}

impl<'a> Indexer<'a> {
    fn new(db_client: &'a DbClient, config: &Config) -> Result<Self> {
        Ok(Self {
            db_client,
            analyzer: SpectralAnalyzer::new(config)?,
            selector: PeakSelector::new(config)?,
            encoder: FingerprintEncoder::new(config)?,
        })
    }

    /// Returns the new song id, or `None` when the song was skipped.
    fn index(&self, title: &str, sample: &Sample) -> Result<Option<u32>> {
        if let Some(song_id) = self.db_client.get_song_by_title(title)? {
            warn!("skipping '{}': already indexed as song {}", title, song_id);
            return Ok(None);
        }

        let spectrogram = match self.analyzer.analyze(&sample.samples, sample.sample_rate) {
            Ok(spectrogram) => spectrogram,
            Err(Error::InvalidInput(reason)) => {
                warn!("skipping '{}': {}", title, reason);
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let peaks = self.selector.extract_peaks(&spectrogram, sample.duration_ms());

        let song_data = SongData {
            title: title.to_string(),
        };
        let mut addresses = 0;
        let song_id = self.db_client.ingest_song(&song_data, |song_id| {
            let fingerprints = self.encoder.fingerprint(&peaks, song_id)?;
            addresses = fingerprints.len();
            Ok(fingerprints)
        })?;

        info!(
            "indexed '{}' as song {} ({} addresses)",
            title, song_id, addresses
        );
        Ok(Some(song_id))
    }
}

/// Registers and fingerprints every mp3 file directly under `path`.
///
/// Files that cannot be decoded and titles already in the catalog are skipped.
pub fn index_folder(path: &Path, database_path: &Path) -> Result<()> {
    let config = Config::default();
    let db_client = DbClient::open(database_path)?;
    let indexer = Indexer::new(&db_client, &config)?;
    let entries: Vec<_> = fs::read_dir(path)?.collect::<Result<_, _>>()?;

    for entry in entries {
        let path = entry.path();
        if !is_mp3(&path) {
            continue;
        }
        let Some(title) = path.file_stem().and_then(|s| s.to_str()) else {
            warn!("skipping {}: file name is not valid UTF-8", path.display());
            continue;
        };

        let sample = match load_clip(&path, &config) {
            Ok(sample) => sample,
            Err(err) => {
                warn!("skipping {}: {:#}", path.display(), err);
                continue;
            }
        };
        indexer.index(title, &sample)?;
    }
    info!("catalog holds {} songs", db_client.total_songs()?);
    Ok(())
}

/// Ranked result lines followed by the final prediction for the best match.
fn report_lines(matches: &[Match], rank: usize, title_of: impl Fn(u32) -> String) -> Vec<String> {
    let Some(best) = matches.first() else {
        return vec!["No match found.".to_string()];
    };

    let mut lines: Vec<String> = matches
        .iter()
        .take(rank)
        .enumerate()
        .map(|(index, found)| {
            format!(
                "{}. {} (score: {}, at {:.1}s)",
                index + 1,
                title_of(found.song_id),
                found.score,
                found.offset_ms as f64 / 1000.0
            )
        })
        .collect();
    lines.push(format!(
        "Final prediction: {}, score: {}",
        title_of(best.song_id),
        best.score
    ));
    lines
}

pub fn search(query_file: &Path, database_path: &Path, rank: usize) -> Result<()> {
    let config = Config::default();
    let db_client = DbClient::open(database_path)?;
    let engine = MatchEngine::new(&config, &db_client)?;

    let sample = load_clip(query_file, &config)?;
    let (matches, elapsed) =
        engine.find_matches(&sample.samples, sample.duration_ms(), sample.sample_rate)?;

    let title_of = |song_id: u32| {
        db_client
            .get_song_data(song_id)
            .map(|data| data.title)
            .unwrap_or_else(|_| format!("<unknown song {}>", song_id))
    };
    for line in report_lines(&matches, rank, title_of) {
        println!("{}", line);
    }
    println!("Search took: {:?}", elapsed);
    Ok(())
}

pub fn erase(database_path: &Path) -> Result<()> {
    let db_client = DbClient::open(database_path)?;
    db_client.erase()?;
    info!("erased {}", database_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;

    fn chord(seconds: usize) -> Sample {
        let sample_rate = 44_100;
        let samples = (0..sample_rate * seconds)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                let high = if (i / 11_025) % 2 == 0 { 880.0 } else { 1320.0 };
                0.4 * (2.0 * PI * 440.0 * t).sin() + 0.3 * (2.0 * PI * high * t).sin()
            })
            .collect();
        Sample {
            samples,
            sample_rate,
        }
    }

    #[test]
    fn test_song_is_indexed_once() {
        let db_client = DbClient::open_in_memory().unwrap();
        let indexer = Indexer::new(&db_client, &Config::default()).unwrap();
        let sample = chord(3);

        let song_id = indexer.index("chord", &sample).unwrap();
        assert!(song_id.is_some());
        assert_eq!(indexer.index("chord", &sample).unwrap(), None);
        assert_eq!(db_client.total_songs().unwrap(), 1);
        assert_eq!(db_client.get_song_by_title("chord").unwrap(), song_id);
    }

    #[test]
    fn test_too_short_song_is_not_registered() {
        let db_client = DbClient::open_in_memory().unwrap();
        let indexer = Indexer::new(&db_client, &Config::default()).unwrap();
        let sample = Sample {
            samples: vec![0.1; 100],
            sample_rate: 44_100,
        };

        assert_eq!(indexer.index("blip", &sample).unwrap(), None);
        assert_eq!(db_client.total_songs().unwrap(), 0);
    }

    #[test]
    fn test_report_ends_with_final_prediction() {
        let matches = vec![
            Match {
                song_id: 4,
                score: 12.0,
                offset_ms: 1500,
            },
            Match {
                song_id: 2,
                score: 3.0,
                offset_ms: 0,
            },
        ];
        let lines = report_lines(&matches, 1, |id| format!("song {}", id));
        assert_eq!(
            lines,
            vec![
                "1. song 4 (score: 12, at 1.5s)".to_string(),
                "Final prediction: song 4, score: 12".to_string(),
            ]
        );
        assert_eq!(report_lines(&[], 10, |id| id.to_string()), vec!["No match found."]);
    }

    #[test]
    fn test_undecodable_file_does_not_stop_indexing() {
        let dir = std::env::temp_dir().join(format!("peakprint-index-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("broken.mp3"), b"definitely not audio").unwrap();
        let db_path = dir.join("db.db3");

        let result = index_folder(&dir, &db_path);
        let total = DbClient::open(&db_path).unwrap().total_songs().unwrap();
        fs::remove_dir_all(&dir).unwrap();

        result.unwrap();
        assert_eq!(total, 0);
    }
}
