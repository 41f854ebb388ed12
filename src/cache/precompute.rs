use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use super::{AnalysisCache, CacheMatrix};
use crate::audio::analysis::LevelAnalyzer;
use crate::audio::decode::{DecoderFactory, PcmSource};
use crate::audio::params::{AnalysisConfig, AnalysisSettings};
use crate::audio::stats::positive_summary;
use crate::error::{Error, Result};

/// Where a song's matrix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOrigin {
    Loaded,
    Built { chunks: usize },
}

/// A song's complete analysis, ready for synchronized playback.
#[derive(Debug, Clone)]
pub struct SongAnalysis {
    pub song: PathBuf,
    pub config: AnalysisConfig,
    pub matrix: CacheMatrix,
    pub origin: CacheOrigin,
}

/// Runs cache loading or rebuilding on a background worker, at most one
/// worker per song at a time.
pub struct PrecomputeCoordinator {
    settings: AnalysisSettings,
    decoders: Arc<dyn DecoderFactory>,
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
    analyzed_chunks: Arc<AtomicUsize>,
}

impl PrecomputeCoordinator {
    pub fn new(settings: AnalysisSettings, decoders: Arc<dyn DecoderFactory>) -> Self {
        Self {
            settings,
            decoders,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            analyzed_chunks: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    /// Total chunks fed through a [`LevelAnalyzer`] by this coordinator.
    pub fn analyzed_chunks(&self) -> usize {
        self.analyzed_chunks.load(Ordering::SeqCst)
    }

    pub fn is_in_flight(&self, song: &Path) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(song)
    }

    /// Start the background worker for `song`.
    ///
    /// Fails with [`Error::PrecomputeInFlight`] while an earlier worker for the
    /// same song is still running, whether or not its handle was dropped.
    pub fn precompute(&self, song: &Path) -> Result<PrecomputeHandle> {
        let claim = self.claim(song)?;
        let song = song.to_path_buf();
        let settings = self.settings.clone();
        let decoders = Arc::clone(&self.decoders);
        let counter = Arc::clone(&self.analyzed_chunks);

        let worker_song = song.clone();
        let worker = std::thread::Builder::new()
            .name("precompute".into())
            .spawn(move || {
                let _claim = claim;
                analyze_song(&settings, decoders.as_ref(), &counter, &worker_song)
            })
            .map_err(|e| Error::io(&song, e))?;

        log::debug!("Precompute started for {}", song.display());
        Ok(PrecomputeHandle { song, worker })
    }

    /// Same work as [`precompute`](Self::precompute), on the calling thread.
    pub fn run_blocking(&self, song: &Path) -> Result<SongAnalysis> {
        let _claim = self.claim(song)?;
        analyze_song(&self.settings, self.decoders.as_ref(), &self.analyzed_chunks, song)
    }

    fn claim(&self, song: &Path) -> Result<InFlightClaim> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(song.to_path_buf()) {
            return Err(Error::PrecomputeInFlight {
                song: song.to_path_buf(),
            });
        }
        Ok(InFlightClaim {
            song: song.to_path_buf(),
            set: Arc::clone(&self.in_flight),
        })
    }
}

struct InFlightClaim {
    song: PathBuf,
    set: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.song);
    }
}

/// Owner of one running precompute worker.
pub struct PrecomputeHandle {
    song: PathBuf,
    worker: JoinHandle<Result<SongAnalysis>>,
}

impl PrecomputeHandle {
    pub fn song(&self) -> &Path {
        &self.song
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Block until the worker is done. No timeout.
    pub fn join(self) -> Result<SongAnalysis> {
        match self.worker.join() {
            Ok(result) => result,
            Err(_) => Err(Error::WorkerPanicked { song: self.song }),
        }
    }
}

fn analyze_song(
    settings: &AnalysisSettings,
    decoders: &dyn DecoderFactory,
    counter: &AtomicUsize,
    song: &Path,
) -> Result<SongAnalysis> {
    let mut source = decoders.open(song, settings.chunk_size)?;
    let result = load_or_build(settings, source.as_mut(), counter, song);
    source.close();
    result
}

fn load_or_build(
    settings: &AnalysisSettings,
    source: &mut dyn PcmSource,
    counter: &AtomicUsize,
    song: &Path,
) -> Result<SongAnalysis> {
    let channels = source.channel_count();
    log::info!("Sample rate: {}", source.sample_rate());
    log::info!("Channels: {}", channels);
    log::info!("Frame size: {}", source.sample_width() as usize * channels as usize);
    if channels == 0 || channels > 2 {
        return Err(Error::Decode(format!(
            "{} has {} channels; only mono and stereo are supported",
            song.display(),
            channels
        )));
    }

    let config = settings.for_stream(source.sample_rate(), channels)?;
    let cache = AnalysisCache::new(config.clone());

    match cache.load_valid(song) {
        Ok(matrix) => {
            log::info!(
                "Using cached sync data for {} [{} rows]",
                song.display(),
                matrix.persisted_rows()
            );
            return Ok(SongAnalysis {
                song: song.to_path_buf(),
                config,
                matrix,
                origin: CacheOrigin::Loaded,
            });
        }
        Err(e) if e.is_cache_miss() => {
            log::warn!("{}. One will be generated.", e);
        }
        Err(e) => return Err(e),
    }

    let mut analyzer = LevelAnalyzer::new(config.clone())?;
    let mut rows = Vec::new();
    while let Some(chunk) = source.next_chunk()? {
        rows.push(analyzer.analyze(&chunk));
    }
    counter.fetch_add(analyzer.calls(), Ordering::SeqCst);

    let (mean, std) = positive_summary(&rows, config.channel_count);
    let matrix = CacheMatrix { std, mean, rows };

    // Old fingerprint out, matrix in, new fingerprint last.
    cache.invalidate(song)?;
    cache.store(song, &matrix)?;
    cache.save_config(song)?;

    let chunks = matrix.rows.len();
    Ok(SongAnalysis {
        song: song.to_path_buf(),
        config,
        matrix,
        origin: CacheOrigin::Built { chunks },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode::MemorySource;
    use crate::cache::sidecar_paths;
    use std::sync::mpsc;

    fn settings() -> AnalysisSettings {
        AnalysisSettings {
            chunk_size: 256,
            channel_count: 4,
            min_frequency: 20.0,
            max_frequency: 15000.0,
            custom_channel_mapping: None,
            custom_channel_frequencies: None,
        }
    }

    fn tone(len: usize) -> Vec<i16> {
        (0..len)
            .map(|i| ((i as f64 * 0.3).sin() * 9000.0) as i16)
            .collect()
    }

    #[test]
    fn builds_then_reuses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("song.raw");
        let decoders = |_: &Path, chunk: usize| -> Result<Box<dyn PcmSource>> {
            Ok(Box::new(MemorySource::from_samples(22050, 1, &tone(256 * 5), chunk)))
        };
        let coordinator = PrecomputeCoordinator::new(settings(), Arc::new(decoders));

        let first = coordinator.precompute(&song).unwrap().join().unwrap();
        assert_eq!(first.origin, CacheOrigin::Built { chunks: 5 });
        assert_eq!(coordinator.analyzed_chunks(), 5);

        let second = coordinator.precompute(&song).unwrap().join().unwrap();
        assert_eq!(second.origin, CacheOrigin::Loaded);
        assert_eq!(second.matrix, first.matrix);
        assert_eq!(coordinator.analyzed_chunks(), 5);
    }

    #[test]
    fn failed_decode_leaves_no_cache() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("broken.raw");
        let decoders = |_: &Path, chunk: usize| -> Result<Box<dyn PcmSource>> {
            Ok(Box::new(
                MemorySource::from_samples(22050, 2, &tone(256 * 2 * 4), chunk).failing_after(2),
            ))
        };
        let coordinator = PrecomputeCoordinator::new(settings(), Arc::new(decoders));

        let result = coordinator.precompute(&song).unwrap().join();
        assert!(matches!(result, Err(Error::Decode(_))));
        let paths = sidecar_paths(&song);
        assert!(!paths.config.exists());
        assert!(!paths.matrix.exists());
        assert!(!coordinator.is_in_flight(&song));
    }

    #[test]
    fn rejects_second_worker_for_same_song() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("slow.raw");
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let decoders = move |_: &Path, chunk: usize| -> Result<Box<dyn PcmSource>> {
            let _ = release_rx.lock().unwrap().recv();
            Ok(Box::new(MemorySource::from_samples(22050, 1, &tone(256), chunk)))
        };
        let coordinator = PrecomputeCoordinator::new(settings(), Arc::new(decoders));

        let handle = coordinator.precompute(&song).unwrap();
        assert!(coordinator.is_in_flight(&song));
        assert!(matches!(
            coordinator.precompute(&song),
            Err(Error::PrecomputeInFlight { .. })
        ));

        release_tx.send(()).unwrap();
        handle.join().unwrap();
        assert!(!coordinator.is_in_flight(&song));
        release_tx.send(()).unwrap();
        assert!(coordinator.precompute(&song).unwrap().join().is_ok());
    }

    #[test]
    fn surround_input_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("surround.raw");
        let decoders = |_: &Path, chunk: usize| -> Result<Box<dyn PcmSource>> {
            Ok(Box::new(MemorySource::from_samples(48000, 6, &tone(600), chunk)))
        };
        let coordinator = PrecomputeCoordinator::new(settings(), Arc::new(decoders));
        assert!(matches!(coordinator.run_blocking(&song), Err(Error::Decode(_))));
    }

    #[test]
    fn changed_settings_force_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("song.raw");
        let make = |s: AnalysisSettings| {
            let decoders = |_: &Path, chunk: usize| -> Result<Box<dyn PcmSource>> {
                Ok(Box::new(MemorySource::from_samples(22050, 1, &tone(1024), chunk)))
            };
            PrecomputeCoordinator::new(s, Arc::new(decoders))
        };

        make(settings()).run_blocking(&song).unwrap();
        let changed = AnalysisSettings {
            max_frequency: 9000.0,
            ..settings()
        };
        let rebuilt = make(changed).run_blocking(&song).unwrap();
        assert!(matches!(rebuilt.origin, CacheOrigin::Built { .. }));
    }

    #[test]
    fn failed_config_write_leaves_no_stale_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("song.raw");
        let make = |s: AnalysisSettings| {
            let decoders = |_: &Path, chunk: usize| -> Result<Box<dyn PcmSource>> {
                Ok(Box::new(MemorySource::from_samples(22050, 1, &tone(1024), chunk)))
            };
            PrecomputeCoordinator::new(s, Arc::new(decoders))
        };
        let changed = AnalysisSettings {
            max_frequency: 3000.0,
            ..settings()
        };

        make(settings()).run_blocking(&song).unwrap();

        // A directory where the temp file goes makes the config write fail.
        let paths = sidecar_paths(&song);
        let blocker = dir.path().join(".song.raw.cfg.tmp");
        std::fs::create_dir(&blocker).unwrap();
        assert!(make(changed).run_blocking(&song).is_err());
        assert!(paths.matrix.exists());
        assert!(!paths.config.exists());
        std::fs::remove_dir(&blocker).unwrap();

        let again = make(settings()).run_blocking(&song).unwrap();
        assert!(matches!(again.origin, CacheOrigin::Built { .. }));
    }
}
