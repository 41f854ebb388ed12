//! Running a show: pre-show, then songs in order with the next song's
//! analysis computed while the current one plays, each followed by an
//! optional post-show.

pub mod live;
pub mod playback;
pub mod preshow;
pub mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::audio::decode::DecoderFactory;
use crate::cache::precompute::{CacheOrigin, PrecomputeCoordinator, PrecomputeHandle, SongAnalysis};
use crate::error::{Error, Result};
use crate::hardware::ChannelDriver;
use crate::output::{open_sink, SinkSettings};
use playback::{PlaybackReport, PlaybackState, PlaybackSynchronizer};
use preshow::{run_preshow, PreshowOutcome, PreshowSettings};
use state::{AnyInterrupt, CancelToken, StateStore, PLAY_NOW, SONG_TO_PLAY};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShowSettings {
    pub light_delay: Duration,
    pub preshow: Option<PreshowSettings>,
    /// Held after every song that plays to its end.
    pub postshow: Option<PreshowSettings>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SongOutcome {
    pub song: PathBuf,
    pub origin: CacheOrigin,
    pub playback: PlaybackReport,
    pub postshow: Option<PreshowOutcome>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSong {
    pub song: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ShowReport {
    pub preshow: Option<PreshowOutcome>,
    pub played: Vec<SongOutcome>,
    pub skipped: Vec<SkippedSong>,
    pub cancelled: bool,
}

pub struct Show<'a> {
    coordinator: &'a PrecomputeCoordinator,
    decoders: Arc<dyn DecoderFactory>,
    sinks: SinkSettings,
    settings: ShowSettings,
    driver: &'a mut ChannelDriver,
}

impl<'a> Show<'a> {
    pub fn new(
        coordinator: &'a PrecomputeCoordinator,
        decoders: Arc<dyn DecoderFactory>,
        sinks: SinkSettings,
        settings: ShowSettings,
        driver: &'a mut ChannelDriver,
    ) -> Self {
        Self {
            coordinator,
            decoders,
            sinks,
            settings,
            driver,
        }
    }

    /// Play `songs` once through, honoring `play_now` requests from `state`.
    ///
    /// With a state store the show resumes at its `song_to_play` index and
    /// keeps it pointing at the song after the one playing. Cancelling
    /// `cancel` ends the show after the current chunk.
    pub fn run(&mut self, songs: &[PathBuf], cancel: &CancelToken, mut state: Option<&mut StateStore>) -> ShowReport {
        let mut report = ShowReport::default();
        if songs.is_empty() {
            log::warn!("No songs to play");
            return report;
        }

        let mut current = match state.as_deref() {
            Some(store) => resume_index(store.get(SONG_TO_PLAY, 0), songs.len()),
            None => 0,
        };
        let mut pending = self.start_precompute(&songs[current]);

        if let Some(preshow) = self.settings.preshow {
            let outcome = {
                let interrupt = interrupt_for(cancel, state.as_deref());
                run_preshow(&mut *self.driver, &preshow, &interrupt)
            };
            report.preshow = Some(outcome);
            if outcome == PreshowOutcome::Interrupted {
                if let Some(k) = take_play_now(state.as_deref_mut(), songs.len()) {
                    current = k;
                }
            }
        }

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let song = &songs[current];
            let next = current + 1;

            let analysis = match self.analysis_for(song, &mut pending) {
                Ok(analysis) => analysis,
                Err(e) => {
                    skip(&mut report, song, e);
                    if next >= songs.len() {
                        break;
                    }
                    current = next;
                    continue;
                }
            };

            if let Some(next_song) = songs.get(next) {
                pending = self.start_precompute(next_song);
            }
            if let Some(store) = state.as_deref_mut() {
                if let Err(e) = store.set(SONG_TO_PLAY, (next % songs.len()) as i64) {
                    log::warn!("Failed to save show state: {}", e);
                }
            }

            let played = {
                let interrupt = interrupt_for(cancel, state.as_deref());
                self.play_song(&analysis, &interrupt)
            };
            match played {
                Ok(playback) => {
                    let interrupted = playback.state == PlaybackState::Interrupted;
                    let postshow = match self.settings.postshow {
                        Some(postshow) if !interrupted => {
                            let interrupt = interrupt_for(cancel, state.as_deref());
                            Some(run_preshow(&mut *self.driver, &postshow, &interrupt))
                        }
                        _ => None,
                    };
                    report.played.push(SongOutcome {
                        song: song.clone(),
                        origin: analysis.origin,
                        playback,
                        postshow,
                    });
                    if interrupted || postshow == Some(PreshowOutcome::Interrupted) {
                        if cancel.is_cancelled() {
                            report.cancelled = true;
                            break;
                        }
                        if let Some(k) = take_play_now(state.as_deref_mut(), songs.len()) {
                            log::info!("Play now: {}", songs[k].display());
                            current = k;
                            continue;
                        }
                    }
                }
                Err(e) => skip(&mut report, song, e),
            }

            if next >= songs.len() {
                break;
            }
            current = next;
        }
        report
    }

    fn start_precompute(&self, song: &Path) -> Option<PrecomputeHandle> {
        match self.coordinator.precompute(song) {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::warn!("Could not start precompute for {}: {}", song.display(), e);
                None
            }
        }
    }

    /// Join the precompute for `song`. A pending worker for some other song
    /// is joined first so it never races a second worker.
    fn analysis_for(&self, song: &Path, pending: &mut Option<PrecomputeHandle>) -> Result<SongAnalysis> {
        if let Some(handle) = pending.take() {
            if handle.song() == song {
                return handle.join();
            }
            let other = handle.song().to_path_buf();
            if let Err(e) = handle.join() {
                log::warn!("Precompute for {} failed: {}", other.display(), e);
            }
        }
        self.coordinator.precompute(song)?.join()
    }

    fn play_song(&mut self, analysis: &SongAnalysis, interrupt: &AnyInterrupt<'_>) -> Result<PlaybackReport> {
        let mut source = self.decoders.open(&analysis.song, analysis.config.chunk_size)?;
        let title = analysis
            .song
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut sink = match open_sink(&self.sinks, source.channel_count(), source.sample_rate(), &title) {
            Ok(sink) => sink,
            Err(e) => {
                source.close();
                return Err(e);
            }
        };
        let result = PlaybackSynchronizer::new(&mut *self.driver, self.settings.light_delay).play(
            analysis,
            source.as_mut(),
            sink.as_mut(),
            interrupt,
        );
        source.close();
        result
    }
}

fn skip(report: &mut ShowReport, song: &Path, error: Error) {
    log::error!("Skipping {}: {}", song.display(), error);
    report.skipped.push(SkippedSong {
        song: song.to_path_buf(),
        reason: error.to_string(),
    });
}

fn interrupt_for<'i>(cancel: &'i CancelToken, state: Option<&'i StateStore>) -> AnyInterrupt<'i> {
    let any = AnyInterrupt::new().with(cancel);
    match state {
        Some(store) => any.with(store),
        None => any,
    }
}

fn resume_index(stored: i64, len: usize) -> usize {
    match usize::try_from(stored) {
        Ok(i) if i < len => i,
        _ => 0,
    }
}

/// Consume a pending `play_now` request. Returns the 0-based song index if
/// it names a song in the list.
fn take_play_now(state: Option<&mut StateStore>, len: usize) -> Option<usize> {
    let store = state?;
    if let Err(e) = store.reload() {
        log::warn!("Failed to reload show state: {}", e);
    }
    let requested = store.get(PLAY_NOW, 0);
    if requested == 0 {
        return None;
    }
    if let Err(e) = store.set(PLAY_NOW, 0) {
        log::warn!("Failed to reset play_now: {}", e);
    }
    match usize::try_from(requested) {
        Ok(k) if (1..=len).contains(&k) => Some(k - 1),
        _ => {
            log::warn!("play_now = {} is not a song in the list", requested);
            None
        }
    }
}
