use std::time::{Duration, Instant};

use super::state::InterruptSource;
use crate::audio::decode::PcmSource;
use crate::audio::stats::normalize;
use crate::cache::precompute::SongAnalysis;
use crate::error::Result;
use crate::hardware::ChannelDriver;
use crate::output::{pcm_bytes, AudioSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Priming,
    Delayed,
    Synced,
    Draining,
    Done,
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackReport {
    /// `Done` or `Interrupted`.
    pub state: PlaybackState,
    pub chunks_played: usize,
    pub rows_driven: usize,
}

/// The real-time loop for one song: audio out, then the matching cache row
/// to the lights.
pub struct PlaybackSynchronizer<'a> {
    driver: &'a mut ChannelDriver,
    light_delay: Duration,
    state: PlaybackState,
}

impl<'a> PlaybackSynchronizer<'a> {
    pub fn new(driver: &'a mut ChannelDriver, light_delay: Duration) -> Self {
        Self {
            driver,
            light_delay,
            state: PlaybackState::Priming,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Play `source` through `sink`, driving lights from `analysis`.
    ///
    /// Taking a [`SongAnalysis`] means the precompute handle was joined
    /// before the first row is read. The interrupt is polled before every
    /// chunk. A song that plays to the end lets the sink drain; any other
    /// exit cleans it up at once. The lights are turned off (overrides
    /// applied) on every exit path.
    pub fn play(
        &mut self,
        analysis: &SongAnalysis,
        source: &mut dyn PcmSource,
        sink: &mut dyn AudioSink,
        interrupt: &dyn InterruptSource,
    ) -> Result<PlaybackReport> {
        self.state = PlaybackState::Priming;
        let result = self.run(analysis, source, sink, interrupt);
        if result.is_ok() && self.state == PlaybackState::Draining {
            sink.finish();
        } else {
            sink.cleanup();
        }
        self.driver.all_off(true);
        if self.state == PlaybackState::Draining {
            self.transition(PlaybackState::Done);
        }
        result
    }

    fn run(
        &mut self,
        analysis: &SongAnalysis,
        source: &mut dyn PcmSource,
        sink: &mut dyn AudioSink,
        interrupt: &dyn InterruptSource,
    ) -> Result<PlaybackReport> {
        let matrix = &analysis.matrix;
        let start = Instant::now();
        let mut chunks_played = 0;
        let mut row_index = 0;

        log::info!(
            "Playing {} [{} rows, chunk period {:.1} ms]",
            analysis.song.display(),
            matrix.rows.len(),
            analysis.config.chunk_period() * 1000.0
        );

        if self.light_delay.is_zero() {
            self.transition(PlaybackState::Synced);
        } else {
            self.transition(PlaybackState::Delayed);
        }

        loop {
            if interrupt.interrupt_requested() {
                self.transition(PlaybackState::Interrupted);
                break;
            }
            let chunk = match source.next_chunk()? {
                Some(chunk) => chunk,
                None => {
                    self.transition(PlaybackState::Draining);
                    break;
                }
            };
            sink.write(&pcm_bytes(&chunk))?;
            chunks_played += 1;

            if self.state == PlaybackState::Delayed && start.elapsed() >= self.light_delay {
                self.transition(PlaybackState::Synced);
            }
            if self.state != PlaybackState::Synced {
                continue;
            }

            // Past the last row the lights hold their last state.
            if let Some(row) = matrix.rows.get(row_index) {
                let brightness = normalize(row, &matrix.mean, &matrix.std);
                self.driver.update(&brightness);
                row_index += 1;
                if row_index == matrix.rows.len() {
                    log::debug!("Last cached row reached after {} chunks", chunks_played);
                }
            }
        }

        Ok(PlaybackReport {
            state: match self.state {
                PlaybackState::Interrupted => PlaybackState::Interrupted,
                _ => PlaybackState::Done,
            },
            chunks_played,
            rows_driven: row_index,
        })
    }

    fn transition(&mut self, next: PlaybackState) {
        log::debug!("Playback {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode::MemorySource;
    use crate::audio::params::test_config;
    use crate::cache::precompute::CacheOrigin;
    use crate::cache::CacheMatrix;
    use crate::error::Error;
    use crate::hardware::backend::{MemoryPins, PinLevel};
    use crate::hardware::{ChannelConfig, ChannelMode};
    use crate::output::NullSink;
    use std::cell::Cell;
    use std::path::PathBuf;

    const PINS: [u32; 2] = [5, 6];

    fn analysis(rows: Vec<Vec<f64>>) -> SongAnalysis {
        let mut config = test_config(2);
        config.input_channel_count = 1;
        SongAnalysis {
            song: PathBuf::from("song.wav"),
            config,
            matrix: CacheMatrix {
                std: vec![1.0, 1.0],
                mean: vec![10.0, 10.0],
                rows,
            },
            origin: CacheOrigin::Loaded,
        }
    }

    fn driver(pins: &MemoryPins) -> ChannelDriver {
        let config = ChannelConfig::new(PINS.to_vec(), &[ChannelMode::Pwm], 100, false).unwrap();
        ChannelDriver::new(config, Box::new(pins.clone()))
    }

    fn source(chunks: usize) -> MemorySource {
        MemorySource::new(44100, 1, vec![vec![100; 1024]; chunks])
    }

    /// Fires once it has been polled `after` times.
    struct AfterPolls {
        after: usize,
        polls: Cell<usize>,
    }

    impl InterruptSource for AfterPolls {
        fn interrupt_requested(&self) -> bool {
            self.polls.set(self.polls.get() + 1);
            self.polls.get() > self.after
        }
    }

    #[test]
    fn plays_every_chunk_and_row() {
        let pins = MemoryPins::new();
        let mut driver = driver(&pins);
        let mut sink = NullSink::new(1, 44100);
        let song = analysis(vec![vec![10.0, 12.0]; 3]);
        let mut sync = PlaybackSynchronizer::new(&mut driver, Duration::ZERO);

        let report = sync
            .play(&song, &mut source(3), &mut sink, &crate::show::state::NoInterrupt)
            .unwrap();
        assert_eq!(report.state, PlaybackState::Done);
        assert_eq!(report.chunks_played, 3);
        assert_eq!(report.rows_driven, 3);
        assert_eq!(sync.state(), PlaybackState::Done);
        assert_eq!(sink.bytes_written(), 3 * 1024 * 2);
        assert!(sink.is_cleaned_up());
        assert!(sink.is_finished());
        assert_eq!(pins.level(5), Some(PinLevel::Duty(0)));
    }

    #[test]
    fn overrun_holds_last_light_state() {
        let pins = MemoryPins::new();
        let mut driver = driver(&pins);
        let mut sink = NullSink::new(1, 44100);
        // (12 - 10 + 0.5) / 1.25 = 2 -> clamped to full.
        let song = analysis(vec![vec![12.0, 0.0]]);
        let mut sync = PlaybackSynchronizer::new(&mut driver, Duration::ZERO);

        let report = sync
            .play(&song, &mut source(4), &mut sink, &crate::show::state::NoInterrupt)
            .unwrap();
        assert_eq!(report.chunks_played, 4);
        assert_eq!(report.rows_driven, 1);
        // One update during playback plus the final all-off.
        assert_eq!(pins.writes(), 4);
    }

    #[test]
    fn no_lights_during_delay() {
        let pins = MemoryPins::new();
        let mut driver = driver(&pins);
        let mut sink = NullSink::new(1, 44100);
        let song = analysis(vec![vec![12.0, 12.0]; 5]);
        let mut sync = PlaybackSynchronizer::new(&mut driver, Duration::from_secs(3600));

        let report = sync
            .play(&song, &mut source(5), &mut sink, &crate::show::state::NoInterrupt)
            .unwrap();
        assert_eq!(report.chunks_played, 5);
        assert_eq!(report.rows_driven, 0);
    }

    #[test]
    fn first_row_waits_for_the_delay_to_pass() {
        let pins = MemoryPins::new();
        let mut driver = driver(&pins);
        // Each 1024-sample chunk is about 23 ms of paced audio.
        let mut sink = NullSink::new(1, 44100).paced();
        let mut rows = vec![vec![0.0, 0.0]; 10];
        rows[0] = vec![12.0, 12.0];
        let song = analysis(rows);
        let mut sync = PlaybackSynchronizer::new(&mut driver, Duration::from_millis(60));

        let report = sync
            .play(&song, &mut source(10), &mut sink, &crate::show::state::NoInterrupt)
            .unwrap();
        assert_eq!(report.chunks_played, 10);
        // By the third chunk at least 69 ms of audio have been written.
        let delayed = report.chunks_played - report.rows_driven;
        assert!((1..=2).contains(&delayed), "{} chunks before the lights", delayed);

        // The first light update after the delay is row 0, then one write per
        // row, then the final all-off.
        let history = pins.history(5);
        assert_eq!(history.len(), report.rows_driven + 1);
        assert_eq!(history[0], PinLevel::Duty(100));
        assert!(history[1..].iter().all(|&l| l == PinLevel::Duty(0)));
    }

    #[test]
    fn interrupt_stops_before_next_chunk() {
        let pins = MemoryPins::new();
        let mut driver = driver(&pins);
        let mut sink = NullSink::new(1, 44100);
        let song = analysis(vec![vec![12.0, 12.0]; 10]);
        let interrupt = AfterPolls {
            after: 2,
            polls: Cell::new(0),
        };
        let mut sync = PlaybackSynchronizer::new(&mut driver, Duration::ZERO);

        let report = sync.play(&song, &mut source(10), &mut sink, &interrupt).unwrap();
        assert_eq!(report.state, PlaybackState::Interrupted);
        assert_eq!(report.chunks_played, 2);
        assert_eq!(report.rows_driven, 2);
        assert!(sink.is_cleaned_up());
        assert!(!sink.is_finished());
        for pin in PINS {
            assert_eq!(pins.level(pin), Some(PinLevel::Duty(0)));
        }
    }

    #[test]
    fn decode_failure_still_cleans_up() {
        let pins = MemoryPins::new();
        let mut driver = driver(&pins);
        let mut sink = NullSink::new(1, 44100);
        let song = analysis(vec![vec![12.0, 12.0]; 4]);
        let mut sync = PlaybackSynchronizer::new(&mut driver, Duration::ZERO);

        let result = sync.play(
            &song,
            &mut source(4).failing_after(1),
            &mut sink,
            &crate::show::state::NoInterrupt,
        );
        assert!(matches!(result, Err(Error::Decode(_))));
        assert!(sink.is_cleaned_up());
        assert!(!sink.is_finished());
        assert_eq!(pins.level(6), Some(PinLevel::Duty(0)));
    }
}
