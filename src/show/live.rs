use super::state::InterruptSource;
use crate::audio::analysis::LevelAnalyzer;
use crate::audio::decode::PcmSource;
use crate::audio::params::AnalysisSettings;
use crate::audio::stats::{normalize, RunningStats, LIVE_PRIOR_COUNT, LIVE_PRIOR_MEAN, LIVE_PRIOR_STD};
use crate::error::{Error, Result};
use crate::hardware::ChannelDriver;
use crate::output::{pcm_bytes, AudioSink};

/// Chunks whose loudest sample is below this are treated as silence.
pub const SILENCE_PEAK: i32 = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveReport {
    pub chunks: usize,
    pub silent_chunks: usize,
    pub interrupted: bool,
}

/// Analyze-then-drive from a capture stream. Normalization adapts as the
/// session goes, starting from fixed priors.
pub fn run_live(
    settings: &AnalysisSettings,
    source: &mut dyn PcmSource,
    driver: &mut ChannelDriver,
    mut sink: Option<&mut dyn AudioSink>,
    interrupt: &dyn InterruptSource,
) -> Result<LiveReport> {
    let channels = source.channel_count();
    if channels == 0 || channels > 2 {
        return Err(Error::Decode(format!(
            "capture has {} channels; only mono and stereo are supported",
            channels
        )));
    }
    let config = settings.for_stream(source.sample_rate(), channels)?;
    log::info!(
        "Live input: {} Hz, {} channels, chunk period {:.1} ms",
        config.sample_rate,
        channels,
        config.chunk_period() * 1000.0
    );

    let n = config.channel_count;
    let mut analyzer = LevelAnalyzer::new(config)?;
    let mut stats = RunningStats::new(n);
    stats.preload(&vec![LIVE_PRIOR_MEAN; n], &vec![LIVE_PRIOR_STD; n], LIVE_PRIOR_COUNT);
    let silence = vec![0.0; n];

    let mut report = LiveReport::default();
    let result = loop {
        if interrupt.interrupt_requested() {
            report.interrupted = true;
            break Ok(());
        }
        let chunk = match source.next_chunk() {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };
        if let Some(sink) = sink.as_mut() {
            if let Err(e) = sink.write(&pcm_bytes(&chunk)) {
                break Err(e);
            }
        }
        report.chunks += 1;

        let peak = chunk.iter().map(|&s| (s as i32).abs()).max().unwrap_or(0);
        let levels = if peak < SILENCE_PEAK {
            report.silent_chunks += 1;
            silence.clone()
        } else {
            let levels = analyzer.analyze(&chunk);
            stats.push(&levels);
            levels
        };
        driver.update(&normalize(&levels, &stats.mean(), &stats.std()));
    };

    source.close();
    if let Some(sink) = sink.as_mut() {
        if result.is_ok() && !report.interrupted {
            sink.finish();
        } else {
            sink.cleanup();
        }
    }
    driver.all_off(true);
    result.map(|()| report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode::MemorySource;
    use crate::hardware::backend::{MemoryPins, PinLevel};
    use crate::hardware::{ChannelConfig, ChannelMode};
    use crate::show::state::{CancelToken, NoInterrupt};

    fn settings() -> AnalysisSettings {
        AnalysisSettings {
            chunk_size: 512,
            channel_count: 3,
            min_frequency: 20.0,
            max_frequency: 15000.0,
            custom_channel_mapping: None,
            custom_channel_frequencies: None,
        }
    }

    fn driver(pins: &MemoryPins) -> ChannelDriver {
        let config = ChannelConfig::new(vec![1, 2, 3], &[ChannelMode::Pwm], 100, false).unwrap();
        ChannelDriver::new(config, Box::new(pins.clone()))
    }

    #[test]
    fn quiet_chunks_skip_analysis() {
        let pins = MemoryPins::new();
        let mut driver = driver(&pins);
        let loud: Vec<i16> = (0..1024).map(|i| ((i as f64 * 0.2).sin() * 12000.0) as i16).collect();
        let mut source = MemorySource::new(44100, 2, vec![vec![10; 1024], loud, vec![-249; 1024]]);

        let report = run_live(&settings(), &mut source, &mut driver, None, &NoInterrupt).unwrap();
        assert_eq!(report.chunks, 3);
        assert_eq!(report.silent_chunks, 2);
        assert!(!report.interrupted);
        assert_eq!(pins.level(1), Some(PinLevel::Duty(0)));
    }

    #[test]
    fn stops_when_interrupted() {
        let pins = MemoryPins::new();
        let mut driver = driver(&pins);
        let mut source = MemorySource::new(44100, 1, vec![vec![0; 512]; 8]);
        let token = CancelToken::new();
        token.cancel();

        let report = run_live(&settings(), &mut source, &mut driver, None, &token).unwrap();
        assert!(report.interrupted);
        assert_eq!(report.chunks, 0);
    }

    #[test]
    fn surround_capture_is_rejected() {
        let pins = MemoryPins::new();
        let mut driver = driver(&pins);
        let mut source = MemorySource::new(44100, 4, vec![]);
        let result = run_live(&settings(), &mut source, &mut driver, None, &NoInterrupt);
        assert!(matches!(result, Err(Error::Decode(_))));
    }
}
