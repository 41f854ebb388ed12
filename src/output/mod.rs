//! Audio sinks. Chosen once per song from [`SinkSettings`].

pub mod pipe;

use std::time::{Duration, Instant};

use serde::Deserialize;

pub use pipe::PipeSink;

use crate::error::Result;

pub trait AudioSink {
    fn write(&mut self, pcm: &[u8]) -> Result<()>;
    /// Let buffered audio play out, then release. Used after the last chunk.
    fn finish(&mut self) {
        self.cleanup();
    }
    /// Release the device or process now, dropping buffered audio. Safe to
    /// call more than once.
    fn cleanup(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Pcm,
    PiFm,
    PiFmRds,
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkSettings {
    pub kind: SinkKind,
    pub pcm_command: String,
    pub fm_bin_path: String,
    pub fm_frequency: String,
    pub fm_ps_text: String,
    pub fm_pi_text: String,
    /// Pace the null sink to real time.
    pub paced: bool,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            kind: SinkKind::Pcm,
            pcm_command: "aplay".into(),
            fm_bin_path: "pifm".into(),
            fm_frequency: "88.1".into(),
            fm_ps_text: "LightShw".into(),
            fm_pi_text: "FFFF".into(),
            paced: true,
        }
    }
}

pub fn open_sink(settings: &SinkSettings, channels: u16, sample_rate: u32, title: &str) -> Result<Box<dyn AudioSink>> {
    let sink: Box<dyn AudioSink> = match settings.kind {
        SinkKind::Pcm => Box::new(PipeSink::pcm(&settings.pcm_command, channels, sample_rate)?),
        SinkKind::PiFm => Box::new(PipeSink::pifm(
            &settings.fm_bin_path,
            &settings.fm_frequency,
            channels,
            sample_rate,
        )?),
        SinkKind::PiFmRds => Box::new(PipeSink::pifmrds(
            &settings.fm_bin_path,
            &settings.fm_frequency,
            channels,
            sample_rate,
            &settings.fm_ps_text,
            title,
            &settings.fm_pi_text,
        )?),
        SinkKind::Null => {
            let sink = NullSink::new(channels, sample_rate);
            Box::new(if settings.paced { sink.paced() } else { sink })
        }
    };
    Ok(sink)
}

/// Interleaved samples as little-endian bytes.
pub fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Discards audio. When paced, each write blocks until the audio written so
/// far would have finished playing.
#[derive(Debug)]
pub struct NullSink {
    bytes_per_second: f64,
    paced: bool,
    started: Option<Instant>,
    written: u64,
    finished: bool,
    cleaned_up: bool,
}

impl NullSink {
    pub fn new(channels: u16, sample_rate: u32) -> Self {
        Self {
            bytes_per_second: (channels as u64 * sample_rate as u64 * 2) as f64,
            paced: false,
            started: None,
            written: 0,
            finished: false,
            cleaned_up: false,
        }
    }

    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up
    }

    /// True if the sink was released through [`AudioSink::finish`].
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl AudioSink for NullSink {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        let started = *self.started.get_or_insert_with(Instant::now);
        self.written += pcm.len() as u64;
        if self.paced && self.bytes_per_second > 0.0 {
            let due = started + Duration::from_secs_f64(self.written as f64 / self.bytes_per_second);
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }
        Ok(())
    }

    fn finish(&mut self) {
        if !self.cleaned_up {
            self.finished = true;
        }
        self.cleaned_up = true;
    }

    fn cleanup(&mut self) {
        self.cleaned_up = true;
    }
}
