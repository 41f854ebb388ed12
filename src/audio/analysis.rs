use std::ops::Range;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use super::bands::{channel_bands, FrequencyBand};
use super::params::AnalysisConfig;
use crate::error::Result;

/// Reduces one PCM chunk to one intensity value per lighting channel.
///
/// Keeps the FFT plan, the Hann window and the band-to-bin table between
/// calls, so a single analyzer should be reused for every chunk of a song.
pub struct LevelAnalyzer {
    config: AnalysisConfig,
    bands: Vec<FrequencyBand>,
    bin_ranges: Option<Vec<Range<usize>>>,
    window: Vec<f64>,
    planner: FftPlanner<f64>,
    fft: Option<(usize, Arc<dyn Fft<f64>>)>,
    calls: usize,
}

impl LevelAnalyzer {
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        let bands = channel_bands(&config)?;
        Ok(Self {
            config,
            bands,
            bin_ranges: None,
            window: Vec::new(),
            planner: FftPlanner::new(),
            fft: None,
            calls: 0,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn bands(&self) -> &[FrequencyBand] {
        &self.bands
    }

    /// Number of chunks analyzed so far.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Drop the cached bin table and window.
    pub fn reset(&mut self) {
        self.bin_ranges = None;
        self.window.clear();
        self.fft = None;
    }

    /// Channel levels for one chunk of interleaved 16-bit samples.
    ///
    /// Returns the zero vector for silence; otherwise each positive band
    /// power is replaced by its `log10` and anything else by 0.
    pub fn analyze(&mut self, chunk: &[i16]) -> Vec<f64> {
        self.calls += 1;
        let mut levels = vec![0.0f64; self.config.channel_count];

        // Stereo input: left channel only.
        let samples: Vec<f64> = if self.config.input_channel_count == 2 {
            chunk.iter().step_by(2).map(|&s| s as f64).collect()
        } else {
            chunk.iter().map(|&s| s as f64).collect()
        };
        let n = samples.len();
        if n == 0 {
            return levels;
        }

        if self.window.len() != n {
            self.window = hann_window(n);
        }
        let fft = self.plan(n);

        let mut buffer: Vec<Complex<f64>> = samples
            .iter()
            .zip(self.window.iter())
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();
        fft.process(&mut buffer);

        // Real input: n/2 + 1 meaningful bins, minus the last one.
        let spectrum_len = n / 2;
        let power: Vec<f64> = buffer[..spectrum_len].iter().map(|c| c.norm_sqr()).collect();

        let ranges = self.bin_ranges();
        for (level, range) in levels.iter_mut().zip(ranges.iter()) {
            let start = range.start.min(spectrum_len);
            let end = range.end.min(spectrum_len);
            *level = power[start..end].iter().sum();
        }

        if levels.iter().all(|&l| l == 0.0) {
            return levels;
        }
        for level in levels.iter_mut() {
            *level = if *level > 0.0 { level.log10() } else { 0.0 };
        }
        levels
    }

    fn plan(&mut self, n: usize) -> Arc<dyn Fft<f64>> {
        if let Some((len, ref fft)) = self.fft {
            if len == n {
                return Arc::clone(fft);
            }
        }
        let fft = self.planner.plan_fft_forward(n);
        self.fft = Some((n, Arc::clone(&fft)));
        fft
    }

    fn bin_ranges(&mut self) -> Vec<Range<usize>> {
        if self.bin_ranges.is_none() {
            let chunk_size = self.config.chunk_size;
            let sample_rate = self.config.sample_rate;
            self.bin_ranges = Some(
                self.bands
                    .iter()
                    .map(|band| band.bin_range(chunk_size, sample_rate))
                    .collect(),
            );
        }
        self.bin_ranges.clone().unwrap_or_default()
    }
}

fn hann_window(size: usize) -> Vec<f64> {
    if size == 1 {
        return vec![1.0];
    }
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / (size - 1) as f64).cos()))
        .collect()
}
