use std::ops::Range;

use super::params::AnalysisConfig;
use crate::error::{Error, Result};

/// A `[low, high)` frequency range in Hz assigned to one lighting channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyBand {
    pub low: f64,
    pub high: f64,
}

impl FrequencyBand {
    /// FFT bin indices covered by this band for a given chunk layout.
    ///
    /// A band narrower than one bin is widened to exactly one bin so the
    /// channel never sums an empty range.
    pub fn bin_range(&self, chunk_size: usize, sample_rate: u32) -> Range<usize> {
        let to_bin = |hz: f64| (hz * chunk_size as f64 / sample_rate as f64).floor().max(0.0) as usize;
        let start = to_bin(self.low);
        let mut end = to_bin(self.high);
        if end <= start {
            end = start + 1;
        }
        start..end
    }
}

/// Compute one band per output channel.
///
/// Without explicit boundaries the octave span between `min_frequency` and
/// `max_frequency` is split evenly. A custom mapping selects, per output
/// channel, one of `max(mapping)` computed bands by 1-based index.
pub fn channel_bands(config: &AnalysisConfig) -> Result<Vec<FrequencyBand>> {
    let band_count = match config.custom_channel_mapping {
        Some(ref mapping) => {
            log::debug!("Custom channel mapping in use: {:?}", mapping);
            mapping.iter().copied().max().unwrap_or(0)
        }
        None => config.channel_count,
    };
    if band_count == 0 {
        return Err(Error::InvalidConfig("no channels to compute bands for".into()));
    }

    let boundaries = match config.custom_channel_frequencies {
        Some(ref custom) => {
            if custom.len() < band_count + 1 {
                return Err(Error::InvalidConfig(format!(
                    "custom_channel_frequencies needs at least {} values for {} bands, got {}",
                    band_count + 1,
                    band_count,
                    custom.len()
                )));
            }
            log::debug!("Custom channel frequencies in use");
            custom[..=band_count].to_vec()
        }
        None => even_octave_split(config.min_frequency, config.max_frequency, band_count),
    };

    let bands: Vec<FrequencyBand> = boundaries
        .windows(2)
        .map(|w| FrequencyBand { low: w[0], high: w[1] })
        .collect();

    for (i, band) in bands.iter().enumerate() {
        log::debug!("band {} is {:8.2} to {:8.2} Hz", i, band.low, band.high);
    }

    match config.custom_channel_mapping {
        Some(ref mapping) => mapping
            .iter()
            .map(|&m| {
                m.checked_sub(1)
                    .and_then(|idx| bands.get(idx).copied())
                    .ok_or_else(|| {
                        Error::InvalidConfig(format!("channel mapping index {} is out of range", m))
                    })
            })
            .collect(),
        None => Ok(bands),
    }
}

fn even_octave_split(min_frequency: f64, max_frequency: f64, band_count: usize) -> Vec<f64> {
    let octaves = (max_frequency / min_frequency).log2();
    let step = 2f64.powf(octaves / band_count as f64);
    log::debug!(
        "{:.3} octaves over {} bands ({:.3} per band)",
        octaves,
        band_count,
        octaves / band_count as f64
    );

    let mut boundaries = Vec::with_capacity(band_count + 1);
    boundaries.push(min_frequency);
    for _ in 1..band_count {
        let prev = boundaries[boundaries.len() - 1];
        boundaries.push(prev * step);
    }
    // Pinned so float drift never moves the top edge.
    boundaries.push(max_frequency);
    boundaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::params::test_config;

    #[test]
    fn even_split_spans_the_full_range() {
        let bands = channel_bands(&test_config(8)).unwrap();
        assert_eq!(bands.len(), 8);
        assert_eq!(bands[0].low, 20.0);
        assert_eq!(bands[7].high, 15000.0);
        for pair in bands.windows(2) {
            assert!(pair[0].high <= pair[1].low + 1e-9);
        }
        for band in &bands {
            assert!(band.high > band.low);
        }
    }

    #[test]
    fn bands_have_equal_octave_width() {
        let bands = channel_bands(&test_config(4)).unwrap();
        let ratios: Vec<f64> = bands.iter().map(|b| b.high / b.low).collect();
        for r in &ratios {
            assert!((r - ratios[0]).abs() < 1e-9);
        }
    }

    #[test]
    fn custom_mapping_reorders_and_duplicates() {
        let mut config = test_config(4);
        config.custom_channel_mapping = Some(vec![2, 1, 2, 3]);
        let mapped = channel_bands(&config).unwrap();

        let mut unmapped_config = test_config(3);
        unmapped_config.custom_channel_mapping = None;
        let base = channel_bands(&unmapped_config).unwrap();

        assert_eq!(mapped.len(), 4);
        assert_eq!(mapped[0], base[1]);
        assert_eq!(mapped[1], base[0]);
        assert_eq!(mapped[2], base[1]);
        assert_eq!(mapped[3], base[2]);
    }

    #[test]
    fn custom_frequencies_are_used_verbatim() {
        let mut config = test_config(3);
        config.custom_channel_frequencies = Some(vec![40.0, 200.0, 1000.0, 8000.0, 12000.0]);
        let bands = channel_bands(&config).unwrap();
        assert_eq!(
            bands,
            vec![
                FrequencyBand { low: 40.0, high: 200.0 },
                FrequencyBand { low: 200.0, high: 1000.0 },
                FrequencyBand { low: 1000.0, high: 8000.0 },
            ]
        );
    }

    #[test]
    fn too_few_custom_frequencies_is_an_error() {
        let mut config = test_config(4);
        config.custom_channel_frequencies = Some(vec![40.0, 200.0, 1000.0]);
        assert!(matches!(channel_bands(&config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn narrow_band_is_widened_to_one_bin() {
        // 20..25 Hz at 1024/44100 is bin 0..0 before repair.
        let band = FrequencyBand { low: 20.0, high: 25.0 };
        assert_eq!(band.bin_range(1024, 44100), 0..1);
    }

    #[test]
    fn every_bin_range_is_non_empty() {
        for channels in 1..=16 {
            let config = test_config(channels);
            for band in channel_bands(&config).unwrap() {
                let bins = band.bin_range(config.chunk_size, config.sample_rate);
                assert!(bins.end > bins.start);
            }
        }
    }
}
