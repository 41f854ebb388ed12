use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Every parameter that influences the per-chunk channel levels.
///
/// Doubles as the cache fingerprint: a cached matrix is only reused when the
/// stored `AnalysisConfig` compares equal to the active one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub chunk_size: usize,
    pub sample_rate: u32,
    pub channel_count: usize,
    pub min_frequency: f64,
    pub max_frequency: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_channel_mapping: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_channel_frequencies: Option<Vec<f64>>,
    pub input_channel_count: u16,
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be positive".into()));
        }
        if self.sample_rate == 0 {
            return Err(Error::InvalidConfig("sample_rate must be positive".into()));
        }
        if self.channel_count == 0 {
            return Err(Error::InvalidConfig("channel_count must be positive".into()));
        }
        if !(self.min_frequency > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "min_frequency must be positive, got {}",
                self.min_frequency
            )));
        }
        if !(self.max_frequency > self.min_frequency) {
            return Err(Error::InvalidConfig(format!(
                "max_frequency ({}) must exceed min_frequency ({})",
                self.max_frequency, self.min_frequency
            )));
        }
        if !matches!(self.input_channel_count, 1 | 2) {
            return Err(Error::InvalidConfig(format!(
                "input_channel_count must be 1 or 2, got {}",
                self.input_channel_count
            )));
        }
        if let Some(ref mapping) = self.custom_channel_mapping {
            if mapping.len() != self.channel_count {
                return Err(Error::InvalidConfig(format!(
                    "custom_channel_mapping has {} entries but there are {} channels",
                    mapping.len(),
                    self.channel_count
                )));
            }
            if mapping.iter().any(|&m| m == 0) {
                return Err(Error::InvalidConfig(
                    "custom_channel_mapping indices are 1-based; 0 is out of range".into(),
                ));
            }
        }
        Ok(())
    }

    /// Duration of one chunk in seconds.
    pub fn chunk_period(&self) -> f64 {
        self.chunk_size as f64 / self.sample_rate as f64
    }
}

/// The stream-independent half of an [`AnalysisConfig`], fixed for the
/// process. The sample rate and input channel count come from each song.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSettings {
    pub chunk_size: usize,
    pub channel_count: usize,
    pub min_frequency: f64,
    pub max_frequency: f64,
    pub custom_channel_mapping: Option<Vec<usize>>,
    pub custom_channel_frequencies: Option<Vec<f64>>,
}

impl AnalysisSettings {
    pub fn for_stream(&self, sample_rate: u32, input_channel_count: u16) -> Result<AnalysisConfig> {
        let config = AnalysisConfig {
            chunk_size: self.chunk_size,
            sample_rate,
            channel_count: self.channel_count,
            min_frequency: self.min_frequency,
            max_frequency: self.max_frequency,
            custom_channel_mapping: self.custom_channel_mapping.clone(),
            custom_channel_frequencies: self.custom_channel_frequencies.clone(),
            input_channel_count,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
pub(crate) fn test_config(channel_count: usize) -> AnalysisConfig {
    AnalysisConfig {
        chunk_size: 1024,
        sample_rate: 44100,
        channel_count,
        min_frequency: 20.0,
        max_frequency: 15000.0,
        custom_channel_mapping: None,
        custom_channel_frequencies: None,
        input_channel_count: 2,
    }
}
