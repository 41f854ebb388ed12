//! Fingerprinted on-disk cache of per-chunk channel levels.
//!
//! Each song gets two hidden sidecar files in its own directory:
//! `.<name>.cfg` holds the [`AnalysisConfig`] that produced the levels and
//! `.<name>.sync` holds the level matrix. The matrix is only trusted when the
//! stored config matches the active one field for field.

pub mod precompute;

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::params::AnalysisConfig;
use crate::error::{Error, Result};

/// Locations of the two sidecar files for one song.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarPaths {
    pub config: PathBuf,
    pub matrix: PathBuf,
}

pub fn sidecar_paths(song: &Path) -> SidecarPaths {
    let dir = song.parent().unwrap_or_else(|| Path::new(""));
    let name = song
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    SidecarPaths {
        config: dir.join(format!(".{}.cfg", name)),
        matrix: dir.join(format!(".{}.sync", name)),
    }
}

/// Per-song summary rows plus one level row per analyzed chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMatrix {
    pub std: Vec<f64>,
    pub mean: Vec<f64>,
    pub rows: Vec<Vec<f64>>,
}

impl CacheMatrix {
    /// Rows as persisted: std, mean, then the level rows.
    pub fn persisted_rows(&self) -> usize {
        2 + self.rows.len()
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for row in std::iter::once(&self.std)
            .chain(std::iter::once(&self.mean))
            .chain(self.rows.iter())
        {
            let mut first = true;
            for v in row {
                if !first {
                    out.push(' ');
                }
                first = false;
                let _ = write!(out, "{:e}", v);
            }
            out.push('\n');
        }
        out
    }

    pub fn parse(text: &str, channels: usize) -> std::result::Result<Self, String> {
        let mut parsed: Vec<Vec<f64>> = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let row = line
                .split_whitespace()
                .map(|tok| tok.parse::<f64>())
                .collect::<std::result::Result<Vec<f64>, _>>()
                .map_err(|e| format!("line {}: {}", line_no + 1, e))?;
            if row.len() != channels {
                return Err(format!(
                    "line {} has {} values, expected {}",
                    line_no + 1,
                    row.len(),
                    channels
                ));
            }
            parsed.push(row);
        }
        if parsed.len() < 2 {
            return Err(format!("{} rows, need at least the std and mean rows", parsed.len()));
        }
        let mut rows = parsed.into_iter();
        let std = rows.next().unwrap_or_default();
        let mean = rows.next().unwrap_or_default();
        Ok(Self {
            std,
            mean,
            rows: rows.collect(),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct ConfigSidecar {
    fft: AnalysisConfig,
}

/// Cache gate for one active [`AnalysisConfig`].
#[derive(Debug, Clone)]
pub struct AnalysisCache {
    config: AnalysisConfig,
}

impl AnalysisCache {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// True only if a config sidecar exists and matches the active config.
    pub fn compare_config(&self, song: &Path) -> bool {
        let path = sidecar_paths(song).config;
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) => {
                log::warn!("No cached config data found at {}", path.display());
                return false;
            }
        };
        match toml::from_str::<ConfigSidecar>(&text) {
            Ok(stored) if stored.fft == self.config => true,
            Ok(_) => {
                log::warn!("Cached config data at {} does not match", path.display());
                false
            }
            Err(e) => {
                log::warn!("Cached config data at {} is unreadable: {}", path.display(), e);
                false
            }
        }
    }

    pub fn save_config(&self, song: &Path) -> Result<()> {
        let path = sidecar_paths(song).config;
        let text = toml::to_string(&ConfigSidecar {
            fft: self.config.clone(),
        })?;
        write_atomic(&path, &text)?;
        log::info!("Cached config data written to {}", path.display());
        Ok(())
    }

    /// Remove the config sidecar so no older fingerprint outlives a rebuild.
    pub fn invalidate(&self, song: &Path) -> Result<()> {
        let path = sidecar_paths(song).config;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("Removed stale config {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(&path, e)),
        }
    }

    /// Read the level matrix. Any failure means the cache must be rebuilt.
    pub fn load(&self, song: &Path) -> Result<CacheMatrix> {
        let path = sidecar_paths(song).matrix;
        let text = std::fs::read_to_string(&path).map_err(|_| Error::CacheMissing { path: path.clone() })?;
        let matrix = CacheMatrix::parse(&text, self.config.channel_count)
            .map_err(|reason| Error::CacheCorrupt { path: path.clone(), reason })?;
        log::debug!("std: {:?}, mean: {:?}", matrix.std, matrix.mean);
        Ok(matrix)
    }

    pub fn store(&self, song: &Path, matrix: &CacheMatrix) -> Result<()> {
        let path = sidecar_paths(song).matrix;
        write_atomic(&path, &matrix.to_text())?;
        log::info!(
            "Cached sync data written to {} [{} rows]",
            path.display(),
            matrix.persisted_rows()
        );
        Ok(())
    }

    /// A matrix usable for playback: matching config and a readable matrix.
    pub fn load_valid(&self, song: &Path) -> Result<CacheMatrix> {
        if !self.compare_config(song) {
            return Err(Error::ConfigMismatch {
                path: sidecar_paths(song).config,
            });
        }
        self.load(song)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, contents).map_err(|e| Error::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| Error::io(path, e))?;
    Ok(())
}
