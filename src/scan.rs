//! Finding songs on disk and reporting their stream format and cache state.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::audio::decode::{read_tags, DecoderFactory};
use crate::cache::sidecar_paths;
use crate::error::{Error, Result};

pub const MUSIC_EXTENSIONS: &[&str] = &["mp3", "ogg", "flac", "wav", "aif", "aiff"];

/// Music files under `paths`, sorted. Files given directly are kept as is;
/// directories are searched, including subdirectories when `recursive`.
/// Hidden entries such as cache sidecars are skipped.
pub fn collect_music_files(paths: &[PathBuf], recursive: bool) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for path in paths {
        if path.is_dir() {
            walk(path, recursive, &mut found)?;
        } else if path.exists() {
            found.push(path.clone());
        } else {
            return Err(Error::io(path, std::io::Error::from(std::io::ErrorKind::NotFound)));
        }
    }
    found.sort();
    found.dedup();
    Ok(found)
}

fn walk(dir: &Path, recursive: bool, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        let hidden = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(true);
        if hidden {
            continue;
        }
        if path.is_dir() {
            if recursive {
                walk(&path, recursive, found)?;
            }
        } else if is_music_file(&path) {
            found.push(path);
        }
    }
    Ok(())
}

pub fn is_music_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MUSIC_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SongMeta {
    pub filename: String,
    pub directory: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Bytes per sample.
    pub sample_width: u16,
    /// Bytes per interleaved frame.
    pub frame_width: u16,
    pub chunk_size: usize,
    pub cfg_exists: bool,
    pub sync_exists: bool,
    pub title: Option<String>,
    pub artist: Option<String>,
}

pub fn song_meta(decoders: &dyn DecoderFactory, song: &Path, chunk_size: usize) -> Result<SongMeta> {
    let mut source = decoders.open(song, chunk_size)?;
    let sidecars = sidecar_paths(song);
    let tags = read_tags(song);
    let meta = SongMeta {
        filename: song
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        directory: song
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        sample_rate: source.sample_rate(),
        channels: source.channel_count(),
        sample_width: source.sample_width(),
        frame_width: source.sample_width() * source.channel_count(),
        chunk_size,
        cfg_exists: sidecars.config.exists(),
        sync_exists: sidecars.matrix.exists(),
        title: tags.title,
        artist: tags.artist,
    };
    source.close();
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode::{FileDecoders, MemorySource, PcmSource};

    #[test]
    fn collects_music_files_and_skips_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        for name in ["b.mp3", "a.WAV", ".a.WAV.sync", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::write(nested.join("c.flac"), b"").unwrap();

        let flat = collect_music_files(&[dir.path().to_path_buf()], false).unwrap();
        let names: Vec<_> = flat.iter().map(|p| p.file_name().unwrap().to_owned()).collect();
        assert_eq!(names, vec!["a.WAV", "b.mp3"]);

        let deep = collect_music_files(&[dir.path().to_path_buf()], true).unwrap();
        assert_eq!(deep.len(), 3);
        assert!(collect_music_files(&[dir.path().join("missing.mp3")], false).is_err());
    }

    #[test]
    fn meta_reports_format_and_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("song.wav");
        std::fs::write(sidecar_paths(&song).config, "").unwrap();
        let decoders = |_: &Path, chunk: usize| -> Result<Box<dyn PcmSource>> {
            Ok(Box::new(MemorySource::from_samples(48000, 2, &[0; 16], chunk)))
        };

        let meta = song_meta(&decoders, &song, 2048).unwrap();
        assert_eq!(meta.filename, "song.wav");
        assert_eq!(meta.sample_rate, 48000);
        assert_eq!(meta.frame_width, 4);
        assert!(meta.cfg_exists);
        assert!(!meta.sync_exists);
        assert_eq!(meta.title, None);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["channels"], 2);
        assert!(json["artist"].is_null());
    }

    fn info_entry(id: &[u8; 4], text: &str) -> Vec<u8> {
        let mut entry = id.to_vec();
        entry.extend_from_slice(&(text.len() as u32).to_le_bytes());
        entry.extend_from_slice(text.as_bytes());
        if text.len() % 2 == 1 {
            entry.push(0);
        }
        entry
    }

    /// Mono 8 kHz WAV with a `LIST`/`INFO` chunk ahead of the samples.
    fn tagged_wav(title: &str, artist: &str) -> Vec<u8> {
        let mut info = b"INFO".to_vec();
        info.extend(info_entry(b"INAM", title));
        info.extend(info_entry(b"IART", artist));

        let mut body = b"WAVE".to_vec();
        body.extend_from_slice(b"fmt ");
        body.extend_from_slice(&16u32.to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&8000u32.to_le_bytes());
        body.extend_from_slice(&16000u32.to_le_bytes());
        body.extend_from_slice(&2u16.to_le_bytes());
        body.extend_from_slice(&16u16.to_le_bytes());
        body.extend_from_slice(b"LIST");
        body.extend_from_slice(&(info.len() as u32).to_le_bytes());
        body.extend(info);
        body.extend_from_slice(b"data");
        body.extend_from_slice(&64u32.to_le_bytes());
        body.extend_from_slice(&[0u8; 64]);

        let mut wav = b"RIFF".to_vec();
        wav.extend_from_slice(&(body.len() as u32).to_le_bytes());
        wav.extend(body);
        wav
    }

    #[test]
    fn meta_includes_title_and_artist_tags() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("carol.wav");
        std::fs::write(&song, tagged_wav("Silent Night", "Choir")).unwrap();

        let meta = song_meta(&FileDecoders::default(), &song, 16).unwrap();
        assert_eq!(meta.sample_rate, 8000);
        assert_eq!(meta.title.as_deref(), Some("Silent Night"));
        assert_eq!(meta.artist.as_deref(), Some("Choir"));
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["title"], "Silent Night");
    }
}
