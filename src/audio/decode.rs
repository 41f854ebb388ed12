use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey, Tag};
use symphonia::core::probe::Hint;

use crate::error::{Error, Result};

/// Extensions decoded in-process by symphonia. Everything else goes through
/// the external transcoder.
const NATIVE_EXTENSIONS: &[&str] = &["wav", "wave", "aif", "aiff", "mp3", "flac", "ogg", "oga", "aac"];

/// Byte length of the canonical RIFF/WAVE header a transcoder emits.
pub const WAV_HEADER_LEN: usize = 44;

/// A stream of fixed-size chunks of interleaved signed 16-bit PCM.
pub trait PcmSource: Send {
    fn sample_rate(&self) -> u32;
    fn channel_count(&self) -> u16;
    /// Bytes per sample.
    fn sample_width(&self) -> u16 {
        2
    }
    /// Next chunk, or `None` once the stream is exhausted. The last chunk
    /// may be shorter than the rest.
    fn next_chunk(&mut self) -> Result<Option<Vec<i16>>>;
    fn close(&mut self) {}
}

/// Opens an independent [`PcmSource`] per call.
pub trait DecoderFactory: Send + Sync {
    fn open(&self, path: &Path, chunk_size: usize) -> Result<Box<dyn PcmSource>>;
}

impl<F> DecoderFactory for F
where
    F: Fn(&Path, usize) -> Result<Box<dyn PcmSource>> + Send + Sync,
{
    fn open(&self, path: &Path, chunk_size: usize) -> Result<Box<dyn PcmSource>> {
        self(path, chunk_size)
    }
}

/// Production decoder: symphonia for common formats, an external
/// transcoder for anything else.
#[derive(Debug, Clone)]
pub struct FileDecoders {
    pub transcoder: String,
}

impl Default for FileDecoders {
    fn default() -> Self {
        Self {
            transcoder: "ffmpeg".into(),
        }
    }
}

impl DecoderFactory for FileDecoders {
    fn open(&self, path: &Path, chunk_size: usize) -> Result<Box<dyn PcmSource>> {
        if !path.exists() {
            return Err(Error::Decode(format!("no such file: {}", path.display())));
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if NATIVE_EXTENSIONS.contains(&ext.as_str()) {
            return Ok(Box::new(SymphoniaSource::open(path, chunk_size)?));
        }

        log::debug!("Transcoding {} with {}", path.display(), self.transcoder);
        let args: Vec<OsString> = vec![
            "-v".into(),
            "quiet".into(),
            "-i".into(),
            path.as_os_str().to_os_string(),
            "-map_metadata".into(),
            "-1".into(),
            "-fflags".into(),
            "+bitexact".into(),
            "-flags:a".into(),
            "+bitexact".into(),
            "-acodec".into(),
            "pcm_s16le".into(),
            "-f".into(),
            "wav".into(),
            "-".into(),
        ];
        Ok(Box::new(PipedWavSource::spawn(&self.transcoder, &args, chunk_size)?))
    }
}

/// In-process streaming decoder built on symphonia.
pub struct SymphoniaSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    chunk_samples: usize,
    pending: Vec<i16>,
    finished: bool,
}

impl SymphoniaSource {
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            Error::Decode(format!("failed to open {}: {}", path.display(), e))
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::Decode(format!("failed to probe {}: {}", path.display(), e)))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode(format!("no audio track in {}", path.display())))?;

        let track_id = track.id;
        let channels = track.codec_params.channels.map_or(1, |c| c.count()) as u16;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| Error::Decode(format!("unknown sample rate in {}", path.display())))?;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("no decoder for {}: {}", path.display(), e)))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            chunk_samples: chunk_size * channels.max(1) as usize,
            pending: Vec::new(),
            finished: false,
        })
    }

    fn fill(&mut self) -> Result<()> {
        while !self.finished && self.pending.len() < self.chunk_samples {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    self.finished = true;
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.finished = true;
                    break;
                }
                Err(e) => return Err(Error::Decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(msg)) => {
                    log::debug!("Skipping undecodable packet: {}", msg);
                    continue;
                }
                Err(e) => return Err(Error::Decode(e.to_string())),
            };

            let spec = *decoded.spec();
            let mut sample_buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            self.pending.extend_from_slice(sample_buf.samples());
        }
        Ok(())
    }
}

impl PcmSource for SymphoniaSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channel_count(&self) -> u16 {
        self.channels
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<i16>>> {
        self.fill()?;
        if self.pending.is_empty() {
            return Ok(None);
        }
        let take = self.chunk_samples.min(self.pending.len());
        Ok(Some(self.pending.drain(..take).collect()))
    }
}

/// Title and artist tags, when the container carries them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
}

impl TrackTags {
    fn absorb(&mut self, tags: &[Tag]) {
        for tag in tags {
            let slot = match tag.std_key {
                Some(StandardTagKey::TrackTitle) => &mut self.title,
                Some(StandardTagKey::Artist) => &mut self.artist,
                _ => continue,
            };
            let value = tag.value.to_string();
            let value = value.trim_end_matches('\0').trim();
            if slot.is_none() && !value.is_empty() {
                *slot = Some(value.to_string());
            }
        }
    }
}

/// Read title and artist from a natively decoded file. Missing or unreadable
/// tags come back as `None`.
pub fn read_tags(path: &Path) -> TrackTags {
    let mut tags = TrackTags::default();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    if !NATIVE_EXTENSIONS.contains(&ext.as_str()) {
        return tags;
    }
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) => {
            log::debug!("No tags for {}: {}", path.display(), e);
            return tags;
        }
    };
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    hint.with_extension(&ext);

    let mut probed = match symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) {
        Ok(probed) => probed,
        Err(e) => {
            log::debug!("No tags for {}: {}", path.display(), e);
            return tags;
        }
    };

    // ID3 and similar tags ahead of the container.
    if let Some(meta) = probed.metadata.get() {
        if let Some(rev) = meta.current() {
            tags.absorb(rev.tags());
        }
    }
    let meta = probed.format.metadata();
    if let Some(rev) = meta.current() {
        tags.absorb(rev.tags());
    }
    tags
}

/// Format fields read from a canonical WAV header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

/// Validate the `RIFF` and `fmt ` tags and pull the declared format.
pub fn parse_wav_header(header: &[u8]) -> Result<WavFormat> {
    if header.len() < WAV_HEADER_LEN {
        return Err(Error::Decode(format!(
            "WAV header is {} bytes, expected {}",
            header.len(),
            WAV_HEADER_LEN
        )));
    }
    if &header[0..4] != b"RIFF" || &header[12..16] != b"fmt " {
        return Err(Error::Decode(
            "stream does not start with a RIFF id or the fmt chunk is missing".into(),
        ));
    }
    let u16_at = |i: usize| u16::from_le_bytes([header[i], header[i + 1]]);
    let format = WavFormat {
        channels: u16_at(22),
        sample_rate: u32::from_le_bytes([header[24], header[25], header[26], header[27]]),
        bits_per_sample: u16_at(34),
    };
    if format.channels == 0 || format.sample_rate == 0 {
        return Err(Error::Decode(format!("implausible WAV format {:?}", format)));
    }
    if format.bits_per_sample != 16 {
        return Err(Error::Decode(format!(
            "only 16-bit PCM is supported, stream declares {} bits",
            format.bits_per_sample
        )));
    }
    Ok(format)
}

/// Chunked reader over a header-prefixed PCM byte stream.
pub struct WavStream<R> {
    reader: R,
    format: WavFormat,
    chunk_bytes: usize,
}

impl<R: Read> WavStream<R> {
    pub fn new(mut reader: R, chunk_size: usize) -> Result<Self> {
        let mut header = [0u8; WAV_HEADER_LEN];
        reader
            .read_exact(&mut header)
            .map_err(|e| Error::Decode(format!("failed to read WAV header: {}", e)))?;
        let format = parse_wav_header(&header)?;
        Ok(Self {
            reader,
            format,
            chunk_bytes: chunk_size * format.channels as usize * 2,
        })
    }

    pub fn format(&self) -> WavFormat {
        self.format
    }

    pub fn read_chunk(&mut self) -> Result<Option<Vec<i16>>> {
        let mut bytes = vec![0u8; self.chunk_bytes];
        let mut filled = 0;
        while filled < bytes.len() {
            match self.reader.read(&mut bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Decode(format!("PCM read failed: {}", e))),
            }
        }
        if filled < 2 {
            return Ok(None);
        }
        let samples = bytes[..filled - filled % 2]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        Ok(Some(samples))
    }
}

/// A child process writing WAV to its stdout: a transcoder or a capture tool.
pub struct PipedWavSource {
    child: Child,
    stream: WavStream<ChildStdout>,
}

impl PipedWavSource {
    pub fn spawn(program: &str, args: &[OsString], chunk_size: usize) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Decode(format!("failed to spawn {}: {}. Is it installed?", program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Decode(format!("{} stdout not available", program)))?;
        match WavStream::new(stdout, chunk_size) {
            Ok(stream) => Ok(Self { child, stream }),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }
}

impl PcmSource for PipedWavSource {
    fn sample_rate(&self) -> u32 {
        self.stream.format().sample_rate
    }

    fn channel_count(&self) -> u16 {
        self.stream.format().channels
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<i16>>> {
        self.stream.read_chunk()
    }

    fn close(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for PipedWavSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pre-decoded chunks held in memory. Used for replays and tests.
pub struct MemorySource {
    sample_rate: u32,
    channels: u16,
    chunks: VecDeque<Vec<i16>>,
    fail_after: Option<usize>,
    served: usize,
}

impl MemorySource {
    pub fn new(sample_rate: u32, channels: u16, chunks: Vec<Vec<i16>>) -> Self {
        Self {
            sample_rate,
            channels,
            chunks: chunks.into(),
            fail_after: None,
            served: 0,
        }
    }

    /// Split interleaved samples into chunks of `chunk_size` frames.
    pub fn from_samples(sample_rate: u32, channels: u16, samples: &[i16], chunk_size: usize) -> Self {
        let chunk_samples = (chunk_size * channels as usize).max(1);
        let chunks = samples.chunks(chunk_samples).map(|c| c.to_vec()).collect();
        Self::new(sample_rate, channels, chunks)
    }

    /// Report a decode error after serving `n` chunks.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }
}

impl PcmSource for MemorySource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channel_count(&self) -> u16 {
        self.channels
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<i16>>> {
        if self.fail_after == Some(self.served) {
            return Err(Error::Decode("stream ended abruptly".into()));
        }
        self.served += 1;
        Ok(self.chunks.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(channels: u16, rate: u32, bits: u16) -> Vec<u8> {
        let mut h = Vec::with_capacity(WAV_HEADER_LEN);
        h.extend_from_slice(b"RIFF");
        h.extend_from_slice(&0u32.to_le_bytes());
        h.extend_from_slice(b"WAVE");
        h.extend_from_slice(b"fmt ");
        h.extend_from_slice(&16u32.to_le_bytes());
        h.extend_from_slice(&1u16.to_le_bytes());
        h.extend_from_slice(&channels.to_le_bytes());
        h.extend_from_slice(&rate.to_le_bytes());
        let block = channels as u32 * bits as u32 / 8;
        h.extend_from_slice(&(rate * block).to_le_bytes());
        h.extend_from_slice(&(block as u16).to_le_bytes());
        h.extend_from_slice(&bits.to_le_bytes());
        h.extend_from_slice(b"data");
        h.extend_from_slice(&0u32.to_le_bytes());
        h
    }

    #[test]
    fn parses_canonical_header() {
        let format = parse_wav_header(&header(2, 44100, 16)).unwrap();
        assert_eq!(
            format,
            WavFormat {
                channels: 2,
                sample_rate: 44100,
                bits_per_sample: 16
            }
        );
    }

    #[test]
    fn rejects_missing_riff_tag() {
        let mut h = header(2, 44100, 16);
        h[0..4].copy_from_slice(b"RIFX");
        assert!(matches!(parse_wav_header(&h), Err(Error::Decode(_))));
    }

    #[test]
    fn rejects_missing_fmt_tag() {
        let mut h = header(1, 22050, 16);
        h[12..16].copy_from_slice(b"junk");
        assert!(parse_wav_header(&h).is_err());
    }

    #[test]
    fn rejects_24_bit_streams() {
        assert!(parse_wav_header(&header(2, 48000, 24)).is_err());
    }

    #[test]
    fn stream_yields_fixed_chunks_then_remainder() {
        let mut bytes = header(2, 8000, 16);
        // 5 stereo frames
        for s in 0..10i16 {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        let mut stream = WavStream::new(std::io::Cursor::new(bytes), 2).unwrap();
        assert_eq!(stream.read_chunk().unwrap(), Some(vec![0, 1, 2, 3]));
        assert_eq!(stream.read_chunk().unwrap(), Some(vec![4, 5, 6, 7]));
        assert_eq!(stream.read_chunk().unwrap(), Some(vec![8, 9]));
        assert_eq!(stream.read_chunk().unwrap(), None);
    }

    #[test]
    fn truncated_header_is_a_decode_error() {
        let bytes = header(2, 8000, 16)[..20].to_vec();
        assert!(WavStream::new(std::io::Cursor::new(bytes), 16).is_err());
    }

    #[test]
    fn memory_source_can_fail_mid_stream() {
        let mut source = MemorySource::new(8000, 1, vec![vec![1], vec![2], vec![3]]).failing_after(2);
        assert!(source.next_chunk().unwrap().is_some());
        assert!(source.next_chunk().unwrap().is_some());
        assert!(source.next_chunk().is_err());
    }

    /// Mono 16-bit big-endian AIFF at 44.1 kHz.
    fn aiff_bytes(samples: &[i16]) -> Vec<u8> {
        let data_len = samples.len() as u32 * 2;
        let mut b = Vec::new();
        b.extend_from_slice(b"FORM");
        b.extend_from_slice(&(4 + 8 + 18 + 8 + 8 + data_len).to_be_bytes());
        b.extend_from_slice(b"AIFF");
        b.extend_from_slice(b"COMM");
        b.extend_from_slice(&18u32.to_be_bytes());
        b.extend_from_slice(&1i16.to_be_bytes());
        b.extend_from_slice(&(samples.len() as u32).to_be_bytes());
        b.extend_from_slice(&16i16.to_be_bytes());
        // 44100 as an 80-bit extended float.
        b.extend_from_slice(&[0x40, 0x0e, 0xac, 0x44, 0, 0, 0, 0, 0, 0]);
        b.extend_from_slice(b"SSND");
        b.extend_from_slice(&(8 + data_len).to_be_bytes());
        b.extend_from_slice(&0u32.to_be_bytes());
        b.extend_from_slice(&0u32.to_be_bytes());
        for s in samples {
            b.extend_from_slice(&s.to_be_bytes());
        }
        b
    }

    #[test]
    fn aiff_decodes_in_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bells.aiff");
        let samples: Vec<i16> = (0..600).map(|i| ((i * 37) % 20000 - 10000) as i16).collect();
        std::fs::write(&path, aiff_bytes(&samples)).unwrap();

        // No transcoder is available, so only the native decoder can succeed.
        let decoders = FileDecoders {
            transcoder: "lumasync-no-such-transcoder".into(),
        };
        let mut source = decoders.open(&path, 256).unwrap();
        assert_eq!(source.sample_rate(), 44100);
        assert_eq!(source.channel_count(), 1);

        let mut decoded = Vec::new();
        let mut lengths = Vec::new();
        while let Some(chunk) = source.next_chunk().unwrap() {
            lengths.push(chunk.len());
            decoded.extend(chunk);
        }
        assert_eq!(lengths, vec![256, 256, 88]);
        assert_eq!(decoded, samples);
    }

    #[test]
    fn untagged_wav_has_no_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.wav");
        let mut bytes = header(1, 8000, 16);
        bytes[40..44].copy_from_slice(&16u32.to_le_bytes());
        bytes[4..8].copy_from_slice(&(36u32 + 16).to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        std::fs::write(&path, bytes).unwrap();
        assert_eq!(read_tags(&path), TrackTags::default());
        assert_eq!(read_tags(&dir.path().join("missing.wav")), TrackTags::default());
    }

    #[test]
    fn missing_file_is_a_decode_error() {
        let result = FileDecoders::default().open(Path::new("/nonexistent/song.wav"), 1024);
        assert!(matches!(result, Err(Error::Decode(_))));
    }
}
