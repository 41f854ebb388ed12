use std::ffi::OsString;
use std::io::Write;
use std::process::{Child, Command, Stdio};

use super::AudioSink;
use crate::error::{Error, Result};

/// Raw PCM fed to a child process on stdin: a local player or an FM
/// transmitter.
pub struct PipeSink {
    program: String,
    child: Option<Child>,
}

impl PipeSink {
    pub fn spawn(program: &str, args: &[OsString]) -> Result<Self> {
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Sink(format!("failed to spawn {}: {}. Is it installed?", program, e)))?;

        log::debug!("Audio sink started: {} {:?}", program, args);
        Ok(Self {
            program: program.to_string(),
            child: Some(child),
        })
    }

    /// Local playback, `aplay` style.
    pub fn pcm(command: &str, channels: u16, sample_rate: u32) -> Result<Self> {
        let args: Vec<OsString> = vec![
            "-q".into(),
            "-t".into(),
            "raw".into(),
            "-f".into(),
            "S16_LE".into(),
            "-c".into(),
            channels.to_string().into(),
            "-r".into(),
            sample_rate.to_string().into(),
            "-".into(),
        ];
        Self::spawn(command, &args)
    }

    pub fn pifm(bin: &str, frequency: &str, channels: u16, sample_rate: u32) -> Result<Self> {
        let args: Vec<OsString> = vec![
            "-".into(),
            frequency.into(),
            sample_rate.to_string().into(),
            if channels > 1 { "stereo" } else { "mono" }.into(),
        ];
        Self::spawn(bin, &args)
    }

    pub fn pifmrds(
        bin: &str,
        frequency: &str,
        channels: u16,
        sample_rate: u32,
        ps: &str,
        radio_text: &str,
        pi: &str,
    ) -> Result<Self> {
        let args: Vec<OsString> = vec![
            "-audio".into(),
            "-".into(),
            "-freq".into(),
            frequency.into(),
            "-raw".into(),
            "-samplerate".into(),
            sample_rate.to_string().into(),
            "-numchannels".into(),
            channels.to_string().into(),
            "-ps".into(),
            ps.into(),
            "-rt".into(),
            radio_text.into(),
            "-pi".into(),
            pi.into(),
        ];
        Self::spawn(bin, &args)
    }

    pub fn is_running(&self) -> bool {
        self.child.is_some()
    }
}

impl AudioSink for PipeSink {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        let stdin = self
            .child
            .as_mut()
            .and_then(|c| c.stdin.as_mut())
            .ok_or_else(|| Error::Sink(format!("{} stdin not available", self.program)))?;
        stdin
            .write_all(pcm)
            .map_err(|e| Error::Sink(format!("failed to write to {}: {}", self.program, e)))
    }

    fn finish(&mut self) {
        if let Some(mut child) = self.child.take() {
            // EOF lets the player drain what it has buffered.
            drop(child.stdin.take());
            match child.wait() {
                Ok(status) => log::debug!("Audio sink {} finished: {}", self.program, status),
                Err(e) => log::warn!("Audio sink {} did not exit cleanly: {}", self.program, e),
            }
        }
    }

    fn cleanup(&mut self) {
        if let Some(mut child) = self.child.take() {
            drop(child.stdin.take());
            let _ = child.kill();
            let _ = child.wait();
            log::debug!("Audio sink {} stopped", self.program);
        }
    }
}

impl Drop for PipeSink {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_a_sink_error() {
        let result = PipeSink::spawn("lumasync-no-such-player", &[]);
        assert!(matches!(result, Err(Error::Sink(_))));
    }

    #[test]
    fn cleanup_is_idempotent() {
        let mut sink = PipeSink::spawn("cat", &[]).unwrap();
        sink.write(&[0u8; 64]).unwrap();
        sink.cleanup();
        assert!(!sink.is_running());
        sink.cleanup();
        assert!(sink.write(&[0u8; 4]).is_err());
    }

    #[test]
    fn finish_lets_a_slow_player_drain() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("played.raw");
        let script = format!("sleep 0.3; cat > '{}'", out.display());
        let mut sink = PipeSink::spawn("sh", &["-c".into(), script.into()]).unwrap();

        sink.write(&[7u8; 4096]).unwrap();
        sink.finish();
        assert!(!sink.is_running());
        assert_eq!(std::fs::metadata(&out).unwrap().len(), 4096);

        sink.finish();
        sink.cleanup();
    }
}
