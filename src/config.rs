use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::decode::FileDecoders;
use crate::audio::params::AnalysisSettings;
use crate::error::{Error, Result};
use crate::hardware::backend::{MemoryPins, PinBackend, SysfsPins};
use crate::hardware::{ChannelConfig, ChannelMode};
use crate::output::{SinkKind, SinkSettings};
use crate::show::preshow::{PreshowLights, PreshowSettings};
use crate::show::ShowSettings;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub audio_processing: AudioProcessingConfig,
    #[serde(default)]
    pub lightshow: LightshowConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Sysfs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinMode {
    Pwm,
    OnOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShowMode {
    Playlist,
    AudioIn,
}

#[derive(Debug, Deserialize)]
pub struct HardwareConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    #[serde(default = "default_gpio_pins")]
    pub gpio_pins: Vec<u32>,
    #[serde(default = "default_pin_modes")]
    pub pin_modes: Vec<PinMode>,
    #[serde(default = "default_pwm_range")]
    pub pwm_range: u32,
    #[serde(default)]
    pub active_low_mode: bool,
    #[serde(default = "default_gpio_root")]
    pub gpio_root: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct AudioProcessingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_min_frequency")]
    pub min_frequency: f64,
    #[serde(default = "default_max_frequency")]
    pub max_frequency: f64,
    #[serde(default)]
    pub custom_channel_mapping: Vec<usize>,
    #[serde(default)]
    pub custom_channel_frequencies: Vec<f64>,
    #[serde(default = "default_transcoder")]
    pub transcoder: String,
    #[serde(default = "default_output")]
    pub output: SinkKind,
    #[serde(default = "default_pcm_command")]
    pub pcm_command: String,
    #[serde(default = "default_fm_bin_path")]
    pub fm_bin_path: String,
    #[serde(default = "default_fm_frequency")]
    pub fm_frequency: String,
    #[serde(default = "default_fm_ps_text")]
    pub fm_ps_text: String,
    #[serde(default = "default_fm_pi_text")]
    pub fm_pi_text: String,
}

#[derive(Debug, Deserialize)]
pub struct LightshowConfig {
    #[serde(default = "default_mode")]
    pub mode: ShowMode,
    /// Seconds.
    #[serde(default)]
    pub light_delay: f64,
    #[serde(default)]
    pub always_on_channels: Vec<usize>,
    #[serde(default)]
    pub always_off_channels: Vec<usize>,
    #[serde(default)]
    pub invert_channels: Vec<usize>,
    /// Seconds; 0 disables the pre-show.
    #[serde(default)]
    pub preshow_duration: f64,
    #[serde(default = "default_preshow_lights")]
    pub preshow_lights: PreshowLights,
    /// Seconds after each song; 0 disables the post-show.
    #[serde(default)]
    pub postshow_duration: f64,
    #[serde(default = "default_preshow_lights")]
    pub postshow_lights: PreshowLights,
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default = "default_audio_in_card")]
    pub audio_in_card: String,
    #[serde(default = "default_audio_in_sample_rate")]
    pub audio_in_sample_rate: u32,
    #[serde(default = "default_audio_in_channels")]
    pub audio_in_channels: u16,
    #[serde(default = "default_audio_in_command")]
    pub audio_in_command: String,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            gpio_pins: default_gpio_pins(),
            pin_modes: default_pin_modes(),
            pwm_range: default_pwm_range(),
            active_low_mode: false,
            gpio_root: default_gpio_root(),
        }
    }
}

impl Default for AudioProcessingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            min_frequency: default_min_frequency(),
            max_frequency: default_max_frequency(),
            custom_channel_mapping: Vec::new(),
            custom_channel_frequencies: Vec::new(),
            transcoder: default_transcoder(),
            output: default_output(),
            pcm_command: default_pcm_command(),
            fm_bin_path: default_fm_bin_path(),
            fm_frequency: default_fm_frequency(),
            fm_ps_text: default_fm_ps_text(),
            fm_pi_text: default_fm_pi_text(),
        }
    }
}

impl Default for LightshowConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            light_delay: 0.0,
            always_on_channels: Vec::new(),
            always_off_channels: Vec::new(),
            invert_channels: Vec::new(),
            preshow_duration: 0.0,
            preshow_lights: default_preshow_lights(),
            postshow_duration: 0.0,
            postshow_lights: default_preshow_lights(),
            state_path: default_state_path(),
            audio_in_card: default_audio_in_card(),
            audio_in_sample_rate: default_audio_in_sample_rate(),
            audio_in_channels: default_audio_in_channels(),
            audio_in_command: default_audio_in_command(),
        }
    }
}

fn default_backend() -> BackendKind { BackendKind::Memory }
fn default_gpio_pins() -> Vec<u32> { vec![17, 18, 27, 22, 23, 24, 25, 4] }
fn default_pin_modes() -> Vec<PinMode> { vec![PinMode::Pwm] }
fn default_pwm_range() -> u32 { 100 }
fn default_gpio_root() -> PathBuf { "/sys/class/gpio".into() }
fn default_chunk_size() -> usize { 2048 }
fn default_min_frequency() -> f64 { 20.0 }
fn default_max_frequency() -> f64 { 15000.0 }
fn default_transcoder() -> String { "ffmpeg".into() }
fn default_output() -> SinkKind { SinkKind::Pcm }
fn default_pcm_command() -> String { "aplay".into() }
fn default_fm_bin_path() -> String { "pifm".into() }
fn default_fm_frequency() -> String { "88.1".into() }
fn default_fm_ps_text() -> String { "LightShw".into() }
fn default_fm_pi_text() -> String { "FFFF".into() }
fn default_mode() -> ShowMode { ShowMode::Playlist }
fn default_preshow_lights() -> PreshowLights { PreshowLights::Off }
fn default_audio_in_card() -> String { "default".into() }
fn default_audio_in_sample_rate() -> u32 { 44100 }
fn default_audio_in_channels() -> u16 { 2 }
fn default_audio_in_command() -> String { "arecord".into() }

fn default_state_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("lumasync")
        .join("state.toml")
}

/// A missing file means defaults; a malformed one is an error.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(e) => return Err(Error::io(path, e)),
    };
    Ok(toml::from_str(&content)?)
}

/// `--config`, then `./lumasync.toml`, then the per-user config files.
pub fn discover_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("lumasync.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("lumasync").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("lumasync").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

impl Config {
    pub fn analysis_settings(&self) -> AnalysisSettings {
        let audio = &self.audio_processing;
        AnalysisSettings {
            chunk_size: audio.chunk_size,
            channel_count: self.hardware.gpio_pins.len(),
            min_frequency: audio.min_frequency,
            max_frequency: audio.max_frequency,
            custom_channel_mapping: non_empty(&audio.custom_channel_mapping),
            custom_channel_frequencies: non_empty(&audio.custom_channel_frequencies),
        }
    }

    pub fn channel_config(&self) -> Result<ChannelConfig> {
        let hw = &self.hardware;
        let modes: Vec<ChannelMode> = hw
            .pin_modes
            .iter()
            .map(|m| match m {
                PinMode::Pwm => ChannelMode::Pwm,
                PinMode::OnOff => ChannelMode::OnOff,
            })
            .collect();
        let show = &self.lightshow;
        let channels = hw.gpio_pins.len();
        for (name, list) in [
            ("always_on_channels", &show.always_on_channels),
            ("always_off_channels", &show.always_off_channels),
            ("invert_channels", &show.invert_channels),
        ] {
            if let Some(bad) = list.iter().find(|&&c| c == 0 || c > channels) {
                return Err(Error::InvalidConfig(format!(
                    "{} lists channel {}, expected 1..={}",
                    name, bad, channels
                )));
            }
        }
        Ok(
            ChannelConfig::new(hw.gpio_pins.clone(), &modes, hw.pwm_range, hw.active_low_mode)?.with_overrides(
                show.always_on_channels.clone(),
                show.always_off_channels.clone(),
                show.invert_channels.clone(),
            ),
        )
    }

    pub fn pin_backend(&self) -> Box<dyn PinBackend> {
        match self.hardware.backend {
            BackendKind::Memory => Box::new(MemoryPins::new()),
            BackendKind::Sysfs => Box::new(SysfsPins::new(&self.hardware.gpio_root)),
        }
    }

    pub fn decoders(&self) -> FileDecoders {
        FileDecoders {
            transcoder: self.audio_processing.transcoder.clone(),
        }
    }

    pub fn sink_settings(&self) -> SinkSettings {
        let audio = &self.audio_processing;
        SinkSettings {
            kind: audio.output,
            pcm_command: audio.pcm_command.clone(),
            fm_bin_path: audio.fm_bin_path.clone(),
            fm_frequency: audio.fm_frequency.clone(),
            fm_ps_text: audio.fm_ps_text.clone(),
            fm_pi_text: audio.fm_pi_text.clone(),
            paced: true,
        }
    }

    pub fn show_settings(&self) -> Result<ShowSettings> {
        let show = &self.lightshow;
        let light_delay = seconds("light_delay", show.light_delay)?;
        let preshow_duration = seconds("preshow_duration", show.preshow_duration)?;
        let postshow_duration = seconds("postshow_duration", show.postshow_duration)?;
        Ok(ShowSettings {
            light_delay,
            preshow: (!preshow_duration.is_zero()).then_some(PreshowSettings {
                duration: preshow_duration,
                lights: show.preshow_lights,
            }),
            postshow: (!postshow_duration.is_zero()).then_some(PreshowSettings {
                duration: postshow_duration,
                lights: show.postshow_lights,
            }),
        })
    }

    /// Arguments for the capture command in audio-in mode: 16-bit WAV on
    /// stdout from the configured card.
    pub fn capture_args(&self) -> Vec<OsString> {
        let show = &self.lightshow;
        vec![
            "-q".into(),
            "-D".into(),
            show.audio_in_card.clone().into(),
            "-f".into(),
            "S16_LE".into(),
            "-c".into(),
            show.audio_in_channels.to_string().into(),
            "-r".into(),
            show.audio_in_sample_rate.to_string().into(),
            "-t".into(),
            "wav".into(),
        ]
    }
}

fn non_empty<T: Clone>(list: &[T]) -> Option<Vec<T>> {
    (!list.is_empty()).then(|| list.to_vec())
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| Error::InvalidConfig(format!("{} must be a non-negative number of seconds", name)))
}
