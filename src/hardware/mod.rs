//! Lighting channels: logical brightness, override policy, physical polarity.

pub mod backend;

use std::time::Duration;

use backend::PinBackend;

use crate::error::{Error, Result};

/// How a channel turns brightness into a pin write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Pwm,
    OnOff,
}

/// Static per-channel policy applied on top of the computed brightness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOverride {
    Normal,
    AlwaysOn,
    AlwaysOff,
    Inverted,
}

/// The physical channel list and its static policy, fixed for the process.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    pub pins: Vec<u32>,
    pub modes: Vec<ChannelMode>,
    /// 1-based channel numbers.
    pub always_on: Vec<usize>,
    pub always_off: Vec<usize>,
    pub inverted: Vec<usize>,
    pub active_low: bool,
    pub pwm_range: u32,
}

impl ChannelConfig {
    /// A single mode entry applies to every pin.
    pub fn new(pins: Vec<u32>, modes: &[ChannelMode], pwm_range: u32, active_low: bool) -> Result<Self> {
        if pins.is_empty() {
            return Err(Error::InvalidConfig("no gpio pins configured".into()));
        }
        if pwm_range == 0 {
            return Err(Error::InvalidConfig("pwm_range must be positive".into()));
        }
        let modes = match modes.len() {
            0 => vec![ChannelMode::Pwm; pins.len()],
            1 => vec![modes[0]; pins.len()],
            n if n == pins.len() => modes.to_vec(),
            n => {
                return Err(Error::InvalidConfig(format!(
                    "{} pin modes for {} pins",
                    n,
                    pins.len()
                )))
            }
        };
        Ok(Self {
            pins,
            modes,
            always_on: Vec::new(),
            always_off: Vec::new(),
            inverted: Vec::new(),
            active_low,
            pwm_range,
        })
    }

    pub fn with_overrides(mut self, always_on: Vec<usize>, always_off: Vec<usize>, inverted: Vec<usize>) -> Self {
        self.always_on = always_on;
        self.always_off = always_off;
        self.inverted = inverted;
        self
    }

    pub fn channel_count(&self) -> usize {
        self.pins.len()
    }

    /// Always-off wins over always-on, which wins over inverted.
    pub fn override_for(&self, channel: usize) -> ChannelOverride {
        let number = channel + 1;
        if self.always_off.contains(&number) {
            ChannelOverride::AlwaysOff
        } else if self.always_on.contains(&number) {
            ChannelOverride::AlwaysOn
        } else if self.inverted.contains(&number) {
            ChannelOverride::Inverted
        } else {
            ChannelOverride::Normal
        }
    }
}

/// The only writer of the physical channel set.
pub struct ChannelDriver {
    config: ChannelConfig,
    modes: Vec<ChannelMode>,
    overrides: Vec<ChannelOverride>,
    backend: Box<dyn PinBackend>,
}

impl ChannelDriver {
    pub fn new(config: ChannelConfig, backend: Box<dyn PinBackend>) -> Self {
        let modes = if backend.supports_pwm() {
            config.modes.clone()
        } else {
            if config.modes.contains(&ChannelMode::Pwm) {
                log::info!("Pin backend has no PWM, running every channel in on/off mode");
            }
            vec![ChannelMode::OnOff; config.channel_count()]
        };
        let overrides = (0..config.channel_count()).map(|ch| config.override_for(ch)).collect();
        Self {
            config,
            modes,
            overrides,
            backend,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn channel_count(&self) -> usize {
        self.config.channel_count()
    }

    /// Effective mode of `channel`, `None` past the last channel.
    pub fn mode(&self, channel: usize) -> Option<ChannelMode> {
        self.modes.get(channel).copied()
    }

    /// Set every pin as an output and start dark.
    pub fn initialize(&mut self) -> Result<()> {
        for channel in 0..self.channel_count() {
            let pin = self.config.pins[channel];
            let pwm = self.modes[channel] == ChannelMode::Pwm;
            self.backend
                .setup_output(pin, pwm, self.config.pwm_range)
                .map_err(|e| Error::Hardware {
                    channel,
                    reason: e.to_string(),
                })?;
        }
        self.all_off(false);
        Ok(())
    }

    /// Write one channel.
    ///
    /// `brightness` is the logical level in `[0, 1]` (NaN counts as 0). On/off
    /// channels switch on above 0.5. With `apply_overrides` the channel's
    /// static override is applied before the active-low polarity flip.
    pub fn drive(&mut self, channel: usize, brightness: f64, apply_overrides: bool) -> Result<()> {
        let pin = *self.config.pins.get(channel).ok_or_else(|| Error::Hardware {
            channel,
            reason: "no such channel".into(),
        })?;
        let b = if brightness.is_nan() { 0.0 } else { brightness.clamp(0.0, 1.0) };
        let policy = if apply_overrides {
            self.overrides[channel]
        } else {
            ChannelOverride::Normal
        };
        let active_low = self.config.active_low;

        let written = match self.modes[channel] {
            ChannelMode::Pwm => {
                let logical = match policy {
                    ChannelOverride::AlwaysOff => 0.0,
                    ChannelOverride::AlwaysOn => 1.0,
                    ChannelOverride::Inverted => 1.0 - b,
                    ChannelOverride::Normal => b,
                };
                let physical = if active_low { 1.0 - logical } else { logical };
                let duty = (physical * self.config.pwm_range as f64) as u32;
                self.backend.pwm_write(pin, duty)
            }
            ChannelMode::OnOff => {
                let on = b > 0.5;
                let on = match policy {
                    ChannelOverride::AlwaysOff => false,
                    ChannelOverride::AlwaysOn => true,
                    ChannelOverride::Inverted => !on,
                    ChannelOverride::Normal => on,
                };
                self.backend.digital_write(pin, on != active_low)
            }
        };
        written.map_err(|e| Error::Hardware {
            channel,
            reason: e.to_string(),
        })
    }

    /// Drive every channel with overrides applied. A failing channel is
    /// logged and skipped; returns how many writes failed.
    pub fn update(&mut self, brightness: &[f64]) -> usize {
        let mut failures = 0;
        for (channel, &b) in brightness.iter().enumerate().take(self.channel_count()) {
            if let Err(e) = self.drive(channel, b, true) {
                log::warn!("{}", e);
                failures += 1;
            }
        }
        failures
    }

    pub fn turn_on(&mut self, channel: usize, apply_overrides: bool) -> Result<()> {
        self.drive(channel, 1.0, apply_overrides)
    }

    pub fn turn_off(&mut self, channel: usize, apply_overrides: bool) -> Result<()> {
        self.drive(channel, 0.0, apply_overrides)
    }

    pub fn all_on(&mut self, apply_overrides: bool) -> usize {
        self.fill(1.0, apply_overrides)
    }

    pub fn all_off(&mut self, apply_overrides: bool) -> usize {
        self.fill(0.0, apply_overrides)
    }

    fn fill(&mut self, brightness: f64, apply_overrides: bool) -> usize {
        let mut failures = 0;
        for channel in 0..self.channel_count() {
            if let Err(e) = self.drive(channel, brightness, apply_overrides) {
                log::warn!("{}", e);
                failures += 1;
            }
        }
        failures
    }

    /// Turn everything off and hand the pins back.
    pub fn cleanup(&mut self) {
        log::info!("Cleaning up lighting channels");
        self.all_off(false);
        for channel in 0..self.channel_count() {
            if let Err(e) = self.backend.release(self.config.pins[channel]) {
                log::warn!("Failed to release channel {}: {}", channel, e);
            }
        }
    }

    /// Switch each light on and off `flashes` times.
    pub fn flash(&mut self, lights: &[usize], flashes: usize, sleep: Duration) -> Result<()> {
        for &light in lights {
            log::info!("channel {}", light + 1);
            for _ in 0..flashes {
                self.turn_on(light, false)?;
                std::thread::sleep(sleep);
                self.turn_off(light, false)?;
                std::thread::sleep(sleep);
            }
        }
        Ok(())
    }

    /// Ramp each PWM light up and down `flashes` times; on/off lights flash.
    pub fn fade(&mut self, lights: &[usize], flashes: usize, sleep: Duration) -> Result<()> {
        let steps = self.config.pwm_range;
        let step_sleep = sleep / steps;
        for &light in lights {
            if self.modes.get(light) != Some(&ChannelMode::Pwm) {
                self.flash(&[light], flashes, sleep)?;
                continue;
            }
            for _ in 0..flashes {
                for level in (0..steps).chain((0..steps).rev()) {
                    self.drive(light, level as f64 / steps as f64, false)?;
                    std::thread::sleep(step_sleep);
                }
            }
        }
        Ok(())
    }
}
