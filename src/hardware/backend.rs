use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Last value written to a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    Digital(bool),
    Duty(u32),
    Released,
}

/// Raw pin access. Pins are physical numbers, not channel indices.
pub trait PinBackend: Send {
    fn supports_pwm(&self) -> bool {
        true
    }
    fn setup_output(&mut self, pin: u32, pwm: bool, range: u32) -> io::Result<()>;
    fn pwm_write(&mut self, pin: u32, value: u32) -> io::Result<()>;
    fn digital_write(&mut self, pin: u32, high: bool) -> io::Result<()>;
    fn release(&mut self, pin: u32) -> io::Result<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    levels: HashMap<u32, PinLevel>,
    history: HashMap<u32, Vec<PinLevel>>,
    failing: HashSet<u32>,
    writes: usize,
}

/// In-memory pins. Clones share state, so a caller can keep a handle and
/// inspect what a driver wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryPins {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryPins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self, pin: u32) -> Option<PinLevel> {
        self.lock().levels.get(&pin).copied()
    }

    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    /// Every level written to `pin`, oldest first.
    pub fn history(&self, pin: u32) -> Vec<PinLevel> {
        self.lock().history.get(&pin).cloned().unwrap_or_default()
    }

    /// Make every later write to `pin` fail.
    pub fn fail_pin(&self, pin: u32) {
        self.lock().failing.insert(pin);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set(&self, pin: u32, level: PinLevel) -> io::Result<()> {
        let mut state = self.lock();
        if state.failing.contains(&pin) {
            return Err(io::Error::new(io::ErrorKind::Other, format!("pin {} is unavailable", pin)));
        }
        state.writes += 1;
        state.levels.insert(pin, level);
        state.history.entry(pin).or_default().push(level);
        Ok(())
    }
}

impl PinBackend for MemoryPins {
    fn setup_output(&mut self, pin: u32, pwm: bool, _range: u32) -> io::Result<()> {
        let level = if pwm { PinLevel::Duty(0) } else { PinLevel::Digital(false) };
        self.set(pin, level)
    }

    fn pwm_write(&mut self, pin: u32, value: u32) -> io::Result<()> {
        self.set(pin, PinLevel::Duty(value))
    }

    fn digital_write(&mut self, pin: u32, high: bool) -> io::Result<()> {
        self.set(pin, PinLevel::Digital(high))
    }

    fn release(&mut self, pin: u32) -> io::Result<()> {
        self.set(pin, PinLevel::Released)
    }
}

/// GPIO through the kernel's sysfs interface. On/off only.
#[derive(Debug)]
pub struct SysfsPins {
    root: PathBuf,
    exported: HashSet<u32>,
}

impl SysfsPins {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exported: HashSet::new(),
        }
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{}", pin))
    }
}

impl PinBackend for SysfsPins {
    fn supports_pwm(&self) -> bool {
        false
    }

    fn setup_output(&mut self, pin: u32, _pwm: bool, _range: u32) -> io::Result<()> {
        if !self.pin_dir(pin).exists() {
            std::fs::write(self.root.join("export"), pin.to_string())?;
        }
        self.exported.insert(pin);
        std::fs::write(self.pin_dir(pin).join("direction"), "out")
    }

    fn pwm_write(&mut self, pin: u32, _value: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("sysfs gpio{} has no PWM", pin),
        ))
    }

    fn digital_write(&mut self, pin: u32, high: bool) -> io::Result<()> {
        std::fs::write(self.pin_dir(pin).join("value"), if high { "1" } else { "0" })
    }

    fn release(&mut self, pin: u32) -> io::Result<()> {
        std::fs::write(self.pin_dir(pin).join("direction"), "in")?;
        if self.exported.remove(&pin) {
            std::fs::write(self.root.join("unexport"), pin.to_string())?;
        }
        Ok(())
    }
}
