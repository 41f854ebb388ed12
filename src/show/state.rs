//! External control: cancellation tokens and the persisted show state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

pub const PLAY_NOW: &str = "play_now";
pub const SONG_TO_PLAY: &str = "song_to_play";

/// Polled once per chunk. Must not block.
pub trait InterruptSource {
    fn interrupt_requested(&self) -> bool;
}

impl<T: InterruptSource + ?Sized> InterruptSource for &T {
    fn interrupt_requested(&self) -> bool {
        (**self).interrupt_requested()
    }
}

/// Never fires.
pub struct NoInterrupt;

impl InterruptSource for NoInterrupt {
    fn interrupt_requested(&self) -> bool {
        false
    }
}

/// Process-wide flag, set from a signal handler or another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl InterruptSource for CancelToken {
    fn interrupt_requested(&self) -> bool {
        self.is_cancelled()
    }
}

/// Fires when any of its sources does.
#[derive(Default)]
pub struct AnyInterrupt<'a> {
    sources: Vec<&'a dyn InterruptSource>,
}

impl<'a> AnyInterrupt<'a> {
    pub fn new() -> Self {
        Self { sources: Vec::new() }
    }

    pub fn with(mut self, source: &'a dyn InterruptSource) -> Self {
        self.sources.push(source);
        self
    }
}

impl InterruptSource for AnyInterrupt<'_> {
    fn interrupt_requested(&self) -> bool {
        self.sources.iter().any(|s| s.interrupt_requested())
    }
}

/// Integer key/value state kept in a TOML file shared with other processes.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    values: toml::Table,
}

impl StateStore {
    /// A missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = read_table(&path)?;
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reload(&mut self) -> Result<()> {
        self.values = read_table(&self.path)?;
        Ok(())
    }

    pub fn get(&self, key: &str, default: i64) -> i64 {
        self.values
            .get(key)
            .and_then(|v| v.as_integer())
            .unwrap_or(default)
    }

    pub fn set(&mut self, key: &str, value: i64) -> Result<()> {
        self.values.insert(key.to_string(), toml::Value::Integer(value));
        let text = toml::to_string(&self.values)?;
        std::fs::write(&self.path, text).map_err(|e| Error::io(&self.path, e))
    }

    /// Current `play_now` on disk, ignoring the in-memory copy.
    pub fn peek_play_now(&self) -> i64 {
        read_table(&self.path)
            .ok()
            .and_then(|t| t.get(PLAY_NOW).and_then(|v| v.as_integer()))
            .unwrap_or(0)
    }
}

impl InterruptSource for StateStore {
    fn interrupt_requested(&self) -> bool {
        self.peek_play_now() != 0
    }
}

fn read_table(path: &Path) -> Result<toml::Table> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text.parse::<toml::Table>()?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(toml::Table::new()),
        Err(e) => Err(Error::io(path, e)),
    }
}
