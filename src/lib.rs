//! Drives a bank of lighting channels from the frequency content of music,
//! with a per-song analysis cache so replays skip the FFT pass.

pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod hardware;
pub mod output;
pub mod scan;
pub mod show;

pub use error::{Error, Result};
