use std::time::{Duration, Instant};

use serde::Deserialize;

use super::state::InterruptSource;
use crate::hardware::ChannelDriver;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreshowLights {
    On,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreshowSettings {
    pub duration: Duration,
    pub lights: PreshowLights,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreshowOutcome {
    Completed,
    Interrupted,
}

/// Hold the lights for the configured duration or until interrupted. Runs
/// both the pre-show and the post-show after each song.
pub fn run_preshow(
    driver: &mut ChannelDriver,
    settings: &PreshowSettings,
    interrupt: &dyn InterruptSource,
) -> PreshowOutcome {
    log::info!("Holding lights {:?} for {:.1}s", settings.lights, settings.duration.as_secs_f64());
    match settings.lights {
        PreshowLights::On => driver.all_on(true),
        PreshowLights::Off => driver.all_off(true),
    };

    let deadline = Instant::now() + settings.duration;
    let outcome = loop {
        if interrupt.interrupt_requested() {
            log::info!("Light hold interrupted");
            break PreshowOutcome::Interrupted;
        }
        let now = Instant::now();
        if now >= deadline {
            break PreshowOutcome::Completed;
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline - now));
    };
    driver.all_off(true);
    outcome
}
