mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cli::{Cli, Command, LightState};
use lumasync::audio::decode::{DecoderFactory, PipedWavSource};
use lumasync::cache::precompute::{CacheOrigin, PrecomputeCoordinator};
use lumasync::config::{self, Config, ShowMode};
use lumasync::hardware::ChannelDriver;
use lumasync::scan;
use lumasync::show::live::run_live;
use lumasync::show::state::{CancelToken, StateStore};
use lumasync::show::Show;

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log.as_str()))
        .format_timestamp_millis()
        .init();

    let config = match config::discover_config(cli.config.as_deref()) {
        Some(path) => {
            let cfg = config::load_config(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            log::info!("Loaded config from {}", path.display());
            cfg
        }
        None => {
            log::info!("No config file found, using defaults");
            Config::default()
        }
    };

    match cli.command {
        Command::Play { .. } if config.lightshow.mode == ShowMode::AudioIn => {
            log::info!("[lightshow] mode is audio-in, ignoring the playlist");
            audio_in(&config)
        }
        Command::Play { files, state } => play(&config, &files, state),
        Command::Cache { paths, recursive } => build_caches(&config, &paths, recursive),
        Command::AudioIn => audio_in(&config),
        Command::Lights {
            state,
            light,
            sleep,
            flashes,
        } => lights(&config, state, &light, sleep, flashes),
        Command::Scan {
            path,
            recursive,
            output,
        } => scan_songs(&config, &path, recursive, output.as_deref()),
    }
}

fn open_driver(config: &Config) -> Result<ChannelDriver> {
    let channels = config.channel_config().context("Invalid hardware configuration")?;
    log::info!("Lighting channels: {} on pins {:?}", channels.channel_count(), channels.pins);
    let mut driver = ChannelDriver::new(channels, config.pin_backend());
    driver.initialize().context("Failed to initialize lighting channels")?;
    Ok(driver)
}

fn cancel_on_ctrlc() -> Result<CancelToken> {
    let token = CancelToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        log::info!("Interrupted, stopping after the current chunk");
        handler_token.cancel();
    })
    .context("Failed to install Ctrl+C handler")?;
    Ok(token)
}

fn play(config: &Config, files: &[PathBuf], state: Option<PathBuf>) -> Result<()> {
    let show_settings = config.show_settings()?;
    let mut driver = open_driver(config)?;
    let cancel = cancel_on_ctrlc()?;

    let state_path = state.unwrap_or_else(|| config.lightshow.state_path.clone());
    if let Some(parent) = state_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create state directory {}", parent.display()))?;
    }
    let mut store = StateStore::open(&state_path)
        .with_context(|| format!("Failed to open show state {}", state_path.display()))?;

    let decoders: Arc<dyn DecoderFactory> = Arc::new(config.decoders());
    let coordinator = PrecomputeCoordinator::new(config.analysis_settings(), Arc::clone(&decoders));

    let report = Show::new(
        &coordinator,
        decoders,
        config.sink_settings(),
        show_settings,
        &mut driver,
    )
    .run(files, &cancel, Some(&mut store));
    driver.cleanup();

    for outcome in &report.played {
        log::info!(
            "{}: {:?}, {} chunks, {} light updates",
            outcome.song.display(),
            outcome.playback.state,
            outcome.playback.chunks_played,
            outcome.playback.rows_driven
        );
    }
    for skipped in &report.skipped {
        log::error!("Skipped {}: {}", skipped.song.display(), skipped.reason);
    }
    log::info!(
        "Show finished: {} played, {} skipped, {} chunks analyzed",
        report.played.len(),
        report.skipped.len(),
        coordinator.analyzed_chunks()
    );
    Ok(())
}

fn build_caches(config: &Config, paths: &[PathBuf], recursive: bool) -> Result<()> {
    let songs = scan::collect_music_files(paths, recursive)?;
    if songs.is_empty() {
        anyhow::bail!("No music files found");
    }
    log::info!("Checking caches for {} songs", songs.len());

    let coordinator = PrecomputeCoordinator::new(config.analysis_settings(), Arc::new(config.decoders()));
    let pb = ProgressBar::new(songs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} songs ({eta} remaining)")?
            .progress_chars("=>-"),
    );

    let results: Vec<_> = songs
        .par_iter()
        .map(|song| {
            let result = coordinator.run_blocking(song);
            pb.inc(1);
            (song, result)
        })
        .collect();
    pb.finish_with_message("Caching complete");

    let mut built = 0;
    let mut failed = 0;
    for (song, result) in results {
        match result {
            Ok(analysis) => {
                if let CacheOrigin::Built { .. } = analysis.origin {
                    built += 1;
                }
            }
            Err(e) => {
                log::error!("{}: {}", song.display(), e);
                failed += 1;
            }
        }
    }
    log::info!("{} caches built, {} already valid, {} failed", built, songs.len() - built - failed, failed);
    if failed > 0 {
        anyhow::bail!("{} songs could not be analyzed", failed);
    }
    Ok(())
}

fn audio_in(config: &Config) -> Result<()> {
    let mut driver = open_driver(config)?;
    let cancel = cancel_on_ctrlc()?;

    let settings = config.analysis_settings();
    let mut source = PipedWavSource::spawn(
        &config.lightshow.audio_in_command,
        &config.capture_args(),
        settings.chunk_size,
    )
        .context("Failed to start audio capture")?;
    log::info!("Running in audio-in mode, press Ctrl+C to stop");

    let result = run_live(&settings, &mut source, &mut driver, None, &cancel);
    driver.cleanup();
    let report = result?;
    log::info!("Audio-in finished: {} chunks, {} silent", report.chunks, report.silent_chunks);
    Ok(())
}

fn lights(config: &Config, state: LightState, light: &[usize], sleep: f64, flashes: usize) -> Result<()> {
    let mut driver = open_driver(config)?;
    let count = driver.channel_count();
    let selected: Vec<usize> = if light.is_empty() {
        (0..count).collect()
    } else {
        if let Some(bad) = light.iter().find(|&&l| l == 0 || l > count) {
            anyhow::bail!("Light {} is not a channel (1..={})", bad, count);
        }
        light.iter().map(|l| l - 1).collect()
    };
    let sleep = Duration::try_from_secs_f64(sleep).context("--sleep must be a non-negative number")?;

    match state {
        LightState::On => {
            for &l in &selected {
                driver.turn_on(l, false)?;
            }
        }
        LightState::Off => {
            for &l in &selected {
                driver.turn_off(l, false)?;
            }
        }
        LightState::Flash => driver.flash(&selected, flashes, sleep)?,
        LightState::Fade => driver.fade(&selected, flashes, sleep)?,
        LightState::Cleanup => driver.cleanup(),
    }
    Ok(())
}

fn scan_songs(config: &Config, path: &Path, recursive: bool, output: Option<&Path>) -> Result<()> {
    let songs = scan::collect_music_files(&[path.to_path_buf()], recursive)?;
    let decoders = config.decoders();
    let chunk_size = config.audio_processing.chunk_size;

    let mut metas = Vec::with_capacity(songs.len());
    for song in &songs {
        match scan::song_meta(&decoders, song, chunk_size) {
            Ok(meta) => metas.push(meta),
            Err(e) => log::warn!("Skipping {}: {}", song.display(), e),
        }
    }

    let json = serde_json::to_string_pretty(&metas)?;
    match output {
        Some(out) => {
            std::fs::write(out, json).with_context(|| format!("Failed to write {}", out.display()))?;
            log::info!("Wrote {} entries to {}", metas.len(), out.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
