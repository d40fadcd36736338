//! Tunes - play audio files from the command line
//!
//! Usage: `tunes <file>...`

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::sync::broadcast::error::RecvError;

use tunes::audio::{PlayerEvent, RodioBackend, RodioSourceOpener, SystemClock, spawn_player};
use tunes::utils::format_time;
use tunes::{EngineSettings, Song};

fn main() -> anyhow::Result<()> {
    // Initialize tracing for logging
    tracing_subscriber::fmt::init();

    let paths: Vec<PathBuf> = std::env::args_os().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        bail!("usage: tunes <file>...");
    }

    let settings = EngineSettings::load();
    let backend = RodioBackend::new(settings.output_device.clone());
    let player = spawn_player(
        Box::new(backend),
        Arc::new(RodioSourceOpener),
        Arc::new(SystemClock::new()),
        settings,
    )
    .map_err(anyhow::Error::msg)
    .context("Failed to start player")?;

    let handle = player.handle.clone();
    let mut events = handle.subscribe();

    let songs = paths
        .into_iter()
        .enumerate()
        .map(|(i, path)| Song::from_path(i as u64, path))
        .collect();
    handle.set_queue(songs, 0);

    loop {
        match events.blocking_recv() {
            Ok(PlayerEvent::Started { song }) => {
                println!("\n> {} - {}", song.artist, song.title);
            }
            Ok(PlayerEvent::Progress { position }) => {
                print!(
                    "\r  {} / {}",
                    format_time(position),
                    format_time(handle.duration())
                );
                let _ = std::io::stdout().flush();
            }
            Ok(PlayerEvent::Error { message }) => eprintln!("\n{}", message),
            Ok(PlayerEvent::QueueEnded) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
    println!();

    player
        .join(Duration::from_secs(2))
        .map_err(anyhow::Error::msg)?;
    Ok(())
}
