use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rangeplay::config::Config;
use rangeplay::models::Song;
use rangeplay::player::{HeadlessPlayer, MediaElement};
use rangeplay::services::SearchBy;
use rangeplay::stream::{PlaybackSession, PlaybackStatus, SessionEvent, Streamer};

/// Interval between simulated decoder time updates
const TICK: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "rangeplay")]
#[command(about = "Stream MP3s from a catalog server in adaptive byte-range chunks")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe every configured server
    Servers,

    /// List the catalog
    List,

    /// Search the catalog
    Search {
        /// Field to match: title, artist, genre or album
        #[arg(long, default_value = "title")]
        by: SearchBy,

        query: String,
    },

    /// Play a song headlessly through the streaming engine
    Play {
        song_id: String,

        /// Write the received bytes to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Playback position (seconds) at which to issue a seek
        #[arg(long, requires = "seek_to")]
        seek_at: Option<f64>,

        /// Seek target in seconds
        #[arg(long, requires = "seek_at")]
        seek_to: Option<f64>,

        /// Simulated playback speed
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
    },

    /// Write the effective configuration to the config file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rangeplay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env_overrides();

    match cli.command {
        Command::Servers => servers(&config).await,
        Command::List => {
            let streamer = Streamer::from_config(&config)?;
            print_songs(&streamer.catalog().list_songs().await?);
            Ok(())
        }
        Command::Search { by, query } => {
            let streamer = Streamer::from_config(&config)?;
            print_songs(&streamer.catalog().search(by, &query).await?);
            Ok(())
        }
        Command::Play {
            song_id,
            output,
            seek_at,
            seek_to,
            speed,
        } => {
            let seek = seek_at.zip(seek_to);
            play(&config, &song_id, output, seek, speed).await
        }
        Command::InitConfig => {
            let path = match cli.config {
                Some(path) => path,
                None => Config::default_path()?,
            };
            config.validate()?;
            config.save(&path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

async fn servers(config: &Config) -> Result<()> {
    let streamer = Streamer::from_config(config)?;
    let report = streamer.directory().probe_all().await;

    for (endpoint, reachable) in &report {
        println!("{} {}", if *reachable { "✓" } else { "✗" }, endpoint);
    }

    if report.iter().any(|(_, reachable)| *reachable) {
        Ok(())
    } else {
        Err(anyhow!("No server available"))
    }
}

fn print_songs(songs: &[Song]) {
    for song in songs {
        let minutes = (song.duration / 60.0).floor();
        let seconds = song.duration - minutes * 60.0;
        println!(
            "{:>6}  {}  [{:.0}:{:02.0}]",
            song.id.as_str(),
            song.label(),
            minutes,
            seconds.floor()
        );
    }
}

async fn play(
    config: &Config,
    song_id: &str,
    output: Option<PathBuf>,
    seek: Option<(f64, f64)>,
    speed: f64,
) -> Result<()> {
    if !(speed > 0.0) {
        return Err(anyhow!("--speed must be greater than 0"));
    }

    let streamer = Streamer::from_config(config)?;
    let song = streamer.catalog().find(song_id).await?;
    let song = streamer.prepare(song).await?;

    let player = match &output {
        Some(path) => HeadlessPlayer::with_sink(song.size, song.duration, path).await?,
        None => HeadlessPlayer::new(song.size, song.duration),
    };

    let session = streamer
        .open_session(song, Arc::new(player.clone()), Arc::new(player.clone()))
        .await?;

    let mut status = session.subscribe_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            println!("[{}]", current);
        }
    });

    let (tx, rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();
    let driver = tokio::spawn(Arc::clone(&session).run(rx, cancel.clone()));

    player.open();
    session
        .start()
        .await
        .with_context(|| format!("Failed to start {}", session.song().label()))?;
    deliver(&tx, &session, SessionEvent::Play).await;

    let mut pending_seek = seek;
    let mut ticker = tokio::time::interval(TICK);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {
                let position = player.advance(TICK.as_secs_f64() * speed).await;

                let event = match pending_seek {
                    Some((at, to)) if position >= at => {
                        pending_seek = None;
                        SessionEvent::Seek(to)
                    }
                    _ => SessionEvent::TimeUpdate,
                };

                if !deliver(&tx, &session, event).await {
                    warn!("Stopping after failure");
                    break;
                }
                if player.is_ended() {
                    break;
                }
            }
        }
    }

    cancel.cancel();
    let outcome = driver.await?;
    session.close().await;

    println!("{}", session.stats().format_report());
    if let Some(path) = output {
        println!("Received bytes written to {}", path.display());
    }

    match (outcome, session.status()) {
        (Err(e), _) => Err(e.into()),
        (Ok(()), PlaybackStatus::Failed(reason)) => Err(anyhow!(reason)),
        _ => Ok(()),
    }
}

/// Hand `event` to the session driver.
///
/// Returns false once the session has failed or its driver has exited; the
/// caller reports the session's own outcome rather than the closed channel.
async fn deliver(
    tx: &mpsc::Sender<SessionEvent>,
    session: &PlaybackSession,
    event: SessionEvent,
) -> bool {
    if session.status().is_failed() {
        return false;
    }
    tx.send(event).await.is_ok()
}
