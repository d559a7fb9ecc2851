mod file_server;
mod logging;

use std::io::{self, BufRead, Write};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use pmocast::discovery::{scan_once, write_devices_file};
use pmocast::model::format_progress;
use pmocast::{
    ArtworkExtractor, CastError, ChromecastConnector, DeviceRegistry, Heartbeat, LocalPlayer,
    MediaLocator, PlayerControl, RegistryRefresher, RendererEndpoint, Supervisor, SyncEngine,
    SyncSettings, player_artwork_base, spawn_registry_refresher,
};
use pmoconfig::{Config, ConfigWatcher, DISABLED_RENDERER};
use tracing::{error, info};

use crate::file_server::Mount;

#[derive(Parser, Debug)]
#[command(name = "pmocast")]
#[command(about = "Mirror an MPD or Volumio player on a Chromecast", version)]
struct Cli {
    /// Configuration directory (defaults to $PMOCAST_CONFIG, ./.pmocast, ~/.pmocast)
    #[arg(short, long)]
    config_dir: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the synchronization daemon (default)
    Run,
    /// Choose the renderer to cast to; "off" disables casting
    SetRenderer {
        /// Friendly name; prompts from a fresh scan when omitted
        name: Option<String>,
    },
    /// Scan the network and print the renderers found
    ListRenderers,
    /// Extract embedded covers of albums lacking a cover file
    ExtractArtwork,
    /// Send a command to the local player
    Player {
        #[command(subcommand)]
        action: PlayerAction,
    },
}

#[derive(Subcommand, Debug)]
enum PlayerAction {
    Pause,
    Resume,
    Stop,
    Next,
    Previous,
    /// Seek to an absolute position in seconds
    Seek { seconds: u32 },
    /// Set the volume, 0 to 100
    Volume {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },
    /// Print the current playback state
    Status,
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value.max(1))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Arc::new(Config::load_config(cli.config_dir.as_deref().unwrap_or(""))?);
    logging::init_logging(&config, cli.verbose);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config),
        Command::SetRenderer { name } => set_renderer(&config, name),
        Command::ListRenderers => list_renderers(&config),
        Command::ExtractArtwork => extract_artwork(&config),
        Command::Player { action } => player(&config, action),
    }
}

fn run(config: Arc<Config>) -> Result<()> {
    info!("🚀 Starting PMOCast");
    info!(config = %config.file_path().display(), "📝 Configuration loaded");

    let heartbeat = Heartbeat::new();
    let mut supervisor = Supervisor::new(
        heartbeat.clone(),
        secs(config.get_stall_timeout_secs()),
        secs(config.get_check_interval_secs()),
    );

    let (watcher, targets) = ConfigWatcher::new(config.clone(), secs(config.get_watcher_poll_secs()));
    supervisor.spawn_task("config-watcher", move || {
        watcher
            .run()
            .map_err(|e| CastError::TaskFailed("config-watcher".to_string(), format!("{:#}", e)))
    })?;

    let registry = Arc::new(DeviceRegistry::new());
    let refresher = RegistryRefresher::new(
        registry.clone(),
        secs(config.get_registry_refresh_secs()),
        secs(config.get_scan_window_secs()),
    )
    .with_devices_file(config.get_devices_file());
    spawn_registry_refresher(&mut supervisor, refresher)?;
    info!("📡 Renderer discovery started");

    let port = config.get_http_port();
    let artwork_root = config.get_artwork_root();
    fs::create_dir_all(&artwork_root)?;
    let mounts = vec![
        Mount::new(&config.get_media_route(), PathBuf::from(config.get_media_root())),
        Mount::new(&config.get_artwork_route(), artwork_root),
    ];
    supervisor.spawn_task("media-server", move || {
        file_server::serve(port, mounts)
            .map_err(|e| CastError::TaskFailed("media-server".to_string(), format!("{:#}", e)))
    })?;
    info!(base_url = %config.get_base_url(), "🌐 Media server started");

    let player = LocalPlayer::from_config(&config)?;
    info!(kind = player.kind(), "🎵 Local player configured");

    let mut locator = MediaLocator::from_config(&config);
    if let Some(base) = player_artwork_base(&config) {
        info!(base = %base, "🖼️ Player artwork base");
        locator = locator.with_player_web_base(&base);
    }
    let settings = SyncSettings::from_config(&config);
    let target = config.cast_target();
    let engine_heartbeat = heartbeat.clone();

    // Renderer handles stay on the engine thread.
    supervisor.spawn_task("sync-engine", move || {
        SyncEngine::new(
            player,
            ChromecastConnector::new(),
            registry,
            locator,
            settings,
            engine_heartbeat,
        )
        .with_target(target)
        .with_target_updates(targets)
        .run()
    })?;
    info!("✅ PMOCast is running");

    let err = supervisor.watch();
    error!("💥 {}, exiting", err);
    std::process::exit(1);
}

fn print_renderers(endpoints: &[RendererEndpoint]) {
    for (index, endpoint) in endpoints.iter().enumerate() {
        println!(
            "{:>3}) {}\t{}:{}\t{}",
            index + 1,
            endpoint.friendly_name,
            endpoint.host,
            endpoint.port,
            endpoint.model.as_deref().unwrap_or("-")
        );
    }
}

/// Maps the answer to the renderer prompt onto a renderer name.
///
/// Accepts a list index, an exact friendly name, or `off`/`0`.
fn parse_choice(answer: &str, endpoints: &[RendererEndpoint]) -> Option<String> {
    let answer = answer.trim();
    if answer.eq_ignore_ascii_case(DISABLED_RENDERER) || answer == "0" {
        return Some(DISABLED_RENDERER.to_string());
    }
    if let Ok(index) = answer.parse::<usize>() {
        return endpoints
            .get(index.checked_sub(1)?)
            .map(|e| e.friendly_name.clone());
    }
    endpoints
        .iter()
        .find(|e| e.friendly_name == answer)
        .map(|e| e.friendly_name.clone())
}

fn set_renderer(config: &Config, name: Option<String>) -> Result<()> {
    let name = match name {
        Some(name) => name.trim().to_string(),
        None => {
            let endpoints = scan_once(secs(config.get_scan_window_secs()))?;
            println!("  0) {}", DISABLED_RENDERER);
            print_renderers(&endpoints);
            print!("Renderer: ");
            io::stdout().flush()?;

            let mut answer = String::new();
            io::stdin().lock().read_line(&mut answer)?;
            parse_choice(&answer, &endpoints)
                .ok_or_else(|| anyhow!("Invalid choice '{}'", answer.trim()))?
        }
    };

    if name.is_empty() {
        return Err(anyhow!("Renderer name cannot be empty"));
    }
    config.set_renderer(&name)?;
    if name.eq_ignore_ascii_case(DISABLED_RENDERER) {
        println!("Casting disabled");
    } else {
        println!("Casting to {}", name);
    }
    Ok(())
}

fn list_renderers(config: &Config) -> Result<()> {
    let endpoints = scan_once(secs(config.get_scan_window_secs()))?;
    if endpoints.is_empty() {
        println!("No renderer found");
        return Ok(());
    }
    print_renderers(&endpoints);

    let names: Vec<String> = endpoints.iter().map(|e| e.friendly_name.clone()).collect();
    write_devices_file(&config.get_devices_file(), &names)?;
    Ok(())
}

fn extract_artwork(config: &Config) -> Result<()> {
    let extractor = ArtworkExtractor::new(config.get_media_root(), config.get_artwork_root());
    let created = extractor.extract_all()?;
    println!(
        "{} cover(s) extracted into {}",
        created,
        extractor.artwork_root().display()
    );
    Ok(())
}

fn player(config: &Config, action: PlayerAction) -> Result<()> {
    let mut player = LocalPlayer::from_config(config)?;
    match action {
        PlayerAction::Pause => player.pause()?,
        PlayerAction::Resume => player.resume()?,
        PlayerAction::Stop => player.stop()?,
        PlayerAction::Next => player.next()?,
        PlayerAction::Previous => player.previous()?,
        PlayerAction::Seek { seconds } => player.seek(seconds)?,
        PlayerAction::Volume { percent } => player.set_volume(percent)?,
        PlayerAction::Status => {
            let state = player.poll()?;
            println!("{:?}", state.status);
            if let Some(track) = &state.track_ref {
                println!("track:  {}", track);
            }
            for (label, value) in [
                ("title", &state.title),
                ("artist", &state.artist),
                ("album", &state.album),
                ("format", &state.audio_format),
            ] {
                if let Some(value) = value {
                    println!("{:<7} {}", format!("{}:", label), value);
                }
            }
            println!(
                "time:   {}",
                format_progress(state.elapsed_secs, state.duration_secs)
            );
            match state.volume_percent {
                Some(volume) => println!("volume: {}%", volume),
                None => println!("volume: n/a"),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(name: &str) -> RendererEndpoint {
        RendererEndpoint {
            friendly_name: name.to_string(),
            host: "192.168.1.20".to_string(),
            port: 8009,
            uuid: format!("uuid-{}", name),
            model: None,
        }
    }

    #[test]
    fn test_parse_choice() {
        let endpoints = vec![endpoint("Den"), endpoint("Kitchen speaker")];

        assert_eq!(parse_choice("2\n", &endpoints).as_deref(), Some("Kitchen speaker"));
        assert_eq!(parse_choice("Den", &endpoints).as_deref(), Some("Den"));
        assert_eq!(parse_choice("OFF", &endpoints).as_deref(), Some("off"));
        assert_eq!(parse_choice("0", &endpoints).as_deref(), Some("off"));
        assert_eq!(parse_choice("3", &endpoints), None);
        assert_eq!(parse_choice("Garage", &endpoints), None);
    }

    #[test]
    fn test_cli_parses_player_commands() {
        let cli = Cli::try_parse_from(["pmocast", "-v", "player", "seek", "42"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Some(Command::Player { action: PlayerAction::Seek { seconds: 42 } })
        ));

        assert!(Cli::try_parse_from(["pmocast", "player", "volume", "101"]).is_err());
        assert!(Cli::try_parse_from(["pmocast"]).unwrap().command.is_none());
        assert!(matches!(
            Cli::try_parse_from(["pmocast", "extract-artwork"]).unwrap().command,
            Some(Command::ExtractArtwork)
        ));
    }
}
