//! # PMOCast Configuration Module
//!
//! This module provides configuration management for PMOCast, including:
//! - Loading configuration from a YAML file in a configuration directory
//! - Merging with the embedded default configuration
//! - Environment variable overrides
//! - Typed getters and setters for configuration values
//! - A file watcher publishing the cast target on change ([`watcher`])
//!
//! There is no global instance: the binary loads one [`Config`] and hands
//! `Arc<Config>` to whoever needs it.
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::Config;
//!
//! let config = Config::load_config("")?;
//! let target = config.cast_target();
//! println!("casting to {}", target.renderer);
//!
//! config.set_renderer("Kitchen speaker")?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context, Result, anyhow};
use dirs::home_dir;
use serde_yaml::{Mapping, Value};
use std::{
    env, fmt, fs,
    net::UdpSocket,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Mutex,
    time::SystemTime,
};
use tracing::{info, warn};

pub mod watcher;

pub use watcher::ConfigWatcher;

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmocast.yaml");

const ENV_CONFIG_DIR: &str = "PMOCAST_CONFIG";
const ENV_PREFIX: &str = "PMOCAST_CONFIG__";
const CONFIG_DIR_NAME: &str = ".pmocast";
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Renderer name meaning "casting disabled".
pub const DISABLED_RENDERER: &str = "off";

const DEFAULT_HTTP_PORT: u16 = 8090;
const DEFAULT_MEDIA_ROOT: &str = "/mnt";
const DEFAULT_MEDIA_ROUTE: &str = "/music";
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_PLAYER_HOST: &str = "localhost";
const DEFAULT_PLAYER_PORT: u16 = 6600;
const DEFAULT_VOLUMIO_URL: &str = "http://localhost:3000";
const DEFAULT_MOODE_URL: &str = "http://localhost";
const DEFAULT_ARTWORK_ROOT: &str = "artwork";
const DEFAULT_ARTWORK_ROUTE: &str = "/artwork";
const DEFAULT_DEVICES_FILE: &str = "renderers.list";

/// Macro to generate a getter for u64 values with default
macro_rules! impl_u64_config {
    ($getter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> u64 {
            match self.get_value($path) {
                Ok(Value::Number(n)) => match n.as_u64() {
                    Some(v) => v,
                    None => {
                        warn!(key = %$path.join("."), value = %n, default = $default, "Not an unsigned integer, using default");
                        $default
                    }
                },
                Ok(Value::String(s)) => match s.trim().parse::<u64>() {
                    Ok(v) => v,
                    Err(_) => {
                        warn!(key = %$path.join("."), value = %s, default = $default, "Invalid integer, using default");
                        $default
                    }
                },
                Ok(_) => {
                    warn!(key = %$path.join("."), default = $default, "Unexpected value type, using default");
                    $default
                }
                Err(err) => {
                    warn!(key = %$path.join("."), default = $default, "{}", err);
                    $default
                }
            }
        }
    };
}

/// Macro to generate a getter, and optionally a setter, for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        impl_string_config!($getter, $path, $default);

        pub fn $setter(&self, value: &str) -> Result<()> {
            self.set_value($path, Value::String(value.to_string()))
        }
    };
    ($getter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> String {
            match self.get_value($path) {
                Ok(Value::String(s)) => s,
                Ok(Value::Null) => $default.to_string(),
                Ok(Value::Number(n)) => n.to_string(),
                Ok(_) => {
                    warn!(key = %$path.join("."), default = $default, "Unexpected value type, using default");
                    $default.to_string()
                }
                Err(err) => {
                    warn!(key = %$path.join("."), default = $default, "{}", err);
                    $default.to_string()
                }
            }
        }
    };
}

/// How local media is handed to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CastMode {
    /// Every local file is cast through the static media server.
    #[default]
    Direct,
    /// A fixed stream URL is cast once and treated as a live stream.
    Stream,
}

impl CastMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CastMode::Direct => "direct",
            CastMode::Stream => "stream",
        }
    }
}

impl FromStr for CastMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" | "" => Ok(CastMode::Direct),
            "stream" => Ok(CastMode::Stream),
            other => Err(anyhow!("Unknown cast mode '{}'", other)),
        }
    }
}

impl fmt::Display for CastMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which renderer to drive, and how.
///
/// This is the only part of the configuration that is hot-reloaded into the
/// synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastTarget {
    pub renderer: String,
    pub mode: CastMode,
    pub stream_url: String,
}

impl CastTarget {
    pub fn disabled() -> Self {
        Self {
            renderer: DISABLED_RENDERER.to_string(),
            mode: CastMode::Direct,
            stream_url: String::new(),
        }
    }

    pub fn named(renderer: &str) -> Self {
        Self {
            renderer: renderer.to_string(),
            ..Self::disabled()
        }
    }

    /// True when no renderer should ever be acquired.
    pub fn is_disabled(&self) -> bool {
        let name = self.renderer.trim();
        name.is_empty() || name.eq_ignore_ascii_case(DISABLED_RENDERER)
    }
}

/// Configuration manager for PMOCast
///
/// The document is kept as a YAML tree behind a mutex so that typed getters
/// always see a consistent value, and [`Config::reload`] can swap it when the
/// file changes on disk.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        // 1. Try provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        CONFIG_DIR_NAME.to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)
                .with_context(|| format!("Cannot create config directory {}", path.display()))?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")
            .with_context(|| format!("Config directory {} is not writable", path.display()))?;
        fs::remove_file(&test_file)?;

        fs::read_dir(path)
            .with_context(|| format!("Config directory {} is not readable", path.display()))?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `PMOCAST_CONFIG` environment variable
    /// 3. `.pmocast` in the current directory
    /// 4. `.pmocast` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for read/write permissions.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir = %config_dir, "Using config directory");

        let path = Path::new(&config_dir)
            .join(CONFIG_FILE_NAME)
            .to_string_lossy()
            .to_string();

        let config_value = Self::read_document(&path)?;

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Builds the effective document: embedded defaults, then the file, then env overrides.
    fn read_document(path: &str) -> Result<Value> {
        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let yaml_data = match fs::read(path) {
            Ok(data) => {
                info!(config_file = %path, "Loaded config file");
                data
            }
            Err(_) => {
                info!(config_file = %path, "Config file not found, using default embedded config");
                DEFAULT_CONFIG.as_bytes().to_vec()
            }
        };

        let external_value: Value = serde_yaml::from_slice(&yaml_data)
            .with_context(|| format!("Malformed configuration file {}", path))?;
        // An empty file parses as Null and leaves the defaults untouched.
        if !external_value.is_null() {
            merge_yaml(&mut default_value, &Self::lower_keys_value(external_value));
        }
        let mut config_value = Self::lower_keys_value(default_value);

        Self::apply_env_overrides(&mut config_value);
        Ok(config_value)
    }

    /// Re-reads the file from disk, replacing the in-memory document.
    ///
    /// On error the previous document is kept.
    pub fn reload(&self) -> Result<()> {
        let value = Self::read_document(&self.path)?;
        let mut data = self.lock_data();
        *data = value;
        Ok(())
    }

    fn lock_data(&self) -> std::sync::MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let yaml = {
            let data = self.lock_data();
            serde_yaml::to_string(&*data)?
        };
        fs::write(&self.path, yaml)
            .with_context(|| format!("Cannot write configuration file {}", self.path))?;
        Ok(())
    }

    /// Path of the configuration directory.
    pub fn directory(&self) -> &Path {
        Path::new(&self.config_dir)
    }

    /// Path of the watched configuration file.
    pub fn file_path(&self) -> &Path {
        Path::new(&self.path)
    }

    /// Modification time of the configuration file, if it exists.
    pub fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// `path` is an array of keys, e.g. `&["cast", "renderer"]`.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.lock_data();
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.lock_data();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                match map.get(&Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                }
            } else {
                return Err(anyhow!("Path {} is not a mapping", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                if let Err(err) = Self::set_value_internal(config, &key_path, yaml_value) {
                    warn!(env_var = %key, "Ignoring override: {}", err);
                }
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        match serde_yaml::from_str::<Value>(value) {
            Ok(parsed) => parsed,
            Err(_) => Value::String(value.to_string()),
        }
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let new_key = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    new_map.insert(new_key, Self::lower_keys_value(v));
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Resolves a path relative to the configuration directory.
    pub fn resolve_path(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.config_dir).join(path)
        }
    }

    // ---------------------------------------------------------------- cast

    impl_string_config!(get_renderer, set_renderer, &["cast", "renderer"], DISABLED_RENDERER);
    impl_string_config!(get_stream_url, &["cast", "stream_url"], "");

    pub fn get_cast_mode(&self) -> CastMode {
        let raw = match self.get_value(&["cast", "mode"]) {
            Ok(Value::String(s)) => s,
            _ => return CastMode::default(),
        };
        match raw.parse() {
            Ok(mode) => mode,
            Err(err) => {
                warn!("{}, using {}", err, CastMode::default());
                CastMode::default()
            }
        }
    }

    /// Snapshot of the hot-reloadable cast target.
    pub fn cast_target(&self) -> CastTarget {
        CastTarget {
            renderer: self.get_renderer().trim().to_string(),
            mode: self.get_cast_mode(),
            stream_url: self.get_stream_url().trim().to_string(),
        }
    }

    // -------------------------------------------------------------- player

    impl_string_config!(get_player_kind, &["player", "kind"], "mpd");
    impl_string_config!(get_player_host, &["player", "host"], DEFAULT_PLAYER_HOST);
    impl_u64_config!(get_player_port_raw, &["player", "port"], DEFAULT_PLAYER_PORT as u64);
    impl_string_config!(get_volumio_url, &["player", "volumio_url"], DEFAULT_VOLUMIO_URL);
    impl_u64_config!(get_player_timeout_secs, &["player", "timeout_secs"], 10);
    impl_string_config!(get_moode_url, &["player", "moode_url"], DEFAULT_MOODE_URL);
    impl_string_config!(get_player_art_url, &["player", "art_url"], "");
    impl_u64_config!(get_player_art_port_raw, &["player", "art_port"], 0);

    /// Port the player serves its artwork on, `None` when left to the
    /// player kind's default.
    pub fn get_player_art_port(&self) -> Option<u16> {
        match self.get_player_art_port_raw() {
            0 => None,
            port => u16::try_from(port).ok().or_else(|| {
                warn!(port = port, "Artwork port out of range, using player default");
                None
            }),
        }
    }

    pub fn get_player_port(&self) -> u16 {
        u16::try_from(self.get_player_port_raw()).unwrap_or_else(|_| {
            warn!(default = DEFAULT_PLAYER_PORT, "Player port out of range, using default");
            DEFAULT_PLAYER_PORT
        })
    }

    // --------------------------------------------------------------- media

    impl_string_config!(get_media_root, &["media", "root"], DEFAULT_MEDIA_ROOT);
    impl_string_config!(get_media_route, &["media", "route"], DEFAULT_MEDIA_ROUTE);
    impl_string_config!(get_artwork_root_raw, &["media", "artwork_root"], DEFAULT_ARTWORK_ROOT);
    impl_string_config!(get_artwork_route, &["media", "artwork_route"], DEFAULT_ARTWORK_ROUTE);

    /// Directory receiving artwork extracted from audio tags.
    pub fn get_artwork_root(&self) -> PathBuf {
        self.resolve_path(&self.get_artwork_root_raw())
    }

    // ---------------------------------------------------------------- host

    impl_u64_config!(get_http_port_raw, &["host", "http_port"], DEFAULT_HTTP_PORT as u64);
    impl_string_config!(get_log_min_level, &["host", "logger", "min_level"], DEFAULT_LOG_MIN_LEVEL);

    pub fn get_http_port(&self) -> u16 {
        u16::try_from(self.get_http_port_raw()).unwrap_or_else(|_| {
            warn!(default = DEFAULT_HTTP_PORT, "HTTP port out of range, using default");
            DEFAULT_HTTP_PORT
        })
    }

    /// Gets the base URL advertised to renderers for the static media server
    ///
    /// Returns the configured base URL without trailing slash, or builds one
    /// from the guessed local IP and the HTTP port.
    pub fn get_base_url(&self) -> String {
        match self.get_value(&["host", "base_url"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => s.trim().trim_end_matches('/').to_string(),
            _ => format!("http://{}:{}", guess_local_ip(), self.get_http_port()),
        }
    }

    /// Host part of [`Config::get_base_url`]: the address renderers use to
    /// reach this machine.
    pub fn get_host_ip(&self) -> String {
        url_host(&self.get_base_url()).unwrap_or_else(guess_local_ip)
    }

    // ---------------------------------------------------------------- sync

    impl_u64_config!(get_tick_ms, &["sync", "tick_ms"], 1000);
    impl_u64_config!(get_max_failures, &["sync", "max_failures"], 20);
    impl_u64_config!(get_drift_threshold_secs, &["sync", "drift_threshold_secs"], 10);
    impl_u64_config!(get_resync_period_secs, &["sync", "resync_period_secs"], 10);
    impl_u64_config!(get_local_unavailable_secs, &["sync", "local_unavailable_secs"], 60);
    impl_u64_config!(get_idle_wait_attempts, &["sync", "idle_wait_attempts"], 10);

    // ------------------------------------------------------------ registry

    impl_u64_config!(get_registry_refresh_secs, &["registry", "refresh_secs"], 60);
    impl_u64_config!(get_scan_window_secs, &["registry", "scan_window_secs"], 5);
    impl_string_config!(get_devices_file_raw, &["registry", "devices_file"], DEFAULT_DEVICES_FILE);

    /// File receiving the discovered renderer names, one per line.
    pub fn get_devices_file(&self) -> PathBuf {
        self.resolve_path(&self.get_devices_file_raw())
    }

    // ---------------------------------------------------------- supervisor

    impl_u64_config!(get_stall_timeout_secs, &["supervisor", "stall_timeout_secs"], 45);
    impl_u64_config!(get_check_interval_secs, &["supervisor", "check_interval_secs"], 5);
    impl_u64_config!(get_watcher_poll_secs, &["watcher", "poll_secs"], 5);
}

/// Host of an `http://host[:port]/...` URL, without brackets for IPv6.
pub fn url_host(url: &str) -> Option<String> {
    let rest = url.trim();
    let rest = rest.split_once("://").map_or(rest, |(_, r)| r);
    let authority = rest.split(['/', '?', '#']).next()?;
    let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);

    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        bracketed.split_once(']')?.0
    } else {
        authority.split(':').next()?
    };
    (!host.is_empty()).then(|| host.to_string())
}

/// Guesses the local IP address used for outgoing connections.
///
/// No packet is sent: connecting a UDP socket only selects a route.
pub fn guess_local_ip() -> String {
    match UdpSocket::bind("0.0.0.0:0") {
        Ok(socket) => {
            if socket.connect("8.8.8.8:80").is_ok() {
                if let Ok(local_addr) = socket.local_addr() {
                    return local_addr.ip().to_string();
                }
            }
            "127.0.0.1".to_string()
        }
        Err(_) => "127.0.0.1".to_string(),
    }
}

/// Merges external YAML configuration into default configuration
///
/// Mappings are merged key by key; scalars and sequences from `external`
/// replace the default value.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}
