//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Daemon configuration. File: ~/.config/meshnode/config.toml or /etc/meshnode/config.toml.
/// Env overrides: MESHNODE_SETTINGS_DIR, MESHNODE_AUTO_START, MESHNODE_LOG_LEVEL, MESHNODE_TICK_MS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory holding persisted settings (default ~/.local/share/meshnode).
    #[serde(default = "default_settings_dir")]
    pub settings_dir: PathBuf,
    /// Start the mesh protocol right after init (default true).
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
    /// env_logger filter used when RUST_LOG is unset (default "info").
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Simulated radio tick period in milliseconds (default 1000).
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Run an active and an energy scan after init (default false).
    #[serde(default)]
    pub scan_on_start: bool,
    /// Name used when this node forms a new network (default "meshnode").
    #[serde(default = "default_network_name")]
    pub network_name: String,
    /// Channel used when this node forms a new network (default 15).
    #[serde(default = "default_channel")]
    pub channel: u8,
}

fn default_settings_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(h) => PathBuf::from(h).join(".local/share/meshnode"),
        None => PathBuf::from("/var/lib/meshnode"),
    }
}
fn default_auto_start() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_tick_ms() -> u64 {
    1000
}
fn default_network_name() -> String {
    "meshnode".to_string()
}
fn default_channel() -> u8 {
    15
}

impl Default for Config {
    fn default() -> Self {
        Self {
            settings_dir: default_settings_dir(),
            auto_start: default_auto_start(),
            log_level: default_log_level(),
            tick_ms: default_tick_ms(),
            scan_on_start: false,
            network_name: default_network_name(),
            channel: default_channel(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("MESHNODE_SETTINGS_DIR") {
        c.settings_dir = PathBuf::from(s);
    }
    if let Some(s) = var("MESHNODE_AUTO_START") {
        if let Ok(b) = s.parse::<bool>() {
            c.auto_start = b;
        }
    }
    if let Some(s) = var("MESHNODE_LOG_LEVEL") {
        c.log_level = s;
    }
    if let Some(s) = var("MESHNODE_TICK_MS") {
        if let Ok(ms) = s.parse::<u64>() {
            if ms > 0 {
                c.tick_ms = ms;
            }
        }
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/meshnode/config.toml"));
    }
    out.push(PathBuf::from("/etc/meshnode/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    Err(e) => log::warn!("ignoring {}: {}", p.display(), e),
                },
                Err(e) => log::warn!("cannot read {}: {}", p.display(), e),
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let c: Config = toml::from_str("auto_start = false\nchannel = 20\n").unwrap();
        assert!(!c.auto_start);
        assert_eq!(c.channel, 20);
        assert_eq!(c.tick_ms, 1000);
        assert_eq!(c.network_name, "meshnode");
        assert!(!c.scan_on_start);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 3128\n").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let mut c = Config::default();
        apply_env(&mut c, |key| match key {
            "MESHNODE_SETTINGS_DIR" => Some("/tmp/mesh".to_string()),
            "MESHNODE_AUTO_START" => Some("false".to_string()),
            "MESHNODE_TICK_MS" => Some("0".to_string()),
            "MESHNODE_LOG_LEVEL" => Some("debug".to_string()),
            _ => None,
        });
        assert_eq!(c.settings_dir, PathBuf::from("/tmp/mesh"));
        assert!(!c.auto_start);
        assert_eq!(c.tick_ms, 1000);
        assert_eq!(c.log_level, "debug");
    }
}
