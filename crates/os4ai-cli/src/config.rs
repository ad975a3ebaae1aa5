//! Configuration file – reads/writes `~/.os4ai/config.toml`.
//!
//! The file is a serialised [`HubConfig`].  On first run a complete default
//! document (every adapter table filled in) is written so operators have
//! something to edit.  Environment overrides are applied after loading and
//! are never written back.

use std::fs;
use std::path::{Path, PathBuf};

use os4ai_types::{ConfigError, HubConfig, SensorKind};
use tracing::warn;

/// Where the running configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Loaded,
    /// No file existed; defaults were written.
    Created,
}

/// Return the path to `~/.os4ai/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".os4ai").join("config.toml")
}

/// Load the config, writing defaults first if the file does not exist.
///
/// # Errors
///
/// A file that exists but cannot be read or parsed, or a configuration that
/// fails [`HubConfig::validate`] after overrides.
pub fn load_or_init() -> Result<(HubConfig, ConfigSource), ConfigError> {
    load_or_init_at(&config_path())
}

pub(crate) fn load_or_init_at(path: &Path) -> Result<(HubConfig, ConfigSource), ConfigError> {
    if let Some(cfg) = load_from(path)? {
        return Ok((cfg, ConfigSource::Loaded));
    }
    let defaults = HubConfig::default().with_all_adapters();
    if let Err(e) = save_to(&defaults, path) {
        warn!(error = %e, path = %path.display(), "could not write default config");
    }
    let mut cfg = defaults;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok((cfg, ConfigSource::Created))
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<HubConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading {}: {e}", path.display())))?;
    let mut cfg: HubConfig = toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
    apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(Some(cfg))
}

/// Apply `OS4AI_*` environment variable overrides to `cfg`.
///
/// | Variable | Effect |
/// |---|---|
/// | `OS4AI_CLOUD_MODE` | `simulated` (`1/true/yes/on` or `0/false/no/off`) |
/// | `OS4AI_SPAWN_RATE` | `gateway.spawns_per_second` |
/// | `OS4AI_GATEWAY_TIMEOUT_MS` | `gateway.max_timeout_ms` and every adapter's `gateway_timeout_ms` |
///
/// Unparseable values are ignored with a warning.
pub fn apply_env_overrides(cfg: &mut HubConfig) {
    apply_overrides_with(cfg, |name| std::env::var(name).ok());
}

fn apply_overrides_with(cfg: &mut HubConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("OS4AI_CLOUD_MODE") {
        match parse_flag(&v) {
            Some(on) => cfg.simulated = on,
            None => warn!(value = %v, "ignoring OS4AI_CLOUD_MODE"),
        }
    }
    if let Some(v) = lookup("OS4AI_SPAWN_RATE") {
        match v.trim().parse::<u32>() {
            Ok(rate) => cfg.gateway.spawns_per_second = rate,
            Err(_) => warn!(value = %v, "ignoring OS4AI_SPAWN_RATE"),
        }
    }
    if let Some(v) = lookup("OS4AI_GATEWAY_TIMEOUT_MS") {
        match v.trim().parse::<u64>() {
            Ok(ms) => {
                cfg.gateway.max_timeout_ms = ms;
                for kind in SensorKind::ALL {
                    let mut settings = cfg.settings_for(kind);
                    settings.gateway_timeout_ms = ms;
                    cfg.adapters.insert(kind, settings);
                }
            }
            Err(_) => warn!(value = %v, "ignoring OS4AI_GATEWAY_TIMEOUT_MS"),
        }
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Save the config to a specific path, creating the directory if needed.
pub(crate) fn save_to(cfg: &HubConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Io(format!("creating {}: {e}", parent.display())))?;
        // Owner-only directory (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| ConfigError::Io(format!("restricting {}: {e}", parent.display())))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| ConfigError::Parse(e.to_string()))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| ConfigError::Io(format!("writing {}: {e}", path.display())))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| ConfigError::Io(format!("writing {}: {e}", path.display())))?;
    Ok(())
}
