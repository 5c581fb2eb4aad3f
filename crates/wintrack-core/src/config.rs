//! Configuration loading from TOML.
//!
//! The config file lives at `$XDG_CONFIG_HOME/wintrack/config.toml`
//! (default `~/.config/wintrack/config.toml`). Every key is optional; a
//! missing default file yields [`Config::default`].

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// The documented default configuration.
pub const DEFAULT_CONFIG_TOML: &str = r#"[compositor]
backend = "auto"
hyprland_signature = ""
wayfire_socket = ""
request_timeout_ms = 2000
lookup_timeout_ms = 500

[placement]
enabled = true
step_x = 32
step_y = 32

[log]
filter = ""
"#;

const MAX_TIMEOUT_MS: u64 = 10_000;

/// Which compositor backend to attach to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Probe every backend in priority order.
    #[default]
    Auto,
    Hyprland,
    Wayfire,
    /// Generic Wayland protocols (wlr-foreign-toplevel, ext-workspace).
    Wayland,
}

impl BackendChoice {
    /// Parse a backend name (case-insensitive). Unknown names map to `Auto`.
    pub fn from_name(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "hyprland" | "hypr" => BackendChoice::Hyprland,
            "wayfire" => BackendChoice::Wayfire,
            "wayland" | "wlr" | "ext" => BackendChoice::Wayland,
            _ => BackendChoice::Auto,
        }
    }
}

/// `[compositor]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompositorConfig {
    pub backend: BackendChoice,
    /// Overrides `$HYPRLAND_INSTANCE_SIGNATURE` when non-empty.
    pub hyprland_signature: String,
    /// Overrides `$WAYFIRE_SOCKET` when non-empty.
    pub wayfire_socket: String,
    /// Timeout for control requests.
    pub request_timeout_ms: u64,
    /// Timeout for best-effort lookups.
    pub lookup_timeout_ms: u64,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            hyprland_signature: String::new(),
            wayfire_socket: String::new(),
            request_timeout_ms: 2000,
            lookup_timeout_ms: 500,
        }
    }
}

impl CompositorConfig {
    pub fn hyprland_signature(&self) -> Option<&str> {
        non_empty(&self.hyprland_signature)
    }

    pub fn wayfire_socket(&self) -> Option<&str> {
        non_empty(&self.wayfire_socket)
    }
}

/// `[placement]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlacementConfig {
    pub enabled: bool,
    /// Horizontal cascade step in pixels.
    pub step_x: i32,
    /// Vertical cascade step in pixels.
    pub step_y: i32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            step_x: 32,
            step_y: 32,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Extra `EnvFilter` directives, comma separated.
    pub filter: String,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub compositor: CompositorConfig,
    pub placement: PlacementConfig,
    pub log: LogConfig,
}

impl Config {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Config = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, or from the default location.
    ///
    /// An explicit path that does not exist is an error; a missing default
    /// file is not.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::ConfigNotFound(path.to_path_buf()));
                }
                path.to_path_buf()
            }
            None => {
                let path = default_path();
                if !path.exists() {
                    debug!("No config at {:?}, using defaults", path);
                    return Ok(Config::default());
                }
                path
            }
        };

        debug!("Loading config from {:?}", path);
        let source = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&source)
    }

    /// Check value ranges, collecting every problem.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        let c = &self.compositor;

        if !(1..=MAX_TIMEOUT_MS).contains(&c.request_timeout_ms) {
            problems.push(format!(
                "compositor.request_timeout_ms must be in 1..={}, got {}",
                MAX_TIMEOUT_MS, c.request_timeout_ms
            ));
        }
        if !(1..=MAX_TIMEOUT_MS).contains(&c.lookup_timeout_ms) {
            problems.push(format!(
                "compositor.lookup_timeout_ms must be in 1..={}, got {}",
                MAX_TIMEOUT_MS, c.lookup_timeout_ms
            ));
        }
        if self.placement.step_x < 0 || self.placement.step_y < 0 {
            problems.push("placement.step_x and placement.step_y must not be negative".into());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::ConfigValidation(problems))
        }
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

/// `$XDG_CONFIG_HOME/wintrack/config.toml`, falling back to `~/.config`.
pub fn default_path() -> PathBuf {
    let config_home = std::env::var("XDG_CONFIG_HOME").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{}/.config", home)
    });
    PathBuf::from(config_home)
        .join("wintrack")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_toml_matches_default() {
        let parsed = Config::from_toml_str(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_partial_config() {
        let parsed = Config::from_toml_str(
            r#"
            [compositor]
            backend = "wayfire"
            wayfire_socket = "/run/user/1000/wayfire.sock"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.compositor.backend, BackendChoice::Wayfire);
        assert_eq!(
            parsed.compositor.wayfire_socket(),
            Some("/run/user/1000/wayfire.sock")
        );
        assert_eq!(parsed.compositor.hyprland_signature(), None);
        assert_eq!(parsed.compositor.request_timeout_ms, 2000);
        assert!(parsed.placement.enabled);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Config::from_toml_str("[compositor]\nsocket = \"x\"\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_validation_collects_all_problems() {
        let err = Config::from_toml_str(
            r#"
            [compositor]
            request_timeout_ms = 0
            lookup_timeout_ms = 60000
            [placement]
            step_x = -4
            "#,
        )
        .unwrap_err();
        match err {
            Error::ConfigValidation(problems) => assert_eq!(problems.len(), 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_explicit_path() {
        let err = Config::load(Some(Path::new("/nonexistent/wintrack.toml"))).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound(_)));
    }

    #[test]
    fn test_backend_choice_from_name() {
        assert_eq!(BackendChoice::from_name("Hyprland"), BackendChoice::Hyprland);
        assert_eq!(BackendChoice::from_name("WAYFIRE"), BackendChoice::Wayfire);
        assert_eq!(BackendChoice::from_name("wlr"), BackendChoice::Wayland);
        assert_eq!(BackendChoice::from_name("auto"), BackendChoice::Auto);
        assert_eq!(BackendChoice::from_name(""), BackendChoice::Auto);
        assert_eq!(BackendChoice::from_name("kwin"), BackendChoice::Auto);
    }
}
