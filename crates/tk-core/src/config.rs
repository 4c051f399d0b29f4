use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::atomic_write_json;

/// Default remote endpoint for the sync client; overridable via `TICKS_URL`
/// or `~/.ticksrc`.
pub const DEFAULT_SYNC_URL: &str = "wss://ticks.dev/api";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// TickConfig — .tick/config.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_id_length")]
    pub id_length: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextConfig>,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            id_length: default_id_length(),
            verification: None,
            context: None,
        }
    }
}

fn default_version() -> u32 {
    1
}
fn default_id_length() -> u8 {
    3
}

impl TickConfig {
    /// Load from `.tick/config.json` under the given repo root, falling
    /// back to defaults when the file does not exist.
    pub fn load(repo_root: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(repo_root);
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn save(&self, repo_root: &Path) -> Result<(), ConfigError> {
        atomic_write_json(&Self::path(repo_root), self)
            .map_err(|e| ConfigError::Io(e.to_string()))
    }

    pub fn path(repo_root: &Path) -> PathBuf {
        repo_root.join(".tick").join("config.json")
    }
}

// ---------------------------------------------------------------------------
// Verification / context sections
// ---------------------------------------------------------------------------

/// Shell command run after a task completes; a non-zero exit is a
/// verification failure and triggers the engine's retry path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    pub command: String,
    #[serde(default = "default_verify_timeout")]
    pub timeout_secs: u64,
}

fn default_verify_timeout() -> u64 {
    300
}

/// Extra files prepended to every agent prompt (conventions, house rules).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub files: Vec<String>,
}

// ---------------------------------------------------------------------------
// Remote settings — env + ~/.ticksrc
// ---------------------------------------------------------------------------

/// Credentials and endpoint for the sync client. Environment variables win
/// over `~/.ticksrc`; the rc file is a trivial `key=value` format with `#`
/// comments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    pub url: String,
    pub token: Option<String>,
}

impl RemoteSettings {
    /// Resolve from the environment and an rc file (normally
    /// `~/.ticksrc`).
    pub fn resolve(rc_path: Option<&Path>) -> Self {
        let rc = rc_path.and_then(|p| std::fs::read_to_string(p).ok());
        let rc_get = |key: &str| -> Option<String> {
            rc.as_deref().and_then(|text| {
                text.lines()
                    .map(str::trim)
                    .filter(|l| !l.starts_with('#'))
                    .filter_map(|l| l.split_once('='))
                    .find(|(k, _)| k.trim() == key)
                    .map(|(_, v)| v.trim().to_string())
            })
        };

        let url = std::env::var("TICKS_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| rc_get("url"))
            .unwrap_or_else(|| DEFAULT_SYNC_URL.to_string());
        let token = std::env::var("TICKS_TOKEN")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| rc_get("token"));

        Self { url, token }
    }

    pub fn default_rc_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".ticksrc"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TickConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.version, 1);
        assert_eq!(cfg.id_length, 3);
        assert!(cfg.verification.is_none());
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TickConfig {
            version: 1,
            id_length: 4,
            verification: Some(VerificationConfig {
                command: "cargo test".into(),
                timeout_secs: 120,
            }),
            context: None,
        };
        cfg.save(dir.path()).unwrap();

        let back = TickConfig::load(dir.path()).unwrap();
        assert_eq!(back.id_length, 4);
        assert_eq!(back.verification.unwrap().command, "cargo test");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = TickConfig::path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"version": 1}"#).unwrap();

        let cfg = TickConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.id_length, 3);
    }

    #[test]
    fn rc_file_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let rc = dir.path().join("ticksrc");
        std::fs::write(&rc, "# creds\ntoken = abc123\nurl=wss://example.test/api\n").unwrap();

        // Isolate from ambient env for this test.
        std::env::remove_var("TICKS_TOKEN");
        std::env::remove_var("TICKS_URL");

        let settings = RemoteSettings::resolve(Some(&rc));
        assert_eq!(settings.token.as_deref(), Some("abc123"));
        assert_eq!(settings.url, "wss://example.test/api");
    }

    #[test]
    fn missing_rc_falls_back_to_default_url() {
        std::env::remove_var("TICKS_TOKEN");
        std::env::remove_var("TICKS_URL");
        let settings = RemoteSettings::resolve(None);
        assert_eq!(settings.url, DEFAULT_SYNC_URL);
        assert_eq!(settings.token, None);
    }
}
