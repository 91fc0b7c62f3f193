//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.pulse/config.json`) and environment.
//! Every section has defaults, so an empty `{}` (or a missing file) is a valid config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Inference server location and model selection.
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Where archived conversations are written.
    #[serde(default)]
    pub archive: ArchiveConfig,
}

/// Server bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port for the chat page and API (default 8501).
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_server_bind")]
    pub bind: String,
}

/// Ollama endpoint and the model used for every chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OllamaConfig {
    /// Base URL of the Ollama HTTP API. Overridden by OLLAMA_HOST env.
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model used for chat, exactly as shown by `ollama list` (e.g. "llama3.2:latest").
    /// Overridden by PULSE_MODEL env. Selection does not depend on which models are installed.
    #[serde(default = "default_model")]
    pub model: String,
}

/// Archive directory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveConfig {
    /// Directory holding `messages_*.csv` files. Relative paths resolve against the working directory.
    #[serde(default = "default_archive_dir")]
    pub directory: PathBuf,
}

pub const DEFAULT_MODEL: &str = "rohithbojja/llava-med-v1.6:latest";

fn default_server_port() -> u16 {
    8501
}

fn default_server_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_ollama_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("archive")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            bind: default_server_bind(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_model(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            directory: default_archive_dir(),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the Ollama base URL: env OLLAMA_HOST overrides config. A bare `host:port` gets an `http://` scheme.
pub fn resolve_ollama_base_url(config: &Config) -> String {
    let raw = non_empty_env("OLLAMA_HOST").unwrap_or_else(|| config.ollama.base_url.trim().to_string());
    let url = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw
    } else {
        format!("http://{}", raw)
    };
    url.trim_end_matches('/').to_string()
}

/// Resolve the chat model: env PULSE_MODEL overrides config; an empty config value falls back to [`DEFAULT_MODEL`].
pub fn resolve_model(config: &Config) -> String {
    non_empty_env("PULSE_MODEL")
        .or_else(|| {
            let m = config.ollama.model.trim();
            if m.is_empty() {
                None
            } else {
                Some(m.to_string())
            }
        })
        .unwrap_or_else(default_model)
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("PULSE_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".pulse").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, or the default path (or PULSE_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_server_port_and_bind() {
        let s = ServerConfig::default();
        assert_eq!(s.port, 8501);
        assert_eq!(s.bind, "127.0.0.1");
    }

    #[test]
    fn empty_json_is_default_config() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.ollama.base_url, "http://127.0.0.1:11434");
        assert_eq!(config.ollama.model, DEFAULT_MODEL);
        assert_eq!(config.archive.directory, PathBuf::from("archive"));
    }

    #[test]
    fn camel_case_keys_are_read() {
        let config: Config = serde_json::from_str(
            r#"{"ollama": {"baseUrl": "http://gpu-box:11434/", "model": "qwen3:8b"}, "archive": {"directory": "/var/lib/pulse"}}"#,
        )
        .unwrap();
        assert_eq!(config.ollama.model, "qwen3:8b");
        assert_eq!(config.ollama.base_url, "http://gpu-box:11434/");
        assert_eq!(config.archive.directory, PathBuf::from("/var/lib/pulse"));
        assert_eq!(config.server.port, 8501);
    }

    #[test]
    fn loopback_binds() {
        assert!(is_loopback_bind("127.0.0.1"));
        assert!(is_loopback_bind(" localhost "));
        assert!(!is_loopback_bind("0.0.0.0"));
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let path = std::env::temp_dir()
            .join(format!("pulse-config-test-{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(config.server.port, 8501);
    }
}
