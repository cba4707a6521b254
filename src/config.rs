use crate::error::{ProxyError, Result};
use crate::providers::ProviderPreset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

/// Where requests are forwarded. `model` is the model name sent upstream;
/// the Anthropic model name in the incoming request is discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Preset name (openai, openrouter, groq, ...) used to fill defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the upstream API key. When no key can
    /// be resolved, the client's own credential is forwarded instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Directory for per-request JSONL dumps. Disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump_dir: Option<PathBuf>,
}

fn default_port() -> u16 {
    4222
}

impl ProxyConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(ProxyError::config(format!(
            "No config file found. Searched: {}. Create one from config.example.toml",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Resolve the effective base URL (config override or provider preset).
    pub fn effective_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.upstream.base_url {
            return Ok(url.trim_end_matches('/').to_string());
        }

        let name = self.upstream.provider.as_deref().ok_or_else(|| {
            ProxyError::config("Either upstream.base_url or upstream.provider must be set")
        })?;

        let preset = ProviderPreset::from_name(name).ok_or_else(|| {
            ProxyError::config(format!(
                "Unknown provider '{}' and no base_url configured. Known providers: {}",
                name,
                ProviderPreset::names().join(", ")
            ))
        })?;

        Ok(preset.base_url.to_string())
    }

    /// Resolve the configured upstream API key, if any. `Ok(None)` means no
    /// key is configured and the client credential should be forwarded.
    pub fn resolve_api_key(&self) -> Result<Option<String>> {
        if let Some(env_name) = self.upstream.api_key_env.as_deref() {
            return std::env::var(env_name).map(Some).map_err(|_| {
                ProxyError::config(format!(
                    "Environment variable '{env_name}' not set. Set it with your upstream API key."
                ))
            });
        }

        // A provider preset implies its conventional key variable, but only
        // when that variable is actually set.
        if let Some(preset) = self.preset() {
            if let Ok(key) = std::env::var(preset.default_api_key_env) {
                return Ok(Some(key));
            }
        }

        Ok(None)
    }

    fn preset(&self) -> Option<&'static ProviderPreset> {
        self.upstream
            .provider
            .as_deref()
            .and_then(ProviderPreset::from_name)
    }
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("claude-bridge.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("claude-bridge")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(
                PathBuf::from(xdg)
                    .join("claude-bridge")
                    .join("config.toml"),
            );
        }
        if let Some(home) = home_dir() {
            paths.push(
                home.join(".config")
                    .join("claude-bridge")
                    .join("config.toml"),
            );
        }
    }

    // Home directory fallback
    if let Some(home) = home_dir() {
        paths.push(home.join(".claude-bridge.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
