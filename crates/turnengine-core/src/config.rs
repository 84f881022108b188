use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8719;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Default capacity of the assistant LRU cache (C3).
pub const DEFAULT_ASSISTANT_CACHE_CAPACITY: usize = 256;
/// Default short-hook deadline (Stream/Fail/Retry), §4.6.
pub const DEFAULT_HOOK_TIMEOUT_MS: u64 = 5_000;

/// Top-level config (`turnengine.toml` + `TURNENGINE_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub assistants: AssistantsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl EngineConfig {
    /// Load config: explicit path > `TURNENGINE_CONFIG` env > `./turnengine.toml`.
    /// Falls back to defaults on any error (caller decides whether to warn).
    pub fn load(path: Option<&str>) -> Result<Self, figment::Error> {
        let path = path
            .map(str::to_string)
            .or_else(|| std::env::var("TURNENGINE_CONFIG").ok())
            .unwrap_or_else(|| "turnengine.toml".to_string());

        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("TURNENGINE_").split("__"))
            .extract()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            assistants: AssistantsConfig::default(),
            database: DatabaseConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub token: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { mode: AuthMode::None, token: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    Token,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantsConfig {
    /// `<root>/<id>/{package,prompts,src/index}` filesystem layout (§6).
    #[serde(default = "default_assistants_root")]
    pub root: String,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for AssistantsConfig {
    fn default() -> Self {
        Self {
            root: default_assistants_root(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Retry-loop defaults (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_times")]
    pub times: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_retry_delay_max_ms")]
    pub delay_max_ms: u64,
    #[serde(default = "default_retry_prompt")]
    pub prompt: String,
    #[serde(default = "default_hook_timeout_ms")]
    pub hook_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            times: default_retry_times(),
            delay_ms: default_retry_delay_ms(),
            delay_max_ms: default_retry_delay_max_ms(),
            prompt: default_retry_prompt(),
            hook_timeout_ms: default_hook_timeout_ms(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_assistants_root() -> String {
    "./assistants".to_string()
}
fn default_cache_capacity() -> usize {
    DEFAULT_ASSISTANT_CACHE_CAPACITY
}
fn default_db_path() -> String {
    "./turnengine.sqlite3".to_string()
}
fn default_retry_times() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    200
}
fn default_retry_delay_max_ms() -> u64 {
    1_000
}
fn default_retry_prompt() -> String {
    "The previous answer was not correct ({{error}}). Please try again.".to_string()
}
fn default_hook_timeout_ms() -> u64 {
    DEFAULT_HOOK_TIMEOUT_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
        assert_eq!(cfg.retry.times, 3);
        assert_eq!(cfg.assistants.cache_capacity, DEFAULT_ASSISTANT_CACHE_CAPACITY);
    }
}
