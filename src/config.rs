use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}
fn default_busy_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Request body ceiling. JSON escaping can double pasted code (`\t`, `\n`, `\"`),
    /// so the default admits twice the code ceiling plus framing.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_body_bytes() -> usize {
    2 * crate::input::MAX_CODE_BYTES + 64 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret_env")]
    pub jwt_secret_env: String,
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret_env: default_jwt_secret_env(),
            access_token_ttl_secs: default_access_token_ttl(),
        }
    }
}

fn default_jwt_secret_env() -> String {
    "JWT_SECRET".to_string()
}
fn default_access_token_ttl() -> u64 {
    7 * 24 * 60 * 60
}

impl AuthConfig {
    /// Reads the signing secret from the configured environment variable.
    pub fn secret(&self) -> Result<String> {
        let secret = std::env::var(&self.jwt_secret_env)
            .with_context(|| format!("{} environment variable not set", self.jwt_secret_env))?;
        if secret.is_empty() {
            anyhow::bail!("{} must not be empty", self.jwt_secret_env);
        }
        Ok(secret)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// The provider is asked for output matching a fixed JSON schema.
    Constrained,
    /// JSON is requested in the prompt only and recovered from free text.
    BestEffort,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_mode")]
    pub mode: GenerationMode,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            mode: default_mode(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_mode() -> GenerationMode {
    GenerationMode::Constrained
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.5
}
fn default_max_output_tokens() -> u32 {
    8192
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    60
}

impl GeneratorConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_backend")]
    pub backend: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Entry bound for the in-process backend.
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            url: None,
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_cache_backend() -> String {
    "memory".to_string()
}
fn default_ttl_secs() -> u64 {
    3600
}
fn default_max_entries() -> u64 {
    crate::cache::DEFAULT_MAX_ENTRIES
}

impl Config {
    /// A config suitable for commands that never touch the network or disk.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/explainer.sqlite"),
                max_connections: default_max_connections(),
                busy_timeout_secs: default_busy_timeout_secs(),
            },
            server: ServerConfig {
                bind: "127.0.0.1:5000".to_string(),
                max_body_bytes: default_max_body_bytes(),
            },
            auth: AuthConfig::default(),
            generator: GeneratorConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.db.max_connections == 0 {
        anyhow::bail!("db.max_connections must be > 0");
    }

    if config.server.max_body_bytes < crate::input::MAX_CODE_BYTES {
        anyhow::bail!(
            "server.max_body_bytes must be >= {} to accept a full-size upload",
            crate::input::MAX_CODE_BYTES
        );
    }

    // Validate generator
    match config.generator.provider.as_str() {
        "disabled" | "gemini" => {}
        other => anyhow::bail!(
            "Unknown generator provider: '{}'. Must be disabled or gemini.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.generator.temperature) {
        anyhow::bail!("generator.temperature must be in [0.0, 2.0]");
    }
    if config.generator.max_output_tokens == 0 {
        anyhow::bail!("generator.max_output_tokens must be > 0");
    }

    // Validate cache
    match config.cache.backend.as_str() {
        "memory" => {}
        "redis" => {
            if config.cache.url.is_none() {
                anyhow::bail!("cache.url must be specified when backend is 'redis'");
            }
        }
        other => anyhow::bail!(
            "Unknown cache backend: '{}'. Must be memory or redis.",
            other
        ),
    }
    if config.cache.ttl_secs == 0 {
        anyhow::bail!("cache.ttl_secs must be > 0");
    }
    if config.cache.max_entries == 0 {
        anyhow::bail!("cache.max_entries must be > 0");
    }

    Ok(config)
}
