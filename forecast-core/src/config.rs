use anyhow::{Context, Result, anyhow, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::prompt::PromptTemplate;

/// Top-level configuration: defaults, then the TOML file, then environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// One of trace, debug, info, warn, error.
    pub log_level: String,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub source: SourceConfig,
    pub inference: InferenceConfig,
    pub cache: CacheConfig,
    pub telemetry: TelemetryConfig,
    pub prompts: PromptsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "error".to_string(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            source: SourceConfig::default(),
            inference: InferenceConfig::default(),
            cache: CacheConfig::default(),
            telemetry: TelemetryConfig::default(),
            prompts: PromptsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Deadline for the cache lookup and generation. The write-back gets what remains.
    #[serde(with = "duration_str")]
    pub handler_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            handler_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub api_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    /// Grid point understood by the upstream, e.g. "SEW/127,75".
    pub location: String,
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.weather.gov".to_string(),
            location: "SEW/127,75".to_string(),
            timeout: Duration::from_secs(5),
            user_agent: concat!("forecast-server/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InferenceConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-3-5-sonnet-latest".to_string(),
            max_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub host: Option<String>,
    pub port: u16,
    pub auth: Option<String>,
    pub key_prefix: String,
    #[serde(with = "duration_str")]
    pub ttl: Duration,
    /// Bound on a single GET or SET round trip.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 6379,
            auth: None,
            key_prefix: "lfia".to_string(),
            ttl: Duration::from_secs(6 * 60 * 60),
            timeout: Duration::from_secs(2),
        }
    }
}

impl CacheConfig {
    /// Connection URL for the Redis-protocol store, database 0.
    pub fn url(&self) -> Result<String> {
        let host = self
            .host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| anyhow!("No cache host configured."))?;

        Ok(match self.auth.as_deref().filter(|a| !a.is_empty()) {
            Some(password) => format!("redis://:{password}@{host}:{}/0", self.port),
            None => format!("redis://{host}:{}/0", self.port),
        })
    }
}

/// Metrics listener and sampled request tracing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    pub metrics_enabled: bool,
    pub metrics_port: u16,
    pub tracing_enabled: bool,
    /// Fraction of requests traced, from 0.0 to 1.0.
    pub tracing_sample_rate: f64,
    pub tracing_service: String,
    pub tracing_version: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_port: 8081,
            tracing_enabled: false,
            tracing_sample_rate: 0.01,
            tracing_service: "forecast-server".to_string(),
            tracing_version: None,
        }
    }
}

/// Prompt templates, one per forecast product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PromptsConfig {
    pub summary: PromptTemplate,
    pub breakdown: PromptTemplate,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            summary: PromptTemplate::default_summary(),
            breakdown: PromptTemplate::default_breakdown(),
        }
    }
}

impl Config {
    /// Load config from the default location, or defaults if no file exists yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        Self::load_from(&path)
    }

    /// Load config from `path`, or defaults if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to the default location.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;
        self.save_to(&path)
    }

    /// Save config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "forecast-inference", "forecast-server")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Some(v) = lookup("ANTHROPIC_HANDLER_TIMEOUT") {
            self.server.handler_timeout = env_duration("ANTHROPIC_HANDLER_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("ANTHROPIC_API_KEY") {
            self.inference.api_key = Some(v);
        }
        if let Some(v) = lookup("ANTHROPIC_MODEL") {
            self.inference.model = v;
        }
        if let Some(v) = lookup("NWS_CLIENT_TIMEOUT") {
            self.source.timeout = env_duration("NWS_CLIENT_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("FORECAST_LOCATION") {
            self.source.location = v;
        }
        if let Some(v) = lookup("AUTHENTICATION_ENABLED") {
            self.auth.enabled = env_bool("AUTHENTICATION_ENABLED", &v)?;
        }
        if let Some(v) = lookup("API_KEYS") {
            self.auth.api_keys = v
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("DRAGONFLY_HOST") {
            self.cache.host = Some(v);
        }
        if let Some(v) = lookup("DRAGONFLY_PORT") {
            self.cache.port = v
                .trim()
                .parse()
                .with_context(|| format!("DRAGONFLY_PORT must be a port number, got '{v}'"))?;
        }
        if let Some(v) = lookup("DRAGONFLY_AUTH") {
            self.cache.auth = Some(v);
        }
        if let Some(v) = lookup("DRAGONFLY_KEY_PREFIX") {
            self.cache.key_prefix = v;
        }
        if let Some(v) = lookup("CACHE_RESULTS_DURATION") {
            self.cache.ttl = env_duration("CACHE_RESULTS_DURATION", &v)?;
        }
        if let Some(v) = lookup("METRICS_ENABLED") {
            self.telemetry.metrics_enabled = env_bool("METRICS_ENABLED", &v)?;
        }
        if let Some(v) = lookup("METRICS_PORT") {
            self.telemetry.metrics_port = v
                .trim()
                .parse()
                .with_context(|| format!("METRICS_PORT must be a port number, got '{v}'"))?;
        }
        if let Some(v) = lookup("TRACING_ENABLED") {
            self.telemetry.tracing_enabled = env_bool("TRACING_ENABLED", &v)?;
        }
        if let Some(v) = lookup("TRACING_SAMPLERATE") {
            self.telemetry.tracing_sample_rate = v
                .trim()
                .parse()
                .with_context(|| format!("TRACING_SAMPLERATE must be a number, got '{v}'"))?;
        }
        if let Some(v) = lookup("TRACING_SERVICE") {
            self.telemetry.tracing_service = v;
        }
        if let Some(v) = lookup("TRACING_VERSION") {
            self.telemetry.tracing_version = Some(v).filter(|v| !v.is_empty());
        }

        Ok(())
    }

    /// Check everything `serve` needs before any connection is attempted.
    pub fn validate(&self) -> Result<()> {
        self.validate_without_store()?;
        if self.cache.host.as_deref().is_none_or(str::is_empty) {
            bail!(
                "No cache host configured.\n\
                 Hint: set DRAGONFLY_HOST or run `forecast-server configure`."
            );
        }
        Ok(())
    }

    /// Like [`Config::validate`], for runs that do not use the external store.
    pub fn validate_without_store(&self) -> Result<()> {
        if self.cache.ttl.is_zero() {
            bail!("Cache TTL must be greater than zero.");
        }
        if self.server.handler_timeout.is_zero() {
            bail!("Handler timeout must be greater than zero.");
        }
        if self.cache.timeout.is_zero() {
            bail!("Cache timeout must be greater than zero.");
        }
        if self.source.timeout.is_zero() {
            bail!("Forecast source timeout must be greater than zero.");
        }
        if self.inference.max_tokens == 0 {
            bail!("Inference max_tokens must be greater than zero.");
        }
        if self.inference.api_key.as_deref().is_none_or(str::is_empty) {
            bail!(
                "No inference API key configured.\n\
                 Hint: set ANTHROPIC_API_KEY or run `forecast-server configure`."
            );
        }
        let rate = self.telemetry.tracing_sample_rate;
        if !(0.0..=1.0).contains(&rate) {
            bail!("Tracing sample rate must be between 0 and 1, got {rate}.");
        }
        if self.auth.enabled && self.auth.api_keys.is_empty() {
            tracing::warn!(
                "authentication is enabled with no api keys; every request will be rejected"
            );
        }

        Ok(())
    }

    /// Copy with secrets replaced, for display.
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        let hide = |s: &mut Option<String>| {
            if s.is_some() {
                *s = Some("<redacted>".to_string());
            }
        };
        hide(&mut cfg.inference.api_key);
        hide(&mut cfg.cache.auth);
        cfg.auth.api_keys = vec!["<redacted>".to_string(); cfg.auth.api_keys.len()];
        cfg
    }
}

fn env_bool(name: &str, value: &str) -> Result<bool> {
    value
        .trim()
        .parse()
        .with_context(|| format!("{name} must be true or false, got '{value}'"))
}

fn env_duration(name: &str, value: &str) -> Result<Duration> {
    duration_str::parse(value).with_context(|| format!("{name} is not a valid duration"))
}

/// Durations written the way operators type them: "10s", "6h", "1h30m", "250ms".
pub mod duration_str {
    use anyhow::{Result, anyhow, bail};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn parse(input: &str) -> Result<Duration> {
        let s = input.trim();
        if s.is_empty() {
            bail!("empty duration");
        }
        if s == "0" {
            return Ok(Duration::ZERO);
        }

        let mut total = Duration::ZERO;
        let mut rest = s;
        while !rest.is_empty() {
            let digits = rest
                .find(|c: char| !c.is_ascii_digit())
                .ok_or_else(|| anyhow!("missing unit in duration '{input}'"))?;
            if digits == 0 {
                bail!("expected a number in duration '{input}'");
            }
            let value: u64 = rest[..digits].parse()?;
            rest = &rest[digits..];

            let unit_len = rest
                .find(|c: char| c.is_ascii_digit())
                .unwrap_or(rest.len());
            let unit = &rest[..unit_len];
            rest = &rest[unit_len..];

            let step = match unit {
                "ms" => Some(Duration::from_millis(value)),
                "s" => Some(Duration::from_secs(value)),
                "m" => value.checked_mul(60).map(Duration::from_secs),
                "h" => value.checked_mul(60 * 60).map(Duration::from_secs),
                other => bail!("unknown unit '{other}' in duration '{input}'"),
            };
            total = step
                .and_then(|step| total.checked_add(step))
                .ok_or_else(|| anyhow!("duration '{input}' is too large"))?;
        }

        Ok(total)
    }

    pub fn format(d: Duration) -> String {
        let millis = d.as_millis();
        if millis == 0 {
            return "0s".to_string();
        }
        if millis % 1000 != 0 {
            return format!("{millis}ms");
        }

        let mut secs = d.as_secs();
        let mut out = String::new();
        for (unit, size) in [("h", 3600), ("m", 60), ("s", 1)] {
            if secs >= size {
                out.push_str(&format!("{}{unit}", secs / size));
                secs %= size;
            }
        }
        out
    }

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }
}
