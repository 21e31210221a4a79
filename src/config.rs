use chrono_tz::Tz;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE_PATH: &str = "/api/v1";

/// Upper limit for credential lifetimes and the post-session grace, in minutes.
pub const MAX_TTL_MINUTES: i64 = 24 * 60;

/// Nonces shorter than this are rejected at startup.
pub const MIN_NONCE_BYTES: usize = 16;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub cors: CorsConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub credential: CredentialConfig,
    pub redemption: RedemptionConfig,
    pub rate_limit: RateLimitConfig,
    pub sweep: SweepConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
    pub run_migrations: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub address: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    pub base_path: String,
    pub enable_swagger: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

impl StorageBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageBackend::Postgres => "postgres",
            StorageBackend::Memory => "memory",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CredentialConfig {
    pub min_ttl_minutes: i64,
    pub max_ttl_minutes: i64,
    /// How long past the session end a credential may stay valid.
    pub end_grace_minutes: i64,
    pub nonce_bytes: usize,
    pub qr_min_dimension: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RedemptionConfig {
    pub default_grace_minutes: i32,
    /// IANA zone used to decide which calendar day a redemption belongs to.
    pub timezone: String,
    pub max_clock_skew_seconds: i64,
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    pub backend: RateLimitBackend,
    pub redis_url: String,
    pub cooldown_seconds: u64,
    pub max_attempts: u32,
    pub cleanup_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SweepConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/checkin_db".to_string(),
            max_connections: 16,
            min_connections: 4,
            acquire_timeout: 5,
            run_migrations: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            address: "127.0.0.1".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_credentials: true,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_API_BASE_PATH.to_string(),
            enable_swagger: true,
        }
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            min_ttl_minutes: 10,
            max_ttl_minutes: 240,
            end_grace_minutes: 120,
            nonce_bytes: MIN_NONCE_BYTES,
            qr_min_dimension: 200,
        }
    }
}

impl Default for RedemptionConfig {
    fn default() -> Self {
        Self {
            default_grace_minutes: 15,
            timezone: "UTC".to_string(),
            max_clock_skew_seconds: 120,
            operation_timeout_ms: 5000,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: RateLimitBackend::Memory,
            redis_url: "redis://127.0.0.1/".to_string(),
            cooldown_seconds: 30,
            max_attempts: 1,
            cleanup_interval_seconds: 60,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 300,
        }
    }
}

impl RedemptionConfig {
    pub fn time_zone(&self) -> Result<Tz, String> {
        self.timezone.parse::<Tz>().map_err(|e| format!("invalid redemption.timezone '{}': {}", self.timezone, e))
    }
}

impl Config {
    /// Load configuration from multiple sources in priority order:
    /// 1. Checkin.toml (base configuration file)
    /// 2. Environment variables (prefixed with CHECKIN_, sections split on `__`)
    /// 3. DATABASE_URL environment variable
    pub fn load() -> Result<Self, figment::Error> {
        let defaults = toml::to_string(&Config::default()).map_err(|e| figment::Error::from(e.to_string()))?;

        let config: Config = Figment::new()
            .merge(Toml::string(&defaults))
            .merge(Toml::file("Checkin.toml"))
            .merge(Env::prefixed("CHECKIN_").split("__"))
            .merge(Env::raw().only(&["DATABASE_URL"]).map(|_| "database.url".into()))
            .extract()?;

        config.validate().map_err(figment::Error::from)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.credential.nonce_bytes < MIN_NONCE_BYTES {
            return Err(format!("credential.nonce_bytes must be at least {}", MIN_NONCE_BYTES));
        }
        if self.credential.min_ttl_minutes <= 0 || self.credential.min_ttl_minutes > self.credential.max_ttl_minutes {
            return Err("credential.min_ttl_minutes must be positive and not exceed max_ttl_minutes".to_string());
        }
        if self.credential.max_ttl_minutes > MAX_TTL_MINUTES {
            return Err(format!("credential.max_ttl_minutes must not exceed {}", MAX_TTL_MINUTES));
        }
        if self.credential.end_grace_minutes > MAX_TTL_MINUTES {
            return Err(format!("credential.end_grace_minutes must not exceed {}", MAX_TTL_MINUTES));
        }
        if self.credential.end_grace_minutes < 0 {
            return Err("credential.end_grace_minutes must not be negative".to_string());
        }
        if self.redemption.default_grace_minutes < 0 {
            return Err("redemption.default_grace_minutes must not be negative".to_string());
        }
        if self.redemption.operation_timeout_ms == 0 {
            return Err("redemption.operation_timeout_ms must be positive".to_string());
        }
        if self.rate_limit.max_attempts == 0 {
            return Err("rate_limit.max_attempts must be at least 1".to_string());
        }
        self.redemption.time_zone()?;
        Ok(())
    }
}
