use serde::{Deserialize, Serialize};
use std::env;

use crate::entities::OperationType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub provider: ProviderConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Identity provider token verification (HS256 shared secret).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    #[serde(default)]
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_provider_model")]
    pub model: String,
    #[serde(default = "default_submit_path")]
    pub submit_path: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub base_url: String,
    /// Prefix of stable public URLs; `<public_base_url>/<bucket>/<path>`.
    pub public_base_url: String,
    pub bucket: String,
    pub service_key: String,
}

/// Credit cost per operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub super_resolution: i64,
    pub colorization: i64,
    pub stylization: i64,
    pub watermark_removal: i64,
    pub expand: i64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            super_resolution: 4,
            colorization: 2,
            stylization: 3,
            watermark_removal: 2,
            expand: 4,
        }
    }
}

impl PricingConfig {
    pub fn cost_of(&self, operation: OperationType) -> i64 {
        match operation {
            OperationType::SuperResolution => self.super_resolution,
            OperationType::Colorization => self.colorization,
            OperationType::Stylization => self.stylization,
            OperationType::WatermarkRemoval => self.watermark_removal,
            OperationType::Expand => self.expand,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// How long a poller owns a record while materializing its result.
    pub materialize_lease_secs: i64,
    /// `processing` records older than this are failed and refunded by the sweep; 0 disables it.
    pub processing_timeout_secs: i64,
    pub sweep_interval_secs: u64,
    /// Attempts for a ledger append that keeps losing the tail to concurrent writers.
    pub ledger_max_attempts: u32,
    /// A `pending` record with no provider task after this long is failed and
    /// refunded by the next poll. Keep it above `provider.request_timeout_secs`.
    pub dispatch_timeout_secs: i64,
    /// Attempts for the record write that follows a dispatch (refund or task id).
    pub write_retry_attempts: u32,
    pub write_retry_backoff_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            materialize_lease_secs: 300,
            processing_timeout_secs: 0,
            sweep_interval_secs: 300,
            ledger_max_attempts: 5,
            dispatch_timeout_secs: 120,
            write_retry_attempts: 3,
            write_retry_backoff_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AdminConfig {
    /// Empty disables the admin endpoints.
    #[serde(default)]
    pub api_key: String,
}

fn default_provider_model() -> String {
    "wanx2.1-imageedit".to_string()
}

fn default_submit_path() -> String {
    "/services/aigc/image2image/image-synthesis".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        // a missing file means the whole configuration comes from the environment
        let config_result = std::fs::read_to_string(&config_path);

        let mut config: Config = match config_result {
            Ok(config_str) => Self::parse(&config_str)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Self::from_env_only()?,
            Err(e) => {
                return Err(format!("Failed to read config file {config_path}: {e}").into());
            }
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn parse(config_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        toml::from_str(config_str).map_err(|e| format!("Failed to parse config file: {e}").into())
    }

    fn from_env_only() -> Result<Self, Box<dyn std::error::Error>> {
        let database_url = get_env("DATABASE_URL")
            .ok_or("DATABASE_URL is not set and no config.toml was found")?;

        Ok(Config {
            server: ServerConfig {
                host: get_env("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: get_env_parse("SERVER_PORT", 8080u16),
            },
            database: DatabaseConfig {
                url: database_url,
                max_connections: get_env_parse("DB_MAX_CONNECTIONS", 10u32),
            },
            jwt: JwtConfig {
                secret: get_env("JWT_SECRET")
                    .unwrap_or_else(|| "change-me-in-production".to_string()),
                audience: get_env("JWT_AUDIENCE"),
            },
            provider: ProviderConfig {
                base_url: get_env("PROVIDER_BASE_URL")
                    .unwrap_or_else(|| "https://dashscope.aliyuncs.com/api/v1".to_string()),
                api_key: get_env("PROVIDER_API_KEY").unwrap_or_default(),
                model: get_env("PROVIDER_MODEL").unwrap_or_else(default_provider_model),
                submit_path: get_env("PROVIDER_SUBMIT_PATH").unwrap_or_else(default_submit_path),
                request_timeout_secs: get_env_parse(
                    "PROVIDER_REQUEST_TIMEOUT_SECS",
                    default_request_timeout_secs(),
                ),
            },
            storage: StorageConfig {
                base_url: get_env("STORAGE_BASE_URL").unwrap_or_default(),
                public_base_url: get_env("STORAGE_PUBLIC_BASE_URL").unwrap_or_default(),
                bucket: get_env("STORAGE_BUCKET").unwrap_or_else(|| "generations".to_string()),
                service_key: get_env("STORAGE_SERVICE_KEY").unwrap_or_default(),
            },
            pricing: PricingConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            admin: AdminConfig {
                api_key: get_env("ADMIN_API_KEY").unwrap_or_default(),
            },
        })
    }

    // environment variables win even when a config file exists
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("SERVER_HOST") {
            self.server.host = v;
        }
        if let Ok(v) = env::var("SERVER_PORT")
            && let Ok(p) = v.parse()
        {
            self.server.port = p;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = env::var("DB_MAX_CONNECTIONS")
            && let Ok(mc) = v.parse()
        {
            self.database.max_connections = mc;
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            self.jwt.secret = v;
        }
        if let Ok(v) = env::var("JWT_AUDIENCE") {
            self.jwt.audience = Some(v);
        }
        if let Ok(v) = env::var("PROVIDER_BASE_URL") {
            self.provider.base_url = v;
        }
        if let Ok(v) = env::var("PROVIDER_API_KEY") {
            self.provider.api_key = v;
        }
        if let Ok(v) = env::var("PROVIDER_MODEL") {
            self.provider.model = v;
        }
        if let Ok(v) = env::var("PROVIDER_SUBMIT_PATH") {
            self.provider.submit_path = v;
        }
        if let Ok(v) = env::var("PROVIDER_REQUEST_TIMEOUT_SECS")
            && let Ok(n) = v.parse()
        {
            self.provider.request_timeout_secs = n;
        }
        if let Ok(v) = env::var("STORAGE_BASE_URL") {
            self.storage.base_url = v;
        }
        if let Ok(v) = env::var("STORAGE_PUBLIC_BASE_URL") {
            self.storage.public_base_url = v;
        }
        if let Ok(v) = env::var("STORAGE_BUCKET") {
            self.storage.bucket = v;
        }
        if let Ok(v) = env::var("STORAGE_SERVICE_KEY") {
            self.storage.service_key = v;
        }
        if let Ok(v) = env::var("PROCESSING_TIMEOUT_SECS")
            && let Ok(n) = v.parse()
        {
            self.orchestrator.processing_timeout_secs = n;
        }
        if let Ok(v) = env::var("SWEEP_INTERVAL_SECS")
            && let Ok(n) = v.parse()
        {
            self.orchestrator.sweep_interval_secs = n;
        }
        if let Ok(v) = env::var("DISPATCH_TIMEOUT_SECS")
            && let Ok(n) = v.parse()
        {
            self.orchestrator.dispatch_timeout_secs = n;
        }
        if let Ok(v) = env::var("ADMIN_API_KEY") {
            self.admin.api_key = v;
        }
    }
}

fn get_env(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn get_env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
