use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppEnv {
    Local,
    Dev,
    Test,
    Prod,
}

impl AppEnv {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Dev => "dev",
            Self::Test => "test",
            Self::Prod => "prod",
        }
    }
}

impl std::str::FromStr for AppEnv {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "dev" | "development" => Ok(Self::Dev),
            "test" => Ok(Self::Test),
            "prod" | "production" => Ok(Self::Prod),
            other => Err(ConfigError::InvalidEnv(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub app: AppSection,
    pub observability: ObservabilitySection,
    pub booking: BookingSection,
    pub gateway: GatewaySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSection {
    pub env: AppEnv,
    pub service_name: String,
    pub ops_http_bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySection {
    pub log_filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingSection {
    /// Pending slot locks lapse this many minutes after acquisition.
    pub lock_ttl_minutes: i64,
    pub provider_share_bps: u16,
    pub platform_share_bps: u16,
    /// Principal id of the platform revenue wallet.
    pub platform_account_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySection {
    pub endpoint: String,
    pub key_id: String,
    pub key_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<ErrorBody>,
}

impl<T> ResponseEnvelope<T> {
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    #[must_use]
    pub fn err(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RequestInvalid,
    SlotConflict,
    ReservationNotFound,
    WalletNotFound,
    InsufficientBalance,
    PaymentVerificationFailed,
    GatewayUnavailable,
    InvalidTransition,
    InvariantViolation,
    InternalError,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestInvalid => "REQUEST_INVALID",
            Self::SlotConflict => "SLOT_CONFLICT",
            Self::ReservationNotFound => "RESERVATION_NOT_FOUND",
            Self::WalletNotFound => "WALLET_NOT_FOUND",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::PaymentVerificationFailed => "PAYMENT_VERIFICATION_FAILED",
            Self::GatewayUnavailable => "GATEWAY_UNAVAILABLE",
            Self::InvalidTransition => "INVALID_TRANSITION",
            Self::InvariantViolation => "INVARIANT_VIOLATION",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid APP_ENV value: {0}")]
    InvalidEnv(String),
    #[error("unable to locate config directory (expected config/default.toml)")]
    ConfigDirNotFound,
    #[error("failed reading config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed parsing config file {path}: {source}")]
    ParseToml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

#[derive(Debug, Default, Deserialize)]
struct PartialAppConfig {
    app: Option<PartialAppSection>,
    observability: Option<PartialObservabilitySection>,
    booking: Option<PartialBookingSection>,
    gateway: Option<PartialGatewaySection>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialAppSection {
    env: Option<AppEnv>,
    service_name: Option<String>,
    ops_http_bind_addr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialObservabilitySection {
    log_filter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialBookingSection {
    lock_ttl_minutes: Option<i64>,
    provider_share_bps: Option<u16>,
    platform_share_bps: Option<u16>,
    platform_account_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialGatewaySection {
    endpoint: Option<String>,
    key_id: Option<String>,
    key_secret: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let app_env = env::var("APP_ENV")
            .ok()
            .map(|value| value.parse())
            .transpose()?
            .unwrap_or(AppEnv::Local);
        let config_dir = resolve_config_dir()?;
        Self::load_from_dir_for_env(config_dir, app_env)
    }

    pub fn load_from_dir_for_env(
        config_dir: impl AsRef<Path>,
        app_env: AppEnv,
    ) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let mut config = Self::default_for_env(app_env);
        merge_file(&mut config, &config_dir.join("default.toml"), true)?;
        merge_file(
            &mut config,
            &config_dir.join(format!("{}.toml", app_env.as_str())),
            false,
        )?;
        config.app.env = app_env;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn default_for_env(app_env: AppEnv) -> Self {
        Self {
            app: AppSection {
                env: app_env,
                service_name: "app-server".to_string(),
                ops_http_bind_addr: "127.0.0.1:9100".to_string(),
            },
            observability: ObservabilitySection {
                log_filter: "info".to_string(),
            },
            booking: BookingSection {
                lock_ttl_minutes: 5,
                provider_share_bps: 8_000,
                platform_share_bps: 2_000,
                platform_account_id: Uuid::nil(),
            },
            gateway: GatewaySection {
                endpoint: "http://127.0.0.1:9200".to_string(),
                key_id: String::new(),
                key_secret: String::new(),
            },
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.booking.lock_ttl_minutes <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "booking.lock_ttl_minutes",
                message: "must be positive".to_string(),
            });
        }
        let total =
            u32::from(self.booking.provider_share_bps) + u32::from(self.booking.platform_share_bps);
        if total > 10_000 {
            return Err(ConfigError::InvalidValue {
                field: "booking.provider_share_bps",
                message: format!("shares sum to {total} bps, exceeding 10000"),
            });
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(raw_env) = env::var("APP_ENV") {
            self.app.env = raw_env.parse()?;
        }
        if let Ok(service_name) = env::var("APP_SERVER__SERVICE_NAME") {
            self.app.service_name = service_name;
        }
        if let Ok(bind_addr) = env::var("APP_SERVER__OPS_HTTP_BIND_ADDR") {
            self.app.ops_http_bind_addr = bind_addr;
        }
        if let Ok(log_filter) = env::var("OBSERVABILITY__LOG_FILTER") {
            self.observability.log_filter = log_filter;
        } else if let Ok(log_filter) = env::var("RUST_LOG") {
            self.observability.log_filter = log_filter;
        }
        if let Ok(endpoint) = env::var("GATEWAY__ENDPOINT") {
            self.gateway.endpoint = endpoint;
        }
        if let Ok(key_id) = env::var("GATEWAY__KEY_ID") {
            self.gateway.key_id = key_id;
        }
        if let Ok(key_secret) = env::var("GATEWAY__KEY_SECRET") {
            self.gateway.key_secret = key_secret;
        }
        Ok(())
    }

    fn merge_partial(&mut self, partial: PartialAppConfig) {
        if let Some(app) = partial.app {
            if let Some(value) = app.env {
                self.app.env = value;
            }
            if let Some(value) = app.service_name {
                self.app.service_name = value;
            }
            if let Some(value) = app.ops_http_bind_addr {
                self.app.ops_http_bind_addr = value;
            }
        }
        if let Some(observability) = partial.observability {
            if let Some(value) = observability.log_filter {
                self.observability.log_filter = value;
            }
        }
        if let Some(booking) = partial.booking {
            if let Some(value) = booking.lock_ttl_minutes {
                self.booking.lock_ttl_minutes = value;
            }
            if let Some(value) = booking.provider_share_bps {
                self.booking.provider_share_bps = value;
            }
            if let Some(value) = booking.platform_share_bps {
                self.booking.platform_share_bps = value;
            }
            if let Some(value) = booking.platform_account_id {
                self.booking.platform_account_id = value;
            }
        }
        if let Some(gateway) = partial.gateway {
            if let Some(value) = gateway.endpoint {
                self.gateway.endpoint = value;
            }
            if let Some(value) = gateway.key_id {
                self.gateway.key_id = value;
            }
            if let Some(value) = gateway.key_secret {
                self.gateway.key_secret = value;
            }
        }
    }
}

fn merge_file(config: &mut AppConfig, path: &Path, required: bool) -> Result<(), ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(source) if !required && source.kind() == std::io::ErrorKind::NotFound => {
            return Ok(());
        }
        Err(source) => {
            return Err(ConfigError::ReadFile {
                path: path.display().to_string(),
                source,
            });
        }
    };
    let partial =
        toml::from_str::<PartialAppConfig>(&content).map_err(|source| ConfigError::ParseToml {
            path: path.display().to_string(),
            source,
        })?;
    config.merge_partial(partial);
    Ok(())
}

fn resolve_config_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = env::var("BOOKING_PLATFORM_CONFIG_DIR") {
        return Ok(PathBuf::from(path));
    }

    let mut current_dir = env::current_dir().map_err(|_| ConfigError::ConfigDirNotFound)?;
    loop {
        let candidate = current_dir.join("config");
        if candidate.join("default.toml").exists() {
            return Ok(candidate);
        }
        if !current_dir.pop() {
            break;
        }
    }

    Err(ConfigError::ConfigDirNotFound)
}
