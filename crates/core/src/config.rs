use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::costing::{FeeSchedule, QuoteBuilder, RateCardKind, ValidationLimits};
use crate::domain::quote::CurrencyCode;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub backend: BackendConfig,
    pub server: ServerConfig,
    pub pricing: PricingConfig,
    pub limits: LimitsConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub base_url: String,
    pub api_token: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PricingConfig {
    /// Left unset by default: the deployment must choose a card explicitly.
    pub rate_card: Option<RateCardKind>,
    pub service_fee_rate: Decimal,
    pub tax_rate: Decimal,
    pub guide_currency: String,
}

#[derive(Clone, Debug)]
pub struct LimitsConfig {
    pub max_dimension_cm: Decimal,
    pub sea_freight_max_weight_kg: Decimal,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub backend_base_url: Option<String>,
    pub backend_api_token: Option<String>,
    pub server_port: Option<u16>,
    pub rate_card: Option<RateCardKind>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read `{path}`: {source}")]
    Unreadable { path: PathBuf, source: std::io::Error },
    #[error("`{path}` is not valid TOML: {source}")]
    Malformed { path: PathBuf, source: toml::de::Error },
    #[error("config file `{0}` is required but does not exist")]
    FileNotFound(PathBuf),
    #[error("placeholder `${{{var}}}` refers to an unset environment variable")]
    UnsetPlaceholder { var: String },
    #[error("config file contains a `${{` placeholder without a closing brace")]
    UnclosedPlaceholder,
    #[error("environment variable `{key}` has an unusable value `{value}`")]
    BadEnvValue { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        let fees = FeeSchedule::default();
        let limits = ValidationLimits::default();
        Self {
            database: DatabaseConfig {
                url: "sqlite://freightdesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            backend: BackendConfig {
                base_url: "http://localhost:8000/api".to_string(),
                api_token: None,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            pricing: PricingConfig {
                rate_card: None,
                service_fee_rate: fees.service_fee_rate,
                tax_rate: fees.tax_rate,
                guide_currency: CurrencyCode::gbp().0,
            },
            limits: LimitsConfig {
                max_dimension_cm: limits.max_dimension_cm,
                sea_freight_max_weight_kg: limits.sea_freight_max_weight_kg,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Invalid(format!(
                "log format `{other}` is not one of compact, pretty or json"
            ))),
        }
    }
}

const DEFAULT_FILE_NAME: &str = "freightdesk.toml";

impl AppConfig {
    /// Builds the effective configuration. Later layers win: built-in defaults,
    /// then `freightdesk.toml`, then `FREIGHTDESK_*` variables, then `overrides`.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let LoadOptions { config_path, require_file, overrides } = options;
        let mut config = Self::default();

        match locate_file(config_path.as_deref()) {
            Some(path) => config.merge_file(read_file_layer(&path)?),
            None if require_file => {
                return Err(ConfigError::FileNotFound(
                    config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_FILE_NAME)),
                ))
            }
            None => {}
        }

        config.merge_env()?;
        config.merge_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Quote builder for the designated rate card, fee schedule and limits.
    pub fn quote_builder(&self) -> Result<QuoteBuilder, ConfigError> {
        let rate_card = self.pricing.rate_card.ok_or_else(rate_card_required)?;
        Ok(QuoteBuilder::new(rate_card.build())
            .with_fees(FeeSchedule {
                service_fee_rate: self.pricing.service_fee_rate,
                tax_rate: self.pricing.tax_rate,
            })
            .with_limits(ValidationLimits {
                max_dimension_cm: self.limits.max_dimension_cm,
                sea_freight_max_weight_kg: self.limits.sea_freight_max_weight_kg,
            })
            .with_guide_currency(CurrencyCode(self.pricing.guide_currency.clone())))
    }

    fn merge_file(&mut self, layer: FileLayer) {
        if let Some(section) = layer.database {
            assign(&mut self.database.url, section.url);
            assign(&mut self.database.max_connections, section.max_connections);
            assign(&mut self.database.timeout_secs, section.timeout_secs);
        }
        if let Some(section) = layer.backend {
            assign(&mut self.backend.base_url, section.base_url);
            assign(&mut self.backend.timeout_secs, section.timeout_secs);
            if let Some(token) = section.api_token {
                self.backend.api_token = Some(SecretString::from(token));
            }
        }
        if let Some(section) = layer.server {
            assign(&mut self.server.bind_address, section.bind_address);
            assign(&mut self.server.port, section.port);
            assign(&mut self.server.graceful_shutdown_secs, section.graceful_shutdown_secs);
        }
        if let Some(section) = layer.pricing {
            if section.rate_card.is_some() {
                self.pricing.rate_card = section.rate_card;
            }
            assign(&mut self.pricing.service_fee_rate, section.service_fee_rate);
            assign(&mut self.pricing.tax_rate, section.tax_rate);
            assign(&mut self.pricing.guide_currency, section.guide_currency);
        }
        if let Some(section) = layer.limits {
            assign(&mut self.limits.max_dimension_cm, section.max_dimension_cm);
            assign(&mut self.limits.sea_freight_max_weight_kg, section.sea_freight_max_weight_kg);
        }
        if let Some(section) = layer.logging {
            assign(&mut self.logging.level, section.level);
            assign(&mut self.logging.format, section.format);
        }
    }

    fn merge_env(&mut self) -> Result<(), ConfigError> {
        assign(&mut self.database.url, env_value("FREIGHTDESK_DATABASE_URL"));
        assign(
            &mut self.database.max_connections,
            env_parsed("FREIGHTDESK_DATABASE_MAX_CONNECTIONS")?,
        );
        assign(&mut self.database.timeout_secs, env_parsed("FREIGHTDESK_DATABASE_TIMEOUT_SECS")?);

        assign(&mut self.backend.base_url, env_value("FREIGHTDESK_BACKEND_BASE_URL"));
        assign(&mut self.backend.timeout_secs, env_parsed("FREIGHTDESK_BACKEND_TIMEOUT_SECS")?);
        if let Some(token) = env_value("FREIGHTDESK_BACKEND_API_TOKEN") {
            self.backend.api_token = Some(SecretString::from(token));
        }

        assign(&mut self.server.bind_address, env_value("FREIGHTDESK_SERVER_BIND_ADDRESS"));
        assign(&mut self.server.port, env_parsed("FREIGHTDESK_SERVER_PORT")?);
        assign(
            &mut self.server.graceful_shutdown_secs,
            env_parsed("FREIGHTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS")?,
        );

        if let Some(card) = env_parsed::<RateCardKind>("FREIGHTDESK_PRICING_RATE_CARD")? {
            self.pricing.rate_card = Some(card);
        }
        assign(
            &mut self.pricing.service_fee_rate,
            env_parsed("FREIGHTDESK_PRICING_SERVICE_FEE_RATE")?,
        );
        assign(&mut self.pricing.tax_rate, env_parsed("FREIGHTDESK_PRICING_TAX_RATE")?);
        assign(&mut self.pricing.guide_currency, env_value("FREIGHTDESK_PRICING_GUIDE_CURRENCY"));

        assign(
            &mut self.limits.max_dimension_cm,
            env_parsed("FREIGHTDESK_LIMITS_MAX_DIMENSION_CM")?,
        );
        assign(
            &mut self.limits.sea_freight_max_weight_kg,
            env_parsed("FREIGHTDESK_LIMITS_SEA_FREIGHT_MAX_WEIGHT_KG")?,
        );

        // Short `LOG_*` spellings are accepted as aliases.
        assign(
            &mut self.logging.level,
            env_value("FREIGHTDESK_LOGGING_LEVEL").or_else(|| env_value("FREIGHTDESK_LOG_LEVEL")),
        );
        let format = match env_value("FREIGHTDESK_LOGGING_FORMAT") {
            Some(value) => Some(value),
            None => env_value("FREIGHTDESK_LOG_FORMAT"),
        };
        if let Some(format) = format {
            self.logging.format = format.parse()?;
        }

        Ok(())
    }

    fn merge_overrides(&mut self, overrides: ConfigOverrides) {
        assign(&mut self.database.url, overrides.database_url);
        assign(&mut self.logging.level, overrides.log_level);
        assign(&mut self.backend.base_url, overrides.backend_base_url);
        assign(&mut self.server.port, overrides.server_port);
        if let Some(token) = overrides.backend_api_token {
            self.backend.api_token = Some(SecretString::from(token));
        }
        if overrides.rate_card.is_some() {
            self.pricing.rate_card = overrides.rate_card;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let database = &self.database;
        let url = database.url.trim();
        require(
            url.starts_with("sqlite:") || url == ":memory:",
            "database.url has to point at sqlite (`sqlite://path` or `sqlite::memory:`)",
        )?;
        require(database.max_connections > 0, "database.max_connections cannot be zero")?;
        require(
            (1..=300).contains(&database.timeout_secs),
            "database.timeout_secs has to be between 1 and 300",
        )?;

        let backend = &self.backend;
        let base_url = backend.base_url.trim();
        require(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "backend.base_url needs an http:// or https:// scheme",
        )?;
        let blank_token =
            backend.api_token.as_ref().is_some_and(|token| token.expose_secret().trim().is_empty());
        require(
            !blank_token,
            "backend.api_token is blank; drop the key or set a real token",
        )?;
        require(
            (1..=300).contains(&backend.timeout_secs),
            "backend.timeout_secs has to be between 1 and 300",
        )?;

        require(self.server.port != 0, "server.port cannot be zero")?;
        require(
            self.server.graceful_shutdown_secs != 0,
            "server.graceful_shutdown_secs cannot be zero",
        )?;

        if self.pricing.rate_card.is_none() {
            return Err(rate_card_required());
        }
        for (name, rate) in [
            ("pricing.service_fee_rate", self.pricing.service_fee_rate),
            ("pricing.tax_rate", self.pricing.tax_rate),
        ] {
            require(
                (Decimal::ZERO..=Decimal::ONE).contains(&rate),
                format!("{name} is a fraction and has to lie between 0 and 1, got {rate}"),
            )?;
        }
        require(
            !self.pricing.guide_currency.trim().is_empty(),
            "pricing.guide_currency needs a currency symbol",
        )?;

        require(
            self.limits.max_dimension_cm > Decimal::ZERO,
            "limits.max_dimension_cm has to be positive",
        )?;
        require(
            self.limits.sea_freight_max_weight_kg > Decimal::ZERO,
            "limits.sea_freight_max_weight_kg has to be positive",
        )?;

        require(
            matches!(
                self.logging.level.trim().to_ascii_lowercase().as_str(),
                "trace" | "debug" | "info" | "warn" | "error"
            ),
            format!("logging.level `{}` is not a tracing level", self.logging.level),
        )
    }
}

fn assign<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn require(condition: bool, message: impl Into<String>) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Invalid(message.into()))
    }
}

fn rate_card_required() -> ConfigError {
    ConfigError::Invalid(
        "pricing.rate_card has no default; set it to legacy_tiered or flat".to_string(),
    )
}

fn locate_file(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => path.exists().then(|| path.to_path_buf()),
        None => [DEFAULT_FILE_NAME, "config/freightdesk.toml"]
            .into_iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.exists()),
    }
}

fn read_file_layer(path: &Path) -> Result<FileLayer, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::Unreadable { path: path.to_path_buf(), source })?;
    let expanded = expand_placeholders(&raw)?;
    toml::from_str(&expanded)
        .map_err(|source| ConfigError::Malformed { path: path.to_path_buf(), source })
}

static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();

/// Replaces every `${NAME}` with the value of the environment variable `NAME`.
fn expand_placeholders(raw: &str) -> Result<String, ConfigError> {
    let pattern = PLACEHOLDER
        .get_or_init(|| Regex::new(r"\$\{([^}$]*)\}").ok())
        .as_ref()
        .ok_or_else(|| ConfigError::Invalid("placeholder pattern did not compile".to_string()))?;

    let mut expanded = String::with_capacity(raw.len());
    let mut copied_up_to = 0;
    for captures in pattern.captures_iter(raw) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        expanded.push_str(literal_text(&raw[copied_up_to..whole.start()])?);
        let value = env::var(name.as_str())
            .map_err(|_| ConfigError::UnsetPlaceholder { var: name.as_str().to_string() })?;
        expanded.push_str(&value);
        copied_up_to = whole.end();
    }
    expanded.push_str(literal_text(&raw[copied_up_to..])?);
    Ok(expanded)
}

fn literal_text(segment: &str) -> Result<&str, ConfigError> {
    if segment.contains("${") {
        Err(ConfigError::UnclosedPlaceholder)
    } else {
        Ok(segment)
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parsed<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    let Some(raw) = env_value(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => Err(ConfigError::BadEnvValue { key: key.to_string(), value: raw }),
    }
}

/// Shape of `freightdesk.toml`; every key is optional.
#[derive(Debug, Default, Deserialize)]
struct FileLayer {
    database: Option<DatabaseSection>,
    backend: Option<BackendSection>,
    server: Option<ServerSection>,
    pricing: Option<PricingSection>,
    limits: Option<LimitsSection>,
    logging: Option<LoggingSection>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseSection {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct BackendSection {
    base_url: Option<String>,
    api_token: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingSection {
    rate_card: Option<RateCardKind>,
    service_fee_rate: Option<Decimal>,
    tax_rate: Option<Decimal>,
    guide_currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitsSection {
    max_dimension_cm: Option<Decimal>,
    sea_freight_max_weight_kg: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingSection {
    level: Option<String>,
    format: Option<LogFormat>,
}
