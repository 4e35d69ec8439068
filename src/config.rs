use config::{builder::DefaultState, Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_ORDER_STORE_BACKEND: &str = "database";
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_CURRENCY: &str = "inr";
const DEFAULT_STOREFRONT_DOMAIN: &str = "http://localhost:3000";
const DEFAULT_MAIL_FROM: &str = "orders@storefront.local";
const DEV_DEFAULT_JWT_SECRET: &str =
    "storefront_development_secret_key_used_only_for_local_testing_runs";

/// Where order records live
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderStoreBackend {
    Database,
    InMemory,
}

/// An account preloaded into the in-memory user directory
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct SeedUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// A stock level preloaded into the in-memory inventory ledger
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct SeedStock {
    pub product_id: Uuid,
    pub count: u32,
}

/// When (if ever) product stock is decremented for an order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StockDeduction {
    Disabled,
    AtCheckout,
    AtConfirmation,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT secret key used to verify bearer tokens (HS256)
    #[validate(custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Expected `iss` claim
    #[serde(default = "default_auth_issuer")]
    pub auth_issuer: String,

    /// Expected `aud` claim
    #[serde(default = "default_auth_audience")]
    pub auth_audience: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Order store backend: "database" or "in-memory"
    #[serde(default = "default_order_store_backend")]
    #[validate(custom = "validate_order_store_backend")]
    pub order_store_backend: String,

    /// Accounts available to the in-memory backend; ignored by the database backend
    #[serde(default)]
    pub seed_users: Vec<SeedUser>,

    /// Product stock available to the in-memory backend
    #[serde(default)]
    pub seed_stock: Vec<SeedStock>,

    /// Upper bound for a single order store call (seconds)
    #[serde(default = "default_store_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub store_timeout_secs: u64,

    /// Stripe secret key; checkout is unavailable without it
    #[serde(default)]
    pub stripe_secret_key: Option<String>,

    /// Base URL of the Stripe REST API
    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,

    /// Upper bound for a single payment gateway call (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub gateway_timeout_secs: u64,

    /// ISO currency code orders are charged in
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub payment_currency: String,

    /// Storefront origin used to build the checkout redirect URLs
    #[serde(default = "default_storefront_domain")]
    pub storefront_domain: String,

    /// Transactional mail API endpoint; notifications are only logged without it
    #[serde(default)]
    pub mail_api_url: Option<String>,

    /// Bearer key for the mail API
    #[serde(default)]
    pub mail_api_key: Option<String>,

    /// Sender address for transactional mail
    #[serde(default = "default_mail_from")]
    pub mail_from: String,

    /// Upper bound for a single mail API call (seconds)
    #[serde(default = "default_mail_timeout_secs")]
    pub mail_timeout_secs: u64,

    /// Reject delivery of orders that are not paid yet
    #[serde(default = "default_true_bool")]
    pub require_payment_before_delivery: bool,

    /// Stock deduction point: "disabled", "at_checkout" or "at_confirmation"
    #[serde(default = "default_stock_deduction")]
    #[validate(custom = "validate_stock_deduction")]
    pub stock_deduction: String,

    /// Request timeout applied to the whole HTTP stack (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl AppConfig {
    /// Creates a configuration with defaults for every optional field
    pub fn new(
        database_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            auth_issuer: default_auth_issuer(),
            auth_audience: default_auth_audience(),
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            order_store_backend: default_order_store_backend(),
            seed_users: Vec::new(),
            seed_stock: Vec::new(),
            store_timeout_secs: default_store_timeout_secs(),
            stripe_secret_key: None,
            stripe_api_base: default_stripe_api_base(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            payment_currency: default_currency(),
            storefront_domain: default_storefront_domain(),
            mail_api_url: None,
            mail_api_key: None,
            mail_from: default_mail_from(),
            mail_timeout_secs: default_mail_timeout_secs(),
            require_payment_before_delivery: true,
            stock_deduction: default_stock_deduction(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn order_store_backend(&self) -> OrderStoreBackend {
        match self.order_store_backend.to_ascii_lowercase().as_str() {
            "in-memory" | "memory" => OrderStoreBackend::InMemory,
            _ => OrderStoreBackend::Database,
        }
    }

    pub fn stock_deduction(&self) -> StockDeduction {
        match self.stock_deduction.to_ascii_lowercase().as_str() {
            "at_checkout" => StockDeduction::AtCheckout,
            "at_confirmation" => StockDeduction::AtConfirmation,
            _ => StockDeduction::Disabled,
        }
    }

    /// Where the gateway sends the buyer after a successful payment
    pub fn success_url(&self) -> String {
        format!("{}/paymentsuccess", self.storefront_domain.trim_end_matches('/'))
    }

    /// Where the gateway sends the buyer after an abandoned payment
    pub fn cancel_url(&self) -> String {
        format!("{}/paymentfailure", self.storefront_domain.trim_end_matches('/'))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn mail_timeout(&self) -> Duration {
        Duration::from_secs(self.mail_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique, secure value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if self.is_production()
            && self
                .stripe_secret_key
                .as_deref()
                .map_or(true, |key| key.trim().is_empty())
        {
            let mut err = ValidationError::new("stripe_secret_key_required");
            err.message = Some("Set APP__STRIPE_SECRET_KEY in production".into());
            errors.add("stripe_secret_key", err);
        }

        if self.mail_api_url.is_some() && self.mail_api_key.is_none() {
            let mut err = ValidationError::new("mail_api_key_required");
            err.message = Some("APP__MAIL_API_KEY is required when APP__MAIL_API_URL is set".into());
            errors.add("mail_api_key", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_order_store_backend() -> String {
    DEFAULT_ORDER_STORE_BACKEND.to_string()
}
fn default_store_timeout_secs() -> u64 {
    5
}
fn default_stripe_api_base() -> String {
    DEFAULT_STRIPE_API_BASE.to_string()
}
fn default_gateway_timeout_secs() -> u64 {
    10
}
fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}
fn default_storefront_domain() -> String {
    DEFAULT_STOREFRONT_DOMAIN.to_string()
}
fn default_mail_from() -> String {
    DEFAULT_MAIL_FROM.to_string()
}
fn default_mail_timeout_secs() -> u64 {
    10
}
fn default_true_bool() -> bool {
    true
}
fn default_stock_deduction() -> String {
    "disabled".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}

fn default_auth_issuer() -> String {
    "storefront-api".to_string()
}

fn default_auth_audience() -> String {
    "storefront-clients".to_string()
}

fn validate_order_store_backend(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "database" | "in-memory" | "memory" => Ok(()),
        _ => {
            let mut err = ValidationError::new("order_store_backend");
            err.message = Some("Must be one of: database, in-memory".into());
            Err(err)
        }
    }
}

fn validate_stock_deduction(value: &str) -> Result<(), ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "disabled" | "at_checkout" | "at_confirmation" => Ok(()),
        _ => {
            let mut err = ValidationError::new("stock_deduction");
            err.message = Some("Must be one of: disabled, at_checkout, at_confirmation".into());
            Err(err)
        }
    }
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    if trimmed.len() < 32 {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be at least 32 characters".into());
        return Err(err);
    }

    // Reject trivially weak secrets
    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("jwt_secret");
            err.message = Some("JWT secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    let lower = trimmed.to_ascii_lowercase();
    let weak_fragments = ["changeme", "password", "12345", "your-secret-key"];
    if weak_fragments.iter().any(|pattern| lower.contains(pattern)) {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some(
            "JWT secret appears to be weak; use a cryptographically strong random string".into(),
        );
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

fn base_builder() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)
}

fn finish(config: Config) -> Result<AppConfig, AppConfigError> {
    // Check for jwt_secret before deserialization to provide a clear error message
    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET environment variable with a secure random string (minimum 32 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    Ok(app_config)
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = base_builder()?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config = finish(config)?;
    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    const SECRET: &str = "k3Jd9sLq0ZxV7mNbP2rTgY8wHcE5uA1f";

    fn from_toml(content: &str) -> Result<AppConfig, AppConfigError> {
        let config = base_builder()
            .unwrap()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()
            .unwrap();
        finish(config)
    }

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            SECRET.into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
        )
    }

    #[test]
    fn defaults_fill_optional_fields() {
        let cfg = from_toml(&format!("jwt_secret = \"{}\"", SECRET)).unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.payment_currency, "inr");
        assert_eq!(cfg.order_store_backend(), OrderStoreBackend::Database);
        assert_eq!(cfg.stock_deduction(), StockDeduction::Disabled);
        assert!(cfg.require_payment_before_delivery);
        assert_eq!(cfg.store_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.gateway_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn missing_jwt_secret_is_a_load_error() {
        let result = from_toml("port = 9000");
        assert!(matches!(result, Err(AppConfigError::Load(_))));
    }

    #[test]
    fn invalid_fields_are_reported() {
        let result = from_toml(
            r#"
            jwt_secret = "short"
            log_level = "loud"
            stock_deduction = "sometimes"
            order_store_backend = "files"
        "#,
        );

        match result {
            Err(AppConfigError::Validation(errors)) => {
                let fields = errors.field_errors();
                assert!(fields.contains_key("jwt_secret"));
                assert!(fields.contains_key("log_level"));
                assert!(fields.contains_key("stock_deduction"));
                assert!(fields.contains_key("order_store_backend"));
            }
            other => panic!("expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn in_memory_seed_data_is_read_from_tables() {
        let cfg = from_toml(&format!(
            r#"
            jwt_secret = "{}"
            order_store_backend = "in-memory"

            [[seed_users]]
            id = "6f1c2a52-3c1e-4f0e-9d51-2f7d3e8a9b10"
            name = "Asha"
            email = "asha@example.com"

            [[seed_stock]]
            product_id = "0b7e4c1d-5a2f-4e3b-8c6d-9f0a1b2c3d4e"
            count = 12
        "#,
            SECRET
        ))
        .unwrap();

        assert_eq!(cfg.order_store_backend(), OrderStoreBackend::InMemory);
        assert_eq!(cfg.seed_users.len(), 1);
        assert_eq!(cfg.seed_users[0].name, "Asha");
        assert_eq!(cfg.seed_stock[0].count, 12);
    }

    #[test]
    fn redirect_urls_are_built_from_the_storefront_domain() {
        let mut cfg = base_config();
        cfg.storefront_domain = "https://shop.example.com/".into();

        assert_eq!(cfg.success_url(), "https://shop.example.com/paymentsuccess");
        assert_eq!(cfg.cancel_url(), "https://shop.example.com/paymentfailure");
    }

    #[test]
    fn production_requires_a_stripe_key() {
        let mut cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.stripe_secret_key = Some("sk_test_123".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn dev_secret_is_rejected_outside_development() {
        let mut cfg = base_config();
        cfg.stripe_secret_key = Some("sk_test_123".into());
        cfg.jwt_secret = DEV_DEFAULT_JWT_SECRET.into();
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn stock_deduction_modes_parse() {
        let mut cfg = base_config();
        cfg.stock_deduction = "at_checkout".into();
        assert_eq!(cfg.stock_deduction(), StockDeduction::AtCheckout);
        cfg.stock_deduction = "AT_CONFIRMATION".into();
        assert_eq!(cfg.stock_deduction(), StockDeduction::AtConfirmation);
    }
}
