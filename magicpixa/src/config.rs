//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `MAGICPIXA_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `MAGICPIXA_` override YAML values
//! 3. **DATABASE_URL** - Special case: switches `database` to an external PostgreSQL at that URL
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `MAGICPIXA_CREDITS__SIGNUP_BONUS=25` sets the `credits.signup_bonus` field, and
//! `MAGICPIXA_GATEWAY__GEMINI__API_KEY=...` sets the Gemini API key.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use magicpixa::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration Structure
//!
//! - **Server**: `host`, `port`
//! - **Database**: `database.type` (`external` or `memory`), `database.url`, `database.pool`
//! - **Admin User**: `admin_email` - platform manager created on startup
//! - **Security**: `secret_key` (signs anonymous device tokens), `auth.security.cors`
//! - **Authentication**: `auth.proxy_header` - identity headers set by the upstream auth proxy
//! - **Credits**: `credits` - signup bonus, anonymous quota, reservation lifetime
//! - **Features**: `features.<name>` - per-feature `enabled`, `cost`, `retries` overrides
//! - **Prompts**: `prompts.celebrity_overrides` - extra celebrity identity blocks
//! - **Model gateway**: `gateway` - `gemini` or `dummy`
//! - **Object storage**: `object_storage` - `local` or `s3`
//! - **Payments**: `payment` - `razorpay` or `dummy` (optional)
//! - **Limits**: `limits` - request size limits
//! - **Reconciler**: `reconciler` - background commit of delivered jobs

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, time::Duration};
use url::Url;

use crate::errors::Error;
use crate::prompts::{CelebrityProfile, Feature};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "magicpixa", about = "Credit-metered generative photo editing backend")]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "MAGICPIXA_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Set from the `DATABASE_URL` environment variable; folded into `database` on load
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// Database configuration - external PostgreSQL or the in-memory development store
    pub database: DatabaseConfig,
    /// Email address of the platform manager created on startup
    pub admin_email: String,
    /// Key used to sign anonymous device tokens
    pub secret_key: Option<String>,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Credit ledger configuration
    pub credits: CreditsConfig,
    /// Per-feature overrides of the built-in catalogue
    pub features: FeaturesConfig,
    /// Prompt template data
    pub prompts: PromptsConfig,
    /// Remote model gateway
    pub gateway: GatewayConfig,
    /// Where generated media and uploads are written
    pub object_storage: ObjectStorageConfig,
    /// Payment provider configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentConfig>,
    /// Request size limits
    pub limits: LimitsConfig,
    /// Background reconciler for delivered reservations
    pub reconciler: ReconcilerConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

/// Connection pool settings passed to SQLx.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections to maintain
    pub min_connections: u32,
    /// Maximum time to wait for a connection (seconds)
    pub acquire_timeout_secs: u64,
    /// Time before idle connections are closed (seconds, 0 = never)
    pub idle_timeout_secs: u64,
    /// Maximum lifetime of a connection (seconds, 0 = never)
    pub max_lifetime_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DatabaseConfig {
    /// External PostgreSQL database
    External {
        /// Connection string
        url: String,
        #[serde(default)]
        pool: PoolSettings,
    },
    /// Process-local store; all data is lost on restart
    Memory,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig::Memory
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Identity headers set by the managed auth service in front of the server
    pub proxy_header: ProxyHeaderAuthConfig,
    /// CORS settings
    pub security: SecurityConfig,
}

/// Proxy header-based authentication configuration.
///
/// The upstream identity proxy authenticates the user and forwards their email in
/// `header_name`. The server trusts this header, so it must never be reachable from
/// clients without passing through the proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyHeaderAuthConfig {
    /// Header carrying the authenticated user's email
    pub header_name: String,
    /// Optional header carrying a display name, used when creating the account
    pub display_name_header_name: String,
    /// Create accounts (with the signup bonus) for unknown users
    pub auto_create_users: bool,
}

impl Default for ProxyHeaderAuthConfig {
    fn default() -> Self {
        Self {
            header_name: "x-magicpixa-user".to_string(),
            display_name_header_name: "x-magicpixa-name".to_string(),
            auto_create_users: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![CorsOrigin::Url(Url::parse("http://localhost:5173").expect("static URL is valid"))],
            allow_credentials: true,
            max_age: Some(3600),
        }
    }
}

/// CORS origin specification: either `*` or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

/// Credit ledger configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CreditsConfig {
    /// Credits granted when an account is created
    pub signup_bonus: i64,
    /// Free generations available to each anonymous device
    pub anonymous_quota: i64,
    /// Plan name given to new accounts
    pub default_plan: String,
    /// How long a hold may stay open before the reconciler releases it
    #[serde(with = "humantime_serde")]
    pub reservation_ttl: Duration,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            signup_bonus: 10,
            anonymous_quota: 3,
            default_plan: "free".to_string(),
            reservation_ttl: Duration::from_secs(600),
        }
    }
}

/// Overrides for one feature. Unset fields keep the built-in value.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureOverride {
    pub enabled: Option<bool>,
    pub cost: Option<i64>,
    pub retries: Option<u32>,
}

/// Effective settings for one feature after overrides are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSettings {
    pub enabled: bool,
    pub cost: i64,
    pub retries: u32,
}

/// Per-feature overrides, keyed by feature name (e.g. `celebrity_selfie`).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct FeaturesConfig(pub HashMap<String, FeatureOverride>);

impl FeaturesConfig {
    pub fn settings(&self, feature: Feature) -> FeatureSettings {
        let overrides = self.0.get(feature.as_str());
        FeatureSettings {
            enabled: overrides.and_then(|o| o.enabled).unwrap_or(true),
            cost: overrides.and_then(|o| o.cost).unwrap_or_else(|| feature.default_cost()),
            retries: overrides.and_then(|o| o.retries).unwrap_or_else(|| feature.default_retries()),
        }
    }
}

/// Prompt template data.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromptsConfig {
    /// Additional or replacement celebrity identity blocks, keyed by name
    pub celebrity_overrides: HashMap<String, CelebrityProfile>,
}

/// Remote model gateway configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayConfig {
    /// Google Gemini `generateContent` API.
    /// Set the key via `MAGICPIXA_GATEWAY__GEMINI__API_KEY`.
    Gemini(GeminiConfig),
    /// Echoes the input image and returns a canned caption; for local development
    #[default]
    Dummy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: Url,
    /// Model used for image-output features
    pub image_model: String,
    /// Model used for text-output features
    pub text_model: String,
    /// Per-attempt request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Fixed pause between retried attempts
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: Url::parse("https://generativelanguage.googleapis.com").expect("static URL is valid"),
            image_model: "gemini-2.5-flash-image".to_string(),
            text_model: "gemini-2.5-flash".to_string(),
            timeout: Duration::from_secs(120),
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Object storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStorageConfig {
    /// Files on local disk, served by this server under `/media`
    Local(LocalStorageConfig),
    /// S3-compatible bucket. Credentials come from the standard AWS environment.
    S3(S3StorageConfig),
}

impl Default for ObjectStorageConfig {
    fn default() -> Self {
        ObjectStorageConfig::Local(LocalStorageConfig::default())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalStorageConfig {
    pub path: PathBuf,
    /// Public URL prefix for stored objects, normally `<server>/media`
    pub public_base_url: Url,
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".magicpixa_data/media"),
            public_base_url: Url::parse("http://localhost:3001/media").expect("static URL is valid"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct S3StorageConfig {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services (MinIO, R2, ...)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Use path-style addressing, required by most S3-compatible services
    #[serde(default)]
    pub force_path_style: bool,
    /// Public URL prefix for objects in the bucket (bucket website or CDN)
    pub public_base_url: Url,
}

/// Payment provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentConfig {
    /// Razorpay orders API.
    /// Set credentials via `MAGICPIXA_PAYMENT__RAZORPAY__KEY_ID` and
    /// `MAGICPIXA_PAYMENT__RAZORPAY__KEY_SECRET`.
    Razorpay(RazorpayConfig),
    /// Creates local order ids without contacting any gateway
    Dummy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RazorpayConfig {
    pub key_id: String,
    pub key_secret: String,
    #[serde(default = "RazorpayConfig::default_base_url")]
    pub base_url: Url,
}

impl RazorpayConfig {
    fn default_base_url() -> Url {
        Url::parse("https://api.razorpay.com").expect("static URL is valid")
    }
}

/// Request size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Largest decoded input image accepted by the job endpoint
    pub max_image_bytes: usize,
    /// Largest file accepted by the upload endpoint
    pub max_upload_bytes: usize,
    /// Longest a single object storage write may take
    #[serde(with = "humantime_serde")]
    pub upload_timeout: Duration,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: 10 * 1024 * 1024,
            max_upload_bytes: 15 * 1024 * 1024,
            upload_timeout: Duration::from_secs(60),
        }
    }
}

/// Background reconciler configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    /// Time between passes
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Minimum age of a delivered reservation before the reconciler commits it
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
    /// Maximum reservations handled per kind per pass
    pub batch_size: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            grace_period: Duration::from_secs(60),
            batch_size: 50,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            database_url: None,
            database: DatabaseConfig::default(),
            admin_email: "admin@magicpixa.local".to_string(),
            secret_key: None,
            auth: AuthConfig::default(),
            credits: CreditsConfig::default(),
            features: FeaturesConfig::default(),
            prompts: PromptsConfig::default(),
            gateway: GatewayConfig::default(),
            object_storage: ObjectStorageConfig::default(),
            payment: None,
            limits: LimitsConfig::default(),
            reconciler: ReconcilerConfig::default(),
            enable_metrics: true,
            enable_otel_export: false,
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        // DATABASE_URL wins over the file, keeping any configured pool settings
        if let Some(url) = config.database_url.take() {
            let pool = match &config.database {
                DatabaseConfig::External { pool, .. } => pool.clone(),
                DatabaseConfig::Memory => PoolSettings::default(),
            };
            config.database = DatabaseConfig::External { url, pool };
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |message: String| Error::Internal {
            operation: format!("Config validation: {message}"),
        };

        match self.secret_key.as_deref() {
            None | Some("") => {
                return Err(invalid(
                    "secret_key is not configured. Set MAGICPIXA_SECRET_KEY or add secret_key to the config file.".to_string(),
                ));
            }
            Some(_) => {}
        }

        let cors = &self.auth.security.cors;
        if cors.allow_credentials && cors.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
            return Err(invalid(
                "CORS allow_credentials cannot be combined with a wildcard origin".to_string(),
            ));
        }

        if self.auth.proxy_header.header_name.trim().is_empty() {
            return Err(invalid("auth.proxy_header.header_name cannot be empty".to_string()));
        }

        if self.credits.signup_bonus < 0 {
            return Err(invalid(format!("credits.signup_bonus ({}) cannot be negative", self.credits.signup_bonus)));
        }
        if self.credits.anonymous_quota < 0 {
            return Err(invalid(format!(
                "credits.anonymous_quota ({}) cannot be negative",
                self.credits.anonymous_quota
            )));
        }
        if self.credits.reservation_ttl.is_zero() {
            return Err(invalid("credits.reservation_ttl must be greater than zero".to_string()));
        }
        if self.limits.upload_timeout.is_zero() {
            return Err(invalid("limits.upload_timeout must be greater than zero".to_string()));
        }
        let longest_job = self.longest_job();
        if self.credits.reservation_ttl <= longest_job {
            return Err(invalid(format!(
                "credits.reservation_ttl ({:?}) must exceed the longest possible job ({longest_job:?}), \
                 counting every model attempt, retry delay and the output upload",
                self.credits.reservation_ttl,
            )));
        }

        for (feature, overrides) in &self.features.0 {
            if feature.parse::<Feature>().is_err() {
                return Err(invalid(format!("features.{feature} is not a known feature")));
            }
            if let Some(cost) = overrides.cost
                && cost < 0
            {
                return Err(invalid(format!("features.{feature}.cost ({cost}) cannot be negative")));
            }
            if let Some(retries) = overrides.retries
                && retries > 10
            {
                return Err(invalid(format!("features.{feature}.retries ({retries}) cannot exceed 10")));
            }
        }

        if let GatewayConfig::Gemini(gemini) = &self.gateway
            && gemini.api_key.trim().is_empty()
        {
            return Err(invalid(
                "gateway.gemini.api_key is empty. Set MAGICPIXA_GATEWAY__GEMINI__API_KEY.".to_string(),
            ));
        }

        if let Some(PaymentConfig::Razorpay(razorpay)) = &self.payment
            && (razorpay.key_id.is_empty() || razorpay.key_secret.is_empty())
        {
            return Err(invalid("payment.razorpay requires key_id and key_secret".to_string()));
        }

        if self.limits.max_image_bytes == 0 || self.limits.max_upload_bytes == 0 {
            return Err(invalid("limits must be greater than zero".to_string()));
        }

        if self.reconciler.enabled && (self.reconciler.interval.is_zero() || self.reconciler.batch_size <= 0) {
            return Err(invalid(
                "reconciler.interval and reconciler.batch_size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Upper bound on one job's runtime after its hold is taken: every model attempt of the
    /// feature with the most retries, the delays between them, then the output upload.
    pub fn longest_job(&self) -> Duration {
        let per_attempt = match &self.gateway {
            GatewayConfig::Gemini(gemini) => gemini.timeout + gemini.retry_delay,
            GatewayConfig::Dummy => Duration::ZERO,
        };
        let attempts = Feature::ALL
            .iter()
            .map(|&feature| self.features.settings(feature).retries + 1)
            .max()
            .unwrap_or(1);
        per_attempt.saturating_mul(attempts) + self.limits.upload_timeout
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            .merge(Yaml::file(&args.config))
            .merge(Env::prefixed("MAGICPIXA_").split("__").ignore(&["CONFIG"]))
            .merge(Env::raw().only(&["DATABASE_URL"]))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args() -> Args {
        Args {
            config: "test.yaml".to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_defaults_with_minimal_file() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "secret_key: hello\n")?;

            let config = Config::load(&args())?;

            assert_eq!(config.port, 3001);
            assert!(matches!(config.database, DatabaseConfig::Memory));
            assert!(matches!(config.gateway, GatewayConfig::Dummy));
            assert_eq!(config.credits.signup_bonus, 10);
            assert_eq!(config.credits.anonymous_quota, 3);
            assert_eq!(config.credits.reservation_ttl, Duration::from_secs(600));
            assert!(config.payment.is_none());

            Ok(())
        });
    }

    #[test]
    fn test_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "secret_key: hello\nport: 4000\n")?;
            jail.set_env("MAGICPIXA_HOST", "127.0.0.1");
            jail.set_env("MAGICPIXA_PORT", "8080");
            jail.set_env("MAGICPIXA_CREDITS__SIGNUP_BONUS", "25");

            let config = Config::load(&args())?;

            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.port, 8080);
            assert_eq!(config.credits.signup_bonus, 25);

            Ok(())
        });
    }

    #[test]
    fn test_database_url_env_switches_to_external() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: hello
database:
  type: memory
"#,
            )?;
            jail.set_env("DATABASE_URL", "postgres://pixa@localhost/pixa");

            let config = Config::load(&args())?;

            match config.database {
                DatabaseConfig::External { url, pool } => {
                    assert_eq!(url, "postgres://pixa@localhost/pixa");
                    assert_eq!(pool.max_connections, 10);
                }
                DatabaseConfig::Memory => panic!("expected external database"),
            }

            Ok(())
        });
    }

    #[test]
    fn test_feature_overrides_merge_with_builtins() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: hello
features:
  celebrity_selfie:
    cost: 5
  caption:
    enabled: false
"#,
            )?;

            let config = Config::load(&args())?;

            let selfie = config.features.settings(Feature::CelebritySelfie);
            assert_eq!(selfie.cost, 5);
            assert_eq!(selfie.retries, 2);
            assert!(selfie.enabled);

            assert!(!config.features.settings(Feature::Caption).enabled);
            assert_eq!(config.features.settings(Feature::Enhance).cost, 1);

            Ok(())
        });
    }

    #[test]
    fn test_gateway_and_storage_sections() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: hello
gateway:
  gemini:
    api_key: key-from-file
    retry_delay: 500ms
object_storage:
  s3:
    bucket: pixa-media
    region: ap-south-1
    public_base_url: https://cdn.example.com
payment:
  razorpay:
    key_id: rzp_test
    key_secret: shh
"#,
            )?;

            let config = Config::load(&args())?;

            match &config.gateway {
                GatewayConfig::Gemini(gemini) => {
                    assert_eq!(gemini.api_key, "key-from-file");
                    assert_eq!(gemini.retry_delay, Duration::from_millis(500));
                    assert_eq!(gemini.image_model, "gemini-2.5-flash-image");
                }
                GatewayConfig::Dummy => panic!("expected gemini gateway"),
            }
            match &config.object_storage {
                ObjectStorageConfig::S3(s3) => assert_eq!(s3.bucket, "pixa-media"),
                ObjectStorageConfig::Local(_) => panic!("expected s3 storage"),
            }
            match &config.payment {
                Some(PaymentConfig::Razorpay(razorpay)) => {
                    assert_eq!(razorpay.base_url.as_str(), "https://api.razorpay.com/")
                }
                _ => panic!("expected razorpay"),
            }

            Ok(())
        });
    }

    #[test]
    fn test_missing_secret_key_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "port: 3001\n")?;

            let err = Config::load(&args()).unwrap_err();
            assert!(err.to_string().contains("secret_key"));

            Ok(())
        });
    }

    #[test]
    fn test_negative_feature_cost_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: hello
features:
  enhance:
    cost: -1
"#,
            )?;

            let err = Config::load(&args()).unwrap_err();
            assert!(err.to_string().contains("cannot be negative"));

            Ok(())
        });
    }

    #[test]
    fn test_reservation_ttl_must_outlast_slowest_job() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: hello
gateway:
  gemini:
    api_key: key
    timeout: 2m
    retry_delay: 2s
features:
  celebrity_selfie:
    retries: 10
"#,
            )?;

            let err = Config::load(&args()).unwrap_err();
            assert!(err.to_string().contains("reservation_ttl"));

            jail.set_env("MAGICPIXA_CREDITS__RESERVATION_TTL", "30m");
            let config = Config::load(&args())?;
            assert_eq!(config.longest_job(), Duration::from_secs(11 * 122 + 60));

            Ok(())
        });
    }

    #[test]
    fn test_wildcard_cors_with_credentials_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: hello
auth:
  security:
    cors:
      allowed_origins: ["*"]
      allow_credentials: true
"#,
            )?;

            assert!(Config::load(&args()).is_err());

            Ok(())
        });
    }

    #[test]
    fn test_unknown_feature_name_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: hello
features:
  teleport:
    cost: 1
"#,
            )?;

            let err = Config::load(&args()).unwrap_err();
            assert!(err.to_string().contains("teleport"));

            Ok(())
        });
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "secret_key: hello\nnot_a_field: 1\n")?;

            assert!(Config::load(&args()).is_err());

            Ok(())
        });
    }
}
