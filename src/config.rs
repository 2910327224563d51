//! Process-wide configuration, loaded once before the server binds.
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `APP_ENV` | `development` or `production` | `production` |
//! | `SECRET_KEY` | session / CSRF signing key | generated in development, required otherwise |
//! | `DATABASE_URL` | storage connection string | `sqlite:///inventory.db` |
//! | `FERNET_KEY` | 32-byte URL-safe base64 field encryption key | generated in development, required otherwise |
//! | `REDIS_URL` | rate limiter backend location | `redis://redis:6379/0` |
//! | `ENABLE_HSTS` | `1` / `true` to send `Strict-Transport-Security` | on in production |
//! | `BIND_ADDR` | listen address | `0.0.0.0:8080` |
//! | `RL_DEFAULT_LIMIT` / `RL_DEFAULT_WINDOW` | requests per client per window (seconds), positive integers | `200` / `60` |
//!
//! Keys generated in development live only as long as the process: every
//! restart invalidates outstanding sessions, and anything encrypted under a
//! generated `FERNET_KEY` cannot be decrypted again. There is no recovery
//! for data written under a lost key, so production refuses to start
//! without both secrets.

use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use rand::{rngs::OsRng, RngCore};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::rate_limit::RateLimitConfig;

pub const APP_ENV_ENV: &str = "APP_ENV";
pub const SECRET_KEY_ENV: &str = "SECRET_KEY";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const FERNET_KEY_ENV: &str = "FERNET_KEY";
pub const REDIS_URL_ENV: &str = "REDIS_URL";
pub const ENABLE_HSTS_ENV: &str = "ENABLE_HSTS";
pub const BIND_ADDR_ENV: &str = "BIND_ADDR";

pub const DEFAULT_DATABASE_URL: &str = "sqlite:///inventory.db";
pub const DEFAULT_RATE_LIMIT_URL: &str = "redis://redis:6379/0";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Raw length of a generated `SECRET_KEY` before hex encoding.
const SECRET_KEY_BYTES: usize = 24;
pub const ENCRYPTION_KEY_BYTES: usize = 32;

const CDN_SOURCE: &str = "https://cdn.jsdelivr.net";

/// Where configuration values are looked up.
pub trait EnvSource {
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment.
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl<K, V> EnvSource for HashMap<K, V>
where
    K: Borrow<str> + Hash + Eq,
    V: AsRef<str>,
{
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).map(|v| v.as_ref().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ConfigError::configuration(
                APP_ENV_ENV,
                format!("unknown environment '{other}' (expected development or production)"),
            )),
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Whether a secret was supplied or made up at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Environment,
    Generated,
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Environment => f.write_str("environment"),
            KeySource::Generated => f.write_str("generated"),
        }
    }
}

/// Session and CSRF signing key.
#[derive(Clone)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn new(value: impl Into<String>) -> Self {
        SecretKey(value.into())
    }

    /// 24 bytes from the OS CSPRNG, hex encoded.
    pub fn generate() -> Result<Self, ConfigError> {
        let mut buf = [0u8; SECRET_KEY_BYTES];
        fill_random(&mut buf)?;
        Ok(SecretKey(hex::encode(buf)))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Symmetric field encryption key: 32 raw bytes plus the URL-safe base64
/// text it was supplied or generated as.
#[derive(Clone)]
pub struct EncryptionKey {
    encoded: String,
    raw: [u8; ENCRYPTION_KEY_BYTES],
}

impl EncryptionKey {
    pub fn generate() -> Result<Self, ConfigError> {
        let mut raw = [0u8; ENCRYPTION_KEY_BYTES];
        fill_random(&mut raw)?;
        Ok(EncryptionKey { encoded: URL_SAFE.encode(raw), raw })
    }

    /// Accepts the key exactly as given; it must decode to 32 bytes.
    pub fn from_encoded(encoded: &str) -> Result<Self, ConfigError> {
        let decoded = URL_SAFE
            .decode(encoded)
            .map_err(|_| ConfigError::configuration(FERNET_KEY_ENV, "not url-safe base64"))?;
        let raw: [u8; ENCRYPTION_KEY_BYTES] = decoded.try_into().map_err(|v: Vec<u8>| {
            ConfigError::configuration(
                FERNET_KEY_ENV,
                format!("must decode to {ENCRYPTION_KEY_BYTES} bytes, got {}", v.len()),
            )
        })?;
        Ok(EncryptionKey { encoded: encoded.to_string(), raw })
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn raw(&self) -> &[u8; ENCRYPTION_KEY_BYTES] {
        &self.raw
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}

fn fill_random(buf: &mut [u8]) -> Result<(), ConfigError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| ConfigError::CryptoProvisioning(e.to_string()))
}

/// Directive name to allowed sources. Not secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentSecurityPolicy {
    directives: BTreeMap<String, BTreeSet<String>>,
}

impl ContentSecurityPolicy {
    pub fn sources(&self, directive: &str) -> Option<&BTreeSet<String>> {
        self.directives.get(directive)
    }

    /// Renders as a `Content-Security-Policy` header value.
    pub fn header_value(&self) -> String {
        self.directives
            .iter()
            .map(|(name, sources)| {
                let joined = sources.iter().map(String::as_str).collect::<Vec<_>>().join(" ");
                format!("{name} {joined}")
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl Default for ContentSecurityPolicy {
    fn default() -> Self {
        let mut directives = BTreeMap::new();
        let own = || BTreeSet::from(["'self'".to_string()]);
        let own_and_cdn = || BTreeSet::from(["'self'".to_string(), CDN_SOURCE.to_string()]);
        directives.insert("default-src".to_string(), own());
        directives.insert("style-src".to_string(), own_and_cdn());
        directives.insert("script-src".to_string(), own_and_cdn());
        Self { directives }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookiePolicy {
    pub http_only: bool,
    pub same_site: SameSite,
    pub secure: bool,
}

/// Immutable startup configuration. Built once, then shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub environment: Environment,
    pub secret_key: SecretKey,
    pub secret_key_source: KeySource,
    pub database_location: String,
    pub encryption_key: EncryptionKey,
    pub encryption_key_source: KeySource,
    pub content_security_policy: ContentSecurityPolicy,
    pub cookie_policy: CookiePolicy,
    pub rate_limit_backend_location: String,
    pub rate_limit: RateLimitConfig,
    pub csrf_enabled: bool,
    pub security_headers_enabled: bool,
    pub hsts_enabled: bool,
    pub bind_address: String,
}

/// Loads the configuration from the process environment.
pub fn load_config() -> Result<ProcessConfig, ConfigError> {
    ProcessConfig::from_source(&ProcessEnv)
}

impl ProcessConfig {
    pub fn from_source(env: &impl EnvSource) -> Result<Self, ConfigError> {
        let environment = match env.var(APP_ENV_ENV) {
            Some(raw) => Environment::parse(&raw)?,
            None => Environment::Production,
        };

        let (secret_key, secret_key_source) = match env.var(SECRET_KEY_ENV) {
            Some(v) if v.is_empty() => {
                return Err(ConfigError::configuration(SECRET_KEY_ENV, "set but empty"))
            }
            Some(v) => (SecretKey::new(v), KeySource::Environment),
            None => {
                require_development(environment, SECRET_KEY_ENV)?;
                warn!("{SECRET_KEY_ENV} not set; using a per-process key, sessions will not survive a restart");
                (SecretKey::generate()?, KeySource::Generated)
            }
        };

        let (encryption_key, encryption_key_source) = match env.var(FERNET_KEY_ENV) {
            Some(v) if v.is_empty() => {
                return Err(ConfigError::configuration(FERNET_KEY_ENV, "set but empty"))
            }
            Some(v) => (EncryptionKey::from_encoded(&v)?, KeySource::Environment),
            None => {
                require_development(environment, FERNET_KEY_ENV)?;
                warn!("{FERNET_KEY_ENV} not set; data encrypted by this process is unrecoverable after a restart");
                (EncryptionKey::generate()?, KeySource::Generated)
            }
        };

        let database_location = env.var(DATABASE_URL_ENV).unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let rate_limit_backend_location = env.var(REDIS_URL_ENV).unwrap_or_else(|| DEFAULT_RATE_LIMIT_URL.to_string());
        let hsts_enabled = env
            .var(ENABLE_HSTS_ENV)
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(environment.is_production());
        let bind_address = env.var(BIND_ADDR_ENV).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let cfg = ProcessConfig {
            environment,
            secret_key,
            secret_key_source,
            database_location,
            encryption_key,
            encryption_key_source,
            content_security_policy: ContentSecurityPolicy::default(),
            cookie_policy: CookiePolicy {
                http_only: true,
                same_site: SameSite::Lax,
                secure: environment.is_production(),
            },
            rate_limit_backend_location,
            rate_limit: RateLimitConfig::from_source(env)?,
            csrf_enabled: true,
            security_headers_enabled: true,
            hsts_enabled,
            bind_address,
        };

        info!(
            environment = ?cfg.environment,
            secret_key = %cfg.secret_key_source,
            encryption_key = %cfg.encryption_key_source,
            hsts = cfg.hsts_enabled,
            "configuration loaded"
        );
        Ok(cfg)
    }
}

fn require_development(environment: Environment, variable: &'static str) -> Result<(), ConfigError> {
    if environment.is_production() {
        return Err(ConfigError::configuration(
            variable,
            "must be provided outside development; a generated key would not survive a restart",
        ));
    }
    Ok(())
}
