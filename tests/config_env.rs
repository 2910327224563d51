use inventory::config::{KeySource, DEFAULT_DATABASE_URL, DEFAULT_RATE_LIMIT_URL};
use inventory::error::ConfigError;
use inventory::load_config;
use serial_test::serial;

const VARS: [&str; 9] = [
    "APP_ENV", "SECRET_KEY", "DATABASE_URL", "FERNET_KEY", "REDIS_URL",
    "ENABLE_HSTS", "BIND_ADDR", "RL_DEFAULT_LIMIT", "RL_DEFAULT_WINDOW",
];

// Environment variables are process-global; every test starts clean.
fn clear_env() {
    for v in VARS { std::env::remove_var(v); }
}

#[test]
#[serial]
fn secret_from_env_database_defaulted() {
    clear_env();
    std::env::set_var("APP_ENV", "development");
    std::env::set_var("SECRET_KEY", "abc123");
    let cfg = load_config().expect("config");
    assert_eq!(cfg.secret_key.expose(), "abc123");
    assert_eq!(cfg.database_location, DEFAULT_DATABASE_URL);
    assert_eq!(cfg.rate_limit_backend_location, DEFAULT_RATE_LIMIT_URL);
    clear_env();
}

#[test]
#[serial]
fn every_supplied_variable_is_passed_through() {
    clear_env();
    let key = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";
    std::env::set_var("SECRET_KEY", "Key With Spaces ");
    std::env::set_var("DATABASE_URL", "postgres://inv:pw@db:5432/Inventory");
    std::env::set_var("FERNET_KEY", key);
    std::env::set_var("REDIS_URL", "redis://cache:6380/2");
    let cfg = load_config().expect("config");
    assert_eq!(cfg.secret_key.expose(), "Key With Spaces ");
    assert_eq!(cfg.database_location, "postgres://inv:pw@db:5432/Inventory");
    assert_eq!(cfg.encryption_key.encoded(), key);
    assert_eq!(cfg.rate_limit_backend_location, "redis://cache:6380/2");
    assert_eq!(cfg.encryption_key_source, KeySource::Environment);
    assert!(cfg.hsts_enabled, "production defaults to HSTS");
    clear_env();
}

#[test]
#[serial]
fn development_keys_change_between_loads_and_env_is_untouched() {
    clear_env();
    std::env::set_var("APP_ENV", "development");
    let first = load_config().expect("first");
    let second = load_config().expect("second");
    assert_ne!(first.secret_key.expose(), second.secret_key.expose());
    assert_ne!(first.encryption_key.raw(), second.encryption_key.raw());
    assert_eq!(first.encryption_key_source, KeySource::Generated);
    assert!(std::env::var("SECRET_KEY").is_err());
    assert!(std::env::var("FERNET_KEY").is_err());
    clear_env();
}

#[test]
#[serial]
fn production_without_secrets_refuses_to_load() {
    clear_env();
    let err = load_config().unwrap_err();
    assert!(matches!(err, ConfigError::Configuration { variable: "SECRET_KEY", .. }), "{err}");

    std::env::set_var("APP_ENV", "production");
    std::env::set_var("SECRET_KEY", "abc123");
    let err = load_config().unwrap_err();
    assert!(matches!(err, ConfigError::Configuration { variable: "FERNET_KEY", .. }), "{err}");
    clear_env();
}
