use std::borrow::Cow;

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tracing::info;

use crate::error::StorageError;

/// Relational storage handle. The pool connects on first use, so building it
/// at startup never touches the database.
#[derive(Clone)]
pub struct Storage {
    pool: AnyPool,
    backend: String,
}

impl Storage {
    /// Must be called from within a Tokio runtime.
    ///
    /// `location` is the configured `DATABASE_URL` as given. SQLite locations
    /// follow the `sqlite:///relative.db` / `sqlite:////absolute.db` convention
    /// and the file is created on first connect.
    pub fn connect_lazy(location: &str) -> Result<Self, StorageError> {
        sqlx::any::install_default_drivers();
        let backend = location
            .split_once(':')
            .map(|(scheme, _)| scheme.to_string())
            .ok_or_else(|| StorageError::InvalidLocation("missing scheme".into()))?;
        let url = driver_url(location);
        let pool = AnyPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&url)
            .map_err(|e| StorageError::InvalidLocation(e.to_string()))?;
        info!(backend = %backend, "storage pool configured");
        Ok(Self { pool, backend })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// URL scheme of the configured database, e.g. `sqlite` or `postgres`.
    pub fn backend(&self) -> &str {
        &self.backend
    }
}

/// sqlx reads everything after `sqlite://` as the path, so the conventional
/// third slash would make every path absolute. Drop it, and ask for the file
/// to be created unless the location picks its own mode.
fn driver_url(location: &str) -> Cow<'_, str> {
    let Some(rest) = location.strip_prefix("sqlite://") else {
        return Cow::Borrowed(location);
    };
    let rest = rest.strip_prefix('/').unwrap_or(rest);
    let mut url = format!("sqlite://{rest}");
    if !url.contains("mode=") {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str("mode=rwc");
    }
    Cow::Owned(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn default_location_builds_without_connecting() {
        let storage = Storage::connect_lazy(crate::config::DEFAULT_DATABASE_URL).unwrap();
        assert_eq!(storage.backend(), "sqlite");
    }

    #[actix_web::test]
    async fn location_without_scheme_is_rejected() {
        assert!(Storage::connect_lazy("inventory.db").is_err());
    }

    #[test]
    fn sqlite_paths_keep_their_meaning() {
        assert_eq!(driver_url("sqlite:///inventory.db"), "sqlite://inventory.db?mode=rwc");
        assert_eq!(driver_url("sqlite:////var/lib/app.db"), "sqlite:///var/lib/app.db?mode=rwc");
        assert_eq!(driver_url("sqlite:///data/app.db?cache=shared"), "sqlite://data/app.db?cache=shared&mode=rwc");
        assert_eq!(driver_url("sqlite:///ro.db?mode=ro"), "sqlite://ro.db?mode=ro");
        assert_eq!(driver_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(driver_url("postgres://u:p@db/app"), "postgres://u:p@db/app");
    }

    #[actix_web::test]
    async fn in_memory_database_accepts_connections() {
        let storage = Storage::connect_lazy("sqlite::memory:").unwrap();
        let conn = storage.pool().acquire().await;
        assert!(conn.is_ok(), "{:?}", conn.err());
    }
}
