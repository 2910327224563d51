use inventory::config::DEFAULT_DATABASE_URL;
use inventory::storage::Storage;
use serial_test::serial;
use std::env;
use std::path::PathBuf;

struct CwdGuard(PathBuf);

impl Drop for CwdGuard {
    fn drop(&mut self) {
        let _ = env::set_current_dir(&self.0);
    }
}

#[actix_web::test]
#[serial]
async fn default_location_creates_database_in_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    let _guard = CwdGuard(env::current_dir().unwrap());
    env::set_current_dir(dir.path()).unwrap();

    let storage = Storage::connect_lazy(DEFAULT_DATABASE_URL).unwrap();
    let conn = storage.pool().acquire().await;
    assert!(conn.is_ok(), "default sqlite location failed to connect: {:?}", conn.err());
    assert!(dir.path().join("inventory.db").exists());
}

#[actix_web::test]
#[serial]
async fn four_slash_location_is_absolute() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absolute.db");
    let location = format!("sqlite:///{}", path.display());

    let storage = Storage::connect_lazy(&location).unwrap();
    let conn = storage.pool().acquire().await;
    assert!(conn.is_ok(), "{:?}", conn.err());
    assert!(path.exists());
}
