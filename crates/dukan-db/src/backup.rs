//! # Backup and Restore
//!
//! File-level copies of the live database, taken and restored inside one
//! exclusive serializer slot so no other operation sees a half-copied file.
//!
//! ## Backup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  create_backup()                                  (one exclusive slot)  │
//! │                                                                         │
//! │  1. PRAGMA wal_checkpoint(FULL)      best-effort, busy → non-fatal      │
//! │  2. source exists and is non-empty   otherwise fail                     │
//! │  3. copy dukan.db → backups/dukan_YYYYMMDD_HHMMSS.db                    │
//! │  4. copy -wal / -shm if present      best-effort, stale ones removed    │
//! │  5. copy to the downloads directory  best-effort, reported separately,  │
//! │     main file and sidecars                                              │
//! │  6. INSERT backup_logs               best-effort                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Restore
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  restore_backup(source)                           (one exclusive slot)  │
//! │                                                                         │
//! │  1. source exists and is non-empty   otherwise fail, live db untouched  │
//! │  2. close the handle                                                    │
//! │  3. delete live main file + sidecars                                    │
//! │  4. copy source (+ sidecars)                                            │
//! │  5. SQLite header check              mismatch → non-fatal warning       │
//! │  6. reopen (schema re-applied)                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::ffi::OsString;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::connection::ConnectionManager;
use crate::error::{DbError, DbResult};
use crate::repository::backup_log;
use crate::store::Store;

/// First 16 bytes of every SQLite database file.
pub const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

const SIDECARS: [&str; 2] = ["-wal", "-shm"];

// =============================================================================
// Reports
// =============================================================================

/// Best-effort step of a backup or restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BackupStep {
    Checkpoint,
    SidecarCopy,
    PublicCopy,
    BackupLog,
    HeaderCheck,
}

/// A best-effort step that failed without failing the operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NonFatalError {
    pub step: BackupStep,
    pub message: String,
}

impl fmt::Display for NonFatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.step, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupReport {
    /// The backup file in the backups directory.
    pub path: PathBuf,
    /// The public copy, when one was configured and written.
    pub public_copy: Option<PathBuf>,
    pub non_fatal: Vec<NonFatalError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub source: PathBuf,
    pub bytes: u64,
    pub non_fatal: Vec<NonFatalError>,
}

/// A backup file found in the backups directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl Store {
    /// Writes a consistent copy of the database to the backups directory.
    ///
    /// Only a missing or empty source, or a failed main-file copy, fails the
    /// call. Everything else ends up in [`BackupReport::non_fatal`].
    pub async fn create_backup(&self) -> DbResult<BackupReport> {
        self.exclusive(|manager| Box::pin(backup_in_slot(manager))).await
    }

    /// Replaces the live database with `source` and reopens it.
    pub async fn restore_backup(&self, source: impl AsRef<Path>) -> DbResult<RestoreReport> {
        let source = source.as_ref().to_path_buf();
        self.exclusive(move |manager| Box::pin(restore_in_slot(manager, source)))
            .await
    }

    /// Backup files in the backups directory, newest first.
    pub async fn list_backups(&self) -> DbResult<Vec<BackupFile>> {
        list_backup_files(&self.config().backups_path()).await
    }
}

// =============================================================================
// Backup
// =============================================================================

async fn backup_in_slot(manager: &mut ConnectionManager) -> DbResult<BackupReport> {
    let config = manager.config().clone();
    let mut non_fatal = Vec::new();

    match checkpoint(manager).await {
        Ok(()) => {}
        Err(message) => {
            warn!(%message, "WAL checkpoint incomplete, backing up with sidecars");
            non_fatal.push(NonFatalError {
                step: BackupStep::Checkpoint,
                message,
            });
        }
    }

    let source = config.database_path();
    let size = file_size(&source).await?;
    if size == 0 {
        return Err(DbError::Backup(format!("{} is empty", source.display())));
    }

    let backups = config.backups_path();
    tokio::fs::create_dir_all(&backups)
        .await
        .map_err(|e| DbError::Backup(format!("cannot create {}: {e}", backups.display())))?;

    let file_name = format!(
        "{}_{}.db",
        config.database_stem(),
        Local::now().format("%Y%m%d_%H%M%S")
    );
    let dest = backups.join(&file_name);
    copy_file(&source, &dest).await?;
    copy_sidecars(&source, &dest, &mut non_fatal).await;

    let public_copy = match &config.downloads_dir {
        Some(dir) => match public_copy(&source, &dir.join(&file_name)).await {
            Ok(path) => {
                // Frames a blocked checkpoint left behind live only in the WAL
                copy_sidecars(&source, &path, &mut non_fatal).await;
                Some(path)
            }
            Err(message) => {
                warn!(%message, "Public backup copy failed");
                non_fatal.push(NonFatalError {
                    step: BackupStep::PublicCopy,
                    message,
                });
                None
            }
        },
        None => None,
    };

    let record = backup_log::new_record(
        &dest.to_string_lossy(),
        "local",
        Some(serde_json::json!({
            "size": size,
            "publicCopy": public_copy.as_ref().map(|p| p.to_string_lossy().into_owned()),
        })),
    );
    let logged = match manager.connection().await {
        Ok(conn) => backup_log::insert(conn, &record).await,
        Err(e) => Err(e),
    };
    if let Err(e) = logged {
        warn!(error = %e, "Could not record backup log");
        non_fatal.push(NonFatalError {
            step: BackupStep::BackupLog,
            message: e.to_string(),
        });
    }

    info!(
        path = %dest.display(),
        bytes = size,
        public_copy = public_copy.is_some(),
        warnings = non_fatal.len(),
        "Backup created"
    );

    Ok(BackupReport {
        path: dest,
        public_copy,
        non_fatal,
    })
}

/// Folds the WAL into the main file. `Err` carries a description of why the
/// checkpoint did not complete.
async fn checkpoint(manager: &mut ConnectionManager) -> Result<(), String> {
    let conn = manager.connection().await.map_err(|e| e.to_string())?;
    let (busy, log_frames, checkpointed): (i64, i64, i64) =
        sqlx::query_as("PRAGMA wal_checkpoint(FULL)")
            .fetch_one(conn)
            .await
            .map_err(|e| e.to_string())?;

    if busy != 0 {
        return Err(format!(
            "checkpoint blocked: {checkpointed} of {log_frames} WAL frames copied"
        ));
    }
    Ok(())
}

async fn public_copy(source: &Path, dest: &Path) -> Result<PathBuf, String> {
    if let Some(dir) = dest.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| format!("cannot create {}: {e}", dir.display()))?;
    }
    tokio::fs::copy(source, dest)
        .await
        .map_err(|e| format!("copy to {}: {e}", dest.display()))?;
    Ok(dest.to_path_buf())
}

// =============================================================================
// Restore
// =============================================================================

async fn restore_in_slot(manager: &mut ConnectionManager, source: PathBuf) -> DbResult<RestoreReport> {
    let size = file_size(&source).await?;
    if size == 0 {
        return Err(DbError::Backup(format!("{} is empty", source.display())));
    }

    let dest = manager.database_path();
    info!(source = %source.display(), dest = %dest.display(), "Restoring backup");

    if let Err(e) = manager.close().await {
        warn!(error = %e, "Closing before restore failed, dropping handle");
        manager.invalidate();
    }

    remove_if_exists(&dest).await?;
    for suffix in SIDECARS {
        remove_if_exists(&sidecar(&dest, suffix)).await?;
    }

    let mut non_fatal = Vec::new();
    copy_file(&source, &dest).await?;
    copy_sidecars(&source, &dest, &mut non_fatal).await;

    let bytes = file_size(&dest).await?;
    if bytes == 0 {
        return Err(DbError::Backup(format!("restored file {} is empty", dest.display())));
    }

    match has_sqlite_header(&dest).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(path = %dest.display(), "Restored file lacks the SQLite header");
            non_fatal.push(NonFatalError {
                step: BackupStep::HeaderCheck,
                message: "file does not start with the SQLite header".to_string(),
            });
        }
        Err(e) => {
            warn!(error = %e, "Could not read restored file header");
            non_fatal.push(NonFatalError {
                step: BackupStep::HeaderCheck,
                message: e.to_string(),
            });
        }
    }

    manager.connection().await?;
    info!(bytes, warnings = non_fatal.len(), "Backup restored");

    Ok(RestoreReport {
        source,
        bytes,
        non_fatal,
    })
}

async fn has_sqlite_header(path: &Path) -> std::io::Result<bool> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut header = [0u8; 16];
    match file.read_exact(&mut header).await {
        Ok(_) => Ok(&header == SQLITE_HEADER),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

// =============================================================================
// Listing
// =============================================================================

async fn list_backup_files(dir: &Path) -> DbResult<Vec<BackupFile>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("db") {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        files.push(BackupFile {
            path,
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }

    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.path.cmp(&a.path)));
    Ok(files)
}

// =============================================================================
// File Helpers
// =============================================================================

/// `<path>-wal`, `<path>-shm`.
fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

async fn file_size(path: &Path) -> DbResult<u64> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(DbError::Backup(format!("{} does not exist", path.display())))
        }
        Err(e) => Err(e.into()),
    }
}

async fn copy_file(source: &Path, dest: &Path) -> DbResult<u64> {
    tokio::fs::copy(source, dest).await.map_err(|e| {
        DbError::Backup(format!("copy {} → {}: {e}", source.display(), dest.display()))
    })
}

/// Copies the `-wal`/`-shm` files of `source` next to `dest`.
///
/// Sidecars already next to `dest` are removed first: a backup that
/// overwrote an older one from the same second must not pick up its WAL.
async fn copy_sidecars(source: &Path, dest: &Path, non_fatal: &mut Vec<NonFatalError>) {
    for suffix in SIDECARS {
        let to = sidecar(dest, suffix);
        if let Err(e) = remove_if_exists(&to).await {
            warn!(path = %to.display(), error = %e, "Could not remove stale sidecar");
            non_fatal.push(NonFatalError {
                step: BackupStep::SidecarCopy,
                message: e.to_string(),
            });
            continue;
        }

        let from = sidecar(source, suffix);
        match tokio::fs::try_exists(&from).await {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => {
                non_fatal.push(NonFatalError {
                    step: BackupStep::SidecarCopy,
                    message: format!("{}: {e}", from.display()),
                });
                continue;
            }
        }

        if let Err(e) = tokio::fs::copy(&from, &to).await {
            warn!(from = %from.display(), error = %e, "Sidecar copy failed");
            non_fatal.push(NonFatalError {
                step: BackupStep::SidecarCopy,
                message: format!("{}: {e}", from.display()),
            });
        }
    }
}

async fn remove_if_exists(path: &Path) -> DbResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DbError::Backup(format!("cannot remove {}: {e}", path.display()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::test_support::{single_product, temp_store};
    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::{ConnectOptions, Connection};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_sidecar_names() {
        let path = Path::new("/data/dukan_20261019_101500.db");
        assert_eq!(
            sidecar(path, "-wal"),
            PathBuf::from("/data/dukan_20261019_101500.db-wal")
        );
    }

    #[tokio::test]
    async fn test_backup_then_restore() {
        let (_dir, store) = temp_store().await;
        store.products().add(single_product("Tea", 12.0)).await.unwrap();

        let report = store.create_backup().await.unwrap();
        assert!(report.non_fatal.is_empty(), "{:?}", report.non_fatal);
        let name = report.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("dukan_") && name.ends_with(".db"));
        assert_eq!(store.backup_logs().list_backup_logs().await.unwrap().len(), 1);

        store.products().add(single_product("Coffee", 3.0)).await.unwrap();
        assert_eq!(store.products().get_all().await.unwrap().len(), 2);

        let restored = store.restore_backup(&report.path).await.unwrap();
        assert!(restored.bytes > 0);
        assert!(restored.non_fatal.is_empty());

        let products = store.products().get_all().await.unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name, "Tea");
    }

    #[tokio::test]
    async fn test_backup_succeeds_when_checkpoint_is_blocked() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::new(dir.path().join("data"))
            .downloads_dir(dir.path().join("Downloads"))
            .busy_timeout(Duration::from_millis(50));
        let store = Store::open(config.clone()).await.unwrap();

        // A reader holding an old snapshot keeps FULL from completing
        let mut reader = SqliteConnectOptions::new()
            .filename(config.database_path())
            .connect()
            .await
            .unwrap();
        sqlx::query("BEGIN").execute(&mut reader).await.unwrap();
        let _: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&mut reader)
            .await
            .unwrap();

        store.products().add(single_product("Salt", 5.0)).await.unwrap();

        let report = store.create_backup().await.unwrap();
        assert!(report
            .non_fatal
            .iter()
            .any(|e| e.step == BackupStep::Checkpoint));
        assert!(tokio::fs::metadata(&report.path).await.unwrap().len() > 0);
        let public = report.public_copy.clone().unwrap();
        assert!(tokio::fs::try_exists(sidecar(&public, "-wal")).await.unwrap());

        sqlx::query("ROLLBACK").execute(&mut reader).await.unwrap();
        reader.close().await.unwrap();

        // Both copies hold the row that was only in the WAL at backup time
        store.products().add(single_product("Pepper", 1.0)).await.unwrap();
        store.restore_backup(&report.path).await.unwrap();
        let names: Vec<String> = store
            .products()
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, ["Salt"]);

        store.restore_backup(&public).await.unwrap();
        let products = store.products().get_all().await.unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name, "Salt");
    }

    #[tokio::test]
    async fn test_stale_sidecars_are_replaced() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("dukan.db");
        let dest = dir.path().join("dukan_20261019_101500.db");
        tokio::fs::write(&source, b"main").await.unwrap();
        tokio::fs::write(sidecar(&source, "-shm"), b"fresh shm").await.unwrap();
        tokio::fs::write(sidecar(&dest, "-wal"), b"older backup").await.unwrap();
        tokio::fs::write(sidecar(&dest, "-shm"), b"older shm").await.unwrap();

        let mut non_fatal = Vec::new();
        copy_sidecars(&source, &dest, &mut non_fatal).await;

        assert!(non_fatal.is_empty(), "{non_fatal:?}");
        assert!(!tokio::fs::try_exists(sidecar(&dest, "-wal")).await.unwrap());
        assert_eq!(tokio::fs::read(sidecar(&dest, "-shm")).await.unwrap(), b"fresh shm");
    }

    #[tokio::test]
    async fn test_public_copy_is_reported() {
        let dir = TempDir::new().unwrap();
        let downloads = dir.path().join("Downloads").join("Dukan");
        let store = Store::open(StoreConfig::new(dir.path().join("data")).downloads_dir(&downloads))
            .await
            .unwrap();

        let report = store.create_backup().await.unwrap();
        let public = report.public_copy.unwrap();
        assert!(public.starts_with(&downloads));
        assert!(has_sqlite_header(&public).await.unwrap());
    }

    #[tokio::test]
    async fn test_restore_rejects_empty_file_and_keeps_live_data() {
        let (dir, store) = temp_store().await;
        store.products().add(single_product("Tea", 12.0)).await.unwrap();

        let empty = dir.path().join("empty.db");
        tokio::fs::write(&empty, b"").await.unwrap();

        let err = store.restore_backup(&empty).await.unwrap_err();
        assert!(matches!(err, DbError::Backup(_)));
        assert_eq!(store.products().get_all().await.unwrap().len(), 1);

        let missing = store.restore_backup(dir.path().join("nope.db")).await.unwrap_err();
        assert!(matches!(missing, DbError::Backup(_)));
    }

    #[tokio::test]
    async fn test_list_backups_newest_first() {
        let (_dir, store) = temp_store().await;
        assert!(store.list_backups().await.unwrap().is_empty());

        let first = store.create_backup().await.unwrap();
        // Backup names have one-second resolution
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let second = store.create_backup().await.unwrap();

        let listed = store.list_backups().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].path, second.path);
        assert_eq!(listed[1].path, first.path);
    }
}
