use std::env;
use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use regex::Regex;
use sea_orm::sea_query::{Alias, Expr, OnConflict, Query, SimpleExpr};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema,
};

use crate::error_handling::types::StorageError;
use crate::storage::db_entities as sessions;
use crate::storage::storage_trait::SessionHandler;
use crate::storage::types::{gc_cutoff, GcOutcome};

/// Relational backend storing one row per session in a named table.
///
/// The table takes the column layout of [`sessions::Model`] under whatever
/// name it is given, so several applications can share one database.
///
/// The handler contract is blocking, so every query is driven to completion
/// on a private current-thread runtime. Methods must therefore not be called
/// from inside another tokio runtime.
pub struct DatabaseStorage {
    // dropped before the runtime that drives it
    db: DatabaseConnection,
    rt: tokio::runtime::Runtime,
    table: String,
}

/// Plain SQL identifier: a letter or underscore, then up to 62 word characters.
pub fn is_valid_table_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("table name pattern is valid"))
        .is_match(name)
}

impl DatabaseStorage {
    /// Default database filename used in the application's working directory
    const DEFAULT_DB_FILE: &'static str = "sessions.sqlite3";

    pub const DEFAULT_TABLE: &'static str = "sessions";

    /// Create or open the database in the current working directory with the default filename
    pub fn new() -> Result<Self, StorageError> {
        let cwd = env::current_dir().map_err(|e| StorageError::SetupFailed(e.to_string()))?;
        Self::new_file(cwd.join(Self::DEFAULT_DB_FILE), Self::DEFAULT_TABLE)
    }

    pub fn new_file<P: AsRef<Path>>(path: P, table: &str) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                error!("Failed to create database dir {}: {}", parent.display(), e);
                StorageError::SetupFailed(e.to_string())
            })?;
        }
        Self::connect(&format!("sqlite://{}?mode=rwc", path.display()), table)
    }

    /// Connects to `url` and creates `table` if it is missing.
    pub fn connect(url: &str, table: &str) -> Result<Self, StorageError> {
        if !is_valid_table_name(table) {
            error!("Invalid session table name: {:?}", table);
            return Err(StorageError::SetupFailed(format!("invalid table name {:?}", table)));
        }

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StorageError::SetupFailed(e.to_string()))?;

        let mut opts = ConnectOptions::new(url.to_owned());
        // an in-memory SQLite database exists per connection
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        opts.max_connections(max_connections).sqlx_logging(false);

        let db = rt.block_on(Database::connect(opts)).map_err(|e| {
            error!("Failed to connect to session database: {}", e);
            StorageError::SetupFailed(e.to_string())
        })?;

        let storage = Self {
            db,
            rt,
            table: table.to_owned(),
        };
        storage.up()?;
        info!("DatabaseStorage initialized (table: {})", storage.table);
        Ok(storage)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn table_ref(&self) -> Alias {
        Alias::new(self.table.as_str())
    }

    /// Creates the session table when it does not exist yet.
    pub fn up(&self) -> Result<(), StorageError> {
        self.rt.block_on(async {
            let backend = self.db.get_database_backend();
            let mut stmt = Schema::new(backend).create_table_from_entity(sessions::Entity);
            stmt.table(self.table_ref()).if_not_exists();
            self.db.execute(backend.build(&stmt)).await.map_err(|e| {
                error!("Failed to create table {}: {}", self.table, e);
                StorageError::SetupFailed(e.to_string())
            })?;
            Ok(())
        })
    }

    fn fetch_contents(&self, session_id: &str) -> Result<Option<String>, StorageError> {
        self.rt.block_on(async {
            let stmt = Query::select()
                .columns([
                    sessions::Column::Id,
                    sessions::Column::Contents,
                    sessions::Column::LastActive,
                ])
                .from(self.table_ref())
                .and_where(Expr::col(sessions::Column::Id).eq(session_id))
                .to_owned();
            let backend = self.db.get_database_backend();
            let row = sessions::Entity::find()
                .from_raw_sql(backend.build(&stmt))
                .one(&self.db)
                .await
                .map_err(|e| {
                    error!("Failed to read session row: {}", e);
                    StorageError::ReadFailed
                })?;
            Ok(row.map(|r| r.contents))
        })
    }

    fn upsert(&self, session_id: &str, data: &str) -> Result<(), StorageError> {
        let row: [SimpleExpr; 3] = [session_id.into(), data.into(), Utc::now().into()];
        let mut stmt = Query::insert();
        stmt.into_table(self.table_ref())
            .columns([
                sessions::Column::Id,
                sessions::Column::Contents,
                sessions::Column::LastActive,
            ])
            .on_conflict(
                OnConflict::column(sessions::Column::Id)
                    .update_columns([sessions::Column::Contents, sessions::Column::LastActive])
                    .to_owned(),
            );
        stmt.values(row).map_err(|e| {
            error!("Failed to build session row: {}", e);
            StorageError::WriteFailed
        })?;

        self.rt.block_on(async {
            let backend = self.db.get_database_backend();
            self.db.execute(backend.build(&stmt)).await.map_err(|e| {
                error!("Failed to write session row: {}", e);
                StorageError::WriteFailed
            })?;
            Ok(())
        })
    }

    fn delete(&self, session_id: &str) -> Result<u64, StorageError> {
        self.rt.block_on(async {
            let stmt = Query::delete()
                .from_table(self.table_ref())
                .and_where(Expr::col(sessions::Column::Id).eq(session_id))
                .to_owned();
            let backend = self.db.get_database_backend();
            let result = self.db.execute(backend.build(&stmt)).await.map_err(|e| {
                error!("Failed to delete session row: {}", e);
                StorageError::DeleteFailed
            })?;
            Ok(result.rows_affected())
        })
    }

    fn delete_older_than(&self, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        self.rt.block_on(async {
            let stmt = Query::delete()
                .from_table(self.table_ref())
                .and_where(Expr::col(sessions::Column::LastActive).lt(older_than))
                .to_owned();
            let backend = self.db.get_database_backend();
            let result = self.db.execute(backend.build(&stmt)).await.map_err(|e| {
                error!("Failed to delete stale session rows: {}", e);
                StorageError::DeleteFailed
            })?;
            info!(
                "Removed {} stale session row(s) from {} (cutoff: {})",
                result.rows_affected(),
                self.table,
                older_than.to_rfc3339()
            );
            Ok(result.rows_affected() as usize)
        })
    }
}

impl SessionHandler for DatabaseStorage {
    fn open(&self, _save_path: &str, _session_name: &str) -> bool {
        true
    }

    // The connection is kept: a regenerate may still write after a close.
    fn close(&self) -> bool {
        true
    }

    fn read(&self, session_id: &str) -> String {
        self.fetch_contents(session_id).ok().flatten().unwrap_or_default()
    }

    fn write(&self, session_id: &str, data: &str) -> bool {
        self.upsert(session_id, data).is_ok()
    }

    fn destroy(&self, session_id: &str) -> bool {
        match self.delete(session_id) {
            Ok(n) => {
                debug!("Deleted {} row(s) for session", n);
                true
            }
            Err(_) => false,
        }
    }

    fn gc(&self, max_lifetime: u64) -> GcOutcome {
        match self.delete_older_than(gc_cutoff(max_lifetime)) {
            Ok(n) => GcOutcome::Removed(n),
            Err(_) => GcOutcome::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn temp_db() -> (DatabaseStorage, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage =
            DatabaseStorage::new_file(dir.path().join("test.sqlite3"), DatabaseStorage::DEFAULT_TABLE)
                .unwrap();
        (storage, dir)
    }

    fn backdate(storage: &DatabaseStorage, session_id: &str, secs: i64) {
        let stmt = Query::update()
            .table(storage.table_ref())
            .value(sessions::Column::LastActive, Utc::now() - Duration::seconds(secs))
            .and_where(Expr::col(sessions::Column::Id).eq(session_id))
            .to_owned();
        storage.rt.block_on(async {
            let backend = storage.db.get_database_backend();
            storage.db.execute(backend.build(&stmt)).await.unwrap();
        });
    }

    #[test]
    fn test_db_write_and_read() {
        let (storage, _dir) = temp_db();
        assert!(storage.open("", "session"));
        let blob = r#"{"cart":{"items":[1,2,3]},"n":1.5}"#;
        assert!(storage.write("abc", blob));
        assert_eq!(storage.read("abc"), blob);
        assert!(storage.close());
    }

    #[test]
    fn test_db_write_is_upsert() {
        let (storage, _dir) = temp_db();
        assert!(storage.write("abc", r#"{"v":1}"#));
        assert!(storage.write("abc", r#"{"v":2}"#));
        assert_eq!(storage.read("abc"), r#"{"v":2}"#);
    }

    #[test]
    fn test_db_read_missing_is_empty() {
        let (storage, _dir) = temp_db();
        assert_eq!(storage.read("nope"), "");
    }

    #[test]
    fn test_db_destroy_is_idempotent() {
        let (storage, _dir) = temp_db();
        assert!(storage.write("abc", "{}"));
        assert!(storage.destroy("abc"));
        assert_eq!(storage.read("abc"), "");
        assert!(storage.destroy("abc"));
    }

    #[test]
    fn test_db_schema_creation_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("twice.sqlite3");
        {
            let storage = DatabaseStorage::new_file(&path, "sessions").unwrap();
            assert!(storage.write("persisted", r#"{"a":true}"#));
        }
        let reopened = DatabaseStorage::new_file(&path, "sessions").unwrap();
        reopened.up().unwrap();
        assert_eq!(reopened.read("persisted"), r#"{"a":true}"#);
    }

    #[test]
    fn test_db_in_memory_connection() {
        let storage = DatabaseStorage::connect("sqlite::memory:", "sessions").unwrap();
        assert!(storage.write("m", r#"{"x":1}"#));
        assert_eq!(storage.read("m"), r#"{"x":1}"#);
    }

    #[test]
    fn test_db_unreachable_database_is_setup_error() {
        let dir = TempDir::new().unwrap();
        let url = format!(
            "sqlite://{}?mode=ro",
            dir.path().join("missing").join("db.sqlite3").display()
        );
        let result = DatabaseStorage::connect(&url, "sessions");
        assert!(matches!(result, Err(StorageError::SetupFailed(_))));
    }

    #[test]
    fn test_db_gc_removes_only_stale_rows() {
        let (storage, _dir) = temp_db();
        assert!(storage.write("old", "{}"));
        assert!(storage.write("older", "{}"));
        assert!(storage.write("fresh", "{}"));
        backdate(&storage, "old", 3700);
        backdate(&storage, "older", 86400);
        backdate(&storage, "fresh", 30);

        assert_eq!(storage.gc(3600), GcOutcome::Removed(2));
        assert_eq!(storage.read("old"), "");
        assert_eq!(storage.read("older"), "");
        assert_eq!(storage.read("fresh"), "{}");
    }

    #[test]
    fn test_db_write_refreshes_last_active() {
        let (storage, _dir) = temp_db();
        assert!(storage.write("abc", "{}"));
        backdate(&storage, "abc", 7200);
        assert!(storage.write("abc", r#"{"touched":true}"#));
        assert_eq!(storage.gc(3600), GcOutcome::Removed(0));
        assert_eq!(storage.read("abc"), r#"{"touched":true}"#);
    }

    #[test]
    fn test_db_tables_in_one_file_are_isolated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.sqlite3");
        let shop = DatabaseStorage::new_file(&path, "shop_sessions").unwrap();
        let admin = DatabaseStorage::new_file(&path, "admin_sessions").unwrap();
        assert_eq!(shop.table(), "shop_sessions");

        assert!(shop.write("abc", r#"{"app":"shop"}"#));
        assert!(admin.write("abc", r#"{"app":"admin"}"#));
        assert_eq!(shop.read("abc"), r#"{"app":"shop"}"#);
        assert_eq!(admin.read("abc"), r#"{"app":"admin"}"#);

        backdate(&shop, "abc", 7200);
        assert_eq!(admin.gc(3600), GcOutcome::Removed(0));
        assert_eq!(shop.gc(3600), GcOutcome::Removed(1));
        assert_eq!(shop.read("abc"), "");
        assert_eq!(admin.read("abc"), r#"{"app":"admin"}"#);

        assert!(admin.destroy("abc"));
        assert_eq!(admin.read("abc"), "");
    }

    #[test]
    fn test_db_rejects_unsafe_table_name() {
        for name in ["", "1sessions", "sessions; DROP TABLE x", "my-sessions"] {
            let result = DatabaseStorage::connect("sqlite::memory:", name);
            assert!(matches!(result, Err(StorageError::SetupFailed(_))), "{name}");
        }
        assert!(is_valid_table_name("_app_sessions2"));
    }
}
