//src/db.rs
use crate::history::ExerciseHistory;
use crate::models::{CustomExerciseOverride, PlanDefaults, TraineeRecord, TrainingCatalog};
use crate::progress::ProgressLog;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

// Persisted keys, one JSON record each
pub const KEY_HISTORY: &str = "exercise_history";
pub const KEY_PROGRESS: &str = "daily_progress";
pub const KEY_DEFAULTS: &str = "exercise_defaults";
pub const KEY_CUSTOM_EXERCISES: &str = "custom_exercises";
pub const KEY_VOLUME: &str = "volume";
pub const KEY_FIRST_TIME_COMPLETED: &str = "first_time_completed";
pub const KEY_TRAINING_PLAN: &str = "training_plan";
pub const KEY_ACTIVE_SESSION: &str = "active_session";

const DB_FILE_NAME: &str = "session-coach.sqlite";
const APP_DATA_DIR: &str = "session-coach";
const DATA_ENV_VAR: &str = "SESSION_COACH_DATA_DIR";

// Custom Error type for DB operations
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database connection failed")]
    Connection(#[from] rusqlite::Error),
    #[error("Failed to get application data directory")]
    DataDir,
    #[error("I/O error accessing database file")]
    Io(#[from] std::io::Error),
    #[error("Database query failed: {0}")]
    QueryFailed(rusqlite::Error),
    #[error("Database write failed: {0}")]
    WriteFailed(rusqlite::Error),
    #[error("Failed to encode record '{key}': {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
}

/// Gets the path to the SQLite database file within the app's data directory.
pub fn get_db_path() -> Result<PathBuf, DbError> {
    let app_dir = match std::env::var(DATA_ENV_VAR).ok() {
        Some(dir) => PathBuf::from(dir),
        None => dirs::data_dir().ok_or(DbError::DataDir)?.join(APP_DATA_DIR),
    };
    if !app_dir.exists() {
        std::fs::create_dir_all(&app_dir)?;
    }
    Ok(app_dir.join(DB_FILE_NAME))
}

/// Opens a connection to the SQLite database.
pub fn open_db<P: AsRef<Path>>(path: P) -> Result<Connection, DbError> {
    Connection::open(path).map_err(DbError::Connection)
}

/// Initializes the key/value table if it doesn't exist.
pub fn init_db(conn: &Connection) -> Result<(), DbError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL -- JSON encoded record
        )",
        [],
    )
    .map_err(DbError::Connection)?;
    Ok(())
}

pub fn put(conn: &Connection, key: &str, value: &str) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO kv (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )
    .map_err(DbError::WriteFailed)?;
    Ok(())
}

pub fn get(conn: &Connection, key: &str) -> Result<Option<String>, DbError> {
    conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
        row.get(0)
    })
    .optional()
    .map_err(DbError::QueryFailed)
}

pub fn delete(conn: &Connection, key: &str) -> Result<bool, DbError> {
    let rows = conn
        .execute("DELETE FROM kv WHERE key = ?1", params![key])
        .map_err(DbError::WriteFailed)?;
    Ok(rows > 0)
}

/// Returns all `(key, value)` pairs whose key starts with `prefix`, ordered by key.
pub fn scan(conn: &Connection, prefix: &str) -> Result<Vec<(String, String)>, DbError> {
    let mut stmt = conn
        .prepare("SELECT key, value FROM kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")
        .map_err(DbError::QueryFailed)?;
    let rows = stmt
        .query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(DbError::QueryFailed)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(DbError::QueryFailed)
}

/// Typed repository over the key/value table.
///
/// Reads never fail: a missing or unreadable record comes back as the empty default
/// (logged). Writes return `DbError`.
pub struct LocalStore {
    conn: Connection,
}

impl LocalStore {
    /// Opens (and initializes) the store at `path`.
    pub fn init<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = open_db(path)?;
        init_db(&conn)?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory().map_err(DbError::Connection)?;
        init_db(&conn)?;
        Ok(Self { conn })
    }

    /// Closes the underlying connection.
    pub fn dispose(self) -> Result<(), DbError> {
        self.conn.close().map_err(|(_, e)| DbError::Connection(e))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn read<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let raw = match get(&self.conn, key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return T::default(),
            Err(e) => {
                warn!("Failed to read '{}' from local store, using empty value: {}", key, e);
                return T::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Corrupt record '{}' in local store, using empty value: {}", key, e);
            T::default()
        })
    }

    fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), DbError> {
        let raw = serde_json::to_string(value).map_err(|source| DbError::Encode {
            key: key.to_string(),
            source,
        })?;
        put(&self.conn, key, &raw)
    }

    pub fn load_history(&self) -> ExerciseHistory {
        self.read(KEY_HISTORY)
    }

    pub fn save_history(&self, history: &ExerciseHistory) -> Result<(), DbError> {
        self.write(KEY_HISTORY, history)
    }

    pub fn load_progress(&self) -> ProgressLog {
        self.read(KEY_PROGRESS)
    }

    pub fn save_progress(&self, progress: &ProgressLog) -> Result<(), DbError> {
        self.write(KEY_PROGRESS, progress)
    }

    pub fn load_defaults(&self) -> PlanDefaults {
        self.read(KEY_DEFAULTS)
    }

    pub fn save_defaults(&self, defaults: &PlanDefaults) -> Result<(), DbError> {
        self.write(KEY_DEFAULTS, defaults)
    }

    pub fn load_custom_exercises(&self) -> BTreeMap<String, CustomExerciseOverride> {
        self.read(KEY_CUSTOM_EXERCISES)
    }

    pub fn save_custom_exercises(
        &self,
        custom: &BTreeMap<String, CustomExerciseOverride>,
    ) -> Result<(), DbError> {
        self.write(KEY_CUSTOM_EXERCISES, custom)
    }

    /// Volume in 0..=100, 100 when never set.
    pub fn load_volume(&self) -> u8 {
        self.read::<Option<u8>>(KEY_VOLUME).unwrap_or(100).min(100)
    }

    pub fn save_volume(&self, volume: u8) -> Result<(), DbError> {
        self.write(KEY_VOLUME, &volume.min(100))
    }

    pub fn first_time_completed(&self) -> bool {
        self.read(KEY_FIRST_TIME_COMPLETED)
    }

    pub fn set_first_time_completed(&self, done: bool) -> Result<(), DbError> {
        self.write(KEY_FIRST_TIME_COMPLETED, &done)
    }

    pub fn load_training_plan(&self) -> Option<TrainingCatalog> {
        self.read(KEY_TRAINING_PLAN)
    }

    pub fn save_training_plan(&self, plan: &TrainingCatalog) -> Result<(), DbError> {
        self.write(KEY_TRAINING_PLAN, plan)
    }

    /// Raw access for the session controller, which owns the format.
    pub fn load_record<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.read::<Option<T>>(key)
    }

    pub fn save_record<T: Serialize>(&self, key: &str, value: &T) -> Result<(), DbError> {
        self.write(key, value)
    }

    pub fn remove_record(&self, key: &str) -> Result<bool, DbError> {
        delete(&self.conn, key)
    }

    /// Snapshot of everything the server keeps for the trainee.
    pub fn trainee_record(&self) -> TraineeRecord {
        TraineeRecord {
            defaults: self.load_defaults(),
            progress: self.load_progress().into_map(),
            history: self.load_history().into_map(),
            first_time_completed: self.first_time_completed(),
        }
    }

    /// Replaces local defaults, progress, history and the first-time flag wholesale.
    pub fn replace_with(&mut self, record: TraineeRecord) -> Result<(), DbError> {
        let tx = self.conn.transaction().map_err(DbError::Connection)?;
        for (key, raw) in [
            (KEY_DEFAULTS, encode(KEY_DEFAULTS, &record.defaults)?),
            (KEY_PROGRESS, encode(KEY_PROGRESS, &record.progress)?),
            (KEY_HISTORY, encode(KEY_HISTORY, &record.history)?),
            (
                KEY_FIRST_TIME_COMPLETED,
                encode(KEY_FIRST_TIME_COMPLETED, &record.first_time_completed)?,
            ),
        ] {
            put(&tx, key, &raw)?;
        }
        tx.commit().map_err(DbError::WriteFailed)
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<String, DbError> {
    serde_json::to_string(value).map_err(|source| DbError::Encode {
        key: key.to_string(),
        source,
    })
}
