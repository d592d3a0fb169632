//! Append-only SQLite log of session turns.
//!
//! Each call to [`EventLog::save_session`] receives the full, authoritative
//! turn list of a session and inserts only the suffix beyond the highest
//! `event_index` already stored for it (the watermark).

mod error;

pub use error::StoreResult;

use crate::entity::messages;
use crate::session::{Session, Turn};
use sea_orm::*;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const EVENT_TIMESTAMP_KEY: &str = "event_timestamp";
const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    event_index INTEGER NOT NULL,
    role TEXT,
    text TEXT,
    timestamp TEXT NOT NULL,
    metadata TEXT
)";
const CREATE_INDEX_SQL: &str =
    "CREATE INDEX IF NOT EXISTS idx_messages_session_event ON messages (session_id, event_index)";

pub struct EventLog {
    db_url: String,
    db_path: PathBuf,
}

impl EventLog {
    pub async fn open(db_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let log = Self {
            db_url: format!("sqlite:{}?mode=rwc", db_path.display()),
            db_path: db_path.to_path_buf(),
        };
        log.init().await?;

        info!("Event log ready at {}", db_path.display());
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Creates the `messages` table and its lookup index if missing. Safe to
    /// call any number of times.
    pub async fn init(&self) -> StoreResult<()> {
        let db_url = self.db_url.clone();

        tokio::task::spawn_blocking(move || -> StoreResult<()> {
            let db = connect(&db_url)?;
            db.query_one_raw(Statement::from_string(
                DbBackend::Sqlite,
                "PRAGMA journal_mode=WAL",
            ))?;

            db.execute_unprepared(CREATE_TABLE_SQL)?;
            db.execute_unprepared(CREATE_INDEX_SQL)?;

            Ok(())
        })
        .await?
    }

    /// Highest stored `event_index` for the session, or -1 when it has none.
    pub async fn max_saved_index(&self, session_id: &str) -> StoreResult<i64> {
        let db_url = self.db_url.clone();
        let session_id = session_id.to_string();

        tokio::task::spawn_blocking(move || -> StoreResult<i64> {
            let db = connect(&db_url)?;
            Ok(watermark(&db, &session_id)?)
        })
        .await?
    }

    /// Inserts every turn positioned past the watermark in one transaction and
    /// returns how many rows were written.
    pub async fn save_session(&self, session: &Session) -> StoreResult<usize> {
        let session_id = session.session_id().to_string();
        let candidates: Vec<PendingRow> = session
            .events
            .iter()
            .enumerate()
            .map(|(idx, turn)| PendingRow::from_turn(idx as i64, turn))
            .collect();

        let db_url = self.db_url.clone();
        let sid = session_id.clone();

        let inserted = tokio::task::spawn_blocking(move || -> StoreResult<usize> {
            let db = connect(&db_url)?;

            // The watermark is read inside the write transaction so a
            // concurrent writer cannot commit rows from the same snapshot.
            let txn = db.begin()?;
            let saved = watermark(&txn, &sid)?;

            let mut inserted = 0;
            for row in candidates.into_iter().filter(|r| r.event_index > saved) {
                let record = messages::ActiveModel {
                    id: NotSet,
                    session_id: Set(sid.clone()),
                    event_index: Set(row.event_index),
                    role: Set(row.role),
                    text: Set(row.text),
                    timestamp: Set(capture_timestamp()),
                    metadata: Set(Some(row.metadata)),
                };
                messages::Entity::insert(record).exec(&txn)?;
                inserted += 1;
            }

            txn.commit()?;
            Ok(inserted)
        })
        .await??;

        debug!("Saved {} new event(s) for session {}", inserted, session_id);
        Ok(inserted)
    }

    pub async fn session_events(&self, session_id: &str) -> StoreResult<Vec<StoredEvent>> {
        let db_url = self.db_url.clone();
        let session_id = session_id.to_string();

        tokio::task::spawn_blocking(move || -> StoreResult<Vec<StoredEvent>> {
            let db = connect(&db_url)?;
            let rows = messages::Entity::find()
                .filter(messages::Column::SessionId.eq(session_id.as_str()))
                .order_by_asc(messages::Column::EventIndex)
                .order_by_asc(messages::Column::Id)
                .all(&db)?;

            Ok(rows.into_iter().map(StoredEvent::from).collect())
        })
        .await?
    }
}

/// `synchronous` is a per-connection setting, so it is applied on every
/// acquisition.
fn connect(db_url: &str) -> StoreResult<DatabaseConnection> {
    let db = Database::connect(db_url)?;
    db.execute_unprepared("PRAGMA synchronous=NORMAL")?;
    Ok(db)
}

fn watermark<C: ConnectionTrait>(db: &C, session_id: &str) -> Result<i64, DbErr> {
    let max: Option<Option<i64>> = messages::Entity::find()
        .select_only()
        .column_as(messages::Column::EventIndex.max(), "max_index")
        .filter(messages::Column::SessionId.eq(session_id))
        .into_tuple()
        .one(db)?;

    Ok(max.flatten().unwrap_or(-1))
}

fn capture_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}

struct PendingRow {
    event_index: i64,
    role: Option<String>,
    text: Option<String>,
    metadata: String,
}

impl PendingRow {
    fn from_turn(event_index: i64, turn: &Turn) -> Self {
        let mut metadata = Map::new();
        if let Some(ts) = turn.timestamp {
            metadata.insert(EVENT_TIMESTAMP_KEY.into(), Value::String(format_epoch_secs(ts)));
        }

        Self {
            event_index,
            role: turn.role().map(str::to_string),
            text: turn.text().map(str::to_string),
            metadata: Value::Object(metadata).to_string(),
        }
    }
}

/// Whole seconds keep a trailing `.0` so stored values stay float-shaped.
fn format_epoch_secs(ts: f64) -> String {
    if ts.is_finite() && ts.fract() == 0.0 {
        format!("{:.1}", ts)
    } else {
        ts.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub event_index: i64,
    pub role: Option<String>,
    pub text: Option<String>,
    pub timestamp: String,
    pub metadata: Map<String, Value>,
}

impl From<messages::Model> for StoredEvent {
    fn from(r: messages::Model) -> Self {
        Self {
            event_index: r.event_index,
            role: r.role,
            text: r.text,
            timestamp: r.timestamp,
            metadata: decode_metadata(r.metadata.as_deref()),
        }
    }
}

fn decode_metadata(raw: Option<&str>) -> Map<String, Value> {
    raw.filter(|s| !s.trim().is_empty())
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default()
}
