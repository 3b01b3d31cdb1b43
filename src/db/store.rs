//! SQLite storage implementation.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

use super::models::{CheckResult, Target};
use crate::canon;

/// Timestamp serialization for database TEXT columns and page tokens.
/// Fixed-width UTC, so lexicographic order matches chronological order.
const TIME_FMT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Upper bound on rows returned by a single listing call.
pub const MAX_PAGE_SIZE: usize = 10_000;

/// Storage error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid page token")]
    InvalidPageToken,
    #[error("store is closed")]
    Closed,
}

/// Storage capability consumed by the scheduler and the API layer.
///
/// Implementations must be safe for concurrent use. Result writes are
/// at-least-once; readers must tolerate duplicate outcomes with identical
/// `(target_id, checked_at)`.
pub trait Storage: Send + Sync {
    /// Insert a target keyed by canonical `url`, or return the existing one.
    ///
    /// `url` must already be canonical. A non-empty `idempotency_key` that is
    /// already mapped short-circuits to the mapped target without touching
    /// the registry. The boolean is true iff a new target row was created by
    /// this call. A URL collision yields the existing target, never an error.
    fn create_target(&self, url: &str, idempotency_key: &str)
        -> Result<(Target, bool), StoreError>;

    /// List targets in ascending `(created_at, id)` order.
    ///
    /// `host` filters by exact canonical host when non-empty,
    /// case-insensitively. The returned token is `None` on the last page and
    /// otherwise resumes strictly after the last returned row.
    fn list_targets(
        &self,
        host: &str,
        limit: usize,
        page_token: Option<&str>,
    ) -> Result<(Vec<Target>, Option<String>), StoreError>;

    /// Probe outcomes for one target, newest first, bounded by `limit`.
    ///
    /// When `since` is set, only outcomes with `checked_at >= since` are
    /// returned.
    fn get_check_results(
        &self,
        target_id: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CheckResult>, StoreError>;

    /// Append one probe outcome.
    fn save_check_result(&self, result: &CheckResult) -> Result<(), StoreError>;

    /// Release the underlying resources. Safe to call more than once.
    fn close(&self) -> Result<(), StoreError>;
}

/// Thread-safe SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStorage {
    /// Open (or create) the database at the given path and apply migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))?;
            Ok(())
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self.conn.lock().unwrap();
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        f(conn)
    }
}

impl Storage for SqliteStorage {
    fn create_target(
        &self,
        url: &str,
        idempotency_key: &str,
    ) -> Result<(Target, bool), StoreError> {
        self.with_conn(|conn| {
            if !idempotency_key.is_empty() {
                let mapped = conn
                    .query_row(
                        "SELECT target_id FROM idempotency_keys WHERE key = ?1",
                        params![idempotency_key],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                if let Some(target_id) = mapped {
                    return Ok((get_target(conn, &target_id)?, false));
                }
            }

            let id = format!("t_{}", Uuid::new_v4());
            let created_at = Utc::now();
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO targets (id, url, host, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    id,
                    url,
                    canon::host_of(url),
                    created_at.format(TIME_FMT).to_string()
                ],
            )?;
            let is_new = inserted > 0;

            // Re-read by URL: on a collision the existing row wins.
            let target = conn.query_row(
                "SELECT id, url, created_at FROM targets WHERE url = ?1",
                params![url],
                map_target,
            )?;

            if !idempotency_key.is_empty() {
                conn.execute(
                    "INSERT OR IGNORE INTO idempotency_keys (key, target_id) VALUES (?1, ?2)",
                    params![idempotency_key, target.id],
                )?;
            }

            Ok((target, is_new))
        })
    }

    fn list_targets(
        &self,
        host: &str,
        limit: usize,
        page_token: Option<&str>,
    ) -> Result<(Vec<Target>, Option<String>), StoreError> {
        let limit = limit.min(MAX_PAGE_SIZE);
        let cursor = match page_token {
            Some(token) if !token.is_empty() => Some(decode_page_token(token)?),
            _ => None,
        };

        self.with_conn(|conn| {
            let mut clauses: Vec<&str> = Vec::new();
            let mut args: Vec<Box<dyn ToSql>> = Vec::new();

            if !host.is_empty() {
                clauses.push("host = ?");
                args.push(Box::new(host.to_ascii_lowercase()));
            }
            if let Some((created_at, id)) = cursor {
                clauses.push("(created_at > ? OR (created_at = ? AND id > ?))");
                args.push(Box::new(created_at.clone()));
                args.push(Box::new(created_at));
                args.push(Box::new(id));
            }

            let mut sql = String::from("SELECT id, url, created_at FROM targets");
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY created_at ASC, id ASC LIMIT ?");
            args.push(Box::new((limit + 1) as i64));

            let mut stmt = conn.prepare(&sql)?;
            let mut items = stmt
                .query_map(params_from_iter(args.iter().map(|a| &**a)), map_target)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            // The extra row only signals that another page exists; the token
            // encodes the last row actually returned.
            let next = if items.len() > limit {
                items.truncate(limit);
                items
                    .last()
                    .map(|t| encode_page_token(&t.created_at, &t.id))
            } else {
                None
            };

            Ok((items, next))
        })
    }

    fn get_check_results(
        &self,
        target_id: &str,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CheckResult>, StoreError> {
        let limit = limit.min(MAX_PAGE_SIZE) as i64;
        self.with_conn(|conn| {
            let results = match since {
                Some(since) => {
                    let mut stmt = conn.prepare(
                        "SELECT target_id, checked_at, status_code, latency_ms, error \
                         FROM check_results WHERE target_id = ?1 AND checked_at >= ?2 \
                         ORDER BY checked_at DESC, id ASC LIMIT ?3",
                    )?;
                    let rows = stmt
                        .query_map(
                            params![target_id, since.format(TIME_FMT).to_string(), limit],
                            map_check_result,
                        )?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT target_id, checked_at, status_code, latency_ms, error \
                         FROM check_results WHERE target_id = ?1 \
                         ORDER BY checked_at DESC, id ASC LIMIT ?2",
                    )?;
                    let rows = stmt
                        .query_map(params![target_id, limit], map_check_result)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
            };
            Ok(results)
        })
    }

    fn save_check_result(&self, result: &CheckResult) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO check_results (target_id, checked_at, status_code, latency_ms, error) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    result.target_id,
                    result.checked_at.format(TIME_FMT).to_string(),
                    result.status_code,
                    result.latency_ms,
                    result.error,
                ],
            )?;
            Ok(())
        })
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().unwrap();
        if let Some(conn) = guard.take() {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        }
        Ok(())
    }
}

fn get_target(conn: &Connection, id: &str) -> Result<Target, StoreError> {
    Ok(conn.query_row(
        "SELECT id, url, created_at FROM targets WHERE id = ?1",
        params![id],
        map_target,
    )?)
}

fn map_target(row: &rusqlite::Row<'_>) -> rusqlite::Result<Target> {
    let created_at: String = row.get(2)?;
    Ok(Target {
        id: row.get(0)?,
        url: row.get(1)?,
        created_at: parse_db_time(&created_at).unwrap_or_else(Utc::now),
    })
}

fn map_check_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<CheckResult> {
    let checked_at: String = row.get(1)?;
    Ok(CheckResult {
        target_id: row.get(0)?,
        checked_at: parse_db_time(&checked_at).unwrap_or_else(Utc::now),
        status_code: row.get(2)?,
        latency_ms: row.get(3)?,
        error: row.get(4)?,
    })
}

fn encode_page_token(created_at: &DateTime<Utc>, id: &str) -> String {
    general_purpose::STANDARD.encode(format!("{}|{}", created_at.format(TIME_FMT), id))
}

/// Decode a page token into the stored `(created_at, id)` representation.
fn decode_page_token(token: &str) -> Result<(String, String), StoreError> {
    let raw = general_purpose::STANDARD
        .decode(token)
        .map_err(|_| StoreError::InvalidPageToken)?;
    let text = String::from_utf8(raw).map_err(|_| StoreError::InvalidPageToken)?;
    let (ts, id) = text.split_once('|').ok_or(StoreError::InvalidPageToken)?;
    let parsed = DateTime::parse_from_rfc3339(ts).map_err(|_| StoreError::InvalidPageToken)?;
    Ok((
        parsed.with_timezone(&Utc).format(TIME_FMT).to_string(),
        id.to_string(),
    ))
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, TIME_FMT) {
        return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
