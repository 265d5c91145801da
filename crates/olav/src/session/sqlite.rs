//! Durable thread store on SQLite.
//!
//! One connection behind a mutex, driven from `spawn_blocking` so the
//! async executor never blocks on disk. Messages are append-only: `save`
//! upserts the thread row and inserts only the message tail.

use crate::error::{OlavError, Result};
use crate::session::store::{ThreadStore, ThreadSummary};
use crate::session::thread::{Interrupt, Message, Role, Thread, ThreadState};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Clone)]
pub struct SqliteThreadStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteThreadStore {
    pub async fn connect(path: PathBuf) -> Result<Self> {
        let conn = tokio::task::spawn_blocking(move || -> rusqlite::Result<Connection> {
            let conn = Connection::open(&path)?;
            conn.execute("PRAGMA foreign_keys = ON;", [])?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            init_schema(&conn)?;
            Ok(conn)
        })
        .await?
        .map_err(db_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, for tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(|| -> rusqlite::Result<Connection> {
            let conn = Connection::open_in_memory()?;
            conn.execute("PRAGMA foreign_keys = ON;", [])?;
            init_schema(&conn)?;
            Ok(conn)
        })
        .await?
        .map_err(db_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run_blocking<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().expect("sqlite mutex poisoned");
            f(&mut conn)
        })
        .await?
        .map_err(db_err)
    }
}

fn db_err(e: rusqlite::Error) -> OlavError {
    OlavError::Internal(format!("thread store: {e}"))
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS threads (
            thread_id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL,
            state TEXT NOT NULL,
            pending_interrupt TEXT,
            last_interrupt TEXT,
            executed_fingerprints TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS thread_messages (
            thread_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (thread_id, seq),
            FOREIGN KEY (thread_id) REFERENCES threads(thread_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_threads_updated ON threads(updated_at);
        "#,
    )
}

fn stamp(ts: &OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_default()
}

fn unstamp(raw: &str) -> OffsetDateTime {
    OffsetDateTime::parse(raw, &Rfc3339).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

fn upsert_thread(conn: &rusqlite::Transaction<'_>, thread: &Thread) -> rusqlite::Result<()> {
    let pending = thread
        .pending_interrupt
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let last = thread
        .last_interrupt
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    let executed = serde_json::to_string(&thread.executed_fingerprints)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    conn.execute(
        "INSERT INTO threads
             (thread_id, client_id, state, pending_interrupt, last_interrupt,
              executed_fingerprints, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(thread_id) DO UPDATE SET
             state = excluded.state,
             pending_interrupt = excluded.pending_interrupt,
             last_interrupt = excluded.last_interrupt,
             executed_fingerprints = excluded.executed_fingerprints,
             updated_at = excluded.updated_at",
        params![
            thread.thread_id,
            thread.client_id,
            thread.state.as_str(),
            pending,
            last,
            executed,
            stamp(&thread.created_at),
            stamp(&thread.updated_at),
        ],
    )?;

    // Messages are append-only; persist only the tail.
    let stored: i64 = conn.query_row(
        "SELECT COUNT(*) FROM thread_messages WHERE thread_id = ?1",
        params![thread.thread_id],
        |row| row.get(0),
    )?;
    for (seq, message) in thread.messages.iter().enumerate().skip(stored as usize) {
        conn.execute(
            "INSERT INTO thread_messages (thread_id, seq, id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                thread.thread_id,
                seq as i64,
                message.id,
                message.role.as_str(),
                message.content,
                stamp(&message.created_at),
            ],
        )?;
    }
    Ok(())
}

#[async_trait]
impl ThreadStore for SqliteThreadStore {
    async fn create(&self, thread: &Thread) -> Result<()> {
        let thread = thread.clone();
        self.run_blocking(move |conn| {
            let tx = conn.transaction()?;
            upsert_thread(&tx, &thread)?;
            tx.commit()
        })
        .await
    }

    async fn save(&self, thread: &Thread) -> Result<()> {
        let thread = thread.clone();
        self.run_blocking(move |conn| {
            let tx = conn.transaction()?;
            upsert_thread(&tx, &thread)?;
            tx.commit()
        })
        .await
    }

    async fn load(&self, thread_id: &str) -> Result<Option<Thread>> {
        let thread_id = thread_id.to_string();
        self.run_blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT client_id, state, pending_interrupt, last_interrupt,
                            executed_fingerprints, created_at, updated_at
                     FROM threads WHERE thread_id = ?1",
                    params![thread_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Option<String>>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, String>(6)?,
                        ))
                    },
                )
                .optional()?;

            let Some((client_id, state, pending, last, executed, created_at, updated_at)) = row
            else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT id, role, content, created_at
                 FROM thread_messages WHERE thread_id = ?1 ORDER BY seq ASC",
            )?;
            let messages = stmt
                .query_map(params![thread_id], |row| {
                    Ok(Message {
                        id: row.get(0)?,
                        role: Role::parse(&row.get::<_, String>(1)?),
                        content: row.get(2)?,
                        created_at: unstamp(&row.get::<_, String>(3)?),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let pending_interrupt: Option<Interrupt> =
                pending.and_then(|text| serde_json::from_str(&text).ok());
            let last_interrupt: Option<Interrupt> =
                last.and_then(|text| serde_json::from_str(&text).ok());
            let executed_fingerprints: BTreeSet<String> =
                serde_json::from_str(&executed).unwrap_or_default();

            Ok(Some(Thread {
                thread_id,
                client_id,
                state: ThreadState::parse(&state),
                messages,
                pending_interrupt,
                last_interrupt,
                executed_fingerprints,
                created_at: unstamp(&created_at),
                updated_at: unstamp(&updated_at),
            }))
        })
        .await
    }

    async fn list(&self) -> Result<Vec<ThreadSummary>> {
        self.run_blocking(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.thread_id, t.client_id, t.state, t.updated_at,
                        (SELECT COUNT(*) FROM thread_messages m WHERE m.thread_id = t.thread_id)
                 FROM threads t ORDER BY t.updated_at DESC",
            )?;
            let summaries = stmt
                .query_map([], |row| {
                    Ok(ThreadSummary {
                        thread_id: row.get(0)?,
                        client_id: row.get(1)?,
                        state: ThreadState::parse(&row.get::<_, String>(2)?),
                        updated_at: unstamp(&row.get::<_, String>(3)?),
                        message_count: row.get::<_, i64>(4)? as usize,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(summaries)
        })
        .await
    }

    async fn delete(&self, thread_id: &str) -> Result<()> {
        let id = thread_id.to_string();
        let affected = self
            .run_blocking(move |conn| {
                conn.execute("DELETE FROM threads WHERE thread_id = ?1", params![id])
            })
            .await?;
        if affected == 0 {
            return Err(OlavError::not_found(format!("thread '{thread_id}'")));
        }
        Ok(())
    }
}
