use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::task;
use troupe_schema::{CompletionIntent, IntentState, Turn};
use uuid::Uuid;

use crate::migrations::run_migrations;
use crate::{HistoryStore, IntentLog};

/// SQLite store holding both conversation history and the completion audit
/// trail. Cloning shares the underlying connection.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Ids of every conversation that has ever been written, most recently
    /// active first.
    pub async fn list_conversations(&self) -> Result<Vec<String>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt =
                conn.prepare("SELECT id FROM conversations ORDER BY updated_at DESC, id")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            Ok::<Vec<String>, anyhow::Error>(ids)
        })
        .await?
    }

    async fn finish_intent(
        &self,
        id: Uuid,
        state: IntentState,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
        error: Option<String>,
    ) -> Result<()> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let updated = conn.execute(
                r#"
                UPDATE completion_intents
                SET state = ?2, prompt_tokens = ?3, completion_tokens = ?4, error = ?5, updated_at = ?6
                WHERE id = ?1 AND state = ?7
                "#,
                params![
                    id.to_string(),
                    state.as_str(),
                    prompt_tokens,
                    completion_tokens,
                    error,
                    Utc::now().to_rfc3339(),
                    IntentState::Intent.as_str(),
                ],
            )?;
            if updated == 0 {
                return Err(anyhow!(
                    "completion intent {id} is missing or already terminal"
                ));
            }
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn fetch(&self, conversation_id: &str) -> Result<Vec<Turn>> {
        let db = Arc::clone(&self.db);
        let conversation_id = conversation_id.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                r#"
                SELECT payload FROM turns
                WHERE conversation_id = ?1
                ORDER BY seq ASC
                "#,
            )?;
            let rows = stmt.query_map(params![conversation_id], |row| row.get::<_, String>(0))?;
            let mut turns = Vec::new();
            for row in rows {
                turns.push(serde_json::from_str::<Turn>(&row?)?);
            }
            Ok::<Vec<Turn>, anyhow::Error>(turns)
        })
        .await?
    }

    async fn append_many(&self, conversation_id: &str, turns: Vec<Turn>) -> Result<()> {
        let db = Arc::clone(&self.db);
        let conversation_id = conversation_id.to_owned();
        task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;
            upsert_conversation(&tx, &conversation_id, &now)?;

            let mut seq: i64 = tx.query_row(
                "SELECT COALESCE(MAX(seq) + 1, 0) FROM turns WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )?;
            for turn in &turns {
                tx.execute(
                    r#"
                    INSERT INTO turns (conversation_id, seq, role, handle, payload, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                    params![
                        conversation_id,
                        seq,
                        turn.role(),
                        turn.handle(),
                        serde_json::to_string(turn)?,
                        now,
                    ],
                )?;
                seq += 1;
            }
            tx.commit()?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    async fn reset(&self, conversation_id: &str) -> Result<()> {
        let db = Arc::clone(&self.db);
        let conversation_id = conversation_id.to_owned();
        task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let tx = conn.transaction()?;
            upsert_conversation(&tx, &conversation_id, &Utc::now().to_rfc3339())?;
            tx.execute(
                "DELETE FROM turns WHERE conversation_id = ?1",
                params![conversation_id],
            )?;
            tx.commit()?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    async fn turn_count(&self, conversation_id: &str) -> Result<usize> {
        let db = Arc::clone(&self.db);
        let conversation_id = conversation_id.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM turns WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )?;
            Ok::<usize, anyhow::Error>(count as usize)
        })
        .await?
    }
}

#[async_trait]
impl IntentLog for SqliteStore {
    async fn record_intent(&self, intent: &CompletionIntent) -> Result<()> {
        let db = Arc::clone(&self.db);
        let intent = intent.clone();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                r#"
                INSERT INTO completion_intents (
                    id, conversation_id, state, credential_fingerprint, model,
                    prompt_tokens, completion_tokens, error, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    intent.id.to_string(),
                    intent.conversation_id,
                    intent.state.as_str(),
                    intent.credential_fingerprint,
                    intent.model,
                    intent.prompt_tokens,
                    intent.completion_tokens,
                    intent.error,
                    intent.created_at.to_rfc3339(),
                    intent.updated_at.to_rfc3339(),
                ],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    async fn mark_done(
        &self,
        id: Uuid,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    ) -> Result<()> {
        self.finish_intent(id, IntentState::Done, prompt_tokens, completion_tokens, None)
            .await
    }

    async fn mark_error(&self, id: Uuid, error: &str) -> Result<()> {
        self.finish_intent(id, IntentState::Error, None, None, Some(error.to_owned()))
            .await
    }

    async fn get_intent(&self, id: Uuid) -> Result<Option<CompletionIntent>> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let intent = conn
                .query_row(
                    r#"
                    SELECT id, conversation_id, state, credential_fingerprint, model,
                           prompt_tokens, completion_tokens, error, created_at, updated_at
                    FROM completion_intents
                    WHERE id = ?1
                    "#,
                    params![id.to_string()],
                    row_to_intent,
                )
                .optional()?;
            Ok::<Option<CompletionIntent>, anyhow::Error>(intent)
        })
        .await?
    }

    async fn list_intents(
        &self,
        conversation_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<CompletionIntent>> {
        let db = Arc::clone(&self.db);
        let conversation_id = conversation_id.map(ToOwned::to_owned);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                r#"
                SELECT id, conversation_id, state, credential_fingerprint, model,
                       prompt_tokens, completion_tokens, error, created_at, updated_at
                FROM completion_intents
                WHERE ?1 IS NULL OR conversation_id = ?1
                ORDER BY created_at DESC
                LIMIT ?2
                "#,
            )?;
            let rows = stmt.query_map(params![conversation_id, limit as i64], row_to_intent)?;
            let mut intents = Vec::new();
            for row in rows {
                intents.push(row?);
            }
            Ok::<Vec<CompletionIntent>, anyhow::Error>(intents)
        })
        .await?
    }
}

fn upsert_conversation(conn: &Connection, conversation_id: &str, now: &str) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO conversations (id, created_at, updated_at) VALUES (?1, ?2, ?2)
        ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at
        "#,
        params![conversation_id, now],
    )?;
    Ok(())
}

fn parse_datetime_sql(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_uuid_sql(raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_state_sql(raw: &str) -> rusqlite::Result<IntentState> {
    IntentState::parse(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::<dyn std::error::Error + Send + Sync>::from(e.to_string()),
        )
    })
}

fn row_to_intent(row: &Row<'_>) -> rusqlite::Result<CompletionIntent> {
    let id: String = row.get(0)?;
    let state: String = row.get(2)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    Ok(CompletionIntent {
        id: parse_uuid_sql(&id)?,
        conversation_id: row.get(1)?,
        state: parse_state_sql(&state)?,
        credential_fingerprint: row.get(3)?,
        model: row.get(4)?,
        prompt_tokens: row.get(5)?,
        completion_tokens: row.get(6)?,
        error: row.get(7)?,
        created_at: parse_datetime_sql(&created_at)?,
        updated_at: parse_datetime_sql(&updated_at)?,
    })
}
