//! Persistence contract for the memory core, plus the SQLite implementation.
//!
//! The core only needs append-only writers and a read/write slot for the
//! consolidation counters and social state; everything is loaded once at
//! startup and the in-memory view stays authoritative afterwards. Failed
//! writes are the caller's problem to log and swallow.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite};
use std::collections::HashMap;
use std::path::Path;

use suzu_core::{
    ChatMessage, CoreError, DecisionMonitor, DecisionRecord, EpisodicSummary, MemberKey, Mood,
    OracleCallRecord, PersonaSessionId, SessionId, Speaker,
};

use crate::social::SocialState;

// ============================================================================
// Contract
// ============================================================================

/// Per-persona-session consolidation counters and topic slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CounterState {
    pub unconsolidated: usize,
    pub pity: u32,
    pub topic: Option<String>,
}

/// Everything the store needs to resume after a restart.
#[derive(Debug, Default)]
pub struct MemorySnapshot {
    pub history: HashMap<PersonaSessionId, Vec<ChatMessage>>,
    pub episodic: HashMap<PersonaSessionId, Vec<EpisodicSummary>>,
    pub traits: HashMap<PersonaSessionId, Vec<String>>,
    pub impressions: HashMap<PersonaSessionId, Vec<String>>,
    pub member_impressions: HashMap<MemberKey, Vec<String>>,
    pub counters: HashMap<PersonaSessionId, CounterState>,
    pub social: HashMap<SessionId, SocialState>,
    pub active_personas: HashMap<SessionId, String>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn append_message(&self, id: &PersonaSessionId, msg: &ChatMessage)
        -> Result<(), CoreError>;

    /// Mark the oldest `count` unconsolidated messages of this id as
    /// consolidated, so they no longer load into working history.
    async fn mark_consolidated(&self, id: &PersonaSessionId, count: usize)
        -> Result<(), CoreError>;

    async fn append_episode(&self, id: &PersonaSessionId, episode: &EpisodicSummary)
        -> Result<(), CoreError>;

    async fn save_traits(&self, id: &PersonaSessionId, traits: &[String]) -> Result<(), CoreError>;

    async fn save_impressions(&self, id: &PersonaSessionId, impressions: &[String])
        -> Result<(), CoreError>;

    async fn save_member_impressions(
        &self,
        key: &MemberKey,
        impressions: &[String],
    ) -> Result<(), CoreError>;

    async fn save_counters(&self, id: &PersonaSessionId, counters: &CounterState)
        -> Result<(), CoreError>;

    async fn save_social(&self, session: &SessionId, state: &SocialState) -> Result<(), CoreError>;

    async fn save_active_persona(&self, session: &SessionId, persona: &str)
        -> Result<(), CoreError>;

    async fn load(&self) -> Result<MemorySnapshot, CoreError>;
}

/// Repository that persists nothing. For tests and ephemeral runs.
pub struct NullRepository;

#[async_trait]
impl Repository for NullRepository {
    async fn append_message(&self, _: &PersonaSessionId, _: &ChatMessage)
        -> Result<(), CoreError> {
        Ok(())
    }
    async fn mark_consolidated(&self, _: &PersonaSessionId, _: usize) -> Result<(), CoreError> {
        Ok(())
    }
    async fn append_episode(&self, _: &PersonaSessionId, _: &EpisodicSummary)
        -> Result<(), CoreError> {
        Ok(())
    }
    async fn save_traits(&self, _: &PersonaSessionId, _: &[String]) -> Result<(), CoreError> {
        Ok(())
    }
    async fn save_impressions(&self, _: &PersonaSessionId, _: &[String]) -> Result<(), CoreError> {
        Ok(())
    }
    async fn save_member_impressions(&self, _: &MemberKey, _: &[String]) -> Result<(), CoreError> {
        Ok(())
    }
    async fn save_counters(&self, _: &PersonaSessionId, _: &CounterState) -> Result<(), CoreError> {
        Ok(())
    }
    async fn save_social(&self, _: &SessionId, _: &SocialState) -> Result<(), CoreError> {
        Ok(())
    }
    async fn save_active_persona(&self, _: &SessionId, _: &str) -> Result<(), CoreError> {
        Ok(())
    }
    async fn load(&self) -> Result<MemorySnapshot, CoreError> {
        Ok(MemorySnapshot::default())
    }
}

// ============================================================================
// SQLite implementation
// ============================================================================

fn persist_err<E: std::fmt::Display>(op: &'static str) -> impl FnOnce(E) -> CoreError {
    move |e| CoreError::Persistence(format!("{op}: {e}"))
}

#[derive(Clone)]
pub struct SqliteRepository {
    pool: Pool<Sqlite>,
}

impl SqliteRepository {
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        let repo = Self { pool };
        repo.migrate().await?;
        Ok(repo)
    }

    /// Monitor sink sharing this repository's connection pool.
    pub fn monitor(&self) -> SqliteMonitor {
        SqliteMonitor {
            pool: self.pool.clone(),
        }
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session TEXT NOT NULL,
                persona TEXT NOT NULL,
                role TEXT NOT NULL,
                speaker_id TEXT NOT NULL DEFAULT '',
                speaker_name TEXT NOT NULL DEFAULT '',
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                consolidated INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create messages table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_session
             ON messages(session, persona, consolidated)",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create messages index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session TEXT NOT NULL,
                persona TEXT NOT NULL,
                summary TEXT NOT NULL,
                time_range TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create episodes table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS traits (
                session TEXT NOT NULL,
                persona TEXT NOT NULL,
                items TEXT NOT NULL,
                PRIMARY KEY (session, persona)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create traits table")?;

        // member_id '' holds the top-level (user or whole-group) impression set.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS impressions (
                session TEXT NOT NULL,
                persona TEXT NOT NULL,
                member_id TEXT NOT NULL DEFAULT '',
                items TEXT NOT NULL,
                PRIMARY KEY (session, persona, member_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create impressions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS counters (
                session TEXT NOT NULL,
                persona TEXT NOT NULL,
                unconsolidated INTEGER NOT NULL DEFAULT 0,
                pity INTEGER NOT NULL DEFAULT 0,
                topic TEXT,
                PRIMARY KEY (session, persona)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create counters table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS social_state (
                session TEXT PRIMARY KEY,
                energy REAL NOT NULL,
                mood TEXT NOT NULL,
                last_update INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create social_state table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS active_personas (
                session TEXT PRIMARY KEY,
                persona TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create active_personas table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                kind TEXT NOT NULL,
                session TEXT NOT NULL,
                result TEXT NOT NULL,
                reason TEXT NOT NULL,
                latency_ms INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create decisions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS oracle_calls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                model TEXT NOT NULL,
                prompt TEXT NOT NULL,
                response TEXT NOT NULL,
                duration_ms INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create oracle_calls table")?;

        Ok(())
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn append_message(
        &self,
        id: &PersonaSessionId,
        msg: &ChatMessage,
    ) -> Result<(), CoreError> {
        let (role, speaker_id, speaker_name) = match &msg.speaker {
            Speaker::Assistant => ("assistant", String::new(), String::new()),
            Speaker::User { id, name } => ("user", id.clone(), name.clone()),
        };
        sqlx::query(
            "INSERT INTO messages (session, persona, role, speaker_id, speaker_name, content, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.session.as_str())
        .bind(&id.persona)
        .bind(role)
        .bind(speaker_id)
        .bind(speaker_name)
        .bind(&msg.text)
        .bind(msg.timestamp.timestamp())
        .execute(&self.pool)
        .await
        .map_err(persist_err("append message"))?;
        Ok(())
    }

    async fn mark_consolidated(
        &self,
        id: &PersonaSessionId,
        count: usize,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE messages SET consolidated = 1
             WHERE id IN (
                 SELECT id FROM messages
                 WHERE session = ? AND persona = ? AND consolidated = 0
                 ORDER BY id ASC LIMIT ?
             )",
        )
        .bind(id.session.as_str())
        .bind(&id.persona)
        .bind(count as i64)
        .execute(&self.pool)
        .await
        .map_err(persist_err("mark consolidated"))?;
        Ok(())
    }

    async fn append_episode(
        &self,
        id: &PersonaSessionId,
        episode: &EpisodicSummary,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO episodes (session, persona, summary, time_range, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.session.as_str())
        .bind(&id.persona)
        .bind(&episode.summary)
        .bind(&episode.time_range)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(persist_err("append episode"))?;
        Ok(())
    }

    async fn save_traits(
        &self,
        id: &PersonaSessionId,
        traits: &[String],
    ) -> Result<(), CoreError> {
        let items = serde_json::to_string(traits).map_err(persist_err("encode traits"))?;
        sqlx::query("INSERT OR REPLACE INTO traits (session, persona, items) VALUES (?, ?, ?)")
            .bind(id.session.as_str())
            .bind(&id.persona)
            .bind(items)
            .execute(&self.pool)
            .await
            .map_err(persist_err("save traits"))?;
        Ok(())
    }

    async fn save_impressions(
        &self,
        id: &PersonaSessionId,
        impressions: &[String],
    ) -> Result<(), CoreError> {
        let items = serde_json::to_string(impressions).map_err(persist_err("encode impressions"))?;
        sqlx::query(
            "INSERT OR REPLACE INTO impressions (session, persona, member_id, items)
             VALUES (?, ?, '', ?)",
        )
        .bind(id.session.as_str())
        .bind(&id.persona)
        .bind(items)
        .execute(&self.pool)
        .await
        .map_err(persist_err("save impressions"))?;
        Ok(())
    }

    async fn save_member_impressions(
        &self,
        key: &MemberKey,
        impressions: &[String],
    ) -> Result<(), CoreError> {
        let items = serde_json::to_string(impressions).map_err(persist_err("encode impressions"))?;
        sqlx::query(
            "INSERT OR REPLACE INTO impressions (session, persona, member_id, items)
             VALUES (?, ?, ?, ?)",
        )
        .bind(key.group.as_str())
        .bind(&key.persona)
        .bind(&key.member_id)
        .bind(items)
        .execute(&self.pool)
        .await
        .map_err(persist_err("save member impressions"))?;
        Ok(())
    }

    async fn save_counters(
        &self,
        id: &PersonaSessionId,
        counters: &CounterState,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO counters (session, persona, unconsolidated, pity, topic)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.session.as_str())
        .bind(&id.persona)
        .bind(counters.unconsolidated as i64)
        .bind(counters.pity as i64)
        .bind(counters.topic.as_deref())
        .execute(&self.pool)
        .await
        .map_err(persist_err("save counters"))?;
        Ok(())
    }

    async fn save_social(&self, session: &SessionId, state: &SocialState) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO social_state (session, energy, mood, last_update)
             VALUES (?, ?, ?, ?)",
        )
        .bind(session.as_str())
        .bind(state.energy)
        .bind(state.mood.as_str())
        .bind(state.last_update.timestamp())
        .execute(&self.pool)
        .await
        .map_err(persist_err("save social state"))?;
        Ok(())
    }

    async fn save_active_persona(
        &self,
        session: &SessionId,
        persona: &str,
    ) -> Result<(), CoreError> {
        sqlx::query("INSERT OR REPLACE INTO active_personas (session, persona) VALUES (?, ?)")
            .bind(session.as_str())
            .bind(persona)
            .execute(&self.pool)
            .await
            .map_err(persist_err("save active persona"))?;
        Ok(())
    }

    async fn load(&self) -> Result<MemorySnapshot, CoreError> {
        let mut snapshot = MemorySnapshot::default();

        let rows = sqlx::query(
            "SELECT session, persona, role, speaker_id, speaker_name, content, timestamp
             FROM messages WHERE consolidated = 0 ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(persist_err("load messages"))?;
        for row in rows {
            let id = PersonaSessionId::new(
                SessionId::new(row.get::<String, _>("session")),
                row.get::<String, _>("persona"),
            );
            let role: String = row.get("role");
            let timestamp = DateTime::from_timestamp(row.get::<i64, _>("timestamp"), 0)
                .unwrap_or_default();
            let msg = if role == "assistant" {
                ChatMessage::assistant(row.get::<String, _>("content"), timestamp)
            } else {
                ChatMessage::user(
                    row.get::<String, _>("speaker_id"),
                    row.get::<String, _>("speaker_name"),
                    row.get::<String, _>("content"),
                    timestamp,
                )
            };
            snapshot.history.entry(id).or_default().push(msg);
        }

        let rows = sqlx::query(
            "SELECT session, persona, summary, time_range FROM episodes ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(persist_err("load episodes"))?;
        for row in rows {
            let id = PersonaSessionId::new(
                SessionId::new(row.get::<String, _>("session")),
                row.get::<String, _>("persona"),
            );
            snapshot.episodic.entry(id).or_default().push(EpisodicSummary {
                summary: row.get("summary"),
                time_range: row.get("time_range"),
            });
        }

        let rows = sqlx::query("SELECT session, persona, items FROM traits")
            .fetch_all(&self.pool)
            .await
            .map_err(persist_err("load traits"))?;
        for row in rows {
            let id = PersonaSessionId::new(
                SessionId::new(row.get::<String, _>("session")),
                row.get::<String, _>("persona"),
            );
            let items: Vec<String> =
                serde_json::from_str(&row.get::<String, _>("items")).unwrap_or_default();
            snapshot.traits.insert(id, items);
        }

        let rows = sqlx::query("SELECT session, persona, member_id, items FROM impressions")
            .fetch_all(&self.pool)
            .await
            .map_err(persist_err("load impressions"))?;
        for row in rows {
            let session = SessionId::new(row.get::<String, _>("session"));
            let persona: String = row.get("persona");
            let member_id: String = row.get("member_id");
            let items: Vec<String> =
                serde_json::from_str(&row.get::<String, _>("items")).unwrap_or_default();
            if member_id.is_empty() {
                snapshot
                    .impressions
                    .insert(PersonaSessionId::new(session, persona), items);
            } else {
                snapshot.member_impressions.insert(
                    MemberKey {
                        group: session,
                        member_id,
                        persona,
                    },
                    items,
                );
            }
        }

        let rows = sqlx::query("SELECT session, persona, unconsolidated, pity, topic FROM counters")
            .fetch_all(&self.pool)
            .await
            .map_err(persist_err("load counters"))?;
        for row in rows {
            let id = PersonaSessionId::new(
                SessionId::new(row.get::<String, _>("session")),
                row.get::<String, _>("persona"),
            );
            snapshot.counters.insert(
                id,
                CounterState {
                    unconsolidated: row.get::<i64, _>("unconsolidated").max(0) as usize,
                    pity: row.get::<i64, _>("pity").max(0) as u32,
                    topic: row.get::<Option<String>, _>("topic"),
                },
            );
        }

        let rows = sqlx::query("SELECT session, energy, mood, last_update FROM social_state")
            .fetch_all(&self.pool)
            .await
            .map_err(persist_err("load social state"))?;
        for row in rows {
            let session = SessionId::new(row.get::<String, _>("session"));
            snapshot.social.insert(
                session,
                SocialState {
                    energy: row.get("energy"),
                    mood: Mood::parse(&row.get::<String, _>("mood")).unwrap_or_default(),
                    last_update: DateTime::from_timestamp(row.get::<i64, _>("last_update"), 0)
                        .unwrap_or_default(),
                },
            );
        }

        let rows = sqlx::query("SELECT session, persona FROM active_personas")
            .fetch_all(&self.pool)
            .await
            .map_err(persist_err("load active personas"))?;
        for row in rows {
            snapshot.active_personas.insert(
                SessionId::new(row.get::<String, _>("session")),
                row.get::<String, _>("persona"),
            );
        }

        Ok(snapshot)
    }
}

// ============================================================================
// SQLite observability sink
// ============================================================================

/// Decision/oracle log backed by the same SQLite file. Fire-and-forget:
/// failures are logged, never surfaced.
#[derive(Clone)]
pub struct SqliteMonitor {
    pool: Pool<Sqlite>,
}

#[async_trait]
impl DecisionMonitor for SqliteMonitor {
    async fn record_decision(&self, record: DecisionRecord) {
        let result = record.result.to_string();
        let res = sqlx::query(
            "INSERT INTO decisions (timestamp, kind, session, result, reason, latency_ms)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(record.kind.as_str())
        .bind(record.session.as_str())
        .bind(result)
        .bind(&record.reason)
        .bind(record.latency.as_millis() as i64)
        .execute(&self.pool)
        .await;
        if let Err(e) = res {
            tracing::warn!("failed to record decision: {e}");
        }
    }

    async fn record_oracle_call(&self, record: OracleCallRecord) {
        let res = sqlx::query(
            "INSERT INTO oracle_calls (timestamp, model, prompt, response, duration_ms)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(&record.model)
        .bind(&record.prompt)
        .bind(&record.response)
        .bind(record.duration.as_millis() as i64)
        .execute(&self.pool)
        .await;
        if let Err(e) = res {
            tracing::warn!("failed to record oracle call: {e}");
        }
    }
}
