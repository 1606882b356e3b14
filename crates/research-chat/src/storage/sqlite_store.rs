//! SQLite implementation of the research store
use crate::storage::schema::*;
use crate::storage::migration::{self, MigrationManager};
use crate::storage::ResearchStore;
use crate::events::EventType;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, request_count, max_requests, created_at, last_active";
const INTERACTION_COLUMNS: &str =
    "id, user_id, session_id, prompt, response, model, timestamp, context, latency_ms, token_count";
const EVENT_COLUMNS: &str = "id, user_id, session_id, event_type, timestamp, data";

pub struct SqliteStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SqliteStore {
    /// Open (or create) a file-backed database and bring its schema up to date
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        info!("Opening research database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA synchronous = NORMAL;
                     PRAGMA busy_timeout = 5000;",
                )
            });
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| anyhow::anyhow!("Failed to create connection pool: {}", e))?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }

        info!("Research database initialized successfully");
        Ok(Self { pool: Arc::new(pool) })
    }

    /// Private in-memory database. A single pooled connection that is never
    /// recycled, since every SQLite memory connection is its own database.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self { pool: Arc::new(pool) })
    }

    /// Runs blocking SQLite work off the async executor
    async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Storage task failed: {}", e))?
    }

    /// Raw SQL against the live database, for fault injection in tests.
    #[cfg(test)]
    pub(crate) async fn execute_batch(&self, sql: &str) -> anyhow::Result<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| Ok(conn.execute_batch(&sql)?)).await
    }

    fn format_timestamp(ts: &DateTime<Utc>) -> String {
        // Fixed width so lexical order matches chronological order
        ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    fn parse_datetime_safe(datetime_str: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(datetime_str) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S") {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S%.f") {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
        None
    }

    fn read_timestamp(row: &Row, idx: usize, column: &str) -> anyhow::Result<DateTime<Utc>> {
        let raw: String = row.get(idx)?;
        Self::parse_datetime_safe(&raw)
            .ok_or_else(|| anyhow::anyhow!("Unparseable {} '{}' in research database", column, raw))
    }

    fn row_to_user(row: &Row) -> anyhow::Result<UserRecord> {
        Ok(UserRecord {
            id: row.get(0)?,
            request_count: row.get(1)?,
            max_requests: row.get(2)?,
            created_at: Self::read_timestamp(row, 3, "created_at")?,
            last_active: Self::read_timestamp(row, 4, "last_active")?,
        })
    }

    fn row_to_interaction(row: &Row) -> anyhow::Result<InteractionRecord> {
        let context_json: String = row.get(7)?;
        let context = serde_json::from_str(&context_json)
            .map_err(|e| anyhow::anyhow!("Context snapshot JSON error: {}", e))?;
        let latency_ms: i64 = row.get(8)?;

        Ok(InteractionRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            session_id: row.get(2)?,
            prompt: row.get(3)?,
            response: row.get(4)?,
            model: row.get(5)?,
            timestamp: Self::read_timestamp(row, 6, "interaction timestamp")?,
            context,
            latency_ms: latency_ms.max(0) as u64,
            token_count: row.get(9)?,
        })
    }

    fn row_to_event(row: &Row) -> anyhow::Result<EventRecord> {
        let event_type: String = row.get(3)?;
        let event_type: EventType = event_type.parse()?;
        let data_json: String = row.get(5)?;
        let data = serde_json::from_str(&data_json)
            .map_err(|e| anyhow::anyhow!("Event data JSON error: {}", e))?;

        Ok(EventRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            session_id: row.get(2)?,
            event_type,
            timestamp: Self::read_timestamp(row, 4, "event timestamp")?,
            data,
        })
    }

    fn load_user(conn: &Connection, user_id: &str) -> anyhow::Result<Option<UserRecord>> {
        let mut stmt = conn.prepare(&format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS))?;
        let mut rows = stmt.query([user_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Self::row_to_user(row)?)),
            None => Ok(None),
        }
    }

    fn bump_request_count(conn: &Connection, user_id: &str) -> anyhow::Result<u32> {
        let now = Self::format_timestamp(&Utc::now());
        let count: Option<u32> = conn
            .query_row(
                "UPDATE users SET request_count = request_count + 1, last_active = ?2
                 WHERE id = ?1
                 RETURNING request_count",
                params![user_id, &now],
                |row| row.get(0),
            )
            .optional()?;
        let count = count.ok_or_else(|| anyhow::anyhow!("User {} not found", user_id))?;
        debug!("User {} request count is now {}", user_id, count);
        Ok(count)
    }

    fn insert_interaction(conn: &Connection, interaction: NewInteraction) -> anyhow::Result<InteractionRecord> {
        let record = InteractionRecord {
            id: Uuid::new_v4().to_string(),
            user_id: interaction.user_id,
            session_id: interaction.session_id,
            prompt: interaction.prompt,
            response: interaction.response,
            model: interaction.model,
            timestamp: Utc::now(),
            context: interaction.context,
            latency_ms: interaction.latency_ms,
            token_count: interaction.token_count,
        };
        let context_json = serde_json::to_string(&record.context)?;

        conn.execute(
            &format!(
                "INSERT INTO interactions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                INTERACTION_COLUMNS
            ),
            params![
                &record.id,
                &record.user_id,
                &record.session_id,
                &record.prompt,
                &record.response,
                &record.model,
                Self::format_timestamp(&record.timestamp),
                context_json,
                record.latency_ms as i64,
                record.token_count,
            ],
        )?;

        debug!("Stored interaction {} for user {}", record.id, record.user_id);
        Ok(record)
    }

    fn query_interactions(conn: &Connection, column: &str, value: &str) -> anyhow::Result<Vec<InteractionRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM interactions WHERE {} = ?1 ORDER BY timestamp, rowid",
            INTERACTION_COLUMNS, column
        ))?;
        let mut rows = stmt.query([value])?;
        let mut interactions = Vec::new();
        while let Some(row) = rows.next()? {
            interactions.push(Self::row_to_interaction(row)?);
        }
        Ok(interactions)
    }

    fn query_events(conn: &Connection, column: &str, value: &str) -> anyhow::Result<Vec<EventRecord>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM events WHERE {} = ?1 ORDER BY timestamp, rowid",
            EVENT_COLUMNS, column
        ))?;
        let mut rows = stmt.query([value])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(Self::row_to_event(row)?);
        }
        Ok(events)
    }
}

#[async_trait]
impl ResearchStore for SqliteStore {
    async fn get_user(&self, user_id: &str) -> anyhow::Result<Option<UserRecord>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| Self::load_user(conn, &user_id)).await
    }

    async fn create_user(&self, user_id: &str, max_requests: u32) -> anyhow::Result<UserRecord> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let now = Self::format_timestamp(&Utc::now());
            // Concurrent first logins for one id must both see the same row
            conn.execute(
                "INSERT INTO users (id, request_count, max_requests, created_at, last_active)
                 VALUES (?1, 0, ?2, ?3, ?3)
                 ON CONFLICT(id) DO NOTHING",
                params![&user_id, max_requests, &now],
            )?;
            info!("Registered research user {}", user_id);
            Self::load_user(conn, &user_id)?
                .ok_or_else(|| anyhow::anyhow!("User {} missing after insert", user_id))
        })
        .await
    }

    async fn update_user(&self, user_id: &str, update: UserUpdate) -> anyhow::Result<Option<UserRecord>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let Some(mut user) = Self::load_user(&tx, &user_id)? else {
                return Ok(None);
            };
            if let Some(count) = update.request_count {
                user.request_count = count;
            }
            if let Some(last_active) = update.last_active {
                user.last_active = last_active;
            }
            tx.execute(
                "UPDATE users SET request_count = ?1, last_active = ?2 WHERE id = ?3",
                params![user.request_count, Self::format_timestamp(&user.last_active), &user_id],
            )?;
            tx.commit()?;
            Ok(Some(user))
        })
        .await
    }

    async fn increment_request_count(&self, user_id: &str) -> anyhow::Result<u32> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| Self::bump_request_count(conn, &user_id)).await
    }

    async fn create_interaction(&self, interaction: NewInteraction) -> anyhow::Result<InteractionRecord> {
        self.with_conn(move |conn| Self::insert_interaction(conn, interaction)).await
    }

    async fn record_submission(&self, interaction: NewInteraction) -> anyhow::Result<(u32, InteractionRecord)> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let count = Self::bump_request_count(&tx, &interaction.user_id)?;
            let record = Self::insert_interaction(&tx, interaction)?;
            tx.commit()?;
            Ok((count, record))
        })
        .await
    }

    async fn create_event(&self, event: NewEvent) -> anyhow::Result<EventRecord> {
        self.with_conn(move |conn| {
            let record = EventRecord {
                id: Uuid::new_v4().to_string(),
                user_id: event.user_id,
                session_id: event.session_id,
                event_type: event.event_type,
                timestamp: Utc::now(),
                data: event.data,
            };
            let data_json = serde_json::to_string(&record.data)?;

            conn.execute(
                &format!("INSERT INTO events ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)", EVENT_COLUMNS),
                params![
                    &record.id,
                    &record.user_id,
                    &record.session_id,
                    record.event_type.as_str(),
                    Self::format_timestamp(&record.timestamp),
                    data_json,
                ],
            )?;

            debug!("Stored {} event for user {}", record.event_type, record.user_id);
            Ok(record)
        })
        .await
    }

    async fn interactions_for_user(&self, user_id: &str) -> anyhow::Result<Vec<InteractionRecord>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| Self::query_interactions(conn, "user_id", &user_id)).await
    }

    async fn interactions_for_session(&self, session_id: &str) -> anyhow::Result<Vec<InteractionRecord>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| Self::query_interactions(conn, "session_id", &session_id)).await
    }

    async fn events_for_user(&self, user_id: &str) -> anyhow::Result<Vec<EventRecord>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| Self::query_events(conn, "user_id", &user_id)).await
    }

    async fn events_for_session(&self, session_id: &str) -> anyhow::Result<Vec<EventRecord>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| Self::query_events(conn, "session_id", &session_id)).await
    }

    async fn stats(&self) -> anyhow::Result<DatabaseStats> {
        self.with_conn(|conn| Ok(migration::get_database_stats(conn)?)).await
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
            Ok(())
        })
        .await?;
        info!("Research database closed");
        Ok(())
    }
}
