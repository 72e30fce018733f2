use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;

mod models;

pub use models::*;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(path: &str) -> Result<Self> {
        // Ensure the directory exists
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let database_url = format!("sqlite:{}?mode=rwc", path);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Private in-memory database for tests. A single connection keeps the
    /// memory database alive for the pool's lifetime.
    #[cfg(test)]
    pub async fn new_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    #[cfg(test)]
    pub async fn execute_raw(&self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                code TEXT PRIMARY KEY,
                host_principal_id TEXT NOT NULL,
                host_access_token TEXT,
                host_device_id TEXT,
                host_provider_identity TEXT,
                provider TEXT NOT NULL,
                provider_config TEXT,
                match_strategy TEXT NOT NULL DEFAULT 'first-two',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_members (
                session_code TEXT NOT NULL REFERENCES sessions(code),
                principal_id TEXT NOT NULL,
                display_name TEXT NOT NULL,
                filters TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (session_code, principal_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS likes (
                principal_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                session_code TEXT,
                is_match INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // NULL scopes must conflict with each other but never with a real
        // session code, so the index goes over COALESCE(session_code, '').
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_likes_unique
            ON likes (principal_id, item_id, COALESCE(session_code, ''))
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS hidden (
                principal_id TEXT NOT NULL,
                item_id TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (principal_id, item_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_code TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_settings (
                principal_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (principal_id, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    // Session operations
    pub async fn create_session(&self, session: &Session) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO sessions
                (code, host_principal_id, host_access_token, host_device_id,
                 host_provider_identity, provider, provider_config, match_strategy)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(code) DO NOTHING
            "#,
        )
        .bind(&session.code)
        .bind(&session.host_principal_id)
        .bind(&session.host_access_token)
        .bind(&session.host_device_id)
        .bind(&session.host_provider_identity)
        .bind(&session.provider)
        .bind(&session.provider_config)
        .bind(&session.match_strategy)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_session(&self, code: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT code, host_principal_id, host_access_token, host_device_id,
                   host_provider_identity, provider, provider_config,
                   match_strategy, created_at
            FROM sessions WHERE code = ?
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    /// Revoke guest lending: null the host token fields, keep the session.
    pub async fn clear_host_token(&self, code: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET host_access_token = NULL, host_device_id = NULL WHERE code = ?",
        )
        .bind(code)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_session(&self, code: &str) -> Result<()> {
        sqlx::query("DELETE FROM session_members WHERE session_code = ?")
            .bind(code)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM likes WHERE session_code = ?")
            .bind(code)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE code = ?")
            .bind(code)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // Membership operations
    pub async fn upsert_member(&self, member: &SessionMember) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_members (session_code, principal_id, display_name, filters)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(session_code, principal_id) DO NOTHING
            "#,
        )
        .bind(&member.session_code)
        .bind(&member.principal_id)
        .bind(&member.display_name)
        .bind(&member.filters)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_members(&self, code: &str) -> Result<Vec<SessionMember>> {
        let members = sqlx::query_as::<_, SessionMember>(
            r#"
            SELECT session_code, principal_id, display_name, filters, created_at
            FROM session_members WHERE session_code = ? ORDER BY created_at ASC
            "#,
        )
        .bind(code)
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }

    pub async fn count_members(&self, code: &str) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM session_members WHERE session_code = ?")
                .bind(code)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }

    pub async fn update_member_filters(
        &self,
        code: &str,
        principal_id: &str,
        filters: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE session_members SET filters = ? WHERE session_code = ? AND principal_id = ?",
        )
        .bind(filters)
        .bind(code)
        .bind(principal_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn remove_member(&self, code: &str, principal_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM session_members WHERE session_code = ? AND principal_id = ?",
        )
        .bind(code)
        .bind(principal_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The session a principal is currently in, if any. Membership is the
    /// source of truth; joining a session removes any previous membership,
    /// so a principal has at most one row here.
    pub async fn get_member_session(&self, principal_id: &str) -> Result<Option<String>> {
        let code: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT session_code FROM session_members
            WHERE principal_id = ? ORDER BY created_at DESC LIMIT 1
            "#,
        )
        .bind(principal_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(code.map(|(c,)| c))
    }

    // Like / hidden operations (written only by the match engine)

    /// Insert a like; returns false when the (principal, item, scope)
    /// uniqueness constraint absorbed the write.
    pub async fn insert_like(
        &self,
        principal_id: &str,
        item_id: &str,
        session_code: Option<&str>,
        is_match: bool,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO likes (principal_id, item_id, session_code, is_match)
            VALUES (?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(principal_id)
        .bind(item_id)
        .bind(session_code)
        .bind(is_match)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drop every like the principal has on the item, in any scope. Used
    /// when a reject supersedes earlier like state.
    pub async fn delete_likes_for_item(&self, principal_id: &str, item_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM likes WHERE principal_id = ? AND item_id = ?")
            .bind(principal_id)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// An existing like on the item, in the same session, by someone else.
    pub async fn find_other_like(
        &self,
        item_id: &str,
        session_code: &str,
        not_principal: &str,
    ) -> Result<Option<Like>> {
        let like = sqlx::query_as::<_, Like>(
            r#"
            SELECT principal_id, item_id, session_code, is_match, created_at
            FROM likes
            WHERE item_id = ? AND session_code = ? AND principal_id != ?
            LIMIT 1
            "#,
        )
        .bind(item_id)
        .bind(session_code)
        .bind(not_principal)
        .fetch_optional(&self.pool)
        .await?;
        Ok(like)
    }

    /// Flip every like row for (item, session) to matched. Idempotent.
    pub async fn mark_item_matched(&self, item_id: &str, session_code: &str) -> Result<()> {
        sqlx::query(
            "UPDATE likes SET is_match = 1 WHERE item_id = ? AND session_code = ? AND is_match = 0",
        )
        .bind(item_id)
        .bind(session_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_distinct_likers(&self, item_id: &str, session_code: &str) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(DISTINCT principal_id) FROM likes WHERE item_id = ? AND session_code = ?",
        )
        .bind(item_id)
        .bind(session_code)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    pub async fn get_like(
        &self,
        principal_id: &str,
        item_id: &str,
        session_code: Option<&str>,
    ) -> Result<Option<Like>> {
        let like = sqlx::query_as::<_, Like>(
            r#"
            SELECT principal_id, item_id, session_code, is_match, created_at
            FROM likes
            WHERE principal_id = ? AND item_id = ?
              AND COALESCE(session_code, '') = COALESCE(?, '')
            "#,
        )
        .bind(principal_id)
        .bind(item_id)
        .bind(session_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(like)
    }

    /// Matched items for a session, de-duplicated by item, newest first.
    pub async fn get_matched_items(&self, session_code: &str) -> Result<Vec<MatchedItemRow>> {
        let rows = sqlx::query_as::<_, MatchedItemRow>(
            r#"
            SELECT item_id, MAX(created_at) AS matched_at
            FROM likes
            WHERE session_code = ? AND is_match = 1
            GROUP BY item_id
            ORDER BY matched_at DESC
            "#,
        )
        .bind(session_code)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Record a reject. Global per (principal, item); duplicates are absorbed.
    pub async fn insert_hidden(&self, principal_id: &str, item_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO hidden (principal_id, item_id)
            VALUES (?, ?)
            ON CONFLICT(principal_id, item_id) DO NOTHING
            "#,
        )
        .bind(principal_id)
        .bind(item_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn is_hidden(&self, principal_id: &str, item_id: &str) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM hidden WHERE principal_id = ? AND item_id = ?")
                .bind(principal_id)
                .bind(item_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    // Durable event log

    pub async fn insert_event(
        &self,
        session_code: &str,
        event_type: &str,
        payload: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_events (session_code, event_type, payload, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(session_code)
        .bind(event_type)
        .bind(payload)
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Events for one session (plus global broadcasts) strictly newer than
    /// the cursor, in creation order.
    pub async fn get_events_since(
        &self,
        session_code: &str,
        global_code: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SessionEventRow>> {
        let rows = sqlx::query_as::<_, SessionEventRow>(
            r#"
            SELECT id, session_code, event_type, payload, created_at
            FROM session_events
            WHERE (session_code = ? OR session_code = ?) AND created_at > ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(session_code)
        .bind(global_code)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn delete_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM session_events WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // Generic per-user settings

    pub async fn get_setting(&self, principal_id: &str, key: &str) -> Result<Option<String>> {
        let value: Option<(String,)> =
            sqlx::query_as("SELECT value FROM user_settings WHERE principal_id = ? AND key = ?")
                .bind(principal_id)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.map(|(v,)| v))
    }

    pub async fn put_setting(&self, principal_id: &str, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_settings (principal_id, key, value)
            VALUES (?, ?, ?)
            ON CONFLICT(principal_id, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(principal_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
