//! Database operations for Cadence
//!
//! Narrow repository surface over SQLite: each engine component uses only
//! the handful of operations listed here, so nothing outside this module
//! depends on the storage technology.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

use crate::error::Result;
use crate::policy::{SchedulePolicy, SlotRunState};
use crate::types::{
    BudgetSettings, ContentKind, ExecutionLogEntry, Post, PostStatus, RunStatus, ScheduleMode,
    ThemeCategory,
};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(crate::error::DbError::IoError)?;
        }

        // mode=rwc creates the database file if it doesn't exist.
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(crate::error::DbError::MigrationError)?;

        Ok(Self { pool })
    }

    // ========================================================================
    // Schedule policies
    // ========================================================================

    /// All enabled policies, in (account, kind) order.
    pub async fn list_enabled_policies(&self) -> Result<Vec<SchedulePolicy>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account, kind, enabled, posts_per_day, slots, mode,
                   themes, style_hints, theme_cursor, run_state
            FROM schedule_policies
            WHERE enabled = 1
            ORDER BY account, kind
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        rows.iter().map(row_to_policy).collect()
    }

    pub async fn load_policy(
        &self,
        account: &str,
        kind: ContentKind,
    ) -> Result<Option<SchedulePolicy>> {
        let row = sqlx::query(
            r#"
            SELECT id, account, kind, enabled, posts_per_day, slots, mode,
                   themes, style_hints, theme_cursor, run_state
            FROM schedule_policies
            WHERE account = ? AND kind = ?
            "#,
        )
        .bind(account)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        row.as_ref().map(row_to_policy).transpose()
    }

    /// Validate and upsert a policy. One policy per (account, kind).
    pub async fn save_policy(&self, policy: &SchedulePolicy) -> Result<()> {
        policy.validate()?;

        let slots = serde_json::to_string(&policy.slots)
            .map_err(|e| crate::error::CadenceError::InvalidInput(e.to_string()))?;
        let themes = serde_json::to_string(&policy.themes)
            .map_err(|e| crate::error::CadenceError::InvalidInput(e.to_string()))?;
        let run_state = serde_json::to_string(&policy.run_state)
            .map_err(|e| crate::error::CadenceError::InvalidInput(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO schedule_policies
                (account, kind, enabled, posts_per_day, slots, mode,
                 themes, style_hints, theme_cursor, run_state)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (account, kind) DO UPDATE SET
                enabled = excluded.enabled,
                posts_per_day = excluded.posts_per_day,
                slots = excluded.slots,
                mode = excluded.mode,
                themes = excluded.themes,
                style_hints = excluded.style_hints,
                theme_cursor = excluded.theme_cursor,
                run_state = excluded.run_state
            "#,
        )
        .bind(&policy.account)
        .bind(policy.kind.as_str())
        .bind(policy.enabled as i64)
        .bind(policy.posts_per_day)
        .bind(slots)
        .bind(policy.mode.as_str())
        .bind(themes)
        .bind(&policy.style_hints)
        .bind(policy.theme_cursor)
        .bind(run_state)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Persist slot bookkeeping for one policy.
    pub async fn update_run_state(&self, policy_id: i64, state: &SlotRunState) -> Result<()> {
        let json = serde_json::to_string(state)
            .map_err(|e| crate::error::CadenceError::InvalidInput(e.to_string()))?;

        sqlx::query("UPDATE schedule_policies SET run_state = ? WHERE id = ?")
            .bind(json)
            .bind(policy_id)
            .execute(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    pub async fn update_theme_cursor(&self, policy_id: i64, cursor: i64) -> Result<()> {
        sqlx::query("UPDATE schedule_policies SET theme_cursor = ? WHERE id = ?")
            .bind(cursor)
            .bind(policy_id)
            .execute(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    // ========================================================================
    // Theme categories
    // ========================================================================

    pub async fn list_enabled_categories(&self, account: &str) -> Result<Vec<ThemeCategory>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account, code, name, description, enabled, sort_order
            FROM theme_categories
            WHERE account = ? AND enabled = 1
            ORDER BY sort_order, code
            "#,
        )
        .bind(account)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| ThemeCategory {
                id: r.get("id"),
                account: r.get("account"),
                code: r.get("code"),
                name: r.get("name"),
                description: r.get("description"),
                enabled: r.get::<i64, _>("enabled") != 0,
                sort_order: r.get("sort_order"),
            })
            .collect())
    }

    pub async fn save_category(&self, category: &ThemeCategory) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO theme_categories
                (account, code, name, description, enabled, sort_order)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (account, code) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                enabled = excluded.enabled,
                sort_order = excluded.sort_order
            "#,
        )
        .bind(&category.account)
        .bind(&category.code)
        .bind(&category.name)
        .bind(&category.description)
        .bind(category.enabled as i64)
        .bind(category.sort_order)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Most recently used category codes for an account, newest first.
    /// This is the anti-repeat window the theme selector consumes.
    pub async fn recent_theme_codes(&self, account: &str, limit: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT theme_category
            FROM posts
            WHERE account = ? AND theme_category IS NOT NULL
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(account)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows.iter().map(|r| r.get("theme_category")).collect())
    }

    // ========================================================================
    // Posts
    // ========================================================================

    pub async fn create_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts
                (id, account, content, kind, target_id, status, created_at,
                 scheduled_at, posted_at, external_id, error_message,
                 theme_category, provider, model)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.account)
        .bind(&post.content)
        .bind(post.kind.as_str())
        .bind(&post.target_id)
        .bind(post.status.as_str())
        .bind(post.created_at)
        .bind(post.scheduled_at)
        .bind(post.posted_at)
        .bind(&post.external_id)
        .bind(&post.error_message)
        .bind(&post.theme_category)
        .bind(&post.provider)
        .bind(&post.model)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Persist the publish outcome for one post.
    pub async fn update_post_outcome(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE posts
            SET status = ?, posted_at = ?, external_id = ?, error_message = ?
            WHERE id = ?
            "#,
        )
        .bind(post.status.as_str())
        .bind(post.posted_at)
        .bind(&post.external_id)
        .bind(&post.error_message)
        .bind(&post.id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Pull a scheduled post back to draft. Returns false when the post
    /// does not exist or is not scheduled.
    pub async fn cancel_post(&self, post_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET status = 'draft', scheduled_at = NULL
            WHERE id = ? AND status = 'scheduled'
            "#,
        )
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query(
            r#"
            SELECT id, account, content, kind, target_id, status, created_at,
                   scheduled_at, posted_at, external_id, error_message,
                   theme_category, provider, model
            FROM posts WHERE id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        row.as_ref().map(row_to_post).transpose()
    }

    /// Scheduled posts whose time has come, oldest first.
    pub async fn due_scheduled_posts(&self, now: i64) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account, content, kind, target_id, status, created_at,
                   scheduled_at, posted_at, external_id, error_message,
                   theme_category, provider, model
            FROM posts
            WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= ?
            ORDER BY scheduled_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        rows.iter().map(row_to_post).collect()
    }

    pub async fn list_posts_by_status(
        &self,
        status: PostStatus,
        limit: i64,
    ) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account, content, kind, target_id, status, created_at,
                   scheduled_at, posted_at, external_id, error_message,
                   theme_category, provider, model
            FROM posts
            WHERE status = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        rows.iter().map(row_to_post).collect()
    }

    /// Post counts by status, for queue stats.
    pub async fn count_posts_by_status(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n
            FROM posts
            GROUP BY status
            ORDER BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("n")))
            .collect())
    }

    // ========================================================================
    // Usage records & budget settings
    // ========================================================================

    /// Append one usage record. Single INSERT, atomic by construction.
    pub async fn append_usage(&self, record: &crate::types::UsageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_records
                (provider, model, input_tokens, output_tokens,
                 cache_read_tokens, cache_write_tokens, batch, cost, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.provider)
        .bind(&record.model)
        .bind(record.input_tokens)
        .bind(record.output_tokens)
        .bind(record.cache_read_tokens)
        .bind(record.cache_write_tokens)
        .bind(record.batch as i64)
        .bind(record.cost)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Total recorded cost for `start <= recorded_at < end`.
    pub async fn sum_usage_cost(&self, start: i64, end: i64) -> Result<f64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(cost), 0.0) AS total
            FROM usage_records
            WHERE recorded_at >= ? AND recorded_at < ?
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.get::<f64, _>("total"))
    }

    pub async fn get_budget_settings(&self) -> Result<Option<BudgetSettings>> {
        let row = sqlx::query(
            r#"
            SELECT monthly_budget, pause_on_exhausted, prefer_batch, prefer_caching
            FROM budget_settings WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.map(|r| BudgetSettings {
            monthly_budget: r.get("monthly_budget"),
            pause_on_exhausted: r.get::<i64, _>("pause_on_exhausted") != 0,
            prefer_batch: r.get::<i64, _>("prefer_batch") != 0,
            prefer_caching: r.get::<i64, _>("prefer_caching") != 0,
        }))
    }

    pub async fn save_budget_settings(&self, settings: &BudgetSettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO budget_settings
                (id, monthly_budget, pause_on_exhausted, prefer_batch, prefer_caching)
            VALUES (1, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                monthly_budget = excluded.monthly_budget,
                pause_on_exhausted = excluded.pause_on_exhausted,
                prefer_batch = excluded.prefer_batch,
                prefer_caching = excluded.prefer_caching
            "#,
        )
        .bind(settings.monthly_budget)
        .bind(settings.pause_on_exhausted as i64)
        .bind(settings.prefer_batch as i64)
        .bind(settings.prefer_caching as i64)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    // ========================================================================
    // Execution log
    // ========================================================================

    pub async fn append_execution_log(&self, entry: &ExecutionLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_log
                (account, kind, generated, scheduled, posted, status,
                 error_message, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.account)
        .bind(entry.kind.as_str())
        .bind(entry.generated)
        .bind(entry.scheduled)
        .bind(entry.posted)
        .bind(entry.status.as_str())
        .bind(&entry.error_message)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Delete execution-log entries older than `before`. Returns rows removed.
    pub async fn cleanup_execution_log(&self, before: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM execution_log WHERE created_at < ?")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    pub async fn list_execution_log(&self, limit: i64) -> Result<Vec<ExecutionLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account, kind, generated, scheduled, posted, status,
                   error_message, created_at
            FROM execution_log
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        rows.iter()
            .map(|r| {
                Ok(ExecutionLogEntry {
                    id: r.get("id"),
                    account: r.get("account"),
                    kind: parse_kind(&r.get::<String, _>("kind"))?,
                    generated: r.get("generated"),
                    scheduled: r.get("scheduled"),
                    posted: r.get("posted"),
                    status: RunStatus::parse(&r.get::<String, _>("status"))
                        .unwrap_or(RunStatus::Failed),
                    error_message: r.get("error_message"),
                    created_at: r.get("created_at"),
                })
            })
            .collect()
    }
}

fn parse_kind(s: &str) -> Result<ContentKind> {
    ContentKind::parse(s)
        .ok_or_else(|| crate::error::CadenceError::InvalidInput(format!("Unknown kind: {}", s)))
}

fn row_to_policy(r: &sqlx::sqlite::SqliteRow) -> Result<SchedulePolicy> {
    let slots: Vec<String> = serde_json::from_str(&r.get::<String, _>("slots"))
        .map_err(|e| crate::error::CadenceError::InvalidInput(e.to_string()))?;
    let themes: Vec<String> = serde_json::from_str(&r.get::<String, _>("themes"))
        .map_err(|e| crate::error::CadenceError::InvalidInput(e.to_string()))?;
    let run_state = match r.get::<Option<String>, _>("run_state") {
        Some(json) => serde_json::from_str(&json)
            .map_err(|e| crate::error::CadenceError::InvalidInput(e.to_string()))?,
        None => SlotRunState::default(),
    };

    Ok(SchedulePolicy {
        id: r.get("id"),
        account: r.get("account"),
        kind: parse_kind(&r.get::<String, _>("kind"))?,
        enabled: r.get::<i64, _>("enabled") != 0,
        posts_per_day: r.get("posts_per_day"),
        slots,
        mode: ScheduleMode::parse(&r.get::<String, _>("mode"))
            .ok_or_else(|| crate::error::CadenceError::InvalidInput("Unknown mode".into()))?,
        themes,
        style_hints: r.get("style_hints"),
        theme_cursor: r.get("theme_cursor"),
        run_state,
    })
}

fn row_to_post(r: &sqlx::sqlite::SqliteRow) -> Result<Post> {
    Ok(Post {
        id: r.get("id"),
        account: r.get("account"),
        content: r.get("content"),
        kind: parse_kind(&r.get::<String, _>("kind"))?,
        target_id: r.get("target_id"),
        status: PostStatus::parse(&r.get::<String, _>("status"))
            .ok_or_else(|| crate::error::CadenceError::InvalidInput("Unknown status".into()))?,
        created_at: r.get("created_at"),
        scheduled_at: r.get("scheduled_at"),
        posted_at: r.get("posted_at"),
        external_id: r.get("external_id"),
        error_message: r.get("error_message"),
        theme_category: r.get("theme_category"),
        provider: r.get("provider"),
        model: r.get("model"),
    })
}
