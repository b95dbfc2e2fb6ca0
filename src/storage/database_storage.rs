use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, error, info};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    SqlxSqliteConnector,
};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error_handling::types::StorageError;
use crate::session_management::session::{draft_object, merge_draft, Session, SessionImage};
use crate::session_management::{Stage, Statement};
use crate::storage::db_entities::{images, scenarios};
use crate::storage::types::{
    CategorySummary, Image, ImageCategory, MetricsSummary, Scenario, ScenarioLoad,
    ScenarioOverview, SessionFilter, StatementTally,
};

// Internal row mapping for sessions to avoid manual try_get
#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: String,
    status: String,
    scenario_id: Option<String>,
    stage: Option<String>,
    target_image_count: i64,
    statement_order: i64,
    started_at: String,
    updated_at: String,
    completed_at: Option<String>,
    draft: Option<String>,
    final_document: Option<String>,
}

impl SessionRow {
    fn into_session(self) -> Result<Session, StorageError> {
        let bad = |what: &str, e: String| StorageError::ReadFailed(format!("{}: {}", what, e));
        Ok(Session {
            id: Uuid::parse_str(&self.id).map_err(|e| bad("session id", e.to_string()))?,
            status: self.status.parse().map_err(|e| bad("status", e))?,
            scenario_id: self.scenario_id,
            stage: match self.stage {
                Some(s) => Some(s.parse::<Stage>().map_err(|e| bad("stage", e))?),
                None => None,
            },
            target_image_count: self.target_image_count as u32,
            statement_order: Statement::try_from(self.statement_order as u8)
                .map_err(|e| bad("statement_order", e))?,
            started_at: parse_timestamp(&self.started_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            completed_at: parse_optional_timestamp(self.completed_at)?,
            draft: parse_optional_json(self.draft)?,
            final_document: parse_optional_json(self.final_document)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionImageRow {
    image_id: String,
    category: String,
    order_index: i64,
    statement: i64,
    assigned_at: String,
    completed_at: Option<String>,
}

impl SessionImageRow {
    fn into_session_image(self) -> Result<SessionImage, StorageError> {
        Ok(SessionImage {
            category: self.category.parse().map_err(StorageError::ReadFailed)?,
            image_id: self.image_id,
            order_index: self.order_index as u32,
            statement: Statement::try_from(self.statement as u8)
                .map_err(StorageError::ReadFailed)?,
            assigned_at: parse_timestamp(&self.assigned_at)?,
            completed_at: parse_optional_timestamp(self.completed_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ImageRow {
    image_id: String,
    category: String,
    assigned_count: i64,
    completed_count: i64,
    last_assigned_at: Option<String>,
    enabled: bool,
}

impl ImageRow {
    fn into_image(self) -> Result<Image, StorageError> {
        Ok(Image {
            category: self.category.parse().map_err(StorageError::ReadFailed)?,
            image_id: self.image_id,
            assigned_count: self.assigned_count.max(0) as u64,
            completed_count: self.completed_count.max(0) as u64,
            last_assigned_at: parse_optional_timestamp(self.last_assigned_at)?,
            enabled: self.enabled,
        })
    }
}

/// Timestamps are stored as fixed-width RFC3339 text so they sort lexically.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StorageError::ReadFailed(format!("bad timestamp {}: {}", s, e)))
}

fn parse_optional_timestamp(s: Option<String>) -> Result<Option<DateTime<Utc>>, StorageError> {
    s.as_deref().map(parse_timestamp).transpose()
}

fn parse_optional_json(s: Option<String>) -> Result<Option<Value>, StorageError> {
    match s {
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| StorageError::ReadFailed(format!("bad json document: {}", e))),
        None => Ok(None),
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn read_failed(context: &'static str) -> impl Fn(sqlx::Error) -> StorageError {
    move |e| {
        error!("{}: {}", context, e);
        StorageError::ReadFailed(format!("{}: {}", context, e))
    }
}

fn write_failed(context: &'static str) -> impl Fn(sqlx::Error) -> StorageError {
    move |e| {
        error!("{}: {}", context, e);
        StorageError::WriteFailed(format!("{}: {}", context, e))
    }
}

fn orm_read_failed(context: &'static str) -> impl Fn(sea_orm::DbErr) -> StorageError {
    move |e| {
        error!("{}: {}", context, e);
        StorageError::ReadFailed(format!("{}: {}", context, e))
    }
}

fn orm_write_failed(context: &'static str) -> impl Fn(sea_orm::DbErr) -> StorageError {
    move |e| {
        error!("{}: {}", context, e);
        StorageError::WriteFailed(format!("{}: {}", context, e))
    }
}

const SCHEMA: [&str; 8] = [
    "CREATE TABLE IF NOT EXISTS scenarios (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        short_label TEXT,
        enabled INTEGER NOT NULL DEFAULT 1
    );",
    "CREATE TABLE IF NOT EXISTS images (
        image_id TEXT PRIMARY KEY,
        category TEXT NOT NULL,
        assigned_count INTEGER NOT NULL DEFAULT 0,
        completed_count INTEGER NOT NULL DEFAULT 0,
        last_assigned_at TEXT,
        enabled INTEGER NOT NULL DEFAULT 1,
        CHECK (assigned_count >= completed_count AND completed_count >= 0)
    );",
    "CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL CHECK (status IN ('in_progress', 'completed')),
        scenario_id TEXT REFERENCES scenarios(id),
        stage TEXT,
        target_image_count INTEGER NOT NULL,
        statement_order INTEGER NOT NULL CHECK (statement_order IN (1, 2)),
        started_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        completed_at TEXT,
        draft TEXT,
        final_document TEXT
    );",
    "CREATE TABLE IF NOT EXISTS session_images (
        session_id TEXT NOT NULL REFERENCES sessions(id),
        image_id TEXT NOT NULL REFERENCES images(image_id),
        order_index INTEGER NOT NULL,
        statement INTEGER NOT NULL CHECK (statement IN (1, 2)),
        assigned_at TEXT NOT NULL,
        completed_at TEXT,
        PRIMARY KEY (session_id, image_id),
        UNIQUE (session_id, order_index)
    );",
    "CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);",
    "CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at);",
    "CREATE INDEX IF NOT EXISTS idx_images_category ON images(category, enabled);",
    "CREATE INDEX IF NOT EXISTS idx_session_images_image ON session_images(image_id);",
];

const SESSION_COLUMNS: &str = "id, status, scenario_id, stage, target_image_count, statement_order, \
     started_at, updated_at, completed_at, draft, final_document";

/// SQLite-backed persistence for scenarios, the image pool and sessions.
///
/// Cheap to clone; clones share the same connection pool.
#[derive(Clone)]
pub struct DatabaseStorage {
    pool: SqlitePool,
    orm: DatabaseConnection,
}

impl DatabaseStorage {
    /// Default database filename used in the application's working directory
    pub const DEFAULT_DB_FILE: &'static str = "annostudy.sqlite3";

    pub async fn new_file<P: AsRef<Path>>(
        path: P,
        max_connections: u32,
    ) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::ConnectionFailed(format!(
                        "creating {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let opts = SqliteConnectOptions::from_str("sqlite://")
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?
            .filename(path_ref)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(opts)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        let storage = Self {
            orm: SqlxSqliteConnector::from_sqlx_sqlite_pool(pool.clone()),
            pool,
        };
        storage.migrate().await?;
        info!("DatabaseStorage opened at {}", path_ref.display());
        Ok(storage)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;
        }
        Ok(())
    }

    // ---- scenarios -------------------------------------------------------

    /// Inserts the scenario unless its id already exists; returns whether a row was added.
    pub async fn insert_scenario_if_absent(&self, scenario: &Scenario) -> Result<bool, StorageError> {
        let model = scenarios::ActiveModel {
            id: Set(scenario.id.clone()),
            title: Set(scenario.title.clone()),
            description: Set(scenario.description.clone()),
            short_label: Set(scenario.short_label.clone()),
            enabled: Set(scenario.enabled),
        };
        let inserted = scenarios::Entity::insert(model)
            .on_conflict(
                OnConflict::column(scenarios::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.orm)
            .await
            .map_err(orm_write_failed("insert scenario"))?;
        Ok(inserted > 0)
    }

    pub async fn list_scenarios(&self) -> Result<Vec<Scenario>, StorageError> {
        let rows = scenarios::Entity::find()
            .order_by_asc(scenarios::Column::Id)
            .all(&self.orm)
            .await
            .map_err(orm_read_failed("list scenarios"))?;
        Ok(rows.into_iter().map(Scenario::from).collect())
    }

    pub async fn get_scenario(&self, id: &str) -> Result<Option<Scenario>, StorageError> {
        let row = scenarios::Entity::find_by_id(id.to_string())
            .one(&self.orm)
            .await
            .map_err(orm_read_failed("get scenario"))?;
        Ok(row.map(Scenario::from))
    }

    pub async fn set_scenario_enabled(
        &self,
        id: &str,
        enabled: bool,
    ) -> Result<Option<Scenario>, StorageError> {
        let Some(row) = scenarios::Entity::find_by_id(id.to_string())
            .one(&self.orm)
            .await
            .map_err(orm_read_failed("get scenario"))?
        else {
            return Ok(None);
        };
        let mut active: scenarios::ActiveModel = row.into();
        active.enabled = Set(enabled);
        let updated = active
            .update(&self.orm)
            .await
            .map_err(orm_write_failed("toggle scenario"))?;
        info!("Scenario {} enabled={}", id, enabled);
        Ok(Some(updated.into()))
    }

    /// Enabled scenarios with the number of sessions completed under each.
    pub async fn enabled_scenarios_with_completed_counts(
        &self,
    ) -> Result<Vec<ScenarioLoad>, StorageError> {
        let rows = sqlx::query(
            "SELECT c.id, c.title, c.description, c.short_label, c.enabled,
                    COALESCE(SUM(CASE WHEN s.status = 'completed' THEN 1 ELSE 0 END), 0) AS completed_count
             FROM scenarios c
             LEFT JOIN sessions s ON s.scenario_id = c.id
             WHERE c.enabled = 1
             GROUP BY c.id, c.title, c.description, c.short_label, c.enabled
             ORDER BY c.id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(read_failed("scenario loads"))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let completed: i64 = row
                .try_get("completed_count")
                .map_err(read_failed("scenario loads"))?;
            out.push(ScenarioLoad {
                scenario: Scenario {
                    id: row.try_get("id").map_err(read_failed("scenario loads"))?,
                    title: row.try_get("title").map_err(read_failed("scenario loads"))?,
                    description: row
                        .try_get("description")
                        .map_err(read_failed("scenario loads"))?,
                    short_label: row
                        .try_get("short_label")
                        .map_err(read_failed("scenario loads"))?,
                    enabled: row.try_get("enabled").map_err(read_failed("scenario loads"))?,
                },
                completed_count: completed.max(0) as u64,
            });
        }
        Ok(out)
    }

    // ---- image pool ------------------------------------------------------

    /// Inserts an image unless its id already exists; returns whether a row was added.
    pub async fn insert_image_if_absent(
        &self,
        image_id: &str,
        category: ImageCategory,
    ) -> Result<bool, StorageError> {
        let model = images::ActiveModel {
            image_id: Set(image_id.to_string()),
            category: Set(category.as_str().to_string()),
            assigned_count: Set(0),
            completed_count: Set(0),
            last_assigned_at: Set(None),
            enabled: Set(true),
        };
        let inserted = images::Entity::insert(model)
            .on_conflict(
                OnConflict::column(images::Column::ImageId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.orm)
            .await
            .map_err(orm_write_failed("insert image"))?;
        Ok(inserted > 0)
    }

    pub async fn set_image_enabled(&self, image_id: &str, enabled: bool) -> Result<bool, StorageError> {
        let Some(row) = images::Entity::find_by_id(image_id.to_string())
            .one(&self.orm)
            .await
            .map_err(orm_read_failed("get image"))?
        else {
            return Ok(false);
        };
        let mut active: images::ActiveModel = row.into();
        active.enabled = Set(enabled);
        active
            .update(&self.orm)
            .await
            .map_err(orm_write_failed("toggle image"))?;
        Ok(true)
    }

    pub async fn get_image(&self, image_id: &str) -> Result<Option<Image>, StorageError> {
        let row = images::Entity::find_by_id(image_id.to_string())
            .one(&self.orm)
            .await
            .map_err(orm_read_failed("get image"))?;
        row.map(Image::try_from)
            .transpose()
            .map_err(StorageError::ReadFailed)
    }

    pub async fn list_images(&self, category: ImageCategory) -> Result<Vec<Image>, StorageError> {
        let rows = images::Entity::find()
            .filter(images::Column::Category.eq(category.as_str()))
            .order_by_asc(images::Column::ImageId)
            .all(&self.orm)
            .await
            .map_err(orm_read_failed("list images"))?;
        rows.into_iter()
            .map(|m| Image::try_from(m).map_err(StorageError::ReadFailed))
            .collect()
    }

    /// Enabled images of one category, least used first, remaining ties in random order.
    pub async fn image_candidates(&self, category: ImageCategory) -> Result<Vec<Image>, StorageError> {
        let rows: Vec<ImageRow> = sqlx::query_as(
            "SELECT image_id, category, assigned_count, completed_count, last_assigned_at, enabled
             FROM images
             WHERE enabled = 1 AND category = ?1
             ORDER BY assigned_count ASC, completed_count ASC, random()",
        )
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(read_failed("image candidates"))?;
        rows.into_iter().map(ImageRow::into_image).collect()
    }

    /// Historical statement counts for the given images; images never shown are absent.
    pub async fn statement_tallies(
        &self,
        image_ids: &[String],
    ) -> Result<HashMap<String, StatementTally>, StorageError> {
        if image_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT image_id,
                    SUM(CASE WHEN statement = 1 THEN 1 ELSE 0 END) AS s1,
                    SUM(CASE WHEN statement = 2 THEN 1 ELSE 0 END) AS s2
             FROM session_images
             WHERE image_id IN ({})
             GROUP BY image_id",
            placeholders(image_ids.len())
        );
        let mut q = sqlx::query(&sql);
        for id in image_ids {
            q = q.bind(id);
        }
        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(read_failed("statement tallies"))?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("image_id").map_err(read_failed("statement tallies"))?;
            let s1: i64 = row.try_get("s1").map_err(read_failed("statement tallies"))?;
            let s2: i64 = row.try_get("s2").map_err(read_failed("statement tallies"))?;
            out.insert(
                id,
                StatementTally {
                    statement1: s1.max(0) as u64,
                    statement2: s2.max(0) as u64,
                },
            );
        }
        Ok(out)
    }

    // ---- sessions --------------------------------------------------------

    /// Persists a new session with its image assignments and bumps the
    /// assignment counters of those images, all in one transaction.
    pub async fn create_session(
        &self,
        session: &Session,
        assignments: &[SessionImage],
    ) -> Result<(), StorageError> {
        let now = format_timestamp(session.started_at);
        let mut tx = self.pool.begin().await.map_err(write_failed("begin"))?;

        if !assignments.is_empty() {
            let sql = format!(
                "UPDATE images
                 SET assigned_count = assigned_count + 1, last_assigned_at = ?
                 WHERE image_id IN ({})",
                placeholders(assignments.len())
            );
            let mut q = sqlx::query(&sql).bind(&now);
            for a in assignments {
                q = q.bind(&a.image_id);
            }
            let updated = q
                .execute(&mut *tx)
                .await
                .map_err(write_failed("bump assigned counters"))?;
            if updated.rows_affected() != assignments.len() as u64 {
                return Err(StorageError::WriteFailed(format!(
                    "expected {} image rows, updated {}",
                    assignments.len(),
                    updated.rows_affected()
                )));
            }
        }

        sqlx::query(
            "INSERT INTO sessions (id, status, scenario_id, stage, target_image_count, statement_order,
                                   started_at, updated_at, completed_at, draft, final_document)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, NULL)",
        )
        .bind(session.id.to_string())
        .bind(session.status.as_str())
        .bind(session.scenario_id.clone())
        .bind(session.stage.map(|s| s.as_str()))
        .bind(session.target_image_count as i64)
        .bind(u8::from(session.statement_order) as i64)
        .bind(&now)
        .bind(format_timestamp(session.updated_at))
        .bind(session.draft.as_ref().map(|d| d.to_string()))
        .execute(&mut *tx)
        .await
        .map_err(write_failed("insert session"))?;

        for a in assignments {
            sqlx::query(
                "INSERT INTO session_images (session_id, image_id, order_index, statement, assigned_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(session.id.to_string())
            .bind(&a.image_id)
            .bind(a.order_index as i64)
            .bind(u8::from(a.statement) as i64)
            .bind(format_timestamp(a.assigned_at))
            .execute(&mut *tx)
            .await
            .map_err(write_failed("insert session image"))?;
        }

        tx.commit().await.map_err(write_failed("commit session"))?;
        debug!("Session {} persisted with {} images", session.id, assignments.len());
        Ok(())
    }

    pub async fn get_session(&self, id: Uuid) -> Result<Option<Session>, StorageError> {
        let sql = format!("SELECT {} FROM sessions WHERE id = ?1", SESSION_COLUMNS);
        let row: Option<SessionRow> = sqlx::query_as(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(read_failed("get session"))?;
        row.map(SessionRow::into_session).transpose()
    }

    /// The session's images in presentation order.
    pub async fn get_session_images(&self, id: Uuid) -> Result<Vec<SessionImage>, StorageError> {
        let rows: Vec<SessionImageRow> = sqlx::query_as(
            "SELECT si.image_id, i.category, si.order_index, si.statement, si.assigned_at, si.completed_at
             FROM session_images si
             JOIN images i ON i.image_id = si.image_id
             WHERE si.session_id = ?1
             ORDER BY si.order_index ASC",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(read_failed("get session images"))?;
        rows.into_iter()
            .map(SessionImageRow::into_session_image)
            .collect()
    }

    /// Shallow-merges `patch` into the draft of an in-progress session.
    ///
    /// Returns `false` without writing anything when the session is missing
    /// or no longer in progress. The guarded UPDATE runs first so the
    /// transaction holds the write lock before reading the draft.
    pub async fn merge_session_draft(
        &self,
        id: Uuid,
        stage: Option<Stage>,
        patch: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await.map_err(write_failed("begin"))?;
        let touched = sqlx::query(
            "UPDATE sessions
             SET stage = COALESCE(?1, stage), updated_at = ?2
             WHERE id = ?3 AND status = 'in_progress'",
        )
        .bind(stage.map(|s| s.as_str()))
        .bind(format_timestamp(now))
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(write_failed("touch session"))?;
        if touched.rows_affected() == 0 {
            return Ok(false);
        }

        let stored: Option<String> = sqlx::query_scalar("SELECT draft FROM sessions WHERE id = ?1")
            .bind(id.to_string())
            .fetch_one(&mut *tx)
            .await
            .map_err(read_failed("read draft"))?;
        let mut draft = draft_object(parse_optional_json(stored)?);
        merge_draft(&mut draft, patch);

        sqlx::query("UPDATE sessions SET draft = ?1 WHERE id = ?2")
            .bind(Value::Object(draft).to_string())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(write_failed("write draft"))?;
        tx.commit().await.map_err(write_failed("commit draft"))?;
        Ok(true)
    }

    /// Completes an in-progress session: stores the final document, stamps the
    /// session and its image rows, and bumps completion counters.
    ///
    /// Returns `false` and changes nothing if the session was not in progress.
    pub async fn complete_session(
        &self,
        id: Uuid,
        final_document: &Value,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let ts = format_timestamp(now);
        let mut tx = self.pool.begin().await.map_err(write_failed("begin"))?;
        let flipped = sqlx::query(
            "UPDATE sessions
             SET status = 'completed', final_document = ?1, completed_at = ?2, updated_at = ?2
             WHERE id = ?3 AND status = 'in_progress'",
        )
        .bind(final_document.to_string())
        .bind(&ts)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(write_failed("complete session"))?;
        if flipped.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("UPDATE session_images SET completed_at = ?1 WHERE session_id = ?2")
            .bind(&ts)
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(write_failed("stamp session images"))?;
        sqlx::query(
            "UPDATE images
             SET completed_count = completed_count + 1
             WHERE image_id IN (SELECT DISTINCT image_id FROM session_images WHERE session_id = ?1)",
        )
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(write_failed("bump completed counters"))?;

        tx.commit().await.map_err(write_failed("commit completion"))?;
        Ok(true)
    }

    // ---- reporting -------------------------------------------------------

    pub async fn list_sessions(&self, filter: Option<SessionFilter>) -> Result<Vec<Session>, StorageError> {
        let mut sql = format!("SELECT {} FROM sessions", SESSION_COLUMNS);
        let mut clauses: Vec<&str> = Vec::new();
        let mut binds: Vec<String> = Vec::new();
        if let Some(f) = &filter {
            if let Some(status) = f.status {
                clauses.push("status = ?");
                binds.push(status.as_str().into());
            }
            if let Some(ref scenario) = f.scenario_id {
                clauses.push("scenario_id = ?");
                binds.push(scenario.clone());
            }
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY started_at DESC");

        let mut q = sqlx::query_as::<_, SessionRow>(&sql);
        for b in &binds {
            q = q.bind(b);
        }
        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(read_failed("list sessions"))?;
        rows.into_iter().map(SessionRow::into_session).collect()
    }

    pub async fn scenario_overview(&self) -> Result<Vec<ScenarioOverview>, StorageError> {
        let rows = sqlx::query(
            "SELECT c.id, c.title, c.description, c.enabled,
                    COALESCE(SUM(CASE WHEN s.status = 'completed' THEN 1 ELSE 0 END), 0) AS completed,
                    COALESCE(SUM(CASE WHEN s.status = 'in_progress' THEN 1 ELSE 0 END), 0) AS in_progress,
                    COUNT(s.id) AS total
             FROM scenarios c
             LEFT JOIN sessions s ON s.scenario_id = c.id
             GROUP BY c.id, c.title, c.description, c.enabled
             ORDER BY c.id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(read_failed("scenario overview"))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let get = |col: &str| -> Result<i64, StorageError> {
                row.try_get::<i64, _>(col).map_err(read_failed("scenario overview"))
            };
            out.push(ScenarioOverview {
                id: row.try_get("id").map_err(read_failed("scenario overview"))?,
                title: row.try_get("title").map_err(read_failed("scenario overview"))?,
                description: row
                    .try_get("description")
                    .map_err(read_failed("scenario overview"))?,
                enabled: row.try_get("enabled").map_err(read_failed("scenario overview"))?,
                completed: get("completed")?.max(0) as u64,
                in_progress: get("in_progress")?.max(0) as u64,
                total: get("total")?.max(0) as u64,
            });
        }
        Ok(out)
    }

    pub async fn category_summary(&self) -> Result<Vec<CategorySummary>, StorageError> {
        let rows = sqlx::query(
            "SELECT category,
                    COALESCE(SUM(CASE WHEN enabled = 1 THEN 1 ELSE 0 END), 0) AS enabled_images,
                    COALESCE(SUM(assigned_count), 0) AS assigned_sum,
                    COALESCE(SUM(completed_count), 0) AS completed_sum
             FROM images
             GROUP BY category
             ORDER BY category ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(read_failed("category summary"))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let get = |col: &str| -> Result<i64, StorageError> {
                row.try_get::<i64, _>(col).map_err(read_failed("category summary"))
            };
            out.push(CategorySummary {
                category: row.try_get("category").map_err(read_failed("category summary"))?,
                enabled_images: get("enabled_images")?.max(0) as u64,
                assigned_sum: get("assigned_sum")?.max(0) as u64,
                completed_sum: get("completed_sum")?.max(0) as u64,
            });
        }
        Ok(out)
    }

    pub async fn metrics_summary(&self) -> Result<MetricsSummary, StorageError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS completed_sessions,
                    AVG((julianday(completed_at) - julianday(started_at)) * 1440.0) AS avg_minutes
             FROM sessions
             WHERE completed_at IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(read_failed("metrics summary"))?;
        let completed: i64 = row
            .try_get("completed_sessions")
            .map_err(read_failed("metrics summary"))?;
        let avg: Option<f64> = row
            .try_get("avg_minutes")
            .map_err(read_failed("metrics summary"))?;
        Ok(MetricsSummary {
            completed_sessions: completed.max(0) as u64,
            avg_completion_minutes: avg.map(|m| (m * 100.0).round() / 100.0),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::session_management::SessionStatus;
    use crate::storage::types::storage_now;
    use serde_json::json;
    use std::path::PathBuf;
    use tempfile::TempDir;

    pub(crate) async fn temp_db() -> (TempDir, DatabaseStorage) {
        let dir = TempDir::new().unwrap();
        let path: PathBuf = dir.path().join("test.sqlite3");
        let storage = DatabaseStorage::new_file(path, 4).await.unwrap();
        (dir, storage)
    }

    pub(crate) fn scenario(id: &str, enabled: bool) -> Scenario {
        Scenario {
            id: id.into(),
            title: format!("{} title", id),
            description: format!("{} description", id),
            short_label: None,
            enabled,
        }
    }

    fn in_progress_session(id: Uuid) -> Session {
        let now = storage_now();
        Session {
            id,
            status: SessionStatus::InProgress,
            scenario_id: Some("smart_camera".into()),
            stage: None,
            target_image_count: 2,
            statement_order: Statement::One,
            started_at: now,
            updated_at: now,
            completed_at: None,
            draft: None,
            final_document: None,
        }
    }

    fn assignment(image_id: &str, order_index: u32, statement: Statement) -> SessionImage {
        SessionImage {
            image_id: image_id.into(),
            category: ImageCategory::HealthMedical,
            order_index,
            statement,
            assigned_at: storage_now(),
            completed_at: None,
        }
    }

    async fn seeded_session(storage: &DatabaseStorage) -> Uuid {
        storage
            .insert_scenario_if_absent(&scenario("smart_camera", true))
            .await
            .unwrap();
        for id in ["a.jpg", "b.jpg"] {
            storage
                .insert_image_if_absent(id, ImageCategory::HealthMedical)
                .await
                .unwrap();
        }
        let id = Uuid::new_v4();
        storage
            .create_session(
                &in_progress_session(id),
                &[
                    assignment("a.jpg", 0, Statement::One),
                    assignment("b.jpg", 1, Statement::Two),
                ],
            )
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_existing_flags() {
        let (_dir, storage) = temp_db().await;
        assert!(storage
            .insert_scenario_if_absent(&scenario("ar_assistant", true))
            .await
            .unwrap());
        storage
            .set_scenario_enabled("ar_assistant", false)
            .await
            .unwrap();
        assert!(!storage
            .insert_scenario_if_absent(&scenario("ar_assistant", true))
            .await
            .unwrap());
        let fetched = storage.get_scenario("ar_assistant").await.unwrap().unwrap();
        assert!(!fetched.enabled);
        assert!(storage.set_scenario_enabled("nope", true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_session_bumps_assigned_counters() {
        let (_dir, storage) = temp_db().await;
        let id = seeded_session(&storage).await;

        let images = storage.get_session_images(id).await.unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].image_id, "a.jpg");
        assert_eq!(images[1].statement, Statement::Two);

        let a = storage.get_image("a.jpg").await.unwrap().unwrap();
        assert_eq!(a.assigned_count, 1);
        assert_eq!(a.completed_count, 0);
        assert!(a.last_assigned_at.is_some());

        let tallies = storage
            .statement_tallies(&["a.jpg".into(), "b.jpg".into(), "c.jpg".into()])
            .await
            .unwrap();
        assert_eq!(tallies["a.jpg"].statement1, 1);
        assert_eq!(tallies["b.jpg"].statement2, 1);
        assert!(!tallies.contains_key("c.jpg"));
    }

    #[tokio::test]
    async fn test_create_session_rolls_back_on_unknown_image() {
        let (_dir, storage) = temp_db().await;
        storage
            .insert_image_if_absent("a.jpg", ImageCategory::HealthMedical)
            .await
            .unwrap();
        let id = Uuid::new_v4();
        let result = storage
            .create_session(
                &in_progress_session(id),
                &[
                    assignment("a.jpg", 0, Statement::One),
                    assignment("ghost.jpg", 1, Statement::Two),
                ],
            )
            .await;
        assert!(result.is_err());
        assert!(storage.get_session(id).await.unwrap().is_none());
        let a = storage.get_image("a.jpg").await.unwrap().unwrap();
        assert_eq!(a.assigned_count, 0);
    }

    #[tokio::test]
    async fn test_merge_and_complete_guards() {
        let (_dir, storage) = temp_db().await;
        let id = seeded_session(&storage).await;

        let patch = match json!({ "demographics": { "gender": "f" } }) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        assert!(storage
            .merge_session_draft(id, Some(Stage::Annotate), patch.clone(), storage_now())
            .await
            .unwrap());
        let session = storage.get_session(id).await.unwrap().unwrap();
        assert_eq!(session.stage, Some(Stage::Annotate));
        assert_eq!(session.draft, Some(json!({ "demographics": { "gender": "f" } })));

        let done = storage_now();
        assert!(storage
            .complete_session(id, &json!({ "ok": true }), done)
            .await
            .unwrap());
        assert!(!storage
            .complete_session(id, &json!({ "ok": false }), storage_now())
            .await
            .unwrap());
        assert!(!storage
            .merge_session_draft(id, None, patch, storage_now())
            .await
            .unwrap());

        let session = storage.get_session(id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.completed_at, Some(done));
        assert_eq!(session.final_document, Some(json!({ "ok": true })));
        for image in storage.get_session_images(id).await.unwrap() {
            assert_eq!(image.completed_at, Some(done));
        }
        let a = storage.get_image("a.jpg").await.unwrap().unwrap();
        assert_eq!((a.assigned_count, a.completed_count), (1, 1));
    }

    #[tokio::test]
    async fn test_reporting_queries() {
        let (_dir, storage) = temp_db().await;
        let id = seeded_session(&storage).await;
        storage
            .complete_session(id, &json!({}), storage_now())
            .await
            .unwrap();

        let overview = storage.scenario_overview().await.unwrap();
        assert_eq!(overview.len(), 1);
        assert_eq!((overview[0].completed, overview[0].in_progress, overview[0].total), (1, 0, 1));

        let summary = storage.category_summary().await.unwrap();
        assert_eq!(summary[0].category, "Health_medical");
        assert_eq!(summary[0].enabled_images, 2);
        assert_eq!(summary[0].assigned_sum, 2);
        assert_eq!(summary[0].completed_sum, 2);

        let metrics = storage.metrics_summary().await.unwrap();
        assert_eq!(metrics.completed_sessions, 1);
        assert!(metrics.avg_completion_minutes.is_some());

        let completed = storage
            .list_sessions(Some(SessionFilter {
                status: Some(SessionStatus::Completed),
                ..Default::default()
            }))
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        let in_progress = storage
            .list_sessions(Some(SessionFilter {
                status: Some(SessionStatus::InProgress),
                ..Default::default()
            }))
            .await
            .unwrap();
        assert!(in_progress.is_empty());
    }
}
