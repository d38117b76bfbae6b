use std::path::Path;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

use crate::domain::{BlockRef, Evaluation, ModuleMeta, Ordinate, Process};

use super::{Result, StoreError};

/// Sort direction for evaluation range queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

/// Range query over a process's evaluations. `from` is exclusive, `to`
/// inclusive, both by ordinate; `None` leaves that end open.
#[derive(Clone, Debug, Default)]
pub struct EvaluationQuery {
    pub process_id: String,
    pub from: Option<Ordinate>,
    pub to: Option<Ordinate>,
    pub only_cron: bool,
    pub limit: Option<u32>,
    pub sort: SortDir,
}

/// Where a checkpoint record points: a local file in the checkpoint
/// directory, or an uploaded transaction on the content-addressed network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckpointLocation {
    File(String),
    Remote(String),
}

impl CheckpointLocation {
    fn kind(&self) -> &'static str {
        match self {
            CheckpointLocation::File(_) => "file",
            CheckpointLocation::Remote(_) => "remote",
        }
    }

    fn location(&self) -> &str {
        match self {
            CheckpointLocation::File(f) => f,
            CheckpointLocation::Remote(t) => t,
        }
    }
}

/// Row of the local checkpoint index.
#[derive(Clone, Debug)]
pub struct CheckpointRecord {
    pub process_id: String,
    pub ordinate: Ordinate,
    pub timestamp: i64,
    pub location: CheckpointLocation,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS processes (
        id TEXT PRIMARY KEY,
        payload TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS modules (
        id TEXT PRIMARY KEY,
        payload TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS evaluations (
        process_id TEXT NOT NULL,
        sort_key TEXT NOT NULL,
        ordinate TEXT NOT NULL,
        cron TEXT,
        timestamp INTEGER NOT NULL,
        message_id TEXT,
        deep_hash TEXT,
        gas_used INTEGER NOT NULL,
        payload TEXT NOT NULL,
        PRIMARY KEY (process_id, sort_key)
    )",
    "CREATE INDEX IF NOT EXISTS idx_evaluations_deep_hash
        ON evaluations (process_id, deep_hash)",
    "CREATE INDEX IF NOT EXISTS idx_evaluations_message_id
        ON evaluations (process_id, message_id)",
    "CREATE TABLE IF NOT EXISTS blocks (
        height INTEGER PRIMARY KEY,
        timestamp INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS checkpoint_records (
        process_id TEXT NOT NULL,
        sort_key TEXT NOT NULL,
        ordinate TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        kind TEXT NOT NULL,
        location TEXT NOT NULL,
        PRIMARY KEY (process_id, sort_key, kind)
    )",
];

/// SQLite-backed unit store. One writer (the orchestrator); the embedded
/// engine arbitrates concurrent reads.
#[derive(Clone)]
pub struct UnitStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for UnitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitStore").finish()
    }
}

impl UnitStore {
    /// Open (or create) the unit database at `path` and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if !path.exists() {
            let _ = std::fs::File::create_new(path);
        }
        let url = format!("sqlite://{}", path.display());
        let pool = SqlitePool::connect(&url).await?;
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// In-memory store for tests and ephemeral units.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /* ---------- processes ---------- */

    pub async fn find_process(&self, id: &str) -> Result<Process> {
        let row = sqlx::query("SELECT payload FROM processes WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(serde_json::from_str(row.get::<String, _>("payload").as_str())?),
            None => Err(StoreError::not_found("process", id)),
        }
    }

    #[instrument(skip(self, process), fields(process_id = %process.id), err)]
    pub async fn save_process(&self, process: &Process) -> Result<()> {
        let payload = serde_json::to_string(process)?;
        sqlx::query("INSERT OR IGNORE INTO processes (id, payload) VALUES (?1, ?2)")
            .bind(&process.id)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /* ---------- modules ---------- */

    pub async fn find_module(&self, id: &str) -> Result<ModuleMeta> {
        let row = sqlx::query("SELECT payload FROM modules WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(serde_json::from_str(row.get::<String, _>("payload").as_str())?),
            None => Err(StoreError::not_found("module", id)),
        }
    }

    #[instrument(skip(self, module), fields(module_id = %module.id), err)]
    pub async fn save_module(&self, module: &ModuleMeta) -> Result<()> {
        let payload = serde_json::to_string(module)?;
        sqlx::query("INSERT OR IGNORE INTO modules (id, payload) VALUES (?1, ?2)")
            .bind(&module.id)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /* ---------- evaluations ---------- */

    #[instrument(
        skip(self, evaluation),
        fields(process_id = %evaluation.process_id, ordinate = %evaluation.ordinate),
        err
    )]
    pub async fn save_evaluation(&self, evaluation: &Evaluation) -> Result<()> {
        let payload = serde_json::to_string(evaluation)?;
        sqlx::query(
            "INSERT OR REPLACE INTO evaluations
                (process_id, sort_key, ordinate, cron, timestamp,
                 message_id, deep_hash, gas_used, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&evaluation.process_id)
        .bind(evaluation.ordinate.sort_key())
        .bind(evaluation.ordinate.as_str())
        .bind(&evaluation.cron)
        .bind(evaluation.timestamp)
        .bind(&evaluation.message_id)
        .bind(&evaluation.deep_hash)
        .bind(evaluation.gas_used as i64)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_evaluation(
        &self,
        process_id: &str,
        ordinate: &Ordinate,
        cron: Option<&str>,
    ) -> Result<Evaluation> {
        let row = sqlx::query(
            "SELECT payload FROM evaluations
             WHERE process_id = ?1 AND sort_key = ?2
               AND (cron IS ?3 OR cron = ?3)",
        )
        .bind(process_id)
        .bind(ordinate.sort_key())
        .bind(cron)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(decode_evaluation(&row)?),
            None => Err(StoreError::not_found(
                "evaluation",
                format!("{process_id}@{ordinate}"),
            )),
        }
    }

    /// Greatest evaluation with ordinate at or before `to`.
    pub async fn find_latest_evaluation(
        &self,
        process_id: &str,
        to: Option<&Ordinate>,
    ) -> Result<Evaluation> {
        let bound = to.map(|o| o.sort_key());
        let row = sqlx::query(
            "SELECT payload FROM evaluations
             WHERE process_id = ?1 AND (?2 IS NULL OR sort_key <= ?2)
             ORDER BY sort_key DESC
             LIMIT 1",
        )
        .bind(process_id)
        .bind(bound)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(decode_evaluation(&row)?),
            None => Err(StoreError::not_found("evaluation", process_id)),
        }
    }

    /// Evaluation that consumed the given scheduler message, wherever the
    /// dedup rules placed it.
    pub async fn find_evaluation_by_message_id(
        &self,
        process_id: &str,
        message_id: &str,
    ) -> Result<Evaluation> {
        let row = sqlx::query(
            "SELECT payload FROM evaluations
             WHERE process_id = ?1 AND message_id = ?2
             ORDER BY sort_key ASC
             LIMIT 1",
        )
        .bind(process_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(decode_evaluation(&row)?),
            None => Err(StoreError::not_found("evaluation", message_id)),
        }
    }

    /// Greatest evaluation with timestamp at or before `timestamp`.
    pub async fn find_latest_evaluation_before_ts(
        &self,
        process_id: &str,
        timestamp: i64,
    ) -> Result<Evaluation> {
        let row = sqlx::query(
            "SELECT payload FROM evaluations
             WHERE process_id = ?1 AND timestamp <= ?2
             ORDER BY sort_key DESC
             LIMIT 1",
        )
        .bind(process_id)
        .bind(timestamp)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(decode_evaluation(&row)?),
            None => Err(StoreError::not_found("evaluation", process_id)),
        }
    }

    pub async fn find_evaluations(&self, query: &EvaluationQuery) -> Result<Vec<Evaluation>> {
        let order = match query.sort {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        };
        let sql = format!(
            "SELECT payload FROM evaluations
             WHERE process_id = ?1
               AND (?2 IS NULL OR sort_key > ?2)
               AND (?3 IS NULL OR sort_key <= ?3)
               AND (?4 = 0 OR cron IS NOT NULL)
             ORDER BY sort_key {order}
             LIMIT ?5"
        );
        let rows = sqlx::query(&sql)
            .bind(&query.process_id)
            .bind(query.from.as_ref().map(|o| o.sort_key()))
            .bind(query.to.as_ref().map(|o| o.sort_key()))
            .bind(query.only_cron as i64)
            .bind(query.limit.map(i64::from).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|row| Ok(decode_evaluation(row)?)).collect()
    }

    /// Prior evaluation with the same dedup identity, used to short-circuit
    /// re-cranked duplicates. Identity is the deep hash when present,
    /// otherwise the message id.
    pub async fn find_message_before(
        &self,
        process_id: &str,
        message_id: Option<&str>,
        deep_hash: Option<&str>,
        before: &Ordinate,
    ) -> Result<Evaluation> {
        let row = sqlx::query(
            "SELECT payload FROM evaluations
             WHERE process_id = ?1
               AND sort_key < ?2
               AND CASE
                     WHEN ?3 IS NOT NULL THEN deep_hash = ?3
                     ELSE message_id = ?4
                   END
             ORDER BY sort_key DESC
             LIMIT 1",
        )
        .bind(process_id)
        .bind(before.sort_key())
        .bind(deep_hash)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(decode_evaluation(&row)?),
            None => Err(StoreError::not_found("prior evaluation", process_id)),
        }
    }

    /* ---------- blocks ---------- */

    pub async fn save_blocks(&self, blocks: &[BlockRef]) -> Result<()> {
        for block in blocks {
            sqlx::query("INSERT OR IGNORE INTO blocks (height, timestamp) VALUES (?1, ?2)")
                .bind(block.height as i64)
                .bind(block.timestamp)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Blocks with `min <= height < max`, ascending.
    pub async fn find_blocks(&self, min: u64, max: u64) -> Result<Vec<BlockRef>> {
        let rows = sqlx::query(
            "SELECT height, timestamp FROM blocks
             WHERE height >= ?1 AND height < ?2
             ORDER BY height ASC",
        )
        .bind(min as i64)
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| BlockRef {
                height: row.get::<i64, _>("height") as u64,
                timestamp: row.get("timestamp"),
            })
            .collect())
    }

    /* ---------- checkpoint index ---------- */

    #[instrument(
        skip(self, record),
        fields(process_id = %record.process_id, ordinate = %record.ordinate),
        err
    )]
    pub async fn write_checkpoint_record(&self, record: &CheckpointRecord) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO checkpoint_records
                (process_id, sort_key, ordinate, timestamp, kind, location)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&record.process_id)
        .bind(record.ordinate.sort_key())
        .bind(record.ordinate.as_str())
        .bind(record.timestamp)
        .bind(record.location.kind())
        .bind(record.location.location())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Greatest checkpoint record at or before `before`. Local files win
    /// over remote records at equal ordinate.
    pub async fn find_checkpoint_record_before(
        &self,
        process_id: &str,
        before: &Ordinate,
    ) -> Result<CheckpointRecord> {
        let row = sqlx::query(
            "SELECT ordinate, timestamp, kind, location FROM checkpoint_records
             WHERE process_id = ?1 AND sort_key <= ?2
             ORDER BY sort_key DESC, CASE kind WHEN 'file' THEN 0 ELSE 1 END ASC
             LIMIT 1",
        )
        .bind(process_id)
        .bind(before.sort_key())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let location: String = row.get("location");
                let kind: String = row.get("kind");
                Ok(CheckpointRecord {
                    process_id: process_id.to_string(),
                    ordinate: Ordinate::new(row.get::<String, _>("ordinate")),
                    timestamp: row.get("timestamp"),
                    location: match kind.as_str() {
                        "file" => CheckpointLocation::File(location),
                        _ => CheckpointLocation::Remote(location),
                    },
                })
            }
            None => Err(StoreError::not_found("checkpoint record", process_id)),
        }
    }
}

fn decode_evaluation(row: &SqliteRow) -> std::result::Result<Evaluation, serde_json::Error> {
    serde_json::from_str(row.get::<String, _>("payload").as_str())
}
