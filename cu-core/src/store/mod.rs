//! Embedded relational store for structured records: processes, modules,
//! evaluations, the block height cache and the checkpoint index.
//!
//! Every save is idempotent on its primary key (`INSERT OR REPLACE` /
//! `INSERT OR IGNORE`), every "before" lookup returns the greatest row whose
//! key is at or before the target under the ordinate total order. Ordinates
//! are stored twice: verbatim, and as the zero-padded sort key so sqlite's
//! lexicographic `ORDER BY` matches semantic order.

mod sqlite;

pub use sqlite::{CheckpointRecord, CheckpointLocation, EvaluationQuery, SortDir, UnitStore};

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("sqlx error: {0}")]
    #[diagnostic(
        code(cu::store::sqlx),
        help("Check that DB_URL points at a writable sqlite file.")
    )]
    Sqlx(#[from] sqlx::Error),

    #[error("record serialization failed: {0}")]
    #[diagnostic(code(cu::store::serde))]
    Serde(#[from] serde_json::Error),

    #[error("{what} not found: {key}")]
    #[diagnostic(code(cu::store::not_found))]
    NotFound { what: &'static str, key: String },
}

impl StoreError {
    pub fn not_found(what: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            key: key.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
