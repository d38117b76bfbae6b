//! Scheduler-unit client: the canonical ordered message log per process.
//!
//! The [`SchedulerUnit`] trait is the message-stream contract the pipeline
//! consumes; [`HttpSchedulerUnit`] speaks the SU's JSON API. The lazy
//! paginated [`MessageStream`] and the [`CronStream`] interleaver that
//! synthesizes time-driven messages sit on top of the trait.

mod cron;
mod http;
mod stream;

pub use cron::{parse_cron_specs, CronSpec, CronStream};
pub use http::HttpSchedulerUnit;
pub use stream::{MessageStream, PAGE_SIZE};

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use crate::domain::{MessagePage, Ordinate, Process};

#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    #[error("scheduler request failed: {0}")]
    #[diagnostic(code(cu::scheduler::http))]
    Http(#[from] reqwest::Error),

    #[error("scheduler returned malformed payload: {0}")]
    #[diagnostic(code(cu::scheduler::malformed))]
    Malformed(String),

    #[error("{what} not found on scheduler: {key}")]
    #[diagnostic(code(cu::scheduler::not_found))]
    NotFound { what: &'static str, key: String },
}

impl SchedulerError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn not_found(what: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            key: key.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Position metadata for a single message, resolved by id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageMeta {
    pub process_id: String,
    pub ordinate: Ordinate,
    pub timestamp: i64,
    pub epoch: u64,
    pub nonce: u64,
}

/// One page request against a process's log. `from` is exclusive, `to`
/// inclusive, both scheduler ordinates (no cron suffixes).
#[derive(Clone, Debug)]
pub struct PageArgs {
    pub su_url: String,
    pub process_id: String,
    pub from: Option<Ordinate>,
    pub to: Option<Ordinate>,
    pub limit: u32,
}

#[async_trait]
pub trait SchedulerUnit: Send + Sync {
    async fn load_process(&self, su_url: &str, process_id: &str) -> Result<Process>;

    /// Authoritative current chain position: `(block height, timestamp)`.
    async fn load_timestamp(&self, su_url: &str, process_id: &str) -> Result<(u64, i64)>;

    async fn load_message_meta(
        &self,
        su_url: &str,
        process_id: &str,
        message_id: &str,
    ) -> Result<MessageMeta>;

    /// One page of the ordered log. Transient failures are retried inside
    /// the implementation; a returned error is terminal for the stream.
    async fn load_message_page(&self, args: &PageArgs) -> Result<MessagePage>;
}
