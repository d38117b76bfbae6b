use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::hash::deep_hash;
use super::message::ScheduledMessage;
use super::ordinate::Ordinate;

/// Everything an evaluation emits besides the new memory: outbound
/// messages, spawns and assignments for the messenger unit to crank, plus
/// the output data and any process-level error.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalOutput {
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub spawns: Vec<Value>,
    #[serde(default)]
    pub assignments: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Set when the wasm program itself reported an error. The evaluation
    /// row is persisted anyway and the pipeline advances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl EvalOutput {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// One persisted state transition. Primary key is
/// `(process_id, ordinate, cron)`; rows are append-only and never mutated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub process_id: String,
    pub ordinate: Ordinate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    pub timestamp: i64,
    pub block_height: u64,
    pub epoch: u64,
    pub nonce: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep_hash: Option<String>,
    pub output: EvalOutput,
    pub gas_used: u64,
    /// When this unit evaluated the message, epoch milliseconds.
    pub evaluated_at: i64,
}

/// Where a process memory sits in the log: the position of the last message
/// folded into it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalCursor {
    pub process_id: String,
    pub ordinate: Ordinate,
    pub timestamp: i64,
    pub block_height: u64,
    pub epoch: u64,
    pub nonce: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

impl EvalCursor {
    pub fn cold_start(process_id: impl Into<String>) -> Self {
        Self {
            process_id: process_id.into(),
            ordinate: Ordinate::zero(),
            ..Default::default()
        }
    }
}

/// The dedup identity of a message: pushed messages are identified by deep
/// hash (two assignments of the same crank collapse), everything else by
/// the scheduler-assigned message id. Cron messages have no identity and
/// are never deduplicated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageIdentity {
    DeepHash(String),
    MessageId(String),
    None,
}

impl MessageIdentity {
    pub fn of(process_id: &str, message: &ScheduledMessage) -> Self {
        if message.is_cron() {
            return MessageIdentity::None;
        }
        if message.is_pushed() {
            return MessageIdentity::DeepHash(deep_hash(process_id, message));
        }
        match &message.message_id {
            Some(id) => MessageIdentity::MessageId(id.clone()),
            None => MessageIdentity::None,
        }
    }

    pub fn deep_hash(&self) -> Option<&str> {
        match self {
            MessageIdentity::DeepHash(h) => Some(h),
            _ => None,
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            MessageIdentity::MessageId(id) => Some(id),
            _ => None,
        }
    }
}
