use serde::{Deserialize, Serialize};

use super::ordinate::Ordinate;
use super::process::{tag_value, BlockRef, Tag};

/// One entry of a process's ordered message log, as produced by the
/// scheduler unit (or synthesized by the cron interleaver).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledMessage {
    pub ordinate: Ordinate,
    /// Absent on synthetic cron messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub is_assignment: bool,
    /// `"{tick}-{interval-name}"` on cron messages, absent otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    pub tags: Vec<Tag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub block: BlockRef,
    /// Epoch milliseconds assigned by the scheduler.
    pub timestamp: i64,
    pub epoch: u64,
    pub nonce: u64,
    /// Sender address as seen by the scheduler.
    #[serde(default)]
    pub owner: String,
}

impl ScheduledMessage {
    pub fn tag(&self, name: &str) -> Option<&str> {
        tag_value(&self.tags, name)
    }

    pub fn is_cron(&self) -> bool {
        self.cron.is_some()
    }

    /// A message forwarded by a messenger unit on behalf of another process
    /// ("cranked"). These carry a `From-Process` tag and are deduplicated by
    /// deep hash rather than id.
    pub fn is_pushed(&self) -> bool {
        self.tag("From-Process").is_some()
    }
}

/// One page of the scheduler's message log.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MessagePage {
    pub edges: Vec<MessagePageEdge>,
    #[serde(default)]
    pub has_next_page: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessagePageEdge {
    pub cursor: String,
    pub node: ScheduledMessage,
}
