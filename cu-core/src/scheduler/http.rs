use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{instrument, warn};
use url::Url;

use crate::domain::{MessagePage, MessagePageEdge, Ordinate, Process, ScheduledMessage};

use super::{MessageMeta, PageArgs, Result, SchedulerError, SchedulerUnit};

const RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(200);

/// JSON client for a scheduler unit.
pub struct HttpSchedulerUnit {
    http: Client,
}

impl HttpSchedulerUnit {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
        }
    }

    async fn get_json(&self, url: Url) -> Result<Value> {
        let mut last_err = None;
        for attempt in 0..RETRIES {
            if attempt > 0 {
                tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
            }
            let sent = self.http.get(url.clone()).send().await;
            match sent.and_then(|r| r.error_for_status()) {
                Ok(response) => return Ok(response.json().await?),
                Err(err) => {
                    warn!(%url, attempt, %err, "scheduler request failed");
                    last_err = Some(err);
                }
            }
        }
        Err(SchedulerError::Http(last_err.expect("at least one attempt")))
    }
}

impl Default for HttpSchedulerUnit {
    fn default() -> Self {
        Self::new()
    }
}

fn base_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| SchedulerError::malformed(format!("bad scheduler url {raw}: {e}")))
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path)
        .map_err(|e| SchedulerError::malformed(format!("bad path {path}: {e}")))
}

#[derive(Deserialize)]
struct WirePage {
    #[serde(default)]
    edges: Vec<WireEdge>,
    #[serde(default)]
    page_info: WirePageInfo,
}

#[derive(Deserialize)]
struct WireEdge {
    cursor: String,
    node: ScheduledMessage,
}

#[derive(Default, Deserialize)]
struct WirePageInfo {
    #[serde(default)]
    has_next_page: bool,
}

#[async_trait]
impl SchedulerUnit for HttpSchedulerUnit {
    #[instrument(skip(self, su_url), err)]
    async fn load_process(&self, su_url: &str, process_id: &str) -> Result<Process> {
        let url = join(&base_url(su_url)?, &format!("processes/{process_id}"))?;
        let value = self.get_json(url).await?;
        serde_json::from_value(value)
            .map_err(|e| SchedulerError::malformed(format!("process payload: {e}")))
    }

    async fn load_timestamp(&self, su_url: &str, process_id: &str) -> Result<(u64, i64)> {
        let mut url = join(&base_url(su_url)?, "timestamp")?;
        url.query_pairs_mut().append_pair("process-id", process_id);
        let value = self.get_json(url).await?;
        let height = value["block_height"]
            .as_u64()
            .ok_or_else(|| SchedulerError::malformed("timestamp block_height"))?;
        let timestamp = value["timestamp"]
            .as_i64()
            .ok_or_else(|| SchedulerError::malformed("timestamp value"))?;
        Ok((height, timestamp))
    }

    #[instrument(skip(self, su_url), err)]
    async fn load_message_meta(
        &self,
        su_url: &str,
        process_id: &str,
        message_id: &str,
    ) -> Result<MessageMeta> {
        let mut url = join(&base_url(su_url)?, message_id)?;
        url.query_pairs_mut().append_pair("process-id", process_id);
        let value = self.get_json(url).await?;
        let ordinate = value["ordinate"]
            .as_str()
            .map(Ordinate::new)
            .or_else(|| value["nonce"].as_u64().map(Ordinate::from))
            .ok_or_else(|| SchedulerError::malformed("message meta ordinate"))?;
        Ok(MessageMeta {
            process_id: value["process_id"]
                .as_str()
                .unwrap_or(process_id)
                .to_string(),
            ordinate,
            timestamp: value["timestamp"]
                .as_i64()
                .ok_or_else(|| SchedulerError::malformed("message meta timestamp"))?,
            epoch: value["epoch"].as_u64().unwrap_or(0),
            nonce: value["nonce"].as_u64().unwrap_or(0),
        })
    }

    async fn load_message_page(&self, args: &PageArgs) -> Result<MessagePage> {
        let mut url = join(&base_url(&args.su_url)?, &args.process_id)?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(from) = &args.from {
                query.append_pair("from", from.as_str());
            }
            if let Some(to) = &args.to {
                query.append_pair("to", to.as_str());
            }
            query.append_pair("limit", &args.limit.to_string());
        }
        let value = self.get_json(url).await?;
        let wire: WirePage = serde_json::from_value(value)
            .map_err(|e| SchedulerError::malformed(format!("message page: {e}")))?;
        Ok(MessagePage {
            edges: wire
                .edges
                .into_iter()
                .map(|edge| MessagePageEdge {
                    cursor: edge.cursor,
                    node: edge.node,
                })
                .collect(),
            has_next_page: wire.page_info.has_next_page,
        })
    }
}
