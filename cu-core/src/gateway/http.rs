use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::UnitConfig;
use crate::domain::{BlockRef, ModuleMeta, ModuleOptions, Ordinate, Tag};

use super::{
    CheckpointDescriptor, CheckpointFilter, Gateway, GatewayError, Result, SchedulerLocation,
    SignedDataItem, UploadReceipt,
};

const RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(200);

/// Production gateway client. GraphQL for discovery, raw GETs for payloads,
/// a bundler POST for uploads. Transient failures are retried with bounded
/// backoff before surfacing.
pub struct HttpGateway {
    http: Client,
    graphql_url: Url,
    checkpoint_graphql_url: Url,
    arweave_url: Url,
    uploader_url: Url,
}

impl HttpGateway {
    pub fn from_config(config: &UnitConfig) -> Result<Self> {
        let parse = |raw: &str| {
            Url::parse(raw).map_err(|e| GatewayError::malformed(format!("bad endpoint {raw}: {e}")))
        };
        Ok(Self {
            http: Client::new(),
            graphql_url: parse(&config.graphql_url)?,
            checkpoint_graphql_url: parse(&config.checkpoint_graphql_url)?,
            arweave_url: parse(&config.arweave_url)?,
            uploader_url: parse(&config.uploader_url)?,
        })
    }

    async fn graphql(&self, endpoint: &Url, query: &str, variables: Value) -> Result<Value> {
        let body = json!({ "query": query, "variables": variables });
        let mut last_err = None;
        for attempt in 0..RETRIES {
            if attempt > 0 {
                tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
            }
            let sent = self.http.post(endpoint.clone()).json(&body).send().await;
            match sent.and_then(|r| r.error_for_status()) {
                Ok(response) => {
                    let value: Value = response.json().await?;
                    return Ok(value);
                }
                Err(err) => {
                    warn!(%endpoint, attempt, %err, "gateway query failed");
                    last_err = Some(err);
                }
            }
        }
        Err(GatewayError::Http(last_err.expect("at least one attempt")))
    }

    async fn get_bytes(&self, url: Url) -> Result<Vec<u8>> {
        let mut last_err = None;
        for attempt in 0..RETRIES {
            if attempt > 0 {
                tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
            }
            match self.http.get(url.clone()).send().await {
                Ok(response) => match response.error_for_status() {
                    Ok(response) => return Ok(response.bytes().await?.to_vec()),
                    Err(err) => last_err = Some(err),
                },
                Err(err) => last_err = Some(err),
            }
        }
        Err(GatewayError::Http(last_err.expect("at least one attempt")))
    }

    fn join(&self, base: &Url, path: &str) -> Result<Url> {
        base.join(path)
            .map_err(|e| GatewayError::malformed(format!("bad path {path}: {e}")))
    }
}

const CHECKPOINT_QUERY: &str = r#"
query ($process: [String!]!, $owners: [String!]!, $first: Int!) {
  transactions(
    tags: [
      { name: "Type", values: ["Checkpoint"] }
      { name: "Process", values: $process }
    ]
    owners: $owners
    first: $first
    sort: HEIGHT_DESC
  ) {
    edges { node { id owner { address } tags { name value } } }
  }
}"#;

const TRANSACTION_QUERY: &str = r#"
query ($id: ID!) {
  transactions(ids: [$id], first: 1) {
    edges { node { id owner { address } tags { name value } } }
  }
}"#;

const LOCATION_QUERY: &str = r#"
query ($owners: [String!]!) {
  transactions(
    tags: [{ name: "Type", values: ["Scheduler-Location"] }]
    owners: $owners
    first: 1
    sort: HEIGHT_DESC
  ) {
    edges { node { id owner { address } tags { name value } } }
  }
}"#;

const BLOCKS_QUERY: &str = r#"
query ($min: Int!, $max: Int!, $first: Int!) {
  blocks(height: { min: $min, max: $max }, first: $first, sort: HEIGHT_ASC) {
    edges { node { height timestamp } }
  }
}"#;

#[async_trait]
impl Gateway for HttpGateway {
    #[instrument(skip(self), fields(process_id = %filter.process_id), err)]
    async fn query_checkpoints(
        &self,
        filter: &CheckpointFilter,
    ) -> Result<Vec<CheckpointDescriptor>> {
        if filter.trusted_owners.is_empty() {
            return Ok(Vec::new());
        }
        let value = self
            .graphql(
                &self.checkpoint_graphql_url,
                CHECKPOINT_QUERY,
                json!({
                    "process": [filter.process_id],
                    "owners": filter.trusted_owners,
                    "first": filter.limit.max(1),
                }),
            )
            .await?;
        let mut out = Vec::new();
        for node in edges(&value)? {
            match parse_checkpoint(node) {
                Ok(descriptor) => out.push(descriptor),
                Err(err) => debug!(%err, "skipping malformed checkpoint node"),
            }
        }
        Ok(out)
    }

    async fn download(&self, tx_id: &str) -> Result<Vec<u8>> {
        let url = self.join(&self.arweave_url, &format!("raw/{tx_id}"))?;
        self.get_bytes(url).await
    }

    #[instrument(skip(self), err)]
    async fn fetch_module_meta(&self, module_id: &str) -> Result<ModuleMeta> {
        let value = self
            .graphql(&self.graphql_url, TRANSACTION_QUERY, json!({ "id": module_id }))
            .await?;
        let node = edges(&value)?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::not_found("module", module_id))?;
        parse_module(node)
    }

    async fn fetch_module_binary(&self, module_id: &str) -> Result<Vec<u8>> {
        let url = self.join(&self.arweave_url, module_id)?;
        self.get_bytes(url).await
    }

    async fn load_blocks(&self, min_height: u64, max_height: u64) -> Result<Vec<BlockRef>> {
        let value = self
            .graphql(
                &self.graphql_url,
                BLOCKS_QUERY,
                json!({ "min": min_height, "max": max_height, "first": 100 }),
            )
            .await?;
        let nodes = value
            .pointer("/data/blocks/edges")
            .and_then(Value::as_array)
            .ok_or_else(|| GatewayError::malformed("missing blocks.edges"))?;
        let mut out = Vec::new();
        for edge in nodes {
            let node = &edge["node"];
            let height = node["height"]
                .as_u64()
                .ok_or_else(|| GatewayError::malformed("block height"))?;
            let seconds = node["timestamp"]
                .as_i64()
                .ok_or_else(|| GatewayError::malformed("block timestamp"))?;
            out.push(BlockRef {
                height,
                timestamp: seconds * 1000,
            });
        }
        Ok(out)
    }

    #[instrument(skip(self), err)]
    async fn locate_scheduler(&self, process_id: &str) -> Result<SchedulerLocation> {
        // Two hops: the process transaction names its scheduler's address
        // in a `Scheduler` tag, the scheduler's latest Scheduler-Location
        // record carries the URL.
        let value = self
            .graphql(&self.graphql_url, TRANSACTION_QUERY, json!({ "id": process_id }))
            .await?;
        let node = edges(&value)?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::not_found("process", process_id))?;
        let tags = parse_tags(node)?;
        let address = find_tag(&tags, "Scheduler")
            .ok_or_else(|| GatewayError::malformed("process has no Scheduler tag"))?
            .to_string();

        let value = self
            .graphql(
                &self.graphql_url,
                LOCATION_QUERY,
                json!({ "owners": [address] }),
            )
            .await?;
        let node = edges(&value)?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::not_found("scheduler location", &address))?;
        let tags = parse_tags(node)?;
        let url = find_tag(&tags, "Url")
            .ok_or_else(|| GatewayError::malformed("scheduler location has no Url tag"))?
            .to_string();
        Ok(SchedulerLocation { address, url })
    }

    #[instrument(skip(self, item), fields(id = %item.id), err)]
    async fn upload(&self, item: &SignedDataItem) -> Result<UploadReceipt> {
        let url = self.join(&self.uploader_url, "tx")?;
        let mut last_err = None;
        for attempt in 0..RETRIES {
            if attempt > 0 {
                tokio::time::sleep(BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
            }
            let sent = self.http.post(url.clone()).json(item).send().await;
            match sent.and_then(|r| r.error_for_status()) {
                Ok(response) => return Ok(response.json().await?),
                Err(err) => {
                    warn!(attempt, %err, "upload attempt failed");
                    last_err = Some(err);
                }
            }
        }
        Err(GatewayError::Http(last_err.expect("at least one attempt")))
    }
}

fn edges(value: &Value) -> Result<Vec<&Value>> {
    let edges = value
        .pointer("/data/transactions/edges")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::malformed("missing transactions.edges"))?;
    Ok(edges.iter().map(|e| &e["node"]).collect())
}

fn parse_tags(node: &Value) -> Result<Vec<Tag>> {
    let raw = node["tags"]
        .as_array()
        .ok_or_else(|| GatewayError::malformed("node has no tags"))?;
    Ok(raw
        .iter()
        .filter_map(|t| {
            Some(Tag::new(t["name"].as_str()?, t["value"].as_str()?))
        })
        .collect())
}

fn find_tag<'a>(tags: &'a [Tag], name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.name == name)
        .map(|t| t.value.as_str())
}

fn required<'a>(tags: &'a [Tag], name: &'static str) -> Result<&'a str> {
    find_tag(tags, name).ok_or_else(|| GatewayError::malformed(format!("missing tag {name}")))
}

fn parse_checkpoint(node: &Value) -> Result<CheckpointDescriptor> {
    let tx_id = node["id"]
        .as_str()
        .ok_or_else(|| GatewayError::malformed("node id"))?
        .to_string();
    let owner = node
        .pointer("/owner/address")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::malformed("node owner"))?
        .to_string();
    let tags = parse_tags(node)?;
    let parse_u64 = |name: &'static str| -> Result<u64> {
        required(&tags, name)?
            .parse()
            .map_err(|_| GatewayError::malformed(format!("tag {name} not numeric")))
    };
    Ok(CheckpointDescriptor {
        tx_id,
        owner,
        process_id: required(&tags, "Process")?.to_string(),
        module_id: required(&tags, "Module")?.to_string(),
        ordinate: Ordinate::new(required(&tags, "Ordinate")?),
        timestamp: required(&tags, "Timestamp")?
            .parse()
            .map_err(|_| GatewayError::malformed("tag Timestamp not numeric"))?,
        block_height: parse_u64("Block-Height")?,
        epoch: parse_u64("Epoch").unwrap_or(0),
        nonce: parse_u64("Nonce").unwrap_or(0),
        content_hash: required(&tags, "Content-Hash")?.to_string(),
        cron: find_tag(&tags, "Cron").map(str::to_string),
    })
}

fn parse_module(node: &Value) -> Result<ModuleMeta> {
    let id = node["id"]
        .as_str()
        .ok_or_else(|| GatewayError::malformed("node id"))?
        .to_string();
    let owner = node
        .pointer("/owner/address")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let tags = parse_tags(node)?;
    let format = required(&tags, "Module-Format")?.to_string();
    let options = ModuleOptions {
        memory_limit: find_tag(&tags, "Memory-Limit")
            .map(parse_byte_size)
            .unwrap_or(0),
        compute_limit: find_tag(&tags, "Compute-Limit")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        extensions: find_tag(&tags, "Extensions")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default(),
    };
    Ok(ModuleMeta {
        id,
        owner,
        tags,
        format,
        options,
    })
}

/// Parse limits like `"512-mb"`, `"1-gb"` or a plain byte count.
fn parse_byte_size(raw: &str) -> u64 {
    let lower = raw.trim().to_ascii_lowercase();
    let (number, unit) = match lower.split_once('-') {
        Some((n, u)) => (n, u),
        None => (lower.as_str(), ""),
    };
    let Ok(n) = number.parse::<u64>() else {
        return 0;
    };
    match unit {
        "kb" => n * 1024,
        "mb" => n * 1024 * 1024,
        "gb" => n * 1024 * 1024 * 1024,
        _ => n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_sizes_parse_with_units() {
        assert_eq!(parse_byte_size("512-mb"), 512 * 1024 * 1024);
        assert_eq!(parse_byte_size("1-gb"), 1024 * 1024 * 1024);
        assert_eq!(parse_byte_size("4096"), 4096);
        assert_eq!(parse_byte_size("garbage"), 0);
    }

    #[test]
    fn checkpoint_node_parses_from_tags() {
        let node = serde_json::json!({
            "id": "tx-1",
            "owner": { "address": "owner-1" },
            "tags": [
                { "name": "Process", "value": "p1" },
                { "name": "Module", "value": "m1" },
                { "name": "Ordinate", "value": "42" },
                { "name": "Timestamp", "value": "1700000000000" },
                { "name": "Block-Height", "value": "1337" },
                { "name": "Content-Hash", "value": "abc" },
            ],
        });
        let descriptor = parse_checkpoint(&node).unwrap();
        assert_eq!(descriptor.tx_id, "tx-1");
        assert_eq!(descriptor.ordinate, Ordinate::new("42"));
        assert_eq!(descriptor.block_height, 1337);
        assert_eq!(descriptor.cron, None);
    }
}
