//! Shared fixtures: an in-memory scheduler, a recording gateway, a
//! deterministic stub wasm runtime and a stub signer, plus a config
//! pointing every directory into a tempdir.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rustc_hash::FxHashMap;

use cu_core::api::ReadApi;
use cu_core::checkpoint::DataItemSigner;
use cu_core::config::UnitConfig;
use cu_core::domain::{
    sha256_hex, BlockRef, EvalOutput, MessagePage, MessagePageEdge, ModuleMeta, ModuleOptions,
    Ordinate, Process, ProcessMemory, ScheduledMessage, Tag,
};
use cu_core::gateway::{
    CheckpointDescriptor, CheckpointFilter, Gateway, GatewayError, SchedulerLocation,
    SignedDataItem, UploadReceipt,
};
use cu_core::scheduler::{MessageMeta, PageArgs, SchedulerError, SchedulerUnit};
use cu_core::unit::UnitCore;
use cu_core::wasm::{CompiledModule, EvalOutcome, WasmRuntime};

pub const PROCESS_ID: &str = "proc-1";
pub const MODULE_ID: &str = "mod-1";
pub const SU_URL: &str = "https://su.test.example";

/* ---------- scheduler stub ---------- */

pub struct StubScheduler {
    pub process: Process,
    pub messages: Mutex<Vec<ScheduledMessage>>,
    /// `(block height, timestamp)` returned by `load_timestamp`.
    pub now: Mutex<(u64, i64)>,
    pub page_loads: AtomicUsize,
}

impl StubScheduler {
    pub fn new(process: Process, messages: Vec<ScheduledMessage>) -> Arc<Self> {
        Arc::new(Self {
            process,
            messages: Mutex::new(messages),
            now: Mutex::new((100, 1_000_000)),
            page_loads: AtomicUsize::new(0),
        })
    }

    pub fn push_messages(&self, more: Vec<ScheduledMessage>) {
        self.messages.lock().unwrap().extend(more);
    }

    pub fn set_now(&self, height: u64, timestamp: i64) {
        *self.now.lock().unwrap() = (height, timestamp);
    }

    pub fn pages_served(&self) -> usize {
        self.page_loads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SchedulerUnit for StubScheduler {
    async fn load_process(
        &self,
        _su_url: &str,
        process_id: &str,
    ) -> Result<Process, SchedulerError> {
        if process_id == self.process.id {
            Ok(self.process.clone())
        } else {
            Err(SchedulerError::not_found("process", process_id))
        }
    }

    async fn load_timestamp(
        &self,
        _su_url: &str,
        _process_id: &str,
    ) -> Result<(u64, i64), SchedulerError> {
        Ok(*self.now.lock().unwrap())
    }

    async fn load_message_meta(
        &self,
        _su_url: &str,
        _process_id: &str,
        message_id: &str,
    ) -> Result<MessageMeta, SchedulerError> {
        let messages = self.messages.lock().unwrap();
        let found = messages
            .iter()
            .find(|m| m.message_id.as_deref() == Some(message_id))
            .ok_or_else(|| SchedulerError::not_found("message", message_id))?;
        Ok(MessageMeta {
            process_id: self.process.id.clone(),
            ordinate: found.ordinate.clone(),
            timestamp: found.timestamp,
            epoch: found.epoch,
            nonce: found.nonce,
        })
    }

    async fn load_message_page(&self, args: &PageArgs) -> Result<MessagePage, SchedulerError> {
        self.page_loads.fetch_add(1, Ordering::Relaxed);
        let messages = self.messages.lock().unwrap();
        let mut in_range: Vec<ScheduledMessage> = messages
            .iter()
            .filter(|m| match &args.from {
                Some(from) => m.ordinate > *from,
                None => true,
            })
            .filter(|m| match &args.to {
                Some(to) => m.ordinate <= *to,
                None => true,
            })
            .cloned()
            .collect();
        in_range.sort_by(|a, b| a.ordinate.cmp(&b.ordinate));
        let has_next_page = in_range.len() > args.limit as usize;
        in_range.truncate(args.limit as usize);
        Ok(MessagePage {
            edges: in_range
                .into_iter()
                .map(|node| MessagePageEdge {
                    cursor: node.ordinate.to_string(),
                    node,
                })
                .collect(),
            has_next_page,
        })
    }
}

/* ---------- gateway stub ---------- */

#[derive(Default)]
pub struct StubGateway {
    pub modules: Mutex<FxHashMap<String, (ModuleMeta, Vec<u8>)>>,
    pub uploads: Mutex<Vec<SignedDataItem>>,
    /// Discovery / download / module fetches, for "no gateway call" asserts.
    pub network_calls: AtomicUsize,
}

impl StubGateway {
    pub fn new() -> Arc<Self> {
        let gateway = Self::default();
        gateway.modules.lock().unwrap().insert(
            MODULE_ID.to_string(),
            (test_module(), vec![0xAA, 0xBB, 0xCC]),
        );
        Arc::new(gateway)
    }

    pub fn calls(&self) -> usize {
        self.network_calls.load(Ordering::Relaxed)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    fn tag<'a>(tags: &'a [Tag], name: &str) -> Option<&'a str> {
        tags.iter().find(|t| t.name == name).map(|t| t.value.as_str())
    }
}

#[async_trait]
impl Gateway for StubGateway {
    async fn query_checkpoints(
        &self,
        filter: &CheckpointFilter,
    ) -> Result<Vec<CheckpointDescriptor>, GatewayError> {
        self.network_calls.fetch_add(1, Ordering::Relaxed);
        let uploads = self.uploads.lock().unwrap();
        Ok(uploads
            .iter()
            .filter(|item| Self::tag(&item.tags, "Type") == Some("Checkpoint"))
            .filter(|item| Self::tag(&item.tags, "Process") == Some(filter.process_id.as_str()))
            .filter(|item| filter.trusted_owners.iter().any(|o| *o == item.owner))
            .map(|item| CheckpointDescriptor {
                tx_id: item.id.clone(),
                owner: item.owner.clone(),
                process_id: filter.process_id.clone(),
                module_id: Self::tag(&item.tags, "Module").unwrap_or_default().to_string(),
                ordinate: Ordinate::new(Self::tag(&item.tags, "Ordinate").unwrap_or("0")),
                timestamp: Self::tag(&item.tags, "Timestamp")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
                block_height: Self::tag(&item.tags, "Block-Height")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
                epoch: Self::tag(&item.tags, "Epoch")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
                nonce: Self::tag(&item.tags, "Nonce")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0),
                content_hash: Self::tag(&item.tags, "Content-Hash")
                    .unwrap_or_default()
                    .to_string(),
                cron: Self::tag(&item.tags, "Cron").map(str::to_string),
            })
            .collect())
    }

    async fn download(&self, tx_id: &str) -> Result<Vec<u8>, GatewayError> {
        self.network_calls.fetch_add(1, Ordering::Relaxed);
        let uploads = self.uploads.lock().unwrap();
        let item = uploads
            .iter()
            .find(|item| item.id == tx_id)
            .ok_or_else(|| GatewayError::not_found("transaction", tx_id))?;
        BASE64
            .decode(&item.data)
            .map_err(|e| GatewayError::malformed(e.to_string()))
    }

    async fn fetch_module_meta(&self, module_id: &str) -> Result<ModuleMeta, GatewayError> {
        self.network_calls.fetch_add(1, Ordering::Relaxed);
        self.modules
            .lock()
            .unwrap()
            .get(module_id)
            .map(|(meta, _)| meta.clone())
            .ok_or_else(|| GatewayError::not_found("module", module_id))
    }

    async fn fetch_module_binary(&self, module_id: &str) -> Result<Vec<u8>, GatewayError> {
        self.network_calls.fetch_add(1, Ordering::Relaxed);
        self.modules
            .lock()
            .unwrap()
            .get(module_id)
            .map(|(_, binary)| binary.clone())
            .ok_or_else(|| GatewayError::not_found("module", module_id))
    }

    async fn load_blocks(&self, _min: u64, _max: u64) -> Result<Vec<BlockRef>, GatewayError> {
        Ok(Vec::new())
    }

    async fn locate_scheduler(&self, _process_id: &str) -> Result<SchedulerLocation, GatewayError> {
        Ok(SchedulerLocation {
            address: "sched-1".to_string(),
            url: SU_URL.to_string(),
        })
    }

    async fn upload(&self, item: &SignedDataItem) -> Result<UploadReceipt, GatewayError> {
        self.uploads.lock().unwrap().push(item.clone());
        Ok(UploadReceipt {
            id: item.id.clone(),
        })
    }
}

/* ---------- wasm runtime stub ---------- */

/// Deterministic stand-in evaluator: the new memory is the old memory with
/// `|{ordinate}:{data}` appended, so terminal memories are comparable
/// byte-for-byte across replays and units.
pub struct StubRuntime {
    pub gas_per_message: u64,
    pub delay: Duration,
    pub applies: Arc<AtomicUsize>,
}

impl StubRuntime {
    pub fn new() -> Self {
        Self {
            gas_per_message: 10,
            delay: Duration::ZERO,
            applies: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    pub fn applies(&self) -> usize {
        self.applies.load(Ordering::Relaxed)
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.applies.clone()
    }
}

struct StubModule {
    gas: u64,
    delay: Duration,
    applies: Arc<AtomicUsize>,
}

impl CompiledModule for StubModule {
    fn apply(&self, mut memory: Vec<u8>, message: &ScheduledMessage) -> EvalOutcome {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.applies.fetch_add(1, Ordering::Relaxed);
        memory.extend_from_slice(
            format!(
                "|{}:{}",
                message.ordinate,
                message.data.as_deref().unwrap_or("")
            )
            .as_bytes(),
        );
        EvalOutcome {
            output: EvalOutput {
                data: Some(serde_json::json!({ "size": memory.len() })),
                ..Default::default()
            },
            memory,
            gas_used: self.gas,
        }
    }
}

impl WasmRuntime for StubRuntime {
    fn compile(
        &self,
        _module: &ModuleMeta,
        _binary: &[u8],
    ) -> Result<Arc<dyn CompiledModule>, cu_core::wasm::WasmError> {
        Ok(Arc::new(StubModule {
            gas: self.gas_per_message,
            delay: self.delay,
            applies: self.applies.clone(),
        }))
    }
}

/* ---------- signer stub ---------- */

pub struct StubSigner;

pub const WALLET_ADDRESS: &str = "stub-wallet";

impl DataItemSigner for StubSigner {
    fn address(&self) -> String {
        WALLET_ADDRESS.to_string()
    }

    fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, String> {
        let mut signature = digest.to_vec();
        signature.reverse();
        Ok(signature)
    }
}

/* ---------- builders ---------- */

pub fn test_process() -> Process {
    Process {
        id: PROCESS_ID.to_string(),
        owner: "owner-1".to_string(),
        tags: Vec::new(),
        signature: None,
        block: BlockRef {
            height: 1,
            timestamp: 0,
        },
        module_id: MODULE_ID.to_string(),
    }
}

pub fn test_module() -> ModuleMeta {
    ModuleMeta {
        id: MODULE_ID.to_string(),
        owner: "module-author".to_string(),
        tags: Vec::new(),
        format: "wasm32-unknown-emscripten".to_string(),
        options: ModuleOptions {
            memory_limit: 1024 * 1024,
            compute_limit: 1_000_000,
            extensions: Vec::new(),
        },
    }
}

pub fn msg(n: u64) -> ScheduledMessage {
    ScheduledMessage {
        ordinate: Ordinate::from(n),
        message_id: Some(format!("msg-{n}")),
        is_assignment: false,
        cron: None,
        tags: Vec::new(),
        data: Some(format!("d{n}")),
        block: BlockRef {
            height: n,
            timestamp: n as i64 * 1000,
        },
        timestamp: n as i64 * 1000,
        epoch: 0,
        nonce: n,
        owner: "user-1".to_string(),
    }
}

/// A cranked message: identified by deep hash, not message id.
pub fn pushed_msg(n: u64, data: &str) -> ScheduledMessage {
    let mut message = msg(n);
    message.data = Some(data.to_string());
    message.tags = vec![Tag::new("From-Process", "proc-upstream")];
    message.owner = "proc-upstream".to_string();
    message
}

pub fn test_config(dir: &Path) -> UnitConfig {
    UnitConfig {
        max_workers: 3,
        db_path: dir.join("cu.sqlite"),
        memory_spill_dir: dir.join("spill"),
        checkpoint_file_dir: dir.join("checkpoints"),
        wasm_binary_dir: dir.join("binaries"),
        checkpoint_throttle: Duration::ZERO,
        trusted_checkpoint_owners: vec![WALLET_ADDRESS.to_string()],
        ..UnitConfig::default()
    }
}

pub async fn build_core(
    config: UnitConfig,
    su: Arc<StubScheduler>,
    gateway: Arc<StubGateway>,
    runtime: StubRuntime,
) -> Arc<UnitCore> {
    UnitCore::new(config, su, gateway, Arc::new(runtime), Arc::new(StubSigner))
        .await
        .expect("core builds")
}

pub fn api(core: Arc<UnitCore>) -> ReadApi {
    ReadApi::new(core)
}

/// Hash of the process's cached terminal memory.
pub async fn terminal_memory_hash(core: &UnitCore, process_id: &str) -> Option<String> {
    let memory: ProcessMemory = core.cache.get(process_id)?;
    match memory.slot {
        cu_core::domain::MemorySlot::Buffer(bytes) => Some(sha256_hex(&bytes)),
        cu_core::domain::MemorySlot::File(path) => {
            let bytes = tokio::fs::read(path).await.ok()?;
            Some(sha256_hex(&bytes))
        }
    }
}
