//! Wiring: one dependency struct handed to the pipeline and the read APIs.
//!
//! Clients are wired explicitly here, leaves first; no service locator,
//! no global state. Everything behind a seam trait (scheduler, gateway,
//! wasm runtime, signer) arrives as an `Arc<dyn ...>` so tests and
//! transports can swap implementations without touching the core.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use crate::cache::{spawn_ttl_sweeper, MemoryCache};
use crate::checkpoint::{CheckpointFiles, CheckpointWriter, DataItemSigner, MemoryLocator};
use crate::config::UnitConfig;
use crate::gateway::{Gateway, HttpGateway};
use crate::locator::ProcessLocator;
use crate::scheduler::{HttpSchedulerUnit, SchedulerUnit};
use crate::store::UnitStore;
use crate::wasm::{ModuleLoader, WasmRuntime};
use crate::workers::{AdmissionQueue, WorkerPool};

#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    #[error(transparent)]
    #[diagnostic(code(cu::unit::store))]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    #[diagnostic(code(cu::unit::gateway))]
    Gateway(#[from] crate::gateway::GatewayError),
}

/// The assembled core: every collaborator the pipeline and read APIs need.
pub struct UnitCore {
    pub config: Arc<UnitConfig>,
    pub store: UnitStore,
    pub cache: Arc<MemoryCache>,
    pub files: Arc<CheckpointFiles>,
    pub checkpoints: Arc<CheckpointWriter>,
    pub memory_locator: MemoryLocator,
    pub gateway: Arc<dyn Gateway>,
    pub su: Arc<dyn SchedulerUnit>,
    pub locator: ProcessLocator,
    pub loader: ModuleLoader,
    pub primary: AdmissionQueue,
    pub dry_run: AdmissionQueue,
    pub signer: Arc<dyn DataItemSigner>,
}

impl UnitCore {
    /// Assemble a core over explicit collaborators. Starts the worker
    /// pools and the cache TTL sweeper.
    pub async fn new(
        config: UnitConfig,
        su: Arc<dyn SchedulerUnit>,
        gateway: Arc<dyn Gateway>,
        runtime: Arc<dyn WasmRuntime>,
        signer: Arc<dyn DataItemSigner>,
    ) -> Result<Arc<Self>, BuildError> {
        let config = Arc::new(config);
        let store = UnitStore::open(&config.db_path).await?;
        let files = Arc::new(CheckpointFiles::new(
            config.memory_spill_dir.clone(),
            config.checkpoint_file_dir.clone(),
        ));
        let checkpoints = Arc::new(CheckpointWriter::new(
            &config,
            files.clone(),
            store.clone(),
            gateway.clone(),
            signer.clone(),
        ));
        let cache = Arc::new(MemoryCache::new(
            config.memory_cache_max_bytes,
            config.memory_cache_ttl,
            checkpoints.clone(),
        ));
        spawn_ttl_sweeper(cache.clone());
        let memory_locator = MemoryLocator::new(
            &config,
            cache.clone(),
            files.clone(),
            store.clone(),
            gateway.clone(),
        );
        let loader = ModuleLoader::new(
            config.wasm_binary_dir.clone(),
            gateway.clone(),
            config.module_cache_max_size,
        );
        let primary = AdmissionQueue::new(
            Arc::new(WorkerPool::start(
                "primary",
                config.primary_pool_size(),
                runtime.clone(),
                config.instance_cache_max_size,
            )),
            None,
        );
        let dry_run = AdmissionQueue::new(
            Arc::new(WorkerPool::start(
                "dry-run",
                config.dry_run_pool_size(),
                runtime,
                config.instance_cache_max_size,
            )),
            Some(config.dry_run_max_queue),
        );
        Ok(Arc::new(Self {
            locator: ProcessLocator::new(gateway.clone()),
            config,
            store,
            cache,
            files,
            checkpoints,
            memory_locator,
            gateway,
            su,
            loader,
            primary,
            dry_run,
            signer,
        }))
    }

    /// Assemble a core from the environment with HTTP collaborators.
    pub async fn from_env(
        runtime: Arc<dyn WasmRuntime>,
        signer: Arc<dyn DataItemSigner>,
    ) -> Result<Arc<Self>, BuildError> {
        let config = UnitConfig::from_env();
        let gateway: Arc<dyn Gateway> = Arc::new(HttpGateway::from_config(&config)?);
        let su: Arc<dyn SchedulerUnit> = Arc::new(HttpSchedulerUnit::new());
        Self::new(config, su, gateway, runtime, signer).await
    }
}
