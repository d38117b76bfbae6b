//! Unit configuration resolved from the environment.
//!
//! Every recognized variable has a default that works for a local unit;
//! `UnitConfig::from_env` loads `.env` via dotenvy and overlays whatever is
//! set. List-valued variables are comma-separated.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct UnitConfig {
    /// Total worker cap across both pools (`WASM_EVALUATION_MAX_WORKERS`).
    pub max_workers: usize,
    /// Percentage of workers reserved for the primary pool
    /// (`WASM_EVALUATION_PRIMARY_WORKERS_PERCENTAGE`).
    pub primary_workers_pct: u32,
    /// Admission ceiling for the dry-run pool
    /// (`WASM_EVALUATION_WORKERS_DRY_RUN_MAX_QUEUE`).
    pub dry_run_max_queue: usize,

    /// Per-worker compiled module cache entries (`WASM_MODULE_CACHE_MAX_SIZE`).
    pub module_cache_max_size: usize,
    /// Per-worker instance cache entries (`WASM_INSTANCE_CACHE_MAX_SIZE`).
    pub instance_cache_max_size: usize,
    /// Local cache of module binaries (`WASM_BINARY_FILE_DIRECTORY`).
    pub wasm_binary_dir: PathBuf,

    /// In-memory tier budget in bytes (`PROCESS_MEMORY_CACHE_MAX_SIZE`).
    pub memory_cache_max_bytes: usize,
    /// In-memory tier TTL (`PROCESS_MEMORY_CACHE_TTL`, milliseconds).
    pub memory_cache_ttl: Duration,
    /// Spill directory (`PROCESS_MEMORY_CACHE_FILE_DIR`).
    pub memory_spill_dir: PathBuf,
    /// Local checkpoint file dir (`PROCESS_CHECKPOINT_FILE_DIRECTORY`).
    pub checkpoint_file_dir: PathBuf,

    /// `DISABLE_PROCESS_CHECKPOINT_CREATION`: skip remote uploads, keep
    /// local file records.
    pub disable_checkpoint_creation: bool,
    /// `PROCESS_CHECKPOINT_CREATION_THROTTLE`: per-process minimum interval
    /// between checkpoints, milliseconds.
    pub checkpoint_throttle: Duration,
    /// `EAGER_CHECKPOINT_ACCUMULATED_GAS_THRESHOLD`: gas accumulated since
    /// the last checkpoint that triggers an opportunistic one. Zero
    /// disables eager checkpointing.
    pub eager_checkpoint_gas_threshold: u64,

    /// `PROCESS_IGNORE_ARWEAVE_CHECKPOINTS`: processes whose remote
    /// checkpoints are never trusted.
    pub ignore_remote_checkpoints_for: Vec<String>,
    /// `IGNORE_ARWEAVE_CHECKPOINTS`: specific checkpoint tx ids to skip.
    pub ignore_checkpoint_txs: Vec<String>,
    /// `PROCESS_CHECKPOINT_TRUSTED_OWNERS`: only accept remote checkpoints
    /// signed by these owners. Empty means trust none.
    pub trusted_checkpoint_owners: Vec<String>,

    /// `ALLOW_OWNERS`: if non-empty, only processes owned by these
    /// addresses are served.
    pub allow_owners: Vec<String>,
    /// `RESTRICT_PROCESSES`: processes this unit refuses to serve.
    pub restrict_processes: Vec<String>,
    /// `ALLOW_PROCESSES`: if non-empty, the only processes served.
    pub allow_processes: Vec<String>,

    /// `PROCESS_WASM_MEMORY_MAX_LIMIT` in bytes.
    pub wasm_memory_max_limit: u64,
    /// `PROCESS_WASM_COMPUTE_MAX_LIMIT` in gas.
    pub wasm_compute_max_limit: u64,
    /// `PROCESS_WASM_SUPPORTED_FORMATS`.
    pub wasm_supported_formats: Vec<String>,
    /// `PROCESS_WASM_SUPPORTED_EXTENSIONS`.
    pub wasm_supported_extensions: Vec<String>,

    /// `GRAPHQL_URL`: gateway GraphQL endpoint.
    pub graphql_url: String,
    /// `CHECKPOINT_GRAPHQL_URL`: gateway used for checkpoint discovery;
    /// defaults to `graphql_url`.
    pub checkpoint_graphql_url: String,
    /// `ARWEAVE_URL`: raw transaction-data endpoint.
    pub arweave_url: String,
    /// `UPLOADER_URL`: bundler the unit uploads checkpoints to.
    pub uploader_url: String,
    /// `DB_URL`: path of the unit's sqlite database.
    pub db_path: PathBuf,
    /// `WALLET`: path of the unit's wallet file, handed to the signer seam.
    pub wallet_path: PathBuf,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            primary_workers_pct: 70,
            dry_run_max_queue: 50,
            module_cache_max_size: 5,
            instance_cache_max_size: 5,
            wasm_binary_dir: PathBuf::from("wasm-binaries"),
            memory_cache_max_bytes: 500 * 1024 * 1024,
            memory_cache_ttl: Duration::from_millis(86_400_000),
            memory_spill_dir: PathBuf::from("process-memory"),
            checkpoint_file_dir: PathBuf::from("checkpoints"),
            disable_checkpoint_creation: false,
            checkpoint_throttle: Duration::from_millis(1_800_000),
            eager_checkpoint_gas_threshold: 0,
            ignore_remote_checkpoints_for: Vec::new(),
            ignore_checkpoint_txs: Vec::new(),
            trusted_checkpoint_owners: Vec::new(),
            allow_owners: Vec::new(),
            restrict_processes: Vec::new(),
            allow_processes: Vec::new(),
            wasm_memory_max_limit: 1024 * 1024 * 1024,
            wasm_compute_max_limit: 9_000_000_000_000,
            wasm_supported_formats: vec![
                "wasm32-unknown-emscripten".to_string(),
                "wasm64-unknown-emscripten-draft_2024_02_15".to_string(),
            ],
            wasm_supported_extensions: Vec::new(),
            graphql_url: "https://arweave.net/graphql".to_string(),
            checkpoint_graphql_url: "https://arweave.net/graphql".to_string(),
            arweave_url: "https://arweave.net".to_string(),
            uploader_url: "https://up.arweave.net".to_string(),
            db_path: PathBuf::from("cu.sqlite"),
            wallet_path: PathBuf::from("wallet.json"),
        }
    }
}

impl UnitConfig {
    /// Resolve configuration from the process environment, falling back to
    /// defaults field by field.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let base = Self::default();
        let graphql_url = var_string("GRAPHQL_URL", base.graphql_url);
        Self {
            max_workers: var_parsed("WASM_EVALUATION_MAX_WORKERS", base.max_workers).max(1),
            primary_workers_pct: var_parsed(
                "WASM_EVALUATION_PRIMARY_WORKERS_PERCENTAGE",
                base.primary_workers_pct,
            )
            .min(100),
            dry_run_max_queue: var_parsed(
                "WASM_EVALUATION_WORKERS_DRY_RUN_MAX_QUEUE",
                base.dry_run_max_queue,
            ),
            module_cache_max_size: var_parsed(
                "WASM_MODULE_CACHE_MAX_SIZE",
                base.module_cache_max_size,
            ),
            instance_cache_max_size: var_parsed(
                "WASM_INSTANCE_CACHE_MAX_SIZE",
                base.instance_cache_max_size,
            ),
            wasm_binary_dir: var_path("WASM_BINARY_FILE_DIRECTORY", base.wasm_binary_dir),
            memory_cache_max_bytes: var_parsed(
                "PROCESS_MEMORY_CACHE_MAX_SIZE",
                base.memory_cache_max_bytes,
            ),
            memory_cache_ttl: Duration::from_millis(var_parsed(
                "PROCESS_MEMORY_CACHE_TTL",
                base.memory_cache_ttl.as_millis() as u64,
            )),
            memory_spill_dir: var_path("PROCESS_MEMORY_CACHE_FILE_DIR", base.memory_spill_dir),
            checkpoint_file_dir: var_path(
                "PROCESS_CHECKPOINT_FILE_DIRECTORY",
                base.checkpoint_file_dir,
            ),
            disable_checkpoint_creation: var_flag("DISABLE_PROCESS_CHECKPOINT_CREATION"),
            checkpoint_throttle: Duration::from_millis(var_parsed(
                "PROCESS_CHECKPOINT_CREATION_THROTTLE",
                base.checkpoint_throttle.as_millis() as u64,
            )),
            eager_checkpoint_gas_threshold: var_parsed(
                "EAGER_CHECKPOINT_ACCUMULATED_GAS_THRESHOLD",
                base.eager_checkpoint_gas_threshold,
            ),
            ignore_remote_checkpoints_for: var_list("PROCESS_IGNORE_ARWEAVE_CHECKPOINTS"),
            ignore_checkpoint_txs: var_list("IGNORE_ARWEAVE_CHECKPOINTS"),
            trusted_checkpoint_owners: var_list("PROCESS_CHECKPOINT_TRUSTED_OWNERS"),
            allow_owners: var_list("ALLOW_OWNERS"),
            restrict_processes: var_list("RESTRICT_PROCESSES"),
            allow_processes: var_list("ALLOW_PROCESSES"),
            wasm_memory_max_limit: var_parsed(
                "PROCESS_WASM_MEMORY_MAX_LIMIT",
                base.wasm_memory_max_limit,
            ),
            wasm_compute_max_limit: var_parsed(
                "PROCESS_WASM_COMPUTE_MAX_LIMIT",
                base.wasm_compute_max_limit,
            ),
            wasm_supported_formats: var_list_or(
                "PROCESS_WASM_SUPPORTED_FORMATS",
                base.wasm_supported_formats,
            ),
            wasm_supported_extensions: var_list("PROCESS_WASM_SUPPORTED_EXTENSIONS"),
            checkpoint_graphql_url: var_string("CHECKPOINT_GRAPHQL_URL", graphql_url.clone()),
            graphql_url,
            arweave_url: var_string("ARWEAVE_URL", base.arweave_url),
            uploader_url: var_string("UPLOADER_URL", base.uploader_url),
            db_path: var_path("DB_URL", base.db_path),
            wallet_path: var_path("WALLET", base.wallet_path),
        }
    }

    /// Worker count of the primary pool.
    pub fn primary_pool_size(&self) -> usize {
        let by_pct =
            (self.max_workers as f64 * self.primary_workers_pct as f64 / 100.0).ceil() as usize;
        by_pct.min(self.max_workers.saturating_sub(1).max(1))
    }

    /// Worker count of the dry-run pool.
    pub fn dry_run_pool_size(&self) -> usize {
        let remainder =
            (self.max_workers as f64 * (100 - self.primary_workers_pct) as f64 / 100.0).floor();
        (remainder as usize).max(1)
    }

    /// Access-control gate: is this unit willing to serve the process at
    /// all? Checked before any pipeline work.
    pub fn process_allowed(&self, process_id: &str, owner: &str) -> bool {
        if self.restrict_processes.iter().any(|p| p == process_id) {
            return false;
        }
        if !self.allow_processes.is_empty()
            && !self.allow_processes.iter().any(|p| p == process_id)
        {
            return false;
        }
        if !self.allow_owners.is_empty() && !self.allow_owners.iter().any(|o| o == owner) {
            return false;
        }
        true
    }
}

fn var_string(name: &str, default: String) -> String {
    std::env::var(name).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn var_path(name: &str, default: PathBuf) -> PathBuf {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or(default)
}

fn var_parsed<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn var_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).unwrap_or_default().trim(),
        "1" | "true" | "TRUE" | "yes"
    )
}

fn var_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn var_list_or(name: &str, default: Vec<String>) -> Vec<String> {
    let parsed = var_list(name);
    if parsed.is_empty() {
        default
    } else {
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_split_honors_percentage() {
        let cfg = UnitConfig {
            max_workers: 10,
            primary_workers_pct: 70,
            ..UnitConfig::default()
        };
        assert_eq!(cfg.primary_pool_size(), 7);
        assert_eq!(cfg.dry_run_pool_size(), 3);
    }

    #[test]
    fn pool_split_never_starves_either_pool() {
        let cfg = UnitConfig {
            max_workers: 1,
            primary_workers_pct: 100,
            ..UnitConfig::default()
        };
        assert_eq!(cfg.primary_pool_size(), 1);
        assert_eq!(cfg.dry_run_pool_size(), 1);

        let cfg = UnitConfig {
            max_workers: 2,
            primary_workers_pct: 99,
            ..UnitConfig::default()
        };
        // Primary is capped at max_workers - 1 so a dry-run worker exists.
        assert_eq!(cfg.primary_pool_size(), 1);
    }

    #[test]
    fn access_control_combines_filters() {
        let cfg = UnitConfig {
            allow_owners: vec!["owner-a".into()],
            restrict_processes: vec!["bad".into()],
            ..UnitConfig::default()
        };
        assert!(cfg.process_allowed("p1", "owner-a"));
        assert!(!cfg.process_allowed("p1", "owner-b"));
        assert!(!cfg.process_allowed("bad", "owner-a"));

        let cfg = UnitConfig {
            allow_processes: vec!["only".into()],
            ..UnitConfig::default()
        };
        assert!(cfg.process_allowed("only", "anyone"));
        assert!(!cfg.process_allowed("other", "anyone"));
    }
}
