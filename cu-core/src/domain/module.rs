use serde::{Deserialize, Serialize};

use super::process::{tag_value, Tag};

/// Execution budget and capabilities a module was published with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleOptions {
    /// Maximum linear memory in bytes.
    pub memory_limit: u64,
    /// Maximum gas a single message evaluation may burn.
    pub compute_limit: u64,
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// The wasm binary a process runs. Many processes may share one module;
/// immutable once persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMeta {
    pub id: String,
    pub owner: String,
    pub tags: Vec<Tag>,
    /// e.g. `wasm32-unknown-emscripten` or `wasm64-unknown-emscripten-draft`.
    pub format: String,
    pub options: ModuleOptions,
}

impl ModuleMeta {
    pub fn tag(&self, name: &str) -> Option<&str> {
        tag_value(&self.tags, name)
    }
}
