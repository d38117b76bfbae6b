use std::path::PathBuf;

use super::evaluation::EvalCursor;

/// Payload of a cached process memory: a live buffer, or a handle to a
/// spill file once the cache has evicted the bytes.
#[derive(Clone, Debug)]
pub enum MemorySlot {
    Buffer(Vec<u8>),
    File(PathBuf),
}

impl MemorySlot {
    /// Bytes held in RAM. File-backed slots weigh nothing against the
    /// cache budget.
    pub fn resident_bytes(&self) -> usize {
        match self {
            MemorySlot::Buffer(buf) => buf.len(),
            MemorySlot::File(_) => 0,
        }
    }

    pub fn is_file_backed(&self) -> bool {
        matches!(self, MemorySlot::File(_))
    }
}

/// A process memory plus the log position it corresponds to. Mutated in
/// place only by the single-flight owner of the process's pipeline.
#[derive(Clone, Debug)]
pub struct ProcessMemory {
    pub slot: MemorySlot,
    pub module_id: String,
    pub cursor: EvalCursor,
    /// Gas accumulated since the last checkpoint of this process.
    pub gas_used: u64,
}

impl ProcessMemory {
    pub fn cold_start(process_id: impl Into<String>, module_id: impl Into<String>) -> Self {
        let process_id = process_id.into();
        Self {
            slot: MemorySlot::Buffer(Vec::new()),
            module_id: module_id.into(),
            cursor: EvalCursor::cold_start(process_id),
            gas_used: 0,
        }
    }
}
