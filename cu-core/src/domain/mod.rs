//! Core records shared by every layer: processes, modules, evaluations,
//! process memories, scheduled messages and the ordinate total order that
//! sequences all of them.

pub mod evaluation;
pub mod hash;
pub mod memory;
pub mod message;
pub mod module;
pub mod ordinate;
pub mod process;

pub use evaluation::{EvalCursor, EvalOutput, Evaluation, MessageIdentity};
pub use hash::{deep_hash, sha256_hex};
pub use memory::{MemorySlot, ProcessMemory};
pub use message::{MessagePage, MessagePageEdge, ScheduledMessage};
pub use module::{ModuleMeta, ModuleOptions};
pub use ordinate::Ordinate;
pub use process::{BlockRef, Process, Tag};
