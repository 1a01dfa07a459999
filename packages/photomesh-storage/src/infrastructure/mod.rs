//! Infrastructure adapters for `SharedStore`

pub mod local;
pub mod memory;

pub use local::LocalFsStore;
pub use memory::MemoryStore;
