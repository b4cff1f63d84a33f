//! Persistence adapters: fingerprint stores and the JSON mirror.

pub mod memory_store;
pub mod mirror_json;
pub mod sqlite_repo;

pub use memory_store::MemoryFingerprintStore;
pub use mirror_json::{JsonMirrorStore, StoreEvent, Subscription};
pub use sqlite_repo::SqliteFingerprintStore;
