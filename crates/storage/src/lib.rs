//! Local persistence for fluxstudio.
//!
//! A small string key-value seam ([`storage::KeyValueStore`]) with memory
//! and file backends, the generation history kept on top of it, and the
//! stored API credential.

pub mod credentials;
pub mod events;
pub mod history;
pub mod item;
pub mod storage;

pub use credentials::CredentialStore;
pub use events::{HistoryEvent, HistoryEvents};
pub use history::{HistoryConfig, HistoryFilter, HistoryPage, HistoryStore};
pub use item::{HistoryItem, RequestSnapshot};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
