//! Generation history kept as one JSON array under one storage key.
//!
//! Newest items come first. Every mutation re-reads the persisted array
//! before changing it, so edits made by another handle on the same storage
//! since the last load are kept. Two processes writing at the same instant
//! can still overwrite each other; a single writer is assumed.

use std::sync::{Arc, Mutex, MutexGuard};

use fluxstudio_core::models::ModelRegistry;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::events::{HistoryEvent, HistoryEvents};
use crate::item::HistoryItem;
use crate::storage::{KeyValueStore, StorageError};

/// Storage key of the history array.
pub const DEFAULT_HISTORY_KEY: &str = "imageHistory";

/// Default number of entries kept.
pub const DEFAULT_HISTORY_CAP: usize = 50;

/// Default page size for [`HistoryStore::list`].
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Upper bound on page size.
pub const MAX_PAGE_SIZE: usize = 100;

/// Where history lives and how much of it is kept.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    pub key: String,
    /// Oldest entries beyond the cap are dropped on append. `None` keeps
    /// everything.
    pub cap: Option<usize>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_HISTORY_KEY.to_string(),
            cap: Some(DEFAULT_HISTORY_CAP),
        }
    }
}

impl HistoryConfig {
    /// Set the cap; `Some(0)` is treated as no cap.
    pub fn with_cap(mut self, cap: Option<usize>) -> Self {
        self.cap = cap.filter(|c| *c > 0);
        self
    }
}

/// One page of history, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPage {
    pub items: Vec<HistoryItem>,
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

/// Narrowing criteria for [`HistoryStore::search`]. Empty fields match
/// everything.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Registry id or display name, case-insensitive.
    pub model: Option<String>,
    /// Case-insensitive substring of the prompt.
    pub text: Option<String>,
}

impl HistoryFilter {
    pub fn matches(&self, item: &HistoryItem) -> bool {
        let model_ok = match self.model.as_deref().map(str::trim) {
            Some(model) if !model.is_empty() => {
                item.model_id.eq_ignore_ascii_case(model) || item.model.eq_ignore_ascii_case(model)
            }
            _ => true,
        };
        let text_ok = match self.text.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => {
                item.prompt.to_lowercase().contains(&text.to_lowercase())
            }
            _ => true,
        };
        model_ok && text_ok
    }
}

/// Persistent, capped, newest-first list of [`HistoryItem`]s.
pub struct HistoryStore {
    storage: Arc<dyn KeyValueStore>,
    config: HistoryConfig,
    items: Mutex<Vec<HistoryItem>>,
    events: HistoryEvents,
}

impl HistoryStore {
    /// Load history from `storage`.
    ///
    /// Unparsable data is treated as an empty history; individual entries
    /// that fail to decode are skipped.
    pub fn open(storage: Arc<dyn KeyValueStore>, config: HistoryConfig) -> Result<Self, StorageError> {
        let store = Self {
            storage,
            config,
            items: Mutex::new(Vec::new()),
            events: HistoryEvents::default(),
        };
        let loaded = store.read_persisted()?;
        tracing::debug!(key = %store.config.key, count = loaded.len(), "Loaded history");
        *store.cached() = loaded;
        Ok(store)
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn events(&self) -> &HistoryEvents {
        &self.events
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<HistoryEvent> {
        self.events.subscribe()
    }

    // -- mutations ----------------------------------------------------------

    /// Insert `item` at the front, dropping the oldest entries beyond the cap.
    pub fn append(&self, item: HistoryItem) -> Result<(), StorageError> {
        let mut cached = self.cached();
        let mut items = self.read_persisted()?;
        let id = item.id;
        items.insert(0, item);
        if let Some(cap) = self.config.cap {
            if items.len() > cap {
                tracing::debug!(dropped = items.len() - cap, cap, "Trimming history to cap");
                items.truncate(cap);
            }
        }
        self.write_persisted(&items)?;
        *cached = items;
        drop(cached);

        tracing::info!(%id, "Appended history item");
        self.events.publish(HistoryEvent::Appended { id });
        Ok(())
    }

    /// Remove the item with `id`. Returns whether anything was removed;
    /// removing a missing id changes nothing.
    pub fn remove(&self, id: Uuid) -> Result<bool, StorageError> {
        let mut cached = self.cached();
        let mut items = self.read_persisted()?;
        let before = items.len();
        items.retain(|item| item.id != id);
        let removed = items.len() != before;
        if removed {
            self.write_persisted(&items)?;
        }
        *cached = items;
        drop(cached);

        if removed {
            tracing::info!(%id, "Removed history item");
            self.events.publish(HistoryEvent::Removed { id });
        }
        Ok(removed)
    }

    /// Delete the whole history.
    pub fn clear(&self) -> Result<(), StorageError> {
        let mut cached = self.cached();
        self.storage.remove(&self.config.key)?;
        cached.clear();
        drop(cached);

        tracing::info!(key = %self.config.key, "Cleared history");
        self.events.publish(HistoryEvent::Cleared);
        Ok(())
    }

    /// Re-read from storage, returning the new item count.
    pub fn reload(&self) -> Result<usize, StorageError> {
        let mut cached = self.cached();
        *cached = self.read_persisted()?;
        let count = cached.len();
        drop(cached);

        self.events.publish(HistoryEvent::Reloaded { count });
        Ok(count)
    }

    // -- queries ------------------------------------------------------------

    /// Page `page` (1-based) of the history. `page_size` is clamped to
    /// `[1, MAX_PAGE_SIZE]`; pages past the end are empty.
    pub fn list(&self, page: usize, page_size: usize) -> HistoryPage {
        let cached = self.cached();
        paginate(cached.iter(), page, page_size)
    }

    /// Like [`list`](Self::list) over the items matching `filter`.
    pub fn search(&self, filter: &HistoryFilter, page: usize, page_size: usize) -> HistoryPage {
        let cached = self.cached();
        paginate(cached.iter().filter(|item| filter.matches(item)), page, page_size)
    }

    pub fn get(&self, id: Uuid) -> Option<HistoryItem> {
        self.cached().iter().find(|item| item.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.cached().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cached().is_empty()
    }

    // -- persistence --------------------------------------------------------

    fn cached(&self) -> MutexGuard<'_, Vec<HistoryItem>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_persisted(&self) -> Result<Vec<HistoryItem>, StorageError> {
        match self.storage.get(&self.config.key)? {
            Some(raw) => Ok(decode_history(&raw)),
            None => Ok(Vec::new()),
        }
    }

    fn write_persisted(&self, items: &[HistoryItem]) -> Result<(), StorageError> {
        let encoded = serde_json::to_string(items)?;
        self.storage.set(&self.config.key, &encoded)
    }
}

/// Decode a persisted history array, tolerating damage.
fn decode_history(raw: &str) -> Vec<HistoryItem> {
    let entries = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(entries)) => entries,
        Ok(other) => {
            tracing::warn!(found = json_kind(&other), "Stored history is not an array, starting empty");
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!(error = %e, "Stored history is not valid JSON, starting empty");
            return Vec::new();
        }
    };

    let registry = ModelRegistry::builtin();
    entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value::<HistoryItem>(entry) {
            Ok(mut item) => {
                if item.upgrade_legacy(&registry) {
                    tracing::debug!(index, model_id = %item.model_id, "Upgraded web app history entry");
                }
                Some(item)
            }
            Err(e) => {
                tracing::warn!(index, error = %e, "Skipping undecodable history entry");
                None
            }
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn paginate<'a>(
    items: impl Iterator<Item = &'a HistoryItem>,
    page: usize,
    page_size: usize,
) -> HistoryPage {
    let page = page.max(1);
    let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
    let matching: Vec<&HistoryItem> = items.collect();
    let total_items = matching.len();
    let total_pages = total_items.div_ceil(page_size);

    let items = matching
        .into_iter()
        .skip((page - 1).saturating_mul(page_size))
        .take(page_size)
        .cloned()
        .collect();

    HistoryPage {
        items,
        page,
        page_size,
        total_items,
        total_pages,
    }
}
