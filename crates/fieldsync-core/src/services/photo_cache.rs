//! Session-scoped cache of captured photo references.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::util::normalize_text_option;

/// Photo id to local blob reference (file path or data URL).
///
/// Lives for the process only; the queued upload carries its own copy of
/// the reference.
#[derive(Debug, Default)]
pub struct PhotoCache {
    entries: Mutex<HashMap<String, String>>,
}

impl PhotoCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Database("photo cache lock poisoned".to_string()))
    }

    /// Remember `blob` under `photo_id`, replacing any previous reference
    pub fn insert(&self, photo_id: &str, blob: impl Into<String>) -> Result<()> {
        let photo_id = normalize_text_option(Some(photo_id.to_string()))
            .ok_or_else(|| Error::InvalidInput("photo id cannot be empty".to_string()))?;
        self.entries()?.insert(photo_id, blob.into());
        Ok(())
    }

    pub fn get(&self, photo_id: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(photo_id.trim()).cloned())
    }

    /// Drop every entry; returns how many were cached
    pub fn clear(&self) -> Result<usize> {
        let mut entries = self.entries()?;
        let count = entries.len();
        entries.clear();
        Ok(count)
    }
}
