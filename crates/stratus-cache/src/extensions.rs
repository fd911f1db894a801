//! File-extension interning.
//!
//! Extensions address cache entries, so the same few strings are hashed and
//! compared constantly. The registry interns them: equal extensions share
//! one allocation, and lookups from mount threads are lock-free.

use dashmap::DashMap;

use stratus_core::domain::newtypes::FileExtension;

/// Interning table for file extensions.
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    interned: DashMap<String, FileExtension>,
}

impl ExtensionRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a raw extension string (`"TXT"`, `".txt"` → shared `".txt"`).
    pub fn get(&self, raw: &str) -> FileExtension {
        let normalized = FileExtension::new(raw);
        self.interned
            .entry(normalized.as_str().to_string())
            .or_insert(normalized)
            .clone()
    }

    /// Intern the extension of a file name.
    pub fn from_name(&self, name: &str) -> FileExtension {
        self.get(FileExtension::from_name(name).as_str())
    }

    /// Number of distinct extensions seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interned.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interned.is_empty()
    }
}
