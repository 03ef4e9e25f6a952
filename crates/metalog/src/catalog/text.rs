//! Help text store.
//!
//! One string per (text type, identifier) pair. Help text carries no
//! timestamp; a record with different contents replaces what is stored,
//! keeping the latest version so corrections made over time win.

use crate::format::TEXT_DIRECT;
use std::collections::HashMap;
use tracing::debug;

/// Per-type, per-identifier help text.
#[derive(Debug, Default)]
pub struct TextStore {
    entries: HashMap<u32, HashMap<u32, String>>,
}

impl TextStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts help text for an identifier, replacing any differing
    /// earlier text. Re-inserting identical text is a no-op. The direct
    /// modifier bit does not participate in keying.
    pub fn insert(&mut self, ident: u32, kind: u32, text: &str) {
        let kind = kind & !TEXT_DIRECT;
        let per_ident = self.entries.entry(kind).or_default();
        match per_ident.get_mut(&ident) {
            Some(existing) if existing == text => {}
            Some(existing) => {
                debug!(ident, kind, "replace help text");
                text.clone_into(existing);
            }
            None => {
                per_ident.insert(ident, text.to_string());
            }
        }
    }

    /// Returns the help text for an identifier.
    pub fn lookup(&self, ident: u32, kind: u32) -> Option<&str> {
        self.entries
            .get(&(kind & !TEXT_DIRECT))?
            .get(&ident)
            .map(|s| s.as_str())
    }

    /// Returns true if the store holds no text.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
