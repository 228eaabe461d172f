//! Allow-set of active stream identifiers

use std::collections::HashSet;

use crate::models::StreamCatalogEntry;

/// Trimmed, lower-cased form used for every identifier comparison
pub fn normalize_identifier(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Normalized identifiers considered active for one user
///
/// Empty values are never stored, so an element with a missing identifier
/// cannot match.
#[derive(Debug, Clone, Default)]
pub struct AllowSet {
    entries: HashSet<String>,
}

impl AllowSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every non-empty `tvg_id`, `name` and `orig_name` contributes one entry
    pub fn from_catalog<'a, I>(catalog: I) -> Self
    where
        I: IntoIterator<Item = &'a StreamCatalogEntry>,
    {
        let mut set = Self::new();
        for entry in catalog {
            for value in [&entry.tvg_id, &entry.name, &entry.orig_name]
                .into_iter()
                .flatten()
            {
                set.insert(value);
            }
        }
        set
    }

    /// Returns whether the normalized value was newly added
    pub fn insert(&mut self, value: &str) -> bool {
        let normalized = normalize_identifier(value);
        if normalized.is_empty() {
            return false;
        }
        self.entries.insert(normalized)
    }

    pub fn contains(&self, value: &str) -> bool {
        let normalized = normalize_identifier(value);
        !normalized.is_empty() && self.entries.contains(&normalized)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for AllowSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut set = Self::new();
        for value in iter {
            set.insert(value.as_ref());
        }
        set
    }
}
