use std::collections::HashMap;

use crate::entry::{EntryInfo, EntryStatus};

/// The single flat map from normalized relative path to entry.
///
/// Keys carry no leading or trailing slash; the empty string keys the
/// root. `list_children` is a linear scan by design — there is no
/// secondary index to fall out of sync.
#[derive(Debug, Default)]
pub struct EntryCache {
    entries: HashMap<String, EntryInfo>,
}

impl EntryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&EntryInfo> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut EntryInfo> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Store an entry under its relative path, stripped of any trailing
    /// slash. Re-inserting replaces the previous entry.
    pub fn insert(&mut self, entry: EntryInfo) {
        let key = entry.rel_path.trim_end_matches('/').to_string();
        log::trace!("cache insert: \"{}\" ({})", key, entry.name);
        self.entries.insert(key, entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Direct children of `key`: every cached key that extends `key` by
    /// exactly one component. The root (empty key) matches every key
    /// without a separator.
    pub fn list_children(&self, key: &str) -> Vec<&EntryInfo> {
        let mut found = Vec::new();
        if key.is_empty() {
            for (k, entry) in &self.entries {
                if !k.is_empty() && !k.contains('/') {
                    found.push(entry);
                }
            }
            return found;
        }
        let prefix = format!("{key}/");
        for (k, entry) in &self.entries {
            if let Some(rest) = k.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    found.push(entry);
                }
            }
        }
        found
    }

    pub fn set_status(&mut self, key: &str, status: EntryStatus) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.status = status;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &EntryInfo)> {
        self.entries.iter()
    }

    pub fn as_map(&self) -> &HashMap<String, EntryInfo> {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryType;
    use crate::paths;

    fn entry(rel: &str, entry_type: EntryType) -> EntryInfo {
        EntryInfo {
            name: paths::basename(rel).to_string(),
            rel_path: rel.to_string(),
            name_in_archive: rel.to_string(),
            entry_type,
            status: EntryStatus::Ready,
            size: 0,
            modified: None,
            created: None,
            is_hidden: false,
            cache: None,
        }
    }

    #[test]
    fn insert_strips_trailing_slash() {
        let mut cache = EntryCache::new();
        cache.insert(entry("dir/", EntryType::Directory));
        assert!(cache.contains("dir"));
        assert!(!cache.contains("dir/"));
    }

    #[test]
    fn children_of_root_and_nested() {
        let mut cache = EntryCache::new();
        cache.insert(entry("", EntryType::Directory));
        cache.insert(entry("a.txt", EntryType::File));
        cache.insert(entry("s", EntryType::Directory));
        cache.insert(entry("s/b.txt", EntryType::File));
        cache.insert(entry("s/deep", EntryType::Directory));
        cache.insert(entry("s/deep/c.txt", EntryType::File));

        let mut root: Vec<&str> = cache
            .list_children("")
            .iter()
            .map(|e| e.rel_path.as_str())
            .collect();
        root.sort();
        assert_eq!(root, vec!["a.txt", "s"]);

        let mut sub: Vec<&str> = cache
            .list_children("s")
            .iter()
            .map(|e| e.rel_path.as_str())
            .collect();
        sub.sort();
        assert_eq!(sub, vec!["s/b.txt", "s/deep"]);
    }

    #[test]
    fn set_status_mutates_single_entry() {
        let mut cache = EntryCache::new();
        cache.insert(entry("x.zip", EntryType::Archive));
        assert!(cache.set_status("x.zip", EntryStatus::Broken));
        assert_eq!(cache.get("x.zip").unwrap().status, EntryStatus::Broken);
        assert!(!cache.set_status("missing", EntryStatus::Ready));
    }
}
