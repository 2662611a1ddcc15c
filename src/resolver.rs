use crate::cache::EntryCache;
use crate::entry::EntryType;
use crate::paths;
use crate::registry::HandlerRegistry;

/// Splits composite paths and walks the cache for enclosing archives.
///
/// Borrowed fresh from the manager per operation; holds no state of its
/// own beyond whether the base itself is an archive file.
pub struct PathResolver<'a> {
    registry: &'a HandlerRegistry,
    base_is_archive: bool,
}

impl<'a> PathResolver<'a> {
    pub fn new(registry: &'a HandlerRegistry, base_is_archive: bool) -> Self {
        Self {
            registry,
            base_is_archive,
        }
    }

    /// Nearest enclosing archive of `rel_path`, from the entry cache:
    /// trim trailing components and return the first ARCHIVE-typed hit.
    /// The root key counts when the base itself is an archive. `None`
    /// means the path sits under the base directory.
    pub fn find_parent_archive(&self, cache: &EntryCache, rel_path: &str) -> Option<String> {
        let norm = paths::normalize(rel_path);
        let mut current = paths::parent_of(&norm)?.to_string();
        loop {
            if let Some(entry) = cache.get(&current) {
                if entry.entry_type == EntryType::Archive {
                    return Some(current);
                }
            }
            match paths::parent_of(&current) {
                Some(parent) => current = parent.to_string(),
                None => return None,
            }
        }
    }

    /// Split `rel_path` into `(parent_archive, internal_path)`.
    ///
    /// The cache walk is authoritative; when it cannot answer (prefix
    /// entries missing), prefixes are re-tested longest-first against the
    /// registry's archive extensions. A base that is itself an archive
    /// absorbs everything that matched no prefix.
    pub fn analyze(&self, cache: &EntryCache, rel_path: &str) -> Option<(String, String)> {
        let norm = paths::normalize(rel_path);
        if norm.is_empty() {
            return None;
        }

        if let Some(parent) = self.find_parent_archive(cache, &norm) {
            let internal = if parent.is_empty() {
                norm.clone()
            } else {
                norm[parent.len() + 1..].to_string()
            };
            return Some((parent, internal));
        }

        // Longest prefix first, so the immediate enclosing archive wins
        // over an outer one.
        let mut boundary = norm.len();
        while let Some(idx) = norm[..boundary].rfind('/') {
            let prefix = &norm[..idx];
            if self.registry.is_archive_name(prefix) {
                return Some((prefix.to_string(), norm[idx + 1..].to_string()));
            }
            boundary = idx;
        }

        if self.base_is_archive {
            return Some((String::new(), norm));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryInfo, EntryStatus};

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

    fn seeded_cache() -> EntryCache {
        let mut cache = EntryCache::new();
        cache.insert(entry("", EntryType::Directory));
        cache.insert(entry("docs", EntryType::Directory));
        cache.insert(entry("docs/a.zip", EntryType::Archive));
        cache.insert(entry("docs/a.zip/inner", EntryType::Directory));
        cache.insert(entry("docs/a.zip/inner/b.zip", EntryType::Archive));
        cache
    }

    #[test]
    fn walks_to_nearest_archive() {
        let registry = HandlerRegistry::with_standard_handlers();
        let resolver = PathResolver::new(&registry, false);
        let cache = seeded_cache();

        assert_eq!(
            resolver.find_parent_archive(&cache, "docs/a.zip/inner/file.txt"),
            Some("docs/a.zip".to_string())
        );
        assert_eq!(
            resolver.find_parent_archive(&cache, "docs/a.zip/inner/b.zip/leaf.txt"),
            Some("docs/a.zip/inner/b.zip".to_string())
        );
        assert_eq!(resolver.find_parent_archive(&cache, "docs/plain.txt"), None);
    }

    #[test]
    fn archive_root_counts_when_base_is_archive() {
        let registry = HandlerRegistry::with_standard_handlers();
        let resolver = PathResolver::new(&registry, true);
        let mut cache = EntryCache::new();
        cache.insert(entry("", EntryType::Archive));
        cache.insert(entry("member.txt", EntryType::File));

        assert_eq!(
            resolver.find_parent_archive(&cache, "member.txt"),
            Some(String::new())
        );
    }

    #[test]
    fn analyze_prefers_cache_then_extensions() {
        let registry = HandlerRegistry::with_standard_handlers();
        let resolver = PathResolver::new(&registry, false);
        let cache = seeded_cache();

        assert_eq!(
            resolver.analyze(&cache, "docs/a.zip/inner/file.txt"),
            Some(("docs/a.zip".to_string(), "inner/file.txt".to_string()))
        );
        // Not in the cache at all: extension scan takes over, longest
        // prefix first.
        assert_eq!(
            resolver.analyze(&cache, "elsewhere/x.zip/y.zip/data.bin"),
            Some(("elsewhere/x.zip/y.zip".to_string(), "data.bin".to_string()))
        );
        assert_eq!(resolver.analyze(&cache, "plain/file.txt"), None);
    }

    #[test]
    fn analyze_falls_back_to_archive_base() {
        let registry = HandlerRegistry::with_standard_handlers();
        let resolver = PathResolver::new(&registry, true);
        let cache = EntryCache::new();

        assert_eq!(
            resolver.analyze(&cache, "some/member.txt"),
            Some((String::new(), "some/member.txt".to_string()))
        );
    }
}
