use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::DateTime;

use crate::cache::EntryCache;
use crate::entry::{ArchiveCache, EntryInfo, EntryStatus, EntryType};
use crate::error::{Result, VfsError};
use crate::handlers::ArchiveHandler;
use crate::paths;
use crate::processor::{read_member_bytes, ArchiveProcessor};
use crate::registry::HandlerRegistry;
use crate::resolver::PathResolver;

/// Nested archives deeper than this are marked BROKEN instead of opened.
const DEFAULT_MAX_NESTING: usize = 5;

/// The resolved base of navigation: an absolute forward-slash path plus
/// whether it is a directory.
#[derive(Debug, Clone)]
pub(crate) struct BasePath {
    pub path: String,
    pub is_dir: bool,
}

impl BasePath {
    pub fn disk_path(&self, rel: &str) -> String {
        if rel.is_empty() {
            self.path.clone()
        } else {
            format!("{}/{}", self.path.trim_end_matches('/'), rel)
        }
    }

    pub fn is_archive(&self, registry: &HandlerRegistry) -> bool {
        !self.is_dir && registry.is_archive_name(&self.path)
    }
}

/// The virtual filesystem: one base path, one flat entry cache, and the
/// handlers that read the formats inside it.
///
/// `set_base_path` builds the cache eagerly, materializing every nested
/// archive it finds; `list_entries`, `read_file`, and `get_entry_info`
/// are cache lookups after that. A single caller drives one manager at a
/// time; nothing here expects concurrent mutation.
pub struct VfsManager {
    registry: HandlerRegistry,
    cache: EntryCache,
    base: Option<BasePath>,
    temp_files: HashSet<PathBuf>,
    max_nesting: usize,
}

impl Default for VfsManager {
    fn default() -> Self {
        Self::new()
    }
}

impl VfsManager {
    /// A manager with the standard format handlers registered.
    pub fn new() -> Self {
        Self::with_registry(HandlerRegistry::with_standard_handlers())
    }

    pub fn with_registry(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            cache: EntryCache::new(),
            base: None,
            temp_files: HashSet::new(),
            max_nesting: DEFAULT_MAX_NESTING,
        }
    }

    /// Later registrations shadow earlier ones for the same extensions.
    pub fn register_handler(&mut self, handler: Arc<dyn ArchiveHandler>) {
        self.registry.register(handler);
    }

    pub fn set_max_nesting(&mut self, depth: usize) {
        self.max_nesting = depth.max(1);
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Drop the whole cache and every temp file it owns.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.base = None;
        for path in self.temp_files.drain() {
            if let Err(err) = fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("failed to remove temp file {}: {err}", path.display());
                }
            }
        }
    }

    /// Point the manager at a directory or archive file and build the
    /// entry cache, including every nested archive reachable from it.
    ///
    /// Failures local to a single nested archive mark that entry BROKEN
    /// and do not fail the call; failures at the root do.
    pub fn set_base_path(&mut self, path: &str) -> Result<()> {
        self.clear();

        let abs = absolutize(path)?;
        let meta = fs::metadata(&abs).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VfsError::NotFound(abs.clone()),
            _ => VfsError::Io(e),
        })?;
        let base = BasePath {
            path: abs.clone(),
            is_dir: meta.is_dir(),
        };

        let handler = self
            .registry
            .get_handler(&abs)
            .ok_or_else(|| VfsError::Unsupported(abs.clone()))?;
        log::info!("set_base_path: {abs} via {}", handler.name());

        // Root entry straight from the OS stat.
        let root_type = if meta.is_dir() {
            EntryType::Directory
        } else if self.registry.is_archive_name(&abs) {
            EntryType::Archive
        } else {
            EntryType::File
        };
        let root_name = {
            let name = paths::basename(abs.trim_end_matches('/'));
            if name.is_empty() {
                abs.clone()
            } else {
                name.to_string()
            }
        };
        let mut root = handler.create_entry_info(
            &root_name,
            "",
            root_type,
            "",
            if meta.is_file() { meta.len() } else { 0 },
            meta.modified().ok().map(DateTime::from),
            meta.created().ok().map(DateTime::from),
        );
        root.status = EntryStatus::Scanning;
        self.cache.insert(root);
        self.base = Some(base);

        // Top-level enumeration. A failure here is a root failure.
        let raw_entries = match handler.list_all_entries(&abs) {
            Ok(entries) => entries,
            Err(err) => {
                self.cache.set_status("", EntryStatus::Broken);
                return Err(err);
            }
        };

        let mut archive_queue: VecDeque<(String, usize)> = VecDeque::new();
        for entry in raw_entries {
            let finalized = self.finalize_entry(entry, &handler);
            if finalized.entry_type == EntryType::Archive {
                archive_queue.push_back((finalized.rel_path.clone(), 1));
            }
            self.cache.insert(finalized);
        }
        self.cache.set_status("", EntryStatus::Ready);

        // The base archive's own members are already registered; never
        // reprocess the root.
        let mut processed: HashSet<String> = HashSet::new();
        processed.insert(String::new());

        while let Some((rel, depth)) = archive_queue.pop_front() {
            if !processed.insert(rel.clone()) {
                continue;
            }
            let base_ref = self.base.as_ref().expect("base path set above");
            let mut processor = ArchiveProcessor {
                registry: &self.registry,
                cache: &mut self.cache,
                temp_files: &mut self.temp_files,
                base: base_ref,
                max_nesting: self.max_nesting,
            };
            match processor.process(&rel, depth) {
                Ok(nested) => {
                    for key in nested {
                        archive_queue.push_back((key, depth + 1));
                    }
                }
                Err(err) => {
                    log::warn!("archive {rel} marked broken: {err}");
                    self.cache.set_status(&rel, EntryStatus::Broken);
                }
            }
        }

        log::info!("base path ready: {} entries cached", self.cache.len());
        Ok(())
    }

    /// Retype FILE entries whose extension belongs to a registered
    /// archive handler. Entries come out of handlers untyped for this.
    fn finalize_entry(&self, entry: EntryInfo, handler: &Arc<dyn ArchiveHandler>) -> EntryInfo {
        if entry.entry_type == EntryType::File && self.registry.is_archive_name(&entry.name) {
            let mut retyped = handler.create_entry_info(
                &entry.name,
                &entry.rel_path,
                EntryType::Archive,
                &entry.name_in_archive,
                entry.size,
                entry.modified,
                entry.created,
            );
            retyped.status = entry.status;
            retyped
        } else {
            entry
        }
    }

    /// Entry for a relative path, or `None` when the cache has no such
    /// key. Leading slashes are tolerated and stripped.
    pub fn get_entry_info(&self, path: &str) -> Option<EntryInfo> {
        let norm = paths::normalize(path);
        self.cache.get(&norm).cloned()
    }

    /// Direct children of a container path, in natural name order.
    /// A FILE path yields an empty list; a FILE path written with a
    /// trailing slash is rejected as `InvalidPath`.
    pub fn list_entries(&self, path: &str) -> Result<Vec<EntryInfo>> {
        if self.base.is_none() {
            return Err(VfsError::NotFound(
                "no base path set; call set_base_path first".to_string(),
            ));
        }
        let norm = paths::normalize(path);
        let entry = self
            .cache
            .get(&norm)
            .ok_or_else(|| VfsError::NotFound(norm.clone()))?;

        if !entry.entry_type.is_container() {
            if !norm.is_empty() && has_trailing_slash(path) {
                return Err(VfsError::InvalidPath(format!(
                    "file path has a trailing slash: {path}"
                )));
            }
            return Ok(Vec::new());
        }

        let mut children: Vec<EntryInfo> =
            self.cache.list_children(&norm).into_iter().cloned().collect();
        children.sort_by_cached_key(|e| paths::natural_key(&e.name));
        Ok(children)
    }

    /// One file's full octets. For the root of an archive base this is
    /// the archive file itself.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let base = self
            .base
            .as_ref()
            .ok_or_else(|| VfsError::NotFound("no base path set".to_string()))?;

        let norm = paths::normalize(path);
        let entry = self
            .cache
            .get(&norm)
            .ok_or_else(|| VfsError::NotFound(norm.clone()))?
            .clone();

        if !norm.is_empty() && !entry.entry_type.is_container() && has_trailing_slash(path) {
            return Err(VfsError::InvalidPath(format!(
                "file path has a trailing slash: {path}"
            )));
        }

        if norm.is_empty() {
            if base.is_dir {
                return Err(VfsError::InvalidPath("root is a directory".to_string()));
            }
            return Ok(fs::read(&base.path)?);
        }

        if entry.entry_type == EntryType::Directory {
            return Err(VfsError::InvalidPath(format!("{norm} is a directory")));
        }

        // Materialized archives carry their own bytes.
        match &entry.cache {
            Some(ArchiveCache::Bytes(bytes)) => return Ok(bytes.clone()),
            Some(ArchiveCache::TempFile(temp)) => return Ok(fs::read(temp)?),
            None => {}
        }

        let resolver = PathResolver::new(&self.registry, base.is_archive(&self.registry));
        match resolver.find_parent_archive(&self.cache, &norm) {
            Some(parent_rel) => read_member_bytes(
                &self.registry,
                &self.cache,
                base,
                &parent_rel,
                &entry.name_in_archive,
            ),
            None => {
                let disk = base.disk_path(&norm);
                match fs::read(&disk) {
                    Ok(data) => Ok(data),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                        Err(VfsError::NotFound(norm))
                    }
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    /// Read-only view of the full entry map, for viewers that render the
    /// whole tree at once.
    pub fn entry_cache(&self) -> &HashMap<String, EntryInfo> {
        self.cache.as_map()
    }

    pub fn is_archive(&self, path: &str) -> bool {
        self.get_entry_info(path)
            .map(|e| e.entry_type == EntryType::Archive)
            .unwrap_or(false)
    }

    pub fn is_directory(&self, path: &str) -> bool {
        self.get_entry_info(path)
            .map(|e| e.entry_type == EntryType::Directory)
            .unwrap_or(false)
    }

    pub fn base_path(&self) -> Option<&str> {
        self.base.as_ref().map(|b| b.path.as_str())
    }
}

impl Drop for VfsManager {
    fn drop(&mut self) {
        self.clear();
    }
}

fn has_trailing_slash(path: &str) -> bool {
    path.ends_with('/') || path.ends_with('\\')
}

/// Absolute forward-slash form of the base path. Relative inputs resolve
/// against the current directory.
fn absolutize(path: &str) -> Result<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(VfsError::InvalidPath("empty base path".to_string()));
    }
    let p = Path::new(trimmed);
    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()?.join(p)
    };
    let mut s = abs.to_string_lossy().replace('\\', "/");
    while s.len() > 1 && s.ends_with('/') {
        s.pop();
    }
    Ok(s)
}
