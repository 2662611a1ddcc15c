use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::cache::EntryCache;
use crate::entry::{ArchiveCache, EntryStatus, EntryType};
use crate::error::{Result, VfsError};
use crate::manager::BasePath;
use crate::paths;
use crate::registry::HandlerRegistry;
use crate::resolver::PathResolver;

/// Materializes one nested archive: fetch its bytes, decide between
/// in-memory and temp-file caching, enumerate, and register children
/// under the archive's own cache key.
pub(crate) struct ArchiveProcessor<'a> {
    pub registry: &'a HandlerRegistry,
    pub cache: &'a mut EntryCache,
    pub temp_files: &'a mut HashSet<PathBuf>,
    pub base: &'a BasePath,
    pub max_nesting: usize,
}

impl<'a> ArchiveProcessor<'a> {
    /// Process the ARCHIVE entry at `rel`, registering every child it
    /// contains. Returns the keys of newly registered children that are
    /// themselves archives, for the caller's BFS queue.
    ///
    /// Any error leaves the entry's children unregistered; the caller
    /// marks the entry BROKEN and keeps going.
    pub fn process(&mut self, rel: &str, depth: usize) -> Result<Vec<String>> {
        if depth > self.max_nesting {
            return Err(VfsError::DepthExceeded(rel.to_string()));
        }

        let (entry_name, name_in_archive) = match self.cache.get(rel) {
            Some(entry) => (entry.name.clone(), entry.name_in_archive.clone()),
            None => return Err(VfsError::NotFound(rel.to_string())),
        };
        self.cache.set_status(rel, EntryStatus::Scanning);

        let handler = self
            .registry
            .get_handler(rel)
            .ok_or_else(|| VfsError::Unsupported(rel.to_string()))?;

        // A real file on disk is read in place; anything else is nested
        // and must be materialized out of its parent archive.
        let disk = self.base.disk_path(rel);
        let children = if self.base.is_dir && Path::new(&disk).is_file() {
            log::debug!("processing archive on disk: {disk}");
            handler.list_all_entries(&disk)?
        } else {
            let resolver = PathResolver::new(self.registry, self.base.is_archive(self.registry));
            let (parent_rel, _) = resolver
                .analyze(self.cache, rel)
                .ok_or_else(|| VfsError::NotFound(format!("no parent archive for {rel}")))?;
            log::debug!("materializing nested archive {rel} from \"{parent_rel}\"");
            let bytes =
                read_member_bytes(self.registry, self.cache, self.base, &parent_rel, &name_in_archive)?;

            if handler.can_handle_bytes(&bytes, &entry_name) {
                let children = handler.list_all_entries_from_bytes(&bytes)?;
                if let Some(entry) = self.cache.get_mut(rel) {
                    entry.cache = Some(ArchiveCache::Bytes(bytes));
                }
                children
            } else {
                let ext = paths::extension_of(&entry_name).unwrap_or_else(|| ".bin".to_string());
                let temp = handler.save_to_temp_file(&bytes, &ext)?;
                self.temp_files.insert(temp.clone());
                if let Some(entry) = self.cache.get_mut(rel) {
                    entry.cache = Some(ArchiveCache::TempFile(temp.clone()));
                }
                handler.list_all_entries(&temp.to_string_lossy())?
            }
        };

        // Rebase under the archive's own key and register. Children keep
        // their name_in_archive untouched; it stays addressed to this
        // archive's reader.
        let mut nested_archives = Vec::new();
        for child in children {
            let child_rel = paths::join(rel, &child.rel_path);
            let entry_type = if child.entry_type == EntryType::File
                && self.registry.is_archive_name(&child.name)
            {
                EntryType::Archive
            } else {
                child.entry_type
            };
            let rebased = handler.create_entry_info(
                &child.name,
                &child_rel,
                entry_type,
                &child.name_in_archive,
                child.size,
                child.modified,
                child.created,
            );
            if entry_type == EntryType::Archive {
                nested_archives.push(child_rel.clone());
            }
            self.cache.insert(rebased);
        }

        self.cache.set_status(rel, EntryStatus::Ready);
        log::debug!("archive {rel}: registered children, {} nested", nested_archives.len());
        Ok(nested_archives)
    }
}

/// Fetch one member's octets out of the archive at `parent_rel` (the
/// empty string addresses the base archive itself). Prefers the parent's
/// materialized cache slot; parents with no slot are real files on disk.
pub(crate) fn read_member_bytes(
    registry: &HandlerRegistry,
    cache: &EntryCache,
    base: &BasePath,
    parent_rel: &str,
    internal_path: &str,
) -> Result<Vec<u8>> {
    let probe = if parent_rel.is_empty() {
        base.path.as_str()
    } else {
        parent_rel
    };
    let handler = registry
        .get_handler(probe)
        .ok_or_else(|| VfsError::Unsupported(probe.to_string()))?;

    if let Some(parent_entry) = cache.get(parent_rel) {
        match &parent_entry.cache {
            Some(ArchiveCache::Bytes(bytes)) => {
                return handler.read_file_from_bytes(bytes, internal_path);
            }
            Some(ArchiveCache::TempFile(path)) => {
                return handler.read_archive_file(&path.to_string_lossy(), internal_path);
            }
            None => {}
        }
    }

    let disk = base.disk_path(parent_rel);
    handler.read_archive_file(&disk, internal_path)
}
