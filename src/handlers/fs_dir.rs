use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::entry::{EntryInfo, EntryType};
use crate::error::{Result, VfsError};
use crate::paths;

use super::ArchiveHandler;

/// Fan the walk out across a pool once a directory is this wide.
const PARALLEL_WALK_THRESHOLD: usize = 20;
/// Hard ceiling on walker threads; I/O-bound walks stop scaling past this.
const MAX_WALK_WORKERS: usize = 8;

/// Reads the OS directory tree. Entries report their path relative to the
/// listed base, and `name_in_archive` is that same relative path, which is
/// what `read_archive_file` resolves against the base later.
#[derive(Default)]
pub struct FileSystemHandler {
    workers: Option<usize>,
}

impl FileSystemHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the walker pool size (mostly for tests and tuning).
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: Some(workers.max(1)),
        }
    }

    fn pool_size(&self) -> usize {
        self.workers
            .unwrap_or_else(|| num_cpus::get_physical().clamp(1, MAX_WALK_WORKERS))
    }

    fn entry_from_disk(&self, base: &Path, rel_path: &str) -> Option<EntryInfo> {
        let disk_path = base.join(rel_path);
        let symlink_meta = fs::symlink_metadata(&disk_path).ok()?;
        let is_symlink = symlink_meta.file_type().is_symlink();
        let meta = if is_symlink {
            fs::metadata(&disk_path).unwrap_or(symlink_meta)
        } else {
            symlink_meta
        };

        let entry_type = if is_symlink {
            EntryType::Symlink
        } else if meta.is_dir() {
            EntryType::Directory
        } else if meta.is_file() {
            EntryType::File
        } else {
            EntryType::Unknown
        };

        let modified: Option<DateTime<Utc>> = meta.modified().ok().map(DateTime::from);
        let created: Option<DateTime<Utc>> = meta.created().ok().map(DateTime::from);

        Some(self.create_entry_info(
            paths::basename(rel_path),
            rel_path,
            entry_type,
            rel_path,
            if meta.is_file() { meta.len() } else { 0 },
            modified,
            created,
        ))
    }

    /// Everything beneath one top-level subdirectory. Entries that fail to
    /// stat are skipped; the walk itself does not fail.
    fn walk_subtree(&self, base: &Path, top: &str) -> Vec<EntryInfo> {
        let mut found = Vec::new();
        let root = base.join(top);
        for item in WalkDir::new(&root).follow_links(false).min_depth(1) {
            let item = match item {
                Ok(value) => value,
                Err(err) => {
                    log::warn!("directory walk skipping entry under {top}: {err}");
                    continue;
                }
            };
            let rel = match item.path().strip_prefix(base) {
                Ok(stripped) => paths::normalize(&stripped.to_string_lossy()),
                Err(_) => continue,
            };
            if let Some(entry) = self.entry_from_disk(base, &rel) {
                found.push(entry);
            }
        }
        found
    }
}

impl ArchiveHandler for FileSystemHandler {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &[]
    }

    fn can_archive(&self) -> bool {
        false
    }

    fn can_handle(&self, path: &str) -> bool {
        let p = Path::new(path);
        p.is_dir() || p.is_file()
    }

    fn can_handle_bytes(&self, _data: &[u8], _hint_path: &str) -> bool {
        false
    }

    fn list_all_entries(&self, path: &str) -> Result<Vec<EntryInfo>> {
        let base = Path::new(path);
        if base.is_file() {
            // A plain file base has no children.
            return Ok(Vec::new());
        }
        if !base.is_dir() {
            return Err(VfsError::NotFound(path.to_string()));
        }

        let mut entries = Vec::new();
        let mut subdirs: Vec<String> = Vec::new();

        for item in fs::read_dir(base)? {
            let item = item?;
            let rel = paths::normalize(&item.file_name().to_string_lossy());
            if rel.is_empty() {
                continue;
            }
            let Some(entry) = self.entry_from_disk(base, &rel) else {
                continue;
            };
            if entry.entry_type == EntryType::Directory {
                subdirs.push(rel);
            }
            entries.push(entry);
        }

        // Workers return their own lists; nothing here touches shared
        // state until after the pool joins.
        if subdirs.len() >= PARALLEL_WALK_THRESHOLD {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.pool_size())
                .build();
            match pool {
                Ok(pool) => {
                    let nested: Vec<Vec<EntryInfo>> = pool.install(|| {
                        subdirs
                            .par_iter()
                            .map(|top| self.walk_subtree(base, top))
                            .collect()
                    });
                    for batch in nested {
                        entries.extend(batch);
                    }
                }
                Err(err) => {
                    log::warn!("walker pool unavailable, walking sequentially: {err}");
                    for top in &subdirs {
                        entries.extend(self.walk_subtree(base, top));
                    }
                }
            }
        } else {
            for top in &subdirs {
                entries.extend(self.walk_subtree(base, top));
            }
        }

        Ok(entries)
    }

    fn list_all_entries_from_bytes(&self, _data: &[u8]) -> Result<Vec<EntryInfo>> {
        Err(VfsError::Unsupported(
            "filesystem handler has no in-memory form".to_string(),
        ))
    }

    /// Direct children only; the default implementation dispatches by
    /// extension, which a directory does not have.
    fn list_entries(&self, path: &str) -> Result<Vec<EntryInfo>> {
        let base = Path::new(path);
        if !base.is_dir() {
            return Err(VfsError::NotFound(path.to_string()));
        }
        let mut entries = Vec::new();
        for item in fs::read_dir(base)? {
            let item = item?;
            let rel = paths::normalize(&item.file_name().to_string_lossy());
            if rel.is_empty() {
                continue;
            }
            if let Some(entry) = self.entry_from_disk(base, &rel) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn read_archive_file(&self, archive_path: &str, internal_path: &str) -> Result<Vec<u8>> {
        let full = Path::new(archive_path).join(internal_path);
        match fs::read(&full) {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(VfsError::NotFound(full.to_string_lossy().to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn read_file_from_bytes(&self, _data: &[u8], internal_path: &str) -> Result<Vec<u8>> {
        Err(VfsError::Unsupported(format!(
            "filesystem handler cannot read {internal_path} from bytes"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn seed(dir: &Path) {
        fs::create_dir_all(dir.join("sub/inner")).unwrap();
        let mut f = fs::File::create(dir.join("a.txt")).unwrap();
        f.write_all(b"abc").unwrap();
        fs::File::create(dir.join("sub/b.txt"))
            .unwrap()
            .write_all(b"x")
            .unwrap();
        fs::File::create(dir.join("sub/inner/c.bin")).unwrap();
    }

    #[test]
    fn walks_recursively_with_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        let handler = FileSystemHandler::new();
        let entries = handler
            .list_all_entries(&dir.path().to_string_lossy())
            .unwrap();
        let mut rels: Vec<&str> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        rels.sort();
        assert_eq!(
            rels,
            vec!["a.txt", "sub", "sub/b.txt", "sub/inner", "sub/inner/c.bin"]
        );

        let file = entries.iter().find(|e| e.rel_path == "a.txt").unwrap();
        assert_eq!(file.entry_type, EntryType::File);
        assert_eq!(file.size, 3);
        assert_eq!(file.name_in_archive, "a.txt");
    }

    #[test]
    fn reads_relative_to_base() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        let handler = FileSystemHandler::new();
        let data = handler
            .read_archive_file(&dir.path().to_string_lossy(), "sub/b.txt")
            .unwrap();
        assert_eq!(data, b"x");

        let missing = handler.read_archive_file(&dir.path().to_string_lossy(), "nope.txt");
        assert!(matches!(missing, Err(VfsError::NotFound(_))));
    }

    #[test]
    fn plain_file_base_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let handler = FileSystemHandler::new();
        let entries = handler
            .list_all_entries(&dir.path().join("a.txt").to_string_lossy())
            .unwrap();
        assert!(entries.is_empty());
    }
}
