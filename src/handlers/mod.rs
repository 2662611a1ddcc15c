use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use uuid::Uuid;

use crate::entry::{is_hidden_name, EntryInfo, EntryStatus, EntryType};
use crate::error::{Result, VfsError};
use crate::paths;

mod cab_archive;
mod fs_dir;
mod lzh;
mod rar;
mod sevenz;
mod tar_stream;
mod zip_archive;

pub use cab_archive::CabHandler;
pub use fs_dir::FileSystemHandler;
pub use lzh::LzhHandler;
pub use rar::RarHandler;
pub use sevenz::SevenZipHandler;
pub use tar_stream::TarHandler;
pub use zip_archive::ZipHandler;

pub(crate) const MAX_ENTRIES: usize = 100_000;
pub(crate) const MAX_TOTAL_SIZE: u64 = 2 * 1024 * 1024 * 1024;
pub(crate) const MAX_SINGLE_FILE: u64 = 500 * 1024 * 1024;
/// Maximum number of archives each reader keeps parsed structures for
const STRUCTURE_CACHE_MAX: usize = 50;

const TEMP_DIR_NAME: &str = "reef";

/// Uniform contract every format reader implements. The manager talks to
/// containers only through this trait; trait objects live in the registry.
pub trait ArchiveHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lowercase, dot-prefixed extensions this reader accepts.
    fn supported_extensions(&self) -> &'static [&'static str];

    /// Whether this handler reads container files (as opposed to plain
    /// directories). The filesystem handler is the one `false`.
    fn can_archive(&self) -> bool {
        true
    }

    /// Cheap signature check on the first bytes of a candidate source.
    fn matches_magic(&self, _head: &[u8]) -> bool {
        false
    }

    /// Tolerant recognition: extension match, or a magic sniff when the
    /// path names a readable file. Paths that do not exist on disk (nested
    /// archive members) are judged by extension alone.
    fn can_handle(&self, path: &str) -> bool {
        if let Some(ext) = paths::extension_of(path) {
            if self.supported_extensions().contains(&ext.as_str()) {
                return true;
            }
        }
        if let Ok(head) = read_head(Path::new(path)) {
            return self.matches_magic(&head);
        }
        false
    }

    /// Same recognition for an in-memory blob. Readers that need random
    /// file access (RAR) return false so the manager caches to disk.
    fn can_handle_bytes(&self, data: &[u8], _hint_path: &str) -> bool {
        self.matches_magic(data)
    }

    /// Every entry at or beneath `path`, recursively. The primary
    /// enumeration the manager builds its cache from.
    fn list_all_entries(&self, path: &str) -> Result<Vec<EntryInfo>>;

    fn list_all_entries_from_bytes(&self, data: &[u8]) -> Result<Vec<EntryInfo>>;

    /// Direct children of a path that may reach inside the container
    /// (`"a.zip/inner/dir"`). Serves ad-hoc queries; the manager's cache
    /// does not go through here.
    fn list_entries(&self, path: &str) -> Result<Vec<EntryInfo>> {
        let exts = self.supported_extensions();
        let (archive, internal) =
            paths::split_archive_path(path, |prefix| match paths::extension_of(prefix) {
                Some(ext) => exts.contains(&ext.as_str()),
                None => false,
            });
        if archive.is_empty() {
            return Err(VfsError::Unsupported(path.to_string()));
        }
        let all = self.list_all_entries(&archive)?;
        Ok(direct_children(&all, &internal))
    }

    /// One member's full octets.
    fn read_archive_file(&self, archive_path: &str, internal_path: &str) -> Result<Vec<u8>>;

    fn read_file_from_bytes(&self, data: &[u8], internal_path: &str) -> Result<Vec<u8>>;

    /// Spill an in-memory archive to the platform temp directory so a
    /// random-access reader can work on it. The caller owns deletion.
    fn save_to_temp_file(&self, data: &[u8], extension: &str) -> Result<PathBuf> {
        let dir = std::env::temp_dir().join(TEMP_DIR_NAME);
        fs::create_dir_all(&dir)?;

        let mut hasher = Sha256::new();
        hasher.update(&data[..data.len().min(64 * 1024)]);
        let digest = format!("{:x}", hasher.finalize());
        let millis = Utc::now().timestamp_millis();
        let rand = Uuid::new_v4().simple().to_string();

        let ext = extension.trim_start_matches('.');
        let file_name = if ext.is_empty() {
            format!("arc_{}_{}_{}.bin", &digest[..12], millis, &rand[..8])
        } else {
            format!("arc_{}_{}_{}.{}", &digest[..12], millis, &rand[..8], ext)
        };
        let path = dir.join(file_name);
        fs::write(&path, data)?;
        Ok(path)
    }

    /// The sole sanctioned `EntryInfo` constructor. Downstream code never
    /// builds an entry any other way, so normalization happens exactly
    /// once, here.
    #[allow(clippy::too_many_arguments)]
    fn create_entry_info(
        &self,
        name: &str,
        rel_path: &str,
        entry_type: EntryType,
        name_in_archive: &str,
        size: u64,
        modified: Option<DateTime<Utc>>,
        created: Option<DateTime<Utc>>,
    ) -> EntryInfo {
        EntryInfo {
            name: name.to_string(),
            rel_path: paths::normalize(rel_path),
            name_in_archive: name_in_archive.to_string(),
            entry_type,
            status: EntryStatus::Ready,
            size,
            modified,
            created,
            is_hidden: is_hidden_name(name),
            cache: None,
        }
    }
}

pub(crate) fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    read_head_n(path, 16)
}

pub(crate) fn read_head_n(path: &Path, limit: usize) -> std::io::Result<Vec<u8>> {
    use std::io::Read;
    let file = fs::File::open(path)?;
    let mut head = Vec::with_capacity(limit);
    file.take(limit as u64).read_to_end(&mut head)?;
    Ok(head)
}

/// One parsed archive member, before conversion to `EntryInfo`.
#[derive(Debug, Clone)]
pub(crate) struct ArchiveMember {
    /// Normalized display path within the archive.
    pub path: String,
    /// The name exactly as the reader needs it to re-read this member.
    pub raw_path: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Normalize a member path read out of an archive header. Entries that
/// are absolute, carry a drive letter, traverse upward, or contain NUL
/// are rejected (the caller skips them).
pub(crate) fn normalize_member_path(raw: &str) -> Option<String> {
    if raw.contains('\0') {
        return None;
    }
    let value = raw.trim().replace('\\', "/");
    if value.len() >= 2 {
        let bytes = value.as_bytes();
        if bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
            return None;
        }
    }
    let parts: Vec<&str> = value
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    if parts.iter().any(|part| *part == "..") {
        return None;
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Turn a member listing into the full entry set: one entry per member
/// plus a synthesized DIRECTORY entry for every ancestor, whether or not
/// the archive recorded explicit directory members.
pub(crate) fn entries_from_members(
    handler: &dyn ArchiveHandler,
    members: &[ArchiveMember],
) -> Vec<EntryInfo> {
    let mut map: BTreeMap<String, EntryInfo> = BTreeMap::new();

    for member in members {
        // Ancestors first, so explicit records can overwrite synthesized ones.
        let mut boundary = 0usize;
        while let Some(off) = member.path[boundary..].find('/') {
            let end = boundary + off;
            let dir_path = &member.path[..end];
            map.entry(dir_path.to_string()).or_insert_with(|| {
                handler.create_entry_info(
                    paths::basename(dir_path),
                    dir_path,
                    EntryType::Directory,
                    dir_path,
                    0,
                    None,
                    None,
                )
            });
            boundary = end + 1;
        }

        let entry_type = if member.is_dir {
            EntryType::Directory
        } else {
            EntryType::File
        };
        let entry = handler.create_entry_info(
            paths::basename(&member.path),
            &member.path,
            entry_type,
            &member.raw_path,
            if member.is_dir { 0 } else { member.size },
            member.modified,
            None,
        );
        map.insert(member.path.clone(), entry);
    }

    map.into_values().collect()
}

/// Filter an enumeration down to the direct children of `internal` (an
/// empty string addresses the archive root).
pub(crate) fn direct_children(entries: &[EntryInfo], internal: &str) -> Vec<EntryInfo> {
    let internal = paths::normalize(internal);
    entries
        .iter()
        .filter(|e| {
            if internal.is_empty() {
                !e.rel_path.is_empty() && !e.rel_path.contains('/')
            } else {
                match e.rel_path.strip_prefix(&format!("{internal}/")) {
                    Some(rest) => !rest.is_empty() && !rest.contains('/'),
                    None => false,
                }
            }
        })
        .cloned()
        .collect()
}

/// Parsed-structure cache shared by the archive readers: each archive
/// file is walked once, revalidated by mtime on later lookups.
pub(crate) struct StructureCache {
    inner: Mutex<HashMap<PathBuf, (SystemTime, Arc<Vec<ArchiveMember>>)>>,
}

impl StructureCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, path: &Path) -> Option<Arc<Vec<ArchiveMember>>> {
        let mtime = fs::metadata(path).ok()?.modified().ok()?;
        let cache = self.inner.lock().ok()?;
        let (cached_mtime, members) = cache.get(path)?;
        if *cached_mtime == mtime {
            Some(Arc::clone(members))
        } else {
            None
        }
    }

    pub fn store(&self, path: &Path, members: Vec<ArchiveMember>) -> Arc<Vec<ArchiveMember>> {
        let members = Arc::new(members);
        let mtime = fs::metadata(path).and_then(|m| m.modified()).ok();
        if let (Some(mtime), Ok(mut cache)) = (mtime, self.inner.lock()) {
            if cache.len() >= STRUCTURE_CACHE_MAX && !cache.contains_key(path) {
                if let Some(key) = cache.keys().next().cloned() {
                    cache.remove(&key);
                }
            }
            cache.insert(path.to_path_buf(), (mtime, Arc::clone(&members)));
        }
        members
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyHandler;

    impl ArchiveHandler for DummyHandler {
        fn name(&self) -> &'static str {
            "dummy"
        }
        fn supported_extensions(&self) -> &'static [&'static str] {
            &[".dmy"]
        }
        fn list_all_entries(&self, _path: &str) -> Result<Vec<EntryInfo>> {
            Ok(Vec::new())
        }
        fn list_all_entries_from_bytes(&self, _data: &[u8]) -> Result<Vec<EntryInfo>> {
            Ok(Vec::new())
        }
        fn read_archive_file(&self, _archive: &str, internal: &str) -> Result<Vec<u8>> {
            Err(VfsError::NotFound(internal.to_string()))
        }
        fn read_file_from_bytes(&self, _data: &[u8], internal: &str) -> Result<Vec<u8>> {
            Err(VfsError::NotFound(internal.to_string()))
        }
    }

    fn member(path: &str, is_dir: bool, size: u64) -> ArchiveMember {
        ArchiveMember {
            path: path.to_string(),
            raw_path: path.to_string(),
            is_dir,
            size,
            modified: None,
        }
    }

    #[test]
    fn rejects_hostile_member_paths() {
        assert_eq!(normalize_member_path("../../etc/passwd"), None);
        assert_eq!(normalize_member_path("/abs/path"), Some("abs/path".into()));
        assert_eq!(normalize_member_path("C:\\evil"), None);
        assert_eq!(normalize_member_path("a\0b"), None);
        assert_eq!(normalize_member_path("./ok/./file"), Some("ok/file".into()));
    }

    #[test]
    fn synthesizes_parent_directories() {
        let handler = DummyHandler;
        let members = vec![member("deep/nest/file.txt", false, 4)];
        let entries = entries_from_members(&handler, &members);
        let rels: Vec<&str> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["deep", "deep/nest", "deep/nest/file.txt"]);
        assert_eq!(entries[0].entry_type, EntryType::Directory);
        assert_eq!(entries[2].entry_type, EntryType::File);
    }

    #[test]
    fn direct_children_scopes_by_prefix() {
        let handler = DummyHandler;
        let members = vec![
            member("m/one.txt", false, 5),
            member("m/sub/two.txt", false, 1),
            member("top.txt", false, 2),
        ];
        let entries = entries_from_members(&handler, &members);

        let root: Vec<String> = direct_children(&entries, "")
            .into_iter()
            .map(|e| e.rel_path)
            .collect();
        assert_eq!(root, vec!["m".to_string(), "top.txt".to_string()]);

        let m: Vec<String> = direct_children(&entries, "m")
            .into_iter()
            .map(|e| e.rel_path)
            .collect();
        assert_eq!(m, vec!["m/one.txt".to_string(), "m/sub".to_string()]);
    }

    #[test]
    fn temp_file_round_trip() {
        let handler = DummyHandler;
        let path = handler.save_to_temp_file(b"payload", ".zip").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"payload");
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("zip"));
        let _ = fs::remove_file(path);
    }
}
