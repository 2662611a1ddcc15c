use std::path::Path;

use unrar::Archive as RarArchive;

use crate::entry::EntryInfo;
use crate::error::{Result, VfsError};

use super::{
    entries_from_members, normalize_member_path, ArchiveHandler, ArchiveMember, StructureCache,
    MAX_ENTRIES, MAX_SINGLE_FILE, MAX_TOTAL_SIZE,
};

/// RAR reader backed by the embedded unrar library. The library wants a
/// real file to seek in, so `can_handle_bytes` is false and nested RARs
/// reach this handler through the manager's temp-file route.
pub struct RarHandler {
    structures: StructureCache,
}

impl Default for RarHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl RarHandler {
    pub fn new() -> Self {
        Self {
            structures: StructureCache::new(),
        }
    }

    fn parse_members(path: &str) -> Result<Vec<ArchiveMember>> {
        let archive = RarArchive::new(path)
            .open_for_listing()
            .map_err(|e| VfsError::corrupt(path, e))?;

        let mut members = Vec::new();
        let mut total_size: u64 = 0;

        for header in archive {
            let header = header.map_err(|e| VfsError::corrupt(path, e))?;
            if members.len() >= MAX_ENTRIES {
                return Err(VfsError::corrupt(path, "too many entries"));
            }

            let raw_name = header.filename.to_string_lossy().to_string();
            let Some(normalized) = normalize_member_path(&raw_name) else {
                continue;
            };

            let size = header.unpacked_size;
            if size > MAX_SINGLE_FILE {
                return Err(VfsError::corrupt(path, format!("entry too large: {raw_name}")));
            }
            total_size = total_size.saturating_add(size);
            if total_size > MAX_TOTAL_SIZE {
                return Err(VfsError::corrupt(path, "archive exceeds size limit"));
            }

            members.push(ArchiveMember {
                path: normalized.clone(),
                raw_path: normalized,
                is_dir: header.is_directory(),
                size,
                // The listing headers carry no usable timestamp.
                modified: None,
            });
        }
        Ok(members)
    }
}

impl ArchiveHandler for RarHandler {
    fn name(&self) -> &'static str {
        "rar"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &[".rar"]
    }

    fn matches_magic(&self, head: &[u8]) -> bool {
        head.starts_with(b"Rar!\x1a\x07")
    }

    fn can_handle_bytes(&self, _data: &[u8], _hint_path: &str) -> bool {
        // unrar needs random access to a file on disk.
        false
    }

    fn list_all_entries(&self, path: &str) -> Result<Vec<EntryInfo>> {
        if let Some(members) = self.structures.get(Path::new(path)) {
            return Ok(entries_from_members(self, &members));
        }
        if !Path::new(path).is_file() {
            return Err(VfsError::NotFound(path.to_string()));
        }
        let members = Self::parse_members(path)?;
        let members = self.structures.store(Path::new(path), members);
        Ok(entries_from_members(self, &members))
    }

    fn list_all_entries_from_bytes(&self, _data: &[u8]) -> Result<Vec<EntryInfo>> {
        Err(VfsError::Unsupported(
            "rar handler requires file access".to_string(),
        ))
    }

    fn read_archive_file(&self, archive_path: &str, internal_path: &str) -> Result<Vec<u8>> {
        if !Path::new(archive_path).is_file() {
            return Err(VfsError::NotFound(archive_path.to_string()));
        }
        let mut archive = RarArchive::new(archive_path)
            .open_for_processing()
            .map_err(|e| VfsError::corrupt(archive_path, e))?;

        loop {
            match archive.read_header() {
                Ok(Some(header)) => {
                    let entry_name = header.entry().filename.to_string_lossy().to_string();
                    let matches = normalize_member_path(&entry_name)
                        .map(|normalized| normalized == internal_path)
                        .unwrap_or(false);
                    if matches {
                        if header.entry().is_directory() {
                            return Err(VfsError::InvalidPath(format!(
                                "{internal_path} is a directory"
                            )));
                        }
                        if header.entry().unpacked_size > MAX_SINGLE_FILE {
                            return Err(VfsError::corrupt(archive_path, "entry too large"));
                        }
                        let (data, _rest) = header
                            .read()
                            .map_err(|e| VfsError::corrupt(archive_path, e))?;
                        return Ok(data);
                    }
                    archive = header
                        .skip()
                        .map_err(|e| VfsError::corrupt(archive_path, e))?;
                }
                Ok(None) => break,
                Err(err) => return Err(VfsError::corrupt(archive_path, err)),
            }
        }
        Err(VfsError::NotFound(internal_path.to_string()))
    }

    fn read_file_from_bytes(&self, _data: &[u8], internal_path: &str) -> Result<Vec<u8>> {
        Err(VfsError::Unsupported(format!(
            "rar handler cannot read {internal_path} from bytes"
        )))
    }
}
