use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use sevenz_rust::SevenZReader;

use crate::entry::EntryInfo;
use crate::error::{Result, VfsError};

use super::{
    entries_from_members, normalize_member_path, ArchiveHandler, ArchiveMember, StructureCache,
    MAX_ENTRIES, MAX_SINGLE_FILE, MAX_TOTAL_SIZE,
};

const SEVENZ_MAGIC: &[u8] = &[b'7', b'z', 0xbc, 0xaf, 0x27, 0x1c];

/// 7z reader, from file or in-memory sources.
pub struct SevenZipHandler {
    structures: StructureCache,
}

impl Default for SevenZipHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SevenZipHandler {
    pub fn new() -> Self {
        Self {
            structures: StructureCache::new(),
        }
    }

    fn collect_members<R: Read + std::io::Seek>(
        reader: &mut SevenZReader<R>,
        source: &str,
    ) -> Result<Vec<ArchiveMember>> {
        let mut members = Vec::new();
        let mut total_size: u64 = 0;
        let mut overflow: Option<VfsError> = None;

        reader
            .for_each_entries(|entry, _rd| {
                if members.len() >= MAX_ENTRIES {
                    overflow = Some(VfsError::corrupt(source, "too many entries"));
                    return Ok(false);
                }
                let name = entry.name().replace('\\', "/");
                let Some(normalized) = normalize_member_path(&name) else {
                    return Ok(true);
                };
                let size = entry.size();
                if size > MAX_SINGLE_FILE {
                    overflow = Some(VfsError::corrupt(source, format!("entry too large: {name}")));
                    return Ok(false);
                }
                total_size = total_size.saturating_add(size);
                if total_size > MAX_TOTAL_SIZE {
                    overflow = Some(VfsError::corrupt(source, "archive exceeds size limit"));
                    return Ok(false);
                }
                members.push(ArchiveMember {
                    path: normalized.clone(),
                    raw_path: normalized,
                    is_dir: entry.is_directory(),
                    size,
                    modified: None,
                });
                Ok(true)
            })
            .map_err(|e| VfsError::corrupt(source, e))?;

        match overflow {
            Some(err) => Err(err),
            None => Ok(members),
        }
    }

    fn read_member<R: Read + std::io::Seek>(
        reader: &mut SevenZReader<R>,
        source: &str,
        internal_path: &str,
    ) -> Result<Vec<u8>> {
        let mut found: Option<Vec<u8>> = None;
        reader
            .for_each_entries(|entry, rd| {
                let name = entry.name().replace('\\', "/");
                let matches = normalize_member_path(&name)
                    .map(|normalized| normalized == internal_path)
                    .unwrap_or(false);
                if matches && !entry.is_directory() {
                    let mut data = Vec::new();
                    rd.read_to_end(&mut data)?;
                    found = Some(data);
                    return Ok(false);
                }
                Ok(true)
            })
            .map_err(|e| VfsError::corrupt(source, e))?;

        found.ok_or_else(|| VfsError::NotFound(internal_path.to_string()))
    }
}

impl ArchiveHandler for SevenZipHandler {
    fn name(&self) -> &'static str {
        "sevenzip"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &[".7z"]
    }

    fn matches_magic(&self, head: &[u8]) -> bool {
        head.starts_with(SEVENZ_MAGIC)
    }

    fn list_all_entries(&self, path: &str) -> Result<Vec<EntryInfo>> {
        if let Some(members) = self.structures.get(Path::new(path)) {
            return Ok(entries_from_members(self, &members));
        }
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VfsError::NotFound(path.to_string()),
            _ => VfsError::Io(e),
        })?;
        let len = file.metadata()?.len();
        let mut reader =
            SevenZReader::new(file, len, "".into()).map_err(|e| VfsError::corrupt(path, e))?;
        let members = Self::collect_members(&mut reader, path)?;
        let members = self.structures.store(Path::new(path), members);
        Ok(entries_from_members(self, &members))
    }

    fn list_all_entries_from_bytes(&self, data: &[u8]) -> Result<Vec<EntryInfo>> {
        let len = data.len() as u64;
        let mut reader = SevenZReader::new(Cursor::new(data), len, "".into())
            .map_err(|e| VfsError::corrupt("<bytes>", e))?;
        let members = Self::collect_members(&mut reader, "<bytes>")?;
        Ok(entries_from_members(self, &members))
    }

    fn read_archive_file(&self, archive_path: &str, internal_path: &str) -> Result<Vec<u8>> {
        let file = File::open(archive_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VfsError::NotFound(archive_path.to_string()),
            _ => VfsError::Io(e),
        })?;
        let len = file.metadata()?.len();
        let mut reader = SevenZReader::new(file, len, "".into())
            .map_err(|e| VfsError::corrupt(archive_path, e))?;
        Self::read_member(&mut reader, archive_path, internal_path)
    }

    fn read_file_from_bytes(&self, data: &[u8], internal_path: &str) -> Result<Vec<u8>> {
        let len = data.len() as u64;
        let mut reader = SevenZReader::new(Cursor::new(data), len, "".into())
            .map_err(|e| VfsError::corrupt("<bytes>", e))?;
        Self::read_member(&mut reader, "<bytes>", internal_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_7z_only() {
        let handler = SevenZipHandler::new();
        assert!(handler.can_handle("data.7z"));
        assert!(handler.can_handle("nested/deep/data.7Z"));
        assert!(!handler.can_handle("data.zip"));
        assert!(!handler.can_handle("disc.iso"));
    }

    #[test]
    fn only_real_7z_bytes_qualify() {
        let handler = SevenZipHandler::new();
        let mut magic = SEVENZ_MAGIC.to_vec();
        magic.extend_from_slice(&[0u8; 16]);
        assert!(handler.can_handle_bytes(&magic, "x.7z"));
        assert!(!handler.can_handle_bytes(b"not an archive", "x.7z"));
    }

    #[test]
    fn garbage_bytes_are_corrupt() {
        let handler = SevenZipHandler::new();
        let result = handler.list_all_entries_from_bytes(&[0u8; 64]);
        assert!(matches!(result, Err(VfsError::Corrupt { .. })));
    }
}
