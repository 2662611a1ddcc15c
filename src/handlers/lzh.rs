use std::io::{Cursor, Read};
use std::path::Path;

use delharc::LhaDecodeReader;

use crate::entry::EntryInfo;
use crate::error::{Result, VfsError};

use super::{
    entries_from_members, normalize_member_path, ArchiveHandler, ArchiveMember, StructureCache,
    MAX_ENTRIES, MAX_SINGLE_FILE, MAX_TOTAL_SIZE,
};

fn map_lha_error(source: &str, err: std::io::Error) -> VfsError {
    match err.kind() {
        std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => {
            VfsError::corrupt(source, err)
        }
        _ => VfsError::Io(err),
    }
}

/// LZH/LHA reader on top of delharc. Decoding is sequential, so both
/// file and in-memory sources work.
pub struct LzhHandler {
    structures: StructureCache,
}

impl Default for LzhHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl LzhHandler {
    pub fn new() -> Self {
        Self {
            structures: StructureCache::new(),
        }
    }

    fn parse_members<R: Read>(
        mut reader: LhaDecodeReader<R>,
        source: &str,
    ) -> Result<Vec<ArchiveMember>> {
        let mut members = Vec::new();
        let mut total_size: u64 = 0;

        loop {
            let header = reader.header();
            let raw_name = header.parse_pathname().to_string_lossy().to_string();
            let is_dir = header.is_directory();
            let size = header.original_size;

            if let Some(normalized) = normalize_member_path(&raw_name) {
                if members.len() >= MAX_ENTRIES {
                    return Err(VfsError::corrupt(source, "too many entries"));
                }
                if size > MAX_SINGLE_FILE {
                    return Err(VfsError::corrupt(source, format!("entry too large: {raw_name}")));
                }
                total_size = total_size.saturating_add(size);
                if total_size > MAX_TOTAL_SIZE {
                    return Err(VfsError::corrupt(source, "archive exceeds size limit"));
                }
                members.push(ArchiveMember {
                    path: normalized.clone(),
                    raw_path: normalized,
                    is_dir,
                    size,
                    modified: None,
                });
            }

            match reader.next_file() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(err) => return Err(map_lha_error(source, err.into())),
            }
        }
        Ok(members)
    }

    fn read_member<R: Read>(
        mut reader: LhaDecodeReader<R>,
        source: &str,
        internal_path: &str,
    ) -> Result<Vec<u8>> {
        loop {
            let matches = {
                let header = reader.header();
                let raw_name = header.parse_pathname().to_string_lossy().to_string();
                !header.is_directory()
                    && normalize_member_path(&raw_name)
                        .map(|normalized| normalized == internal_path)
                        .unwrap_or(false)
            };

            if matches {
                if !reader.is_decoder_supported() {
                    return Err(VfsError::corrupt(source, "unsupported compression method"));
                }
                let mut data = Vec::new();
                reader
                    .read_to_end(&mut data)
                    .map_err(|e| map_lha_error(source, e))?;
                return Ok(data);
            }

            match reader.next_file() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(err) => return Err(map_lha_error(source, err.into())),
            }
        }
        Err(VfsError::NotFound(internal_path.to_string()))
    }
}

impl ArchiveHandler for LzhHandler {
    fn name(&self) -> &'static str {
        "lzh"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &[".lzh", ".lha"]
    }

    fn matches_magic(&self, head: &[u8]) -> bool {
        // Method id "-l??-" sits at offset 2 of the first header.
        head.len() >= 7 && head[2] == b'-' && head[3] == b'l' && head[6] == b'-'
    }

    fn list_all_entries(&self, path: &str) -> Result<Vec<EntryInfo>> {
        if let Some(members) = self.structures.get(Path::new(path)) {
            return Ok(entries_from_members(self, &members));
        }
        let reader = delharc::parse_file(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VfsError::NotFound(path.to_string()),
            _ => map_lha_error(path, e),
        })?;
        let members = Self::parse_members(reader, path)?;
        let members = self.structures.store(Path::new(path), members);
        Ok(entries_from_members(self, &members))
    }

    fn list_all_entries_from_bytes(&self, data: &[u8]) -> Result<Vec<EntryInfo>> {
        let reader = LhaDecodeReader::new(Cursor::new(data.to_vec()))
            .map_err(|e| VfsError::corrupt("<bytes>", e))?;
        let members = Self::parse_members(reader, "<bytes>")?;
        Ok(entries_from_members(self, &members))
    }

    fn read_archive_file(&self, archive_path: &str, internal_path: &str) -> Result<Vec<u8>> {
        let reader = delharc::parse_file(archive_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VfsError::NotFound(archive_path.to_string()),
            _ => map_lha_error(archive_path, e),
        })?;
        Self::read_member(reader, archive_path, internal_path)
    }

    fn read_file_from_bytes(&self, data: &[u8], internal_path: &str) -> Result<Vec<u8>> {
        let reader = LhaDecodeReader::new(Cursor::new(data.to_vec()))
            .map_err(|e| VfsError::corrupt("<bytes>", e))?;
        Self::read_member(reader, "<bytes>", internal_path)
    }
}
