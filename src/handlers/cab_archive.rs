use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use cab::Cabinet;

use crate::entry::EntryInfo;
use crate::error::{Result, VfsError};

use super::{
    entries_from_members, normalize_member_path, ArchiveHandler, ArchiveMember, StructureCache,
    MAX_ENTRIES, MAX_SINGLE_FILE, MAX_TOTAL_SIZE,
};

fn map_cab_error(source: &str, err: std::io::Error) -> VfsError {
    match err.kind() {
        std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => {
            VfsError::corrupt(source, err)
        }
        _ => VfsError::Io(err),
    }
}

/// Microsoft Cabinet reader. Member names are stored Windows-style with
/// backslashes; the stored form stays in `name_in_archive` and the
/// slash-normalized form is the display path.
pub struct CabHandler {
    structures: StructureCache,
}

impl Default for CabHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl CabHandler {
    pub fn new() -> Self {
        Self {
            structures: StructureCache::new(),
        }
    }

    fn parse_members<R: Read + Seek>(
        cabinet: &Cabinet<R>,
        source: &str,
    ) -> Result<Vec<ArchiveMember>> {
        let mut members = Vec::new();
        let mut total_size: u64 = 0;

        for folder in cabinet.folder_entries() {
            for file in folder.file_entries() {
                if members.len() >= MAX_ENTRIES {
                    return Err(VfsError::corrupt(source, "too many entries"));
                }
                let raw_name = file.name().to_string();
                let Some(normalized) = normalize_member_path(&raw_name) else {
                    continue;
                };

                let size = u64::from(file.uncompressed_size());
                if size > MAX_SINGLE_FILE {
                    return Err(VfsError::corrupt(source, format!("entry too large: {raw_name}")));
                }
                total_size = total_size.saturating_add(size);
                if total_size > MAX_TOTAL_SIZE {
                    return Err(VfsError::corrupt(source, "archive exceeds size limit"));
                }

                members.push(ArchiveMember {
                    path: normalized,
                    raw_path: raw_name,
                    is_dir: false,
                    size,
                    modified: None,
                });
            }
        }
        Ok(members)
    }

    fn read_member<R: Read + Seek>(
        cabinet: &mut Cabinet<R>,
        source: &str,
        internal_path: &str,
    ) -> Result<Vec<u8>> {
        // Resolve the stored name first; read_file wants it verbatim.
        let stored = {
            let mut found: Option<String> = None;
            for folder in cabinet.folder_entries() {
                for file in folder.file_entries() {
                    let raw_name = file.name();
                    if raw_name == internal_path {
                        found = Some(raw_name.to_string());
                        break;
                    }
                    if normalize_member_path(raw_name).as_deref() == Some(internal_path) {
                        found = Some(raw_name.to_string());
                        break;
                    }
                }
                if found.is_some() {
                    break;
                }
            }
            found.ok_or_else(|| VfsError::NotFound(internal_path.to_string()))?
        };

        let mut reader = cabinet
            .read_file(&stored)
            .map_err(|e| map_cab_error(source, e))?;
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| map_cab_error(source, e))?;
        Ok(data)
    }
}

impl ArchiveHandler for CabHandler {
    fn name(&self) -> &'static str {
        "cab"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &[".cab"]
    }

    fn matches_magic(&self, head: &[u8]) -> bool {
        head.starts_with(b"MSCF")
    }

    fn list_all_entries(&self, path: &str) -> Result<Vec<EntryInfo>> {
        if let Some(members) = self.structures.get(Path::new(path)) {
            return Ok(entries_from_members(self, &members));
        }
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VfsError::NotFound(path.to_string()),
            _ => VfsError::Io(e),
        })?;
        let cabinet = Cabinet::new(file).map_err(|e| map_cab_error(path, e))?;
        let members = Self::parse_members(&cabinet, path)?;
        let members = self.structures.store(Path::new(path), members);
        Ok(entries_from_members(self, &members))
    }

    fn list_all_entries_from_bytes(&self, data: &[u8]) -> Result<Vec<EntryInfo>> {
        let cabinet =
            Cabinet::new(Cursor::new(data)).map_err(|e| map_cab_error("<bytes>", e))?;
        let members = Self::parse_members(&cabinet, "<bytes>")?;
        Ok(entries_from_members(self, &members))
    }

    fn read_archive_file(&self, archive_path: &str, internal_path: &str) -> Result<Vec<u8>> {
        let file = File::open(archive_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VfsError::NotFound(archive_path.to_string()),
            _ => VfsError::Io(e),
        })?;
        let mut cabinet = Cabinet::new(file).map_err(|e| map_cab_error(archive_path, e))?;
        Self::read_member(&mut cabinet, archive_path, internal_path)
    }

    fn read_file_from_bytes(&self, data: &[u8], internal_path: &str) -> Result<Vec<u8>> {
        let mut cabinet =
            Cabinet::new(Cursor::new(data)).map_err(|e| map_cab_error("<bytes>", e))?;
        Self::read_member(&mut cabinet, "<bytes>", internal_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_cab(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = cab::CabinetBuilder::new();
        let folder = builder.add_folder(cab::CompressionType::MsZip);
        for (name, _) in entries {
            folder.add_file(name.to_string());
        }
        let mut writer = builder.build(Cursor::new(Vec::new())).unwrap();
        let mut index = 0;
        while let Some(mut file_writer) = writer.next_file().unwrap() {
            file_writer.write_all(entries[index].1).unwrap();
            index += 1;
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn lists_and_reads_members() {
        let data = build_cab(&[("docs\\readme.txt", b"cab text"), ("data.bin", &[1, 2, 3])]);
        let handler = CabHandler::new();

        let entries = handler.list_all_entries_from_bytes(&data).unwrap();
        let rels: Vec<&str> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["data.bin", "docs", "docs/readme.txt"]);

        // The stored backslash form survives in name_in_archive.
        let readme = entries
            .iter()
            .find(|e| e.rel_path == "docs/readme.txt")
            .unwrap();
        assert_eq!(readme.name_in_archive, "docs\\readme.txt");

        let payload = handler
            .read_file_from_bytes(&data, "docs\\readme.txt")
            .unwrap();
        assert_eq!(payload, b"cab text");
        // The normalized form resolves too.
        let payload = handler.read_file_from_bytes(&data, "docs/readme.txt").unwrap();
        assert_eq!(payload, b"cab text");

        let missing = handler.read_file_from_bytes(&data, "absent.txt");
        assert!(matches!(missing, Err(VfsError::NotFound(_))));
    }

    #[test]
    fn magic_and_extension_recognition() {
        let handler = CabHandler::new();
        let data = build_cab(&[("a.txt", b"x")]);
        assert!(handler.can_handle_bytes(&data, "setup.cab"));
        assert!(!handler.can_handle_bytes(b"PK\x03\x04", "setup.cab"));
        assert!(handler.can_handle("nested/deep/setup.CAB"));
        assert!(!handler.can_handle("nested/deep/setup.zip"));
    }

    #[test]
    fn garbage_bytes_fail_parse() {
        let handler = CabHandler::new();
        assert!(handler.list_all_entries_from_bytes(&[0u8; 64]).is_err());
    }
}
