use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use tar::Archive as TarArchive;
use xz2::read::XzDecoder;
use zstd::stream::read::Decoder as ZstdDecoder;

use crate::entry::EntryInfo;
use crate::error::{Result, VfsError};
use crate::paths;

use super::{
    entries_from_members, normalize_member_path, ArchiveHandler, ArchiveMember, StructureCache,
    MAX_ENTRIES, MAX_SINGLE_FILE, MAX_TOTAL_SIZE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamFormat {
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    TarZst,
    /// Bare compressed single file, one synthesized member.
    Gz,
    Bz2,
    Xz,
    Zst,
}

impl StreamFormat {
    fn is_tar(self) -> bool {
        matches!(
            self,
            StreamFormat::Tar
                | StreamFormat::TarGz
                | StreamFormat::TarBz2
                | StreamFormat::TarXz
                | StreamFormat::TarZst
        )
    }
}

fn infer_format_from_name(name: &str) -> Option<StreamFormat> {
    let lower = name.to_ascii_lowercase();
    // Compound extensions first so nested suffixes resolve correctly.
    if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        Some(StreamFormat::TarGz)
    } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") || lower.ends_with(".tbz") {
        Some(StreamFormat::TarBz2)
    } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
        Some(StreamFormat::TarXz)
    } else if lower.ends_with(".tar.zst") || lower.ends_with(".tzst") {
        Some(StreamFormat::TarZst)
    } else if lower.ends_with(".tar") {
        Some(StreamFormat::Tar)
    } else if lower.ends_with(".gz") {
        Some(StreamFormat::Gz)
    } else if lower.ends_with(".bz2") {
        Some(StreamFormat::Bz2)
    } else if lower.ends_with(".xz") {
        Some(StreamFormat::Xz)
    } else if lower.ends_with(".zst") {
        Some(StreamFormat::Zst)
    } else {
        None
    }
}

fn looks_like_tar(head: &[u8]) -> bool {
    head.len() >= 262 && &head[257..262] == b"ustar"
}

/// Identify a stream by magic alone; compressed payloads are opened far
/// enough to tell a wrapped tar from a bare file.
fn sniff_format(data: &[u8]) -> Option<StreamFormat> {
    fn inner_is_tar(mut reader: impl Read) -> bool {
        let mut head = [0u8; 512];
        let mut filled = 0;
        while filled < head.len() {
            match reader.read(&mut head[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(_) => return false,
            }
        }
        looks_like_tar(&head[..filled])
    }

    if data.starts_with(&[0x1f, 0x8b]) {
        return Some(if inner_is_tar(GzDecoder::new(data)) {
            StreamFormat::TarGz
        } else {
            StreamFormat::Gz
        });
    }
    if data.starts_with(b"BZh") {
        return Some(if inner_is_tar(BzDecoder::new(data)) {
            StreamFormat::TarBz2
        } else {
            StreamFormat::Bz2
        });
    }
    if data.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]) {
        return Some(if inner_is_tar(XzDecoder::new(data)) {
            StreamFormat::TarXz
        } else {
            StreamFormat::Xz
        });
    }
    if data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
        let wrapped = ZstdDecoder::new(data).map(inner_is_tar).unwrap_or(false);
        return Some(if wrapped {
            StreamFormat::TarZst
        } else {
            StreamFormat::Zst
        });
    }
    if looks_like_tar(data) {
        return Some(StreamFormat::Tar);
    }
    None
}

fn decoder<'a>(format: StreamFormat, reader: Box<dyn Read + 'a>) -> Result<Box<dyn Read + 'a>> {
    Ok(match format {
        StreamFormat::Tar => reader,
        StreamFormat::TarGz | StreamFormat::Gz => Box::new(GzDecoder::new(reader)),
        StreamFormat::TarBz2 | StreamFormat::Bz2 => Box::new(BzDecoder::new(reader)),
        StreamFormat::TarXz | StreamFormat::Xz => Box::new(XzDecoder::new(reader)),
        StreamFormat::TarZst | StreamFormat::Zst => Box::new(ZstdDecoder::new(reader)?),
    })
}

fn mtime_to_datetime(secs: u64) -> Option<DateTime<Utc>> {
    UNIX_EPOCH
        .checked_add(Duration::from_secs(secs))
        .map(DateTime::<Utc>::from)
}

fn map_stream_error(source: &str, err: std::io::Error) -> VfsError {
    match err.kind() {
        std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => {
            VfsError::corrupt(source, err)
        }
        _ => VfsError::Io(err),
    }
}

/// Name for the single synthesized member of a bare compressed stream:
/// the source name minus its compression suffix, `"data"` when no name
/// is available.
fn bare_member_name(hint: &str) -> String {
    let base = paths::basename(hint);
    for suffix in [".gz", ".bz2", ".xz", ".zst", ".GZ", ".BZ2", ".XZ", ".ZST"] {
        if base.len() > suffix.len() {
            if let Some(stripped) = base.strip_suffix(suffix) {
                return stripped.to_string();
            }
        }
    }
    if base.is_empty() {
        "data".to_string()
    } else {
        base.to_string()
    }
}

/// Tar-family reader: plain and compressed tars, plus bare `.gz` /
/// `.bz2` / `.xz` / `.zst` streams presented as one-member containers.
/// Everything is sequential, so in-memory sources work for all of it.
pub struct TarHandler {
    structures: StructureCache,
}

impl Default for TarHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl TarHandler {
    pub fn new() -> Self {
        Self {
            structures: StructureCache::new(),
        }
    }

    fn parse_tar_members(reader: Box<dyn Read + '_>, source: &str) -> Result<Vec<ArchiveMember>> {
        let mut archive = TarArchive::new(reader);
        let mut members = Vec::new();
        let mut total_size: u64 = 0;

        let entries = archive
            .entries()
            .map_err(|e| map_stream_error(source, e))?;
        for item in entries {
            let entry = item.map_err(|e| map_stream_error(source, e))?;
            if members.len() >= MAX_ENTRIES {
                return Err(VfsError::corrupt(source, "too many entries"));
            }
            let path = entry
                .path()
                .map_err(|e| map_stream_error(source, e))?
                .to_string_lossy()
                .to_string();
            let Some(normalized) = normalize_member_path(&path) else {
                continue;
            };

            let header = entry.header();
            let size = header.size().unwrap_or(0);
            if size > MAX_SINGLE_FILE {
                return Err(VfsError::corrupt(source, format!("entry too large: {path}")));
            }
            total_size = total_size.saturating_add(size);
            if total_size > MAX_TOTAL_SIZE {
                return Err(VfsError::corrupt(source, "archive exceeds size limit"));
            }

            members.push(ArchiveMember {
                path: normalized.clone(),
                raw_path: normalized,
                is_dir: header.entry_type().is_dir(),
                size,
                modified: header.mtime().ok().and_then(mtime_to_datetime),
            });
        }
        Ok(members)
    }

    fn parse_bare_member(
        format: StreamFormat,
        reader: Box<dyn Read + '_>,
        source: &str,
        hint: &str,
    ) -> Result<Vec<ArchiveMember>> {
        let payload = Self::decompress_capped(format, reader, source)?;
        Ok(vec![ArchiveMember {
            path: bare_member_name(hint),
            raw_path: bare_member_name(hint),
            is_dir: false,
            size: payload.len() as u64,
            modified: None,
        }])
    }

    fn decompress_capped(
        format: StreamFormat,
        reader: Box<dyn Read + '_>,
        source: &str,
    ) -> Result<Vec<u8>> {
        let mut stream = decoder(format, reader)?.take(MAX_SINGLE_FILE + 1);
        let mut payload = Vec::new();
        stream
            .read_to_end(&mut payload)
            .map_err(|e| map_stream_error(source, e))?;
        if payload.len() as u64 > MAX_SINGLE_FILE {
            return Err(VfsError::corrupt(source, "decompressed stream too large"));
        }
        Ok(payload)
    }

    fn format_for_path(&self, path: &str) -> Result<StreamFormat> {
        if let Some(format) = infer_format_from_name(path) {
            // A .gz by name can still wrap a tar; let the bytes decide.
            if !format.is_tar() {
                if let Ok(head) = super::read_head_n(Path::new(path), 4096) {
                    if let Some(sniffed) = sniff_format(&head) {
                        return Ok(sniffed);
                    }
                }
            }
            return Ok(format);
        }
        let head = super::read_head_n(Path::new(path), 4096).map_err(VfsError::Io)?;
        sniff_format(&head).ok_or_else(|| VfsError::Unsupported(path.to_string()))
    }

    fn members_for_path(&self, path: &str) -> Result<Vec<ArchiveMember>> {
        if let Some(members) = self.structures.get(Path::new(path)) {
            return Ok(members.as_ref().clone());
        }
        let format = self.format_for_path(path)?;
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VfsError::NotFound(path.to_string()),
            _ => VfsError::Io(e),
        })?;
        let members = if format.is_tar() {
            Self::parse_tar_members(decoder(format, Box::new(file))?, path)?
        } else {
            Self::parse_bare_member(format, Box::new(file), path, path)?
        };
        Ok(self.structures.store(Path::new(path), members).as_ref().clone())
    }

    fn read_tar_member(
        reader: Box<dyn Read + '_>,
        source: &str,
        internal_path: &str,
    ) -> Result<Vec<u8>> {
        let mut archive = TarArchive::new(reader);
        let entries = archive
            .entries()
            .map_err(|e| map_stream_error(source, e))?;
        for item in entries {
            let mut entry = item.map_err(|e| map_stream_error(source, e))?;
            let path = entry
                .path()
                .map_err(|e| map_stream_error(source, e))?
                .to_string_lossy()
                .to_string();
            let Some(normalized) = normalize_member_path(&path) else {
                continue;
            };
            if normalized != internal_path {
                continue;
            }
            if entry.header().entry_type().is_dir() {
                return Err(VfsError::InvalidPath(format!(
                    "{internal_path} is a directory"
                )));
            }
            let size = entry.header().size().unwrap_or(0);
            if size > MAX_SINGLE_FILE {
                return Err(VfsError::corrupt(source, "entry too large"));
            }
            let mut data = Vec::with_capacity(size as usize);
            entry
                .read_to_end(&mut data)
                .map_err(|e| map_stream_error(source, e))?;
            return Ok(data);
        }
        Err(VfsError::NotFound(internal_path.to_string()))
    }
}

impl ArchiveHandler for TarHandler {
    fn name(&self) -> &'static str {
        "tar"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &[
            ".tar", ".tgz", ".tbz", ".tbz2", ".txz", ".tzst", ".gz", ".bz2", ".xz", ".zst",
        ]
    }

    fn matches_magic(&self, head: &[u8]) -> bool {
        head.starts_with(&[0x1f, 0x8b])
            || head.starts_with(b"BZh")
            || head.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00])
            || head.starts_with(&[0x28, 0xb5, 0x2f, 0xfd])
            || looks_like_tar(head)
    }

    fn list_all_entries(&self, path: &str) -> Result<Vec<EntryInfo>> {
        let members = self.members_for_path(path)?;
        Ok(entries_from_members(self, &members))
    }

    fn list_all_entries_from_bytes(&self, data: &[u8]) -> Result<Vec<EntryInfo>> {
        let format =
            sniff_format(data).ok_or_else(|| VfsError::Unsupported("<bytes>".to_string()))?;
        let members = if format.is_tar() {
            Self::parse_tar_members(decoder(format, Box::new(Cursor::new(data)))?, "<bytes>")?
        } else {
            Self::parse_bare_member(format, Box::new(Cursor::new(data)), "<bytes>", "")?
        };
        Ok(entries_from_members(self, &members))
    }

    fn read_archive_file(&self, archive_path: &str, internal_path: &str) -> Result<Vec<u8>> {
        let format = self.format_for_path(archive_path)?;
        let file = File::open(archive_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VfsError::NotFound(archive_path.to_string()),
            _ => VfsError::Io(e),
        })?;
        if format.is_tar() {
            Self::read_tar_member(decoder(format, Box::new(file))?, archive_path, internal_path)
        } else {
            if internal_path != bare_member_name(archive_path) {
                return Err(VfsError::NotFound(internal_path.to_string()));
            }
            Self::decompress_capped(format, Box::new(file), archive_path)
        }
    }

    fn read_file_from_bytes(&self, data: &[u8], internal_path: &str) -> Result<Vec<u8>> {
        let format =
            sniff_format(data).ok_or_else(|| VfsError::Unsupported("<bytes>".to_string()))?;
        if format.is_tar() {
            Self::read_tar_member(
                decoder(format, Box::new(Cursor::new(data)))?,
                "<bytes>",
                internal_path,
            )
        } else {
            if internal_path != bare_member_name("") {
                return Err(VfsError::NotFound(internal_path.to_string()));
            }
            Self::decompress_capped(format, Box::new(Cursor::new(data)), "<bytes>")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn build_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn infers_compound_extensions_first() {
        assert_eq!(infer_format_from_name("x.tar.gz"), Some(StreamFormat::TarGz));
        assert_eq!(infer_format_from_name("x.tgz"), Some(StreamFormat::TarGz));
        assert_eq!(infer_format_from_name("x.gz"), Some(StreamFormat::Gz));
        assert_eq!(infer_format_from_name("x.tar"), Some(StreamFormat::Tar));
        assert_eq!(infer_format_from_name("x.doc"), None);
    }

    #[test]
    fn lists_tar_gz_from_bytes() {
        let data = gzip(&build_tar(&[("dir/file.txt", b"hello"), ("top.bin", b"\x01")]));
        let handler = TarHandler::new();
        assert!(handler.can_handle_bytes(&data, "x.tar.gz"));

        let entries = handler.list_all_entries_from_bytes(&data).unwrap();
        let rels: Vec<&str> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["dir", "dir/file.txt", "top.bin"]);

        let payload = handler.read_file_from_bytes(&data, "dir/file.txt").unwrap();
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn bare_gzip_presents_single_member() {
        let data = gzip(b"just text");
        let handler = TarHandler::new();
        let entries = handler.list_all_entries_from_bytes(&data).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].rel_path, "data");
        assert_eq!(entries[0].size, 9);

        let payload = handler.read_file_from_bytes(&data, "data").unwrap();
        assert_eq!(payload, b"just text");
    }

    #[test]
    fn bare_member_names_strip_suffix() {
        assert_eq!(bare_member_name("notes.txt.gz"), "notes.txt");
        assert_eq!(bare_member_name("dir/notes.txt.xz"), "notes.txt");
        assert_eq!(bare_member_name(""), "data");
    }

    #[test]
    fn missing_member_is_not_found() {
        let data = build_tar(&[("a.txt", b"abc")]);
        let handler = TarHandler::new();
        let result = handler.read_file_from_bytes(&data, "b.txt");
        assert!(matches!(result, Err(VfsError::NotFound(_))));
    }
}
