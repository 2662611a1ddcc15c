use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use encoding_rs::{Encoding, EUC_JP, ISO_2022_JP, SHIFT_JIS};
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use zip::result::ZipError;
use zip::ZipArchive;

use crate::entry::EntryInfo;
use crate::error::{Result, VfsError};

use super::{
    entries_from_members, normalize_member_path, ArchiveHandler, ArchiveMember, StructureCache,
    MAX_ENTRIES, MAX_SINGLE_FILE, MAX_TOTAL_SIZE,
};

/// Candidate decodings for member names whose raw bytes are not valid
/// UTF-8, tried in order; the first producing printable text wins.
const NAME_ENCODINGS: [&Encoding; 3] = [SHIFT_JIS, EUC_JP, ISO_2022_JP];

/// CP437 high half (0x80..=0xFF). The low half is ASCII-identical, which
/// makes the codec a total byte<->char bijection: decoding raw header
/// bytes through it is lossless, so re-encoding recovers them exactly.
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', 'É', 'æ', 'Æ',
    'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', 'á', 'í', 'ó', 'ú', 'ñ', 'Ñ',
    'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕',
    '╣', '║', '╗', '╝', '╜', '╛', '┐', '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦',
    '╠', '═', '╬', '╧', '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐',
    '▀', 'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', '≡', '±',
    '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}',
];

fn cp437_decode(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| {
            if b < 0x80 {
                b as char
            } else {
                CP437_HIGH[(b - 0x80) as usize]
            }
        })
        .collect()
}

fn cp437_encode(text: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        if (ch as u32) < 0x80 {
            out.push(ch as u8);
        } else {
            let idx = CP437_HIGH.iter().position(|&c| c == ch)?;
            out.push(0x80 + idx as u8);
        }
    }
    Some(out)
}

fn is_printable(text: &str) -> bool {
    !text
        .chars()
        .any(|c| c.is_control() || c == '\u{fffd}')
}

/// Repair a member name read out of a ZIP header.
///
/// Returns `(display, verbatim)`. `verbatim` is the string whose CP437
/// re-encoding recovers the raw header bytes (or the UTF-8 text when the
/// name is valid UTF-8), so the read path can match members exactly.
/// `display` is the first candidate decoding that yields printable text.
fn decode_member_name(raw: &[u8]) -> (String, String) {
    if let Ok(text) = std::str::from_utf8(raw) {
        return (text.to_string(), text.to_string());
    }
    let verbatim = cp437_decode(raw);
    for encoding in NAME_ENCODINGS {
        let (decoded, had_errors) = encoding.decode_without_bom_handling(raw);
        if !had_errors && is_printable(&decoded) {
            return (decoded.into_owned(), verbatim);
        }
    }
    (verbatim.clone(), verbatim)
}

fn zip_datetime_to_chrono(value: zip::DateTime) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(value.year().into(), value.month().into(), value.day().into())?;
    let time = NaiveTime::from_hms_opt(
        value.hour().into(),
        value.minute().into(),
        value.second().into(),
    )?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(
        NaiveDateTime::new(date, time),
        Utc,
    ))
}

fn map_zip_error(path: &str, err: ZipError) -> VfsError {
    match err {
        ZipError::Io(io) => VfsError::Io(io),
        ZipError::FileNotFound => VfsError::NotFound(path.to_string()),
        other => VfsError::corrupt(path, other),
    }
}

/// ZIP family reader (`.zip`, `.cbz`, `.epub`), including display-name
/// repair for archives written with legacy encodings.
pub struct ZipHandler {
    structures: StructureCache,
}

impl Default for ZipHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ZipHandler {
    pub fn new() -> Self {
        Self {
            structures: StructureCache::new(),
        }
    }

    fn parse_members<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        source: &str,
    ) -> Result<Vec<ArchiveMember>> {
        if archive.len() > MAX_ENTRIES {
            return Err(VfsError::corrupt(source, "too many entries"));
        }
        let mut members = Vec::with_capacity(archive.len());
        let mut total_size: u64 = 0;

        for index in 0..archive.len() {
            let file = archive
                .by_index(index)
                .map_err(|e| map_zip_error(source, e))?;

            let raw = file.name_raw().to_vec();
            let (display, verbatim) = decode_member_name(&raw);
            let Some(normalized) = normalize_member_path(&display) else {
                continue;
            };

            let size = file.size();
            if size > MAX_SINGLE_FILE {
                return Err(VfsError::corrupt(source, format!("entry too large: {display}")));
            }
            total_size = total_size.saturating_add(size);
            if total_size > MAX_TOTAL_SIZE {
                return Err(VfsError::corrupt(source, "archive exceeds size limit"));
            }

            members.push(ArchiveMember {
                path: normalized,
                raw_path: verbatim,
                is_dir: file.is_dir(),
                size,
                modified: file.last_modified().and_then(zip_datetime_to_chrono),
            });
        }
        Ok(members)
    }

    /// Locate a member by the verbatim name the enumeration reported,
    /// tolerating the repaired display path as an alias.
    fn find_member_index<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        internal_path: &str,
    ) -> Result<usize> {
        let target_raw = cp437_encode(internal_path);
        for index in 0..archive.len() {
            let file = match archive.by_index(index) {
                Ok(value) => value,
                Err(_) => continue,
            };
            let raw = file.name_raw();
            if let Some(expected) = &target_raw {
                if raw == expected.as_slice() {
                    return Ok(index);
                }
            }
            if raw == internal_path.as_bytes() {
                return Ok(index);
            }
            let (display, verbatim) = decode_member_name(raw);
            if verbatim == internal_path || display == internal_path {
                return Ok(index);
            }
        }
        Err(VfsError::NotFound(internal_path.to_string()))
    }

    fn read_member<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        source: &str,
        internal_path: &str,
    ) -> Result<Vec<u8>> {
        let index = Self::find_member_index(archive, internal_path)?;
        let mut file = archive
            .by_index(index)
            .map_err(|e| map_zip_error(source, e))?;
        if file.size() > MAX_SINGLE_FILE {
            return Err(VfsError::corrupt(source, "entry too large"));
        }
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)
            .map_err(|e| VfsError::corrupt(source, e))?;
        Ok(data)
    }
}

impl ArchiveHandler for ZipHandler {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &[".zip", ".cbz", ".epub"]
    }

    fn matches_magic(&self, head: &[u8]) -> bool {
        head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06") || head.starts_with(b"PK\x07\x08")
    }

    fn list_all_entries(&self, path: &str) -> Result<Vec<EntryInfo>> {
        if let Some(members) = self.structures.get(Path::new(path)) {
            return Ok(entries_from_members(self, &members));
        }
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VfsError::NotFound(path.to_string()),
            _ => VfsError::Io(e),
        })?;
        let mut archive = ZipArchive::new(file).map_err(|e| map_zip_error(path, e))?;
        let members = Self::parse_members(&mut archive, path)?;
        let members = self.structures.store(Path::new(path), members);
        Ok(entries_from_members(self, &members))
    }

    fn list_all_entries_from_bytes(&self, data: &[u8]) -> Result<Vec<EntryInfo>> {
        let mut archive =
            ZipArchive::new(Cursor::new(data)).map_err(|e| map_zip_error("<bytes>", e))?;
        let members = Self::parse_members(&mut archive, "<bytes>")?;
        Ok(entries_from_members(self, &members))
    }

    fn read_archive_file(&self, archive_path: &str, internal_path: &str) -> Result<Vec<u8>> {
        let file = File::open(archive_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VfsError::NotFound(archive_path.to_string()),
            _ => VfsError::Io(e),
        })?;
        let mut archive = ZipArchive::new(file).map_err(|e| map_zip_error(archive_path, e))?;
        Self::read_member(&mut archive, archive_path, internal_path)
    }

    fn read_file_from_bytes(&self, data: &[u8], internal_path: &str) -> Result<Vec<u8>> {
        let mut archive =
            ZipArchive::new(Cursor::new(data)).map_err(|e| map_zip_error("<bytes>", e))?;
        Self::read_member(&mut archive, "<bytes>", internal_path)
    }
}
