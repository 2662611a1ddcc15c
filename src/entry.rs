use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What kind of filesystem entity an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Directory,
    Archive,
    Symlink,
    Unknown,
}

impl EntryType {
    pub fn is_container(self) -> bool {
        matches!(self, EntryType::Directory | EntryType::Archive)
    }
}

/// Whether an entry's children could be enumerated.
///
/// `Scanning` is transient while the recursion driver materializes an
/// archive; every entry ends up `Ready` or `Broken` before
/// `set_base_path` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Ready,
    Broken,
    Scanning,
}

/// Cached source bytes for a nested archive entry.
///
/// Readers that work from memory get the raw buffer; readers that need
/// random file access (RAR) get a temp file whose path is tracked by the
/// manager's cleanup set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveCache {
    Bytes(Vec<u8>),
    TempFile(PathBuf),
}

/// One addressable item in the virtual filesystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryInfo {
    pub name: String,
    /// Slash-delimited path from the base; empty for the root, never with
    /// a leading or trailing slash. This is the cache key.
    pub rel_path: String,
    /// The member name exactly as the containing archive's reader needs it
    /// to re-read the bytes. Never rewritten after creation, even when the
    /// display name is repaired.
    pub name_in_archive: String,
    pub entry_type: EntryType,
    pub status: EntryStatus,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub is_hidden: bool,
    /// Source bytes or temp-file path for ARCHIVE entries materialized
    /// from inside another archive; `None` for everything else.
    #[serde(skip)]
    pub cache: Option<ArchiveCache>,
}

impl EntryInfo {
    pub fn is_file(&self) -> bool {
        self.entry_type == EntryType::File
    }

    pub fn is_directory(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    pub fn is_archive(&self) -> bool {
        self.entry_type == EntryType::Archive
    }
}

/// Files that should be treated as hidden regardless of a leading dot.
/// These are system-generated names users don't want to see.
const HIDDEN_SYSTEM_FILES: &[&str] = &[
    "Thumbs.db",
    "desktop.ini",
    "ehthumbs.db",
    "__MACOSX",
    "$RECYCLE.BIN",
    "System Volume Information",
];

/// Check if a file should be considered hidden.
/// Returns true for dotfiles and known system files.
pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.') || HIDDEN_SYSTEM_FILES.iter().any(|&f| name.eq_ignore_ascii_case(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_names() {
        assert!(is_hidden_name(".DS_Store"));
        assert!(is_hidden_name("thumbs.db"));
        assert!(is_hidden_name("__MACOSX"));
        assert!(!is_hidden_name("notes.txt"));
    }

    #[test]
    fn container_types() {
        assert!(EntryType::Directory.is_container());
        assert!(EntryType::Archive.is_container());
        assert!(!EntryType::File.is_container());
    }
}
