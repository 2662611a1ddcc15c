//! Unified path-addressable access to directories, archive files, and
//! archives nested arbitrarily deep inside other archives.
//!
//! Point a [`VfsManager`] at a base path, then address everything under
//! it by slash-delimited relative path, however many archive boundaries
//! the path crosses:
//!
//! ```no_run
//! use reef::VfsManager;
//!
//! let mut vfs = VfsManager::new();
//! vfs.set_base_path("/books/collection.zip")?;
//! let page = vfs.read_file("volume1.cbz/page001.png")?;
//! # Ok::<(), reef::VfsError>(())
//! ```

mod cache;
mod entry;
mod error;
pub mod handlers;
mod manager;
mod paths;
mod processor;
mod registry;
mod resolver;

pub use entry::{is_hidden_name, ArchiveCache, EntryInfo, EntryStatus, EntryType};
pub use error::{Result, VfsError};
pub use handlers::ArchiveHandler;
pub use manager::VfsManager;
pub use paths::{basename, join, natural_key, normalize, parent_of, split_archive_path};
pub use registry::HandlerRegistry;
