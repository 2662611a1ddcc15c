use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::handlers::{
    ArchiveHandler, CabHandler, FileSystemHandler, LzhHandler, RarHandler, SevenZipHandler,
    TarHandler, ZipHandler,
};
use crate::paths;

/// Ordered collection of handlers with memoized path dispatch.
///
/// Later registrations shadow earlier ones: `get_handler` scans in
/// reverse registration order and returns the first taker. The union of
/// archive handlers' extensions is the authoritative "is this name an
/// archive?" predicate.
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn ArchiveHandler>>,
    memo: Mutex<HashMap<String, usize>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// The stock lineup: the filesystem handler first so every archive
    /// reader registered after it shadows it for container files.
    pub fn with_standard_handlers() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(FileSystemHandler::new()));
        registry.register(Arc::new(TarHandler::new()));
        registry.register(Arc::new(SevenZipHandler::new()));
        registry.register(Arc::new(CabHandler::new()));
        registry.register(Arc::new(LzhHandler::new()));
        registry.register(Arc::new(RarHandler::new()));
        registry.register(Arc::new(ZipHandler::new()));
        registry
    }

    /// Registering invalidates the dispatch memo.
    pub fn register(&mut self, handler: Arc<dyn ArchiveHandler>) {
        log::debug!("registering handler: {}", handler.name());
        self.handlers.push(handler);
        if let Ok(mut memo) = self.memo.lock() {
            memo.clear();
        }
    }

    pub fn handlers(&self) -> &[Arc<dyn ArchiveHandler>] {
        &self.handlers
    }

    pub fn get_handler(&self, path: &str) -> Option<Arc<dyn ArchiveHandler>> {
        let key = path.replace('\\', "/");
        if let Ok(memo) = self.memo.lock() {
            if let Some(&index) = memo.get(&key) {
                return self.handlers.get(index).cloned();
            }
        }

        for (index, handler) in self.handlers.iter().enumerate().rev() {
            if handler.can_handle(&key) {
                if let Ok(mut memo) = self.memo.lock() {
                    memo.insert(key, index);
                }
                return Some(Arc::clone(handler));
            }
        }
        None
    }

    /// Union of every archive handler's declared extensions.
    pub fn archive_extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = self
            .handlers
            .iter()
            .filter(|h| h.can_archive())
            .flat_map(|h| h.supported_extensions().iter().map(|s| s.to_string()))
            .collect();
        extensions.sort();
        extensions.dedup();
        extensions
    }

    pub fn is_archive_name(&self, name: &str) -> bool {
        match paths::extension_of(name) {
            Some(ext) => self
                .handlers
                .iter()
                .any(|h| h.can_archive() && h.supported_extensions().contains(&ext.as_str())),
            None => false,
        }
    }
}
