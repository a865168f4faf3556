//! Resolution of string handler references.
//!
//! A `HandlerLoader` turns a stable identifier into an executable handler.
//! Loaders only promise *resolvability* at registration time (`exists`);
//! the actual `load` happens lazily when the phase first runs.
//! `OnceLoader` memoises loads so a reference is loaded at most once and
//! later resolutions return the very same handler.

use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::Handler;

pub trait HandlerLoader: Send + Sync {
    /// Whether `reference` names something this loader can load.
    fn exists(&self, reference: &str) -> bool;

    /// Load the handler behind `reference`.
    fn load(&self, reference: &str) -> Result<Arc<dyn Handler>>;
}

impl<T: HandlerLoader + ?Sized> HandlerLoader for Box<T> {
    fn exists(&self, reference: &str) -> bool {
        (**self).exists(reference)
    }

    fn load(&self, reference: &str) -> Result<Arc<dyn Handler>> {
        (**self).load(reference)
    }
}

impl<T: HandlerLoader + ?Sized> HandlerLoader for Arc<T> {
    fn exists(&self, reference: &str) -> bool {
        (**self).exists(reference)
    }

    fn load(&self, reference: &str) -> Result<Arc<dyn Handler>> {
        (**self).load(reference)
    }
}

/// Loader that resolves nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLoader;

impl HandlerLoader for NoLoader {
    fn exists(&self, _reference: &str) -> bool {
        false
    }

    fn load(&self, reference: &str) -> Result<Arc<dyn Handler>> {
        Err(anyhow!("No loader configured for handler reference '{}'", reference))
    }
}

/// In-process map of identifiers to handlers.
#[derive(Default, Clone)]
pub struct HandlerCatalog {
    entries: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: impl Into<String>, handler: Arc<dyn Handler>) {
        self.entries.insert(reference.into(), handler);
    }

    pub fn with(mut self, reference: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.insert(reference, handler);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl HandlerLoader for HandlerCatalog {
    fn exists(&self, reference: &str) -> bool {
        self.entries.contains_key(reference)
    }

    fn load(&self, reference: &str) -> Result<Arc<dyn Handler>> {
        self.entries
            .get(reference)
            .cloned()
            .ok_or_else(|| anyhow!("Handler '{}' is not in the catalog", reference))
    }
}

/// Memoising wrapper: each reference is loaded through the inner loader once.
///
/// Failed loads are not cached, so a reference whose file appears later can
/// still be loaded on a retry.
pub struct OnceLoader<L> {
    inner: L,
    loaded: Mutex<HashMap<String, Arc<dyn Handler>>>,
}

impl<L: HandlerLoader> OnceLoader<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Number of distinct references loaded so far.
    pub fn loaded_count(&self) -> usize {
        self.loaded.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }
}

impl<L: HandlerLoader> HandlerLoader for OnceLoader<L> {
    fn exists(&self, reference: &str) -> bool {
        self.loaded
            .lock()
            .map(|m| m.contains_key(reference))
            .unwrap_or(false)
            || self.inner.exists(reference)
    }

    fn load(&self, reference: &str) -> Result<Arc<dyn Handler>> {
        let mut loaded = self
            .loaded
            .lock()
            .map_err(|_| anyhow!("Handler cache lock poisoned"))?;
        if let Some(handler) = loaded.get(reference) {
            return Ok(Arc::clone(handler));
        }
        let handler = self.inner.load(reference)?;
        loaded.insert(reference.to_string(), Arc::clone(&handler));
        Ok(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::handler::{FnHandler, HandlerOutput};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop() -> Arc<dyn Handler> {
        Arc::new(FnHandler::new("noop", |_: &str, _: &mut ExecutionContext<'_>| {
            Ok(HandlerOutput::Unchanged)
        }))
    }

    /// Catalog that counts how often `load` reaches it.
    struct CountingLoader {
        catalog: HandlerCatalog,
        loads: AtomicUsize,
    }

    impl HandlerLoader for CountingLoader {
        fn exists(&self, reference: &str) -> bool {
            self.catalog.exists(reference)
        }

        fn load(&self, reference: &str) -> Result<Arc<dyn Handler>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.catalog.load(reference)
        }
    }

    #[test]
    fn test_no_loader_resolves_nothing() {
        assert!(!NoLoader.exists("anything"));
        assert!(NoLoader.load("anything").is_err());
    }

    #[test]
    fn test_catalog_exists_and_load() {
        let catalog = HandlerCatalog::new().with("noop", noop());
        assert_eq!(catalog.len(), 1);
        assert!(catalog.exists("noop"));
        assert!(!catalog.exists("missing"));
        assert_eq!(catalog.load("noop").unwrap().label(), "noop");
        assert!(catalog.load("missing").is_err());
    }

    #[test]
    fn test_once_loader_loads_each_reference_once() {
        let loader = OnceLoader::new(CountingLoader {
            catalog: HandlerCatalog::new().with("noop", noop()),
            loads: AtomicUsize::new(0),
        });

        let first = loader.load("noop").unwrap();
        let second = loader.load("noop").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.inner().loads.load(Ordering::SeqCst), 1);
        assert_eq!(loader.loaded_count(), 1);
    }

    #[test]
    fn test_once_loader_does_not_cache_failures() {
        let loader = OnceLoader::new(CountingLoader {
            catalog: HandlerCatalog::new(),
            loads: AtomicUsize::new(0),
        });

        assert!(loader.load("missing").is_err());
        assert!(loader.load("missing").is_err());
        assert_eq!(loader.inner().loads.load(Ordering::SeqCst), 2);
        assert_eq!(loader.loaded_count(), 0);
    }
}
