//! Resource extension loader (C10, §4.10): a process-wide registry of
//! lazily-loaded codec/helper modules (7z engine, cabinet compressor,
//! VSS backup API and friends upstream — here, any pluggable backend
//! an `ArchiveCodec`/`ContentMatcher` caller wants to swap in without
//! recompiling the pipeline).
//!
//! Grounded in the teacher's lazy-singleton pattern for platform
//! backends (`platform/src/lib.rs` picks one `PlatformDeviceManager`
//! per `cfg(target_os)` at compile time) generalized to a *runtime*
//! keyed registry, since §4.10 needs several independent modules
//! loaded on first use rather than one compile-time choice. Modeled as
//! a `HashMap<String, OnceLock<Arc<dyn Any>>>`-style double-checked
//! init, the way `std::sync::OnceLock` itself documents the "first
//! caller computes, everyone else reads the cache" pattern.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use orc_core::{OrcError, Result};

type Entry = OnceLock<Arc<dyn Any + Send + Sync>>;

/// Process-scoped; never unloaded for the process's lifetime (§4.10).
/// One [`OnceLock`] per module name gives each module its own
/// double-checked init without a registry-wide lock serialising
/// unrelated modules' first loads.
pub struct ExtensionRegistry {
    entries: Mutex<HashMap<String, Arc<Entry>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        ExtensionRegistry { entries: Mutex::new(HashMap::new()) }
    }

    /// The process-wide instance (§4.10: "a process-wide registry").
    pub fn global() -> &'static ExtensionRegistry {
        static INSTANCE: OnceLock<ExtensionRegistry> = OnceLock::new();
        INSTANCE.get_or_init(ExtensionRegistry::new)
    }

    fn slot(&self, name: &str) -> Arc<Entry> {
        let mut entries = self.entries.lock().expect("extension registry lock poisoned");
        entries.entry(name.to_string()).or_insert_with(|| Arc::new(OnceLock::new())).clone()
    }

    /// Loads module `name` on first call (via `loader`), returning the
    /// cached handle on every subsequent call regardless of which
    /// closure is passed — the loader only ever runs once per module
    /// name for the process's lifetime. `loader` runs without holding
    /// the registry's lock, so loading one module never blocks a
    /// concurrent `get` for a different module.
    pub fn get<T, F>(&self, name: &str, loader: F) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Result<T>,
    {
        let slot = self.slot(name);
        if let Some(existing) = slot.get() {
            return downcast(existing.clone(), name);
        }
        let value: Arc<dyn Any + Send + Sync> = Arc::new(loader()?);
        let stored = slot.get_or_init(|| value);
        downcast(stored.clone(), name)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.entries
            .lock()
            .expect("extension registry lock poisoned")
            .get(name)
            .map(|slot| slot.get().is_some())
            .unwrap_or(false)
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        ExtensionRegistry::new()
    }
}

fn downcast<T: Send + Sync + 'static>(value: Arc<dyn Any + Send + Sync>, name: &str) -> Result<Arc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| OrcError::unsupported(format!("extension {name} loaded at a different type")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn second_get_returns_cached_handle_without_reloading() {
        let registry = ExtensionRegistry::new();
        let load_count = Arc::new(AtomicUsize::new(0));

        let first = registry
            .get::<String, _>("codec-7z", || {
                load_count.fetch_add(1, Ordering::SeqCst);
                Ok("loaded".to_string())
            })
            .unwrap();
        let second = registry
            .get::<String, _>("codec-7z", || {
                load_count.fetch_add(1, Ordering::SeqCst);
                Ok("should not run".to_string())
            })
            .unwrap();

        assert_eq!(*first, "loaded");
        assert_eq!(*second, "loaded");
        assert_eq!(load_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_module_names_load_independently() {
        let registry = ExtensionRegistry::new();
        registry.get::<u32, _>("a", || Ok(1)).unwrap();
        registry.get::<u32, _>("b", || Ok(2)).unwrap();
        assert!(registry.is_loaded("a"));
        assert!(registry.is_loaded("b"));
        assert!(!registry.is_loaded("c"));
    }

    #[test]
    fn concurrent_first_access_loads_exactly_once() {
        let registry = Arc::new(ExtensionRegistry::new());
        let load_count = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let load_count = load_count.clone();
            handles.push(std::thread::spawn(move || {
                registry
                    .get::<u32, _>("shared", || {
                        load_count.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(5));
                        Ok(42)
                    })
                    .unwrap()
            }));
        }
        for h in handles {
            assert_eq!(*h.join().unwrap(), 42);
        }
        assert_eq!(load_count.load(Ordering::SeqCst), 1);
    }
}
