//! # Image Registry
//!
//! Tracks the binary images an [`Assembly`](crate::Assembly) introspects, the
//! module records the loader reports for them, and the cache epoch.
//!
//! Every change to the image list (a load or a close) increments the epoch.
//! Caches built from registry contents remember the epoch they were built at
//! and are treated as empty once it moves, so adding an image invalidates the
//! type caches, runtime record maps, the global table and the module table
//! together.
//!
//! ## Locking
//!
//! The registry state sits behind one `parking_lot::RwLock`. Mutations hold the
//! write lock for their whole duration; readers take a [`Snapshot`] (cheap
//! `Arc` clones) and release the lock before doing any real work.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::AssemblyConfig;
use crate::error::{ReflexError, ReflexResult};
use crate::module::{self, ModuleRecord};
use crate::platform;
use crate::symbols::image::{BinaryImage, ImageId, LoadAnchor};
use crate::types::Address;

/// A name-keyed cache tagged with the epoch it was filled at.
#[derive(Debug)]
pub(crate) struct EpochCache<V>
{
    epoch: Option<u64>,
    entries: HashMap<String, V>,
}

impl<V: Clone> EpochCache<V>
{
    pub(crate) fn new() -> Self
    {
        Self {
            epoch: None,
            entries: HashMap::new(),
        }
    }

    pub(crate) fn is_current(&self, epoch: u64) -> bool
    {
        self.epoch == Some(epoch)
    }

    pub(crate) fn get(&self, epoch: u64, name: &str) -> Option<V>
    {
        if !self.is_current(epoch) {
            return None;
        }
        self.entries.get(name).cloned()
    }

    /// Insert unless an entry already exists; returns the cached value.
    ///
    /// A value computed under an older epoch than the cache holds is handed
    /// back without being cached.
    pub(crate) fn insert(&mut self, epoch: u64, name: &str, value: V) -> V
    {
        match self.epoch {
            Some(current) if current > epoch => return value,
            Some(current) if current == epoch => {}
            _ => {
                self.entries.clear();
                self.epoch = Some(epoch);
            }
        }
        self.entries.entry(name.to_string()).or_insert(value).clone()
    }

    /// Replace the whole contents.
    pub(crate) fn replace(&mut self, epoch: u64, entries: HashMap<String, V>)
    {
        if self.epoch.is_some_and(|current| current > epoch) {
            return;
        }
        self.entries = entries;
        self.epoch = Some(epoch);
    }

    pub(crate) fn clear(&mut self)
    {
        self.entries.clear();
        self.epoch = None;
    }

    pub(crate) fn len(&self) -> usize
    {
        self.entries.len()
    }
}

/// How a load relates to the images already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMode
{
    Initial,
    Additional,
    Any,
}

#[derive(Debug, Default)]
struct RegistryState
{
    images: Vec<Arc<BinaryImage>>,
    modules: Arc<Vec<ModuleRecord>>,
    epoch: u64,
    closed: bool,
}

/// The set of loaded images, guarded by a single lock
#[derive(Debug)]
pub struct Registry
{
    config: AssemblyConfig,
    state: RwLock<RegistryState>,
}

impl Registry
{
    pub fn new(config: AssemblyConfig) -> Self
    {
        Self {
            config,
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn config(&self) -> &AssemblyConfig
    {
        &self.config
    }

    /// Register the primary image. Fails with `AlreadyLoaded` when any image
    /// is present.
    pub fn load_initial(&self, path: &Path, entry_address: Address) -> ReflexResult<Arc<BinaryImage>>
    {
        self.load(path, LoadAnchor::Entry(entry_address), LoadMode::Initial)
    }

    /// Register another image next to the existing ones.
    pub fn load_additional(&self, path: &Path, entry_address: Address) -> ReflexResult<Arc<BinaryImage>>
    {
        self.load(path, LoadAnchor::Entry(entry_address), LoadMode::Additional)
    }

    /// Register an image: the primary one when the registry is empty,
    /// an additional one otherwise.
    pub fn load_image(&self, path: &Path, entry_address: Address) -> ReflexResult<Arc<BinaryImage>>
    {
        self.load(path, LoadAnchor::Entry(entry_address), LoadMode::Any)
    }

    pub(crate) fn load_primary_with_bias(&self, path: &Path, bias: i64) -> ReflexResult<Arc<BinaryImage>>
    {
        self.load(path, LoadAnchor::Bias(bias), LoadMode::Initial)
    }

    /// Register an image the dynamic loader has already mapped, taking its
    /// bias from the live module list.
    pub fn load_mapped(&self, path: &Path) -> ReflexResult<Arc<BinaryImage>>
    {
        let canonical = path.canonicalize()?;
        let module = platform::loaded_modules()?
            .into_iter()
            .filter(|module| !module.primary)
            .find(|module| {
                module
                    .path
                    .as_ref()
                    .and_then(|candidate| candidate.canonicalize().ok())
                    .is_some_and(|candidate| candidate == canonical)
            })
            .ok_or_else(|| ReflexError::not_found("plugin", path.display().to_string()))?;
        self.load(&canonical, LoadAnchor::Bias(module.bias), LoadMode::Additional)
    }

    fn load(&self, path: &Path, anchor: LoadAnchor, mode: LoadMode) -> ReflexResult<Arc<BinaryImage>>
    {
        let mut state = self.state.write();
        if state.closed {
            return Err(ReflexError::Closed);
        }
        if mode == LoadMode::Initial && !state.images.is_empty() {
            return Err(ReflexError::AlreadyLoaded(path.to_path_buf()));
        }

        let canonical: PathBuf = path.canonicalize()?;
        let image = BinaryImage::parse(canonical, anchor, self.config.index_type_units())?;
        if let Some(existing) = state.images.iter().find(|loaded| loaded.id() == image.id()) {
            tracing::debug!(path = %existing.path().display(), "image already registered");
            return Ok(existing.clone());
        }
        if state.images.len() >= self.config.max_images() {
            return Err(ReflexError::TooManyImages {
                max: self.config.max_images(),
            });
        }

        let image = Arc::new(image);
        state.images.push(image.clone());
        state.modules = Arc::new(module::refresh_modules());
        state.epoch += 1;

        tracing::debug!(
            path = %image.path().display(),
            mode = ?mode,
            images = state.images.len(),
            epoch = state.epoch,
            "registered image"
        );
        Ok(image)
    }

    /// Drop every image and clear every cache. Idempotent.
    pub fn close(&self) -> ReflexResult<()>
    {
        let mut state = self.state.write();
        if state.closed {
            return Ok(());
        }
        for image in &state.images {
            image.clear_caches();
        }
        state.images.clear();
        state.modules = Arc::new(Vec::new());
        state.epoch += 1;
        state.closed = true;
        tracing::debug!(epoch = state.epoch, "registry closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool
    {
        self.state.read().closed
    }

    pub fn epoch(&self) -> u64
    {
        self.state.read().epoch
    }

    /// Capture the current images, module records and epoch.
    pub fn snapshot(&self) -> ReflexResult<Snapshot>
    {
        let state = self.state.read();
        if state.closed {
            return Err(ReflexError::Closed);
        }
        Ok(Snapshot {
            images: state.images.clone(),
            modules: state.modules.clone(),
            epoch: state.epoch,
        })
    }

    #[cfg(test)]
    pub(crate) fn insert_for_test(&self, image: Arc<BinaryImage>)
    {
        let mut state = self.state.write();
        state.images.push(image);
        state.epoch += 1;
    }
}

/// A consistent view of the registry at one epoch
#[derive(Debug, Clone)]
pub struct Snapshot
{
    images: Vec<Arc<BinaryImage>>,
    modules: Arc<Vec<ModuleRecord>>,
    epoch: u64,
}

impl Snapshot
{
    #[cfg(test)]
    pub(crate) fn from_parts(images: Vec<Arc<BinaryImage>>, modules: Vec<ModuleRecord>, epoch: u64) -> Self
    {
        Self {
            images,
            modules: Arc::new(modules),
            epoch,
        }
    }

    pub fn epoch(&self) -> u64
    {
        self.epoch
    }

    /// Images in load order, primary first.
    pub fn images(&self) -> &[Arc<BinaryImage>]
    {
        &self.images
    }

    pub fn primary(&self) -> Option<&Arc<BinaryImage>>
    {
        self.images.first()
    }

    pub fn image(&self, id: ImageId) -> Option<&Arc<BinaryImage>>
    {
        self.images.iter().find(|image| image.id() == id)
    }

    pub fn image_for_address(&self, address: Address) -> Option<&Arc<BinaryImage>>
    {
        self.images.iter().find(|image| image.contains(address))
    }

    pub fn modules(&self) -> &[ModuleRecord]
    {
        &self.modules
    }

    pub fn module_for(&self, image: &BinaryImage) -> ReflexResult<&ModuleRecord>
    {
        module::module_for(image, &self.modules)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::symbols::fixture;

    #[test]
    fn test_epoch_cache_discards_stale_epochs()
    {
        let mut cache = EpochCache::new();
        assert_eq!(cache.insert(1, "a", 10), 10);
        assert_eq!(cache.get(1, "a"), Some(10));
        assert_eq!(cache.get(2, "a"), None);

        assert_eq!(cache.insert(2, "b", 20), 20);
        assert_eq!(cache.get(2, "a"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_epoch_cache_first_insert_wins()
    {
        let mut cache = EpochCache::new();
        cache.insert(3, "a", 1);
        assert_eq!(cache.insert(3, "a", 2), 1);
    }

    #[test]
    fn test_epoch_cache_ignores_older_values()
    {
        let mut cache = EpochCache::new();
        cache.insert(5, "a", 1);
        assert_eq!(cache.insert(4, "b", 2), 2);
        assert_eq!(cache.get(5, "b"), None);

        cache.replace(4, HashMap::from([("c".to_string(), 3)]));
        assert_eq!(cache.get(5, "a"), Some(1));
    }

    #[test]
    fn test_close_is_idempotent_and_final()
    {
        let registry = Registry::new(AssemblyConfig::default());
        registry.insert_for_test(fixture::image());
        let before = registry.epoch();

        registry.close().unwrap();
        registry.close().unwrap();
        assert!(registry.is_closed());
        assert_eq!(registry.epoch(), before + 1);
        assert!(matches!(registry.snapshot(), Err(ReflexError::Closed)));
        assert!(matches!(
            registry.load_image(Path::new("/definitely/missing"), Address::ZERO),
            Err(ReflexError::Closed)
        ));
    }

    #[test]
    fn test_initial_load_requires_empty_registry()
    {
        let registry = Registry::new(AssemblyConfig::default());
        registry.insert_for_test(fixture::image());
        let err = registry
            .load_initial(Path::new("/fixture/other"), Address::ZERO)
            .unwrap_err();
        assert!(matches!(err, ReflexError::AlreadyLoaded(_)));
    }

    #[test]
    fn test_snapshot_lookups()
    {
        let registry = Registry::new(AssemblyConfig::default());
        let image = fixture::image();
        registry.insert_for_test(image.clone());

        let snapshot = registry.snapshot().unwrap();
        assert_eq!(snapshot.epoch(), 1);
        assert_eq!(snapshot.primary().unwrap().id(), image.id());
        assert!(snapshot.image(image.id()).is_some());
        let live = image.relocate(fixture::ADD_ADDRESS);
        assert_eq!(snapshot.image_for_address(live).unwrap().id(), image.id());
        assert!(snapshot.module_for(&image).unwrap_err().is_not_found());
    }
}
