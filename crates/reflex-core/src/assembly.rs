//! # Assembly
//!
//! The introspection handle for a running process.
//!
//! An [`Assembly`] owns the image registry and the global table, and exposes
//! every lookup as a `&self` method so one assembly can be shared across
//! threads. Lookups take a snapshot of the registry first and never hold a
//! registry lock while resolving debug information or calling into the
//! process.
//!
//! The global table is the exception: it is rebuilt lazily when the epoch
//! moves, and the rebuild runs under the table's write lock so concurrent
//! readers wait for the finished table instead of racing to build their own.
//!
//! ## Example
//!
//! ```rust,no_run
//! use reflex_core::{Assembly, Value};
//!
//! # fn main() -> Result<(), reflex_core::ReflexError> {
//! let assembly = Assembly::open()?;
//! let add = assembly.find_function("my_crate::add", false)?;
//! let sum = unsafe { add.call(&[Value::new(2i64), Value::new(3i64)])? };
//! assert_eq!(sum[0].get::<i64>()?, 5);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::RwLock;

use crate::catalog::{self, FunctionDescriptor, GlobalTable};
use crate::config::AssemblyConfig;
use crate::error::{ReflexError, ReflexResult};
use crate::invoke::{Callable, FunctionType};
use crate::platform;
use crate::registry::{Registry, Snapshot};
use crate::resolve::signature::resolve_signature;
use crate::resolve::{TypeHandle, TypeResolver};
use crate::symbols::{BinaryImage, ImageInfo, Symbolication};
use crate::types::Address;
use crate::value::Value;

/// Introspection over the images of this process
#[derive(Debug)]
pub struct Assembly
{
    registry: Registry,
    globals: RwLock<GlobalTable>,
}

/// Deduplicated type names in registration order
#[derive(Debug, Clone)]
pub struct TypeNames
{
    names: Arc<Vec<String>>,
    position: usize,
}

impl TypeNames
{
    pub fn len(&self) -> usize
    {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.names.is_empty()
    }
}

impl Iterator for TypeNames
{
    type Item = String;

    fn next(&mut self) -> Option<Self::Item>
    {
        let name = self.names.get(self.position)?.clone();
        self.position += 1;
        Some(name)
    }

    fn size_hint(&self) -> (usize, Option<usize>)
    {
        let remaining = self.names.len().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TypeNames {}

impl Assembly
{
    /// An assembly with no images registered.
    pub fn new(config: AssemblyConfig) -> Self
    {
        Self {
            registry: Registry::new(config),
            globals: RwLock::new(GlobalTable::default()),
        }
    }

    /// Register the running executable with configuration from the environment.
    pub fn open() -> ReflexResult<Self>
    {
        Self::open_with(AssemblyConfig::from_env())
    }

    /// Register the running executable.
    ///
    /// The load bias comes from the process entry point when the platform
    /// reports one, and from the loader's record of the main executable
    /// otherwise.
    pub fn open_with(config: AssemblyConfig) -> ReflexResult<Self>
    {
        let assembly = Self::new(config);
        let path = platform::primary_executable()?;

        match platform::primary_entry_point() {
            Ok(entry) => {
                assembly.registry.load_initial(&path, entry)?;
            }
            Err(err) => {
                tracing::debug!(error = %err, "entry point unavailable, using the loader's bias");
                let primary = platform::loaded_modules()?
                    .into_iter()
                    .find(|module| module.primary)
                    .ok_or_else(|| ReflexError::not_found("module", path.display().to_string()))?;
                assembly.registry.load_primary_with_bias(&path, primary.bias)?;
            }
        }

        tracing::info!(path = %path.display(), "opened assembly");
        Ok(assembly)
    }

    pub fn registry(&self) -> &Registry
    {
        &self.registry
    }

    pub fn epoch(&self) -> u64
    {
        self.registry.epoch()
    }

    /// Register an image mapped at `entry_address`; the first image becomes
    /// the primary one.
    pub fn load_image(&self, path: impl AsRef<Path>, entry_address: Address) -> ReflexResult<()>
    {
        self.registry.load_image(path.as_ref(), entry_address).map(|_| ())
    }

    /// Register a shared object the dynamic loader has already mapped.
    pub fn load_plugin(&self, path: impl AsRef<Path>) -> ReflexResult<()>
    {
        self.registry.load_mapped(path.as_ref()).map(|_| ())
    }

    /// Drop every image and cache. Later lookups fail with
    /// [`ReflexError::Closed`].
    pub fn close(&self) -> ReflexResult<()>
    {
        self.registry.close()?;
        self.globals.write().clear();
        Ok(())
    }

    /// Summaries of the registered images, primary first.
    pub fn images(&self) -> ReflexResult<Vec<ImageInfo>>
    {
        let snapshot = self.registry.snapshot()?;
        Ok(snapshot
            .images()
            .iter()
            .enumerate()
            .map(|(i, image)| image.info(i == 0))
            .collect())
    }

    fn globals(&self) -> ReflexResult<Vec<(String, Value)>>
    {
        let snapshot = self.registry.snapshot()?;
        {
            let table = self.globals.read();
            if table.is_current(snapshot.epoch()) {
                return Ok(table.entries());
            }
        }

        // The writer holds the lock for the whole rebuild; a concurrent
        // caller that lost the race finds the table current here.
        let mut table = self.globals.write();
        if !table.is_current(snapshot.epoch()) {
            table.replace(snapshot.epoch(), catalog::collect_globals(&snapshot)?);
        }
        Ok(table.entries())
    }

    /// Look up a package-level variable of the primary image.
    pub fn find_global(&self, name: &str) -> ReflexResult<Value>
    {
        let snapshot = self.registry.snapshot()?;
        {
            let table = self.globals.read();
            if table.is_current(snapshot.epoch()) {
                return table.get(name).ok_or_else(|| ReflexError::not_found("global", name));
            }
        }
        self.globals()?;
        self.globals
            .read()
            .get(name)
            .ok_or_else(|| ReflexError::not_found("global", name))
    }

    /// Visit every global until `visitor` returns `false`.
    ///
    /// The values are memory-backed: writing through one is observed by
    /// later lookups of the same global.
    pub fn for_each_global<F>(&self, mut visitor: F) -> ReflexResult<()>
    where
        F: FnMut(&str, &Value) -> bool,
    {
        for (name, value) in self.globals()? {
            if !visitor(&name, &value) {
                break;
            }
        }
        Ok(())
    }

    /// Every declared type name, deduplicated across images.
    pub fn type_names(&self) -> ReflexResult<TypeNames>
    {
        let snapshot = self.registry.snapshot()?;
        let mut names = IndexSet::new();
        for image in snapshot.images() {
            for name in image.index()?.type_names() {
                if !names.contains(name) {
                    names.insert(name.to_string());
                }
            }
        }
        Ok(TypeNames {
            names: Arc::new(names.into_iter().collect()),
            position: 0,
        })
    }

    /// Visit every type name until `visitor` returns `false`.
    pub fn for_each_type_name<F>(&self, mut visitor: F) -> ReflexResult<()>
    where
        F: FnMut(&str) -> bool,
    {
        for name in self.type_names()? {
            if !visitor(&name) {
                break;
            }
        }
        Ok(())
    }

    /// Resolve a type by canonical name.
    pub fn find_type(&self, name: &str) -> ReflexResult<TypeHandle>
    {
        let snapshot = self.registry.snapshot()?;
        TypeResolver::new(&snapshot).resolve_by_name(name)
    }

    /// Find a function by qualified or linkage name.
    pub fn find_function_entry(&self, name: &str) -> ReflexResult<FunctionDescriptor>
    {
        let snapshot = self.registry.snapshot()?;
        catalog::find_function(&snapshot, name)
    }

    pub fn find_function_address(&self, name: &str) -> ReflexResult<Address>
    {
        Ok(self.find_function_entry(name)?.entry)
    }

    fn function_type(&self, snapshot: &Snapshot, function: &FunctionDescriptor, variadic: bool)
        -> ReflexResult<FunctionType>
    {
        let image: &Arc<BinaryImage> = snapshot
            .image(function.image)
            .ok_or_else(|| ReflexError::not_found("image", function.image.to_string()))?;
        let signature = resolve_signature(&TypeResolver::new(snapshot), image, function)?;
        FunctionType::from_signature(&signature, variadic)
    }

    /// Derive the call-site type of a function.
    ///
    /// With `variadic`, the trailing slice parameter collects any number of
    /// trailing arguments.
    pub fn find_function_type(&self, name: &str, variadic: bool) -> ReflexResult<FunctionType>
    {
        let snapshot = self.registry.snapshot()?;
        let function = catalog::find_function(&snapshot, name)?;
        self.function_type(&snapshot, &function, variadic)
    }

    /// Bind a function for dynamic calls.
    pub fn find_function(&self, name: &str, variadic: bool) -> ReflexResult<Callable>
    {
        let snapshot = self.registry.snapshot()?;
        let function = catalog::find_function(&snapshot, name)?;
        let ty = self.function_type(&snapshot, &function, variadic)?;
        Callable::bind(function.name, function.entry, ty)
    }

    /// Visit every function until `visitor` returns `false`.
    pub fn for_each_function<F>(&self, visitor: F) -> ReflexResult<()>
    where
        F: FnMut(&str, Address) -> bool,
    {
        let snapshot = self.registry.snapshot()?;
        catalog::for_each_function(&snapshot, visitor)
    }

    /// Look up, validate and call a function in one step.
    ///
    /// # Safety
    ///
    /// See [`Callable::call`].
    pub unsafe fn call_function(&self, name: &str, variadic: bool, args: &[Value]) -> ReflexResult<Vec<Value>>
    {
        let callable = self.find_function(name, variadic)?;
        // SAFETY: upheld by the caller.
        unsafe { callable.call(args) }
    }

    /// Find a loaded shared object (not the main executable) by file name.
    pub fn search_plugin_by_name(&self, name: &str) -> ReflexResult<(PathBuf, Address)>
    {
        if self.registry.is_closed() {
            return Err(ReflexError::Closed);
        }
        platform::loaded_modules()?
            .into_iter()
            .filter(|module| !module.primary)
            .find_map(|module| {
                let path = module.path?;
                (path.file_name()? == name).then_some((path, module.base))
            })
            .ok_or_else(|| ReflexError::not_found("plugin", name))
    }

    /// Paths and base addresses of every loaded shared object.
    ///
    /// Anonymous modules are reported with an empty path so both vectors
    /// always line up.
    pub fn search_plugins(&self) -> ReflexResult<(Vec<PathBuf>, Vec<Address>)>
    {
        if self.registry.is_closed() {
            return Err(ReflexError::Closed);
        }
        Ok(platform::loaded_modules()?
            .into_iter()
            .filter(|module| !module.primary)
            .map(|module| (module.path.unwrap_or_default(), module.base))
            .unzip())
    }

    /// Function name and source location for a live code address.
    pub fn symbolicate(&self, address: Address) -> Option<Symbolication>
    {
        let snapshot = self.registry.snapshot().ok()?;
        snapshot.image_for_address(address)?.symbolicate(address)
    }
}
