//! # Platform-Specific Implementations
//!
//! The live process's own description of its loaded images.
//!
//! Each platform has its own submodule that asks the dynamic loader which
//! images are mapped and where:
//!
//! - **Linux**: `dl_iterate_phdr` for the module list and `getauxval(AT_ENTRY)`
//!   for the entry point of the executable
//!   - See: [dl_iterate_phdr(3)](https://man7.org/linux/man-pages/man3/dl_iterate_phdr.3.html)
//! - **macOS**: the dyld image list (`_dyld_image_count`, `_dyld_get_image_name`,
//!   `_dyld_get_image_vmaddr_slide`), with segment bounds read from each image
//!   file
//!
//! Other platforms report `NotSupported`.

use std::path::PathBuf;

use crate::error::ReflexResult;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
use crate::error::ReflexError;
use crate::types::Address;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "macos")]
mod macos;

/// What a mapped segment holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind
{
    /// Executable code
    Text,
    /// Writable data
    Data,
    /// Read-only, non-executable data
    ReadOnly,
    /// Data made read-only after relocation (`PT_GNU_RELRO`, `__DATA_CONST`)
    Relro,
}

/// One mapped segment of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedSegment
{
    /// Live start address
    pub start: Address,
    pub size: u64,
    pub kind: SegmentKind,
}

impl LoadedSegment
{
    pub fn end(&self) -> Address
    {
        Address::from(self.start.value().saturating_add(self.size))
    }
}

/// One image as the dynamic loader reports it
#[derive(Debug, Clone)]
pub struct LoadedModule
{
    /// File path, `None` for anonymous entries such as the vDSO
    pub path: Option<PathBuf>,
    /// Lowest mapped address
    pub base: Address,
    /// Live address minus link address
    pub bias: i64,
    /// True for the main executable
    pub primary: bool,
    pub segments: Vec<LoadedSegment>,
}

/// Enumerate the modules mapped into this process, main executable first.
pub fn loaded_modules() -> ReflexResult<Vec<LoadedModule>>
{
    #[cfg(target_os = "linux")]
    {
        linux::loaded_modules()
    }

    #[cfg(target_os = "macos")]
    {
        macos::loaded_modules()
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Err(ReflexError::NotSupported(format!(
            "module enumeration on {}",
            std::env::consts::OS
        )))
    }
}

/// Live address of the main executable's entry point.
pub fn primary_entry_point() -> ReflexResult<Address>
{
    #[cfg(target_os = "linux")]
    {
        linux::primary_entry_point()
    }

    #[cfg(target_os = "macos")]
    {
        macos::primary_entry_point()
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Err(ReflexError::NotSupported(format!("entry point lookup on {}", std::env::consts::OS)))
    }
}

/// Path of the running executable.
pub fn primary_executable() -> ReflexResult<PathBuf>
{
    Ok(std::env::current_exe()?)
}
