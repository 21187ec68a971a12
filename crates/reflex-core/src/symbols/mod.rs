//! # Symbols
//!
//! Binary images and the debug information they carry.
//!
//! - [`image`]: parses an object file, keeps its DWARF sections and the
//!   per-image caches, and symbolicates addresses through `addr2line`
//! - [`index`]: one depth-first pass over every unit of an image collecting
//!   functions, package-level variables, type names and runtime type records
//! - [`demangle`]: linkage name helpers

pub mod demangle;
pub mod image;
pub mod index;

#[cfg(test)]
pub(crate) mod fixture;

use gimli::{Dwarf, EndianArcSlice, RunTimeEndian};

pub use image::{BinaryImage, ImageId, ImageInfo};
pub use index::{DebugIndex, DieRef};

use crate::types::{SourceLocation, SymbolName};

pub(crate) type OwnedReader = EndianArcSlice<RunTimeEndian>;
pub(crate) type OwnedDwarf = Dwarf<OwnedReader>;

/// Symbol metadata for one address.
///
/// Contains one frame per inlining level, innermost first.
#[derive(Debug, Clone)]
pub struct Symbolication
{
    /// ID of the binary image containing this address
    pub image_id: ImageId,
    /// Stack of symbol frames (innermost first, for inlined functions)
    pub frames: Vec<SymbolFrame>,
}

/// A single symbol frame in a symbolication result.
#[derive(Debug, Clone)]
pub struct SymbolFrame
{
    /// Symbol name (mangled and demangled)
    pub symbol: SymbolName,
    /// Source location (file, line, column) if available
    pub location: Option<SourceLocation>,
}
