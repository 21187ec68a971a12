//! # Module Records
//!
//! Bridges debug-info addresses and the live process.
//!
//! A [`ModuleRecord`] is the loader's bookkeeping for one image, reduced to
//! what introspection needs: the load bias and the live bounds of the code,
//! the writable data and the runtime type table. On ELF the type table is the
//! `PT_GNU_RELRO` range (vtables are relocated once and then protected); when
//! an image has no RELRO segment the first read-only, non-executable load
//! segment stands in. On Mach-O it is `__DATA_CONST`.
//!
//! Records are derived data: the whole table is recomputed from the platform
//! module list whenever the registry's image set changes.

use std::fmt;
use std::path::PathBuf;

use crate::error::{ReflexError, ReflexResult};
use crate::platform::{self, LoadedModule, SegmentKind};
use crate::symbols::BinaryImage;
use crate::types::Address;

/// Half-open live address range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange
{
    pub start: Address,
    pub end: Address,
}

impl AddressRange
{
    pub fn contains(&self, address: Address) -> bool
    {
        self.start <= address && address < self.end
    }

    pub fn len(&self) -> u64
    {
        self.end.value().saturating_sub(self.start.value())
    }

    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }
}

impl fmt::Display for AddressRange
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A runtime type record located in the live process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeRecord
{
    /// Live address of the record
    pub address: Address,
    /// Whether the record lies inside its module's type table
    ///
    /// Records outside the table are references to records emitted by
    /// another module; their address is still usable.
    pub in_type_table: bool,
}

/// The loader's view of one image
#[derive(Debug, Clone)]
pub struct ModuleRecord
{
    pub path: Option<PathBuf>,
    pub bias: i64,
    pub primary: bool,
    pub text: Option<AddressRange>,
    pub data: Option<AddressRange>,
    pub types: Option<AddressRange>,
}

/// Smallest range covering every segment of `kind`.
fn span(module: &LoadedModule, kind: SegmentKind) -> Option<AddressRange>
{
    module
        .segments
        .iter()
        .filter(|segment| segment.kind == kind)
        .fold(None, |acc: Option<AddressRange>, segment| {
            let range = AddressRange {
                start: segment.start,
                end: segment.end(),
            };
            Some(match acc {
                Some(acc) => AddressRange {
                    start: acc.start.min(range.start),
                    end: acc.end.max(range.end),
                },
                None => range,
            })
        })
}

impl From<&LoadedModule> for ModuleRecord
{
    fn from(module: &LoadedModule) -> Self
    {
        let types = span(module, SegmentKind::Relro).or_else(|| {
            module
                .segments
                .iter()
                .find(|segment| segment.kind == SegmentKind::ReadOnly)
                .map(|segment| AddressRange {
                    start: segment.start,
                    end: segment.end(),
                })
        });

        Self {
            path: module.path.clone(),
            bias: module.bias,
            primary: module.primary,
            text: span(module, SegmentKind::Text),
            data: span(module, SegmentKind::Data),
            types,
        }
    }
}

impl ModuleRecord
{
    /// Bounds of the runtime type table.
    pub fn type_table(&self) -> ReflexResult<AddressRange>
    {
        self.types.ok_or_else(|| {
            let path = self
                .path
                .as_ref()
                .map_or_else(|| "<anonymous>".to_string(), |path| path.display().to_string());
            ReflexError::NotSupported(format!("module record for {path} has no type table"))
        })
    }

    /// Relocate a link-time record address and check it against the type table.
    pub fn classify_record(&self, link_address: u64) -> RuntimeRecord
    {
        let address = Address::relocate(link_address, self.bias);
        let in_type_table = match self.type_table() {
            Ok(table) => table.contains(address),
            Err(err) => {
                tracing::trace!(error = %err, "classifying record without type table");
                false
            }
        };
        RuntimeRecord { address, in_type_table }
    }
}

/// The record describing `image`: the one whose text range contains the
/// image's live text start, else the one with the same load bias.
pub fn module_for<'a>(image: &BinaryImage, modules: &'a [ModuleRecord]) -> ReflexResult<&'a ModuleRecord>
{
    let text_start = image.text_start();
    modules
        .iter()
        .find(|module| module.text.is_some_and(|text| text.contains(text_start)))
        .or_else(|| modules.iter().find(|module| module.bias == image.bias()))
        .ok_or_else(|| ReflexError::not_found("module", image.path().display().to_string()))
}

/// Rebuild the module table from the live module list.
///
/// Platforms without module enumeration yield an empty table.
pub(crate) fn refresh_modules() -> Vec<ModuleRecord>
{
    match platform::loaded_modules() {
        Ok(modules) => {
            let records: Vec<ModuleRecord> = modules.iter().map(ModuleRecord::from).collect();
            tracing::trace!(modules = records.len(), "refreshed module table");
            records
        }
        Err(err) => {
            tracing::warn!(error = %err, "module enumeration failed, runtime records will not be classified");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::platform::LoadedSegment;
    use crate::symbols::fixture;

    fn segment(start: u64, size: u64, kind: SegmentKind) -> LoadedSegment
    {
        LoadedSegment {
            start: Address::from(start),
            size,
            kind,
        }
    }

    fn module(segments: Vec<LoadedSegment>) -> LoadedModule
    {
        LoadedModule {
            path: Some(PathBuf::from("/lib/libdemo.so")),
            base: Address::from(0x10000),
            bias: 0x10000,
            primary: false,
            segments,
        }
    }

    #[test]
    fn test_relro_is_the_type_table()
    {
        let record = ModuleRecord::from(&module(vec![
            segment(0x10000, 0x1000, SegmentKind::ReadOnly),
            segment(0x11000, 0x4000, SegmentKind::Text),
            segment(0x15000, 0x800, SegmentKind::Relro),
            segment(0x15000, 0x2000, SegmentKind::Data),
        ]));
        assert_eq!(record.type_table().unwrap().start.value(), 0x15000);
        assert_eq!(record.type_table().unwrap().len(), 0x800);
        assert_eq!(record.text.unwrap().end.value(), 0x15000);
    }

    #[test]
    fn test_read_only_segment_is_the_fallback()
    {
        let record = ModuleRecord::from(&module(vec![
            segment(0x10000, 0x1000, SegmentKind::ReadOnly),
            segment(0x11000, 0x4000, SegmentKind::Text),
        ]));
        assert_eq!(record.type_table().unwrap().start.value(), 0x10000);
    }

    #[test]
    fn test_missing_type_table_is_not_supported()
    {
        let record = ModuleRecord::from(&module(vec![segment(0x11000, 0x4000, SegmentKind::Text)]));
        assert!(matches!(record.type_table(), Err(ReflexError::NotSupported(_))));
        let classified = record.classify_record(0x5000);
        assert!(!classified.in_type_table);
        assert_eq!(classified.address.value(), 0x15000);
    }

    #[test]
    fn test_classify_record_inside_and_outside()
    {
        let record = ModuleRecord::from(&module(vec![segment(0x15000, 0x800, SegmentKind::Relro)]));
        let inside = record.classify_record(0x5100);
        assert!(inside.in_type_table);
        assert_eq!(inside.address.value(), 0x15100);
        assert!(!record.classify_record(0x9000).in_type_table);
    }

    #[test]
    fn test_module_for_matches_text_then_bias()
    {
        let image = fixture::image();
        let by_text = ModuleRecord::from(&module(vec![segment(0x10000, 0x4000, SegmentKind::Text)]));
        let mut by_bias = ModuleRecord::from(&module(Vec::new()));
        by_bias.path = Some(PathBuf::from("/other"));

        let modules = vec![by_bias.clone(), by_text];
        assert_eq!(module_for(&image, &modules).unwrap().path, Some(PathBuf::from("/lib/libdemo.so")));

        let modules = vec![by_bias];
        assert_eq!(module_for(&image, &modules).unwrap().path, Some(PathBuf::from("/other")));

        let err = module_for(&image, &[]).unwrap_err();
        assert!(err.is_not_found());
    }
}
