//! Binary image parsing and DWARF section loading.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use addr2line::Context;
use gimli::{Dwarf, EndianArcSlice, RunTimeEndian, SectionId};
use object::{Object, ObjectSection, ObjectSegment};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use super::demangle::{make_symbol_name, map_dwarf_error};
use super::index::DebugIndex;
use super::{OwnedDwarf, OwnedReader, SymbolFrame, Symbolication};
use crate::error::{ReflexError, ReflexResult};
use crate::registry::EpochCache;
use crate::resolve::TypeHandle;
use crate::types::{Address, Architecture, SourceLocation};

/// Identifies one loaded image: its canonical path and live load base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId(u64);

impl ImageId
{
    pub fn from_parts(path: &Path, load_address: u64) -> Self
    {
        use std::collections::hash_map::DefaultHasher;
        let mut hasher = DefaultHasher::new();
        path.hash(&mut hasher);
        load_address.hash(&mut hasher);
        ImageId(hasher.finish())
    }

    pub fn as_u64(self) -> u64
    {
        self.0
    }
}

impl fmt::Display for ImageId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:016x}", self.0)
    }
}

/// Summary of a registered image.
#[derive(Debug, Clone)]
pub struct ImageInfo
{
    pub id: ImageId,
    pub path: PathBuf,
    pub architecture: Architecture,
    /// Live address minus link address
    pub bias: i64,
    /// First live address covered by the image's load segments
    pub start: Address,
    /// One past the last live address covered by the image's load segments
    pub end: Address,
    pub has_debug_info: bool,
    /// True for the image registered first (the running executable)
    pub primary: bool,
}

/// How the live position of an image is derived while parsing it.
#[derive(Debug, Clone, Copy)]
pub(crate) enum LoadAnchor
{
    /// Live address of the image's entry point (or of its load base when the
    /// file declares no entry point)
    Entry(Address),
    /// Load bias reported by the dynamic loader
    Bias(i64),
}

const DWARF_SECTIONS: &[(&str, &[&str])] = &[
    (".debug_abbrev", &[".debug_abbrev", "__debug_abbrev"]),
    (".debug_addr", &[".debug_addr", "__debug_addr"]),
    (".debug_aranges", &[".debug_aranges", "__debug_aranges"]),
    (".debug_info", &[".debug_info", "__debug_info"]),
    (".debug_line", &[".debug_line", "__debug_line"]),
    (".debug_line_str", &[".debug_line_str", "__debug_line_str"]),
    (".debug_ranges", &[".debug_ranges", "__debug_ranges"]),
    (".debug_rnglists", &[".debug_rnglists", "__debug_rnglists"]),
    (".debug_str", &[".debug_str", "__debug_str"]),
    (".debug_str_offsets", &[".debug_str_offsets", "__debug_str_offs"]),
    (".debug_types", &[".debug_types", "__debug_types"]),
    (".debug_loc", &[".debug_loc", "__debug_loc"]),
    (".debug_loclists", &[".debug_loclists", "__debug_loclists"]),
];

fn load_section_bytes(file: &object::File<'_>, names: &[&str]) -> ReflexResult<Arc<[u8]>>
{
    for name in names {
        if let Some(section) = file.section_by_name(name) {
            let data = section
                .uncompressed_data()
                .map_err(|err| ReflexError::InvalidImage(format!("failed to read {name}: {err}")))?;
            return Ok(match data {
                Cow::Borrowed(bytes) => Arc::<[u8]>::from(bytes.to_vec()),
                Cow::Owned(vec) => vec.into(),
            });
        }
    }

    Ok(Arc::<[u8]>::from(Vec::new()))
}

/// One loaded executable or shared object together with its debug
/// information and the caches that belong to it.
pub struct BinaryImage
{
    id: ImageId,
    path: PathBuf,
    architecture: Architecture,
    endian: RunTimeEndian,
    bias: i64,
    link_text_start: u64,
    /// Live `[start, end)` of the load segments
    runtime_range: (u64, u64),
    index_type_units: bool,
    debug_sections: HashMap<&'static str, Arc<[u8]>>,
    index_cache: OnceCell<DebugIndex>,
    type_cache: RwLock<EpochCache<TypeHandle>>,
    record_cache: RwLock<EpochCache<u64>>,
}

impl fmt::Debug for BinaryImage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("BinaryImage")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("architecture", &self.architecture)
            .field("bias", &self.bias)
            .field("runtime_range", &self.runtime_range)
            .finish_non_exhaustive()
    }
}

impl BinaryImage
{
    pub(crate) fn parse(path: PathBuf, anchor: LoadAnchor, index_type_units: bool) -> ReflexResult<Self>
    {
        let bytes = fs::read(&path)?;
        let file = object::File::parse(&*bytes)
            .map_err(|err| ReflexError::InvalidImage(format!("failed to parse {}: {err}", path.display())))?;

        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };
        let architecture = Architecture::from_object(file.architecture());

        let mut low = u64::MAX;
        let mut high = 0u64;
        for segment in file.segments() {
            if matches!(segment.name(), Ok(Some("__PAGEZERO"))) || segment.size() == 0 {
                continue;
            }
            let start = segment.address();
            low = low.min(start);
            high = high.max(start.saturating_add(segment.size()));
        }
        if low > high {
            return Err(ReflexError::InvalidImage(format!("{} has no load segments", path.display())));
        }

        let link_text_start = file
            .section_by_name(".text")
            .or_else(|| file.section_by_name("__text"))
            .map_or(low, |section| section.address());

        #[allow(clippy::cast_possible_wrap)]
        let bias = match anchor {
            LoadAnchor::Bias(bias) => bias,
            LoadAnchor::Entry(entry) if file.entry() != 0 => entry.value().wrapping_sub(file.entry()) as i64,
            LoadAnchor::Entry(base) => base.value().wrapping_sub(low) as i64,
        };

        let mut debug_sections = HashMap::new();
        for (canonical, aliases) in DWARF_SECTIONS {
            debug_sections.insert(*canonical, load_section_bytes(&file, aliases)?);
        }

        let runtime_range = (low.wrapping_add_signed(bias), high.wrapping_add_signed(bias));
        tracing::debug!(
            path = %path.display(),
            bias = format_args!("{bias:#x}"),
            start = format_args!("{:#x}", runtime_range.0),
            end = format_args!("{:#x}", runtime_range.1),
            "parsed image"
        );

        Ok(Self {
            id: ImageId::from_parts(&path, runtime_range.0),
            path,
            architecture,
            endian,
            bias,
            link_text_start,
            runtime_range,
            index_type_units,
            debug_sections,
            index_cache: OnceCell::new(),
            type_cache: RwLock::new(EpochCache::new()),
            record_cache: RwLock::new(EpochCache::new()),
        })
    }

    /// An image over in-memory debug sections, linked at 0 and loaded at `bias`.
    #[cfg(test)]
    pub(crate) fn from_sections(path: PathBuf, debug_sections: HashMap<&'static str, Arc<[u8]>>, bias: i64) -> Self
    {
        let start = 0u64.wrapping_add_signed(bias);
        Self {
            id: ImageId::from_parts(&path, start),
            path,
            architecture: Architecture::current(),
            endian: RunTimeEndian::Little,
            bias,
            link_text_start: 0x1000,
            runtime_range: (start, start + 0x10000),
            index_type_units: false,
            debug_sections,
            index_cache: OnceCell::new(),
            type_cache: RwLock::new(EpochCache::new()),
            record_cache: RwLock::new(EpochCache::new()),
        }
    }

    pub fn id(&self) -> ImageId
    {
        self.id
    }

    pub fn path(&self) -> &Path
    {
        &self.path
    }

    pub fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    pub fn bias(&self) -> i64
    {
        self.bias
    }

    pub fn pointer_size(&self) -> u8
    {
        self.architecture.pointer_size_bytes()
    }

    pub fn contains(&self, address: Address) -> bool
    {
        let addr = address.value();
        addr >= self.runtime_range.0 && addr < self.runtime_range.1
    }

    /// Link-time address for a live address inside this image.
    pub fn file_address(&self, address: Address) -> Option<u64>
    {
        if !self.contains(address) {
            return None;
        }
        Some(address.value().wrapping_add_signed(self.bias.wrapping_neg()))
    }

    /// Live address for a link-time address.
    pub fn relocate(&self, link_address: u64) -> Address
    {
        Address::relocate(link_address, self.bias)
    }

    /// Live address of the start of the image's code.
    pub fn text_start(&self) -> Address
    {
        self.relocate(self.link_text_start)
    }

    pub fn has_debug_info(&self) -> bool
    {
        self.debug_sections
            .get(".debug_info")
            .is_some_and(|data| !data.is_empty())
    }

    pub fn info(&self, primary: bool) -> ImageInfo
    {
        ImageInfo {
            id: self.id,
            path: self.path.clone(),
            architecture: self.architecture,
            bias: self.bias,
            start: Address::from(self.runtime_range.0),
            end: Address::from(self.runtime_range.1),
            has_debug_info: self.has_debug_info(),
            primary,
        }
    }

    /// The debug index, built on first use.
    pub fn index(&self) -> ReflexResult<&DebugIndex>
    {
        self.index_cache.get_or_try_init(|| {
            let index = DebugIndex::build(self.load_dwarf()?, self.index_type_units)?;
            tracing::debug!(
                path = %self.path.display(),
                units = index.unit_count(),
                functions = index.functions().len(),
                variables = index.variables().len(),
                "built debug index"
            );
            Ok(index)
        })
    }

    pub(crate) fn load_dwarf(&self) -> ReflexResult<OwnedDwarf>
    {
        Dwarf::load(|section| Ok::<_, gimli::Error>(self.section_reader(section)))
            .map_err(|err| map_dwarf_error("loading DWARF sections", err))
    }

    fn section_reader(&self, id: SectionId) -> OwnedReader
    {
        let key = match id {
            SectionId::DebugAbbrev => ".debug_abbrev",
            SectionId::DebugAddr => ".debug_addr",
            SectionId::DebugAranges => ".debug_aranges",
            SectionId::DebugInfo => ".debug_info",
            SectionId::DebugLine => ".debug_line",
            SectionId::DebugLineStr => ".debug_line_str",
            SectionId::DebugRanges => ".debug_ranges",
            SectionId::DebugRngLists => ".debug_rnglists",
            SectionId::DebugStr => ".debug_str",
            SectionId::DebugStrOffsets => ".debug_str_offsets",
            SectionId::DebugTypes => ".debug_types",
            SectionId::DebugLoc => ".debug_loc",
            SectionId::DebugLocLists => ".debug_loclists",
            _ => "",
        };

        let data = self
            .debug_sections
            .get(key)
            .cloned()
            .unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
        EndianArcSlice::new(data, self.endian)
    }

    /// Function names and source locations for a live address, innermost
    /// inlined frame first.
    pub fn symbolicate(&self, address: Address) -> Option<Symbolication>
    {
        let file_addr = self.file_address(address)?;
        let dwarf = self.load_dwarf().ok()?;
        let ctx = match Context::from_dwarf(dwarf) {
            Ok(ctx) => ctx,
            Err(err) => {
                tracing::debug!(path = %self.path.display(), error = %err, "failed to build addr2line context");
                return None;
            }
        };

        let mut frames = Vec::new();
        let Ok(mut frame_iter) = ctx.find_frames(file_addr).skip_all_loads() else {
            return None;
        };

        while let Ok(Some(frame)) = frame_iter.next() {
            let symbol_name = frame
                .function
                .as_ref()
                .and_then(|func| func.raw_name().ok())
                .map(|raw| make_symbol_name(raw.to_string()));
            let location = frame.location.and_then(|loc| {
                loc.file.map(|file| SourceLocation {
                    file: file.to_string(),
                    line: loc.line,
                    column: loc.column,
                })
            });

            if let Some(symbol) = symbol_name {
                frames.push(SymbolFrame { symbol, location });
            }
        }

        if frames.is_empty() {
            return None;
        }

        Some(Symbolication {
            image_id: self.id,
            frames,
        })
    }

    pub(crate) fn cached_type(&self, epoch: u64, name: &str) -> Option<TypeHandle>
    {
        self.type_cache.read().get(epoch, name)
    }

    /// Insert a resolved type, returning whichever handle won the race.
    pub(crate) fn cache_type(&self, epoch: u64, name: &str, handle: TypeHandle) -> TypeHandle
    {
        self.type_cache.write().insert(epoch, name, handle)
    }

    /// Link-time address of the first runtime record emitted for `name`.
    pub(crate) fn runtime_record_address(&self, epoch: u64, name: &str) -> ReflexResult<Option<u64>>
    {
        {
            let cache = self.record_cache.read();
            if cache.is_current(epoch) {
                return Ok(cache.get(epoch, name));
            }
        }

        let index = self.index()?;
        let mut records = HashMap::new();
        for record in index.runtime_types() {
            if record.address == 0 {
                continue;
            }
            records.entry(record.name.clone()).or_insert(record.address);
        }
        tracing::trace!(path = %self.path.display(), records = records.len(), "rebuilt runtime record map");

        let mut cache = self.record_cache.write();
        cache.replace(epoch, records);
        Ok(cache.get(epoch, name))
    }

    pub(crate) fn clear_caches(&self)
    {
        self.type_cache.write().clear();
        self.record_cache.write().clear();
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::symbols::fixture;

    #[test]
    fn test_relocation_round_trip()
    {
        let image = fixture::image();
        let live = image.relocate(fixture::ADD_ADDRESS);
        assert_eq!(live.value(), 0x10000 + fixture::ADD_ADDRESS);
        assert!(image.contains(live));
        assert_eq!(image.file_address(live), Some(fixture::ADD_ADDRESS));
        assert_eq!(image.file_address(Address::from(0x10)), None);
    }

    #[test]
    fn test_info_reports_debug_sections()
    {
        let image = fixture::image();
        let info = image.info(true);
        assert!(info.has_debug_info);
        assert!(info.primary);
        assert_eq!(info.bias, 0x10000);
        assert_eq!(info.start.value(), 0x10000);
    }

    #[test]
    fn test_index_is_built_once()
    {
        let image = fixture::image();
        let first = image.index().unwrap() as *const DebugIndex;
        let second = image.index().unwrap() as *const DebugIndex;
        assert_eq!(first, second);
    }

    #[test]
    fn test_runtime_record_map_skips_missing_names()
    {
        let image = fixture::image();
        assert_eq!(image.runtime_record_address(1, "demo::Point").unwrap(), Some(fixture::VTABLE_ADDRESS));
        assert_eq!(image.runtime_record_address(1, "demo::Node").unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_non_object_files()
    {
        let path = std::env::temp_dir().join("reflex-not-an-object");
        std::fs::write(&path, b"definitely not ELF").unwrap();
        let err = BinaryImage::parse(path.clone(), LoadAnchor::Bias(0), false).unwrap_err();
        assert!(matches!(err, ReflexError::InvalidImage(_)));
        let _ = std::fs::remove_file(path);
    }
}
