//! Module enumeration through the dyld image list.
//!
//! dyld reports each image's path and slide. Segment bounds come from the
//! image file itself; images that only live in the shared cache have no file
//! on disk and are reported without segments.

use std::ffi::CStr;
use std::fs;
use std::path::{Path, PathBuf};

use object::{Object, ObjectSegment};

use super::{LoadedModule, LoadedSegment, SegmentKind};
use crate::error::{ReflexError, ReflexResult};
use crate::types::Address;

fn segment_kind(name: &str) -> Option<SegmentKind>
{
    match name {
        "__TEXT" => Some(SegmentKind::Text),
        "__DATA_CONST" => Some(SegmentKind::Relro),
        "__DATA" | "__DATA_DIRTY" => Some(SegmentKind::Data),
        "__PAGEZERO" => None,
        _ => Some(SegmentKind::ReadOnly),
    }
}

fn file_segments(path: &Path, bias: i64) -> Vec<LoadedSegment>
{
    let Ok(bytes) = fs::read(path) else {
        tracing::trace!(path = %path.display(), "image has no file on disk");
        return Vec::new();
    };
    let Ok(file) = object::File::parse(&*bytes) else {
        tracing::warn!(path = %path.display(), "failed to parse image for segment bounds");
        return Vec::new();
    };

    file.segments()
        .filter_map(|segment| {
            let kind = segment_kind(segment.name().ok().flatten()?)?;
            Some(LoadedSegment {
                start: Address::relocate(segment.address(), bias),
                size: segment.size(),
                kind,
            })
        })
        .collect()
}

pub(super) fn loaded_modules() -> ReflexResult<Vec<LoadedModule>>
{
    // SAFETY: the dyld image list functions have no preconditions; indices
    // below the count are valid.
    let count = unsafe { libc::_dyld_image_count() };
    let mut modules = Vec::with_capacity(count as usize);

    for index in 0..count {
        let name = unsafe { libc::_dyld_get_image_name(index) };
        let header = unsafe { libc::_dyld_get_image_header(index) };
        #[allow(clippy::cast_possible_truncation)]
        let bias = unsafe { libc::_dyld_get_image_vmaddr_slide(index) } as i64;

        let path = if name.is_null() {
            None
        } else {
            let raw = unsafe { CStr::from_ptr(name) }.to_string_lossy();
            (!raw.is_empty()).then(|| PathBuf::from(raw.as_ref()))
        };
        let segments = path.as_deref().map(|path| file_segments(path, bias)).unwrap_or_default();

        modules.push(LoadedModule {
            path,
            base: Address::from(header.cast::<u8>()),
            bias,
            primary: index == 0,
            segments,
        });
    }

    if modules.is_empty() {
        return Err(ReflexError::NotSupported("dyld reported no images".into()));
    }
    Ok(modules)
}

/// dyld does not expose the entry address; callers anchor the executable by
/// its slide instead.
pub(super) fn primary_entry_point() -> ReflexResult<Address>
{
    Err(ReflexError::NotSupported("entry point lookup through dyld".into()))
}
