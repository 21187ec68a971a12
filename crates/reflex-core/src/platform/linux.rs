//! Module enumeration through the ELF dynamic loader.

use std::ffi::CStr;
use std::os::raw::{c_int, c_void};
use std::path::PathBuf;

use libc::{dl_phdr_info, size_t};

use super::{LoadedModule, LoadedSegment, SegmentKind};
use crate::error::{ReflexError, ReflexResult};
use crate::types::Address;

struct Collector
{
    modules: Vec<LoadedModule>,
    current_exe: Option<PathBuf>,
}

unsafe extern "C" fn visit(info: *mut dl_phdr_info, _size: size_t, data: *mut c_void) -> c_int
{
    // SAFETY: `data` is the `Collector` passed to `dl_iterate_phdr` below and
    // `info` is valid for the duration of the callback.
    let collector = unsafe { &mut *data.cast::<Collector>() };
    let info = unsafe { &*info };
    let primary = collector.modules.is_empty();

    let name = if info.dlpi_name.is_null() {
        None
    } else {
        let raw = unsafe { CStr::from_ptr(info.dlpi_name) };
        let raw = raw.to_string_lossy();
        (!raw.is_empty()).then(|| PathBuf::from(raw.as_ref()))
    };
    // The executable is reported with an empty name.
    let path = if primary { name.or_else(|| collector.current_exe.clone()) } else { name };

    #[allow(clippy::cast_possible_wrap)]
    let bias = info.dlpi_addr as i64;
    let headers = if info.dlpi_phdr.is_null() {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(info.dlpi_phdr, usize::from(info.dlpi_phnum)) }
    };

    let mut segments = Vec::new();
    for header in headers {
        let kind = match header.p_type {
            libc::PT_LOAD if header.p_flags & libc::PF_X != 0 => SegmentKind::Text,
            libc::PT_LOAD if header.p_flags & libc::PF_W != 0 => SegmentKind::Data,
            libc::PT_LOAD => SegmentKind::ReadOnly,
            libc::PT_GNU_RELRO => SegmentKind::Relro,
            _ => continue,
        };
        segments.push(LoadedSegment {
            start: Address::relocate(header.p_vaddr, bias),
            size: header.p_memsz,
            kind,
        });
    }

    let base = segments
        .iter()
        .filter(|segment| segment.kind != SegmentKind::Relro)
        .map(|segment| segment.start)
        .min()
        .unwrap_or(Address::ZERO);

    collector.modules.push(LoadedModule {
        path,
        base,
        bias,
        primary,
        segments,
    });
    0
}

pub(super) fn loaded_modules() -> ReflexResult<Vec<LoadedModule>>
{
    let mut collector = Collector {
        modules: Vec::new(),
        current_exe: std::env::current_exe().ok(),
    };
    // SAFETY: the callback only touches the collector for the duration of the call.
    unsafe {
        libc::dl_iterate_phdr(Some(visit), std::ptr::addr_of_mut!(collector).cast::<c_void>());
    }
    tracing::trace!(modules = collector.modules.len(), "enumerated loaded modules");
    Ok(collector.modules)
}

pub(super) fn primary_entry_point() -> ReflexResult<Address>
{
    // SAFETY: getauxval has no preconditions.
    let entry = unsafe { libc::getauxval(libc::AT_ENTRY) };
    if entry == 0 {
        return Err(ReflexError::NotSupported("AT_ENTRY is not present in the auxiliary vector".into()));
    }
    Ok(Address::from(entry))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_primary_module_comes_first()
    {
        let modules = loaded_modules().unwrap();
        assert!(!modules.is_empty());
        assert!(modules[0].primary);
        assert!(modules.iter().skip(1).all(|module| !module.primary));
        assert!(modules[0].segments.iter().any(|segment| segment.kind == SegmentKind::Text));
    }

    #[test]
    fn test_entry_point_is_inside_primary_text()
    {
        let entry = primary_entry_point().unwrap();
        let modules = loaded_modules().unwrap();
        let primary = &modules[0];
        assert!(primary
            .segments
            .iter()
            .any(|segment| segment.kind == SegmentKind::Text && segment.start <= entry && entry < segment.end()));
    }
}
