//! Symbol demangling utilities.
//!
//! This module turns linkage names into [`SymbolName`]s and detects their
//! programming language. It handles Rust, C++, and C symbols.
//!
//! ## Language Detection
//!
//! - Rust symbols: v0 names (`_R`), legacy `_ZN` names ending in rustc's
//!   `17h<hash>E` segment, or anything containing `::`
//! - C++ symbols: any other `_Z` name (Itanium mangling)
//! - C symbols: plain identifiers
//! - Everything else is unknown

use rustc_demangle::try_demangle;

use crate::error::ReflexError;
use crate::types::{SymbolLanguage, SymbolName};

/// Create a `SymbolName` from a raw mangled symbol string.
///
/// The demangled form drops the trailing hash (`::h0123...`) so it can be
/// compared against the qualified names found in debug info.
pub(crate) fn make_symbol_name(raw: String) -> SymbolName
{
    let demangled = try_demangle(&raw).ok().map(|d| format!("{d:#}"));
    let language = if is_rust_mangled(&raw, demangled.is_some()) || raw.contains("::") {
        SymbolLanguage::Rust
    } else if raw.starts_with("_Z") {
        SymbolLanguage::Cpp
    } else if is_c_identifier(&raw) {
        SymbolLanguage::C
    } else {
        SymbolLanguage::Unknown
    };

    SymbolName::new(raw, demangled, language)
}

fn is_rust_mangled(raw: &str, demangles: bool) -> bool
{
    if !demangles {
        return false;
    }
    if raw.starts_with("_R") {
        return true;
    }
    // LLVM may append `.llvm.<n>` style suffixes.
    let raw = raw.split_once('.').map_or(raw, |(head, _)| head);
    let bytes = raw.as_bytes();
    let Some(tail) = bytes.len().checked_sub(20).and_then(|start| bytes.get(start..)) else {
        return false;
    };
    raw.starts_with("_ZN")
        && tail.starts_with(b"17h")
        && tail.ends_with(b"E")
        && tail[3..19].iter().all(u8::is_ascii_hexdigit)
}

fn is_c_identifier(raw: &str) -> bool
{
    let mut chars = raw.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Extract the implementing type from a Rust vtable name.
///
/// `<alloc::string::String as core::fmt::Display>::{vtable}` yields
/// `alloc::string::String`. Returns `None` for anything else.
pub(crate) fn vtable_owner(name: &str) -> Option<&str>
{
    let inner = name.strip_suffix("::{vtable}")?.strip_prefix('<')?.strip_suffix('>')?;
    // Generic arguments may contain " as " themselves, split on the last one.
    let (owner, _trait) = inner.rsplit_once(" as ")?;
    Some(owner)
}

/// True when `candidate` names `wanted`, tolerating a leading `::` on either.
pub(crate) fn names_match(candidate: &str, wanted: &str) -> bool
{
    candidate == wanted || candidate.strip_prefix("::") == Some(wanted) || wanted.strip_prefix("::") == Some(candidate)
}

/// Map a gimli DWARF error to a `ReflexError` with context.
///
/// `context` describes the operation that was being performed (e.g.,
/// "parsing .debug_info").
pub(crate) fn map_dwarf_error(context: &str, err: gimli::Error) -> ReflexError
{
    ReflexError::Dwarf(format!("{context}: {err}"))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_make_symbol_name_rust_legacy()
    {
        let symbol = make_symbol_name("_ZN4core3fmt5write17h0123456789abcdefE".to_string());
        assert_eq!(symbol.language(), SymbolLanguage::Rust);
        assert_eq!(symbol.demangled(), Some("core::fmt::write"));
        assert_eq!(symbol.display_name(), "core::fmt::write");
    }

    #[test]
    fn test_itanium_names_without_rust_hash_are_cpp()
    {
        assert_eq!(make_symbol_name("_ZN3foo3barEv".to_string()).language(), SymbolLanguage::Cpp);
        assert_eq!(make_symbol_name("_ZN3foo5countE".to_string()).language(), SymbolLanguage::Cpp);
        assert_eq!(
            make_symbol_name("_ZN4core3fmt5write17h0123456789abcdefE.llvm.42".to_string()).language(),
            SymbolLanguage::Rust
        );
    }

    #[test]
    fn test_make_symbol_name_c()
    {
        let symbol = make_symbol_name("introspect_add".to_string());
        assert_eq!(symbol.language(), SymbolLanguage::C);
        assert_eq!(symbol.demangled(), None);
        assert_eq!(symbol.display_name(), "introspect_add");
    }

    #[test]
    fn test_vtable_owner()
    {
        assert_eq!(
            vtable_owner("<alloc::string::String as core::fmt::Display>::{vtable}"),
            Some("alloc::string::String")
        );
        assert_eq!(
            vtable_owner("<core::option::Option<u8> as core::fmt::Debug>::{vtable}"),
            Some("core::option::Option<u8>")
        );
        assert_eq!(vtable_owner("alloc::string::String"), None);
    }

    #[test]
    fn test_names_match()
    {
        assert!(names_match("::crate::f", "crate::f"));
        assert!(names_match("crate::f", "::crate::f"));
        assert!(names_match("crate::f", "crate::f"));
        assert!(!names_match("crate::g", "crate::f"));
    }
}
