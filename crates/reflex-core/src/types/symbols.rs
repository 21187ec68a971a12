//! Linkage names and source positions.
//!
//! Debug information records a function twice: once by its qualified source
//! name (`demo::math::add`) and, when the compiler mangled it, once by the
//! name the linker sees. The linkage name is what tells a Rust function
//! apart from an `extern "C"` one, so it decides how a call is lowered.
//!
//! ```rust
//! use reflex_core::types::{SymbolLanguage, SymbolName};
//!
//! let linkage = SymbolName::new(
//!     "_ZN4demo4math3add17h0123456789abcdefE".to_string(),
//!     Some("demo::math::add".to_string()),
//!     SymbolLanguage::Rust,
//! );
//! assert!(linkage.is_rust());
//! assert_eq!(linkage.to_string(), "demo::math::add");
//! ```

use std::fmt;

/// Which compiler mangling scheme produced a linkage name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolLanguage
{
    /// rustc legacy (`_ZN..17h<hash>E`) or v0 (`_R`) mangling; called with
    /// the Rust ABI.
    Rust,
    /// Itanium mangling from a C++ compiler.
    Cpp,
    /// An unmangled identifier, as produced by `extern "C"` and `#[no_mangle]`.
    C,
    Unknown,
}

impl fmt::Display for SymbolLanguage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(match self {
            SymbolLanguage::Rust => "rust",
            SymbolLanguage::Cpp => "c++",
            SymbolLanguage::C => "c",
            SymbolLanguage::Unknown => "unknown",
        })
    }
}

/// The `DW_AT_linkage_name` of a function, with its demangled form.
///
/// The demangled form omits rustc's trailing hash so it compares equal to
/// the qualified names the index stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolName
{
    raw: String,
    demangled: Option<String>,
    language: SymbolLanguage,
}

impl SymbolName
{
    pub fn new(raw: String, demangled: Option<String>, language: SymbolLanguage) -> Self
    {
        Self {
            raw,
            demangled,
            language,
        }
    }

    /// The name as written in the symbol table.
    pub fn raw(&self) -> &str
    {
        &self.raw
    }

    pub fn demangled(&self) -> Option<&str>
    {
        self.demangled.as_deref()
    }

    /// Demangled name when there is one, otherwise the raw name.
    pub fn display_name(&self) -> &str
    {
        self.demangled().unwrap_or(&self.raw)
    }

    pub fn language(&self) -> SymbolLanguage
    {
        self.language
    }

    /// Whether rustc mangled this name, which means the function uses the
    /// Rust calling convention rather than the C one.
    pub fn is_rust(&self) -> bool
    {
        self.language == SymbolLanguage::Rust
    }
}

impl fmt::Display for SymbolName
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.display_name())
    }
}

/// File and line an address was compiled from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation
{
    /// Path as recorded by the line program
    pub file: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl fmt::Display for SourceLocation
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(&self.file)?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
            if let Some(column) = self.column {
                write!(f, ":{column}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_source_location_display()
    {
        let mut location = SourceLocation {
            file: "src/lib.rs".to_string(),
            line: Some(12),
            column: Some(5),
        };
        assert_eq!(location.to_string(), "src/lib.rs:12:5");
        location.column = None;
        assert_eq!(location.to_string(), "src/lib.rs:12");
        location.line = None;
        location.column = Some(5);
        assert_eq!(location.to_string(), "src/lib.rs");
    }

    #[test]
    fn test_unmangled_names_display_raw()
    {
        let name = SymbolName::new("introspect_add".to_string(), None, SymbolLanguage::C);
        assert!(!name.is_rust());
        assert_eq!(name.to_string(), "introspect_add");
    }
}
