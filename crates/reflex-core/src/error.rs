//! # Error Types
//!
//! General error handling for introspection and invocation.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for reflex operations
///
/// ## Error Categories
///
/// 1. **Lookup errors**: NotFound
/// 2. **Shape errors**: NotSupported (missing debug-info shape, unsupported ABI)
/// 3. **Registry errors**: TooManyImages, AlreadyLoaded, Closed
/// 4. **Call-site errors**: LengthMismatch, TypeMismatch
/// 5. **Wrapped resolution errors**: Signature
/// 6. **Input errors**: Dwarf, InvalidImage, InvalidValue, Io
#[derive(Error, Debug)]
pub enum ReflexError
{
    /// A function, type, global, plugin or module with this name does not exist
    ///
    /// `kind` names what was being looked up ("function", "type", "global",
    /// "plugin", "module", "image").
    #[error("{kind} not found: {name}")]
    NotFound
    {
        /// What kind of entity was looked up
        kind: &'static str,
        /// The name (or address) that was looked up
        name: String,
    },

    /// A required debug-info shape or ABI feature is not available
    ///
    /// Examples:
    /// - A formal parameter without a `DW_AT_type`
    /// - A module record without a type table
    /// - An aggregate argument larger than two register words
    /// - An architecture without a call emulator
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Registering another image would exceed the configured maximum
    #[error("Number of loaded images exceeds maximum of {max}")]
    TooManyImages
    {
        /// Configured maximum number of images
        max: usize,
    },

    /// The primary image was already loaded
    ///
    /// `load_initial` may only be called on an empty registry.
    #[error("Primary image already loaded: {}", .0.display())]
    AlreadyLoaded(PathBuf),

    /// The assembly was closed and can no longer be used
    #[error("Assembly is closed")]
    Closed,

    /// The number of call-site arguments does not match the signature
    ///
    /// `index` is the first offending argument position: the first surplus
    /// argument, or the first missing one.
    #[error("Argument count mismatch at index {index}: signature accepts {expected} input(s)")]
    LengthMismatch
    {
        /// Offending argument index
        index: usize,
        /// Number of declared inputs
        expected: usize,
    },

    /// A call-site argument is not assignable to the declared parameter type
    #[error("Type mismatch at index {index} ({name}): expected {expected}, found {actual}")]
    TypeMismatch
    {
        /// Offending argument index
        index: usize,
        /// Declared parameter name
        name: String,
        /// Declared parameter type name
        expected: String,
        /// Actual argument type name
        actual: String,
    },

    /// Resolving a function signature failed
    ///
    /// Wraps the underlying error with the function and, when the failure is
    /// tied to one formal parameter, its position and name.
    #[error("Failed to resolve signature of {function}{}: {source}", describe_parameter(.index, .parameter))]
    Signature
    {
        /// Qualified function name
        function: String,
        /// Formal parameter position, if the failure is parameter specific
        index: Option<usize>,
        /// Formal parameter name, if known
        parameter: Option<String>,
        /// Underlying cause
        #[source]
        source: Box<ReflexError>,
    },

    /// DWARF data could not be read
    #[error("DWARF error: {0}")]
    Dwarf(String),

    /// The object file could not be parsed
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// A value could not be read, written or converted
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// I/O error (for reading image files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReflexError
{
    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self
    {
        ReflexError::NotFound { kind, name: name.into() }
    }

    /// True for [`ReflexError::NotFound`], regardless of kind.
    #[must_use]
    pub fn is_not_found(&self) -> bool
    {
        matches!(self, ReflexError::NotFound { .. })
    }
}

#[allow(clippy::ref_option)]
fn describe_parameter(index: &Option<usize>, parameter: &Option<String>) -> String
{
    match (index, parameter.as_deref()) {
        (Some(index), Some(name)) => format!(" (parameter {index} `{name}`)"),
        (Some(index), None) => format!(" (parameter {index})"),
        (None, Some(name)) => format!(" (parameter `{name}`)"),
        (None, None) => String::new(),
    }
}

/// Convenience type alias for `Result<T, ReflexError>`
///
/// ```rust
/// use reflex_core::error::ReflexResult;
/// fn foo() -> ReflexResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type ReflexResult<T> = std::result::Result<T, ReflexError>;
