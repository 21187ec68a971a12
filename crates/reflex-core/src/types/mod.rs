//! # Types
//!
//! Small value types shared by every component: live addresses, symbol
//! names and the host architecture.

pub mod address;
pub mod symbols;

pub use address::Address;
pub use symbols::{SourceLocation, SymbolLanguage, SymbolName};

/// CPU architecture of a loaded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture
{
    /// 64-bit ARM (AArch64)
    Arm64,
    /// 64-bit x86 (Intel/AMD)
    X86_64,
    /// Any other architecture
    ///
    /// The `&'static str` contains the architecture name (e.g., "riscv64").
    /// Images of these architectures can be introspected but not called into.
    Unknown(&'static str),
}

impl Architecture
{
    /// Architecture of the running process.
    ///
    /// ```rust
    /// use reflex_core::types::Architecture;
    ///
    /// let arch = Architecture::current();
    /// assert_eq!(arch.pointer_size_bytes() as usize, std::mem::size_of::<usize>());
    /// ```
    pub const fn current() -> Self
    {
        #[cfg(target_arch = "aarch64")]
        {
            Architecture::Arm64
        }

        #[cfg(target_arch = "x86_64")]
        {
            Architecture::X86_64
        }

        #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
        {
            Architecture::Unknown(std::env::consts::ARCH)
        }
    }

    /// Size of a pointer in bytes for this architecture.
    pub const fn pointer_size_bytes(self) -> u8
    {
        match self {
            Architecture::Arm64 | Architecture::X86_64 => 8,
            #[allow(clippy::cast_possible_truncation)]
            Architecture::Unknown(_) => std::mem::size_of::<usize>() as u8,
        }
    }

    pub(crate) fn from_object(arch: object::Architecture) -> Self
    {
        match arch {
            object::Architecture::Aarch64 => Architecture::Arm64,
            object::Architecture::X86_64 => Architecture::X86_64,
            _ => Architecture::Unknown("unknown"),
        }
    }
}

impl std::fmt::Display for Architecture
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        match self {
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::Unknown(name) => write!(f, "{name}"),
        }
    }
}
