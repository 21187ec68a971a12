//! # reflex-core
//!
//! Self-introspection for a running Rust process, backed by the DWARF debug
//! information embedded in its own image.
//!
//! This crate provides:
//! - Enumeration of globals, type names and functions described by debug info
//! - Type resolution with a per-image cache that survives across lookups
//! - Function signature derivation from `DW_TAG_formal_parameter` entries
//! - Dynamic invocation of functions by name through a C ABI call emulator
//! - Registration of additional images (plugins) already mapped by the loader
//!
//! ## Platform Support
//!
//! - **Linux**: module enumeration through `dl_iterate_phdr`, entry point via `getauxval`
//! - **macOS**: module enumeration through the dyld image list
//! - **Calls**: x86-64 System V and AArch64 (AAPCS64)
//!
//! ## Why unsafe code is needed
//!
//! Introspection reads live process memory (globals, slice buffers) and
//! invocation jumps to an address discovered at runtime. Neither can be
//! expressed in safe Rust. The unsafe surface is kept to [`Value::set`],
//! [`Callable::call`] and [`Assembly::call_function`], where the caller
//! vouches for the debug information matching the running code.
//!
//! ## Example
//!
//! ```rust,no_run
//! use reflex_core::Assembly;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>>
//! {
//!     let assembly = Assembly::open()?;
//!     assembly.for_each_function(|name, entry| {
//!         println!("{entry} {name}");
//!         true
//!     })?;
//!     Ok(())
//! }
//! ```

#![allow(unsafe_code)] // Required for live memory access and indirect calls

pub mod assembly;
pub mod catalog;
pub mod config;
pub mod error;
pub mod invoke;
pub mod module;
pub mod platform;
pub mod prelude;
pub mod registry;
pub mod resolve;
pub mod symbols;
pub mod types;
pub mod value;

pub use assembly::{Assembly, TypeNames};
pub use catalog::FunctionDescriptor;
pub use config::AssemblyConfig;
pub use error::{ReflexError, ReflexResult};
pub use invoke::{CallingConvention, Callable, FunctionType};
pub use resolve::{ArgumentDescriptor, RuntimeRecord, TypeHandle, TypeKind};
pub use symbols::{ImageId, ImageInfo, SymbolFrame, Symbolication};
pub use types::Address;
pub use value::{Primitive, Value};
