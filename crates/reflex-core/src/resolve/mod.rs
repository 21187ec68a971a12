//! # Resolution
//!
//! Turning debug information entries into runtime descriptions.
//!
//! - [`types`]: type entries to [`TypeHandle`]s, cached per image
//! - [`signature`]: subprogram entries to ordered input/output lists

pub mod signature;
pub mod types;

pub use signature::{ArgumentDescriptor, Signature};
pub use types::{Field, TypeHandle, TypeKind, TypeResolver, Variant};

pub use crate::module::RuntimeRecord;
