//! Common module for library exports

pub use crate::assembly::{Assembly, TypeNames};
pub use crate::config::AssemblyConfig;
pub use crate::error::{ReflexError, ReflexResult};
pub use crate::invoke::{CallingConvention, Callable, FunctionType};
pub use crate::resolve::{TypeHandle, TypeKind};
pub use crate::types::address::Address;
pub use crate::value::{Primitive, Value};
