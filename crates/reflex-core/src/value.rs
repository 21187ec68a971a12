//! # Values
//!
//! A [`Value`] pairs a [`TypeHandle`] with storage: either bytes owned by the
//! value, or the live address of a global in this process.
//!
//! Rust primitives convert in and out through the sealed [`Primitive`]
//! trait. Slices of primitives become fat pointers (`data_ptr`, `length`)
//! whose element buffer is owned by the value and lives as long as any clone
//! of it.
//!
//! ```rust
//! use reflex_core::Value;
//!
//! let value = Value::new(42i64);
//! assert_eq!(value.ty().name(), "i64");
//! assert_eq!(value.get::<i64>().unwrap(), 42);
//! ```

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::{ReflexError, ReflexResult};
use crate::resolve::{TypeHandle, TypeKind};
use crate::types::Address;

type Bytes = SmallVec<[u8; 16]>;

mod sealed
{
    pub trait Sealed {}
}

/// Rust primitive types that map onto debug-info base types
pub trait Primitive: sealed::Sealed + Copy + Send + Sync + 'static
{
    /// Base type name as compilers emit it
    const NAME: &'static str;
    /// Size in bytes
    const SIZE: usize;

    fn kind() -> TypeKind;

    fn to_ne_bytes_vec(self) -> Bytes;

    /// Decode from exactly `SIZE` native-endian bytes.
    fn from_ne_slice(bytes: &[u8]) -> Option<Self>;

    fn type_handle() -> TypeHandle
    {
        TypeHandle::synthetic(Self::NAME, Self::kind(), Self::SIZE as u64)
    }
}

macro_rules! impl_primitive {
    ($($ty:ty => $kind:expr),* $(,)?) => {
        $(
            impl sealed::Sealed for $ty {}

            impl Primitive for $ty
            {
                const NAME: &'static str = stringify!($ty);
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn kind() -> TypeKind
                {
                    $kind
                }

                fn to_ne_bytes_vec(self) -> Bytes
                {
                    Bytes::from_slice(&self.to_ne_bytes())
                }

                fn from_ne_slice(bytes: &[u8]) -> Option<Self>
                {
                    Some(<$ty>::from_ne_bytes(bytes.try_into().ok()?))
                }
            }
        )*
    };
}

impl_primitive! {
    i8 => TypeKind::Int { signed: true },
    i16 => TypeKind::Int { signed: true },
    i32 => TypeKind::Int { signed: true },
    i64 => TypeKind::Int { signed: true },
    isize => TypeKind::Int { signed: true },
    u8 => TypeKind::Int { signed: false },
    u16 => TypeKind::Int { signed: false },
    u32 => TypeKind::Int { signed: false },
    u64 => TypeKind::Int { signed: false },
    usize => TypeKind::Int { signed: false },
    f32 => TypeKind::Float,
    f64 => TypeKind::Float,
}

impl sealed::Sealed for bool {}

impl Primitive for bool
{
    const NAME: &'static str = "bool";
    const SIZE: usize = 1;

    fn kind() -> TypeKind
    {
        TypeKind::Bool
    }

    fn to_ne_bytes_vec(self) -> Bytes
    {
        Bytes::from_slice(&[u8::from(self)])
    }

    fn from_ne_slice(bytes: &[u8]) -> Option<Self>
    {
        match bytes {
            [0] => Some(false),
            [1] => Some(true),
            _ => None,
        }
    }
}

impl sealed::Sealed for char {}

impl Primitive for char
{
    const NAME: &'static str = "char";
    const SIZE: usize = 4;

    fn kind() -> TypeKind
    {
        TypeKind::Char
    }

    fn to_ne_bytes_vec(self) -> Bytes
    {
        Bytes::from_slice(&u32::from(self).to_ne_bytes())
    }

    fn from_ne_slice(bytes: &[u8]) -> Option<Self>
    {
        char::from_u32(u32::from_ne_bytes(bytes.try_into().ok()?))
    }
}

#[derive(Clone)]
enum Storage
{
    Owned(Bytes),
    Memory(Address),
}

/// A typed value
#[derive(Clone)]
pub struct Value
{
    ty: TypeHandle,
    storage: Storage,
    // Owns the packed elements a slice value's data pointer refers to. Never
    // read; dropping it while the value lives would leave that pointer dangling.
    #[allow(dead_code)]
    keepalive: Option<Arc<[u64]>>,
}

fn slice_handle(element: &TypeHandle) -> TypeHandle
{
    TypeHandle::synthetic(
        format!("&[{}]", element.name()),
        TypeKind::Slice {
            element: element.clone(),
        },
        16,
    )
}

fn fat_pointer(data: Address, len: usize) -> Bytes
{
    let mut bytes = Bytes::new();
    bytes.extend_from_slice(&data.value().to_ne_bytes());
    bytes.extend_from_slice(&(len as u64).to_ne_bytes());
    bytes
}

impl Value
{
    /// Wrap a Rust primitive.
    pub fn new<T: Primitive>(value: T) -> Self
    {
        Self {
            ty: T::type_handle(),
            storage: Storage::Owned(value.to_ne_bytes_vec()),
            keepalive: None,
        }
    }

    /// Copy `values` into an owned buffer and reference it as `&[T]`.
    pub fn slice<T: Primitive>(values: &[T]) -> Self
    {
        let items: Vec<Bytes> = values.iter().map(|value| value.to_ne_bytes_vec()).collect();
        Self::pack(&T::type_handle(), &items)
    }

    /// Pack values of one element type into a slice value.
    pub fn pack_slice(element: &TypeHandle, items: &[Value]) -> ReflexResult<Self>
    {
        let mut packed = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if !item.ty.is_assignable_to(element) {
                return Err(ReflexError::InvalidValue(format!(
                    "slice element {index} is {}, expected {}",
                    item.ty, element
                )));
            }
            packed.push(Bytes::from_slice(&item.bytes()));
        }
        Ok(Self::pack(element, &packed))
    }

    fn pack(element: &TypeHandle, items: &[Bytes]) -> Self
    {
        let stride = usize::try_from(element.size()).unwrap_or(0);
        let total = stride * items.len();
        if total == 0 {
            let dangling = std::ptr::NonNull::<u64>::dangling();
            return Self {
                ty: slice_handle(element),
                storage: Storage::Owned(fat_pointer(Address::from(dangling.as_ptr().cast_const()), items.len())),
                keepalive: None,
            };
        }

        // u64 words keep the buffer 8-byte aligned for every primitive.
        let mut words = vec![0u64; total.div_ceil(8)];
        {
            // SAFETY: the byte view covers exactly the allocation of `words`.
            let buffer = unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), words.len() * 8) };
            for (i, item) in items.iter().enumerate() {
                buffer[i * stride..i * stride + item.len().min(stride)].copy_from_slice(&item[..item.len().min(stride)]);
            }
        }
        let words: Arc<[u64]> = words.into();
        let data = Address::from(words.as_ptr());

        Self {
            ty: slice_handle(element),
            storage: Storage::Owned(fat_pointer(data, items.len())),
            keepalive: Some(words),
        }
    }

    /// A value of type `ty` from its raw bytes.
    pub fn from_bytes(ty: TypeHandle, bytes: &[u8]) -> ReflexResult<Self>
    {
        if bytes.len() as u64 != ty.size() {
            return Err(ReflexError::InvalidValue(format!(
                "{} bytes given for {} ({} bytes)",
                bytes.len(),
                ty,
                ty.size()
            )));
        }
        Ok(Self {
            ty,
            storage: Storage::Owned(Bytes::from_slice(bytes)),
            keepalive: None,
        })
    }

    /// A view of live memory at `address`.
    pub(crate) fn from_address(ty: TypeHandle, address: Address) -> Self
    {
        Self {
            ty,
            storage: Storage::Memory(address),
            keepalive: None,
        }
    }

    pub fn ty(&self) -> &TypeHandle
    {
        &self.ty
    }

    /// Live address for memory-backed values (globals).
    pub fn address(&self) -> Option<Address>
    {
        match self.storage {
            Storage::Memory(address) => Some(address),
            Storage::Owned(_) => None,
        }
    }

    /// Current contents; reads process memory for memory-backed values.
    pub fn bytes(&self) -> Cow<'_, [u8]>
    {
        match &self.storage {
            Storage::Owned(bytes) => Cow::Borrowed(bytes),
            Storage::Memory(address) => {
                let len = usize::try_from(self.ty.size()).unwrap_or(0);
                if len == 0 {
                    return Cow::Borrowed(&[]);
                }
                // SAFETY: the address comes from the image's debug information
                // for a static of `len` bytes.
                let live = unsafe { std::slice::from_raw_parts(address.as_ptr::<u8>(), len) };
                Cow::Owned(live.to_vec())
            }
        }
    }

    fn check<T: Primitive>(&self) -> ReflexResult<()>
    {
        if self.ty.size() != T::SIZE as u64 || !self.ty.kind().same_shape(&T::kind()) {
            return Err(ReflexError::InvalidValue(format!("{} cannot be read as {}", self.ty, T::NAME)));
        }
        Ok(())
    }

    /// Read the value as a Rust primitive of the same shape and size.
    pub fn get<T: Primitive>(&self) -> ReflexResult<T>
    {
        self.check::<T>()?;
        T::from_ne_slice(&self.bytes())
            .ok_or_else(|| ReflexError::InvalidValue(format!("invalid bit pattern for {}", T::NAME)))
    }

    /// Overwrite a memory-backed value.
    ///
    /// # Safety
    ///
    /// The value must describe live, writable memory of its type, and no
    /// other code may be accessing it concurrently.
    pub unsafe fn set<T: Primitive>(&self, value: T) -> ReflexResult<()>
    {
        self.check::<T>()?;
        let Storage::Memory(address) = self.storage else {
            return Err(ReflexError::InvalidValue(format!("{} value is not backed by process memory", self.ty)));
        };
        let bytes = value.to_ne_bytes_vec();
        // SAFETY: upheld by the caller.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), address.as_mut_ptr::<u8>(), bytes.len()) };
        Ok(())
    }

    /// Copy out the elements a slice value points at.
    ///
    /// # Safety
    ///
    /// The data pointer and length must describe live elements of type `T`.
    /// Always holds for slices built by [`Value::slice`] and
    /// [`Value::pack_slice`].
    pub unsafe fn read_slice<T: Primitive>(&self) -> ReflexResult<Vec<T>>
    {
        let Some(element) = self.ty.slice_element() else {
            return Err(ReflexError::InvalidValue(format!("{} is not a slice", self.ty)));
        };
        if element.size() != T::SIZE as u64 || !element.kind().same_shape(&T::kind()) {
            return Err(ReflexError::InvalidValue(format!("{} elements cannot be read as {}", element, T::NAME)));
        }

        let (data, len) = self.fat_pointer()?;
        if len == 0 {
            return Ok(Vec::new());
        }
        // SAFETY: upheld by the caller.
        let raw = unsafe { std::slice::from_raw_parts(data.as_ptr::<u8>(), len * T::SIZE) };
        raw.chunks_exact(T::SIZE)
            .map(|chunk| {
                T::from_ne_slice(chunk)
                    .ok_or_else(|| ReflexError::InvalidValue(format!("invalid bit pattern for {}", T::NAME)))
            })
            .collect()
    }

    fn fat_pointer(&self) -> ReflexResult<(Address, usize)>
    {
        let bytes = self.bytes();
        let (Some(data), Some(len)) = (bytes.get(0..8), bytes.get(8..16)) else {
            return Err(ReflexError::InvalidValue(format!("{} is too short for a slice", self.ty)));
        };
        let data = u64::from_ne_bytes(data.try_into().map_err(|_| ReflexError::InvalidValue("slice data".into()))?);
        let len = u64::from_ne_bytes(len.try_into().map_err(|_| ReflexError::InvalidValue("slice length".into()))?);
        let len = usize::try_from(len).map_err(|_| ReflexError::InvalidValue(format!("slice length {len}")))?;
        Ok((Address::from(data), len))
    }
}

fn word(bytes: &[u8], signed: bool) -> u64
{
    let mut raw = [0u8; 8];
    let len = bytes.len().min(8);
    raw[..len].copy_from_slice(&bytes[..len]);
    let value = u64::from_ne_bytes(raw);
    if signed && (1..8).contains(&len) {
        let shift = 64 - 8 * len as u32;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
        return (((value << shift) as i64) >> shift) as u64;
    }
    value
}

impl fmt::Display for Value
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let bytes = self.bytes();
        match self.ty.kind() {
            TypeKind::Unit => write!(f, "()"),
            TypeKind::Bool => write!(f, "{}", bytes.first().is_some_and(|b| *b != 0)),
            TypeKind::Char => match self.get::<char>() {
                Ok(c) => write!(f, "{c:?}"),
                Err(_) => write!(f, "<invalid char>"),
            },
            #[allow(clippy::cast_possible_wrap)]
            TypeKind::Int { signed: true } if bytes.len() <= 8 => write!(f, "{}", word(&bytes, true) as i64),
            TypeKind::Int { signed: false } if bytes.len() <= 8 => write!(f, "{}", word(&bytes, false)),
            TypeKind::Float if bytes.len() == 4 => write!(f, "{}", f32::from_bits(word(&bytes, false) as u32)),
            TypeKind::Float if bytes.len() == 8 => write!(f, "{}", f64::from_bits(word(&bytes, false))),
            TypeKind::Pointer { .. } | TypeKind::Function => write!(f, "{}", Address::from(word(&bytes, false))),
            TypeKind::Slice { element } => match self.fat_pointer() {
                Ok((data, len)) => write!(f, "&[{element}; {len}] @ {data}"),
                Err(_) => write!(f, "<invalid slice>"),
            },
            _ => write!(f, "<{} ({} bytes)>", self.ty, self.ty.size()),
        }
    }
}

impl fmt::Debug for Value
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let mut debug = f.debug_struct("Value");
        debug.field("ty", &self.ty.name());
        match &self.storage {
            Storage::Owned(bytes) => debug.field("bytes", bytes),
            Storage::Memory(address) => debug.field("address", address),
        };
        debug.finish()
    }
}

/// Raw register word for an integer-class value: sign-extended for signed
/// integers narrower than eight bytes, zero-extended otherwise.
pub(crate) fn register_word(bytes: &[u8], signed: bool) -> u64
{
    word(bytes, signed)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_primitive_round_trip_and_names()
    {
        assert_eq!(Value::new(-3i32).get::<i32>().unwrap(), -3);
        assert_eq!(Value::new(2.5f64).ty().name(), "f64");
        assert_eq!(Value::new('λ').get::<char>().unwrap(), 'λ');
        assert!(Value::new(true).get::<bool>().unwrap());
    }

    #[test]
    fn test_get_rejects_other_shapes()
    {
        let value = Value::new(1u64);
        assert!(value.get::<i64>().is_err());
        assert!(value.get::<f64>().is_err());
        assert!(value.get::<u32>().is_err());
    }

    #[test]
    fn test_slice_keeps_buffer_alive()
    {
        let value = {
            let numbers = vec![1i64, -2, 3];
            Value::slice(&numbers)
        };
        let copy = value.clone();
        drop(value);
        assert_eq!(copy.ty().name(), "&[i64]");
        assert_eq!(unsafe { copy.read_slice::<i64>() }.unwrap(), vec![1, -2, 3]);
    }

    #[test]
    fn test_empty_slice()
    {
        let value = Value::slice::<u8>(&[]);
        assert_eq!(unsafe { value.read_slice::<u8>() }.unwrap(), Vec::<u8>::new());
        assert!(value.to_string().starts_with("&[u8; 0] @ "));
    }

    #[test]
    fn test_pack_slice_checks_elements()
    {
        let element = i64::type_handle();
        let packed = Value::pack_slice(&element, &[Value::new(4i64), Value::new(5i64)]).unwrap();
        assert_eq!(unsafe { packed.read_slice::<i64>() }.unwrap(), vec![4, 5]);

        let err = Value::pack_slice(&element, &[Value::new(4i32)]).unwrap_err();
        assert!(matches!(err, ReflexError::InvalidValue(_)));
    }

    #[test]
    fn test_memory_backed_value_reads_and_writes()
    {
        let mut cell: i64 = 7;
        let value = Value::from_address(i64::type_handle(), Address::from(std::ptr::addr_of_mut!(cell).cast_const()));
        assert_eq!(value.get::<i64>().unwrap(), 7);
        unsafe { value.set(8i64) }.unwrap();
        assert_eq!(value.get::<i64>().unwrap(), 8);
        assert_eq!(cell, 8);
    }

    #[test]
    fn test_owned_values_cannot_be_set()
    {
        let value = Value::new(1i64);
        assert!(unsafe { value.set(2i64) }.is_err());
    }

    #[test]
    fn test_from_bytes_checks_length()
    {
        assert!(Value::from_bytes(i64::type_handle(), &[0; 4]).is_err());
        let value = Value::from_bytes(i16::type_handle(), &(-2i16).to_ne_bytes()).unwrap();
        assert_eq!(value.to_string(), "-2");
    }

    #[test]
    fn test_register_word_extension()
    {
        assert_eq!(register_word(&(-1i8).to_ne_bytes(), true), u64::MAX);
        assert_eq!(register_word(&(-1i8).to_ne_bytes(), false), 0xff);
        assert_eq!(register_word(&7u64.to_ne_bytes(), false), 7);
    }
}
