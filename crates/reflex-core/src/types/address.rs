//! Memory address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed address in the current process
///
/// This wrapper around `u64` keeps live addresses (entry points, global
/// storage, runtime records) apart from link-time addresses, sizes and
/// offsets read out of debug information.
///
/// ## Example
///
/// ```rust
/// use reflex_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next_addr = addr + 0x100; // Add offset
/// assert_eq!(next_addr.value(), 0x1100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    ///
    /// Functions whose debug entry carries no code address report this value
    /// and are skipped by enumeration.
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    ///
    /// ## Example
    ///
    /// ```rust
    /// use reflex_core::types::Address;
    ///
    /// const BASE: Address = Address::new(0x7fff00000000);
    /// ```
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// True for [`Address::ZERO`].
    pub const fn is_zero(self) -> bool
    {
        self.0 == 0
    }

    /// Convert to a raw pointer in the current process.
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_ptr<T>(self) -> *const T
    {
        self.0 as usize as *const T
    }

    /// Convert to a mutable raw pointer in the current process.
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_mut_ptr<T>(self) -> *mut T
    {
        self.0 as usize as *mut T
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ## Example
    ///
    /// ```rust
    /// use reflex_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None); // Overflow
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset from this address, checking for underflow
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Apply a signed load bias to a link-time address.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use reflex_core::types::Address;
    ///
    /// assert_eq!(Address::relocate(0x1000, 0x5000), Address::from(0x6000));
    /// assert_eq!(Address::relocate(0x6000, -0x5000), Address::from(0x1000));
    /// ```
    pub fn relocate(link_address: u64, bias: i64) -> Self
    {
        Address(link_address.wrapping_add_signed(bias))
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl<T> From<*const T> for Address
{
    fn from(ptr: *const T) -> Self
    {
        Address(ptr as usize as u64)
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
