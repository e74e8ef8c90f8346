//! Raw addresses and object references.
//!
//! The helper layer manipulates heap memory as plain machine words: the
//! allocation context is a pair of addresses, card indices are derived by
//! shifting addresses, and saved register slots hold either scalars or
//! object addresses. [`Address`] keeps that arithmetic in one place.

use std::fmt;
use std::num::NonZeroUsize;

/// Size of a machine word (and of a saved register slot) in bytes.
pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// A raw machine address.
///
/// `Address` is a plain integer with pointer-flavoured helpers. It carries
/// no ownership or validity guarantees; dereferencing the memory it names is
/// always the caller's responsibility.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Address(usize);

impl Address {
    /// The null address.
    pub const NULL: Address = Address(0);

    /// Creates an address from a raw integer.
    pub const fn new(raw: usize) -> Self {
        Address(raw)
    }

    /// Creates an address from a raw pointer.
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Address(ptr as usize)
    }

    /// Returns the address as an integer.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the address as a raw mutable pointer.
    pub fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Returns true for the null address.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Adds a byte offset, returning `None` on overflow.
    pub fn checked_add(self, bytes: usize) -> Option<Address> {
        self.0.checked_add(bytes).map(Address)
    }

    /// Adds a byte offset without overflow checking.
    ///
    /// Only valid when the caller already knows the result stays inside the
    /// same region (e.g. after a limit comparison).
    pub const fn add(self, bytes: usize) -> Address {
        Address(self.0 + bytes)
    }

    /// Subtracts a byte offset without overflow checking.
    pub const fn sub(self, bytes: usize) -> Address {
        Address(self.0 - bytes)
    }

    /// Returns the number of bytes from `lower` up to `self`.
    ///
    /// Returns 0 when `lower` is above `self`.
    pub const fn distance_from(self, lower: Address) -> usize {
        self.0.saturating_sub(lower.0)
    }

    /// Returns true if the address is a multiple of `align`.
    ///
    /// `align` must be a power of two.
    pub const fn is_aligned(self, align: usize) -> bool {
        self.0 & (align - 1) == 0
    }

    /// Rounds the address up to a multiple of `align`.
    ///
    /// `align` must be a power of two. Returns `None` on overflow.
    pub fn align_up(self, align: usize) -> Option<Address> {
        debug_assert!(align.is_power_of_two());
        let mask = align - 1;
        self.0.checked_add(mask).map(|v| Address(v & !mask))
    }

    /// Rounds the address down to a multiple of `align`.
    pub const fn align_down(self, align: usize) -> Address {
        Address(self.0 & !(align - 1))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for Address {
    fn from(raw: usize) -> Self {
        Address(raw)
    }
}

/// A non-null reference to a managed object.
///
/// This is what allocation helpers hand back to managed code. The collector
/// may move the object; a stale `ObjectRef` held across a collection point is
/// a caller bug, exactly as a stale register would be.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ObjectRef(NonZeroUsize);

impl ObjectRef {
    /// Wraps an address, returning `None` for null.
    pub fn from_address(addr: Address) -> Option<Self> {
        NonZeroUsize::new(addr.as_usize()).map(ObjectRef)
    }

    /// Returns the object's address.
    pub fn address(self) -> Address {
        Address(self.0.get())
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:#x})", self.0.get())
    }
}

impl From<ObjectRef> for Address {
    fn from(obj: ObjectRef) -> Self {
        obj.address()
    }
}
