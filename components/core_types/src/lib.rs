//! Shared vocabulary for the cooperative GC helper layer.
//!
//! This crate provides the small, dependency-light types every other
//! component speaks in: raw heap addresses, non-null object references,
//! and the error and unwind values produced by runtime helpers.
//!
//! # Overview
//!
//! - [`Address`] - A raw machine address with alignment arithmetic
//! - [`ObjectRef`] - A non-null reference to a managed object
//! - [`AllocError`] - Reasons an allocation request cannot be satisfied
//! - [`AttachError`] - Thread attach/detach lifecycle violations
//! - [`Unwind`] - Non-local exit taken by a helper instead of returning
//!
//! # Examples
//!
//! ```
//! use core_types::{Address, ObjectRef};
//!
//! let addr = Address::new(0x1003);
//! assert_eq!(addr.align_up(8), Some(Address::new(0x1008)));
//!
//! let obj = ObjectRef::from_address(Address::new(0x1008)).unwrap();
//! assert_eq!(obj.address().as_usize(), 0x1008);
//! assert!(ObjectRef::from_address(Address::NULL).is_none());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod address;
mod error;

pub use address::{Address, ObjectRef, WORD_SIZE};
pub use error::{AllocError, AttachError, Unwind};
