//! Contract compliance tests for core_types
//!
//! These tests pin the public surface other components rely on.

use core_types::{Address, AllocError, AttachError, ObjectRef, Unwind};

#[cfg(test)]
mod address_contract_tests {
    use super::*;

    /// Contract: Address is a transparent machine word
    #[test]
    fn test_address_is_word_sized() {
        assert_eq!(std::mem::size_of::<Address>(), std::mem::size_of::<usize>());
    }

    /// Contract: Address::NULL is null and the default
    #[test]
    fn test_address_null_default() {
        assert!(Address::NULL.is_null());
        assert_eq!(Address::default(), Address::NULL);
    }

    /// Contract: ObjectRef never wraps null
    #[test]
    fn test_object_ref_never_null() {
        assert_eq!(ObjectRef::from_address(Address::NULL), None);
    }
}

#[cfg(test)]
mod error_contract_tests {
    use super::*;

    /// Contract: every error type implements std::error::Error
    #[test]
    fn test_errors_implement_error() {
        fn assert_error<E: std::error::Error + Send + Sync + 'static>() {}
        assert_error::<AllocError>();
        assert_error::<AttachError>();
        assert_error::<Unwind>();
    }

    /// Contract: errors are Copy so helpers can hand them around freely
    #[test]
    fn test_errors_are_copy() {
        fn assert_copy<T: Copy>() {}
        assert_copy::<AllocError>();
        assert_copy::<AttachError>();
        assert_copy::<Unwind>();
    }
}
