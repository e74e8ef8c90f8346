//! Unit tests for Address and ObjectRef

use core_types::{Address, ObjectRef, WORD_SIZE};

#[cfg(test)]
mod address_tests {
    use super::*;

    #[test]
    fn test_word_size_matches_pointer() {
        assert_eq!(WORD_SIZE, std::mem::size_of::<*const u8>());
    }

    #[test]
    fn test_round_trip_through_pointer() {
        let value = 7u64;
        let addr = Address::from_ptr(&value as *const u64);
        let ptr: *mut u64 = addr.as_mut_ptr();
        assert_eq!(ptr as *const u64, &value as *const u64);
    }

    #[test]
    fn test_ordering_follows_numeric_value() {
        assert!(Address::new(0x1000) < Address::new(0x1001));
        assert_eq!(Address::from(0x20usize), Address::new(0x20));
    }

    #[test]
    fn test_add_and_sub() {
        let base = Address::new(0x1000);
        assert_eq!(base.add(0x80).sub(0x80), base);
        assert_eq!(base.add(0x80).distance_from(base), 0x80);
    }
}

#[cfg(test)]
mod object_ref_tests {
    use super::*;

    #[test]
    fn test_object_ref_is_pointer_sized() {
        assert_eq!(std::mem::size_of::<Option<ObjectRef>>(), WORD_SIZE);
    }

    #[test]
    fn test_object_ref_address() {
        let obj = ObjectRef::from_address(Address::new(0xdead0)).unwrap();
        assert_eq!(obj.address(), Address::new(0xdead0));
    }
}
