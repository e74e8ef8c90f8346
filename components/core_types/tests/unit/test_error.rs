//! Unit tests for AllocError, AttachError and Unwind

use core_types::{AllocError, AttachError, Unwind};

#[cfg(test)]
mod alloc_error_tests {
    use super::*;

    #[test]
    fn test_collection_suppressed_message() {
        let err = AllocError::CollectionSuppressed { requested: 32 };
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn test_bad_request_message() {
        let err = AllocError::BadRequest("zero-sized object");
        assert_eq!(err.to_string(), "bad allocation request: zero-sized object");
    }
}

#[cfg(test)]
mod unwind_tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_failed_allocation_has_source() {
        let unwind = Unwind::from(AllocError::OutOfMemory { requested: 8 });
        assert!(unwind.source().is_some());
        assert!(Unwind::ThreadAbort.source().is_none());
    }

    #[test]
    fn test_attach_errors_are_distinct() {
        assert_ne!(AttachError::NotAttached, AttachError::FrameActive);
    }
}
