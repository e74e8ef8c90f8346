//! Fixed offsets shared with native helper code.
//!
//! Hand-written helpers address thread state and transition frames by
//! constant offset, so these values are part of the ABI. Each constant is
//! checked at compile time against the Rust definition.

use crate::frame::TransitionFrame;
use crate::thread::{AllocContext, ThreadState};
use std::mem::{align_of, offset_of, size_of};

/// Size of a transition frame record on the stack.
pub const TRANSITION_FRAME_SIZE: usize = 0x80;

pub const OFFSETOF_FRAME_FP: usize = 0x00;
pub const OFFSETOF_FRAME_LR: usize = 0x08;
pub const OFFSETOF_FRAME_THREAD: usize = 0x10;
pub const OFFSETOF_FRAME_FLAGS: usize = 0x18;
/// x19 through x28 follow in pairs, 8 bytes apart.
pub const OFFSETOF_FRAME_X19: usize = 0x20;
pub const OFFSETOF_FRAME_X28: usize = 0x68;
pub const OFFSETOF_FRAME_SP: usize = 0x70;
pub const OFFSETOF_FRAME_X0: usize = 0x78;

pub const OFFSETOF_THREAD_FLAGS: usize = 0x00;
pub const OFFSETOF_THREAD_ALLOC_CONTEXT: usize = 0x08;
pub const OFFSETOF_THREAD_ALLOC_PTR: usize = 0x08;
pub const OFFSETOF_THREAD_ALLOC_LIMIT: usize = 0x10;
pub const OFFSETOF_THREAD_ALLOC_BYTES: usize = 0x18;
pub const OFFSETOF_THREAD_TRANSITION_FRAME: usize = 0x20;

const _: () = {
    assert!(size_of::<TransitionFrame>() == TRANSITION_FRAME_SIZE);
    assert!(align_of::<TransitionFrame>() == 16);
    assert!(offset_of!(TransitionFrame, fp) == OFFSETOF_FRAME_FP);
    assert!(offset_of!(TransitionFrame, lr) == OFFSETOF_FRAME_LR);
    assert!(offset_of!(TransitionFrame, thread) == OFFSETOF_FRAME_THREAD);
    assert!(offset_of!(TransitionFrame, flags) == OFFSETOF_FRAME_FLAGS);
    assert!(offset_of!(TransitionFrame, x19) == OFFSETOF_FRAME_X19);
    assert!(offset_of!(TransitionFrame, x20) == OFFSETOF_FRAME_X19 + 0x08);
    assert!(offset_of!(TransitionFrame, x21) == OFFSETOF_FRAME_X19 + 0x10);
    assert!(offset_of!(TransitionFrame, x22) == OFFSETOF_FRAME_X19 + 0x18);
    assert!(offset_of!(TransitionFrame, x23) == OFFSETOF_FRAME_X19 + 0x20);
    assert!(offset_of!(TransitionFrame, x24) == OFFSETOF_FRAME_X19 + 0x28);
    assert!(offset_of!(TransitionFrame, x25) == OFFSETOF_FRAME_X19 + 0x30);
    assert!(offset_of!(TransitionFrame, x26) == OFFSETOF_FRAME_X19 + 0x38);
    assert!(offset_of!(TransitionFrame, x27) == OFFSETOF_FRAME_X19 + 0x40);
    assert!(offset_of!(TransitionFrame, x28) == OFFSETOF_FRAME_X28);
    assert!(offset_of!(TransitionFrame, sp) == OFFSETOF_FRAME_SP);
    assert!(offset_of!(TransitionFrame, x0) == OFFSETOF_FRAME_X0);

    assert!(offset_of!(ThreadState, flags) == OFFSETOF_THREAD_FLAGS);
    assert!(offset_of!(ThreadState, alloc_context) == OFFSETOF_THREAD_ALLOC_CONTEXT);
    assert!(
        OFFSETOF_THREAD_ALLOC_CONTEXT + offset_of!(AllocContext, alloc_ptr)
            == OFFSETOF_THREAD_ALLOC_PTR
    );
    assert!(
        OFFSETOF_THREAD_ALLOC_CONTEXT + offset_of!(AllocContext, alloc_limit)
            == OFFSETOF_THREAD_ALLOC_LIMIT
    );
    assert!(
        OFFSETOF_THREAD_ALLOC_CONTEXT + offset_of!(AllocContext, alloc_bytes)
            == OFFSETOF_THREAD_ALLOC_BYTES
    );
    assert!(offset_of!(ThreadState, transition_frame) == OFFSETOF_THREAD_TRANSITION_FRAME);
};
