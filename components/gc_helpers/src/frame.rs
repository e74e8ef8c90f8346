//! Transition frames: making a native helper's caller crawlable.
//!
//! A helper invoked from managed code starts out opaque to the collector's
//! stack walker. Before it does anything that may trigger a collection it
//! pushes a [`TransitionFrame`]: a fixed-layout record holding the
//! callee-saved registers, the frame-pointer/return-address pair, the stack
//! pointer at entry and a bitmask of what was saved. The frame's address is
//! published on the owning [`ThreadState`] and becomes the anchor from which
//! the walker resumes scanning the managed caller.
//!
//! ```text
//!   Cooperative ──push──▶ Crawlable ──pop──▶ (return | thread abort)
//! ```
//!
//! Pushing returns a [`FrameGuard`]. Popping consumes it, and dropping an
//! unpopped guard pops, so an unbalanced push/pop cannot be written. While
//! the guard is alive the collector may rewrite saved slots (relocation);
//! pop restores the register file from the frame, so relocated values are
//! what the caller sees afterwards.
//!
//! # Layout
//!
//! The record is 0x80 bytes, 16-byte aligned:
//!
//! | Offset | Slot |
//! |-------:|------|
//! | 0x00 | fp |
//! | 0x08 | lr |
//! | 0x10 | owning thread |
//! | 0x18 | flags |
//! | 0x20..0x68 | x19..x28 |
//! | 0x70 | sp at entry |
//! | 0x78 | x0 |

use crate::layout::TRANSITION_FRAME_SIZE;
use crate::thread::ThreadState;
use bitflags::bitflags;
use core_types::Address;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

bitflags! {
    /// Save mask and extension flags stored in a transition frame.
    ///
    /// Bit values are fixed by the native calling convention.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FrameFlags: u32 {
        const SAVE_X19 = 0x0000_0001;
        const SAVE_X20 = 0x0000_0002;
        const SAVE_X21 = 0x0000_0004;
        const SAVE_X22 = 0x0000_0008;
        const SAVE_X23 = 0x0000_0010;
        const SAVE_X24 = 0x0000_0020;
        const SAVE_X25 = 0x0000_0040;
        const SAVE_X26 = 0x0000_0080;
        const SAVE_X27 = 0x0000_0100;
        const SAVE_X28 = 0x0000_0200;
        const SAVE_SP = 0x0000_0400;
        /// x19-x28
        const SAVE_ALL_PRESERVED = 0x0000_03FF;
        const SAVE_X0 = 0x0000_0800;
        const SAVE_FP = 0x0008_0000;
        const SAVE_LR = 0x0010_0000;
        /// Only with `SAVE_X0`: x0 holds an object reference.
        const X0_IS_GCREF = 0x0020_0000;
        /// Only with `SAVE_X0`: x0 holds an interior pointer.
        const X0_IS_BYREF = 0x0040_0000;
        /// Raise a thread abort instead of returning through this frame.
        const THREAD_ABORT = 0x0080_0000;
    }
}

/// Mask recorded by allocation helpers: every callee-saved register plus sp.
pub const DEFAULT_FRAME_SAVE_FLAGS: FrameFlags =
    FrameFlags::SAVE_ALL_PRESERVED.union(FrameFlags::SAVE_SP);

impl FrameFlags {
    /// Classification of the x0 slot, or `None` when x0 was not saved.
    pub fn x0_kind(self) -> Option<SlotKind> {
        if !self.contains(FrameFlags::SAVE_X0) {
            return None;
        }
        Some(if self.contains(FrameFlags::X0_IS_GCREF) {
            SlotKind::Object
        } else if self.contains(FrameFlags::X0_IS_BYREF) {
            SlotKind::Interior
        } else {
            SlotKind::Scalar
        })
    }

    /// Flags that save x0 with the given classification.
    pub fn with_x0(self, kind: SlotKind) -> FrameFlags {
        let base = (self | FrameFlags::SAVE_X0) - (FrameFlags::X0_IS_GCREF | FrameFlags::X0_IS_BYREF);
        match kind {
            SlotKind::Scalar => base,
            SlotKind::Object => base | FrameFlags::X0_IS_GCREF,
            SlotKind::Interior => base | FrameFlags::X0_IS_BYREF,
        }
    }

    fn is_consistent(self) -> bool {
        let gcref = self.contains(FrameFlags::X0_IS_GCREF);
        let byref = self.contains(FrameFlags::X0_IS_BYREF);
        !(gcref && byref) && (!(gcref || byref) || self.contains(FrameFlags::SAVE_X0))
    }
}

/// How the collector must treat a saved argument slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// Not a reference; never relocated.
    Scalar,
    /// Points at the start of an object.
    Object,
    /// Points into the interior of an object (byref).
    Interior,
}

impl SlotKind {
    /// Returns true for slots the collector must relocate.
    pub fn is_reference(self) -> bool {
        !matches!(self, SlotKind::Scalar)
    }
}

/// Registers the fixed ABI lets a transition frame save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    X0,
    X19,
    X20,
    X21,
    X22,
    X23,
    X24,
    X25,
    X26,
    X27,
    X28,
    Fp,
    Lr,
    Sp,
}

impl Register {
    /// Callee-saved registers in frame order, with their save bits.
    pub const PRESERVED: [(Register, FrameFlags); 10] = [
        (Register::X19, FrameFlags::SAVE_X19),
        (Register::X20, FrameFlags::SAVE_X20),
        (Register::X21, FrameFlags::SAVE_X21),
        (Register::X22, FrameFlags::SAVE_X22),
        (Register::X23, FrameFlags::SAVE_X23),
        (Register::X24, FrameFlags::SAVE_X24),
        (Register::X25, FrameFlags::SAVE_X25),
        (Register::X26, FrameFlags::SAVE_X26),
        (Register::X27, FrameFlags::SAVE_X27),
        (Register::X28, FrameFlags::SAVE_X28),
    ];
}

/// The register file a helper sees at entry.
///
/// Only the registers the transition protocol cares about are modelled:
/// the first argument/return register, the callee-saved set, and the
/// fp/lr/sp triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct RegisterSet {
    pub x0: usize,
    pub x19: usize,
    pub x20: usize,
    pub x21: usize,
    pub x22: usize,
    pub x23: usize,
    pub x24: usize,
    pub x25: usize,
    pub x26: usize,
    pub x27: usize,
    pub x28: usize,
    pub fp: usize,
    pub lr: usize,
    pub sp: usize,
}

impl RegisterSet {
    /// Reads a register.
    pub fn get(&self, reg: Register) -> usize {
        match reg {
            Register::X0 => self.x0,
            Register::X19 => self.x19,
            Register::X20 => self.x20,
            Register::X21 => self.x21,
            Register::X22 => self.x22,
            Register::X23 => self.x23,
            Register::X24 => self.x24,
            Register::X25 => self.x25,
            Register::X26 => self.x26,
            Register::X27 => self.x27,
            Register::X28 => self.x28,
            Register::Fp => self.fp,
            Register::Lr => self.lr,
            Register::Sp => self.sp,
        }
    }

    /// Writes a register.
    pub fn set(&mut self, reg: Register, value: usize) {
        match reg {
            Register::X0 => self.x0 = value,
            Register::X19 => self.x19 = value,
            Register::X20 => self.x20 = value,
            Register::X21 => self.x21 = value,
            Register::X22 => self.x22 = value,
            Register::X23 => self.x23 = value,
            Register::X24 => self.x24 = value,
            Register::X25 => self.x25 = value,
            Register::X26 => self.x26 = value,
            Register::X27 => self.x27 = value,
            Register::X28 => self.x28 = value,
            Register::Fp => self.fp = value,
            Register::Lr => self.lr = value,
            Register::Sp => self.sp = value,
        }
    }
}

/// A stack-crawlable snapshot of a helper's caller.
///
/// Created empty with [`TransitionFrame::new`] as a local of the helper and
/// filled by [`TransitionFrame::push`]. The collector reaches it through
/// [`ThreadState::transition_frame`].
#[derive(Debug)]
#[repr(C, align(16))]
pub struct TransitionFrame {
    pub(crate) fp: usize,
    pub(crate) lr: usize,
    pub(crate) thread: *const ThreadState,
    pub(crate) flags: u32,
    pub(crate) _reserved: u32,
    pub(crate) x19: usize,
    pub(crate) x20: usize,
    pub(crate) x21: usize,
    pub(crate) x22: usize,
    pub(crate) x23: usize,
    pub(crate) x24: usize,
    pub(crate) x25: usize,
    pub(crate) x26: usize,
    pub(crate) x27: usize,
    pub(crate) x28: usize,
    pub(crate) sp: usize,
    pub(crate) x0: usize,
}

impl Default for TransitionFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl TransitionFrame {
    /// An unpushed frame.
    pub const fn new() -> Self {
        TransitionFrame {
            fp: 0,
            lr: 0,
            thread: ptr::null(),
            flags: 0,
            _reserved: 0,
            x19: 0,
            x20: 0,
            x21: 0,
            x22: 0,
            x23: 0,
            x24: 0,
            x25: 0,
            x26: 0,
            x27: 0,
            x28: 0,
            sp: 0,
            x0: 0,
        }
    }

    /// Enters the crawlable state.
    ///
    /// Must be the helper's first action, before `regs.sp` is otherwise
    /// modified, so the recorded entry stack pointer is accurate. Reserves
    /// the frame's stack space in `regs.sp`, saves the registers named by
    /// `flags` and publishes the frame on `thread`. The modeled stack pointer
    /// wraps like the machine register, so any `regs.sp` is accepted.
    pub fn push<'f>(
        &'f mut self,
        thread: &'f ThreadState,
        regs: &'f mut RegisterSet,
        flags: FrameFlags,
    ) -> FrameGuard<'f> {
        debug_assert!(flags.is_consistent(), "inconsistent x0 classification: {flags:?}");

        let entry_sp = regs.sp;

        // stp fp, lr, [sp, #-0x80]!
        self.fp = regs.fp;
        self.lr = regs.lr;
        regs.sp = entry_sp.wrapping_sub(TRANSITION_FRAME_SIZE);

        self.x19 = regs.x19;
        self.x20 = regs.x20;
        self.x21 = regs.x21;
        self.x22 = regs.x22;
        self.x23 = regs.x23;
        self.x24 = regs.x24;
        self.x25 = regs.x25;
        self.x26 = regs.x26;
        self.x27 = regs.x27;
        self.x28 = regs.x28;

        self.sp = entry_sp;
        self.flags = flags.bits();
        self.thread = thread as *const ThreadState;
        self.x0 = if flags.contains(FrameFlags::SAVE_X0) { regs.x0 } else { 0 };

        let frame = NonNull::from(self);
        let previous = thread.swap_transition_frame(frame.as_ptr());

        FrameGuard {
            frame,
            previous,
            thread,
            regs,
            popped: false,
            _frame: PhantomData,
        }
    }

    /// Flags recorded at push time, plus any added since.
    pub fn flags(&self) -> FrameFlags {
        FrameFlags::from_bits_retain(self.flags)
    }

    /// The thread that pushed this frame.
    pub fn thread(&self) -> *const ThreadState {
        self.thread
    }

    /// Saved frame pointer of the managed caller.
    pub fn frame_pointer(&self) -> Address {
        Address::new(self.fp)
    }

    /// Return address into the managed caller.
    pub fn return_address(&self) -> Address {
        Address::new(self.lr)
    }

    /// Stack pointer at helper entry, if it was recorded.
    pub fn entry_sp(&self) -> Option<Address> {
        self.flags()
            .contains(FrameFlags::SAVE_SP)
            .then(|| Address::new(self.sp))
    }

    /// Marks the frame so that popping it raises a thread abort.
    pub fn request_thread_abort(&mut self) {
        self.flags |= FrameFlags::THREAD_ABORT.bits();
    }

    /// Returns true if popping this frame will raise a thread abort.
    pub fn is_thread_abort_requested(&self) -> bool {
        self.flags().contains(FrameFlags::THREAD_ABORT)
    }

    /// Returns true if `reg`'s slot holds a saved value.
    pub fn is_saved(&self, reg: Register) -> bool {
        let flags = self.flags();
        match reg {
            Register::Fp | Register::Lr => true,
            Register::Sp => flags.contains(FrameFlags::SAVE_SP),
            Register::X0 => flags.contains(FrameFlags::SAVE_X0),
            _ => Register::PRESERVED
                .iter()
                .any(|&(r, bit)| r == reg && flags.contains(bit)),
        }
    }

    /// The saved value of `reg`, or `None` if the mask says it was not saved.
    pub fn saved(&self, reg: Register) -> Option<usize> {
        self.is_saved(reg).then(|| *self.slot(reg))
    }

    /// Mutable access to `reg`'s saved slot, gated by the save mask.
    pub fn saved_mut(&mut self, reg: Register) -> Option<&mut usize> {
        if self.is_saved(reg) {
            Some(self.slot_mut(reg))
        } else {
            None
        }
    }

    /// Saved registers in frame order: fp, lr, x19..x28, sp, x0.
    pub fn saved_registers(&self) -> impl Iterator<Item = (Register, usize)> + '_ {
        [Register::Fp, Register::Lr]
            .into_iter()
            .chain(Register::PRESERVED.into_iter().map(|(reg, _)| reg))
            .chain([Register::Sp, Register::X0])
            .filter_map(move |reg| self.saved(reg).map(|value| (reg, value)))
    }

    /// Visits every callee-saved slot the mask marks as saved.
    ///
    /// This is what the stack walker uses to locate the managed caller's
    /// register values; whether a given register holds a reference is
    /// decided by the caller's GC info, not by this frame.
    pub fn for_each_preserved_slot<F>(&mut self, mut visit: F)
    where
        F: FnMut(Register, &mut usize),
    {
        let flags = self.flags();
        for (reg, bit) in Register::PRESERVED {
            if flags.contains(bit) {
                visit(reg, self.slot_mut(reg));
            }
        }
    }

    /// The saved x0 slot and its classification, if x0 was saved.
    pub fn argument_slot_mut(&mut self) -> Option<(SlotKind, &mut usize)> {
        let kind = self.flags().x0_kind()?;
        Some((kind, &mut self.x0))
    }

    /// Visits the slots this frame itself classifies as references.
    pub fn for_each_reference_slot<F>(&mut self, mut visit: F)
    where
        F: FnMut(SlotKind, &mut usize),
    {
        if let Some((kind, slot)) = self.argument_slot_mut() {
            if kind.is_reference() {
                visit(kind, slot);
            }
        }
    }

    fn slot(&self, reg: Register) -> &usize {
        match reg {
            Register::X0 => &self.x0,
            Register::X19 => &self.x19,
            Register::X20 => &self.x20,
            Register::X21 => &self.x21,
            Register::X22 => &self.x22,
            Register::X23 => &self.x23,
            Register::X24 => &self.x24,
            Register::X25 => &self.x25,
            Register::X26 => &self.x26,
            Register::X27 => &self.x27,
            Register::X28 => &self.x28,
            Register::Fp => &self.fp,
            Register::Lr => &self.lr,
            Register::Sp => &self.sp,
        }
    }

    fn slot_mut(&mut self, reg: Register) -> &mut usize {
        match reg {
            Register::X0 => &mut self.x0,
            Register::X19 => &mut self.x19,
            Register::X20 => &mut self.x20,
            Register::X21 => &mut self.x21,
            Register::X22 => &mut self.x22,
            Register::X23 => &mut self.x23,
            Register::X24 => &mut self.x24,
            Register::X25 => &mut self.x25,
            Register::X26 => &mut self.x26,
            Register::X27 => &mut self.x27,
            Register::X28 => &mut self.x28,
            Register::Fp => &mut self.fp,
            Register::Lr => &mut self.lr,
            Register::Sp => &mut self.sp,
        }
    }
}

/// How control leaves a popped transition frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameExit {
    /// Return the helper's value normally.
    Return,
    /// A thread abort was pending; deliver it instead of returning.
    ThreadAbort,
}

/// A pushed transition frame.
///
/// Holds the frame at a fixed address until popped. Popping (explicitly or
/// on drop) restores the registers, releases the stack reservation and
/// re-publishes whatever frame was innermost before the push.
#[must_use = "dropping the guard pops the frame immediately"]
pub struct FrameGuard<'f> {
    frame: NonNull<TransitionFrame>,
    previous: *mut TransitionFrame,
    thread: &'f ThreadState,
    regs: &'f mut RegisterSet,
    popped: bool,
    _frame: PhantomData<&'f mut TransitionFrame>,
}

impl<'f> FrameGuard<'f> {
    /// The thread this frame is published on.
    pub fn thread(&self) -> &'f ThreadState {
        self.thread
    }

    /// Address of the frame record, the stack walker's anchor.
    pub fn frame_address(&self) -> Address {
        Address::from_ptr(self.frame.as_ptr())
    }

    /// Read access to the frame record.
    pub fn frame(&self) -> &TransitionFrame {
        // SAFETY: the frame is borrowed mutably for 'f and only ever accessed
        // through this pointer (or the identical published anchor).
        unsafe { self.frame.as_ref() }
    }

    /// Mutable access to the frame record.
    pub fn frame_mut(&mut self) -> &mut TransitionFrame {
        // SAFETY: see `frame`; &mut self makes this access exclusive.
        unsafe { self.frame.as_mut() }
    }

    /// The live register file. Helper bodies may clobber it freely; pop
    /// restores everything the frame saved.
    pub fn registers_mut(&mut self) -> &mut RegisterSet {
        &mut *self.regs
    }

    /// Marks the frame so that popping it raises a thread abort.
    pub fn request_thread_abort(&mut self) {
        self.frame_mut().request_thread_abort();
    }

    /// Leaves the crawlable state and reports how control must continue.
    pub fn pop(mut self) -> FrameExit {
        self.restore()
    }

    fn restore(&mut self) -> FrameExit {
        debug_assert!(!self.popped);
        self.popped = true;

        // SAFETY: the frame outlives the guard and nothing else holds a
        // reference to it once control is back in the helper.
        let frame = unsafe { self.frame.as_ref() };
        let regs = &mut *self.regs;
        let flags = frame.flags();

        debug_assert_eq!(
            regs.sp.wrapping_add(TRANSITION_FRAME_SIZE),
            frame.sp,
            "stack pointer moved between transition frame push and pop"
        );

        // Pairs are restored whole, low register first, matching the saves.
        regs.x19 = frame.x19;
        regs.x20 = frame.x20;
        regs.x21 = frame.x21;
        regs.x22 = frame.x22;
        regs.x23 = frame.x23;
        regs.x24 = frame.x24;
        regs.x25 = frame.x25;
        regs.x26 = frame.x26;
        regs.x27 = frame.x27;
        regs.x28 = frame.x28;
        if flags.contains(FrameFlags::SAVE_X0) {
            regs.x0 = frame.x0;
        }

        // ldp fp, lr, [sp], #0x80
        regs.fp = frame.fp;
        regs.lr = frame.lr;
        regs.sp = regs.sp.wrapping_add(TRANSITION_FRAME_SIZE);

        let unpublished = self.thread.swap_transition_frame(self.previous);
        debug_assert_eq!(unpublished, self.frame.as_ptr(), "transition frames popped out of order");

        if flags.contains(FrameFlags::THREAD_ABORT) {
            FrameExit::ThreadAbort
        } else {
            FrameExit::Return
        }
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if !self.popped {
            self.restore();
        }
    }
}
