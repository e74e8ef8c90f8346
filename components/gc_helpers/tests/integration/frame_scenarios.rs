use crate::common::ScriptedCollector;
use gc_helpers::{
    Address, FrameExit, FrameFlags, GcConfig, Register, RegisterSet, Runtime, SlotKind,
    TransitionFrame, DEFAULT_FRAME_SAVE_FLAGS,
};
use std::sync::Arc;

fn entry_registers() -> RegisterSet {
    RegisterSet {
        x0: 0x5000_0010,
        x19: 0x19,
        x20: 0x20,
        x21: 0x21,
        x22: 0x22,
        x23: 0x23,
        x24: 0x24,
        x25: 0x25,
        x26: 0x26,
        x27: 0x27,
        x28: 0x28,
        fp: 0x7ffe_ff00,
        lr: 0x0040_2000,
        sp: 0x7ffe_fe00,
    }
}

#[test]
fn test_push_pop_restores_stack_pointer() {
    let runtime = Runtime::new(GcConfig::default(), Arc::new(ScriptedCollector::new(256)));
    let attached = runtime.attach_current_thread().unwrap();

    for flags in [
        DEFAULT_FRAME_SAVE_FLAGS,
        FrameFlags::SAVE_SP,
        FrameFlags::SAVE_X19 | FrameFlags::SAVE_X27,
        DEFAULT_FRAME_SAVE_FLAGS.with_x0(SlotKind::Interior),
    ] {
        let mut regs = entry_registers();
        let before = regs;
        let mut frame = TransitionFrame::new();
        let mut guard = frame.push(attached.state(), &mut regs, flags);
        guard.registers_mut().x24 = 0;
        guard.registers_mut().lr = 0;
        assert_eq!(guard.pop(), FrameExit::Return);
        assert_eq!(regs.sp, before.sp);
        assert_eq!(regs, before);
    }
}

#[test]
fn test_collector_relocates_gcref_argument() {
    let runtime = Runtime::new(GcConfig::default(), Arc::new(ScriptedCollector::new(256)));
    let attached = runtime.attach_current_thread().unwrap();
    let state = attached.state();

    let mut regs = entry_registers();
    let mut frame = TransitionFrame::new();
    let guard = frame.push(
        state,
        &mut regs,
        DEFAULT_FRAME_SAVE_FLAGS.with_x0(SlotKind::Object),
    );

    // Stack scan from the published anchor.
    {
        // SAFETY: this thread is "parked" between push and pop.
        let anchor = unsafe { state.transition_frame_mut() }.unwrap();
        assert_eq!(anchor.entry_sp(), Some(Address::new(0x7ffe_fe00)));
        assert_eq!(anchor.return_address(), Address::new(0x0040_2000));

        let mut relocated = Vec::new();
        anchor.for_each_reference_slot(|kind, slot| {
            relocated.push((kind, *slot));
            *slot = 0x6000_0010;
        });
        assert_eq!(relocated, vec![(SlotKind::Object, 0x5000_0010)]);

        anchor.for_each_preserved_slot(|reg, slot| {
            if reg == Register::X20 {
                *slot = 0x6000_0020;
            }
        });
    }

    guard.pop();
    assert_eq!(regs.x0, 0x6000_0010);
    assert_eq!(regs.x20, 0x6000_0020);
    assert_eq!(regs.x21, 0x21);
}

#[test]
fn test_unsaved_x0_is_left_alone() {
    let runtime = Runtime::new(GcConfig::default(), Arc::new(ScriptedCollector::new(256)));
    let attached = runtime.attach_current_thread().unwrap();

    let mut regs = entry_registers();
    let mut frame = TransitionFrame::new();
    let mut guard = frame.push(attached.state(), &mut regs, DEFAULT_FRAME_SAVE_FLAGS);
    assert!(guard.frame_mut().argument_slot_mut().is_none());
    guard.registers_mut().x0 = 0x1234;
    guard.pop();
    assert_eq!(regs.x0, 0x1234);
}

#[test]
fn test_pending_abort_redirects_pop() {
    let runtime = Runtime::new(GcConfig::default(), Arc::new(ScriptedCollector::new(256)));
    let attached = runtime.attach_current_thread().unwrap();

    let mut regs = entry_registers();
    let mut frame = TransitionFrame::new();
    let mut guard = frame.push(attached.state(), &mut regs, DEFAULT_FRAME_SAVE_FLAGS);
    guard.request_thread_abort();
    assert_eq!(guard.pop(), FrameExit::ThreadAbort);
    assert!(!attached.state().has_transition_frame());
}

#[test]
fn test_dropped_guard_pops() {
    let runtime = Runtime::new(GcConfig::default(), Arc::new(ScriptedCollector::new(256)));
    let attached = runtime.attach_current_thread().unwrap();

    let mut regs = entry_registers();
    let before = regs;
    {
        let mut frame = TransitionFrame::new();
        let mut guard = frame.push(attached.state(), &mut regs, DEFAULT_FRAME_SAVE_FLAGS);
        guard.registers_mut().x19 = 0;
        assert!(attached.state().has_transition_frame());
    }
    assert!(!attached.state().has_transition_frame());
    assert_eq!(regs, before);
}
