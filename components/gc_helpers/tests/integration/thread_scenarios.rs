use crate::common::ScriptedCollector;
use gc_helpers::{
    current_thread, current_thread_ptr, is_current_thread_attached, try_current_thread,
    AllocContext, AttachError, FrameFlags, GcConfig, RegisterSet, Runtime, ThreadStateFlags,
    TransitionFrame,
};
use std::sync::Arc;

fn runtime() -> Runtime {
    Runtime::new(GcConfig::default(), Arc::new(ScriptedCollector::new(256)))
}

#[test]
fn test_attach_sets_default_flags() {
    let runtime = runtime();
    let attached = runtime.attach_current_thread().unwrap();
    let state = attached.state();

    assert_eq!(state.flags(), ThreadStateFlags::ATTACHED);
    assert!(state.is_attached());
    assert!(!state.gc_stress_suppressed());
    assert!(!state.gc_trigger_suppressed());
    assert_eq!(state.alloc_context(), AllocContext::EMPTY);
}

#[test]
fn test_locator_tracks_attach_and_detach() {
    let runtime = runtime();
    assert!(current_thread_ptr().is_null());

    let attached = runtime.attach_current_thread().unwrap();
    assert!(std::ptr::eq(
        try_current_thread().unwrap().as_ptr(),
        attached.state()
    ));
    assert_eq!(runtime.threads().len(), 1);

    attached.detach().unwrap();
    assert!(!is_current_thread_attached());
    assert_eq!(try_current_thread(), Err(AttachError::NotAttached));
    assert!(runtime.threads().is_empty());
}

#[test]
fn test_reattach_after_detach() {
    let runtime = runtime();
    let first = runtime.attach_current_thread().unwrap();
    let first_id = first.state().managed_thread_id();
    drop(first);

    let second = runtime.attach_current_thread().unwrap();
    assert_ne!(second.state().managed_thread_id(), first_id);
}

#[test]
fn test_detach_refused_while_frame_active() {
    let runtime = runtime();
    let attached = runtime.attach_current_thread().unwrap();

    // SAFETY: attached above and detached only after the frame pops.
    let state = unsafe { current_thread() };
    let mut regs = RegisterSet {
        sp: 0x7000_0000,
        ..RegisterSet::default()
    };
    let mut frame = TransitionFrame::new();
    let guard = frame.push(state, &mut regs, FrameFlags::SAVE_SP);

    let (attached, err) = attached.detach().unwrap_err();
    assert_eq!(err, AttachError::FrameActive);

    guard.pop();
    attached.detach().unwrap();
}

#[test]
fn test_threads_attach_independently() {
    let runtime = Arc::new(runtime());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let runtime = Arc::clone(&runtime);
            std::thread::spawn(move || {
                let attached = runtime.attach_current_thread().unwrap();
                assert!(std::ptr::eq(current_thread_ptr(), attached.state()));
                let id = attached.state().managed_thread_id();
                id
            })
        })
        .collect();

    let mut ids: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4);
    assert!(runtime.threads().is_empty());
}

#[test]
fn test_scoped_guards_restore_flags() {
    let runtime = runtime();
    let attached = runtime.attach_current_thread().unwrap();
    let state = attached.state();
    {
        let _stress = state.suppress_gc_stress();
        let _nogc = state.forbid_gc();
        assert!(state.gc_stress_suppressed());
        assert!(state.gc_trigger_suppressed());
    }
    assert_eq!(state.flags(), ThreadStateFlags::ATTACHED);
}
