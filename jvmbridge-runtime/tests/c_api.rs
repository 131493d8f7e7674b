mod test_helpers;

use crate::test_helpers::test_nonex;
use jvmbridge_runtime::c_api::*;
use jvmbridge_runtime_internals::c_api::{
    jvmbridge_context, jvmbridge_error, jvmbridge_frame_limits, jvmbridge_interrupt_state,
};
use std::ffi::{CStr, CString};
use std::ptr;

fn name(ptr: *const libc::c_char) -> &'static str {
    unsafe { CStr::from_ptr(ptr) }.to_str().unwrap()
}

#[test]
fn error_names() {
    assert_eq!(
        name(jvmbridge_error_name(jvmbridge_error::NotRunning as libc::c_int)),
        "jvmbridge_error_not_running"
    );
    assert_eq!(
        name(jvmbridge_error_name(jvmbridge_error::Ok as libc::c_int)),
        "jvmbridge_error_ok"
    );
    assert_eq!(
        name(jvmbridge_error_name(1000)),
        "!!! error: unknown jvmbridge_error variant"
    );
    assert_eq!(
        name(jvmbridge_interrupt_state_name(
            jvmbridge_interrupt_state::Acknowledged as libc::c_int
        )),
        "jvmbridge_interrupt_state_acknowledged"
    );
}

#[test]
fn null_arguments_are_rejected() {
    unsafe {
        assert_eq!(
            jvmbridge_context_create(ptr::null_mut()),
            jvmbridge_error::InvalidArgument
        );
        assert_eq!(
            jvmbridge_context_shutdown(ptr::null_mut(), true),
            jvmbridge_error::InvalidArgument
        );
        assert_eq!(
            jvmbridge_thread_attach(ptr::null_mut()),
            jvmbridge_error::InvalidArgument
        );
    }
}

#[test]
fn start_with_missing_library() {
    test_nonex(|| unsafe {
        let mut ctx: *mut jvmbridge_context = ptr::null_mut();
        assert_eq!(jvmbridge_context_create(&mut ctx), jvmbridge_error::Ok);
        assert!(!ctx.is_null());

        let path = CString::new("/nonexistent/jvmbridge/libjvm.so").unwrap();
        let option = CString::new("-Xmx64m").unwrap();
        let options = [option.as_ptr()];
        let limits = jvmbridge_frame_limits {
            max_cause_depth: 0,
            ..jvmbridge_frame_limits_default()
        };
        assert_eq!(
            jvmbridge_context_start(ctx, path.as_ptr(), options.as_ptr(), 1, 0b010, &limits),
            jvmbridge_error::LoadFailure
        );

        let mut running = true;
        assert_eq!(
            jvmbridge_context_is_running(ctx, &mut running),
            jvmbridge_error::Ok
        );
        assert!(!running);

        let mut attached = true;
        assert_eq!(
            jvmbridge_thread_is_attached(ctx, &mut attached),
            jvmbridge_error::Ok
        );
        assert!(!attached);
        assert_eq!(jvmbridge_thread_detach(ctx), jvmbridge_error::Ok);
        assert_eq!(jvmbridge_thread_attach(ctx), jvmbridge_error::NotRunning);
        assert_eq!(jvmbridge_gc(ctx), jvmbridge_error::NotRunning);
        assert_eq!(
            jvmbridge_context_shutdown(ctx, true),
            jvmbridge_error::NotRunning
        );
        jvmbridge_context_release(ctx);
    })
}

#[test]
fn unknown_flags_are_rejected() {
    test_nonex(|| unsafe {
        let mut ctx: *mut jvmbridge_context = ptr::null_mut();
        jvmbridge_context_create(&mut ctx);
        let path = CString::new("/nonexistent/libjvm.so").unwrap();
        assert_eq!(
            jvmbridge_context_start(ctx, path.as_ptr(), ptr::null(), 0, 0x80, ptr::null()),
            jvmbridge_error::InvalidArgument
        );
        jvmbridge_context_release(ctx);
    })
}

#[test]
fn default_limits_and_zero_capacity() {
    let defaults = jvmbridge_frame_limits_default();
    assert_eq!(defaults.default_capacity, 16);
    assert_eq!(defaults.boot_capacity, 128);
    assert_eq!(defaults.max_cause_depth, 8);

    test_nonex(|| unsafe {
        let mut ctx: *mut jvmbridge_context = ptr::null_mut();
        jvmbridge_context_create(&mut ctx);
        let path = CString::new("/nonexistent/libjvm.so").unwrap();
        let limits = jvmbridge_frame_limits {
            default_capacity: 0,
            ..jvmbridge_frame_limits_default()
        };
        assert_eq!(
            jvmbridge_context_start(ctx, path.as_ptr(), ptr::null(), 0, 0, &limits),
            jvmbridge_error::InvalidArgument
        );
        jvmbridge_context_release(ctx);
    })
}
