use crate::{BootConfig, BootFlags, Context, FrameLimits, JniRuntime, Runtime};
use jvmbridge_runtime_internals::c_api::*;
use jvmbridge_runtime_internals::interrupt;
use jvmbridge_runtime_internals::{assert_nonnull, with_ffi_context};
use libc::{c_char, c_int, c_void};
use num_traits::FromPrimitive;
use std::ffi::CStr;
use std::sync::{Arc, Once};

#[no_mangle]
pub extern "C" fn jvmbridge_error_name(e: c_int) -> *const c_char {
    if let Some(e) = jvmbridge_error::from_i32(e) {
        use self::jvmbridge_error::*;
        match e {
            Ok => "jvmbridge_error_ok\0".as_ptr() as _,
            InvalidArgument => "jvmbridge_error_invalid_argument\0".as_ptr() as _,
            LoadFailure => "jvmbridge_error_load_failure\0".as_ptr() as _,
            SymbolNotFound => "jvmbridge_error_symbol_not_found\0".as_ptr() as _,
            BootFailure => "jvmbridge_error_boot_failure\0".as_ptr() as _,
            AlreadyStarted => "jvmbridge_error_already_started\0".as_ptr() as _,
            NotRunning => "jvmbridge_error_not_running\0".as_ptr() as _,
            AttachFailure => "jvmbridge_error_attach_failure\0".as_ptr() as _,
            ResourceExhausted => "jvmbridge_error_resource_exhausted\0".as_ptr() as _,
            Interrupted => "jvmbridge_error_interrupted\0".as_ptr() as _,
            RuntimeException => "jvmbridge_error_runtime_exception\0".as_ptr() as _,
            ClassNotFound => "jvmbridge_error_class_not_found\0".as_ptr() as _,
            Unsupported => "jvmbridge_error_unsupported\0".as_ptr() as _,
            Internal => "jvmbridge_error_internal\0".as_ptr() as _,
        }
    } else {
        "!!! error: unknown jvmbridge_error variant\0".as_ptr() as _
    }
}

#[no_mangle]
pub extern "C" fn jvmbridge_interrupt_state_name(state: c_int) -> *const c_char {
    if let Some(state) = jvmbridge_interrupt_state::from_i32(state) {
        use self::jvmbridge_interrupt_state::*;
        match state {
            None => "jvmbridge_interrupt_state_none\0".as_ptr() as _,
            Pending => "jvmbridge_interrupt_state_pending\0".as_ptr() as _,
            Acknowledged => "jvmbridge_interrupt_state_acknowledged\0".as_ptr() as _,
        }
    } else {
        "!!! unknown jvmbridge_interrupt_state variant!\0".as_ptr() as _
    }
}

#[no_mangle]
pub unsafe extern "C" fn jvmbridge_context_create(
    context_out: *mut *mut jvmbridge_context,
) -> jvmbridge_error {
    assert_nonnull!(context_out);
    context_out.write(Arc::into_raw(Context::new()) as _);
    jvmbridge_error::Ok
}

/// Release the caller's handle. Does not shut the runtime down.
#[no_mangle]
pub unsafe extern "C" fn jvmbridge_context_release(context: *mut jvmbridge_context) {
    if !context.is_null() {
        Arc::from_raw(context as *const Context);
    }
}

/// The limits a context uses when none are given.
#[no_mangle]
pub extern "C" fn jvmbridge_frame_limits_default() -> jvmbridge_frame_limits {
    jvmbridge_frame_limits::from(&FrameLimits::default())
}

unsafe fn boot_config(
    library_path: *const c_char,
    options: *const *const c_char,
    n_options: usize,
    flags: u32,
    limits: *const jvmbridge_frame_limits,
) -> Result<BootConfig, jvmbridge_error> {
    let library_path = if library_path.is_null() {
        ""
    } else {
        CStr::from_ptr(library_path)
            .to_str()
            .map_err(|_| jvmbridge_error::InvalidArgument)?
    };
    let limits = limits
        .as_ref()
        .map(FrameLimits::from)
        .unwrap_or_default();
    if limits.default_capacity == 0 || limits.boot_capacity == 0 {
        return Err(jvmbridge_error::InvalidArgument);
    }
    let mut config = BootConfig::new(library_path)
        .with_flags(BootFlags::from_bits(flags).ok_or(jvmbridge_error::InvalidArgument)?)
        .with_limits(limits);
    if n_options > 0 {
        if options.is_null() {
            return Err(jvmbridge_error::InvalidArgument);
        }
        for &option in std::slice::from_raw_parts(options, n_options) {
            if option.is_null() {
                return Err(jvmbridge_error::InvalidArgument);
            }
            let option = CStr::from_ptr(option)
                .to_str()
                .map_err(|_| jvmbridge_error::InvalidArgument)?;
            config = config.with_option(option);
        }
    }
    Ok(config)
}

/// Load the runtime library at `library_path` and boot the context.
///
/// `flags` is a combination of the `BootFlags` bits; `limits` may be null.
#[no_mangle]
pub unsafe extern "C" fn jvmbridge_context_start(
    context: *mut jvmbridge_context,
    library_path: *const c_char,
    options: *const *const c_char,
    n_options: usize,
    flags: u32,
    limits: *const jvmbridge_frame_limits,
) -> jvmbridge_error {
    assert_nonnull!(library_path);
    let config = match boot_config(library_path, options, n_options, flags, limits) {
        Ok(config) => config,
        Err(e) => return e,
    };
    with_ffi_context!(context, { context.start(&config).into() })
}

/// Boot the context against the already-running virtual machine `vm` (a `JavaVM*`).
#[no_mangle]
pub unsafe extern "C" fn jvmbridge_context_attach_external(
    context: *mut jvmbridge_context,
    vm: *mut c_void,
    flags: u32,
    limits: *const jvmbridge_frame_limits,
) -> jvmbridge_error {
    assert_nonnull!(vm);
    let config = match boot_config(std::ptr::null(), std::ptr::null(), 0, flags, limits) {
        Ok(config) => config,
        Err(e) => return e,
    };
    let runtime: Arc<dyn Runtime> = JniRuntime::from_raw_vm(vm);
    with_ffi_context!(context, {
        context.attach_external(runtime, &config).into()
    })
}

#[no_mangle]
pub unsafe extern "C" fn jvmbridge_context_shutdown(
    context: *mut jvmbridge_context,
    graceful: bool,
) -> jvmbridge_error {
    with_ffi_context!(context, { context.shutdown(graceful).into() })
}

#[no_mangle]
pub unsafe extern "C" fn jvmbridge_context_is_running(
    context: *const jvmbridge_context,
    running_out: *mut bool,
) -> jvmbridge_error {
    assert_nonnull!(running_out);
    with_ffi_context!(context, {
        running_out.write(context.is_running());
        jvmbridge_error::Ok
    })
}

#[no_mangle]
pub unsafe extern "C" fn jvmbridge_thread_attach(context: *mut jvmbridge_context) -> jvmbridge_error {
    with_ffi_context!(context, { context.attach().into() })
}

#[no_mangle]
pub unsafe extern "C" fn jvmbridge_thread_attach_daemon(
    context: *mut jvmbridge_context,
) -> jvmbridge_error {
    with_ffi_context!(context, { context.attach_as_daemon().into() })
}

#[no_mangle]
pub unsafe extern "C" fn jvmbridge_thread_detach(context: *mut jvmbridge_context) -> jvmbridge_error {
    with_ffi_context!(context, {
        context.detach();
        jvmbridge_error::Ok
    })
}

#[no_mangle]
pub unsafe extern "C" fn jvmbridge_thread_is_attached(
    context: *const jvmbridge_context,
    attached_out: *mut bool,
) -> jvmbridge_error {
    assert_nonnull!(attached_out);
    with_ffi_context!(context, {
        attached_out.write(context.is_thread_attached());
        jvmbridge_error::Ok
    })
}

#[no_mangle]
pub unsafe extern "C" fn jvmbridge_interrupt(context: *mut jvmbridge_context) -> jvmbridge_error {
    with_ffi_context!(context, { context.interrupt().into() })
}

#[no_mangle]
pub unsafe extern "C" fn jvmbridge_interrupt_acknowledge(
    context: *mut jvmbridge_context,
) -> jvmbridge_error {
    with_ffi_context!(context, { context.acknowledge_interrupt().into() })
}

#[no_mangle]
pub extern "C" fn jvmbridge_interrupt_get_state() -> jvmbridge_interrupt_state {
    interrupt::arbiter().state().into()
}

#[no_mangle]
pub unsafe extern "C" fn jvmbridge_gc(context: *mut jvmbridge_context) -> jvmbridge_error {
    with_ffi_context!(context, {
        context
            .frame()
            .and_then(|frame| context.trigger_gc(&frame))
            .into()
    })
}

/// Called by the companion when the runtime is shutting down on its own.
#[no_mangle]
pub extern "system" fn Java_org_jvmbridge_BridgeContext_onShutdown(
    _env: *mut c_void,
    _obj: *mut c_void,
    context_id: i64,
) {
    match Context::active() {
        Some(context) if Arc::as_ptr(&context) as usize as i64 == context_id => {
            context.on_managed_shutdown()
        }
        Some(_) => tracing::warn!("shutdown notice for unknown context {:#x}", context_id),
        None => tracing::debug!("shutdown notice with no active context"),
    }
}

/// Called by the runtime when it has been interrupted.
#[no_mangle]
pub extern "system" fn Java_org_jvmbridge_BridgeSignal_interruptHost(
    _env: *mut c_void,
    _cls: *mut c_void,
) {
    interrupt::arbiter().runtime_interrupt();
}

/// Called by the runtime once it has consumed an interrupt itself.
#[no_mangle]
pub extern "system" fn Java_org_jvmbridge_BridgeSignal_acknowledgeHost(
    _env: *mut c_void,
    _cls: *mut c_void,
) {
    interrupt::arbiter().clear();
}

static C_API_INIT: Once = Once::new();

/// Keep the native callbacks the runtime looks up by name from being dropped by the linker.
///
/// [`Context::start`](../struct.Context.html#method.start) callers linking statically should call
/// this once.
pub fn ensure_linked() {
    use std::ptr::read_volatile;
    C_API_INIT.call_once(|| unsafe {
        read_volatile(Java_org_jvmbridge_BridgeContext_onShutdown as *const extern "C" fn());
        read_volatile(Java_org_jvmbridge_BridgeSignal_interruptHost as *const extern "C" fn());
        read_volatile(Java_org_jvmbridge_BridgeSignal_acknowledgeHost as *const extern "C" fn());
    });
}
