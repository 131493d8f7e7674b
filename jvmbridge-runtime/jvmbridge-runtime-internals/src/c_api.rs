#![allow(non_camel_case_types)]

use crate::config::FrameLimits;
use crate::error::Error;
use crate::interrupt::InterruptState;
use num_derive::FromPrimitive;

#[macro_export]
macro_rules! assert_nonnull {
    ( $name:ident ) => {
        if $name.is_null() {
            return jvmbridge_error::InvalidArgument;
        }
    };
}

/// Borrow the context behind a raw `Arc` pointer for the duration of `$body`.
///
/// The pointer must have come from `Arc::into_raw`; the reference count is left untouched.
#[macro_export]
macro_rules! with_ffi_context {
    ( $name:ident, $body:block ) => {{
        assert_nonnull!($name);
        let $name = Arc::from_raw($name as *const Context);
        let res = $body;
        Arc::into_raw($name);
        res
    }};
}

/// Opaque handle for a context across the C boundary.
#[repr(C)]
pub struct jvmbridge_context {
    _unused: [u8; 0],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
pub enum jvmbridge_error {
    Ok,
    InvalidArgument,
    LoadFailure,
    SymbolNotFound,
    BootFailure,
    AlreadyStarted,
    NotRunning,
    AttachFailure,
    ResourceExhausted,
    Interrupted,
    RuntimeException,
    ClassNotFound,
    Unsupported,
    Internal,
}

impl From<Error> for jvmbridge_error {
    fn from(e: Error) -> jvmbridge_error {
        (&e).into()
    }
}

impl From<&Error> for jvmbridge_error {
    fn from(e: &Error) -> jvmbridge_error {
        match e {
            Error::InvalidArgument(_) => jvmbridge_error::InvalidArgument,
            Error::LoadFailure { .. } => jvmbridge_error::LoadFailure,
            Error::SymbolNotFound(_) => jvmbridge_error::SymbolNotFound,
            Error::BootFailure(_) => jvmbridge_error::BootFailure,
            Error::AlreadyStarted => jvmbridge_error::AlreadyStarted,
            Error::NotRunning(_) => jvmbridge_error::NotRunning,
            Error::AttachFailure(_) => jvmbridge_error::AttachFailure,
            Error::ResourceExhausted(_) => jvmbridge_error::ResourceExhausted,
            Error::Interrupted => jvmbridge_error::Interrupted,
            Error::RuntimeSideException(_) => jvmbridge_error::RuntimeException,
            Error::ClassNotFound(_) => jvmbridge_error::ClassNotFound,
            Error::Unsupported(_) => jvmbridge_error::Unsupported,
            Error::InternalError(_) => jvmbridge_error::Internal,
        }
    }
}

impl<T> From<Result<T, Error>> for jvmbridge_error {
    fn from(res: Result<T, Error>) -> jvmbridge_error {
        match res {
            Ok(_) => jvmbridge_error::Ok,
            Err(e) => e.into(),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
pub enum jvmbridge_interrupt_state {
    None,
    Pending,
    Acknowledged,
}

impl From<InterruptState> for jvmbridge_interrupt_state {
    fn from(state: InterruptState) -> jvmbridge_interrupt_state {
        match state {
            InterruptState::None => jvmbridge_interrupt_state::None,
            InterruptState::Pending => jvmbridge_interrupt_state::Pending,
            InterruptState::Acknowledged => jvmbridge_interrupt_state::Acknowledged,
        }
    }
}

/// Local reference capacities used by a context.
///
/// Fields are taken as given; start from `jvmbridge_frame_limits_default()` to change only some.
#[derive(Clone, Debug)]
#[repr(C)]
pub struct jvmbridge_frame_limits {
    /// Capacity of frames opened by callers. (default 16)
    pub default_capacity: u32,
    /// Capacity of the frame held during boot. (default 128)
    pub boot_capacity: u32,
    /// How many causes of a runtime-side exception are described; zero describes none. (default 8)
    pub max_cause_depth: u32,
}

impl From<&FrameLimits> for jvmbridge_frame_limits {
    fn from(limits: &FrameLimits) -> jvmbridge_frame_limits {
        jvmbridge_frame_limits {
            default_capacity: limits.default_capacity as u32,
            boot_capacity: limits.boot_capacity as u32,
            max_cause_depth: limits.max_cause_depth as u32,
        }
    }
}

impl From<&jvmbridge_frame_limits> for FrameLimits {
    fn from(limits: &jvmbridge_frame_limits) -> FrameLimits {
        FrameLimits {
            default_capacity: limits.default_capacity as usize,
            boot_capacity: limits.boot_capacity as usize,
            max_cause_depth: limits.max_cause_depth as usize,
        }
    }
}
