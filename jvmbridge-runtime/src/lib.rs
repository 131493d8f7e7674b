//! # jvmbridge-runtime
//!
//! Embed a Java virtual machine in a host process.
//!
//! A [`Context`] loads the runtime library, creates the virtual machine and boots a companion
//! object on the managed side, through which the rest of the bridge talks to the runtime.
//! Threads are attached on demand, every runtime call happens inside a [`Frame`] that bounds its
//! local references, and shutdown releases everything in the reverse order it was set up.
//!
//! ```no_run
//! use jvmbridge_runtime::{BootConfig, Context};
//!
//! let ctx = Context::new();
//! ctx.start(&BootConfig::new("/usr/lib/jvm/default/lib/server/libjvm.so").with_option("-Xmx256m"))
//!     .unwrap();
//! let frame = ctx.frame().unwrap();
//! let s = frame.new_string("hello").unwrap();
//! assert_eq!(ctx.hash_code(&frame, s).unwrap(), "hello".chars().fold(0i32, |h, c| {
//!     h.wrapping_mul(31).wrapping_add(c as i32)
//! }));
//! drop(frame);
//! ctx.shutdown(true).unwrap();
//! ```
//!
//! Hosts that are themselves loaded by a JVM use
//! [`Context::attach_external`](struct.Context.html#method.attach_external) instead of `start`.
//!
//! The C API lives in [`c_api`](c_api/index.html); its functions return
//! [`jvmbridge_error`](c_api/enum.jvmbridge_error.html) codes.

#![deny(bare_trait_objects)]

pub mod c_api;

pub use jvmbridge_runtime_internals::config::{BootConfig, BootFlags, FrameLimits};
pub use jvmbridge_runtime_internals::context::bindings::{
    Binding, BindingSpec, BindingTable, BootstrapBindings, Operation,
};
pub use jvmbridge_runtime_internals::context::{CallResult, Context, State};
pub use jvmbridge_runtime_internals::error::{Error, ManagedException};
pub use jvmbridge_runtime_internals::frame::Frame;
pub use jvmbridge_runtime_internals::interrupt::{
    self, HostSignal, InterruptArbiter, InterruptState, SigIntHostSignal,
};
pub use jvmbridge_runtime_internals::reference::{ClassRef, GlobalRef, LocalRef};
pub use jvmbridge_runtime_internals::resource::Resource;
pub use jvmbridge_runtime_internals::runtime::{
    self, mock, Env, InitArgs, JniLauncher, JniRuntime, Launcher, MethodId, RawRef, ReturnKind, Runtime,
    Target, Value,
};
pub use jvmbridge_runtime_internals::services::MemoryStats;
pub use jvmbridge_runtime_internals::thread::AttachGuard;
