//! The seam between the context core and a concrete managed runtime.
//!
//! [`Runtime`] covers the subset of the JNI invocation and native interfaces that the core needs.
//! Everything is expressed in terms of opaque handles ([`Env`], [`RawRef`], [`MethodId`]) so that
//! the same boot, frame, attach and shutdown logic drives both the real JVM backend
//! ([`JniRuntime`](jni/struct.JniRuntime.html)) and the in-process
//! [`MockRuntime`](mock/struct.MockRuntime.html).
//!
//! Failing native calls follow JNI conventions: they return `None` (or a default value) and leave
//! an exception pending on the calling thread. Callers are expected to go through a
//! [`Frame`](../frame/struct.Frame.html), which checks for and translates pending exceptions.

pub mod jni;
pub mod mock;

pub use crate::runtime::jni::{JniLauncher, JniRuntime};
pub use crate::runtime::mock::{MockLauncher, MockRuntime, MockRuntimeBuilder};

use crate::error::Error;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// A per-thread handle to the managed runtime's native interface.
///
/// For the JNI backend this is the `JNIEnv*` of the attached thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Env(NonZeroUsize);

impl Env {
    pub(crate) fn from_raw(raw: usize) -> Option<Env> {
        NonZeroUsize::new(raw).map(Env)
    }

    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

/// An untyped, unscoped reference into the managed heap.
///
/// Whether the reference is transient or durable is tracked by the wrappers in
/// [`reference`](../reference/index.html); a bare `RawRef` carries no lifetime.
///
/// Handles only come from a [`Runtime`]; they cannot be made up outside this crate:
///
/// ```compile_fail
/// let forged = jvmbridge_runtime_internals::runtime::RawRef::from_raw(0x1000);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RawRef(NonZeroUsize);

impl RawRef {
    pub(crate) fn from_raw(raw: usize) -> Option<RawRef> {
        NonZeroUsize::new(raw).map(RawRef)
    }

    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

/// A resolved method identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MethodId(NonZeroUsize);

impl MethodId {
    pub(crate) fn from_raw(raw: usize) -> Option<MethodId> {
        NonZeroUsize::new(raw).map(MethodId)
    }

    pub fn as_raw(self) -> usize {
        self.0.get()
    }
}

/// The receiver of a method call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// A static method of the given class.
    Static(RawRef),
    /// An instance method of the given object.
    Instance(RawRef),
}

/// The return kind of a method, derived from its descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnKind {
    Void,
    Boolean,
    Int,
    Long,
    Double,
    Object,
}

impl ReturnKind {
    /// Derive the return kind from a JNI method descriptor such as `(Ljava/lang/Object;)Z`.
    pub fn from_signature(sig: &str) -> Result<ReturnKind, Error> {
        let ret = sig
            .rfind(')')
            .and_then(|idx| sig[idx + 1..].chars().next())
            .ok_or(Error::InvalidArgument("malformed method descriptor"))?;
        match ret {
            'V' => Ok(ReturnKind::Void),
            'Z' => Ok(ReturnKind::Boolean),
            'I' => Ok(ReturnKind::Int),
            'J' => Ok(ReturnKind::Long),
            'D' => Ok(ReturnKind::Double),
            'L' | '[' => Ok(ReturnKind::Object),
            other => Err(Error::Unsupported(format!(
                "return type `{}` in descriptor `{}`",
                other, sig
            ))),
        }
    }
}

/// An argument to, or result of, a managed method call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Void,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Object(Option<RawRef>),
}

impl Value {
    pub fn null() -> Value {
        Value::Object(None)
    }

    /// The zero value of a return kind, as produced by a call that raised an exception.
    pub fn zero(kind: ReturnKind) -> Value {
        match kind {
            ReturnKind::Void => Value::Void,
            ReturnKind::Boolean => Value::Boolean(false),
            ReturnKind::Int => Value::Int(0),
            ReturnKind::Long => Value::Long(0),
            ReturnKind::Double => Value::Double(0.0),
            ReturnKind::Object => Value::Object(None),
        }
    }

    pub fn as_object(&self) -> Option<RawRef> {
        match self {
            Value::Object(o) => *o,
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(l) => Some(*l),
            _ => None,
        }
    }
}

/// Arguments for creating a managed runtime.
#[derive(Clone, Debug, Default)]
pub struct InitArgs {
    pub options: Vec<String>,
    pub ignore_unrecognized: bool,
}

/// The services of a managed runtime used by the context core.
///
/// Implementations must be safe to call from any thread; per-thread state is keyed on the
/// [`Env`] handed out by [`get_env`](#tymethod.get_env) or the attach methods.
pub trait Runtime: Send + Sync {
    /// The native interface for the calling thread, or `None` if the thread is not attached or the
    /// runtime has been destroyed.
    fn get_env(&self) -> Option<Env>;

    /// Attach the calling thread. Daemon threads do not hold up runtime destruction.
    fn attach_current_thread(&self, daemon: bool) -> Result<Env, Error>;

    /// Detach the calling thread. Detaching a thread that is not attached has no effect.
    fn detach_current_thread(&self);

    /// Wait for all non-daemon threads and tear the runtime down.
    fn destroy(&self) -> Result<(), Error>;

    fn push_local_frame(&self, env: Env, capacity: usize) -> bool;
    fn pop_local_frame(&self, env: Env, keep: Option<RawRef>) -> Option<RawRef>;
    fn new_global_ref(&self, env: Env, obj: RawRef) -> Option<RawRef>;
    fn delete_global_ref(&self, env: Env, obj: RawRef);
    fn delete_local_ref(&self, env: Env, obj: RawRef);

    /// Find a class by its binary name in slash form, e.g. `java/lang/Object`.
    fn find_class(&self, env: Env, name: &str) -> Option<RawRef>;
    fn is_instance_of(&self, env: Env, obj: RawRef, class: RawRef) -> bool;
    fn method_id(
        &self,
        env: Env,
        class: RawRef,
        name: &str,
        sig: &str,
        is_static: bool,
    ) -> Option<MethodId>;
    fn call(
        &self,
        env: Env,
        target: Target,
        method: MethodId,
        ret: ReturnKind,
        args: &[Value],
    ) -> Value;

    fn new_string(&self, env: Env, s: &str) -> Option<RawRef>;
    fn string_chars(&self, env: Env, s: RawRef) -> Option<String>;

    fn new_object_array(&self, env: Env, len: usize, elem_class: RawRef) -> Option<RawRef>;
    fn object_array_get(&self, env: Env, array: RawRef, idx: usize) -> Option<RawRef>;
    fn object_array_set(&self, env: Env, array: RawRef, idx: usize, value: Option<RawRef>);
    fn new_int_array(&self, env: Env, values: &[i32]) -> Option<RawRef>;
    fn array_length(&self, env: Env, array: RawRef) -> usize;

    fn exception_occurred(&self, env: Env) -> Option<RawRef>;
    fn exception_clear(&self, env: Env);
}

/// The platform side of booting a runtime: load the library, create the runtime from it, and
/// unload it again at shutdown.
pub trait Launcher: Send {
    fn load_library(&mut self, path: &std::path::Path) -> Result<(), Error>;

    fn create_runtime(&mut self, args: &InitArgs) -> Result<(Arc<dyn Runtime>, Env), Error>;

    fn unload_library(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_kind_from_descriptor() {
        assert_eq!(
            ReturnKind::from_signature("()Ljava/lang/String;").unwrap(),
            ReturnKind::Object
        );
        assert_eq!(
            ReturnKind::from_signature("(Ljava/lang/Object;)Z").unwrap(),
            ReturnKind::Boolean
        );
        assert_eq!(
            ReturnKind::from_signature("([ILjava/lang/Object;)[Ljava/lang/Object;").unwrap(),
            ReturnKind::Object
        );
        assert_eq!(ReturnKind::from_signature("(J)V").unwrap(), ReturnKind::Void);
        assert!(ReturnKind::from_signature("()F").is_err());
        assert!(ReturnKind::from_signature("garbage").is_err());
    }

    #[test]
    fn handles_reject_null() {
        assert!(RawRef::from_raw(0).is_none());
        assert!(Env::from_raw(0).is_none());
        assert_eq!(MethodId::from_raw(7).map(MethodId::as_raw), Some(7));
    }
}
