//! Transient and durable references into the managed heap.
//!
//! A [`LocalRef`] is only valid inside the [`Frame`](../frame/struct.Frame.html) that produced it,
//! which the borrow checker enforces through its lifetime. Anything that must outlive the frame is
//! promoted with [`Frame::promote`](../frame/struct.Frame.html#method.promote) into a
//! [`GlobalRef`], which owns its runtime-side handle and releases it exactly once.

use crate::frame::Frame;
use crate::runtime::{RawRef, Runtime};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

/// A frame-scoped reference.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct LocalRef<'frame> {
    raw: RawRef,
    _frame: PhantomData<&'frame ()>,
}

impl<'frame> LocalRef<'frame> {
    pub(crate) fn new(raw: RawRef) -> Self {
        LocalRef {
            raw,
            _frame: PhantomData,
        }
    }

    pub fn as_raw(&self) -> RawRef {
        self.raw
    }
}

impl<'frame> fmt::Debug for LocalRef<'frame> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalRef({:#x})", self.raw.as_raw())
    }
}

/// A durable reference, valid until it is released or dropped.
///
/// Release does not attach the calling thread: if the thread is detached, or the runtime has
/// already been shut down, the handle is abandoned instead. Both cases only happen while the
/// process is tearing the bridge down.
pub struct GlobalRef {
    raw: Option<RawRef>,
    runtime: Weak<dyn Runtime>,
}

impl GlobalRef {
    pub(crate) fn new(raw: RawRef, runtime: &Arc<dyn Runtime>) -> Self {
        GlobalRef {
            raw: Some(raw),
            runtime: Arc::downgrade(runtime),
        }
    }

    /// The raw handle, or `None` once released.
    pub fn as_raw(&self) -> Option<RawRef> {
        self.raw
    }

    /// Reborrow this reference for use within `frame`.
    ///
    /// The result lives no longer than either the frame or this reference.
    pub fn local<'a>(&'a self, _frame: &'a Frame<'_>) -> Option<LocalRef<'a>> {
        self.raw.map(LocalRef::new)
    }

    /// Release the runtime-side handle now. Returns whether the runtime accepted the release.
    pub fn release(mut self) -> bool {
        self.release_inner()
    }

    fn release_inner(&mut self) -> bool {
        let raw = match self.raw.take() {
            Some(raw) => raw,
            None => return false,
        };
        let runtime = match self.runtime.upgrade() {
            Some(rt) => rt,
            None => return false,
        };
        match runtime.get_env() {
            Some(env) => {
                runtime.delete_global_ref(env, raw);
                true
            }
            None => {
                tracing::trace!(
                    "abandoning global reference {:#x} from detached thread",
                    raw.as_raw()
                );
                false
            }
        }
    }
}

impl Drop for GlobalRef {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for GlobalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw {
            Some(raw) => write!(f, "GlobalRef({:#x})", raw.as_raw()),
            None => write!(f, "GlobalRef(released)"),
        }
    }
}

/// A durable reference known to denote a class.
#[derive(Debug)]
pub struct ClassRef {
    name: String,
    global: GlobalRef,
}

impl ClassRef {
    pub(crate) fn new(name: impl Into<String>, global: GlobalRef) -> Self {
        ClassRef {
            name: name.into(),
            global,
        }
    }

    /// The binary name in dotted form, e.g. `java.lang.Object`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn global(&self) -> &GlobalRef {
        &self.global
    }

    pub fn as_raw(&self) -> Option<RawRef> {
        self.global.as_raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntimeBuilder;

    #[test]
    fn global_ref_releases_once() {
        let mock = MockRuntimeBuilder::new().build();
        let rt: Arc<dyn Runtime> = mock.clone();
        let env = rt.attach_current_thread(true).unwrap();
        let obj = rt.new_string(env, "held").unwrap();
        let global = rt.new_global_ref(env, obj).unwrap();
        assert_eq!(mock.global_ref_count(), 1);

        let global = GlobalRef::new(global, &rt);
        assert!(global.release());
        assert_eq!(mock.global_ref_count(), 0);
        rt.detach_current_thread();
    }

    #[test]
    fn global_ref_dropped_after_runtime_gone_is_abandoned() {
        let mock = MockRuntimeBuilder::new().build();
        let rt: Arc<dyn Runtime> = mock.clone();
        let env = rt.attach_current_thread(true).unwrap();
        let obj = rt.new_string(env, "held").unwrap();
        let raw = rt.new_global_ref(env, obj).unwrap();
        let global = GlobalRef::new(raw, &rt);
        rt.detach_current_thread();

        // detached thread: nothing is released, nothing attaches
        drop(global);
        assert_eq!(mock.global_ref_count(), 1);
        assert_eq!(mock.attached_thread_count(), 0);
    }
}
