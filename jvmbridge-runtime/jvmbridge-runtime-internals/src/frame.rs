//! Scoped frames for transient references.
//!
//! Every call into the runtime happens inside a [`Frame`]. Opening a frame pushes a runtime local
//! frame of bounded capacity; dropping it pops that frame, which frees every local reference
//! created inside it on all exit paths. References handed out by a frame borrow it, so they
//! cannot escape; anything that must outlive the frame goes through [`Frame::promote`].
//!
//! Runtime local frames form a stack per thread. A nested frame borrows its parent, so it is
//! always closed first. Independent top-level frames on one thread may still be dropped in any
//! order: a frame closed while a younger one is open stays pushed until everything above it has
//! been closed too.
//!
//! Each operation checks for a pending runtime exception before returning, and converts it into
//! [`Error::RuntimeSideException`] with its cause chain.

use crate::context::bindings::BootstrapBindings;
use crate::error::{Error, ManagedException};
use crate::interrupt;
use crate::reference::{GlobalRef, LocalRef};
use crate::runtime::{Env, MethodId, RawRef, ReturnKind, Runtime, Target, Value};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

const DEFAULT_MAX_CAUSE_DEPTH: usize = 8;

/// A frame pushed on the calling thread, and whether its owner has closed it yet.
struct OpenFrame {
    id: u64,
    closed: Option<(Arc<dyn Runtime>, Env)>,
}

thread_local! {
    static FRAME_STACK: RefCell<Vec<OpenFrame>> = RefCell::new(Vec::new());
    static NEXT_FRAME_ID: Cell<u64> = Cell::new(0);
}

/// Frames pushed on the calling thread that have not been popped yet, closed or not.
pub fn open_frames() -> usize {
    FRAME_STACK.with(|stack| stack.borrow().len())
}

pub struct Frame<'parent> {
    id: u64,
    runtime: Arc<dyn Runtime>,
    env: Env,
    capacity: usize,
    used: Cell<usize>,
    bootstrap: Option<Arc<BootstrapBindings>>,
    max_cause_depth: usize,
    _parent: PhantomData<&'parent ()>,
    // the env belongs to the thread that pushed the frame
    _not_send: PhantomData<*const ()>,
}

impl<'parent> fmt::Debug for Frame<'parent> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("used", &self.used.get())
            .finish_non_exhaustive()
    }
}

impl Frame<'static> {
    /// Push a frame able to hold `capacity` local references on the calling thread.
    pub fn new(runtime: Arc<dyn Runtime>, env: Env, capacity: usize) -> Result<Frame<'static>, Error> {
        if capacity == 0 || !runtime.push_local_frame(env, capacity) {
            // a failed push leaves an OutOfMemoryError pending
            runtime.exception_clear(env);
            return Err(Error::ResourceExhausted(capacity));
        }
        let id = NEXT_FRAME_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            id
        });
        FRAME_STACK.with(|stack| stack.borrow_mut().push(OpenFrame { id, closed: None }));
        Ok(Frame {
            id,
            runtime,
            env,
            capacity,
            used: Cell::new(0),
            bootstrap: None,
            max_cause_depth: DEFAULT_MAX_CAUSE_DEPTH,
            _parent: PhantomData,
            _not_send: PhantomData,
        })
    }
}

impl<'parent> Frame<'parent> {
    /// Translate pending exceptions with the full bootstrap bindings rather than by class only.
    pub(crate) fn with_bootstrap(
        mut self,
        bootstrap: Arc<BootstrapBindings>,
        max_cause_depth: usize,
    ) -> Self {
        self.bootstrap = Some(bootstrap);
        self.max_cause_depth = max_cause_depth;
        self
    }

    pub fn env(&self) -> Env {
        self.env
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Local references created in this frame so far.
    pub fn used(&self) -> usize {
        self.used.get()
    }

    /// Open a nested frame on the same thread. It borrows this one, so it is closed first:
    ///
    /// ```compile_fail
    /// # fn f(ctx: &jvmbridge_runtime_internals::context::Context) {
    /// let outer = ctx.frame().unwrap();
    /// let inner = outer.nested(4).unwrap();
    /// drop(outer);
    /// inner.check().unwrap();
    /// # }
    /// ```
    pub fn nested(&self, capacity: usize) -> Result<Frame<'_>, Error> {
        let frame = Frame::new(self.runtime.clone(), self.env, capacity)?;
        Ok(match &self.bootstrap {
            Some(bs) => frame.with_bootstrap(bs.clone(), self.max_cause_depth),
            None => frame,
        })
    }

    /// Account for a new local reference, rejecting it if the frame is full.
    fn track(&self, raw: RawRef) -> Result<LocalRef<'_>, Error> {
        let used = self.used.get();
        if used >= self.capacity {
            self.runtime.delete_local_ref(self.env, raw);
            return Err(Error::ResourceExhausted(self.capacity));
        }
        self.used.set(used + 1);
        Ok(LocalRef::new(raw))
    }

    fn track_opt(&self, raw: Option<RawRef>) -> Result<Option<LocalRef<'_>>, Error> {
        raw.map(|r| self.track(r)).transpose()
    }

    /// Wrap an object produced by [`call`](#method.call).
    ///
    /// The reference was already accounted for by the call that produced it.
    pub fn object(&self, value: Value) -> Option<LocalRef<'_>> {
        value.as_object().map(LocalRef::new)
    }

    /// Find a class by binary name, in either dotted or slash form.
    pub fn find_class(&self, name: &str) -> Result<LocalRef<'_>, Error> {
        let slash = name.replace('.', "/");
        let class = self.runtime.find_class(self.env, &slash);
        self.check()?;
        match class {
            Some(class) => self.track(class),
            None => Err(Error::ClassNotFound(name.to_string())),
        }
    }

    pub fn method_id(&self, class: LocalRef<'_>, name: &str, sig: &str) -> Result<MethodId, Error> {
        self.lookup_method(class, name, sig, false)
    }

    pub fn static_method_id(
        &self,
        class: LocalRef<'_>,
        name: &str,
        sig: &str,
    ) -> Result<MethodId, Error> {
        self.lookup_method(class, name, sig, true)
    }

    fn lookup_method(
        &self,
        class: LocalRef<'_>,
        name: &str,
        sig: &str,
        is_static: bool,
    ) -> Result<MethodId, Error> {
        let mid = self
            .runtime
            .method_id(self.env, class.as_raw(), name, sig, is_static);
        self.check()?;
        mid.ok_or_else(|| bridge_format_err!("no method id for {}{}", name, sig))
    }

    /// Call a method and check for a pending exception.
    ///
    /// Object results are counted against the frame's capacity.
    pub fn call(
        &self,
        target: Target,
        method: MethodId,
        ret: ReturnKind,
        args: &[Value],
    ) -> Result<Value, Error> {
        let result = self.runtime.call(self.env, target, method, ret, args);
        self.check()?;
        if let Value::Object(Some(obj)) = result {
            self.track(obj)?;
        }
        Ok(result)
    }

    pub fn is_instance_of(&self, obj: LocalRef<'_>, class: RawRef) -> bool {
        self.runtime
            .is_instance_of(self.env, obj.as_raw(), class)
    }

    pub fn new_string(&self, s: &str) -> Result<LocalRef<'_>, Error> {
        let raw = self.runtime.new_string(self.env, s);
        self.check()?;
        raw.ok_or_else(|| bridge_format_err!("runtime returned null for new string"))
            .and_then(|r| self.track(r))
    }

    /// The contents of a runtime string.
    pub fn string(&self, s: LocalRef<'_>) -> Result<String, Error> {
        let chars = self.runtime.string_chars(self.env, s.as_raw());
        self.check()?;
        chars.ok_or_else(|| bridge_format_err!("unable to read runtime string"))
    }

    /// Like [`string`](#method.string), with `null` mapped to `None`.
    pub fn opt_string(&self, s: Option<LocalRef<'_>>) -> Result<Option<String>, Error> {
        s.map(|s| self.string(s)).transpose()
    }

    pub fn new_object_array(
        &self,
        len: usize,
        elem_class: LocalRef<'_>,
    ) -> Result<LocalRef<'_>, Error> {
        let raw = self
            .runtime
            .new_object_array(self.env, len, elem_class.as_raw());
        self.check()?;
        raw.ok_or_else(|| bridge_format_err!("runtime returned null for new array"))
            .and_then(|r| self.track(r))
    }

    pub fn new_int_array(&self, values: &[i32]) -> Result<LocalRef<'_>, Error> {
        let raw = self.runtime.new_int_array(self.env, values);
        self.check()?;
        raw.ok_or_else(|| bridge_format_err!("runtime returned null for new int array"))
            .and_then(|r| self.track(r))
    }

    pub fn array_get(&self, array: LocalRef<'_>, idx: usize) -> Result<Option<LocalRef<'_>>, Error> {
        let item = self
            .runtime
            .object_array_get(self.env, array.as_raw(), idx);
        self.check()?;
        self.track_opt(item)
    }

    pub fn array_set(
        &self,
        array: LocalRef<'_>,
        idx: usize,
        value: Option<LocalRef<'_>>,
    ) -> Result<(), Error> {
        self.runtime.object_array_set(
            self.env,
            array.as_raw(),
            idx,
            value.map(|v| v.as_raw()),
        );
        self.check()
    }

    pub fn array_length(&self, array: LocalRef<'_>) -> Result<usize, Error> {
        let len = self.runtime.array_length(self.env, array.as_raw());
        self.check()?;
        Ok(len)
    }

    /// Promote a local reference into a durable one.
    pub fn promote(&self, obj: LocalRef<'_>) -> Result<GlobalRef, Error> {
        let raw = self.runtime.new_global_ref(self.env, obj.as_raw());
        self.check()?;
        raw.map(|raw| GlobalRef::new(raw, &self.runtime))
            .ok_or_else(|| bridge_format_err!("runtime refused to create a global reference"))
    }

    /// Convert a pending runtime exception into an error.
    ///
    /// An interrupt exception arriving while an interrupt is pending is the runtime's echo of that
    /// interrupt; it is swallowed and reported once as [`Error::Interrupted`].
    pub fn check(&self) -> Result<(), Error> {
        let exc = match self.runtime.exception_occurred(self.env) {
            Some(exc) => exc,
            None => return Ok(()),
        };
        self.runtime.exception_clear(self.env);
        let err = self.translate(exc);
        // the throwable was handed out as a fresh local reference
        self.runtime.delete_local_ref(self.env, exc);
        Err(err)
    }

    fn translate(&self, exc: RawRef) -> Error {
        let bootstrap = match &self.bootstrap {
            Some(bs) => bs,
            None => {
                return Error::RuntimeSideException(ManagedException::new(
                    "java.lang.Throwable",
                    None,
                ))
            }
        };
        if bootstrap.is_interrupted_exception(&*self.runtime, self.env, exc)
            && interrupt::arbiter().claim_pending()
        {
            tracing::info!("InterruptRace: swallowed runtime interrupt while host interrupt pending");
            return Error::Interrupted;
        }
        let described = bootstrap.describe(&*self.runtime, self.env, exc, self.max_cause_depth);
        tracing::debug!("runtime exception: {}", described);
        Error::RuntimeSideException(described)
    }
}

impl<'parent> Drop for Frame<'parent> {
    fn drop(&mut self) {
        let id = self.id;
        let this = (self.runtime.clone(), self.env);
        let poppable = FRAME_STACK
            .try_with(|stack| {
                let mut stack = stack.borrow_mut();
                let idx = match stack.iter().rposition(|f| f.id == id) {
                    Some(idx) => idx,
                    None => return vec![this.clone()],
                };
                if idx + 1 != stack.len() {
                    tracing::debug!(
                        "frame closed with {} younger frame(s) open; deferring its pop",
                        stack.len() - idx - 1
                    );
                }
                stack[idx].closed = Some(this.clone());
                let mut poppable = vec![];
                while stack.last().map_or(false, |f| f.closed.is_some()) {
                    if let Some(closed) = stack.pop().and_then(|f| f.closed) {
                        poppable.push(closed);
                    }
                }
                poppable
            })
            .unwrap_or_else(|_| vec![this]);
        for (runtime, env) in poppable {
            runtime.pop_local_frame(env, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::{MockObject, MockRuntime, MockRuntimeBuilder};

    fn attached(mock: &Arc<MockRuntime>) -> (Arc<dyn Runtime>, Env) {
        let rt: Arc<dyn Runtime> = mock.clone();
        let env = rt.attach_current_thread(true).unwrap();
        (rt, env)
    }

    #[test]
    fn frame_pops_on_drop() {
        let mock = MockRuntimeBuilder::new().build();
        let (rt, env) = attached(&mock);
        {
            let frame = Frame::new(rt.clone(), env, 4).unwrap();
            assert_eq!(mock.frame_depth(), 1);
            let _nested = frame.nested(2).unwrap();
            assert_eq!(mock.frame_depth(), 2);
        }
        assert_eq!(mock.frame_depth(), 0);
    }

    #[test]
    fn exceeding_capacity_is_resource_exhausted() {
        let mock = MockRuntimeBuilder::new().build();
        let (rt, env) = attached(&mock);
        let frame = Frame::new(rt, env, 2).unwrap();
        frame.new_string("one").unwrap();
        frame.new_string("two").unwrap();
        match frame.new_string("three") {
            Err(Error::ResourceExhausted(2)) => (),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(frame.used(), 2);
    }

    #[test]
    fn zero_capacity_frame_is_rejected() {
        let mock = MockRuntimeBuilder::new().build();
        let (rt, env) = attached(&mock);
        assert!(matches!(
            Frame::new(rt, env, 0),
            Err(Error::ResourceExhausted(0))
        ));
    }

    #[test]
    fn promoted_reference_survives_frame() {
        let mock = MockRuntimeBuilder::new().build();
        let (rt, env) = attached(&mock);
        let global = {
            let frame = Frame::new(rt.clone(), env, 4).unwrap();
            let s = frame.new_string("durable").unwrap();
            frame.promote(s).unwrap()
        };
        assert_eq!(mock.global_ref_count(), 1);
        assert_eq!(
            mock.object(global.as_raw().unwrap()),
            Some(MockObject::Str("durable".to_string()))
        );
        drop(global);
        assert_eq!(mock.global_ref_count(), 0);
    }

    #[test]
    fn pending_exception_without_bootstrap_is_reported() {
        let mock = MockRuntimeBuilder::new().build();
        let (rt, env) = attached(&mock);
        let frame = Frame::new(rt, env, 4).unwrap();
        match frame.find_class("com.example.Missing") {
            Err(Error::RuntimeSideException(e)) => assert_eq!(e.class_name, "java.lang.Throwable"),
            other => panic!("unexpected result: {:?}", other),
        }
        // the exception was consumed
        assert!(frame.check().is_ok());
    }

    #[test]
    fn strings_round_trip_through_runtime() {
        let mock = MockRuntimeBuilder::new().build();
        let (rt, env) = attached(&mock);
        let frame = Frame::new(rt, env, 4).unwrap();
        let s = frame.new_string("héllo").unwrap();
        assert_eq!(frame.string(s).unwrap(), "héllo");
        assert_eq!(frame.opt_string(None).unwrap(), None);
    }

    #[test]
    fn frames_closed_out_of_order_pop_in_stack_order() {
        let mock = MockRuntimeBuilder::new().build();
        let (rt, env) = attached(&mock);
        let outer = Frame::new(rt.clone(), env, 4).unwrap();
        let inner = Frame::new(rt.clone(), env, 4).unwrap();
        let s = inner.new_string("inner-owned").unwrap();
        assert_eq!(mock.frame_depth(), 2);

        drop(outer);
        // the younger frame keeps its runtime frame, and its references with it
        assert_eq!(mock.frame_depth(), 2);
        assert_eq!(open_frames(), 2);
        assert_eq!(inner.string(s).unwrap(), "inner-owned");

        drop(inner);
        assert_eq!(mock.frame_depth(), 0);
        assert_eq!(open_frames(), 0);
    }

    #[test]
    fn checked_exception_releases_its_local() {
        let mock = MockRuntimeBuilder::new().build();
        let (rt, env) = attached(&mock);
        let frame = Frame::new(rt, env, 4).unwrap();
        mock.throw_new(env, "java/lang/IllegalStateException", Some("boom"));
        let locals = mock.local_count();
        assert!(frame.check().is_err());
        assert_eq!(mock.local_count(), locals);
    }
}
