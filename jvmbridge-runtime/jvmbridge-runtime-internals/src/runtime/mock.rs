//! An in-process stand-in for a managed runtime.
//!
//! `MockRuntime` models just enough of a JVM for the context core to boot, run and shut down
//! against it: a class table whose methods are Rust closures, a heap, per-thread attachment and
//! local frame stacks, global reference accounting, and pending exceptions. It ships with the
//! classes the boot sequence needs, including a companion class, and records an event log that
//! tests inspect.

use crate::error::Error;
use crate::runtime::{Env, InitArgs, Launcher, MethodId, RawRef, ReturnKind, Runtime, Target, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

/// The body of a mock method.
pub type MockMethodFn = dyn Fn(&MockRuntime, MockCall<'_>) -> Value + Send + Sync;

/// The arguments handed to a mock method body.
pub struct MockCall<'a> {
    pub env: Env,
    pub this: Option<RawRef>,
    pub args: &'a [Value],
}

impl<'a> MockCall<'a> {
    pub fn arg_object(&self, idx: usize) -> Option<RawRef> {
        self.args.get(idx).and_then(Value::as_object)
    }
}

/// Objects on the mock heap.
#[derive(Clone, Debug, PartialEq)]
pub enum MockObject {
    Plain {
        class: String,
    },
    Str(String),
    Class(String),
    ObjectArray {
        elem_class: String,
        items: Vec<Option<RawRef>>,
    },
    IntArray(Vec<i32>),
    Throwable {
        class: String,
        message: Option<String>,
        cause: Option<RawRef>,
        host_ids: Option<(i64, i64)>,
    },
    Package(String),
}

impl MockObject {
    fn class_name(&self) -> &str {
        match self {
            MockObject::Plain { class } => class,
            MockObject::Str(_) => "java/lang/String",
            MockObject::Class(_) => "java/lang/Class",
            MockObject::ObjectArray { .. } => "[Ljava/lang/Object;",
            MockObject::IntArray(_) => "[I",
            MockObject::Throwable { class, .. } => class,
            MockObject::Package(_) => "org/jvmbridge/pkg/BridgePackage",
        }
    }
}

struct MockMethod {
    class: String,
    name: String,
    sig: String,
    is_static: bool,
    body: Arc<MockMethodFn>,
}

struct MockThread {
    env: Env,
    daemon: bool,
    frames: Vec<usize>,
    pending: Option<RawRef>,
}

struct MockState {
    classes: HashMap<String, Option<String>>,
    methods: Vec<MockMethod>,
    heap: HashMap<usize, MockObject>,
    class_objects: HashMap<String, RawRef>,
    next_object: usize,
    globals: HashMap<RawRef, usize>,
    threads: HashMap<ThreadId, MockThread>,
    next_env: usize,
    attachments: usize,
    destroyed: bool,
    interrupted: bool,
    events: Vec<String>,
    invocations: HashMap<String, usize>,
    refuse_attach: bool,
    destroy_wait: Option<Duration>,
}

/// See the [module documentation](index.html).
pub struct MockRuntime {
    state: Mutex<MockState>,
    detached: Condvar,
}

impl MockRuntime {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        // a panicking mock method poisons nothing we can't keep using
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record an event in the log.
    pub fn note(&self, event: impl Into<String>) {
        self.lock().events.push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    /// Whether the class was ever looked up, directly or through `Class.forName`.
    pub fn class_requested(&self, slash_name: &str) -> bool {
        let needle = format!("find_class {}", slash_name);
        self.lock().events.iter().any(|e| *e == needle)
    }

    /// How many times `class.name` has been invoked.
    pub fn invocations(&self, class: &str, name: &str) -> usize {
        self.lock()
            .invocations
            .get(&format!("{}.{}", class, name))
            .copied()
            .unwrap_or(0)
    }

    pub fn global_ref_count(&self) -> usize {
        self.lock().globals.values().sum()
    }

    /// Live global references to one object.
    pub fn global_refs_to(&self, obj: RawRef) -> usize {
        self.lock().globals.get(&obj).copied().unwrap_or(0)
    }

    /// Total number of times any thread went from detached to attached.
    pub fn attachments(&self) -> usize {
        self.lock().attachments
    }

    pub fn attached_thread_count(&self) -> usize {
        self.lock().threads.len()
    }

    /// Whether the calling thread is attached as a daemon; `None` if it is not attached.
    pub fn is_daemon(&self) -> Option<bool> {
        self.lock()
            .threads
            .get(&thread::current().id())
            .map(|t| t.daemon)
    }

    /// Local frame depth of the calling thread.
    pub fn frame_depth(&self) -> usize {
        self.lock()
            .threads
            .get(&thread::current().id())
            .map(|t| t.frames.len())
            .unwrap_or(0)
    }

    /// Live local references in the calling thread's innermost frame.
    pub fn local_count(&self) -> usize {
        self.lock()
            .threads
            .get(&thread::current().id())
            .and_then(|t| t.frames.last().copied())
            .unwrap_or(0)
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }

    /// The runtime-side interrupt status of the main thread.
    pub fn is_interrupted(&self) -> bool {
        self.lock().interrupted
    }

    pub fn set_interrupted(&self, interrupted: bool) {
        self.lock().interrupted = interrupted;
    }

    pub fn object(&self, obj: RawRef) -> Option<MockObject> {
        self.lock().heap.get(&obj.as_raw()).cloned()
    }

    /// Place a new object on the heap and register it as a local reference of the calling thread.
    pub fn alloc(&self, obj: MockObject) -> RawRef {
        let mut st = self.lock();
        alloc_locked(&mut st, obj)
    }

    pub fn new_plain(&self, class: &str) -> RawRef {
        self.alloc(MockObject::Plain {
            class: class.to_string(),
        })
    }

    pub fn string_value(&self, obj: Option<RawRef>) -> Option<String> {
        match obj.and_then(|o| self.object(o)) {
            Some(MockObject::Str(s)) => Some(s),
            _ => None,
        }
    }

    /// The `java.lang.Class` object for a class, if the class exists.
    pub fn class_object(&self, slash_name: &str) -> Option<RawRef> {
        let mut st = self.lock();
        st.events.push(format!("find_class {}", slash_name));
        class_object_locked(&mut st, slash_name)
    }

    /// Throw an exception of the given class on the calling thread.
    pub fn throw_new(&self, env: Env, class: &str, message: Option<&str>) {
        let exc = self.alloc(MockObject::Throwable {
            class: class.to_string(),
            message: message.map(str::to_string),
            cause: None,
            host_ids: None,
        });
        self.throw(env, exc);
    }

    pub fn throw(&self, _env: Env, exc: RawRef) {
        let mut st = self.lock();
        if let Some(t) = st.threads.get_mut(&thread::current().id()) {
            t.pending = Some(exc);
        }
    }

    fn is_subclass<'a>(st: &'a MockState, mut class: &'a str, ancestor: &str) -> bool {
        if ancestor == "java/lang/Object" {
            return true;
        }
        loop {
            if class == ancestor {
                return true;
            }
            match st.classes.get(class) {
                Some(Some(sup)) => class = sup,
                _ => return false,
            }
        }
    }

    fn other_non_daemon_threads(st: &MockState) -> usize {
        let me = thread::current().id();
        st.threads
            .iter()
            .filter(|(id, t)| **id != me && !t.daemon)
            .count()
    }

    fn env_thread<'a>(st: &'a mut MockState) -> Option<&'a mut MockThread> {
        if st.destroyed {
            return None;
        }
        st.threads.get_mut(&thread::current().id())
    }
}

fn alloc_locked(st: &mut MockState, obj: MockObject) -> RawRef {
    st.next_object += 1;
    let id = st.next_object;
    st.heap.insert(id, obj);
    track_local(st);
    RawRef::from_raw(id).expect("object ids start at 1")
}

fn track_local(st: &mut MockState) {
    if let Some(t) = st.threads.get_mut(&thread::current().id()) {
        if let Some(top) = t.frames.last_mut() {
            *top += 1;
        }
    }
}

fn class_object_locked(st: &mut MockState, slash_name: &str) -> Option<RawRef> {
    if !st.classes.contains_key(slash_name) {
        return None;
    }
    if let Some(existing) = st.class_objects.get(slash_name) {
        let existing = *existing;
        track_local(st);
        return Some(existing);
    }
    let raw = alloc_locked(st, MockObject::Class(slash_name.to_string()));
    st.class_objects.insert(slash_name.to_string(), raw);
    Some(raw)
}

impl Runtime for MockRuntime {
    fn get_env(&self) -> Option<Env> {
        let mut st = self.lock();
        MockRuntime::env_thread(&mut st).map(|t| t.env)
    }

    fn attach_current_thread(&self, daemon: bool) -> Result<Env, Error> {
        let mut st = self.lock();
        if st.destroyed {
            return Err(Error::AttachFailure("runtime destroyed".to_string()));
        }
        if let Some(t) = st.threads.get(&thread::current().id()) {
            return Ok(t.env);
        }
        if st.refuse_attach {
            st.events.push("attach refused".to_string());
            return Err(Error::AttachFailure("attach refused by runtime".to_string()));
        }
        st.next_env += 1;
        let env = Env::from_raw(st.next_env).expect("env ids start at 1");
        st.threads.insert(
            thread::current().id(),
            MockThread {
                env,
                daemon,
                frames: vec![],
                pending: None,
            },
        );
        st.attachments += 1;
        st.events.push(if daemon {
            "attach daemon".to_string()
        } else {
            "attach".to_string()
        });
        Ok(env)
    }

    fn detach_current_thread(&self) {
        let mut st = self.lock();
        if st.threads.remove(&thread::current().id()).is_some() {
            st.events.push("detach".to_string());
            self.detached.notify_all();
        }
    }

    fn destroy(&self) -> Result<(), Error> {
        let mut st = self.lock();
        let waiting = st.threads.values().filter(|t| !t.daemon).count();
        st.events.push(format!("destroy (non-daemon threads: {})", waiting));
        if let Some(timeout) = st.destroy_wait {
            let deadline = Instant::now() + timeout;
            while MockRuntime::other_non_daemon_threads(&st) > 0 {
                let now = Instant::now();
                if now >= deadline {
                    st.events.push("destroy timed out".to_string());
                    break;
                }
                st = match self.detached.wait_timeout(st, deadline - now) {
                    Ok((guard, _)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                };
            }
        }
        st.destroyed = true;
        st.threads.clear();
        Ok(())
    }

    fn push_local_frame(&self, _env: Env, capacity: usize) -> bool {
        let mut st = self.lock();
        match MockRuntime::env_thread(&mut st) {
            Some(t) if capacity > 0 => {
                t.frames.push(0);
                true
            }
            _ => false,
        }
    }

    fn pop_local_frame(&self, _env: Env, keep: Option<RawRef>) -> Option<RawRef> {
        let mut st = self.lock();
        if let Some(t) = MockRuntime::env_thread(&mut st) {
            t.frames.pop();
        }
        if keep.is_some() {
            track_local(&mut st);
        }
        keep
    }

    fn new_global_ref(&self, _env: Env, obj: RawRef) -> Option<RawRef> {
        let mut st = self.lock();
        if !st.heap.contains_key(&obj.as_raw()) {
            return None;
        }
        *st.globals.entry(obj).or_insert(0) += 1;
        Some(obj)
    }

    fn delete_global_ref(&self, _env: Env, obj: RawRef) {
        let mut st = self.lock();
        if let Some(count) = st.globals.get_mut(&obj) {
            *count -= 1;
            if *count == 0 {
                st.globals.remove(&obj);
            }
        }
    }

    fn delete_local_ref(&self, _env: Env, _obj: RawRef) {
        let mut st = self.lock();
        if let Some(t) = st.threads.get_mut(&thread::current().id()) {
            if let Some(top) = t.frames.last_mut() {
                *top = top.saturating_sub(1);
            }
        }
    }

    fn find_class(&self, env: Env, name: &str) -> Option<RawRef> {
        match self.class_object(name) {
            Some(class) => Some(class),
            None => {
                self.throw_new(env, "java/lang/NoClassDefFoundError", Some(name));
                None
            }
        }
    }

    fn is_instance_of(&self, _env: Env, obj: RawRef, class: RawRef) -> bool {
        let st = self.lock();
        let target = match st.heap.get(&class.as_raw()) {
            Some(MockObject::Class(name)) => name.clone(),
            _ => return false,
        };
        match st.heap.get(&obj.as_raw()) {
            Some(o) => MockRuntime::is_subclass(&st, o.class_name(), &target),
            None => false,
        }
    }

    fn method_id(
        &self,
        env: Env,
        class: RawRef,
        name: &str,
        sig: &str,
        is_static: bool,
    ) -> Option<MethodId> {
        let found = {
            let mut st = self.lock();
            let mut class_name = match st.heap.get(&class.as_raw()) {
                Some(MockObject::Class(name)) => Some(name.clone()),
                _ => None,
            };
            st.events
                .push(format!("method_id {:?}.{}{}", class_name, name, sig));
            let mut found = None;
            // walk up the hierarchy like GetMethodID does
            while let Some(cls) = class_name.take() {
                if let Some(idx) = st.methods.iter().position(|m| {
                    m.class == cls && m.name == name && m.sig == sig && m.is_static == is_static
                }) {
                    found = MethodId::from_raw(idx + 1);
                    break;
                }
                class_name = st.classes.get(&cls).cloned().flatten();
            }
            found
        };
        if found.is_none() {
            self.throw_new(env, "java/lang/NoSuchMethodError", Some(name));
        }
        found
    }

    fn call(
        &self,
        env: Env,
        target: Target,
        method: MethodId,
        ret: ReturnKind,
        args: &[Value],
    ) -> Value {
        let body = {
            let mut st = self.lock();
            let found = st
                .methods
                .get(method.as_raw() - 1)
                .map(|m| (format!("{}.{}", m.class, m.name), m.body.clone()));
            let (key, body) = match found {
                Some(found) => found,
                None => {
                    drop(st);
                    self.throw_new(env, "java/lang/NoSuchMethodError", None);
                    return Value::zero(ret);
                }
            };
            st.events.push(format!("invoke {}", key));
            *st.invocations.entry(key).or_insert(0) += 1;
            body
        };
        let this = match target {
            Target::Instance(obj) => Some(obj),
            Target::Static(_) => None,
        };
        let result = body(self, MockCall { env, this, args });
        if self.lock_pending_is_set() {
            return Value::zero(ret);
        }
        result
    }

    fn new_string(&self, _env: Env, s: &str) -> Option<RawRef> {
        Some(self.alloc(MockObject::Str(s.to_string())))
    }

    fn string_chars(&self, _env: Env, s: RawRef) -> Option<String> {
        self.string_value(Some(s))
    }

    fn new_object_array(&self, _env: Env, len: usize, elem_class: RawRef) -> Option<RawRef> {
        let elem = match self.object(elem_class) {
            Some(MockObject::Class(name)) => name,
            _ => "java/lang/Object".to_string(),
        };
        Some(self.alloc(MockObject::ObjectArray {
            elem_class: elem,
            items: vec![None; len],
        }))
    }

    fn object_array_get(&self, env: Env, array: RawRef, idx: usize) -> Option<RawRef> {
        let item = {
            let st = self.lock();
            match st.heap.get(&array.as_raw()) {
                Some(MockObject::ObjectArray { items, .. }) => items.get(idx).copied(),
                _ => None,
            }
        };
        match item {
            Some(item) => {
                if item.is_some() {
                    track_local(&mut self.lock());
                }
                item
            }
            None => {
                self.throw_new(env, "java/lang/ArrayIndexOutOfBoundsException", None);
                None
            }
        }
    }

    fn object_array_set(&self, env: Env, array: RawRef, idx: usize, value: Option<RawRef>) {
        let ok = {
            let mut st = self.lock();
            match st.heap.get_mut(&array.as_raw()) {
                Some(MockObject::ObjectArray { items, .. }) if idx < items.len() => {
                    items[idx] = value;
                    true
                }
                _ => false,
            }
        };
        if !ok {
            self.throw_new(env, "java/lang/ArrayIndexOutOfBoundsException", None);
        }
    }

    fn new_int_array(&self, _env: Env, values: &[i32]) -> Option<RawRef> {
        Some(self.alloc(MockObject::IntArray(values.to_vec())))
    }

    fn array_length(&self, _env: Env, array: RawRef) -> usize {
        match self.object(array) {
            Some(MockObject::ObjectArray { items, .. }) => items.len(),
            Some(MockObject::IntArray(v)) => v.len(),
            _ => 0,
        }
    }

    fn exception_occurred(&self, _env: Env) -> Option<RawRef> {
        let mut st = self.lock();
        let pending = st
            .threads
            .get(&thread::current().id())
            .and_then(|t| t.pending);
        if pending.is_some() {
            track_local(&mut st);
        }
        pending
    }

    fn exception_clear(&self, _env: Env) {
        let mut st = self.lock();
        if let Some(t) = st.threads.get_mut(&thread::current().id()) {
            t.pending = None;
        }
    }
}

impl MockRuntime {
    fn lock_pending_is_set(&self) -> bool {
        self.lock()
            .threads
            .get(&thread::current().id())
            .map(|t| t.pending.is_some())
            .unwrap_or(false)
    }
}

/// A builder for [`MockRuntime`] values.
///
/// The builder starts out with the system classes and companion classes needed to boot a context;
/// tests override or remove pieces to provoke specific failures.
pub struct MockRuntimeBuilder {
    classes: Vec<(String, Option<String>)>,
    methods: Vec<MockMethod>,
    removed_methods: HashSet<(String, String)>,
    removed_classes: HashSet<String>,
    refuse_attach: bool,
    destroy_wait: Option<Duration>,
}

impl MockRuntimeBuilder {
    pub fn new() -> Self {
        let mut builder = MockRuntimeBuilder {
            classes: vec![],
            methods: vec![],
            removed_methods: HashSet::new(),
            removed_classes: HashSet::new(),
            refuse_attach: false,
            destroy_wait: None,
        };
        builder.install_system_classes();
        builder.install_companion_classes();
        builder
    }

    pub fn with_class(mut self, name: &str, superclass: Option<&str>) -> Self {
        self.add_class(name, superclass);
        self
    }

    pub fn with_method<F>(mut self, class: &str, name: &str, sig: &str, is_static: bool, body: F) -> Self
    where
        F: Fn(&MockRuntime, MockCall<'_>) -> Value + Send + Sync + 'static,
    {
        self.add_method(class, name, sig, is_static, body);
        self
    }

    /// Remove every overload of `class.name`.
    pub fn without_method(mut self, class: &str, name: &str) -> Self {
        self.removed_methods
            .insert((class.to_string(), name.to_string()));
        self
    }

    pub fn without_class(mut self, name: &str) -> Self {
        self.removed_classes.insert(name.to_string());
        self
    }

    /// Make every attach request fail.
    pub fn refuse_attach(mut self) -> Self {
        self.refuse_attach = true;
        self
    }

    /// Make `destroy` wait, like DestroyJavaVM, until every other non-daemon thread detaches.
    ///
    /// Gives up after `timeout` and logs `destroy timed out`.
    pub fn destroy_waits_for_threads(mut self, timeout: Duration) -> Self {
        self.destroy_wait = Some(timeout);
        self
    }

    pub fn build(self) -> Arc<MockRuntime> {
        let removed_classes = self.removed_classes;
        let removed_methods = self.removed_methods;
        let classes = self
            .classes
            .into_iter()
            .filter(|(name, _)| !removed_classes.contains(name))
            .collect();
        let methods = self
            .methods
            .into_iter()
            .filter(|m| {
                !removed_classes.contains(&m.class)
                    && !removed_methods.contains(&(m.class.clone(), m.name.clone()))
            })
            .collect();
        Arc::new(MockRuntime {
            state: Mutex::new(MockState {
                classes,
                methods,
                heap: HashMap::new(),
                class_objects: HashMap::new(),
                next_object: 0,
                globals: HashMap::new(),
                threads: HashMap::new(),
                next_env: 0,
                attachments: 0,
                destroyed: false,
                interrupted: false,
                events: vec![],
                invocations: HashMap::new(),
                refuse_attach: self.refuse_attach,
                destroy_wait: self.destroy_wait,
            }),
            detached: Condvar::new(),
        })
    }

    fn add_class(&mut self, name: &str, superclass: Option<&str>) {
        self.classes.retain(|(n, _)| n != name);
        self.classes
            .push((name.to_string(), superclass.map(str::to_string)));
    }

    fn add_method<F>(&mut self, class: &str, name: &str, sig: &str, is_static: bool, body: F)
    where
        F: Fn(&MockRuntime, MockCall<'_>) -> Value + Send + Sync + 'static,
    {
        self.methods
            .retain(|m| !(m.class == class && m.name == name && m.sig == sig));
        self.methods.push(MockMethod {
            class: class.to_string(),
            name: name.to_string(),
            sig: sig.to_string(),
            is_static,
            body: Arc::new(body),
        });
    }

    fn install_system_classes(&mut self) {
        let object = Some("java/lang/Object");
        self.add_class("java/lang/Object", None);
        for name in &[
            "java/lang/Class",
            "java/lang/String",
            "java/lang/Throwable",
            "java/lang/ClassLoader",
            "java/lang/System",
            "java/lang/Runtime",
            "java/lang/Comparable",
            "java/lang/reflect/Array",
            "java/lang/reflect/Method",
            "java/nio/Buffer",
        ] {
            self.add_class(name, object);
        }
        self.add_class("java/nio/ByteBuffer", Some("java/nio/Buffer"));
        self.add_class("java/lang/Exception", Some("java/lang/Throwable"));
        self.add_class("java/lang/Error", Some("java/lang/Throwable"));
        self.add_class("java/lang/LinkageError", Some("java/lang/Error"));
        self.add_class("java/lang/NoSuchMethodError", Some("java/lang/LinkageError"));
        self.add_class("java/lang/NoClassDefFoundError", Some("java/lang/LinkageError"));
        self.add_class("java/lang/RuntimeException", Some("java/lang/Exception"));
        self.add_class("java/lang/InterruptedException", Some("java/lang/Exception"));
        self.add_class("java/lang/ClassNotFoundException", Some("java/lang/Exception"));
        self.add_class(
            "java/lang/IllegalStateException",
            Some("java/lang/RuntimeException"),
        );
        self.add_class(
            "java/lang/ArrayIndexOutOfBoundsException",
            Some("java/lang/RuntimeException"),
        );

        self.add_method("java/lang/Object", "toString", "()Ljava/lang/String;", false, |rt, call| {
            let this = call.this.expect("instance call");
            let text = match rt.object(this) {
                Some(MockObject::Str(s)) => s,
                Some(o) => format!("{}@{:x}", o.class_name().replace('/', "."), this.as_raw()),
                None => "null".to_string(),
            };
            Value::Object(Some(rt.alloc(MockObject::Str(text))))
        });
        self.add_method("java/lang/Object", "equals", "(Ljava/lang/Object;)Z", false, |rt, call| {
            let this = call.this.and_then(|o| rt.object(o));
            let other = call.arg_object(0).and_then(|o| rt.object(o));
            Value::Boolean(call.this == call.arg_object(0) || (this.is_some() && this == other))
        });
        self.add_method("java/lang/Object", "hashCode", "()I", false, |_rt, call| {
            Value::Int(call.this.map(|o| o.as_raw() as i32).unwrap_or(0))
        });
        self.add_method("java/lang/Object", "getClass", "()Ljava/lang/Class;", false, |rt, call| {
            let class = call
                .this
                .and_then(|o| rt.object(o))
                .map(|o| o.class_name().to_string());
            Value::Object(class.and_then(|c| rt.class_object(&c)))
        });
        self.add_method("java/lang/String", "toCharArray", "()[C", false, |rt, call| {
            let chars = rt
                .string_value(call.this)
                .unwrap_or_default()
                .chars()
                .map(|c| c as i32)
                .collect();
            Value::Object(Some(rt.alloc(MockObject::IntArray(chars))))
        });
        self.add_method("java/lang/Class", "getName", "()Ljava/lang/String;", false, |rt, call| {
            match call.this.and_then(|o| rt.object(o)) {
                Some(MockObject::Class(name)) => {
                    Value::Object(Some(rt.alloc(MockObject::Str(name.replace('/', ".")))))
                }
                _ => Value::null(),
            }
        });
        self.add_method(
            "java/lang/Class",
            "forName",
            "(Ljava/lang/String;ZLjava/lang/ClassLoader;)Ljava/lang/Class;",
            true,
            |rt, call| {
                let name = rt.string_value(call.arg_object(0)).unwrap_or_default();
                match rt.class_object(&name.replace('.', "/")) {
                    Some(class) => Value::Object(Some(class)),
                    None => {
                        rt.throw_new(
                            call.env,
                            "java/lang/ClassNotFoundException",
                            Some(name.as_str()),
                        );
                        Value::null()
                    }
                }
            },
        );
        self.add_method(
            "java/lang/Throwable",
            "getCause",
            "()Ljava/lang/Throwable;",
            false,
            |rt, call| match call.this.and_then(|o| rt.object(o)) {
                Some(MockObject::Throwable { cause, .. }) => Value::Object(cause),
                _ => Value::null(),
            },
        );
        self.add_method(
            "java/lang/Throwable",
            "getMessage",
            "()Ljava/lang/String;",
            false,
            |rt, call| match call.this.and_then(|o| rt.object(o)) {
                Some(MockObject::Throwable {
                    message: Some(m), ..
                }) => Value::Object(Some(rt.alloc(MockObject::Str(m)))),
                _ => Value::null(),
            },
        );
        self.add_method(
            "java/lang/ClassLoader",
            "getSystemClassLoader",
            "()Ljava/lang/ClassLoader;",
            true,
            |rt, _call| Value::Object(Some(rt.new_plain("java/lang/ClassLoader"))),
        );
        self.add_method(
            "java/lang/reflect/Array",
            "newInstance",
            "(Ljava/lang/Class;[I)Ljava/lang/Object;",
            true,
            |rt, call| {
                let elem_class = match call.arg_object(0).and_then(|c| rt.object(c)) {
                    Some(MockObject::Class(name)) => name,
                    _ => "java/lang/Object".to_string(),
                };
                let len = match call.arg_object(1).and_then(|d| rt.object(d)) {
                    Some(MockObject::IntArray(dims)) => dims.first().copied().unwrap_or(0),
                    _ => 0,
                };
                Value::Object(Some(rt.alloc(MockObject::ObjectArray {
                    elem_class,
                    items: vec![None; len.max(0) as usize],
                })))
            },
        );
        self.add_method("java/nio/Buffer", "isReadOnly", "()Z", false, |_rt, _call| {
            Value::Boolean(false)
        });
        self.add_method(
            "java/lang/Comparable",
            "compareTo",
            "(Ljava/lang/Object;)I",
            false,
            |rt, call| {
                let lhs = rt.string_value(call.this);
                let rhs = rt.string_value(call.arg_object(0));
                Value::Int(match lhs.cmp(&rhs) {
                    std::cmp::Ordering::Less => -1,
                    std::cmp::Ordering::Equal => 0,
                    std::cmp::Ordering::Greater => 1,
                })
            },
        );
        self.add_method("java/lang/System", "gc", "()V", true, |_rt, _call| Value::Void);
        self.add_method(
            "java/lang/Runtime",
            "getRuntime",
            "()Ljava/lang/Runtime;",
            true,
            |rt, _call| Value::Object(Some(rt.new_plain("java/lang/Runtime"))),
        );
        self.add_method("java/lang/Runtime", "totalMemory", "()J", false, |_rt, _call| {
            Value::Long(64 << 20)
        });
        self.add_method("java/lang/Runtime", "freeMemory", "()J", false, |_rt, _call| {
            Value::Long(48 << 20)
        });
        self.add_method("java/lang/Runtime", "maxMemory", "()J", false, |_rt, _call| {
            Value::Long(256 << 20)
        });
    }

    fn install_companion_classes(&mut self) {
        const CONTEXT: &str = "org/jvmbridge/BridgeContext";
        const PACKAGE: &str = "org/jvmbridge/pkg/BridgePackage";
        const TYPE_MANAGER: &str = "org/jvmbridge/manager/TypeManager";
        const PROXY: &str = "org/jvmbridge/proxy/BridgeProxy";

        self.add_class(CONTEXT, Some("java/lang/Object"));
        self.add_class(PACKAGE, Some("java/lang/Object"));
        self.add_class(TYPE_MANAGER, Some("java/lang/Object"));
        self.add_class(PROXY, Some("java/lang/Object"));
        self.add_class("org/jvmbridge/HostException", Some("java/lang/RuntimeException"));

        self.add_method(
            CONTEXT,
            "createContext",
            "(JLjava/lang/ClassLoader;Ljava/lang/String;Z)Lorg/jvmbridge/BridgeContext;",
            true,
            |rt, _call| Value::Object(Some(rt.new_plain(CONTEXT))),
        );
        self.add_method(
            CONTEXT,
            "getTypeManager",
            "()Lorg/jvmbridge/manager/TypeManager;",
            false,
            |rt, _call| Value::Object(Some(rt.new_plain(TYPE_MANAGER))),
        );
        // reflection is out of the mock's reach; echo the first boxed argument back
        self.add_method(
            CONTEXT,
            "callMethod",
            "(Ljava/lang/reflect/Method;Ljava/lang/Object;[Ljava/lang/Object;)Ljava/lang/Object;",
            false,
            |rt, call| match call.arg_object(2).and_then(|a| rt.object(a)) {
                Some(MockObject::ObjectArray { items, .. }) => {
                    Value::Object(items.first().copied().flatten())
                }
                _ => Value::null(),
            },
        );
        self.add_method(
            CONTEXT,
            "collectRectangular",
            "(Ljava/lang/Object;)[Ljava/lang/Object;",
            false,
            |rt, call| {
                let array = call.arg_object(0);
                let len = match array.and_then(|a| rt.object(a)) {
                    Some(MockObject::ObjectArray { items, .. }) => items.len() as i32,
                    _ => return Value::null(),
                };
                let dims = rt.alloc(MockObject::IntArray(vec![len]));
                Value::Object(Some(rt.alloc(MockObject::ObjectArray {
                    elem_class: "java/lang/Object".to_string(),
                    items: vec![Some(dims), array],
                })))
            },
        );
        self.add_method(
            CONTEXT,
            "assemble",
            "([ILjava/lang/Object;)Ljava/lang/Object;",
            false,
            |_rt, call| Value::Object(call.arg_object(1)),
        );
        self.add_method(
            CONTEXT,
            "getFunctional",
            "(Ljava/lang/Class;)Ljava/lang/String;",
            false,
            |_rt, _call| Value::null(),
        );
        self.add_method(
            CONTEXT,
            "createException",
            "(JJ)Ljava/lang/Exception;",
            false,
            |rt, call| {
                let cls = call.args.get(0).and_then(Value::as_long).unwrap_or(0);
                let val = call.args.get(1).and_then(Value::as_long).unwrap_or(0);
                Value::Object(Some(rt.alloc(MockObject::Throwable {
                    class: "org/jvmbridge/HostException".to_string(),
                    message: None,
                    cause: None,
                    host_ids: Some((cls, val)),
                })))
            },
        );
        self.add_method(
            CONTEXT,
            "getExcClass",
            "(Ljava/lang/Throwable;)J",
            false,
            |rt, call| match call.arg_object(0).and_then(|e| rt.object(e)) {
                Some(MockObject::Throwable {
                    host_ids: Some((cls, _)),
                    ..
                }) => Value::Long(cls),
                _ => Value::Long(0),
            },
        );
        self.add_method(
            CONTEXT,
            "getExcValue",
            "(Ljava/lang/Throwable;)J",
            false,
            |rt, call| match call.arg_object(0).and_then(|e| rt.object(e)) {
                Some(MockObject::Throwable {
                    host_ids: Some((_, val)),
                    ..
                }) => Value::Long(val),
                _ => Value::Long(0),
            },
        );
        self.add_method(CONTEXT, "order", "(Ljava/nio/Buffer;)Z", false, |_rt, _call| {
            Value::Boolean(cfg!(target_endian = "little"))
        });
        self.add_method(
            CONTEXT,
            "isPackage",
            "(Ljava/lang/String;)Z",
            false,
            |rt, call| {
                let pkg = rt.string_value(call.arg_object(0)).unwrap_or_default();
                Value::Boolean(rt.package_contents(&pkg).next().is_some())
            },
        );
        self.add_method(
            CONTEXT,
            "getPackage",
            "(Ljava/lang/String;)Lorg/jvmbridge/pkg/BridgePackage;",
            false,
            |rt, call| {
                let pkg = rt.string_value(call.arg_object(0)).unwrap_or_default();
                if rt.package_contents(&pkg).next().is_some() {
                    Value::Object(Some(rt.alloc(MockObject::Package(pkg))))
                } else {
                    Value::null()
                }
            },
        );
        self.add_method(CONTEXT, "clearInterrupt", "(Z)V", true, |rt, _call| {
            rt.set_interrupted(false);
            Value::Void
        });
        self.add_method(CONTEXT, "interruptMain", "()V", true, |rt, _call| {
            rt.set_interrupted(true);
            Value::Void
        });
        self.add_method(CONTEXT, "newWrapper", "(J)V", false, |_rt, _call| Value::Void);
        self.add_method(
            CONTEXT,
            "getStackTrace",
            "(Ljava/lang/Throwable;Ljava/lang/Throwable;)[Ljava/lang/Object;",
            false,
            |rt, _call| {
                Value::Object(Some(rt.alloc(MockObject::ObjectArray {
                    elem_class: "java/lang/Object".to_string(),
                    items: vec![],
                })))
            },
        );
        self.add_method(CONTEXT, "shutdown", "()V", false, |_rt, _call| Value::Void);

        self.add_method(
            PACKAGE,
            "getObject",
            "(Ljava/lang/String;)Ljava/lang/Object;",
            false,
            |rt, call| {
                let pkg = match call.this.and_then(|p| rt.object(p)) {
                    Some(MockObject::Package(pkg)) => pkg,
                    _ => return Value::null(),
                };
                let name = rt.string_value(call.arg_object(0)).unwrap_or_default();
                let full = format!("{}/{}", pkg.replace('.', "/"), name);
                Value::Object(rt.class_object(&full))
            },
        );
        self.add_method(
            PACKAGE,
            "getContents",
            "()[Ljava/lang/String;",
            false,
            |rt, call| {
                let pkg = match call.this.and_then(|p| rt.object(p)) {
                    Some(MockObject::Package(pkg)) => pkg,
                    _ => return Value::null(),
                };
                let names: Vec<String> = rt.package_contents(&pkg).collect();
                let items = names
                    .into_iter()
                    .map(|n| Some(rt.alloc(MockObject::Str(n))))
                    .collect();
                Value::Object(Some(rt.alloc(MockObject::ObjectArray {
                    elem_class: "java/lang/String".to_string(),
                    items,
                })))
            },
        );
        self.add_method(
            TYPE_MANAGER,
            "findClassByName",
            "(Ljava/lang/String;)Ljava/lang/Class;",
            false,
            |rt, call| {
                let name = rt.string_value(call.arg_object(0)).unwrap_or_default();
                Value::Object(rt.class_object(&name.replace('.', "/")))
            },
        );
        self.add_method(
            PROXY,
            "newProxy",
            "(Lorg/jvmbridge/BridgeContext;JJ[Ljava/lang/Class;)Lorg/jvmbridge/proxy/BridgeProxy;",
            true,
            |rt, _call| Value::Object(Some(rt.new_plain(PROXY))),
        );
        self.add_method(
            PROXY,
            "newInstance",
            "()Ljava/lang/Object;",
            false,
            |rt, _call| Value::Object(Some(rt.new_plain("java/lang/Object"))),
        );
    }
}

impl Default for MockRuntimeBuilder {
    fn default() -> Self {
        MockRuntimeBuilder::new()
    }
}

impl MockRuntime {
    /// Simple names of the classes directly inside a dotted package name.
    fn package_contents(&self, pkg: &str) -> impl Iterator<Item = String> {
        let prefix = format!("{}/", pkg.replace('.', "/"));
        let mut names: Vec<String> = self
            .lock()
            .classes
            .keys()
            .filter_map(|c| c.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect();
        names.sort();
        names.into_iter()
    }
}

/// A [`Launcher`] handing out a prepared [`MockRuntime`].
pub struct MockLauncher {
    runtime: Arc<MockRuntime>,
    fail_load: bool,
    fail_create: bool,
}

impl MockLauncher {
    pub fn new(runtime: Arc<MockRuntime>) -> Self {
        MockLauncher {
            runtime,
            fail_load: false,
            fail_create: false,
        }
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }
}

impl Launcher for MockLauncher {
    fn load_library(&mut self, path: &Path) -> Result<(), Error> {
        if self.fail_load {
            return Err(Error::LoadFailure {
                path: path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "mock load failure"),
            });
        }
        self.runtime
            .note(format!("load_library {}", path.display()));
        Ok(())
    }

    fn create_runtime(&mut self, args: &InitArgs) -> Result<(Arc<dyn Runtime>, Env), Error> {
        if self.fail_create {
            return Err(Error::BootFailure("Unable to start JVM".to_string()));
        }
        for opt in &args.options {
            if !opt.starts_with('-') && !args.ignore_unrecognized {
                return Err(boot_failure!("Unrecognized option: {}", opt));
            }
        }
        self.runtime
            .note(format!("create_runtime ({} options)", args.options.len()));
        // the creating thread becomes the runtime's main thread
        let env = self.runtime.attach_current_thread(false)?;
        let runtime: Arc<dyn Runtime> = self.runtime.clone();
        Ok((runtime, env))
    }

    fn unload_library(&mut self) {
        self.runtime.note("unload_library");
    }
}
