//! The declarative binding table.
//!
//! Every runtime-side method the bridge calls is named once, in one of the tables below, as an
//! (operation, class, method, descriptor, static?) entry. Boot resolves the tables in order into a
//! [`BindingTable`]; afterwards operations are invoked by name and the table is never written
//! again.

use crate::error::{Error, ManagedException};
use crate::frame::Frame;
use crate::reference::{ClassRef, LocalRef};
use crate::runtime::{Env, MethodId, RawRef, ReturnKind, Runtime, Target, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The companion class, created by the boot sequence.
pub const COMPANION_CLASS: &str = "org.jvmbridge.BridgeContext";
pub const PACKAGE_CLASS: &str = "org.jvmbridge.pkg.BridgePackage";
pub const TYPE_MANAGER_CLASS: &str = "org.jvmbridge.manager.TypeManager";
pub const PROXY_CLASS: &str = "org.jvmbridge.proxy.BridgeProxy";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    // bootstrap
    GetCause,
    GetMessage,
    ToString,
    Equals,
    HashCode,
    GetClass,
    ToCharArray,
    ClassGetName,

    // class loader
    ForName,
    GetSystemClassLoader,

    // type manager
    FindClassByName,

    // companion
    CreateContext,
    GetTypeManager,
    CallMethod,
    CollectRectangular,
    Assemble,
    GetFunctional,
    CreateException,
    GetExcClass,
    GetExcValue,
    Order,
    IsPackage,
    GetPackage,
    ClearInterrupt,
    InterruptMain,
    NewWrapper,
    GetStackTrace,
    Shutdown,

    // support classes
    PackageGetObject,
    PackageGetContents,
    ArrayNewInstance,
    BufferIsReadOnly,
    CompareTo,
    NewProxy,
    ProxyNewInstance,

    // gc bridge
    SystemGc,
    GetRuntime,
    TotalMemory,
    FreeMemory,
    MaxMemory,
}

/// One entry of a declarative binding table.
#[derive(Clone, Copy, Debug)]
pub struct BindingSpec {
    pub op: Operation,
    /// Binary class name in dotted form.
    pub class: &'static str,
    pub name: &'static str,
    pub sig: &'static str,
    pub is_static: bool,
}

const fn method(
    op: Operation,
    class: &'static str,
    name: &'static str,
    sig: &'static str,
) -> BindingSpec {
    BindingSpec {
        op,
        class,
        name,
        sig,
        is_static: false,
    }
}

const fn static_method(
    op: Operation,
    class: &'static str,
    name: &'static str,
    sig: &'static str,
) -> BindingSpec {
    BindingSpec {
        op,
        class,
        name,
        sig,
        is_static: true,
    }
}

/// Resolved before anything else; exception translation depends on these.
pub const BOOTSTRAP_BINDINGS: &[BindingSpec] = &[
    method(
        Operation::GetCause,
        "java.lang.Throwable",
        "getCause",
        "()Ljava/lang/Throwable;",
    ),
    method(
        Operation::GetMessage,
        "java.lang.Throwable",
        "getMessage",
        "()Ljava/lang/String;",
    ),
    method(
        Operation::ToString,
        "java.lang.Object",
        "toString",
        "()Ljava/lang/String;",
    ),
    method(
        Operation::Equals,
        "java.lang.Object",
        "equals",
        "(Ljava/lang/Object;)Z",
    ),
    method(Operation::HashCode, "java.lang.Object", "hashCode", "()I"),
    method(
        Operation::GetClass,
        "java.lang.Object",
        "getClass",
        "()Ljava/lang/Class;",
    ),
    method(
        Operation::ToCharArray,
        "java.lang.String",
        "toCharArray",
        "()[C",
    ),
    method(
        Operation::ClassGetName,
        "java.lang.Class",
        "getName",
        "()Ljava/lang/String;",
    ),
];

pub const CLASS_LOADER_BINDINGS: &[BindingSpec] = &[
    static_method(
        Operation::ForName,
        "java.lang.Class",
        "forName",
        "(Ljava/lang/String;ZLjava/lang/ClassLoader;)Ljava/lang/Class;",
    ),
    static_method(
        Operation::GetSystemClassLoader,
        "java.lang.ClassLoader",
        "getSystemClassLoader",
        "()Ljava/lang/ClassLoader;",
    ),
];

pub const TYPE_MANAGER_BINDINGS: &[BindingSpec] = &[method(
    Operation::FindClassByName,
    TYPE_MANAGER_CLASS,
    "findClassByName",
    "(Ljava/lang/String;)Ljava/lang/Class;",
)];

pub const COMPANION_ENTRY_BINDINGS: &[BindingSpec] = &[static_method(
    Operation::CreateContext,
    COMPANION_CLASS,
    "createContext",
    "(JLjava/lang/ClassLoader;Ljava/lang/String;Z)Lorg/jvmbridge/BridgeContext;",
)];

pub const TYPE_MANAGER_WIRING_BINDINGS: &[BindingSpec] = &[method(
    Operation::GetTypeManager,
    COMPANION_CLASS,
    "getTypeManager",
    "()Lorg/jvmbridge/manager/TypeManager;",
)];

/// Resolved once the companion object exists. `shutdown` comes last.
pub const COMPANION_BINDINGS: &[BindingSpec] = &[
    method(
        Operation::CallMethod,
        COMPANION_CLASS,
        "callMethod",
        "(Ljava/lang/reflect/Method;Ljava/lang/Object;[Ljava/lang/Object;)Ljava/lang/Object;",
    ),
    method(
        Operation::CollectRectangular,
        COMPANION_CLASS,
        "collectRectangular",
        "(Ljava/lang/Object;)[Ljava/lang/Object;",
    ),
    method(
        Operation::Assemble,
        COMPANION_CLASS,
        "assemble",
        "([ILjava/lang/Object;)Ljava/lang/Object;",
    ),
    method(
        Operation::GetFunctional,
        COMPANION_CLASS,
        "getFunctional",
        "(Ljava/lang/Class;)Ljava/lang/String;",
    ),
    method(
        Operation::CreateException,
        COMPANION_CLASS,
        "createException",
        "(JJ)Ljava/lang/Exception;",
    ),
    method(
        Operation::GetExcClass,
        COMPANION_CLASS,
        "getExcClass",
        "(Ljava/lang/Throwable;)J",
    ),
    method(
        Operation::GetExcValue,
        COMPANION_CLASS,
        "getExcValue",
        "(Ljava/lang/Throwable;)J",
    ),
    method(Operation::Order, COMPANION_CLASS, "order", "(Ljava/nio/Buffer;)Z"),
    method(
        Operation::IsPackage,
        COMPANION_CLASS,
        "isPackage",
        "(Ljava/lang/String;)Z",
    ),
    method(
        Operation::GetPackage,
        COMPANION_CLASS,
        "getPackage",
        "(Ljava/lang/String;)Lorg/jvmbridge/pkg/BridgePackage;",
    ),
    static_method(
        Operation::ClearInterrupt,
        COMPANION_CLASS,
        "clearInterrupt",
        "(Z)V",
    ),
    static_method(
        Operation::InterruptMain,
        COMPANION_CLASS,
        "interruptMain",
        "()V",
    ),
    method(Operation::NewWrapper, COMPANION_CLASS, "newWrapper", "(J)V"),
    method(
        Operation::GetStackTrace,
        COMPANION_CLASS,
        "getStackTrace",
        "(Ljava/lang/Throwable;Ljava/lang/Throwable;)[Ljava/lang/Object;",
    ),
    method(Operation::Shutdown, COMPANION_CLASS, "shutdown", "()V"),
];

pub const SUPPORT_BINDINGS: &[BindingSpec] = &[
    method(
        Operation::PackageGetObject,
        PACKAGE_CLASS,
        "getObject",
        "(Ljava/lang/String;)Ljava/lang/Object;",
    ),
    method(
        Operation::PackageGetContents,
        PACKAGE_CLASS,
        "getContents",
        "()[Ljava/lang/String;",
    ),
    static_method(
        Operation::ArrayNewInstance,
        "java.lang.reflect.Array",
        "newInstance",
        "(Ljava/lang/Class;[I)Ljava/lang/Object;",
    ),
    method(
        Operation::BufferIsReadOnly,
        "java.nio.Buffer",
        "isReadOnly",
        "()Z",
    ),
    method(
        Operation::CompareTo,
        "java.lang.Comparable",
        "compareTo",
        "(Ljava/lang/Object;)I",
    ),
    static_method(
        Operation::NewProxy,
        PROXY_CLASS,
        "newProxy",
        "(Lorg/jvmbridge/BridgeContext;JJ[Ljava/lang/Class;)Lorg/jvmbridge/proxy/BridgeProxy;",
    ),
    method(
        Operation::ProxyNewInstance,
        PROXY_CLASS,
        "newInstance",
        "()Ljava/lang/Object;",
    ),
];

pub const GC_BINDINGS: &[BindingSpec] = &[
    static_method(Operation::SystemGc, "java.lang.System", "gc", "()V"),
    static_method(
        Operation::GetRuntime,
        "java.lang.Runtime",
        "getRuntime",
        "()Ljava/lang/Runtime;",
    ),
    method(Operation::TotalMemory, "java.lang.Runtime", "totalMemory", "()J"),
    method(Operation::FreeMemory, "java.lang.Runtime", "freeMemory", "()J"),
    method(Operation::MaxMemory, "java.lang.Runtime", "maxMemory", "()J"),
];

/// A resolved method, together with the class it was resolved against.
pub struct Binding {
    spec: BindingSpec,
    class: Arc<ClassRef>,
    method: MethodId,
    ret: ReturnKind,
}

impl Binding {
    pub fn spec(&self) -> &BindingSpec {
        &self.spec
    }

    pub fn class(&self) -> &Arc<ClassRef> {
        &self.class
    }

    fn target(&self, this: Option<RawRef>) -> Result<Target, Error> {
        if self.spec.is_static {
            let class = self
                .class
                .as_raw()
                .ok_or(Error::NotRunning("binding class already released"))?;
            Ok(Target::Static(class))
        } else {
            this.map(Target::Instance)
                .ok_or(Error::InvalidArgument("instance method called without receiver"))
        }
    }

    /// Invoke within `frame`. `this` is ignored for static methods.
    pub fn invoke<'f>(
        &self,
        frame: &'f Frame,
        this: Option<LocalRef<'f>>,
        args: &[Value],
    ) -> Result<Value, Error> {
        let target = self.target(this.map(|t| t.as_raw()))?;
        frame.call(target, self.method, self.ret, args)
    }

    /// Invoke outside any frame bookkeeping. Returns `None`, with the exception cleared, if the
    /// call raised.
    pub(crate) fn invoke_raw(
        &self,
        runtime: &dyn Runtime,
        env: Env,
        this: Option<RawRef>,
        args: &[Value],
    ) -> Option<Value> {
        let target = self.target(this).ok()?;
        let value = runtime.call(env, target, self.method, self.ret, args);
        if let Some(exc) = runtime.exception_occurred(env) {
            runtime.exception_clear(env);
            runtime.delete_local_ref(env, exc);
            return None;
        }
        Some(value)
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Binding({:?} => {}.{}{})",
            self.spec.op, self.spec.class, self.spec.name, self.spec.sig
        )
    }
}

/// Resolved bindings, keyed by operation.
#[derive(Debug, Default)]
pub struct BindingTable {
    classes: HashMap<&'static str, Arc<ClassRef>>,
    entries: HashMap<Operation, Binding>,
}

impl BindingTable {
    pub fn new() -> Self {
        BindingTable::default()
    }

    /// Resolve `specs` in order, loading each class once with `load`.
    ///
    /// The first failure aborts resolution with a [`Error::BootFailure`] naming the class, or the
    /// method and its descriptor.
    pub fn resolve<F>(&mut self, frame: &Frame, specs: &[BindingSpec], mut load: F) -> Result<(), Error>
    where
        F: FnMut(&Frame, &str) -> Result<ClassRef, Error>,
    {
        for spec in specs {
            let class = match self.classes.get(spec.class) {
                Some(class) => class.clone(),
                None => {
                    let class = load(frame, spec.class).map_err(|e| {
                        tracing::error!("unable to load class {}: {}", spec.class, e);
                        boot_failure!("Unable to find class {}", spec.class)
                    })?;
                    let class = Arc::new(class);
                    self.classes.insert(spec.class, class.clone());
                    class
                }
            };
            let method = resolve_method(frame, &class, spec)?;
            let ret = ReturnKind::from_signature(spec.sig)?;
            tracing::trace!("resolved {}.{}{}", spec.class, spec.name, spec.sig);
            self.entries.insert(
                spec.op,
                Binding {
                    spec: *spec,
                    class,
                    method,
                    ret,
                },
            );
        }
        Ok(())
    }

    pub fn get(&self, op: Operation) -> Result<&Binding, Error> {
        self.entries
            .get(&op)
            .ok_or_else(|| bridge_format_err!("operation {:?} is not bound", op))
    }

    pub fn contains(&self, op: Operation) -> bool {
        self.entries.contains_key(&op)
    }

    pub fn class(&self, name: &str) -> Option<&Arc<ClassRef>> {
        self.classes.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn resolve_method(frame: &Frame, class: &ClassRef, spec: &BindingSpec) -> Result<MethodId, Error> {
    let nested = frame.nested(2)?;
    let raw = class
        .as_raw()
        .ok_or(Error::NotRunning("class reference released during boot"))?;
    let local = LocalRef::new(raw);
    let res = if spec.is_static {
        nested.static_method_id(local, spec.name, spec.sig)
    } else {
        nested.method_id(local, spec.name, spec.sig)
    };
    res.map_err(|e| {
        tracing::error!("unable to resolve {}.{}{}: {}", spec.class, spec.name, spec.sig, e);
        boot_failure!(
            "Unable to resolve {}method {}.{}{}",
            if spec.is_static { "static " } else { "" },
            spec.class,
            spec.name,
            spec.sig
        )
    })
}

/// Load a class through the runtime's own lookup, which sees only system classes.
pub fn load_system_class(frame: &Frame, name: &str) -> Result<ClassRef, Error> {
    let local = frame.find_class(name)?;
    let global = frame.promote(local)?;
    Ok(ClassRef::new(name, global))
}

/// The bindings exception translation relies on, plus the exception classes the bridge inspects.
pub struct BootstrapBindings {
    table: BindingTable,
    no_such_method_error: ClassRef,
    runtime_exception: ClassRef,
    interrupted_exception: ClassRef,
}

impl BootstrapBindings {
    pub(crate) fn resolve(frame: &Frame) -> Result<BootstrapBindings, Error> {
        let load = |name: &str| {
            load_system_class(frame, name).map_err(|e| {
                tracing::error!("unable to load class {}: {}", name, e);
                boot_failure!("Unable to find class {}", name)
            })
        };
        let no_such_method_error = load("java.lang.NoSuchMethodError")?;
        let runtime_exception = load("java.lang.RuntimeException")?;
        let interrupted_exception = load("java.lang.InterruptedException")?;
        let mut table = BindingTable::new();
        table.resolve(frame, BOOTSTRAP_BINDINGS, load_system_class)?;
        Ok(BootstrapBindings {
            table,
            no_such_method_error,
            runtime_exception,
            interrupted_exception,
        })
    }

    pub fn table(&self) -> &BindingTable {
        &self.table
    }

    pub fn no_such_method_error(&self) -> &ClassRef {
        &self.no_such_method_error
    }

    pub fn runtime_exception(&self) -> &ClassRef {
        &self.runtime_exception
    }

    pub fn interrupted_exception(&self) -> &ClassRef {
        &self.interrupted_exception
    }

    pub(crate) fn is_interrupted_exception(
        &self,
        runtime: &dyn Runtime,
        env: Env,
        exc: RawRef,
    ) -> bool {
        match self.interrupted_exception.as_raw() {
            Some(class) => runtime.is_instance_of(env, exc, class),
            None => false,
        }
    }

    /// Describe a throwable and its causes, following at most `max_depth` causes.
    ///
    /// Never fails: anything the runtime refuses to tell us is left out of the description.
    pub(crate) fn describe(
        &self,
        runtime: &dyn Runtime,
        env: Env,
        exc: RawRef,
        max_depth: usize,
    ) -> ManagedException {
        // class, name, message and cause
        const LOCALS_PER_LEVEL: usize = 4;
        if !runtime.push_local_frame(env, LOCALS_PER_LEVEL) {
            runtime.exception_clear(env);
            return ManagedException::new("java.lang.Throwable", None);
        }
        let class_name = self
            .call_object(runtime, env, Operation::GetClass, exc)
            .and_then(|class| self.call_object(runtime, env, Operation::ClassGetName, class))
            .and_then(|name| runtime.string_chars(env, name))
            .unwrap_or_else(|| "java.lang.Throwable".to_string());
        let message = self
            .call_object(runtime, env, Operation::GetMessage, exc)
            .and_then(|msg| runtime.string_chars(env, msg));
        let mut described = ManagedException::new(class_name, message);
        if max_depth > 0 {
            if let Some(cause) = self.call_object(runtime, env, Operation::GetCause, exc) {
                if cause != exc {
                    described.cause = Some(Box::new(self.describe(
                        runtime,
                        env,
                        cause,
                        max_depth - 1,
                    )));
                }
            }
        }
        runtime.pop_local_frame(env, None);
        described
    }

    fn call_object(
        &self,
        runtime: &dyn Runtime,
        env: Env,
        op: Operation,
        this: RawRef,
    ) -> Option<RawRef> {
        self.table
            .get(op)
            .ok()?
            .invoke_raw(runtime, env, Some(this), &[])?
            .as_object()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::{MockObject, MockRuntimeBuilder};

    fn frame_for(mock: &Arc<crate::runtime::MockRuntime>) -> Frame<'static> {
        let rt: Arc<dyn Runtime> = mock.clone();
        let env = rt.attach_current_thread(true).unwrap();
        Frame::new(rt, env, 64).unwrap()
    }

    #[test]
    fn bootstrap_resolves_every_entry() {
        let mock = MockRuntimeBuilder::new().build();
        let frame = frame_for(&mock);
        let bs = BootstrapBindings::resolve(&frame).unwrap();
        for spec in BOOTSTRAP_BINDINGS {
            assert!(bs.table().contains(spec.op), "{:?} unresolved", spec.op);
        }
        assert_eq!(bs.table().len(), BOOTSTRAP_BINDINGS.len());
        assert_eq!(bs.runtime_exception().name(), "java.lang.RuntimeException");
        assert_eq!(bs.no_such_method_error().name(), "java.lang.NoSuchMethodError");
    }

    #[test]
    fn missing_method_names_class_method_and_descriptor() {
        let mock = MockRuntimeBuilder::new()
            .without_method("java/lang/Object", "hashCode")
            .build();
        let frame = frame_for(&mock);
        match BootstrapBindings::resolve(&frame) {
            Err(Error::BootFailure(msg)) => {
                assert_eq!(msg, "Unable to resolve method java.lang.Object.hashCode()I")
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("boot resolved a missing method"),
        }
    }

    #[test]
    fn missing_class_is_boot_failure() {
        let mock = MockRuntimeBuilder::new()
            .without_class("java/lang/InterruptedException")
            .build();
        let frame = frame_for(&mock);
        match BootstrapBindings::resolve(&frame) {
            Err(Error::BootFailure(msg)) => {
                assert_eq!(msg, "Unable to find class java.lang.InterruptedException")
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("boot resolved a missing class"),
        }
    }

    #[test]
    fn describe_follows_cause_chain() {
        let mock = MockRuntimeBuilder::new().build();
        let frame = frame_for(&mock);
        let bs = BootstrapBindings::resolve(&frame).unwrap();

        let root = mock.alloc(MockObject::Throwable {
            class: "java/lang/IllegalStateException".to_string(),
            message: Some("root".to_string()),
            cause: None,
            host_ids: None,
        });
        let outer = mock.alloc(MockObject::Throwable {
            class: "java/lang/RuntimeException".to_string(),
            message: None,
            cause: Some(root),
            host_ids: None,
        });
        let described = bs.describe(&**frame.runtime(), frame.env(), outer, 8);
        assert_eq!(described.class_name, "java.lang.RuntimeException");
        assert_eq!(described.message, None);
        let cause = described.cause.expect("cause described");
        assert_eq!(cause.class_name, "java.lang.IllegalStateException");
        assert_eq!(cause.message.as_deref(), Some("root"));

        let shallow = bs.describe(&**frame.runtime(), frame.env(), outer, 0);
        assert!(shallow.cause.is_none());
    }
}
