//! The context: one managed runtime, booted, running and shut down.
//!
//! A [`Context`] owns the runtime handle, the binding table, the companion object and the
//! registered shutdown resources. Boot is strictly ordered (see
//! [`Context::start`](struct.Context.html#method.start)); every runtime call afterwards goes
//! through a [`Frame`] opened by the context, and is refused with [`Error::NotRunning`] once the
//! context has left the running state.

pub mod bindings;

use crate::config::{BootConfig, FrameLimits};
use crate::context::bindings::{
    BindingTable, BootstrapBindings, Binding, Operation, COMPANION_BINDINGS, COMPANION_CLASS,
    COMPANION_ENTRY_BINDINGS, SUPPORT_BINDINGS, TYPE_MANAGER_WIRING_BINDINGS,
};
use crate::error::Error;
use crate::frame::Frame;
use crate::interrupt::{self, InterruptState};
use crate::platform;
use crate::reference::{ClassRef, GlobalRef, LocalRef};
use crate::resource::{Resource, ResourceRegistry};
use crate::runtime::{Env, InitArgs, JniLauncher, Launcher, Runtime, Value};
use crate::services::{ClassLoader, GcBridge, MemoryStats, TypeManager};
use crate::thread::{self, AttachGuard};
use lazy_static::lazy_static;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
pub enum State {
    NotStarted = 0,
    Running = 1,
    ShutDown = 2,
}

lazy_static! {
    static ref ACTIVE_CONTEXT: RwLock<Weak<Context>> = RwLock::new(Weak::new());
}

/// The value of a reflective call, with strings converted when the context asks for it.
#[derive(Debug, PartialEq)]
pub enum CallResult<'f> {
    Null,
    Object(LocalRef<'f>),
    String(String),
}

/// Platform state, mutated only by boot and shutdown.
#[derive(Default)]
struct Platform {
    launcher: Option<Box<dyn Launcher>>,
    resources: ResourceRegistry,
    shutting_down: bool,
}

/// Everything that exists only while the context is running.
struct Live {
    runtime: Arc<dyn Runtime>,
    bootstrap: Arc<BootstrapBindings>,
    bindings: BindingTable,
    companion: Mutex<Option<Arc<GlobalRef>>>,
    class_loader: Arc<ClassLoader>,
    type_manager: Arc<TypeManager>,
    gc: Arc<GcBridge>,
    byte_buffer: Arc<ClassRef>,
    limits: FrameLimits,
}

pub struct Context {
    state: AtomicU8,
    embedded: AtomicBool,
    convert_strings: AtomicBool,
    platform: Mutex<Platform>,
    // kept out of `platform`: threads must detach while shutdown waits in destroy
    runtime: RwLock<Option<Arc<dyn Runtime>>>,
    live: RwLock<Option<Arc<Live>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Context {
    pub fn new() -> Arc<Context> {
        Arc::new(Context {
            state: AtomicU8::new(State::NotStarted as u8),
            embedded: AtomicBool::new(false),
            convert_strings: AtomicBool::new(false),
            platform: Mutex::new(Platform::default()),
            runtime: RwLock::new(None),
            live: RwLock::new(None),
        })
    }

    /// The context most recently started in this process, if it is still alive.
    pub fn active() -> Option<Arc<Context>> {
        match ACTIVE_CONTEXT.read() {
            Ok(active) => active.upgrade(),
            Err(poisoned) => poisoned.into_inner().upgrade(),
        }
    }

    fn set_active(self: &Arc<Self>) {
        let mut active = ACTIVE_CONTEXT.write().unwrap_or_else(|e| e.into_inner());
        *active = Arc::downgrade(self);
    }

    fn clear_active(&self) {
        let mut active = ACTIVE_CONTEXT.write().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = active.upgrade() {
            if std::ptr::eq(&*current, self) {
                *active = Weak::new();
            }
        }
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst)).unwrap_or(State::ShutDown)
    }

    fn set_state(&self, state: State) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Whether a runtime is loaded and the context is running. Never blocks on boot or shutdown.
    pub fn is_running(&self) -> bool {
        self.state() == State::Running && self.read_live().is_some()
    }

    /// Whether the context attached to a runtime it did not create.
    pub fn is_embedded(&self) -> bool {
        self.embedded.load(Ordering::SeqCst)
    }

    pub fn convert_strings(&self) -> bool {
        self.convert_strings.load(Ordering::SeqCst)
    }

    /// The runtime handle, present from creation until shutdown, including after a failed boot.
    pub fn runtime(&self) -> Option<Arc<dyn Runtime>> {
        match self.runtime.read() {
            Ok(runtime) => (*runtime).clone(),
            Err(poisoned) => (*poisoned.into_inner()).clone(),
        }
    }

    fn set_runtime(&self, runtime: Option<Arc<dyn Runtime>>) {
        *self.runtime.write().unwrap_or_else(|e| e.into_inner()) = runtime;
    }

    fn read_live(&self) -> Option<Arc<Live>> {
        match self.live.read() {
            Ok(live) => (*live).clone(),
            Err(poisoned) => (*poisoned.into_inner()).clone(),
        }
    }

    fn live(&self, what: &'static str) -> Result<Arc<Live>, Error> {
        if self.state() != State::Running {
            return Err(Error::NotRunning(what));
        }
        self.read_live().ok_or(Error::NotRunning(what))
    }

    /// Load the runtime library named by `config`, create the runtime and boot it.
    pub fn start(self: &Arc<Self>, config: &BootConfig) -> Result<(), Error> {
        self.start_with(config, Box::new(JniLauncher::new()))
    }

    /// Like [`start`](#method.start), with the platform side supplied by `launcher`.
    ///
    /// Fails with [`Error::AlreadyStarted`] unless the context is fresh. If the runtime was created
    /// but boot failed, the context stays not-started and keeps the runtime so that
    /// [`shutdown`](#method.shutdown) can still tear it down.
    pub fn start_with(
        self: &Arc<Self>,
        config: &BootConfig,
        mut launcher: Box<dyn Launcher>,
    ) -> Result<(), Error> {
        let mut platform = lock(&self.platform);
        if self.state() != State::NotStarted || self.runtime().is_some() {
            return Err(Error::AlreadyStarted);
        }
        tracing::info!(
            "starting runtime from {}",
            config.library_path.display()
        );
        launcher.load_library(&config.library_path)?;
        let args = InitArgs {
            options: config.options.clone(),
            ignore_unrecognized: config.ignore_unrecognized(),
        };
        let (runtime, env) = match launcher.create_runtime(&args) {
            Ok(created) => created,
            Err(e) => {
                tracing::error!("unable to create runtime: {}", e);
                launcher.unload_library();
                return Err(e);
            }
        };
        platform.launcher = Some(launcher);
        self.set_runtime(Some(runtime.clone()));
        self.embedded.store(false, Ordering::SeqCst);
        let native_path = platform::native_library_path();
        self.boot(&mut platform, runtime, env, config, native_path)
    }

    /// Boot against a runtime created by someone else, such as the JVM that loaded this library.
    ///
    /// Nothing is loaded or created, and the companion is not told a native library path.
    pub fn attach_external(
        self: &Arc<Self>,
        runtime: Arc<dyn Runtime>,
        config: &BootConfig,
    ) -> Result<(), Error> {
        let mut platform = lock(&self.platform);
        if self.state() != State::NotStarted || self.runtime().is_some() {
            return Err(Error::AlreadyStarted);
        }
        tracing::info!("attaching to an existing runtime");
        let env = thread::ensure_attached(&*runtime)?;
        self.set_runtime(Some(runtime.clone()));
        self.embedded.store(true, Ordering::SeqCst);
        self.boot(&mut platform, runtime, env, config, None)
    }

    fn boot(
        self: &Arc<Self>,
        platform: &mut Platform,
        runtime: Arc<dyn Runtime>,
        env: Env,
        config: &BootConfig,
        native_path: Option<PathBuf>,
    ) -> Result<(), Error> {
        self.convert_strings
            .store(config.convert_strings(), Ordering::SeqCst);
        self.set_active();
        match self.initialize_resources(platform, runtime, env, config, native_path) {
            Ok(live) => {
                *self.live.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(live));
                self.set_state(State::Running);
                tracing::info!("runtime running");
                Ok(())
            }
            Err(e) => {
                tracing::error!("boot failed: {}", e);
                Err(e)
            }
        }
    }

    fn initialize_resources(
        &self,
        platform: &mut Platform,
        runtime: Arc<dyn Runtime>,
        env: Env,
        config: &BootConfig,
        native_path: Option<PathBuf>,
    ) -> Result<Live, Error> {
        let limits = config.limits;
        let frame = Frame::new(runtime.clone(), env, limits.boot_capacity)?;

        tracing::debug!("boot: bootstrap bindings");
        let bootstrap = Arc::new(BootstrapBindings::resolve(&frame)?);
        let frame = frame.with_bootstrap(bootstrap.clone(), limits.max_cause_depth);

        tracing::debug!("boot: class loader");
        let class_loader = Arc::new(ClassLoader::new(&frame)?);
        platform.resources.register(class_loader.clone())?;

        tracing::debug!("boot: type manager");
        let type_manager = Arc::new(TypeManager::new(&frame, &class_loader)?);
        platform.resources.register(type_manager.clone())?;

        tracing::debug!("boot: companion");
        let mut bindings = BindingTable::new();
        bindings.resolve(&frame, COMPANION_ENTRY_BINDINGS, |f, name| {
            class_loader.load_class(f, name)
        })?;
        let loader = class_loader.loader(&frame)?;
        let library_path = match &native_path {
            Some(path) => Some(frame.new_string(&path.to_string_lossy())?),
            None => None,
        };
        let context_id = self as *const Context as usize as i64;
        let companion = bindings.get(Operation::CreateContext)?.invoke(
            &frame,
            None,
            &[
                Value::Long(context_id),
                Value::Object(Some(loader.as_raw())),
                Value::Object(library_path.map(|p| p.as_raw())),
                Value::Boolean(config.interrupt()),
            ],
        )?;
        let companion = frame
            .object(companion)
            .ok_or_else(|| boot_failure!("{}.createContext returned null", COMPANION_CLASS))?;
        let companion_ref = frame.promote(companion)?;

        tracing::debug!("boot: wiring type manager");
        bindings.resolve(&frame, TYPE_MANAGER_WIRING_BINDINGS, |f, name| {
            class_loader.load_class(f, name)
        })?;
        let counterpart = bindings
            .get(Operation::GetTypeManager)?
            .invoke(&frame, Some(companion), &[])?;
        let counterpart = frame
            .object(counterpart)
            .ok_or_else(|| boot_failure!("companion has no type manager"))?;
        type_manager.wire(&frame, counterpart)?;

        tracing::debug!("boot: companion bindings");
        bindings.resolve(&frame, COMPANION_BINDINGS, |f, name| {
            class_loader.load_class(f, name)
        })?;
        bindings.resolve(&frame, SUPPORT_BINDINGS, |f, name| {
            class_loader.load_class(f, name)
        })?;

        tracing::debug!("boot: gc bridge");
        let gc = Arc::new(GcBridge::init(&frame)?);
        platform.resources.register(gc.clone())?;
        let byte_buffer = type_manager.find_class(&frame, "java.nio.ByteBuffer")?;

        Ok(Live {
            runtime,
            bootstrap,
            bindings,
            companion: Mutex::new(Some(Arc::new(companion_ref))),
            class_loader,
            type_manager,
            gc,
            byte_buffer,
            limits,
        })
    }

    /// Tear the runtime down.
    ///
    /// A graceful shutdown first lets the companion run its own shutdown, if the companion still
    /// exists. Either way the runtime is destroyed, which waits for non-daemon threads, then the
    /// registered resources are destroyed in reverse order and the library is unloaded.
    ///
    /// No lock is held while the runtime is destroyed, so attached threads can still
    /// [`detach`](#method.detach) and let it finish.
    pub fn shutdown(&self, graceful: bool) -> Result<(), Error> {
        let runtime = {
            let mut platform = lock(&self.platform);
            let runtime = match self.runtime() {
                Some(runtime) if !platform.shutting_down => runtime,
                _ => return Err(Error::NotRunning("shutdown")),
            };
            platform.shutting_down = true;
            runtime
        };
        tracing::info!(
            "{} shutdown",
            if graceful { "graceful" } else { "disgraceful" }
        );
        self.set_state(State::ShutDown);
        let live = self
            .live
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(live) = live {
            if graceful {
                live.run_companion_shutdown();
            }
        }

        let destroyed = if self.is_embedded() {
            Ok(())
        } else {
            runtime.destroy()
        };
        if let Err(e) = &destroyed {
            tracing::error!("runtime destroy failed: {}", e);
        }
        let mut platform = lock(&self.platform);
        let drained = platform.resources.drain_reverse();
        tracing::debug!("destroyed {} resources", drained);
        if let Some(mut launcher) = platform.launcher.take() {
            launcher.unload_library();
        }
        self.set_runtime(None);
        platform.shutting_down = false;
        self.clear_active();
        destroyed
    }

    /// The runtime announced its own shutdown: stop accepting calls right away.
    ///
    /// The runtime handle stays in place so that [`shutdown`](#method.shutdown) can still clean
    /// up, but the companion is released and will not be asked to shut down again.
    pub fn on_managed_shutdown(&self) {
        let was_running = self
            .state
            .compare_exchange(
                State::Running as u8,
                State::ShutDown as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        tracing::info!("runtime reported shutdown (was running: {})", was_running);
        if let Some(live) = self.read_live() {
            let companion = lock(&live.companion).take();
            drop(companion);
        }
    }

    /// Register a resource to be destroyed at shutdown.
    pub fn register_resource(&self, resource: Arc<dyn Resource>) -> Result<(), Error> {
        let mut platform = lock(&self.platform);
        if self.runtime().is_none() || platform.shutting_down {
            return Err(Error::NotRunning("register resource"));
        }
        platform.resources.register(resource)
    }

    /// Names of the registered resources, in registration order.
    pub fn resource_names(&self) -> Vec<String> {
        lock(&self.platform).resources.names()
    }

    /// Open a frame with the configured default capacity, attaching the thread on demand.
    pub fn frame(&self) -> Result<Frame<'static>, Error> {
        let live = self.live("frame")?;
        live.frame(live.limits.default_capacity)
    }

    pub fn frame_with_capacity(&self, capacity: usize) -> Result<Frame<'static>, Error> {
        let live = self.live("frame")?;
        live.frame(capacity)
    }

    pub fn attach(&self) -> Result<(), Error> {
        let live = self.live("attach")?;
        thread::attach(&*live.runtime).map(|_| ())
    }

    pub fn attach_as_daemon(&self) -> Result<(), Error> {
        let live = self.live("attach")?;
        thread::attach_as_daemon(&*live.runtime).map(|_| ())
    }

    /// Attach for the lifetime of the returned guard.
    pub fn attach_scoped(&self) -> Result<AttachGuard, Error> {
        let live = self.live("attach")?;
        AttachGuard::new(live.runtime.clone())
    }

    pub fn ensure_attached(&self) -> Result<(), Error> {
        let live = self.live("attach")?;
        thread::ensure_attached(&*live.runtime).map(|_| ())
    }

    /// Detach the calling thread; a no-op when nothing is attached or no runtime exists.
    pub fn detach(&self) {
        if let Some(runtime) = self.runtime() {
            thread::detach(&*runtime);
        }
    }

    pub fn is_thread_attached(&self) -> bool {
        match self.runtime() {
            Some(runtime) => thread::is_thread_attached(&*runtime),
            None => false,
        }
    }

    /// Host-side interrupt: mark it pending and wake the runtime's main thread.
    pub fn interrupt(&self) -> Result<(), Error> {
        let live = self.live("interrupt")?;
        if !interrupt::arbiter().raise() {
            tracing::trace!("interrupt already pending");
        }
        let frame = live.bare_frame(2)?;
        live.binding(Operation::InterruptMain)?
            .invoke(&frame, None, &[])?;
        Ok(())
    }

    /// The host has handled the interrupt: clear the host flag, then the runtime's.
    ///
    /// If the runtime cannot be reached right now its flag is cleared on the next frame entry.
    pub fn acknowledge_interrupt(&self) -> Result<(), Error> {
        let arbiter = interrupt::arbiter();
        arbiter.acknowledge_host();
        if arbiter.state() != InterruptState::Acknowledged {
            return Ok(());
        }
        let live = match self.live("acknowledge interrupt") {
            Ok(live) => live,
            Err(_) => {
                tracing::debug!("runtime unavailable; deferring interrupt clear");
                return Ok(());
            }
        };
        let frame = live.bare_frame(2)?;
        live.clear_runtime_interrupt(&frame)
    }

    fn invoke<'f>(
        &self,
        frame: &'f Frame,
        op: Operation,
        this: Option<LocalRef<'f>>,
        args: &[Value],
    ) -> Result<Value, Error> {
        let live = self.live("runtime call")?;
        live.binding(op)?.invoke(frame, this, args)
    }

    fn invoke_object<'f>(
        &self,
        frame: &'f Frame,
        op: Operation,
        this: Option<LocalRef<'f>>,
        args: &[Value],
    ) -> Result<Option<LocalRef<'f>>, Error> {
        let value = self.invoke(frame, op, this, args)?;
        Ok(frame.object(value))
    }

    fn invoke_companion<'f>(
        &self,
        frame: &'f Frame,
        op: Operation,
        args: &[Value],
    ) -> Result<Value, Error> {
        let live = self.live("runtime call")?;
        // held until the call returns, so a concurrent release cannot delete it underneath us
        let companion = live.companion()?;
        let this = companion
            .local(frame)
            .ok_or(Error::NotRunning("companion released"))?;
        live.binding(op)?.invoke(frame, Some(this), args)
    }

    fn expect_object<'f>(frame: &'f Frame, value: Value, op: Operation) -> Result<LocalRef<'f>, Error> {
        frame
            .object(value)
            .ok_or_else(|| bridge_format_err!("{:?} returned null", op))
    }

    fn expect_long(value: Value, op: Operation) -> Result<i64, Error> {
        value
            .as_long()
            .ok_or_else(|| bridge_format_err!("{:?} did not return a long", op))
    }

    fn expect_bool(value: Value, op: Operation) -> Result<bool, Error> {
        value
            .as_bool()
            .ok_or_else(|| bridge_format_err!("{:?} did not return a boolean", op))
    }

    pub fn to_string<'f>(&self, frame: &'f Frame, obj: LocalRef<'f>) -> Result<String, Error> {
        let s = self.invoke_object(frame, Operation::ToString, Some(obj), &[])?;
        Ok(frame.opt_string(s)?.unwrap_or_else(|| "null".to_string()))
    }

    pub fn equals<'f>(
        &self,
        frame: &'f Frame,
        obj: LocalRef<'f>,
        other: Option<LocalRef<'f>>,
    ) -> Result<bool, Error> {
        let value = self.invoke(
            frame,
            Operation::Equals,
            Some(obj),
            &[Value::Object(other.map(|o| o.as_raw()))],
        )?;
        Context::expect_bool(value, Operation::Equals)
    }

    pub fn hash_code<'f>(&self, frame: &'f Frame, obj: LocalRef<'f>) -> Result<i32, Error> {
        self.invoke(frame, Operation::HashCode, Some(obj), &[])?
            .as_int()
            .ok_or_else(|| bridge_format_err!("hashCode did not return an int"))
    }

    /// The binary name of an object's class, e.g. `java.lang.String`.
    pub fn class_name<'f>(&self, frame: &'f Frame, obj: LocalRef<'f>) -> Result<String, Error> {
        let class = self.invoke(frame, Operation::GetClass, Some(obj), &[])?;
        let class = Context::expect_object(frame, class, Operation::GetClass)?;
        let name = self.invoke(frame, Operation::ClassGetName, Some(class), &[])?;
        let name = Context::expect_object(frame, name, Operation::ClassGetName)?;
        frame.string(name)
    }

    /// A `char[]` copy of a runtime string.
    pub fn to_char_array<'f>(&self, frame: &'f Frame, s: LocalRef<'f>) -> Result<LocalRef<'f>, Error> {
        let chars = self.invoke(frame, Operation::ToCharArray, Some(s), &[])?;
        Context::expect_object(frame, chars, Operation::ToCharArray)
    }

    /// Invoke a reflected method on `obj` (`None` for static methods) with boxed `args`.
    pub fn call_method<'f>(
        &self,
        frame: &'f Frame,
        method: LocalRef<'f>,
        obj: Option<LocalRef<'f>>,
        args: LocalRef<'f>,
    ) -> Result<CallResult<'f>, Error> {
        let value = self.invoke_companion(
            frame,
            Operation::CallMethod,
            &[
                Value::Object(Some(method.as_raw())),
                Value::Object(obj.map(|o| o.as_raw())),
                Value::Object(Some(args.as_raw())),
            ],
        )?;
        let result = match frame.object(value) {
            Some(result) => result,
            None => return Ok(CallResult::Null),
        };
        if self.convert_strings() {
            let live = self.live("runtime call")?;
            let is_string = live
                .bootstrap
                .table()
                .class("java.lang.String")
                .and_then(|c| c.as_raw())
                .map(|class| frame.is_instance_of(result, class))
                .unwrap_or(false);
            if is_string {
                return Ok(CallResult::String(frame.string(result)?));
            }
        }
        Ok(CallResult::Object(result))
    }

    /// Split a rectangular array into its dimensions and contents.
    pub fn collect_rectangular<'f>(
        &self,
        frame: &'f Frame,
        array: LocalRef<'f>,
    ) -> Result<Option<LocalRef<'f>>, Error> {
        let value = self.invoke_companion(
            frame,
            Operation::CollectRectangular,
            &[Value::Object(Some(array.as_raw()))],
        )?;
        Ok(frame.object(value))
    }

    /// Build a rectangular array of the given dimensions from flat `contents`.
    pub fn assemble<'f>(
        &self,
        frame: &'f Frame,
        dims: &[i32],
        contents: LocalRef<'f>,
    ) -> Result<Option<LocalRef<'f>>, Error> {
        let dims = frame.new_int_array(dims)?;
        let value = self.invoke_companion(
            frame,
            Operation::Assemble,
            &[
                Value::Object(Some(dims.as_raw())),
                Value::Object(Some(contents.as_raw())),
            ],
        )?;
        Ok(frame.object(value))
    }

    /// The name of the single abstract method of a functional interface, if it is one.
    pub fn get_functional<'f>(
        &self,
        frame: &'f Frame,
        class: LocalRef<'f>,
    ) -> Result<Option<String>, Error> {
        let value = self.invoke_companion(
            frame,
            Operation::GetFunctional,
            &[Value::Object(Some(class.as_raw()))],
        )?;
        frame.opt_string(frame.object(value))
    }

    /// A runtime exception carrying a host exception, identified by host-side ids.
    pub fn create_exception<'f>(
        &self,
        frame: &'f Frame,
        class_id: i64,
        value_id: i64,
    ) -> Result<LocalRef<'f>, Error> {
        let value = self.invoke_companion(
            frame,
            Operation::CreateException,
            &[Value::Long(class_id), Value::Long(value_id)],
        )?;
        Context::expect_object(frame, value, Operation::CreateException)
    }

    pub fn exception_class<'f>(&self, frame: &'f Frame, exc: LocalRef<'f>) -> Result<i64, Error> {
        let value = self.invoke_companion(
            frame,
            Operation::GetExcClass,
            &[Value::Object(Some(exc.as_raw()))],
        )?;
        Context::expect_long(value, Operation::GetExcClass)
    }

    pub fn exception_value<'f>(&self, frame: &'f Frame, exc: LocalRef<'f>) -> Result<i64, Error> {
        let value = self.invoke_companion(
            frame,
            Operation::GetExcValue,
            &[Value::Object(Some(exc.as_raw()))],
        )?;
        Context::expect_long(value, Operation::GetExcValue)
    }

    /// Whether the buffer's byte order matches the host's.
    pub fn buffer_order<'f>(&self, frame: &'f Frame, buffer: LocalRef<'f>) -> Result<bool, Error> {
        let value = self.invoke_companion(
            frame,
            Operation::Order,
            &[Value::Object(Some(buffer.as_raw()))],
        )?;
        Context::expect_bool(value, Operation::Order)
    }

    pub fn buffer_is_read_only<'f>(
        &self,
        frame: &'f Frame,
        buffer: LocalRef<'f>,
    ) -> Result<bool, Error> {
        let value = self.invoke(frame, Operation::BufferIsReadOnly, Some(buffer), &[])?;
        Context::expect_bool(value, Operation::BufferIsReadOnly)
    }

    pub fn is_package(&self, frame: &Frame, name: &str) -> Result<bool, Error> {
        let jname = frame.new_string(name)?;
        let value = self.invoke_companion(
            frame,
            Operation::IsPackage,
            &[Value::Object(Some(jname.as_raw()))],
        )?;
        Context::expect_bool(value, Operation::IsPackage)
    }

    pub fn get_package<'f>(&self, frame: &'f Frame, name: &str) -> Result<Option<LocalRef<'f>>, Error> {
        let jname = frame.new_string(name)?;
        let value = self.invoke_companion(
            frame,
            Operation::GetPackage,
            &[Value::Object(Some(jname.as_raw()))],
        )?;
        Ok(frame.object(value))
    }

    /// A class or subpackage of `package` by simple name.
    pub fn package_object<'f>(
        &self,
        frame: &'f Frame,
        package: LocalRef<'f>,
        name: &str,
    ) -> Result<Option<LocalRef<'f>>, Error> {
        let jname = frame.new_string(name)?;
        self.invoke_object(
            frame,
            Operation::PackageGetObject,
            Some(package),
            &[Value::Object(Some(jname.as_raw()))],
        )
    }

    pub fn package_contents<'f>(
        &self,
        frame: &'f Frame,
        package: LocalRef<'f>,
    ) -> Result<Vec<String>, Error> {
        let names = match self.invoke_object(frame, Operation::PackageGetContents, Some(package), &[])? {
            Some(names) => names,
            None => return Ok(vec![]),
        };
        let len = frame.array_length(names)?;
        let nested = frame.nested(len.max(1))?;
        let mut contents = Vec::with_capacity(len);
        for idx in 0..len {
            match nested.array_get(names, idx)? {
                Some(name) => contents.push(nested.string(name)?),
                None => tracing::debug!("skipping null entry {} in package contents", idx),
            }
        }
        Ok(contents)
    }

    /// A new array of `elem_class` with the given dimensions.
    pub fn new_array_instance<'f>(
        &self,
        frame: &'f Frame,
        elem_class: LocalRef<'f>,
        dims: &[i32],
    ) -> Result<LocalRef<'f>, Error> {
        let dims = frame.new_int_array(dims)?;
        let value = self.invoke(
            frame,
            Operation::ArrayNewInstance,
            None,
            &[
                Value::Object(Some(elem_class.as_raw())),
                Value::Object(Some(dims.as_raw())),
            ],
        )?;
        Context::expect_object(frame, value, Operation::ArrayNewInstance)
    }

    pub fn compare_to<'f>(
        &self,
        frame: &'f Frame,
        obj: LocalRef<'f>,
        other: LocalRef<'f>,
    ) -> Result<i32, Error> {
        self.invoke(
            frame,
            Operation::CompareTo,
            Some(obj),
            &[Value::Object(Some(other.as_raw()))],
        )?
        .as_int()
        .ok_or_else(|| bridge_format_err!("compareTo did not return an int"))
    }

    /// A proxy dispatching `interfaces` to a host object.
    pub fn new_proxy<'f>(
        &self,
        frame: &'f Frame,
        host_context: i64,
        host_object: i64,
        interfaces: LocalRef<'f>,
    ) -> Result<LocalRef<'f>, Error> {
        let live = self.live("runtime call")?;
        let companion = live.companion()?;
        let value = self.invoke(
            frame,
            Operation::NewProxy,
            None,
            &[
                Value::Object(companion.as_raw()),
                Value::Long(host_context),
                Value::Long(host_object),
                Value::Object(Some(interfaces.as_raw())),
            ],
        )?;
        Context::expect_object(frame, value, Operation::NewProxy)
    }

    /// The runtime-side object implemented by a proxy.
    pub fn proxy_instance<'f>(
        &self,
        frame: &'f Frame,
        proxy: LocalRef<'f>,
    ) -> Result<LocalRef<'f>, Error> {
        let value = self.invoke(frame, Operation::ProxyNewInstance, Some(proxy), &[])?;
        Context::expect_object(frame, value, Operation::ProxyNewInstance)
    }

    /// Tell the companion about a new host-side wrapper.
    pub fn new_wrapper(&self, frame: &Frame, host_id: i64) -> Result<(), Error> {
        self.invoke_companion(frame, Operation::NewWrapper, &[Value::Long(host_id)])?;
        Ok(())
    }

    /// Stack trace elements of `exc`, excluding those shared with `previous`.
    pub fn stack_trace<'f>(
        &self,
        frame: &'f Frame,
        exc: LocalRef<'f>,
        previous: Option<LocalRef<'f>>,
    ) -> Result<Option<LocalRef<'f>>, Error> {
        let value = self.invoke_companion(
            frame,
            Operation::GetStackTrace,
            &[
                Value::Object(Some(exc.as_raw())),
                Value::Object(previous.map(|p| p.as_raw())),
            ],
        )?;
        Ok(frame.object(value))
    }

    /// Find a class through the type manager.
    pub fn find_class(&self, frame: &Frame, name: &str) -> Result<Arc<ClassRef>, Error> {
        let live = self.live("find class")?;
        live.type_manager.find_class(frame, name)
    }

    /// Load a class through the context's class loader.
    pub fn load_class(&self, frame: &Frame, name: &str) -> Result<ClassRef, Error> {
        let live = self.live("load class")?;
        live.class_loader.load_class(frame, name)
    }

    pub fn byte_buffer_class(&self) -> Result<Arc<ClassRef>, Error> {
        Ok(self.live("byte buffer class")?.byte_buffer.clone())
    }

    pub fn bootstrap(&self) -> Result<Arc<BootstrapBindings>, Error> {
        Ok(self.live("bootstrap bindings")?.bootstrap.clone())
    }

    pub fn trigger_gc(&self, frame: &Frame) -> Result<(), Error> {
        self.live("gc")?.gc.trigger_collection(frame)
    }

    pub fn memory_stats(&self, frame: &Frame) -> Result<MemoryStats, Error> {
        self.live("gc")?.gc.memory_stats(frame)
    }
}

impl Live {
    fn binding(&self, op: Operation) -> Result<&Binding, Error> {
        if self.bindings.contains(op) {
            self.bindings.get(op)
        } else {
            self.bootstrap.table().get(op)
        }
    }

    fn companion(&self) -> Result<Arc<GlobalRef>, Error> {
        lock(&self.companion)
            .clone()
            .ok_or(Error::NotRunning("companion released"))
    }

    /// A frame without the stale-interrupt check, for the interrupt protocol itself.
    fn bare_frame(&self, capacity: usize) -> Result<Frame<'static>, Error> {
        let env = thread::ensure_attached(&*self.runtime)?;
        Ok(Frame::new(self.runtime.clone(), env, capacity)?
            .with_bootstrap(self.bootstrap.clone(), self.limits.max_cause_depth))
    }

    fn frame(&self, capacity: usize) -> Result<Frame<'static>, Error> {
        let frame = self.bare_frame(capacity)?;
        if interrupt::arbiter().state() == InterruptState::Acknowledged {
            self.clear_runtime_interrupt(&frame)?;
        }
        Ok(frame)
    }

    fn clear_runtime_interrupt(&self, frame: &Frame) -> Result<(), Error> {
        self.binding(Operation::ClearInterrupt)?
            .invoke(frame, None, &[Value::Boolean(false)])?;
        if interrupt::arbiter().settle() {
            tracing::debug!("runtime interrupt cleared");
        }
        Ok(())
    }

    /// Ask the companion to shut down, at most once and only while it exists.
    fn run_companion_shutdown(&self) {
        let companion = match lock(&self.companion).take() {
            Some(companion) => companion,
            None => {
                tracing::debug!("companion already released; skipping runtime-side shutdown");
                return;
            }
        };
        if let Err(e) = self.invoke_shutdown(&companion) {
            tracing::warn!("runtime-side shutdown failed: {}", e);
        }
    }

    fn invoke_shutdown(&self, companion: &GlobalRef) -> Result<(), Error> {
        let frame = self.bare_frame(2)?;
        let this = companion
            .local(&frame)
            .ok_or(Error::NotRunning("companion released"))?;
        self.binding(Operation::Shutdown)?
            .invoke(&frame, Some(this), &[])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::{MockLauncher, MockRuntime, MockRuntimeBuilder};
    use crate::test_helpers::{test_ex, test_nonex};

    fn started(mock: &Arc<MockRuntime>) -> Arc<Context> {
        let ctx = Context::new();
        ctx.start_with(
            &BootConfig::new("/mock/libjvm.so"),
            Box::new(MockLauncher::new(mock.clone())),
        )
        .expect("context boots");
        ctx
    }

    #[test]
    fn boot_then_shutdown() {
        test_nonex(|| {
            let mock = MockRuntimeBuilder::new().build();
            let ctx = started(&mock);
            assert!(ctx.is_running());
            assert!(!ctx.is_embedded());
            assert!(ctx.convert_strings());
            assert_eq!(
                ctx.resource_names(),
                vec!["class loader", "type manager", "gc bridge"]
            );
            assert_eq!(ctx.byte_buffer_class().unwrap().name(), "java.nio.ByteBuffer");

            ctx.shutdown(true).unwrap();
            assert!(!ctx.is_running());
            assert_eq!(ctx.state(), State::ShutDown);
            assert!(mock.is_destroyed());
            assert!(ctx.frame().unwrap_err().is_not_running());
            assert!(ctx.shutdown(true).unwrap_err().is_not_running());
        })
    }

    #[test]
    fn second_start_is_rejected() {
        test_nonex(|| {
            let mock = MockRuntimeBuilder::new().build();
            let ctx = started(&mock);
            match ctx.start_with(
                &BootConfig::new("/mock/libjvm.so"),
                Box::new(MockLauncher::new(mock.clone())),
            ) {
                Err(Error::AlreadyStarted) => (),
                other => panic!("unexpected result: {:?}", other),
            }
            ctx.shutdown(false).unwrap();
        })
    }

    #[test]
    fn failed_boot_keeps_runtime_for_cleanup() {
        test_nonex(|| {
            let mock = MockRuntimeBuilder::new()
                .without_method(COMPANION_CLASS_SLASH, "getTypeManager")
                .build();
            let ctx = Context::new();
            let res = ctx.start_with(
                &BootConfig::new("/mock/libjvm.so"),
                Box::new(MockLauncher::new(mock.clone())),
            );
            assert!(matches!(res, Err(Error::BootFailure(_))));
            assert_eq!(ctx.state(), State::NotStarted);
            assert!(!ctx.is_running());
            assert!(ctx.runtime().is_some());

            ctx.shutdown(true).unwrap();
            assert!(mock.is_destroyed());
            assert!(ctx.runtime().is_none());
        })
    }

    const COMPANION_CLASS_SLASH: &str = "org/jvmbridge/BridgeContext";

    #[test]
    fn companion_receives_context_and_interrupt_flag() {
        test_nonex(|| {
            let mock = MockRuntimeBuilder::new()
                .with_method(
                    COMPANION_CLASS_SLASH,
                    "createContext",
                    "(JLjava/lang/ClassLoader;Ljava/lang/String;Z)Lorg/jvmbridge/BridgeContext;",
                    true,
                    |rt, call| {
                        rt.note(format!(
                            "createContext id={} loader={} interrupt={:?}",
                            call.args[0].as_long().unwrap_or(0) != 0,
                            call.arg_object(1).is_some(),
                            call.args[3].as_bool()
                        ));
                        Value::Object(Some(rt.new_plain(COMPANION_CLASS_SLASH)))
                    },
                )
                .build();
            let ctx = Context::new();
            ctx.start_with(
                &BootConfig::new("/mock/libjvm.so")
                    .with_flags(crate::config::BootFlags::INTERRUPT),
                Box::new(MockLauncher::new(mock.clone())),
            )
            .unwrap();
            assert!(mock
                .events()
                .contains(&"createContext id=true loader=true interrupt=Some(true)".to_string()));
            assert!(!ctx.convert_strings());
            ctx.shutdown(false).unwrap();
        })
    }

    #[test]
    fn active_context_tracks_start_and_shutdown() {
        test_ex(|| {
            let mock = MockRuntimeBuilder::new().build();
            let ctx = started(&mock);
            let active = Context::active().expect("context registered");
            assert!(Arc::ptr_eq(&active, &ctx));
            drop(active);
            ctx.shutdown(false).unwrap();
            assert!(Context::active().is_none());
        })
    }

    #[test]
    fn managed_shutdown_stops_calls_and_skips_companion_shutdown() {
        test_nonex(|| {
            let mock = MockRuntimeBuilder::new().build();
            let ctx = started(&mock);
            ctx.on_managed_shutdown();
            assert!(!ctx.is_running());
            assert!(ctx.frame().unwrap_err().is_not_running());

            ctx.shutdown(true).unwrap();
            assert_eq!(mock.invocations(COMPANION_CLASS_SLASH, "shutdown"), 0);
            assert!(mock.is_destroyed());
        })
    }
}
