//! The production backend: a JVM driven through its raw JNI function tables.

mod sys;

use self::sys::{
    jboolean, jint, jmethodID, jobject, jsize, jvalue, CreateJavaVM, GetCreatedJavaVMs,
    JNIEnvPtr, JavaVMInitArgs, JavaVMOption, JavaVMPtr, JNI_EDETACHED, JNI_FALSE, JNI_OK,
    JNI_TRUE, JNI_VERSION_1_4,
};
use crate::error::Error;
use crate::platform::PlatformLibrary;
use crate::runtime::{
    Env, InitArgs, Launcher, MethodId, RawRef, ReturnKind, Runtime, Target, Value,
};
use libc::{c_char, c_void};
use std::ffi::{CStr, CString};
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A JVM reached through its `JavaVM*` invocation interface.
pub struct JniRuntime {
    vm: JavaVMPtr,
    destroyed: AtomicBool,
}

// the JavaVM pointer is valid from any thread for the life of the VM
unsafe impl Send for JniRuntime {}
unsafe impl Sync for JniRuntime {}

impl JniRuntime {
    /// Wrap an existing `JavaVM*`.
    ///
    /// # Safety
    ///
    /// `vm` must point to a live Java virtual machine that outlives the returned value.
    pub unsafe fn from_raw_vm(vm: *mut c_void) -> Arc<JniRuntime> {
        Arc::new(JniRuntime {
            vm: vm as JavaVMPtr,
            destroyed: AtomicBool::new(false),
        })
    }

    /// Wrap the virtual machine owning `env`, for native code loaded into a running JVM.
    ///
    /// # Safety
    ///
    /// `env` must be the valid `JNIEnv*` of the calling thread.
    pub unsafe fn from_raw_env(env: *mut c_void) -> Result<(Arc<JniRuntime>, Env), Error> {
        let env_ptr = env as JNIEnvPtr;
        let handle = Env::from_raw(env as usize).ok_or(Error::InvalidArgument("null JNIEnv"))?;
        let get_java_vm: unsafe extern "system" fn(JNIEnvPtr, *mut JavaVMPtr) -> jint =
            sys::table_fn(env_ptr, sys::env::GET_JAVA_VM);
        let mut vm: JavaVMPtr = ptr::null_mut();
        if get_java_vm(env_ptr, &mut vm) != JNI_OK || vm.is_null() {
            return Err(Error::BootFailure(
                "unable to obtain the JavaVM from JNIEnv".to_string(),
            ));
        }
        Ok((JniRuntime::from_raw_vm(vm as *mut c_void), handle))
    }

    fn env_ptr(env: Env) -> JNIEnvPtr {
        env.as_raw() as JNIEnvPtr
    }

    fn raw(obj: RawRef) -> jobject {
        obj.as_raw() as jobject
    }

    fn opt_raw(obj: Option<RawRef>) -> jobject {
        obj.map(JniRuntime::raw).unwrap_or(ptr::null_mut())
    }

    fn wrap(obj: jobject) -> Option<RawRef> {
        RawRef::from_raw(obj as usize)
    }

    unsafe fn call_a<R>(env: JNIEnvPtr, slot: usize, recv: jobject, mid: jmethodID, args: &[jvalue]) -> R {
        let f: unsafe extern "system" fn(JNIEnvPtr, jobject, jmethodID, *const jvalue) -> R =
            sys::table_fn(env, slot);
        f(env, recv, mid, args.as_ptr())
    }
}

impl Runtime for JniRuntime {
    fn get_env(&self) -> Option<Env> {
        if self.destroyed.load(Ordering::SeqCst) {
            return None;
        }
        let mut env: *mut c_void = ptr::null_mut();
        let res = unsafe {
            let get_env: unsafe extern "system" fn(JavaVMPtr, *mut *mut c_void, jint) -> jint =
                sys::table_fn(self.vm, sys::vm::GET_ENV);
            get_env(self.vm, &mut env, JNI_VERSION_1_4)
        };
        if res == JNI_OK {
            Env::from_raw(env as usize)
        } else {
            if res != JNI_EDETACHED {
                tracing::trace!("GetEnv returned {}", res);
            }
            None
        }
    }

    fn attach_current_thread(&self, daemon: bool) -> Result<Env, Error> {
        if let Some(env) = self.get_env() {
            return Ok(env);
        }
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(Error::AttachFailure("runtime destroyed".to_string()));
        }
        let slot = if daemon {
            sys::vm::ATTACH_CURRENT_THREAD_AS_DAEMON
        } else {
            sys::vm::ATTACH_CURRENT_THREAD
        };
        let mut env: *mut c_void = ptr::null_mut();
        let res = unsafe {
            let attach: unsafe extern "system" fn(JavaVMPtr, *mut *mut c_void, *mut c_void) -> jint =
                sys::table_fn(self.vm, slot);
            attach(self.vm, &mut env, ptr::null_mut())
        };
        if res != JNI_OK {
            return Err(Error::AttachFailure(format!(
                "AttachCurrentThread{} returned {}",
                if daemon { "AsDaemon" } else { "" },
                res
            )));
        }
        Env::from_raw(env as usize)
            .ok_or_else(|| Error::AttachFailure("attach produced a null JNIEnv".to_string()))
    }

    fn detach_current_thread(&self) {
        if self.get_env().is_none() {
            return;
        }
        unsafe {
            let detach: unsafe extern "system" fn(JavaVMPtr) -> jint =
                sys::table_fn(self.vm, sys::vm::DETACH_CURRENT_THREAD);
            detach(self.vm);
        }
    }

    fn destroy(&self) -> Result<(), Error> {
        let res = unsafe {
            let destroy: unsafe extern "system" fn(JavaVMPtr) -> jint =
                sys::table_fn(self.vm, sys::vm::DESTROY_JAVA_VM);
            destroy(self.vm)
        };
        self.destroyed.store(true, Ordering::SeqCst);
        if res != JNI_OK {
            return Err(bridge_format_err!("DestroyJavaVM returned {}", res));
        }
        Ok(())
    }

    fn push_local_frame(&self, env: Env, capacity: usize) -> bool {
        let env = JniRuntime::env_ptr(env);
        unsafe {
            let push: unsafe extern "system" fn(JNIEnvPtr, jint) -> jint =
                sys::table_fn(env, sys::env::PUSH_LOCAL_FRAME);
            push(env, capacity.min(jint::max_value() as usize) as jint) == JNI_OK
        }
    }

    fn pop_local_frame(&self, env: Env, keep: Option<RawRef>) -> Option<RawRef> {
        let env = JniRuntime::env_ptr(env);
        unsafe {
            let pop: unsafe extern "system" fn(JNIEnvPtr, jobject) -> jobject =
                sys::table_fn(env, sys::env::POP_LOCAL_FRAME);
            JniRuntime::wrap(pop(env, JniRuntime::opt_raw(keep)))
        }
    }

    fn new_global_ref(&self, env: Env, obj: RawRef) -> Option<RawRef> {
        let env = JniRuntime::env_ptr(env);
        unsafe {
            let new_ref: unsafe extern "system" fn(JNIEnvPtr, jobject) -> jobject =
                sys::table_fn(env, sys::env::NEW_GLOBAL_REF);
            JniRuntime::wrap(new_ref(env, JniRuntime::raw(obj)))
        }
    }

    fn delete_global_ref(&self, env: Env, obj: RawRef) {
        let env = JniRuntime::env_ptr(env);
        unsafe {
            let delete: unsafe extern "system" fn(JNIEnvPtr, jobject) =
                sys::table_fn(env, sys::env::DELETE_GLOBAL_REF);
            delete(env, JniRuntime::raw(obj));
        }
    }

    fn delete_local_ref(&self, env: Env, obj: RawRef) {
        let env = JniRuntime::env_ptr(env);
        unsafe {
            let delete: unsafe extern "system" fn(JNIEnvPtr, jobject) =
                sys::table_fn(env, sys::env::DELETE_LOCAL_REF);
            delete(env, JniRuntime::raw(obj));
        }
    }

    fn find_class(&self, env: Env, name: &str) -> Option<RawRef> {
        let name = CString::new(name).ok()?;
        let env = JniRuntime::env_ptr(env);
        unsafe {
            let find: unsafe extern "system" fn(JNIEnvPtr, *const c_char) -> jobject =
                sys::table_fn(env, sys::env::FIND_CLASS);
            JniRuntime::wrap(find(env, name.as_ptr()))
        }
    }

    fn is_instance_of(&self, env: Env, obj: RawRef, class: RawRef) -> bool {
        let env = JniRuntime::env_ptr(env);
        unsafe {
            let is_instance: unsafe extern "system" fn(JNIEnvPtr, jobject, jobject) -> jboolean =
                sys::table_fn(env, sys::env::IS_INSTANCE_OF);
            is_instance(env, JniRuntime::raw(obj), JniRuntime::raw(class)) == JNI_TRUE
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
        let name = CString::new(name).ok()?;
        let sig = CString::new(sig).ok()?;
        let slot = if is_static {
            sys::env::GET_STATIC_METHOD_ID
        } else {
            sys::env::GET_METHOD_ID
        };
        let env = JniRuntime::env_ptr(env);
        unsafe {
            let get: unsafe extern "system" fn(
                JNIEnvPtr,
                jobject,
                *const c_char,
                *const c_char,
            ) -> jmethodID = sys::table_fn(env, slot);
            MethodId::from_raw(get(env, JniRuntime::raw(class), name.as_ptr(), sig.as_ptr()) as usize)
        }
    }

    fn call(
        &self,
        env: Env,
        target: Target,
        method: MethodId,
        ret: ReturnKind,
        args: &[Value],
    ) -> Value {
        let jargs: Vec<jvalue> = args
            .iter()
            .map(|arg| match *arg {
                Value::Void => jvalue { j: 0 },
                Value::Boolean(b) => jvalue {
                    z: if b { JNI_TRUE } else { JNI_FALSE },
                },
                Value::Int(i) => jvalue { i },
                Value::Long(j) => jvalue { j },
                Value::Double(d) => jvalue { d },
                Value::Object(o) => jvalue {
                    l: JniRuntime::opt_raw(o),
                },
            })
            .collect();
        let env = JniRuntime::env_ptr(env);
        let mid = method.as_raw() as jmethodID;
        let (recv, is_static) = match target {
            Target::Static(class) => (JniRuntime::raw(class), true),
            Target::Instance(obj) => (JniRuntime::raw(obj), false),
        };
        use self::sys::env::*;
        unsafe {
            match (ret, is_static) {
                (ReturnKind::Void, false) => {
                    JniRuntime::call_a::<()>(env, CALL_VOID_METHOD_A, recv, mid, &jargs);
                    Value::Void
                }
                (ReturnKind::Void, true) => {
                    JniRuntime::call_a::<()>(env, CALL_STATIC_VOID_METHOD_A, recv, mid, &jargs);
                    Value::Void
                }
                (ReturnKind::Boolean, false) => Value::Boolean(
                    JniRuntime::call_a::<jboolean>(env, CALL_BOOLEAN_METHOD_A, recv, mid, &jargs)
                        == JNI_TRUE,
                ),
                (ReturnKind::Boolean, true) => Value::Boolean(
                    JniRuntime::call_a::<jboolean>(
                        env,
                        CALL_STATIC_BOOLEAN_METHOD_A,
                        recv,
                        mid,
                        &jargs,
                    ) == JNI_TRUE,
                ),
                (ReturnKind::Int, false) => Value::Int(JniRuntime::call_a::<jint>(
                    env,
                    CALL_INT_METHOD_A,
                    recv,
                    mid,
                    &jargs,
                )),
                (ReturnKind::Int, true) => Value::Int(JniRuntime::call_a::<jint>(
                    env,
                    CALL_STATIC_INT_METHOD_A,
                    recv,
                    mid,
                    &jargs,
                )),
                (ReturnKind::Long, false) => Value::Long(JniRuntime::call_a::<i64>(
                    env,
                    CALL_LONG_METHOD_A,
                    recv,
                    mid,
                    &jargs,
                )),
                (ReturnKind::Long, true) => Value::Long(JniRuntime::call_a::<i64>(
                    env,
                    CALL_STATIC_LONG_METHOD_A,
                    recv,
                    mid,
                    &jargs,
                )),
                (ReturnKind::Double, false) => Value::Double(JniRuntime::call_a::<f64>(
                    env,
                    CALL_DOUBLE_METHOD_A,
                    recv,
                    mid,
                    &jargs,
                )),
                (ReturnKind::Double, true) => Value::Double(JniRuntime::call_a::<f64>(
                    env,
                    CALL_STATIC_DOUBLE_METHOD_A,
                    recv,
                    mid,
                    &jargs,
                )),
                (ReturnKind::Object, false) => Value::Object(JniRuntime::wrap(
                    JniRuntime::call_a::<jobject>(env, CALL_OBJECT_METHOD_A, recv, mid, &jargs),
                )),
                (ReturnKind::Object, true) => Value::Object(JniRuntime::wrap(
                    JniRuntime::call_a::<jobject>(
                        env,
                        CALL_STATIC_OBJECT_METHOD_A,
                        recv,
                        mid,
                        &jargs,
                    ),
                )),
            }
        }
    }

    fn new_string(&self, env: Env, s: &str) -> Option<RawRef> {
        let s = CString::new(s).ok()?;
        let env = JniRuntime::env_ptr(env);
        unsafe {
            let new_string: unsafe extern "system" fn(JNIEnvPtr, *const c_char) -> jobject =
                sys::table_fn(env, sys::env::NEW_STRING_UTF);
            JniRuntime::wrap(new_string(env, s.as_ptr()))
        }
    }

    fn string_chars(&self, env: Env, s: RawRef) -> Option<String> {
        let env = JniRuntime::env_ptr(env);
        unsafe {
            let get: unsafe extern "system" fn(JNIEnvPtr, jobject, *mut jboolean) -> *const c_char =
                sys::table_fn(env, sys::env::GET_STRING_UTF_CHARS);
            let release: unsafe extern "system" fn(JNIEnvPtr, jobject, *const c_char) =
                sys::table_fn(env, sys::env::RELEASE_STRING_UTF_CHARS);
            let chars = get(env, JniRuntime::raw(s), ptr::null_mut());
            if chars.is_null() {
                return None;
            }
            // modified UTF-8 only differs for NUL and supplementary characters
            let out = CStr::from_ptr(chars).to_string_lossy().into_owned();
            release(env, JniRuntime::raw(s), chars);
            Some(out)
        }
    }

    fn new_object_array(&self, env: Env, len: usize, elem_class: RawRef) -> Option<RawRef> {
        let env = JniRuntime::env_ptr(env);
        unsafe {
            let new_array: unsafe extern "system" fn(JNIEnvPtr, jsize, jobject, jobject) -> jobject =
                sys::table_fn(env, sys::env::NEW_OBJECT_ARRAY);
            JniRuntime::wrap(new_array(
                env,
                len as jsize,
                JniRuntime::raw(elem_class),
                ptr::null_mut(),
            ))
        }
    }

    fn object_array_get(&self, env: Env, array: RawRef, idx: usize) -> Option<RawRef> {
        let env = JniRuntime::env_ptr(env);
        unsafe {
            let get: unsafe extern "system" fn(JNIEnvPtr, jobject, jsize) -> jobject =
                sys::table_fn(env, sys::env::GET_OBJECT_ARRAY_ELEMENT);
            JniRuntime::wrap(get(env, JniRuntime::raw(array), idx as jsize))
        }
    }

    fn object_array_set(&self, env: Env, array: RawRef, idx: usize, value: Option<RawRef>) {
        let env = JniRuntime::env_ptr(env);
        unsafe {
            let set: unsafe extern "system" fn(JNIEnvPtr, jobject, jsize, jobject) =
                sys::table_fn(env, sys::env::SET_OBJECT_ARRAY_ELEMENT);
            set(
                env,
                JniRuntime::raw(array),
                idx as jsize,
                JniRuntime::opt_raw(value),
            );
        }
    }

    fn new_int_array(&self, env: Env, values: &[i32]) -> Option<RawRef> {
        let env = JniRuntime::env_ptr(env);
        unsafe {
            let new_array: unsafe extern "system" fn(JNIEnvPtr, jsize) -> jobject =
                sys::table_fn(env, sys::env::NEW_INT_ARRAY);
            let set_region: unsafe extern "system" fn(JNIEnvPtr, jobject, jsize, jsize, *const jint) =
                sys::table_fn(env, sys::env::SET_INT_ARRAY_REGION);
            let array = new_array(env, values.len() as jsize);
            if array.is_null() {
                return None;
            }
            set_region(env, array, 0, values.len() as jsize, values.as_ptr());
            JniRuntime::wrap(array)
        }
    }

    fn array_length(&self, env: Env, array: RawRef) -> usize {
        let env = JniRuntime::env_ptr(env);
        unsafe {
            let len: unsafe extern "system" fn(JNIEnvPtr, jobject) -> jsize =
                sys::table_fn(env, sys::env::GET_ARRAY_LENGTH);
            len(env, JniRuntime::raw(array)).max(0) as usize
        }
    }

    fn exception_occurred(&self, env: Env) -> Option<RawRef> {
        let env = JniRuntime::env_ptr(env);
        unsafe {
            let occurred: unsafe extern "system" fn(JNIEnvPtr) -> jobject =
                sys::table_fn(env, sys::env::EXCEPTION_OCCURRED);
            JniRuntime::wrap(occurred(env))
        }
    }

    fn exception_clear(&self, env: Env) {
        let env = JniRuntime::env_ptr(env);
        unsafe {
            let clear: unsafe extern "system" fn(JNIEnvPtr) =
                sys::table_fn(env, sys::env::EXCEPTION_CLEAR);
            clear(env);
        }
    }
}

/// Loads `libjvm` with [`PlatformLibrary`] and creates a JVM through `JNI_CreateJavaVM`.
pub struct JniLauncher {
    library: PlatformLibrary,
    create_vm: Option<CreateJavaVM>,
    get_created_vms: Option<GetCreatedJavaVMs>,
}

impl JniLauncher {
    pub fn new() -> Self {
        JniLauncher {
            library: PlatformLibrary::new(),
            create_vm: None,
            get_created_vms: None,
        }
    }

    fn created_vm_count(&self) -> Result<jsize, Error> {
        let get_created = self
            .get_created_vms
            .ok_or(Error::InvalidArgument("runtime library not loaded"))?;
        let mut vm: JavaVMPtr = ptr::null_mut();
        let mut count: jsize = 0;
        let res = unsafe { get_created(&mut vm, 1, &mut count) };
        if res != JNI_OK {
            return Err(bridge_format_err!("JNI_GetCreatedJavaVMs returned {}", res));
        }
        Ok(count)
    }
}

impl Default for JniLauncher {
    fn default() -> Self {
        JniLauncher::new()
    }
}

impl Launcher for JniLauncher {
    fn load_library(&mut self, path: &Path) -> Result<(), Error> {
        self.library.load_library(path)?;
        let create = self.library.get_symbol("JNI_CreateJavaVM")?;
        let get_created = self.library.get_symbol("JNI_GetCreatedJavaVMs")?;
        unsafe {
            self.create_vm = Some(std::mem::transmute::<*const c_void, CreateJavaVM>(create));
            self.get_created_vms = Some(std::mem::transmute::<*const c_void, GetCreatedJavaVMs>(
                get_created,
            ));
        }
        Ok(())
    }

    fn create_runtime(&mut self, args: &InitArgs) -> Result<(Arc<dyn Runtime>, Env), Error> {
        let create = self
            .create_vm
            .ok_or(Error::InvalidArgument("runtime library not loaded"))?;
        if self.created_vm_count()? > 0 {
            return Err(Error::BootFailure(
                "a Java virtual machine already exists in this process".to_string(),
            ));
        }

        let option_strings = args
            .options
            .iter()
            .map(|o| CString::new(o.as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        let mut options: Vec<JavaVMOption> = option_strings
            .iter()
            .map(|o| JavaVMOption {
                optionString: o.as_ptr() as *mut c_char,
                extraInfo: ptr::null_mut(),
            })
            .collect();
        let mut init_args = JavaVMInitArgs {
            version: JNI_VERSION_1_4,
            nOptions: options.len() as jint,
            options: options.as_mut_ptr(),
            ignoreUnrecognized: if args.ignore_unrecognized {
                JNI_TRUE
            } else {
                JNI_FALSE
            },
        };

        let mut vm: JavaVMPtr = ptr::null_mut();
        let mut env: JNIEnvPtr = ptr::null_mut();
        tracing::debug!("creating JVM with {} options", options.len());
        let res = unsafe {
            create(
                &mut vm,
                &mut env,
                &mut init_args as *mut JavaVMInitArgs as *mut c_void,
            )
        };
        if res != JNI_OK || vm.is_null() {
            return Err(boot_failure!("Unable to start JVM (JNI_CreateJavaVM returned {})", res));
        }
        let env = Env::from_raw(env as usize)
            .ok_or_else(|| Error::BootFailure("JNI_CreateJavaVM produced a null JNIEnv".to_string()))?;
        let runtime: Arc<dyn Runtime> = unsafe { JniRuntime::from_raw_vm(vm as *mut c_void) };
        Ok((runtime, env))
    }

    fn unload_library(&mut self) {
        self.create_vm = None;
        self.get_created_vms = None;
        self.library.unload_library();
    }
}
