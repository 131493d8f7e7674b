//! Raw JNI definitions.
//!
//! Only the entries of the `JNINativeInterface_` and `JNIInvokeInterface_` tables that the bridge
//! uses are named; the tables are addressed by slot index, which is fixed by the JNI
//! specification.
#![allow(non_camel_case_types, non_snake_case)]

use libc::{c_char, c_void};

pub type jint = i32;
pub type jlong = i64;
pub type jsize = jint;
pub type jboolean = u8;
pub type jobject = *mut c_void;
pub type jclass = jobject;
pub type jstring = jobject;
pub type jthrowable = jobject;
pub type jarray = jobject;
pub type jmethodID = *mut c_void;

/// `JNIEnv*` and `JavaVM*`: pointers to a pointer to a function table.
pub type JNIEnvPtr = *mut *const *const c_void;
pub type JavaVMPtr = *mut *const *const c_void;

pub const JNI_OK: jint = 0;
pub const JNI_EDETACHED: jint = -2;
pub const JNI_VERSION_1_4: jint = 0x0001_0004;
pub const JNI_TRUE: jboolean = 1;
pub const JNI_FALSE: jboolean = 0;

#[repr(C)]
#[derive(Clone, Copy)]
pub union jvalue {
    pub z: jboolean,
    pub i: jint,
    pub j: jlong,
    pub d: f64,
    pub l: jobject,
}

#[repr(C)]
pub struct JavaVMOption {
    pub optionString: *mut c_char,
    pub extraInfo: *mut c_void,
}

#[repr(C)]
pub struct JavaVMInitArgs {
    pub version: jint,
    pub nOptions: jint,
    pub options: *mut JavaVMOption,
    pub ignoreUnrecognized: jboolean,
}

pub type CreateJavaVM =
    unsafe extern "system" fn(*mut JavaVMPtr, *mut JNIEnvPtr, *mut c_void) -> jint;
pub type GetCreatedJavaVMs = unsafe extern "system" fn(*mut JavaVMPtr, jsize, *mut jsize) -> jint;

/// Slots in `JNIInvokeInterface_`.
pub mod vm {
    pub const DESTROY_JAVA_VM: usize = 3;
    pub const ATTACH_CURRENT_THREAD: usize = 4;
    pub const DETACH_CURRENT_THREAD: usize = 5;
    pub const GET_ENV: usize = 6;
    pub const ATTACH_CURRENT_THREAD_AS_DAEMON: usize = 7;
}

/// Slots in `JNINativeInterface_`.
pub mod env {
    pub const FIND_CLASS: usize = 6;
    pub const EXCEPTION_OCCURRED: usize = 15;
    pub const EXCEPTION_CLEAR: usize = 17;
    pub const PUSH_LOCAL_FRAME: usize = 19;
    pub const POP_LOCAL_FRAME: usize = 20;
    pub const NEW_GLOBAL_REF: usize = 21;
    pub const DELETE_GLOBAL_REF: usize = 22;
    pub const DELETE_LOCAL_REF: usize = 23;
    pub const IS_INSTANCE_OF: usize = 32;
    pub const GET_METHOD_ID: usize = 33;

    pub const CALL_OBJECT_METHOD_A: usize = 36;
    pub const CALL_BOOLEAN_METHOD_A: usize = 39;
    pub const CALL_INT_METHOD_A: usize = 51;
    pub const CALL_LONG_METHOD_A: usize = 54;
    pub const CALL_DOUBLE_METHOD_A: usize = 60;
    pub const CALL_VOID_METHOD_A: usize = 63;

    pub const GET_STATIC_METHOD_ID: usize = 113;
    pub const CALL_STATIC_OBJECT_METHOD_A: usize = 116;
    pub const CALL_STATIC_BOOLEAN_METHOD_A: usize = 119;
    pub const CALL_STATIC_INT_METHOD_A: usize = 131;
    pub const CALL_STATIC_LONG_METHOD_A: usize = 134;
    pub const CALL_STATIC_DOUBLE_METHOD_A: usize = 140;
    pub const CALL_STATIC_VOID_METHOD_A: usize = 143;

    pub const NEW_STRING_UTF: usize = 167;
    pub const GET_STRING_UTF_CHARS: usize = 169;
    pub const RELEASE_STRING_UTF_CHARS: usize = 170;
    pub const GET_ARRAY_LENGTH: usize = 171;
    pub const NEW_OBJECT_ARRAY: usize = 172;
    pub const GET_OBJECT_ARRAY_ELEMENT: usize = 173;
    pub const SET_OBJECT_ARRAY_ELEMENT: usize = 174;
    pub const NEW_INT_ARRAY: usize = 179;
    pub const SET_INT_ARRAY_REGION: usize = 211;
    pub const GET_JAVA_VM: usize = 219;
}

/// Fetch slot `index` of the function table behind `ptr` as a function pointer of type `F`.
///
/// # Safety
///
/// `ptr` must be a live `JNIEnv*` or `JavaVM*`, `index` must be a slot of that table, and `F` must
/// be the exact function pointer type stored in that slot.
pub unsafe fn table_fn<F: Copy>(ptr: *mut *const *const c_void, index: usize) -> F {
    debug_assert_eq!(
        std::mem::size_of::<F>(),
        std::mem::size_of::<*const c_void>()
    );
    let table = *ptr;
    let slot = *table.add(index);
    std::mem::transmute_copy::<*const c_void, F>(&slot)
}
