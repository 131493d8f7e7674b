use anyhow::Error as AnyError;
use std::fmt;
use thiserror::Error;

/// jvmbridge runtime errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {}", _0)]
    InvalidArgument(&'static str),

    /// The managed runtime library could not be loaded.
    #[error("Unable to load runtime library `{}`: {}", path, source)]
    LoadFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A required entry symbol is missing from the loaded runtime library.
    #[error("Symbol not found in runtime library: {}", _0)]
    SymbolNotFound(String),

    /// The managed runtime could not be created, or a binding required by the context could not
    /// be resolved against it.
    #[error("Boot failure: {}", _0)]
    BootFailure(String),

    /// `start` was called on a context that already loaded a runtime.
    #[error("Context already started")]
    AlreadyStarted,

    /// An operation was attempted while the context is not running.
    #[error("Java virtual machine is not running: {}", _0)]
    NotRunning(&'static str),

    /// The managed runtime refused to attach the calling thread.
    #[error("Unable to attach thread: {}", _0)]
    AttachFailure(String),

    /// A frame could not hold another local reference.
    #[error("Frame capacity exhausted: {} references", _0)]
    ResourceExhausted(usize),

    /// The host observed an interrupt raised through the interrupt arbiter.
    #[error("Interrupted")]
    Interrupted,

    /// An exception raised by the managed runtime during a call.
    #[error("Managed runtime raised {}", _0)]
    RuntimeSideException(#[source] ManagedException),

    /// A class lookup through the type manager or class loader came back empty.
    #[error("Class not found: {}", _0)]
    ClassNotFound(String),

    /// An unsupported feature was used.
    #[error("Unsupported feature: {}", _0)]
    Unsupported(String),

    /// A catch-all for internal errors that are likely unrecoverable by the runtime user.
    #[error("Internal error: {}", _0)]
    InternalError(#[source] AnyError),
}

impl Error {
    pub fn is_not_running(&self) -> bool {
        matches!(self, Error::NotRunning(_))
    }
}

impl From<std::ffi::NulError> for Error {
    fn from(e: std::ffi::NulError) -> Error {
        Error::InternalError(e.into())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(e: std::str::Utf8Error) -> Error {
        Error::InternalError(e.into())
    }
}

/// An exception thrown by the managed runtime, translated into host terms.
///
/// The cause chain reported by the runtime is preserved and exposed through
/// [`std::error::Error::source`].
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedException {
    pub class_name: String,
    pub message: Option<String>,
    pub cause: Option<Box<ManagedException>>,
}

impl ManagedException {
    pub fn new(class_name: impl Into<String>, message: Option<String>) -> Self {
        ManagedException {
            class_name: class_name.into(),
            message,
            cause: None,
        }
    }

    /// Iterate over this exception followed by each of its causes.
    pub fn chain(&self) -> impl Iterator<Item = &ManagedException> {
        std::iter::successors(Some(self), |e| e.cause.as_deref())
    }

    pub fn root_cause(&self) -> &ManagedException {
        self.chain().last().unwrap_or(self)
    }
}

impl fmt::Display for ManagedException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.class_name, msg),
            None => write!(f, "{}", self.class_name),
        }
    }
}

impl std::error::Error for ManagedException {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

#[macro_export]
macro_rules! bridge_bail {
    ($e:expr) => {
        return Err(bridge_format_err!($e));
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err(bridge_format_err!($fmt, $($arg)*));
    };
}

#[macro_export(local_inner_macros)]
macro_rules! bridge_ensure {
    ($cond:expr, $e:expr) => {
        if !($cond) {
            bridge_bail!($e);
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            bridge_bail!($fmt, $($arg)*);
        }
    };
}

#[macro_export]
macro_rules! bridge_format_err {
    ($($arg:tt)*) => { $crate::error::Error::InternalError(anyhow::format_err!($($arg)*)) }
}

#[macro_export]
macro_rules! boot_failure {
    ($($arg:tt)*) => { $crate::error::Error::BootFailure(format!($($arg)*)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn cause_chain_is_exposed_as_source() {
        let mut outer = ManagedException::new(
            "java.lang.RuntimeException",
            Some("wrapper".to_string()),
        );
        outer.cause = Some(Box::new(ManagedException::new(
            "java.io.IOException",
            Some("disk gone".to_string()),
        )));

        let source = outer.source().expect("cause is reported as source");
        assert_eq!(source.to_string(), "java.io.IOException: disk gone");
        assert_eq!(outer.chain().count(), 2);
        assert_eq!(outer.root_cause().class_name, "java.io.IOException");
    }

    #[test]
    fn runtime_side_exception_preserves_chain() {
        let exc = ManagedException::new("java.lang.IllegalStateException", None);
        let err = Error::RuntimeSideException(exc);
        assert_eq!(
            err.to_string(),
            "Managed runtime raised java.lang.IllegalStateException"
        );
        assert!(err.source().is_some());
    }
}
