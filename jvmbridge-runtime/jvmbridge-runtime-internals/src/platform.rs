use crate::error::Error;
use libc::c_void;
use libloading::Library;
use std::env;
use std::ffi::CStr;
use std::mem::MaybeUninit;
use std::path::{Path, PathBuf};

/// A managed-runtime shared library loaded into the process.
pub struct PlatformLibrary {
    lib: Option<Library>,
    path: PathBuf,
}

impl PlatformLibrary {
    pub fn new() -> Self {
        PlatformLibrary {
            lib: None,
            path: PathBuf::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.lib.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the library at `path`, replacing any library loaded earlier.
    pub fn load_library<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        tracing::debug!("loading runtime library {}", path.display());
        let lib = Library::new(path.as_os_str()).map_err(|source| Error::LoadFailure {
            path: path.display().to_string(),
            source,
        })?;
        self.lib = Some(lib);
        self.path = path.to_path_buf();
        Ok(())
    }

    /// Resolve an entry symbol as a raw pointer.
    ///
    /// The pointer stays valid until [`unload_library`](#method.unload_library) is called.
    pub fn get_symbol(&self, name: &str) -> Result<*const c_void, Error> {
        let lib = self
            .lib
            .as_ref()
            .ok_or(Error::InvalidArgument("no runtime library loaded"))?;
        let sym = unsafe {
            lib.get::<*const c_void>(name.as_bytes())
                .map_err(|_| Error::SymbolNotFound(name.to_string()))?
        };
        let ptr = *sym;
        if ptr.is_null() {
            return Err(Error::SymbolNotFound(name.to_string()));
        }
        Ok(ptr)
    }

    pub fn unload_library(&mut self) {
        if let Some(lib) = self.lib.take() {
            tracing::debug!("unloading runtime library {}", self.path.display());
            drop(lib);
        }
    }
}

impl Default for PlatformLibrary {
    fn default() -> Self {
        PlatformLibrary::new()
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "macos")] {
        const RUNTIME_LIBRARY_NAME: &str = "libjvm.dylib";
        const RUNTIME_LIBRARY_DIRS: &[&str] = &["lib/server", "jre/lib/server"];
    } else if #[cfg(windows)] {
        const RUNTIME_LIBRARY_NAME: &str = "jvm.dll";
        const RUNTIME_LIBRARY_DIRS: &[&str] = &["bin/server", "jre/bin/server", "bin/client"];
    } else {
        const RUNTIME_LIBRARY_NAME: &str = "libjvm.so";
        const RUNTIME_LIBRARY_DIRS: &[&str] = &[
            "lib/server",
            "jre/lib/server",
            "jre/lib/amd64/server",
            "lib/amd64/server",
            "jre/lib/aarch64/server",
        ];
    }
}

/// Locate the runtime library under `JAVA_HOME`, if it is set and the library is present.
pub fn default_library_path() -> Option<PathBuf> {
    let home = env::var_os("JAVA_HOME")?;
    library_under(Path::new(&home))
}

fn library_under(home: &Path) -> Option<PathBuf> {
    RUNTIME_LIBRARY_DIRS
        .iter()
        .map(|dir| home.join(dir).join(RUNTIME_LIBRARY_NAME))
        .find(|candidate| candidate.is_file())
}

/// The path of the shared object this code was loaded from, handed to the companion so it can
/// bind its native methods. `None` when statically linked into an executable.
pub fn native_library_path() -> Option<PathBuf> {
    let addr = native_library_path as *const c_void;
    let dli = dladdr(addr)?;
    if dli.dli_fname.is_null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr(dli.dli_fname) };
    name.to_str().ok().map(PathBuf::from)
}

fn dladdr(addr: *const c_void) -> Option<libc::Dl_info> {
    let mut info = MaybeUninit::<libc::Dl_info>::uninit();
    let res = unsafe { libc::dladdr(addr, info.as_mut_ptr()) };
    if res != 0 {
        Some(unsafe { info.assume_init() })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_library_is_load_failure() {
        let mut lib = PlatformLibrary::new();
        let err = lib
            .load_library("/nonexistent/path/to/libjvm.so")
            .expect_err("missing library does not load");
        match err {
            Error::LoadFailure { path, .. } => assert!(path.contains("nonexistent")),
            other => panic!("unexpected error: {}", other),
        }
        assert!(!lib.is_loaded());
    }

    #[test]
    fn symbol_lookup_requires_loaded_library() {
        let lib = PlatformLibrary::new();
        assert!(lib.get_symbol("JNI_CreateJavaVM").is_err());
    }

    #[test]
    fn library_under_empty_home_is_none() {
        assert!(library_under(Path::new("/nonexistent-java-home")).is_none());
    }
}
