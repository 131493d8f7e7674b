use crate::context::bindings::{load_system_class, BindingTable, Operation, CLASS_LOADER_BINDINGS};
use crate::error::Error;
use crate::frame::Frame;
use crate::reference::{ClassRef, GlobalRef, LocalRef};
use crate::resource::Resource;
use crate::runtime::Value;
use std::sync::Mutex;

/// Loads classes, including the companion classes, through the runtime's system class loader.
pub struct ClassLoader {
    bindings: BindingTable,
    loader: Mutex<Option<GlobalRef>>,
}

impl ClassLoader {
    pub fn new(frame: &Frame) -> Result<ClassLoader, Error> {
        let mut bindings = BindingTable::new();
        bindings.resolve(frame, CLASS_LOADER_BINDINGS, load_system_class)?;
        let loader = bindings
            .get(Operation::GetSystemClassLoader)?
            .invoke(frame, None, &[])?;
        let loader = frame
            .object(loader)
            .ok_or_else(|| boot_failure!("system class loader is null"))?;
        let loader = frame.promote(loader)?;
        tracing::debug!("class loader ready");
        Ok(ClassLoader {
            bindings,
            loader: Mutex::new(Some(loader)),
        })
    }

    /// The loader object, for handing to the runtime.
    pub fn loader<'f>(&self, _frame: &'f Frame) -> Result<LocalRef<'f>, Error> {
        let raw = self
            .loader
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(GlobalRef::as_raw)
            .ok_or(Error::NotRunning("class loader destroyed"))?;
        // only released as a shutdown resource, after the runtime is gone
        Ok(LocalRef::new(raw))
    }

    /// Load and initialize a class by binary name.
    pub fn load_class(&self, frame: &Frame, name: &str) -> Result<ClassRef, Error> {
        let nested = frame.nested(4)?;
        let loader = self.loader(&nested)?;
        let jname = nested.new_string(name)?;
        let class = self
            .bindings
            .get(Operation::ForName)?
            .invoke(
                &nested,
                None,
                &[
                    Value::Object(Some(jname.as_raw())),
                    Value::Boolean(true),
                    Value::Object(Some(loader.as_raw())),
                ],
            )
            .map_err(|e| match e {
                Error::RuntimeSideException(_) => Error::ClassNotFound(name.to_string()),
                other => other,
            })?;
        let class = nested
            .object(class)
            .ok_or_else(|| Error::ClassNotFound(name.to_string()))?;
        let global = nested.promote(class)?;
        tracing::trace!("loaded class {}", name);
        Ok(ClassRef::new(name, global))
    }
}

impl Resource for ClassLoader {
    fn name(&self) -> &str {
        "class loader"
    }

    fn destroy(&self) {
        let loader = self.loader.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(loader);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntimeBuilder;
    use crate::runtime::Runtime;
    use std::sync::Arc;

    #[test]
    fn loads_companion_class() {
        let mock = MockRuntimeBuilder::new().build();
        let rt: Arc<dyn Runtime> = mock.clone();
        let env = rt.attach_current_thread(true).unwrap();
        let frame = Frame::new(rt, env, 16).unwrap();
        let loader = ClassLoader::new(&frame).unwrap();
        let class = loader
            .load_class(&frame, "org.jvmbridge.BridgeContext")
            .unwrap();
        assert_eq!(class.name(), "org.jvmbridge.BridgeContext");
        assert!(mock.class_requested("org/jvmbridge/BridgeContext"));
    }

    #[test]
    fn missing_class_is_class_not_found() {
        let mock = MockRuntimeBuilder::new().build();
        let rt: Arc<dyn Runtime> = mock.clone();
        let env = rt.attach_current_thread(true).unwrap();
        let frame = Frame::new(rt, env, 16).unwrap();
        let loader = ClassLoader::new(&frame).unwrap();
        match loader.load_class(&frame, "com.example.Absent") {
            Err(Error::ClassNotFound(name)) => assert_eq!(name, "com.example.Absent"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn destroy_releases_loader() {
        let mock = MockRuntimeBuilder::new().build();
        let rt: Arc<dyn Runtime> = mock.clone();
        let env = rt.attach_current_thread(true).unwrap();
        let frame = Frame::new(rt, env, 16).unwrap();
        let loader = ClassLoader::new(&frame).unwrap();
        let held = mock.global_ref_count();
        loader.destroy();
        assert_eq!(mock.global_ref_count(), held - 1);
        assert!(loader.loader(&frame).unwrap_err().is_not_running());
    }
}
