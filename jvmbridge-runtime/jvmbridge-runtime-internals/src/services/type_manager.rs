use crate::context::bindings::{BindingTable, Operation, TYPE_MANAGER_BINDINGS};
use crate::error::Error;
use crate::frame::Frame;
use crate::reference::{ClassRef, GlobalRef, LocalRef};
use crate::resource::Resource;
use crate::runtime::Value;
use crate::services::class_loader::ClassLoader;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Host-side view of the runtime's type manager.
///
/// The type manager is created before the companion exists and is wired to the companion's own
/// type manager object once it does. Class lookups are cached for the life of the context.
pub struct TypeManager {
    bindings: BindingTable,
    counterpart: Mutex<Option<GlobalRef>>,
    cache: Mutex<HashMap<String, Arc<ClassRef>>>,
}

impl TypeManager {
    pub fn new(frame: &Frame, class_loader: &ClassLoader) -> Result<TypeManager, Error> {
        let mut bindings = BindingTable::new();
        bindings.resolve(frame, TYPE_MANAGER_BINDINGS, |frame, name| {
            class_loader.load_class(frame, name)
        })?;
        Ok(TypeManager {
            bindings,
            counterpart: Mutex::new(None),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Attach the runtime-side type manager object.
    pub fn wire(&self, frame: &Frame, counterpart: LocalRef<'_>) -> Result<(), Error> {
        let global = frame.promote(counterpart)?;
        *self.counterpart.lock().unwrap_or_else(|e| e.into_inner()) = Some(global);
        tracing::debug!("type manager wired to companion");
        Ok(())
    }

    pub fn is_wired(&self) -> bool {
        self.counterpart
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Find a class by binary name, caching the result.
    pub fn find_class(&self, frame: &Frame, name: &str) -> Result<Arc<ClassRef>, Error> {
        if let Some(hit) = self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(name) {
            return Ok(hit.clone());
        }
        let counterpart = self
            .counterpart
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(GlobalRef::as_raw)
            .ok_or(Error::NotRunning("type manager is not wired"))?;

        let nested = frame.nested(4)?;
        let jname = nested.new_string(name)?;
        let class = self.bindings.get(Operation::FindClassByName)?.invoke(
            &nested,
            Some(LocalRef::new(counterpart)),
            &[Value::Object(Some(jname.as_raw()))],
        )?;
        let class = nested
            .object(class)
            .ok_or_else(|| Error::ClassNotFound(name.to_string()))?;
        let class = Arc::new(ClassRef::new(name, nested.promote(class)?));

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        Ok(cache
            .entry(name.to_string())
            .or_insert(class)
            .clone())
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Resource for TypeManager {
    fn name(&self) -> &str {
        "type manager"
    }

    fn destroy(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
        let counterpart = self
            .counterpart
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(counterpart);
    }
}
