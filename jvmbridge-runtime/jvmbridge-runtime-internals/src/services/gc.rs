use crate::context::bindings::{load_system_class, BindingTable, Operation, GC_BINDINGS};
use crate::error::Error;
use crate::frame::Frame;
use crate::reference::{GlobalRef, LocalRef};
use crate::resource::Resource;
use std::sync::Mutex;

/// Heap figures reported by the runtime, in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryStats {
    pub total: i64,
    pub free: i64,
    pub max: i64,
}

impl MemoryStats {
    pub fn used(&self) -> i64 {
        self.total - self.free
    }
}

/// The host's handle on runtime garbage collection.
pub struct GcBridge {
    bindings: BindingTable,
    runtime_object: Mutex<Option<GlobalRef>>,
}

impl GcBridge {
    pub fn init(frame: &Frame) -> Result<GcBridge, Error> {
        let mut bindings = BindingTable::new();
        bindings.resolve(frame, GC_BINDINGS, load_system_class)?;
        let runtime_object = bindings
            .get(Operation::GetRuntime)?
            .invoke(frame, None, &[])?;
        let runtime_object = frame
            .object(runtime_object)
            .ok_or_else(|| boot_failure!("java.lang.Runtime.getRuntime returned null"))?;
        let runtime_object = frame.promote(runtime_object)?;
        tracing::debug!("gc bridge ready");
        Ok(GcBridge {
            bindings,
            runtime_object: Mutex::new(Some(runtime_object)),
        })
    }

    /// Ask the runtime to collect garbage.
    pub fn trigger_collection(&self, frame: &Frame) -> Result<(), Error> {
        tracing::trace!("requesting runtime garbage collection");
        self.bindings
            .get(Operation::SystemGc)?
            .invoke(frame, None, &[])?;
        Ok(())
    }

    pub fn memory_stats(&self, frame: &Frame) -> Result<MemoryStats, Error> {
        let runtime_object = self
            .runtime_object
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(GlobalRef::as_raw)
            .ok_or(Error::NotRunning("gc bridge destroyed"))?;
        let this = Some(LocalRef::new(runtime_object));
        let query = |op| -> Result<i64, Error> {
            self.bindings
                .get(op)?
                .invoke(frame, this, &[])?
                .as_long()
                .ok_or_else(|| bridge_format_err!("{:?} did not return a long", op))
        };
        Ok(MemoryStats {
            total: query(Operation::TotalMemory)?,
            free: query(Operation::FreeMemory)?,
            max: query(Operation::MaxMemory)?,
        })
    }
}

impl Resource for GcBridge {
    fn name(&self) -> &str {
        "gc bridge"
    }

    fn destroy(&self) {
        let runtime_object = self
            .runtime_object
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        drop(runtime_object);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntimeBuilder;
    use crate::runtime::Runtime;
    use std::sync::Arc;

    #[test]
    fn reports_memory_and_collects() {
        let mock = MockRuntimeBuilder::new().build();
        let rt: Arc<dyn Runtime> = mock.clone();
        let env = rt.attach_current_thread(true).unwrap();
        let frame = Frame::new(rt, env, 16).unwrap();
        let gc = GcBridge::init(&frame).unwrap();

        let stats = gc.memory_stats(&frame).unwrap();
        assert_eq!(stats.total, 64 << 20);
        assert_eq!(stats.used(), 16 << 20);
        assert!(stats.max >= stats.total);

        gc.trigger_collection(&frame).unwrap();
        assert_eq!(mock.invocations("java/lang/System", "gc"), 1);

        gc.destroy();
        assert!(gc.memory_stats(&frame).unwrap_err().is_not_running());
    }
}
