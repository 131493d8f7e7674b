//! Native resources released when a context shuts down.

use crate::error::Error;
use std::fmt;
use std::sync::Arc;

/// Something holding runtime-side state that must be released at shutdown.
///
/// `destroy` is called exactly once, by [`ResourceRegistry::drain_reverse`]. Implementations
/// must tolerate the runtime being gone by then: durable references dropped at that point are
/// abandoned rather than released.
pub trait Resource: Send + Sync {
    fn name(&self) -> &str;

    fn destroy(&self);
}

/// The ordered list of registered resources.
#[derive(Default)]
pub struct ResourceRegistry {
    entries: Vec<Arc<dyn Resource>>,
    drained: bool,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        ResourceRegistry::default()
    }

    /// Append a resource. Fails once the registry has been drained.
    pub fn register(&mut self, resource: Arc<dyn Resource>) -> Result<(), Error> {
        if self.drained {
            return Err(Error::NotRunning("resource registry already drained"));
        }
        tracing::debug!("registering resource `{}`", resource.name());
        self.entries.push(resource);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.name().to_string()).collect()
    }

    /// Destroy every resource, most recently registered first, and close the registry.
    ///
    /// Returns how many resources were destroyed.
    pub fn drain_reverse(&mut self) -> usize {
        self.drained = true;
        let mut count = 0;
        while let Some(resource) = self.entries.pop() {
            tracing::debug!("destroying resource `{}`", resource.name());
            resource.destroy();
            count += 1;
        }
        count
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("entries", &self.names())
            .field("drained", &self.drained)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorded {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Resource for Recorded {
        fn name(&self) -> &str {
            &self.name
        }

        fn destroy(&self) {
            self.log.lock().unwrap().push(self.name.clone());
        }
    }

    #[test]
    fn drains_in_reverse_registration_order() {
        let log = Arc::new(Mutex::new(vec![]));
        let mut registry = ResourceRegistry::new();
        for name in &["A", "B", "C"] {
            registry
                .register(Arc::new(Recorded {
                    name: name.to_string(),
                    log: log.clone(),
                }))
                .unwrap();
        }
        assert_eq!(registry.drain_reverse(), 3);
        assert_eq!(*log.lock().unwrap(), vec!["C", "B", "A"]);
        assert!(registry.is_empty());

        // a second drain destroys nothing
        assert_eq!(registry.drain_reverse(), 0);
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[test]
    fn registration_after_drain_fails() {
        let mut registry = ResourceRegistry::new();
        registry.drain_reverse();
        let res = registry.register(Arc::new(Recorded {
            name: "late".to_string(),
            log: Arc::new(Mutex::new(vec![])),
        }));
        assert!(res.unwrap_err().is_not_running());
    }
}
