//! Attaching host threads to the managed runtime.
//!
//! A thread must be attached before it can make any call into the runtime. Threads attached with
//! [`attach`] are non-daemon: the runtime waits for them at shutdown, so they must be detached
//! again. Daemon attachment, which [`ensure_attached`] uses on demand, never holds up shutdown and
//! needs no detach.

use crate::error::Error;
use crate::runtime::{Env, Runtime};
use std::marker::PhantomData;
use std::sync::Arc;

/// Attach the calling thread as a non-daemon thread.
pub fn attach(runtime: &dyn Runtime) -> Result<Env, Error> {
    attach_inner(runtime, false)
}

/// Attach the calling thread as a daemon thread.
pub fn attach_as_daemon(runtime: &dyn Runtime) -> Result<Env, Error> {
    attach_inner(runtime, true)
}

/// Detach the calling thread; a no-op if it is not attached.
pub fn detach(runtime: &dyn Runtime) {
    if runtime.get_env().is_some() {
        tracing::trace!("detaching thread {:?}", std::thread::current().id());
        runtime.detach_current_thread();
    }
}

/// The native interface of the calling thread, attaching it as a daemon if needed.
pub fn ensure_attached(runtime: &dyn Runtime) -> Result<Env, Error> {
    match runtime.get_env() {
        Some(env) => Ok(env),
        None => attach_inner(runtime, true),
    }
}

pub fn is_thread_attached(runtime: &dyn Runtime) -> bool {
    runtime.get_env().is_some()
}

fn attach_inner(runtime: &dyn Runtime, daemon: bool) -> Result<Env, Error> {
    if let Some(env) = runtime.get_env() {
        return Ok(env);
    }
    match runtime.attach_current_thread(daemon) {
        Ok(env) => {
            tracing::trace!(
                "attached thread {:?}{}",
                std::thread::current().id(),
                if daemon { " as daemon" } else { "" }
            );
            Ok(env)
        }
        Err(e) => {
            tracing::error!("failed to attach thread: {}", e);
            Err(e)
        }
    }
}

/// A non-daemon attachment that detaches the thread when dropped.
///
/// If the thread was already attached when the guard was created, dropping the guard leaves it
/// attached.
pub struct AttachGuard {
    runtime: Arc<dyn Runtime>,
    env: Env,
    owned: bool,
    // attachment is per thread
    _not_send: PhantomData<*const ()>,
}

impl AttachGuard {
    pub fn new(runtime: Arc<dyn Runtime>) -> Result<AttachGuard, Error> {
        let owned = !is_thread_attached(&*runtime);
        let env = attach(&*runtime)?;
        Ok(AttachGuard {
            runtime,
            env,
            owned,
            _not_send: PhantomData,
        })
    }

    pub fn env(&self) -> Env {
        self.env
    }
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        if self.owned {
            detach(&*self.runtime);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntimeBuilder;

    #[test]
    fn ensure_attached_attaches_once_as_daemon() {
        let mock = MockRuntimeBuilder::new().build();
        let first = ensure_attached(&*mock).unwrap();
        let second = ensure_attached(&*mock).unwrap();
        assert_eq!(first, second);
        assert_eq!(mock.attachments(), 1);
        assert_eq!(mock.is_daemon(), Some(true));
        detach(&*mock);
    }

    #[test]
    fn attach_then_detach() {
        let mock = MockRuntimeBuilder::new().build();
        assert!(!is_thread_attached(&*mock));
        attach(&*mock).unwrap();
        assert_eq!(mock.is_daemon(), Some(false));
        assert!(is_thread_attached(&*mock));
        detach(&*mock);
        assert!(!is_thread_attached(&*mock));
        // detaching an unattached thread does nothing
        detach(&*mock);
        assert_eq!(mock.events().iter().filter(|e| *e == "detach").count(), 1);
    }

    #[test]
    fn rejected_attach_is_not_retried() {
        let mock = MockRuntimeBuilder::new().refuse_attach().build();
        match ensure_attached(&*mock) {
            Err(Error::AttachFailure(_)) => (),
            other => panic!("unexpected result: {:?}", other),
        }
        let refusals = mock
            .events()
            .iter()
            .filter(|e| *e == "attach refused")
            .count();
        assert_eq!(refusals, 1);
    }

    #[test]
    fn guard_detaches_only_its_own_attachment() {
        let mock = MockRuntimeBuilder::new().build();
        let rt: Arc<dyn Runtime> = mock.clone();
        {
            let _guard = AttachGuard::new(rt.clone()).unwrap();
            assert_eq!(mock.is_daemon(), Some(false));
        }
        assert!(!is_thread_attached(&*mock));

        attach_as_daemon(&*mock).unwrap();
        {
            let _guard = AttachGuard::new(rt.clone()).unwrap();
        }
        assert!(is_thread_attached(&*mock));
        detach(&*mock);
    }
}
