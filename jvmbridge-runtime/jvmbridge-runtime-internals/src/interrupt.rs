//! Arbitration between host and runtime interrupts.
//!
//! Both sides of the bridge have their own notion of "interrupted": the host has whatever its
//! signal handling does, and the runtime interrupts its main thread so that blocking I/O wakes up.
//! When either side is interrupted, the other must be told, and exactly one interruption must be
//! observed by host code per raised interrupt.
//!
//! The arbiter keeps a single process-wide state:
//!
//! * `None`: nothing outstanding.
//! * `Pending`: an interrupt was raised and the host has not acknowledged it yet.
//! * `Acknowledged`: the host cleared its flag but the runtime has not been told to clear its own.
//!
//! `Acknowledged` is settled back to `None` as soon as the runtime side has been cleared, either
//! directly by [`Context::acknowledge_interrupt`](../context/struct.Context.html#method.acknowledge_interrupt)
//! or on the next frame entry.

use lazy_static::lazy_static;
use nix::sys::signal::{raise, Signal};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
pub enum InterruptState {
    None = 0,
    Pending = 1,
    Acknowledged = 2,
}

/// The host's interrupt hook, raised when the runtime reports an interrupt.
pub trait HostSignal: Send + Sync {
    fn signal(&self);
}

/// A [`HostSignal`] that re-raises `SIGINT` in the host process.
///
/// Suits hosts that already route `SIGINT` to their own interrupt handling.
#[derive(Clone, Copy, Debug, Default)]
pub struct SigIntHostSignal;

impl HostSignal for SigIntHostSignal {
    fn signal(&self) {
        if let Err(e) = raise(Signal::SIGINT) {
            tracing::warn!("failed to raise SIGINT for runtime interrupt: {}", e);
        }
    }
}

pub struct InterruptArbiter {
    state: AtomicU8,
    host_signal: RwLock<Option<Arc<dyn HostSignal>>>,
}

lazy_static! {
    static ref ARBITER: InterruptArbiter = InterruptArbiter::new();
}

/// The process-wide arbiter.
pub fn arbiter() -> &'static InterruptArbiter {
    &ARBITER
}

impl InterruptArbiter {
    fn new() -> Self {
        InterruptArbiter {
            state: AtomicU8::new(InterruptState::None as u8),
            host_signal: RwLock::new(None),
        }
    }

    pub fn state(&self) -> InterruptState {
        InterruptState::from_u8(self.state.load(Ordering::SeqCst)).unwrap_or(InterruptState::None)
    }

    pub fn is_pending(&self) -> bool {
        self.state() == InterruptState::Pending
    }

    /// Install the hook raised on runtime-side interrupts, returning the previous one.
    pub fn set_host_signal(
        &self,
        hook: Option<Arc<dyn HostSignal>>,
    ) -> Option<Arc<dyn HostSignal>> {
        match self.host_signal.write() {
            Ok(mut slot) => std::mem::replace(&mut *slot, hook),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), hook),
        }
    }

    /// Mark an interrupt as pending. Returns `false` if one was already pending.
    pub(crate) fn raise(&self) -> bool {
        let prev = self
            .state
            .swap(InterruptState::Pending as u8, Ordering::SeqCst);
        prev != InterruptState::Pending as u8
    }

    /// The runtime's signal handler observed an interrupt: mark it pending and tell the host.
    pub fn runtime_interrupt(&self) {
        if !self.raise() {
            tracing::trace!("runtime interrupt while one is already pending");
        }
        let hook = match self.host_signal.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match hook {
            Some(hook) => hook.signal(),
            None => tracing::debug!("runtime interrupt with no host signal installed"),
        }
    }

    /// Clear the host-side flag. The runtime side still has to be cleared afterwards.
    ///
    /// Returns whether an interrupt was pending.
    pub(crate) fn acknowledge_host(&self) -> bool {
        self.transition(InterruptState::Pending, InterruptState::Acknowledged)
    }

    /// Claim the pending interrupt on behalf of a runtime-side interrupt exception.
    ///
    /// Succeeds at most once per raised interrupt, so the host observes a single interruption.
    pub(crate) fn claim_pending(&self) -> bool {
        self.transition(InterruptState::Pending, InterruptState::Acknowledged)
    }

    /// The runtime side has been cleared.
    pub(crate) fn settle(&self) -> bool {
        self.transition(InterruptState::Acknowledged, InterruptState::None)
    }

    /// Forget any outstanding interrupt, as the runtime told us it has handled it.
    pub fn clear(&self) {
        self.state
            .store(InterruptState::None as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: InterruptState, to: InterruptState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
