use jvmbridge_runtime::mock::{MockLauncher, MockRuntime};
use jvmbridge_runtime::{BootConfig, Context, Error};
use lazy_static::lazy_static;
use std::sync::{Arc, RwLock};

lazy_static! {
    static ref EXCLUSIVE_TEST: RwLock<()> = RwLock::default();
}

/// Run a test non-exclusively with other `test_nonex` tests.
///
/// This function _must_ wrap any test that boots a context.
#[allow(dead_code)]
pub fn test_nonex<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let lock = EXCLUSIVE_TEST.read().unwrap_or_else(|e| e.into_inner());
    let r = f();
    drop(lock);
    r
}

/// Run a test exclusively, so that no other `test_nonex` or `test_ex` tests will run concurrently.
///
/// This function _must_ wrap any test that raises or acknowledges an interrupt, or that inspects
/// the active context.
#[allow(dead_code)]
pub fn test_ex<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let lock = EXCLUSIVE_TEST.write().unwrap_or_else(|e| e.into_inner());
    let r = f();
    drop(lock);
    r
}

#[allow(dead_code)]
pub fn mock_config() -> BootConfig {
    BootConfig::new("/mock/lib/server/libjvm.so").with_option("-Xmx64m")
}

/// Boot a fresh context against `mock`.
#[allow(dead_code)]
pub fn start_mock(mock: &Arc<MockRuntime>) -> Result<Arc<Context>, Error> {
    let ctx = Context::new();
    ctx.start_with(&mock_config(), Box::new(MockLauncher::new(mock.clone())))?;
    Ok(ctx)
}
