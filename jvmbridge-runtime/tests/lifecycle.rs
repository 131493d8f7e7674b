mod test_helpers;

use crate::test_helpers::{mock_config, start_mock, test_ex, test_nonex};
use jvmbridge_runtime::mock::{MockLauncher, MockRuntimeBuilder};
use jvmbridge_runtime::{BootConfig, BootFlags, Context, Error, RawRef, State, Value};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn start_and_shutdown() -> Result<(), anyhow::Error> {
    test_nonex(|| {
        let mock = MockRuntimeBuilder::new().build();
        let ctx = start_mock(&mock)?;
        assert!(ctx.is_running());
        assert_eq!(ctx.state(), State::Running);
        assert!(mock
            .events()
            .contains(&"load_library /mock/lib/server/libjvm.so".to_string()));
        assert!(mock.events().contains(&"create_runtime (1 options)".to_string()));

        ctx.shutdown(true)?;
        assert!(!ctx.is_running());
        assert!(mock.is_destroyed());
        assert_eq!(mock.events().last().map(String::as_str), Some("unload_library"));
        Ok(())
    })
}

#[test]
fn calls_after_shutdown_are_not_running() {
    test_nonex(|| {
        let mock = MockRuntimeBuilder::new().build();
        let ctx = start_mock(&mock).unwrap();
        ctx.shutdown(false).unwrap();

        assert!(ctx.frame().unwrap_err().is_not_running());
        assert!(ctx.attach().unwrap_err().is_not_running());
        assert!(ctx.byte_buffer_class().unwrap_err().is_not_running());
        assert!(ctx.interrupt().unwrap_err().is_not_running());
        assert!(ctx.shutdown(true).unwrap_err().is_not_running());
    })
}

#[test]
fn invalid_library_path_is_load_failure() {
    test_nonex(|| {
        let ctx = Context::new();
        match ctx.start(&BootConfig::new("/nonexistent/jvmbridge/libjvm.so")) {
            Err(Error::LoadFailure { path, .. }) => {
                assert_eq!(path, "/nonexistent/jvmbridge/libjvm.so")
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(ctx.state(), State::NotStarted);
        assert!(ctx.runtime().is_none());
        assert!(ctx.shutdown(true).unwrap_err().is_not_running());
    })
}

#[test]
fn create_failure_unloads_library() {
    test_nonex(|| {
        let mock = MockRuntimeBuilder::new().build();
        let ctx = Context::new();
        let res = ctx.start_with(
            &mock_config(),
            Box::new(MockLauncher::new(mock.clone()).failing_create()),
        );
        assert!(matches!(res, Err(Error::BootFailure(_))));
        assert!(ctx.runtime().is_none());
        assert_eq!(mock.events().last().map(String::as_str), Some("unload_library"));
    })
}

#[test]
fn unrecognized_options_need_ignore_flag() {
    test_nonex(|| {
        let config = mock_config().with_option("verbose");

        let mock = MockRuntimeBuilder::new().build();
        let ctx = Context::new();
        let res = ctx.start_with(&config, Box::new(MockLauncher::new(mock.clone())));
        match res {
            Err(Error::BootFailure(msg)) => assert_eq!(msg, "Unrecognized option: verbose"),
            other => panic!("unexpected result: {:?}", other),
        }

        let mock = MockRuntimeBuilder::new().build();
        let ctx = Context::new();
        ctx.start_with(
            &config.with_flags(BootFlags::IGNORE_UNRECOGNIZED | BootFlags::CONVERT_STRINGS),
            Box::new(MockLauncher::new(mock.clone())),
        )
        .unwrap();
        assert!(ctx.is_running());
        ctx.shutdown(true).unwrap();
    })
}

#[test]
fn missing_hash_code_aborts_boot_early() {
    test_nonex(|| {
        let mock = MockRuntimeBuilder::new()
            .without_method("java/lang/Object", "hashCode")
            .build();
        match start_mock(&mock) {
            Err(Error::BootFailure(msg)) => {
                assert_eq!(msg, "Unable to resolve method java.lang.Object.hashCode()I")
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert!(!mock.class_requested("org/jvmbridge/manager/TypeManager"));
        assert!(!mock.class_requested("org/jvmbridge/BridgeContext"));
        assert_eq!(mock.invocations("java/lang/ClassLoader", "getSystemClassLoader"), 0);
    })
}

#[test]
fn missing_companion_class_fails_boot_and_still_shuts_down() {
    test_nonex(|| {
        let mock = MockRuntimeBuilder::new()
            .without_class("org/jvmbridge/BridgeContext")
            .build();
        let ctx = Context::new();
        let res = ctx.start_with(&mock_config(), Box::new(MockLauncher::new(mock.clone())));
        match res {
            Err(Error::BootFailure(msg)) => {
                assert_eq!(msg, "Unable to find class org.jvmbridge.BridgeContext")
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!ctx.is_running());
        assert!(matches!(
            ctx.start_with(&mock_config(), Box::new(MockLauncher::new(mock.clone()))),
            Err(Error::AlreadyStarted)
        ));

        ctx.shutdown(true).unwrap();
        assert!(mock.is_destroyed());
        assert_eq!(
            mock.invocations("org/jvmbridge/BridgeContext", "shutdown"),
            0
        );
    })
}

#[test]
fn graceful_shutdown_runs_companion_shutdown_once() {
    test_nonex(|| {
        let mock = MockRuntimeBuilder::new().build();
        let ctx = start_mock(&mock).unwrap();
        ctx.shutdown(true).unwrap();
        assert!(ctx.shutdown(true).is_err());
        assert_eq!(
            mock.invocations("org/jvmbridge/BridgeContext", "shutdown"),
            1
        );
    })
}

#[test]
fn disgraceful_shutdown_skips_companion_shutdown() {
    test_nonex(|| {
        let mock = MockRuntimeBuilder::new().build();
        let ctx = start_mock(&mock).unwrap();
        ctx.shutdown(false).unwrap();
        assert_eq!(
            mock.invocations("org/jvmbridge/BridgeContext", "shutdown"),
            0
        );
        assert!(mock.is_destroyed());
    })
}

#[test]
fn managed_shutdown_notice_makes_graceful_shutdown_a_no_op() {
    test_ex(|| {
        let mock = MockRuntimeBuilder::new().build();
        let ctx = start_mock(&mock).unwrap();
        let id = Arc::as_ptr(&ctx) as usize as i64;

        jvmbridge_runtime::c_api::Java_org_jvmbridge_BridgeContext_onShutdown(
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            id,
        );
        assert!(!ctx.is_running());
        assert_eq!(ctx.state(), State::ShutDown);
        assert!(ctx.frame().unwrap_err().is_not_running());

        ctx.shutdown(true).unwrap();
        assert_eq!(
            mock.invocations("org/jvmbridge/BridgeContext", "shutdown"),
            0
        );
        assert!(mock.is_destroyed());
        assert!(Context::active().is_none());
    })
}

#[test]
fn shutdown_notice_for_another_context_is_ignored() {
    test_ex(|| {
        let mock = MockRuntimeBuilder::new().build();
        let ctx = start_mock(&mock).unwrap();
        jvmbridge_runtime::c_api::Java_org_jvmbridge_BridgeContext_onShutdown(
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            1,
        );
        assert!(ctx.is_running());
        ctx.shutdown(true).unwrap();
    })
}

#[test]
fn destroy_waits_for_non_daemon_threads() {
    test_nonex(|| {
        let mock = MockRuntimeBuilder::new().build();
        let ctx = start_mock(&mock).unwrap();
        ctx.shutdown(true).unwrap();
        // the main thread created the runtime and stays attached as a non-daemon thread
        assert!(mock
            .events()
            .contains(&"destroy (non-daemon threads: 1)".to_string()));
    })
}

#[test]
fn detach_during_shutdown_lets_destroy_finish() {
    test_nonex(|| {
        let mock = MockRuntimeBuilder::new()
            .destroy_waits_for_threads(Duration::from_secs(5))
            .build();
        let ctx = start_mock(&mock).unwrap();

        let (attached_tx, attached_rx) = mpsc::channel();
        let worker = {
            let ctx = ctx.clone();
            thread::spawn(move || {
                ctx.attach().unwrap();
                attached_tx.send(()).unwrap();
                while ctx.state() != State::ShutDown {
                    thread::sleep(Duration::from_millis(1));
                }
                // destroy is waiting on us now, or about to
                ctx.detach();
            })
        };
        attached_rx.recv().unwrap();

        let started = Instant::now();
        ctx.shutdown(true).unwrap();
        worker.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!mock.events().contains(&"destroy timed out".to_string()));
        assert!(mock.is_destroyed());
        assert!(ctx.runtime().is_none());
    })
}

#[test]
fn companion_call_in_flight_survives_managed_shutdown() {
    test_nonex(|| {
        let (entered_tx, entered_rx) = mpsc::channel::<RawRef>();
        let (resume_tx, resume_rx) = mpsc::channel::<()>();
        let entered_tx = Mutex::new(entered_tx);
        let resume_rx = Mutex::new(resume_rx);
        let mock = MockRuntimeBuilder::new()
            .with_method(
                "org/jvmbridge/BridgeContext",
                "newWrapper",
                "(J)V",
                false,
                move |_rt, call| {
                    let companion = call.this.expect("called on the companion");
                    entered_tx.lock().unwrap().send(companion).unwrap();
                    resume_rx.lock().unwrap().recv().unwrap();
                    Value::Void
                },
            )
            .build();
        let ctx = start_mock(&mock).unwrap();

        let worker = {
            let ctx = ctx.clone();
            thread::spawn(move || {
                let frame = ctx.frame().unwrap();
                ctx.new_wrapper(&frame, 42)
            })
        };
        let companion = entered_rx.recv().unwrap();
        let held = mock.global_refs_to(companion);
        assert!(held >= 1);

        ctx.on_managed_shutdown();
        assert!(!ctx.is_running());
        // the call still running keeps the companion alive
        assert_eq!(mock.global_refs_to(companion), held);

        resume_tx.send(()).unwrap();
        worker.join().unwrap().unwrap();
        assert_eq!(mock.global_refs_to(companion), held - 1);

        ctx.shutdown(true).unwrap();
        assert_eq!(mock.invocations("org/jvmbridge/BridgeContext", "shutdown"), 0);
    })
}
