mod test_helpers;

use crate::test_helpers::{mock_config, start_mock, test_ex};
use jvmbridge_runtime::c_api::{
    Java_org_jvmbridge_BridgeSignal_acknowledgeHost, Java_org_jvmbridge_BridgeSignal_interruptHost,
};
use jvmbridge_runtime::mock::{MockLauncher, MockRuntime, MockRuntimeBuilder};
use jvmbridge_runtime::{
    interrupt, BootFlags, Context, Error, Frame, HostSignal, InterruptState, ReturnKind, Target,
    Value,
};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const SLEEPER: &str = "com/example/Sleeper";

/// A runtime whose `Sleeper.sleep()` always fails the way an interrupted sleep does.
fn sleeper_runtime() -> Arc<MockRuntime> {
    MockRuntimeBuilder::new()
        .with_class(SLEEPER, Some("java/lang/Object"))
        .with_method(SLEEPER, "sleep", "()V", true, |rt, call| {
            rt.throw_new(
                call.env,
                "java/lang/InterruptedException",
                Some("sleep interrupted"),
            );
            Value::Void
        })
        .build()
}

fn sleep(ctx: &Context, frame: &Frame) -> Result<Value, Error> {
    let class = ctx.load_class(frame, "com.example.Sleeper")?;
    let local = class.global().local(frame).expect("class is live");
    let mid = frame.static_method_id(local, "sleep", "()V")?;
    frame.call(Target::Static(local.as_raw()), mid, ReturnKind::Void, &[])
}

#[test]
fn interrupt_race_reports_interrupted_once() {
    test_ex(|| {
        interrupt::arbiter().clear();
        let mock = sleeper_runtime();
        let ctx = start_mock(&mock).unwrap();

        ctx.interrupt().unwrap();
        assert_eq!(interrupt::arbiter().state(), InterruptState::Pending);
        assert!(mock.is_interrupted());

        {
            let frame = ctx.frame().unwrap();
            assert!(matches!(sleep(&ctx, &frame), Err(Error::Interrupted)));
            assert_eq!(interrupt::arbiter().state(), InterruptState::Acknowledged);
            match sleep(&ctx, &frame) {
                Err(Error::RuntimeSideException(exc)) => {
                    assert_eq!(exc.class_name, "java.lang.InterruptedException");
                    assert_eq!(exc.message.as_deref(), Some("sleep interrupted"));
                }
                other => panic!("unexpected result: {:?}", other),
            }
        }

        // the next frame entry clears the runtime's flag and settles the race
        let frame = ctx.frame().unwrap();
        assert_eq!(interrupt::arbiter().state(), InterruptState::None);
        assert!(!mock.is_interrupted());
        assert_eq!(
            mock.invocations("org/jvmbridge/BridgeContext", "clearInterrupt"),
            1
        );
        drop(frame);
        ctx.shutdown(true).unwrap();
    })
}

#[test]
fn interrupted_exception_without_pending_interrupt_is_an_exception() {
    test_ex(|| {
        interrupt::arbiter().clear();
        let mock = sleeper_runtime();
        let ctx = start_mock(&mock).unwrap();
        let frame = ctx.frame().unwrap();
        assert!(matches!(
            sleep(&ctx, &frame),
            Err(Error::RuntimeSideException(_))
        ));
        assert_eq!(interrupt::arbiter().state(), InterruptState::None);
        drop(frame);
        ctx.shutdown(true).unwrap();
    })
}

#[test]
fn acknowledge_clears_runtime_flag() {
    test_ex(|| {
        interrupt::arbiter().clear();
        let mock = MockRuntimeBuilder::new().build();
        let ctx = start_mock(&mock).unwrap();

        ctx.interrupt().unwrap();
        ctx.acknowledge_interrupt().unwrap();
        assert_eq!(interrupt::arbiter().state(), InterruptState::None);
        assert!(!mock.is_interrupted());

        // nothing pending: acknowledging again does not reach the runtime
        ctx.acknowledge_interrupt().unwrap();
        assert_eq!(
            mock.invocations("org/jvmbridge/BridgeContext", "clearInterrupt"),
            1
        );
        ctx.shutdown(true).unwrap();
    })
}

#[test]
fn acknowledge_without_runtime_defers_clear() {
    test_ex(|| {
        interrupt::arbiter().clear();
        let mock = MockRuntimeBuilder::new().build();
        let ctx = start_mock(&mock).unwrap();
        ctx.interrupt().unwrap();
        ctx.shutdown(false).unwrap();

        ctx.acknowledge_interrupt().unwrap();
        assert_eq!(interrupt::arbiter().state(), InterruptState::Acknowledged);
        interrupt::arbiter().clear();
    })
}

struct CountingSignal(AtomicUsize);

impl HostSignal for CountingSignal {
    fn signal(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn runtime_interrupt_reaches_host() {
    test_ex(|| {
        interrupt::arbiter().clear();
        let signal = Arc::new(CountingSignal(AtomicUsize::new(0)));
        let previous = interrupt::arbiter().set_host_signal(Some(signal.clone() as Arc<dyn HostSignal>));

        Java_org_jvmbridge_BridgeSignal_interruptHost(ptr::null_mut(), ptr::null_mut());
        assert_eq!(signal.0.load(Ordering::SeqCst), 1);
        assert_eq!(interrupt::arbiter().state(), InterruptState::Pending);

        Java_org_jvmbridge_BridgeSignal_acknowledgeHost(ptr::null_mut(), ptr::null_mut());
        assert_eq!(interrupt::arbiter().state(), InterruptState::None);

        interrupt::arbiter().set_host_signal(previous);
    })
}

#[test]
fn interrupt_flag_reaches_companion() {
    test_ex(|| {
        let mock = MockRuntimeBuilder::new()
            .with_method(
                "org/jvmbridge/BridgeContext",
                "createContext",
                "(JLjava/lang/ClassLoader;Ljava/lang/String;Z)Lorg/jvmbridge/BridgeContext;",
                true,
                |rt, call| {
                    rt.note(format!("interrupt handler: {:?}", call.args[3].as_bool()));
                    Value::Object(Some(rt.new_plain("org/jvmbridge/BridgeContext")))
                },
            )
            .build();
        let ctx = Context::new();
        ctx.start_with(
            &mock_config().with_flags(BootFlags::INTERRUPT | BootFlags::CONVERT_STRINGS),
            Box::new(MockLauncher::new(mock.clone())),
        )
        .unwrap();
        assert!(mock
            .events()
            .contains(&"interrupt handler: Some(true)".to_string()));
        ctx.shutdown(true).unwrap();
    })
}
