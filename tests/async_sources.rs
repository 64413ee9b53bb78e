//! Asynchronous sources: callback registrations, futures (including
//! cross-thread wakes), and the service registry.

mod common;

use common::*;
use fiberio::{Effect, ExitError, Runtime, Tag};
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

type Io<A> = Effect<A, String>;

// ============================================================================
// from_async
// ============================================================================

#[test]
fn from_async_resolves_synchronously() {
    init_test_logging();
    let runtime = Runtime::default();
    let effect = Io::from_async(|_, callback| callback.resolve(5));
    assert_eq!(runtime.unsafe_run(effect), 5);
}

#[test]
fn from_async_rejects_with_a_typed_failure() {
    init_test_logging();
    let runtime = Runtime::default();
    let effect = Io::<i32>::from_async(|_, callback| callback.reject("nope".to_string()));
    assert_eq!(
        runtime.safe_run(effect),
        Err(ExitError::Failed("nope".to_string()))
    );
}

#[test]
fn from_async_resumption_is_at_most_once() {
    init_test_logging();
    let runtime = Runtime::default();
    let effect = Io::from_async(|_, callback| {
        callback.resolve(1);
        callback.resolve(2);
        callback.reject("late".to_string());
    });
    assert_eq!(runtime.unsafe_run(effect), 1);
}

#[test]
fn from_async_callback_can_fire_from_another_fiber() {
    init_test_logging();
    let runtime = Runtime::lab();
    let parked = Rc::new(RefCell::new(None));

    let stash = Rc::clone(&parked);
    let waiter = Io::from_async(move |_, callback| {
        *stash.borrow_mut() = Some(callback);
    });

    let resolver = Effect::<(), String>::sleep(Duration::from_millis(20)).flat_map(move |()| {
        if let Some(callback) = parked.borrow_mut().take() {
            callback.resolve(11);
        }
        Effect::succeed(())
    });

    let program = resolver
        .fork()
        .flat_map(move |_| waiter.clone());
    assert_eq!(runtime.unsafe_run(program), 11);
}

#[test]
fn panicking_registration_becomes_a_defect() {
    init_test_logging();
    let runtime = Runtime::default();
    let effect = Io::<i32>::from_async(|_, _| panic!("register blew up"));
    let cause = runtime.safe_run_cause(effect).expect_err("defect");
    assert_eq!(cause.defects()[0].message(), "register blew up");
}

// ============================================================================
// from_future
// ============================================================================

#[test]
fn from_future_adapts_a_ready_future() {
    init_test_logging();
    let runtime = Runtime::default();
    let effect = Io::from_future(|| async { Ok::<i32, String>(7) });
    assert_eq!(runtime.unsafe_run(effect), 7);
}

#[test]
fn from_future_propagates_typed_errors() {
    init_test_logging();
    let runtime = Runtime::default();
    let effect = Io::<i32>::from_future(|| async { Err::<i32, String>("future failed".into()) });
    assert_eq!(
        runtime.safe_run(effect),
        Err(ExitError::Failed("future failed".to_string()))
    );
}

#[test]
fn from_future_survives_a_self_wake() {
    init_test_logging();
    let runtime = Runtime::default();
    let effect = Io::from_future(|| async {
        futures_lite::future::yield_now().await;
        Ok::<i32, String>(3)
    });
    assert_eq!(runtime.unsafe_run(effect), 3);
}

/// A future completed by a background thread, exercising the scheduler's
/// cross-thread wake path.
struct ThreadCompleted {
    shared: Arc<Mutex<(Option<i32>, Option<Waker>)>>,
}

fn thread_completed(delay: Duration, value: i32) -> ThreadCompleted {
    let shared = Arc::new(Mutex::new((None, None::<Waker>)));
    let worker = Arc::clone(&shared);
    std::thread::spawn(move || {
        std::thread::sleep(delay);
        let mut slot = worker.lock().expect("future state poisoned");
        slot.0 = Some(value);
        if let Some(waker) = slot.1.take() {
            waker.wake();
        }
    });
    ThreadCompleted { shared }
}

impl Future for ThreadCompleted {
    type Output = Result<i32, String>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.shared.lock().expect("future state poisoned");
        match slot.0 {
            Some(value) => Poll::Ready(Ok(value)),
            None => {
                slot.1 = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

#[test]
fn from_future_is_woken_across_threads() {
    init_test_logging();
    let runtime = Runtime::default();
    let effect = Io::from_future(|| thread_completed(Duration::from_millis(20), 42));
    assert_eq!(runtime.unsafe_run(effect), 42);
}

// ============================================================================
// Services
// ============================================================================

#[derive(Debug)]
struct Greeter {
    greeting: &'static str,
}

#[test]
fn service_accessor_reads_the_bound_service() {
    init_test_logging();
    let tag = Tag::<Greeter>::new("greeter");
    let runtime = Runtime::default().provide_service(&tag, Greeter { greeting: "hello" });

    let effect =
        Effect::<Rc<Greeter>, String>::service(&tag).map(|greeter| greeter.greeting.to_string());
    assert_eq!(runtime.unsafe_run(effect), "hello");
}

#[test]
fn missing_service_is_a_defect() {
    init_test_logging();
    let tag = Tag::<Greeter>::new("greeter");
    let runtime = Runtime::default();

    let effect = Effect::<Rc<Greeter>, String>::service(&tag).map(|_| ());
    let cause = runtime.safe_run_cause(effect).expect_err("missing service");
    assert!(cause.is_die());
    assert!(cause.defects()[0].message().contains("greeter"));
}

#[test]
fn sync_effects_observe_the_environment() {
    init_test_logging();
    let tag = Tag::<u32>::new("answer");
    let runtime = Runtime::default().provide_service(&tag, 42_u32);

    let probe_tag = tag.clone();
    let effect = Io::sync(move |env| env.get(&probe_tag).map(|answer| *answer).unwrap_or(0));
    assert_eq!(runtime.unsafe_run(effect), 42);
}
