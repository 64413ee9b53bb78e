//! Cancellation semantics: latching, uninterruptible regions, finalizers,
//! and the bypass rules for defects and interrupts.

mod common;

use common::*;
use fiberio::{assert_exit_interrupted, Effect, ExitError, Runtime};
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

type Io<A> = Effect<A, String>;

/// Forks `child`, interrupts it after `after_ms` of virtual time, and
/// returns its exit.
fn interrupt_after(
    runtime: &Runtime,
    child: Io<i32>,
    after_ms: u64,
) -> fiberio::FiberExit<i32, String> {
    let program = child.fork().flat_map(move |handle| {
        Effect::<(), String>::sleep(Duration::from_millis(after_ms))
            .flat_map(move |()| Effect::interrupt_fiber(&handle))
    });
    runtime.unsafe_run(program)
}

#[test]
fn interrupt_during_sleep_skips_the_continuation() {
    init_test_logging();
    let resumed = Rc::new(Cell::new(false));
    let probe = Rc::clone(&resumed);
    let child = Io::succeed(1)
        .delay(Duration::from_millis(100))
        .flat_map(move |v| {
            probe.set(true);
            Io::succeed(v)
        });

    let exit = interrupt_after(&Runtime::lab(), child, 10);
    assert_exit_interrupted!(exit);
    assert!(!resumed.get());
}

#[test]
fn uninterruptible_region_latches_until_it_closes() {
    init_test_logging();
    let region_finished = Rc::new(Cell::new(false));
    let after_region = Rc::new(Cell::new(false));
    let region_probe = Rc::clone(&region_finished);
    let after_probe = Rc::clone(&after_region);

    let child = Effect::<(), String>::sleep(Duration::from_millis(50))
        .flat_map(move |()| {
            region_probe.set(true);
            Io::succeed(1)
        })
        .uninterruptible()
        .flat_map(move |v| {
            after_probe.set(true);
            Io::succeed(v)
        });

    let exit = interrupt_after(&Runtime::lab(), child, 10);
    assert_exit_interrupted!(exit);
    assert!(
        region_finished.get(),
        "the protected region must run to completion"
    );
    assert!(
        !after_region.get(),
        "the latched interrupt must fire as soon as the region closes"
    );
}

#[test]
fn finalizer_runs_uninterruptibly_then_the_latch_fires() {
    init_test_logging();
    let finalized = Rc::new(Cell::new(false));
    let probe = Rc::clone(&finalized);

    // The child completes instantly; its finalizer sleeps. An interrupt
    // arriving mid-finalizer must wait for it.
    let child = Io::succeed(7).ensuring(
        Effect::<(), String>::sleep(Duration::from_millis(30)).flat_map(move |()| {
            probe.set(true);
            Effect::succeed(())
        }),
    );

    let exit = interrupt_after(&Runtime::lab(), child, 10);
    assert_exit_interrupted!(exit);
    assert!(finalized.get(), "the finalizer must complete despite the interrupt");
}

#[test]
fn check_interrupt_fires_inside_an_opened_window() {
    init_test_logging();
    let after_check = Rc::new(Cell::new(false));
    let probe = Rc::clone(&after_check);

    let child = Effect::<(), String>::sleep(Duration::from_millis(20))
        .flat_map(|()| Effect::<(), String>::check_interrupt().interruptible())
        .flat_map(move |()| {
            probe.set(true);
            Io::succeed(1)
        })
        .uninterruptible();

    let exit = interrupt_after(&Runtime::lab(), child, 10);
    assert_exit_interrupted!(exit);
    assert!(!after_check.get(), "the safe point must consume the latch");
}

#[test]
fn interrupting_a_completed_fiber_preserves_its_exit() {
    init_test_logging();
    let runtime = Runtime::default();
    let program = Io::succeed(5).fork().flat_map(|handle| {
        let handle_for_interrupt = handle.clone();
        Io::join_fiber(&handle).flat_map(move |_| Effect::interrupt_fiber(&handle_for_interrupt))
    });
    let exit = runtime.unsafe_run(program);
    assert_eq!(exit, fiberio::FiberExit::Success(5));
}

#[test]
fn join_propagates_an_interrupt_past_or_else() {
    init_test_logging();
    let runtime = Runtime::lab();

    let long = Io::succeed(0).delay(Duration::from_millis(10_000));
    let program = long
        .fork()
        .flat_map(|handle| {
            let handle_for_join = handle.clone();
            Effect::<(), String>::sleep(Duration::from_millis(10))
                .flat_map(move |()| Effect::interrupt_fiber(&handle))
                .flat_map(move |_| Io::join_fiber(&handle_for_join))
        })
        .or_else(Io::succeed(99));

    let result = runtime.safe_run(program);
    match result {
        Err(ExitError::Interrupted(_)) => {}
        other => panic!("or_else must not recover an interrupt, got {other:?}"),
    }
}

#[test]
fn or_else_does_not_recover_defects() {
    init_test_logging();
    let runtime = Runtime::default();
    let effect = Io::<i32>::sync(|_| panic!("boom")).or_else(Io::succeed(1));
    let result = runtime.safe_run(effect);
    match result {
        Err(ExitError::Died(defect)) => assert_eq!(defect.message(), "boom"),
        other => panic!("or_else must not recover a defect, got {other:?}"),
    }
}

#[test]
fn defects_carry_their_message_in_the_cause() {
    init_test_logging();
    let runtime = Runtime::default();
    let cause = runtime
        .safe_run_cause(Io::<i32>::sync(|_| panic!("kaboom")))
        .expect_err("the defect must surface");
    assert!(cause.is_die());
    assert_eq!(cause.defects()[0].message(), "kaboom");
}

#[test]
fn ensuring_combines_both_failures_sequentially() {
    init_test_logging();
    let runtime = Runtime::default();
    let effect = Io::<i32>::fail("primary".to_string())
        .ensuring(Io::<i32>::fail("cleanup".to_string()));
    let cause = runtime.safe_run_cause(effect).expect_err("both fail");
    assert_eq!(
        cause.failures(),
        vec![&"primary".to_string(), &"cleanup".to_string()]
    );
    // Sequential composition, not parallel.
    assert!(matches!(cause, fiberio::Cause::Then(_, _)));
}

#[test]
fn failed_sibling_interrupts_the_rest_of_all() {
    init_test_logging();
    let runtime = Runtime::lab();
    let effects = vec![
        Io::succeed(1).delay(Duration::from_millis(50)),
        Io::<i32>::fail("first".to_string()),
    ];
    let cause = runtime
        .safe_run_cause(Io::all(effects))
        .expect_err("one child fails");
    assert_eq!(cause.failures(), vec![&"first".to_string()]);
    assert!(
        cause.is_interrupted(),
        "the surviving sibling must be interrupted and its cause recorded"
    );
}
