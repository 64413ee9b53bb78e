//! Coverage for the derived operator surface: channel swaps, taps, zips,
//! container lifts, and the non-propagating fiber observers.

mod common;

use common::*;
use fiberio::{Effect, Either, ExitError, Runtime};
use std::cell::Cell;
use std::rc::Rc;

type Io<A> = Effect<A, String>;

#[test]
fn flip_swaps_the_channels() {
    init_test_logging();
    let runtime = Runtime::default();

    let failure_becomes_value = Io::<i32>::fail("e".to_string()).flip();
    assert_eq!(runtime.unsafe_run(failure_becomes_value), "e");

    let value_becomes_failure = Io::succeed(7).flip();
    assert_eq!(runtime.safe_run(value_becomes_failure), Err(ExitError::Failed(7)));
}

#[test]
fn flip_with_transforms_the_flipped_effect() {
    init_test_logging();
    let runtime = Runtime::default();
    let effect = Io::<i32>::fail("err".to_string())
        .flip_with(|flipped| flipped.map(|error| format!("{error}!")));
    assert_eq!(
        runtime.safe_run(effect),
        Err(ExitError::Failed("err!".to_string()))
    );
}

#[test]
fn absolve_lifts_an_inner_either() {
    init_test_logging();
    let runtime = Runtime::default();

    let right: Io<Either<String, i32>> = Io::succeed(Either::Right(3));
    assert_eq!(runtime.unsafe_run(right.absolve()), 3);

    let left: Io<Either<String, i32>> = Io::succeed(Either::Left("inner".to_string()));
    assert_eq!(
        runtime.safe_run(left.absolve()),
        Err(ExitError::Failed("inner".to_string()))
    );
}

#[test]
fn from_either_routes_both_sides() {
    init_test_logging();
    let runtime = Runtime::default();

    assert_eq!(runtime.unsafe_run(Io::from_either(Either::Right(4))), 4);
    assert_eq!(
        runtime.safe_run(Io::<i32>::from_either(Either::Left("bad".to_string()))),
        Err(ExitError::Failed("bad".to_string()))
    );
}

#[test]
fn augment_error_widens_through_from() {
    init_test_logging();
    let runtime = Runtime::default();
    let narrow: Effect<i32, &'static str> = Effect::fail("narrow");
    let widened: Effect<i32, String> = narrow.augment_error();
    assert_eq!(
        runtime.safe_run(widened),
        Err(ExitError::Failed("narrow".to_string()))
    );
}

#[test]
fn map_both_touches_both_channels() {
    init_test_logging();
    let runtime = Runtime::default();

    let ok = Io::succeed(10).map_both(|error| format!("{error}?"), |value| value + 1);
    assert_eq!(runtime.unsafe_run(ok), 11);

    let err = Io::<i32>::fail("e".to_string()).map_both(|error| format!("{error}?"), |value| value + 1);
    assert_eq!(runtime.safe_run(err), Err(ExitError::Failed("e?".to_string())));
}

#[test]
fn fold_collapses_to_a_pure_value() {
    init_test_logging();
    let runtime = Runtime::default();

    let folded: Effect<usize, String> =
        Io::<i32>::fail("boom".to_string()).fold(|error| error.len(), |_| 0);
    assert_eq!(runtime.unsafe_run(folded), 4);
}

#[test]
fn fold_m_recovers_with_an_effect() {
    init_test_logging();
    let runtime = Runtime::default();
    let effect = Io::<i32>::fail("e".to_string())
        .fold_m(|_| Io::succeed(1), |value| Io::succeed(value * 2));
    assert_eq!(runtime.unsafe_run(effect), 1);
}

#[test]
fn flat_map_error_replaces_the_error_effectfully() {
    init_test_logging();
    let runtime = Runtime::default();
    let effect = Io::<i32>::fail("e".to_string())
        .flat_map_error(|error| Effect::succeed(format!("{error}!")));
    assert_eq!(
        runtime.safe_run(effect),
        Err(ExitError::Failed("e!".to_string()))
    );
}

#[test]
fn tap_preserves_the_value() {
    init_test_logging();
    let runtime = Runtime::default();
    let seen = Rc::new(Cell::new(0));
    let probe = Rc::clone(&seen);

    let effect = Io::succeed(5).tap(move |value| {
        probe.set(value);
        Io::succeed(())
    });
    assert_eq!(runtime.unsafe_run(effect), 5);
    assert_eq!(seen.get(), 5);
}

#[test]
fn tap_error_preserves_the_failure() {
    init_test_logging();
    let runtime = Runtime::default();
    let seen = Rc::new(Cell::new(false));
    let probe = Rc::clone(&seen);

    let effect = Io::<i32>::fail("observed".to_string()).tap_error(move |_| {
        probe.set(true);
        Io::succeed(())
    });
    assert_eq!(
        runtime.safe_run(effect),
        Err(ExitError::Failed("observed".to_string()))
    );
    assert!(seen.get());
}

#[test]
fn zip_with_and_projections() {
    init_test_logging();
    let runtime = Runtime::default();

    let sum = Io::succeed(2).zip_with(Io::succeed(3), |a, b| a + b);
    assert_eq!(runtime.unsafe_run(sum), 5);

    let left = Io::succeed(1).zip_left(Io::succeed("discarded"));
    assert_eq!(runtime.unsafe_run(left), 1);

    let right = Io::succeed(1).zip_right(Io::succeed("kept"));
    assert_eq!(runtime.unsafe_run(right), "kept");
}

#[test]
fn flatten_unit_and_as_value() {
    init_test_logging();
    let runtime = Runtime::default();

    let nested: Io<Io<i32>> = Io::succeed(Io::succeed(8));
    assert_eq!(runtime.unsafe_run(nested.flatten()), 8);

    runtime.unsafe_run(Io::succeed(3).unit());
    assert_eq!(runtime.unsafe_run(Io::succeed(3).as_value("done")), "done");
}

#[test]
fn await_fiber_never_propagates() {
    init_test_logging();
    let runtime = Runtime::default();
    let program = Io::<i32>::fail("child failed".to_string())
        .fork()
        .flat_map(|handle| Effect::await_fiber(&handle));

    // The parent itself succeeds; the child's failure arrives as a value.
    let exit = runtime.unsafe_run(program);
    assert!(exit.is_failure());
    assert!(!exit.is_interrupted());
}
