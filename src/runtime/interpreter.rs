//! The trampoline that reduces effect descriptions.
//!
//! Each fiber carries a continuation stack of [`Frame`]s. Reduction is a
//! loop, not recursion: every step either rewrites the current value/cause
//! against the top frame, pushes frames while descending into a child node,
//! or suspends. Deep `flat_map` chains therefore cost heap, never call
//! stack, and suspension is trivial — the fiber's whole state is the frame
//! stack plus the pending resumption.
//!
//! # Failure routing
//!
//! - `Then` frames only consume successes; causes skip them.
//! - `Fold` frames recover *typed* failures: the first `Fail` leaf is handed
//!   to the error continuation. Defect-only and interrupt-only causes bypass
//!   the handler unchanged.
//! - `Finalizer` frames run on both paths, uninterruptibly; their causes
//!   combine with the saved outcome via `sequential`, which is where
//!   `Then(primary, finalizer)` exits come from.
//! - `RestoreInterruptible` frames restore the interruption flag on every
//!   exit path and re-assert a latched interrupt once the region closes.
//!
//! Panics raised by user closures are caught at every application site and
//! become defects (`Cause::Die`), never interpreter crashes.

use crate::cause::{Cause, Defect};
use crate::effect::raw::{erase, Cont, Erased, Raw, RawCause, RawExit};
use crate::fiber::FiberContext;
use crate::runtime::scheduler::{
    Executor, FiberState, FiberWaker, ReadyQueue, Resumption, Scheduled,
};
use crate::tracing_compat::debug;
use crate::types::FiberExit;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// One entry of a fiber's continuation stack.
pub(crate) enum Frame {
    /// Success continuation from `FlatMap`; causes skip it.
    Then(Cont),
    /// Two-way continuation from `Fold`.
    Fold { on_err: Cont, on_ok: Cont },
    /// A pending finalizer from `Ensuring`.
    Finalizer(Rc<Raw>),
    /// The saved primary outcome while its finalizer runs.
    FinalizerDone(Result<Erased, RawCause>),
    /// Restores the interruptibility flag on the way out of a scoped region.
    RestoreInterruptible(bool),
}

/// The trampoline's reduction state.
enum Step {
    /// Descend into a node.
    Eval(Raw),
    /// Unwind the stack with a success value.
    Value(Erased),
    /// Unwind the stack with a failure cause.
    FailWith(RawCause),
    /// The fiber parked; its state goes back into the table.
    Suspend,
    /// The fiber completed; its state is dropped.
    Finished,
}

/// Runs a closure, converting a panic into a defect.
fn catch<T>(f: impl FnOnce() -> T) -> Result<T, Defect> {
    catch_unwind(AssertUnwindSafe(f)).map_err(Defect::from_panic)
}

/// Applies a continuation, trapping panics.
fn apply_cont(k: &Cont, value: Erased) -> Step {
    match catch(|| k(value)) {
        Ok(raw) => Step::Eval(raw),
        Err(defect) => Step::FailWith(Cause::die(defect)),
    }
}

/// Turns a fiber exit into the matching reduction step (join semantics).
fn deliver_exit(exit: RawExit) -> Step {
    match exit {
        FiberExit::Success(value) => Step::Value(value),
        FiberExit::Failure(cause) => Step::FailWith(cause),
    }
}

fn finish(state: &FiberState, exit: RawExit) -> Step {
    debug!(fiber = %state.ctx.id(), success = exit.is_success(), "fiber completed");
    state.ctx.done(exit);
    Step::Finished
}

/// Feeds a success value up the continuation stack.
fn unwind_value(state: &mut FiberState, value: Erased) -> Step {
    let mut value = value;
    while let Some(frame) = state.stack.pop() {
        match frame {
            Frame::Then(k) => return apply_cont(&k, value),
            Frame::Fold { on_ok, .. } => return apply_cont(&on_ok, value),
            Frame::Finalizer(finalizer) => {
                state.stack.push(Frame::FinalizerDone(Ok(value)));
                let prev = state.ctx.is_interruptible();
                state.stack.push(Frame::RestoreInterruptible(prev));
                state.ctx.set_interruptible(false);
                return Step::Eval((*finalizer).clone());
            }
            Frame::RestoreInterruptible(prev) => {
                state.ctx.set_interruptible(prev);
                if prev && state.ctx.is_interrupted() {
                    // Latched interrupt re-fires now that the region closed.
                    return Step::FailWith(Cause::interrupt(state.ctx.id()));
                }
            }
            Frame::FinalizerDone(saved) => match saved {
                // Finalizer succeeded: its value is discarded, the saved
                // outcome stands.
                Ok(prior) => value = prior,
                Err(cause) => return Step::FailWith(cause),
            },
        }
    }
    finish(state, FiberExit::Success(value))
}

/// Feeds a failure cause up the continuation stack.
fn unwind_cause(state: &mut FiberState, cause: RawCause) -> Step {
    let mut cause = cause;
    while let Some(frame) = state.stack.pop() {
        match frame {
            Frame::Then(_) => {}
            Frame::Fold { on_err, .. } => {
                if let Some(error) = cause.first_failure().cloned() {
                    return apply_cont(&on_err, error);
                }
                // No typed failure: Die/Interrupt bypass the handler.
            }
            Frame::Finalizer(finalizer) => {
                state.stack.push(Frame::FinalizerDone(Err(cause)));
                let prev = state.ctx.is_interruptible();
                state.stack.push(Frame::RestoreInterruptible(prev));
                state.ctx.set_interruptible(false);
                return Step::Eval((*finalizer).clone());
            }
            Frame::RestoreInterruptible(prev) => {
                state.ctx.set_interruptible(prev);
                if prev && state.ctx.is_interrupted() && !cause.is_interrupted() {
                    cause = Cause::sequential(cause, Cause::interrupt(state.ctx.id()));
                }
            }
            Frame::FinalizerDone(saved) => {
                // The finalizer itself failed with `cause`.
                if let Err(prior) = saved {
                    cause = Cause::sequential(prior, cause);
                }
            }
        }
    }
    finish(state, FiberExit::Failure(cause))
}

impl Executor {
    /// Resumes one fiber and reduces it until it suspends or completes.
    pub(super) fn run_fiber(&mut self, scheduled: Scheduled) {
        let Some(mut state) = self.fibers.remove(&scheduled.fiber) else {
            return;
        };
        if state.ctx.is_done() {
            // Completed while suspended (interruption); drop the stale state.
            return;
        }
        if let Some(epoch) = scheduled.epoch {
            if epoch != state.epoch {
                // A wakeup from an earlier suspension; ignore it.
                self.fibers.insert(scheduled.fiber, state);
                return;
            }
        }
        match scheduled.input {
            // A wake that raced the future's completion; the fiber has moved
            // on. Leave its state untouched.
            Resumption::PollFuture if state.future.is_none() => {
                self.fibers.insert(scheduled.fiber, state);
                return;
            }
            Resumption::PollFuture => {}
            _ => state.future = None,
        }
        state.ctx.set_running();

        let mut step = match scheduled.input {
            Resumption::Start => Step::Eval(state.start.take().expect("fiber started twice")),
            Resumption::Value(value) => Step::Value(value),
            Resumption::FailCause(cause) => Step::FailWith(cause),
            Resumption::DeliverExit(exit) => deliver_exit(exit),
            Resumption::ExitAsValue(exit) => Step::Value(erase(exit)),
            Resumption::PollFuture => self.poll_stored_future(&mut state),
        };

        // Interruption check at the resumption boundary. A fiber that parked
        // uninterruptibly stays protected; the latch fires when the scope
        // restores the flag.
        if !matches!(step, Step::Suspend)
            && state.ctx.is_interrupted()
            && state.ctx.is_interruptible()
        {
            step = Step::FailWith(Cause::interrupt(state.ctx.id()));
        }

        loop {
            if state.ctx.is_done() {
                // Completed from outside mid-reduction (self-directed
                // interruption); the recorded exit stands.
                return;
            }
            step = match step {
                Step::Eval(raw) => self.eval(&mut state, raw),
                Step::Value(value) => unwind_value(&mut state, value),
                Step::FailWith(cause) => unwind_cause(&mut state, cause),
                Step::Suspend => {
                    let id = state.ctx.id().seq();
                    self.fibers.insert(id, state);
                    return;
                }
                Step::Finished => return,
            };
        }
    }

    /// Reduces one primitive node.
    fn eval(&mut self, state: &mut FiberState, raw: Raw) -> Step {
        match raw {
            Raw::Succeed(value) => Step::Value(value),
            Raw::Fail(error) => Step::FailWith(Cause::fail(error)),
            Raw::Sync(f) => match catch(|| f(&self.env)) {
                Ok(value) => Step::Value(value),
                Err(defect) => Step::FailWith(Cause::die(defect)),
            },
            Raw::Service(key) => match self.env.get_raw(&key) {
                Some(service) => Step::Value(service),
                None => Step::FailWith(Cause::die(Defect::new(format!(
                    "no service registered for tag '{key}'"
                )))),
            },
            Raw::FlatMap(child, k) => {
                state.stack.push(Frame::Then(k));
                Step::Eval((*child).clone())
            }
            Raw::Fold {
                child,
                on_err,
                on_ok,
            } => {
                state.stack.push(Frame::Fold { on_err, on_ok });
                Step::Eval((*child).clone())
            }
            Raw::Ensuring(child, finalizer) => {
                state.stack.push(Frame::Finalizer(finalizer));
                Step::Eval((*child).clone())
            }
            Raw::SetInterruptible(child, flag) => {
                let prev = state.ctx.is_interruptible();
                state.stack.push(Frame::RestoreInterruptible(prev));
                state.ctx.set_interruptible(flag);
                Step::Eval((*child).clone())
            }
            Raw::CheckInterrupt => {
                if state.ctx.is_interrupted() && state.ctx.is_interruptible() {
                    Step::FailWith(Cause::interrupt(state.ctx.id()))
                } else {
                    Step::Value(erase(()))
                }
            }
            Raw::Sleep(duration) => {
                let fiber = state.ctx.id().seq();
                let epoch = state.bump_epoch();
                self.schedule_timer(fiber, epoch, duration);
                state.ctx.set_suspended();
                Step::Suspend
            }
            Raw::Async(register) => {
                let fiber = state.ctx.id().seq();
                let epoch = state.bump_epoch();
                let callback = self.async_callback(fiber, epoch);
                match catch(|| register(&self.env, callback)) {
                    Ok(()) => {
                        state.ctx.set_suspended();
                        Step::Suspend
                    }
                    Err(defect) => Step::FailWith(Cause::die(defect)),
                }
            }
            Raw::FromFuture(factory) => match catch(|| factory()) {
                Ok(future) => {
                    state.future = Some(future);
                    self.poll_stored_future(state)
                }
                Err(defect) => Step::FailWith(Cause::die(defect)),
            },
            Raw::Fork(child) => {
                let ctx = self.spawn((*child).clone());
                let handle: Erased = ctx;
                Step::Value(handle)
            }
            Raw::Join(target) => self.wait_for_fiber(state, &target, true),
            Raw::AwaitFiber(target) => self.wait_for_fiber(state, &target, false),
            Raw::InterruptFiber(target) => {
                target.interrupt();
                self.wait_for_fiber(state, &target, false)
            }
            Raw::StatusOf(target) => Step::Value(erase(target.status_snapshot())),
            Raw::All(children) => {
                if children.is_empty() {
                    return Step::Value(erase(Vec::<Erased>::new()));
                }
                let contexts: Vec<Rc<FiberContext>> =
                    children.into_iter().map(|child| self.spawn(child)).collect();
                let epoch = state.bump_epoch();
                register_all(
                    state.ctx.id().seq(),
                    epoch,
                    Rc::clone(&self.ready),
                    contexts,
                );
                state.ctx.set_suspended();
                Step::Suspend
            }
            Raw::Race {
                children,
                interrupt_losers,
            } => {
                if children.is_empty() {
                    return Step::FailWith(Cause::die(Defect::new(
                        "race requires at least one effect",
                    )));
                }
                let contexts: Vec<Rc<FiberContext>> =
                    children.into_iter().map(|child| self.spawn(child)).collect();
                let epoch = state.bump_epoch();
                register_race(
                    state.ctx.id().seq(),
                    epoch,
                    Rc::clone(&self.ready),
                    contexts,
                    interrupt_losers,
                );
                state.ctx.set_suspended();
                Step::Suspend
            }
        }
    }

    /// Waits on another fiber: immediately if done, else via an observer.
    ///
    /// With `propagate`, the target's exit continues this fiber's reduction
    /// (join); without, the exit is yielded as a success value (await).
    fn wait_for_fiber(
        &self,
        state: &mut FiberState,
        target: &Rc<FiberContext>,
        propagate: bool,
    ) -> Step {
        if let Some(exit) = target.exit() {
            return if propagate {
                deliver_exit(exit)
            } else {
                Step::Value(erase(exit))
            };
        }
        let fiber = state.ctx.id().seq();
        let epoch = state.bump_epoch();
        let ready = Rc::clone(&self.ready);
        let _ = target.add_observer(Box::new(move |exit| {
            let input = if propagate {
                Resumption::DeliverExit(exit)
            } else {
                Resumption::ExitAsValue(exit)
            };
            ready.borrow_mut().push_back(Scheduled {
                fiber,
                epoch: Some(epoch),
                input,
            });
        }));
        state.ctx.set_suspended();
        Step::Suspend
    }

    /// Polls the fiber's stored future with a real waker.
    fn poll_stored_future(&self, state: &mut FiberState) -> Step {
        let Some(mut future) = state.future.take() else {
            // A wake raced the future's completion; nothing to do.
            return Step::Suspend;
        };
        let waker = Waker::from(Arc::new(FiberWaker {
            fiber: state.ctx.id().seq(),
            hub: Arc::clone(&self.hub),
        }));
        let mut task_cx = Context::from_waker(&waker);
        match catch(|| future.as_mut().poll(&mut task_cx)) {
            Ok(Poll::Ready(Ok(value))) => Step::Value(value),
            Ok(Poll::Ready(Err(error))) => Step::FailWith(Cause::fail(error)),
            Ok(Poll::Pending) => {
                state.future = Some(future);
                state.ctx.set_suspended();
                Step::Suspend
            }
            Err(defect) => Step::FailWith(Cause::die(defect)),
        }
    }
}

// ============================================================================
// Parallel aggregation (All / Race)
// ============================================================================

struct AllState {
    parent: u64,
    parent_epoch: u64,
    ready: ReadyQueue,
    children: Vec<Rc<FiberContext>>,
    exits: Vec<Option<RawExit>>,
    remaining: usize,
    interrupting: bool,
    delivered: bool,
}

/// Wires completion observers for `All`: gather in input order, fail fast by
/// interrupting the surviving siblings, combine non-empty causes with
/// `Both`.
fn register_all(
    parent: u64,
    parent_epoch: u64,
    ready: ReadyQueue,
    children: Vec<Rc<FiberContext>>,
) {
    let count = children.len();
    let state = Rc::new(RefCell::new(AllState {
        parent,
        parent_epoch,
        ready,
        children: children.clone(),
        exits: vec![None; count],
        remaining: count,
        interrupting: false,
        delivered: false,
    }));
    for (index, child) in children.into_iter().enumerate() {
        let state = Rc::clone(&state);
        let _ = child.add_observer(Box::new(move |exit| all_child_done(&state, index, exit)));
    }
}

fn all_child_done(state: &Rc<RefCell<AllState>>, index: usize, exit: RawExit) {
    // Interrupting a sibling re-enters this function synchronously through
    // its observer, so the borrow must be released before interrupt calls.
    let to_interrupt: Vec<Rc<FiberContext>> = {
        let mut s = state.borrow_mut();
        if s.exits[index].is_some() {
            return;
        }
        let failed = exit.is_failure();
        s.exits[index] = Some(exit);
        s.remaining -= 1;
        if failed && !s.interrupting {
            s.interrupting = true;
            s.children
                .iter()
                .filter(|child| !child.is_done())
                .cloned()
                .collect()
        } else {
            Vec::new()
        }
    };
    for child in to_interrupt {
        child.interrupt();
    }

    let mut s = state.borrow_mut();
    if s.remaining == 0 && !s.delivered {
        s.delivered = true;
        let failed = s
            .exits
            .iter()
            .any(|slot| matches!(slot, Some(FiberExit::Failure(_))));
        let input = if failed {
            let mut cause = RawCause::Empty;
            for slot in &s.exits {
                if let Some(FiberExit::Failure(child_cause)) = slot {
                    cause = Cause::both(cause, child_cause.clone());
                }
            }
            Resumption::FailCause(cause)
        } else {
            let values: Vec<Erased> = s
                .exits
                .iter()
                .map(|slot| match slot {
                    Some(FiberExit::Success(value)) => Rc::clone(value),
                    _ => unreachable!("every child completed successfully"),
                })
                .collect();
            Resumption::Value(erase(values))
        };
        s.ready.borrow_mut().push_back(Scheduled {
            fiber: s.parent,
            epoch: Some(s.parent_epoch),
            input,
        });
    }
}

struct RaceState {
    parent: u64,
    parent_epoch: u64,
    ready: ReadyQueue,
    children: Vec<Rc<FiberContext>>,
    winner: Option<RawExit>,
    remaining: usize,
    interrupt_losers: bool,
    delivered: bool,
}

/// Wires completion observers for `Race`: first exit wins; losers are either
/// left running (their exits discarded) or interrupted and drained before
/// the winner's exit is delivered.
fn register_race(
    parent: u64,
    parent_epoch: u64,
    ready: ReadyQueue,
    children: Vec<Rc<FiberContext>>,
    interrupt_losers: bool,
) {
    let count = children.len();
    let state = Rc::new(RefCell::new(RaceState {
        parent,
        parent_epoch,
        ready,
        children: children.clone(),
        winner: None,
        remaining: count,
        interrupt_losers,
        delivered: false,
    }));
    for child in children {
        let state = Rc::clone(&state);
        let _ = child.add_observer(Box::new(move |exit| race_child_done(&state, exit)));
    }
}

fn race_child_done(state: &Rc<RefCell<RaceState>>, exit: RawExit) {
    let to_interrupt: Vec<Rc<FiberContext>> = {
        let mut s = state.borrow_mut();
        s.remaining -= 1;
        let first = s.winner.is_none();
        if first {
            s.winner = Some(exit);
        }
        if first && s.interrupt_losers {
            s.children
                .iter()
                .filter(|child| !child.is_done())
                .cloned()
                .collect()
        } else {
            Vec::new()
        }
    };
    for child in to_interrupt {
        child.interrupt();
    }

    let mut s = state.borrow_mut();
    let settled = if s.interrupt_losers {
        s.remaining == 0
    } else {
        s.winner.is_some()
    };
    if settled && !s.delivered {
        s.delivered = true;
        let winner = s.winner.clone().expect("race recorded a winner");
        s.ready.borrow_mut().push_back(Scheduled {
            fiber: s.parent,
            epoch: Some(s.parent_epoch),
            input: Resumption::DeliverExit(winner),
        });
    }
}
