//! The single-threaded cooperative executor.
//!
//! At most one fiber executes at any instant. The executor owns three wake
//! sources:
//!
//! - the **ready queue**: resumptions produced on the scheduler thread by
//!   fiber forks, async callbacks, timers, and fiber-completion observers;
//! - the **timer heap**: deadline-ordered sleep entries. The wall-clock
//!   runtime parks until the next deadline; the virtual-clock runtime jumps
//!   time forward to it;
//! - the **wake hub**: the only `Send` structure, a mutex-and-condvar queue
//!   that `std::task::Waker`s push fiber ids into. This is what lets
//!   [`Effect::from_future`](crate::effect::Effect::from_future) futures be
//!   woken from other threads while fiber state itself stays thread-local.
//!
//! Resumptions carry the suspension epoch they were created for. A fiber
//! bumps its epoch at every suspension, so stale wakeups (a timer firing
//! after its fiber was interrupted, a second callback racing the first) are
//! discarded instead of resuming the wrong continuation.

use crate::cause::Cause;
use crate::effect::raw::{erase, Erased, LocalFuture, Raw, RawCause, RawExit};
use crate::fiber::FiberContext;
use crate::runtime::clock::Clock;
use crate::runtime::interpreter::Frame;
use crate::tracing_compat::{debug, trace};
use crate::types::FiberId;
use crate::Env;
use parking_lot::{Condvar, Mutex};
use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;
use std::task::Wake;
use std::time::Duration;

/// The scheduler-thread resumption queue.
pub(crate) type ReadyQueue = Rc<RefCell<VecDeque<Scheduled>>>;

/// What to feed a fiber when it resumes.
pub(crate) enum Resumption {
    /// Begin evaluating the fiber's root effect.
    Start,
    /// Continue the continuation stack with a success value.
    Value(Erased),
    /// Continue the continuation stack with a failure cause.
    FailCause(RawCause),
    /// Deliver another fiber's exit, propagating failure (join semantics).
    DeliverExit(RawExit),
    /// Deliver another fiber's exit as a success value (await semantics).
    ExitAsValue(RawExit),
    /// Re-poll the fiber's stored future.
    PollFuture,
}

/// A queued fiber resumption.
pub(crate) struct Scheduled {
    pub(crate) fiber: u64,
    /// Suspension epoch this resumption belongs to; `None` for resumptions
    /// that carry their own staleness check (`Start`, `PollFuture`).
    pub(crate) epoch: Option<u64>,
    pub(crate) input: Resumption,
}

/// The erased resolve/reject pair handed to async registrations.
///
/// Clones share a fired flag, so resumption is at-most-once across every
/// clone and both callbacks.
#[derive(Clone)]
pub(crate) struct RawAsyncCallback {
    fiber: u64,
    epoch: u64,
    ready: ReadyQueue,
    fired: Rc<Cell<bool>>,
}

impl RawAsyncCallback {
    pub(crate) fn fiber_id(&self) -> u64 {
        self.fiber
    }

    fn fire(&self, input: Resumption) {
        if self.fired.replace(true) {
            return;
        }
        self.ready.borrow_mut().push_back(Scheduled {
            fiber: self.fiber,
            epoch: Some(self.epoch),
            input,
        });
    }

    /// Resumes the fiber with a success value. Later calls are ignored.
    pub(crate) fn resolve_erased(&self, value: Erased) {
        self.fire(Resumption::Value(value));
    }

    /// Resumes the fiber with a typed failure. Later calls are ignored.
    pub(crate) fn reject_erased(&self, error: Erased) {
        self.fire(Resumption::FailCause(Cause::fail(error)));
    }
}

/// The cross-thread wake queue backing future wakers.
pub(crate) struct WakeHub {
    queue: Mutex<Vec<u64>>,
    cv: Condvar,
}

impl WakeHub {
    fn new() -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn push(&self, fiber: u64) {
        self.queue.lock().push(fiber);
        self.cv.notify_one();
    }

    fn drain(&self) -> Vec<u64> {
        std::mem::take(&mut *self.queue.lock())
    }

    /// Parks the scheduler thread until a wake arrives or the timeout
    /// elapses. Returns immediately if a wake is already queued.
    fn wait(&self, timeout: Option<Duration>) {
        let mut queue = self.queue.lock();
        if !queue.is_empty() {
            return;
        }
        match timeout {
            Some(duration) => {
                let _ = self.cv.wait_for(&mut queue, duration);
            }
            None => self.cv.wait(&mut queue),
        }
    }
}

/// Waker that reschedules a fiber through the wake hub.
pub(crate) struct FiberWaker {
    pub(crate) fiber: u64,
    pub(crate) hub: Arc<WakeHub>,
}

impl Wake for FiberWaker {
    fn wake(self: Arc<Self>) {
        self.hub.push(self.fiber);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.hub.push(self.fiber);
    }
}

/// A pending sleep.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct TimerEntry {
    deadline_ms: u64,
    /// Insertion order tie-break so simultaneous deadlines fire FIFO.
    seq: u64,
    fiber: u64,
    epoch: u64,
}

/// Interpreter-side state for one fiber.
pub(crate) struct FiberState {
    pub(super) ctx: Rc<FiberContext>,
    /// The continuation stack the trampoline reduces against.
    pub(super) stack: Vec<Frame>,
    /// The root effect, consumed by the `Start` resumption.
    pub(super) start: Option<Raw>,
    /// A stored future while suspended on `FromFuture`.
    pub(super) future: Option<LocalFuture>,
    /// Bumped at every suspension; stale resumptions are discarded.
    pub(super) epoch: u64,
}

impl FiberState {
    pub(super) fn bump_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }
}

/// The single-threaded executor: fiber table, wake sources, and clock.
pub(crate) struct Executor {
    pub(super) env: Env,
    pub(super) clock: Clock,
    pub(super) fibers: HashMap<u64, FiberState>,
    pub(super) ready: ReadyQueue,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    timer_seq: u64,
    pub(super) hub: Arc<WakeHub>,
}

impl Executor {
    pub(crate) fn new(env: Env, clock: Clock) -> Self {
        Self {
            env,
            clock,
            fibers: HashMap::new(),
            ready: Rc::new(RefCell::new(VecDeque::new())),
            timers: BinaryHeap::new(),
            timer_seq: 0,
            hub: Arc::new(WakeHub::new()),
        }
    }

    /// Runs the root effect to completion, driving every fiber it forks.
    ///
    /// Returns as soon as the root fiber is done; daemon fibers (e.g. race
    /// losers) may still be live and are dropped with the executor.
    ///
    /// # Panics
    ///
    /// Panics on deadlock: every fiber suspended with no timer to fire and
    /// no future that could be woken.
    pub(crate) fn run(&mut self, root: Raw) -> RawExit {
        let root_ctx = self.spawn(root);
        loop {
            if let Some(exit) = root_ctx.exit() {
                return exit;
            }
            self.drain_woken();
            let next = self.ready.borrow_mut().pop_front();
            if let Some(scheduled) = next {
                self.run_fiber(scheduled);
                continue;
            }
            if self.fire_due_timers() {
                continue;
            }
            self.idle_wait();
        }
    }

    /// Creates a fiber for the effect and schedules its start.
    ///
    /// The fiber begins running strictly after the current reduction: spawn
    /// only enqueues, it never evaluates.
    pub(super) fn spawn(&mut self, raw: Raw) -> Rc<FiberContext> {
        let id = FiberId::next();
        let ctx = Rc::new(FiberContext::new(id));
        debug!(fiber = %id, "fiber spawned");
        self.fibers.insert(
            id.seq(),
            FiberState {
                ctx: Rc::clone(&ctx),
                stack: Vec::new(),
                start: Some(raw),
                future: None,
                epoch: 0,
            },
        );
        self.ready.borrow_mut().push_back(Scheduled {
            fiber: id.seq(),
            epoch: None,
            input: Resumption::Start,
        });
        ctx
    }

    /// Arms a timer resuming the fiber at `now + duration`.
    pub(super) fn schedule_timer(&mut self, fiber: u64, epoch: u64, duration: Duration) {
        let deadline_ms = self
            .clock
            .now_millis()
            .saturating_add(duration.as_millis() as u64);
        self.timer_seq += 1;
        trace!(fiber, deadline_ms, "timer armed");
        self.timers.push(Reverse(TimerEntry {
            deadline_ms,
            seq: self.timer_seq,
            fiber,
            epoch,
        }));
    }

    /// Builds the resolve/reject pair for an async registration.
    pub(super) fn async_callback(&self, fiber: u64, epoch: u64) -> RawAsyncCallback {
        RawAsyncCallback {
            fiber,
            epoch,
            ready: Rc::clone(&self.ready),
            fired: Rc::new(Cell::new(false)),
        }
    }

    /// Moves cross-thread future wakes onto the ready queue.
    fn drain_woken(&mut self) {
        for fiber in self.hub.drain() {
            self.ready.borrow_mut().push_back(Scheduled {
                fiber,
                epoch: None,
                input: Resumption::PollFuture,
            });
        }
    }

    /// Fires every timer whose deadline has passed. Returns true if any
    /// fired.
    fn fire_due_timers(&mut self) -> bool {
        let now = self.clock.now_millis();
        let mut fired = false;
        while let Some(Reverse(entry)) = self.timers.peek() {
            if entry.deadline_ms > now {
                break;
            }
            let Reverse(entry) = self.timers.pop().expect("peeked timer entry");
            trace!(fiber = entry.fiber, "timer fired");
            self.ready.borrow_mut().push_back(Scheduled {
                fiber: entry.fiber,
                epoch: Some(entry.epoch),
                input: Resumption::Value(erase(())),
            });
            fired = true;
        }
        fired
    }

    /// Nothing is runnable: advance or wait for time, or park for a future
    /// wake.
    fn idle_wait(&mut self) {
        match self.timers.peek().map(|Reverse(entry)| entry.deadline_ms) {
            Some(deadline_ms) => {
                if self.clock.is_virtual() {
                    self.clock.advance_to(deadline_ms);
                } else {
                    let now = self.clock.now_millis();
                    let wait = Duration::from_millis(deadline_ms.saturating_sub(now).max(1));
                    self.hub.wait(Some(wait));
                }
            }
            None => {
                assert!(
                    self.has_pending_futures(),
                    "deadlock: every fiber is suspended with no timer to fire \
                     and no future that could be woken"
                );
                self.hub.wait(None);
            }
        }
    }

    /// True if some live fiber is suspended on a future. Also reaps state
    /// for fibers that completed while suspended (e.g. interrupted).
    fn has_pending_futures(&mut self) -> bool {
        self.fibers.retain(|_, state| !state.ctx.is_done());
        self.fibers.values().any(|state| state.future.is_some())
    }
}
