//! Async bridge - cross-thread dispatch onto the interpreter thread
//!
//! Worker threads never touch interpreter state. They hand a [`Task`] to a
//! [`BridgeHandle`], which links it into the bridge's pending queue and
//! signals the [`Notifier`]. The interpreter thread drains the queue during its
//! event-loop tick and runs each task with exclusive `&mut C` access, exactly
//! as if script code had called it synchronously.
//!
//! ## Queue
//!
//! Pending tasks are boxed records linked into an intrusive [`List`]. A drain
//! splices the whole list out under the lock in O(1) and runs the batch with
//! the lock released, so tasks submitted while a drain is running wait for the
//! next tick instead of starving other bridges.
//!
//! ## Lifecycle
//!
//! ```text
//!   create ──► open ──submit──► pending ──drain──► run (exactly once)
//!                │                 │
//!                │            cancel_all ──► discarded (never run)
//!                ▼
//!             destroy ──► closed: submit returns BridgeClosed
//! ```
//!
//! `destroy` takes the same lock as `submit`, so once it returns no thread is
//! mid-submission and nothing queued before it will ever run.
//!
//! ## Ordering
//!
//! Tasks from one thread to one bridge run in submission order. Nothing is
//! promised across threads or across bridges.

use crate::coroutine::{CoroutineHandle, CoroutineRegistry, CoroutineState};
use crate::error::{Result, RuntimeError, format_panic_payload};
use crate::notify::Notifier;
use crate::timer::{TOTAL_TIMERS_REVOKED, TimerId, TimerSet, TimerTicket};
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread::{self, ThreadId};
use tessel_core::{List, ListNode, container_of};
use tracing::{debug, error, trace, warn};

// Task statistics (for diagnostics)
pub static TASKS_SUBMITTED: AtomicU64 = AtomicU64::new(0);
pub static TASKS_RUN: AtomicU64 = AtomicU64::new(0);
pub static TASKS_CANCELLED: AtomicU64 = AtomicU64::new(0);
pub static TASKS_REJECTED: AtomicU64 = AtomicU64::new(0);
pub static TASKS_PANICKED: AtomicU64 = AtomicU64::new(0);
pub static BRIDGES_OPEN: AtomicU64 = AtomicU64::new(0);

static NEXT_BRIDGE_ID: AtomicU64 = AtomicU64::new(1);

/// Interpreter-side state a bridge runs tasks against
///
/// The context owns the registry and the timer set so that tasks and timer
/// callbacks can reach both through the `&mut C` they are given.
pub trait HostContext: Sized {
    /// Borrow the registry and the timer set together.
    fn runtime(&mut self) -> (&mut CoroutineRegistry, &mut TimerSet<Self>);

    fn coroutines(&mut self) -> &mut CoroutineRegistry {
        self.runtime().0
    }

    fn timers(&mut self) -> &mut TimerSet<Self> {
        self.runtime().1
    }
}

/// Repeating timer callback; shared because every fire reuses it
pub type TimerCallback<C> = Arc<dyn Fn(&mut C) + Send + Sync>;

/// Work handed from any thread to the interpreter thread
pub enum Task<C> {
    /// Arbitrary closure run with the interpreter context
    Call(Box<dyn FnOnce(&mut C) + Send>),
    /// Move a parked coroutine back to BUSY
    Resume(CoroutineHandle),
    /// A timer expired; skipped if `ticket` was revoked before it ran
    Timer {
        id: TimerId,
        ticket: TimerTicket,
        callback: TimerCallback<C>,
    },
}

impl<C> Task<C> {
    pub fn call(f: impl FnOnce(&mut C) + Send + 'static) -> Self {
        Task::Call(Box::new(f))
    }

    fn kind(&self) -> &'static str {
        match self {
            Task::Call(_) => "call",
            Task::Resume(_) => "resume",
            Task::Timer { .. } => "timer",
        }
    }
}

impl<C> std::fmt::Debug for Task<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Task::Call(_) => write!(f, "Task::Call"),
            Task::Resume(h) => write!(f, "Task::Resume({})", h),
            Task::Timer { id, .. } => write!(f, "Task::Timer({})", id),
        }
    }
}

// =============================================================================
// Intrusive task queue
// =============================================================================

struct TaskNode<C> {
    node: ListNode,
    task: Task<C>,
}

/// FIFO of boxed tasks; dropping it discards whatever is still queued
struct TaskQueue<C> {
    list: List,
    _tasks: PhantomData<Box<TaskNode<C>>>,
}

// SAFETY: the queue exclusively owns its boxed nodes, and tasks are Send
unsafe impl<C> Send for TaskQueue<C> where Task<C>: Send {}

impl<C> TaskQueue<C> {
    fn new() -> Self {
        Self {
            list: List::new(),
            _tasks: PhantomData,
        }
    }

    fn len(&self) -> usize {
        self.list.size()
    }

    fn push(&mut self, node: Box<TaskNode<C>>) {
        let raw = Box::into_raw(node);
        // SAFETY: raw is a fresh allocation owned by this queue until popped
        unsafe { self.list.push_back(NonNull::new_unchecked(&raw mut (*raw).node)) };
    }

    fn pop(&mut self) -> Option<Task<C>> {
        let node = self.list.pop_front()?;
        // SAFETY: every member was boxed by push()
        let boxed = unsafe { Box::from_raw(container_of!(node, TaskNode<C>, node).as_ptr()) };
        Some(boxed.task)
    }

    /// Move every queued task out, leaving `self` empty.
    fn take(&mut self) -> TaskQueue<C> {
        let mut taken = TaskQueue::new();
        taken.list.migrate(&mut self.list);
        taken
    }
}

impl<C> Drop for TaskQueue<C> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

struct Pending<C> {
    tasks: TaskQueue<C>,
    closed: bool,
}

struct Shared<C> {
    id: u64,
    owner: ThreadId,
    queue: Mutex<Pending<C>>,
    notifier: Notifier,
}

impl<C> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, Pending<C>> {
        // Tasks never run under the lock, so a poisoned queue is still consistent
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// AsyncBridge (interpreter side)
// =============================================================================

/// Interpreter-side end of a bridge
///
/// Not `Send`: draining, cancelling and destroying all belong to the thread
/// that created it.
pub struct AsyncBridge<C> {
    shared: Arc<Shared<C>>,
    _owner: PhantomData<*const ()>,
}

impl<C> AsyncBridge<C> {
    /// Open a bridge owned by the calling thread, waking `notifier` on submit.
    pub fn create(notifier: &Notifier) -> Self {
        let id = NEXT_BRIDGE_ID.fetch_add(1, Ordering::Relaxed);
        BRIDGES_OPEN.fetch_add(1, Ordering::Relaxed);
        debug!(bridge = id, "async bridge created");
        Self {
            shared: Arc::new(Shared {
                id,
                owner: thread::current().id(),
                queue: Mutex::new(Pending {
                    tasks: TaskQueue::new(),
                    closed: false,
                }),
                notifier: notifier.clone(),
            }),
            _owner: PhantomData,
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Submission end for worker threads
    pub fn handle(&self) -> BridgeHandle<C> {
        BridgeHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Tasks waiting for the next drain
    pub fn pending(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    /// Discard every pending task without running it.
    ///
    /// Returns how many were dropped. Blocked [`BridgeHandle::call`]ers get
    /// `Cancelled`.
    pub fn cancel_all(&self) -> usize {
        let discarded = self.shared.lock().tasks.take();
        let count = discarded.len();
        // dropped outside the lock: closures may own arbitrary state
        drop(discarded);
        if count > 0 {
            TASKS_CANCELLED.fetch_add(count as u64, Ordering::Relaxed);
            debug!(bridge = self.shared.id, count, "cancelled pending tasks");
        }
        count
    }

    /// Close the bridge; later submissions fail and pending tasks never run.
    pub fn destroy(self) {
        // Drop does the work
    }

    fn close(&self) {
        let discarded = {
            let mut pending = self.shared.lock();
            if pending.closed {
                return;
            }
            pending.closed = true;
            pending.tasks.take()
        };
        let count = discarded.len();
        drop(discarded);
        TASKS_CANCELLED.fetch_add(count as u64, Ordering::Relaxed);
        BRIDGES_OPEN.fetch_sub(1, Ordering::Relaxed);
        debug!(bridge = self.shared.id, discarded = count, "async bridge destroyed");
    }
}

impl<C: HostContext> AsyncBridge<C> {
    /// Run every task queued at the moment the drain starts.
    ///
    /// Returns how many ran. A panicking task is logged and counted; the rest
    /// of the batch still runs.
    pub fn drain(&self, ctx: &mut C) -> usize {
        let mut batch = self.shared.lock().tasks.take();
        let mut ran = 0;
        while let Some(task) = batch.pop() {
            run_task(self.shared.id, task, ctx);
            ran += 1;
        }
        ran
    }
}

impl<C> Drop for AsyncBridge<C> {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_task<C: HostContext>(bridge: u64, task: Task<C>, ctx: &mut C) {
    let kind = task.kind();
    trace!(bridge, kind, "running task");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match task {
        Task::Call(f) => f(ctx),
        Task::Resume(handle) => resume_coroutine(ctx.coroutines(), handle),
        Task::Timer {
            id,
            ticket,
            callback,
        } => {
            if ticket.is_current() {
                trace!(bridge, timer = %id, "timer fired");
                callback(ctx)
            } else {
                TOTAL_TIMERS_REVOKED.fetch_add(1, Ordering::Relaxed);
                trace!(bridge, timer = %id, "timer stopped before its fire ran");
            }
        }
    }));

    match outcome {
        Ok(()) => {
            TASKS_RUN.fetch_add(1, Ordering::Relaxed);
        }
        Err(payload) => {
            TASKS_PANICKED.fetch_add(1, Ordering::Relaxed);
            error!(
                bridge,
                kind,
                "task panicked: {}",
                format_panic_payload(&payload)
            );
        }
    }
}

fn resume_coroutine(registry: &mut CoroutineRegistry, handle: CoroutineHandle) {
    match registry.find(handle).map(|co| co.state()) {
        None => warn!(coroutine = %handle, "resume for unknown coroutine"),
        Some(state) if state.is_terminal() => {
            debug!(coroutine = %handle, %state, "resume ignored for finished coroutine")
        }
        Some(_) => match registry.set_state(handle, CoroutineState::BUSY) {
            Ok(()) => {}
            Err(err) => warn!(coroutine = %handle, %err, "resume failed"),
        },
    }
}

// =============================================================================
// BridgeHandle (any thread)
// =============================================================================

/// Submission end of a bridge; cheap to clone and safe to share
pub struct BridgeHandle<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for BridgeHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C> std::fmt::Debug for BridgeHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHandle")
            .field("bridge", &self.shared.id)
            .finish()
    }
}

impl<C> BridgeHandle<C> {
    pub fn bridge_id(&self) -> u64 {
        self.shared.id
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Queue `task` for the interpreter thread and wake it.
    ///
    /// Never blocks beyond the enqueue. Fails with `BridgeClosed` once the
    /// bridge is destroyed; the task is then dropped unrun.
    pub fn submit(&self, task: Task<C>) -> Result<()> {
        let kind = task.kind();
        let node = Box::new(TaskNode {
            node: ListNode::new(),
            task,
        });

        let accepted = {
            let mut pending = self.shared.lock();
            if pending.closed {
                false
            } else {
                pending.tasks.push(node);
                true
            }
        };

        if !accepted {
            TASKS_REJECTED.fetch_add(1, Ordering::Relaxed);
            warn!(bridge = self.shared.id, kind, "submit to closed bridge");
            return Err(RuntimeError::BridgeClosed);
        }

        TASKS_SUBMITTED.fetch_add(1, Ordering::Relaxed);
        trace!(bridge = self.shared.id, kind, "task submitted");
        self.shared.notifier.send();
        Ok(())
    }

    /// Queue a closure for the interpreter thread.
    pub fn post(&self, f: impl FnOnce(&mut C) + Send + 'static) -> Result<()> {
        self.submit(Task::call(f))
    }

    /// Queue a resume for a parked coroutine.
    pub fn resume(&self, handle: CoroutineHandle) -> Result<()> {
        self.submit(Task::Resume(handle))
    }

    /// Run `f` on the interpreter thread and wait for its result.
    ///
    /// Blocks the calling worker until the task has run. Returns `Cancelled`
    /// if the task is discarded (or panics) first. Calling it from the
    /// bridge's own thread would deadlock, so that fails with
    /// `WouldBlockOwner`.
    pub fn call<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut C) -> R + Send + 'static,
        R: Send + 'static,
    {
        if thread::current().id() == self.shared.owner {
            return Err(RuntimeError::WouldBlockOwner);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        self.post(move |ctx| {
            // the caller may have given up; nothing to report then
            let _ = tx.send(f(ctx));
        })?;
        rx.recv().map_err(|_| RuntimeError::Cancelled)
    }
}
