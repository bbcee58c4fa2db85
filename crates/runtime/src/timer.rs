//! Timer set - one-shot and repeating deadlines
//!
//! Timers live on the interpreter thread inside the host context, next to the
//! registry, so script code (and timer callbacks themselves) can start and
//! stop them. Each entry is linked into two ordered maps: one keyed by id for
//! `start`/`stop`/`destroy`, one keyed by `(deadline, id)` so `poll` only ever
//! looks at the front.
//!
//! ## Expiry
//!
//! `poll` never runs a callback itself. An expired timer is turned into a
//! [`Task::Timer`] and submitted through the bridge, so timer callbacks run
//! during the drain exactly like work handed over from a worker thread.
//!
//! A repeating timer is re-armed at `now + repeat` and back in the deadline
//! map before its task is submitted. Missed periods are not made up: a poll
//! that arrives late fires once and schedules the next period from the late
//! time. A one-shot timer is disarmed when it fires.
//!
//! ## Cancellation
//!
//! Every `start` issues a fresh [`TimerTicket`] and queued fires carry it.
//! `stop`, `destroy` and a restart revoke the ticket, so a fire that was
//! already queued when the timer was stopped is skipped at drain time.

use crate::bridge::{BridgeHandle, Task, TimerCallback};
use crate::clock::{Clock, MonotonicClock};
use crate::error::{Result, RuntimeError};
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use tessel_core::{MapNode, OrderedMap, container_of};
use tracing::{debug, trace, warn};

// Timer statistics (for diagnostics)
pub static TOTAL_TIMERS_FIRED: AtomicU64 = AtomicU64::new(0);
pub static TOTAL_TIMERS_REVOKED: AtomicU64 = AtomicU64::new(0);

/// Identifier of a timer within its set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Proof that a queued fire belongs to the timer's current schedule
#[derive(Debug, Clone)]
pub struct TimerTicket(Weak<()>);

impl TimerTicket {
    /// False once the timer was stopped, restarted or destroyed
    pub fn is_current(&self) -> bool {
        self.0.strong_count() > 0
    }
}

struct TimerEntry<C> {
    by_id: MapNode,
    by_deadline: MapNode,
    id: TimerId,
    deadline: u64,
    repeat_ms: u64,
    armed: bool,
    /// Held while the current schedule is live; dropping it revokes tickets
    schedule: Option<Arc<()>>,
    callback: Option<TimerCallback<C>>,
}

impl<C> TimerEntry<C> {
    fn new(id: TimerId) -> Self {
        Self {
            by_id: MapNode::new(),
            by_deadline: MapNode::new(),
            id,
            deadline: 0,
            repeat_ms: 0,
            armed: false,
            schedule: None,
            callback: None,
        }
    }

    fn ticket(&self) -> Option<TimerTicket> {
        self.schedule.as_ref().map(|s| TimerTicket(Arc::downgrade(s)))
    }

    /// Drop the schedule and callback. Returns whether one was live.
    fn revoke(&mut self) -> bool {
        self.callback = None;
        self.schedule.take().is_some()
    }
}

type NodeCmp = fn(NonNull<MapNode>, NonNull<MapNode>) -> Ordering;

fn compare_ids<C>(a: NonNull<MapNode>, b: NonNull<MapNode>) -> Ordering {
    // SAFETY: the id map only links `by_id` nodes of timer entries
    unsafe {
        let a = container_of!(a, TimerEntry<C>, by_id).as_ref();
        let b = container_of!(b, TimerEntry<C>, by_id).as_ref();
        a.id.cmp(&b.id)
    }
}

fn compare_deadlines<C>(a: NonNull<MapNode>, b: NonNull<MapNode>) -> Ordering {
    // SAFETY: the deadline map only links `by_deadline` nodes of timer entries
    unsafe {
        let a = container_of!(a, TimerEntry<C>, by_deadline).as_ref();
        let b = container_of!(b, TimerEntry<C>, by_deadline).as_ref();
        (a.deadline, a.id).cmp(&(b.deadline, b.id))
    }
}

/// Deadlines owned by the interpreter thread
pub struct TimerSet<C> {
    ids: OrderedMap<NodeCmp>,
    deadlines: OrderedMap<NodeCmp>,
    clock: Arc<dyn Clock>,
    next_id: u64,
    _entries: PhantomData<Box<TimerEntry<C>>>,
}

impl<C> Default for TimerSet<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> TimerSet<C> {
    /// Timer set on the monotonic clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            ids: OrderedMap::new(compare_ids::<C> as NodeCmp),
            deadlines: OrderedMap::new(compare_deadlines::<C> as NodeCmp),
            clock,
            next_id: 1,
            _entries: PhantomData,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Timers created and not yet destroyed
    pub fn len(&self) -> usize {
        self.ids.size()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Timers currently armed
    pub fn armed(&self) -> usize {
        self.deadlines.size()
    }

    /// Allocate a disarmed timer.
    pub fn create(&mut self) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let raw = Box::into_raw(Box::new(TimerEntry::<C>::new(id)));
        // SAFETY: raw is a fresh allocation that stays put until destroy()
        let existing = unsafe {
            self.ids
                .insert(NonNull::new_unchecked(&raw mut (*raw).by_id))
        };
        debug_assert!(existing.is_none(), "timer ids are never reused");
        debug!(timer = %id, "timer created");
        id
    }

    /// Arm `id` to fire after `timeout_ms`, then every `repeat_ms` if non-zero.
    ///
    /// Starting an armed timer restarts it with the new schedule and callback;
    /// fires queued under the old schedule are dropped.
    pub fn start(
        &mut self,
        id: TimerId,
        timeout_ms: u64,
        repeat_ms: u64,
        callback: impl Fn(&mut C) + Send + Sync + 'static,
    ) -> Result<()> {
        let entry = self.lookup(id).ok_or(RuntimeError::UnknownTimer(id))?;
        let now = self.clock.now_ms();

        // SAFETY: entry is linked into self.ids
        unsafe {
            self.disarm(entry);
            let e = entry.as_ptr();
            (*e).revoke();
            (*e).deadline = now.saturating_add(timeout_ms);
            (*e).repeat_ms = repeat_ms;
            (*e).schedule = Some(Arc::new(()));
            (*e).callback = Some(Arc::new(callback));
            self.arm(entry);
            debug!(timer = %id, deadline = (*e).deadline, repeat_ms, "timer started");
        }
        Ok(())
    }

    /// Disarm `id` and drop any fire already queued for it.
    ///
    /// Stopping a stopped timer is a no-op.
    pub fn stop(&mut self, id: TimerId) -> Result<()> {
        let entry = self.lookup(id).ok_or(RuntimeError::UnknownTimer(id))?;
        // SAFETY: entry is linked into self.ids
        unsafe {
            self.disarm(entry);
            if (*entry.as_ptr()).revoke() {
                debug!(timer = %id, "timer stopped");
            }
        }
        Ok(())
    }

    /// Stop and free `id`.
    pub fn destroy(&mut self, id: TimerId) -> Result<()> {
        let entry = self.lookup(id).ok_or(RuntimeError::UnknownTimer(id))?;
        // SAFETY: entry is linked into self.ids and was boxed by create()
        unsafe {
            self.disarm(entry);
            self.ids
                .erase(NonNull::new_unchecked(&raw mut (*entry.as_ptr()).by_id));
            drop(Box::from_raw(entry.as_ptr()));
        }
        debug!(timer = %id, "timer destroyed");
        Ok(())
    }

    /// Whether `id` exists and is armed
    pub fn is_active(&self, id: TimerId) -> bool {
        // SAFETY: linked entries are live
        self.lookup(id)
            .is_some_and(|e| unsafe { (*e.as_ptr()).armed })
    }

    /// Earliest armed deadline, in clock milliseconds
    pub fn next_deadline(&self) -> Option<u64> {
        self.deadlines
            .begin()
            // SAFETY: linked nodes are embedded in live entries
            .map(|n| unsafe { container_of!(n, TimerEntry<C>, by_deadline).as_ref().deadline })
    }

    /// Milliseconds until the earliest deadline (0 if already due)
    pub fn time_until_next(&self) -> Option<u64> {
        let now = self.clock.now_ms();
        self.next_deadline().map(|d| d.saturating_sub(now))
    }

    /// Submit a task to `bridge` for every timer whose deadline has passed.
    ///
    /// Each timer fires at most once per poll. Returns how many fired.
    pub fn poll(&mut self, bridge: &BridgeHandle<C>) -> usize {
        let now = self.clock.now_ms();
        let mut fired = 0;

        while let Some(node) = self.deadlines.begin() {
            // SAFETY: node is linked; the entry stays alive for the whole
            // iteration because nothing here frees it
            unsafe {
                let entry = container_of!(node, TimerEntry<C>, by_deadline);
                let e = entry.as_ptr();
                if (*e).deadline > now {
                    break;
                }
                self.deadlines.erase(node);
                (*e).armed = false;

                let id = (*e).id;
                let callback = if (*e).repeat_ms > 0 {
                    (*e).deadline = now.saturating_add((*e).repeat_ms);
                    self.arm(entry);
                    (*e).callback.clone()
                } else {
                    (*e).callback.take()
                };
                let (Some(callback), Some(ticket)) = (callback, (*e).ticket()) else {
                    continue;
                };

                trace!(timer = %id, now, "timer expired");
                let task = Task::Timer {
                    id,
                    ticket,
                    callback,
                };
                if let Err(err) = bridge.submit(task) {
                    warn!(timer = %id, %err, "timer could not be dispatched, stopping it");
                    self.disarm(entry);
                    (*e).revoke();
                    continue;
                }
                TOTAL_TIMERS_FIRED.fetch_add(1, AtomicOrdering::Relaxed);
                fired += 1;
            }
        }

        fired
    }

    fn lookup(&self, id: TimerId) -> Option<NonNull<TimerEntry<C>>> {
        let mut needle = TimerEntry::<C>::new(id);
        let p: *mut TimerEntry<C> = &raw mut needle;
        // SAFETY: the needle outlives the search and is never linked
        unsafe {
            let key = NonNull::new_unchecked(&raw mut (*p).by_id);
            self.ids
                .find(key)
                .map(|n| unsafe { container_of!(n, TimerEntry<C>, by_id) })
        }
    }

    /// # Safety
    /// `entry` must be linked into `self.ids` and not armed.
    unsafe fn arm(&mut self, entry: NonNull<TimerEntry<C>>) {
        unsafe {
            let e = entry.as_ptr();
            // (deadline, id) is unique, so this always links
            let _ = self
                .deadlines
                .insert(NonNull::new_unchecked(&raw mut (*e).by_deadline));
            (*e).armed = true;
        }
    }

    /// Returns whether the entry was armed.
    ///
    /// # Safety
    /// `entry` must be linked into `self.ids`.
    unsafe fn disarm(&mut self, entry: NonNull<TimerEntry<C>>) -> bool {
        unsafe {
            let e = entry.as_ptr();
            if !(*e).armed {
                return false;
            }
            self.deadlines
                .erase(NonNull::new_unchecked(&raw mut (*e).by_deadline));
            (*e).armed = false;
            true
        }
    }
}

impl<C> Drop for TimerSet<C> {
    fn drop(&mut self) {
        // entries are owned through the id map; the deadline map only unlinks
        self.deadlines.clear(|_| {});
        self.ids.clear(|node| {
            // SAFETY: every id-map node belongs to an entry boxed by create()
            unsafe { drop(Box::from_raw(container_of!(node, TimerEntry<C>, by_id).as_ptr())) };
        });
    }
}
