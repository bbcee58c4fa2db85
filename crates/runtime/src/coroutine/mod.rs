//! Coroutine registry and scheduling state machine
//!
//! The registry maps an interpreter-level coroutine handle to a runtime-owned
//! scheduling record. Records are boxed and linked into an intrusive
//! [`OrderedMap`] keyed by handle, so lookup is O(log n) and the scheduler's
//! sweep walks coroutines in handle order.
//!
//! ## State Machine
//!
//! ```text
//!   host()            set_state(BUSY)            sweep: Returned
//!  ───────► WAIT ─────────────────────► BUSY ──────────────────────► DEAD
//!            ▲                            │  sweep: Failed          (+ERROR)
//!            └────── sweep: Suspended ────┘ ────────────────────────►
//! ```
//!
//! WAIT is what separates "yielded once" from "parked until someone resumes
//! me". A yield alone leaves the coroutine BUSY, and the next sweep picks it up
//! again. A coroutine that parks itself in WAIT stays out of every sweep until
//! something, typically a resume task drained from an async bridge, moves it
//! back to BUSY.
//!
//! ## Lifecycle
//!
//! A record is destroyed as soon as it is DEAD with no hooks registered:
//! either when `set_state` marks it DEAD, or when the last hook of a dead
//! coroutine is removed. Hooks are never dropped implicitly.
//!
//! ## Thread Affinity
//!
//! The registry is `!Send` and `!Sync`. It belongs to the interpreter thread,
//! and so does every state change; worker threads reach it only through
//! bridge tasks.

pub mod hook;
pub mod state;

pub use hook::{HookFn, HookToken};
pub use state::{CoroutineState, RunState};

use hook::HookSet;
use std::cmp::Ordering;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tessel_core::{MapNode, OrderedMap, container_of};
use tracing::{debug, trace};

use crate::error::{Result, RuntimeError};

// Lifecycle statistics (for diagnostics)
pub static TOTAL_HOSTED: AtomicU64 = AtomicU64::new(0);
pub static TOTAL_DESTROYED: AtomicU64 = AtomicU64::new(0);
pub static TOTAL_RESUMES: AtomicU64 = AtomicU64::new(0);

/// Opaque handle of an interpreter-level coroutine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoroutineHandle(u64);

impl CoroutineHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CoroutineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Scheduling record of one coroutine
pub struct Coroutine {
    node: MapNode,
    handle: CoroutineHandle,
    state: CoroutineState,
    result_count: u32,
    hooks: HookSet,
}

impl Coroutine {
    pub fn handle(&self) -> CoroutineHandle {
        self.handle
    }

    pub fn state(&self) -> CoroutineState {
        self.state
    }

    /// Values produced by the most recent resume
    pub fn result_count(&self) -> u32 {
        self.result_count
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }
}

impl std::fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .field("result_count", &self.result_count)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Outcome reported by the interpreter after resuming a coroutine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resumed {
    /// Yielded; stays BUSY and runs again next sweep
    Yielded(u32),
    /// Parked itself; moves to WAIT
    Suspended(u32),
    /// Body returned; moves to DEAD
    Returned(u32),
    /// Uncaught script error; moves to DEAD|ERROR
    Failed,
}

type HandleCmp = fn(NonNull<MapNode>, NonNull<MapNode>) -> Ordering;

fn compare_handles(a: NonNull<MapNode>, b: NonNull<MapNode>) -> Ordering {
    // SAFETY: the registry only links nodes embedded in Coroutine records
    unsafe {
        let a = container_of!(a, Coroutine, node).as_ref();
        let b = container_of!(b, Coroutine, node).as_ref();
        a.handle.cmp(&b.handle)
    }
}

/// Handle → scheduling record map owned by the interpreter thread
pub struct CoroutineRegistry {
    map: OrderedMap<HandleCmp>,
}

impl Default for CoroutineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CoroutineRegistry {
    pub fn new() -> Self {
        Self {
            map: OrderedMap::new(compare_handles as HandleCmp),
        }
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.map.size()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Register `handle` in WAIT.
    ///
    /// Fails with `AlreadyRegistered` if the handle already has a record.
    pub fn host(&mut self, handle: CoroutineHandle) -> Result<&Coroutine> {
        let raw = Box::into_raw(Box::new(Coroutine {
            node: MapNode::new(),
            handle,
            state: CoroutineState::WAIT,
            result_count: 0,
            hooks: HookSet::default(),
        }));

        // SAFETY: raw is a fresh allocation that stays put until destroy()
        unsafe {
            let node = NonNull::new_unchecked(&raw mut (*raw).node);
            if self.map.insert(node).is_some() {
                drop(Box::from_raw(raw));
                return Err(RuntimeError::AlreadyRegistered(handle));
            }
            TOTAL_HOSTED.fetch_add(1, AtomicOrdering::Relaxed);
            debug!(coroutine = %handle, "hosted coroutine");
            Ok(&*raw)
        }
    }

    /// Scheduling record for `handle`, if registered
    pub fn find(&self, handle: CoroutineHandle) -> Option<&Coroutine> {
        // SAFETY: records stay alive while linked, and &self keeps them linked
        self.lookup(handle).map(|p| unsafe { &*p.as_ptr() })
    }

    /// Write the scheduling state and notify observers.
    ///
    /// Hooks fire only when the state actually changes. A coroutine left DEAD
    /// without hooks is destroyed before this returns.
    pub fn set_state(&mut self, handle: CoroutineHandle, state: CoroutineState) -> Result<()> {
        let record = self
            .lookup(handle)
            .ok_or(RuntimeError::UnknownCoroutine(handle))?;
        // SAFETY: record is linked into self.map
        unsafe { self.transition(record, state, false) };
        Ok(())
    }

    /// Record how many values the last resume produced
    pub fn set_result_count(&mut self, handle: CoroutineHandle, count: u32) -> Result<()> {
        let record = self
            .lookup(handle)
            .ok_or(RuntimeError::UnknownCoroutine(handle))?;
        // SAFETY: record is linked into self.map
        unsafe { (*record.as_ptr()).result_count = count };
        Ok(())
    }

    /// Register an observer for `handle`'s transitions.
    pub fn hook(
        &mut self,
        handle: CoroutineHandle,
        callback: impl FnMut(&Coroutine) + 'static,
    ) -> Result<HookToken> {
        let record = self
            .lookup(handle)
            .ok_or(RuntimeError::UnknownCoroutine(handle))?;
        // SAFETY: record is linked into self.map
        let token = unsafe { (*record.as_ptr()).hooks.add(handle, Box::new(callback)) };
        trace!(coroutine = %handle, "hook registered");
        Ok(token)
    }

    /// Remove an observer registered by [`hook`](Self::hook).
    ///
    /// Removing the last hook of a DEAD coroutine destroys its record.
    pub fn unhook(&mut self, token: HookToken) -> Result<()> {
        let handle = token.owner();
        let record = self
            .lookup(handle)
            .ok_or(RuntimeError::UnknownCoroutine(handle))?;

        // SAFETY: record is linked into self.map
        unsafe {
            let co = &mut *record.as_ptr();
            if co.hooks.remove(token).is_err() {
                tracing::warn!(coroutine = %handle, "unhook with a token this coroutine never issued");
                return Err(RuntimeError::ForeignHook(handle));
            }
            trace!(coroutine = %handle, "hook removed");
            if co.state.is_dead() && co.hooks.is_empty() {
                self.destroy(record);
            }
        }
        Ok(())
    }

    /// Resume every runnable coroutine once, in handle order.
    ///
    /// `resume` drives the interpreter and reports how the coroutine stopped;
    /// the registry applies the matching transition. WAIT and terminal
    /// coroutines are skipped. Hooks fire after every resumption, including a
    /// yield that leaves the state BUSY, so observers see each new result
    /// count. Returns the number of resumptions.
    pub fn sweep(&mut self, mut resume: impl FnMut(CoroutineHandle) -> Resumed) -> usize {
        let mut resumed = 0;
        let mut cursor = self.map.begin();

        while let Some(node) = cursor {
            // SAFETY: node is linked; its successor is read before the
            // transition below can destroy it
            unsafe {
                cursor = OrderedMap::<HandleCmp>::next(node);
                let record = container_of!(node, Coroutine, node);
                let co = &*record.as_ptr();
                if !co.state.is_runnable() {
                    continue;
                }

                let handle = co.handle;
                let outcome = resume(handle);
                resumed += 1;
                TOTAL_RESUMES.fetch_add(1, AtomicOrdering::Relaxed);
                trace!(coroutine = %handle, ?outcome, "resumed");

                let (next_state, results) = match outcome {
                    Resumed::Yielded(n) => (CoroutineState::BUSY, Some(n)),
                    Resumed::Suspended(n) => (CoroutineState::WAIT, Some(n)),
                    Resumed::Returned(n) => (CoroutineState::BUSY.with_dead(), Some(n)),
                    Resumed::Failed => (CoroutineState::BUSY.with_dead().with_error(), None),
                };
                if let Some(n) = results {
                    (*record.as_ptr()).result_count = n;
                }
                // observers see every resumption, even BUSY -> BUSY
                self.transition(record, next_state, true);
            }
        }

        resumed
    }

    /// Handles currently registered, ascending
    pub fn handles(&self) -> Vec<CoroutineHandle> {
        self.map
            .iter()
            // SAFETY: linked nodes are embedded in live records
            .map(|n| unsafe { container_of!(n, Coroutine, node).as_ref().handle })
            .collect()
    }

    fn lookup(&self, handle: CoroutineHandle) -> Option<NonNull<Coroutine>> {
        let mut needle = Coroutine {
            node: MapNode::new(),
            handle,
            state: CoroutineState::WAIT,
            result_count: 0,
            hooks: HookSet::default(),
        };
        let p: *mut Coroutine = &raw mut needle;
        // SAFETY: the needle outlives the search and is never linked
        unsafe {
            let key = NonNull::new_unchecked(&raw mut (*p).node);
            self.map
                .find(key)
                .map(|n| unsafe { container_of!(n, Coroutine, node) })
        }
    }

    /// Hooks fire on a state change, or unconditionally with `always_fire`.
    ///
    /// # Safety
    /// `record` must be linked into `self.map`.
    unsafe fn transition(
        &mut self,
        record: NonNull<Coroutine>,
        state: CoroutineState,
        always_fire: bool,
    ) {
        unsafe {
            let co = &mut *record.as_ptr();
            let previous = co.state;
            if previous == state && !always_fire {
                return;
            }
            co.state = state;
            trace!(coroutine = %co.handle, from = %previous, to = %state, "state change");

            let co = &*record.as_ptr();
            co.hooks.fire(co);

            if co.state.is_dead() && co.hooks.is_empty() {
                self.destroy(record);
            }
        }
    }

    /// # Safety
    /// `record` must be linked into `self.map`.
    unsafe fn destroy(&mut self, record: NonNull<Coroutine>) {
        unsafe {
            self.map.erase(NonNull::new_unchecked(&raw mut (*record.as_ptr()).node));
            let co = Box::from_raw(record.as_ptr());
            TOTAL_DESTROYED.fetch_add(1, AtomicOrdering::Relaxed);
            debug!(coroutine = %co.handle, state = %co.state, "destroyed coroutine record");
        }
    }
}

impl Drop for CoroutineRegistry {
    fn drop(&mut self) {
        self.map.clear(|node| {
            // SAFETY: every linked node was boxed by host()
            unsafe { drop(Box::from_raw(container_of!(node, Coroutine, node).as_ptr())) };
        });
    }
}
