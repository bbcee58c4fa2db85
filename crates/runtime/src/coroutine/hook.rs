//! Schedule hooks
//!
//! Each coroutine keeps an intrusive list of observers that fire, in
//! registration order, on every scheduling transition. Observers only see a
//! shared `&Coroutine`: they cannot reach the registry, so they cannot
//! reschedule the coroutine they are watching.

use super::{Coroutine, CoroutineHandle};
use std::ptr::NonNull;
use tessel_core::{List, ListNode, container_of};

/// Observer callback type
pub type HookFn = Box<dyn FnMut(&Coroutine)>;

struct Hook {
    node: ListNode,
    callback: HookFn,
}

/// Proof of a registered hook, consumed by `CoroutineRegistry::unhook`
#[derive(Debug)]
#[must_use = "dropping a hook token leaves the hook registered until the registry is dropped"]
pub struct HookToken {
    owner: CoroutineHandle,
    hook: NonNull<Hook>,
}

impl HookToken {
    /// Coroutine this hook observes
    pub fn owner(&self) -> CoroutineHandle {
        self.owner
    }
}

/// Per-coroutine observer list
#[derive(Default)]
pub(crate) struct HookSet {
    list: List,
}

impl HookSet {
    pub(crate) fn len(&self) -> usize {
        self.list.size()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub(crate) fn add(&mut self, owner: CoroutineHandle, callback: HookFn) -> HookToken {
        let raw = Box::into_raw(Box::new(Hook {
            node: ListNode::new(),
            callback,
        }));
        // SAFETY: raw is a fresh allocation; the node stays put until removed
        unsafe {
            self.list
                .push_back(NonNull::new_unchecked(&raw mut (*raw).node));
            HookToken {
                owner,
                hook: NonNull::new_unchecked(raw),
            }
        }
    }

    /// Unlink and free the hook behind `token`.
    ///
    /// Hook lists are short, so membership is confirmed by a scan before
    /// anything is dereferenced. Returns the token if it is not ours.
    pub(crate) fn remove(&mut self, token: HookToken) -> Result<(), HookToken> {
        let found = self
            .list
            .iter()
            // SAFETY: members of the list are live hooks
            .find(|&n| unsafe { container_of!(n, Hook, node) } == token.hook);
        match found {
            Some(node) => {
                // SAFETY: node is a member, and the hook was allocated by add()
                unsafe {
                    self.list.erase(node);
                    drop(Box::from_raw(token.hook.as_ptr()));
                }
                Ok(())
            }
            None => Err(token),
        }
    }

    /// Run every hook against `coroutine`, oldest first.
    pub(crate) fn fire(&self, coroutine: &Coroutine) {
        for node in self.list.iter() {
            // SAFETY: members are live hooks; each lives in its own allocation
            // outside the record that `coroutine` borrows
            unsafe {
                let hook = container_of!(node, Hook, node).as_ptr();
                let callback = &mut (*hook).callback;
                callback(coroutine);
            }
        }
    }
}

impl Drop for HookSet {
    fn drop(&mut self) {
        while let Some(node) = self.list.pop_front() {
            // SAFETY: every member was allocated by add()
            unsafe { drop(Box::from_raw(container_of!(node, Hook, node).as_ptr())) };
        }
    }
}
