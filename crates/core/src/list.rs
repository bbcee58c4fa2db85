//! Intrusive doubly-linked list
//!
//! The link fields live inside the record that owns them. The list never
//! allocates and never owns its nodes: the embedding record's owner (a `Box`,
//! an arena slot, a static) governs lifetime, and the list only relinks.
//!
//! ## Layout
//!
//! ```text
//!            head                                 tail
//!             │                                    │
//!             ▼                                    ▼
//!  None ◄─ [node] ◄─before── [node] ◄─before── [node] ─► None
//!            └──after──►      └──after──►
//! ```
//!
//! ## Usage
//!
//! ```
//! use std::ptr::NonNull;
//! use tessel_core::{List, ListNode, container_of};
//!
//! struct Job {
//!     node: ListNode,
//!     id: u32,
//! }
//!
//! let mut list = List::new();
//! let job = Box::into_raw(Box::new(Job { node: ListNode::new(), id: 7 }));
//!
//! unsafe {
//!     list.push_back(NonNull::new_unchecked(&raw mut (*job).node));
//!
//!     let node = list.pop_front().unwrap();
//!     let job = Box::from_raw(container_of!(node, Job, node).as_ptr());
//!     assert_eq!(job.id, 7);
//! }
//! ```
//!
//! ## Contract
//!
//! Every linking operation is `unsafe`: a node must not already be a member of
//! any list, and it must stay at the same address until it is unlinked.
//! Violations corrupt both lists silently. Debug builds assert what they can
//! cheaply observe.

use std::marker::PhantomData;
use std::ptr::NonNull;

/// Link fields embedded in a list member.
#[derive(Debug, Default)]
pub struct ListNode {
    after: Option<NonNull<ListNode>>,
    before: Option<NonNull<ListNode>>,
}

impl ListNode {
    pub const fn new() -> Self {
        Self {
            after: None,
            before: None,
        }
    }
}

/// Doubly-linked list over [`ListNode`]s owned elsewhere.
#[derive(Debug, Default)]
pub struct List {
    head: Option<NonNull<ListNode>>,
    tail: Option<NonNull<ListNode>>,
    size: usize,
}

impl List {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            size: 0,
        }
    }

    /// Number of linked nodes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// First node, or `None` when empty.
    #[inline]
    pub fn begin(&self) -> Option<NonNull<ListNode>> {
        self.head
    }

    /// Last node, or `None` when empty.
    #[inline]
    pub fn end(&self) -> Option<NonNull<ListNode>> {
        self.tail
    }

    /// Node following `node`.
    ///
    /// # Safety
    /// `node` must be linked into a live list.
    #[inline]
    pub unsafe fn next(node: NonNull<ListNode>) -> Option<NonNull<ListNode>> {
        unsafe { (*node.as_ptr()).after }
    }

    /// Node preceding `node`.
    ///
    /// # Safety
    /// `node` must be linked into a live list.
    #[inline]
    pub unsafe fn prev(node: NonNull<ListNode>) -> Option<NonNull<ListNode>> {
        unsafe { (*node.as_ptr()).before }
    }

    /// Link `n` at the head.
    ///
    /// # Safety
    /// `n` must be valid, unlinked, and must not move until unlinked.
    pub unsafe fn push_front(&mut self, n: NonNull<ListNode>) {
        match self.head {
            Some(head) => unsafe { self.insert_before(head, n) },
            None => unsafe { self.link_only(n) },
        }
    }

    /// Link `n` at the tail.
    ///
    /// # Safety
    /// `n` must be valid, unlinked, and must not move until unlinked.
    pub unsafe fn push_back(&mut self, n: NonNull<ListNode>) {
        match self.tail {
            Some(tail) => unsafe { self.insert_after(tail, n) },
            None => unsafe { self.link_only(n) },
        }
    }

    /// Link `n` directly in front of `p`.
    ///
    /// # Safety
    /// `p` must be a member of `self`. `n` must be valid, unlinked, and must
    /// not move until unlinked.
    pub unsafe fn insert_before(&mut self, p: NonNull<ListNode>, n: NonNull<ListNode>) {
        debug_assert!(p != n, "list: node linked before itself");
        unsafe {
            let before = (*p.as_ptr()).before;
            (*n.as_ptr()).after = Some(p);
            (*n.as_ptr()).before = before;
            (*p.as_ptr()).before = Some(n);
            match before {
                Some(b) => (*b.as_ptr()).after = Some(n),
                None => self.head = Some(n),
            }
        }
        self.size += 1;
    }

    /// Link `n` directly after `p`.
    ///
    /// # Safety
    /// `p` must be a member of `self`. `n` must be valid, unlinked, and must
    /// not move until unlinked.
    pub unsafe fn insert_after(&mut self, p: NonNull<ListNode>, n: NonNull<ListNode>) {
        debug_assert!(p != n, "list: node linked after itself");
        unsafe {
            let after = (*p.as_ptr()).after;
            (*n.as_ptr()).before = Some(p);
            (*n.as_ptr()).after = after;
            (*p.as_ptr()).after = Some(n);
            match after {
                Some(a) => (*a.as_ptr()).before = Some(n),
                None => self.tail = Some(n),
            }
        }
        self.size += 1;
    }

    /// Unlink `n`.
    ///
    /// # Safety
    /// `n` must be a member of `self`.
    pub unsafe fn erase(&mut self, n: NonNull<ListNode>) {
        debug_assert!(self.size > 0, "list: erase from empty list");
        unsafe {
            let node = &mut *n.as_ptr();
            match node.before {
                Some(b) => (*b.as_ptr()).after = node.after,
                None => {
                    debug_assert!(self.head == Some(n), "list: erase of foreign node");
                    self.head = node.after;
                }
            }
            match node.after {
                Some(a) => (*a.as_ptr()).before = node.before,
                None => {
                    debug_assert!(self.tail == Some(n), "list: erase of foreign node");
                    self.tail = node.before;
                }
            }
            node.after = None;
            node.before = None;
        }
        self.size -= 1;
    }

    /// Unlink and return the first node.
    pub fn pop_front(&mut self) -> Option<NonNull<ListNode>> {
        let head = self.head?;
        // SAFETY: head is a member of self
        unsafe { self.erase(head) };
        Some(head)
    }

    /// Unlink and return the last node.
    pub fn pop_back(&mut self) -> Option<NonNull<ListNode>> {
        let tail = self.tail?;
        // SAFETY: tail is a member of self
        unsafe { self.erase(tail) };
        Some(tail)
    }

    /// Splice every node of `src` onto the tail of `self`, leaving `src` empty.
    ///
    /// Constant time: only the boundary links are rewritten.
    pub fn migrate(&mut self, src: &mut List) {
        let (Some(src_head), Some(src_tail)) = (src.head, src.tail) else {
            return;
        };

        match self.tail {
            // SAFETY: both boundary nodes are members of live lists
            Some(tail) => unsafe {
                (*tail.as_ptr()).after = Some(src_head);
                (*src_head.as_ptr()).before = Some(tail);
            },
            None => self.head = Some(src_head),
        }
        self.tail = Some(src_tail);
        self.size += src.size;

        src.head = None;
        src.tail = None;
        src.size = 0;
    }

    /// Iterate nodes from head to tail.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            cursor: self.head,
            _list: PhantomData,
        }
    }

    unsafe fn link_only(&mut self, n: NonNull<ListNode>) {
        debug_assert!(self.size == 0);
        unsafe {
            (*n.as_ptr()).after = None;
            (*n.as_ptr()).before = None;
        }
        self.head = Some(n);
        self.tail = Some(n);
        self.size = 1;
    }
}

/// Head-to-tail iterator over linked nodes.
pub struct Iter<'a> {
    cursor: Option<NonNull<ListNode>>,
    _list: PhantomData<&'a List>,
}

impl Iterator for Iter<'_> {
    type Item = NonNull<ListNode>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cursor?;
        // SAFETY: the list is borrowed, so its members stay linked
        self.cursor = unsafe { List::next(node) };
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container_of;

    struct Item {
        node: ListNode,
        value: i32,
    }

    fn alloc(value: i32) -> (*mut Item, NonNull<ListNode>) {
        let raw = Box::into_raw(Box::new(Item {
            node: ListNode::new(),
            value,
        }));
        // SAFETY: raw is a fresh allocation
        let node = unsafe { NonNull::new_unchecked(&raw mut (*raw).node) };
        (raw, node)
    }

    fn values(list: &List) -> Vec<i32> {
        list.iter()
            .map(|n| unsafe { container_of!(n, Item, node).as_ref().value })
            .collect()
    }

    fn free_all(list: &mut List) {
        while let Some(n) = list.pop_front() {
            drop(unsafe { Box::from_raw(container_of!(n, Item, node).as_ptr()) });
        }
    }

    #[test]
    fn test_push_and_pop_both_ends() {
        let mut list = List::new();
        let (_, a) = alloc(1);
        let (_, b) = alloc(2);
        let (_, c) = alloc(3);

        unsafe {
            list.push_back(b);
            list.push_front(a);
            list.push_back(c);
        }
        assert_eq!(values(&list), vec![1, 2, 3]);
        assert_eq!(list.size(), 3);

        let last = list.pop_back().unwrap();
        assert_eq!(last, c);
        drop(unsafe { Box::from_raw(container_of!(last, Item, node).as_ptr()) });
        assert_eq!(values(&list), vec![1, 2]);

        free_all(&mut list);
        assert!(list.is_empty());
        assert!(list.begin().is_none());
        assert!(list.end().is_none());
    }

    #[test]
    fn test_insert_relative_and_erase() {
        let mut list = List::new();
        let (_, a) = alloc(1);
        let (_, b) = alloc(2);
        let (_, c) = alloc(3);
        let (raw_d, d) = alloc(4);

        unsafe {
            list.push_back(a);
            list.push_back(c);
            list.insert_before(c, b);
            list.insert_after(c, d);
        }
        assert_eq!(values(&list), vec![1, 2, 3, 4]);
        assert_eq!(list.end(), Some(d));

        unsafe { list.erase(d) };
        drop(unsafe { Box::from_raw(raw_d) });
        assert_eq!(list.end(), Some(c));
        assert_eq!(unsafe { List::prev(c) }, Some(b));
        assert_eq!(unsafe { List::next(c) }, None);
        assert_eq!(values(&list), vec![1, 2, 3]);

        free_all(&mut list);
    }

    #[test]
    fn test_size_matches_traversal_after_mixed_operations() {
        let mut list = List::new();
        let mut live = Vec::new();

        for i in 0..64 {
            let (raw, node) = alloc(i);
            unsafe {
                if i % 3 == 0 {
                    list.push_front(node);
                } else {
                    list.push_back(node);
                }
            }
            live.push(raw);

            if i % 5 == 4 {
                let victim = live.remove(live.len() / 2);
                unsafe {
                    list.erase(NonNull::new_unchecked(&raw mut (*victim).node));
                    drop(Box::from_raw(victim));
                }
            }
            if i % 7 == 6 {
                let n = list.pop_front().unwrap();
                let raw = unsafe { container_of!(n, Item, node).as_ptr() };
                live.retain(|&p| p != raw);
                drop(unsafe { Box::from_raw(raw) });
            }

            assert_eq!(list.size(), list.iter().count());
            assert_eq!(list.size(), live.len());
        }

        free_all(&mut list);
    }

    #[test]
    fn test_migrate_splices_and_empties_source() {
        let mut dst = List::new();
        let mut src = List::new();
        for v in [1, 2] {
            unsafe { dst.push_back(alloc(v).1) };
        }
        for v in [3, 4, 5] {
            unsafe { src.push_back(alloc(v).1) };
        }

        dst.migrate(&mut src);
        assert_eq!(values(&dst), vec![1, 2, 3, 4, 5]);
        assert_eq!(dst.size(), 5);
        assert!(src.is_empty());
        assert!(src.begin().is_none());

        // backward links across the splice point
        let tail = dst.end().unwrap();
        let mut back = Vec::new();
        let mut cursor = Some(tail);
        while let Some(n) = cursor {
            back.push(unsafe { container_of!(n, Item, node).as_ref().value });
            cursor = unsafe { List::prev(n) };
        }
        assert_eq!(back, vec![5, 4, 3, 2, 1]);

        free_all(&mut dst);
    }

    #[test]
    fn test_migrate_into_empty_and_from_empty() {
        let mut dst = List::new();
        let mut src = List::new();
        dst.migrate(&mut src);
        assert!(dst.is_empty());

        unsafe { src.push_back(alloc(9).1) };
        dst.migrate(&mut src);
        assert_eq!(values(&dst), vec![9]);
        assert_eq!(dst.begin(), dst.end());

        free_all(&mut dst);
    }
}
