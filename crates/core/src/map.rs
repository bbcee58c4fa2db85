//! Intrusive ordered map (red-black tree)
//!
//! Like [`List`](crate::List), the map never allocates: each member embeds a
//! [`MapNode`] and the caller owns the storage. Ordering comes entirely from a
//! comparator supplied at construction. The comparator receives two node
//! pointers, the member already in the tree first and the needle second, and
//! recovers the keys with [`container_of!`](crate::container_of). Anything the
//! comparator needs beyond the nodes (the "user argument") is captured by the
//! closure.
//!
//! Equal-comparing keys are duplicates: [`OrderedMap::insert`] refuses them and
//! [`OrderedMap::replace`] swaps the occupant out.
//!
//! ## Invariants
//!
//! After every mutation:
//! - in-order traversal is strictly increasing under the comparator
//! - the root is black
//! - no red node has a red child
//! - every root-to-leaf path carries the same number of black nodes
//!
//! The parent pointer and the node color share one word: nodes are
//! pointer-aligned, so the low bit is free to hold the color.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::ptr::NonNull;

type Link = Option<NonNull<MapNode>>;

const RED: usize = 0;
const BLACK: usize = 1;
const COLOR_MASK: usize = 1;

/// Link fields embedded in a map member.
#[derive(Debug, Default)]
pub struct MapNode {
    parent_color: usize,
    left: Link,
    right: Link,
}

impl MapNode {
    pub const fn new() -> Self {
        Self {
            parent_color: 0,
            left: None,
            right: None,
        }
    }
}

// =============================================================================
// Raw node accessors
// =============================================================================

#[inline]
unsafe fn parent(n: NonNull<MapNode>) -> Link {
    NonNull::new(unsafe { ((*n.as_ptr()).parent_color & !COLOR_MASK) as *mut MapNode })
}

#[inline]
unsafe fn color(n: NonNull<MapNode>) -> usize {
    unsafe { (*n.as_ptr()).parent_color & COLOR_MASK }
}

#[inline]
unsafe fn is_red(n: Link) -> bool {
    match n {
        Some(n) => unsafe { color(n) == RED },
        None => false,
    }
}

#[inline]
unsafe fn is_black(n: Link) -> bool {
    !unsafe { is_red(n) }
}

#[inline]
unsafe fn set_parent(n: NonNull<MapNode>, p: Link) {
    unsafe {
        let c = color(n);
        set_parent_color(n, p, c);
    }
}

#[inline]
unsafe fn set_color(n: NonNull<MapNode>, c: usize) {
    unsafe {
        let node = &mut *n.as_ptr();
        node.parent_color = (node.parent_color & !COLOR_MASK) | c;
    }
}

#[inline]
unsafe fn set_parent_color(n: NonNull<MapNode>, p: Link, c: usize) {
    let addr = p.map_or(0, |p| p.as_ptr() as usize);
    unsafe { (*n.as_ptr()).parent_color = addr | c };
}

#[inline]
unsafe fn left(n: NonNull<MapNode>) -> Link {
    unsafe { (*n.as_ptr()).left }
}

#[inline]
unsafe fn right(n: NonNull<MapNode>) -> Link {
    unsafe { (*n.as_ptr()).right }
}

unsafe fn minimum(mut n: NonNull<MapNode>) -> NonNull<MapNode> {
    while let Some(l) = unsafe { left(n) } {
        n = l;
    }
    n
}

unsafe fn maximum(mut n: NonNull<MapNode>) -> NonNull<MapNode> {
    while let Some(r) = unsafe { right(n) } {
        n = r;
    }
    n
}

// =============================================================================
// OrderedMap
// =============================================================================

/// Red-black tree over [`MapNode`]s owned elsewhere.
pub struct OrderedMap<F> {
    root: Link,
    cmp: F,
    size: usize,
}

impl<F> std::fmt::Debug for OrderedMap<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedMap")
            .field("root", &self.root)
            .field("size", &self.size)
            .finish()
    }
}

impl<F> OrderedMap<F>
where
    F: Fn(NonNull<MapNode>, NonNull<MapNode>) -> Ordering,
{
    /// Create an empty map ordered by `cmp`.
    ///
    /// The comparator must be a total order and must not change its answer
    /// for a node while that node is linked.
    pub const fn new(cmp: F) -> Self {
        Self {
            root: None,
            cmp,
            size: 0,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Link `node` unless a member with an equal key exists.
    ///
    /// Returns `None` on success, or the pre-existing member, in which case
    /// the map is unchanged.
    ///
    /// # Safety
    /// `node` must be valid, unlinked, and must not move until erased.
    pub unsafe fn insert(&mut self, node: NonNull<MapNode>) -> Option<NonNull<MapNode>> {
        let (parent, dir) = match self.locate(node) {
            Err(slot) => slot,
            Ok(existing) => return Some(existing),
        };
        unsafe { self.link(node, parent, dir) };
        None
    }

    /// Link `node`, evicting any member with an equal key.
    ///
    /// Returns the evicted member (now unlinked), or `None`.
    ///
    /// # Safety
    /// `node` must be valid, unlinked, and must not move until erased.
    pub unsafe fn replace(&mut self, node: NonNull<MapNode>) -> Option<NonNull<MapNode>> {
        match self.locate(node) {
            Err((parent, dir)) => {
                unsafe { self.link(node, parent, dir) };
                None
            }
            Ok(old) => {
                unsafe { self.substitute(old, node) };
                Some(old)
            }
        }
    }

    /// Unlink `node`.
    ///
    /// # Safety
    /// `node` must be a member of `self`.
    pub unsafe fn erase(&mut self, z: NonNull<MapNode>) {
        debug_assert!(self.size > 0, "map: erase from empty map");
        unsafe {
            let removed_color;
            let x: Link;
            let x_parent: Link;

            match (left(z), right(z)) {
                (None, r) => {
                    removed_color = color(z);
                    x = r;
                    x_parent = parent(z);
                    self.transplant(z, r);
                }
                (l @ Some(_), None) => {
                    removed_color = color(z);
                    x = l;
                    x_parent = parent(z);
                    self.transplant(z, l);
                }
                (Some(zl), Some(zr)) => {
                    let y = minimum(zr);
                    removed_color = color(y);
                    x = right(y);
                    if parent(y) == Some(z) {
                        x_parent = Some(y);
                    } else {
                        x_parent = parent(y);
                        self.transplant(y, right(y));
                        (*y.as_ptr()).right = Some(zr);
                        set_parent(zr, Some(y));
                    }
                    self.transplant(z, Some(y));
                    (*y.as_ptr()).left = Some(zl);
                    set_parent(zl, Some(y));
                    set_color(y, color(z));
                }
            }

            if removed_color == BLACK {
                self.erase_fixup(x, x_parent);
            }

            let node = &mut *z.as_ptr();
            node.parent_color = 0;
            node.left = None;
            node.right = None;
        }
        self.size -= 1;
    }

    /// Member whose key equals `key`'s.
    pub fn find(&self, key: NonNull<MapNode>) -> Option<NonNull<MapNode>> {
        self.locate(key).ok()
    }

    /// First member not less than `key`.
    pub fn find_lower(&self, key: NonNull<MapNode>) -> Option<NonNull<MapNode>> {
        let mut cursor = self.root;
        let mut found = None;
        while let Some(n) = cursor {
            // SAFETY: every reachable node is a live member
            cursor = unsafe {
                if (self.cmp)(n, key) == Ordering::Less {
                    right(n)
                } else {
                    found = Some(n);
                    left(n)
                }
            };
        }
        found
    }

    /// First member greater than `key`.
    pub fn find_upper(&self, key: NonNull<MapNode>) -> Option<NonNull<MapNode>> {
        let mut cursor = self.root;
        let mut found = None;
        while let Some(n) = cursor {
            // SAFETY: every reachable node is a live member
            cursor = unsafe {
                if (self.cmp)(n, key) == Ordering::Greater {
                    found = Some(n);
                    left(n)
                } else {
                    right(n)
                }
            };
        }
        found
    }

    /// Smallest member.
    pub fn begin(&self) -> Option<NonNull<MapNode>> {
        // SAFETY: root is a live member
        self.root.map(|r| unsafe { minimum(r) })
    }

    /// Largest member.
    pub fn end(&self) -> Option<NonNull<MapNode>> {
        // SAFETY: root is a live member
        self.root.map(|r| unsafe { maximum(r) })
    }

    /// In-order successor.
    ///
    /// # Safety
    /// `node` must be a member of a live map.
    pub unsafe fn next(node: NonNull<MapNode>) -> Option<NonNull<MapNode>> {
        unsafe { next_in_order(node) }
    }

    /// In-order predecessor.
    ///
    /// # Safety
    /// `node` must be a member of a live map.
    pub unsafe fn prev(node: NonNull<MapNode>) -> Option<NonNull<MapNode>> {
        unsafe { prev_in_order(node) }
    }

    /// Iterate members in ascending order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            cursor: self.begin(),
            _map: PhantomData,
        }
    }

    /// Unlink every member, handing each one to `release` in ascending order.
    pub fn clear(&mut self, mut release: impl FnMut(NonNull<MapNode>)) {
        while let Some(n) = self.begin() {
            // SAFETY: n is a member of self
            unsafe { self.erase(n) };
            release(n);
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// `Ok(member)` for an equal key, otherwise `Err((parent, go_left))` for
    /// the empty slot where `key` belongs.
    fn locate(&self, key: NonNull<MapNode>) -> Result<NonNull<MapNode>, (Link, bool)> {
        let mut cursor = self.root;
        let mut slot = (None, false);
        while let Some(n) = cursor {
            // SAFETY: every reachable node is a live member
            cursor = unsafe {
                match (self.cmp)(n, key) {
                    Ordering::Equal => return Ok(n),
                    Ordering::Greater => {
                        slot = (Some(n), true);
                        left(n)
                    }
                    Ordering::Less => {
                        slot = (Some(n), false);
                        right(n)
                    }
                }
            };
        }
        Err(slot)
    }

    unsafe fn link(&mut self, node: NonNull<MapNode>, parent: Link, go_left: bool) {
        unsafe {
            (*node.as_ptr()).left = None;
            (*node.as_ptr()).right = None;
            set_parent_color(node, parent, RED);
            match parent {
                None => self.root = Some(node),
                Some(p) if go_left => (*p.as_ptr()).left = Some(node),
                Some(p) => (*p.as_ptr()).right = Some(node),
            }
            self.insert_fixup(node);
        }
        self.size += 1;
    }

    /// Put `new` exactly where `old` sits, inheriting its color and children.
    unsafe fn substitute(&mut self, old: NonNull<MapNode>, new: NonNull<MapNode>) {
        unsafe {
            let o = &mut *old.as_ptr();
            let n = &mut *new.as_ptr();
            n.parent_color = o.parent_color;
            n.left = o.left;
            n.right = o.right;
            self.replace_child(parent(old), old, Some(new));
            if let Some(l) = n.left {
                set_parent(l, Some(new));
            }
            if let Some(r) = n.right {
                set_parent(r, Some(new));
            }
            o.parent_color = 0;
            o.left = None;
            o.right = None;
        }
    }

    unsafe fn replace_child(&mut self, parent: Link, old: NonNull<MapNode>, new: Link) {
        match parent {
            None => self.root = new,
            Some(p) => unsafe {
                if left(p) == Some(old) {
                    (*p.as_ptr()).left = new;
                } else {
                    (*p.as_ptr()).right = new;
                }
            },
        }
    }

    unsafe fn transplant(&mut self, u: NonNull<MapNode>, v: Link) {
        unsafe {
            let up = parent(u);
            self.replace_child(up, u, v);
            if let Some(v) = v {
                set_parent(v, up);
            }
        }
    }

    unsafe fn rotate_left(&mut self, x: NonNull<MapNode>) {
        unsafe {
            let Some(y) = right(x) else { return };
            (*x.as_ptr()).right = left(y);
            if let Some(b) = left(y) {
                set_parent(b, Some(x));
            }
            let xp = parent(x);
            set_parent(y, xp);
            self.replace_child(xp, x, Some(y));
            (*y.as_ptr()).left = Some(x);
            set_parent(x, Some(y));
        }
    }

    unsafe fn rotate_right(&mut self, x: NonNull<MapNode>) {
        unsafe {
            let Some(y) = left(x) else { return };
            (*x.as_ptr()).left = right(y);
            if let Some(b) = right(y) {
                set_parent(b, Some(x));
            }
            let xp = parent(x);
            set_parent(y, xp);
            self.replace_child(xp, x, Some(y));
            (*y.as_ptr()).right = Some(x);
            set_parent(x, Some(y));
        }
    }

    unsafe fn insert_fixup(&mut self, mut z: NonNull<MapNode>) {
        unsafe {
            loop {
                let Some(mut p) = parent(z) else { break };
                if color(p) == BLACK {
                    break;
                }
                // A red parent is never the root, so the grandparent exists.
                let Some(g) = parent(p) else { break };

                if left(g) == Some(p) {
                    let uncle = right(g);
                    if let Some(u) = uncle.filter(|&u| color(u) == RED) {
                        set_color(p, BLACK);
                        set_color(u, BLACK);
                        set_color(g, RED);
                        z = g;
                        continue;
                    }
                    if right(p) == Some(z) {
                        z = p;
                        self.rotate_left(z);
                        p = parent(z).unwrap_or(z);
                    }
                    set_color(p, BLACK);
                    set_color(g, RED);
                    self.rotate_right(g);
                } else {
                    let uncle = left(g);
                    if let Some(u) = uncle.filter(|&u| color(u) == RED) {
                        set_color(p, BLACK);
                        set_color(u, BLACK);
                        set_color(g, RED);
                        z = g;
                        continue;
                    }
                    if left(p) == Some(z) {
                        z = p;
                        self.rotate_right(z);
                        p = parent(z).unwrap_or(z);
                    }
                    set_color(p, BLACK);
                    set_color(g, RED);
                    self.rotate_left(g);
                }
            }
            if let Some(root) = self.root {
                set_color(root, BLACK);
            }
        }
    }

    unsafe fn erase_fixup(&mut self, mut x: Link, mut x_parent: Link) {
        unsafe {
            while x != self.root && is_black(x) {
                // x is not the root, so it has a parent
                let Some(p) = x_parent else { break };

                if left(p) == x {
                    // x carries a double black, so its sibling exists
                    let Some(mut w) = right(p) else { break };
                    if color(w) == RED {
                        set_color(w, BLACK);
                        set_color(p, RED);
                        self.rotate_left(p);
                        let Some(s) = right(p) else { break };
                        w = s;
                    }
                    if is_black(left(w)) && is_black(right(w)) {
                        set_color(w, RED);
                        x = Some(p);
                        x_parent = parent(p);
                    } else {
                        if is_black(right(w)) {
                            if let Some(wl) = left(w) {
                                set_color(wl, BLACK);
                            }
                            set_color(w, RED);
                            self.rotate_right(w);
                            let Some(s) = right(p) else { break };
                            w = s;
                        }
                        set_color(w, color(p));
                        set_color(p, BLACK);
                        if let Some(wr) = right(w) {
                            set_color(wr, BLACK);
                        }
                        self.rotate_left(p);
                        x = self.root;
                        x_parent = None;
                    }
                } else {
                    let Some(mut w) = left(p) else { break };
                    if color(w) == RED {
                        set_color(w, BLACK);
                        set_color(p, RED);
                        self.rotate_right(p);
                        let Some(s) = left(p) else { break };
                        w = s;
                    }
                    if is_black(left(w)) && is_black(right(w)) {
                        set_color(w, RED);
                        x = Some(p);
                        x_parent = parent(p);
                    } else {
                        if is_black(left(w)) {
                            if let Some(wr) = right(w) {
                                set_color(wr, BLACK);
                            }
                            set_color(w, RED);
                            self.rotate_left(w);
                            let Some(s) = left(p) else { break };
                            w = s;
                        }
                        set_color(w, color(p));
                        set_color(p, BLACK);
                        if let Some(wl) = left(w) {
                            set_color(wl, BLACK);
                        }
                        self.rotate_right(p);
                        x = self.root;
                        x_parent = None;
                    }
                }
            }
            if let Some(x) = x {
                set_color(x, BLACK);
            }
        }
    }

    /// Check every red-black invariant, returning the black height.
    ///
    /// Intended for tests; walks the whole tree.
    #[doc(hidden)]
    pub fn validate(&self) -> Result<usize, String> {
        // SAFETY: every reachable node is a live member
        unsafe {
            if let Some(root) = self.root {
                if color(root) != BLACK {
                    return Err("root is red".to_string());
                }
                if parent(root).is_some() {
                    return Err("root has a parent".to_string());
                }
            }
            let mut count = 0;
            let height = self.validate_subtree(self.root, &mut count)?;
            if count != self.size {
                return Err(format!("size {} but {} nodes reachable", self.size, count));
            }
            Ok(height)
        }
    }

    unsafe fn validate_subtree(&self, n: Link, count: &mut usize) -> Result<usize, String> {
        let Some(n) = n else { return Ok(1) };
        *count += 1;
        unsafe {
            for child in [left(n), right(n)].into_iter().flatten() {
                if parent(child) != Some(n) {
                    return Err("broken parent link".to_string());
                }
                if color(n) == RED && color(child) == RED {
                    return Err("red node with red child".to_string());
                }
            }
            if let Some(l) = left(n) {
                if (self.cmp)(l, n) != Ordering::Less {
                    return Err("left child not less than parent".to_string());
                }
            }
            if let Some(r) = right(n) {
                if (self.cmp)(r, n) != Ordering::Greater {
                    return Err("right child not greater than parent".to_string());
                }
            }
            let lh = self.validate_subtree(left(n), count)?;
            let rh = self.validate_subtree(right(n), count)?;
            if lh != rh {
                return Err(format!("black height mismatch: {} vs {}", lh, rh));
            }
            Ok(lh + usize::from(color(n) == BLACK))
        }
    }
}

/// Ascending iterator over map members.
pub struct Iter<'a> {
    cursor: Link,
    _map: PhantomData<&'a ()>,
}

impl Iterator for Iter<'_> {
    type Item = NonNull<MapNode>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cursor?;
        // SAFETY: the map is borrowed, so its members stay linked
        self.cursor = unsafe { next_in_order(node) };
        Some(node)
    }
}

unsafe fn next_in_order(node: NonNull<MapNode>) -> Link {
    unsafe {
        if let Some(r) = right(node) {
            return Some(minimum(r));
        }
        let mut child = node;
        let mut up = parent(node);
        while let Some(p) = up {
            if left(p) == Some(child) {
                return Some(p);
            }
            child = p;
            up = parent(p);
        }
        None
    }
}

unsafe fn prev_in_order(node: NonNull<MapNode>) -> Link {
    unsafe {
        if let Some(l) = left(node) {
            return Some(maximum(l));
        }
        let mut child = node;
        let mut up = parent(node);
        while let Some(p) = up {
            if right(p) == Some(child) {
                return Some(p);
            }
            child = p;
            up = parent(p);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container_of;

    struct Entry {
        node: MapNode,
        key: u32,
        tag: &'static str,
    }

    fn cmp_entries(a: NonNull<MapNode>, b: NonNull<MapNode>) -> Ordering {
        unsafe {
            let a = container_of!(a, Entry, node).as_ref();
            let b = container_of!(b, Entry, node).as_ref();
            a.key.cmp(&b.key)
        }
    }

    type EntryMap = OrderedMap<fn(NonNull<MapNode>, NonNull<MapNode>) -> Ordering>;

    fn new_map() -> EntryMap {
        OrderedMap::new(cmp_entries as fn(_, _) -> _)
    }

    fn alloc(key: u32, tag: &'static str) -> NonNull<MapNode> {
        let raw = Box::into_raw(Box::new(Entry {
            node: MapNode::new(),
            key,
            tag,
        }));
        unsafe { NonNull::new_unchecked(&raw mut (*raw).node) }
    }

    fn entry<'a>(n: NonNull<MapNode>) -> &'a Entry {
        unsafe { container_of!(n, Entry, node).as_ref() }
    }

    fn free(n: NonNull<MapNode>) {
        drop(unsafe { Box::from_raw(container_of!(n, Entry, node).as_ptr()) });
    }

    fn keys(map: &EntryMap) -> Vec<u32> {
        map.iter().map(|n| entry(n).key).collect()
    }

    /// Probe lookups with a stack-allocated key record.
    fn with_key<R>(key: u32, f: impl FnOnce(NonNull<MapNode>) -> R) -> R {
        let mut needle = Entry {
            node: MapNode::new(),
            key,
            tag: "key",
        };
        let p: *mut Entry = &raw mut needle;
        f(unsafe { NonNull::new_unchecked(&raw mut (*p).node) })
    }

    /// Deterministic pseudo-random sequence (xorshift) so failures replay.
    fn shuffled(n: u32, mut seed: u64) -> Vec<u32> {
        let mut v: Vec<u32> = (0..n).collect();
        for i in (1..v.len()).rev() {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            v.swap(i, (seed % (i as u64 + 1)) as usize);
        }
        v
    }

    #[test]
    fn test_insert_keeps_order_and_balance() {
        let mut map = new_map();
        for key in shuffled(500, 0x9E37_79B9) {
            assert!(unsafe { map.insert(alloc(key, "v")) }.is_none());
            map.validate().unwrap();
        }
        assert_eq!(map.size(), 500);
        assert_eq!(keys(&map), (0..500).collect::<Vec<_>>());
        map.clear(free);
        assert!(map.is_empty());
    }

    #[test]
    fn test_erase_keeps_invariants() {
        let mut map = new_map();
        let mut nodes = Vec::new();
        for key in shuffled(300, 42) {
            let n = alloc(key, "v");
            unsafe { map.insert(n) };
            nodes.push(n);
        }

        let order = shuffled(300, 7);
        for (i, idx) in order.iter().enumerate() {
            let n = nodes[*idx as usize];
            unsafe { map.erase(n) };
            free(n);
            map.validate().unwrap();
            assert_eq!(map.size(), 300 - i - 1);
            let ks = keys(&map);
            assert!(ks.windows(2).all(|w| w[0] < w[1]));
        }
        assert!(map.begin().is_none());
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let mut map = new_map();
        let first = alloc(10, "first");
        let second = alloc(10, "second");

        assert!(unsafe { map.insert(first) }.is_none());
        let existing = unsafe { map.insert(second) };
        assert_eq!(existing, Some(first));
        assert_eq!(entry(existing.unwrap()).tag, "first");
        assert_eq!(map.size(), 1);
        assert_eq!(with_key(10, |k| map.find(k)), Some(first));

        free(second);
        map.clear(free);
    }

    #[test]
    fn test_replace_returns_prior_occupant() {
        let mut map = new_map();
        for key in [5, 3, 8, 1, 4] {
            unsafe { map.insert(alloc(key, "old")) };
        }
        let fresh = alloc(3, "new");
        let prior = unsafe { map.replace(fresh) }.unwrap();
        assert_eq!(entry(prior).tag, "old");
        assert_eq!(entry(prior).key, 3);
        free(prior);

        map.validate().unwrap();
        assert_eq!(map.size(), 5);
        assert_eq!(with_key(3, |k| map.find(k)), Some(fresh));
        assert_eq!(keys(&map), vec![1, 3, 4, 5, 8]);

        let absent = alloc(6, "new");
        assert!(unsafe { map.replace(absent) }.is_none());
        assert_eq!(map.size(), 6);
        map.validate().unwrap();

        map.clear(free);
    }

    #[test]
    fn test_find_lower_and_upper() {
        let mut map = new_map();
        for key in [10, 20, 30, 40] {
            unsafe { map.insert(alloc(key, "v")) };
        }

        let lower = |k| with_key(k, |p| map.find_lower(p)).map(|n| entry(n).key);
        let upper = |k| with_key(k, |p| map.find_upper(p)).map(|n| entry(n).key);

        assert_eq!(lower(20), Some(20));
        assert_eq!(lower(21), Some(30));
        assert_eq!(lower(5), Some(10));
        assert_eq!(lower(41), None);

        assert_eq!(upper(20), Some(30));
        assert_eq!(upper(39), Some(40));
        assert_eq!(upper(40), None);
        assert_eq!(upper(0), Some(10));

        assert!(with_key(25, |p| map.find(p)).is_none());

        map.clear(free);
    }

    #[test]
    fn test_bidirectional_traversal() {
        let mut map = new_map();
        for key in shuffled(64, 3) {
            unsafe { map.insert(alloc(key, "v")) };
        }

        let mut forward = Vec::new();
        let mut cursor = map.begin();
        while let Some(n) = cursor {
            forward.push(entry(n).key);
            cursor = unsafe { EntryMap::next(n) };
        }

        let mut backward = Vec::new();
        let mut cursor = map.end();
        while let Some(n) = cursor {
            backward.push(entry(n).key);
            cursor = unsafe { EntryMap::prev(n) };
        }
        backward.reverse();

        assert_eq!(forward, (0..64).collect::<Vec<_>>());
        assert_eq!(forward, backward);

        map.clear(free);
    }
}
