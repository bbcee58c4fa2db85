//! Tessel Core: allocation-free intrusive containers
//!
//! The indexing and queueing substrate of the Tessel runtime. Both containers
//! are intrusive: link fields are embedded in the caller's records, the
//! containers only relink them, and nothing here allocates.
//!
//! # Modules
//!
//! - `list`: doubly-linked list with O(1) push/pop/erase/splice
//! - `map`: red-black tree ordered by a caller-supplied comparator
//! - `misc`: monotonic clock and binary substring search
//!
//! Neither container is thread-safe. Each instance has one mutating thread;
//! cross-thread handoff belongs to the runtime's async bridge.

pub mod list;
pub mod map;
pub mod misc;

pub use list::{List, ListNode};
pub use map::{MapNode, OrderedMap};
pub use misc::{hrtime, search};

/// Recover a pointer to the record that embeds a link node.
///
/// `container_of!(ptr, Type, field)` takes a `NonNull` to the `field` of a
/// `Type` and yields `NonNull<Type>`.
///
/// # Safety
/// Must be expanded inside `unsafe`: `ptr` must really point at the `field`
/// of a live `Type`, and must carry provenance over the whole record (derive
/// it with `&raw mut (*record).field`, not from a reference to the field).
#[macro_export]
macro_rules! container_of {
    ($ptr:expr, $Container:ty, $field:ident) => {
        ($ptr)
            .byte_sub(::core::mem::offset_of!($Container, $field))
            .cast::<$Container>()
    };
}
