//! Intrusive recency list.
//!
//! Every size class keeps its linked items on a doubly linked list ordered
//! from most recently used (head) to least recently used (tail). The list does
//! not own its nodes: the `prev`/`next` links live inside each item's metadata
//! and point at other items by [`ItemId`]. The list itself only tracks the two
//! ends and the length, and every operation takes the [`Arena`] holding the
//! links.
//!
//! ```text
//!   head                                          tail
//!    |                                              |
//!    v                                              v
//!  [MRU] <--> [ ] <--> [ ] <--> ... <--> [ ] <--> [LRU]
//! ```

use core::fmt;

use crate::item::ItemId;

/// Previous and next neighbours of an item on its recency list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Link {
    pub(crate) prev: Option<ItemId>,
    pub(crate) next: Option<ItemId>,
}

/// Storage that holds the [`Link`] of every item.
pub(crate) trait Arena {
    fn link(&self, id: ItemId) -> &Link;
    fn link_mut(&mut self, id: ItemId) -> &mut Link;
}

/// A doubly linked list threaded through an [`Arena`].
///
/// The caller is responsible for only attaching items that are not on any
/// list, and only detaching items that are on this one.
#[derive(Default, Clone)]
pub(crate) struct List {
    head: Option<ItemId>,
    tail: Option<ItemId>,
    len: usize,
}

impl List {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the current number of items in the list.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the list contains no items.
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Most recently used item.
    pub(crate) fn head(&self) -> Option<ItemId> {
        self.head
    }

    /// Least recently used item.
    pub(crate) fn tail(&self) -> Option<ItemId> {
        self.tail
    }

    /// Attaches `id` at the head, making it the most recently used item.
    pub(crate) fn attach<A: Arena>(&mut self, arena: &mut A, id: ItemId) {
        let old_head = self.head;
        *arena.link_mut(id) = Link {
            prev: None,
            next: old_head,
        };
        match old_head {
            Some(head) => arena.link_mut(head).prev = Some(id),
            None => self.tail = Some(id),
        }
        self.head = Some(id);
        self.len += 1;
    }

    /// Unlinks `id` from the list and clears its links.
    pub(crate) fn detach<A: Arena>(&mut self, arena: &mut A, id: ItemId) {
        let Link { prev, next } = *arena.link(id);
        match prev {
            Some(prev) => arena.link_mut(prev).next = next,
            None => {
                assert_eq!(self.head, Some(id), "detaching {id:?} not on this list");
                self.head = next;
            }
        }
        match next {
            Some(next) => arena.link_mut(next).prev = prev,
            None => {
                assert_eq!(self.tail, Some(id), "detaching {id:?} not on this list");
                self.tail = prev;
            }
        }
        *arena.link_mut(id) = Link::default();
        self.len -= 1;
    }

    /// Moves `id` to the head of the list.
    pub(crate) fn move_to_front<A: Arena>(&mut self, arena: &mut A, id: ItemId) {
        if self.head == Some(id) {
            return;
        }
        self.detach(arena, id);
        self.attach(arena, id);
    }

    /// Iterates from the least recently used item towards the head.
    pub(crate) fn iter_rev<'a, A: Arena>(&self, arena: &'a A) -> RevIter<'a, A> {
        RevIter {
            arena,
            cursor: self.tail,
        }
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("List")
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("length", &self.len)
            .finish()
    }
}

/// Tail to head iterator returned by [`List::iter_rev`].
pub(crate) struct RevIter<'a, A> {
    arena: &'a A,
    cursor: Option<ItemId>,
}

impl<A: Arena> Iterator for RevIter<'_, A> {
    type Item = ItemId;

    fn next(&mut self) -> Option<ItemId> {
        let id = self.cursor?;
        self.cursor = self.arena.link(id).prev;
        Some(id)
    }
}
