//! Arena allocation for tree nodes.
//!
//! Provides `NodeId` (a dense, total-orderable handle), `NodeArena`
//! (contiguous storage with free-list reuse) and `ParentSets` (union-find
//! over child sets). Sibling links inside the tree are plain `NodeId`
//! fields, so restructuring is handle reassignment and there are no
//! ownership cycles.
//!
//! # Determinism
//! - `NodeId` ordering is by its inner `u32`.
//! - Iteration order over slots is by index (0..capacity).
//! - Free-list reuse is LIFO, so the same sequence of allocations and
//!   deallocations always hands out the same handles.

use std::fmt;
use std::ops::{Index, IndexMut};

/// Dense node handle for arena-allocated trees.
///
/// `NodeId(u32)` is `Copy`, `Eq`, `Ord`, `Hash`. The inner value is an
/// index into the arena's slot array.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

impl NodeId {
    /// Creates a new `NodeId` from a raw `u32`.
    ///
    /// The caller must ensure the index refers to a live slot of the arena
    /// it is used with; stale handles are rejected by [`NodeArena::get`].
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw `u32` index.
    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    #[inline]
    const fn slot(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Slot in the node arena.
#[derive(Debug, Clone)]
struct NodeSlot<T> {
    data: Option<T>,
    next_free: Option<u32>, // index of next free slot, if any
}

/// Contiguous storage for node data with free-list reuse.
#[derive(Debug, Clone)]
pub struct NodeArena<T> {
    slots: Vec<NodeSlot<T>>,
    free_list_head: Option<u32>,
    /// Number of live nodes (slots with `data.is_some()`).
    live_count: usize,
}

impl<T> NodeArena<T> {
    /// Creates a new empty arena.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty arena with room for `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list_head: None,
            live_count: 0,
        }
    }

    /// Allocates a new slot and returns its `NodeId`.
    ///
    /// If a free slot is available, reuses it; otherwise pushes a new slot.
    pub fn allocate(&mut self, data: T) -> NodeId {
        self.live_count += 1;
        if let Some(idx) = self.free_list_head {
            let slot = &mut self.slots[idx as usize];
            debug_assert!(slot.data.is_none(), "free slot should have no data");
            self.free_list_head = slot.next_free;
            slot.data = Some(data);
            slot.next_free = None;
            NodeId(idx)
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(NodeSlot {
                data: Some(data),
                next_free: None,
            });
            NodeId(idx)
        }
    }

    /// Deallocates the slot identified by `id` and returns its data.
    ///
    /// Returns `None` if the slot does not exist or is already free. The
    /// slot is pushed onto the free list for future reuse.
    pub fn deallocate(&mut self, id: NodeId) -> Option<T> {
        let slot = self.slots.get_mut(id.slot())?;
        let data = slot.data.take()?;
        slot.next_free = self.free_list_head;
        self.free_list_head = Some(id.as_u32());
        self.live_count -= 1;
        Some(data)
    }

    /// Returns a reference to the data stored at `id`, if present.
    pub fn get(&self, id: NodeId) -> Option<&T> {
        self.slots.get(id.slot()).and_then(|slot| slot.data.as_ref())
    }

    /// Returns a mutable reference to the data stored at `id`, if present.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.slots
            .get_mut(id.slot())
            .and_then(|slot| slot.data.as_mut())
    }

    /// Returns `true` if `id` refers to a live slot.
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Returns the number of live nodes (slots with data).
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    /// Returns the total capacity (number of slots, including free ones).
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Iterates over all live nodes in deterministic order (by index).
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.data.as_ref().map(|data| (NodeId(idx as u32), data)))
    }
}

impl<T> Default for NodeArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Indexing panics on a stale handle. Tree code only indexes handles it
/// reached through live parent/child links.
impl<T> Index<NodeId> for NodeArena<T> {
    type Output = T;

    fn index(&self, id: NodeId) -> &T {
        match self.get(id) {
            Some(data) => data,
            None => panic!("stale {id} used to index the node arena"),
        }
    }
}

impl<T> IndexMut<NodeId> for NodeArena<T> {
    fn index_mut(&mut self, id: NodeId) -> &mut T {
        match self.get_mut(id) {
            Some(data) => data,
            None => panic!("stale {id} used to index the node arena"),
        }
    }
}

/// Handle of a child set in [`ParentSets`].
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetId(u32);

/// Union-find over child sets.
///
/// Every inner node owns one set, and its children record that set rather
/// than the node. Absorbing one node's children into another node is then
/// a single union: the moved children are never visited.
///
/// Union is by size, so an uncompressed lookup walks O(log n) links;
/// [`owner_compressing`](Self::owner_compressing) also flattens the path.
#[derive(Debug, Clone, Default)]
pub struct ParentSets {
    link: Vec<u32>,
    size: Vec<u32>,
    /// Owning node, valid at representatives only.
    owner: Vec<Option<NodeId>>,
}

impl ParentSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a singleton set owned by `owner`.
    pub fn create(&mut self, owner: NodeId) -> SetId {
        let id = self.link.len() as u32;
        self.link.push(id);
        self.size.push(1);
        self.owner.push(Some(owner));
        SetId(id)
    }

    fn representative(&self, set: SetId) -> Option<u32> {
        let mut current = set.0;
        loop {
            let next = *self.link.get(current as usize)?;
            if next == current {
                return Some(current);
            }
            current = next;
        }
    }

    /// Node owning the set that contains `set`, if it is still live.
    pub fn owner(&self, set: SetId) -> Option<NodeId> {
        let root = self.representative(set)?;
        self.owner[root as usize]
    }

    /// Same as [`owner`](Self::owner), pointing every set on the walked path
    /// straight at the representative.
    pub fn owner_compressing(&mut self, set: SetId) -> Option<NodeId> {
        let root = self.representative(set)?;
        let mut current = set.0;
        while current != root {
            let next = self.link[current as usize];
            self.link[current as usize] = root;
            current = next;
        }
        self.owner[root as usize]
    }

    /// Unites `absorbed` with `into`. The union keeps the owner of `into`.
    pub fn absorb(&mut self, absorbed: SetId, into: SetId) {
        let (Some(a), Some(b)) = (self.representative(absorbed), self.representative(into)) else {
            return;
        };
        if a == b {
            return;
        }
        let owner = self.owner[b as usize];
        let (big, small) = if self.size[a as usize] >= self.size[b as usize] {
            (a, b)
        } else {
            (b, a)
        };
        self.link[small as usize] = big;
        self.size[big as usize] += self.size[small as usize];
        self.owner[small as usize] = None;
        self.owner[big as usize] = owner;
    }

    /// Detaches the set from its owner, which is being freed.
    pub fn retire(&mut self, set: SetId) {
        if let Some(root) = self.representative(set) {
            self.owner[root as usize] = None;
        }
    }

    /// Number of sets ever created.
    pub fn len(&self) -> usize {
        self.link.len()
    }

    pub fn is_empty(&self) -> bool {
        self.link.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_basic() {
        let mut arena: NodeArena<&'static str> = NodeArena::new();
        assert_eq!(arena.live_count(), 0);
        assert_eq!(arena.capacity(), 0);

        let id1 = arena.allocate("hello");
        assert_eq!(id1.as_u32(), 0);
        assert_eq!(arena.live_count(), 1);
        assert_eq!(arena.get(id1), Some(&"hello"));

        let id2 = arena.allocate("world");
        assert_eq!(id2.as_u32(), 1);
        assert_eq!(arena.live_count(), 2);

        assert_eq!(arena.deallocate(id1), Some("hello"));
        assert_eq!(arena.live_count(), 1);
        assert_eq!(arena.get(id1), None);
        assert_eq!(arena.deallocate(id1), None);

        let id3 = arena.allocate("reused");
        assert_eq!(id3.as_u32(), 0); // reused freed slot
        assert_eq!(arena.live_count(), 2);
        assert_eq!(arena[id3], "reused");
    }

    #[test]
    fn deterministic_iteration() {
        let mut arena: NodeArena<i32> = NodeArena::new();
        let ids: Vec<_> = (0..5).map(|i| arena.allocate(i)).collect();
        arena.deallocate(ids[1]);
        arena.deallocate(ids[3]);
        // Free slots are reused in LIFO order.
        let _id_new1 = arena.allocate(100);
        let _id_new2 = arena.allocate(200);
        let collected: Vec<_> = arena.iter().map(|(id, &val)| (id.as_u32(), val)).collect();
        assert_eq!(collected, vec![(0, 0), (1, 200), (2, 2), (3, 100), (4, 4)]);
    }

    #[test]
    fn absorbed_sets_resolve_to_the_surviving_owner() {
        let (a, b, c) = (NodeId::new(0), NodeId::new(1), NodeId::new(2));
        let mut sets = ParentSets::new();
        let sa = sets.create(a);
        let sb = sets.create(b);
        let sc = sets.create(c);
        assert_eq!(sets.owner(sb), Some(b));

        sets.absorb(sb, sa);
        assert_eq!(sets.owner(sb), Some(a));
        assert_eq!(sets.owner(sa), Some(a));

        // `c` absorbs the union: both earlier sets now resolve to `c`,
        // whichever representative union by size picked.
        sets.absorb(sa, sc);
        assert_eq!(sets.owner_compressing(sb), Some(c));
        assert_eq!(sets.owner(sa), Some(c));
        assert_eq!(sets.owner(sc), Some(c));
        assert_eq!(sets.len(), 3);

        sets.retire(sc);
        assert_eq!(sets.owner(sa), None);
    }

    #[test]
    #[should_panic(expected = "stale NodeId(7)")]
    fn indexing_a_stale_handle_panics() {
        let arena: NodeArena<()> = NodeArena::new();
        let _ = arena[NodeId::new(7)];
    }
}
