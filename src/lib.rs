//! # avl-rs
//!
//! An ordered map backed by an AVL-balanced binary search tree.
//!
//! Nodes live in a slot arena and link to their children through 32-bit
//! handles, so every node has exactly one owner and rotations only rewrite
//! handles. Besides the usual map operations the tree answers k-th largest
//! queries with a threaded (Morris) traversal that needs no stack.
//!
//! ## Example
//!
//! ```rust
//! use avl_rs::{AvlTree, TreeError};
//!
//! let mut tree: AvlTree<u32, &str> = AvlTree::new();
//! tree.insert(15, "A").unwrap();
//! tree.insert(10, "B").unwrap();
//! tree.insert(20, "C").unwrap();
//!
//! assert_eq!(tree.insert(10, "D"), Err(TreeError::DuplicateKey));
//! assert_eq!(tree.get(&10), Some(&"B"));
//! assert_eq!(tree.kth_largest(1), Some((&20, &"C")));
//! assert_eq!(tree.remove(&15), Ok("A"));
//! assert_eq!(tree.len(), 2);
//! ```

mod error;

pub use error::TreeError;

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::iter::FusedIterator;

use tracing::{debug, trace};

// =============================================================================
// Pointer type
// =============================================================================

/// Handle to a slot in the node arena.
///
/// - `NULL` (all ones) marks an absent child.
/// - Any other value is the slot index of a live node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Ptr(u32);

impl Ptr {
    const NULL: Ptr = Ptr(u32::MAX);

    #[inline]
    fn new(idx: usize) -> Self {
        debug_assert!(idx < u32::MAX as usize, "node arena exhausted");
        Self(idx as u32)
    }

    #[inline]
    fn is_null(self) -> bool {
        self == Self::NULL
    }

    #[inline]
    fn idx(self) -> usize {
        debug_assert!(!self.is_null());
        self.0 as usize
    }
}

// =============================================================================
// Node arena
// =============================================================================

#[derive(Clone)]
struct Node<K, V> {
    key: K,
    value: V,
    /// Cached subtree height; a leaf has height 1.
    height: u8,
    left: Ptr,
    right: Ptr,
}

/// Slot arena owning every node of a tree, with a free list of vacated slots.
#[derive(Clone)]
struct NodeArena<K, V> {
    slots: Vec<Option<Node<K, V>>>,
    free: Vec<u32>,
}

impl<K, V> NodeArena<K, V> {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn with_capacity(n: usize) -> Self {
        Self {
            slots: Vec::with_capacity(n),
            free: Vec::new(),
        }
    }

    fn capacity(&self) -> usize {
        self.slots.capacity() * std::mem::size_of::<Option<Node<K, V>>>()
            + self.free.capacity() * std::mem::size_of::<u32>()
    }

    fn shrink_to_fit(&mut self) {
        self.slots.shrink_to_fit();
        self.free.shrink_to_fit();
    }

    fn push(&mut self, node: Node<K, V>) -> Ptr {
        if let Some(idx) = self.free.pop() {
            debug_assert!(self.slots[idx as usize].is_none());
            self.slots[idx as usize] = Some(node);
            Ptr(idx)
        } else {
            let ptr = Ptr::new(self.slots.len());
            self.slots.push(Some(node));
            ptr
        }
    }

    fn alloc_leaf(&mut self, key: K, value: V) -> Ptr {
        self.push(Node {
            key,
            value,
            height: 1,
            left: Ptr::NULL,
            right: Ptr::NULL,
        })
    }

    /// Vacate a slot and hand back the node it held.
    fn free_node(&mut self, ptr: Ptr) -> Node<K, V> {
        match self.slots[ptr.idx()].take() {
            Some(node) => {
                self.free.push(ptr.0);
                node
            }
            None => unreachable!("double free of node slot {}", ptr.0),
        }
    }

    #[inline]
    fn node(&self, ptr: Ptr) -> &Node<K, V> {
        match &self.slots[ptr.idx()] {
            Some(node) => node,
            None => unreachable!("dangling node handle {}", ptr.0),
        }
    }

    #[inline]
    fn node_mut(&mut self, ptr: Ptr) -> &mut Node<K, V> {
        match &mut self.slots[ptr.idx()] {
            Some(node) => node,
            None => unreachable!("dangling node handle {}", ptr.0),
        }
    }

    #[inline]
    fn left(&self, ptr: Ptr) -> Ptr {
        self.node(ptr).left
    }

    #[inline]
    fn right(&self, ptr: Ptr) -> Ptr {
        self.node(ptr).right
    }

    #[inline]
    fn set_left(&mut self, ptr: Ptr, child: Ptr) {
        self.node_mut(ptr).left = child;
    }

    #[inline]
    fn set_right(&mut self, ptr: Ptr, child: Ptr) {
        self.node_mut(ptr).right = child;
    }

    /// Cached height, 0 for an absent node.
    #[inline]
    fn height(&self, ptr: Ptr) -> u8 {
        if ptr.is_null() {
            0
        } else {
            self.node(ptr).height
        }
    }

    /// `height(right) - height(left)`, 0 for an absent node.
    #[inline]
    fn balance(&self, ptr: Ptr) -> i32 {
        if ptr.is_null() {
            return 0;
        }
        let node = self.node(ptr);
        i32::from(self.height(node.right)) - i32::from(self.height(node.left))
    }

    /// Refresh the cached height from the children's cached heights.
    #[inline]
    fn update_height(&mut self, ptr: Ptr) {
        let node = self.node(ptr);
        let h = 1 + self.height(node.left).max(self.height(node.right));
        self.node_mut(ptr).height = h;
    }

    /// Exchange the key/value payloads of two distinct live nodes, leaving
    /// links and heights in place.
    fn swap_entries(&mut self, a: Ptr, b: Ptr) {
        debug_assert_ne!(a, b);
        let (lo, hi) = if a.idx() < b.idx() {
            (a.idx(), b.idx())
        } else {
            (b.idx(), a.idx())
        };
        let (head, tail) = self.slots.split_at_mut(hi);
        match (head[lo].as_mut(), tail[0].as_mut()) {
            (Some(x), Some(y)) => {
                std::mem::swap(&mut x.key, &mut y.key);
                std::mem::swap(&mut x.value, &mut y.value);
            }
            _ => unreachable!("swap_entries on a vacant slot"),
        }
    }
}

// =============================================================================
// AvlTree
// =============================================================================

/// An ordered map kept height-balanced by AVL rotations.
///
/// Keys are unique: inserting a present key fails with
/// [`TreeError::DuplicateKey`] instead of overwriting. Insert and remove run
/// in O(log n); [`AvlTree::kth_largest`] runs in O(n) time and O(1) extra
/// space.
#[derive(Clone)]
pub struct AvlTree<K, V> {
    nodes: NodeArena<K, V>,
    root: Ptr,
    count: usize,
}

impl<K, V> AvlTree<K, V> {
    pub fn new() -> Self {
        Self {
            nodes: NodeArena::new(),
            root: Ptr::NULL,
            count: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Height of the tree: 0 when empty, 1 for a single node.
    #[inline]
    pub fn height(&self) -> usize {
        usize::from(self.nodes.height(self.root))
    }

    pub fn memory_usage(&self) -> usize {
        self.nodes.capacity()
    }

    pub fn shrink_to_fit(&mut self) {
        self.nodes.shrink_to_fit();
    }

    pub fn clear(&mut self) {
        self.nodes = NodeArena::new();
        self.root = Ptr::NULL;
        self.count = 0;
    }

    /// Rebuild the node arena with live nodes laid out in pre-order and no
    /// vacant slots.
    ///
    /// Removals leave holes that later insertions refill one by one; this
    /// drops them all at once. Returns the number of nodes rewritten.
    pub fn compact(&mut self) -> usize {
        let mut old = std::mem::replace(&mut self.nodes, NodeArena::with_capacity(self.count));
        self.root = Self::compact_subtree(&mut old, &mut self.nodes, self.root);
        debug!(
            nodes = self.count,
            freed_slots = old.slots.len() - self.count,
            "compacted node arena"
        );
        self.count
    }

    fn compact_subtree(old: &mut NodeArena<K, V>, new: &mut NodeArena<K, V>, ptr: Ptr) -> Ptr {
        if ptr.is_null() {
            return Ptr::NULL;
        }
        let Node {
            key,
            value,
            height,
            left,
            right,
        } = old.free_node(ptr);
        let at = new.push(Node {
            key,
            value,
            height,
            left: Ptr::NULL,
            right: Ptr::NULL,
        });
        let left = Self::compact_subtree(old, new, left);
        let right = Self::compact_subtree(old, new, right);
        new.set_left(at, left);
        new.set_right(at, right);
        at
    }

    /// Ascending iterator over `(key, value)` pairs.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut iter = Iter {
            nodes: &self.nodes,
            stack: Vec::new(),
            remaining: self.count,
        };
        iter.push_left_spine(self.root);
        iter
    }

    pub fn first_key_value(&self) -> Option<(&K, &V)> {
        if self.root.is_null() {
            return None;
        }
        let node = self.nodes.node(self.get_minimal(self.root));
        Some((&node.key, &node.value))
    }

    pub fn last_key_value(&self) -> Option<(&K, &V)> {
        if self.root.is_null() {
            return None;
        }
        let node = self.nodes.node(self.get_maximal(self.root));
        Some((&node.key, &node.value))
    }

    // -------------------------------------------------------------------------
    // Binary search tree primitives
    // -------------------------------------------------------------------------

    #[inline]
    fn is_leaf(&self, ptr: Ptr) -> bool {
        let node = self.nodes.node(ptr);
        node.left.is_null() && node.right.is_null()
    }

    /// Leftmost node of the subtree rooted at `current`, which must be non-null.
    fn get_minimal(&self, mut current: Ptr) -> Ptr {
        debug_assert!(!current.is_null(), "minimum of an empty subtree");
        loop {
            let left = self.nodes.left(current);
            if left.is_null() {
                return current;
            }
            current = left;
        }
    }

    fn get_maximal(&self, mut current: Ptr) -> Ptr {
        debug_assert!(!current.is_null(), "maximum of an empty subtree");
        loop {
            let right = self.nodes.right(current);
            if right.is_null() {
                return current;
            }
            current = right;
        }
    }

    /// In-order successor of a node that has a right child.
    fn get_successor(&self, ptr: Ptr) -> Ptr {
        let right = self.nodes.right(ptr);
        debug_assert!(!right.is_null(), "successor lookup needs a right subtree");
        self.get_minimal(right)
    }

    // -------------------------------------------------------------------------
    // AVL balancing
    // -------------------------------------------------------------------------

    //      current                        child
    //     /       \                      /     \
    // l-tree     child      ---->   current    r-tree
    //           /     \             /     \
    //       center   r-tree     l-tree   center
    fn rotate_left(&mut self, current: Ptr) -> Ptr {
        let child = self.nodes.right(current);
        debug_assert!(!child.is_null(), "left rotation needs a right child");
        let center = self.nodes.left(child);
        self.nodes.set_left(child, current);
        self.nodes.set_right(current, center);
        // `current` is now below `child`, so its height goes first.
        self.nodes.update_height(current);
        self.nodes.update_height(child);
        trace!(
            from = current.0,
            to = child.0,
            height = self.nodes.height(child),
            "rotate left"
        );
        child
    }

    //          current                  child
    //         /       \                /     \
    //      child     r-tree  ---->  l-tree  current
    //     /     \                           /     \
    // l-tree   center                   center   r-tree
    fn rotate_right(&mut self, current: Ptr) -> Ptr {
        let child = self.nodes.left(current);
        debug_assert!(!child.is_null(), "right rotation needs a left child");
        let center = self.nodes.right(child);
        self.nodes.set_right(child, current);
        self.nodes.set_left(current, center);
        self.nodes.update_height(current);
        self.nodes.update_height(child);
        trace!(
            from = current.0,
            to = child.0,
            height = self.nodes.height(child),
            "rotate right"
        );
        child
    }

    /// Restore the AVL bound at `current`, whose children are already
    /// balanced and whose cached height is fresh. Returns the subtree root.
    fn rebalance(&mut self, current: Ptr) -> Ptr {
        let balance = self.nodes.balance(current);
        if balance >= 2 {
            let child = self.nodes.right(current);
            if self.nodes.height(self.nodes.left(child)) > self.nodes.height(self.nodes.right(child)) {
                trace!(node = current.0, balance, "right-left case");
                let right = self.rotate_right(child);
                self.nodes.set_right(current, right);
            }
            return self.rotate_left(current);
        }
        if balance <= -2 {
            let child = self.nodes.left(current);
            if self.nodes.height(self.nodes.right(child)) > self.nodes.height(self.nodes.left(child)) {
                trace!(node = current.0, balance, "left-right case");
                let left = self.rotate_left(child);
                self.nodes.set_left(current, left);
            }
            return self.rotate_right(current);
        }
        current
    }
}

impl<K: Ord, V> AvlTree<K, V> {
    fn search<Q>(&self, key: &Q) -> Ptr
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut current = self.root;
        while !current.is_null() {
            let node = self.nodes.node(current);
            match key.cmp(node.key.borrow()) {
                Ordering::Less => current = node.left,
                Ordering::Greater => current = node.right,
                Ordering::Equal => return current,
            }
        }
        Ptr::NULL
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get_key_value(key).map(|(_, v)| v)
    }

    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let ptr = self.search(key);
        if ptr.is_null() {
            return None;
        }
        let node = self.nodes.node(ptr);
        Some((&node.key, &node.value))
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let ptr = self.search(key);
        if ptr.is_null() {
            return None;
        }
        Some(&mut self.nodes.node_mut(ptr).value)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        !self.search(key).is_null()
    }

    /// Insert a new key. Fails with [`TreeError::DuplicateKey`] if the key is
    /// already present, in which case the tree is left untouched.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), TreeError> {
        self.root = self.insert_at(self.root, key, value)?;
        Ok(())
    }

    fn insert_at(&mut self, current: Ptr, key: K, value: V) -> Result<Ptr, TreeError> {
        if current.is_null() {
            self.count += 1;
            return Ok(self.nodes.alloc_leaf(key, value));
        }

        // Links are rewired only after the recursive call succeeds, so a
        // duplicate leaves every ancestor as it was.
        match key.cmp(&self.nodes.node(current).key) {
            Ordering::Less => {
                let left = self.nodes.left(current);
                let left = self.insert_at(left, key, value)?;
                self.nodes.set_left(current, left);
            }
            Ordering::Greater => {
                let right = self.nodes.right(current);
                let right = self.insert_at(right, key, value)?;
                self.nodes.set_right(current, right);
            }
            Ordering::Equal => {
                debug!(len = self.count, "rejected insert of duplicate key");
                return Err(TreeError::DuplicateKey);
            }
        }

        self.nodes.update_height(current);
        Ok(self.rebalance(current))
    }

    /// Remove a key and return its value. Fails with
    /// [`TreeError::KeyNotFound`] if the key is absent.
    pub fn remove<Q>(&mut self, key: &Q) -> Result<V, TreeError>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let (root, value) = self.remove_at(self.root, key).inspect_err(|_| {
            debug!(len = self.count, "rejected remove of missing key");
        })?;
        self.root = root;
        Ok(value)
    }

    fn remove_at<Q>(&mut self, current: Ptr, key: &Q) -> Result<(Ptr, V), TreeError>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        if current.is_null() {
            return Err(TreeError::KeyNotFound);
        }

        let removed = match key.cmp(self.nodes.node(current).key.borrow()) {
            Ordering::Less => {
                let left = self.nodes.left(current);
                let (left, value) = self.remove_at(left, key)?;
                self.nodes.set_left(current, left);
                value
            }
            Ordering::Greater => {
                let right = self.nodes.right(current);
                let (right, value) = self.remove_at(right, key)?;
                self.nodes.set_right(current, right);
                value
            }
            Ordering::Equal => {
                if self.is_leaf(current) {
                    let node = self.nodes.free_node(current);
                    self.count -= 1;
                    return Ok((Ptr::NULL, node.value));
                }

                let (left, right) = (self.nodes.left(current), self.nodes.right(current));
                if left.is_null() || right.is_null() {
                    // One child: splice it into our place.
                    let node = self.nodes.free_node(current);
                    self.count -= 1;
                    let child = if left.is_null() { right } else { left };
                    return Ok((child, node.value));
                }

                // Two children: move the successor's entry up here. The
                // doomed entry lands in the successor's slot, the minimum of
                // the right subtree, where it still orders before every other
                // key, so the same search key finds it again on the way down.
                let succ = self.get_successor(current);
                self.nodes.swap_entries(current, succ);
                let (right, value) = self.remove_at(right, key)?;
                self.nodes.set_right(current, right);
                value
            }
        };

        self.nodes.update_height(current);
        Ok((self.rebalance(current), removed))
    }

    // -------------------------------------------------------------------------
    // Order statistics
    // -------------------------------------------------------------------------

    /// Entry holding the k-th largest key (`k = 1` is the maximum).
    ///
    /// Returns `None` when `k` is 0 or exceeds [`AvlTree::len`]. Walks the
    /// tree in descending order with temporary threads through empty left
    /// links, which is why it needs `&mut self`; every thread is removed
    /// again before the call returns.
    pub fn kth_largest(&mut self, k: usize) -> Option<(&K, &V)> {
        if k == 0 || k > self.count {
            return None;
        }

        let mut current = self.root;
        let mut visited = 0usize;
        let mut found = Ptr::NULL;

        while !current.is_null() {
            let right = self.nodes.right(current);
            if right.is_null() {
                visited += 1;
                if visited == k {
                    found = current;
                }
                current = self.nodes.left(current);
                continue;
            }

            // The node visited just before `current` in descending order is
            // the leftmost node of its right subtree.
            let mut prev = right;
            loop {
                let left = self.nodes.left(prev);
                if left.is_null() || left == current {
                    break;
                }
                prev = left;
            }

            if self.nodes.left(prev).is_null() {
                self.nodes.set_left(prev, current);
                current = right;
            } else {
                self.nodes.set_left(prev, Ptr::NULL);
                visited += 1;
                if visited == k {
                    found = current;
                }
                current = self.nodes.left(current);
            }
        }

        debug_assert_eq!(visited, self.count);
        if found.is_null() {
            return None;
        }
        let node = self.nodes.node(found);
        Some((&node.key, &node.value))
    }
}

// =============================================================================
// Debug rendering
// =============================================================================

impl<K: fmt::Debug, V: fmt::Debug> AvlTree<K, V> {
    /// Render the tree sideways, right subtree on top, one node per line
    /// with its cached height `h` and balance factor `b`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.root.is_null() {
            out.push_str("(empty)\n");
        } else {
            self.render_node(&mut out, self.root, 0);
        }
        out
    }

    fn render_node(&self, out: &mut String, ptr: Ptr, depth: usize) {
        if ptr.is_null() {
            return;
        }
        let node = self.nodes.node(ptr);
        self.render_node(out, node.right, depth + 1);
        out.push_str(&format!(
            "{}{:?}: {:?} (h={}, b={})\n",
            "    ".repeat(depth),
            node.key,
            node.value,
            node.height,
            self.nodes.balance(ptr)
        ));
        self.render_node(out, node.left, depth + 1);
    }

    /// Print the tree structure for debugging.
    pub fn debug_print(&self) {
        println!("=== AVL tree ===");
        println!("Size: {}", self.count);
        print!("{}", self.render());
        println!("================");
    }
}

impl<K, V> Default for AvlTree<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for AvlTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<'a, K, V> IntoIterator for &'a AvlTree<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// =============================================================================
// Iteration
// =============================================================================

/// Ascending in-order iterator, created by [`AvlTree::iter`].
pub struct Iter<'a, K, V> {
    nodes: &'a NodeArena<K, V>,
    /// Nodes whose left subtree is done but which are not yet yielded.
    stack: Vec<Ptr>,
    remaining: usize,
}

impl<'a, K, V> Iter<'a, K, V> {
    fn push_left_spine(&mut self, mut ptr: Ptr) {
        while !ptr.is_null() {
            self.stack.push(ptr);
            ptr = self.nodes.left(ptr);
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let ptr = self.stack.pop()?;
        let nodes = self.nodes;
        let node = nodes.node(ptr);
        self.push_left_spine(node.right);
        self.remaining -= 1;
        Some((&node.key, &node.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<K, V> FusedIterator for Iter<'_, K, V> {}


#[cfg(test)]
mod proptests;
