//! Position records: one `LowNode` per position in the DAG.
//!
//! A low node carries everything intrinsic to a position — the cached
//! neural evaluation, the candidate edges, the total visit statistics —
//! while the path-intrinsic state lives in the [`Node`]s pointing at it.
//! Transpositions are exactly the case of several nodes sharing one low
//! node; `num_parents` counts them and gates eviction.
//!
//! Child storage is a single logical array of `num_edges` slots indexed by
//! edge index. The first [`STATIC_CHILDREN`] slots are inline (the common
//! fan-out of a descent touches only those, keeping the hot path inside the
//! low node's own cache lines); the rest live in one lazily-allocated block
//! published under a CAS on `allocated_children`.

use std::fmt;
use std::sync::atomic::{AtomicPtr, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};

use engine_board::{GameResult, MoveList};

use crate::edge::Edge;
use crate::eval::NNEval;
use crate::node::{
    pack_flags, result_from_bits, terminal_from_bits, Bounds, Node, Terminal, DEFAULT_FLAGS,
    LOWER_SHIFT, TRANSPOSITION_BIT, UPPER_SHIFT,
};

/// Number of child slots stored inline.
pub const STATIC_CHILDREN: usize = 2;

/// Per-position record, shared by every path that reaches the position.
pub struct LowNode {
    /// Inline slots for the first two edge indices.
    static_children: [Node; STATIC_CHILDREN],
    /// Mean W minus L over all visits of the position, f64 bits.
    wl: AtomicU64,
    /// Owned edge array of length `num_edges`; null until the first
    /// expansion. Kept as a raw pointer so the whole record stays within
    /// two cache lines.
    edges: *mut Edge,
    /// Lazily-allocated block of `num_edges - STATIC_CHILDREN` slots.
    dynamic_children: AtomicPtr<Node>,
    /// Mean draw probability, f32 bits.
    d: AtomicU32,
    /// Mean expected remaining plies, f32 bits.
    m: AtomicU32,
    /// Completed visits of the position, over all parents.
    n: AtomicU32,
    /// Descents currently in progress through the position.
    n_in_flight: AtomicU32,
    /// Child slots allocated so far; grows monotonically under CAS.
    allocated_children: AtomicU16,
    /// Nodes currently referencing this low node.
    num_parents: AtomicU16,
    /// Length of `edges`.
    num_edges: u8,
    /// Terminal type, bounds and the sticky transposition bit, packed.
    flags: AtomicU8,
}

// Safety: shared state is atomic; `edges` is written only before the low
// node is published to other threads (construction / set_nn_eval under
// exclusive access) and immutable afterwards, except for pre-visit prior
// mutation which the sorting/noise preconditions (n == 0, no realised
// children) make exclusive.
unsafe impl Send for LowNode {}
unsafe impl Sync for LowNode {}

const _: () = assert!(
    std::mem::size_of::<LowNode>() <= 128,
    "LowNode spills its two cache lines"
);

impl Default for LowNode {
    fn default() -> Self {
        LowNode {
            static_children: [Node::default(), Node::default()],
            wl: AtomicU64::new(0f64.to_bits()),
            edges: std::ptr::null_mut(),
            dynamic_children: AtomicPtr::new(std::ptr::null_mut()),
            d: AtomicU32::new(0f32.to_bits()),
            m: AtomicU32::new(0f32.to_bits()),
            n: AtomicU32::new(0),
            n_in_flight: AtomicU32::new(0),
            allocated_children: AtomicU16::new(STATIC_CHILDREN as u16),
            num_parents: AtomicU16::new(0),
            num_edges: 0,
            flags: AtomicU8::new(DEFAULT_FLAGS),
        }
    }
}

impl LowNode {
    /// An empty low node awaiting its first evaluation.
    pub fn new() -> Self {
        Self::default()
    }

    /// A low node with zero-prior edges for `moves` and no evaluation.
    pub fn from_moves(moves: &MoveList) -> Self {
        let mut low = Self::default();
        low.install_edges(Edge::from_movelist(moves));
        low
    }

    /// Like [`from_moves`](Self::from_moves), but also realise the child at
    /// `index`.
    pub fn from_moves_with_child(moves: &MoveList, index: u16) -> Self {
        let low = Self::from_moves(moves);
        low.insert_child_at(index);
        low
    }

    /// Copy another low node's evaluation and edges into a fresh record.
    /// Statistics, children and parents start clean; the clone is meant for
    /// the non-shareable pool where its priors can be perturbed.
    pub fn clone_for_eval(&self) -> Self {
        assert!(!self.edges.is_null(), "cloning an unevaluated low node");
        let mut low = Self::default();
        low.install_edges(self.edges().to_vec().into_boxed_slice());
        low.wl.store(self.wl.load(Ordering::Relaxed), Ordering::Relaxed);
        low.d.store(self.d.load(Ordering::Relaxed), Ordering::Relaxed);
        low.m.store(self.m.load(Ordering::Relaxed), Ordering::Relaxed);
        low
    }

    fn install_edges(&mut self, edges: Box<[Edge]>) {
        debug_assert!(self.edges.is_null());
        assert!(edges.len() <= u8::MAX as usize, "more edges than a position can have");
        self.num_edges = edges.len() as u8;
        self.edges = Box::into_raw(edges) as *mut Edge;
    }

    /// Install the evaluator's output: edge array (deep copy), priors and
    /// the value head. The node stays unvisited (`n == 0`) but becomes
    /// expandable.
    pub fn set_nn_eval(&mut self, eval: &NNEval) {
        assert!(self.edges.is_null(), "evaluation installed twice");
        assert_eq!(self.get_n(), 0, "evaluation installed on a visited node");

        self.install_edges(eval.edges.clone());
        self.wl.store(f64::to_bits(eval.q as f64), Ordering::Relaxed);
        self.d.store(eval.d.to_bits(), Ordering::Relaxed);
        self.m.store(eval.m.to_bits(), Ordering::Relaxed);
    }

    // --- edges --------------------------------------------------------------

    pub fn edges(&self) -> &[Edge] {
        if self.edges.is_null() {
            &[]
        } else {
            // Safety: `edges`/`num_edges` are immutable once set.
            unsafe { std::slice::from_raw_parts(self.edges, self.num_edges as usize) }
        }
    }

    #[inline]
    pub fn num_edges(&self) -> u8 {
        self.num_edges
    }

    /// Whether the position has any candidate moves at all. A mate or
    /// stalemate position has none and is immediately terminal.
    #[inline]
    pub fn has_children(&self) -> bool {
        self.num_edges > 0
    }

    pub fn get_edge_at(&self, index: u16) -> &Edge {
        &self.edges()[index as usize]
    }

    /// Stable-sort the edges by descending prior. Only legal while the
    /// position is unvisited and no child has been realised.
    pub fn sort_edges(&self) {
        assert!(!self.edges.is_null());
        assert_eq!(self.get_n(), 0, "sorting edges of a visited node");
        debug_assert!(self.get_child().is_none(), "sorting edges with realised children");
        // Safety: the preconditions give this call exclusive access to the
        // edge array; the pointer target is heap storage owned by self.
        let edges =
            unsafe { std::slice::from_raw_parts_mut(self.edges, self.num_edges as usize) };
        Edge::sort_edges(edges);
    }

    /// Overwrite the prior of the edge at `index`. Same preconditions as
    /// [`sort_edges`](Self::sort_edges); used for root noise on clones.
    pub(crate) fn set_p_at(&self, index: u16, p: f32) {
        debug_assert!(self.get_n() == 0);
        debug_assert!((index as usize) < self.num_edges as usize);
        // Safety: see sort_edges.
        unsafe { (*self.edges.add(index as usize)).set_p(p) };
    }

    // --- child storage ------------------------------------------------------

    fn dynamic_len(&self) -> usize {
        (self.num_edges as usize).saturating_sub(STATIC_CHILDREN)
    }

    fn dynamic_block(&self) -> Option<&[Node]> {
        if self.dynamic_len() == 0 {
            return None;
        }
        if (self.allocated_children.load(Ordering::Acquire) as usize) <= STATIC_CHILDREN {
            return None;
        }
        // The CAS winner publishes the block pointer right after raising
        // the count; a brief spin covers the gap.
        loop {
            let ptr = self.dynamic_children.load(Ordering::Acquire);
            if !ptr.is_null() {
                // Safety: the block was published with release ordering and
                // lives until release_children.
                return Some(unsafe { std::slice::from_raw_parts(ptr, self.dynamic_len()) });
            }
            std::hint::spin_loop();
        }
    }

    fn ensure_dynamic_block(&self) -> &[Node] {
        let total = self.num_edges as u16;
        if self
            .allocated_children
            .compare_exchange(
                STATIC_CHILDREN as u16,
                total,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            let block: Box<[Node]> = (0..self.dynamic_len()).map(|_| Node::default()).collect();
            let ptr = Box::into_raw(block) as *mut Node;
            self.dynamic_children.store(ptr, Ordering::Release);
        }
        self.dynamic_block().expect("dynamic block just published")
    }

    fn child_slot(&self, index: u16) -> Option<&Node> {
        let i = index as usize;
        if i >= self.num_edges as usize {
            return None;
        }
        if i < STATIC_CHILDREN {
            Some(&self.static_children[i])
        } else {
            self.dynamic_block().map(|block| &block[i - STATIC_CHILDREN])
        }
    }

    /// The realised child at edge index `index`, if any.
    pub fn get_child_at(&self, index: u16) -> Option<&Node> {
        self.child_slot(index).filter(|node| node.realised())
    }

    /// Realise the child at `index`, idempotently: concurrent calls for the
    /// same index produce exactly one realised node and all callers get it.
    pub fn insert_child_at(&self, index: u16) -> &Node {
        assert!(
            (index as usize) < self.num_edges as usize,
            "child index {index} out of range"
        );
        let slot = if (index as usize) < STATIC_CHILDREN {
            &self.static_children[index as usize]
        } else {
            &self.ensure_dynamic_block()[index as usize - STATIC_CHILDREN]
        };
        if !slot.realised() {
            slot.publish(*self.get_edge_at(index), index);
        }
        slot
    }

    /// First realised child, if any.
    pub fn get_child(&self) -> Option<&Node> {
        (0..self.num_edges as u16).find_map(|i| self.get_child_at(i))
    }

    /// Destroy all realised children and free the dynamic block. Only runs
    /// while the low node itself is being destroyed or rebuilt, under
    /// external synchronisation.
    pub fn release_children(&self) {
        for slot in &self.static_children {
            if slot.realised() {
                slot.reset();
            }
        }
        self.drop_dynamic_block();
    }

    /// Destroy all children except the one at `save_index`. The saved child
    /// stays in its slot, so pointers to it remain valid.
    pub fn release_children_except_one(&self, save_index: u16) {
        for (i, slot) in self.static_children.iter().enumerate() {
            if i as u16 != save_index && slot.realised() {
                slot.reset();
            }
        }
        if (save_index as usize) < STATIC_CHILDREN {
            self.drop_dynamic_block();
        } else if let Some(block) = self.dynamic_block() {
            for (offset, slot) in block.iter().enumerate() {
                if (offset + STATIC_CHILDREN) as u16 != save_index && slot.realised() {
                    slot.reset();
                }
            }
        }
    }

    fn drop_dynamic_block(&self) {
        let ptr = self.dynamic_children.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if !ptr.is_null() {
            // Safety: the pointer came from Box::into_raw with this exact
            // length, and teardown has exclusive access.
            unsafe {
                drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                    ptr,
                    self.dynamic_len(),
                )));
            }
            self.allocated_children
                .store(STATIC_CHILDREN as u16, Ordering::Release);
        }
    }

    /// Null out every child's low-node pointer without touching refcounts.
    /// Only used while the whole graph is being torn down.
    pub(crate) fn orphan_children(&self) {
        for index in 0..self.num_edges as u16 {
            if let Some(child) = self.get_child_at(index) {
                child.forget_low_node();
            }
        }
    }

    // --- parents ------------------------------------------------------------

    /// Register a referencing node. The transition to a second parent sets
    /// the transposition bit, permanently.
    pub fn add_parent(&self) {
        let prev = self.num_parents.fetch_add(1, Ordering::Relaxed);
        if prev >= 1 {
            self.flags.fetch_or(TRANSPOSITION_BIT, Ordering::Relaxed);
        }
    }

    pub fn remove_parent(&self) {
        let prev = self.num_parents.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "removing a parent that was never added");
    }

    #[inline]
    pub fn num_parents(&self) -> u16 {
        self.num_parents.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_transposition(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & TRANSPOSITION_BIT != 0
    }

    // --- statistics ---------------------------------------------------------

    #[inline]
    pub fn get_wl(&self) -> f64 {
        f64::from_bits(self.wl.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn get_d(&self) -> f32 {
        f32::from_bits(self.d.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn get_m(&self) -> f32 {
        f32::from_bits(self.m.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn get_n(&self) -> u32 {
        self.n.load(Ordering::Acquire)
    }

    #[inline]
    pub fn get_n_in_flight(&self) -> u32 {
        self.n_in_flight.load(Ordering::Acquire)
    }

    /// Visits that went on to children; the position's own expansion visit
    /// accounts for the difference of one.
    #[inline]
    pub fn get_children_visits(&self) -> u32 {
        self.get_n().saturating_sub(1)
    }

    #[inline]
    pub fn increment_n_in_flight(&self, multivisit: u32) {
        self.n_in_flight.fetch_add(multivisit, Ordering::Relaxed);
    }

    pub fn cancel_score_update(&self, multivisit: u32) {
        let prev = self.n_in_flight.fetch_sub(multivisit, Ordering::Relaxed);
        debug_assert!(prev >= multivisit, "cancelling more visits than in flight");
    }

    /// Same running means as [`Node::finalize_score_update`], aggregated
    /// over all parents.
    pub fn finalize_score_update(&self, v: f32, d: f32, m: f32, multivisit: u32) {
        let n = self.n.load(Ordering::Relaxed);
        let total = (n + multivisit) as f64;
        let mv = multivisit as f64;

        let wl = self.get_wl() + mv * (v as f64 - self.get_wl()) / total;
        self.wl.store(f64::to_bits(wl), Ordering::Relaxed);
        let new_d = self.get_d() + (mv * (d as f64 - self.get_d() as f64) / total) as f32;
        self.d.store(f32::to_bits(new_d), Ordering::Relaxed);
        let new_m = self.get_m() + (mv * (m as f64 - self.get_m() as f64) / total) as f32;
        self.m.store(f32::to_bits(new_m), Ordering::Relaxed);

        self.n.store(n + multivisit, Ordering::Release);
        let prev = self.n_in_flight.fetch_sub(multivisit, Ordering::Relaxed);
        debug_assert!(prev >= multivisit, "finalizing more visits than in flight");
    }

    /// Reweight existing visits; see [`Node::adjust_for_terminal`].
    pub fn adjust_for_terminal(&self, v: f32, d: f32, m: f32, multivisit: u32) {
        let n = self.n.load(Ordering::Relaxed);
        debug_assert!(n > 0, "adjusting a low node without visits");
        let scale = multivisit as f64 / n as f64;

        let wl = self.get_wl() + v as f64 * scale;
        self.wl.store(f64::to_bits(wl), Ordering::Relaxed);
        let new_d = self.get_d() + (d as f64 * scale) as f32;
        self.d.store(f32::to_bits(new_d), Ordering::Relaxed);
        let new_m = self.get_m() + (m as f64 * scale) as f32;
        self.m.store(f32::to_bits(new_m), Ordering::Relaxed);
    }

    // --- terminal state -----------------------------------------------------

    #[inline]
    pub fn terminal_type(&self) -> Terminal {
        terminal_from_bits(self.flags.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.terminal_type() != Terminal::NonTerminal
    }

    #[inline]
    pub fn get_bounds(&self) -> Bounds {
        let flags = self.flags.load(Ordering::Relaxed);
        (
            result_from_bits(flags >> LOWER_SHIFT),
            result_from_bits(flags >> UPPER_SHIFT),
        )
    }

    pub fn set_bounds(&self, lower: GameResult, upper: GameResult) {
        debug_assert!(lower <= upper);
        let transposition = self.flags.load(Ordering::Relaxed) & TRANSPOSITION_BIT;
        self.flags.store(
            pack_flags(self.terminal_type(), lower, upper) | transposition,
            Ordering::Relaxed,
        );
    }

    pub fn make_terminal(&self, result: GameResult, plies_left: f32, terminal_type: Terminal) {
        let transposition = self.flags.load(Ordering::Relaxed) & TRANSPOSITION_BIT;
        self.flags.store(
            pack_flags(terminal_type, result, result) | transposition,
            Ordering::Relaxed,
        );
        let (wl, d) = match result {
            GameResult::Draw => (0.0, 1.0),
            GameResult::WhiteWon => (1.0, 0.0),
            GameResult::BlackWon => (-1.0, 0.0),
        };
        self.wl.store(f64::to_bits(wl), Ordering::Relaxed);
        self.d.store(f32::to_bits(d), Ordering::Relaxed);
        self.m.store(f32::to_bits(plies_left), Ordering::Relaxed);
    }

    /// Undo a terminal mark: the current (terminal) eval stands in for the
    /// expansion visit and the realised children are folded back in, with
    /// the usual sign flip and plies shift per ply.
    pub fn make_not_terminal(&self, _incoming: &Node) {
        let transposition = self.flags.load(Ordering::Relaxed) & TRANSPOSITION_BIT;
        self.flags
            .store(DEFAULT_FLAGS | transposition, Ordering::Relaxed);

        if self.edges.is_null() {
            return;
        }

        let mut n = 1u32;
        let mut wl = self.get_wl();
        let mut d = self.get_d() as f64;
        let mut m = self.get_m() as f64;
        for index in 0..self.num_edges as u16 {
            if let Some(child) = self.get_child_at(index) {
                let cn = child.get_n();
                if cn > 0 {
                    n += cn;
                    wl += -child.get_wl() * cn as f64;
                    d += child.get_d() as f64 * cn as f64;
                    m += (child.get_m() as f64 + 1.0) * cn as f64;
                }
            }
        }
        self.wl.store(f64::to_bits(wl / n as f64), Ordering::Relaxed);
        self.d.store(f32::to_bits((d / n as f64) as f32), Ordering::Relaxed);
        self.m.store(f32::to_bits((m / n as f64) as f32), Ordering::Relaxed);
        self.n.store(n, Ordering::Release);
    }
}

impl Drop for LowNode {
    fn drop(&mut self) {
        self.release_children();
        if !self.edges.is_null() {
            // Safety: `edges` came from Box::into_raw with this length.
            unsafe {
                drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                    self.edges,
                    self.num_edges as usize,
                )));
            }
            self.edges = std::ptr::null_mut();
        }
    }
}

impl fmt::Debug for LowNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LowNode")
            .field("n", &self.get_n())
            .field("n_in_flight", &self.get_n_in_flight())
            .field("wl", &self.get_wl())
            .field("num_edges", &self.num_edges)
            .field("num_parents", &self.num_parents())
            .field("is_transposition", &self.is_transposition())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_board::Move;

    fn movelist(ucis: &[&str]) -> MoveList {
        ucis.iter().map(|s| Move::from_uci(s).unwrap()).collect()
    }

    fn evaluated(ucis: &[&str]) -> LowNode {
        let mut low = LowNode::new();
        low.set_nn_eval(&NNEval::uniform(&movelist(ucis)));
        low
    }

    #[test]
    fn test_set_nn_eval_installs_edges() {
        let mut low = LowNode::new();
        let eval = NNEval::uniform(&movelist(&["e2e4", "d2d4"])).with_values(0.3, 0.2, 15.0);
        low.set_nn_eval(&eval);
        assert_eq!(low.num_edges(), 2);
        assert!(low.has_children());
        assert_eq!(low.get_n(), 0);
        assert!((low.get_wl() - 0.3).abs() < 1e-6);
        assert!((low.get_d() - 0.2).abs() < 1e-6);
        assert!((low.get_m() - 15.0).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "evaluation installed twice")]
    fn test_set_nn_eval_twice_panics() {
        let mut low = evaluated(&["e2e4"]);
        low.set_nn_eval(&NNEval::uniform(&movelist(&["e2e4"])));
    }

    #[test]
    fn test_no_edges_is_immediately_terminal_material() {
        let low = LowNode::from_moves(&MoveList::new());
        assert!(!low.has_children());
        assert_eq!(low.num_edges(), 0);
        assert!(low.get_child().is_none());
        assert!(low.get_child_at(0).is_none());
    }

    #[test]
    fn test_static_only_storage_for_two_edges() {
        let low = evaluated(&["e2e4", "d2d4"]);
        low.insert_child_at(0);
        low.insert_child_at(1);
        // No dynamic block exists for a two-edge node.
        assert_eq!(low.dynamic_len(), 0);
        assert!(low.dynamic_block().is_none());
        assert!(low.get_child_at(0).is_some());
        assert!(low.get_child_at(1).is_some());
    }

    #[test]
    fn test_dynamic_storage_for_three_edges() {
        let low = evaluated(&["e2e4", "d2d4", "g1f3"]);
        assert!(low.get_child_at(2).is_none());
        let child = low.insert_child_at(2);
        assert!(child.realised());
        assert_eq!(child.index(), 2);
        assert!(low.dynamic_block().is_some());
        assert!(std::ptr::eq(low.get_child_at(2).unwrap(), child));
    }

    #[test]
    fn test_insert_child_is_idempotent() {
        let low = evaluated(&["e2e4", "d2d4", "g1f3"]);
        let a = low.insert_child_at(1) as *const Node;
        let b = low.insert_child_at(1) as *const Node;
        assert_eq!(a, b);
    }

    #[test]
    fn test_edge_index_boundaries() {
        let ucis: Vec<String> = (0u32..255)
            .map(|i| {
                // Synthesise distinct pseudo-moves; the board layer does not
                // validate them.
                let from = (i % 64) as u8;
                let to = ((i * 7 + 1) % 64) as u8;
                format!(
                    "{}{}{}{}",
                    (b'a' + (from % 8)) as char,
                    (b'1' + (from / 8)) as char,
                    (b'a' + (to % 8)) as char,
                    (b'1' + (to / 8)) as char
                )
            })
            .collect();
        let refs: Vec<&str> = ucis.iter().map(String::as_str).collect();
        let low = evaluated(&refs);
        assert_eq!(low.num_edges(), 255);
        let first = low.insert_child_at(0);
        let last = low.insert_child_at(254);
        assert_eq!(first.index(), 0);
        assert_eq!(last.index(), 254);
    }

    #[test]
    fn test_parent_refcount_and_transposition_stickiness() {
        let low = evaluated(&["e2e4"]);
        let a = Node::new(Edge::default(), 0);
        let b = Node::new(Edge::default(), 0);
        a.set_low_node(&low);
        assert_eq!(low.num_parents(), 1);
        assert!(!low.is_transposition());
        b.set_low_node(&low);
        assert_eq!(low.num_parents(), 2);
        assert!(low.is_transposition());
        a.unset_low_node();
        assert_eq!(low.num_parents(), 1);
        // The bit never clears.
        assert!(low.is_transposition());
        b.unset_low_node();
        assert_eq!(low.num_parents(), 0);
    }

    #[test]
    fn test_release_children_drops_low_refs() {
        let target = evaluated(&["a7a6"]);
        let low = evaluated(&["e2e4", "d2d4", "g1f3"]);
        low.insert_child_at(0).set_low_node(&target);
        low.insert_child_at(2).set_low_node(&target);
        assert_eq!(target.num_parents(), 2);
        low.release_children();
        assert_eq!(target.num_parents(), 0);
        assert!(low.get_child().is_none());
    }

    #[test]
    fn test_release_children_except_one() {
        let low = evaluated(&["e2e4", "d2d4", "g1f3", "c2c4"]);
        low.insert_child_at(0);
        low.insert_child_at(2);
        low.insert_child_at(3);
        let saved = low.insert_child_at(2) as *const Node;
        low.release_children_except_one(2);
        assert!(low.get_child_at(0).is_none());
        assert!(low.get_child_at(3).is_none());
        let kept = low.get_child_at(2).expect("saved child survives");
        assert_eq!(kept as *const Node, saved);
    }

    #[test]
    fn test_release_children_except_inline_frees_block() {
        let low = evaluated(&["e2e4", "d2d4", "g1f3"]);
        low.insert_child_at(0);
        low.insert_child_at(2);
        low.release_children_except_one(0);
        assert!(low.get_child_at(0).is_some());
        // The dynamic block is gone entirely.
        assert!(low.dynamic_block().is_none());
        assert!(low.get_child_at(2).is_none());
    }

    #[test]
    fn test_low_node_finalize_and_children_visits() {
        let low = evaluated(&["e2e4", "d2d4"]);
        low.increment_n_in_flight(1);
        low.finalize_score_update(0.5, 0.1, 20.0, 1);
        assert_eq!(low.get_n(), 1);
        assert_eq!(low.get_children_visits(), 0);
        assert_eq!(low.get_n_in_flight(), 0);
        low.increment_n_in_flight(1);
        low.finalize_score_update(-0.5, 0.1, 18.0, 1);
        assert_eq!(low.get_n(), 2);
        assert_eq!(low.get_children_visits(), 1);
        assert!((low.get_wl() - 0.0).abs() < 1e-7);
    }

    #[test]
    fn test_make_terminal_and_back() {
        let low = evaluated(&["e2e4", "d2d4"]);
        // One expansion visit plus one visit through child 0.
        low.increment_n_in_flight(1);
        low.finalize_score_update(0.4, 0.2, 10.0, 1);
        let child = low.insert_child_at(0);
        child.increment_n_in_flight(1);
        child.finalize_score_update(-0.6, 0.0, 7.0, 1);
        low.increment_n_in_flight(1);
        low.finalize_score_update(0.6, 0.0, 8.0, 1);

        let incoming = Node::new(Edge::default(), 0);
        low.make_terminal(GameResult::WhiteWon, 0.0, Terminal::EndOfGame);
        assert!(low.is_terminal());
        assert_eq!(low.get_wl(), 1.0);

        low.make_not_terminal(&incoming);
        assert!(!low.is_terminal());
        assert_eq!(low.get_n(), 2);
        // Seeded by the terminal +1 for the expansion visit, plus the
        // child's -(-0.6).
        assert!((low.get_wl() - (1.0 + 0.6) / 2.0).abs() < 1e-6);
        assert!((low.get_m() - (0.0 + 8.0) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_clone_for_eval_resets_statistics() {
        let low = evaluated(&["e2e4", "d2d4"]);
        low.increment_n_in_flight(1);
        low.finalize_score_update(0.5, 0.1, 20.0, 1);
        low.insert_child_at(0);

        let clone = low.clone_for_eval();
        assert_eq!(clone.num_edges(), 2);
        assert_eq!(clone.get_n(), 0);
        assert_eq!(clone.num_parents(), 0);
        assert!(!clone.is_transposition());
        assert!(clone.get_child().is_none());
        // The running mean travels as the cached eval.
        assert!((clone.get_wl() - low.get_wl()).abs() < 1e-9);
    }

    #[test]
    fn test_sorted_edges_have_contiguous_unvisited_suffix() {
        let low = evaluated(&["a2a3", "b2b3", "c2c3"]);
        low.set_p_at(0, 0.1);
        low.set_p_at(1, 0.5);
        low.set_p_at(2, 0.4);
        low.sort_edges();
        let priors: Vec<f32> = low.edges().iter().map(Edge::get_p).collect();
        assert!(priors.windows(2).all(|w| w[0] >= w[1]));
    }
}
