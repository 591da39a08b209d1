//! Realised edges: per-path visit statistics and the virtual-loss protocol.
//!
//! A `Node` is one instantiation of an edge from a specific parent into a
//! child position. Many nodes may point at the same [`LowNode`]; that is a
//! transposition. Nodes live in place inside their parent low node's child
//! arrays and are published lock-free through the `index` field: a slot is
//! default-constructed (`INDEX_CONSTRUCTED`), claimed with a CAS to
//! `INDEX_ASSIGNING`, filled in, and released by storing the real edge
//! index. Readers load `index` with acquire ordering and treat anything at
//! or above `INDEX_ASSIGNING` as "not yet realised".

use std::cell::UnsafeCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicPtr, AtomicU16, AtomicU32, AtomicU64, AtomicU8, Ordering};

use engine_board::{GameResult, Move};
use tracing::warn;

use crate::edge::Edge;
use crate::low_node::LowNode;

/// Proved lower and upper outcome for a position; `lower <= upper`.
pub type Bounds = (GameResult, GameResult);

/// Whether a node's value is known exactly, and from where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Terminal {
    NonTerminal = 0,
    EndOfGame = 1,
    Tablebase = 2,
}

/// Sentinel index of a default-constructed, unrealised node.
pub const INDEX_CONSTRUCTED: u16 = 65535;
/// Transient index marker while a thread is realising the node.
pub const INDEX_ASSIGNING: u16 = 32767;

// Terminal type and both bounds share one byte: bits 0..2 terminal type,
// bits 2..4 lower bound, bits 4..6 upper bound. Low nodes use bit 6 for the
// sticky transposition flag.
const TERMINAL_MASK: u8 = 0b11;
pub(crate) const LOWER_SHIFT: u8 = 2;
pub(crate) const UPPER_SHIFT: u8 = 4;
pub(crate) const TRANSPOSITION_BIT: u8 = 0b0100_0000;

pub(crate) fn result_to_bits(result: GameResult) -> u8 {
    match result {
        GameResult::BlackWon => 0,
        GameResult::Draw => 1,
        GameResult::WhiteWon => 2,
    }
}

pub(crate) fn result_from_bits(bits: u8) -> GameResult {
    match bits & TERMINAL_MASK {
        0 => GameResult::BlackWon,
        1 => GameResult::Draw,
        _ => GameResult::WhiteWon,
    }
}

pub(crate) fn terminal_from_bits(bits: u8) -> Terminal {
    match bits & TERMINAL_MASK {
        0 => Terminal::NonTerminal,
        1 => Terminal::EndOfGame,
        _ => Terminal::Tablebase,
    }
}

pub(crate) fn pack_flags(terminal: Terminal, lower: GameResult, upper: GameResult) -> u8 {
    (terminal as u8)
        | (result_to_bits(lower) << LOWER_SHIFT)
        | (result_to_bits(upper) << UPPER_SHIFT)
}

pub(crate) const DEFAULT_FLAGS: u8 = 2 << UPPER_SHIFT;

/// A realised edge. Fields are ordered largest to smallest to keep the
/// whole node inside one cache line.
pub struct Node {
    /// Mean W minus L over all visits through this node, from the point of
    /// view of the player who just moved. Stored as f64 bits.
    wl: AtomicU64,
    /// The child position record; null until the first evaluation lands.
    low_node: AtomicPtr<LowNode>,
    /// Mean draw probability, f32 bits.
    d: AtomicU32,
    /// Mean expected remaining plies, f32 bits.
    m: AtomicU32,
    /// Completed visits.
    n: AtomicU32,
    /// Visits currently in progress through this node (virtual loss).
    n_in_flight: AtomicU32,
    /// Copy of the parent's edge. Written only by the thread holding the
    /// `INDEX_ASSIGNING` claim, before the index is released.
    edge: UnsafeCell<Edge>,
    /// Edge index in the parent, or a lifecycle sentinel.
    index: AtomicU16,
    /// Terminal type and outcome bounds, packed.
    flags: AtomicU8,
}

// Safety: every field shared across threads is atomic; `edge` is only
// written under the exclusive INDEX_ASSIGNING claim and only read after an
// acquire load of `index` observes the realising release store. The
// low-node pointer stays valid under the NodeTree lifecycle contract
// (eviction runs only between searches).
unsafe impl Send for Node {}
unsafe impl Sync for Node {}

const _: () = assert!(std::mem::size_of::<Node>() <= 64, "Node spills its cache line");

impl Default for Node {
    fn default() -> Self {
        Node {
            wl: AtomicU64::new(0f64.to_bits()),
            low_node: AtomicPtr::new(std::ptr::null_mut()),
            d: AtomicU32::new(0f32.to_bits()),
            m: AtomicU32::new(0f32.to_bits()),
            n: AtomicU32::new(0),
            n_in_flight: AtomicU32::new(0),
            edge: UnsafeCell::new(Edge::default()),
            index: AtomicU16::new(INDEX_CONSTRUCTED),
            flags: AtomicU8::new(DEFAULT_FLAGS),
        }
    }
}

impl Node {
    /// A node realised directly with its edge and index. Used for the root;
    /// in-place slots go through [`LowNode::insert_child_at`] instead.
    pub fn new(edge: Edge, index: u16) -> Self {
        let node = Node::default();
        unsafe { *node.edge.get() = edge };
        node.index.store(index, Ordering::Release);
        node
    }

    // --- lifecycle ---------------------------------------------------------

    /// Whether the node has been realised (not just constructed).
    #[inline]
    pub fn realised(&self) -> bool {
        self.index.load(Ordering::Acquire) < INDEX_ASSIGNING
    }

    /// Index among the parent's edges. Meaningful only when realised.
    #[inline]
    pub fn index(&self) -> u16 {
        self.index.load(Ordering::Acquire)
    }

    /// Return the node to the constructed state, dropping its low-node
    /// reference. Requires exclusive logical access (tree maintenance).
    pub fn reset(&self) {
        self.unset_low_node();
        self.trim();
        // Safety: reset only runs during externally synchronised tree
        // maintenance, with no concurrent readers of this slot.
        unsafe { *self.edge.get() = Edge::default() };
        self.index.store(INDEX_CONSTRUCTED, Ordering::Release);
    }

    /// Clear per-search statistics but keep edge, index and the attached
    /// low node (the cached evaluation lives there).
    pub fn trim(&self) {
        self.wl.store(0f64.to_bits(), Ordering::Relaxed);
        self.d.store(0f32.to_bits(), Ordering::Relaxed);
        self.m.store(0f32.to_bits(), Ordering::Relaxed);
        self.n.store(0, Ordering::Relaxed);
        self.n_in_flight.store(0, Ordering::Relaxed);
        self.flags.store(DEFAULT_FLAGS, Ordering::Relaxed);
    }

    /// Realise this slot for `index`, or wait out another thread doing so.
    /// Returns whether this call won the publication.
    pub(crate) fn publish(&self, edge: Edge, index: u16) -> bool {
        debug_assert!(index < INDEX_ASSIGNING);
        match self.index.compare_exchange(
            INDEX_CONSTRUCTED,
            INDEX_ASSIGNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                // We own the slot until the release store below.
                unsafe { *self.edge.get() = edge };
                self.index.store(index, Ordering::Release);
                true
            }
            Err(_) => {
                // Someone else realised (or is realising) this slot; wait
                // out the assigning window.
                while self.index.load(Ordering::Acquire) >= INDEX_ASSIGNING {
                    std::hint::spin_loop();
                }
                false
            }
        }
    }

    // --- edge --------------------------------------------------------------

    #[inline]
    fn edge(&self) -> Edge {
        // Safety: callers only read edges of realised nodes (or of nodes
        // they constructed themselves), after the publication barrier.
        unsafe { *self.edge.get() }
    }

    #[inline]
    pub fn get_move(&self, as_opponent: bool) -> Move {
        self.edge().get_move(as_opponent)
    }

    #[inline]
    pub fn get_p(&self) -> f32 {
        self.edge().get_p()
    }

    // --- statistics --------------------------------------------------------

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

    /// Node eval with the caller's draw score folded in.
    #[inline]
    pub fn get_q(&self, draw_score: f32) -> f32 {
        self.get_wl() as f32 + draw_score * self.get_d()
    }

    #[inline]
    pub fn get_n(&self) -> u32 {
        self.n.load(Ordering::Acquire)
    }

    #[inline]
    pub fn get_n_in_flight(&self) -> u32 {
        self.n_in_flight.load(Ordering::Acquire)
    }

    /// Visits plus visits in progress, the denominator the selector uses.
    #[inline]
    pub fn get_n_started(&self) -> u32 {
        self.get_n() + self.get_n_in_flight()
    }

    /// Sum of visits of this node's visited children.
    pub fn get_children_visits(&self) -> u32 {
        self.visited_nodes().map(Node::get_n).sum()
    }

    /// Sum of priors of children with at least one completed visit.
    pub fn get_visited_policy(&self) -> f32 {
        self.visited_nodes().map(Node::get_p).sum()
    }

    // --- terminal state ----------------------------------------------------

    #[inline]
    pub fn terminal_type(&self) -> Terminal {
        terminal_from_bits(self.flags.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.terminal_type() != Terminal::NonTerminal
    }

    #[inline]
    pub fn is_tb_terminal(&self) -> bool {
        self.terminal_type() == Terminal::Tablebase
    }

    #[inline]
    pub fn get_bounds(&self) -> Bounds {
        let flags = self.flags.load(Ordering::Relaxed);
        (
            result_from_bits(flags >> LOWER_SHIFT),
            result_from_bits(flags >> UPPER_SHIFT),
        )
    }

    /// Tighten the outcome bounds; `lower <= upper` in the
    /// BlackWon < Draw < WhiteWon ordering.
    pub fn set_bounds(&self, lower: GameResult, upper: GameResult) {
        debug_assert!(lower <= upper);
        self.flags
            .store(pack_flags(self.terminal_type(), lower, upper), Ordering::Relaxed);
    }

    /// Force the node terminal with the canonical eval for `result`.
    pub fn make_terminal(&self, result: GameResult, plies_left: f32, terminal_type: Terminal) {
        self.flags
            .store(pack_flags(terminal_type, result, result), Ordering::Relaxed);
        let (wl, d) = match result {
            GameResult::Draw => (0.0, 1.0),
            GameResult::WhiteWon => (1.0, 0.0),
            GameResult::BlackWon => (-1.0, 0.0),
        };
        self.wl.store(f64::to_bits(wl), Ordering::Relaxed);
        self.d.store(f32::to_bits(d), Ordering::Relaxed);
        self.m.store(f32::to_bits(plies_left), Ordering::Relaxed);
    }

    /// Reverse a terminal decision and re-adopt the low node's aggregates.
    /// With `also_low_node` a still-terminal low node is recomputed first.
    pub fn make_not_terminal(&self, also_low_node: bool) {
        if let Some(low) = self.low_node() {
            if also_low_node && low.is_terminal() {
                low.make_not_terminal(self);
            }
            self.wl.store(f64::to_bits(low.get_wl()), Ordering::Relaxed);
            self.d.store(f32::to_bits(low.get_d()), Ordering::Relaxed);
            self.m.store(f32::to_bits(low.get_m()), Ordering::Relaxed);
            self.n.store(low.get_n(), Ordering::Release);
        }
        self.flags.store(DEFAULT_FLAGS, Ordering::Relaxed);
    }

    // --- the visit protocol ------------------------------------------------

    /// Claim a visit. Fails only when another worker is expanding this
    /// leaf (`n == 0` with a visit already in flight); the caller then
    /// picks a different path or retries later.
    pub fn try_start_score_update(&self) -> bool {
        if self.n.load(Ordering::Acquire) == 0 {
            self.n_in_flight
                .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        } else {
            self.n_in_flight.fetch_add(1, Ordering::Relaxed);
            true
        }
    }

    /// Unconditional claim, used when amplifying a visit (collisions,
    /// repeated terminal visits).
    #[inline]
    pub fn increment_n_in_flight(&self, multivisit: u32) {
        self.n_in_flight.fetch_add(multivisit, Ordering::Relaxed);
    }

    /// Give back a claim without a result.
    #[inline]
    pub fn cancel_score_update(&self, multivisit: u32) {
        let prev = self.n_in_flight.fetch_sub(multivisit, Ordering::Relaxed);
        debug_assert!(prev >= multivisit, "cancelling more visits than in flight");
    }

    /// Fold a new evaluation into the running means and complete
    /// `multivisit` claims. The store of `n` is the release that makes the
    /// updated means visible to readers observing the new count.
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

    /// Reweight already-counted visits by the deltas `v`, `d` and `m`
    /// scaled by `multivisit / n`, without changing `n`. Used when a
    /// descendant's value is replaced by a terminal proof.
    pub fn adjust_for_terminal(&self, v: f32, d: f32, m: f32, multivisit: u32) {
        let n = self.n.load(Ordering::Relaxed);
        debug_assert!(n > 0, "adjusting a node without visits");
        let scale = multivisit as f64 / n as f64;

        let wl = self.get_wl() + v as f64 * scale;
        self.wl.store(f64::to_bits(wl), Ordering::Relaxed);
        let new_d = self.get_d() + (d as f64 * scale) as f32;
        self.d.store(f32::to_bits(new_d), Ordering::Relaxed);
        let new_m = self.get_m() + (m as f64 * scale) as f32;
        self.m.store(f32::to_bits(new_m), Ordering::Relaxed);
    }

    // --- low node ----------------------------------------------------------

    /// The child position record, if any evaluation has landed.
    #[inline]
    pub fn low_node(&self) -> Option<&LowNode> {
        let ptr = self.low_node.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            // Safety: low nodes are evicted only between searches, after
            // every referencing node has dropped its reference.
            Some(unsafe { &*ptr })
        }
    }

    /// Attach a low node, taking a parent reference on it.
    pub fn set_low_node(&self, low_node: &LowNode) {
        debug_assert!(self.low_node.load(Ordering::Relaxed).is_null());
        low_node.add_parent();
        self.low_node
            .store(low_node as *const LowNode as *mut LowNode, Ordering::Release);
    }

    /// Detach the low node and give back the parent reference. Freeing a
    /// low node that drops to zero parents is the tree's concern.
    pub fn unset_low_node(&self) {
        let old = self.low_node.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if !old.is_null() {
            // Safety: see low_node().
            unsafe { (*old).remove_parent() };
        }
    }

    /// Drop the pointer without touching the refcount. Only used while the
    /// whole graph is being torn down.
    pub(crate) fn forget_low_node(&self) {
        self.low_node.store(std::ptr::null_mut(), Ordering::Relaxed);
    }

    #[inline]
    pub fn has_children(&self) -> bool {
        self.low_node().is_some_and(LowNode::has_children)
    }

    pub fn num_edges(&self) -> u8 {
        self.low_node().map_or(0, LowNode::num_edges)
    }

    /// First realised child, if any.
    pub fn get_child(&self) -> Option<&Node> {
        self.low_node().and_then(LowNode::get_child)
    }

    /// Release every child subgraph under this node's low node except the
    /// one at `save_index`; that subtree becomes the spine of the new head.
    pub fn release_children_except_one(&self, save_index: u16) {
        if let Some(low) = self.low_node() {
            low.release_children_except_one(save_index);
        }
    }

    // --- diagnostics -------------------------------------------------------

    /// True when no node or low node reachable from here has a pending
    /// visit claim. Offenders are logged.
    pub fn zero_n_in_flight(&self) -> bool {
        let mut seen = HashSet::new();
        self.zero_n_in_flight_inner(&mut seen)
    }

    fn zero_n_in_flight_inner(&self, seen: &mut HashSet<*const LowNode>) -> bool {
        let mut clean = self.get_n_in_flight() == 0;
        if !clean {
            warn!(node = ?self, "node with orphaned visit claims");
        }
        if let Some(low) = self.low_node() {
            if seen.insert(low as *const LowNode) {
                if low.get_n_in_flight() != 0 {
                    warn!(low_node = ?low, "low node with orphaned visit claims");
                    clean = false;
                }
                for index in 0..low.num_edges() as u16 {
                    if let Some(child) = low.get_child_at(index) {
                        clean &= child.zero_n_in_flight_inner(seen);
                    }
                }
            }
        }
        clean
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.unset_low_node();
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("index", &self.index.load(Ordering::Relaxed))
            .field("move", &self.get_move(false).to_string())
            .field("n", &self.get_n())
            .field("n_in_flight", &self.get_n_in_flight())
            .field("wl", &self.get_wl())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructed_node_is_unrealised() {
        let node = Node::default();
        assert!(!node.realised());
        assert_eq!(node.index(), INDEX_CONSTRUCTED);
        assert_eq!(node.get_bounds(), (GameResult::BlackWon, GameResult::WhiteWon));
        assert!(!node.is_terminal());
    }

    #[test]
    fn test_publish_realises_once() {
        let node = Node::default();
        let mut edge = Edge::default();
        edge.set_p(0.25);
        assert!(node.publish(edge, 3));
        assert!(node.realised());
        assert_eq!(node.index(), 3);
        assert!((node.get_p() - 0.25).abs() < 1e-3);
        // Second publication is a no-op.
        assert!(!node.publish(Edge::default(), 3));
        assert_eq!(node.index(), 3);
        assert!((node.get_p() - 0.25).abs() < 1e-3);
    }

    #[test]
    fn test_try_start_score_update_matrix() {
        let node = Node::default();
        // n == 0, n_in_flight == 0: claim succeeds and transitions to (0, 1).
        assert!(node.try_start_score_update());
        assert_eq!(node.get_n_in_flight(), 1);
        // n == 0, n_in_flight == 1: the leaf-collision guard rejects.
        assert!(!node.try_start_score_update());
        assert_eq!(node.get_n_in_flight(), 1);

        node.finalize_score_update(0.5, 0.0, 1.0, 1);
        // n > 0: always succeeds.
        assert!(node.try_start_score_update());
        assert!(node.try_start_score_update());
        assert_eq!(node.get_n_in_flight(), 2);
        node.cancel_score_update(2);
        assert_eq!(node.get_n_in_flight(), 0);
    }

    #[test]
    fn test_finalize_running_means() {
        let node = Node::default();
        node.increment_n_in_flight(2);
        node.finalize_score_update(0.2, 0.1, 10.0, 1);
        assert!((node.get_wl() - 0.2).abs() < 1e-7);
        assert!((node.get_d() - 0.1).abs() < 1e-6);
        assert!((node.get_m() - 10.0).abs() < 1e-6);
        assert_eq!(node.get_n(), 1);
        assert_eq!(node.get_n_in_flight(), 1);

        node.finalize_score_update(0.6, 0.3, 8.0, 1);
        assert!((node.get_wl() - 0.4).abs() < 1e-7);
        assert!((node.get_d() - 0.2).abs() < 1e-6);
        assert!((node.get_m() - 9.0).abs() < 1e-6);
        assert_eq!(node.get_n(), 2);
        assert_eq!(node.get_n_in_flight(), 0);
    }

    #[test]
    fn test_multivisit_amplification() {
        let node = Node::default();
        node.increment_n_in_flight(4);
        node.finalize_score_update(1.0, 0.0, 3.0, 4);
        assert_eq!(node.get_n(), 4);
        assert_eq!(node.get_n_in_flight(), 0);
        assert!((node.get_wl() - 1.0).abs() < 1e-9);
        assert_eq!(node.get_n_started(), 4);
    }

    #[test]
    fn test_adjust_for_terminal_keeps_n() {
        let node = Node::default();
        node.increment_n_in_flight(2);
        node.finalize_score_update(0.0, 0.0, 0.0, 1);
        node.finalize_score_update(0.0, 0.0, 0.0, 1);
        // Two visits at 0; reweight one of them to +1.
        node.adjust_for_terminal(1.0, 0.0, 0.0, 1);
        assert_eq!(node.get_n(), 2);
        assert!((node.get_wl() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_make_terminal_canonical_values() {
        let node = Node::default();
        node.make_terminal(GameResult::WhiteWon, 0.0, Terminal::EndOfGame);
        assert!(node.is_terminal());
        assert_eq!(node.get_wl(), 1.0);
        assert_eq!(node.get_d(), 0.0);
        assert_eq!(node.get_bounds(), (GameResult::WhiteWon, GameResult::WhiteWon));

        node.make_terminal(GameResult::Draw, 3.0, Terminal::Tablebase);
        assert!(node.is_tb_terminal());
        assert_eq!(node.get_wl(), 0.0);
        assert_eq!(node.get_d(), 1.0);
        assert_eq!(node.get_m(), 3.0);
    }

    #[test]
    fn test_bounds_tighten() {
        let node = Node::default();
        node.set_bounds(GameResult::Draw, GameResult::WhiteWon);
        assert_eq!(node.get_bounds(), (GameResult::Draw, GameResult::WhiteWon));
        assert!(!node.is_terminal());
    }

    #[test]
    fn test_trim_keeps_identity() {
        let node = Node::new(Edge::default(), 5);
        node.increment_n_in_flight(1);
        node.finalize_score_update(0.7, 0.1, 4.0, 1);
        node.make_terminal(GameResult::WhiteWon, 0.0, Terminal::EndOfGame);
        node.trim();
        assert_eq!(node.index(), 5);
        assert!(node.realised());
        assert_eq!(node.get_n(), 0);
        assert_eq!(node.get_n_in_flight(), 0);
        assert!(!node.is_terminal());
        assert_eq!(node.get_wl(), 0.0);
    }

    #[test]
    fn test_reset_returns_to_constructed() {
        let node = Node::new(Edge::default(), 2);
        node.reset();
        assert!(!node.realised());
        assert_eq!(node.index(), INDEX_CONSTRUCTED);
    }
}
