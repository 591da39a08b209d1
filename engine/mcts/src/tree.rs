//! The owning container of the search graph.
//!
//! `NodeTree` keeps the name but the structure is a DAG: the transposition
//! table maps position hashes to owned low nodes, and any number of nodes
//! may reference one entry. The tree owns the game-begin node, tracks the
//! played line, performs subtree reuse when the game advances, and evicts
//! unreferenced low nodes between searches.
//!
//! All methods require external synchronisation; the lock-free protocols
//! inside [`Node`] and [`LowNode`] cover concurrent *workers*, not
//! concurrent tree maintenance.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::ptr::NonNull;

use engine_board::{FenError, Move, MoveList, Position, PositionHistory};
use smallvec::smallvec;
use thiserror::Error;
use tracing::{debug, trace};

use crate::edge::Edge;
use crate::low_node::LowNode;
use crate::node::{Node, Terminal};

/// Errors surfaced by tree operations. Everything else in the core treats
/// misuse as a programming error and asserts.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("invalid position: {0}")]
    Fen(#[from] FenError),
}

/// Owns the root, the transposition table and the non-shareable low nodes.
pub struct NodeTree {
    /// The node search starts from. Points either at the game-begin node
    /// or into some low node's child storage.
    current_head: Option<NonNull<Node>>,
    /// Root node of the whole game; carries the a1a1 sentinel move.
    gamebegin_node: Option<Box<Node>>,
    history: PositionHistory,
    moves: Vec<Move>,
    /// Transposition table: position hash to owned low node. Box keeps the
    /// addresses stable across rehashes.
    tt: HashMap<u64, Box<LowNode>>,
    /// Low nodes that must not be shared: root-exclusive clones carrying
    /// noise, and single-edge stubs created by move advance.
    non_tt: Vec<Box<LowNode>>,
}

// Safety: the raw head pointer and pool contents are owned by this value;
// handing the tree to another thread moves ownership of the whole graph.
unsafe impl Send for NodeTree {}

impl Default for NodeTree {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeTree {
    pub fn new() -> Self {
        NodeTree {
            current_head: None,
            gamebegin_node: None,
            history: PositionHistory::new(),
            moves: Vec::new(),
            tt: HashMap::new(),
            non_tt: Vec::new(),
        }
    }

    // --- accessors ----------------------------------------------------------

    pub fn current_head(&self) -> Option<&Node> {
        // Safety: the head points into graph storage this tree owns.
        self.current_head.map(|head| unsafe { &*head.as_ptr() })
    }

    pub fn game_begin_node(&self) -> Option<&Node> {
        self.gamebegin_node.as_deref()
    }

    /// The position of the current head. Requires a prior
    /// [`reset_to_position`](Self::reset_to_position).
    pub fn head_position(&self) -> &Position {
        self.history.last()
    }

    pub fn ply_count(&self) -> u16 {
        self.head_position().get_game_ply()
    }

    pub fn is_black_to_move(&self) -> bool {
        self.head_position().is_black_to_move()
    }

    pub fn position_history(&self) -> &PositionHistory {
        &self.history
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    // --- tree reuse ---------------------------------------------------------

    /// Advance the head along `mv`. The matching child subtree is reused
    /// and all sibling subgraphs are released; a missing child gets a
    /// fresh non-shareable stub. Returns whether the edge already existed.
    pub fn make_move(&mut self, mv: Move) -> bool {
        let head = self
            .current_head
            .expect("no position set; call reset_to_position first")
            .as_ptr();
        // Safety: head points into storage owned by this tree, and tree
        // methods are externally synchronised.
        let head_ref: &Node = unsafe { &*head };
        let pov = if self.history.last().is_black_to_move() {
            mv.mirror()
        } else {
            mv
        };

        let mut found = false;
        let mut new_head: Option<NonNull<Node>> = None;
        if let Some(low) = head_ref.low_node() {
            if let Some(index) = low.edges().iter().position(|e| e.get_move(false) == pov) {
                let index = index as u16;
                let child = low.insert_child_at(index);
                low.release_children_except_one(index);
                new_head = Some(NonNull::from(child));
                found = true;
            } else {
                // A single-edge stub from an earlier advance along a line
                // the game then left; its subtree is useless now.
                head_ref.unset_low_node();
            }
        }

        let new_head = match new_head {
            Some(head) => head,
            None => {
                let stub_moves: MoveList = smallvec![pov];
                let low = self.non_tt_add(LowNode::from_moves_with_child(&stub_moves, 0));
                // Safety: head_ref was derived before the pool push; the
                // node it points at is unaffected by pool growth.
                unsafe { &*head }.set_low_node(low);
                NonNull::from(low.get_child_at(0).expect("stub child just realised"))
            }
        };

        // Safety: as for head above.
        let new_head_ref: &Node = unsafe { &*new_head.as_ptr() };
        // An end-of-game terminal can encode a history-dependent draw; it
        // no longer binds once the game has advanced into it. Tablebase
        // results are history-free and stay.
        if new_head_ref.terminal_type() == Terminal::EndOfGame {
            new_head_ref.make_not_terminal(true);
        }

        self.history.append(mv);
        self.moves.push(mv);
        self.current_head = Some(new_head);
        trace!(%mv, reused = found, "advanced head");
        found
    }

    /// Clear the head's per-search statistics (pending claims included)
    /// while keeping its cached evaluation.
    pub fn trim_tree_at_head(&mut self) {
        if let Some(head) = self.current_head() {
            head.trim();
        }
    }

    /// Seek to `starting_fen` plus `moves`, reusing the existing graph
    /// where possible. Returns `Ok(true)` iff every move was found and the
    /// new line is an extension of the previously searched one; otherwise
    /// the unusable parts have been rebuilt or trimmed.
    pub fn reset_to_position(
        &mut self,
        starting_fen: &str,
        moves: &[Move],
    ) -> Result<bool, TreeError> {
        let starting = Position::from_fen(starting_fen)?;
        let same_game = self.gamebegin_node.is_some()
            && !self.history.is_empty()
            && self.history.starting().hash() == starting.hash();
        if !same_game {
            self.deallocate_tree();
        }
        if self.gamebegin_node.is_none() {
            self.gamebegin_node = Some(Box::new(Node::new(Edge::default(), 0)));
        }
        self.history.reset(starting);
        self.moves.clear();

        let old_head = self.current_head;
        let begin = NonNull::from(&**self.gamebegin_node.as_ref().expect("just created"));
        self.current_head = Some(begin);
        let mut seen_old_head = old_head == Some(begin);
        let mut all_found = true;
        for &mv in moves {
            all_found &= self.make_move(mv);
            if old_head == self.current_head {
                seen_old_head = true;
            }
        }

        // If the old head is not on the new line (diverged, or the new
        // line is shorter), its statistics and claims cannot be trusted.
        if !seen_old_head {
            self.trim_tree_at_head();
        }
        debug!(same_game, all_found, seen_old_head, "reset to position");
        Ok(same_game && all_found && seen_old_head)
    }

    // --- transposition table ------------------------------------------------

    pub fn tt_find(&self, hash: u64) -> Option<&LowNode> {
        self.tt.get(&hash).map(|low| &**low)
    }

    /// Look up or insert the low node for `hash`. The reference is stable
    /// until the next maintenance or clear.
    pub fn tt_get_or_create(&mut self, hash: u64) -> (&mut LowNode, bool) {
        let (low, created) = match self.tt.entry(hash) {
            Entry::Occupied(entry) => (entry.into_mut(), false),
            Entry::Vacant(entry) => (entry.insert(Box::new(LowNode::new())), true),
        };
        (&mut **low, created)
    }

    /// Evict low nodes no node references any more. Runs to a fixed point:
    /// dropping an entry releases its children, which can strand further
    /// entries. Only call between searches.
    pub fn tt_maintenance(&mut self) {
        let mut evicted = 0usize;
        loop {
            let before = self.tt.len() + self.non_tt.len();
            self.non_tt.retain(|low| low.num_parents() > 0);
            self.tt.retain(|_, low| low.num_parents() > 0);
            let after = self.tt.len() + self.non_tt.len();
            if after == before {
                break;
            }
            evicted += before - after;
        }
        debug!(
            evicted,
            live = self.tt.len() + self.non_tt.len(),
            "transposition table maintenance"
        );
    }

    /// Drop every low node, shareable or not. The head is left at the
    /// game-begin node; callers are expected to `reset_to_position` before
    /// searching again.
    pub fn tt_clear(&mut self) {
        self.clear_graph();
        if let Some(begin) = self.gamebegin_node.as_deref() {
            begin.trim();
        }
        self.current_head = self.gamebegin_node.as_deref().map(NonNull::from);
    }

    pub fn tt_len(&self) -> usize {
        self.tt.len()
    }

    // --- non-shareable pool -------------------------------------------------

    /// Take ownership of a low node that must not be shared.
    pub fn non_tt_add(&mut self, low: LowNode) -> &mut LowNode {
        self.non_tt.push(Box::new(low));
        self.non_tt.last_mut().expect("just pushed")
    }

    /// Clone `low`'s evaluation and edges into the non-shareable pool, so
    /// per-root noise can be applied without corrupting the shared entry.
    pub fn non_tt_add_clone(&mut self, low: &LowNode) -> &mut LowNode {
        let clone = low.clone_for_eval();
        self.non_tt.push(Box::new(clone));
        self.non_tt.last_mut().expect("just pushed")
    }

    pub fn non_tt_len(&self) -> usize {
        self.non_tt.len()
    }

    // --- diagnostics --------------------------------------------------------

    /// Debug predicate: no orphaned visit claims anywhere in the graph.
    pub fn zero_n_in_flight(&self) -> bool {
        self.game_begin_node().map_or(true, Node::zero_n_in_flight)
    }

    // --- teardown -----------------------------------------------------------

    fn clear_graph(&mut self) {
        // Pool entries may reference each other in any order, so per-node
        // refcount traffic during the drops would chase freed memory.
        // Detach everything first, then drop both pools.
        if let Some(begin) = self.gamebegin_node.as_deref() {
            begin.forget_low_node();
        }
        for low in self.tt.values() {
            low.orphan_children();
        }
        for low in &self.non_tt {
            low.orphan_children();
        }
        let dropped = self.tt.len() + self.non_tt.len();
        self.tt.clear();
        self.non_tt.clear();
        if dropped > 0 {
            debug!(dropped, "cleared graph");
        }
    }

    fn deallocate_tree(&mut self) {
        self.clear_graph();
        self.gamebegin_node = None;
        self.current_head = None;
    }
}

impl Drop for NodeTree {
    fn drop(&mut self) {
        self.deallocate_tree();
    }
}
