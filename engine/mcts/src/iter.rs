//! Iteration over a node's edges and visited children.
//!
//! Both iterators walk the *low node* under a [`Node`]; a node without a
//! low node yields nothing. Iterators themselves are not thread-safe and
//! must be externally synchronised, but they tolerate other threads
//! realising children of the same low node concurrently (a slot read
//! observes either "unrealised" or the fully published node).

use engine_board::{GameResult, Move};

use crate::edge::Edge;
use crate::low_node::LowNode;
use crate::node::{Bounds, Node};

/// An edge paired with its realised node, if one exists. The proxy getters
/// fall back to the caller-supplied default while the node is missing or
/// unvisited, which is what the PUCT selector wants.
#[derive(Clone, Copy)]
pub struct EdgeAndNode<'a> {
    low: &'a LowNode,
    edge: &'a Edge,
    node: Option<&'a Node>,
    index: u16,
}

impl<'a> EdgeAndNode<'a> {
    #[inline]
    pub fn edge(&self) -> &'a Edge {
        self.edge
    }

    #[inline]
    pub fn node(&self) -> Option<&'a Node> {
        self.node
    }

    #[inline]
    pub fn has_node(&self) -> bool {
        self.node.is_some()
    }

    /// Edge index in the owning low node.
    #[inline]
    pub fn index(&self) -> u16 {
        self.index
    }

    /// The realised node for this edge, spawning it if necessary. Safe to
    /// call while other threads spawn siblings or race on the same index.
    pub fn get_or_spawn(&self) -> &'a Node {
        match self.node {
            Some(node) => node,
            None => self.low.insert_child_at(self.index),
        }
    }

    // Proxy getters; defaults apply when there is no visited node yet.

    pub fn get_q(&self, default_q: f32, draw_score: f32) -> f32 {
        match self.node {
            Some(node) if node.get_n() > 0 => node.get_q(draw_score),
            _ => default_q,
        }
    }

    pub fn get_wl(&self, default_wl: f64) -> f64 {
        match self.node {
            Some(node) if node.get_n() > 0 => node.get_wl(),
            _ => default_wl,
        }
    }

    pub fn get_d(&self, default_d: f32) -> f32 {
        match self.node {
            Some(node) if node.get_n() > 0 => node.get_d(),
            _ => default_d,
        }
    }

    pub fn get_m(&self, default_m: f32) -> f32 {
        match self.node {
            Some(node) if node.get_n() > 0 => node.get_m(),
            _ => default_m,
        }
    }

    #[inline]
    pub fn get_n(&self) -> u32 {
        self.node.map_or(0, Node::get_n)
    }

    #[inline]
    pub fn get_n_started(&self) -> u32 {
        self.node.map_or(0, Node::get_n_started)
    }

    #[inline]
    pub fn get_n_in_flight(&self) -> u32 {
        self.node.map_or(0, Node::get_n_in_flight)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.node.is_some_and(Node::is_terminal)
    }

    #[inline]
    pub fn is_tb_terminal(&self) -> bool {
        self.node.is_some_and(Node::is_tb_terminal)
    }

    pub fn get_bounds(&self) -> Bounds {
        self.node
            .map_or((GameResult::BlackWon, GameResult::WhiteWon), Node::get_bounds)
    }

    #[inline]
    pub fn get_p(&self) -> f32 {
        self.edge.get_p()
    }

    #[inline]
    pub fn get_move(&self, as_opponent: bool) -> Move {
        self.edge.get_move(as_opponent)
    }

    /// Exploration term `numerator * p / (1 + n_started)`; the caller
    /// passes `cpuct * sqrt(parent visits)`.
    pub fn get_u(&self, numerator: f32) -> f32 {
        numerator * self.get_p() / (1 + self.get_n_started()) as f32
    }
}

/// Iterator over all edges of a low node in policy order.
pub struct Edges<'a> {
    low: Option<&'a LowNode>,
    index: u16,
}

impl<'a> Edges<'a> {
    pub(crate) fn new(low: Option<&'a LowNode>) -> Self {
        Edges { low, index: 0 }
    }
}

impl<'a> Iterator for Edges<'a> {
    type Item = EdgeAndNode<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let low = self.low?;
        if self.index >= low.num_edges() as u16 {
            return None;
        }
        let index = self.index;
        self.index += 1;
        Some(EdgeAndNode {
            low,
            edge: low.get_edge_at(index),
            node: low.get_child_at(index),
            index,
        })
    }
}

/// Iterator over realised children with at least one completed visit.
///
/// Exploits the sorted-edge invariant: under the PUCT selection discipline,
/// once an edge becomes best for the first time it is the first of the
/// unvisited suffix, so a realised child with neither visits nor in-flight
/// claims ends the walk early. Unrealised slots are merely skipped. A
/// selection policy that starts children out of policy order would
/// invalidate the short-circuit.
pub struct VisitedNodes<'a> {
    low: Option<&'a LowNode>,
    index: u16,
}

impl<'a> VisitedNodes<'a> {
    pub(crate) fn new(low: Option<&'a LowNode>) -> Self {
        VisitedNodes { low, index: 0 }
    }
}

impl<'a> Iterator for VisitedNodes<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        let low = self.low?;
        while self.index < low.num_edges() as u16 {
            let index = self.index;
            self.index += 1;
            let Some(node) = low.get_child_at(index) else {
                continue;
            };
            if node.get_n() > 0 {
                return Some(node);
            }
            if node.get_n_in_flight() == 0 {
                // Sorted suffix: nothing beyond this point has been visited.
                return None;
            }
            // Realised and in flight but unvisited: skip, keep walking.
        }
        None
    }
}

impl Node {
    /// Iterate over all edges of this node's low node.
    pub fn edges(&self) -> Edges<'_> {
        Edges::new(self.low_node())
    }

    /// Iterate over children with `n > 0`.
    pub fn visited_nodes(&self) -> VisitedNodes<'_> {
        VisitedNodes::new(self.low_node())
    }
}

impl LowNode {
    /// Iterate over this position's edges.
    pub fn edge_pairs(&self) -> Edges<'_> {
        Edges::new(Some(self))
    }

    /// Iterate over this position's visited children.
    pub fn visited_children(&self) -> VisitedNodes<'_> {
        VisitedNodes::new(Some(self))
    }
}
