//! Human-readable and Graphviz renderings of the graph. Diagnostic only;
//! nothing parses these.

use std::collections::HashSet;
use std::fmt::Write;

use crate::edge::Edge;
use crate::iter::EdgeAndNode;
use crate::low_node::LowNode;
use crate::node::Node;

impl Edge {
    pub fn debug_string(&self) -> String {
        format!("Move: {} p: {:.5}", self.get_move(false), self.get_p())
    }
}

impl Node {
    pub fn debug_string(&self) -> String {
        format!(
            "<Node> Idx:{} Move:{} WL:{:+.5} D:{:.3} M:{:.1} N:{} N_:{} Term:{:?} Bounds:{:?}",
            self.index(),
            self.get_move(false),
            self.get_wl(),
            self.get_d(),
            self.get_m(),
            self.get_n(),
            self.get_n_in_flight(),
            self.terminal_type(),
            self.get_bounds(),
        )
    }

    /// One Graphviz edge from `parent` (or an anonymous source) to this
    /// node's low node.
    pub fn dot_edge_string(&self, as_opponent: bool, parent: Option<&LowNode>) -> String {
        let from = match parent {
            Some(low) => format!("ln_{:p}", low as *const LowNode),
            None => "root".to_string(),
        };
        let to = match self.low_node() {
            Some(low) => format!("ln_{:p}", low as *const LowNode),
            None => format!("dangling_{:p}", self as *const Node),
        };
        format!(
            "  {from} -> {to} [label=\"{} p:{:.3} n:{}\"];\n",
            self.get_move(as_opponent),
            self.get_p(),
            self.get_n(),
        )
    }

    /// The whole subgraph under this node in dot format. Transpositions
    /// are emitted once.
    pub fn dot_graph_string(&self, as_opponent: bool) -> String {
        let mut out = String::from("digraph search {\n  node [shape=box];\n");
        let mut seen = HashSet::new();
        self.dot_walk(as_opponent, None, &mut seen, &mut out);
        out.push_str("}\n");
        out
    }

    fn dot_walk(
        &self,
        as_opponent: bool,
        parent: Option<&LowNode>,
        seen: &mut HashSet<*const LowNode>,
        out: &mut String,
    ) {
        out.push_str(&self.dot_edge_string(as_opponent, parent));
        if let Some(low) = self.low_node() {
            if seen.insert(low as *const LowNode) {
                out.push_str(&low.dot_node_string());
                for index in 0..low.num_edges() as u16 {
                    if let Some(child) = low.get_child_at(index) {
                        child.dot_walk(!as_opponent, Some(low), seen, out);
                    }
                }
            }
        }
    }
}

impl LowNode {
    pub fn debug_string(&self) -> String {
        format!(
            "<LowNode> WL:{:+.5} D:{:.3} M:{:.1} N:{} N_:{} Edges:{} Parents:{}{} Term:{:?} Bounds:{:?}",
            self.get_wl(),
            self.get_d(),
            self.get_m(),
            self.get_n(),
            self.get_n_in_flight(),
            self.num_edges(),
            self.num_parents(),
            if self.is_transposition() { " (transposition)" } else { "" },
            self.terminal_type(),
            self.get_bounds(),
        )
    }

    /// This low node as a Graphviz node statement.
    pub fn dot_node_string(&self) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "  ln_{:p} [label=\"N:{} WL:{:+.3} D:{:.2} M:{:.1} E:{} P:{}{}\"];\n",
            self as *const LowNode,
            self.get_n(),
            self.get_wl(),
            self.get_d(),
            self.get_m(),
            self.num_edges(),
            self.num_parents(),
            if self.is_transposition() { " T" } else { "" },
        );
        out
    }
}

impl<'a> EdgeAndNode<'a> {
    pub fn debug_string(&self) -> String {
        match self.node() {
            Some(node) => format!("{} / {}", self.edge().debug_string(), node.debug_string()),
            None => format!("{} / (dangling)", self.edge().debug_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::NNEval;
    use engine_board::{Move, MoveList};

    fn evaluated(ucis: &[&str]) -> LowNode {
        let moves: MoveList = ucis.iter().map(|s| Move::from_uci(s).unwrap()).collect();
        let mut low = LowNode::new();
        low.set_nn_eval(&NNEval::uniform(&moves));
        low
    }

    #[test]
    fn test_debug_strings_mention_key_fields() {
        let low = evaluated(&["e2e4", "d2d4"]);
        let node = low.insert_child_at(0);
        assert!(node.debug_string().contains("e2e4"));
        assert!(low.debug_string().contains("Edges:2"));
        let pair = low.edge_pairs().nth(1).unwrap();
        assert!(pair.debug_string().contains("dangling"));
    }

    #[test]
    fn test_dot_graph_dedupes_transpositions() {
        // Declaration order matters: drops run in reverse, and referencing
        // nodes must release before their targets go.
        let shared = evaluated(&["a7a6"]);
        let top = evaluated(&["e2e4", "d2d4"]);
        let root = Node::new(Edge::default(), 0);
        top.insert_child_at(0).set_low_node(&shared);
        top.insert_child_at(1).set_low_node(&shared);
        root.set_low_node(&top);

        let dot = root.dot_graph_string(false);
        assert!(dot.starts_with("digraph"));
        assert!(dot.ends_with("}\n"));
        // The shared low node's statement appears exactly once, with both
        // incoming edges pointing at it.
        let label = format!("ln_{:p} [label=", &shared as *const LowNode);
        assert_eq!(dot.matches(&label).count(), 1);
        let target = format!("-> ln_{:p}", &shared as *const LowNode);
        assert_eq!(dot.matches(&target).count(), 2);
    }
}
