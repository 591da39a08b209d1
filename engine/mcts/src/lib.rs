//! Search graph for neural-network-guided MCTS over chess positions.
//!
//! The graph is a DAG, not a tree: equivalent positions reached by
//! different move orders share a single evaluation record. Terminology:
//!
//! * [`Edge`] — a potential edge: a move with its policy prior.
//! * [`Node`] — a realised edge with visit counts and a virtual-loss
//!   counter; one per (parent, edge index) pair.
//! * [`LowNode`] — a position record with the cached evaluation, the edge
//!   array and the realised children; one per *position*, shared by every
//!   path that transposes into it.
//!
//! Storage:
//!
//! * Potential edges live in a flat array owned by the low node.
//! * Realised edges live at their edge index in a logical array split
//!   between two inline slots and one on-demand block, published lock-free.
//! * A realised edge holds a copy of its potential edge, its index among
//!   the potential edges, and a pointer to the target low node.
//!
//! ```text
//!   +------------------+
//!   | LowNode          |                 +--------+
//!   +------------------+                 | Edge[] |
//!   | edges            | --------------> +--------+
//!   |                  |   +----------+  | Nf3    |
//!   | children         |-> | Node     |  | Bc5    |
//!   |                  |   | index: 1 |  | a4     |
//!   | wl d m n ...     |   | wl: 0.5  |  | Qxf7   |
//!   +------------------+   +----------+  +--------+
//!                          | Node     |
//!                          | index: 3 |
//!                          | wl: -0.2 |
//!                          +----------+
//! ```
//!
//! Many worker threads descend the graph concurrently: claims go through
//! [`Node::try_start_score_update`] (the leaf-collision guard), child
//! realisation through [`LowNode::insert_child_at`], and every claim is
//! paired with a finalize or a cancel. Aggregate mutation during
//! back-propagation follows the single-updater-per-path convention; the
//! [`NodeTree`] operations (advance, reuse, eviction) run strictly between
//! searches.

pub mod dot;
pub mod edge;
pub mod eval;
pub mod iter;
pub mod low_node;
pub mod node;
pub mod noise;
pub mod params;
pub mod tree;


pub use edge::Edge;
pub use eval::{Eval, NNEval};
pub use iter::{EdgeAndNode, Edges, VisitedNodes};
pub use low_node::{LowNode, STATIC_CHILDREN};
pub use node::{Bounds, Node, Terminal, INDEX_ASSIGNING, INDEX_CONSTRUCTED};
pub use noise::apply_dirichlet_noise;
pub use params::SearchParams;
pub use tree::{NodeTree, TreeError};
