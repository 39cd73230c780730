//! Alignment graph and global positioning for tile mosaics.
//!
//! Pairwise measurements ([`tilestitch_core::PairwiseEdge`]) form an undirected
//! graph over tiles. [`AlignmentGraph::spanning_tree`] keeps the most
//! confident edges that join every tile, and [`GlobalPositionSolver`] turns
//! the tree (plus, optionally, every accepted loop-closing edge) into one
//! absolute position per tile.

mod graph;
mod solver;
mod union_find;

pub use graph::{AlignmentGraph, GraphError, SpanningTree};
pub use solver::{GlobalPositionSolver, GlobalPositions, SolverParams};
pub use union_find::UnionFind;
