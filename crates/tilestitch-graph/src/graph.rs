use crate::union_find::UnionFind;
use std::cmp::Ordering;
use tilestitch_core::PairwiseEdge;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors produced while building or traversing the alignment graph.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("edge ({a}, {b}) references a node outside 0..{node_count}")]
    EdgeOutOfRange {
        a: usize,
        b: usize,
        node_count: usize,
    },
    #[error("alignment graph is disconnected into {} groups", groups.len())]
    Disconnected { groups: Vec<Vec<usize>> },
    #[error("spanning tree does not reach node {node}")]
    TreeDoesNotSpan { node: usize },
}

/// Candidate graph over tiles: nodes are tile indices, edges are pairwise measurements.
///
/// An edge is *accepted* when its confidence is positive and at least `min_confidence`;
/// rejected edges are kept for reporting but never used for positioning.
#[derive(Clone, Debug)]
pub struct AlignmentGraph {
    node_count: usize,
    edges: Vec<PairwiseEdge>,
    min_confidence: f64,
}

/// Maximum-confidence spanning tree, as indices into [`AlignmentGraph::edges`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpanningTree {
    pub root: usize,
    /// Edge indices in selection order (descending confidence).
    pub edges: Vec<usize>,
}

impl SpanningTree {
    pub fn contains(&self, edge: usize) -> bool {
        self.edges.contains(&edge)
    }
}

impl AlignmentGraph {
    pub fn new(
        node_count: usize,
        edges: Vec<PairwiseEdge>,
        min_confidence: f64,
    ) -> Result<Self, GraphError> {
        if let Some(e) = edges
            .iter()
            .find(|e| e.a >= node_count || e.b >= node_count)
        {
            return Err(GraphError::EdgeOutOfRange {
                a: e.a,
                b: e.b,
                node_count,
            });
        }
        Ok(Self {
            node_count,
            edges,
            min_confidence,
        })
    }

    #[inline]
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    #[inline]
    pub fn edges(&self) -> &[PairwiseEdge] {
        &self.edges
    }

    #[inline]
    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    #[inline]
    pub fn is_accepted(&self, edge: &PairwiseEdge) -> bool {
        edge.confidence > 0.0 && edge.confidence >= self.min_confidence
    }

    /// Accepted edges with their indices.
    pub fn accepted_edges(&self) -> impl Iterator<Item = (usize, &PairwiseEdge)> + '_ {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, e)| self.is_accepted(e))
    }

    /// Connected components over accepted edges, each sorted, ordered by smallest node.
    pub fn components(&self) -> Vec<Vec<usize>> {
        let mut uf = UnionFind::new(self.node_count);
        for (_, e) in self.accepted_edges() {
            uf.union(e.a, e.b);
        }
        uf.groups()
    }

    /// Kruskal selection of the maximum-confidence spanning tree rooted at node 0.
    ///
    /// Edges are consumed by descending confidence, ties by ascending `(a, b)`.
    /// Fails with [`GraphError::Disconnected`] if the accepted edges do not join
    /// every node.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self), fields(nodes = self.node_count, edges = self.edges.len()))
    )]
    pub fn spanning_tree(&self) -> Result<SpanningTree, GraphError> {
        let mut order: Vec<usize> = self.accepted_edges().map(|(i, _)| i).collect();
        order.sort_by(|&i, &j| {
            let (ei, ej) = (&self.edges[i], &self.edges[j]);
            ej.confidence
                .partial_cmp(&ei.confidence)
                .unwrap_or(Ordering::Equal)
                .then_with(|| (ei.a, ei.b).cmp(&(ej.a, ej.b)))
                .then_with(|| i.cmp(&j))
        });

        let mut uf = UnionFind::new(self.node_count);
        let mut tree = Vec::with_capacity(self.node_count.saturating_sub(1));
        for idx in order {
            let e = &self.edges[idx];
            if uf.union(e.a, e.b) {
                tree.push(idx);
                if uf.sets() == 1 {
                    break;
                }
            }
        }

        if uf.sets() > 1 {
            let groups = uf.groups();
            log::warn!(
                "alignment graph split into {} groups over {} nodes",
                groups.len(),
                self.node_count
            );
            return Err(GraphError::Disconnected { groups });
        }

        Ok(SpanningTree {
            root: 0,
            edges: tree,
        })
    }
}
