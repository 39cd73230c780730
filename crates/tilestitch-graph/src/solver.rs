use crate::graph::{AlignmentGraph, GraphError, SpanningTree};
use nalgebra::{DMatrix, Vector2};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Global position solver parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SolverParams {
    /// Run least-squares refinement over all accepted edges after tree accumulation.
    pub refine: bool,
    /// Per-tile residual (pixels) above which a tile is reported as low-confidence.
    pub max_residual: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            refine: true,
            max_residual: 2.0,
        }
    }
}

/// Solved positions, one per node, root at the origin.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalPositions {
    pub positions: Vec<Vector2<f64>>,
    /// RMS edge residual per node over its accepted edges.
    pub residuals: Vec<f64>,
    /// Whether the least-squares refinement was applied.
    pub refined: bool,
}

impl GlobalPositions {
    /// Nodes whose residual exceeds `max_residual`, ascending.
    pub fn low_confidence(&self, max_residual: f64) -> Vec<usize> {
        self.residuals
            .iter()
            .enumerate()
            .filter(|(_, &r)| r > max_residual)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Converts relative edge shifts into one absolute position per node.
#[derive(Clone, Debug, Default)]
pub struct GlobalPositionSolver {
    params: SolverParams,
}

impl GlobalPositionSolver {
    pub fn new(params: SolverParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &SolverParams {
        &self.params
    }

    /// Accumulate shifts along `tree` from its root, then optionally refine.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, graph, tree), fields(nodes = graph.node_count()))
    )]
    pub fn solve(
        &self,
        graph: &AlignmentGraph,
        tree: &SpanningTree,
    ) -> Result<GlobalPositions, GraphError> {
        let tree_positions = accumulate_tree(graph, tree)?;

        let (positions, refined) = if self.params.refine {
            match refine_least_squares(graph, tree.root, &tree_positions) {
                Some(p) => (p, true),
                None => {
                    log::warn!("least-squares refinement is singular, keeping tree positions");
                    (tree_positions, false)
                }
            }
        } else {
            (tree_positions, false)
        };

        let residuals = node_residuals(graph, &positions);
        Ok(GlobalPositions {
            positions,
            residuals,
            refined,
        })
    }
}

/// Breadth-first accumulation of edge shifts along the tree.
fn accumulate_tree(
    graph: &AlignmentGraph,
    tree: &SpanningTree,
) -> Result<Vec<Vector2<f64>>, GraphError> {
    let n = graph.node_count();
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &idx in &tree.edges {
        let e = &graph.edges()[idx];
        adjacency[e.a].push(idx);
        adjacency[e.b].push(idx);
    }

    let mut positions: Vec<Option<Vector2<f64>>> = vec![None; n];
    if n == 0 {
        return Ok(Vec::new());
    }
    positions[tree.root] = Some(Vector2::zeros());
    let mut queue = VecDeque::from([tree.root]);
    while let Some(node) = queue.pop_front() {
        let Some(here) = positions[node] else {
            continue;
        };
        for &idx in &adjacency[node] {
            let e = &graph.edges()[idx];
            let next = e.other(node);
            if positions[next].is_none() {
                positions[next] = Some(here + e.shift_from(node));
                queue.push_back(next);
            }
        }
    }

    positions
        .into_iter()
        .enumerate()
        .map(|(node, p)| p.ok_or(GraphError::TreeDoesNotSpan { node }))
        .collect()
}

/// Minimize `sum |p_b - p_a - shift|^2` over accepted edges with the root pinned.
///
/// Solves the normal equations of the reduced graph Laplacian; x and y share
/// the same matrix and are solved together. Returns `None` if the system is
/// not positive definite.
fn refine_least_squares(
    graph: &AlignmentGraph,
    root: usize,
    initial: &[Vector2<f64>],
) -> Option<Vec<Vector2<f64>>> {
    let n = graph.node_count();
    if n <= 1 {
        return Some(initial.to_vec());
    }

    // Reduced index: nodes after the root move down by one.
    let reduced = |node: usize| -> Option<usize> {
        match node.cmp(&root) {
            std::cmp::Ordering::Less => Some(node),
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Greater => Some(node - 1),
        }
    };

    let m = n - 1;
    let mut lap = DMatrix::<f64>::zeros(m, m);
    let mut rhs = DMatrix::<f64>::zeros(m, 2);
    let root_pos = initial[root];

    for (_, e) in graph.accepted_edges() {
        let (ra, rb) = (reduced(e.a), reduced(e.b));
        if let Some(ia) = ra {
            lap[(ia, ia)] += 1.0;
            rhs[(ia, 0)] -= e.shift.x;
            rhs[(ia, 1)] -= e.shift.y;
        }
        if let Some(ib) = rb {
            lap[(ib, ib)] += 1.0;
            rhs[(ib, 0)] += e.shift.x;
            rhs[(ib, 1)] += e.shift.y;
        }
        match (ra, rb) {
            (Some(ia), Some(ib)) => {
                lap[(ia, ib)] -= 1.0;
                lap[(ib, ia)] -= 1.0;
            }
            (None, Some(ib)) => {
                rhs[(ib, 0)] += root_pos.x;
                rhs[(ib, 1)] += root_pos.y;
            }
            (Some(ia), None) => {
                rhs[(ia, 0)] += root_pos.x;
                rhs[(ia, 1)] += root_pos.y;
            }
            (None, None) => {}
        }
    }

    let solution = lap.cholesky()?.solve(&rhs);

    let mut out = Vec::with_capacity(n);
    for node in 0..n {
        match reduced(node) {
            None => out.push(root_pos),
            Some(i) => out.push(Vector2::new(solution[(i, 0)], solution[(i, 1)])),
        }
    }
    Some(out)
}

/// RMS of `|p_b - p_a - shift|` over each node's accepted edges.
fn node_residuals(graph: &AlignmentGraph, positions: &[Vector2<f64>]) -> Vec<f64> {
    let n = graph.node_count();
    let mut sum_sq = vec![0.0f64; n];
    let mut count = vec![0usize; n];
    for (_, e) in graph.accepted_edges() {
        let r = (positions[e.b] - positions[e.a] - e.shift).norm_squared();
        for node in [e.a, e.b] {
            sum_sq[node] += r;
            count[node] += 1;
        }
    }
    sum_sq
        .into_iter()
        .zip(count)
        .map(|(s, c)| if c == 0 { 0.0 } else { (s / c as f64).sqrt() })
        .collect()
}
