//! 4-connected neighbour graph over checkerboard corners.

use crate::corners::XCorner;
use crate::params::GridGraphParams;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Vector2;
use std::collections::{HashMap, VecDeque};
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborDirection {
    Right,
    Left,
    Up,
    Down,
}

impl NeighborDirection {
    fn opposite(self) -> Self {
        match self {
            Self::Right => Self::Left,
            Self::Left => Self::Right,
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }

    fn grid_step(self) -> (i32, i32) {
        match self {
            Self::Right => (1, 0),
            Self::Left => (-1, 0),
            Self::Up => (0, -1),
            Self::Down => (0, 1),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeNeighbor {
    pub direction: NeighborDirection,
    pub index: usize,
    pub distance: f64,
    pub score: f64,
}

/// Absolute difference of two angles, in `[0, pi]`.
fn angle_diff_abs(a: f64, b: f64) -> f64 {
    let mut diff = (b - a).rem_euclid(2.0 * PI);
    if diff >= PI {
        diff -= 2.0 * PI;
    }
    diff.abs()
}

/// Angle between an undirected axis and a directed vector, in `[0, pi/2]`.
fn axis_vec_diff(axis_angle: f64, vec_angle: f64) -> f64 {
    let d = angle_diff_abs(axis_angle, vec_angle);
    d.min(PI - d)
}

fn is_orthogonal(a: f64, b: f64, tolerance: f64) -> bool {
    (FRAC_PI_2 - angle_diff_abs(a, b)).abs() <= tolerance.abs()
}

/// Edge check without direction: orientations orthogonal, edge at 45
/// degrees to both bright diagonals, length inside the spacing window.
fn edge_score(corner: &XCorner, neighbor: &XCorner, params: &GridGraphParams) -> Option<(f64, f64)> {
    let tol = params.orientation_tolerance_deg.to_radians();
    if !is_orthogonal(corner.orientation, neighbor.orientation, tol) {
        return None;
    }

    let v = neighbor.position - corner.position;
    let distance = v.norm();
    if distance < params.min_spacing_pix || distance > params.max_spacing_pix {
        return None;
    }

    let edge_angle = v.y.atan2(v.x);
    let score_corner = (axis_vec_diff(corner.orientation, edge_angle) - FRAC_PI_4).abs();
    let score_neighbor = (axis_vec_diff(neighbor.orientation, edge_angle) - FRAC_PI_4).abs();
    if score_corner > tol || score_neighbor > tol {
        return None;
    }

    let score_orientation =
        (FRAC_PI_2 - angle_diff_abs(corner.orientation, neighbor.orientation)).abs();
    Some((distance, score_corner + score_neighbor + score_orientation))
}

/// Dominant grid axis angle, in `(-pi/4, pi/4]`, from a set of edge vectors.
///
/// Edge angles are averaged in quadruple-angle space so that the four grid
/// directions collapse onto one.
fn dominant_axis(edges: &[Vector2<f64>]) -> f64 {
    let mut sum = Vector2::<f64>::zeros();
    for e in edges {
        let a = 4.0 * e.y.atan2(e.x);
        sum += Vector2::new(a.cos(), a.sin());
    }
    if sum.norm_squared() < 1e-12 {
        return 0.0;
    }
    let theta = 0.25 * sum.y.atan2(sum.x);
    if theta <= -FRAC_PI_4 {
        theta + FRAC_PI_2
    } else {
        theta
    }
}

fn classify(v: &Vector2<f64>, axis: f64) -> NeighborDirection {
    let u = Vector2::new(axis.cos(), axis.sin());
    let w = Vector2::new(-axis.sin(), axis.cos());
    let (pu, pw) = (v.dot(&u), v.dot(&w));
    if pu.abs() > pw.abs() {
        if pu >= 0.0 {
            NeighborDirection::Right
        } else {
            NeighborDirection::Left
        }
    } else if pw >= 0.0 {
        NeighborDirection::Down
    } else {
        NeighborDirection::Up
    }
}

/// Keep at most one neighbour per direction: the nearest, then the lowest
/// score.
fn select_neighbors(candidates: Vec<NodeNeighbor>) -> Vec<NodeNeighbor> {
    let mut best: [Option<NodeNeighbor>; 4] = [None, None, None, None];
    for candidate in candidates {
        let slot = match candidate.direction {
            NeighborDirection::Right => &mut best[0],
            NeighborDirection::Left => &mut best[1],
            NeighborDirection::Up => &mut best[2],
            NeighborDirection::Down => &mut best[3],
        };
        let replace = match slot {
            None => true,
            Some(current) => {
                candidate.distance < current.distance
                    || (candidate.distance == current.distance && candidate.score < current.score)
            }
        };
        if replace {
            *slot = Some(candidate);
        }
    }
    best.into_iter().flatten().collect()
}

pub struct GridGraph {
    /// For each node, its neighbours; every link is mutual.
    pub neighbors: Vec<Vec<NodeNeighbor>>,
}

impl GridGraph {
    pub fn new(corners: &[XCorner], params: &GridGraphParams) -> Self {
        let coords = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect::<Vec<_>>();
        let tree: KdTree<f64, 2> = (&coords).into();
        // the query point itself comes back first
        let k = params.k_neighbors.max(1) + 1;

        let candidates: Vec<Vec<(usize, f64, f64)>> = coords
            .iter()
            .enumerate()
            .map(|(i, query_point)| {
                tree.nearest_n::<SquaredEuclidean>(query_point, k)
                    .into_iter()
                    .map(|nn| nn.item as usize)
                    .filter(|&j| j != i)
                    .filter_map(|j| {
                        edge_score(&corners[i], &corners[j], params).map(|(d, s)| (j, d, s))
                    })
                    .collect()
            })
            .collect();

        let edges: Vec<Vector2<f64>> = candidates
            .iter()
            .enumerate()
            .flat_map(|(i, list)| {
                list.iter()
                    .map(move |&(j, _, _)| corners[j].position - corners[i].position)
            })
            .collect();
        let axis = dominant_axis(&edges);
        log::debug!(
            "grid graph: {} corners, {} candidate edges, axis {:.1} deg",
            corners.len(),
            edges.len(),
            axis.to_degrees()
        );

        let selected: Vec<Vec<NodeNeighbor>> = candidates
            .into_iter()
            .enumerate()
            .map(|(i, list)| {
                let nodes = list
                    .into_iter()
                    .map(|(j, distance, score)| NodeNeighbor {
                        direction: classify(&(corners[j].position - corners[i].position), axis),
                        index: j,
                        distance,
                        score,
                    })
                    .collect();
                select_neighbors(nodes)
            })
            .collect();

        let neighbors = selected
            .iter()
            .enumerate()
            .map(|(i, list)| {
                list.iter()
                    .filter(|n| {
                        selected[n.index]
                            .iter()
                            .any(|back| back.index == i && back.direction == n.direction.opposite())
                    })
                    .cloned()
                    .collect()
            })
            .collect();

        Self { neighbors }
    }
}

pub fn connected_components(graph: &GridGraph) -> Vec<Vec<usize>> {
    let mut visited = vec![false; graph.neighbors.len()];
    let mut components = Vec::new();

    for start in 0..graph.neighbors.len() {
        if visited[start] {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            component.push(node);
            for neighbor in &graph.neighbors[node] {
                if !visited[neighbor.index] {
                    stack.push(neighbor.index);
                }
            }
        }
        components.push(component);
    }

    components
}

/// Integer grid coordinates for every node of `component` by breadth-first
/// walk. Returns `None` when the walk is inconsistent: one node reached at
/// two coordinates, or two nodes on the same coordinate.
pub fn assign_grid_coordinates(graph: &GridGraph, component: &[usize]) -> Option<Vec<(usize, i32, i32)>> {
    let start = *component.first()?;
    let mut at_node: HashMap<usize, (i32, i32)> = HashMap::new();
    let mut at_coord: HashMap<(i32, i32), usize> = HashMap::new();
    let mut queue = VecDeque::from([(start, 0, 0)]);

    while let Some((node, i, j)) = queue.pop_front() {
        if let Some(&seen) = at_node.get(&node) {
            if seen != (i, j) {
                return None;
            }
            continue;
        }
        if at_coord.insert((i, j), node).is_some() {
            return None;
        }
        at_node.insert(node, (i, j));

        for neighbor in &graph.neighbors[node] {
            let (di, dj) = neighbor.direction.grid_step();
            queue.push_back((neighbor.index, i + di, j + dj));
        }
    }

    let mut coords: Vec<(usize, i32, i32)> =
        at_node.into_iter().map(|(n, (i, j))| (n, i, j)).collect();
    coords.sort_unstable();
    Some(coords)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point2;

    fn make_corner(x: f64, y: f64, orientation: f64) -> XCorner {
        XCorner {
            position: Point2::new(x, y),
            orientation,
            strength: 1.0,
        }
    }

    fn neighbor_map(neighbors: &[NodeNeighbor]) -> HashMap<NeighborDirection, &NodeNeighbor> {
        neighbors.iter().map(|n| (n.direction, n)).collect()
    }

    fn regular_grid(cols: usize, rows: usize, spacing: f64, rotation: f64) -> Vec<XCorner> {
        let (s, c) = rotation.sin_cos();
        let mut corners = Vec::new();
        for j in 0..rows {
            for i in 0..cols {
                let orientation = if (i + j) % 2 == 0 { FRAC_PI_4 } else { 3.0 * FRAC_PI_4 };
                let (x, y) = (i as f64 * spacing, j as f64 * spacing);
                corners.push(make_corner(
                    100.0 + c * x - s * y,
                    100.0 + s * x + c * y,
                    (orientation + rotation).rem_euclid(PI),
                ));
            }
        }
        corners
    }

    fn params() -> GridGraphParams {
        GridGraphParams {
            min_spacing_pix: 5.0,
            max_spacing_pix: 15.0,
            ..Default::default()
        }
    }

    #[test]
    fn finds_axis_neighbors_in_regular_grid() {
        let cols = 3;
        let corners = regular_grid(cols, 3, 10.0, 0.0);
        let graph = GridGraph::new(&corners, &params());
        let idx = |i: usize, j: usize| j * cols + i;

        let center = neighbor_map(&graph.neighbors[idx(1, 1)]);
        assert_eq!(4, center.len());
        assert_eq!(idx(0, 1), center[&NeighborDirection::Left].index);
        assert_eq!(idx(2, 1), center[&NeighborDirection::Right].index);
        assert_eq!(idx(1, 0), center[&NeighborDirection::Up].index);
        assert_eq!(idx(1, 2), center[&NeighborDirection::Down].index);
        for n in center.values() {
            assert!((n.distance - 10.0).abs() < 1e-9);
        }

        let top_left = neighbor_map(&graph.neighbors[idx(0, 0)]);
        assert_eq!(2, top_left.len());
        assert!(top_left.contains_key(&NeighborDirection::Right));
        assert!(top_left.contains_key(&NeighborDirection::Down));
    }

    #[test]
    fn rejects_neighbors_when_orientation_relation_invalid() {
        let corners = vec![make_corner(0.0, 0.0, FRAC_PI_4), make_corner(10.0, 0.0, FRAC_PI_4)];
        let graph = GridGraph::new(&corners, &params());
        assert!(graph.neighbors[0].is_empty());
        assert!(graph.neighbors[1].is_empty());
    }

    #[test]
    fn rejects_neighbors_outside_distance_window() {
        let corners = vec![make_corner(0.0, 0.0, FRAC_PI_4), make_corner(30.0, 0.0, 3.0 * FRAC_PI_4)];
        let graph = GridGraph::new(&corners, &params());
        assert!(graph.neighbors[0].is_empty());
    }

    #[test]
    fn keeps_nearest_candidate_per_direction() {
        let corners = vec![
            make_corner(0.0, 0.0, FRAC_PI_4),
            make_corner(10.0, 0.0, 3.0 * FRAC_PI_4),
            make_corner(12.0, 0.5, 3.0 * FRAC_PI_4 + 0.1),
            make_corner(-10.0, 0.0, 3.0 * FRAC_PI_4),
        ];
        let graph = GridGraph::new(&corners, &params());
        let map = neighbor_map(&graph.neighbors[0]);
        assert_eq!(2, map.len());
        assert_eq!(1, map[&NeighborDirection::Right].index);
        assert_eq!(3, map[&NeighborDirection::Left].index);
    }

    #[test]
    fn rotated_grid_gets_consistent_coordinates() {
        let (cols, rows) = (4, 3);
        let corners = regular_grid(cols, rows, 10.0, 0.5);
        let graph = GridGraph::new(&corners, &params());

        let components = connected_components(&graph);
        assert_eq!(components.len(), 1);
        let coords = assign_grid_coordinates(&graph, &components[0]).expect("consistent");
        assert_eq!(coords.len(), cols * rows);

        let (i0, j0) = (coords[0].1, coords[0].2);
        for &(node, i, j) in &coords {
            assert_eq!(((i - i0) as usize, (j - j0) as usize), (node % cols, node / cols));
        }
    }

    #[test]
    fn separate_clusters_are_separate_components() {
        let mut corners = regular_grid(2, 2, 10.0, 0.0);
        corners.extend(regular_grid(2, 2, 10.0, 0.0).into_iter().map(|mut c| {
            c.position.x += 200.0;
            c
        }));
        let graph = GridGraph::new(&corners, &params());
        assert_eq!(connected_components(&graph).len(), 2);
    }

    #[test]
    fn dominant_axis_folds_the_four_grid_directions() {
        let a = 0.3f64;
        let edges: Vec<Vector2<f64>> = (0..4)
            .map(|q| {
                let t = a + f64::from(q) * FRAC_PI_2;
                Vector2::new(t.cos(), t.sin()) * 10.0
            })
            .collect();
        assert!((dominant_axis(&edges) - a).abs() < 1e-9);
        assert_eq!(dominant_axis(&[]), 0.0);
    }

    #[test]
    fn neighbor_search_is_limited_to_k_nearest() {
        // a tight cluster of decoys sits between the corner and its partner
        let mut corners = vec![make_corner(0.0, 0.0, FRAC_PI_4), make_corner(10.0, 0.0, 3.0 * FRAC_PI_4)];
        for d in 0..3 {
            corners.push(make_corner(2.0, 2.0 + f64::from(d) * 0.2, 3.0 * FRAC_PI_4));
        }
        let narrow = GridGraphParams {
            k_neighbors: 2,
            ..params()
        };
        assert!(GridGraph::new(&corners, &narrow).neighbors[0].is_empty());
        assert_eq!(GridGraph::new(&corners, &params()).neighbors[0].len(), 1);
    }
}
