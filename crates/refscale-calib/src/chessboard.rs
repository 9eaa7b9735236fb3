//! Full checkerboard detection: corners, grid graph, board labelling.

use crate::corners::{detect_corners, XCorner};
use crate::gridgraph::{assign_grid_coordinates, connected_components, GridGraph};
use crate::params::{BoardSpec, CornerDetectorParams, GridGraphParams};
use image::GrayImage;
use log::debug;
use nalgebra::Point2;

/// Inner corners of one checkerboard, row-major (`index = j * cols + i`).
#[derive(Clone, Debug, PartialEq)]
pub struct ChessboardDetection {
    pub cols: u32,
    pub rows: u32,
    pub corners: Vec<Point2<f64>>,
}

/// Detector bound to a board layout.
#[derive(Clone, Debug, Default)]
pub struct ChessboardDetector {
    pub board: BoardSpec,
    pub detector: CornerDetectorParams,
    pub graph: GridGraphParams,
}

impl ChessboardDetector {
    pub fn new(board: BoardSpec, detector: CornerDetectorParams, graph: GridGraphParams) -> Self {
        Self {
            board,
            detector,
            graph,
        }
    }

    pub fn detect(&self, img: &GrayImage) -> Option<ChessboardDetection> {
        let corners = detect_corners(img, &self.detector);
        self.detect_from_corners(&corners)
    }

    /// Assemble a complete `cols x rows` board from detected corners.
    ///
    /// The labelling puts grid index `(0, 0)` on the board corner closest to
    /// the image origin and runs `i` along the longer image direction when the
    /// board is seen transposed.
    pub fn detect_from_corners(&self, corners: &[XCorner]) -> Option<ChessboardDetection> {
        let (cols, rows) = (self.board.cols as i32, self.board.rows as i32);
        let expected = self.board.corner_count();
        if corners.len() < expected {
            debug!(
                "chessboard: {} corners, need {}",
                corners.len(),
                expected
            );
            return None;
        }

        let graph = GridGraph::new(corners, &self.graph);
        let mut best: Option<(f64, Vec<Point2<f64>>)> = None;

        for component in connected_components(&graph) {
            if component.len() != expected {
                continue;
            }
            let Some(coords) = assign_grid_coordinates(&graph, &component) else {
                continue;
            };
            let Some(labelled) = label_board(corners, &coords, cols, rows) else {
                continue;
            };
            let strength: f64 = component.iter().map(|&n| corners[n].strength).sum();
            if best.as_ref().is_none_or(|(s, _)| strength > *s) {
                best = Some((strength, labelled));
            }
        }

        let (_, points) = best?;
        Some(ChessboardDetection {
            cols: self.board.cols,
            rows: self.board.rows,
            corners: points,
        })
    }
}

/// Convenience wrapper around [`ChessboardDetector`].
pub fn detect_chessboard(
    img: &GrayImage,
    board: &BoardSpec,
    detector: &CornerDetectorParams,
    graph: &GridGraphParams,
) -> Option<ChessboardDetection> {
    ChessboardDetector::new(*board, detector.clone(), graph.clone()).detect(img)
}

/// Map BFS coordinates onto a `cols x rows` row-major layout.
fn label_board(
    corners: &[XCorner],
    coords: &[(usize, i32, i32)],
    cols: i32,
    rows: i32,
) -> Option<Vec<Point2<f64>>> {
    let min_i = coords.iter().map(|c| c.1).min()?;
    let max_i = coords.iter().map(|c| c.1).max()?;
    let min_j = coords.iter().map(|c| c.2).min()?;
    let max_j = coords.iter().map(|c| c.2).max()?;
    let (span_i, span_j) = (max_i - min_i + 1, max_j - min_j + 1);

    let transpose = if (span_i, span_j) == (cols, rows) {
        false
    } else if (span_i, span_j) == (rows, cols) {
        true
    } else {
        return None;
    };

    let local: Vec<(usize, i32, i32)> = coords
        .iter()
        .map(|&(n, i, j)| {
            let (i, j) = (i - min_i, j - min_j);
            if transpose {
                (n, j, i)
            } else {
                (n, i, j)
            }
        })
        .collect();

    let mut grid = vec![None; (cols * rows) as usize];
    for &(n, i, j) in &local {
        grid[(j * cols + i) as usize] = Some(corners[n].position);
    }
    let grid: Vec<Point2<f64>> = grid.into_iter().collect::<Option<_>>()?;

    // pick the flip whose (0, 0) corner is nearest the image origin
    let at = |i: i32, j: i32| grid[(j * cols + i) as usize];
    let outer = [
        (false, false, at(0, 0)),
        (true, false, at(cols - 1, 0)),
        (false, true, at(0, rows - 1)),
        (true, true, at(cols - 1, rows - 1)),
    ];
    let (flip_i, flip_j, _) = outer
        .iter()
        .copied()
        .min_by(|a, b| (a.2.x + a.2.y).total_cmp(&(b.2.x + b.2.y)))?;

    let mut out = Vec::with_capacity(grid.len());
    for j in 0..rows {
        for i in 0..cols {
            let si = if flip_i { cols - 1 - i } else { i };
            let sj = if flip_j { rows - 1 - j } else { j };
            out.push(at(si, sj));
        }
    }
    Some(out)
}
