//! Chain discovery and liberty counting.
//!
//! All flood fills here are iterative with an explicit stack and a visited
//! grid sized to the board, so deep snakes on large boards cannot overflow
//! the call stack.

use crate::board::{Board, neighbors};
use crate::coord::Point;

/// Collect the chain containing `(i, j)`: every stone of the same color
/// reachable through 4-adjacency. Returns an empty chain for an empty point.
pub fn chain_at(board: &Board, (i, j): Point) -> Vec<Point> {
    let Some(color) = board.get(i, j) else {
        return Vec::new();
    };
    let size = board.size();
    let mut stack = vec![(i, j)];
    let mut visited = vec![false; size * size];
    let mut chain = Vec::new();

    while let Some((ci, cj)) = stack.pop() {
        let idx = ci * size + cj;
        if visited[idx] {
            continue;
        }
        visited[idx] = true;
        if board.get(ci, cj) != Some(color) {
            continue;
        }
        chain.push((ci, cj));
        for (ni, nj) in neighbors(size, ci, cj) {
            if !visited[ni * size + nj] && board.get(ni, nj) == Some(color) {
                stack.push((ni, nj));
            }
        }
    }
    chain
}

/// Number of empty points adjacent to a single stone, ignoring the chain it
/// belongs to.
pub fn stone_liberties(board: &Board, (i, j): Point) -> usize {
    neighbors(board.size(), i, j)
        .filter(|&(ni, nj)| board.get(ni, nj).is_none())
        .count()
}

/// Liberty count of the chain at `p`, computed as the sum of every member
/// stone's empty-neighbor count.
///
/// An empty point touching several stones of the chain is counted once per
/// stone, so this overestimates for anything but a lone stone. Zero still
/// means zero, which is all the capture and suicide rules look at. Use
/// [`distinct_liberties`] for the exact figure.
pub fn chain_liberties(board: &Board, p: Point) -> usize {
    chain_at(board, p)
        .into_iter()
        .map(|s| stone_liberties(board, s))
        .sum()
}

/// Exact number of distinct empty points adjacent to the chain at `p`.
pub fn distinct_liberties(board: &Board, p: Point) -> usize {
    let size = board.size();
    let mut seen = vec![false; size * size];
    let mut count = 0;
    for (si, sj) in chain_at(board, p) {
        for (ni, nj) in neighbors(size, si, sj) {
            let idx = ni * size + nj;
            if board.get(ni, nj).is_none() && !seen[idx] {
                seen[idx] = true;
                count += 1;
            }
        }
    }
    count
}

/// Every chain on the board, scanned row by row from the top-left corner.
pub fn all_groups(board: &Board) -> Vec<Vec<Point>> {
    let size = board.size();
    let mut seen = vec![false; size * size];
    let mut groups = Vec::new();
    for i in 0..size {
        for j in 0..size {
            if seen[i * size + j] || board.get(i, j).is_none() {
                continue;
            }
            let chain = chain_at(board, (i, j));
            for &(u, v) in &chain {
                seen[u * size + v] = true;
            }
            groups.push(chain);
        }
    }
    groups
}

/// Average ownership over the stones of a chain.
pub fn chain_heat(board: &Board, chain: &[Point]) -> f64 {
    if chain.is_empty() {
        return 0.0;
    }
    let total: f64 = chain.iter().map(|&(i, j)| board.ownership(i, j)).sum();
    total / chain.len() as f64
}

/// Replace each stone's ownership by its chain's average, so that every stone
/// of a group shows the same life-and-death estimate. Empty points keep their
/// own value.
pub fn merge_groups_heat(board: &mut Board) {
    for chain in all_groups(board) {
        let heat = chain_heat(board, &chain);
        for (i, j) in chain {
            board.set_ownership(i, j, heat);
        }
    }
}
