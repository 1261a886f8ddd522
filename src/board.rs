//! Random board generation with a solvability guarantee (spec §4.C).
//!
//! Barriers are accepted by rejection sampling: sample a cell and a
//! direction, reject out-of-grid or overlapping placements, reject any
//! placement that would strand either player's path to their goal row.

use rand::Rng;

use crate::protocol::{Barrier, Cell, Field};

type IBarrier = [(i32, i32); 4];

/// Produces a field with `barrier_count` accepted barriers. `rng` is
/// injectable so tests can pin a seed (spec §4.C "tests must be able to
/// inject a seed").
pub fn generate<R: Rng + ?Sized>(
    width: u8,
    height: u8,
    barrier_count: u8,
    position: Cell,
    opponent_position: Cell,
    rng: &mut R,
) -> Field {
    let barriers = generate_barriers(position, opponent_position, barrier_count, width, height, rng);
    Field {
        width,
        height,
        position,
        opponent_position,
        barriers,
    }
}

fn generate_barriers<R: Rng + ?Sized>(
    position: Cell,
    opponent_position: Cell,
    count: u8,
    width: u8,
    height: u8,
    rng: &mut R,
) -> Vec<Barrier> {
    if count == 0 {
        return Vec::new();
    }

    let mut accepted: Vec<IBarrier> = Vec::with_capacity(count as usize);
    loop {
        let row = rng.gen_range(0..height as i32);
        let col = rng.gen_range(0..width as i32);
        let dir = rng.gen_range(0u8..8);

        let candidate = random_barrier(row, col, dir);
        if !is_valid_obstacle(&candidate, width, height) {
            continue;
        }
        if is_step_over(candidate[0], candidate[1], &accepted)
            || is_step_over(candidate[2], candidate[3], &accepted)
        {
            continue;
        }

        let mut trial = accepted.clone();
        trial.push(candidate);
        if !path_exists(position, &trial, width, height)
            || !path_exists(opponent_position, &trial, width, height)
        {
            continue;
        }

        accepted.push(candidate);
        if accepted.len() == count as usize {
            break;
        }
    }

    accepted.iter().map(to_wire_barrier).collect()
}

fn to_wire_barrier(b: &IBarrier) -> Barrier {
    let cell = |(r, c): (i32, i32)| [r as u8, c as u8];
    [cell(b[0]), cell(b[1]), cell(b[2]), cell(b[3])]
}

/// A four-cell wall segment blocking the edges (b[0],b[1]) and (b[2],b[3]).
fn random_barrier(row: i32, col: i32, dir: u8) -> IBarrier {
    match dir {
        0 => [(row, col), (row + 1, col), (row, col - 1), (row + 1, col - 1)],
        1 => [(row, col), (row + 1, col), (row, col + 1), (row + 1, col + 1)],
        2 => [(row, col), (row - 1, col), (row, col - 1), (row - 1, col - 1)],
        3 => [(row, col), (row - 1, col), (row, col + 1), (row - 1, col + 1)],
        4 => [(row, col), (row, col + 1), (row + 1, col), (row + 1, col + 1)],
        5 => [(row, col), (row, col - 1), (row + 1, col), (row + 1, col - 1)],
        6 => [(row, col), (row, col + 1), (row - 1, col), (row - 1, col + 1)],
        _ => [(row, col), (row, col - 1), (row - 1, col), (row - 1, col - 1)],
    }
}

fn is_valid_obstacle(barrier: &IBarrier, width: u8, height: u8) -> bool {
    barrier
        .iter()
        .all(|&(r, c)| r >= 0 && r < height as i32 && c >= 0 && c < width as i32)
}

/// Symmetric: a barrier blocks the move in either direction (spec §8).
fn is_step_over(from: (i32, i32), to: (i32, i32), barriers: &[IBarrier]) -> bool {
    barriers.iter().any(|b| {
        (from == b[0] && to == b[1])
            || (from == b[2] && to == b[3])
            || (to == b[0] && from == b[1])
            || (to == b[2] && from == b[3])
    })
}

fn goal_row(position_row: i32, height: u8) -> i32 {
    if position_row == 0 {
        height as i32 - 1
    } else {
        0
    }
}

/// Depth-first reachability search with a visited bitmap (spec §4.C).
fn path_exists(position: Cell, barriers: &[IBarrier], width: u8, height: u8) -> bool {
    let start = (position[0] as i32, position[1] as i32);
    let goal = goal_row(start.0, height);
    if start.0 == goal {
        return true;
    }

    let w = width as usize;
    let h = height as usize;
    let mut visited = vec![false; w * h];
    visited[start.0 as usize * w + start.1 as usize] = true;

    let mut stack = vec![start];
    while let Some(current) = stack.pop() {
        for next in expand_moves(current, barriers, width, height) {
            if next.0 == goal {
                return true;
            }
            let idx = next.0 as usize * w + next.1 as usize;
            if !visited[idx] {
                visited[idx] = true;
                stack.push(next);
            }
        }
    }
    false
}

fn expand_moves(
    pos: (i32, i32),
    barriers: &[IBarrier],
    width: u8,
    height: u8,
) -> Vec<(i32, i32)> {
    let (row, col) = pos;
    [(row + 1, col), (row, col + 1), (row, col - 1), (row - 1, col)]
        .into_iter()
        .filter(|&(r, c)| {
            r >= 0
                && r < height as i32
                && c >= 0
                && c < width as i32
                && !is_step_over(pos, (r, c), barriers)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn zero_barriers_is_immediate() {
        let mut rng = StdRng::seed_from_u64(1);
        let field = generate(9, 9, 0, [0, 4], [8, 4], &mut rng);
        assert!(field.barriers.is_empty());
    }

    #[test]
    fn height_one_has_trivial_path() {
        assert!(path_exists([0, 0], &[], 4, 1));
    }

    #[test]
    fn generated_field_has_paths_for_both_players() {
        let mut rng = StdRng::seed_from_u64(42);
        let field = generate(9, 9, 10, [0, 4], [8, 4], &mut rng);
        let barriers: Vec<IBarrier> = field
            .barriers
            .iter()
            .map(|b| {
                let cell = |c: Cell| (c[0] as i32, c[1] as i32);
                [cell(b[0]), cell(b[1]), cell(b[2]), cell(b[3])]
            })
            .collect();
        assert!(path_exists(field.position, &barriers, 9, 9));
        assert!(path_exists(field.opponent_position, &barriers, 9, 9));
        assert_eq!(field.barriers.len(), 10);
    }

    #[test]
    fn barrier_blockage_is_symmetric() {
        let barrier: IBarrier = [(0, 0), (1, 0), (0, 1), (1, 1)];
        assert!(is_step_over((0, 0), (1, 0), &[barrier]));
        assert!(is_step_over((1, 0), (0, 0), &[barrier]));
        assert!(is_step_over((0, 1), (1, 1), &[barrier]));
        assert!(is_step_over((1, 1), (0, 1), &[barrier]));
    }

    #[test]
    fn a_wall_across_a_one_wide_corridor_blocks_reachability() {
        // 1-wide, 2-tall corridor: the only edge out is (0,0)-(1,0).
        let blocking: IBarrier = [(0, 0), (1, 0), (0, 0), (1, 0)];
        assert!(path_exists([0, 0], &[], 1, 2));
        assert!(!path_exists([0, 0], &[blocking], 1, 2));
    }
}
