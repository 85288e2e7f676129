// route_generation.rs
//
// Picks the next cell a taxi should drive to. Distances are always computed
// on the current road map, so closures and openings take effect on the very
// next step.

use crate::error::SimError;
use crate::simulation_engine::cell::Cell;
use crate::simulation_engine::grid::RoadNetwork;
use rand::seq::IndexedRandom;
use rand::Rng;
use std::sync::Arc;

pub struct Router {
    network: Arc<RoadNetwork>,
}

impl Router {
    pub fn new(network: Arc<RoadNetwork>) -> Self {
        Self { network }
    }

    pub fn network(&self) -> &RoadNetwork {
        &self.network
    }

    /// Number of road segments on a shortest path from `a` to `b`.
    pub fn shortest_path_length(&self, a: Cell, b: Cell) -> Option<u32> {
        if !self.network.contains(a) || !self.network.contains(b) {
            return None;
        }
        let view = self.network.view();
        let distances = view.distances_from(a);
        distances[b.row as usize * self.network.cols() + b.col as usize]
    }

    /// Next hop from `cur` towards `dest`.
    ///
    /// Among the neighbours that lie on a shortest path, the ones whose road
    /// from `cur` carries the fewest taxis are kept and one of those is chosen
    /// at random.
    pub fn next_step<R: Rng + ?Sized>(
        &self,
        cur: Cell,
        dest: Cell,
        rng: &mut R,
    ) -> Result<Cell, SimError> {
        let (neighbors, distances) = {
            let view = self.network.view();
            let neighbors = view.neighbors(cur);
            if neighbors.is_empty() {
                return Err(SimError::NoLegalMove(cur));
            }
            // roads are two-way, so one search from the destination gives
            // every neighbour's remaining distance
            (neighbors, view.distances_from(dest))
        };

        let cols = self.network.cols();
        let remaining = |cell: Cell| distances[cell.row as usize * cols + cell.col as usize];
        let best = neighbors
            .iter()
            .filter_map(|&n| remaining(n))
            .min()
            .ok_or(SimError::Unreachable(cur, dest))?;
        let shortest: Vec<Cell> = neighbors
            .into_iter()
            .filter(|&n| remaining(n) == Some(best))
            .collect();

        self.pick_least_loaded(cur, &shortest, rng)
            .ok_or(SimError::Unreachable(cur, dest))
    }

    /// A random hop for an idle taxi, preferring the emptiest roads.
    pub fn random_neighbor<R: Rng + ?Sized>(&self, cur: Cell, rng: &mut R) -> Result<Cell, SimError> {
        let neighbors = self.network.neighbors(cur);
        self.pick_least_loaded(cur, &neighbors, rng)
            .ok_or(SimError::NoLegalMove(cur))
    }

    fn pick_least_loaded<R: Rng + ?Sized>(
        &self,
        cur: Cell,
        candidates: &[Cell],
        rng: &mut R,
    ) -> Option<Cell> {
        let flows = self.network.flows();
        let load = |n: Cell| flows.get_flow(cur, n).unwrap_or(u32::MAX);
        let lowest = candidates.iter().map(|&n| load(n)).min()?;
        let least: Vec<Cell> = candidates
            .iter()
            .copied()
            .filter(|&n| load(n) == lowest)
            .collect();
        least.choose(rng).copied()
    }
}
