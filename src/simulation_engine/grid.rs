use crate::error::{ConfigError, RoadError};
use crate::flow_analyzer::flow_tracker::FlowTracker;
use crate::simulation_engine::cell::{Cell, Direction};
use crate::simulation_engine::map_loader::MapLayout;
use parking_lot::{RwLock, RwLockReadGuard};
use serde::Serialize;
use std::collections::VecDeque;

/// Shape of a cell, derived from how many roads leave it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TopologyClass {
    /// Zero or one road.
    DeadEnd,
    /// Two roads, either a bend or a straight run.
    Turn,
    TJunction,
    FourWay,
}

impl TopologyClass {
    fn from_degree(degree: usize) -> Self {
        match degree {
            0 | 1 => TopologyClass::DeadEnd,
            2 => TopologyClass::Turn,
            3 => TopologyClass::TJunction,
            _ => TopologyClass::FourWay,
        }
    }
}

struct Topology {
    adjacency: Vec<[bool; 4]>,
    classes: Vec<TopologyClass>,
}

/// Copy of the mutable network state, used to compare before/after a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSnapshot {
    pub adjacency: Vec<[bool; 4]>,
    pub classes: Vec<TopologyClass>,
    pub flows: Vec<[Option<u32>; 4]>,
}

/// The city road graph.
///
/// Adjacency lives behind a single reader/writer lock: routing and
/// connectivity checks share it, while opening or closing a road takes it
/// exclusively so both endpoints change together. Flow counters are atomics
/// and need no lock of their own.
pub struct RoadNetwork {
    rows: usize,
    cols: usize,
    planar: Vec<bool>,
    topology: RwLock<Topology>,
    flows: FlowTracker,
}

impl RoadNetwork {
    /// Builds the network from a loaded layout. Refuses layouts with roads that
    /// leave the map or that are not connected.
    pub fn from_layout(layout: &MapLayout) -> Result<Self, ConfigError> {
        let (rows, cols) = (layout.rows, layout.cols);
        if rows == 0 || cols == 0 {
            return Err(ConfigError::EmptyMap);
        }

        let mut adjacency = vec![[false; 4]; rows * cols];
        let mut planar = vec![false; rows * cols];
        for row in 0..rows {
            for col in 0..cols {
                let cell = Cell::new(row as i32, col as i32);
                let idx = row * cols + col;
                planar[idx] = layout.is_planar(cell);
                for dir in Direction::ALL {
                    if !layout.has_road(cell, dir) {
                        continue;
                    }
                    if !in_bounds(rows, cols, cell.step(dir)) {
                        return Err(ConfigError::RoadOffGrid(cell));
                    }
                    adjacency[idx][dir.index()] = true;
                }
            }
        }

        if !is_connected(rows, cols, &adjacency) {
            return Err(ConfigError::Disconnected);
        }

        let classes = adjacency
            .iter()
            .map(|roads| TopologyClass::from_degree(roads.iter().filter(|&&r| r).count()))
            .collect();
        let flows = FlowTracker::new(rows, cols);
        let network = Self {
            rows,
            cols,
            planar,
            topology: RwLock::new(Topology { adjacency, classes }),
            flows,
        };
        network.refresh_flows();
        Ok(network)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn contains(&self, cell: Cell) -> bool {
        in_bounds(self.rows, self.cols, cell)
    }

    fn index(&self, cell: Cell) -> Option<usize> {
        self.contains(cell)
            .then(|| cell.row as usize * self.cols + cell.col as usize)
    }

    pub fn flows(&self) -> &FlowTracker {
        &self.flows
    }

    /// Shared, consistent view of the adjacency for the duration of a query.
    pub fn view(&self) -> NetworkView<'_> {
        NetworkView {
            network: self,
            topology: self.topology.read(),
        }
    }

    pub fn has_edge(&self, cell: Cell, dir: Direction) -> bool {
        self.view().has_edge(cell, dir)
    }

    pub fn neighbors(&self, cell: Cell) -> Vec<Cell> {
        self.view().neighbors(cell)
    }

    pub fn degree(&self, cell: Cell) -> usize {
        self.view().neighbors(cell).len()
    }

    pub fn topology_class(&self, cell: Cell) -> Option<TopologyClass> {
        let idx = self.index(cell)?;
        Some(self.topology.read().classes[idx])
    }

    /// Planar crossings may carry a traffic light; grade-separated ones never do.
    pub fn is_planar(&self, cell: Cell) -> bool {
        self.index(cell).map(|i| self.planar[i]).unwrap_or(false)
    }

    pub fn is_connected(&self) -> bool {
        let topology = self.topology.read();
        is_connected(self.rows, self.cols, &topology.adjacency)
    }

    fn check_pair(&self, a: Cell, b: Cell) -> Result<Direction, RoadError> {
        for cell in [a, b] {
            if !self.contains(cell) {
                return Err(RoadError::OutOfBounds(cell));
            }
        }
        a.direction_to(b).ok_or(RoadError::NotAdjacent(a, b))
    }

    /// Opens the road between two neighbouring cells. Both directed counters
    /// of the new road start at zero.
    pub fn open_road(&self, a: Cell, b: Cell) -> Result<(), RoadError> {
        let dir = self.check_pair(a, b)?;
        let (ia, ib) = (self.cell_index(a), self.cell_index(b));

        let mut topology = self.topology.write();
        if topology.adjacency[ia][dir.index()] {
            return Err(RoadError::AlreadyOpen(a, b));
        }
        topology.adjacency[ia][dir.index()] = true;
        topology.adjacency[ib][dir.opposite().index()] = true;
        reclassify(&mut topology, &[ia, ib]);
        self.flows.open_edge(a, dir);
        Ok(())
    }

    /// Closes the road between two neighbouring cells unless that would split
    /// the map, in which case the road is put back and an error returned.
    pub fn close_road(&self, a: Cell, b: Cell) -> Result<(), RoadError> {
        let dir = self.check_pair(a, b)?;
        let (ia, ib) = (self.cell_index(a), self.cell_index(b));

        let mut topology = self.topology.write();
        if !topology.adjacency[ia][dir.index()] {
            return Err(RoadError::AlreadyClosed(a, b));
        }
        topology.adjacency[ia][dir.index()] = false;
        topology.adjacency[ib][dir.opposite().index()] = false;
        if !is_connected(self.rows, self.cols, &topology.adjacency) {
            topology.adjacency[ia][dir.index()] = true;
            topology.adjacency[ib][dir.opposite().index()] = true;
            return Err(RoadError::WouldDisconnect(a, b));
        }
        reclassify(&mut topology, &[ia, ib]);
        self.flows.close_edge(a, dir);
        Ok(())
    }

    // Only called on cells validated by `check_pair`.
    fn cell_index(&self, cell: Cell) -> usize {
        cell.row as usize * self.cols + cell.col as usize
    }

    /// Re-synchronises flow sentinels with the current adjacency.
    pub fn refresh_flows(&self) {
        let view = self.view();
        self.flows.sync_with(|cell, dir| view.has_edge(cell, dir));
    }

    pub fn snapshot(&self) -> NetworkSnapshot {
        let topology = self.topology.read();
        let flows = (0..self.rows * self.cols)
            .map(|idx| {
                let cell = Cell::new((idx / self.cols) as i32, (idx % self.cols) as i32);
                Direction::ALL.map(|dir| self.flows.get_flow(cell, cell.step(dir)))
            })
            .collect();
        NetworkSnapshot {
            adjacency: topology.adjacency.clone(),
            classes: topology.classes.clone(),
            flows,
        }
    }
}

/// Read-locked view of the road graph. Keep it short-lived: road mutations
/// wait for every outstanding view to drop.
pub struct NetworkView<'a> {
    network: &'a RoadNetwork,
    topology: RwLockReadGuard<'a, Topology>,
}

impl NetworkView<'_> {
    pub fn has_edge(&self, cell: Cell, dir: Direction) -> bool {
        self.network
            .index(cell)
            .map(|i| self.topology.adjacency[i][dir.index()])
            .unwrap_or(false)
    }

    /// Neighbours reachable over an open road, in up/down/left/right order.
    pub fn neighbors(&self, cell: Cell) -> Vec<Cell> {
        Direction::ALL
            .into_iter()
            .filter(|&dir| self.has_edge(cell, dir))
            .map(|dir| cell.step(dir))
            .collect()
    }

    /// Hop distance from `source` to every cell, `None` where unreachable.
    pub fn distances_from(&self, source: Cell) -> Vec<Option<u32>> {
        bfs(
            self.network.rows,
            self.network.cols,
            &self.topology.adjacency,
            source,
        )
    }
}

fn in_bounds(rows: usize, cols: usize, cell: Cell) -> bool {
    cell.row >= 0 && cell.col >= 0 && (cell.row as usize) < rows && (cell.col as usize) < cols
}

fn reclassify(topology: &mut Topology, cells: &[usize]) {
    for &idx in cells {
        let degree = topology.adjacency[idx].iter().filter(|&&r| r).count();
        topology.classes[idx] = TopologyClass::from_degree(degree);
    }
}

fn bfs(rows: usize, cols: usize, adjacency: &[[bool; 4]], source: Cell) -> Vec<Option<u32>> {
    let mut dist = vec![None; rows * cols];
    if !in_bounds(rows, cols, source) {
        return dist;
    }
    let start = source.row as usize * cols + source.col as usize;
    dist[start] = Some(0);
    let mut queue = VecDeque::from([source]);

    while let Some(current) = queue.pop_front() {
        let idx = current.row as usize * cols + current.col as usize;
        let next_dist = dist[idx].map(|d| d + 1);
        for dir in Direction::ALL {
            if !adjacency[idx][dir.index()] {
                continue;
            }
            let next = current.step(dir);
            if !in_bounds(rows, cols, next) {
                continue;
            }
            let next_idx = next.row as usize * cols + next.col as usize;
            if dist[next_idx].is_none() {
                dist[next_idx] = next_dist;
                queue.push_back(next);
            }
        }
    }
    dist
}

fn is_connected(rows: usize, cols: usize, adjacency: &[[bool; 4]]) -> bool {
    bfs(rows, cols, adjacency, Cell::new(0, 0))
        .iter()
        .all(Option::is_some)
}
