// map_loader.rs
//
// Reads the city map and crossing files. Each map value describes the roads
// leaving a cell towards its right and lower neighbours:
//   0 = none, 1 = right, 2 = down, 3 = right and down.
// The crossing file has the same shape: 1 marks a planar crossing (may get a
// traffic light), 0 a grade-separated one (never signaled).

use crate::error::ConfigError;
use crate::simulation_engine::cell::{Cell, Direction};
use rand::Rng;
use std::fs;
use std::path::Path;

pub const ROAD_RIGHT: u8 = 1;
pub const ROAD_DOWN: u8 = 2;

/// Raw road layout handed to the road network before the simulation starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapLayout {
    pub rows: usize,
    pub cols: usize,
    roads: Vec<u8>,
    planar: Vec<bool>,
}

impl MapLayout {
    /// A map without any road; every cell is a planar crossing.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            roads: vec![0; rows * cols],
            planar: vec![true; rows * cols],
        }
    }

    /// Every pair of neighbouring cells is joined by a road.
    pub fn fully_connected(rows: usize, cols: usize) -> Self {
        let mut layout = Self::new(rows, cols);
        for row in 0..rows {
            for col in 0..cols {
                let mut code = 0;
                if col + 1 < cols {
                    code |= ROAD_RIGHT;
                }
                if row + 1 < rows {
                    code |= ROAD_DOWN;
                }
                layout.roads[row * cols + col] = code;
            }
        }
        layout
    }

    /// Marks every cell grade-separated, so no traffic light is ever installed.
    pub fn without_signals(mut self) -> Self {
        self.planar.iter_mut().for_each(|p| *p = false);
        self
    }

    fn index(&self, cell: Cell) -> Option<usize> {
        let in_bounds = cell.row >= 0
            && cell.col >= 0
            && (cell.row as usize) < self.rows
            && (cell.col as usize) < self.cols;
        in_bounds.then(|| cell.row as usize * self.cols + cell.col as usize)
    }

    pub fn road_code(&self, cell: Cell) -> u8 {
        self.index(cell).map(|i| self.roads[i]).unwrap_or(0)
    }

    /// Removes the road between two neighbouring cells, if any.
    pub fn remove_road(&mut self, a: Cell, b: Cell) {
        let (owner, bit) = match a.direction_to(b) {
            Some(Direction::Right) => (a, ROAD_RIGHT),
            Some(Direction::Down) => (a, ROAD_DOWN),
            Some(Direction::Left) => (b, ROAD_RIGHT),
            Some(Direction::Up) => (b, ROAD_DOWN),
            None => return,
        };
        if let Some(i) = self.index(owner) {
            self.roads[i] &= !bit;
        }
    }

    pub fn is_planar(&self, cell: Cell) -> bool {
        self.index(cell).map(|i| self.planar[i]).unwrap_or(false)
    }

    pub fn set_planar(&mut self, cell: Cell, planar: bool) {
        if let Some(i) = self.index(cell) {
            self.planar[i] = planar;
        }
    }

    /// Whether the layout has a road from `cell` in direction `dir`.
    pub fn has_road(&self, cell: Cell, dir: Direction) -> bool {
        match dir {
            Direction::Right => self.road_code(cell) & ROAD_RIGHT != 0,
            Direction::Down => self.road_code(cell) & ROAD_DOWN != 0,
            Direction::Left => {
                self.index(cell.step(dir)).is_some()
                    && self.road_code(cell.step(dir)) & ROAD_RIGHT != 0
            }
            Direction::Up => {
                self.index(cell.step(dir)).is_some()
                    && self.road_code(cell.step(dir)) & ROAD_DOWN != 0
            }
        }
    }

    /// Parses a map and an optional crossing file. Without crossing data every
    /// cell is planar.
    pub fn parse(map: &str, crossings: Option<&str>) -> Result<Self, ConfigError> {
        let grid = parse_digit_grid(map, 3)?;
        let rows = grid.len();
        let cols = grid.first().map(|r| r.len()).unwrap_or(0);
        if rows == 0 || cols == 0 {
            return Err(ConfigError::EmptyMap);
        }
        let mut layout = Self::new(rows, cols);
        for (row, values) in grid.iter().enumerate() {
            for (col, &value) in values.iter().enumerate() {
                layout.roads[row * cols + col] = value;
            }
        }

        if let Some(text) = crossings {
            let cross = parse_digit_grid(text, 1)?;
            if cross.len() != rows {
                return Err(ConfigError::RowCount {
                    expected: rows,
                    found: cross.len(),
                });
            }
            for (row, values) in cross.iter().enumerate() {
                if values.len() != cols {
                    return Err(ConfigError::ColumnCount {
                        row,
                        expected: cols,
                        found: values.len(),
                    });
                }
                for (col, &value) in values.iter().enumerate() {
                    layout.planar[row * cols + col] = value == 1;
                }
            }
        }
        Ok(layout)
    }

    /// Reads the map (and crossing) files from disk.
    pub fn load(map_path: &Path, cross_path: Option<&Path>) -> Result<Self, ConfigError> {
        let map = read_file(map_path)?;
        let crossings = cross_path.map(read_file).transpose()?;
        Self::parse(&map, crossings.as_deref())
    }

    /// Generates a random connected map. Every cell except the bottom-right
    /// corner gets at least one road towards its right or lower neighbour, so
    /// each cell has a right/down path to the corner.
    pub fn generate<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Self {
        let mut layout = Self::new(rows, cols);
        for row in 0..rows {
            for col in 0..cols {
                let last_row = row + 1 == rows;
                let last_col = col + 1 == cols;
                layout.roads[row * cols + col] = match (last_row, last_col) {
                    (true, true) => 0,
                    (true, false) => ROAD_RIGHT,
                    (false, true) => ROAD_DOWN,
                    (false, false) => rng.random_range(1..=3),
                };
            }
        }
        layout
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Splits a text block into rows of small integers. Rows may be
/// whitespace-separated or packed digits; blank lines are skipped.
fn parse_digit_grid(text: &str, max: u8) -> Result<Vec<Vec<u8>>, ConfigError> {
    let mut grid: Vec<Vec<u8>> = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let row = grid.len();
        let tokens: Vec<String> = if line.contains(char::is_whitespace) {
            line.split_whitespace().map(str::to_string).collect()
        } else {
            line.chars().map(|c| c.to_string()).collect()
        };
        let mut values = Vec::with_capacity(tokens.len());
        for (col, token) in tokens.into_iter().enumerate() {
            match token.parse::<u8>() {
                Ok(v) if v <= max => values.push(v),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        row,
                        col,
                        value: token,
                    })
                }
            }
        }
        if let Some(first) = grid.first() {
            if first.len() != values.len() {
                return Err(ConfigError::ColumnCount {
                    row,
                    expected: first.len(),
                    found: values.len(),
                });
            }
        }
        grid.push(values);
    }
    Ok(grid)
}
