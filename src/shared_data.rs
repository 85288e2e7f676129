// src/shared_data.rs

use crate::error::CommandError;
use crate::simulation_engine::cell::Cell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A passenger pickup request. Both cells are checked against the map size
/// when the request is created and never change afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PassengerRequest {
    pub id: u64,
    pub origin: Cell,
    pub destination: Cell,
}

impl PassengerRequest {
    pub fn new(
        id: u64,
        origin: Cell,
        destination: Cell,
        rows: usize,
        cols: usize,
    ) -> Result<Self, CommandError> {
        for cell in [origin, destination] {
            let inside = cell.row >= 0
                && cell.col >= 0
                && (cell.row as usize) < rows
                && (cell.col as usize) < cols;
            if !inside {
                return Err(CommandError::OutOfBounds(cell));
            }
        }
        Ok(Self {
            id,
            origin,
            destination,
        })
    }
}

impl fmt::Display for PassengerRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "request #{} {}->{}", self.id, self.origin, self.destination)
    }
}

/// Wall-clock seconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
