use crate::simulation_engine::cell::Cell;
use thiserror::Error;

/// A road mutation that was refused. The network is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoadError {
    #[error("cell {0} is outside the map")]
    OutOfBounds(Cell),
    #[error("cells {0} and {1} are not neighbours")]
    NotAdjacent(Cell, Cell),
    #[error("road {0}<->{1} is already open")]
    AlreadyOpen(Cell, Cell),
    #[error("road {0}<->{1} does not exist")]
    AlreadyClosed(Cell, Cell),
    #[error("closing road {0}<->{1} would disconnect the map")]
    WouldDisconnect(Cell, Cell),
}

/// Problems detected before the simulation is allowed to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("map must have at least one row and one column")]
    EmptyMap,
    #[error("expected {expected} rows, found {found}")]
    RowCount { expected: usize, found: usize },
    #[error("row {row}: expected {expected} columns, found {found}")]
    ColumnCount {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("row {row}, column {col}: invalid value {value:?}")]
    InvalidValue { row: usize, col: usize, value: String },
    #[error("road leaves the map at {0}")]
    RoadOffGrid(Cell),
    #[error("the road map is not connected")]
    Disconnected,
    #[error("cell {0} is outside the map")]
    OutOfBounds(Cell),
    #[error("no cell without a traffic light is available to place vehicles")]
    NoStartingCell,
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Why a passenger request could not be matched to a taxi.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("no idle taxi answered the request within the bidding window")]
    NoCandidates,
    #[error("every candidate taxi was taken by another request before commit")]
    CandidatesLost,
}

/// A line from the request intake that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unrecognised command {0:?}")]
    Unrecognised(String),
    #[error("invalid coordinate {0:?}")]
    BadCoordinate(String),
    #[error("cell {0} is outside the map")]
    OutOfBounds(Cell),
}

/// Fatal conditions. The simulation stops when one of these surfaces.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cell {0} has no open road; the topology is corrupt")]
    NoLegalMove(Cell),
    #[error("cell {0} cannot reach {1}; the topology is corrupt")]
    Unreachable(Cell, Cell),
}
