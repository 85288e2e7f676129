// intake.rs
//
// Line commands typed by the operator:
//   (r,c)(r,c)         passenger request from the first cell to the second
//   open(r,c)(r,c)     open the road between two neighbouring cells
//   close(r,c)(r,c)    close it
//   status             list idle taxis

use crate::error::CommandError;
use crate::simulation_engine::cell::Cell;
use regex::{Captures, Regex};

// Anchored at the front only, so trailing text can be told apart from a
// malformed coordinate.
const REQUEST_PATTERN: &str = r"^\((-?\d+),(-?\d+)\)\((-?\d+),(-?\d+)\)";
const ROAD_PATTERN: &str = r"^(open|close)\((-?\d+),(-?\d+)\)\((-?\d+),(-?\d+)\)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Request { origin: Cell, destination: Cell },
    Open(Cell, Cell),
    Close(Cell, Cell),
    Status,
}

/// Compiled command patterns. Build once and reuse for every input line.
#[derive(Debug, Clone)]
pub struct CommandParser {
    request: Regex,
    road: Regex,
}

impl CommandParser {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            request: Regex::new(REQUEST_PATTERN)?,
            road: Regex::new(ROAD_PATTERN)?,
        })
    }

    /// Whitespace is ignored and keywords are case-insensitive.
    pub fn parse(&self, line: &str) -> Result<Command, CommandError> {
        let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
        let lower = compact.to_ascii_lowercase();

        if lower == "status" {
            return Ok(Command::Status);
        }
        if let Some(caps) = self.road.captures(&lower) {
            let (a, b) = captured_cells(&caps, 2, &lower, line)?;
            return Ok(if &caps[1] == "open" {
                Command::Open(a, b)
            } else {
                Command::Close(a, b)
            });
        }
        if let Some(caps) = self.request.captures(&lower) {
            let (origin, destination) = captured_cells(&caps, 1, &lower, line)?;
            return Ok(Command::Request {
                origin,
                destination,
            });
        }
        if lower.starts_with('(') || lower.starts_with("open") || lower.starts_with("close") {
            return Err(CommandError::BadCoordinate(lower));
        }
        Err(CommandError::Unrecognised(line.trim().to_string()))
    }
}

/// Reads the four coordinates starting at capture group `first`. The match
/// has to cover the whole of `text`.
fn captured_cells(
    caps: &Captures,
    first: usize,
    text: &str,
    line: &str,
) -> Result<(Cell, Cell), CommandError> {
    if caps.get(0).map(|m| m.end()) != Some(text.len()) {
        return Err(CommandError::Unrecognised(line.trim().to_string()));
    }
    let mut coords = [0i32; 4];
    for (offset, slot) in coords.iter_mut().enumerate() {
        let digits = caps.get(first + offset).map_or("", |m| m.as_str());
        *slot = digits
            .parse()
            .map_err(|_| CommandError::BadCoordinate(digits.to_string()))?;
    }
    Ok((
        Cell::new(coords[0], coords[1]),
        Cell::new(coords[2], coords[3]),
    ))
}
