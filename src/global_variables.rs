// Grid dimensions of the default city map.
pub const MAP_ROWS: usize = 80;
pub const MAP_COLS: usize = 80;

// Fleet
pub const TAXI_COUNT: usize = 100;

// Vehicle timings (milliseconds)
pub const DRIVE_TIME_MS: u64 = 100;
pub const REST_TIME_MS: u64 = 1000;
pub const IDLE_WANDER_MS: u64 = 20_000;
pub const SIGNAL_RECHECK_MS: u64 = 100;

// Traffic lights flip every LIGHT_PERIOD_MS.
pub const LIGHT_PERIOD_MS: u64 = 300;

// Flow counters are re-synchronised with the topology on this period.
pub const FLOW_REFRESH_MS: u64 = 50;

// Dispatch
pub const DISPATCH_WINDOW_MS: u64 = 3000;
pub const DISPATCH_POLL_MS: u64 = 100;
pub const DISPATCH_RADIUS: i32 = 2;
pub const DISPATCH_AWARD: u64 = 1;
pub const SERVICE_BONUS: u64 = 3;

pub const DEFAULT_SEED: u64 = 20_170_503;
