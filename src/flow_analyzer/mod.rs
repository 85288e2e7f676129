pub mod flow_tracker;

pub use flow_tracker::{FlowTracker, NO_EDGE};
