pub mod config;
pub mod control_system;
pub mod dispatch;
pub mod error;
pub mod flow_analyzer;
pub mod global_variables;
pub mod intake;
pub mod monitoring;
pub mod shared_data;
pub mod simulation_engine;
