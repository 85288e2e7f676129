// simulation_engine/mod.rs
pub mod cell;
pub mod grid;
pub mod map_loader;
pub mod movement;
pub mod route_generation;
pub mod simulation;
pub mod vehicles;
