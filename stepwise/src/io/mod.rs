//! Side-effecting collaborators of the engine: configuration and process
//! files, and the simulated scene.

pub mod config;
pub mod process_store;
pub mod scene;
