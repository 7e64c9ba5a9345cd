//! Deterministic engine logic.
//!
//! Core modules are free of I/O. They drive the in-memory process arena and
//! reach the scene only through the traits in [`scene`], so every behavior
//! here can be exercised with a simulated scene in tests.

pub mod autocomplete;
pub mod collection;
pub mod engine;
pub mod entity;
pub mod ids;
pub mod invariants;
pub mod locks;
pub mod references;
pub mod scene;
pub mod session;
pub mod stage;
pub mod stage_process;
pub mod tags;
pub mod transition;
pub mod tree;
