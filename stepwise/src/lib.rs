//! Execution engine for interactive, step-by-step training procedures.
//!
//! A process is a tree of chapters, steps, behaviors, transitions and
//! conditions. Every entity runs the same lifecycle and is advanced one
//! quantum at a time. The crate keeps a strict separation:
//!
//! - **[`core`]**: The lifecycle engine, collections, locks and tags. No I/O;
//!   the scene is reached through the [`core::scene::SceneProvider`] trait.
//! - **[`io`]**: Loading processes, scenes and configuration from disk.
//!
//! [`driver`] owns the per-quantum loop and the global commands (abort,
//! skip, restart) the CLI and embedders use.

pub mod core;
pub mod driver;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
