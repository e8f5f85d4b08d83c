//! CLI command implementations.

pub mod cancel;
pub mod common;
pub mod employee;
pub mod enqueue;
pub mod purge;
pub mod redo;
pub mod resources;
pub mod result;
pub mod start;
pub mod status;
pub mod wait;
