//! `bs-gateway`: library half of the `brainslot` binary.
//!
//! Config loading, the CLI definition and the `serve` loop that spawns
//! tenant servers.

pub mod cli;
pub mod serve;
