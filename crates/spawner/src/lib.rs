//! `bs-spawner`: runs tenant servers, each optionally backed by an
//! external provider process.
//!
//! A [`Spawner`] owns its running-instance map; several spawners can
//! coexist in one process without sharing anything.

pub mod error;
pub mod provider_tools;
pub mod spawner;

pub use error::SpawnError;
pub use spawner::{InstanceInfo, SpawnHandle, SpawnOptions, Spawner};
