pub mod cleanup;
pub mod cluster;
pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod error;
pub mod failover;
pub mod health;
pub mod io;
pub mod manifest;
pub mod paths;
pub mod phase;
pub mod region;
pub mod run;
pub mod sequencer;

pub use error::{EagleError, Result};
pub use sequencer::{Orchestrator, RunOptions};
