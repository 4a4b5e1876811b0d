#![forbid(unsafe_code)]

//! Shared models and pure policy for the network configuration backup engine.
//!
//! Nothing in this crate touches the network or the filesystem; the daemon
//! wires these types to SSH sessions, git and the scheduler loop.

pub mod backoff;
pub mod health;
pub mod model;
pub mod naming;
pub mod schedule;
pub mod validation;

mod util;

pub use model::*;
pub use util::new_cycle_id;
