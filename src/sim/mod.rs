//! Simulated platform collaborators for tests and the simulator binary.

pub mod loader;
pub mod player;

pub use loader::{LoaderScript, ScriptedLoader, TimedLoader};
pub use player::{PlayerCall, PlayerLog, SimPlayer, SimPlayerFactory};
