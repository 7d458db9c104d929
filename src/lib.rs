//! REELPOOL - player pool and prefetch layer for vertical video feeds
//!
//! Re-exports all modules for use by the simulator binary and host apps.

// Core engine (pool, traces, prefetch, control sequence)
pub mod core;

pub mod cli;
pub mod config;
pub mod entities;
pub mod error;
pub mod sim;

// Re-export commonly used types from core
pub use crate::core::controller::{FeedController, FeedHandle};
pub use crate::core::edge_scroll::{Axis, EdgeReached, ScrollDelta, ScrollDirection};
pub use crate::core::event_bus::{EventBus, FeedEvent};
pub use crate::core::feed::ReelFeed;
pub use crate::core::player_pool::PlayerPool;
pub use crate::core::prefetch::PrefetchManager;
pub use crate::core::trace::TraceTracker;

// Re-export entities
pub use config::FeedConfig;
pub use entities::{FeedItem, HandleSnapshot, PlayerState, Role, TraceEvent, TraceOutcome, TracePhase, VideoId};
pub use error::{ConfigError, FeedError, PlayerError};
