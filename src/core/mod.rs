//! Core engine - pool, traces, prefetch, edge detection, control sequence
//!
//! Independent of any UI toolkit or native player SDK; those plug in through
//! the traits in `entities::traits`.

pub mod controller;
pub mod edge_scroll;
pub mod event_bus;
pub mod feed;
pub mod player_pool;
pub mod prefetch;
pub mod trace;
pub mod workers;

// Re-exports for convenience
pub use controller::{Command, FeedController, FeedHandle};
pub use edge_scroll::{Axis, EdgeReached, EdgeScrollDetector, ScrollDelta, ScrollDirection};
pub use event_bus::{EventBus, EventEmitter, FeedEvent};
pub use feed::{FeedStats, ReelFeed};
pub use player_pool::{Acquisition, PlayerHandle, PlayerPool, PoolStats};
pub use prefetch::{FeedResources, PrefetchEntry, PrefetchManager, PrefetchStatus, SkipReason};
pub use trace::{PhaseState, TraceRecord, TraceStats, TraceTracker};
pub use workers::Workers;
