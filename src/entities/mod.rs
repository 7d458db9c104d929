//! Entities module - plain data types and the platform-facing traits.
//!
//! Nothing here owns state across calls; `core` builds the pool, the trace
//! tracker and the prefetch pipeline on top of these types.

pub mod feed_item;
pub mod handle;
pub mod trace_event;
pub mod traits;

pub use feed_item::{attribute_id, FeedItem, MediaFormat, VideoId};
pub use handle::{HandleSnapshot, LoadToken, PlayerState, Role, SlotId};
pub use trace_event::{TraceEvent, TraceOutcome, TracePhase};
pub use traits::{
    LoadCompletion, LoadEvent, LoadEventKind, LoadRequest, MediaLoader, Player, PlayerFactory,
    TraceSink,
};
