//! Slot-level value types shared between the pool and its callers.
//!
//! Everything here is plain data: it is copied across the control sequence
//! boundary instead of handing out references into the pool.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::feed_item::VideoId;

/// Pool slot identifier, 1..=N.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub u32);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot{}", self.0)
    }
}

/// Coarse playback state of one pooled player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlayerState {
    #[default]
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Buffering,
    Error,
}

impl PlayerState {
    /// Loaded far enough to start playback without waiting.
    pub fn is_ready(&self) -> bool {
        matches!(self, PlayerState::Ready | PlayerState::Playing | PlayerState::Paused)
    }
}

/// What a handle is currently used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    /// Backs on-screen playback
    Visible,
    /// Warms a source without rendering
    #[default]
    Prefetch,
}

/// Identifies one assignment of a slot to a video.
///
/// Captured by loader callbacks. A callback whose token no longer matches the
/// slot's current assignment is stale and gets dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadToken {
    pub slot: SlotId,
    pub video_id: VideoId,
    /// Bumped on every assignment of the slot
    pub epoch: u64,
}

/// Copy of a handle's bookkeeping at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleSnapshot {
    pub slot: SlotId,
    pub video_id: Option<VideoId>,
    pub role: Role,
    pub state: PlayerState,
    pub epoch: u64,
    pub last_used_at: u64,
}

impl HandleSnapshot {
    /// Token for the current assignment, None for a free slot.
    pub fn token(&self) -> Option<LoadToken> {
        self.video_id.as_ref().map(|video_id| LoadToken {
            slot: self.slot,
            video_id: video_id.clone(),
            epoch: self.epoch,
        })
    }
}
