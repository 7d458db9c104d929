//! Abstract traits for dependency inversion.
//!
//! These traits describe what the pool needs from the platform (native
//! players, the media loader) and from telemetry, so `core` is written once
//! against them. ExoPlayer/AVPlayer glue implements them on device, `sim`
//! implements them for tests and the simulator.

use crossbeam_channel::Sender;
use log::trace;
use std::time::Duration;

use super::feed_item::VideoId;
use super::handle::{LoadToken, Role, SlotId};
use super::trace_event::TraceEvent;
use crate::error::PlayerError;

/// Control surface of one native player instance.
///
/// Implementations are not required to be thread-safe: the pool only ever
/// calls them from the control sequence.
pub trait Player: Send {
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    /// Destroy the native instance. Called once, on pool teardown.
    fn release(&mut self);
    /// Set or clear (`None`) the media source.
    fn set_source(&mut self, url: Option<&str>);
    fn seek(&mut self, position: Duration);
}

/// Creates native players for pool slots.
pub trait PlayerFactory: Send {
    fn create(&mut self, slot: SlotId) -> Result<Box<dyn Player>, PlayerError>;
}

/// What the platform loader is asked to warm or load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub token: LoadToken,
    pub url: String,
    pub role: Role,
}

/// Signal reported by the platform loader for one load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadEventKind {
    /// Decoder initialised, data still arriving
    Buffering,
    /// First frame available
    Ready,
    /// Visible playback reached the end
    Ended,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadEvent {
    pub token: LoadToken,
    pub kind: LoadEventKind,
}

/// Callback handle given to the loader with every request.
///
/// Reports re-enter the control sequence through a channel; nothing is
/// mutated on the loader's thread. Cloneable so a loader can report several
/// signals (buffering, then ready) for one request.
#[derive(Debug, Clone)]
pub struct LoadCompletion {
    token: LoadToken,
    tx: Sender<LoadEvent>,
}

impl LoadCompletion {
    pub fn new(token: LoadToken, tx: Sender<LoadEvent>) -> Self {
        Self { token, tx }
    }

    pub fn token(&self) -> &LoadToken {
        &self.token
    }

    pub fn buffering(&self) {
        self.report(LoadEventKind::Buffering);
    }

    pub fn ready(&self) {
        self.report(LoadEventKind::Ready);
    }

    pub fn ended(&self) {
        self.report(LoadEventKind::Ended);
    }

    pub fn failed(&self, reason: impl Into<String>) {
        self.report(LoadEventKind::Failed(reason.into()));
    }

    fn report(&self, kind: LoadEventKind) {
        let event = LoadEvent {
            token: self.token.clone(),
            kind,
        };
        // Feed already torn down: nobody left to notify
        if self.tx.send(event).is_err() {
            trace!("LoadCompletion: feed gone, dropping report for {}", self.token.video_id);
        }
    }
}

/// Platform media loader (network + decoder warm-up).
///
/// `begin_loading` must return immediately; completion arrives later through
/// the `LoadCompletion`. Loads are never cancelled, late reports are
/// filtered by the feed.
pub trait MediaLoader: Send {
    fn begin_loading(&mut self, request: LoadRequest, completion: LoadCompletion);

    /// Fire-and-forget thumbnail warm-up.
    fn warm_thumbnail(&mut self, video_id: &VideoId, url: &str) {
        let _ = (video_id, url);
    }
}

/// Receives terminal trace events.
pub trait TraceSink: Send {
    fn record(&mut self, event: TraceEvent);
}

impl TraceSink for Sender<TraceEvent> {
    fn record(&mut self, event: TraceEvent) {
        let _ = self.send(event);
    }
}
