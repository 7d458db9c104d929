//! Terminal trace events handed to the telemetry collaborator.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::feed_item::{MediaFormat, VideoId};

/// One instrumented stage of a video's load lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TracePhase {
    /// Source set until the decoder is initialised (first buffering signal)
    Load,
    /// Source set until the first frame is ready
    Ready,
    /// Rebuffer of an already-ready visible handle
    Buffering,
}

impl TracePhase {
    pub const ALL: [TracePhase; 3] = [TracePhase::Load, TracePhase::Ready, TracePhase::Buffering];

    pub(crate) fn index(self) -> usize {
        match self {
            TracePhase::Load => 0,
            TracePhase::Ready => 1,
            TracePhase::Buffering => 2,
        }
    }

    /// Metric name used by the telemetry backend.
    pub fn metric_name(self) -> &'static str {
        match self {
            TracePhase::Load => "VideoStartup",
            TracePhase::Ready => "VideoDownload",
            TracePhase::Buffering => "VideoBuffering",
        }
    }
}

impl fmt::Display for TracePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TracePhase::Load => "load",
            TracePhase::Ready => "ready",
            TracePhase::Buffering => "buffering",
        };
        f.write_str(name)
    }
}

/// How a trace phase ended. Neutral closes produce no event at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceOutcome {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Viewing session of this video (one per trace record)
    pub trace_id: Uuid,
    pub video_id: VideoId,
    pub phase: TracePhase,
    pub outcome: TraceOutcome,
    pub duration_ms: u64,
    /// Trace was opened by the prefetch pipeline
    pub prefetch: bool,
    pub format: MediaFormat,
    pub attribute_id: String,
}

impl TraceEvent {
    /// e.g. `VideoStartup_prefetch`
    pub fn metric_name(&self) -> String {
        if self.prefetch {
            format!("{}_prefetch", self.phase.metric_name())
        } else {
            self.phase.metric_name().to_string()
        }
    }
}
