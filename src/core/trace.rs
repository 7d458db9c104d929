//! Per-video load lifecycle tracing.
//!
//! One `TraceRecord` per video and viewing session. Each record keeps a small
//! table indexed by `TracePhase`, every entry running its own state machine:
//!
//! ```text
//! NotStarted -> Open -> Success | Error | Abandoned
//!                ^                            |
//!                +------- start again --------+
//! ```
//!
//! Only Success and Error reach the sink. A neutral `stop` (item scrolled
//! away, handle released) is counted as abandoned and never as a failure.

use log::{trace, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

use crate::entities::{attribute_id, MediaFormat, TraceSink, VideoId};

pub use crate::entities::{TraceEvent, TraceOutcome, TracePhase};

/// Lifecycle state of one phase instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PhaseState {
    #[default]
    NotStarted,
    Open,
    Success,
    Error,
    /// Closed neutrally, nothing emitted
    Abandoned,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseSpan {
    pub state: PhaseState,
    pub started_at: Option<Instant>,
    pub ended_at: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct TraceRecord {
    pub trace_id: Uuid,
    pub video_id: VideoId,
    pub format: MediaFormat,
    pub attribute_id: String,
    /// Opened by the prefetch pipeline
    pub prefetch: bool,
    phases: [PhaseSpan; 3],
}

impl TraceRecord {
    fn new(video_id: &VideoId, url: &str, prefetch: bool) -> Self {
        let attribute = if url.is_empty() { video_id.to_string() } else { attribute_id(url) };
        Self {
            trace_id: Uuid::new_v4(),
            video_id: video_id.clone(),
            format: MediaFormat::from_url(url),
            attribute_id: attribute,
            prefetch,
            phases: [PhaseSpan::default(); 3],
        }
    }

    pub fn phase(&self, phase: TracePhase) -> &PhaseSpan {
        &self.phases[phase.index()]
    }

    pub fn is_open(&self, phase: TracePhase) -> bool {
        self.phase(phase).state == PhaseState::Open
    }

    pub fn open_phases(&self) -> Vec<TracePhase> {
        TracePhase::ALL.into_iter().filter(|p| self.is_open(*p)).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TraceStats {
    pub succeeded: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub duplicate_starts: u64,
}

pub struct TraceTracker {
    records: HashMap<VideoId, TraceRecord>,
    sink: Box<dyn TraceSink>,
    stats: TraceStats,
}

impl TraceTracker {
    pub fn new(sink: Box<dyn TraceSink>) -> Self {
        Self {
            records: HashMap::new(),
            sink,
            stats: TraceStats::default(),
        }
    }

    /// Create the record for a newly assigned item. Existing records are kept.
    pub fn begin(&mut self, video_id: &VideoId, url: &str, prefetch: bool) -> Uuid {
        self.records
            .entry(video_id.clone())
            .or_insert_with(|| TraceRecord::new(video_id, url, prefetch))
            .trace_id
    }

    /// Open a phase. Starting an already open phase is a logged no-op.
    pub fn start(&mut self, video_id: &VideoId, phase: TracePhase) -> bool {
        let record = self
            .records
            .entry(video_id.clone())
            .or_insert_with(|| TraceRecord::new(video_id, "", false));
        let span = &mut record.phases[phase.index()];
        if span.state == PhaseState::Open {
            self.stats.duplicate_starts += 1;
            warn!("TraceTracker: {} phase {} already open, ignoring start", video_id, phase);
            return false;
        }
        *span = PhaseSpan {
            state: PhaseState::Open,
            started_at: Some(Instant::now()),
            ended_at: None,
        };
        trace!("TraceTracker: {} {} started", video_id, phase);
        true
    }

    pub fn stop_success(&mut self, video_id: &VideoId, phase: TracePhase) -> Option<TraceEvent> {
        self.finish(video_id, phase, TraceOutcome::Success)
    }

    pub fn stop_error(&mut self, video_id: &VideoId, phase: TracePhase) -> Option<TraceEvent> {
        self.finish(video_id, phase, TraceOutcome::Error)
    }

    /// Close without an outcome. Nothing is emitted.
    pub fn stop(&mut self, video_id: &VideoId, phase: TracePhase) -> bool {
        let Some(span) = self.open_span(video_id, phase) else {
            return false;
        };
        span.state = PhaseState::Abandoned;
        span.ended_at = Some(Instant::now());
        self.stats.abandoned += 1;
        trace!("TraceTracker: {} {} abandoned", video_id, phase);
        true
    }

    /// Neutrally close every open phase of `video_id`.
    pub fn close_all(&mut self, video_id: &VideoId) -> usize {
        TracePhase::ALL
            .into_iter()
            .filter(|phase| self.stop(video_id, *phase))
            .count()
    }

    /// Close neutrally and forget the record (item left the window).
    pub fn discard(&mut self, video_id: &VideoId) -> bool {
        self.close_all(video_id);
        self.records.remove(video_id).is_some()
    }

    pub fn end_session(&mut self) {
        let ids: Vec<VideoId> = self.records.keys().cloned().collect();
        for id in &ids {
            self.discard(id);
        }
    }

    pub fn is_open(&self, video_id: &VideoId, phase: TracePhase) -> bool {
        self.records.get(video_id).map(|r| r.is_open(phase)).unwrap_or(false)
    }

    pub fn record(&self, video_id: &VideoId) -> Option<&TraceRecord> {
        self.records.get(video_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> TraceStats {
        self.stats
    }

    fn open_span(&mut self, video_id: &VideoId, phase: TracePhase) -> Option<&mut PhaseSpan> {
        self.records
            .get_mut(video_id)
            .map(|r| &mut r.phases[phase.index()])
            .filter(|span| span.state == PhaseState::Open)
    }

    fn finish(&mut self, video_id: &VideoId, phase: TracePhase, outcome: TraceOutcome) -> Option<TraceEvent> {
        let record = self.records.get_mut(video_id)?;
        let span = &mut record.phases[phase.index()];
        if span.state != PhaseState::Open {
            trace!("TraceTracker: {} {} not open, ignoring {:?}", video_id, phase, outcome);
            return None;
        }
        let now = Instant::now();
        let duration = span.started_at.map(|t| now.duration_since(t)).unwrap_or_default();
        span.state = match outcome {
            TraceOutcome::Success => PhaseState::Success,
            TraceOutcome::Error => PhaseState::Error,
        };
        span.ended_at = Some(now);

        let event = TraceEvent {
            trace_id: record.trace_id,
            video_id: video_id.clone(),
            phase,
            outcome,
            duration_ms: duration.as_millis() as u64,
            prefetch: record.prefetch,
            format: record.format,
            attribute_id: record.attribute_id.clone(),
        };
        match outcome {
            TraceOutcome::Success => self.stats.succeeded += 1,
            TraceOutcome::Error => self.stats.failed += 1,
        }
        trace!("TraceTracker: {} {} -> {:?} ({} ms)", video_id, phase, outcome, event.duration_ms);
        self.sink.record(event.clone());
        Some(event)
    }
}

impl std::fmt::Debug for TraceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceTracker")
            .field("records", &self.records.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};

    fn tracker() -> (TraceTracker, Receiver<TraceEvent>) {
        let (tx, rx) = unbounded();
        (TraceTracker::new(Box::new(tx)), rx)
    }

    #[test]
    fn test_success_emits_one_event() {
        let (mut t, rx) = tracker();
        let a = VideoId::from("a");
        t.begin(&a, "https://cdn.example/v/a/master.m3u8", true);
        assert!(t.start(&a, TracePhase::Load));
        assert!(t.start(&a, TracePhase::Ready));

        let event = t.stop_success(&a, TracePhase::Load).unwrap();
        assert_eq!(event.outcome, TraceOutcome::Success);
        assert_eq!(event.format, MediaFormat::Hls);
        assert_eq!(event.attribute_id, "v/a/master.m3u8");
        assert_eq!(event.metric_name(), "VideoStartup_prefetch");
        assert_eq!(rx.try_recv().unwrap(), event);

        // Closing twice emits nothing
        assert!(t.stop_success(&a, TracePhase::Load).is_none());
        assert!(rx.try_recv().is_err());
        assert!(t.is_open(&a, TracePhase::Ready));
    }

    #[test]
    fn test_duplicate_start_is_noop() {
        let (mut t, _rx) = tracker();
        let a = VideoId::from("a");
        assert!(t.start(&a, TracePhase::Load));
        let started = t.record(&a).unwrap().phase(TracePhase::Load).started_at;
        assert!(!t.start(&a, TracePhase::Load));
        assert_eq!(t.record(&a).unwrap().phase(TracePhase::Load).started_at, started);
        assert_eq!(t.stats().duplicate_starts, 1);
    }

    #[test]
    fn test_neutral_stop_never_reaches_sink() {
        let (mut t, rx) = tracker();
        let a = VideoId::from("a");
        t.begin(&a, "https://cdn.example/a.mp4", false);
        t.start(&a, TracePhase::Load);
        t.start(&a, TracePhase::Ready);
        assert!(t.stop(&a, TracePhase::Load));
        assert_eq!(t.close_all(&a), 1);

        // Closed phases don't turn into outcomes later
        assert!(t.stop_error(&a, TracePhase::Load).is_none());
        assert!(t.stop_success(&a, TracePhase::Ready).is_none());
        assert!(rx.try_recv().is_err());
        assert_eq!(t.stats().abandoned, 2);
        assert_eq!(t.stats().failed, 0);
        assert_eq!(t.record(&a).unwrap().phase(TracePhase::Load).state, PhaseState::Abandoned);
    }

    #[test]
    fn test_error_outcome_and_reopen() {
        let (mut t, rx) = tracker();
        let a = VideoId::from("a");
        t.start(&a, TracePhase::Buffering);
        let event = t.stop_error(&a, TracePhase::Buffering).unwrap();
        assert_eq!(event.outcome, TraceOutcome::Error);
        assert_eq!(event.metric_name(), "VideoBuffering");
        assert_eq!(event.attribute_id, "a");

        // A closed instance may be started again
        assert!(t.start(&a, TracePhase::Buffering));
        t.stop_success(&a, TracePhase::Buffering);
        let outcomes: Vec<_> = rx.try_iter().map(|e| e.outcome).collect();
        assert_eq!(outcomes, vec![TraceOutcome::Error, TraceOutcome::Success]);
    }

    #[test]
    fn test_discard_and_end_session() {
        let (mut t, rx) = tracker();
        let ids: Vec<VideoId> = ["a", "b", "c"].into_iter().map(VideoId::from).collect();
        for id in &ids {
            t.begin(id, "", false);
            t.start(id, TracePhase::Load);
        }
        let first = t.record(&ids[0]).unwrap().trace_id;
        assert!(t.discard(&ids[0]));
        assert!(!t.discard(&ids[0]));
        assert_eq!(t.len(), 2);

        // New session for the same video gets a new trace id
        let again = t.begin(&ids[0], "", false);
        assert_ne!(again, first);

        t.end_session();
        assert!(t.is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(t.stats().abandoned, 3);
    }
}
