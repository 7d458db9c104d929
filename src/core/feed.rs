//! Synchronous feed core: the body of the control sequence.
//!
//! `ReelFeed` owns the pool, the trace tracker, the prefetch manager and the
//! edge detector, and applies UI input and loader completions to them one at
//! a time. It is not thread-safe on purpose; `FeedController` runs it on a
//! single thread and funnels everything else through channels.
//!
//! Exactly one visible handle is kept: the item at the current position.
//! Moving away releases it (traces still open are closed neutrally).

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, trace, warn};
use serde::Serialize;

use super::edge_scroll::{EdgeReached, EdgeScrollDetector, ScrollDelta};
use super::event_bus::{EventBus, EventEmitter, FeedEvent};
use super::player_pool::{PlayerPool, PoolStats};
use super::prefetch::{FeedResources, PrefetchManager};
use super::trace::{TraceStats, TraceTracker};
use crate::config::FeedConfig;
use crate::entities::{
    FeedItem, HandleSnapshot, LoadCompletion, LoadEvent, LoadEventKind, LoadRequest, MediaLoader, PlayerFactory,
    PlayerState, Role, TracePhase, VideoId,
};
use crate::error::FeedError;

/// Diagnostics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub pool: PoolStats,
    pub traces: TraceStats,
    pub assigned: usize,
    pub prefetch_inflight: usize,
}

pub struct ReelFeed {
    config: FeedConfig,
    pool: PlayerPool,
    tracker: TraceTracker,
    prefetch: PrefetchManager,
    edges: EdgeScrollDetector,
    loader: Box<dyn MediaLoader>,
    events: EventEmitter,
    completions_tx: Sender<LoadEvent>,
    completions_rx: Receiver<LoadEvent>,
    items: Vec<FeedItem>,
    position: Option<usize>,
    current: Option<VideoId>,
}

impl ReelFeed {
    pub fn new(
        config: FeedConfig,
        factory: Box<dyn PlayerFactory>,
        loader: Box<dyn MediaLoader>,
        bus: &EventBus,
    ) -> Result<Self, FeedError> {
        config.validate()?;
        let (completions_tx, completions_rx) = unbounded();
        let pool = PlayerPool::new(config.pool_capacity, config.visible_slots_reserved, factory);
        info!(
            "ReelFeed: pool of {}, lookahead {} media / {} thumbnails",
            config.pool_capacity, config.media_lookahead, config.thumbnail_lookahead
        );
        Ok(Self {
            pool,
            tracker: TraceTracker::new(Box::new(bus.emitter())),
            prefetch: PrefetchManager::new(&config),
            edges: EdgeScrollDetector::new(config.axis),
            loader,
            events: bus.emitter(),
            completions_tx,
            completions_rx,
            items: Vec::new(),
            position: None,
            current: None,
            config,
        })
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    // ========== UI input ==========

    /// The visible page changed (or the item list was refreshed).
    pub fn on_position_changed(&mut self, position: usize, items: &[FeedItem]) {
        self.items = items.to_vec();
        self.position = Some(position);
        let item = self.items.get(position).cloned();

        let target = item.as_ref().map(|i| &i.video_id);
        if self.current.as_ref() != target {
            if let Some(previous) = self.current.take() {
                self.release_visible(&previous);
            }
            if let Some(ref item) = item {
                self.show(item);
            }
        }

        let mut res = FeedResources {
            pool: &mut self.pool,
            tracker: &mut self.tracker,
            loader: self.loader.as_mut(),
            completions: &self.completions_tx,
            events: &self.events,
        };
        self.prefetch.update(position, &self.items, &mut res);
    }

    /// Drag step. Emits `FeedEvent::Edge` when the user pushes past an edge.
    pub fn on_scroll(&mut self, delta: ScrollDelta) -> Option<EdgeReached> {
        let edge = self.edges.on_scroll(delta, self.items.len(), self.position.unwrap_or(0));
        self.emit_edge(edge)
    }

    /// Pre-fling velocity; ends the gesture.
    pub fn on_fling(&mut self, velocity: ScrollDelta) -> Option<EdgeReached> {
        let edge = self.edges.on_pre_fling(velocity, self.items.len(), self.position.unwrap_or(0));
        self.emit_edge(edge)
    }

    pub fn end_gesture(&mut self) {
        self.edges.end_gesture();
    }

    // ========== Loader completions ==========

    /// Apply one loader report. Reports for recycled slots are dropped.
    pub fn on_load_event(&mut self, event: LoadEvent) {
        let token = &event.token;
        if !self.pool.is_current(token) {
            self.pool.record_stale();
            debug!("ReelFeed: stale {:?} for {} in {}", event.kind, token.video_id, token.slot);
            self.events.emit(FeedEvent::StaleCallback {
                video_id: token.video_id.clone(),
                slot: token.slot,
            });
            return;
        }

        if self.prefetch.owns(token) {
            let mut res = FeedResources {
                pool: &mut self.pool,
                tracker: &mut self.tracker,
                loader: self.loader.as_mut(),
                completions: &self.completions_tx,
                events: &self.events,
            };
            match &event.kind {
                LoadEventKind::Buffering => self.prefetch.on_buffering(&token.video_id, &mut res),
                LoadEventKind::Ready => self.prefetch.on_ready(&token.video_id, &mut res),
                LoadEventKind::Failed(reason) => self.prefetch.on_failed(&token.video_id, reason, &mut res),
                LoadEventKind::Ended => {}
            }
            return;
        }

        if self.current.as_ref() != Some(&token.video_id) {
            trace!("ReelFeed: ignoring {:?} for unowned {}", event.kind, token.video_id);
            return;
        }
        let video_id = token.video_id.clone();
        let state = self.pool.handle_for(&video_id).map(|h| h.state).unwrap_or_default();

        match event.kind {
            LoadEventKind::Buffering => {
                if state.is_ready() {
                    // Rebuffer during playback
                    self.tracker.start(&video_id, TracePhase::Buffering);
                    self.pool.set_state(&event.token, PlayerState::Buffering);
                } else {
                    self.tracker.stop_success(&video_id, TracePhase::Load);
                }
            }
            LoadEventKind::Ready => {
                for phase in [TracePhase::Load, TracePhase::Ready, TracePhase::Buffering] {
                    self.tracker.stop_success(&video_id, phase);
                }
                self.pool.set_state(&event.token, PlayerState::Ready);
                self.start_playback(&video_id);
            }
            LoadEventKind::Ended => {
                self.pool.rewind(&video_id);
                if self.config.loop_playback {
                    self.pool.play(&video_id);
                } else {
                    self.pool.pause(&video_id);
                }
                self.events.emit(FeedEvent::PlaybackEnded { video_id });
            }
            LoadEventKind::Failed(reason) => {
                warn!("ReelFeed: {} failed to load: {}", video_id, reason);
                for phase in TracePhase::ALL {
                    self.tracker.stop_error(&video_id, phase);
                }
                self.pool.set_state(&event.token, PlayerState::Idle);
            }
        }
    }

    /// Drain completions queued by the loader. Returns how many were applied.
    pub fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.completions_rx.try_recv() {
            self.on_load_event(event);
            applied += 1;
        }
        applied
    }

    /// Receiver side of the completion channel, for the control loop.
    pub fn completion_receiver(&self) -> Receiver<LoadEvent> {
        self.completions_rx.clone()
    }

    // ========== Queries ==========

    /// Handle backing `video_id`, for attaching a native view.
    pub fn surface_for(&self, video_id: &VideoId) -> Option<HandleSnapshot> {
        self.pool.handle_for(video_id)
    }

    pub fn current(&self) -> Option<&VideoId> {
        self.current.as_ref()
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub fn page_count(&self) -> usize {
        self.items.len()
    }

    pub fn pool(&self) -> &PlayerPool {
        &self.pool
    }

    pub fn tracker(&self) -> &TraceTracker {
        &self.tracker
    }

    pub fn prefetch(&self) -> &PrefetchManager {
        &self.prefetch
    }

    pub fn stats(&self) -> FeedStats {
        FeedStats {
            pool: self.pool.stats(),
            traces: self.tracker.stats(),
            assigned: self.pool.assigned_count(),
            prefetch_inflight: self.prefetch.inflight(),
        }
    }

    // ========== Teardown ==========

    /// Release every handle and drop all trace records. Players stay warm.
    pub fn end_session(&mut self) {
        for snap in self.pool.snapshots() {
            if let Some(id) = snap.video_id {
                self.pool.release(&id);
            }
        }
        self.tracker.end_session();
        self.prefetch.clear();
        self.edges.end_gesture();
        self.items.clear();
        self.position = None;
        self.current = None;
        debug!("ReelFeed: session ended");
    }

    /// End the session and destroy the native players.
    pub fn shutdown(&mut self) {
        self.end_session();
        self.pool.shutdown();
    }

    // ========== Internals ==========

    fn emit_edge(&self, edge: Option<EdgeReached>) -> Option<EdgeReached> {
        if let Some(edge) = edge {
            self.events.emit(FeedEvent::Edge(edge));
        }
        edge
    }

    /// Make `item` the visible one: promote its prefetch or load it cold.
    fn show(&mut self, item: &FeedItem) {
        let video_id = &item.video_id;
        let prefetched = self.prefetch.take(video_id);
        let acq = self.pool.acquire_visible(video_id);
        self.current = Some(video_id.clone());

        if let Some(evicted) = acq.evicted {
            self.prefetch.forget(&evicted);
            self.tracker.discard(&evicted);
            self.events.emit(FeedEvent::Evicted {
                video_id: evicted,
                slot: acq.handle.slot,
            });
        }

        if acq.reused {
            debug!(
                "ReelFeed: {} shown from {} ({:?}, prefetched: {})",
                video_id,
                acq.handle.slot,
                acq.handle.state,
                prefetched.is_some()
            );
            if acq.handle.state.is_ready() {
                self.start_playback(video_id);
            }
            return;
        }

        // Cold load; a record left from an earlier session of this item is stale
        self.tracker.discard(video_id);
        self.tracker.begin(video_id, &item.video_url, false);
        self.tracker.start(video_id, TracePhase::Load);
        self.tracker.start(video_id, TracePhase::Ready);

        let token = match self.pool.load_source(video_id, &item.video_url) {
            Some(token) if acq.handle.state != PlayerState::Error => token,
            _ => {
                warn!("ReelFeed: no player for {} in {}", video_id, acq.handle.slot);
                self.tracker.stop_error(video_id, TracePhase::Load);
                self.tracker.stop_error(video_id, TracePhase::Ready);
                return;
            }
        };
        let request = LoadRequest {
            token: token.clone(),
            url: item.video_url.clone(),
            role: Role::Visible,
        };
        self.loader
            .begin_loading(request, LoadCompletion::new(token, self.completions_tx.clone()));
    }

    fn release_visible(&mut self, video_id: &VideoId) {
        self.tracker.discard(video_id);
        self.pool.release(video_id);
        trace!("ReelFeed: {} left the screen", video_id);
    }

    fn start_playback(&mut self, video_id: &VideoId) {
        let already_playing = self
            .pool
            .handle_for(video_id)
            .map(|h| h.state == PlayerState::Playing)
            .unwrap_or(false);
        if already_playing || !self.pool.play(video_id) {
            return;
        }
        if let Some(handle) = self.pool.handle_for(video_id) {
            self.events.emit(FeedEvent::PlaybackStarted {
                video_id: video_id.clone(),
                slot: handle.slot,
            });
        }
    }
}

impl std::fmt::Debug for ReelFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReelFeed")
            .field("position", &self.position)
            .field("current", &self.current)
            .field("items", &self.items.len())
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{SlotId, TraceOutcome};
    use crate::sim::{LoaderScript, PlayerCall, PlayerLog, ScriptedLoader, SimPlayerFactory};
    use crate::core::edge_scroll::ScrollDirection;
    use std::time::Duration;

    struct Rig {
        feed: ReelFeed,
        script: LoaderScript,
        log: PlayerLog,
        bus: EventBus,
    }

    fn rig(config: FeedConfig) -> Rig {
        rig_with(config, SimPlayerFactory::new())
    }

    fn rig_with(config: FeedConfig, factory: SimPlayerFactory) -> Rig {
        let bus = EventBus::new();
        let loader = ScriptedLoader::new();
        let script = loader.script();
        let log = factory.log();
        let feed = ReelFeed::new(config, Box::new(factory), Box::new(loader), &bus).unwrap();
        Rig { feed, script, log, bus }
    }

    fn items(n: usize) -> Vec<FeedItem> {
        (0..n)
            .map(|i| FeedItem::new(format!("v{}", i), i, format!("https://cdn.example/v{}.mp4", i), ""))
            .collect()
    }

    fn vid(s: &str) -> VideoId {
        VideoId::from(s)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bus = EventBus::new();
        let config = FeedConfig {
            pool_capacity: 0,
            ..FeedConfig::default()
        };
        let result = ReelFeed::new(config, Box::new(SimPlayerFactory::new()), Box::new(ScriptedLoader::new()), &bus);
        assert!(matches!(result, Err(FeedError::Config(_))));
    }

    #[test]
    fn test_visible_loads_and_plays_when_ready() {
        let mut r = rig(FeedConfig::default());
        let list = items(6);
        let starts = r.bus.trace_events();
        r.feed.on_position_changed(0, &list);

        let requests = r.script.requests();
        assert_eq!(requests[0].token.video_id, vid("v0"));
        assert_eq!(requests[0].role, Role::Visible);
        assert_eq!(r.feed.surface_for(&vid("v0")).unwrap().state, PlayerState::Loading);

        r.script.buffering(&vid("v0"));
        r.script.ready(&vid("v0"));
        assert_eq!(r.feed.process_pending(), 2);

        let surface = r.feed.surface_for(&vid("v0")).unwrap();
        assert_eq!(surface.state, PlayerState::Playing);
        assert!(r.log.calls_for(surface.slot).contains(&PlayerCall::Play));

        let names: Vec<_> = starts.try_iter().map(|e| e.metric_name()).collect();
        assert_eq!(names, vec!["VideoStartup", "VideoDownload"]);
        assert!(r.bus.poll().iter().any(|e| matches!(e, FeedEvent::PlaybackStarted { .. })));
    }

    #[test]
    fn test_scroll_onto_prefetched_item_promotes_and_plays() {
        let mut r = rig(FeedConfig::default());
        let list = items(6);
        r.feed.on_position_changed(0, &list);
        r.script.ready(&vid("v1"));
        r.feed.process_pending();
        let before = r.feed.surface_for(&vid("v1")).unwrap();
        assert_eq!(before.role, Role::Prefetch);
        assert_eq!(before.state, PlayerState::Ready);
        let loads = r.script.requests().len();

        r.feed.on_position_changed(1, &list);
        let after = r.feed.surface_for(&vid("v1")).unwrap();
        assert_eq!(after.slot, before.slot);
        assert_eq!(after.role, Role::Visible);
        assert_eq!(after.state, PlayerState::Playing);
        assert_eq!(r.feed.current(), Some(&vid("v1")));

        // No cold reload of v1; v0 was released
        assert!(!r.script.requests()[loads..].iter().any(|q| q.token.video_id == vid("v1")));
        assert!(r.feed.surface_for(&vid("v0")).is_none());
        assert_eq!(r.feed.pool().stats().promotions, 1);
    }

    #[test]
    fn test_promoted_while_loading_finishes_as_visible() {
        let mut r = rig(FeedConfig::default());
        let list = items(6);
        r.feed.on_position_changed(0, &list);
        r.feed.on_position_changed(1, &list);
        assert_eq!(r.feed.surface_for(&vid("v1")).unwrap().state, PlayerState::Loading);

        // Completion of the prefetch-era load now drives visible playback
        r.script.ready(&vid("v1"));
        r.feed.process_pending();
        assert_eq!(r.feed.surface_for(&vid("v1")).unwrap().state, PlayerState::Playing);
    }

    #[test]
    fn test_released_while_loading_closes_neutrally() {
        let mut r = rig(FeedConfig::default());
        let traces = r.bus.trace_events();
        let list = items(6);
        r.feed.on_position_changed(0, &list);
        assert!(r.feed.tracker().is_open(&vid("v0"), TracePhase::Load));
        let v0 = r.script.completion_for(&vid("v0")).unwrap();

        r.feed.on_position_changed(1, &list);
        assert!(r.feed.tracker().record(&vid("v0")).is_none());
        assert!(r.feed.tracker().stats().abandoned >= 2);

        // Late completion for the released load is stale
        v0.failed("too late");
        r.feed.process_pending();
        assert!(!traces.try_iter().any(|e| e.video_id == vid("v0")));
        assert_eq!(r.feed.pool().stats().stale_callbacks, 1);
        assert!(r.bus.poll().iter().any(|e| matches!(e, FeedEvent::StaleCallback { .. })));
    }

    #[test]
    fn test_visible_failure_leaves_handle_idle() {
        let mut r = rig(FeedConfig::default());
        let traces = r.bus.trace_events();
        let list = items(3);
        r.feed.on_position_changed(0, &list);
        r.script.fail(&vid("v0"), "decoder");
        r.feed.process_pending();

        let surface = r.feed.surface_for(&vid("v0")).unwrap();
        assert_eq!(surface.state, PlayerState::Idle);
        let outcomes: Vec<_> = traces.try_iter().map(|e| (e.phase, e.outcome)).collect();
        assert_eq!(
            outcomes,
            vec![(TracePhase::Load, TraceOutcome::Error), (TracePhase::Ready, TraceOutcome::Error)]
        );
        assert_eq!(r.feed.tracker().stats().failed, 2);
    }

    #[test]
    fn test_rebuffer_trace() {
        let mut r = rig(FeedConfig::default());
        let traces = r.bus.trace_events();
        let list = items(2);
        r.feed.on_position_changed(0, &list);
        r.script.ready(&vid("v0"));
        r.feed.process_pending();
        traces.try_iter().count();

        r.script.buffering(&vid("v0"));
        r.feed.process_pending();
        assert_eq!(r.feed.surface_for(&vid("v0")).unwrap().state, PlayerState::Buffering);
        assert!(r.feed.tracker().is_open(&vid("v0"), TracePhase::Buffering));

        r.script.ready(&vid("v0"));
        r.feed.process_pending();
        let names: Vec<_> = traces.try_iter().map(|e| e.metric_name()).collect();
        assert_eq!(names, vec!["VideoBuffering"]);
        assert_eq!(r.feed.surface_for(&vid("v0")).unwrap().state, PlayerState::Playing);
    }

    #[test]
    fn test_playback_ended_loops() {
        let mut r = rig(FeedConfig::default());
        let list = items(2);
        r.feed.on_position_changed(0, &list);
        r.script.ready(&vid("v0"));
        r.script.ended(&vid("v0"));
        r.feed.process_pending();
        let slot = r.feed.surface_for(&vid("v0")).unwrap().slot;
        assert_eq!(r.feed.surface_for(&vid("v0")).unwrap().state, PlayerState::Playing);
        assert_eq!(r.log.count(|s, c| s == slot && *c == PlayerCall::Seek(Duration::ZERO)), 1);
    }

    #[test]
    fn test_playback_ended() {
        let config = FeedConfig {
            loop_playback: false,
            ..FeedConfig::default()
        };
        let mut r = rig(config);
        let list = items(2);
        r.feed.on_position_changed(0, &list);
        r.script.ready(&vid("v0"));
        r.script.ended(&vid("v0"));
        r.feed.process_pending();
        assert_eq!(r.feed.surface_for(&vid("v0")).unwrap().state, PlayerState::Paused);
        assert!(r
            .bus
            .poll()
            .iter()
            .any(|e| *e == FeedEvent::PlaybackEnded { video_id: vid("v0") }));
    }

    #[test]
    fn test_construction_failure_surfaces_as_trace_error() {
        let factory = SimPlayerFactory::new().fail_slot(SlotId(1), 2);
        let mut r = rig_with(FeedConfig::default(), factory);
        let traces = r.bus.trace_events();
        let list = items(1);
        r.feed.on_position_changed(0, &list);

        assert_eq!(r.feed.surface_for(&vid("v0")).unwrap().state, PlayerState::Error);
        assert!(r.script.requests().is_empty());
        let outcomes: Vec<_> = traces.try_iter().map(|e| e.outcome).collect();
        assert_eq!(outcomes, vec![TraceOutcome::Error, TraceOutcome::Error]);
    }

    #[test]
    fn test_edge_events_reach_stream() {
        let mut r = rig(FeedConfig::default());
        let edges = r.bus.edge_events();
        let list = items(3);
        r.feed.on_position_changed(2, &list);

        assert!(r.feed.on_scroll(ScrollDelta::vertical(-10.0)).is_some());
        assert!(r.feed.on_scroll(ScrollDelta::vertical(-10.0)).is_none());
        assert!(r.feed.on_fling(ScrollDelta::vertical(-500.0)).is_none());

        let edge = edges.try_recv().unwrap();
        assert_eq!(edge.page, 2);
        assert!(!edge.at_start);
        assert_eq!(edge.direction, ScrollDirection::Forward);
        assert!(edges.try_recv().is_err());

        // Before any data arrives the feed is empty: both edges
        let mut empty = rig(FeedConfig::default());
        assert!(empty.feed.on_scroll(ScrollDelta::vertical(5.0)).is_some_and(|e| e.at_start));
    }

    #[test]
    fn test_only_one_visible_handle() {
        let mut r = rig(FeedConfig::default());
        let list = items(10);
        for position in [0, 1, 2, 5, 4, 9, 0] {
            r.feed.on_position_changed(position, &list);
            r.feed.process_pending();
            assert_eq!(r.feed.pool().visible_count(), 1);
            assert!(r.feed.pool().assigned_count() <= 3);
            assert_eq!(r.feed.current(), Some(&list[position].video_id));
        }
    }

    #[test]
    fn test_end_session_releases_everything() {
        let mut r = rig(FeedConfig::default());
        let list = items(6);
        r.feed.on_position_changed(0, &list);
        r.feed.end_session();

        assert_eq!(r.feed.pool().assigned_count(), 0);
        assert!(r.feed.tracker().is_empty());
        assert!(r.feed.prefetch().is_empty());
        assert_eq!(r.feed.current(), None);
        // Players are kept warm, not destroyed
        assert_eq!(r.log.count(|_, c| *c == PlayerCall::Release), 0);

        r.feed.shutdown();
        assert_eq!(r.log.count(|_, c| *c == PlayerCall::Release), 3);
    }

    #[test]
    fn test_empty_position_releases_visible() {
        let mut r = rig(FeedConfig::default());
        let list = items(2);
        r.feed.on_position_changed(0, &list);
        r.feed.on_position_changed(0, &[]);
        assert_eq!(r.feed.current(), None);
        assert_eq!(r.feed.pool().assigned_count(), 0);
    }
}
