//! Prefetch pipeline driven by position changes.
//!
//! On every `update`:
//! 1. entries outside the keep range `[pos - trailing_keep, pos + media_lookahead]`
//!    (or gone from the feed) lose their prefetch handle and trace record
//! 2. thumbnails of the next `thumbnail_lookahead` items are warmed once
//! 3. window items are touched so pool LRU lands on stale handles first
//! 4. the prefetch ceiling minus the window's live entries is the budget;
//!    the nearest window items without an entry fill it, the rest are
//!    reported as skipped without touching the pool
//! 5. queued items start while fewer than `max_inflight` loads are running
//!
//! Steps 4 and 5 run again on every completion, so a slot freed by a failed
//! load goes to the next item in the window. Loads are never cancelled.
//! Completions come back through the feed, which routes them here by token.

use indexmap::IndexMap;
use log::{debug, trace};
use lru::LruCache;
use serde::Serialize;
use std::collections::HashSet;
use std::num::NonZeroUsize;

use crossbeam_channel::Sender;

use super::event_bus::{EventEmitter, FeedEvent};
use super::player_pool::PlayerPool;
use super::trace::TraceTracker;
use crate::config::FeedConfig;
use crate::entities::{
    FeedItem, LoadCompletion, LoadEvent, LoadRequest, LoadToken, MediaLoader, PlayerState, Role, TracePhase,
    VideoId,
};

/// Why an item in the window did not get a prefetch handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SkipReason {
    /// Prefetch share of the pool is in use
    PoolFull,
    /// Native player could not be built for the slot
    ConstructionFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PrefetchStatus {
    Loading,
    Ready,
    /// Load failed; handle returned, not retried while in the window
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchEntry {
    pub video_id: VideoId,
    pub token: LoadToken,
    pub status: PrefetchStatus,
}

/// Everything the manager drives, borrowed from the feed for one call.
pub struct FeedResources<'a> {
    pub pool: &'a mut PlayerPool,
    pub tracker: &'a mut TraceTracker,
    pub loader: &'a mut dyn MediaLoader,
    pub completions: &'a Sender<LoadEvent>,
    pub events: &'a EventEmitter,
}

pub struct PrefetchManager {
    media_lookahead: usize,
    thumbnail_lookahead: usize,
    trailing_keep: usize,
    max_inflight: usize,
    /// Waiting for a load slot, nearest first
    queue: IndexMap<VideoId, FeedItem>,
    /// Holding (or having held) a prefetch handle, start order
    entries: IndexMap<VideoId, PrefetchEntry>,
    warmed_thumbnails: LruCache<VideoId, ()>,
    /// Already reported as skipped while in the window
    skipped: HashSet<VideoId>,
    /// Media window of the last update, nearest first
    window: Vec<FeedItem>,
}

impl PrefetchManager {
    pub fn new(config: &FeedConfig) -> Self {
        let thumb_cap = NonZeroUsize::new(config.thumbnail_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            media_lookahead: config.media_lookahead,
            thumbnail_lookahead: config.thumbnail_lookahead,
            trailing_keep: config.trailing_keep,
            max_inflight: config.max_inflight_prefetch.max(1),
            queue: IndexMap::new(),
            entries: IndexMap::new(),
            warmed_thumbnails: LruCache::new(thumb_cap),
            skipped: HashSet::new(),
            window: Vec::new(),
        }
    }

    /// Media window: the `media_lookahead` items after `position`.
    pub fn window(&self, position: usize, items: &[FeedItem]) -> Vec<FeedItem> {
        Self::ahead(position, items, self.media_lookahead).to_vec()
    }

    fn ahead(position: usize, items: &[FeedItem], count: usize) -> &[FeedItem] {
        let start = position.saturating_add(1).min(items.len());
        let end = start.saturating_add(count).min(items.len());
        &items[start..end]
    }

    pub fn update(&mut self, position: usize, items: &[FeedItem], res: &mut FeedResources<'_>) {
        let window = Self::ahead(position, items, self.media_lookahead);
        let in_window: HashSet<&VideoId> = window.iter().map(|i| &i.video_id).collect();

        self.evict_outside_keep(position, items, res);
        self.queue.retain(|id, _| in_window.contains(id));
        self.skipped.retain(|id| in_window.contains(id));

        for item in Self::ahead(position, items, self.thumbnail_lookahead) {
            if item.thumbnail_url.is_empty() || self.warmed_thumbnails.get(&item.video_id).is_some() {
                continue;
            }
            res.loader.warm_thumbnail(&item.video_id, &item.thumbnail_url);
            self.warmed_thumbnails.put(item.video_id.clone(), ());
        }

        // Farthest first, so the nearest item ends up most recently used
        for item in window.iter().rev() {
            if self.entries.contains_key(&item.video_id) {
                res.pool.touch(&item.video_id);
            }
        }

        self.window = window.to_vec();
        self.refill(res);
    }

    /// Decoder initialised for a prefetch load.
    pub fn on_buffering(&mut self, video_id: &VideoId, res: &mut FeedResources<'_>) {
        if let Some(entry) = self.entries.get(video_id) {
            if entry.status == PrefetchStatus::Loading {
                res.pool.set_state(&entry.token, PlayerState::Buffering);
                res.tracker.stop_success(video_id, TracePhase::Load);
            }
        }
    }

    /// First frame of a prefetch load is ready; the handle stays warm.
    pub fn on_ready(&mut self, video_id: &VideoId, res: &mut FeedResources<'_>) {
        let Some(entry) = self.entries.get_mut(video_id) else {
            return;
        };
        if entry.status != PrefetchStatus::Loading {
            return;
        }
        entry.status = PrefetchStatus::Ready;
        res.pool.set_state(&entry.token, PlayerState::Ready);
        res.tracker.stop_success(video_id, TracePhase::Load);
        res.tracker.stop_success(video_id, TracePhase::Ready);
        debug!("PrefetchManager: {} ready", video_id);
        self.refill(res);
    }

    /// Prefetch load failed: close traces with error, free the handle.
    pub fn on_failed(&mut self, video_id: &VideoId, reason: &str, res: &mut FeedResources<'_>) {
        let Some(entry) = self.entries.get_mut(video_id) else {
            return;
        };
        if entry.status == PrefetchStatus::Failed {
            return;
        }
        entry.status = PrefetchStatus::Failed;
        res.tracker.stop_error(video_id, TracePhase::Load);
        res.tracker.stop_error(video_id, TracePhase::Ready);
        res.pool.release(video_id);
        debug!("PrefetchManager: {} failed: {}", video_id, reason);
        self.refill(res);
    }

    /// Hand an entry over to visible playback.
    pub fn take(&mut self, video_id: &VideoId) -> Option<PrefetchEntry> {
        self.queue.shift_remove(video_id);
        self.skipped.remove(video_id);
        self.entries.shift_remove(video_id)
    }

    /// Drop bookkeeping for an item whose handle went elsewhere.
    pub fn forget(&mut self, video_id: &VideoId) {
        self.queue.shift_remove(video_id);
        self.entries.shift_remove(video_id);
    }

    /// Token belongs to a live prefetch load.
    pub fn owns(&self, token: &LoadToken) -> bool {
        self.entries
            .get(&token.video_id)
            .map(|e| e.token == *token && e.status != PrefetchStatus::Failed)
            .unwrap_or(false)
    }

    pub fn entry(&self, video_id: &VideoId) -> Option<&PrefetchEntry> {
        self.entries.get(video_id)
    }

    pub fn queued(&self) -> Vec<VideoId> {
        self.queue.keys().cloned().collect()
    }

    pub fn inflight(&self) -> usize {
        self.entries.values().filter(|e| e.status == PrefetchStatus::Loading).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything (session end). Pool and tracker are reset by the caller.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.entries.clear();
        self.skipped.clear();
        self.warmed_thumbnails.clear();
        self.window.clear();
    }

    // ========== Internals ==========

    fn evict_outside_keep(&mut self, position: usize, items: &[FeedItem], res: &mut FeedResources<'_>) {
        let low = position.saturating_sub(self.trailing_keep);
        let high = position.saturating_add(self.media_lookahead);
        let positions: std::collections::HashMap<&VideoId, usize> =
            items.iter().enumerate().map(|(idx, i)| (&i.video_id, idx)).collect();

        let stale: Vec<VideoId> = self
            .entries
            .values()
            .filter(|e| {
                let in_keep = positions.get(&e.video_id).is_some_and(|&p| p >= low && p <= high && p != position);
                let lost_handle = e.status != PrefetchStatus::Failed && !res.pool.is_current(&e.token);
                !in_keep || lost_handle
            })
            .map(|e| e.video_id.clone())
            .collect();

        for id in stale {
            if let Some(entry) = self.entries.shift_remove(&id) {
                if res.pool.is_current(&entry.token) {
                    let prefetch_role = res.pool.handle_for(&id).map(|h| h.role == Role::Prefetch).unwrap_or(false);
                    if prefetch_role {
                        res.pool.release(&id);
                    }
                }
                res.tracker.discard(&id);
                trace!("PrefetchManager: dropped {}", id);
            }
        }
    }

    /// Rebuild the queue from the current window and start what fits.
    fn refill(&mut self, res: &mut FeedResources<'_>) {
        let live = self
            .window
            .iter()
            .filter(|i| self.entries.get(&i.video_id).is_some_and(|e| e.status != PrefetchStatus::Failed))
            .count();
        let mut budget = res.pool.prefetch_ceiling().saturating_sub(live);

        let mut wanted = IndexMap::new();
        let mut over_budget = Vec::new();
        for item in &self.window {
            if self.entries.contains_key(&item.video_id) {
                continue;
            }
            let held_visible = res
                .pool
                .handle_for(&item.video_id)
                .map(|h| h.role == Role::Visible)
                .unwrap_or(false);
            if held_visible {
                continue;
            }
            if budget > 0 {
                budget -= 1;
                self.skipped.remove(&item.video_id);
                wanted.insert(item.video_id.clone(), item.clone());
            } else {
                over_budget.push(item.video_id.clone());
            }
        }
        self.queue = wanted;
        for video_id in over_budget {
            self.report_skip(&video_id, SkipReason::PoolFull, res);
        }

        self.pump(res);
    }

    fn pump(&mut self, res: &mut FeedResources<'_>) {
        while self.inflight() < self.max_inflight {
            let Some((video_id, item)) = self.queue.shift_remove_index(0) else {
                break;
            };
            self.start(&video_id, &item, res);
        }
    }

    fn start(&mut self, video_id: &VideoId, item: &FeedItem, res: &mut FeedResources<'_>) {
        let Some(acq) = res.pool.acquire_prefetch(video_id) else {
            self.report_skip(video_id, SkipReason::PoolFull, res);
            return;
        };
        if acq.reused {
            return;
        }
        if let Some(evicted) = acq.evicted {
            self.entries.shift_remove(&evicted);
            res.tracker.discard(&evicted);
            res.events.emit(FeedEvent::Evicted {
                video_id: evicted,
                slot: acq.handle.slot,
            });
        }

        res.tracker.begin(video_id, &item.video_url, true);
        res.tracker.start(video_id, TracePhase::Load);
        res.tracker.start(video_id, TracePhase::Ready);

        let Some(token) = res.pool.load_source(video_id, &item.video_url) else {
            res.tracker.stop_error(video_id, TracePhase::Load);
            res.tracker.stop_error(video_id, TracePhase::Ready);
            res.pool.release(video_id);
            self.report_skip(video_id, SkipReason::ConstructionFailed, res);
            return;
        };

        let request = LoadRequest {
            token: token.clone(),
            url: item.video_url.clone(),
            role: Role::Prefetch,
        };
        res.loader
            .begin_loading(request, LoadCompletion::new(token.clone(), res.completions.clone()));
        self.entries.insert(
            video_id.clone(),
            PrefetchEntry {
                video_id: video_id.clone(),
                token,
                status: PrefetchStatus::Loading,
            },
        );
        debug!("PrefetchManager: loading {} in {}", video_id, acq.handle.slot);
    }

    fn report_skip(&mut self, video_id: &VideoId, reason: SkipReason, res: &mut FeedResources<'_>) {
        if self.skipped.insert(video_id.clone()) {
            trace!("PrefetchManager: skipped {} ({:?})", video_id, reason);
            res.events.emit(FeedEvent::PrefetchSkipped {
                video_id: video_id.clone(),
                reason,
            });
        }
    }
}
