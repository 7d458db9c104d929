//! Fixed-capacity pool of native players.
//!
//! N handles are built once and reused for the life of the feed screen.
//! Items are keyed by `VideoId`; at most one handle holds a given id.
//!
//! Eviction is strict LRU by logical tick, scoped by role:
//! - visible requests take a free slot, else the LRU prefetch handle, else
//!   (misconfiguration) the LRU visible handle that isn't playing
//! - prefetch requests never touch visible handles and never grow past the
//!   prefetch ceiling `N - max(visible_slots_reserved, visible_count)`
//!
//! Every assignment bumps the slot epoch. Loader callbacks carry a
//! `LoadToken` and are checked against the slot's current assignment with
//! `is_current`, so a late completion for a recycled slot is a no-op.

use log::{debug, error, trace, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::entities::{HandleSnapshot, LoadToken, Player, PlayerFactory, PlayerState, Role, SlotId, VideoId};

/// One pooled native player and its bookkeeping.
pub struct PlayerHandle {
    slot: SlotId,
    player: Option<Box<dyn Player>>, // None until construction succeeds
    video_id: Option<VideoId>,
    role: Role,
    state: PlayerState,
    epoch: u64,
    last_used_at: u64,
}

impl PlayerHandle {
    fn new(slot: SlotId) -> Self {
        Self {
            slot,
            player: None,
            video_id: None,
            role: Role::Prefetch,
            state: PlayerState::Idle,
            epoch: 0,
            last_used_at: 0,
        }
    }

    pub fn snapshot(&self) -> HandleSnapshot {
        HandleSnapshot {
            slot: self.slot,
            video_id: self.video_id.clone(),
            role: self.role,
            state: self.state,
            epoch: self.epoch,
            last_used_at: self.last_used_at,
        }
    }

    fn is_free(&self) -> bool {
        self.video_id.is_none()
    }
}

impl std::fmt::Debug for PlayerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerHandle")
            .field("slot", &self.slot)
            .field("video_id", &self.video_id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("epoch", &self.epoch)
            .field("has_player", &self.player.is_some())
            .finish()
    }
}

/// Result of a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    pub handle: HandleSnapshot,
    /// Item that lost its slot to this acquisition
    pub evicted: Option<VideoId>,
    /// Item already held a handle, nothing was (re)assigned
    pub reused: bool,
}

/// Pool counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub acquisitions: u64,
    pub reuses: u64,
    pub promotions: u64,
    pub evictions: u64,
    pub prefetch_denials: u64,
    pub construction_failures: u64,
    pub stale_callbacks: u64,
}

pub struct PlayerPool {
    slots: Vec<PlayerHandle>,
    by_video: HashMap<VideoId, usize>,
    factory: Box<dyn PlayerFactory>,
    visible_reserved: usize,
    tick: u64,
    next_epoch: u64,
    playing: Option<VideoId>,
    shut_down: bool,
    stats: PoolStats,
}

impl PlayerPool {
    /// Build the pool and construct all native players up front.
    ///
    /// A capacity of 0 is clamped to 1. Construction failures leave the slot
    /// in `Error`; it is retried on the next acquisition of that slot.
    pub fn new(capacity: usize, visible_slots_reserved: usize, factory: Box<dyn PlayerFactory>) -> Self {
        let capacity = capacity.max(1);
        let mut pool = Self {
            slots: (1..=capacity).map(|n| PlayerHandle::new(SlotId(n as u32))).collect(),
            by_video: HashMap::new(),
            factory,
            visible_reserved: visible_slots_reserved.min(capacity),
            tick: 0,
            next_epoch: 1,
            playing: None,
            shut_down: false,
            stats: PoolStats::default(),
        };
        for idx in 0..capacity {
            if !pool.ensure_player(idx) {
                pool.slots[idx].state = PlayerState::Error;
            }
        }
        debug!(
            "PlayerPool: {} slots, {} reserved for visible playback",
            capacity, pool.visible_reserved
        );
        pool
    }

    // ========== Acquisition ==========

    /// Handle for on-screen playback. Never fails.
    ///
    /// An item already held for prefetch is promoted in place. Otherwise a
    /// slot is chosen by the eviction policy, assigned, and reset to
    /// `Loading`.
    pub fn acquire_visible(&mut self, video_id: &VideoId) -> Acquisition {
        if let Some(&idx) = self.by_video.get(video_id) {
            if self.slots[idx].role == Role::Prefetch {
                self.slots[idx].role = Role::Visible;
                self.stats.promotions += 1;
                debug!("PlayerPool: promoted {} in {}", video_id, self.slots[idx].slot);
                self.check_visible_reservation();
            }
            self.stats.reuses += 1;
            self.touch_idx(idx);
            return Acquisition {
                handle: self.slots[idx].snapshot(),
                evicted: None,
                reused: true,
            };
        }

        let idx = self.select_for_visible();
        let evicted = self.unassign(idx);
        if let Some(ref old) = evicted {
            self.stats.evictions += 1;
            debug!("PlayerPool: {} evicted from {} for visible {}", old, self.slots[idx].slot, video_id);
        }
        self.assign(idx, video_id, Role::Visible);
        self.check_visible_reservation();

        Acquisition {
            handle: self.slots[idx].snapshot(),
            evicted,
            reused: false,
        }
    }

    /// Best-effort handle for warming an upcoming item.
    ///
    /// Returns None when the prefetch share of the pool is exhausted and no
    /// prefetch handle can be recycled. Visible handles are never taken.
    pub fn acquire_prefetch(&mut self, video_id: &VideoId) -> Option<Acquisition> {
        if let Some(&idx) = self.by_video.get(video_id) {
            self.stats.reuses += 1;
            self.touch_idx(idx);
            return Some(Acquisition {
                handle: self.slots[idx].snapshot(),
                evicted: None,
                reused: true,
            });
        }

        let Some(idx) = self.select_for_prefetch() else {
            self.stats.prefetch_denials += 1;
            trace!("PlayerPool: prefetch denied for {}", video_id);
            return None;
        };
        let evicted = self.unassign(idx);
        if let Some(ref old) = evicted {
            self.stats.evictions += 1;
            debug!("PlayerPool: {} evicted from {} for prefetch {}", old, self.slots[idx].slot, video_id);
        }
        self.assign(idx, video_id, Role::Prefetch);

        Some(Acquisition {
            handle: self.slots[idx].snapshot(),
            evicted,
            reused: false,
        })
    }

    /// Stop the player, clear its source, keep it warm for reuse.
    pub fn release(&mut self, video_id: &VideoId) -> Option<SlotId> {
        let &idx = self.by_video.get(video_id)?;
        self.unassign(idx);
        self.touch_idx(idx);
        trace!("PlayerPool: released {} from {}", video_id, self.slots[idx].slot);
        Some(self.slots[idx].slot)
    }

    /// Turn a prefetch handle into a visible one without reloading.
    pub fn promote(&mut self, video_id: &VideoId) -> Option<HandleSnapshot> {
        let &idx = self.by_video.get(video_id)?;
        if self.slots[idx].role == Role::Prefetch {
            self.slots[idx].role = Role::Visible;
            self.stats.promotions += 1;
            debug!("PlayerPool: promoted {} in {}", video_id, self.slots[idx].slot);
            self.check_visible_reservation();
        }
        self.touch_idx(idx);
        Some(self.slots[idx].snapshot())
    }

    // ========== Player control ==========

    /// Point the assigned player at `url`. None when the item holds no
    /// handle or its player could not be constructed.
    pub fn load_source(&mut self, video_id: &VideoId, url: &str) -> Option<LoadToken> {
        let &idx = self.by_video.get(video_id)?;
        let handle = &mut self.slots[idx];
        let player = handle.player.as_mut()?;
        player.set_source(Some(url));
        handle.state = PlayerState::Loading;
        handle.snapshot().token()
    }

    /// Token still refers to the slot's current assignment.
    pub fn is_current(&self, token: &LoadToken) -> bool {
        self.slot_index(token.slot)
            .map(|idx| {
                let handle = &self.slots[idx];
                handle.epoch == token.epoch && handle.video_id.as_ref() == Some(&token.video_id)
            })
            .unwrap_or(false)
    }

    /// Apply a loader-reported state. Stale tokens are ignored.
    pub fn set_state(&mut self, token: &LoadToken, state: PlayerState) -> bool {
        if !self.is_current(token) {
            return false;
        }
        if let Some(idx) = self.slot_index(token.slot) {
            self.slots[idx].state = state;
        }
        true
    }

    /// Count a dropped loader callback.
    pub fn record_stale(&mut self) {
        self.stats.stale_callbacks += 1;
    }

    /// Start playback of `video_id`, pausing whatever played before.
    pub fn play(&mut self, video_id: &VideoId) -> bool {
        let Some(&idx) = self.by_video.get(video_id) else {
            return false;
        };
        if self.slots[idx].player.is_none() {
            return false;
        }
        if let Some(previous) = self.playing.clone() {
            if previous != *video_id {
                self.pause(&previous);
            }
        }
        let handle = &mut self.slots[idx];
        if let Some(player) = handle.player.as_mut() {
            player.play();
        }
        handle.state = PlayerState::Playing;
        self.playing = Some(video_id.clone());
        self.touch_idx(idx);
        true
    }

    pub fn pause(&mut self, video_id: &VideoId) -> bool {
        let Some(&idx) = self.by_video.get(video_id) else {
            return false;
        };
        let handle = &mut self.slots[idx];
        let Some(player) = handle.player.as_mut() else {
            return false;
        };
        player.pause();
        handle.state = PlayerState::Paused;
        if self.playing.as_ref() == Some(video_id) {
            self.playing = None;
        }
        true
    }

    /// Seek the item's player back to the start. State is left as is.
    pub fn rewind(&mut self, video_id: &VideoId) -> bool {
        let Some(&idx) = self.by_video.get(video_id) else {
            return false;
        };
        match self.slots[idx].player.as_mut() {
            Some(player) => {
                player.seek(Duration::ZERO);
                true
            }
            None => false,
        }
    }

    /// Mark an item as recently used without changing anything else.
    pub fn touch(&mut self, video_id: &VideoId) -> bool {
        match self.by_video.get(video_id) {
            Some(&idx) => {
                self.touch_idx(idx);
                true
            }
            None => false,
        }
    }

    // ========== Queries ==========

    pub fn handle_for(&self, video_id: &VideoId) -> Option<HandleSnapshot> {
        self.by_video.get(video_id).map(|&idx| self.slots[idx].snapshot())
    }

    pub fn snapshots(&self) -> Vec<HandleSnapshot> {
        self.slots.iter().map(PlayerHandle::snapshot).collect()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn visible_slots_reserved(&self) -> usize {
        self.visible_reserved
    }

    pub fn visible_count(&self) -> usize {
        self.count_role(Role::Visible)
    }

    pub fn prefetch_count(&self) -> usize {
        self.count_role(Role::Prefetch)
    }

    pub fn assigned_count(&self) -> usize {
        self.by_video.len()
    }

    /// Prefetch handles the pool will hold at most right now.
    pub fn prefetch_ceiling(&self) -> usize {
        if self.shut_down {
            return 0;
        }
        let reserved = self.visible_reserved.max(self.visible_count());
        self.capacity().saturating_sub(reserved)
    }

    pub fn currently_playing(&self) -> Option<&VideoId> {
        self.playing.as_ref()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    // ========== Teardown ==========

    /// Destroy every native player. Later acquisitions get `Error` handles.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for handle in &mut self.slots {
            if let Some(mut player) = handle.player.take() {
                player.stop();
                player.release();
            }
            handle.video_id = None;
            handle.state = PlayerState::Error;
        }
        self.by_video.clear();
        self.playing = None;
        debug!("PlayerPool: shut down {} slots", self.slots.len());
    }

    // ========== Internals ==========

    fn slot_index(&self, slot: SlotId) -> Option<usize> {
        let idx = (slot.0 as usize).checked_sub(1)?;
        (idx < self.slots.len()).then_some(idx)
    }

    fn count_role(&self, role: Role) -> usize {
        self.slots.iter().filter(|h| !h.is_free() && h.role == role).count()
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch_idx(&mut self, idx: usize) {
        let tick = self.next_tick();
        self.slots[idx].last_used_at = tick;
    }

    /// Construct the slot's player if missing.
    fn ensure_player(&mut self, idx: usize) -> bool {
        if self.slots[idx].player.is_some() {
            return true;
        }
        if self.shut_down {
            return false;
        }
        let slot = self.slots[idx].slot;
        match self.factory.create(slot) {
            Ok(player) => {
                self.slots[idx].player = Some(player);
                trace!("PlayerPool: constructed player for {}", slot);
                true
            }
            Err(e) => {
                self.stats.construction_failures += 1;
                warn!("PlayerPool: {} construction failed: {}", slot, e);
                false
            }
        }
    }

    fn lru_where(&self, pred: impl Fn(&PlayerHandle) -> bool) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, h)| pred(h))
            .min_by_key(|(_, h)| h.last_used_at)
            .map(|(idx, _)| idx)
    }

    fn select_for_visible(&self) -> usize {
        if let Some(idx) = self.lru_where(PlayerHandle::is_free) {
            return idx;
        }
        if let Some(idx) = self.lru_where(|h| h.role == Role::Prefetch) {
            return idx;
        }
        error!(
            "PlayerPool: all {} slots hold visible items, evicting a visible handle (pool too small)",
            self.slots.len()
        );
        let playing = self.playing.as_ref();
        self.lru_where(|h| h.video_id.as_ref() != playing)
            .or_else(|| self.lru_where(|_| true))
            .unwrap_or(0)
    }

    fn select_for_prefetch(&self) -> Option<usize> {
        let ceiling = self.prefetch_ceiling();
        if ceiling == 0 {
            return None;
        }
        if self.prefetch_count() < ceiling {
            if let Some(idx) = self.lru_where(PlayerHandle::is_free) {
                return Some(idx);
            }
        }
        self.lru_where(|h| !h.is_free() && h.role == Role::Prefetch)
    }

    /// Stop + clear source and detach the item. Returns the detached item.
    fn unassign(&mut self, idx: usize) -> Option<VideoId> {
        let handle = &mut self.slots[idx];
        let video_id = handle.video_id.take()?;
        if let Some(player) = handle.player.as_mut() {
            player.stop();
            player.set_source(None);
        }
        handle.state = PlayerState::Idle;
        self.by_video.remove(&video_id);
        if self.playing.as_ref() == Some(&video_id) {
            self.playing = None;
        }
        Some(video_id)
    }

    fn assign(&mut self, idx: usize, video_id: &VideoId, role: Role) {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        let constructed = self.ensure_player(idx);
        let tick = self.next_tick();

        let handle = &mut self.slots[idx];
        handle.video_id = Some(video_id.clone());
        handle.role = role;
        handle.epoch = epoch;
        handle.last_used_at = tick;
        handle.state = if constructed { PlayerState::Loading } else { PlayerState::Error };
        self.by_video.insert(video_id.clone(), idx);
        self.stats.acquisitions += 1;
        trace!("PlayerPool: {} -> {} ({:?}, epoch {})", video_id, handle.slot, role, epoch);
    }

    fn check_visible_reservation(&self) {
        let visible = self.visible_count();
        if visible > self.visible_reserved {
            warn!(
                "PlayerPool: {} visible handles exceed the {} reserved slots",
                visible, self.visible_reserved
            );
        }
    }
}

impl Drop for PlayerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for PlayerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerPool")
            .field("slots", &self.slots)
            .field("visible_reserved", &self.visible_reserved)
            .field("playing", &self.playing)
            .field("stats", &self.stats)
            .finish()
    }
}
