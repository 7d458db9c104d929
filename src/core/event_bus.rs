//! Outbound event bus of the feed.
//!
//! Architecture:
//! - Subscribers get callbacks for every `FeedEvent` (immediate invocation)
//! - emit() invokes callbacks immediately AND queues for deferred processing
//! - poll() returns queued events for batch processing in the host loop
//! - edge_events() / trace_events() hand out channel receivers carrying only
//!   those two streams, for the feed/network and telemetry collaborators
//!
//! Callbacks run on the control sequence; keep them short.

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::warn;
use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};

use super::edge_scroll::EdgeReached;
use super::prefetch::SkipReason;
use crate::entities::{SlotId, TraceEvent, TraceSink, VideoId};

/// Default bound of the deferred queue
pub const DEFAULT_QUEUE_LIMIT: usize = 1000;

/// Everything the feed reports outward.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FeedEvent {
    /// Terminal trace outcome
    Trace(TraceEvent),
    /// Fetch more pages
    Edge(EdgeReached),
    PrefetchSkipped { video_id: VideoId, reason: SkipReason },
    Evicted { video_id: VideoId, slot: SlotId },
    PlaybackStarted { video_id: VideoId, slot: SlotId },
    PlaybackEnded { video_id: VideoId },
    /// Loader reported for an assignment that no longer exists
    StaleCallback { video_id: VideoId, slot: SlotId },
}

type Callback = Arc<dyn Fn(&FeedEvent) + Send + Sync>;

#[derive(Default)]
struct Streams {
    edge: Vec<Sender<EdgeReached>>,
    trace: Vec<Sender<TraceEvent>>,
}

struct BusInner {
    subscribers: RwLock<Vec<Callback>>,
    queue: Mutex<Vec<FeedEvent>>,
    streams: Mutex<Streams>,
    queue_limit: usize,
}

impl BusInner {
    fn emit(&self, event: FeedEvent) {
        // Invoke immediate callbacks
        for cb in self.subscribers.read().unwrap_or_else(|e| e.into_inner()).iter() {
            cb(&event);
        }

        // Streams; receivers that were dropped are pruned
        {
            let mut streams = self.streams.lock().unwrap_or_else(|e| e.into_inner());
            match &event {
                FeedEvent::Edge(edge) => streams.edge.retain(|tx| tx.send(*edge).is_ok()),
                FeedEvent::Trace(trace) => streams.trace.retain(|tx| tx.send(trace.clone()).is_ok()),
                _ => {}
            }
        }

        // Queue for deferred processing with eviction
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= self.queue_limit {
            let evict_count = (queue.len() / 2).max(1);
            warn!("EventBus queue full ({} events), evicting oldest {}", queue.len(), evict_count);
            queue.drain(0..evict_count);
        }
        queue.push(event);
    }
}

/// Pub/sub bus with deferred processing and typed streams.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_queue_limit(DEFAULT_QUEUE_LIMIT)
    }

    pub fn with_queue_limit(queue_limit: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(Vec::new()),
                queue: Mutex::new(Vec::new()),
                streams: Mutex::new(Streams::default()),
                queue_limit: queue_limit.max(1),
            }),
        }
    }

    // ========== Pub/Sub (immediate) ==========

    /// Subscribe to all feed events.
    ///
    /// # Example
    /// ```ignore
    /// bus.subscribe(|e| {
    ///     if let FeedEvent::Edge(edge) = e {
    ///         fetch_more(edge.page);
    ///     }
    /// });
    /// ```
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&FeedEvent) + Send + Sync + 'static,
    {
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(callback));
    }

    pub fn emit(&self, event: FeedEvent) {
        self.inner.emit(event);
    }

    // ========== Streams ==========

    /// Edge-of-list events, one per gesture.
    pub fn edge_events(&self) -> Receiver<EdgeReached> {
        let (tx, rx) = unbounded();
        self.inner.streams.lock().unwrap_or_else(|e| e.into_inner()).edge.push(tx);
        rx
    }

    /// Terminal trace events (success / error only).
    pub fn trace_events(&self) -> Receiver<TraceEvent> {
        let (tx, rx) = unbounded();
        self.inner.streams.lock().unwrap_or_else(|e| e.into_inner()).trace.push(tx);
        rx
    }

    // ========== Deferred Processing ==========

    /// All events emitted since the last poll.
    pub fn poll(&self) -> Vec<FeedEvent> {
        std::mem::take(&mut *self.inner.queue.lock().unwrap_or_else(|e| e.into_inner()))
    }

    // ========== Handle & Utilities ==========

    /// Emitter handle for the components inside the control sequence.
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Clear subscribers and queue. Stream receivers stay connected.
    pub fn clear(&self) {
        self.inner.subscribers.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.inner.queue.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Lightweight emitter handle, cloneable.
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscribers", &self.inner.subscribers.read().map(|s| s.len()).unwrap_or(0))
            .field("queue_len", &self.inner.queue.lock().map(|q| q.len()).unwrap_or(0))
            .finish()
    }
}

impl EventEmitter {
    pub fn emit(&self, event: FeedEvent) {
        self.inner.emit(event);
    }
}

impl TraceSink for EventEmitter {
    fn record(&mut self, event: TraceEvent) {
        self.emit(FeedEvent::Trace(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::edge_scroll::ScrollDirection;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn edge(page: usize) -> EdgeReached {
        EdgeReached {
            page,
            at_start: false,
            direction: ScrollDirection::Forward,
        }
    }

    #[test]
    fn test_subscribe_emit_immediate() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        bus.subscribe(move |e| {
            if let FeedEvent::Edge(edge) = e {
                c.fetch_add(edge.page, Ordering::SeqCst);
            }
        });

        bus.emit(FeedEvent::Edge(edge(10)));
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        bus.emitter().emit(FeedEvent::Edge(edge(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn test_emit_queues_for_poll() {
        let bus = EventBus::new();
        bus.emit(FeedEvent::Edge(edge(1)));
        bus.emit(FeedEvent::PlaybackEnded { video_id: VideoId::from("a") });
        assert_eq!(bus.poll().len(), 2);
        assert_eq!(bus.poll().len(), 0);
    }

    #[test]
    fn test_queue_limit_evicts_oldest() {
        let bus = EventBus::with_queue_limit(4);
        for page in 0..5 {
            bus.emit(FeedEvent::Edge(edge(page)));
        }
        let events = bus.poll();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], FeedEvent::Edge(edge(2)));
    }

    #[test]
    fn test_streams_filter_by_kind() {
        let bus = EventBus::new();
        let edges = bus.edge_events();
        let traces = bus.trace_events();
        bus.emit(FeedEvent::Edge(edge(3)));
        bus.emit(FeedEvent::PlaybackEnded { video_id: VideoId::from("a") });

        assert_eq!(edges.try_recv().unwrap().page, 3);
        assert!(edges.try_recv().is_err());
        assert!(traces.try_recv().is_err());

        // Dropped receivers are pruned on the next emit
        drop(edges);
        bus.emit(FeedEvent::Edge(edge(4)));
        assert!(bus.inner.streams.lock().unwrap().edge.is_empty());
    }
}
