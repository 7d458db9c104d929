//! Simulated media loaders.
//!
//! `ScriptedLoader` only records requests; tests decide when (and whether)
//! each load buffers, becomes ready, fails or ends. `TimedLoader` completes
//! loads on worker threads after a fixed latency, for the simulator binary.

use log::{debug, trace};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::workers::Workers;
use crate::entities::{LoadCompletion, LoadRequest, MediaLoader, VideoId};
use crate::error::FeedError;

#[derive(Default)]
struct ScriptState {
    requests: Vec<LoadRequest>,
    completions: Vec<LoadCompletion>,
    thumbnails: Vec<VideoId>,
}

/// Test-side view of a `ScriptedLoader`.
#[derive(Clone, Default)]
pub struct LoaderScript {
    state: Arc<Mutex<ScriptState>>,
}

impl LoaderScript {
    fn with_state<R>(&self, f: impl FnOnce(&mut ScriptState) -> R) -> R {
        f(&mut self.state.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn requests(&self) -> Vec<LoadRequest> {
        self.with_state(|s| s.requests.clone())
    }

    /// Requested video ids in request order.
    pub fn requested_ids(&self) -> Vec<VideoId> {
        self.with_state(|s| s.requests.iter().map(|r| r.token.video_id.clone()).collect())
    }

    pub fn thumbnails(&self) -> Vec<VideoId> {
        self.with_state(|s| s.thumbnails.clone())
    }

    /// Latest completion handed out for `video_id`.
    pub fn completion_for(&self, video_id: &VideoId) -> Option<LoadCompletion> {
        self.with_state(|s| {
            s.completions
                .iter()
                .rev()
                .find(|c| c.token().video_id == *video_id)
                .cloned()
        })
    }

    pub fn buffering(&self, video_id: &VideoId) -> bool {
        self.completion_for(video_id).map(|c| c.buffering()).is_some()
    }

    pub fn ready(&self, video_id: &VideoId) -> bool {
        self.completion_for(video_id).map(|c| c.ready()).is_some()
    }

    pub fn fail(&self, video_id: &VideoId, reason: &str) -> bool {
        self.completion_for(video_id).map(|c| c.failed(reason)).is_some()
    }

    pub fn ended(&self, video_id: &VideoId) -> bool {
        self.completion_for(video_id).map(|c| c.ended()).is_some()
    }

    pub fn clear(&self) {
        self.with_state(|s| *s = ScriptState::default());
    }
}

/// Loader that never completes on its own.
#[derive(Default)]
pub struct ScriptedLoader {
    script: LoaderScript,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self) -> LoaderScript {
        self.script.clone()
    }
}

impl MediaLoader for ScriptedLoader {
    fn begin_loading(&mut self, request: LoadRequest, completion: LoadCompletion) {
        trace!("ScriptedLoader: {} ({:?})", request.token.video_id, request.role);
        self.script.with_state(|s| {
            s.requests.push(request);
            s.completions.push(completion);
        });
    }

    fn warm_thumbnail(&mut self, video_id: &VideoId, _url: &str) {
        self.script.with_state(|s| s.thumbnails.push(video_id.clone()));
    }
}

/// Loader that buffers, then becomes ready, after `latency` on a worker.
pub struct TimedLoader {
    workers: Workers,
    latency: Duration,
    /// Every n-th load fails (0 = never)
    fail_every: u64,
    started: Arc<AtomicU64>,
}

impl TimedLoader {
    pub fn new(threads: usize, latency: Duration, fail_every: u64) -> Result<Self, FeedError> {
        Ok(Self {
            workers: Workers::new(threads, "reel-loader")?,
            latency,
            fail_every,
            started: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }
}

impl MediaLoader for TimedLoader {
    fn begin_loading(&mut self, request: LoadRequest, completion: LoadCompletion) {
        let n = self.started.fetch_add(1, Ordering::Relaxed) + 1;
        let fail = self.fail_every > 0 && n % self.fail_every == 0;
        let latency = self.latency;
        debug!("TimedLoader: load #{} {} ({:?})", n, request.token.video_id, request.role);

        self.workers.execute(move || {
            std::thread::sleep(latency / 2);
            if fail {
                completion.failed(format!("simulated network error for {}", request.url));
                return;
            }
            completion.buffering();
            std::thread::sleep(latency - latency / 2);
            completion.ready();
        });
    }

    fn warm_thumbnail(&mut self, video_id: &VideoId, url: &str) {
        trace!("TimedLoader: thumbnail {} <- {}", video_id, url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{LoadEventKind, LoadToken, Role, SlotId};
    use crossbeam_channel::unbounded;

    fn request(id: &str) -> LoadRequest {
        LoadRequest {
            token: LoadToken {
                slot: SlotId(1),
                video_id: VideoId::from(id),
                epoch: 1,
            },
            url: format!("https://cdn.example/{}.mp4", id),
            role: Role::Prefetch,
        }
    }

    #[test]
    fn test_scripted_loader_reports_on_demand() {
        let (tx, rx) = unbounded();
        let mut loader = ScriptedLoader::new();
        let script = loader.script();
        let req = request("a");
        loader.begin_loading(req.clone(), LoadCompletion::new(req.token.clone(), tx));

        assert_eq!(script.requested_ids(), vec![VideoId::from("a")]);
        assert!(rx.try_recv().is_err());
        assert!(script.ready(&VideoId::from("a")));
        assert!(!script.ready(&VideoId::from("b")));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, LoadEventKind::Ready);
        assert_eq!(event.token, req.token);
    }

    #[test]
    fn test_timed_loader_completes_and_fails() {
        let (tx, rx) = unbounded();
        let mut loader = TimedLoader::new(2, Duration::from_millis(5), 2).unwrap();
        for id in ["a", "b"] {
            let req = request(id);
            loader.begin_loading(req.clone(), LoadCompletion::new(req.token.clone(), tx.clone()));
        }

        let mut kinds = Vec::new();
        while kinds.len() < 3 {
            let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            kinds.push((event.token.video_id.to_string(), event.kind));
        }
        assert!(kinds.contains(&("a".to_string(), LoadEventKind::Buffering)));
        assert!(kinds.contains(&("a".to_string(), LoadEventKind::Ready)));
        assert!(kinds.iter().any(|(id, k)| id == "b" && matches!(k, LoadEventKind::Failed(_))));
        assert_eq!(loader.started(), 2);
    }
}
