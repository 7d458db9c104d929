//! Control sequence: one thread that owns the `ReelFeed`.
//!
//! UI input arrives as `Command`s, loader reports on the completion channel;
//! both are applied in arrival order on the `reel-control` thread. Native
//! players are only ever touched from there.

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use log::{debug, trace};
use std::thread;

use super::edge_scroll::ScrollDelta;
use super::feed::{FeedStats, ReelFeed};
use crate::entities::{FeedItem, HandleSnapshot, VideoId};
use crate::error::FeedError;

/// Input for the control sequence.
#[derive(Debug)]
pub enum Command {
    PositionChanged { position: usize, items: Vec<FeedItem> },
    Scroll(ScrollDelta),
    Fling(ScrollDelta),
    EndGesture,
    SurfaceFor(VideoId, Sender<Option<HandleSnapshot>>),
    Stats(Sender<FeedStats>),
    EndSession,
    Shutdown,
}

/// Cloneable sender side, safe to use from any thread.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    tx: Sender<Command>,
}

impl FeedHandle {
    fn send(&self, command: Command) -> Result<(), FeedError> {
        self.tx.send(command).map_err(|_| FeedError::Disconnected)
    }

    pub fn position_changed(&self, position: usize, items: Vec<FeedItem>) -> Result<(), FeedError> {
        self.send(Command::PositionChanged { position, items })
    }

    pub fn scroll(&self, delta: ScrollDelta) -> Result<(), FeedError> {
        self.send(Command::Scroll(delta))
    }

    pub fn fling(&self, velocity: ScrollDelta) -> Result<(), FeedError> {
        self.send(Command::Fling(velocity))
    }

    pub fn end_gesture(&self) -> Result<(), FeedError> {
        self.send(Command::EndGesture)
    }

    /// Blocks until the control sequence answers.
    pub fn surface_for(&self, video_id: &VideoId) -> Result<Option<HandleSnapshot>, FeedError> {
        let (tx, rx) = bounded(1);
        self.send(Command::SurfaceFor(video_id.clone(), tx))?;
        rx.recv().map_err(|_| FeedError::Disconnected)
    }

    pub fn stats(&self) -> Result<FeedStats, FeedError> {
        let (tx, rx) = bounded(1);
        self.send(Command::Stats(tx))?;
        rx.recv().map_err(|_| FeedError::Disconnected)
    }

    pub fn end_session(&self) -> Result<(), FeedError> {
        self.send(Command::EndSession)
    }
}

/// Owns the control thread; dropping it shuts the feed down.
pub struct FeedController {
    handle: FeedHandle,
    thread: Option<thread::JoinHandle<()>>,
}

impl FeedController {
    pub fn spawn(feed: ReelFeed) -> Result<Self, FeedError> {
        let (tx, rx) = unbounded();
        let thread = thread::Builder::new()
            .name("reel-control".into())
            .spawn(move || run(feed, rx))
            .map_err(FeedError::Spawn)?;
        Ok(Self {
            handle: FeedHandle { tx },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> FeedHandle {
        self.handle.clone()
    }

    /// Stop the control thread and destroy the players. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.handle.tx.send(Command::Shutdown);
        if thread.join().is_err() {
            debug!("FeedController: control thread panicked");
        }
    }
}

impl Drop for FeedController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(mut feed: ReelFeed, commands: Receiver<Command>) {
    let completions = feed.completion_receiver();
    debug!("FeedController: control sequence started");

    loop {
        let running = select! {
            recv(commands) -> msg => match msg {
                Ok(command) => apply(&mut feed, command),
                // Every handle dropped
                Err(_) => false,
            },
            recv(completions) -> msg => {
                if let Ok(event) = msg {
                    feed.on_load_event(event);
                }
                true
            }
        };
        if !running {
            break;
        }
    }

    feed.shutdown();
    debug!("FeedController: control sequence stopped");
}

/// Returns false on shutdown.
fn apply(feed: &mut ReelFeed, command: Command) -> bool {
    trace!("FeedController: {:?}", command);
    match command {
        Command::PositionChanged { position, items } => feed.on_position_changed(position, &items),
        Command::Scroll(delta) => {
            feed.on_scroll(delta);
        }
        Command::Fling(velocity) => {
            feed.on_fling(velocity);
        }
        Command::EndGesture => feed.end_gesture(),
        Command::SurfaceFor(video_id, reply) => {
            let _ = reply.send(feed.surface_for(&video_id));
        }
        Command::Stats(reply) => {
            let _ = reply.send(feed.stats());
        }
        Command::EndSession => feed.end_session(),
        Command::Shutdown => return false,
    }
    true
}
