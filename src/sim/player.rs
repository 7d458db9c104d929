//! Simulated native players.
//!
//! Every control call is appended to a shared `PlayerLog` so tests can assert
//! exactly what the pool did to which slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::trace;

use crate::entities::{Player, PlayerFactory, SlotId};
use crate::error::PlayerError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerCall {
    Play,
    Pause,
    Stop,
    Release,
    SetSource(Option<String>),
    Seek(Duration),
}

/// Shared, cloneable call log of all players built by one factory.
#[derive(Debug, Clone, Default)]
pub struct PlayerLog {
    calls: Arc<Mutex<Vec<(SlotId, PlayerCall)>>>,
}

impl PlayerLog {
    fn push(&self, slot: SlotId, call: PlayerCall) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push((slot, call));
    }

    pub fn calls(&self) -> Vec<(SlotId, PlayerCall)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn calls_for(&self, slot: SlotId) -> Vec<PlayerCall> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(s, _)| *s == slot)
            .map(|(_, call)| call.clone())
            .collect()
    }

    pub fn count(&self, pred: impl Fn(SlotId, &PlayerCall) -> bool) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(slot, call)| pred(*slot, call))
            .count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

pub struct SimPlayer {
    slot: SlotId,
    log: PlayerLog,
}

impl Player for SimPlayer {
    fn play(&mut self) {
        self.log.push(self.slot, PlayerCall::Play);
    }

    fn pause(&mut self) {
        self.log.push(self.slot, PlayerCall::Pause);
    }

    fn stop(&mut self) {
        self.log.push(self.slot, PlayerCall::Stop);
    }

    fn release(&mut self) {
        self.log.push(self.slot, PlayerCall::Release);
    }

    fn set_source(&mut self, url: Option<&str>) {
        self.log.push(self.slot, PlayerCall::SetSource(url.map(str::to_string)));
    }

    fn seek(&mut self, position: Duration) {
        self.log.push(self.slot, PlayerCall::Seek(position));
    }
}

/// Builds `SimPlayer`s, optionally failing the first attempts for a slot.
#[derive(Debug, Default)]
pub struct SimPlayerFactory {
    log: PlayerLog,
    failures: HashMap<SlotId, u32>,
    created: u32,
}

impl SimPlayerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` construction attempts for `slot`.
    pub fn fail_slot(mut self, slot: SlotId, times: u32) -> Self {
        self.failures.insert(slot, times);
        self
    }

    pub fn log(&self) -> PlayerLog {
        self.log.clone()
    }
}

impl PlayerFactory for SimPlayerFactory {
    fn create(&mut self, slot: SlotId) -> Result<Box<dyn Player>, PlayerError> {
        if let Some(remaining) = self.failures.get_mut(&slot) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PlayerError::Construction(format!("simulated decoder failure on {}", slot)));
            }
        }
        self.created += 1;
        trace!("SimPlayerFactory: player #{} for {}", self.created, slot);
        Ok(Box::new(SimPlayer {
            slot,
            log: self.log.clone(),
        }))
    }
}
