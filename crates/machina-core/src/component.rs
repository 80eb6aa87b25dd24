//! Per-process components that observe the tick loop without taking part in
//! requirement evaluation.
//!
//! Components receive [`ProcessComponent::on_pre_tick`] and
//! [`ProcessComponent::on_tick`] before the process's stages run and
//! [`ProcessComponent::on_post_tick`] after, every machine tick, whatever the
//! stage outcome. A blocked process therefore never starves its observers.

use crate::process::ProcessStatus;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ProcessComponent trait
// ---------------------------------------------------------------------------

/// An orthogonal behavior attached to a single process.
///
/// All hooks default to no-ops, so components only override what they need.
pub trait ProcessComponent: std::fmt::Debug {
    /// Name used to key saved state; must be unique per process.
    fn name(&self) -> &str;

    fn on_pre_tick(&mut self, status: &ProcessStatus) {
        let _ = status;
    }

    fn on_tick(&mut self, status: &ProcessStatus) {
        let _ = status;
    }

    /// Called after the stages ran; `status` reflects this tick's outcome.
    fn on_post_tick(&mut self, status: &ProcessStatus) {
        let _ = status;
    }

    /// Serialize internal state for save games. Stateless components return
    /// an empty vec.
    fn save_state(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Restore state written by [`save_state`](Self::save_state).
    fn load_state(&mut self, _data: &[u8]) -> Result<(), ComponentError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any;

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any;
}

// ---------------------------------------------------------------------------
// ComponentError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComponentError {
    #[error("failed to load state for component '{name}': {reason}")]
    LoadFailed { name: String, reason: String },
}

// ---------------------------------------------------------------------------
// ProgressTracker
// ---------------------------------------------------------------------------

/// Counts observed ticks and how many of them made no progress.
///
/// Useful for telemetry ("stalled for N ticks") and as a reference
/// implementation of a stateful component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressTracker {
    ticks_observed: u64,
    stalled_ticks: u64,
    consecutive_stalls: u64,
    last_progress: f32,
}

impl ProgressTracker {
    pub const NAME: &'static str = "machina:progress_tracker";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks_observed(&self) -> u64 {
        self.ticks_observed
    }

    pub fn stalled_ticks(&self) -> u64 {
        self.stalled_ticks
    }

    /// Ticks in a row without progress, reset by any advance.
    pub fn consecutive_stalls(&self) -> u64 {
        self.consecutive_stalls
    }
}

impl ProcessComponent for ProgressTracker {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn on_pre_tick(&mut self, status: &ProcessStatus) {
        self.last_progress = status.progress;
    }

    fn on_post_tick(&mut self, status: &ProcessStatus) {
        self.ticks_observed += 1;
        if status.progress > self.last_progress {
            self.consecutive_stalls = 0;
        } else {
            self.stalled_ticks += 1;
            self.consecutive_stalls += 1;
        }
        self.last_progress = status.progress;
    }

    fn save_state(&self) -> Vec<u8> {
        bitcode::serialize(self).unwrap_or_default()
    }

    fn load_state(&mut self, data: &[u8]) -> Result<(), ComponentError> {
        *self = bitcode::deserialize(data).map_err(|e| ComponentError::LoadFailed {
            name: Self::NAME.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}
