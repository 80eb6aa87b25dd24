//! Executor configuration.

use serde::{Deserialize, Serialize};

/// Tunables of the process executor and machine driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Status message set after every successful TICK stage.
    pub processing_message: String,
    /// Base used for attributes a process touches that the machine baseline
    /// does not define.
    pub process_default_base: f64,
    /// Record [`crate::event::ProcessEvent`]s while ticking machines.
    pub emit_events: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            processing_message: "Processing".to_string(),
            process_default_base: 1.0,
            emit_events: true,
        }
    }
}
