//! Process lifecycle events recorded by a machine while it ticks.
//!
//! Events are buffered in an [`EventLog`] and handed out in emission order by
//! [`EventLog::drain`]. The log is bounded: when full, the oldest events are
//! dropped and counted. Kinds can be suppressed, in which case they are never
//! recorded.

use crate::id::ProcessId;
use crate::transaction::Stage;
use std::collections::VecDeque;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A process lifecycle event. All events carry the machine tick at which they
/// occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Started {
        process: ProcessId,
        recipe: String,
        tick: u64,
    },
    /// Emitted when a process becomes blocked, not on every blocked tick.
    Blocked {
        process: ProcessId,
        stage: Stage,
        reason: String,
        tick: u64,
    },
    /// A previously blocked process advanced again.
    Resumed { process: ProcessId, tick: u64 },
    Completed {
        process: ProcessId,
        recipe: String,
        tick: u64,
    },
    Failed {
        process: ProcessId,
        stage: Stage,
        reason: String,
        tick: u64,
    },
    /// Removed from the active set by the embedder.
    Aborted { process: ProcessId, tick: u64 },
}

/// Discriminant of [`ProcessEvent`], used for suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProcessEventKind {
    Started,
    Blocked,
    Resumed,
    Completed,
    Failed,
    Aborted,
}

const EVENT_KIND_COUNT: usize = 6;

impl ProcessEvent {
    pub fn kind(&self) -> ProcessEventKind {
        match self {
            ProcessEvent::Started { .. } => ProcessEventKind::Started,
            ProcessEvent::Blocked { .. } => ProcessEventKind::Blocked,
            ProcessEvent::Resumed { .. } => ProcessEventKind::Resumed,
            ProcessEvent::Completed { .. } => ProcessEventKind::Completed,
            ProcessEvent::Failed { .. } => ProcessEventKind::Failed,
            ProcessEvent::Aborted { .. } => ProcessEventKind::Aborted,
        }
    }

    pub fn process(&self) -> ProcessId {
        match self {
            ProcessEvent::Started { process, .. }
            | ProcessEvent::Blocked { process, .. }
            | ProcessEvent::Resumed { process, .. }
            | ProcessEvent::Completed { process, .. }
            | ProcessEvent::Failed { process, .. }
            | ProcessEvent::Aborted { process, .. } => *process,
        }
    }

    pub fn tick(&self) -> u64 {
        match self {
            ProcessEvent::Started { tick, .. }
            | ProcessEvent::Blocked { tick, .. }
            | ProcessEvent::Resumed { tick, .. }
            | ProcessEvent::Completed { tick, .. }
            | ProcessEvent::Failed { tick, .. }
            | ProcessEvent::Aborted { tick, .. } => *tick,
        }
    }
}

impl ProcessEventKind {
    fn index(self) -> usize {
        self as usize
    }
}

// ---------------------------------------------------------------------------
// EventLog
// ---------------------------------------------------------------------------

/// Bounded buffer of [`ProcessEvent`]s.
#[derive(Debug)]
pub struct EventLog {
    events: VecDeque<ProcessEvent>,
    capacity: usize,
    suppressed: [bool; EVENT_KIND_COUNT],
    dropped: u64,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl EventLog {
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            suppressed: [false; EVENT_KIND_COUNT],
            dropped: 0,
        }
    }

    pub fn suppress(&mut self, kind: ProcessEventKind) {
        self.suppressed[kind.index()] = true;
        self.events.retain(|e| e.kind() != kind);
    }

    pub fn unsuppress(&mut self, kind: ProcessEventKind) {
        self.suppressed[kind.index()] = false;
    }

    pub fn is_suppressed(&self, kind: ProcessEventKind) -> bool {
        self.suppressed[kind.index()]
    }

    /// Record `event` unless its kind is suppressed. Drops the oldest event
    /// when full.
    pub fn emit(&mut self, event: ProcessEvent) {
        if self.is_suppressed(event.kind()) {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(event);
    }

    /// Take every buffered event, oldest first.
    pub fn drain(&mut self) -> Vec<ProcessEvent> {
        self.events.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events discarded because the log was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}
