//! A machine: a baseline attribute map, a world and the processes it runs.

use crate::attribute::{AttributeMap, AttributeView, standard};
use crate::config::ExecutorConfig;
use crate::event::{EventLog, ProcessEvent};
use crate::executor::{ProcessExecutor, ProcessOutcome};
use crate::id::ProcessId;
use crate::process::{Process, ProcessStatus, Recipe};
use crate::rng::SimRng;
use slotmap::SlotMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MachineError {
    #[error("machine is already running {active} of at most {limit} processes")]
    ConcurrencyLimit { active: usize, limit: usize },
}

/// Processes removed during one [`Machine::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub ticked: usize,
    pub completed: Vec<ProcessId>,
    pub failed: Vec<ProcessId>,
}

/// Owns the active process set and drives it once per tick.
///
/// Processes are ticked one after another in slot order; nothing inside a
/// tick runs concurrently.
#[derive(Debug)]
pub struct Machine<W> {
    baseline: Arc<AttributeMap>,
    processes: SlotMap<ProcessId, Process>,
    world: W,
    tick: u64,
    events: EventLog,
    emit_events: bool,
    default_base: f64,
    seeds: SimRng,
}

impl<W: 'static> Machine<W> {
    pub fn new(baseline: Arc<AttributeMap>, world: W, config: &ExecutorConfig) -> Self {
        Self {
            baseline,
            processes: SlotMap::with_key(),
            world,
            tick: 0,
            events: EventLog::default(),
            emit_events: config.emit_events,
            default_base: config.process_default_base,
            seeds: SimRng::new(0),
        }
    }

    pub fn baseline(&self) -> &Arc<AttributeMap> {
        &self.baseline
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Maximum number of active processes, if the baseline limits it.
    pub fn concurrency_limit(&self) -> Option<usize> {
        let attribute = self.baseline.get(&standard::max_concurrent_processes())?;
        let value = attribute.read().value();
        Some(value.floor().max(0.0) as usize)
    }

    /// Create a process for `recipe` with an overlay over the baseline.
    pub fn start_process(&mut self, recipe: Arc<Recipe>) -> Result<ProcessId, MachineError> {
        if let Some(limit) = self.concurrency_limit() {
            let active = self.processes.len();
            if active >= limit {
                return Err(MachineError::ConcurrencyLimit { active, limit });
            }
        }
        let seed = self.next_seed();
        let process = Process::new(recipe, Arc::clone(&self.baseline), self.default_base, seed);
        let id = self.processes.insert(process);
        debug!(process = ?id, tick = self.tick, "process created");
        Ok(id)
    }

    /// Insert an already-built process (e.g. restored from a save). Does not
    /// check the concurrency limit.
    pub fn insert_process(&mut self, process: Process) -> ProcessId {
        self.processes.insert(process)
    }

    /// Remove a process from the active set. This is the only cancellation
    /// primitive; it never interrupts a stage.
    pub fn abort_process(&mut self, id: ProcessId) -> Option<Process> {
        let process = self.processes.remove(id)?;
        debug!(process = ?id, "process aborted");
        self.emit(ProcessEvent::Aborted {
            process: id,
            tick: self.tick,
        });
        Some(process)
    }

    pub fn process(&self, id: ProcessId) -> Option<&Process> {
        self.processes.get(id)
    }

    pub fn process_mut(&mut self, id: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(id)
    }

    pub fn status(&self, id: ProcessId) -> Option<&ProcessStatus> {
        self.processes.get(id).map(Process::status)
    }

    pub fn processes(&self) -> impl Iterator<Item = (ProcessId, &Process)> {
        self.processes.iter()
    }

    pub fn active_count(&self) -> usize {
        self.processes.len()
    }

    /// Run the driver for every active process, then advance the tick
    /// counter. Completed and failed processes are removed.
    pub fn tick(&mut self, executor: &ProcessExecutor<W>) -> TickSummary {
        let ids: Vec<ProcessId> = self.processes.keys().collect();
        let mut summary = TickSummary::default();
        let mut pending = Vec::new();

        for id in ids {
            let Some(process) = self.processes.get_mut(id) else {
                continue;
            };
            let was_blocked = process.is_blocked();
            let report = executor.tick_process(process, &mut self.world);
            summary.ticked += 1;

            let recipe = process.recipe().id.clone();
            let tick = self.tick;
            if report.started {
                pending.push(ProcessEvent::Started {
                    process: id,
                    recipe: recipe.clone(),
                    tick,
                });
            }
            if let Some((stage, reason)) = &report.blocked {
                if !was_blocked {
                    pending.push(ProcessEvent::Blocked {
                        process: id,
                        stage: *stage,
                        reason: reason.clone(),
                        tick,
                    });
                }
            } else if was_blocked && !process.is_blocked() {
                pending.push(ProcessEvent::Resumed { process: id, tick });
            }

            match report.outcome {
                ProcessOutcome::Active => {}
                ProcessOutcome::Completed => {
                    self.processes.remove(id);
                    summary.completed.push(id);
                    pending.push(ProcessEvent::Completed {
                        process: id,
                        recipe,
                        tick,
                    });
                }
                ProcessOutcome::Failed { stage, reason } => {
                    self.processes.remove(id);
                    summary.failed.push(id);
                    pending.push(ProcessEvent::Failed {
                        process: id,
                        stage,
                        reason,
                        tick,
                    });
                }
            }
        }

        for event in pending {
            self.emit(event);
        }
        self.tick += 1;
        summary
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventLog {
        &mut self.events
    }

    pub fn drain_events(&mut self) -> Vec<ProcessEvent> {
        self.events.drain()
    }

    fn emit(&mut self, event: ProcessEvent) {
        if self.emit_events {
            self.events.emit(event);
        }
    }

    /// Gives every process a distinct, reproducible seed.
    fn next_seed(&mut self) -> u64 {
        self.seeds.next_u64()
    }

    pub(crate) fn seed_state(&self) -> u64 {
        self.seeds.state()
    }

    pub(crate) fn restore_counters(&mut self, tick: u64, seed_state: u64) {
        self.tick = tick;
        self.seeds = SimRng::new(seed_state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ProcessEventKind;
    use crate::handler::HandlerRegistry;
    use crate::test_utils::{Journal, ScriptedHandler, TestWorld, scripted_component, scripted_kind};
    use crate::transaction::StageResult;

    fn machine(limit: Option<f64>) -> Machine<TestWorld> {
        let baseline = Arc::new(AttributeMap::new());
        if let Some(limit) = limit {
            baseline.set_base(&standard::max_concurrent_processes(), limit);
        }
        Machine::new(baseline, TestWorld::default(), &ExecutorConfig::default())
    }

    fn executor(handler: ScriptedHandler) -> ProcessExecutor<TestWorld> {
        let mut registry = HandlerRegistry::with_builtin();
        registry.register(scripted_kind(handler.label()), handler).unwrap();
        ProcessExecutor::new(registry, ExecutorConfig::default())
    }

    #[test]
    fn concurrency_limit_refuses_extra_processes() {
        let mut m = machine(Some(2.9));
        let recipe = Arc::new(Recipe::new("r", 10));
        m.start_process(Arc::clone(&recipe)).unwrap();
        m.start_process(Arc::clone(&recipe)).unwrap();
        assert_eq!(
            m.start_process(recipe),
            Err(MachineError::ConcurrencyLimit { active: 2, limit: 2 })
        );
    }

    #[test]
    fn no_limit_without_attribute() {
        let mut m = machine(None);
        let recipe = Arc::new(Recipe::new("r", 10));
        for _ in 0..16 {
            m.start_process(Arc::clone(&recipe)).unwrap();
        }
        assert_eq!(m.active_count(), 16);
        assert_eq!(m.concurrency_limit(), None);
    }

    #[test]
    fn seeds_are_distinct() {
        let mut m = machine(None);
        let recipe = Arc::new(Recipe::new("r", 10));
        let a = m.start_process(Arc::clone(&recipe)).unwrap();
        let b = m.start_process(recipe).unwrap();
        assert_ne!(m.process(a).unwrap().seed(), m.process(b).unwrap().seed());
    }

    #[test]
    fn lifecycle_events_are_recorded() {
        let journal = Journal::default();
        let exec = executor(ScriptedHandler::new("a", &journal));
        let mut m = machine(None);
        let recipe = Arc::new(Recipe::new("r", 2).with_requirement(scripted_component("a")));
        let id = m.start_process(recipe).unwrap();

        m.tick(&exec);
        let summary = m.tick(&exec);
        assert_eq!(summary.completed, vec![id]);
        assert!(m.process(id).is_none());

        let kinds: Vec<_> = m.drain_events().iter().map(ProcessEvent::kind).collect();
        assert_eq!(kinds, vec![ProcessEventKind::Started, ProcessEventKind::Completed]);
        assert_eq!(m.tick_count(), 2);
    }

    #[test]
    fn blocked_is_reported_once_then_resumed() {
        let journal = Journal::default();
        let exec = executor(ScriptedHandler::new("a", &journal).tick_with(|world, _| {
            if world.stock.get("gate") == Some(&0) {
                StageResult::blocked("no input")
            } else {
                StageResult::Success
            }
        }));
        let mut m = machine(None);
        let recipe = Arc::new(Recipe::new("r", 100).with_requirement(scripted_component("a")));
        let id = m.start_process(recipe).unwrap();

        m.world_mut().stock.insert("gate".into(), 0);
        m.tick(&exec);
        assert!(m.process(id).unwrap().is_blocked());
        m.tick(&exec);
        m.world_mut().stock.insert("gate".into(), 1);
        m.tick(&exec);
        assert_eq!(m.status(id).unwrap().progress, 1.0);

        let kinds: Vec<_> = m.drain_events().iter().map(ProcessEvent::kind).collect();
        assert_eq!(
            kinds,
            vec![
                ProcessEventKind::Started,
                ProcessEventKind::Blocked,
                ProcessEventKind::Resumed,
            ]
        );
    }

    #[test]
    fn abort_removes_and_reports() {
        let mut m = machine(None);
        let id = m.start_process(Arc::new(Recipe::new("r", 10))).unwrap();
        assert!(m.abort_process(id).is_some());
        assert!(m.status(id).is_none());
        assert_eq!(m.drain_events()[0].kind(), ProcessEventKind::Aborted);
    }

    #[test]
    fn events_can_be_disabled() {
        let config = ExecutorConfig {
            emit_events: false,
            ..ExecutorConfig::default()
        };
        let mut m = Machine::new(Arc::new(AttributeMap::new()), TestWorld::default(), &config);
        let id = m.start_process(Arc::new(Recipe::new("r", 10))).unwrap();
        m.abort_process(id);
        assert!(m.events().is_empty());
    }
}
