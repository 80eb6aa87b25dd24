//! Pluggable per-kind requirement logic and the registry that dispatches to it.

use crate::id::RequirementKind;
use crate::requirement::RequirementComponent;
use crate::transaction::{EvalContext, RequirementTransaction};
use std::collections::HashMap;
use std::fmt;

/// Acquisition logic for one requirement kind.
///
/// Every method evaluates against a read-only [`EvalContext`] and returns the
/// transaction describing what would happen. Mutations belong in the
/// transaction's commit action.
pub trait RequirementHandler<W>: fmt::Debug {
    /// Evaluated once, when the process starts.
    fn start(
        &self,
        ctx: &mut EvalContext<'_, W>,
        component: &RequirementComponent,
    ) -> RequirementTransaction<W>;

    /// Evaluated once, when the process reaches its duration.
    fn on_end(
        &self,
        ctx: &mut EvalContext<'_, W>,
        component: &RequirementComponent,
    ) -> RequirementTransaction<W>;

    /// Per-tick acquisition. `None` means the kind has no per-tick work and
    /// is treated as a side-effect-free success.
    fn acquire_tick_transaction(
        &self,
        ctx: &mut EvalContext<'_, W>,
        component: &RequirementComponent,
    ) -> Option<RequirementTransaction<W>> {
        let _ = (ctx, component);
        None
    }
}

/// Errors from handler registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("a handler is already registered for requirement kind '{0}'")]
    Duplicate(RequirementKind),
}

/// Handler lookup by requirement kind, injected into the executor.
pub struct HandlerRegistry<W> {
    handlers: HashMap<RequirementKind, Box<dyn RequirementHandler<W>>>,
}

impl<W> Default for HandlerRegistry<W> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<W> HandlerRegistry<W> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`. A kind can only be registered once.
    pub fn register(
        &mut self,
        kind: RequirementKind,
        handler: impl RequirementHandler<W> + 'static,
    ) -> Result<(), HandlerError> {
        if self.handlers.contains_key(&kind) {
            return Err(HandlerError::Duplicate(kind));
        }
        self.handlers.insert(kind, Box::new(handler));
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(
        mut self,
        kind: RequirementKind,
        handler: impl RequirementHandler<W> + 'static,
    ) -> Result<Self, HandlerError> {
        self.register(kind, handler)?;
        Ok(self)
    }

    pub fn get(&self, kind: &RequirementKind) -> Option<&dyn RequirementHandler<W>> {
        self.handlers.get(kind).map(|h| h.as_ref())
    }

    pub fn contains(&self, kind: &RequirementKind) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds in id order.
    pub fn kinds(&self) -> Vec<RequirementKind> {
        let mut kinds: Vec<_> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<W: 'static> HandlerRegistry<W> {
    /// A registry pre-populated with the attribute-level handlers
    /// (parallelism, attribute modifier, checkpoint, selective).
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_builtin();
        registry
    }

    /// Add the attribute-level handlers, skipping kinds already present.
    pub fn register_builtin(&mut self) {
        use crate::builtin::{
            AttributeModifierHandler, CheckpointHandler, ParallelismHandler, SelectiveHandler,
        };
        use crate::requirement::kinds;

        if !self.contains(&kinds::parallelism()) {
            self.handlers
                .insert(kinds::parallelism(), Box::new(ParallelismHandler));
        }
        if !self.contains(&kinds::attribute_modifier()) {
            self.handlers
                .insert(kinds::attribute_modifier(), Box::new(AttributeModifierHandler));
        }
        if !self.contains(&kinds::checkpoint()) {
            self.handlers
                .insert(kinds::checkpoint(), Box::new(CheckpointHandler));
        }
        if !self.contains(&kinds::selective()) {
            self.handlers
                .insert(kinds::selective(), Box::new(SelectiveHandler));
        }
    }
}

impl<W> fmt::Debug for HandlerRegistry<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
