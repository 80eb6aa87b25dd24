//! Machina Core -- the recipe processing engine for modded-game machines.
//!
//! A machine runs recipes as *processes*. Each recipe declares a set of
//! requirements (items, fluids, energy, parallelism, attribute modifiers,
//! checkpoints, selective alternatives, or anything a mod registers a
//! handler for). Every tick the
//! [`executor::ProcessExecutor`] evaluates the requirements of a process
//! stage and either commits all of their effects or rolls all of them back.
//!
//! # Process Lifecycle
//!
//! Each call to [`machine::Machine::tick`] drives every active process:
//!
//! 1. **START** -- Runs until it commits once (inputs consumed, modifiers
//!    applied). A blocked START is retried next tick.
//! 2. **TICK** -- Per-tick consumption and production; progress advances by
//!    the process speed on success.
//! 3. **END** -- Runs once progress reaches the recipe duration (outputs
//!    inserted, modifiers removed). Success removes the process.
//!
//! Failure at any stage removes the process. Blocking leaves it in place
//! with the reason in its status.
//!
//! # Transactions
//!
//! Handlers never mutate the world while evaluating. They return a
//! [`transaction::RequirementTransaction`] carrying a result plus deferred
//! commit and rollback actions:
//!
//! ```rust,ignore
//! RequirementTransaction::success()
//!     .on_commit(move |ctx| ctx.world.extract(&slot, amount))
//!     .on_rollback(|_| Ok(()))
//! ```
//!
//! Requirements of one stage share a [`transaction::ClaimLedger`], so a
//! later requirement sees what earlier ones already planned to take or
//! fill. Choices that must outlive a stage (the selected candidate, a
//! locked matcher group, a fired checkpoint) are written to the process's
//! [`process::RequirementState`] by commit actions only.
//!
//! # Key Types
//!
//! - [`machine::Machine`] -- Owns processes, the baseline attributes and the
//!   world; emits [`event::ProcessEvent`]s.
//! - [`process::Process`] -- One running recipe with its own attribute
//!   overlay, status and attached components.
//! - [`handler::HandlerRegistry`] -- Requirement kind to handler dispatch.
//! - [`attribute::AttributeMap`] / [`overlay::OverlayAttributeMap`] --
//!   Modifier-based numeric attributes with per-process overlays.
//! - [`persist`] -- Versioned machine snapshots via bitcode.

pub mod attribute;
pub mod builtin;
pub mod component;
pub mod config;
#[cfg(feature = "data-loader")]
pub mod data_loader;
pub mod event;
pub mod executor;
pub mod handler;
pub mod id;
pub mod machine;
pub mod overlay;
pub mod persist;
pub mod process;
pub mod registry;
pub mod requirement;
pub mod rng;
pub mod scaling;
pub mod sync;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transaction;
