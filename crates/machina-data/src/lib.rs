//! Data-driven machine definitions for Machina.
//!
//! A definition directory holds two files:
//!
//! - `machine.{ron,toml,json}`: name, custom attributes, baseline attribute
//!   values, executor configuration and ports.
//! - `recipes.{ron,toml,json}`: the recipes the machine can run.
//!
//! Each file may use any of the three formats, but only one per base name.
//! [`load_machine_definition`] parses both, resolves attribute and
//! requirement-kind references, and returns a [`MachineDefinition`] ready to
//! build machines from.

pub mod definition;
pub mod loader;
pub mod schema;

pub use definition::{MachineDefinition, load_machine_definition, load_machine_definition_with};
pub use loader::{DataLoadError, Format};
