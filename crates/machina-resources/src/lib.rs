//! Resource ports for Machina machines.
//!
//! A machine exposes item, fluid and energy containers through named ports
//! ([`port::MachinePorts`]). The handlers in [`handler`] move resources
//! through those ports for recipes carrying item, fluid or energy
//! requirements. Any world type can host them by implementing
//! [`port::HasPorts`].
//!
//! ```rust,ignore
//! let mut handlers = HandlerRegistry::with_builtin();
//! register_resource_handlers(&mut handlers)?;
//! let executor = ProcessExecutor::new(handlers, ExecutorConfig::default());
//! ```

pub mod handler;
pub mod port;

pub use handler::{
    EnergyHandler, FluidHandler, ItemHandler, register_resource_handlers, standard_handlers,
};
pub use port::{HasPorts, MachinePorts, PortMode};
