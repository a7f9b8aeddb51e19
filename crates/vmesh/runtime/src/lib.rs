//! vmesh-runtime: a runnable vmesh component.
//!
//! A [`Component`] owns a [`VariableTable`] (its addressable variables) and an
//! [`InterfaceTable`] (its links to other components), and drives the BMF
//! dispatcher from a single poll loop.
//!
//! ```no_run
//! use vmesh_runtime::{Component, ComponentConfig, InterfaceConfig, Link};
//! use vmesh_wire::SegmentKind;
//!
//! # fn main() -> Result<(), vmesh_runtime::RuntimeError> {
//! let config = ComponentConfig::named("node-a");
//! let mut component = Component::new(config);
//! let (near, _far) = Link::pair();
//! component.attach(InterfaceConfig::new("uplink", 1), near)?;
//! let _inbox = component.register_variable("speed", 4, &[SegmentKind::Float])?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod config;
pub mod error;
pub mod interfaces;
pub mod telemetry;
pub mod variables;

pub use component::{Component, PollStats};
pub use config::{ComponentConfig, InterfaceConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use interfaces::{InterfaceTable, Link};
pub use telemetry::init_tracing;
pub use variables::{Delivery, VariableTable};
