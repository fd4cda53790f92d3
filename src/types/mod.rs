//! Core data structures
//!
//! - `event`: the immutable event record and its draft form
//! - `tool`: capability descriptors and registry query types

mod event;
mod tool;

pub use event::{Event, NewEvent};
pub use tool::{RegistryStats, ToolDescriptor, ToolQuery};
