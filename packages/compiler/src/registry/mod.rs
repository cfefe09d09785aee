//! Element and plugin registry.
//!
//! The registry is built once, before any compile runs, and is read-only
//! afterwards. It maps data element tags to [`ElementFactory`] objects, holds
//! the top-level data model tags, the set of common child tags, and every
//! plugin descriptor.

mod config;
mod core;
mod factory;

pub use config::create_default_registry;
pub use core::{Registry, RegistryBuilder};
pub use factory::{ElementFactory, Scope};
