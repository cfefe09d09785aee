//! Parameterized extension points.
//!
//! Fixups, transformers, analyzers, publishers, loggers and mutation
//! strategies are all declared through a [`PluginDescriptor`] and built by
//! the [`PluginResolver`] from a `class` attribute plus `<Param>` children.

pub mod builtin;
mod resolver;
mod types;

pub use resolver::{read_params, PluginResolver};
pub use types::{
    Analyzer, Analyzers, ConstructResult, Constructor, Fixup, Fixups, Logger, Loggers,
    MutationStrategy, ObsoleteParam, Param, ParamDescriptor, ParamKind, ParamMap, PluginCategory,
    PluginDescriptor, PluginKind, PluginRef, Publisher, Publishers, Strategies, Transformer,
    Transformers,
};
