//! Default registry configuration.

use super::core::Registry;
use crate::builder::elements::{
    BlobFactory, BlockFactory, ChoiceFactory, DataModelFactory, DoubleFactory, FlagFactory,
    FlagsFactory, NumberFactory, PaddingFactory, StringFactory,
};
use crate::plugin::builtin::{builtin_descriptors, DEFAULT_STRATEGY, KNOWN_MUTATORS};

/// Tags handled by the common-children step rather than the container walk.
pub const COMMON_CHILDREN: &[&str] = &[
    "Relation",
    "Fixup",
    "Transformer",
    "Hint",
    "Analyzer",
    "Placement",
];

/// Create a registry configured with every built-in element and plugin.
#[must_use]
pub fn create_default_registry() -> Registry {
    Registry::builder()
        // Leaf elements
        .element("Number", NumberFactory)
        .element("String", StringFactory)
        .element("Blob", BlobFactory)
        .element("Double", DoubleFactory)
        .element("Flags", FlagsFactory)
        .element("Flag", FlagFactory)
        .element("Padding", PaddingFactory)
        // Containers
        .element("Block", BlockFactory)
        .element("Choice", ChoiceFactory)
        // Top-level
        .data_model("DataModel", DataModelFactory)
        .common_children(COMMON_CHILDREN.iter().copied())
        .plugins(builtin_descriptors())
        .mutators(KNOWN_MUTATORS.iter().copied())
        .default_strategy(DEFAULT_STRATEGY)
        .build()
}
