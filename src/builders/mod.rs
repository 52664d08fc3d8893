//! Builders to construct registry components from configuration.

pub mod registry_builder;

pub use registry_builder::{build_cluster, build_dispatcher, BuiltCluster};
