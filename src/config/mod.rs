//! Configuration models for the registry and the dispatcher.

pub mod registry;

pub use registry::{DispatcherConfig, RegistryConfig, ENV_PREFIX};
