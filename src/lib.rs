//! Plugin-based service orchestration.
//!
//! A [`Controller`] takes a declarative config describing which
//! services to run, resolves each entry against a [`PluginRegistry`],
//! computes a dependency-ordered start plan, and drives the service
//! lifecycle: construct, install, start, stop, with exports from
//! earlier stages wired into later ones.
//!
//! ```ignore
//! let mut registry = PluginRegistry::new();
//! registry.register("acme.cache", Arc::new(CachePlugin))?;
//!
//! let config = serde_json::json!({
//!     "services": [{"$plugin": "acme.cache", "size": 64}],
//! });
//! let mut controller = Controller::new(&config, &registry)?;
//! controller.start()?;
//! // ...
//! controller.stop()?;
//! ```

pub mod config;
pub mod controller;
pub mod descriptor;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod stager;

pub use controller::Controller;
pub use descriptor::ServiceDescriptor;
pub use error::ConductorError;
pub use registry::{LoadError, PluginLoader, PluginRegistry};
pub use service::{
    Dependencies, Export, ExportRegistry, Service, ServiceInstance, ServicePlugin,
};
