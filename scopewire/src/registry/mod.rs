//! Composite registry.
//!
//! This module provides:
//! - Declarative component definitions and the entries they register
//! - The registry that owns one scope container per scope and caches wires
//! - Service proxies and lazily resolved references

mod composite;
mod definition;
mod proxy;
mod references;


pub use composite::{CompositeRegistry, CompositeRegistryBuilder};
pub use definition::{ComponentDefinition, RegisteredContext};
pub use proxy::ServiceProxy;
pub use references::{References, ServiceReference};
