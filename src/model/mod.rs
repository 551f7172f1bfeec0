//! Model descriptors and the registry that names them.

mod registry;

pub use registry::{Library, ModelDescriptor, ModelRegistry};
