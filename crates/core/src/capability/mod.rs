//! Capability descriptors and the registry holding them.

mod builtin;
mod registry;
mod types;

pub use builtin::builtin_capabilities;
pub use registry::Registry;
pub use types::{
    normalize_format, Capability, CommandTemplate, FormatSpec, PreserveFeatures, PreserveLevel,
    Requirements, ResourceCost,
};
