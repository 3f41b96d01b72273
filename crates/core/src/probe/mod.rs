//! Capability prober: decides which declared capabilities are usable on the host.

mod config;
mod prober;
mod resolver;
mod types;

pub use config::ProberConfig;
pub use prober::Prober;
pub use resolver::{SystemToolResolver, ToolResolver};
pub use types::{AvailabilitySnapshot, CapabilityAvailability, HealthReport, ToolHealth};
