//! Gateway services built on the provider adapters: alias routing with
//! fallback, usage capture and cost calculation, and logging bootstrap.

pub mod logging;
pub mod routing;
pub mod usage;

pub use logging::{init_tracing, LoggingError};
pub use routing::{ModelRouter, Routed, RouterBuildError, RouterBuilder};
pub use usage::{calculate_cost, CostBreakdown, ModelPricing, UsageCollector};
