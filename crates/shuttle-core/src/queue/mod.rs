//! Queue module: task registry, dependency tracking and retry timing.

mod dependency;
mod registry;
mod retry;

pub use dependency::DependencyGraph;
pub use registry::TaskRegistry;
pub use retry::RetryPolicy;
