mod advisory;
mod canon;
mod core;
mod executor;
mod gateway;
mod observability;
mod policy;
mod storage;

pub use advisory::AdvisoryConfig;
pub use canon::CanonConfig;
pub use core::{Config, IdentityConfig};
pub use executor::{CommandCosts, ExecutorConfig};
pub use gateway::GatewayConfig;
pub use observability::ObservabilityConfig;
pub use policy::{PolicyConfig, RateLimits};
pub use storage::{AuditBackend, StorageConfig};
