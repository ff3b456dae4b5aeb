pub mod schema;

pub use schema::{
    AdvisoryConfig, AuditBackend, CanonConfig, CommandCosts, Config, ExecutorConfig,
    GatewayConfig, IdentityConfig, ObservabilityConfig, PolicyConfig, RateLimits, StorageConfig,
};
