//! # Cloudtasks
//!
//! Tasks for the [`converge`] engine over a simulated cloud.
//!
//! | Task | Cloud | Targets |
//! |------|-------|---------|
//! | [`RouteTable`] | AWS | api, terraform, cloudformation |
//! | [`NatGateway`] | AWS | api, terraform, cloudformation |
//! | [`Route`] | AWS | api, terraform, cloudformation |
//! | [`ServerGroup`] | OpenStack | api, terraform |
//! | [`Package`] | host | api |
//!
//! All of them run against [`SimCloud`], an in-memory cloud that reproduces
//! the error codes and eventual consistency of the real APIs and persists to
//! a JSON state file.

pub mod cloud;
pub mod nat_gateway;
pub mod package;
pub mod route;
pub mod route_table;
pub mod server_group;

pub use cloud::{CloudError, CloudState, RETRYABLE_CODES, SimCloud};
pub use nat_gateway::NatGateway;
pub use package::Package;
pub use route::Route;
pub use route_table::RouteTable;
pub use server_group::ServerGroup;

use converge::EngineConfig;

/// Engine defaults for these tasks: the simulated cloud's transient codes are retried
pub fn engine_config() -> EngineConfig {
    EngineConfig::default().with_retryable_codes(RETRYABLE_CODES.iter().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_retries_cloud_codes() {
        let config = engine_config();
        assert!(config.classifier.is_retryable("InvalidNatGatewayID.NotFound"));
        assert!(!config.classifier.is_retryable("RouteAlreadyExists"));
        assert!(!config.classifier.is_retryable("InvalidRouteTableID.NotFound"));
    }
}
