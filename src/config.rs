//! Run manifest: engine settings, lifecycle overrides and task tables
//!
//! ```toml
//! [engine]
//! jobs = 8
//! max_attempts = 10
//!
//! [lifecycle]
//! legacy = "exists-and-warns"
//!
//! [[route_table]]
//! name = "main"
//! vpc_id = "vpc-0abc"
//!
//! [[route]]
//! name = "private"
//! route_table = "main"
//! cidr = "0.0.0.0/0"
//! nat_gateway = "nat-a"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cloudtasks::{NatGateway, Package, Route, RouteTable, ServerGroup, SimCloud};
use converge::{
    EngineConfig, Lifecycle, LifecycleOverrides, LifecyclePolicy, RetryConfig, SharedTask, TaskRef,
};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub engine: EngineSection,
    /// Lifecycle overrides keyed by task name
    #[serde(default)]
    pub lifecycle: BTreeMap<String, Lifecycle>,
    #[serde(default)]
    pub route_table: Vec<RouteTableSpec>,
    #[serde(default)]
    pub nat_gateway: Vec<NatGatewaySpec>,
    #[serde(default)]
    pub route: Vec<RouteSpec>,
    #[serde(default)]
    pub server_group: Vec<ServerGroupSpec>,
    #[serde(default)]
    pub package: Vec<PackageSpec>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    pub jobs: Option<usize>,
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
    pub max_delay_ms: Option<u64>,
    pub call_timeout_secs: Option<u64>,
    /// Replaces the default set of retryable cloud error codes
    pub retryable_codes: Option<Vec<String>>,
    pub create_missing_on_warn: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteTableSpec {
    pub name: String,
    pub vpc_id: Option<String>,
    pub tags: Option<BTreeMap<String, String>>,
    pub lifecycle: Option<Lifecycle>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NatGatewaySpec {
    pub name: String,
    pub subnet_id: Option<String>,
    pub allocation_id: Option<String>,
    pub lifecycle: Option<Lifecycle>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteSpec {
    pub name: String,
    /// Name of a route_table task
    pub route_table: Option<String>,
    pub cidr: Option<String>,
    pub ipv6_cidr: Option<String>,
    /// Name of a nat_gateway task
    pub nat_gateway: Option<String>,
    pub internet_gateway_id: Option<String>,
    pub egress_only_gateway_id: Option<String>,
    pub transit_gateway_id: Option<String>,
    pub vpc_peering_connection_id: Option<String>,
    pub instance_id: Option<String>,
    pub lifecycle: Option<Lifecycle>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerGroupSpec {
    pub name: String,
    #[serde(default)]
    pub policies: Vec<String>,
    pub lifecycle: Option<Lifecycle>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSpec {
    pub name: String,
    pub version: Option<String>,
    pub source: Option<String>,
    pub hash: Option<String>,
    #[serde(default)]
    pub deps: Vec<PackageSpec>,
    pub lifecycle: Option<Lifecycle>,
}

impl PackageSpec {
    fn to_task(&self) -> Package {
        Package {
            name: self.name.clone(),
            version: self.version.clone(),
            source: self.source.clone(),
            hash: self.hash.clone(),
            deps: self.deps.iter().map(Self::to_task).collect(),
            lifecycle: self.lifecycle.unwrap_or_default(),
            healthy: None,
        }
    }
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid manifest {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML format in run manifest")
    }

    /// Engine settings layered over the defaults of the task crate
    pub fn engine_config(&self) -> EngineConfig {
        let e = &self.engine;
        let mut config = cloudtasks::engine_config();

        if let Some(jobs) = e.jobs {
            config = config.with_jobs(jobs);
        }

        let defaults = RetryConfig::default();
        let mut retry = RetryConfig::new(
            e.max_attempts.unwrap_or(defaults.max_attempts),
            e.base_delay_ms
                .map_or(defaults.base_delay, Duration::from_millis),
            e.backoff_factor.unwrap_or(defaults.backoff_factor),
        );
        retry = retry.with_max_delay(
            e.max_delay_ms
                .map_or(defaults.max_delay, Duration::from_millis),
        );
        config = config.with_retry(retry);

        if let Some(secs) = e.call_timeout_secs {
            config = config.with_call_timeout(Duration::from_secs(secs));
        }
        if let Some(codes) = &e.retryable_codes {
            config = config.with_retryable_codes(codes.iter().cloned());
        }
        if let Some(create) = e.create_missing_on_warn {
            config = config.with_lifecycle_policy(LifecyclePolicy {
                create_missing_on_warn: create,
            });
        }
        config
    }

    pub fn overrides(&self) -> LifecycleOverrides {
        self.lifecycle
            .iter()
            .map(|(name, lifecycle)| (name.clone(), *lifecycle))
            .collect()
    }

    /// Every task declared in the manifest
    pub fn tasks(&self) -> Vec<SharedTask<SimCloud>> {
        let mut tasks: Vec<SharedTask<SimCloud>> = Vec::new();

        for rt in &self.route_table {
            tasks.push(Arc::new(RouteTable {
                name: rt.name.clone(),
                vpc_id: rt.vpc_id.clone(),
                tags: rt.tags.clone(),
                lifecycle: rt.lifecycle.unwrap_or_default(),
                id: None,
            }));
        }
        for nat in &self.nat_gateway {
            tasks.push(Arc::new(NatGateway {
                name: nat.name.clone(),
                subnet_id: nat.subnet_id.clone(),
                allocation_id: nat.allocation_id.clone(),
                lifecycle: nat.lifecycle.unwrap_or_default(),
                id: None,
            }));
        }
        for r in &self.route {
            tasks.push(Arc::new(Route {
                name: r.name.clone(),
                lifecycle: r.lifecycle.unwrap_or_default(),
                route_table: r.route_table.as_deref().map(TaskRef::to),
                cidr: r.cidr.clone(),
                ipv6_cidr: r.ipv6_cidr.clone(),
                nat_gateway: r.nat_gateway.as_deref().map(TaskRef::to),
                internet_gateway_id: r.internet_gateway_id.clone(),
                egress_only_gateway_id: r.egress_only_gateway_id.clone(),
                transit_gateway_id: r.transit_gateway_id.clone(),
                vpc_peering_connection_id: r.vpc_peering_connection_id.clone(),
                instance_id: r.instance_id.clone(),
            }));
        }
        for sg in &self.server_group {
            tasks.push(Arc::new(ServerGroup {
                name: sg.name.clone(),
                policies: Some(sg.policies.clone()),
                lifecycle: sg.lifecycle.unwrap_or_default(),
                id: None,
            }));
        }
        for pkg in &self.package {
            tasks.push(Arc::new(pkg.to_task()));
        }

        tasks
    }
}

/// Parse `--lifecycle task=value` flags
pub fn parse_overrides(flags: &[String]) -> Result<Vec<(String, Lifecycle)>> {
    flags
        .iter()
        .map(|flag| {
            let (task, value) = flag
                .split_once('=')
                .with_context(|| format!("Expected TASK=LIFECYCLE, got {flag:?}"))?;
            let lifecycle: Lifecycle = value.parse().map_err(anyhow::Error::msg)?;
            Ok((task.trim().to_string(), lifecycle))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::AnyTask;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MANIFEST: &str = r#"
[engine]
jobs = 2
max_attempts = 3
base_delay_ms = 10
call_timeout_secs = 30

[lifecycle]
legacy = "exists-and-warns"

[[route_table]]
name = "main"
vpc_id = "vpc-1"
tags = { env = "prod" }

[[nat_gateway]]
name = "nat-a"
subnet_id = "subnet-1"

[[route]]
name = "private"
route_table = "main"
cidr = "0.0.0.0/0"
nat_gateway = "nat-a"

[[server_group]]
name = "masters"
policies = ["anti-affinity"]

[[package]]
name = "kubelet"
source = "https://example.com/kubelet.deb"
deps = [{ name = "cri-tools", source = "https://example.com/cri-tools.deb" }]
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let tasks = manifest.tasks();
        assert_eq!(tasks.len(), 5);

        let route = tasks.iter().find(|t| t.name() == "private").unwrap();
        assert_eq!(route.resource_type(), "route");
        let route = route.as_any().downcast_ref::<Route>().unwrap();
        assert_eq!(route.route_table, Some(TaskRef::to("main")));

        let pkg = tasks.iter().find(|t| t.name() == "kubelet").unwrap();
        let pkg = pkg.as_any().downcast_ref::<Package>().unwrap();
        assert_eq!(pkg.deps.len(), 1);
    }

    #[test]
    fn test_engine_settings() {
        let config = Manifest::parse(MANIFEST).unwrap().engine_config();
        assert_eq!(config.jobs, 2);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(10));
        assert_eq!(config.call_timeout, Duration::from_secs(30));
        // Defaults from the task crate survive
        assert!(config.classifier.is_retryable("InvalidNatGatewayID.NotFound"));
    }

    #[test]
    fn test_retryable_codes_replace_defaults() {
        let manifest = Manifest::parse("[engine]\nretryable_codes = [\"Throttling\"]\n").unwrap();
        let config = manifest.engine_config();
        assert!(config.classifier.is_retryable("Throttling"));
        assert!(!config.classifier.is_retryable("InvalidNatGatewayID.NotFound"));
    }

    #[test]
    fn test_lifecycle_section() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let overrides = manifest.overrides();
        assert_eq!(overrides.resolve("legacy", Lifecycle::Sync), Lifecycle::ExistsAndWarns);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let err = Manifest::parse("[[route]]\nname = \"r\"\ncidr_block = \"10.0.0.0/8\"\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_parse_override_flags() {
        let parsed = parse_overrides(&["main=ignore".to_string()]).unwrap();
        assert_eq!(parsed, vec![("main".to_string(), Lifecycle::Ignore)]);
        assert!(parse_overrides(&["main".to_string()]).is_err());
        assert!(parse_overrides(&["main=sometimes".to_string()]).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MANIFEST.as_bytes()).unwrap();
        let manifest = Manifest::load(file.path()).unwrap();
        assert_eq!(manifest.route_table.len(), 1);
    }
}
