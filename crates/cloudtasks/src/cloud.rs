//! Simulated cloud backing the tasks in this crate
//!
//! `SimCloud` keeps EC2-style route tables, NAT gateways and routes, OpenStack
//! server groups and host packages in memory, and persists them as a JSON
//! state file. It reproduces the behaviors the engine has to cope with: error
//! codes, a NAT gateway that is not yet visible to the route API right after
//! creation, and injected failures.

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use converge::ErrorCode;

pub const NAT_GATEWAY_NOT_FOUND: &str = "InvalidNatGatewayID.NotFound";
pub const ROUTE_TABLE_NOT_FOUND: &str = "InvalidRouteTableID.NotFound";
pub const ROUTE_ALREADY_EXISTS: &str = "RouteAlreadyExists";
pub const ROUTE_NOT_FOUND: &str = "InvalidRoute.NotFound";
pub const DEPENDENCY_VIOLATION: &str = "DependencyViolation";

/// Codes that denote an eventual-consistency window rather than a real error
///
/// A missing route table is only transient while a route is being written
/// into it, so the route task handles that code itself.
pub const RETRYABLE_CODES: &[&str] = &[NAT_GATEWAY_NOT_FOUND];

/// Error returned by the simulated cloud API
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct CloudError {
    pub code: String,
    pub message: String,
}

impl CloudError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl ErrorCode for CloudError {
    fn code(&self) -> Option<&str> {
        Some(&self.code)
    }
}

pub type CloudResult<T> = std::result::Result<T, CloudError>;

/// One route inside a route table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6_cidr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nat_gateway_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internet_gateway_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub egress_only_gateway_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transit_gateway_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_peering_connection_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Target was deleted out from under the route
    #[serde(default)]
    pub blackhole: bool,
}

impl RouteRecord {
    fn same_destination(&self, other: &RouteRecord) -> bool {
        (self.cidr.is_some() && self.cidr == other.cidr)
            || (self.ipv6_cidr.is_some() && self.ipv6_cidr == other.ipv6_cidr)
    }

    fn describe(&self) -> String {
        self.cidr
            .clone()
            .or_else(|| self.ipv6_cidr.clone())
            .unwrap_or_else(|| "<no destination>".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTableRecord {
    pub id: String,
    pub name: String,
    pub vpc_id: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub routes: Vec<RouteRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatGatewayRecord {
    pub id: String,
    pub name: String,
    pub subnet_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation_id: Option<String>,
    /// Route API calls that will still report this gateway as missing
    #[serde(default)]
    pub invisible_for: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerGroupRecord {
    pub id: String,
    pub name: String,
    pub policies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// False when the last install was interrupted
    pub healthy: bool,
}

/// Everything the simulated cloud knows, as persisted to disk
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudState {
    #[serde(default)]
    pub route_tables: BTreeMap<String, RouteTableRecord>,
    #[serde(default)]
    pub nat_gateways: BTreeMap<String, NatGatewayRecord>,
    #[serde(default)]
    pub server_groups: BTreeMap<String, ServerGroupRecord>,
    #[serde(default)]
    pub packages: BTreeMap<String, PackageRecord>,
    /// Package installs performed, in order
    #[serde(default)]
    pub install_log: Vec<String>,
    #[serde(default)]
    pub next_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl CloudState {
    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:08x}", self.next_id)
    }
}

/// In-memory cloud with EC2 and OpenStack flavored operations
#[derive(Debug, Default)]
pub struct SimCloud {
    state: Mutex<CloudState>,
    /// Route API calls a new NAT gateway stays invisible for
    nat_visibility_lag: u32,
    failures: Mutex<HashMap<String, VecDeque<CloudError>>>,
    calls: Mutex<Vec<String>>,
}

impl SimCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: CloudState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Load state from a JSON file; a missing file is an empty cloud
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("no cloud state at {}, starting empty", path.display());
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let state: CloudState = serde_json::from_str(&content)
            .with_context(|| format!("Invalid cloud state in {}", path.display()))?;
        Ok(Self::from_state(state))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut state = self.snapshot();
        state.last_updated = Some(Utc::now());
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)
                .with_context(|| format!("Could not create {}", dir.display()))?;
        }
        let content = serde_json::to_string_pretty(&state)?;
        fs::write(path, content).with_context(|| format!("Could not write {}", path.display()))?;
        Ok(())
    }

    /// Make new NAT gateways invisible to the route API for `calls` calls
    pub fn with_nat_visibility_lag(mut self, calls: u32) -> Self {
        self.nat_visibility_lag = calls;
        self
    }

    /// Fail the next call of `operation` with `code`
    pub fn fail_next(&self, operation: &str, code: &str, message: &str) {
        lock(&self.failures)
            .entry(operation.to_string())
            .or_default()
            .push_back(CloudError::new(code, message));
    }

    pub fn snapshot(&self) -> CloudState {
        self.state().clone()
    }

    /// Operations called so far, in order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Number of mutating calls so far
    pub fn mutation_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| !c.starts_with("Describe") && !c.starts_with("List") && !c.starts_with("Query"))
            .count()
    }

    fn state(&self) -> MutexGuard<'_, CloudState> {
        lock(&self.state)
    }

    fn call(&self, operation: &str) -> CloudResult<()> {
        lock(&self.calls).push(operation.to_string());
        match lock(&self.failures).get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => {
                log::debug!("sim: injected failure for {operation}: {err}");
                Err(err)
            }
            None => Ok(()),
        }
    }

    // Route tables

    pub fn describe_route_table(&self, id: &str) -> CloudResult<Option<RouteTableRecord>> {
        self.call("DescribeRouteTables")?;
        Ok(self.state().route_tables.get(id).cloned())
    }

    pub fn find_route_table_by_name(&self, name: &str) -> CloudResult<Option<RouteTableRecord>> {
        self.call("DescribeRouteTables")?;
        Ok(self
            .state()
            .route_tables
            .values()
            .find(|rt| rt.name == name)
            .cloned())
    }

    pub fn create_route_table(
        &self,
        name: &str,
        vpc_id: &str,
        tags: BTreeMap<String, String>,
    ) -> CloudResult<String> {
        self.call("CreateRouteTable")?;
        let mut state = self.state();
        let id = state.allocate_id("rtb");
        state.route_tables.insert(
            id.clone(),
            RouteTableRecord {
                id: id.clone(),
                name: name.to_string(),
                vpc_id: vpc_id.to_string(),
                tags,
                routes: Vec::new(),
            },
        );
        log::debug!("sim: created route table {id} ({name})");
        Ok(id)
    }

    pub fn replace_route_table_tags(
        &self,
        id: &str,
        tags: BTreeMap<String, String>,
    ) -> CloudResult<()> {
        self.call("CreateTags")?;
        let mut state = self.state();
        let rt = state.route_tables.get_mut(id).ok_or_else(|| {
            CloudError::new(ROUTE_TABLE_NOT_FOUND, format!("route table {id} does not exist"))
        })?;
        rt.tags = tags;
        Ok(())
    }

    pub fn delete_route_table(&self, id: &str) -> CloudResult<()> {
        self.call("DeleteRouteTable")?;
        let mut state = self.state();
        match state.route_tables.get(id) {
            None => Err(CloudError::new(
                ROUTE_TABLE_NOT_FOUND,
                format!("route table {id} does not exist"),
            )),
            Some(rt) if !rt.routes.is_empty() => Err(CloudError::new(
                DEPENDENCY_VIOLATION,
                format!("route table {id} still has {} routes", rt.routes.len()),
            )),
            Some(_) => {
                state.route_tables.remove(id);
                Ok(())
            }
        }
    }

    // Routes

    fn check_route_targets(state: &mut CloudState, route: &RouteRecord) -> CloudResult<()> {
        if let Some(nat_id) = &route.nat_gateway_id {
            let nat = state.nat_gateways.get_mut(nat_id);
            match nat {
                Some(nat) if nat.invisible_for == 0 => {}
                Some(nat) => {
                    nat.invisible_for -= 1;
                    return Err(CloudError::new(
                        NAT_GATEWAY_NOT_FOUND,
                        format!("The natGateway ID '{nat_id}' does not exist"),
                    ));
                }
                None => {
                    return Err(CloudError::new(
                        NAT_GATEWAY_NOT_FOUND,
                        format!("The natGateway ID '{nat_id}' does not exist"),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn create_route(&self, route_table_id: &str, route: RouteRecord) -> CloudResult<()> {
        self.call("CreateRoute")?;
        let mut state = self.state();
        if !state.route_tables.contains_key(route_table_id) {
            return Err(CloudError::new(
                ROUTE_TABLE_NOT_FOUND,
                format!("The routeTable ID '{route_table_id}' does not exist"),
            ));
        }
        Self::check_route_targets(&mut state, &route)?;

        let Some(rt) = state.route_tables.get_mut(route_table_id) else {
            return Err(CloudError::new(ROUTE_TABLE_NOT_FOUND, route_table_id));
        };
        if rt.routes.iter().any(|r| r.same_destination(&route)) {
            return Err(CloudError::new(
                ROUTE_ALREADY_EXISTS,
                format!("route {} already exists in {route_table_id}", route.describe()),
            ));
        }
        log::debug!("sim: created route {} in {route_table_id}", route.describe());
        rt.routes.push(route);
        Ok(())
    }

    pub fn replace_route(&self, route_table_id: &str, route: RouteRecord) -> CloudResult<()> {
        self.call("ReplaceRoute")?;
        let mut state = self.state();
        if !state.route_tables.contains_key(route_table_id) {
            return Err(CloudError::new(
                ROUTE_TABLE_NOT_FOUND,
                format!("The routeTable ID '{route_table_id}' does not exist"),
            ));
        }
        Self::check_route_targets(&mut state, &route)?;

        let Some(rt) = state.route_tables.get_mut(route_table_id) else {
            return Err(CloudError::new(ROUTE_TABLE_NOT_FOUND, route_table_id));
        };
        match rt.routes.iter_mut().find(|r| r.same_destination(&route)) {
            Some(existing) => {
                *existing = route;
                Ok(())
            }
            None => Err(CloudError::new(
                ROUTE_NOT_FOUND,
                format!("no route to {} in {route_table_id}", route.describe()),
            )),
        }
    }

    pub fn delete_route(
        &self,
        route_table_id: &str,
        cidr: Option<&str>,
        ipv6_cidr: Option<&str>,
    ) -> CloudResult<()> {
        self.call("DeleteRoute")?;
        let mut state = self.state();
        let rt = state.route_tables.get_mut(route_table_id).ok_or_else(|| {
            CloudError::new(
                ROUTE_TABLE_NOT_FOUND,
                format!("The routeTable ID '{route_table_id}' does not exist"),
            )
        })?;
        let wanted = RouteRecord {
            cidr: cidr.map(str::to_string),
            ipv6_cidr: ipv6_cidr.map(str::to_string),
            ..RouteRecord::default()
        };
        let before = rt.routes.len();
        rt.routes.retain(|r| !r.same_destination(&wanted));
        if rt.routes.len() == before {
            return Err(CloudError::new(
                ROUTE_NOT_FOUND,
                format!("no route to {} in {route_table_id}", wanted.describe()),
            ));
        }
        Ok(())
    }

    // NAT gateways

    pub fn find_nat_gateway_by_name(&self, name: &str) -> CloudResult<Option<NatGatewayRecord>> {
        self.call("DescribeNatGateways")?;
        Ok(self
            .state()
            .nat_gateways
            .values()
            .find(|n| n.name == name)
            .cloned())
    }

    pub fn create_nat_gateway(
        &self,
        name: &str,
        subnet_id: &str,
        allocation_id: Option<&str>,
    ) -> CloudResult<String> {
        self.call("CreateNatGateway")?;
        let mut state = self.state();
        let id = state.allocate_id("nat");
        state.nat_gateways.insert(
            id.clone(),
            NatGatewayRecord {
                id: id.clone(),
                name: name.to_string(),
                subnet_id: subnet_id.to_string(),
                allocation_id: allocation_id.map(str::to_string),
                invisible_for: self.nat_visibility_lag,
            },
        );
        log::debug!("sim: created nat gateway {id} ({name})");
        Ok(id)
    }

    pub fn delete_nat_gateway(&self, id: &str) -> CloudResult<()> {
        self.call("DeleteNatGateway")?;
        let mut state = self.state();
        if state.nat_gateways.remove(id).is_none() {
            return Err(CloudError::new(
                NAT_GATEWAY_NOT_FOUND,
                format!("The natGateway ID '{id}' does not exist"),
            ));
        }
        for rt in state.route_tables.values_mut() {
            for route in &mut rt.routes {
                if route.nat_gateway_id.as_deref() == Some(id) {
                    route.blackhole = true;
                }
            }
        }
        Ok(())
    }

    // Server groups

    pub fn find_server_group(&self, name: &str) -> CloudResult<Option<ServerGroupRecord>> {
        self.call("ListServerGroups")?;
        Ok(self
            .state()
            .server_groups
            .values()
            .find(|g| g.name == name)
            .cloned())
    }

    pub fn create_server_group(&self, name: &str, policies: &[String]) -> CloudResult<String> {
        self.call("CreateServerGroup")?;
        let mut state = self.state();
        let id = state.allocate_id("sg");
        state.server_groups.insert(
            id.clone(),
            ServerGroupRecord {
                id: id.clone(),
                name: name.to_string(),
                policies: policies.to_vec(),
            },
        );
        Ok(id)
    }

    pub fn delete_server_group(&self, id: &str) -> CloudResult<()> {
        self.call("DeleteServerGroup")?;
        // Deleting a group that is already gone is not an error
        self.state().server_groups.remove(id);
        Ok(())
    }

    // Packages

    pub fn query_package(&self, name: &str) -> CloudResult<Option<PackageRecord>> {
        self.call("QueryPackage")?;
        Ok(self.state().packages.get(name).cloned())
    }

    /// Install `packages` in one transaction
    pub fn install_packages(&self, packages: Vec<PackageRecord>) -> CloudResult<()> {
        self.call("InstallPackages")?;
        let mut state = self.state();
        for package in packages {
            log::debug!("sim: installed {} {}", package.name, package.version);
            state.install_log.push(package.name.clone());
            state.packages.insert(package.name.clone(), package);
        }
        Ok(())
    }

    /// Finish interrupted installs (`dpkg --configure -a`)
    pub fn repair_packages(&self) -> CloudResult<()> {
        self.call("RepairPackages")?;
        for package in self.state().packages.values_mut() {
            package.healthy = true;
        }
        Ok(())
    }

    pub fn remove_package(&self, name: &str) -> CloudResult<()> {
        self.call("RemovePackage")?;
        self.state().packages.remove(name);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_nat_gateway_visibility_lag() {
        let cloud = SimCloud::new().with_nat_visibility_lag(2);
        let rt = cloud.create_route_table("main", "vpc-1", BTreeMap::new()).unwrap();
        let nat = cloud.create_nat_gateway("a", "subnet-1", None).unwrap();
        let route = RouteRecord {
            cidr: Some("0.0.0.0/0".into()),
            nat_gateway_id: Some(nat),
            ..RouteRecord::default()
        };

        for _ in 0..2 {
            let err = cloud.create_route(&rt, route.clone()).unwrap_err();
            assert_eq!(err.code, NAT_GATEWAY_NOT_FOUND);
        }
        cloud.create_route(&rt, route.clone()).unwrap();

        let err = cloud.create_route(&rt, route).unwrap_err();
        assert_eq!(err.code, ROUTE_ALREADY_EXISTS);
    }

    #[test]
    fn test_injected_failure_is_consumed_once() {
        let cloud = SimCloud::new();
        cloud.fail_next("DescribeRouteTables", "RequestLimitExceeded", "slow down");
        assert!(cloud.find_route_table_by_name("main").is_err());
        assert!(cloud.find_route_table_by_name("main").unwrap().is_none());
    }

    #[test]
    fn test_route_table_with_routes_cannot_be_deleted() {
        let cloud = SimCloud::new();
        let rt = cloud.create_route_table("main", "vpc-1", BTreeMap::new()).unwrap();
        cloud
            .create_route(&rt, RouteRecord {
                cidr: Some("10.0.0.0/8".into()),
                transit_gateway_id: Some("tgw-1".into()),
                ..RouteRecord::default()
            })
            .unwrap();
        let err = cloud.delete_route_table(&rt).unwrap_err();
        assert_eq!(err.code, DEPENDENCY_VIOLATION);

        cloud.delete_route(&rt, Some("10.0.0.0/8"), None).unwrap();
        cloud.delete_route_table(&rt).unwrap();
        assert!(cloud.snapshot().route_tables.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("cloud.json");

        let cloud = SimCloud::new();
        cloud.create_route_table("main", "vpc-1", BTreeMap::new()).unwrap();
        cloud.save(&path).unwrap();

        let loaded = SimCloud::load(&path).unwrap();
        let state = loaded.snapshot();
        assert_eq!(state.route_tables.len(), 1);
        assert!(state.last_updated.is_some());
        assert_eq!(state.next_id, 1);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let cloud = SimCloud::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(cloud.snapshot(), CloudState::default());
    }

    #[test]
    fn test_mutation_count_ignores_reads() {
        let cloud = SimCloud::new();
        cloud.find_route_table_by_name("main").unwrap();
        cloud.query_package("curl").unwrap();
        cloud.create_route_table("main", "vpc-1", BTreeMap::new()).unwrap();
        assert_eq!(cloud.mutation_count(), 1);
    }
}
