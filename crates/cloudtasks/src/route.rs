//! AWS route inside a route table
//!
//! A route is identified by its table and destination (IPv4 or IPv6 CIDR)
//! and points at exactly one target. Creating a route to a NAT gateway that
//! was created moments ago can fail with `InvalidNatGatewayID.NotFound`
//! until the gateway becomes visible; with the default engine config that
//! code is retried.

use converge::delta::{reference, scalar};
use converge::target::{logical_name, resource_name};
use converge::{
    ApiTarget, Attributes, Changes, CloudFormationTarget, Context, Delta, Error, Identities,
    Lifecycle, Link, Phase, Result, Task, TargetSet, TaskRef, TerraformTarget, Value,
};

use crate::cloud::{CloudError, ROUTE_TABLE_NOT_FOUND, RouteRecord, SimCloud};
use crate::nat_gateway::NatGateway;
use crate::route_table::RouteTable;

pub const TERRAFORM_TYPE: &str = "aws_route";
pub const CLOUDFORMATION_TYPE: &str = "AWS::EC2::Route";

const TARGET_FIELDS: &str =
    "EgressOnlyInternetGateway, InternetGateway, Instance, NatGateway, TransitGateway, or VpcPeeringConnection";

#[derive(Debug, Clone, Default)]
pub struct Route {
    pub name: String,
    pub lifecycle: Lifecycle,

    pub route_table: Option<TaskRef>,
    pub cidr: Option<String>,
    pub ipv6_cidr: Option<String>,

    pub nat_gateway: Option<TaskRef>,
    pub internet_gateway_id: Option<String>,
    pub egress_only_gateway_id: Option<String>,
    pub transit_gateway_id: Option<String>,
    pub vpc_peering_connection_id: Option<String>,
    pub instance_id: Option<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RouteChanges {
    pub route_table: Option<TaskRef>,
    pub cidr: Option<String>,
    pub ipv6_cidr: Option<String>,
    pub nat_gateway: Option<TaskRef>,
    pub internet_gateway_id: Option<String>,
    pub egress_only_gateway_id: Option<String>,
    pub transit_gateway_id: Option<String>,
    pub vpc_peering_connection_id: Option<String>,
    pub instance_id: Option<String>,
}

impl Changes for RouteChanges {
    fn is_empty(&self) -> bool {
        self.route_table.is_none()
            && self.cidr.is_none()
            && self.ipv6_cidr.is_none()
            && self.nat_gateway.is_none()
            && self.internet_gateway_id.is_none()
            && self.egress_only_gateway_id.is_none()
            && self.transit_gateway_id.is_none()
            && self.vpc_peering_connection_id.is_none()
            && self.instance_id.is_none()
    }
}

impl Route {
    /// IPv4 route `cidr` in the route table task `route_table`
    pub fn new(name: impl Into<String>, route_table: &str, cidr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            route_table: Some(TaskRef::to(route_table)),
            cidr: Some(cidr.into()),
            ..Self::default()
        }
    }

    /// IPv6 route `ipv6_cidr` in the route table task `route_table`
    pub fn ipv6(name: impl Into<String>, route_table: &str, ipv6_cidr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            route_table: Some(TaskRef::to(route_table)),
            ipv6_cidr: Some(ipv6_cidr.into()),
            ..Self::default()
        }
    }

    /// Route through the NAT gateway task `nat_gateway`
    pub fn via_nat_gateway(mut self, nat_gateway: &str) -> Self {
        self.nat_gateway = Some(TaskRef::to(nat_gateway));
        self
    }

    pub fn via_internet_gateway(mut self, id: impl Into<String>) -> Self {
        self.internet_gateway_id = Some(id.into());
        self
    }

    pub fn via_egress_only_gateway(mut self, id: impl Into<String>) -> Self {
        self.egress_only_gateway_id = Some(id.into());
        self
    }

    pub fn via_transit_gateway(mut self, id: impl Into<String>) -> Self {
        self.transit_gateway_id = Some(id.into());
        self
    }

    pub fn via_peering_connection(mut self, id: impl Into<String>) -> Self {
        self.vpc_peering_connection_id = Some(id.into());
        self
    }

    pub fn via_instance(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    fn target_count(&self) -> usize {
        [
            self.nat_gateway.is_some(),
            self.internet_gateway_id.is_some(),
            self.egress_only_gateway_id.is_some(),
            self.transit_gateway_id.is_some(),
            self.vpc_peering_connection_id.is_some(),
            self.instance_id.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    fn destination(&self) -> &str {
        self.cidr
            .as_deref()
            .or(self.ipv6_cidr.as_deref())
            .unwrap_or("<none>")
    }

    fn record(&self, ids: &Identities) -> Result<RouteRecord> {
        let nat_gateway_id = match &self.nat_gateway {
            Some(nat) => Some(nat.resolve(ids).ok_or_else(|| {
                Error::try_again_later(format!("waiting for nat gateway {nat} to be created"))
            })?),
            None => None,
        };
        Ok(RouteRecord {
            cidr: self.cidr.clone(),
            ipv6_cidr: self.ipv6_cidr.clone(),
            nat_gateway_id,
            internet_gateway_id: self.internet_gateway_id.clone(),
            egress_only_gateway_id: self.egress_only_gateway_id.clone(),
            transit_gateway_id: self.transit_gateway_id.clone(),
            vpc_peering_connection_id: self.vpc_peering_connection_id.clone(),
            instance_id: self.instance_id.clone(),
            blackhole: false,
        })
    }

    fn route_table_id(&self, ids: &Identities) -> Result<String> {
        let table = self
            .route_table
            .as_ref()
            .ok_or_else(|| Error::required_field(&self.name, "RouteTable"))?;
        table.resolve(ids).ok_or_else(|| {
            Error::try_again_later(format!("waiting for route table {table} to be created"))
        })
    }
}

/// Link to a referenced task, or the literal cloud id when the reference has no name
fn link_or_id(reference: &TaskRef, link: impl Fn(&str) -> Link) -> Option<Value> {
    match (&reference.name, &reference.id) {
        (Some(name), _) => Some(Value::Link(link(name))),
        (None, Some(id)) => Some(Value::from(id)),
        (None, None) => None,
    }
}

impl Task<SimCloud> for Route {
    type Changes = RouteChanges;

    fn name(&self) -> &str {
        &self.name
    }

    fn resource_type(&self) -> &'static str {
        "route"
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn references(&self) -> Vec<&TaskRef> {
        self.route_table
            .iter()
            .chain(self.nat_gateway.iter())
            .collect()
    }

    fn find(&self, ctx: &Context<SimCloud>) -> Result<Option<Self>> {
        if self.cidr.is_none() && self.ipv6_cidr.is_none() {
            return Ok(None);
        }
        let Some(table) = &self.route_table else {
            return Ok(None);
        };
        // A table that is not known yet cannot hold the route
        let Some(table_id) = table.resolve(ctx.identities()) else {
            return Ok(None);
        };

        let found = ctx
            .cloud()
            .describe_route_table(&table_id)
            .map_err(|e| ctx.classify(&self.name, Phase::Discover, e))?;
        let Some(found) = found else {
            return Ok(None);
        };

        let matching = found.routes.into_iter().find(|r| {
            (self.cidr.is_some() && r.cidr == self.cidr)
                || (self.ipv6_cidr.is_some() && r.ipv6_cidr == self.ipv6_cidr)
        });
        let Some(r) = matching else {
            return Ok(None);
        };
        log::debug!("{}: found route to {} in {table_id}", self.name, self.destination());

        let mut actual = Route {
            name: self.name.clone(),
            lifecycle: self.lifecycle,
            route_table: Some(TaskRef {
                name: table.name.clone(),
                id: Some(table_id),
            }),
            cidr: r.cidr,
            ipv6_cidr: r.ipv6_cidr,
            nat_gateway: r.nat_gateway_id.map(TaskRef::with_id),
            internet_gateway_id: r.internet_gateway_id,
            egress_only_gateway_id: r.egress_only_gateway_id,
            transit_gateway_id: r.transit_gateway_id,
            vpc_peering_connection_id: r.vpc_peering_connection_id,
            instance_id: r.instance_id,
        };
        if r.blackhole {
            log::debug!("{}: route is a blackhole", self.name);
            actual.internet_gateway_id = None;
            actual.transit_gateway_id = None;
            actual.instance_id = None;
        }
        Ok(Some(actual))
    }

    fn changes(&self, actual: &Self, ids: &Identities) -> RouteChanges {
        RouteChanges {
            route_table: reference(&actual.route_table, &self.route_table, ids),
            cidr: scalar(&actual.cidr, &self.cidr),
            ipv6_cidr: scalar(&actual.ipv6_cidr, &self.ipv6_cidr),
            nat_gateway: reference(&actual.nat_gateway, &self.nat_gateway, ids),
            internet_gateway_id: scalar(&actual.internet_gateway_id, &self.internet_gateway_id),
            egress_only_gateway_id: scalar(
                &actual.egress_only_gateway_id,
                &self.egress_only_gateway_id,
            ),
            transit_gateway_id: scalar(&actual.transit_gateway_id, &self.transit_gateway_id),
            vpc_peering_connection_id: scalar(
                &actual.vpc_peering_connection_id,
                &self.vpc_peering_connection_id,
            ),
            instance_id: scalar(&actual.instance_id, &self.instance_id),
        }
    }

    fn creation(&self) -> RouteChanges {
        RouteChanges {
            route_table: self.route_table.clone(),
            cidr: self.cidr.clone(),
            ipv6_cidr: self.ipv6_cidr.clone(),
            nat_gateway: self.nat_gateway.clone(),
            internet_gateway_id: self.internet_gateway_id.clone(),
            egress_only_gateway_id: self.egress_only_gateway_id.clone(),
            transit_gateway_id: self.transit_gateway_id.clone(),
            vpc_peering_connection_id: self.vpc_peering_connection_id.clone(),
            instance_id: self.instance_id.clone(),
        }
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &RouteChanges) -> Result<()> {
        if actual.is_some() {
            if changes.route_table.is_some() {
                return Err(Error::cannot_change_field(&self.name, "RouteTable"));
            }
            if changes.cidr.is_some() {
                return Err(Error::cannot_change_field(&self.name, "CIDR"));
            }
            if changes.ipv6_cidr.is_some() {
                return Err(Error::cannot_change_field(&self.name, "IPv6CIDR"));
            }
            return Ok(());
        }

        if self.route_table.is_none() {
            return Err(Error::required_field(&self.name, "RouteTable"));
        }
        match (&self.cidr, &self.ipv6_cidr) {
            (None, None) => return Err(Error::required_field(&self.name, "CIDR/IPv6CIDR")),
            (Some(_), Some(_)) => {
                return Err(Error::invalid_field(
                    &self.name,
                    "cannot set more than one CIDR or IPv6CIDR",
                ));
            }
            _ => {}
        }
        if self.egress_only_gateway_id.is_some() && self.cidr.is_some() {
            return Err(Error::invalid_field(
                &self.name,
                "cannot route IPv4 to an EgressOnlyInternetGateway",
            ));
        }
        match self.target_count() {
            0 => Err(Error::invalid_field(
                &self.name,
                format!("{TARGET_FIELDS} is required"),
            )),
            1 => Ok(()),
            _ => Err(Error::invalid_field(
                &self.name,
                format!("cannot set more than one {TARGET_FIELDS}"),
            )),
        }
    }

    fn supported_targets(&self) -> TargetSet {
        TargetSet::ALL
    }

    fn render_api(
        &self,
        ctx: &Context<SimCloud>,
        target: &ApiTarget,
        actual: Option<&Self>,
        delta: &Delta<RouteChanges>,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let classify = |e: CloudError| ctx.classify(&self.name, Phase::Render, e);
        let table_id = self.route_table_id(ctx.identities())?;
        // Route writes may race a route table that was only just created
        let classify_write = |e: CloudError| {
            if e.code == ROUTE_TABLE_NOT_FOUND {
                Error::try_again_later(format!("route table {table_id} not visible yet"))
            } else {
                classify(e)
            }
        };

        match delta {
            Delta::Unchanged => Ok(()),
            Delta::Create(_) => {
                let record = self.record(ctx.identities())?;
                log::debug!(
                    "{}: creating route to {} in {table_id}",
                    self.name,
                    self.destination()
                );
                target
                    .mutate(|| cloud.create_route(&table_id, record))?
                    .map_err(classify_write)
            }
            Delta::Update(_) => {
                let record = self.record(ctx.identities())?;
                log::debug!(
                    "{}: replacing route to {} in {table_id}",
                    self.name,
                    self.destination()
                );
                target
                    .mutate(|| cloud.replace_route(&table_id, record))?
                    .map_err(classify_write)
            }
            Delta::Delete => {
                let found = actual.unwrap_or(self);
                target
                    .mutate(|| {
                        cloud.delete_route(
                            &table_id,
                            found.cidr.as_deref(),
                            found.ipv6_cidr.as_deref(),
                        )
                    })?
                    .map_err(classify)
            }
        }
    }

    fn render_terraform(
        &self,
        _ctx: &Context<SimCloud>,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        delta: &Delta<RouteChanges>,
    ) -> Result<()> {
        if matches!(delta, Delta::Unchanged | Delta::Delete) {
            return Ok(());
        }
        let route_table = self
            .route_table
            .as_ref()
            .and_then(|r| link_or_id(r, RouteTable::terraform_link))
            .ok_or_else(|| Error::required_field(&self.name, "RouteTable"))?;

        target.render_resource(
            TERRAFORM_TYPE,
            &resource_name("route", &self.name),
            Attributes::new()
                .set("route_table_id", route_table)
                .opt("destination_cidr_block", self.cidr.as_ref())
                .opt("destination_ipv6_cidr_block", self.ipv6_cidr.as_ref())
                .opt(
                    "nat_gateway_id",
                    self.nat_gateway
                        .as_ref()
                        .and_then(|r| link_or_id(r, NatGateway::terraform_link)),
                )
                .opt("gateway_id", self.internet_gateway_id.as_ref())
                .opt("egress_only_gateway_id", self.egress_only_gateway_id.as_ref())
                .opt("transit_gateway_id", self.transit_gateway_id.as_ref())
                .opt("vpc_peering_connection_id", self.vpc_peering_connection_id.as_ref())
                .opt("instance_id", self.instance_id.as_ref()),
        )
    }

    fn render_cloudformation(
        &self,
        _ctx: &Context<SimCloud>,
        target: &CloudFormationTarget,
        _actual: Option<&Self>,
        delta: &Delta<RouteChanges>,
    ) -> Result<()> {
        if matches!(delta, Delta::Unchanged | Delta::Delete) {
            return Ok(());
        }
        if self.egress_only_gateway_id.is_some() || self.instance_id.is_some() {
            return Err(Error::invalid_field(
                &self.name,
                "egress-only and instance routes cannot be rendered to cloudformation",
            ));
        }
        let route_table = self
            .route_table
            .as_ref()
            .and_then(|r| link_or_id(r, RouteTable::cloudformation_link))
            .ok_or_else(|| Error::required_field(&self.name, "RouteTable"))?;

        target.render_resource(
            CLOUDFORMATION_TYPE,
            &logical_name("Route", &self.name),
            Attributes::new()
                .set("RouteTableId", route_table)
                .opt("DestinationCidrBlock", self.cidr.as_ref())
                .opt("DestinationIpv6CidrBlock", self.ipv6_cidr.as_ref())
                .opt(
                    "NatGatewayId",
                    self.nat_gateway
                        .as_ref()
                        .and_then(|r| link_or_id(r, NatGateway::cloudformation_link)),
                )
                .opt("GatewayId", self.internet_gateway_id.as_ref())
                .opt("TransitGatewayId", self.transit_gateway_id.as_ref())
                .opt("VpcPeeringConnectionId", self.vpc_peering_connection_id.as_ref()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{
        Action, ChangeKind, ContextBuilder, EngineConfig, ErrorCategory, RetryConfig, Target,
        TargetKind,
    };
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn fast_config() -> EngineConfig {
        crate::engine_config()
            .with_retry(RetryConfig::new(5, Duration::from_millis(1), 1.0))
    }

    fn network(cloud: SimCloud, kind: TargetKind, route: Route) -> Arc<Context<SimCloud>> {
        Arc::new(
            ContextBuilder::new(cloud, Target::new(kind))
                .task(RouteTable::new("main", "vpc-1"))
                .task(NatGateway::new("nat-a", "subnet-1"))
                .task(route)
                .config(fast_config())
                .build()
                .unwrap(),
        )
    }

    fn private_route() -> Route {
        Route::new("private", "main", "10.0.0.0/24").via_nat_gateway("nat-a")
    }

    fn check(route: &Route) -> Result<()> {
        route.check_changes(None, &route.creation())
    }

    #[test]
    fn test_route_created_then_unchanged() {
        let ctx = network(SimCloud::new(), TargetKind::Api, private_route());
        let report = converge::run(&ctx).unwrap();
        assert_eq!(
            report.get("private").and_then(|o| o.action()),
            Some(Action::Applied(ChangeKind::Create))
        );

        let state = ctx.cloud().snapshot();
        let table = state.route_tables.values().next().unwrap();
        assert_eq!(table.routes.len(), 1);
        assert_eq!(table.routes[0].cidr.as_deref(), Some("10.0.0.0/24"));

        let again = network(SimCloud::from_state(state), TargetKind::Api, private_route());
        let report = converge::run(&again).unwrap();
        assert_eq!(report.summary().unchanged, 3);
        assert_eq!(again.cloud().mutation_count(), 0);
    }

    #[test]
    fn test_nat_gateway_not_yet_visible_is_retried() {
        let cloud = SimCloud::new().with_nat_visibility_lag(2);
        let ctx = network(cloud, TargetKind::Api, private_route());

        let report = converge::run(&ctx).unwrap();
        assert_eq!(report.get("private").map(|o| o.attempts()), Some(3));
    }

    #[test]
    fn test_nat_gateway_never_visible_exhausts_retries() {
        let cloud = SimCloud::new().with_nat_visibility_lag(100);
        let ctx = network(cloud, TargetKind::Api, private_route());

        let err = converge::run(&ctx).unwrap_err();
        let report = err.report().unwrap();
        assert_eq!(report.get("private").map(|o| o.attempts()), Some(5));
        assert!(report.get("main").unwrap().is_converged());
    }

    #[test]
    fn test_other_cloud_errors_are_not_retried() {
        let cloud = SimCloud::new();
        cloud.fail_next("CreateRoute", "UnauthorizedOperation", "denied");
        let ctx = network(cloud, TargetKind::Api, private_route());

        let err = converge::run(&ctx).unwrap_err();
        match err.report().and_then(|r| r.get("private")) {
            Some(converge::TaskOutcome::Failed { error, attempts }) => {
                assert_eq!(*attempts, 1);
                assert_eq!(error.category(), ErrorCategory::Transport);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_route_table_not_yet_visible_is_retried_on_create() {
        let cloud = SimCloud::new();
        for _ in 0..2 {
            cloud.fail_next("CreateRoute", ROUTE_TABLE_NOT_FOUND, "rtb-1 not found");
        }
        let ctx = network(cloud, TargetKind::Api, private_route());

        let report = converge::run(&ctx).unwrap();
        assert_eq!(report.get("private").map(|o| o.attempts()), Some(3));
    }

    #[test]
    fn test_missing_route_table_on_delete_is_not_retried() {
        let cloud = SimCloud::new();
        let rt = cloud
            .create_route_table("main", "vpc-1", BTreeMap::new())
            .unwrap();
        cloud
            .create_route(&rt, RouteRecord {
                cidr: Some("10.0.0.0/24".into()),
                internet_gateway_id: Some("igw-1".into()),
                ..RouteRecord::default()
            })
            .unwrap();
        cloud.fail_next("DeleteRoute", ROUTE_TABLE_NOT_FOUND, "gone");

        let mut route = Route::new("public", "main", "10.0.0.0/24").via_internet_gateway("igw-1");
        route.lifecycle = Lifecycle::Absent;
        let ctx = network(cloud, TargetKind::Api, route);

        let err = converge::run(&ctx).unwrap_err();
        match err.report().and_then(|r| r.get("public")) {
            Some(converge::TaskOutcome::Failed { attempts, .. }) => assert_eq!(*attempts, 1),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_blackhole_route_is_replaced() {
        let cloud = SimCloud::new();
        let rt = cloud
            .create_route_table("main", "vpc-1", BTreeMap::new())
            .unwrap();
        let old = cloud.create_nat_gateway("old", "subnet-1", None).unwrap();
        cloud
            .create_route(&rt, RouteRecord {
                cidr: Some("10.0.0.0/24".into()),
                nat_gateway_id: Some(old.clone()),
                ..RouteRecord::default()
            })
            .unwrap();
        cloud.delete_nat_gateway(&old).unwrap();

        let ctx = network(cloud, TargetKind::Api, private_route());
        ctx.identities().record("main", rt.clone());
        let found = private_route().find(&ctx).unwrap().unwrap();
        // The deleted gateway is still named; the desired one differs from it
        assert_eq!(found.nat_gateway, Some(TaskRef::with_id(old)));

        let report = converge::run(&ctx).unwrap();
        assert_eq!(
            report.get("private").and_then(|o| o.action()),
            Some(Action::Applied(ChangeKind::Update))
        );

        let state = ctx.cloud().snapshot();
        let route = &state.route_tables[&rt].routes[0];
        assert_eq!(route.nat_gateway_id, ctx.identities().get("nat-a"));
        assert!(!route.blackhole);
    }

    #[test]
    fn test_cidr_cannot_change() {
        let route = private_route();
        let actual = route.clone();
        let changes = RouteChanges {
            cidr: Some("10.0.1.0/24".into()),
            ..RouteChanges::default()
        };
        let err = route.check_changes(Some(&actual), &changes).unwrap_err();
        assert_eq!(err.to_string(), "private: field CIDR cannot be changed");
    }

    #[test]
    fn test_validation_on_create() {
        let mut no_table = private_route();
        no_table.route_table = None;
        assert!(check(&no_table).unwrap_err().to_string().contains("RouteTable is required"));

        let mut no_cidr = private_route();
        no_cidr.cidr = None;
        assert!(check(&no_cidr).unwrap_err().to_string().contains("CIDR/IPv6CIDR is required"));

        let mut both = private_route();
        both.ipv6_cidr = Some("::/0".into());
        assert!(check(&both).unwrap_err().to_string().contains("more than one CIDR"));

        let egress = Route::new("e", "main", "0.0.0.0/0").via_egress_only_gateway("eigw-1");
        assert!(check(&egress).unwrap_err().to_string().contains("IPv4"));
        let egress6 = Route::ipv6("e", "main", "::/0").via_egress_only_gateway("eigw-1");
        assert!(check(&egress6).is_ok());

        let no_target = Route::new("t", "main", "0.0.0.0/0");
        assert!(check(&no_target).unwrap_err().to_string().ends_with("is required"));

        let two_targets = private_route().via_instance("i-1");
        assert!(check(&two_targets).unwrap_err().to_string().contains("cannot set more than one"));
    }

    #[test]
    fn test_dependencies_follow_references() {
        let ctx = network(SimCloud::new(), TargetKind::Api, private_route());
        let graph = converge::TaskGraph::build(ctx.registry()).unwrap();
        assert_eq!(graph.dependencies("private"), vec!["main", "nat-a"]);
    }

    #[test]
    fn test_terraform_links_referenced_tasks() {
        let ctx = network(SimCloud::new(), TargetKind::Terraform, private_route());
        converge::run(&ctx).unwrap();

        let output = ctx.target().as_terraform().unwrap().finish();
        assert_eq!(output.blocks.len(), 3);
        let json = output.to_json();
        assert_eq!(
            json["resource"]["aws_route"]["private"],
            json!({
                "route_table_id": "${aws_route_table.main.id}",
                "destination_cidr_block": "10.0.0.0/24",
                "nat_gateway_id": "${aws_nat_gateway.nat-a.id}",
            })
        );
        assert!(ctx.cloud().calls().is_empty());
    }

    #[test]
    fn test_cloudformation_refs() {
        let ctx = network(SimCloud::new(), TargetKind::CloudFormation, private_route());
        converge::run(&ctx).unwrap();

        let template = ctx.target().as_cloudformation().unwrap().finish();
        assert_eq!(template.len(), 3);
        assert_eq!(
            template.resource("Routeprivate").unwrap()["Properties"],
            json!({
                "RouteTableId": { "Ref": "RouteTablemain" },
                "DestinationCidrBlock": "10.0.0.0/24",
                "NatGatewayId": { "Ref": "NatGatewaynata" },
            })
        );
    }

    #[test]
    fn test_cloudformation_rejects_egress_only_and_instance_routes() {
        for route in [
            Route::ipv6("egress", "main", "::/0").via_egress_only_gateway("eigw-1"),
            Route::new("instance", "main", "0.0.0.0/0").via_instance("i-1"),
        ] {
            let name = route.name.clone();
            let ctx = network(SimCloud::new(), TargetKind::CloudFormation, route);
            let err = converge::run(&ctx).unwrap_err();
            match err.report().and_then(|r| r.get(&name)) {
                Some(converge::TaskOutcome::Failed { error, .. }) => {
                    assert_eq!(error.category(), ErrorCategory::Configuration);
                    assert!(error.to_string().contains("cloudformation"));
                }
                other => panic!("unexpected outcome for {name}: {other:?}"),
            }

            let template = ctx.target().as_cloudformation().unwrap().finish();
            assert_eq!(template.len(), 2);
            assert!(template.resource(&logical_name("Route", &name)).is_none());
        }
    }

    #[test]
    fn test_terraform_name_starting_with_digit() {
        let route = Route::new("0-default", "main", "0.0.0.0/0").via_internet_gateway("igw-1");
        let ctx = network(SimCloud::new(), TargetKind::Terraform, route);
        converge::run(&ctx).unwrap();

        let output = ctx.target().as_terraform().unwrap().finish();
        let block = output.get("aws_route", "route-0-default").unwrap();
        assert_eq!(block.attributes.get("gateway_id"), Some(&Value::from("igw-1")));
    }
}
