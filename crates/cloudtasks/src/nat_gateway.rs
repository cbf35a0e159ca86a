//! AWS NAT gateway

use converge::delta::scalar;
use converge::target::{logical_name, resource_name};
use converge::{
    ApiTarget, Attributes, Changes, CloudFormationTarget, Context, Delta, Error, Identities,
    Lifecycle, Link, Phase, Result, Task, TargetSet, TerraformTarget,
};

use crate::cloud::{CloudError, SimCloud};

pub const TERRAFORM_TYPE: &str = "aws_nat_gateway";
pub const CLOUDFORMATION_TYPE: &str = "AWS::EC2::NatGateway";

#[derive(Debug, Clone, Default)]
pub struct NatGateway {
    pub name: String,
    pub subnet_id: Option<String>,
    /// Elastic IP allocation
    pub allocation_id: Option<String>,
    pub lifecycle: Lifecycle,
    pub id: Option<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct NatGatewayChanges {
    pub subnet_id: Option<String>,
    pub allocation_id: Option<String>,
}

impl Changes for NatGatewayChanges {
    fn is_empty(&self) -> bool {
        self.subnet_id.is_none() && self.allocation_id.is_none()
    }
}

impl NatGateway {
    pub fn new(name: impl Into<String>, subnet_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subnet_id: Some(subnet_id.into()),
            ..Self::default()
        }
    }

    pub fn with_allocation(mut self, allocation_id: impl Into<String>) -> Self {
        self.allocation_id = Some(allocation_id.into());
        self
    }

    pub fn terraform_link(name: &str) -> Link {
        Link::terraform(TERRAFORM_TYPE, &resource_name("nat", name), "id")
    }

    pub fn cloudformation_link(name: &str) -> Link {
        Link::cloudformation_ref(&logical_name("NatGateway", name))
    }
}

impl Task<SimCloud> for NatGateway {
    type Changes = NatGatewayChanges;

    fn name(&self) -> &str {
        &self.name
    }

    fn resource_type(&self) -> &'static str {
        "nat-gateway"
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn find(&self, ctx: &Context<SimCloud>) -> Result<Option<Self>> {
        let found = ctx
            .cloud()
            .find_nat_gateway_by_name(&self.name)
            .map_err(|e| ctx.classify(&self.name, Phase::Discover, e))?;

        Ok(found.map(|nat| NatGateway {
            name: nat.name,
            subnet_id: Some(nat.subnet_id),
            allocation_id: nat.allocation_id,
            lifecycle: self.lifecycle,
            id: Some(nat.id),
        }))
    }

    fn identity(&self) -> Option<String> {
        self.id.clone()
    }

    fn changes(&self, actual: &Self, _ids: &Identities) -> NatGatewayChanges {
        NatGatewayChanges {
            subnet_id: scalar(&actual.subnet_id, &self.subnet_id),
            allocation_id: scalar(&actual.allocation_id, &self.allocation_id),
        }
    }

    fn creation(&self) -> NatGatewayChanges {
        NatGatewayChanges {
            subnet_id: self.subnet_id.clone(),
            allocation_id: self.allocation_id.clone(),
        }
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &NatGatewayChanges) -> Result<()> {
        if actual.is_none() {
            if changes.subnet_id.is_none() {
                return Err(Error::required_field(&self.name, "Subnet"));
            }
            return Ok(());
        }
        if changes.subnet_id.is_some() {
            return Err(Error::cannot_change_field(&self.name, "Subnet"));
        }
        if changes.allocation_id.is_some() {
            return Err(Error::cannot_change_field(&self.name, "ElasticIP"));
        }
        Ok(())
    }

    fn supported_targets(&self) -> TargetSet {
        TargetSet::ALL
    }

    fn render_api(
        &self,
        ctx: &Context<SimCloud>,
        target: &ApiTarget,
        actual: Option<&Self>,
        delta: &Delta<NatGatewayChanges>,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let classify = |e: CloudError| ctx.classify(&self.name, Phase::Render, e);

        match delta {
            Delta::Create(changes) => {
                let subnet_id = changes
                    .subnet_id
                    .as_deref()
                    .ok_or_else(|| Error::required_field(&self.name, "Subnet"))?;
                let id = target
                    .mutate(|| {
                        cloud.create_nat_gateway(
                            &self.name,
                            subnet_id,
                            changes.allocation_id.as_deref(),
                        )
                    })?
                    .map_err(classify)?;
                log::info!("created nat gateway {} ({id})", self.name);
                ctx.identities().record(&self.name, id);
                Ok(())
            }
            Delta::Delete => {
                let Some(id) = actual.and_then(|a| a.id.as_deref()) else {
                    return Ok(());
                };
                target
                    .mutate(|| cloud.delete_nat_gateway(id))?
                    .map_err(classify)
            }
            // Every field is immutable, so an update never gets past check_changes
            Delta::Update(_) | Delta::Unchanged => Ok(()),
        }
    }

    fn render_terraform(
        &self,
        _ctx: &Context<SimCloud>,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        delta: &Delta<NatGatewayChanges>,
    ) -> Result<()> {
        if matches!(delta, Delta::Unchanged | Delta::Delete) {
            return Ok(());
        }
        target.render_resource(
            TERRAFORM_TYPE,
            &resource_name("nat", &self.name),
            Attributes::new()
                .opt("subnet_id", self.subnet_id.as_ref())
                .opt("allocation_id", self.allocation_id.as_ref()),
        )
    }

    fn render_cloudformation(
        &self,
        _ctx: &Context<SimCloud>,
        target: &CloudFormationTarget,
        _actual: Option<&Self>,
        delta: &Delta<NatGatewayChanges>,
    ) -> Result<()> {
        if matches!(delta, Delta::Unchanged | Delta::Delete) {
            return Ok(());
        }
        target.render_resource(
            CLOUDFORMATION_TYPE,
            &logical_name("NatGateway", &self.name),
            Attributes::new()
                .opt("SubnetId", self.subnet_id.as_ref())
                .opt("AllocationId", self.allocation_id.as_ref()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{Action, ChangeKind, ContextBuilder, Target, TargetKind};
    use std::sync::Arc;

    fn run(cloud: SimCloud, task: NatGateway) -> (Arc<Context<SimCloud>>, converge::Result<converge::RunReport>) {
        let ctx = Arc::new(
            ContextBuilder::new(cloud, Target::new(TargetKind::Api))
                .task(task)
                .build()
                .unwrap(),
        );
        let result = converge::run(&ctx);
        (ctx, result)
    }

    #[test]
    fn test_create_records_identity() {
        let (ctx, result) = run(SimCloud::new(), NatGateway::new("a", "subnet-1").with_allocation("eipalloc-1"));
        result.unwrap();
        let id = ctx.identities().get("a").unwrap();
        assert!(id.starts_with("nat-"));
        let state = ctx.cloud().snapshot();
        assert_eq!(state.nat_gateways[&id].allocation_id.as_deref(), Some("eipalloc-1"));
    }

    #[test]
    fn test_subnet_is_immutable() {
        let cloud = SimCloud::new();
        cloud.create_nat_gateway("a", "subnet-1", None).unwrap();
        let (_, result) = run(cloud, NatGateway::new("a", "subnet-2"));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("a: field Subnet cannot be changed"));
    }

    #[test]
    fn test_absent_deletes() {
        let cloud = SimCloud::new();
        cloud.create_nat_gateway("a", "subnet-1", None).unwrap();
        let mut task = NatGateway::new("a", "subnet-1");
        task.lifecycle = Lifecycle::Absent;

        let (ctx, result) = run(cloud, task);
        let report = result.unwrap();
        assert_eq!(
            report.get("a").and_then(|o| o.action()),
            Some(Action::Applied(ChangeKind::Delete))
        );
        assert!(ctx.cloud().snapshot().nat_gateways.is_empty());
    }

    #[test]
    fn test_exists_and_validates_missing_fails() {
        let mut task = NatGateway::new("a", "subnet-1");
        task.lifecycle = Lifecycle::ExistsAndValidates;
        let (ctx, result) = run(SimCloud::new(), task);
        assert!(result.unwrap_err().to_string().contains("lifecycle exists-and-validates violated"));
        assert_eq!(ctx.cloud().mutation_count(), 0);
    }
}
