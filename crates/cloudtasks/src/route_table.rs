//! AWS route table

use std::collections::BTreeMap;

use converge::delta::{map, scalar};
use converge::target::{logical_name, resource_name};
use converge::{
    ApiTarget, Attributes, Changes, CloudFormationTarget, Context, Delta, Error, Identities,
    Lifecycle, Link, Phase, Result, Task, TargetSet, TerraformTarget, Value,
};

use crate::cloud::{CloudError, SimCloud};

pub const TERRAFORM_TYPE: &str = "aws_route_table";
pub const CLOUDFORMATION_TYPE: &str = "AWS::EC2::RouteTable";

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    pub name: String,
    pub vpc_id: Option<String>,
    pub tags: Option<BTreeMap<String, String>>,
    pub lifecycle: Lifecycle,
    /// Cloud id, set on discovered tables only
    pub id: Option<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RouteTableChanges {
    pub vpc_id: Option<String>,
    pub tags: Option<BTreeMap<String, String>>,
}

impl Changes for RouteTableChanges {
    fn is_empty(&self) -> bool {
        self.vpc_id.is_none() && self.tags.is_none()
    }
}

impl RouteTable {
    pub fn new(name: impl Into<String>, vpc_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vpc_id: Some(vpc_id.into()),
            ..Self::default()
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// `aws_route_table.<name>.id`
    pub fn terraform_link(name: &str) -> Link {
        Link::terraform(TERRAFORM_TYPE, &resource_name("rt", name), "id")
    }

    /// `{"Ref": "RouteTable<name>"}`
    pub fn cloudformation_link(name: &str) -> Link {
        Link::cloudformation_ref(&logical_name("RouteTable", name))
    }
}

fn tag_list(tags: &BTreeMap<String, String>) -> Vec<Value> {
    tags.iter()
        .map(|(k, v)| {
            let mut entry = BTreeMap::new();
            entry.insert("Key".to_string(), Value::from(k));
            entry.insert("Value".to_string(), Value::from(v));
            Value::Map(entry)
        })
        .collect()
}

impl Task<SimCloud> for RouteTable {
    type Changes = RouteTableChanges;

    fn name(&self) -> &str {
        &self.name
    }

    fn resource_type(&self) -> &'static str {
        "route-table"
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn find(&self, ctx: &Context<SimCloud>) -> Result<Option<Self>> {
        let found = ctx
            .cloud()
            .find_route_table_by_name(&self.name)
            .map_err(|e| ctx.classify(&self.name, Phase::Discover, e))?;

        Ok(found.map(|rt| RouteTable {
            name: rt.name,
            vpc_id: Some(rt.vpc_id),
            tags: Some(rt.tags),
            lifecycle: self.lifecycle,
            id: Some(rt.id),
        }))
    }

    fn identity(&self) -> Option<String> {
        self.id.clone()
    }

    fn changes(&self, actual: &Self, _ids: &Identities) -> RouteTableChanges {
        RouteTableChanges {
            vpc_id: scalar(&actual.vpc_id, &self.vpc_id),
            tags: map(&actual.tags, &self.tags),
        }
    }

    fn creation(&self) -> RouteTableChanges {
        RouteTableChanges {
            vpc_id: self.vpc_id.clone(),
            tags: self.tags.clone(),
        }
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &RouteTableChanges) -> Result<()> {
        match actual {
            None if changes.vpc_id.is_none() => Err(Error::required_field(&self.name, "VPC")),
            Some(_) if changes.vpc_id.is_some() => {
                Err(Error::cannot_change_field(&self.name, "VPC"))
            }
            _ => Ok(()),
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
        delta: &Delta<RouteTableChanges>,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let classify = |e: CloudError| ctx.classify(&self.name, Phase::Render, e);
        let actual_id = || {
            actual
                .and_then(|a| a.id.clone())
                .ok_or_else(|| Error::invalid_field(&self.name, "discovered route table has no id"))
        };

        match delta {
            Delta::Unchanged => Ok(()),
            Delta::Create(changes) => {
                let vpc_id = changes
                    .vpc_id
                    .as_deref()
                    .ok_or_else(|| Error::required_field(&self.name, "VPC"))?;
                let tags = changes.tags.clone().unwrap_or_default();
                let id = target
                    .mutate(|| cloud.create_route_table(&self.name, vpc_id, tags))?
                    .map_err(classify)?;
                log::info!("created route table {} ({id})", self.name);
                ctx.identities().record(&self.name, id);
                Ok(())
            }
            Delta::Update(changes) => {
                let id = actual_id()?;
                if let Some(tags) = &changes.tags {
                    target
                        .mutate(|| cloud.replace_route_table_tags(&id, tags.clone()))?
                        .map_err(classify)?;
                }
                Ok(())
            }
            Delta::Delete => {
                let id = actual_id()?;
                target
                    .mutate(|| cloud.delete_route_table(&id))?
                    .map_err(classify)
            }
        }
    }

    fn render_terraform(
        &self,
        _ctx: &Context<SimCloud>,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        delta: &Delta<RouteTableChanges>,
    ) -> Result<()> {
        if matches!(delta, Delta::Unchanged | Delta::Delete) {
            return Ok(());
        }
        let mut tags = self.tags.clone().unwrap_or_default();
        tags.entry("Name".to_string())
            .or_insert_with(|| self.name.clone());

        target.render_resource(
            TERRAFORM_TYPE,
            &resource_name("rt", &self.name),
            Attributes::new()
                .opt("vpc_id", self.vpc_id.as_ref())
                .set("tags", tags),
        )
    }

    fn render_cloudformation(
        &self,
        _ctx: &Context<SimCloud>,
        target: &CloudFormationTarget,
        _actual: Option<&Self>,
        delta: &Delta<RouteTableChanges>,
    ) -> Result<()> {
        if matches!(delta, Delta::Unchanged | Delta::Delete) {
            return Ok(());
        }
        let mut tags = self.tags.clone().unwrap_or_default();
        tags.entry("Name".to_string())
            .or_insert_with(|| self.name.clone());

        target.render_resource(
            CLOUDFORMATION_TYPE,
            &logical_name("RouteTable", &self.name),
            Attributes::new()
                .opt("VpcId", self.vpc_id.as_ref())
                .set("Tags", tag_list(&tags)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::{Action, ContextBuilder, Target, TargetKind};
    use serde_json::json;
    use std::sync::Arc;

    fn context(cloud: SimCloud, kind: TargetKind, task: RouteTable) -> Arc<Context<SimCloud>> {
        Arc::new(
            ContextBuilder::new(cloud, Target::new(kind))
                .task(task)
                .config(crate::engine_config())
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_create_then_noop() {
        let table = RouteTable::new("main", "vpc-1").with_tag("env", "test");
        let ctx = context(SimCloud::new(), TargetKind::Api, table.clone());

        let report = converge::run(&ctx).unwrap();
        assert!(matches!(
            report.get("main").and_then(|o| o.action()),
            Some(Action::Applied(_))
        ));
        assert!(ctx.identities().get("main").is_some());

        let ctx = context(
            SimCloud::from_state(ctx.cloud().snapshot()),
            TargetKind::Api,
            table,
        );
        let report = converge::run(&ctx).unwrap();
        assert_eq!(report.get("main").and_then(|o| o.action()), Some(Action::Unchanged));
        assert_eq!(ctx.cloud().mutation_count(), 0);
    }

    #[test]
    fn test_tag_drift_is_updated() {
        let cloud = SimCloud::new();
        cloud
            .create_route_table("main", "vpc-1", BTreeMap::new())
            .unwrap();
        let ctx = context(cloud, TargetKind::Api, RouteTable::new("main", "vpc-1").with_tag("env", "prod"));

        converge::run(&ctx).unwrap();
        let state = ctx.cloud().snapshot();
        let rt = state.route_tables.values().next().unwrap();
        assert_eq!(rt.tags.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_vpc_cannot_change() {
        let cloud = SimCloud::new();
        cloud
            .create_route_table("main", "vpc-1", BTreeMap::new())
            .unwrap();
        let ctx = context(cloud, TargetKind::Api, RouteTable::new("main", "vpc-2"));

        let err = converge::run(&ctx).unwrap_err();
        assert!(err.to_string().contains("main: field VPC cannot be changed"));
    }

    #[test]
    fn test_missing_vpc_is_required_on_create() {
        let table = RouteTable {
            name: "main".into(),
            ..RouteTable::default()
        };
        let ctx = context(SimCloud::new(), TargetKind::Api, table);
        let err = converge::run(&ctx).unwrap_err();
        assert!(err.to_string().contains("main: field VPC is required"));
    }

    #[test]
    fn test_cloudformation_tags_are_key_value_list() {
        let ctx = context(SimCloud::new(), TargetKind::CloudFormation, RouteTable::new("main", "vpc-1"));
        converge::run(&ctx).unwrap();

        let template = ctx.target().as_cloudformation().unwrap().finish();
        let resource = template.resource("RouteTablemain").unwrap();
        assert_eq!(resource["Type"], json!(CLOUDFORMATION_TYPE));
        assert_eq!(
            resource["Properties"]["Tags"],
            json!([{ "Key": "Name", "Value": "main" }])
        );
        // Declarative targets never call the cloud for sync tasks
        assert!(ctx.cloud().calls().is_empty());
    }

    #[test]
    fn test_terraform_link() {
        assert_eq!(RouteTable::terraform_link("main").expression(), "aws_route_table.main.id");
        assert_eq!(RouteTable::terraform_link("1a").expression(), "aws_route_table.rt-1a.id");
    }
}
