//! OpenStack compute server group

use converge::delta::set;
use converge::target::resource_name;
use converge::{
    ApiTarget, Attributes, Changes, Context, Delta, Error, Identities, Lifecycle, Phase, Result,
    Task, TargetSet, TerraformTarget,
};

use crate::cloud::{CloudError, SimCloud};

pub const TERRAFORM_TYPE: &str = "openstack_compute_servergroup_v2";

#[derive(Debug, Clone, Default)]
pub struct ServerGroup {
    pub name: String,
    /// e.g. `anti-affinity`; order does not matter
    pub policies: Option<Vec<String>>,
    pub lifecycle: Lifecycle,
    pub id: Option<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ServerGroupChanges {
    pub policies: Option<Vec<String>>,
}

impl Changes for ServerGroupChanges {
    fn is_empty(&self) -> bool {
        self.policies.is_none()
    }
}

impl ServerGroup {
    pub fn new<I, S>(name: impl Into<String>, policies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            policies: Some(policies.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }
}

impl Task<SimCloud> for ServerGroup {
    type Changes = ServerGroupChanges;

    fn name(&self) -> &str {
        &self.name
    }

    fn resource_type(&self) -> &'static str {
        "server-group"
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn find(&self, ctx: &Context<SimCloud>) -> Result<Option<Self>> {
        let found = ctx
            .cloud()
            .find_server_group(&self.name)
            .map_err(|e| ctx.classify(&self.name, Phase::Discover, e))?;

        Ok(found.map(|g| ServerGroup {
            name: g.name,
            policies: Some(g.policies),
            lifecycle: self.lifecycle,
            id: Some(g.id),
        }))
    }

    fn identity(&self) -> Option<String> {
        self.id.clone()
    }

    fn changes(&self, actual: &Self, _ids: &Identities) -> ServerGroupChanges {
        ServerGroupChanges {
            policies: set(&actual.policies, &self.policies),
        }
    }

    fn creation(&self) -> ServerGroupChanges {
        ServerGroupChanges {
            policies: self.policies.clone(),
        }
    }

    fn check_changes(&self, actual: Option<&Self>, changes: &ServerGroupChanges) -> Result<()> {
        match actual {
            None if changes.policies.as_ref().is_none_or(Vec::is_empty) => {
                Err(Error::required_field(&self.name, "Policies"))
            }
            Some(_) if changes.policies.is_some() => {
                Err(Error::cannot_change_field(&self.name, "Policies"))
            }
            _ => Ok(()),
        }
    }

    fn supported_targets(&self) -> TargetSet {
        TargetSet::API | TargetSet::TERRAFORM
    }

    fn render_api(
        &self,
        ctx: &Context<SimCloud>,
        target: &ApiTarget,
        actual: Option<&Self>,
        delta: &Delta<ServerGroupChanges>,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let classify = |e: CloudError| ctx.classify(&self.name, Phase::Render, e);

        match delta {
            Delta::Create(changes) => {
                let policies = changes.policies.clone().unwrap_or_default();
                let id = target
                    .mutate(|| cloud.create_server_group(&self.name, &policies))?
                    .map_err(classify)?;
                log::info!("created server group {} ({id})", self.name);
                ctx.identities().record(&self.name, id);
                Ok(())
            }
            Delta::Delete => match actual.and_then(|a| a.id.as_deref()) {
                Some(id) => target
                    .mutate(|| cloud.delete_server_group(id))?
                    .map_err(classify),
                None => Ok(()),
            },
            Delta::Update(_) | Delta::Unchanged => Ok(()),
        }
    }

    fn render_terraform(
        &self,
        _ctx: &Context<SimCloud>,
        target: &TerraformTarget,
        _actual: Option<&Self>,
        delta: &Delta<ServerGroupChanges>,
    ) -> Result<()> {
        if matches!(delta, Delta::Unchanged | Delta::Delete) {
            return Ok(());
        }
        target.render_resource(
            TERRAFORM_TYPE,
            &resource_name("servergroup", &self.name),
            Attributes::new()
                .set("name", &self.name)
                .opt("policies", self.policies.clone()),
        )
    }
}
