//! Render targets and capability dispatch
//!
//! Exactly one target is active per run. The live API target mutates the
//! cloud as tasks converge; the Terraform and CloudFormation targets collect
//! a declarative document that is serialized once the run finishes.

mod api;
mod cloudformation;
mod terraform;
mod value;

pub use api::ApiTarget;
pub use cloudformation::{CloudFormationTemplate, CloudFormationTarget, logical_name};
pub use terraform::{TerraformBlock, TerraformOutput, TerraformTarget, resource_name};
pub use value::{Attributes, Link, Value};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use crate::context::Context;
use crate::delta::Delta;
use crate::error::{Error, Result};
use crate::task::Task;

/// Kind of render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Api,
    Terraform,
    CloudFormation,
}

impl TargetKind {
    pub const ALL: [TargetKind; 3] = [
        TargetKind::Api,
        TargetKind::Terraform,
        TargetKind::CloudFormation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Terraform => "terraform",
            Self::CloudFormation => "cloudformation",
        }
    }

    /// Whether tasks in `Sync` or `Absent` consult the cloud before rendering.
    ///
    /// Declarative targets describe the full desired state, so such tasks
    /// render as a create without discovery. Tasks whose lifecycle
    /// validates existing resources are still discovered.
    pub fn checks_existing(&self) -> bool {
        matches!(self, Self::Api)
    }

    fn bit(self) -> u8 {
        match self {
            Self::Api => 0b001,
            Self::Terraform => 0b010,
            Self::CloudFormation => 0b100,
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "api" | "direct" => Ok(Self::Api),
            "terraform" | "tf" => Ok(Self::Terraform),
            "cloudformation" | "cfn" => Ok(Self::CloudFormation),
            other => Err(format!(
                "unknown target {other:?} (expected api, terraform or cloudformation)"
            )),
        }
    }
}

/// Set of targets a task can render to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TargetSet(u8);

impl TargetSet {
    pub const NONE: TargetSet = TargetSet(0);
    pub const API: TargetSet = TargetSet(0b001);
    pub const TERRAFORM: TargetSet = TargetSet(0b010);
    pub const CLOUDFORMATION: TargetSet = TargetSet(0b100);
    pub const ALL: TargetSet = TargetSet(0b111);

    pub fn contains(self, kind: TargetKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn union(self, other: TargetSet) -> TargetSet {
        TargetSet(self.0 | other.0)
    }

    pub fn kinds(self) -> Vec<TargetKind> {
        TargetKind::ALL
            .into_iter()
            .filter(|k| self.contains(*k))
            .collect()
    }
}

impl BitOr for TargetSet {
    type Output = TargetSet;

    fn bitor(self, rhs: TargetSet) -> TargetSet {
        self.union(rhs)
    }
}

impl From<TargetKind> for TargetSet {
    fn from(kind: TargetKind) -> Self {
        TargetSet(kind.bit())
    }
}

/// The active render target of a run
#[derive(Debug)]
pub enum Target {
    Api(ApiTarget),
    Terraform(TerraformTarget),
    CloudFormation(CloudFormationTarget),
}

impl Target {
    /// Create an empty target of the given kind
    pub fn new(kind: TargetKind) -> Self {
        match kind {
            TargetKind::Api => Target::Api(ApiTarget::new()),
            TargetKind::Terraform => Target::Terraform(TerraformTarget::new()),
            TargetKind::CloudFormation => Target::CloudFormation(CloudFormationTarget::new()),
        }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Api(_) => TargetKind::Api,
            Target::Terraform(_) => TargetKind::Terraform,
            Target::CloudFormation(_) => TargetKind::CloudFormation,
        }
    }

    pub fn as_api(&self) -> Option<&ApiTarget> {
        match self {
            Target::Api(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_terraform(&self) -> Option<&TerraformTarget> {
        match self {
            Target::Terraform(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_cloudformation(&self) -> Option<&CloudFormationTarget> {
        match self {
            Target::CloudFormation(t) => Some(t),
            _ => None,
        }
    }
}

/// Invoke the render capability of `task` matching the active target.
pub(crate) fn dispatch<C, T: Task<C>>(
    task: &T,
    ctx: &Context<C>,
    actual: Option<&T>,
    delta: &Delta<T::Changes>,
) -> Result<()> {
    let kind = ctx.target().kind();
    if !task.supported_targets().contains(kind) {
        return Err(Error::unsupported_target(
            task.name(),
            task.resource_type(),
            kind,
        ));
    }

    log::debug!("rendering {} {} to {kind}", task.resource_type(), task.name());

    match ctx.target() {
        Target::Api(t) => task.render_api(ctx, t, actual, delta),
        Target::Terraform(t) => task.render_terraform(ctx, t, actual, delta),
        Target::CloudFormation(t) => task.render_cloudformation(ctx, t, actual, delta),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_set_contains() {
        let set = TargetSet::API | TargetSet::TERRAFORM;
        assert!(set.contains(TargetKind::Api));
        assert!(set.contains(TargetKind::Terraform));
        assert!(!set.contains(TargetKind::CloudFormation));
        assert_eq!(set.kinds(), vec![TargetKind::Api, TargetKind::Terraform]);
        assert!(!TargetSet::NONE.contains(TargetKind::Api));
    }

    #[test]
    fn test_parse_target_kind() {
        assert_eq!("API".parse::<TargetKind>().unwrap(), TargetKind::Api);
        assert_eq!("cfn".parse::<TargetKind>().unwrap(), TargetKind::CloudFormation);
        assert!("pulumi".parse::<TargetKind>().is_err());
    }

    #[test]
    fn test_only_api_checks_existing() {
        assert!(TargetKind::Api.checks_existing());
        assert!(!TargetKind::Terraform.checks_existing());
        assert!(!TargetKind::CloudFormation.checks_existing());
    }
}
