//! Task trait - the contract every resource description implements
//!
//! A task is a named piece of desired infrastructure state. The engine drives
//! each task through the same protocol:
//! - discovery (`find`) of the live resource, if any
//! - comparison (`changes` / `creation`) producing a typed sparse delta
//! - validation (`check_changes`) of that delta
//! - rendering to the active target (`render_api`, `render_terraform`,
//!   `render_cloudformation`)
//!
//! Tasks are immutable once registered. Anything learned at run time, such
//! as the cloud id of a created resource, goes to the context's
//! [`Identities`] table instead.

use std::fmt;

use crate::context::{Context, Registry};
use crate::delta::{Changes, Delta, Identities, TaskRef};
use crate::error::{Error, Result};
use crate::lifecycle::Lifecycle;
use crate::target::{ApiTarget, CloudFormationTarget, TargetKind, TargetSet, TerraformTarget};

/// Core trait for declarative tasks
///
/// `C` is the cloud handle type shared by all tasks of a run.
///
/// # Example
///
/// ```ignore
/// use converge::{Context, Delta, Identities, Result, Task, TargetSet, TerraformTarget, Attributes};
///
/// #[derive(Debug)]
/// struct Bucket { name: String, versioning: Option<bool> }
///
/// #[derive(Debug, Default)]
/// struct BucketChanges { versioning: Option<bool> }
///
/// impl converge::Changes for BucketChanges {
///     fn is_empty(&self) -> bool { self.versioning.is_none() }
/// }
///
/// impl Task<MyCloud> for Bucket {
///     type Changes = BucketChanges;
///
///     fn name(&self) -> &str { &self.name }
///     fn resource_type(&self) -> &'static str { "bucket" }
///
///     fn find(&self, ctx: &Context<MyCloud>) -> Result<Option<Self>> {
///         Ok(ctx.cloud().bucket(&self.name))
///     }
///
///     fn changes(&self, actual: &Self, _ids: &Identities) -> BucketChanges {
///         BucketChanges { versioning: converge::delta::scalar(&actual.versioning, &self.versioning) }
///     }
///
///     fn creation(&self) -> BucketChanges {
///         BucketChanges { versioning: self.versioning }
///     }
///
///     fn supported_targets(&self) -> TargetSet { TargetSet::TERRAFORM }
///
///     fn render_terraform(&self, _ctx: &Context<MyCloud>, t: &TerraformTarget,
///                         _actual: Option<&Self>, _delta: &Delta<BucketChanges>) -> Result<()> {
///         t.render_resource("aws_s3_bucket", &self.name, Attributes::new().set("bucket", &self.name))
///     }
/// }
/// ```
pub trait Task<C>: Send + Sync + fmt::Debug + Sized + 'static {
    /// Sparse per-field difference type for this task
    type Changes: Changes;

    /// Unique name of this task within the run
    fn name(&self) -> &str;

    /// Resource type, used in diagnostics and output (e.g. "route", "package")
    fn resource_type(&self) -> &'static str;

    /// Declared lifecycle; run-scoped overrides take precedence
    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Sync
    }

    /// References to other tasks held in this task's fields
    fn references(&self) -> Vec<&TaskRef> {
        Vec::new()
    }

    /// Names of the tasks that must converge before this one
    ///
    /// Defaults to the named references. Override when ordering depends on
    /// other tasks in the registry rather than on fields.
    fn dependencies(&self, _registry: &Registry<C>) -> Vec<String> {
        self.references()
            .into_iter()
            .filter_map(|r| r.name.clone())
            .collect()
    }

    /// One-line diagnostic description, safe to print even when the graph is cyclic
    fn describe(&self) -> String {
        let refs: Vec<String> = self.references().iter().map(|r| r.to_string()).collect();
        if refs.is_empty() {
            format!("{} {}", self.resource_type(), self.name())
        } else {
            format!(
                "{} {} (references {})",
                self.resource_type(),
                self.name(),
                refs.join(", ")
            )
        }
    }

    /// Discover the live resource matching this task
    ///
    /// Returns `Ok(None)` when the resource does not exist.
    fn find(&self, ctx: &Context<C>) -> Result<Option<Self>>;

    /// Cloud id of a discovered resource, recorded in the run's identities
    fn identity(&self) -> Option<String> {
        None
    }

    /// Compare this desired task against a discovered one
    fn changes(&self, actual: &Self, ids: &Identities) -> Self::Changes;

    /// Changes describing a full create of this task
    fn creation(&self) -> Self::Changes;

    /// Validate a create (`actual` is `None`) or an update before rendering
    fn check_changes(&self, _actual: Option<&Self>, _changes: &Self::Changes) -> Result<()> {
        Ok(())
    }

    /// Targets this task can render to
    fn supported_targets(&self) -> TargetSet;

    /// Apply the delta directly against the cloud
    fn render_api(
        &self,
        _ctx: &Context<C>,
        _target: &ApiTarget,
        _actual: Option<&Self>,
        _delta: &Delta<Self::Changes>,
    ) -> Result<()> {
        Err(Error::unsupported_target(self.name(), self.resource_type(), TargetKind::Api))
    }

    /// Emit a Terraform resource block for this task
    fn render_terraform(
        &self,
        _ctx: &Context<C>,
        _target: &TerraformTarget,
        _actual: Option<&Self>,
        _delta: &Delta<Self::Changes>,
    ) -> Result<()> {
        Err(Error::unsupported_target(
            self.name(),
            self.resource_type(),
            TargetKind::Terraform,
        ))
    }

    /// Emit a CloudFormation resource for this task
    fn render_cloudformation(
        &self,
        _ctx: &Context<C>,
        _target: &CloudFormationTarget,
        _actual: Option<&Self>,
        _delta: &Delta<Self::Changes>,
    ) -> Result<()> {
        Err(Error::unsupported_target(
            self.name(),
            self.resource_type(),
            TargetKind::CloudFormation,
        ))
    }
}
