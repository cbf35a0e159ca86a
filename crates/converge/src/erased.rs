//! Type erasure for tasks
//!
//! Tasks have an associated `Changes` type, so the registry cannot hold them
//! as `dyn Task`. [`AnyTask`] is the object-safe view the registry, graph and
//! scheduler work with; it is implemented for every [`Task`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::apply;
use crate::context::{Context, Registry};
use crate::error::Result;
use crate::lifecycle::Lifecycle;
use crate::report::Converged;
use crate::target::TargetSet;
use crate::task::Task;

/// Type-erased task as stored in the registry
pub trait AnyTask<C>: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn resource_type(&self) -> &'static str;

    fn lifecycle(&self) -> Lifecycle;

    fn dependencies(&self, registry: &Registry<C>) -> Vec<String>;

    fn supported_targets(&self) -> TargetSet;

    fn describe(&self) -> String;

    fn as_any(&self) -> &dyn Any;

    /// Run one discover/diff/check/render attempt
    fn converge(self: Arc<Self>, ctx: Arc<Context<C>>) -> Result<Converged>;
}

impl<C, T> AnyTask<C> for T
where
    C: Send + Sync + 'static,
    T: Task<C>,
{
    fn name(&self) -> &str {
        <T as Task<C>>::name(self)
    }

    fn resource_type(&self) -> &'static str {
        <T as Task<C>>::resource_type(self)
    }

    fn lifecycle(&self) -> Lifecycle {
        <T as Task<C>>::lifecycle(self)
    }

    fn dependencies(&self, registry: &Registry<C>) -> Vec<String> {
        <T as Task<C>>::dependencies(self, registry)
    }

    fn supported_targets(&self) -> TargetSet {
        <T as Task<C>>::supported_targets(self)
    }

    fn describe(&self) -> String {
        <T as Task<C>>::describe(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn converge(self: Arc<Self>, ctx: Arc<Context<C>>) -> Result<Converged> {
        apply::converge_task(self, ctx)
    }
}

/// A shared, type-erased task
pub type SharedTask<C> = Arc<dyn AnyTask<C>>;
