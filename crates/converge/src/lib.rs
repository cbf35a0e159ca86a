//! # Converge
//!
//! A declarative convergence engine for cloud infrastructure.
//!
//! Callers describe desired infrastructure as a set of named tasks. The engine
//! orders them by their dependencies, discovers the live state of each one,
//! computes a sparse delta, enforces the task's lifecycle policy and renders
//! the delta to one target: the live cloud API, a Terraform configuration or
//! a CloudFormation template.
//!
//! ## Core Concepts
//!
//! - **Task**: a named unit of desired state implementing [`Task`]
//! - **Delta**: what render is asked to do, built from typed sparse `Changes`
//! - **Lifecycle**: how discovered drift is treated ([`Lifecycle`])
//! - **Target**: where changes go ([`Target`]); tasks declare a [`TargetSet`]
//! - **Context**: the run-scoped registry, cloud handle and shared tables
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use converge::{ContextBuilder, EngineConfig, Target, TargetKind};
//!
//! let ctx = ContextBuilder::new(cloud, Target::new(TargetKind::Api))
//!     .task(route_table)
//!     .task(route)
//!     .config(EngineConfig::default().with_jobs(8))
//!     .build()?;
//!
//! let report = converge::run(&Arc::new(ctx))?;
//! ```
//!
//! ## Concurrency
//!
//! Tasks run on a bounded worker pool as soon as their dependencies have
//! converged. Tasks never see each other's deltas; they coordinate only
//! through the context (identities and named locks).

mod apply;
pub mod config;
pub mod context;
pub mod delta;
pub mod erased;
pub mod error;
pub mod executor;
pub mod graph;
pub mod lifecycle;
pub mod report;
pub mod retry;
pub mod target;
pub mod task;

// Re-export main types at crate root
pub use config::EngineConfig;
pub use context::{
    CancelToken, Context, ContextBuilder, LockTable, NoObserver, Observer, Registry,
};
pub use delta::{ChangeKind, Changes, Delta, Identities, TaskRef};
pub use erased::{AnyTask, SharedTask};
pub use error::{Error, ErrorCategory, Phase, Result};
pub use executor::{run, run_with};
pub use graph::TaskGraph;
pub use lifecycle::{Lifecycle, LifecycleOverrides, LifecyclePolicy};
pub use report::{Action, Converged, RunReport, RunSummary, TaskOutcome};
pub use retry::{ErrorCode, RetryClassifier, RetryConfig};
pub use target::{
    ApiTarget, Attributes, CloudFormationTarget, CloudFormationTemplate, Link, Target,
    TargetKind, TargetSet, TerraformOutput, TerraformTarget, Value,
};
pub use task::Task;
