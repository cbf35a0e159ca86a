//! Host package installed through the node's package manager
//!
//! Packages without a `source` come from the OS repositories. Packages with a
//! `source` are bare `.deb`/`.rpm` files, installed together with their
//! bundled `deps` in one transaction, after every OS package. All package
//! manager calls hold the `package-manager` lock so sibling tasks never run
//! the package manager concurrently.

use std::collections::BTreeSet;

use converge::delta::scalar;
use converge::{
    ApiTarget, Changes, Context, Delta, Error, Identities, Lifecycle, Phase, Registry, Result,
    Task, TargetSet,
};

use crate::cloud::{CloudError, PackageRecord, SimCloud};

/// Named lock guarding the package manager
pub const PACKAGE_MANAGER_LOCK: &str = "package-manager";

const CONTAINERD: &str = "containerd.io";
const CONTAINER_SELINUX: &str = "container-selinux";
const DOCKER: &str = "docker-ce";

#[derive(Debug, Clone, Default)]
pub struct Package {
    pub name: String,
    pub version: Option<String>,
    /// URL of a bare package file
    pub source: Option<String>,
    /// Expected `sha256:<hex>` of the downloaded file
    pub hash: Option<String>,
    /// Bare packages installed in the same transaction
    pub deps: Vec<Package>,
    pub lifecycle: Lifecycle,
    /// Discovered only: false when a previous install did not finish
    pub healthy: Option<bool>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PackageChanges {
    pub version: Option<String>,
    pub healthy: Option<bool>,
}

impl Changes for PackageChanges {
    fn is_empty(&self) -> bool {
        self.version.is_none() && self.healthy.is_none()
    }
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>, hash: Option<String>) -> Self {
        self.source = Some(source.into());
        self.hash = hash;
        self
    }

    pub fn with_dep(mut self, dep: Package) -> Self {
        self.deps.push(dep);
        self
    }

    /// Provided by the OS repositories rather than a bare file
    pub fn is_os_package(&self) -> bool {
        self.source.as_deref().unwrap_or_default().is_empty()
    }

    fn install_record(&self) -> PackageRecord {
        PackageRecord {
            name: self.name.clone(),
            version: self.version.clone().unwrap_or_else(|| "latest".to_string()),
            source: self.source.clone(),
            hash: self.hash.clone(),
            healthy: true,
        }
    }
}

fn valid_hash(hash: &str) -> bool {
    let hex = hash.strip_prefix("sha256:").unwrap_or(hash);
    hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit())
}

impl Task<SimCloud> for Package {
    type Changes = PackageChanges;

    fn name(&self) -> &str {
        &self.name
    }

    fn resource_type(&self) -> &'static str {
        "package"
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn dependencies(&self, registry: &Registry<SimCloud>) -> Vec<String> {
        let mut deps = BTreeSet::new();
        for other in registry.of_type::<Package>() {
            if other.name == self.name {
                continue;
            }
            if !self.is_os_package() && other.is_os_package() {
                deps.insert(other.name.clone());
            }
            if self.name == CONTAINERD && other.name == CONTAINER_SELINUX {
                deps.insert(other.name.clone());
            }
            if self.name == DOCKER && (other.name == CONTAINER_SELINUX || other.name == CONTAINERD)
            {
                deps.insert(other.name.clone());
            }
        }
        deps.into_iter().collect()
    }

    fn describe(&self) -> String {
        match &self.source {
            Some(source) => format!("package {} from {source}", self.name),
            None => format!("package {}", self.name),
        }
    }

    fn find(&self, ctx: &Context<SimCloud>) -> Result<Option<Self>> {
        let found = ctx
            .with_lock(PACKAGE_MANAGER_LOCK, || ctx.cloud().query_package(&self.name))
            .map_err(|e| ctx.classify(&self.name, Phase::Discover, e))?;

        Ok(found.map(|p| Package {
            name: p.name,
            version: Some(p.version),
            source: p.source,
            hash: p.hash,
            deps: Vec::new(),
            lifecycle: self.lifecycle,
            healthy: Some(p.healthy),
        }))
    }

    fn changes(&self, actual: &Self, _ids: &Identities) -> PackageChanges {
        PackageChanges {
            version: scalar(&actual.version, &self.version),
            healthy: scalar(&actual.healthy, &Some(true)),
        }
    }

    fn creation(&self) -> PackageChanges {
        PackageChanges {
            version: self.version.clone(),
            healthy: Some(true),
        }
    }

    fn check_changes(&self, _actual: Option<&Self>, _changes: &PackageChanges) -> Result<()> {
        for pkg in std::iter::once(self).chain(&self.deps) {
            if let Some(hash) = &pkg.hash
                && !valid_hash(hash)
            {
                return Err(Error::invalid_field(
                    &self.name,
                    format!("invalid hash {hash:?} for package {}", pkg.name),
                ));
            }
        }
        Ok(())
    }

    fn supported_targets(&self) -> TargetSet {
        TargetSet::API
    }

    fn render_api(
        &self,
        ctx: &Context<SimCloud>,
        target: &ApiTarget,
        _actual: Option<&Self>,
        delta: &Delta<PackageChanges>,
    ) -> Result<()> {
        let cloud = ctx.cloud();
        let classify = |e: CloudError| ctx.classify(&self.name, Phase::Render, e);

        ctx.with_lock(PACKAGE_MANAGER_LOCK, || match delta {
            Delta::Unchanged => Ok(()),
            Delta::Create(_) | Delta::Update(PackageChanges { version: Some(_), .. }) => {
                let mut records = vec![self.install_record()];
                records.extend(self.deps.iter().map(Package::install_record));
                let names: Vec<&str> = self.deps.iter().map(|d| d.name.as_str()).collect();
                log::info!("installing package {} (dependencies: {names:?})", self.name);
                target
                    .mutate(|| cloud.install_packages(records))?
                    .map_err(classify)
            }
            Delta::Update(_) => {
                log::info!("package {} is unhealthy, repairing", self.name);
                target.mutate(|| cloud.repair_packages())?.map_err(classify)
            }
            Delta::Delete => {
                log::info!("removing package {}", self.name);
                target
                    .mutate(|| cloud.remove_package(&self.name))?
                    .map_err(classify)
            }
        })
    }
}
