//! CloudFormation template target

use serde_json::{Map, Value as Json, json};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use super::TargetKind;
use super::value::Attributes;
use crate::apply::abandoned_call;
use crate::error::{Error, Result};

const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

#[derive(Debug, Clone, PartialEq)]
struct TemplateResource {
    resource_type: String,
    properties: Attributes,
}

/// Collects template resources as tasks render
#[derive(Debug, Default)]
pub struct CloudFormationTarget {
    resources: Mutex<BTreeMap<String, TemplateResource>>,
}

impl CloudFormationTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource under `logical_name`; names are unique per template
    pub fn render_resource(
        &self,
        resource_type: &str,
        logical_name: &str,
        properties: Attributes,
    ) -> Result<()> {
        let mut resources = self
            .resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = abandoned_call() {
            return Err(Error::Abandoned { task });
        }
        if resources.contains_key(logical_name) {
            return Err(Error::DuplicateOutput {
                target: TargetKind::CloudFormation,
                name: logical_name.to_string(),
            });
        }
        log::debug!("cloudformation: {logical_name} ({resource_type})");
        resources.insert(
            logical_name.to_string(),
            TemplateResource {
                resource_type: resource_type.to_string(),
                properties,
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn finish(&self) -> CloudFormationTemplate {
        let resources = self
            .resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut out = Map::new();
        for (name, resource) in resources.iter() {
            out.insert(
                name.clone(),
                json!({
                    "Type": resource.resource_type,
                    "Properties": resource.properties.clone().into_value().to_cloudformation_json(),
                }),
            );
        }
        CloudFormationTemplate { resources: out }
    }
}

/// Rendered CloudFormation template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloudFormationTemplate {
    resources: Map<String, Json>,
}

impl CloudFormationTemplate {
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn resource(&self, logical_name: &str) -> Option<&Json> {
        self.resources.get(logical_name)
    }

    pub fn to_json(&self) -> Json {
        json!({
            "AWSTemplateFormatVersion": TEMPLATE_FORMAT_VERSION,
            "Resources": self.resources,
        })
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_json())
    }
}

/// CloudFormation logical name: `prefix` followed by the alphanumerics of `name`
pub fn logical_name(prefix: &str, name: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + name.len());
    out.extend(prefix.chars().filter(char::is_ascii_alphanumeric));
    out.extend(name.chars().filter(char::is_ascii_alphanumeric));
    out
}
