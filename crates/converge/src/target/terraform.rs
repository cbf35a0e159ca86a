//! Terraform configuration target

use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use super::TargetKind;
use super::value::{Attributes, Link};
use crate::apply::abandoned_call;
use crate::error::{Error, Result};

/// One `resource "type" "name" { ... }` block
#[derive(Debug, Clone, PartialEq)]
pub struct TerraformBlock {
    pub resource_type: String,
    pub name: String,
    pub attributes: Attributes,
}

impl TerraformBlock {
    /// Link to an attribute of this block
    pub fn link(&self, attribute: &str) -> Link {
        Link::terraform(&self.resource_type, &self.name, attribute)
    }
}

/// Collects resource blocks as tasks render
#[derive(Debug, Default)]
pub struct TerraformTarget {
    blocks: Mutex<BTreeMap<(String, String), Attributes>>,
}

impl TerraformTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource block; each type/name pair may be rendered once
    pub fn render_resource(
        &self,
        resource_type: &str,
        name: &str,
        attributes: Attributes,
    ) -> Result<()> {
        let mut blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = abandoned_call() {
            return Err(Error::Abandoned { task });
        }
        let key = (resource_type.to_string(), name.to_string());
        if blocks.contains_key(&key) {
            return Err(Error::DuplicateOutput {
                target: TargetKind::Terraform,
                name: format!("{resource_type}.{name}"),
            });
        }
        log::debug!("terraform: {resource_type}.{name} ({} attributes)", attributes.len());
        blocks.insert(key, attributes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of everything rendered so far, ordered by type then name
    pub fn finish(&self) -> TerraformOutput {
        let blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        TerraformOutput {
            blocks: blocks
                .iter()
                .map(|((resource_type, name), attributes)| TerraformBlock {
                    resource_type: resource_type.clone(),
                    name: name.clone(),
                    attributes: attributes.clone(),
                })
                .collect(),
        }
    }
}

/// Rendered Terraform configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerraformOutput {
    pub blocks: Vec<TerraformBlock>,
}

impl TerraformOutput {
    pub fn get(&self, resource_type: &str, name: &str) -> Option<&TerraformBlock> {
        self.blocks
            .iter()
            .find(|b| b.resource_type == resource_type && b.name == name)
    }

    /// Terraform JSON syntax (`main.tf.json`)
    pub fn to_json(&self) -> Json {
        let mut by_type: Map<String, Json> = Map::new();
        for block in &self.blocks {
            let entry = by_type
                .entry(block.resource_type.clone())
                .or_insert_with(|| Json::Object(Map::new()));
            if let Json::Object(names) = entry {
                names.insert(
                    block.name.clone(),
                    block.attributes.clone().into_value().to_terraform_json(),
                );
            }
        }
        let mut root = Map::new();
        if !by_type.is_empty() {
            root.insert("resource".to_string(), Json::Object(by_type));
        }
        Json::Object(root)
    }

    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.to_json())
    }

    /// Native HCL syntax (`main.tf`)
    pub fn to_hcl(&self) -> String {
        let mut out = String::new();
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&format!(
                "resource \"{}\" \"{}\" ",
                block.resource_type, block.name
            ));
            block.attributes.clone().into_value().write_hcl(&mut out, 0);
            out.push('\n');
        }
        out
    }
}

/// Terraform-safe resource name
///
/// Characters outside `[A-Za-z0-9_-]` become `_`, and names that would not
/// start with a letter or underscore get `prefix-` prepended.
pub fn resource_name(prefix: &str, name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.chars().next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => cleaned,
        _ => format!("{prefix}-{cleaned}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duplicate_block_rejected() {
        let target = TerraformTarget::new();
        target
            .render_resource("aws_route_table", "main", Attributes::new())
            .unwrap();
        let err = target
            .render_resource("aws_route_table", "main", Attributes::new())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateOutput { .. }));
        // Same name under another type is fine
        target
            .render_resource("aws_route", "main", Attributes::new())
            .unwrap();
        assert_eq!(target.len(), 2);
    }

    #[test]
    fn test_json_output_groups_by_type() {
        let target = TerraformTarget::new();
        target
            .render_resource(
                "aws_route",
                "route-0-0-0-0--0",
                Attributes::new()
                    .set("destination_cidr_block", "0.0.0.0/0")
                    .set("route_table_id", Link::terraform("aws_route_table", "main", "id")),
            )
            .unwrap();
        target
            .render_resource("aws_route_table", "main", Attributes::new().set("vpc_id", "vpc-1"))
            .unwrap();

        let out = target.finish();
        assert_eq!(
            out.to_json(),
            json!({
                "resource": {
                    "aws_route": {
                        "route-0-0-0-0--0": {
                            "destination_cidr_block": "0.0.0.0/0",
                            "route_table_id": "${aws_route_table.main.id}"
                        }
                    },
                    "aws_route_table": {
                        "main": { "vpc_id": "vpc-1" }
                    }
                }
            })
        );
    }

    #[test]
    fn test_hcl_output() {
        let target = TerraformTarget::new();
        target
            .render_resource(
                "aws_route",
                "route-private",
                Attributes::new()
                    .set("destination_cidr_block", "0.0.0.0/0")
                    .set("nat_gateway_id", Link::terraform("aws_nat_gateway", "a", "id")),
            )
            .unwrap();
        assert_eq!(
            target.finish().to_hcl(),
            "resource \"aws_route\" \"route-private\" {\n  destination_cidr_block = \"0.0.0.0/0\"\n  nat_gateway_id = aws_nat_gateway.a.id\n}\n"
        );
    }

    #[test]
    fn test_resource_name_prefixes_digits() {
        assert_eq!(resource_name("route", "0.0.0.0/0"), "route-0_0_0_0_0");
        assert_eq!(resource_name("route", "private"), "private");
        assert_eq!(resource_name("route", ""), "route-");
    }
}
