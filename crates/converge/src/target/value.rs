//! Attribute values for declarative output
//!
//! Values are either literals or symbolic links to another rendered resource.
//! Links are what make the emitted documents self-contained: a route refers to
//! `aws_route_table.main.id` rather than to a cloud id that may not exist yet.

use serde_json::{Value as Json, json};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Symbolic reference to another resource in the same document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    /// `resource_type.name.attribute`
    Terraform {
        resource_type: String,
        name: String,
        attribute: String,
    },
    /// `{"Ref": name}` or `{"Fn::GetAtt": [name, attribute]}`
    CloudFormation {
        logical_name: String,
        attribute: Option<String>,
    },
}

impl Link {
    pub fn terraform(resource_type: &str, name: &str, attribute: &str) -> Self {
        Link::Terraform {
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            attribute: attribute.to_string(),
        }
    }

    pub fn cloudformation_ref(logical_name: &str) -> Self {
        Link::CloudFormation {
            logical_name: logical_name.to_string(),
            attribute: None,
        }
    }

    pub fn cloudformation_attr(logical_name: &str, attribute: &str) -> Self {
        Link::CloudFormation {
            logical_name: logical_name.to_string(),
            attribute: Some(attribute.to_string()),
        }
    }

    /// Bare expression as written in HCL
    pub fn expression(&self) -> String {
        match self {
            Link::Terraform {
                resource_type,
                name,
                attribute,
            } => format!("{resource_type}.{name}.{attribute}"),
            Link::CloudFormation {
                logical_name,
                attribute: None,
            } => logical_name.clone(),
            Link::CloudFormation {
                logical_name,
                attribute: Some(attr),
            } => format!("{logical_name}.{attr}"),
        }
    }

    fn to_json(&self) -> Json {
        match self {
            Link::Terraform { .. } => Json::String(format!("${{{}}}", self.expression())),
            Link::CloudFormation {
                logical_name,
                attribute: None,
            } => json!({ "Ref": logical_name }),
            Link::CloudFormation {
                logical_name,
                attribute: Some(attr),
            } => json!({ "Fn::GetAtt": [logical_name, attr] }),
        }
    }
}

/// One attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Literal(Json),
    Link(Link),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// JSON form for Terraform (`.tf.json`); literal `${` is escaped.
    pub fn to_terraform_json(&self) -> Json {
        match self {
            Value::Literal(Json::String(s)) => Json::String(s.replace("${", "$${")),
            Value::Literal(v) => v.clone(),
            Value::Link(link) => link.to_json(),
            Value::List(items) => Json::Array(items.iter().map(Value::to_terraform_json).collect()),
            Value::Map(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_terraform_json()))
                    .collect(),
            ),
        }
    }

    /// JSON form for CloudFormation templates
    pub fn to_cloudformation_json(&self) -> Json {
        match self {
            Value::Literal(v) => v.clone(),
            Value::Link(link) => link.to_json(),
            Value::List(items) => {
                Json::Array(items.iter().map(Value::to_cloudformation_json).collect())
            }
            Value::Map(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_cloudformation_json()))
                    .collect(),
            ),
        }
    }

    pub(crate) fn write_hcl(&self, out: &mut String, indent: usize) {
        match self {
            Value::Literal(Json::String(s)) => {
                let escaped = Json::String(s.replace("${", "$${")).to_string();
                out.push_str(&escaped);
            }
            Value::Literal(Json::Array(items)) => {
                let items: Vec<Value> = items.iter().cloned().map(Value::Literal).collect();
                Value::List(items).write_hcl(out, indent);
            }
            Value::Literal(Json::Object(entries)) => {
                let entries = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::Literal(v.clone())))
                    .collect();
                Value::Map(entries).write_hcl(out, indent);
            }
            Value::Literal(v) => out.push_str(&v.to_string()),
            Value::Link(link) => out.push_str(&link.expression()),
            Value::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_hcl(out, indent);
                }
                out.push(']');
            }
            Value::Map(entries) => {
                if entries.is_empty() {
                    out.push_str("{}");
                    return;
                }
                out.push_str("{\n");
                for (k, v) in entries {
                    let _ = write!(out, "{:width$}{} = ", "", hcl_key(k), width = indent + 2);
                    v.write_hcl(out, indent + 2);
                    out.push('\n');
                }
                let _ = write!(out, "{:width$}}}", "", width = indent);
            }
        }
    }
}

fn hcl_key(key: &str) -> String {
    let bare = key
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if bare {
        key.to_string()
    } else {
        Json::String(key.to_string()).to_string()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Literal(Json::String(s.to_string()))
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Literal(Json::String(s.clone()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Literal(Json::String(s))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Literal(Json::Bool(b))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Literal(Json::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Literal(Json::from(n))
    }
}

impl From<Link> for Value {
    fn from(link: Link) -> Self {
        Value::Link(link)
    }
}

impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(items: Vec<V>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<V: Into<Value>> From<BTreeMap<String, V>> for Value {
    fn from(entries: BTreeMap<String, V>) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

/// Attributes (Terraform) or properties (CloudFormation) of one resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    entries: BTreeMap<String, Value>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Set the attribute only when a value is present
    pub fn opt<V: Into<Value>>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub(crate) fn into_value(self) -> Value {
        Value::Map(self.entries)
    }
}
