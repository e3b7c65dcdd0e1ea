//! Workspace Custom Resource Definition
//!
//! The Workspace CRD is the declarative input to the pod assembly core: an
//! ordered list of components plus a workspace-level attribute mapping.
//! This core only reads it; lifecycle state tracking lives elsewhere.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Attribute mapping attached to a workspace or component
///
/// Keys are unique; values are opaque structured documents that are decoded
/// on demand into typed values (e.g. a pod-override fragment).
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Attributes(
    /// Raw attribute values keyed by attribute name
    pub BTreeMap<String, serde_json::Value>,
);

impl Attributes {
    /// Returns true if no attributes are set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if the attribute key is present, without decoding it
    pub fn exists(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Decode the attribute value for `key` into a typed value
    ///
    /// Returns `Ok(None)` when the key is absent; decoding an attribute that
    /// is present but malformed is an error.
    pub fn get_into<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        match self.0.get(key) {
            Some(value) => serde_json::from_value(value.clone()).map(Some),
            None => Ok(None),
        }
    }
}

/// Specification for a Workspace
///
/// A workspace is an ordered sequence of components; component order is
/// significant and preserved by every pass in this crate.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "workbench.dev",
    version = "v1alpha1",
    kind = "Workspace",
    plural = "workspaces",
    shortname = "ws",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    /// Components making up the workspace, in declaration order
    #[serde(default)]
    pub components: Vec<Component>,

    /// Workspace-level attributes
    ///
    /// A pod-override fragment declared here is applied after every
    /// component-level fragment and therefore wins field-level conflicts.
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

/// One component of a workspace
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    /// Component name, unique within the workspace
    pub name: String,

    /// Component-level attributes
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl WorkspaceSpec {
    /// Validate the workspace specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        let mut seen = std::collections::BTreeSet::new();
        for component in &self.components {
            if component.name.is_empty() {
                return Err(crate::Error::serialization_for(
                    "Workspace",
                    "component name cannot be empty",
                ));
            }
            if !seen.insert(component.name.as_str()) {
                return Err(crate::Error::serialization_for(
                    "Workspace",
                    format!("duplicate component name: {}", component.name),
                ));
            }
        }
        Ok(())
    }
}
