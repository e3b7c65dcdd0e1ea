//! Pod-override collection, sanitization, and composition
//!
//! Workspaces and their components may attach partial pod templates under the
//! `workbench.dev/pod-overrides` attribute. This module decodes those
//! fragments in precedence order (components in declaration order, then the
//! workspace-level fragment last), strips the fields that must never be
//! overridable, and folds the rest onto the baseline pod template with
//! strategic-merge semantics.
//!
//! The baseline's container list is saved before composition and restored
//! verbatim afterwards. A fragment that serializes an empty container list
//! (the field is not optional in the pod schema, so a cleared fragment still
//! emits `"containers": []`) therefore cannot destroy the baseline's
//! containers; the same restore step also covers init containers and volumes
//! cleared by sanitization.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};
use serde_json::Value;
use tracing::debug;

use crate::crd::Workspace;
use crate::error::Error;
use crate::{Result, POD_OVERRIDES_ATTRIBUTE};

/// Owner name used in errors for the workspace-level attribute
const WORKSPACE_OWNER: &str = "workspace";

/// Returns true if the workspace declares pod overrides anywhere
///
/// Pure existence check over the attribute mappings; no fragment is decoded.
/// Callers use this to skip the whole composition pass cheaply.
pub fn needs_pod_overrides(workspace: &Workspace) -> bool {
    workspace.spec.attributes.exists(POD_OVERRIDES_ATTRIBUTE)
        || workspace
            .spec
            .components
            .iter()
            .any(|c| c.attributes.exists(POD_OVERRIDES_ATTRIBUTE))
}

/// Collect every pod-override fragment declared on the workspace
///
/// Fragments are returned in precedence order: component fragments in
/// declaration order, then the workspace-level fragment last (so it wins any
/// field-level conflict once composed). Each fragment is sanitized before it
/// is returned. A decode failure aborts the whole collection; a malformed
/// override must not silently apply a partial set.
pub fn collect_overrides(workspace: &Workspace) -> Result<Vec<PodTemplateSpec>> {
    let mut overrides = Vec::new();
    for component in &workspace.spec.components {
        let fragment: Option<PodTemplateSpec> = component
            .attributes
            .get_into(POD_OVERRIDES_ATTRIBUTE)
            .map_err(|e| Error::override_parse(format!("component {}", component.name), e))?;
        if let Some(mut fragment) = fragment {
            sanitize(&mut fragment);
            overrides.push(fragment);
        }
    }
    let fragment: Option<PodTemplateSpec> = workspace
        .spec
        .attributes
        .get_into(POD_OVERRIDES_ATTRIBUTE)
        .map_err(|e| Error::override_parse(WORKSPACE_OWNER, e))?;
    if let Some(mut fragment) = fragment {
        sanitize(&mut fragment);
        overrides.push(fragment);
    }
    debug!(
        workspace = %workspace.metadata.name.as_deref().unwrap_or_default(),
        fragments = overrides.len(),
        "Collected pod-override fragments"
    );
    Ok(overrides)
}

/// Strip the fields that may never be overridden from a fragment
///
/// Containers, init containers, and volumes are owned by the baseline
/// template; clearing them here means the composer never has to special-case
/// fragment content.
pub fn sanitize(fragment: &mut PodTemplateSpec) {
    if let Some(spec) = fragment.spec.as_mut() {
        spec.containers = Vec::new();
        spec.init_containers = None;
        spec.volumes = None;
    }
}

/// Compose override fragments onto a baseline pod template
///
/// Fragments are applied in order; each merge result feeds the next, so later
/// fragments have strictly higher precedence on any field they touch. Scalars
/// replace, objects merge recursively, and lists whose entries carry a `name`
/// merge key are merged entry-by-entry. The baseline's container list is
/// restored verbatim after composition, whatever the fragments contained.
///
/// The result is a pure function of the inputs; the baseline is never
/// mutated.
pub fn compose(
    baseline: &PodTemplateSpec,
    fragments: &[PodTemplateSpec],
) -> Result<PodTemplateSpec> {
    if fragments.is_empty() {
        return Ok(baseline.clone());
    }

    let original_containers = baseline
        .spec
        .as_ref()
        .map(|s| s.containers.clone())
        .unwrap_or_default();

    let mut merged = serde_json::to_value(baseline)
        .map_err(|e| Error::serialization_for("PodTemplateSpec", e.to_string()))?;
    for (index, fragment) in fragments.iter().enumerate() {
        let patch =
            serde_json::to_value(fragment).map_err(|e| Error::compose(index, e))?;
        strategic_merge(&mut merged, patch);
    }

    let mut composed: PodTemplateSpec = serde_json::from_value(merged)
        .map_err(|e| Error::serialization_for("PodTemplateSpec", e.to_string()))?;

    if baseline.spec.is_some() {
        composed.spec.get_or_insert_with(PodSpec::default).containers = original_containers;
    } else if let Some(spec) = composed.spec.as_mut() {
        spec.containers = original_containers;
    }
    Ok(composed)
}

/// Apply every declared pod override to a deployment's pod template
///
/// The deployment is deep-copied; the caller's original is never mutated.
/// A deployment without a spec is returned unchanged - there is no template
/// to patch.
pub fn apply_pod_overrides(workspace: &Workspace, deployment: &Deployment) -> Result<Deployment> {
    let overrides = collect_overrides(workspace)?;
    let mut patched = deployment.clone();
    if let Some(deployment_spec) = patched.spec.as_mut() {
        deployment_spec.template = compose(&deployment_spec.template, &overrides)?;
    }
    Ok(patched)
}

/// Strategic merge of a fragment value onto a base value
///
/// - objects merge key-by-key; a `null` fragment value deletes the key
/// - lists whose entries all carry a string `name` are merged by that key:
///   matching entries merge recursively in place, unmatched fragment entries
///   append, unmatched base entries keep their relative order
/// - everything else (scalars, keyless or empty lists) replaces wholesale
fn strategic_merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                if patch_value.is_null() {
                    base_map.remove(&key);
                    continue;
                }
                match base_map.get_mut(&key) {
                    Some(base_value) => strategic_merge(base_value, patch_value),
                    None => {
                        base_map.insert(key, patch_value);
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(patch_items))
            if !patch_items.is_empty()
                && has_merge_key(&patch_items)
                && has_merge_key(base_items) =>
        {
            merge_named_list(base_items, patch_items);
        }
        (base_slot, patch) => *base_slot = patch,
    }
}

/// Returns true if every entry is an object carrying a string `name`
fn has_merge_key(items: &[Value]) -> bool {
    items
        .iter()
        .all(|item| item.get("name").is_some_and(Value::is_string))
}

/// Merge two lists entry-by-entry using `name` as the merge key
fn merge_named_list(base_items: &mut Vec<Value>, patch_items: Vec<Value>) {
    for patch_item in patch_items {
        let name = patch_item
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let existing = base_items
            .iter_mut()
            .find(|item| item.get("name").and_then(Value::as_str) == name.as_deref());
        match existing {
            Some(slot) => strategic_merge(slot, patch_item),
            None => base_items.push(patch_item),
        }
    }
}
