//! Final assembly of both pipelines onto a deployment
//!
//! Override composition and automount resolution are independent passes;
//! this module is where their outputs meet. It performs no decision logic:
//! the composed template replaces the deployment's template wholesale, then
//! automount volumes, mounts, and env sources are appended onto the already
//! invariant-preserving container and volume lists.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};

use crate::automount::AutomountResources;

impl AutomountResources {
    /// Append the resolved resources to a pod spec
    ///
    /// Volumes are added to the pod; mounts and env-from sources are added to
    /// every container and init container.
    pub fn apply_to_pod_spec(&self, pod_spec: &mut PodSpec) {
        if self.is_empty() {
            return;
        }
        if !self.volumes.is_empty() {
            pod_spec
                .volumes
                .get_or_insert_with(Vec::new)
                .extend(self.volumes.iter().cloned());
        }

        let init_containers = pod_spec.init_containers.iter_mut().flatten();
        for container in pod_spec.containers.iter_mut().chain(init_containers) {
            if !self.volume_mounts.is_empty() {
                container
                    .volume_mounts
                    .get_or_insert_with(Vec::new)
                    .extend(self.volume_mounts.iter().cloned());
            }
            if !self.env_from.is_empty() {
                container
                    .env_from
                    .get_or_insert_with(Vec::new)
                    .extend(self.env_from.iter().cloned());
            }
        }
    }
}

/// Combine both pipeline outputs onto a fresh copy of a deployment
///
/// Either input may be absent: a workspace can have overrides without
/// automount secrets and vice versa. The caller's deployment is never
/// mutated.
pub fn assemble_deployment(
    deployment: &Deployment,
    template: Option<PodTemplateSpec>,
    automount: Option<&AutomountResources>,
) -> Deployment {
    let mut assembled = deployment.clone();
    if let Some(spec) = assembled.spec.as_mut() {
        if let Some(template) = template {
            spec.template = template;
        }
        if let Some(resources) = automount {
            if let Some(pod_spec) = spec.template.spec.as_mut() {
                resources.apply_to_pod_spec(pod_spec);
            }
        }
    }
    assembled
}
