//! Workbench - pod assembly core for the Workbench workspace operator
//!
//! This crate builds the final pod template used to launch a workspace's
//! runtime container set. Two independent modification sources are composed
//! onto a baseline deployment before the pod is created:
//!
//! - Structured pod-override fragments declared on workspace components and
//!   on the workspace itself, folded onto the baseline template with
//!   strategic-merge semantics ([`overrides`])
//! - Cluster secrets labelled for automatic mounting, translated into
//!   volumes, volume mounts, and env-from sources ([`automount`])
//!
//! Both passes are independent; their outputs are combined onto the caller's
//! deployment by [`assembly`]. The reconciliation loop that drives this
//! logic, API-server retries, and namespace/RBAC provisioning live outside
//! this crate.
//!
//! # Modules
//!
//! - [`crd`] - Workspace Custom Resource Definition (input model)
//! - [`overrides`] - Pod-override collection, sanitization, and composition
//! - [`automount`] - Automount secret resolution
//! - [`assembly`] - Final assembly of both passes onto a deployment
//! - [`error`] - Error types for the pod assembly core

pub mod assembly;
pub mod automount;
pub mod crd;
pub mod error;
pub mod overrides;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Attribute key carrying a pod-override fragment on a component or workspace
pub const POD_OVERRIDES_ATTRIBUTE: &str = "workbench.dev/pod-overrides";

/// Label key marking a secret for automatic mounting into workspace pods
pub const MOUNT_LABEL: &str = "workbench.dev/mount-to-workspace";

/// Label selector for automount secrets (for Kubernetes API queries)
pub const MOUNT_LABEL_SELECTOR: &str = "workbench.dev/mount-to-workspace=true";

/// Annotation key selecting how a secret is exposed (`env`, `subpath`, `file`)
pub const MOUNT_AS_ANNOTATION: &str = "workbench.dev/mount-as";

/// Annotation key overriding the path a secret is mounted at
pub const MOUNT_PATH_ANNOTATION: &str = "workbench.dev/mount-path";
