//! Automount secret resolution
//!
//! Secrets labelled `workbench.dev/mount-to-workspace=true` are attached to
//! every workspace pod in their namespace. The `workbench.dev/mount-as`
//! annotation selects how: as env-from sources, as one file mount per data
//! key (`subpath`), or as a single directory mount (`file`, the default).
//!
//! An unrecognized mount-as value is treated as `file` rather than raised as
//! an error: one misconfigured secret must not block every workspace start in
//! the namespace. Listing failures, by contrast, are hard errors propagated
//! unchanged.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    EnvFromSource, Secret, SecretEnvSource, SecretVolumeSource, Volume, VolumeMount,
};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::{Result, MOUNT_AS_ANNOTATION, MOUNT_LABEL_SELECTOR, MOUNT_PATH_ANNOTATION};

/// Directory secrets are mounted under when no mount-path annotation is set
const DEFAULT_MOUNT_DIR: &str = "/etc/secret";

/// File mode for secret volumes: read for owner and group, no world access
const SECRET_VOLUME_MODE: i32 = 0o640;

/// Trait abstracting the automount secret query
///
/// This is the one external call this core makes; abstracting it lets tests
/// mock the cluster while production code lists through a real client.
/// Cancellation, timeouts, and retries are owned by the caller's client.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretLister: Send + Sync {
    /// List the secrets labelled for automounting in a namespace
    async fn list_automount_secrets(&self, namespace: &str) -> Result<Vec<Secret>>;
}

/// Production secret lister backed by a Kubernetes client
pub struct ClusterSecretLister {
    client: Client,
}

impl ClusterSecretLister {
    /// Create a lister using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretLister for ClusterSecretLister {
    async fn list_automount_secrets(&self, namespace: &str) -> Result<Vec<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(MOUNT_LABEL_SELECTOR);
        let secrets = api.list(&params).await?;
        Ok(secrets.items)
    }
}

/// How a secret is exposed to workspace pods
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountMode {
    /// Inject every data key as an environment variable
    Env,
    /// Mount each data key as an individual file via sub-path
    Subpath,
    /// Mount the whole secret as a directory (the default)
    File,
}

impl MountMode {
    /// Read the mount mode from a secret's annotations
    ///
    /// Absent and unrecognized values both resolve to [`MountMode::File`].
    fn from_annotations(secret: &Secret) -> Self {
        match secret
            .annotations()
            .get(MOUNT_AS_ANNOTATION)
            .map(String::as_str)
        {
            Some("env") => Self::Env,
            Some("subpath") => Self::Subpath,
            Some("file") | None => Self::File,
            Some(other) => {
                warn!(
                    secret = %secret.name_any(),
                    mount_as = other,
                    "Unrecognized mount-as annotation, defaulting to file"
                );
                Self::File
            }
        }
    }
}

/// Volumes, mounts, and env sources derived from automount secrets
///
/// Built fresh per resolution call; applied to a pod spec by
/// [`AutomountResources::apply_to_pod_spec`](crate::assembly).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AutomountResources {
    /// Secret volumes to add to the pod
    pub volumes: Vec<Volume>,
    /// Mounts to add to every container
    pub volume_mounts: Vec<VolumeMount>,
    /// Env-from sources to add to every container
    pub env_from: Vec<EnvFromSource>,
}

impl AutomountResources {
    /// Returns true if resolution produced nothing to attach
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty() && self.volume_mounts.is_empty() && self.env_from.is_empty()
    }
}

/// Resolve the automount secrets of a namespace into pod resources
///
/// The result is deterministic for a given secret set: secrets are processed
/// in the order returned by the lister and subpath mounts follow the sorted
/// data-key order.
pub async fn resolve_automount_secrets(
    namespace: &str,
    lister: &dyn SecretLister,
) -> Result<AutomountResources> {
    let secrets = lister.list_automount_secrets(namespace).await?;

    let mut resources = AutomountResources::default();
    for secret in &secrets {
        let name = secret.name_any();
        match MountMode::from_annotations(secret) {
            MountMode::Env => {
                resources.env_from.push(secret_env_source(&name));
            }
            MountMode::Subpath => {
                resources.volumes.push(secret_volume(&name));
                resources
                    .volume_mounts
                    .extend(subpath_volume_mounts(&mount_path_for(secret), secret));
            }
            MountMode::File => {
                resources.volumes.push(secret_volume(&name));
                resources
                    .volume_mounts
                    .push(secret_volume_mount(&mount_path_for(secret), &name));
            }
        }
    }
    debug!(
        namespace,
        secrets = secrets.len(),
        volumes = resources.volumes.len(),
        mounts = resources.volume_mounts.len(),
        env_sources = resources.env_from.len(),
        "Resolved automount secrets"
    );
    Ok(resources)
}

/// Deterministic volume name for an automounted secret
///
/// Secret names are unique per namespace, so prefixing plus RFC 1123
/// sanitization is collision-free by construction. Every mount referencing
/// the secret uses this same name.
pub fn automount_volume_name(secret_name: &str) -> String {
    let sanitized: String = secret_name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("automount-secret-{}", sanitized.trim_matches('-'))
}

/// Mount path for a secret: the annotation, or `/etc/secret/<name>`
///
/// An annotation that is present but empty is treated as absent; an empty
/// mount path would be rejected by the API server, and a misconfigured
/// secret must not block workspace starts.
fn mount_path_for(secret: &Secret) -> String {
    secret
        .annotations()
        .get(MOUNT_PATH_ANNOTATION)
        .filter(|path| !path.is_empty())
        .cloned()
        .unwrap_or_else(|| format!("{}/{}", DEFAULT_MOUNT_DIR, secret.name_any()))
}

fn secret_volume(secret_name: &str) -> Volume {
    Volume {
        name: automount_volume_name(secret_name),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            default_mode: Some(SECRET_VOLUME_MODE),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn secret_volume_mount(mount_path: &str, secret_name: &str) -> VolumeMount {
    VolumeMount {
        name: automount_volume_name(secret_name),
        mount_path: mount_path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

/// One read-only mount per data key, each selecting its key via sub-path
fn subpath_volume_mounts(mount_path: &str, secret: &Secret) -> Vec<VolumeMount> {
    let volume_name = automount_volume_name(&secret.name_any());
    let base = mount_path.trim_end_matches('/');
    secret
        .data
        .iter()
        .flatten()
        .map(|(key, _)| VolumeMount {
            name: volume_name.clone(),
            mount_path: format!("{base}/{key}"),
            read_only: Some(true),
            sub_path: Some(key.clone()),
            ..Default::default()
        })
        .collect()
}

fn secret_env_source(secret_name: &str) -> EnvFromSource {
    EnvFromSource {
        secret_ref: Some(SecretEnvSource {
            name: secret_name.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    use crate::{Error, MOUNT_LABEL};

    // =========================================================================
    // Test Helpers
    // =========================================================================

    fn secret(name: &str, annotations: &[(&str, &str)], data_keys: &[&str]) -> Secret {
        let annotations: BTreeMap<String, String> = annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let data: BTreeMap<String, ByteString> = data_keys
            .iter()
            .map(|k| (k.to_string(), ByteString(b"redacted".to_vec())))
            .collect();
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("dev-team".to_string()),
                annotations: (!annotations.is_empty()).then_some(annotations),
                ..Default::default()
            },
            data: (!data.is_empty()).then_some(data),
            ..Default::default()
        }
    }

    fn lister_returning(secrets: Vec<Secret>) -> MockSecretLister {
        let mut lister = MockSecretLister::new();
        lister
            .expect_list_automount_secrets()
            .returning(move |_| Ok(secrets.clone()));
        lister
    }

    // =========================================================================
    // Label Constants
    // =========================================================================

    #[test]
    fn label_selector_matches_the_label_key() {
        assert_eq!(MOUNT_LABEL_SELECTOR, format!("{MOUNT_LABEL}=true"));
    }

    // =========================================================================
    // Mount Mode Classification
    // =========================================================================

    #[test]
    fn mount_mode_defaults_to_file_when_absent() {
        let s = secret("plain", &[], &["token"]);
        assert_eq!(MountMode::from_annotations(&s), MountMode::File);
    }

    #[test]
    fn mount_mode_reads_annotation() {
        let s = secret("db-creds", &[(MOUNT_AS_ANNOTATION, "env")], &[]);
        assert_eq!(MountMode::from_annotations(&s), MountMode::Env);

        let s = secret("tls-certs", &[(MOUNT_AS_ANNOTATION, "subpath")], &[]);
        assert_eq!(MountMode::from_annotations(&s), MountMode::Subpath);
    }

    #[test]
    fn unrecognized_mount_mode_defaults_to_file() {
        let s = secret("odd", &[(MOUNT_AS_ANNOTATION, "bogus")], &[]);
        assert_eq!(MountMode::from_annotations(&s), MountMode::File);
    }

    // =========================================================================
    // Volume Naming
    // =========================================================================

    #[test]
    fn volume_name_is_prefixed_and_sanitized() {
        assert_eq!(
            automount_volume_name("db-creds"),
            "automount-secret-db-creds"
        );
        assert_eq!(
            automount_volume_name("My.Registry_Auth"),
            "automount-secret-my-registry-auth"
        );
    }

    #[test]
    fn volume_name_is_deterministic() {
        assert_eq!(
            automount_volume_name("tls-certs"),
            automount_volume_name("tls-certs")
        );
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    #[tokio::test]
    async fn env_secret_yields_only_an_env_source() {
        let lister = lister_returning(vec![secret(
            "db-creds",
            &[(MOUNT_AS_ANNOTATION, "env")],
            &["username", "password"],
        )]);

        let resources = resolve_automount_secrets("dev-team", &lister)
            .await
            .expect("should resolve");
        assert!(resources.volumes.is_empty());
        assert!(resources.volume_mounts.is_empty());
        assert_eq!(resources.env_from.len(), 1);
        let secret_ref = resources.env_from[0].secret_ref.as_ref().expect("secretRef");
        assert_eq!(secret_ref.name, "db-creds");
    }

    #[tokio::test]
    async fn subpath_secret_yields_one_mount_per_key() {
        let lister = lister_returning(vec![secret(
            "tls-certs",
            &[(MOUNT_AS_ANNOTATION, "subpath")],
            &["cert.pem", "key.pem"],
        )]);

        let resources = resolve_automount_secrets("dev-team", &lister)
            .await
            .expect("should resolve");
        assert_eq!(resources.volumes.len(), 1);
        assert_eq!(resources.volumes[0].name, "automount-secret-tls-certs");

        assert_eq!(resources.volume_mounts.len(), 2);
        let paths: Vec<_> = resources
            .volume_mounts
            .iter()
            .map(|m| m.mount_path.as_str())
            .collect();
        assert_eq!(
            paths,
            vec!["/etc/secret/tls-certs/cert.pem", "/etc/secret/tls-certs/key.pem"]
        );
        for mount in &resources.volume_mounts {
            assert_eq!(mount.name, "automount-secret-tls-certs");
            assert_eq!(mount.read_only, Some(true));
        }
        assert_eq!(
            resources.volume_mounts[0].sub_path.as_deref(),
            Some("cert.pem")
        );
        assert_eq!(
            resources.volume_mounts[1].sub_path.as_deref(),
            Some("key.pem")
        );
    }

    #[tokio::test]
    async fn file_secret_yields_one_whole_secret_mount() {
        let lister = lister_returning(vec![secret("ssh-config", &[], &["config", "known_hosts"])]);

        let resources = resolve_automount_secrets("dev-team", &lister)
            .await
            .expect("should resolve");
        assert_eq!(resources.volumes.len(), 1);
        assert_eq!(resources.volume_mounts.len(), 1);
        assert!(resources.env_from.is_empty());

        let mount = &resources.volume_mounts[0];
        assert_eq!(mount.mount_path, "/etc/secret/ssh-config");
        assert_eq!(mount.read_only, Some(true));
        assert!(mount.sub_path.is_none());

        let source = resources.volumes[0].secret.as_ref().expect("secret source");
        assert_eq!(source.secret_name.as_deref(), Some("ssh-config"));
        assert_eq!(source.default_mode, Some(0o640));
    }

    #[tokio::test]
    async fn bogus_mount_mode_is_treated_as_file() {
        let lister = lister_returning(vec![secret(
            "odd",
            &[(MOUNT_AS_ANNOTATION, "bogus")],
            &["value"],
        )]);

        let resources = resolve_automount_secrets("dev-team", &lister)
            .await
            .expect("should resolve");
        assert_eq!(resources.volumes.len(), 1);
        assert_eq!(resources.volume_mounts.len(), 1);
        assert_eq!(resources.volume_mounts[0].mount_path, "/etc/secret/odd");
    }

    #[tokio::test]
    async fn mount_path_annotation_overrides_the_default() {
        let lister = lister_returning(vec![secret(
            "kube-config",
            &[(MOUNT_PATH_ANNOTATION, "/home/dev/.kube")],
            &["config"],
        )]);

        let resources = resolve_automount_secrets("dev-team", &lister)
            .await
            .expect("should resolve");
        assert_eq!(resources.volume_mounts[0].mount_path, "/home/dev/.kube");
    }

    #[tokio::test]
    async fn empty_mount_path_annotation_falls_back_to_default() {
        let lister = lister_returning(vec![secret(
            "ssh-config",
            &[(MOUNT_PATH_ANNOTATION, "")],
            &["config"],
        )]);

        let resources = resolve_automount_secrets("dev-team", &lister)
            .await
            .expect("should resolve");
        assert_eq!(resources.volume_mounts.len(), 1);
        assert_eq!(resources.volume_mounts[0].mount_path, "/etc/secret/ssh-config");
    }

    #[tokio::test]
    async fn mixed_secret_set_resolves_every_mode() {
        let lister = lister_returning(vec![
            secret("db-creds", &[(MOUNT_AS_ANNOTATION, "env")], &["password"]),
            secret(
                "tls-certs",
                &[(MOUNT_AS_ANNOTATION, "subpath")],
                &["cert.pem"],
            ),
            secret("ssh-config", &[], &["config"]),
        ]);

        let resources = resolve_automount_secrets("dev-team", &lister)
            .await
            .expect("should resolve");
        assert_eq!(resources.env_from.len(), 1);
        assert_eq!(resources.volumes.len(), 2);
        assert_eq!(resources.volume_mounts.len(), 2);
        assert!(!resources.is_empty());
    }

    #[tokio::test]
    async fn empty_secret_set_resolves_to_empty_resources() {
        let lister = lister_returning(vec![]);
        let resources = resolve_automount_secrets("dev-team", &lister)
            .await
            .expect("should resolve");
        assert!(resources.is_empty());
    }

    #[tokio::test]
    async fn list_failure_is_propagated() {
        let mut lister = MockSecretLister::new();
        lister
            .expect_list_automount_secrets()
            .returning(|_| Err(Error::serialization("list failed")));

        let err = resolve_automount_secrets("dev-team", &lister)
            .await
            .expect_err("listing failure must abort resolution");
        assert!(err.to_string().contains("list failed"));
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let secrets = vec![
            secret("db-creds", &[(MOUNT_AS_ANNOTATION, "env")], &["password"]),
            secret("ssh-config", &[], &["config"]),
        ];
        let lister = lister_returning(secrets);

        let first = resolve_automount_secrets("dev-team", &lister)
            .await
            .expect("first resolution");
        let second = resolve_automount_secrets("dev-team", &lister)
            .await
            .expect("second resolution");
        assert_eq!(first, second);
    }
}
