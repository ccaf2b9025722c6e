use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use derive_more::Display;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;

/// Name and namespace shared by a workload's Deployment and Service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
#[display("{namespace}/{name}")]
pub struct WorkloadIdentity {
    pub name: String,
    pub namespace: String,
}

impl WorkloadIdentity {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

/// The parts of a Deployment that readiness and listing look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSnapshot {
    pub name: String,
    pub desired_replicas: i32,
    pub current_replicas: i32,
    pub available_replicas: i32,
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub selector_labels: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// Image of the first container.
    pub image: Option<String>,
}

impl DeploymentSnapshot {
    /// A live Deployment with the given replica counts and nothing else set.
    pub fn with_replicas(name: &str, desired: i32, current: i32, available: i32) -> Self {
        Self {
            name: name.to_string(),
            desired_replicas: desired,
            current_replicas: current,
            available_replicas: available,
            deletion_timestamp: None,
            selector_labels: BTreeMap::new(),
            labels: BTreeMap::new(),
            image: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.desired_replicas == self.available_replicas
    }
}

impl From<&Deployment> for DeploymentSnapshot {
    fn from(deployment: &Deployment) -> Self {
        let spec = deployment.spec.as_ref();
        let status = deployment.status.as_ref();

        Self {
            name: deployment.metadata.name.clone().unwrap_or_default(),
            // The API server defaults an omitted replica count to one.
            desired_replicas: spec.and_then(|spec| spec.replicas).unwrap_or(1),
            current_replicas: status.and_then(|status| status.replicas).unwrap_or(0),
            available_replicas: status
                .and_then(|status| status.available_replicas)
                .unwrap_or(0),
            deletion_timestamp: deployment
                .metadata
                .deletion_timestamp
                .as_ref()
                .map(|time| time.0),
            selector_labels: spec
                .and_then(|spec| spec.selector.match_labels.clone())
                .unwrap_or_default(),
            labels: deployment.metadata.labels.clone().unwrap_or_default(),
            image: spec
                .and_then(|spec| spec.template.spec.as_ref())
                .and_then(|pod| pod.containers.first())
                .and_then(|container| container.image.clone()),
        }
    }
}

/// Why a container is not running yet, as reported by the kubelet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display)]
pub enum WaitingReason {
    #[display("ContainerCreating")]
    ContainerCreating,
    #[display("ImagePullBackOff")]
    ImagePullBackOff,
    #[display("ErrImagePull")]
    ErrImagePull,
    #[display("{_0}")]
    Other(String),
}

impl WaitingReason {
    pub const fn is_image_pull_failure(&self) -> bool {
        matches!(self, Self::ImagePullBackOff | Self::ErrImagePull)
    }
}

impl From<&str> for WaitingReason {
    fn from(reason: &str) -> Self {
        match reason {
            "ContainerCreating" => Self::ContainerCreating,
            "ImagePullBackOff" => Self::ImagePullBackOff,
            "ErrImagePull" => Self::ErrImagePull,
            other => Self::Other(other.to_string()),
        }
    }
}

/// First-container waiting state of one pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodStatusSnapshot {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub waiting_reason: Option<WaitingReason>,
}

impl From<&Pod> for PodStatusSnapshot {
    fn from(pod: &Pod) -> Self {
        let waiting_reason = pod
            .status
            .as_ref()
            .and_then(|status| status.container_statuses.as_ref())
            .and_then(|statuses| statuses.first())
            .and_then(|status| status.state.as_ref())
            .and_then(|state| state.waiting.as_ref())
            .and_then(|waiting| waiting.reason.as_deref())
            .map(WaitingReason::from);

        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            created_at: pod.metadata.creation_timestamp.as_ref().map(|time| time.0),
            waiting_reason,
        }
    }
}

/// Snapshots of `pods`, newest first. Pods without a creation time sort last.
pub fn pod_snapshots(pods: &[Pod]) -> Vec<PodStatusSnapshot> {
    let mut snapshots: Vec<PodStatusSnapshot> = pods.iter().map(PodStatusSnapshot::from).collect();
    snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.name.cmp(&b.name)));
    snapshots
}
