use derive_more::Display;

use super::snapshot::DeploymentSnapshot;
use super::snapshot::PodStatusSnapshot;
use super::snapshot::WaitingReason;

/// Lifecycle state of a workload as shown by `dss list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum LifecycleState {
    Active,
    Starting,
    Stopping,
    Stopped,
    Downloading,
    Removing,
    ErrImage,
    Unknown,
}

impl LifecycleState {
    pub const ALL: [Self; 8] = [
        Self::Active,
        Self::Starting,
        Self::Stopping,
        Self::Stopped,
        Self::Downloading,
        Self::Removing,
        Self::ErrImage,
        Self::Unknown,
    ];
}

/// Derives the lifecycle state from one read of a Deployment and its pods.
///
/// Checks, first match wins: deletion in progress, an image pull failure on
/// any pod, a pod still creating its container, then the replica counts.
pub fn classify(deployment: &DeploymentSnapshot, pods: &[PodStatusSnapshot]) -> LifecycleState {
    if deployment.deletion_timestamp.is_some() {
        return LifecycleState::Removing;
    }

    let reasons = || pods.iter().filter_map(|pod| pod.waiting_reason.as_ref());
    if reasons().any(WaitingReason::is_image_pull_failure) {
        return LifecycleState::ErrImage;
    }
    if reasons().any(|reason| *reason == WaitingReason::ContainerCreating) {
        return LifecycleState::Downloading;
    }

    classify_replicas(
        deployment.desired_replicas,
        deployment.current_replicas,
        deployment.available_replicas,
    )
}

fn classify_replicas(desired: i32, current: i32, available: i32) -> LifecycleState {
    if desired < 0 || current < 0 || available < 0 || desired > 1 {
        return LifecycleState::Unknown;
    }
    match (desired, current) {
        (0, 0) => LifecycleState::Stopped,
        (0, _) => LifecycleState::Stopping,
        (_, 0) => LifecycleState::Starting,
        _ if available < desired => LifecycleState::Starting,
        _ => LifecycleState::Active,
    }
}
