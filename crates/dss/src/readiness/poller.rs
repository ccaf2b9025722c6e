use core::error::Error;
use std::collections::BTreeMap;
use std::time::Duration;

use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::info;

use super::clock::Clock;
use super::snapshot::pod_snapshots;
use super::snapshot::DeploymentSnapshot;
use super::snapshot::PodStatusSnapshot;
use super::snapshot::WaitingReason;
use super::snapshot::WorkloadIdentity;
use crate::cluster::Cluster;
use crate::cluster::OptionalExt;

/// How long and how often to poll. `timeout: None` polls until the
/// Deployment converges or fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub timeout: Option<Duration>,
    pub interval: Duration,
}

#[derive(Debug, Display)]
pub enum PollError {
    #[display(
        "Timed out after {}s waiting for Deployment {name} in namespace {namespace} to be ready",
        elapsed.as_secs()
    )]
    Timeout {
        name: String,
        namespace: String,
        elapsed: Duration,
    },
    #[display("Pod {pod} of Deployment {name} cannot pull its image ({reason})")]
    ImagePullBackOff {
        name: String,
        pod: String,
        reason: WaitingReason,
    },
    #[display("Failed to read the state of Deployment {name}")]
    Cluster { name: String },
}

impl Error for PollError {}

/// Outcome of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep {
    Continue,
    Ready,
    ImagePullBackOff { pod: String, reason: WaitingReason },
}

/// Decides what one observation means. A missing Deployment is not ready yet.
/// `pods` are expected newest first; the first one failing to pull wins.
pub fn step(deployment: Option<&DeploymentSnapshot>, pods: &[PodStatusSnapshot]) -> PollStep {
    let Some(deployment) = deployment else {
        return PollStep::Continue;
    };
    if deployment.is_ready() {
        return PollStep::Ready;
    }
    pods.iter()
        .find_map(|pod| {
            pod.waiting_reason
                .as_ref()
                .filter(|reason| reason.is_image_pull_failure())
                .map(|reason| PollStep::ImagePullBackOff {
                    pod: pod.name.clone(),
                    reason: reason.clone(),
                })
        })
        .unwrap_or(PollStep::Continue)
}

/// Polls the Deployment named by `identity` until its available replicas
/// match the desired count.
///
/// A timeout is reported once another sleep would take the loop past it, so
/// a Deployment that never converges is read between `timeout / interval`
/// and `timeout / interval + 1` times.
///
/// # Errors
///
/// - [`PollError::ImagePullBackOff`] as soon as a pod fails to pull its image
/// - [`PollError::Timeout`] when `policy.timeout` runs out
/// - [`PollError::Cluster`] when the Deployment or its pods cannot be read
pub async fn wait_for_ready(
    cluster: &dyn Cluster,
    clock: &dyn Clock,
    identity: &WorkloadIdentity,
    policy: PollPolicy,
) -> Result<(), Report<PollError>> {
    let start = clock.elapsed();
    let mut polls = 0_u32;

    loop {
        polls += 1;
        let deployment = cluster
            .get_deployment(&identity.namespace, &identity.name)
            .await
            .change_context_lazy(|| PollError::Cluster {
                name: identity.name.clone(),
            })?
            .as_ref()
            .map(DeploymentSnapshot::from);

        let pods = match &deployment {
            Some(snapshot) if !snapshot.is_ready() => {
                current_pods(cluster, identity, &snapshot.selector_labels).await?
            }
            _ => Vec::new(),
        };

        match step(deployment.as_ref(), &pods) {
            PollStep::Ready => {
                info!(deployment = %identity, polls, "deployment is ready");
                return Ok(());
            }
            PollStep::ImagePullBackOff { pod, reason } => {
                return Err(Report::new(PollError::ImagePullBackOff {
                    name: identity.name.clone(),
                    pod,
                    reason,
                }));
            }
            PollStep::Continue => {}
        }

        let elapsed = clock.elapsed().saturating_sub(start);
        if let Some(timeout) = policy.timeout {
            if elapsed + policy.interval > timeout {
                return Err(Report::new(PollError::Timeout {
                    name: identity.name.clone(),
                    namespace: identity.namespace.clone(),
                    elapsed,
                })
                .attach_printable(format!("polled {polls} times")));
            }
        }

        debug!(
            deployment = %identity,
            elapsed_secs = elapsed.as_secs(),
            "waiting for deployment to be ready"
        );
        clock.sleep(policy.interval).await;
    }
}

async fn current_pods(
    cluster: &dyn Cluster,
    identity: &WorkloadIdentity,
    selector: &BTreeMap<String, String>,
) -> Result<Vec<PodStatusSnapshot>, Report<PollError>> {
    // An empty selector would match every pod in the namespace.
    if selector.is_empty() {
        return Ok(Vec::new());
    }
    let pods = cluster
        .list_pods(&identity.namespace, selector)
        .await
        .optional()
        .change_context_lazy(|| PollError::Cluster {
            name: identity.name.clone(),
        })?
        .unwrap_or_default();
    Ok(pod_snapshots(&pods))
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::cluster::mock::MockCluster;
    use crate::cluster::mock::MockOp;
    use crate::cluster::mock::Rollout;
    use crate::config::DssConfig;
    use crate::manifests::CoreTemplate;
    use crate::manifests::MlflowTemplate;
    use crate::manifests::Template;
    use crate::readiness::clock::VirtualClock;

    async fn cluster_with_mlflow(rollout: Rollout) -> MockCluster {
        let config = DssConfig::default();
        let cluster = MockCluster::new();
        let core = CoreTemplate::from_config(&config);
        let mlflow = MlflowTemplate::from_config(&config);
        for resource in core.render().iter().chain(mlflow.render().iter()) {
            cluster.apply(resource).await.expect("apply");
        }
        cluster.set_rollout("mlflow", rollout);
        cluster
    }

    fn mlflow() -> WorkloadIdentity {
        WorkloadIdentity::new("dss", "mlflow")
    }

    fn policy(timeout_secs: u64, interval_secs: u64) -> PollPolicy {
        PollPolicy {
            timeout: Some(Duration::from_secs(timeout_secs)),
            interval: Duration::from_secs(interval_secs),
        }
    }

    #[test(tokio::test)]
    async fn never_ready_times_out_within_poll_bounds() {
        for (timeout, interval) in [(2, 1), (10, 3), (300, 5)] {
            let cluster = cluster_with_mlflow(Rollout::Pending).await;
            let clock = VirtualClock::new();

            let report = wait_for_ready(&cluster, &clock, &mlflow(), policy(timeout, interval))
                .await
                .expect_err("never ready");

            assert!(matches!(
                report.current_context(),
                PollError::Timeout { name, .. } if name == "mlflow"
            ));
            let polls = cluster.deployment_gets() as u64;
            assert!(
                polls * interval >= timeout && polls <= timeout / interval + 1,
                "{polls} polls for timeout {timeout}s and interval {interval}s"
            );
        }
    }

    #[test(tokio::test)]
    async fn two_second_timeout_with_one_second_interval_polls_three_times() {
        let cluster = cluster_with_mlflow(Rollout::Pending).await;
        let clock = VirtualClock::new();

        let _ = wait_for_ready(&cluster, &clock, &mlflow(), policy(2, 1)).await;

        assert_eq!(cluster.deployment_gets(), 3);
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test(tokio::test)]
    async fn image_pull_failure_stops_before_sleeping() {
        let cluster =
            cluster_with_mlflow(Rollout::Waiting("ImagePullBackOff".to_string())).await;
        let clock = VirtualClock::new();

        let report = wait_for_ready(&cluster, &clock, &mlflow(), policy(300, 5))
            .await
            .expect_err("image cannot be pulled");

        assert!(matches!(
            report.current_context(),
            PollError::ImagePullBackOff { reason: WaitingReason::ImagePullBackOff, .. }
        ));
        assert_eq!(cluster.deployment_gets(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[test(tokio::test)]
    async fn image_pull_failure_seen_later_stops_within_one_interval() {
        let cluster = cluster_with_mlflow(Rollout::WaitingAfter(
            4,
            "ErrImagePull".to_string(),
        ))
        .await;
        let clock = VirtualClock::new();

        let report = wait_for_ready(&cluster, &clock, &mlflow(), policy(300, 5))
            .await
            .expect_err("image cannot be pulled");

        assert!(matches!(
            report.current_context(),
            PollError::ImagePullBackOff { reason: WaitingReason::ErrImagePull, .. }
        ));
        assert_eq!(cluster.deployment_gets(), 4);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5); 3]);
    }

    #[test(tokio::test)]
    async fn missing_pod_list_counts_as_no_pods_yet() {
        let cluster = cluster_with_mlflow(Rollout::ReadyAfter(3)).await;
        cluster.fail(MockOp::Pods, 404);
        let clock = VirtualClock::new();

        wait_for_ready(&cluster, &clock, &mlflow(), policy(300, 5))
            .await
            .expect("pods not listed yet is not an error");

        assert_eq!(cluster.deployment_gets(), 3);
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test(tokio::test)]
    async fn missing_pod_list_still_times_out() {
        let cluster = cluster_with_mlflow(Rollout::Pending).await;
        cluster.fail(MockOp::Pods, 404);
        let clock = VirtualClock::new();

        let report = wait_for_ready(&cluster, &clock, &mlflow(), policy(2, 1))
            .await
            .expect_err("never ready");

        assert!(matches!(
            report.current_context(),
            PollError::Timeout { .. }
        ));
    }

    #[test(tokio::test)]
    async fn failing_pod_list_is_a_cluster_error() {
        let cluster = cluster_with_mlflow(Rollout::Pending).await;
        cluster.fail(MockOp::Pods, 500);
        let clock = VirtualClock::new();

        let report = wait_for_ready(&cluster, &clock, &mlflow(), policy(10, 1))
            .await
            .expect_err("pods cannot be listed");

        assert!(matches!(
            report.current_context(),
            PollError::Cluster { name } if name == "mlflow"
        ));
    }

    #[test(tokio::test)]
    async fn becomes_ready_after_a_few_polls() {
        let cluster = cluster_with_mlflow(Rollout::ReadyAfter(3)).await;
        let clock = VirtualClock::new();
        let unbounded = PollPolicy {
            timeout: None,
            interval: Duration::from_secs(5),
        };

        wait_for_ready(&cluster, &clock, &mlflow(), unbounded)
            .await
            .expect("ready on third read");

        assert_eq!(cluster.deployment_gets(), 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(5); 2]);
    }

    #[test(tokio::test)]
    async fn read_failure_is_a_cluster_error() {
        let cluster = cluster_with_mlflow(Rollout::Pending).await;
        cluster.fail(MockOp::Get, 500);
        let clock = VirtualClock::new();

        let report = wait_for_ready(&cluster, &clock, &mlflow(), policy(10, 1))
            .await
            .expect_err("read fails");

        assert!(matches!(
            report.current_context(),
            PollError::Cluster { .. }
        ));
    }

    fn waiting(name: &str, reason: WaitingReason) -> PodStatusSnapshot {
        PodStatusSnapshot {
            name: name.to_string(),
            created_at: None,
            waiting_reason: Some(reason),
        }
    }

    #[test]
    fn missing_deployment_keeps_polling() {
        assert_eq!(step(None, &[]), PollStep::Continue);
    }

    #[test]
    fn ready_when_available_matches_desired() {
        let deployment = DeploymentSnapshot::with_replicas("nb1", 1, 1, 1);
        let pods = [waiting("nb1-0", WaitingReason::ErrImagePull)];
        assert_eq!(step(Some(&deployment), &pods), PollStep::Ready);
    }

    #[test]
    fn any_pod_failing_to_pull_stops_polling() {
        let deployment = DeploymentSnapshot::with_replicas("nb1", 1, 2, 0);
        let pods = [
            waiting("nb1-new", WaitingReason::ContainerCreating),
            waiting("nb1-old", WaitingReason::ImagePullBackOff),
        ];
        assert_eq!(
            step(Some(&deployment), &pods),
            PollStep::ImagePullBackOff {
                pod: "nb1-old".to_string(),
                reason: WaitingReason::ImagePullBackOff,
            }
        );
    }

    #[test]
    fn container_creating_keeps_polling() {
        let deployment = DeploymentSnapshot::with_replicas("nb1", 1, 1, 0);
        let pods = [waiting("nb1-0", WaitingReason::ContainerCreating)];
        assert_eq!(step(Some(&deployment), &pods), PollStep::Continue);
    }
}
