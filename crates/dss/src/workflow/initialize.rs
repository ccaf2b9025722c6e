use tracing::info;
use tracing::warn;

use super::cluster_api;
use super::Dss;
use super::WorkflowResult;
use crate::manifests::CoreTemplate;
use crate::manifests::ManifestApplier;
use crate::manifests::MlflowTemplate;
use crate::readiness::wait_for_ready;
use crate::readiness::PollError;
use crate::readiness::WorkloadIdentity;

impl Dss {
    /// Applies the namespace, the notebook volume claim and MLflow, then waits
    /// for MLflow to become ready. Safe to run again on an initialized
    /// cluster.
    ///
    /// If MLflow times out or cannot pull its image, everything applied here
    /// is deleted again before the error is returned.
    pub async fn initialize(&self) -> WorkflowResult<()> {
        let core = CoreTemplate::from_config(&self.config);
        let mlflow = MlflowTemplate::from_config(&self.config);
        let applier = ManifestApplier::new(
            self.cluster.as_ref(),
            &self.config.managed_by_labels,
            &[&core, &mlflow],
        );

        applier.apply().await.map_err(cluster_api)?;

        let identity = WorkloadIdentity::new(&self.config.namespace, &self.config.mlflow.name);
        let waited = wait_for_ready(
            self.cluster.as_ref(),
            self.clock.as_ref(),
            &identity,
            self.config.waits.initialize.poll_policy(),
        )
        .await;

        if let Err(report) = waited {
            if !matches!(report.current_context(), PollError::Cluster { .. }) {
                warn!(deployment = %identity, "{}. Deleting resources...", report.current_context());
                applier.delete().await;
            }
            return Err(self.poll_failure(report, &self.config.mlflow.image, Vec::new(), false));
        }

        info!(
            "DSS initialized. To create your first notebook run the command:\n\n  dss create\n\n\
             Examples:\n  dss create my-notebook --image=pytorch\n  dss create my-notebook --image={}",
            self.config.notebooks.default_image
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::cluster::mock::MockCluster;
    use crate::cluster::mock::MockOp;
    use crate::cluster::mock::Rollout;
    use crate::cluster::ResourceKind;
    use crate::cluster::ResourceRef;
    use crate::config::DssConfig;
    use crate::readiness::VirtualClock;
    use crate::workflow::WorkflowError;

    fn dss(cluster: &Arc<MockCluster>) -> Dss {
        Dss::new(
            cluster.clone(),
            Arc::new(VirtualClock::new()),
            DssConfig::default(),
        )
    }

    #[test(tokio::test)]
    async fn applies_core_and_mlflow() {
        let cluster = Arc::new(MockCluster::new());

        dss(&cluster).initialize().await.expect("initialize");

        assert_eq!(cluster.applied().len(), 4);
        assert!(cluster.contains(&ResourceRef::namespaced(
            ResourceKind::PersistentVolumeClaim,
            "dss",
            "notebooks"
        )));
        assert!(cluster.deleted().is_empty());
    }

    #[test(tokio::test)]
    async fn running_twice_is_harmless() {
        let cluster = Arc::new(MockCluster::new());
        let dss = dss(&cluster);

        dss.initialize().await.expect("first run");
        dss.initialize().await.expect("second run");

        assert_eq!(cluster.applied().len(), 8);
        assert!(cluster.deleted().is_empty());
    }

    #[test(tokio::test)]
    async fn timeout_deletes_what_was_applied() {
        let cluster = Arc::new(MockCluster::new());
        cluster.set_rollout("mlflow", Rollout::Pending);

        let report = dss(&cluster).initialize().await.expect_err("never ready");

        assert!(matches!(
            report.current_context(),
            WorkflowError::Timeout {
                resources_left: false,
                ..
            }
        ));
        assert_eq!(cluster.deleted().len(), 4);
        assert!(!cluster.contains(&ResourceRef::namespace("dss")));
    }

    #[test(tokio::test)]
    async fn apply_failure_reports_code_without_cleanup() {
        let cluster = Arc::new(MockCluster::new());
        cluster.fail(MockOp::Apply, 403);

        let report = dss(&cluster).initialize().await.expect_err("forbidden");

        assert!(matches!(
            report.current_context(),
            WorkflowError::ClusterApi { code: Some(403) }
        ));
        assert!(cluster.deleted().is_empty());
    }
}
