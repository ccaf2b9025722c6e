use std::collections::BTreeMap;

use error_stack::Report;
use tracing::warn;

use super::cluster_api;
use super::Dss;
use super::LogTarget;
use super::WorkflowError;
use super::WorkflowResult;
use crate::cluster::OptionalExt;
use crate::config::GpuKind;
use crate::readiness::classify;
use crate::readiness::snapshot::pod_snapshots;
use crate::readiness::DeploymentSnapshot;
use crate::readiness::LifecycleState;
use crate::readiness::PodStatusSnapshot;

/// One row of `dss list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookSummary {
    pub name: String,
    pub image: String,
    pub state: LifecycleState,
    /// Only known while at least one replica is available.
    pub url: Option<String>,
}

/// What `dss status` reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub mlflow_ready: bool,
    pub mlflow_url: Option<String>,
    /// GPU product name when the node is set up for acceleration.
    pub gpu: Option<String>,
}

/// Log lines of one pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodLogs {
    pub workload: String,
    pub pod: String,
    pub lines: Vec<String>,
}

impl Dss {
    /// Every notebook in the namespace, sorted by name.
    pub async fn list(&self) -> WorkflowResult<Vec<NotebookSummary>> {
        let deployments = self
            .cluster
            .list_deployments(&self.config.namespace)
            .await
            .map_err(cluster_api)?;

        let mut notebooks = Vec::new();
        for deployment in deployments
            .iter()
            .map(DeploymentSnapshot::from)
            .filter(|snapshot| snapshot.labels.contains_key(&self.config.notebooks.label))
        {
            let pods = self.pods_of(&deployment.selector_labels).await?;
            let url = if deployment.available_replicas > 0 {
                self.service_url(&deployment.name).await?
            } else {
                None
            };
            notebooks.push(NotebookSummary {
                state: classify(&deployment, &pods),
                image: deployment.image.clone().unwrap_or_default(),
                name: deployment.name,
                url,
            });
        }
        notebooks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(notebooks)
    }

    /// MLflow presence and GPU acceleration of the single cluster node.
    pub async fn status(&self) -> WorkflowResult<StatusReport> {
        let mlflow_ready = self
            .cluster
            .get_deployment(&self.config.namespace, &self.config.mlflow.name)
            .await
            .map_err(cluster_api)?
            .is_some();
        let mlflow_url = if mlflow_ready {
            self.service_url(&self.config.mlflow.name).await?
        } else {
            None
        };

        let labels = self.single_node_labels().await?;
        let profile = self.config.gpu.profile(GpuKind::Nvidia);
        let gpu = profile
            .is_enabled_on(&labels)
            .then(|| profile.product_name(&labels));

        Ok(StatusReport {
            mlflow_ready,
            mlflow_url,
            gpu,
        })
    }

    /// Log lines of every pod behind `target`.
    ///
    /// With [`LogTarget::All`] a notebook without pods is skipped; MLflow
    /// must still be deployed.
    pub async fn logs(&self, target: &LogTarget) -> WorkflowResult<Vec<PodLogs>> {
        match target {
            LogTarget::Notebook(name) => self.notebook_logs(name).await,
            LogTarget::Mlflow => self.mlflow_logs().await,
            LogTarget::All => {
                let mut logs = self.mlflow_logs().await?;
                for notebook in self.list().await? {
                    match self.notebook_logs(&notebook.name).await {
                        Ok(pod_logs) => logs.extend(pod_logs),
                        Err(report)
                            if matches!(
                                report.current_context(),
                                WorkflowError::NoPods { .. } | WorkflowError::NotFound { .. }
                            ) =>
                        {
                            warn!(notebook = notebook.name, "{}", report.current_context());
                        }
                        Err(report) => return Err(report),
                    }
                }
                Ok(logs)
            }
        }
    }

    async fn notebook_logs(&self, name: &str) -> WorkflowResult<Vec<PodLogs>> {
        let missing = || {
            Report::new(WorkflowError::NotFound {
                name: name.to_string(),
            })
        };
        self.workload_logs(name, "dss create", missing).await
    }

    async fn mlflow_logs(&self) -> WorkflowResult<Vec<PodLogs>> {
        let missing = || {
            Report::new(WorkflowError::NotInitialized {
                namespace: self.config.namespace.clone(),
            })
        };
        self.workload_logs(&self.config.mlflow.name, "dss initialize", missing)
            .await
    }

    async fn workload_logs<F>(
        &self,
        name: &str,
        recreate_with: &'static str,
        missing: F,
    ) -> WorkflowResult<Vec<PodLogs>>
    where
        F: FnOnce() -> Report<WorkflowError>,
    {
        let deployment = self
            .cluster
            .get_deployment(&self.config.namespace, name)
            .await
            .map_err(cluster_api)?
            .ok_or_else(missing)?;
        let snapshot = DeploymentSnapshot::from(&deployment);

        let pods = self.pods_of(&snapshot.selector_labels).await?;
        if pods.is_empty() {
            return Err(Report::new(WorkflowError::NoPods {
                workload: name.to_string(),
                recreate_with,
            }));
        }

        let mut logs = Vec::with_capacity(pods.len());
        for pod in pods {
            let lines = self
                .cluster
                .pod_logs(&self.config.namespace, &pod.name)
                .await
                .map_err(cluster_api)?;
            logs.push(PodLogs {
                workload: name.to_string(),
                pod: pod.name,
                lines,
            });
        }
        Ok(logs)
    }

    /// Pods matching `selector`, newest first. An empty selector matches
    /// nothing.
    async fn pods_of(
        &self,
        selector: &BTreeMap<String, String>,
    ) -> WorkflowResult<Vec<PodStatusSnapshot>> {
        if selector.is_empty() {
            return Ok(Vec::new());
        }
        let pods = self
            .cluster
            .list_pods(&self.config.namespace, selector)
            .await
            .optional()
            .map_err(cluster_api)?
            .unwrap_or_default();
        Ok(pod_snapshots(&pods))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::cluster::mock::node;
    use crate::cluster::mock::MockCluster;
    use crate::cluster::mock::MockOp;
    use crate::config::DssConfig;
    use crate::readiness::VirtualClock;

    async fn initialized() -> (Arc<MockCluster>, Dss) {
        let cluster = Arc::new(MockCluster::new());
        let dss = Dss::new(
            cluster.clone(),
            Arc::new(VirtualClock::new()),
            DssConfig::default(),
        );
        dss.initialize().await.expect("initialize");
        (cluster, dss)
    }

    #[test(tokio::test)]
    async fn list_shows_only_notebooks_with_state_and_url() {
        let (_cluster, dss) = initialized().await;
        dss.create_notebook("nb2", Some("pytorch"), None)
            .await
            .expect("create nb2");
        dss.create_notebook("nb1", None, None)
            .await
            .expect("create nb1");
        dss.stop("nb2").await.expect("stop");

        let notebooks = dss.list().await.expect("list");

        assert_eq!(
            notebooks
                .iter()
                .map(|nb| (nb.name.as_str(), nb.state, nb.url.is_some()))
                .collect::<Vec<_>>(),
            vec![
                ("nb1", LifecycleState::Active, true),
                ("nb2", LifecycleState::Stopped, false),
            ]
        );
        assert_eq!(
            notebooks[1].image,
            "kubeflownotebookswg/jupyter-pytorch-full:v1.8.0"
        );
    }

    #[test(tokio::test)]
    async fn list_on_empty_namespace_is_empty() {
        let cluster = Arc::new(MockCluster::new());
        let dss = Dss::new(cluster, Arc::new(VirtualClock::new()), DssConfig::default());
        assert!(dss.list().await.expect("list").is_empty());
    }

    #[test(tokio::test)]
    async fn status_reports_mlflow_and_gpu() {
        let (cluster, dss) = initialized().await;
        cluster.set_nodes(vec![node(
            "node-0",
            &[
                ("nvidia.com/gpu.present", "true"),
                ("nvidia.com/gpu.deploy.container-toolkit", "true"),
                ("nvidia.com/gpu.deploy.device-plugin", "true"),
                ("nvidia.com/gpu.product", "Tesla-T4"),
            ],
        )]);

        let status = dss.status().await.expect("status");

        assert_eq!(
            status,
            StatusReport {
                mlflow_ready: true,
                mlflow_url: Some("http://10.152.183.10:5000".to_string()),
                gpu: Some("Tesla-T4".to_string()),
            }
        );
    }

    #[test(tokio::test)]
    async fn status_without_nodes_fails() {
        let (cluster, dss) = initialized().await;
        cluster.set_nodes(Vec::new());

        let report = dss.status().await.expect_err("no nodes");

        assert!(matches!(
            report.current_context(),
            WorkflowError::UnsupportedTopology { nodes: 0 }
        ));
    }

    #[test(tokio::test)]
    async fn status_keeps_the_code_of_a_forbidden_node_listing() {
        let (cluster, dss) = initialized().await;
        cluster.fail(MockOp::Nodes, 403);

        let report = dss.status().await.expect_err("nodes are forbidden");

        assert!(matches!(
            report.current_context(),
            WorkflowError::ClusterApi { code: Some(403) }
        ));
    }

    #[test(tokio::test)]
    async fn logs_of_each_target() {
        let (cluster, dss) = initialized().await;
        dss.create_notebook("nb1", None, None)
            .await
            .expect("create");
        cluster.set_logs(&MockCluster::pod_name("mlflow"), &["mlflow up"]);
        cluster.set_logs(&MockCluster::pod_name("nb1"), &["jupyter up", "ready"]);

        let notebook = dss
            .logs(&LogTarget::Notebook("nb1".to_string()))
            .await
            .expect("notebook logs");
        assert_eq!(notebook.len(), 1);
        assert_eq!(notebook[0].lines, vec!["jupyter up", "ready"]);

        let all = dss.logs(&LogTarget::All).await.expect("all logs");
        let workloads: Vec<&str> = all.iter().map(|logs| logs.workload.as_str()).collect();
        assert_eq!(workloads, vec!["mlflow", "nb1"]);
    }

    #[test(tokio::test)]
    async fn logs_of_missing_targets() {
        let cluster = Arc::new(MockCluster::new());
        let dss = Dss::new(cluster, Arc::new(VirtualClock::new()), DssConfig::default());

        let report = dss
            .logs(&LogTarget::Mlflow)
            .await
            .expect_err("not initialized");
        assert!(matches!(
            report.current_context(),
            WorkflowError::NotInitialized { .. }
        ));

        let report = dss
            .logs(&LogTarget::Notebook("ghost".to_string()))
            .await
            .expect_err("no notebook");
        assert!(matches!(
            report.current_context(),
            WorkflowError::NotFound { .. }
        ));
    }

    #[test(tokio::test)]
    async fn stopped_notebook_has_no_pods_to_log() {
        let (_cluster, dss) = initialized().await;
        dss.create_notebook("nb1", None, None)
            .await
            .expect("create");
        dss.stop("nb1").await.expect("stop");

        let report = dss
            .logs(&LogTarget::Notebook("nb1".to_string()))
            .await
            .expect_err("no pods");

        assert!(matches!(
            report.current_context(),
            WorkflowError::NoPods { .. }
        ));
    }
}
