use error_stack::Report;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::cluster_api;
use super::Dss;
use super::WorkflowError;
use super::WorkflowResult;
use crate::cluster::ResourceKind;

impl Dss {
    /// Scales notebook `name` up to one replica. Does not wait for it.
    pub async fn start(&self, name: &str) -> WorkflowResult<()> {
        self.scale_notebook(name, 1).await?;
        info!("Starting the notebook {name}. Check 'dss list' for the status of the notebook.");
        Ok(())
    }

    /// Scales notebook `name` down to zero replicas. Does not wait for it.
    pub async fn stop(&self, name: &str) -> WorkflowResult<()> {
        self.scale_notebook(name, 0).await?;
        info!("Stopping the notebook {name}. Check 'dss list' for the status of the notebook.");
        Ok(())
    }

    /// Only the Deployment can be scaled, so a notebook whose Deployment is
    /// gone is not found even while its Service lingers.
    async fn scale_notebook(&self, name: &str, replicas: i32) -> WorkflowResult<()> {
        let not_found = || WorkflowError::NotFound {
            name: name.to_string(),
        };
        if !self.exists(ResourceKind::Deployment, name).await? {
            return Err(Report::new(not_found()));
        }
        match self
            .cluster
            .scale_deployment(&self.config.namespace, name, replicas)
            .await
        {
            Ok(()) => Ok(()),
            Err(report) if report.current_context().is_not_found() => {
                Err(report.change_context(not_found()))
            }
            Err(report) => Err(cluster_api(report)),
        }
    }

    /// Deletes the Deployment and the Service of notebook `name`.
    ///
    /// Either one already being gone is fine. Other failures are collected
    /// and reported together once both deletes have been tried.
    pub async fn remove(&self, name: &str) -> WorkflowResult<()> {
        if !self.notebook_exists(name).await? {
            return Err(Report::new(WorkflowError::NotFound {
                name: name.to_string(),
            }));
        }

        let mut failure: Option<Report<WorkflowError>> = None;
        for kind in [ResourceKind::Deployment, ResourceKind::Service] {
            let resource = self.namespaced(kind, name);
            match self.cluster.delete(&resource).await {
                Ok(()) => {}
                Err(report) if report.current_context().is_not_found() => {
                    warn!(resource = %resource, "already deleted, ignoring");
                }
                Err(report) => {
                    error!(resource = %resource, "failed to delete: {}", report.current_context());
                    let report = cluster_api(report);
                    match failure.as_mut() {
                        Some(first) => first.extend_one(report),
                        None => failure = Some(report),
                    }
                }
            }
        }

        if let Some(report) = failure {
            return Err(report);
        }
        info!("Notebook {name} removed.");
        Ok(())
    }
}
