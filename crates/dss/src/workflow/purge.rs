use std::time::Duration;

use error_stack::Report;
use tracing::debug;
use tracing::info;

use super::cluster_api;
use super::Dss;
use super::WorkflowError;
use super::WorkflowResult;
use crate::cluster::OptionalExt;
use crate::cluster::ResourceRef;

impl Dss {
    /// Deletes the namespace with every notebook and MLflow in it, then waits
    /// until the API server no longer reports it.
    pub async fn purge(&self) -> WorkflowResult<()> {
        let namespace = ResourceRef::namespace(&self.config.namespace);
        if !self.cluster.exists(&namespace).await.map_err(cluster_api)? {
            return Err(Report::new(WorkflowError::NotInitialized {
                namespace: self.config.namespace.clone(),
            }));
        }

        // A namespace that vanished between the check and the delete is fine.
        self.cluster
            .delete(&namespace)
            .await
            .optional()
            .map_err(cluster_api)?;

        let interval = Duration::from_secs(self.config.waits.purge_interval_secs);
        while self.cluster.exists(&namespace).await.map_err(cluster_api)? {
            debug!(namespace = %self.config.namespace, "waiting for namespace to be deleted");
            self.clock.sleep(interval).await;
        }

        info!("Success: All DSS components and notebooks purged successfully from the Kubernetes cluster.");
        Ok(())
    }
}
