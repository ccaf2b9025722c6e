use error_stack::Report;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::cluster_api;
use super::Dss;
use super::WorkflowError;
use super::WorkflowResult;
use crate::cluster::ResourceKind;
use crate::config::GpuKind;
use crate::manifests::ManifestApplier;
use crate::manifests::NotebookTemplate;
use crate::readiness::wait_for_ready;
use crate::readiness::PollError;
use crate::readiness::WorkloadIdentity;

impl Dss {
    /// Creates notebook `name` and waits until it serves. Returns its URL.
    ///
    /// `image` may be an alias from the configured table or a full image
    /// reference; `None` picks the default image.
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::GpuUnavailable`] if `gpu` is requested but the node
    ///   is not set up for it
    /// - [`WorkflowError::NotInitialized`] if the claim or MLflow is missing
    /// - [`WorkflowError::AlreadyExists`] if the name is taken
    /// - [`WorkflowError::ImagePullBackOff`] if the image cannot be pulled;
    ///   the notebook is deleted again
    /// - [`WorkflowError::Timeout`] if the create wait policy runs out; the
    ///   notebook is left in place
    pub async fn create_notebook(
        &self,
        name: &str,
        image: Option<&str>,
        gpu: Option<GpuKind>,
    ) -> WorkflowResult<Option<String>> {
        if let Some(kind) = gpu {
            let labels = self.single_node_labels().await?;
            if !self.config.gpu.profile(kind).is_enabled_on(&labels) {
                return Err(Report::new(WorkflowError::GpuUnavailable { kind }));
            }
        }

        let initialized = self
            .exists(ResourceKind::PersistentVolumeClaim, &self.config.notebooks.pvc_name)
            .await?
            && self
                .exists(ResourceKind::Deployment, &self.config.mlflow.name)
                .await?;
        if !initialized {
            return Err(Report::new(WorkflowError::NotInitialized {
                namespace: self.config.namespace.clone(),
            }));
        }

        if self.notebook_exists(name).await? {
            let url = self.service_url(name).await?;
            return Err(Report::new(WorkflowError::AlreadyExists {
                name: name.to_string(),
                url,
            }));
        }

        let image = self.config.resolve_image(image);
        debug!(notebook = name, image, ?gpu, "creating notebook");
        let template = NotebookTemplate::new(&self.config, name, &image, gpu);
        let applier = ManifestApplier::new(
            self.cluster.as_ref(),
            &self.config.managed_by_labels,
            &[&template],
        );
        applier.apply().await.map_err(cluster_api)?;

        let identity = WorkloadIdentity::new(&self.config.namespace, name);
        let waited = wait_for_ready(
            self.cluster.as_ref(),
            self.clock.as_ref(),
            &identity,
            self.config.waits.create.poll_policy(),
        )
        .await;

        if let Err(report) = waited {
            if matches!(report.current_context(), PollError::ImagePullBackOff { .. }) {
                warn!(notebook = name, "{}. Deleting notebook...", report.current_context());
                applier.delete().await;
            }
            return Err(self.poll_failure(
                report,
                &image,
                self.config.recommended_images(),
                true,
            ));
        }

        let url = self.service_url(name).await?;
        info!("Success: Notebook {name} created successfully.");
        if let Some(url) = &url {
            info!("Access the notebook at {url}.");
        }
        Ok(url)
    }
}
