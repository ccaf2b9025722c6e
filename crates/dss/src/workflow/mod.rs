//! Operator-facing operations.
//!
//! Each operation checks its preconditions against the cluster, mutates it
//! through the [`Cluster`] handle or a [`ManifestApplier`], and reports
//! failures as a [`WorkflowError`] carrying an operator message and a hint.
//!
//! [`ManifestApplier`]: crate::manifests::ManifestApplier

use core::error::Error;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use derive_more::Display;
use error_stack::Report;
use k8s_openapi::api::core::v1::Service;

use crate::cluster::Cluster;
use crate::cluster::ClusterError;
use crate::cluster::ResourceKind;
use crate::cluster::ResourceRef;
use crate::config::DssConfig;
use crate::config::GpuKind;
use crate::readiness::Clock;
use crate::readiness::PollError;

mod initialize;
mod inspect;
mod lifecycle;
mod notebook;
mod purge;

pub use self::inspect::NotebookSummary;
pub use self::inspect::PodLogs;
pub use self::inspect::StatusReport;

pub type WorkflowResult<T> = Result<T, Report<WorkflowError>>;

const SETUP_HINT: &str = "You might want to run\n  \
    dss status      to check the current status\n  \
    dss logs --all  to review all logs\n  \
    dss initialize  to install dss";

/// Failures reported to the operator.
#[derive(Debug, Display)]
pub enum WorkflowError {
    #[display("DSS is not initialized in namespace {namespace}")]
    NotInitialized { namespace: String },
    #[display("Notebook with name '{name}' already exists")]
    AlreadyExists { name: String, url: Option<String> },
    #[display("Notebook {name} does not exist")]
    NotFound { name: String },
    #[display("GPU acceleration with {kind} is not available on the cluster node")]
    GpuUnavailable { kind: GpuKind },
    #[display("Image {image} does not exist or is not accessible")]
    ImagePullBackOff {
        image: String,
        /// `(alias, image)` pairs worth suggesting instead.
        recommended: Vec<(String, String)>,
    },
    #[display(
        "Timed out after {}s waiting for Deployment {name} in namespace {namespace} to be ready",
        elapsed.as_secs()
    )]
    Timeout {
        name: String,
        namespace: String,
        elapsed: Duration,
        /// Whether the applied objects were left in place.
        resources_left: bool,
    },
    #[display("Kubernetes API request failed{}", code.map(|code| format!(" with error code {code}")).unwrap_or_default())]
    ClusterApi { code: Option<u16> },
    #[display("Expected exactly one node in the cluster, found {nodes}")]
    UnsupportedTopology { nodes: usize },
    #[display("No pods found for {workload}")]
    NoPods {
        workload: String,
        /// Command that recreates the workload.
        recreate_with: &'static str,
    },
}

impl Error for WorkflowError {}

impl WorkflowError {
    /// What the operator can do about the failure.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized { .. } => Some(SETUP_HINT.to_string()),
            Self::AlreadyExists { url, .. } => url
                .as_ref()
                .map(|url| format!("To connect to the existing notebook, go to {url}.")),
            Self::NotFound { .. } => Some("Run 'dss list' to check all notebooks.".to_string()),
            Self::GpuUnavailable { .. } => Some(
                "The GPU devices were not properly set up in the Kubernetes cluster. Install the \
                 GPU operator so the node advertises its GPU labels, then try again."
                    .to_string(),
            ),
            Self::ImagePullBackOff { recommended, .. } if !recommended.is_empty() => {
                let width = recommended
                    .iter()
                    .map(|(alias, _)| alias.len())
                    .max()
                    .unwrap_or_default();
                let rows: Vec<String> = recommended
                    .iter()
                    .map(|(alias, image)| format!("  {alias:<width$}  {image}"))
                    .collect();
                Some(format!(
                    "You might want to use one of these recommended images:\n{}",
                    rows.join("\n")
                ))
            }
            Self::ImagePullBackOff { .. } => None,
            Self::Timeout {
                resources_left: true,
                ..
            } => Some(
                "Some resources might be left in the cluster. Check the status with 'dss list'."
                    .to_string(),
            ),
            Self::Timeout { .. } => Some(
                "The applied resources were deleted. Check the cluster and run 'dss initialize' \
                 again."
                    .to_string(),
            ),
            Self::ClusterApi { .. } => {
                Some("Check the debug logs in logs/dss.log for more details.".to_string())
            }
            Self::UnsupportedTopology { .. } => None,
            Self::NoPods { recreate_with, .. } => Some(format!(
                "Please wait a moment or run '{recreate_with}' again."
            )),
        }
    }
}

/// Converts a cluster failure, keeping its HTTP status code.
pub(crate) fn cluster_api(report: Report<ClusterError>) -> Report<WorkflowError> {
    let code = report.current_context().status_code();
    report.change_context(WorkflowError::ClusterApi { code })
}

/// What to log once a Log target is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Notebook(String),
    Mlflow,
    All,
}

/// Entry point for every operation. Holds the cluster handle, the clock used
/// for polling, and the configuration shared by all of them.
pub struct Dss {
    cluster: Arc<dyn Cluster>,
    clock: Arc<dyn Clock>,
    config: DssConfig,
}

impl Dss {
    pub fn new(cluster: Arc<dyn Cluster>, clock: Arc<dyn Clock>, config: DssConfig) -> Self {
        Self {
            cluster,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &DssConfig {
        &self.config
    }

    fn namespaced(&self, kind: ResourceKind, name: &str) -> ResourceRef {
        ResourceRef::namespaced(kind, &self.config.namespace, name)
    }

    async fn exists(&self, kind: ResourceKind, name: &str) -> WorkflowResult<bool> {
        self.cluster
            .exists(&self.namespaced(kind, name))
            .await
            .map_err(cluster_api)
    }

    /// A notebook exists if either its Deployment or its Service does.
    async fn notebook_exists(&self, name: &str) -> WorkflowResult<bool> {
        Ok(self.exists(ResourceKind::Deployment, name).await?
            || self.exists(ResourceKind::Service, name).await?)
    }

    /// `http://<cluster ip>:<first port>` of the named Service, if it has one.
    async fn service_url(&self, name: &str) -> WorkflowResult<Option<String>> {
        let service = self
            .cluster
            .get_service(&self.config.namespace, name)
            .await
            .map_err(cluster_api)?;
        Ok(service.as_ref().and_then(service_url))
    }

    /// Labels of the only node in the cluster.
    async fn single_node_labels(&self) -> WorkflowResult<BTreeMap<String, String>> {
        let nodes = self.cluster.list_nodes().await.map_err(cluster_api)?;
        match nodes.as_slice() {
            [node] => Ok(node.metadata.labels.clone().unwrap_or_default()),
            _ => Err(Report::new(WorkflowError::UnsupportedTopology {
                nodes: nodes.len(),
            })),
        }
    }

    /// Maps a failed wait onto the operator-facing error.
    fn poll_failure(
        &self,
        report: Report<PollError>,
        image: &str,
        recommended: Vec<(String, String)>,
        resources_left: bool,
    ) -> Report<WorkflowError> {
        let context = match report.current_context() {
            PollError::Timeout {
                name,
                namespace,
                elapsed,
            } => WorkflowError::Timeout {
                name: name.clone(),
                namespace: namespace.clone(),
                elapsed: *elapsed,
                resources_left,
            },
            PollError::ImagePullBackOff { .. } => WorkflowError::ImagePullBackOff {
                image: image.to_string(),
                recommended,
            },
            PollError::Cluster { .. } => WorkflowError::ClusterApi {
                code: report
                    .downcast_ref::<ClusterError>()
                    .and_then(ClusterError::status_code),
            },
        };
        report.change_context(context)
    }
}

fn service_url(service: &Service) -> Option<String> {
    let spec = service.spec.as_ref()?;
    let ip = spec
        .cluster_ip
        .as_deref()
        .filter(|ip| !ip.is_empty() && *ip != "None")?;
    let port = spec.ports.as_ref()?.first()?.port;
    Some(format!("http://{ip}:{port}"))
}
