//! Cluster handle.
//!
//! The [`Cluster`] trait is the narrow capability the workflows need from a
//! Kubernetes API endpoint: typed reads, existence checks, server-side apply,
//! deletes, scale replacement and pod logs. [`KubeCluster`] talks to a real
//! API server, `mock::MockCluster` keeps everything in memory for tests and
//! is only built with the `test-util` feature.

use core::error::Error;
use std::collections::BTreeMap;

use async_trait::async_trait;
use derive_more::Display;
use error_stack::Report;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::Service;

use crate::manifests::RenderedResource;

pub mod kube_cluster;
pub mod kube_client;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use kube_cluster::KubeCluster;

pub type ClusterResult<T> = Result<T, Report<ClusterError>>;

/// Resource kinds this tool touches. Pods and Nodes are only ever read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum ResourceKind {
    #[display("Namespace")]
    Namespace,
    #[display("PersistentVolumeClaim")]
    PersistentVolumeClaim,
    #[display("Deployment")]
    Deployment,
    #[display("Service")]
    Service,
    #[display("Pod")]
    Pod,
    #[display("Node")]
    Node,
}

/// Identity of a single cluster object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceRef {
    pub fn namespaced(kind: ResourceKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster_scoped(kind: ResourceKind, name: &str) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.to_string(),
        }
    }

    pub fn namespace(name: &str) -> Self {
        Self::cluster_scoped(ResourceKind::Namespace, name)
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{} {namespace}/{}", self.kind, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Errors returned by the cluster handle.
#[derive(Debug, Display)]
pub enum ClusterError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("{resource} not found")]
    NotFound { resource: ResourceRef },
    #[display("Kubernetes API request on {resource} failed with code {code}: {message}")]
    Api {
        resource: ResourceRef,
        code: u16,
        message: String,
    },
    #[display("Failed to encode request for {resource}")]
    Encoding { resource: ResourceRef },
}

impl Error for ClusterError {}

impl ClusterError {
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// HTTP status code reported by the API server, when there was one.
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(404),
            Self::Api { code, .. } => Some(*code),
            Self::ConnectionFailed { .. } | Self::Encoding { .. } => None,
        }
    }
}

/// Turns a `NotFound` failure into `Ok(None)`.
pub trait OptionalExt<T> {
    fn optional(self) -> ClusterResult<Option<T>>;
}

impl<T> OptionalExt<T> for ClusterResult<T> {
    fn optional(self) -> ClusterResult<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(report) if report.current_context().is_not_found() => Ok(None),
            Err(report) => Err(report),
        }
    }
}

/// Capability object wrapping connectivity to one Kubernetes API endpoint.
///
/// Reads of single objects return `Ok(None)` when the object does not exist.
/// `delete` reports a missing object as [`ClusterError::NotFound`] so callers
/// can decide whether that matters. Nothing here retries.
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> ClusterResult<Option<Deployment>>;

    async fn list_deployments(&self, namespace: &str) -> ClusterResult<Vec<Deployment>>;

    async fn get_service(&self, namespace: &str, name: &str) -> ClusterResult<Option<Service>>;

    async fn exists(&self, resource: &ResourceRef) -> ClusterResult<bool>;

    /// Lists pods whose labels contain every entry of `selector`.
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> ClusterResult<Vec<Pod>>;

    async fn list_nodes(&self) -> ClusterResult<Vec<Node>>;

    /// Server-side applies one object under this tool's field manager.
    async fn apply(&self, resource: &RenderedResource) -> ClusterResult<()>;

    async fn delete(&self, resource: &ResourceRef) -> ClusterResult<()>;

    /// Replaces the scale subresource of a Deployment. Last write wins.
    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32)
        -> ClusterResult<()>;

    async fn pod_logs(&self, namespace: &str, pod: &str) -> ClusterResult<Vec<String>>;
}

/// Renders a label map as a Kubernetes equality-based selector string.
pub fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}
