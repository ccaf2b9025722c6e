//! Manifest templates and the applier that pushes them to the cluster.
//!
//! Templates render typed Kubernetes objects from their own context instead
//! of text, so a rendering mistake is a type error rather than a rejected
//! request. [`ManifestApplier`] stamps the managed-by labels on every object
//! and applies the batch in order.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::cluster::Cluster;
use crate::cluster::ClusterResult;
use crate::cluster::ResourceKind;
use crate::cluster::ResourceRef;

pub mod dss_core;
pub mod mlflow;
pub mod notebook;

pub use self::dss_core::CoreTemplate;
pub use self::mlflow::MlflowTemplate;
pub use self::notebook::NotebookTemplate;

/// Label every workload uses as its pod selector.
pub const APP_LABEL: &str = "app";

/// A rendered object ready to be applied.
#[derive(Clone, Debug)]
pub enum RenderedResource {
    Namespace(Namespace),
    PersistentVolumeClaim(PersistentVolumeClaim),
    Deployment(Deployment),
    Service(Service),
}

impl RenderedResource {
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Namespace(_) => ResourceKind::Namespace,
            Self::PersistentVolumeClaim(_) => ResourceKind::PersistentVolumeClaim,
            Self::Deployment(_) => ResourceKind::Deployment,
            Self::Service(_) => ResourceKind::Service,
        }
    }

    pub const fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Namespace(ns) => &ns.metadata,
            Self::PersistentVolumeClaim(pvc) => &pvc.metadata,
            Self::Deployment(dep) => &dep.metadata,
            Self::Service(svc) => &svc.metadata,
        }
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Namespace(ns) => &mut ns.metadata,
            Self::PersistentVolumeClaim(pvc) => &mut pvc.metadata,
            Self::Deployment(dep) => &mut dep.metadata,
            Self::Service(svc) => &mut svc.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn reference(&self) -> ResourceRef {
        match self.kind() {
            ResourceKind::Namespace => ResourceRef::namespace(self.name()),
            kind => ResourceRef::namespaced(
                kind,
                self.metadata().namespace.as_deref().unwrap_or_default(),
                self.name(),
            ),
        }
    }

    /// Adds `labels` to the object's metadata, keeping labels set by the template.
    pub fn add_labels(&mut self, labels: &BTreeMap<String, String>) {
        let existing = self.metadata_mut().labels.get_or_insert_with(BTreeMap::new);
        for (key, value) in labels {
            existing.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

/// Something that renders a fixed set of objects from its own context.
pub trait Template: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;
    fn render(&self) -> Vec<RenderedResource>;
}

/// Object metadata with a name, an optional namespace and labels.
pub(crate) fn object_meta(
    name: &str,
    namespace: Option<&str>,
    labels: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: (!labels.is_empty()).then_some(labels),
        ..Default::default()
    }
}

pub(crate) fn app_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL.to_string(), name.to_string())])
}

/// Renders a batch of templates and applies or deletes it as a unit.
pub struct ManifestApplier<'a> {
    cluster: &'a dyn Cluster,
    resources: Vec<RenderedResource>,
}

impl<'a> ManifestApplier<'a> {
    pub fn new(
        cluster: &'a dyn Cluster,
        labels: &BTreeMap<String, String>,
        templates: &[&dyn Template],
    ) -> Self {
        let resources = templates
            .iter()
            .flat_map(|template| {
                debug!(template = template.name(), "rendering template");
                template.render()
            })
            .map(|mut resource| {
                resource.add_labels(labels);
                resource
            })
            .collect();
        Self { cluster, resources }
    }

    pub fn resources(&self) -> &[RenderedResource] {
        &self.resources
    }

    /// Applies every rendered object in order, stopping at the first failure.
    pub async fn apply(&self) -> ClusterResult<()> {
        for resource in &self.resources {
            debug!(resource = %resource.reference(), "applying");
            self.cluster.apply(resource).await?;
        }
        info!(count = self.resources.len(), "applied resources");
        Ok(())
    }

    /// Deletes every rendered object in reverse order. Failures are logged and
    /// otherwise ignored.
    pub async fn delete(&self) {
        for resource in self.resources.iter().rev() {
            let reference = resource.reference();
            match self.cluster.delete(&reference).await {
                Ok(()) => debug!(resource = %reference, "deleted"),
                Err(report) if report.current_context().is_not_found() => {
                    debug!(resource = %reference, "already gone");
                }
                Err(report) => warn!(resource = %reference, "failed to delete: {report:?}"),
            }
        }
    }
}
