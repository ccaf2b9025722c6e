use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v1::Scale;
use k8s_openapi::api::autoscaling::v1::ScaleSpec;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DeleteParams;
use kube::api::ListParams;
use kube::api::LogParams;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::api::PostParams;
use kube::Api;
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::kube_client::init_kube_client;
use super::selector_string;
use super::Cluster;
use super::ClusterError;
use super::ClusterResult;
use super::ResourceKind;
use super::ResourceRef;
use crate::manifests::RenderedResource;

/// [`Cluster`] backed by a live API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    field_manager: String,
}

impl KubeCluster {
    pub fn new(client: Client, field_manager: &str) -> Self {
        Self {
            client,
            field_manager: field_manager.to_string(),
        }
    }

    /// Builds a client from `kubeconfig_path`. No request is made yet, so an
    /// unreachable server shows up on the first call.
    pub async fn connect(kubeconfig_path: &Path, field_manager: &str) -> ClusterResult<Self> {
        let client = init_kube_client(kubeconfig_path).await?;
        debug!(kubeconfig = %kubeconfig_path.display(), "kubernetes client ready");
        Ok(Self::new(client, field_manager))
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn apply_object<K>(&self, api: Api<K>, resource: ResourceRef, object: &K) -> ClusterResult<()>
    where
        K: Clone + DeserializeOwned + Serialize + Debug,
    {
        let params = PatchParams::apply(&self.field_manager).force();
        api.patch(&resource.name, &params, &Patch::Apply(object))
            .await
            .map_err(|err| map_kube_error(err, resource))?;
        Ok(())
    }

    async fn object_exists<K>(api: Api<K>, resource: &ResourceRef) -> ClusterResult<bool>
    where
        K: Clone + DeserializeOwned + Debug,
    {
        api.get_opt(&resource.name)
            .await
            .map(|object| object.is_some())
            .map_err(|err| map_kube_error(err, resource.clone()))
    }

    async fn delete_object<K>(api: Api<K>, resource: &ResourceRef) -> ClusterResult<()>
    where
        K: Clone + DeserializeOwned + Debug,
    {
        api.delete(&resource.name, &DeleteParams::default())
            .await
            .map_err(|err| map_kube_error(err, resource.clone()))?;
        Ok(())
    }
}

/// Maps a client error onto [`ClusterError`]. A 404 becomes
/// [`ClusterError::NotFound`]; other API statuses keep their code.
fn map_kube_error(err: kube::Error, resource: ResourceRef) -> Report<ClusterError> {
    let context = match &err {
        kube::Error::Api(response) if response.code == 404 => ClusterError::NotFound { resource },
        kube::Error::Api(response) => ClusterError::Api {
            resource,
            code: response.code,
            message: response.message.clone(),
        },
        kube::Error::SerdeError(_) => ClusterError::Encoding { resource },
        other => ClusterError::ConnectionFailed {
            message: other.to_string(),
        },
    };
    Report::new(err).change_context(context)
}

fn namespace_of(resource: &ResourceRef) -> &str {
    resource.namespace.as_deref().unwrap_or_default()
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<Option<Deployment>> {
        self.namespaced::<Deployment>(namespace)
            .get_opt(name)
            .await
            .map_err(|err| {
                map_kube_error(
                    err,
                    ResourceRef::namespaced(ResourceKind::Deployment, namespace, name),
                )
            })
    }

    async fn list_deployments(&self, namespace: &str) -> ClusterResult<Vec<Deployment>> {
        let list = self
            .namespaced::<Deployment>(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|err| {
                map_kube_error(
                    err,
                    ResourceRef::namespaced(ResourceKind::Deployment, namespace, "*"),
                )
            })?;
        Ok(list.items)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> ClusterResult<Option<Service>> {
        self.namespaced::<Service>(namespace)
            .get_opt(name)
            .await
            .map_err(|err| {
                map_kube_error(
                    err,
                    ResourceRef::namespaced(ResourceKind::Service, namespace, name),
                )
            })
    }

    async fn exists(&self, resource: &ResourceRef) -> ClusterResult<bool> {
        let namespace = namespace_of(resource);
        match resource.kind {
            ResourceKind::Namespace => {
                Self::object_exists(Api::<Namespace>::all(self.client.clone()), resource).await
            }
            ResourceKind::PersistentVolumeClaim => {
                Self::object_exists(self.namespaced::<PersistentVolumeClaim>(namespace), resource)
                    .await
            }
            ResourceKind::Deployment => {
                Self::object_exists(self.namespaced::<Deployment>(namespace), resource).await
            }
            ResourceKind::Service => {
                Self::object_exists(self.namespaced::<Service>(namespace), resource).await
            }
            ResourceKind::Pod => {
                Self::object_exists(self.namespaced::<Pod>(namespace), resource).await
            }
            ResourceKind::Node => {
                Self::object_exists(Api::<Node>::all(self.client.clone()), resource).await
            }
        }
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> ClusterResult<Vec<Pod>> {
        let params = ListParams::default().labels(&selector_string(selector));
        let list = self
            .namespaced::<Pod>(namespace)
            .list(&params)
            .await
            .map_err(|err| {
                map_kube_error(
                    err,
                    ResourceRef::namespaced(ResourceKind::Pod, namespace, "*"),
                )
            })?;
        Ok(list.items)
    }

    async fn list_nodes(&self) -> ClusterResult<Vec<Node>> {
        let list = Api::<Node>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .map_err(|err| map_kube_error(err, ResourceRef::cluster_scoped(ResourceKind::Node, "*")))?;
        Ok(list.items)
    }

    async fn apply(&self, resource: &RenderedResource) -> ClusterResult<()> {
        let reference = resource.reference();
        let namespace = namespace_of(&reference).to_string();
        match resource {
            RenderedResource::Namespace(object) => {
                self.apply_object(Api::<Namespace>::all(self.client.clone()), reference, object)
                    .await
            }
            RenderedResource::PersistentVolumeClaim(object) => {
                self.apply_object(self.namespaced(&namespace), reference, object)
                    .await
            }
            RenderedResource::Deployment(object) => {
                self.apply_object(self.namespaced(&namespace), reference, object)
                    .await
            }
            RenderedResource::Service(object) => {
                self.apply_object(self.namespaced(&namespace), reference, object)
                    .await
            }
        }
    }

    async fn delete(&self, resource: &ResourceRef) -> ClusterResult<()> {
        let namespace = namespace_of(resource);
        match resource.kind {
            ResourceKind::Namespace => {
                Self::delete_object(Api::<Namespace>::all(self.client.clone()), resource).await
            }
            ResourceKind::PersistentVolumeClaim => {
                Self::delete_object(self.namespaced::<PersistentVolumeClaim>(namespace), resource)
                    .await
            }
            ResourceKind::Deployment => {
                Self::delete_object(self.namespaced::<Deployment>(namespace), resource).await
            }
            ResourceKind::Service => {
                Self::delete_object(self.namespaced::<Service>(namespace), resource).await
            }
            ResourceKind::Pod => {
                Self::delete_object(self.namespaced::<Pod>(namespace), resource).await
            }
            ResourceKind::Node => {
                Self::delete_object(Api::<Node>::all(self.client.clone()), resource).await
            }
        }
    }

    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> ClusterResult<()> {
        let resource = ResourceRef::namespaced(ResourceKind::Deployment, namespace, name);
        let scale = Scale {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(ScaleSpec {
                replicas: Some(replicas),
            }),
            status: None,
        };
        let body = serde_json::to_vec(&scale).change_context(ClusterError::Encoding {
            resource: resource.clone(),
        })?;

        self.namespaced::<Deployment>(namespace)
            .replace_scale(name, &PostParams::default(), body)
            .await
            .map_err(|err| map_kube_error(err, resource))?;
        Ok(())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str) -> ClusterResult<Vec<String>> {
        let logs = self
            .namespaced::<Pod>(namespace)
            .logs(pod, &LogParams::default())
            .await
            .map_err(|err| {
                map_kube_error(
                    err,
                    ResourceRef::namespaced(ResourceKind::Pod, namespace, pod),
                )
            })?;
        Ok(logs.lines().map(str::to_string).collect())
    }
}
