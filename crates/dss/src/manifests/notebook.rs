use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerPort;
use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::api::core::v1::PersistentVolumeClaimVolumeSource;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::core::v1::ServicePort;
use k8s_openapi::api::core::v1::ServiceSpec;
use k8s_openapi::api::core::v1::Volume;
use k8s_openapi::api::core::v1::VolumeMount;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::app_labels;
use super::object_meta;
use super::RenderedResource;
use super::Template;
use crate::config::DssConfig;
use crate::config::GpuKind;

const NOTEBOOK_VOLUME: &str = "notebook-data";
const MLFLOW_TRACKING_URI_ENV: &str = "MLFLOW_TRACKING_URI";

/// One notebook server: a Deployment with the shared claim mounted, and a
/// ClusterIP Service exposing it.
#[derive(Clone, Debug)]
pub struct NotebookTemplate {
    namespace: String,
    name: String,
    image: String,
    notebook_label: String,
    port: i32,
    pvc_name: String,
    mount_path: String,
    tracking_uri: String,
    gpu_resource: Option<String>,
}

impl NotebookTemplate {
    /// `image` must already be resolved to a full reference.
    pub fn new(config: &DssConfig, name: &str, image: &str, gpu: Option<GpuKind>) -> Self {
        Self {
            namespace: config.namespace.clone(),
            name: name.to_string(),
            image: image.to_string(),
            notebook_label: config.notebooks.label.clone(),
            port: config.notebooks.port,
            pvc_name: config.notebooks.pvc_name.clone(),
            mount_path: config.notebooks.mount_path.clone(),
            tracking_uri: config.tracking_uri(),
            gpu_resource: gpu.map(|kind| config.gpu.profile(kind).resource_name.clone()),
        }
    }

    fn labels(&self) -> BTreeMap<String, String> {
        let mut labels = app_labels(&self.name);
        labels.insert(self.notebook_label.clone(), self.name.clone());
        labels
    }

    fn container(&self) -> Container {
        let resources = self.gpu_resource.as_ref().map(|resource| ResourceRequirements {
            limits: Some(BTreeMap::from([(
                resource.clone(),
                Quantity("1".to_string()),
            )])),
            ..Default::default()
        });

        Container {
            name: self.name.clone(),
            image: Some(self.image.clone()),
            ports: Some(vec![ContainerPort {
                container_port: self.port,
                name: Some("notebook".to_string()),
                ..Default::default()
            }]),
            env: Some(vec![EnvVar {
                name: MLFLOW_TRACKING_URI_ENV.to_string(),
                value: Some(self.tracking_uri.clone()),
                ..Default::default()
            }]),
            volume_mounts: Some(vec![VolumeMount {
                name: NOTEBOOK_VOLUME.to_string(),
                mount_path: self.mount_path.clone(),
                ..Default::default()
            }]),
            resources,
            ..Default::default()
        }
    }

    fn deployment(&self) -> Deployment {
        let selector = app_labels(&self.name);
        Deployment {
            metadata: object_meta(&self.name, Some(&self.namespace), self.labels()),
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(selector),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.labels()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![self.container()],
                        volumes: Some(vec![Volume {
                            name: NOTEBOOK_VOLUME.to_string(),
                            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                                claim_name: self.pvc_name.clone(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn service(&self) -> Service {
        Service {
            metadata: object_meta(&self.name, Some(&self.namespace), self.labels()),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(app_labels(&self.name)),
                ports: Some(vec![ServicePort {
                    name: Some("notebook".to_string()),
                    port: self.port,
                    target_port: Some(IntOrString::Int(self.port)),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

impl Template for NotebookTemplate {
    fn name(&self) -> &'static str {
        "notebook"
    }

    fn render(&self) -> Vec<RenderedResource> {
        vec![
            RenderedResource::Deployment(self.deployment()),
            RenderedResource::Service(self.service()),
        ]
    }
}
