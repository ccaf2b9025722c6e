use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerPort;
use k8s_openapi::api::core::v1::HTTPGetAction;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::api::core::v1::Probe;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::core::v1::ServicePort;
use k8s_openapi::api::core::v1::ServiceSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::app_labels;
use super::object_meta;
use super::RenderedResource;
use super::Template;
use crate::config::DssConfig;

/// The MLflow tracking server and the Service in front of it.
#[derive(Clone, Debug)]
pub struct MlflowTemplate {
    namespace: String,
    name: String,
    image: String,
    port: i32,
}

impl MlflowTemplate {
    pub fn from_config(config: &DssConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            name: config.mlflow.name.clone(),
            image: config.mlflow.image.clone(),
            port: config.mlflow.port,
        }
    }

    fn deployment(&self) -> Deployment {
        let labels = app_labels(&self.name);
        let container = Container {
            name: self.name.clone(),
            image: Some(self.image.clone()),
            command: Some(vec!["mlflow".to_string()]),
            args: Some(vec![
                "server".to_string(),
                "--host".to_string(),
                "0.0.0.0".to_string(),
                "--port".to_string(),
                self.port.to_string(),
            ]),
            ports: Some(vec![ContainerPort {
                container_port: self.port,
                name: Some("http".to_string()),
                ..Default::default()
            }]),
            readiness_probe: Some(Probe {
                http_get: Some(HTTPGetAction {
                    path: Some("/health".to_string()),
                    port: IntOrString::Int(self.port),
                    ..Default::default()
                }),
                period_seconds: Some(5),
                ..Default::default()
            }),
            ..Default::default()
        };

        Deployment {
            metadata: object_meta(&self.name, Some(&self.namespace), labels.clone()),
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
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
            metadata: object_meta(&self.name, Some(&self.namespace), app_labels(&self.name)),
            spec: Some(ServiceSpec {
                selector: Some(app_labels(&self.name)),
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
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

impl Template for MlflowTemplate {
    fn name(&self) -> &'static str {
        "mlflow"
    }

    fn render(&self) -> Vec<RenderedResource> {
        vec![
            RenderedResource::Deployment(self.deployment()),
            RenderedResource::Service(self.service()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    #[test]
    fn service_selects_deployment_pods() {
        let template = MlflowTemplate::from_config(&DssConfig::default());
        let deployment = template.deployment();
        let service = template.service();

        let spec = deployment.spec.expect("deployment spec");
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(
            service.spec.and_then(|spec| spec.selector),
            spec.selector.match_labels
        );
    }

    #[test]
    fn container_listens_on_configured_port() {
        let template = MlflowTemplate::from_config(&DssConfig::default());
        let pod = template
            .deployment()
            .spec
            .and_then(|spec| spec.template.spec)
            .expect("pod spec");
        let container = &pod.containers[0];

        assert_eq!(
            container.image.as_deref(),
            Some("ubuntu/mlflow:2.1.1_1.0-22.04")
        );
        assert_eq!(
            container.ports.as_ref().map(|ports| ports[0].container_port),
            Some(5000)
        );
        assert!(container
            .args
            .as_ref()
            .is_some_and(|args| args.contains(&"5000".to_string())));
    }
}
