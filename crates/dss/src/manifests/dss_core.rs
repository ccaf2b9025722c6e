use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::core::v1::PersistentVolumeClaimSpec;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use super::object_meta;
use super::RenderedResource;
use super::Template;
use crate::config::DssConfig;

/// The namespace and the volume claim shared by every notebook.
#[derive(Clone, Debug)]
pub struct CoreTemplate {
    namespace: String,
    pvc_name: String,
    pvc_size: String,
}

impl CoreTemplate {
    pub fn from_config(config: &DssConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            pvc_name: config.notebooks.pvc_name.clone(),
            pvc_size: config.notebooks.pvc_size.clone(),
        }
    }
}

impl Template for CoreTemplate {
    fn name(&self) -> &'static str {
        "dss_core"
    }

    fn render(&self) -> Vec<RenderedResource> {
        let namespace = Namespace {
            metadata: object_meta(&self.namespace, None, BTreeMap::new()),
            ..Default::default()
        };

        let pvc = PersistentVolumeClaim {
            metadata: object_meta(&self.pvc_name, Some(&self.namespace), BTreeMap::new()),
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(ResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(self.pvc_size.clone()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        vec![
            RenderedResource::Namespace(namespace),
            RenderedResource::PersistentVolumeClaim(pvc),
        ]
    }
}
