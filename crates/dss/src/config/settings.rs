use core::error::Error;
use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use derive_more::Display;
use error_stack::Report;
use error_stack::ResultExt;
use serde::Deserialize;

use crate::readiness::PollPolicy;

/// Errors raised while loading [`DssConfig`].
#[derive(Debug, Display)]
pub enum ConfigError {
    #[display("Failed to read configuration file {}", path.display())]
    Read { path: PathBuf },
    #[display("Failed to parse configuration file {}", path.display())]
    Parse { path: PathBuf },
    #[display("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl Error for ConfigError {}

/// GPU vendors a notebook can request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum GpuKind {
    #[display("nvidia")]
    Nvidia,
}

/// Static configuration shared by every workflow operation.
///
/// All values have defaults; a YAML file passed with `--config` only needs
/// the keys it wants to override.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DssConfig {
    /// Namespace holding every managed object.
    pub namespace: String,
    /// Field manager identity used for server-side apply.
    pub field_manager: String,
    /// Labels stamped on every applied object.
    pub managed_by_labels: BTreeMap<String, String>,
    pub mlflow: MlflowSettings,
    pub notebooks: NotebookSettings,
    pub gpu: GpuSettings,
    pub waits: WaitSettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MlflowSettings {
    pub name: String,
    pub image: String,
    pub port: i32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotebookSettings {
    /// Label key marking a Deployment as a notebook server.
    pub label: String,
    pub port: i32,
    pub pvc_name: String,
    pub pvc_size: String,
    pub mount_path: String,
    pub default_image: String,
    /// Short names accepted by `--image`, mapped to full image references.
    pub image_aliases: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GpuSettings {
    pub nvidia: GpuProfile,
}

/// How a GPU vendor shows up on nodes and in pod resource limits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuProfile {
    /// Node labels that must all be present for acceleration to work.
    pub required_node_labels: Vec<String>,
    /// Node label carrying the product name, if any.
    pub product_label: String,
    /// Extended resource requested by accelerated notebooks.
    pub resource_name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WaitSettings {
    pub initialize: WaitPolicy,
    pub create: WaitPolicy,
    pub purge_interval_secs: u64,
}

/// Poll timing in whole seconds. A missing timeout waits forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitPolicy {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    pub interval_secs: u64,
}

impl WaitPolicy {
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            timeout: self.timeout_secs.map(Duration::from_secs),
            interval: Duration::from_secs(self.interval_secs),
        }
    }
}

impl Default for DssConfig {
    fn default() -> Self {
        Self {
            namespace: "dss".to_string(),
            field_manager: "dss-cli".to_string(),
            managed_by_labels: BTreeMap::from([(
                "app.kubernetes.io/managed-by".to_string(),
                "dss-cli".to_string(),
            )]),
            mlflow: MlflowSettings::default(),
            notebooks: NotebookSettings::default(),
            gpu: GpuSettings::default(),
            waits: WaitSettings::default(),
        }
    }
}

impl Default for MlflowSettings {
    fn default() -> Self {
        Self {
            name: "mlflow".to_string(),
            image: "ubuntu/mlflow:2.1.1_1.0-22.04".to_string(),
            port: 5000,
        }
    }
}

const KUBEFLOW_NOTEBOOK_IMAGES: &[(&str, &str)] = &[
    ("scipy", "kubeflownotebookswg/jupyter-scipy:v1.8.0"),
    ("pytorch", "kubeflownotebookswg/jupyter-pytorch-full:v1.8.0"),
    (
        "pytorch-cuda",
        "kubeflownotebookswg/jupyter-pytorch-cuda-full:v1.8.0",
    ),
    (
        "tensorflow",
        "kubeflownotebookswg/jupyter-tensorflow-full:v1.8.0",
    ),
    (
        "tensorflow-cuda",
        "kubeflownotebookswg/jupyter-tensorflow-cuda-full:v1.8.0",
    ),
];

impl Default for NotebookSettings {
    fn default() -> Self {
        Self {
            label: "canonical.com/dss-notebook".to_string(),
            port: 8888,
            pvc_name: "notebooks".to_string(),
            pvc_size: "10Gi".to_string(),
            mount_path: "/home/jovyan".to_string(),
            default_image: "kubeflownotebookswg/jupyter-scipy:v1.8.0".to_string(),
            image_aliases: KUBEFLOW_NOTEBOOK_IMAGES
                .iter()
                .map(|(alias, image)| (alias.to_string(), image.to_string()))
                .collect(),
        }
    }
}

impl Default for GpuSettings {
    fn default() -> Self {
        Self {
            nvidia: GpuProfile {
                required_node_labels: vec![
                    "nvidia.com/gpu.present".to_string(),
                    "nvidia.com/gpu.deploy.container-toolkit".to_string(),
                    "nvidia.com/gpu.deploy.device-plugin".to_string(),
                ],
                product_label: "nvidia.com/gpu.product".to_string(),
                resource_name: "nvidia.com/gpu".to_string(),
                display_name: "NVIDIA GPU".to_string(),
            },
        }
    }
}

impl GpuSettings {
    pub const fn profile(&self, kind: GpuKind) -> &GpuProfile {
        match kind {
            GpuKind::Nvidia => &self.nvidia,
        }
    }
}

impl GpuProfile {
    /// Whether a node with `labels` is set up for this GPU vendor.
    pub fn is_enabled_on(&self, labels: &BTreeMap<String, String>) -> bool {
        self.required_node_labels
            .iter()
            .all(|label| labels.contains_key(label))
    }

    /// Product name advertised by the node, falling back to the vendor name.
    pub fn product_name(&self, labels: &BTreeMap<String, String>) -> String {
        labels
            .get(&self.product_label)
            .cloned()
            .unwrap_or_else(|| self.display_name.clone())
    }
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            initialize: WaitPolicy {
                timeout_secs: Some(300),
                interval_secs: 5,
            },
            create: WaitPolicy {
                timeout_secs: None,
                interval_secs: 5,
            },
            purge_interval_secs: 2,
        }
    }
}

impl DssConfig {
    /// Loads the configuration, applying overrides from `path` when given.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Read`] if the file cannot be read
    /// - [`ConfigError::Parse`] if it is not valid YAML for this schema
    /// - [`ConfigError::Invalid`] if a value is out of range
    pub fn load(path: Option<&Path>) -> Result<Self, Report<ConfigError>> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).change_context(ConfigError::Read {
                    path: path.to_path_buf(),
                })?;
                Self::from_yaml(&raw).change_context(ConfigError::Parse {
                    path: path.to_path_buf(),
                })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document deserializes to unit, which the struct rejects.
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    fn validate(&self) -> Result<(), Report<ConfigError>> {
        let invalid = |message: &str| {
            Err(Report::new(ConfigError::Invalid {
                message: message.to_string(),
            }))
        };

        if self.namespace.is_empty() {
            return invalid("namespace must not be empty");
        }
        if self.field_manager.is_empty() {
            return invalid("fieldManager must not be empty");
        }
        if self.notebooks.label.is_empty() {
            return invalid("notebooks.label must not be empty");
        }
        if self.waits.initialize.interval_secs == 0
            || self.waits.create.interval_secs == 0
            || self.waits.purge_interval_secs == 0
        {
            return invalid("poll intervals must be at least one second");
        }
        Ok(())
    }

    /// Resolves `--image` through the alias table. Unknown names are taken as
    /// full image references; no image means the default one.
    pub fn resolve_image(&self, image: Option<&str>) -> String {
        match image {
            Some(image) => self
                .notebooks
                .image_aliases
                .get(image)
                .cloned()
                .unwrap_or_else(|| image.to_string()),
            None => self.notebooks.default_image.clone(),
        }
    }

    /// In-cluster address of the tracking service.
    pub fn tracking_uri(&self) -> String {
        format!(
            "http://{}.{}.svc.cluster.local:{}",
            self.mlflow.name, self.namespace, self.mlflow.port
        )
    }

    /// Alias table rendered as `(alias, image)` pairs, sorted by alias.
    pub fn recommended_images(&self) -> Vec<(String, String)> {
        self.notebooks
            .image_aliases
            .iter()
            .map(|(alias, image)| (alias.clone(), image.clone()))
            .collect()
    }
}
