use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;

use crate::cluster::ClusterError;

/// Builds a client from the kubeconfig file at `kubeconfig_path`.
///
/// The file must exist; there is no fallback to in-cluster configuration
/// since the tool always runs from an operator's machine.
pub async fn init_kube_client(kubeconfig_path: &Path) -> Result<Client, Report<ClusterError>> {
    let kubeconfig =
        Kubeconfig::read_from(kubeconfig_path).change_context(ClusterError::ConnectionFailed {
            message: format!(
                "Failed to read kubeconfig file: {}",
                kubeconfig_path.display()
            ),
        })?;

    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .change_context(ClusterError::ConnectionFailed {
            message: format!(
                "Failed to create config from kubeconfig: {}",
                kubeconfig_path.display()
            ),
        })?;

    Client::try_from(config).change_context(ClusterError::ConnectionFailed {
        message: "Failed to create Kubernetes client from kubeconfig".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test(tokio::test)]
    async fn missing_kubeconfig_is_connection_failure() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("kubeconfig");

        let Err(report) = init_kube_client(&missing).await else {
            panic!("missing file must fail");
        };

        assert!(matches!(
            report.current_context(),
            ClusterError::ConnectionFailed { .. }
        ));
    }

    #[test(tokio::test)]
    async fn malformed_kubeconfig_is_connection_failure() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("kubeconfig");
        std::fs::write(&path, "clusters: [this is not: valid").expect("write kubeconfig");

        let Err(report) = init_kube_client(&path).await else {
            panic!("malformed file must fail");
        };

        assert!(report.to_string().contains("Failed to read kubeconfig file"));
    }
}
