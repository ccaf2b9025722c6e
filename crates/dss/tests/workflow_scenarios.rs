//! End-to-end operator scenarios against the in-memory cluster.

use std::sync::Arc;

use dss::cluster::mock::MockCluster;
use dss::cluster::mock::Rollout;
use dss::cluster::Cluster;
use dss::cluster::ResourceKind;
use dss::cluster::ResourceRef;
use dss::config::DssConfig;
use dss::readiness::LifecycleState;
use dss::readiness::VirtualClock;
use dss::workflow::Dss;
use dss::workflow::WorkflowError;
use similar_asserts::assert_eq;
use test_log::test;

struct Harness {
    cluster: Arc<MockCluster>,
    clock: Arc<VirtualClock>,
    dss: Dss,
}

impl Harness {
    fn new() -> Self {
        let cluster = Arc::new(MockCluster::new());
        let clock = Arc::new(VirtualClock::new());
        let dss = Dss::new(cluster.clone(), clock.clone(), DssConfig::default());
        Self {
            cluster,
            clock,
            dss,
        }
    }

    async fn initialized() -> Self {
        let harness = Self::new();
        harness.dss.initialize().await.expect("initialize");
        harness
    }

    fn state_of(notebooks: &[dss::workflow::NotebookSummary], name: &str) -> LifecycleState {
        notebooks
            .iter()
            .find(|notebook| notebook.name == name)
            .map(|notebook| notebook.state)
            .expect("notebook is listed")
    }
}

#[test(tokio::test)]
async fn create_waits_for_readiness_and_returns_url() {
    let harness = Harness::initialized().await;
    harness.cluster.set_rollout("nb1", Rollout::ReadyAfter(3));

    let url = harness
        .dss
        .create_notebook("nb1", Some("pytorch"), None)
        .await
        .expect("create succeeds");

    let url = url.expect("service has an address");
    assert!(url.starts_with("http://10.152.183."));
    assert!(url.ends_with(":8888"));
    assert_eq!(harness.clock.sleeps().len(), 2);

    let notebooks = harness.dss.list().await.expect("list");
    assert_eq!(notebooks.len(), 1);
    assert_eq!(
        notebooks[0].image,
        "kubeflownotebookswg/jupyter-pytorch-full:v1.8.0"
    );
    assert_eq!(notebooks[0].url.as_ref(), Some(&url));
}

#[test(tokio::test)]
async fn image_typo_cleans_up_and_suggests_aliases() {
    let harness = Harness::initialized().await;
    harness
        .cluster
        .set_rollout("nb2", Rollout::Waiting("ErrImagePull".to_string()));

    let report = harness
        .dss
        .create_notebook("nb2", Some("definitely-not-an-image"), None)
        .await
        .expect_err("image cannot be pulled");

    let WorkflowError::ImagePullBackOff { image, recommended } = report.current_context() else {
        panic!("expected ImagePullBackOff, got {report:?}");
    };
    assert_eq!(image, "definitely-not-an-image");
    assert_eq!(recommended.len(), 5);
    assert!(report
        .current_context()
        .hint()
        .is_some_and(|hint| hint.contains("tensorflow-cuda")));

    assert!(!harness.cluster.contains(&ResourceRef::namespaced(
        ResourceKind::Deployment,
        "dss",
        "nb2"
    )));
    assert!(!harness.cluster.contains(&ResourceRef::namespaced(
        ResourceKind::Service,
        "dss",
        "nb2"
    )));
    assert!(harness.dss.list().await.expect("list").is_empty());
}

#[test(tokio::test)]
async fn stop_and_start_return_without_waiting() {
    let harness = Harness::initialized().await;
    harness
        .dss
        .create_notebook("nb1", None, None)
        .await
        .expect("create");
    let gets = harness.cluster.deployment_gets();
    let sleeps = harness.clock.sleeps().len();

    harness.dss.stop("nb1").await.expect("stop");
    assert_eq!(
        Harness::state_of(&harness.dss.list().await.expect("list"), "nb1"),
        LifecycleState::Stopped
    );

    harness.cluster.set_rollout("nb1", Rollout::ReadyAfter(usize::MAX));
    harness.dss.start("nb1").await.expect("start");
    assert_eq!(
        Harness::state_of(&harness.dss.list().await.expect("list"), "nb1"),
        LifecycleState::Starting
    );

    harness.cluster.set_rollout("nb1", Rollout::Ready);
    assert_eq!(
        Harness::state_of(&harness.dss.list().await.expect("list"), "nb1"),
        LifecycleState::Active
    );

    assert_eq!(harness.cluster.deployment_gets(), gets);
    assert_eq!(harness.clock.sleeps().len(), sleeps);
    assert_eq!(
        harness.cluster.scaled(),
        vec![("nb1".to_string(), 0), ("nb1".to_string(), 1)]
    );
}

#[test(tokio::test)]
async fn purge_on_uninitialized_cluster_changes_nothing() {
    let harness = Harness::new();

    let report = harness.dss.purge().await.expect_err("nothing to purge");

    assert!(matches!(
        report.current_context(),
        WorkflowError::NotInitialized { .. }
    ));
    assert_eq!(harness.cluster.mutations(), 0);
}

#[test(tokio::test)]
async fn purge_removes_everything() {
    let harness = Harness::initialized().await;
    harness
        .dss
        .create_notebook("nb1", None, None)
        .await
        .expect("create");
    harness.cluster.set_termination_reads(1);

    harness.dss.purge().await.expect("purge");

    assert!(!harness.cluster.contains(&ResourceRef::namespace("dss")));
    assert!(!harness.cluster.contains(&ResourceRef::namespaced(
        ResourceKind::Deployment,
        "dss",
        "nb1"
    )));
    let report = harness
        .dss
        .create_notebook("nb2", None, None)
        .await
        .expect_err("purged cluster is not initialized");
    assert!(matches!(
        report.current_context(),
        WorkflowError::NotInitialized { .. }
    ));
}

#[test(tokio::test)]
async fn remove_twice_tolerates_objects_already_gone() {
    let harness = Harness::initialized().await;
    harness
        .dss
        .create_notebook("nb1", None, None)
        .await
        .expect("create");
    // The Deployment stays visible while it terminates; the Service does not.
    harness.cluster.set_termination_reads(2);

    harness.dss.remove("nb1").await.expect("first remove");
    let listed = harness.dss.list().await.expect("list");
    assert_eq!(Harness::state_of(&listed, "nb1"), LifecycleState::Removing);

    harness
        .dss
        .remove("nb1")
        .await
        .expect("second remove ignores the missing Service");
}

#[test(tokio::test)]
async fn remove_of_unknown_notebook_is_not_found() {
    let harness = Harness::initialized().await;

    let report = harness.dss.remove("ghost").await.expect_err("never existed");

    assert!(matches!(
        report.current_context(),
        WorkflowError::NotFound { name } if name == "ghost"
    ));
    assert!(harness.cluster.deleted().is_empty());
}

#[test(tokio::test)]
async fn remove_after_full_deletion_is_not_found() {
    let harness = Harness::initialized().await;
    harness
        .dss
        .create_notebook("nb1", None, None)
        .await
        .expect("create");

    harness.dss.remove("nb1").await.expect("remove");
    let report = harness.dss.remove("nb1").await.expect_err("both gone");

    assert!(matches!(
        report.current_context(),
        WorkflowError::NotFound { .. }
    ));
}

#[test(tokio::test)]
async fn start_of_notebook_left_with_only_a_service_is_not_found() {
    let harness = Harness::initialized().await;
    harness
        .dss
        .create_notebook("nb1", None, None)
        .await
        .expect("create succeeds");
    harness
        .cluster
        .delete(&ResourceRef::namespaced(ResourceKind::Deployment, "dss", "nb1"))
        .await
        .expect("delete deployment");

    let report = harness.dss.start("nb1").await.expect_err("nothing to scale");

    assert!(matches!(
        report.current_context(),
        WorkflowError::NotFound { name } if name == "nb1"
    ));
    harness.dss.remove("nb1").await.expect("service is still removable");
}

#[test(tokio::test)]
async fn initialize_timeout_removes_partial_install() {
    let harness = Harness::new();
    harness.cluster.set_rollout("mlflow", Rollout::Pending);

    let report = harness.dss.initialize().await.expect_err("mlflow never ready");

    let WorkflowError::Timeout { name, namespace, .. } = report.current_context() else {
        panic!("expected Timeout, got {report:?}");
    };
    assert_eq!(name, "mlflow");
    assert_eq!(namespace, "dss");
    assert_eq!(harness.clock.sleeps().len(), 60);
    assert!(!harness.cluster.contains(&ResourceRef::namespace("dss")));
}
