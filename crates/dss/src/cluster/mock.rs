//! In-memory [`Cluster`] used by unit and scenario tests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use error_stack::Report;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::DeploymentStatus;
use k8s_openapi::api::core::v1::ContainerState;
use k8s_openapi::api::core::v1::ContainerStateRunning;
use k8s_openapi::api::core::v1::ContainerStateWaiting;
use k8s_openapi::api::core::v1::ContainerStatus;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodStatus;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use super::Cluster;
use super::ClusterError;
use super::ClusterResult;
use super::ResourceKind;
use super::ResourceRef;
use crate::manifests::RenderedResource;

/// How the pods of a Deployment behave once it is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollout {
    /// Every desired replica is available immediately.
    Ready,
    /// Replicas become available on the given read of the Deployment.
    ReadyAfter(usize),
    /// Pods exist but never become available.
    Pending,
    /// Pods stay waiting with this reason, e.g. `ErrImagePull`.
    Waiting(String),
    /// Pods start waiting with the reason from the given read of the
    /// Deployment on. Before that they exist but are not ready.
    WaitingAfter(usize, String),
}

/// Calls that can be made to fail with [`MockCluster::fail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MockOp {
    Get,
    List,
    Pods,
    Exists,
    Apply,
    Delete,
    Scale,
    Logs,
    Nodes,
}

#[derive(Debug)]
struct Stored {
    object: RenderedResource,
    /// Reads left before a deleted object disappears.
    terminating: Option<usize>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<ResourceRef, Stored>,
    rollouts: BTreeMap<String, Rollout>,
    reads: BTreeMap<String, usize>,
    applied: Vec<ResourceRef>,
    deleted: Vec<ResourceRef>,
    scaled: Vec<(String, i32)>,
    deployment_gets: usize,
    failures: BTreeMap<MockOp, u16>,
    nodes: Vec<Node>,
    logs: BTreeMap<String, Vec<String>>,
    termination_reads: usize,
    next_ip: u8,
}

impl State {
    /// Fails like the API server would when `op` was made to fail. A 404
    /// becomes [`ClusterError::NotFound`], as it does against a live cluster.
    fn check(&self, op: MockOp, resource: &ResourceRef) -> ClusterResult<()> {
        match self.failures.get(&op) {
            Some(404) => Err(not_found(resource.clone())),
            Some(code) => Err(Report::new(ClusterError::Api {
                resource: resource.clone(),
                code: *code,
                message: format!("injected {op:?} failure"),
            })),
            None => Ok(()),
        }
    }

    /// Whether a read would see the object, counting down termination.
    fn observe(&mut self, resource: &ResourceRef) -> bool {
        let Some(stored) = self.objects.get_mut(resource) else {
            return false;
        };
        let remaining = stored.terminating;
        match remaining {
            Some(0) => {
                self.finalize(resource);
                false
            }
            Some(left) => {
                stored.terminating = Some(left - 1);
                true
            }
            None => true,
        }
    }

    fn finalize(&mut self, resource: &ResourceRef) {
        self.objects.remove(resource);
        if resource.kind == ResourceKind::Namespace {
            self.objects
                .retain(|key, _| key.namespace.as_deref() != Some(resource.name.as_str()));
        }
    }

    fn namespace_exists(&self, namespace: &str) -> bool {
        self.objects.contains_key(&ResourceRef::namespace(namespace))
    }

    fn rollout_ready(&self, name: &str) -> bool {
        match self.rollouts.get(name).unwrap_or(&Rollout::Ready) {
            Rollout::Ready => true,
            Rollout::ReadyAfter(reads) => self.reads.get(name).copied().unwrap_or(0) >= *reads,
            Rollout::Pending | Rollout::Waiting(_) | Rollout::WaitingAfter(..) => false,
        }
    }

    fn waiting_reason(&self, name: &str) -> Option<&str> {
        match self.rollouts.get(name)? {
            Rollout::Waiting(reason) => Some(reason),
            Rollout::WaitingAfter(reads, reason)
                if self.reads.get(name).copied().unwrap_or(0) >= *reads =>
            {
                Some(reason)
            }
            _ => None,
        }
    }

    /// The Deployment as the API server would report it, status included.
    fn deployment_view(&self, stored: &Stored) -> Option<Deployment> {
        let RenderedResource::Deployment(deployment) = &stored.object else {
            return None;
        };
        let mut deployment = deployment.clone();
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let desired = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.replicas)
            .unwrap_or(1);
        let available = if self.rollout_ready(&name) { desired } else { 0 };

        deployment.status = Some(DeploymentStatus {
            replicas: Some(desired),
            ready_replicas: Some(available),
            available_replicas: Some(available),
            ..Default::default()
        });
        if stored.terminating.is_some() {
            deployment.metadata.deletion_timestamp = Some(Time(fixed_time()));
        }
        Some(deployment)
    }

    fn pod_for(&self, deployment: &Deployment) -> Pod {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let labels = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.template.metadata.as_ref())
            .and_then(|meta| meta.labels.clone());
        let state = match self.waiting_reason(&name) {
            Some(reason) => ContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some(reason.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            _ if self.rollout_ready(&name) => ContainerState {
                running: Some(ContainerStateRunning::default()),
                ..Default::default()
            },
            _ => ContainerState::default(),
        };

        Pod {
            metadata: ObjectMeta {
                name: Some(MockCluster::pod_name(&name)),
                namespace: deployment.metadata.namespace.clone(),
                labels,
                creation_timestamp: Some(Time(fixed_time())),
                ..Default::default()
            },
            status: Some(PodStatus {
                container_statuses: Some(vec![ContainerStatus {
                    name: name.clone(),
                    state: Some(state),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn fixed_time() -> DateTime<Utc> {
    DateTime::<Utc>::default()
}

/// A cluster held in memory. Objects are stored as applied; Deployment
/// status and pods are synthesized from the configured [`Rollout`].
#[derive(Debug)]
pub struct MockCluster {
    state: Mutex<State>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    /// An empty cluster with a single node carrying no labels.
    pub fn new() -> Self {
        let state = State {
            nodes: vec![node("node-0", &[])],
            next_ip: 10,
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name of the single pod synthesized for a Deployment.
    pub fn pod_name(deployment: &str) -> String {
        format!("{deployment}-pod")
    }

    /// Stores an object without recording it as applied.
    pub fn insert(&self, resource: RenderedResource) {
        let reference = resource.reference();
        self.state().objects.insert(
            reference,
            Stored {
                object: resource,
                terminating: None,
            },
        );
    }

    pub fn contains(&self, resource: &ResourceRef) -> bool {
        self.state().objects.contains_key(resource)
    }

    pub fn set_rollout(&self, deployment: &str, rollout: Rollout) {
        self.state()
            .rollouts
            .insert(deployment.to_string(), rollout);
    }

    /// Makes every call of `op` fail with HTTP status `code`.
    pub fn fail(&self, op: MockOp, code: u16) {
        self.state().failures.insert(op, code);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Deleted Namespaces and Deployments stay visible, marked for deletion,
    /// for this many reads.
    pub fn set_termination_reads(&self, reads: usize) {
        self.state().termination_reads = reads;
    }

    pub fn set_nodes(&self, nodes: Vec<Node>) {
        self.state().nodes = nodes;
    }

    pub fn set_logs(&self, pod: &str, lines: &[&str]) {
        self.state().logs.insert(
            pod.to_string(),
            lines.iter().map(|line| line.to_string()).collect(),
        );
    }

    /// Objects applied so far, in order.
    pub fn applied(&self) -> Vec<ResourceRef> {
        self.state().applied.clone()
    }

    /// Objects deleted so far, in order. Deletes of missing objects are not
    /// recorded.
    pub fn deleted(&self) -> Vec<ResourceRef> {
        self.state().deleted.clone()
    }

    /// Scale replacements as `(deployment, replicas)`.
    pub fn scaled(&self) -> Vec<(String, i32)> {
        self.state().scaled.clone()
    }

    pub fn deployment_gets(&self) -> usize {
        self.state().deployment_gets
    }

    /// Number of calls that changed the cluster.
    pub fn mutations(&self) -> usize {
        let state = self.state();
        state.applied.len() + state.deleted.len() + state.scaled.len()
    }
}

/// A node with the given labels.
pub fn node(name: &str, labels: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn not_found(resource: ResourceRef) -> Report<ClusterError> {
    Report::new(ClusterError::NotFound { resource })
}

#[async_trait]
impl Cluster for MockCluster {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<Option<Deployment>> {
        let reference = ResourceRef::namespaced(ResourceKind::Deployment, namespace, name);
        let mut state = self.state();
        state.check(MockOp::Get, &reference)?;
        state.deployment_gets += 1;
        *state.reads.entry(name.to_string()).or_default() += 1;

        if !state.observe(&reference) {
            return Ok(None);
        }
        Ok(state
            .objects
            .get(&reference)
            .and_then(|stored| state.deployment_view(stored)))
    }

    async fn list_deployments(&self, namespace: &str) -> ClusterResult<Vec<Deployment>> {
        let state = self.state();
        state.check(
            MockOp::List,
            &ResourceRef::namespaced(ResourceKind::Deployment, namespace, "*"),
        )?;
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| {
                key.kind == ResourceKind::Deployment && key.namespace.as_deref() == Some(namespace)
            })
            .filter_map(|(_, stored)| state.deployment_view(stored))
            .collect())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> ClusterResult<Option<Service>> {
        let reference = ResourceRef::namespaced(ResourceKind::Service, namespace, name);
        let mut state = self.state();
        state.check(MockOp::Get, &reference)?;
        if !state.observe(&reference) {
            return Ok(None);
        }
        Ok(match state.objects.get(&reference).map(|stored| &stored.object) {
            Some(RenderedResource::Service(service)) => Some(service.clone()),
            _ => None,
        })
    }

    async fn exists(&self, resource: &ResourceRef) -> ClusterResult<bool> {
        let mut state = self.state();
        state.check(MockOp::Exists, resource)?;
        Ok(state.observe(resource))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> ClusterResult<Vec<Pod>> {
        let state = self.state();
        state.check(
            MockOp::Pods,
            &ResourceRef::namespaced(ResourceKind::Pod, namespace, "*"),
        )?;
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| key.namespace.as_deref() == Some(namespace))
            .filter_map(|(_, stored)| state.deployment_view(stored))
            .filter(|deployment| {
                deployment
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.replicas)
                    .unwrap_or(1)
                    > 0
            })
            .map(|deployment| state.pod_for(&deployment))
            .filter(|pod| {
                let labels = pod.metadata.labels.clone().unwrap_or_default();
                selector
                    .iter()
                    .all(|(key, value)| labels.get(key) == Some(value))
            })
            .collect())
    }

    async fn list_nodes(&self) -> ClusterResult<Vec<Node>> {
        let state = self.state();
        state.check(
            MockOp::Nodes,
            &ResourceRef::cluster_scoped(ResourceKind::Node, "*"),
        )?;
        Ok(state.nodes.clone())
    }

    async fn apply(&self, resource: &RenderedResource) -> ClusterResult<()> {
        let reference = resource.reference();
        let mut state = self.state();
        state.check(MockOp::Apply, &reference)?;
        if let Some(namespace) = reference.namespace.as_deref() {
            if !state.namespace_exists(namespace) {
                return Err(not_found(ResourceRef::namespace(namespace)));
            }
        }

        let mut object = resource.clone();
        if let RenderedResource::Service(service) = &mut object {
            let previous_ip = match state.objects.get(&reference).map(|stored| &stored.object) {
                Some(RenderedResource::Service(previous)) => previous
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.cluster_ip.clone()),
                _ => None,
            };
            let cluster_ip = previous_ip.unwrap_or_else(|| {
                let ip = format!("10.152.183.{}", state.next_ip);
                state.next_ip = state.next_ip.wrapping_add(1);
                ip
            });
            service.spec.get_or_insert_with(Default::default).cluster_ip = Some(cluster_ip);
        }

        state.objects.insert(
            reference.clone(),
            Stored {
                object,
                terminating: None,
            },
        );
        state.applied.push(reference);
        Ok(())
    }

    async fn delete(&self, resource: &ResourceRef) -> ClusterResult<()> {
        let mut state = self.state();
        state.check(MockOp::Delete, resource)?;
        let termination_reads = state.termination_reads;
        let Some(stored) = state.objects.get_mut(resource) else {
            return Err(not_found(resource.clone()));
        };

        let lingers = matches!(
            resource.kind,
            ResourceKind::Namespace | ResourceKind::Deployment
        ) && termination_reads > 0;
        if lingers {
            stored.terminating.get_or_insert(termination_reads);
        } else {
            state.finalize(resource);
        }
        state.deleted.push(resource.clone());
        Ok(())
    }

    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> ClusterResult<()> {
        let reference = ResourceRef::namespaced(ResourceKind::Deployment, namespace, name);
        let mut state = self.state();
        state.check(MockOp::Scale, &reference)?;
        let Some(RenderedResource::Deployment(deployment)) = state
            .objects
            .get_mut(&reference)
            .map(|stored| &mut stored.object)
        else {
            return Err(not_found(reference));
        };

        deployment.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
        state.scaled.push((name.to_string(), replicas));
        Ok(())
    }

    async fn pod_logs(&self, namespace: &str, pod: &str) -> ClusterResult<Vec<String>> {
        let state = self.state();
        state.check(
            MockOp::Logs,
            &ResourceRef::namespaced(ResourceKind::Pod, namespace, pod),
        )?;
        Ok(state.logs.get(pod).cloned().unwrap_or_default())
    }
}
