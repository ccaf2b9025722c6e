//! Provisioning and lifecycle management of notebook servers and an MLflow
//! tracking service on a single-node Kubernetes cluster.

pub mod cluster;
pub mod config;
pub mod manifests;
pub mod output;
pub mod readiness;
pub mod workflow;
