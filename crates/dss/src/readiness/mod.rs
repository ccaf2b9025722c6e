//! Deployment readiness.
//!
//! Nothing here watches the API server. The [`poller`] re-reads a
//! Deployment and its pods on a fixed interval until it converges, and the
//! [`classifier`] derives a lifecycle state from a single read.

pub mod classifier;
pub mod clock;
pub mod poller;
pub mod snapshot;

pub use self::classifier::classify;
pub use self::classifier::LifecycleState;
pub use self::clock::Clock;
pub use self::clock::TokioClock;
pub use self::clock::VirtualClock;
pub use self::poller::wait_for_ready;
pub use self::poller::PollError;
pub use self::poller::PollPolicy;
pub use self::snapshot::DeploymentSnapshot;
pub use self::snapshot::PodStatusSnapshot;
pub use self::snapshot::WaitingReason;
pub use self::snapshot::WorkloadIdentity;
