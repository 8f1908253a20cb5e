//! Best-effort teardown of task resources
//!
//! Deletion errors are logged and never abort the remaining deletions. A
//! resource that is already gone is not an error.

use std::sync::Arc;

use tracing::{debug, info, warn};

use restore_task_common::Error;

use crate::client::TaskClient;

/// Cluster resources created by one phase of a task
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskResources {
    /// Volume claims, restore or archive target
    pub volume_claims: Vec<String>,
    /// k8up Restore
    pub restore: Option<String>,
    /// Upload pod
    pub pod: Option<String>,
}

impl TaskResources {
    /// Resources holding only a volume claim
    pub fn claim(name: impl Into<String>) -> Self {
        Self {
            volume_claims: vec![name.into()],
            ..Default::default()
        }
    }

    /// Add a Restore
    pub fn with_restore(mut self, name: impl Into<String>) -> Self {
        self.restore = Some(name.into());
        self
    }

    /// Add a pod
    pub fn with_pod(mut self, name: impl Into<String>) -> Self {
        self.pod = Some(name.into());
        self
    }

    /// Whether there is nothing to delete
    pub fn is_empty(&self) -> bool {
        self.volume_claims.is_empty() && self.restore.is_none() && self.pod.is_none()
    }
}

/// Delete task resources: pod, then Restore, then volume claims
///
/// The pod goes first so its claims are no longer in use when deleted.
pub async fn cleanup(client: &dyn TaskClient, resources: &TaskResources) {
    if let Some(pod) = &resources.pod {
        report("pod", pod, client.delete_pod(pod).await);
    }
    if let Some(restore) = &resources.restore {
        report("restore", restore, client.delete_restore(restore).await);
    }
    for pvc in &resources.volume_claims {
        report("pvc", pvc, client.delete_pvc(pvc).await);
    }
}

fn report(kind: &str, name: &str, result: Result<(), Error>) {
    match result {
        Ok(()) => info!(kind = %kind, name = %name, "Cleaned up"),
        Err(e) if e.is_not_found() => debug!(kind = %kind, name = %name, "Already deleted"),
        Err(e) => warn!(kind = %kind, name = %name, error = %e, "Failed to clean up"),
    }
}

/// Deferred cleanup of one phase's resources
///
/// Running consumes the handle, so each resource set is cleaned up at most
/// once. Every workflow path ends by running or handing back its handle.
#[must_use = "task resources leak unless the cleanup is run"]
pub struct Cleanup {
    client: Arc<dyn TaskClient>,
    resources: TaskResources,
}

impl Cleanup {
    /// Create a cleanup handle for `resources`
    pub fn new(client: Arc<dyn TaskClient>, resources: TaskResources) -> Self {
        Self { client, resources }
    }

    /// Resources this handle deletes
    pub fn resources(&self) -> &TaskResources {
        &self.resources
    }

    /// Delete the resources
    pub async fn run(self) {
        if self.resources.is_empty() {
            return;
        }
        cleanup(self.client.as_ref(), &self.resources).await;
    }
}

impl std::fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cleanup")
            .field("resources", &self.resources)
            .finish()
    }
}
