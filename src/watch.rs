//! Waiting for terminal conditions
//!
//! The observe functions hold the decision logic: given the latest version of
//! the watched object, report progress and decide whether the wait is over.
//! The wait functions drive a watch stream through them. Only opening the watch
//! can fail a wait; errors on an open watch are logged and skipped. Dropping
//! the stream on every exit path stops the server-side watch.

use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, info, warn};

use restore_task_common::kube_utils::{is_condition_true, STATUS_TRUE};
use restore_task_common::Error;
use restore_task_k8up::{
    Restore, CONDITION_COMPLETED, CONDITION_PROGRESSING, CONDITION_READY, REASON_CREATION_FAILED,
};

use crate::client::{TaskClient, WatchStream};

/// Pod phase of a successfully finished pod
pub const POD_SUCCEEDED: &str = "Succeeded";
/// Pod phase of a failed pod
pub const POD_FAILED: &str = "Failed";

/// Whether a wait continues after an update
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchStep {
    /// Keep waiting
    Continue,
    /// A terminal condition was reached
    Done,
}

/// Progress messages already reported, so repeated updates are not logged twice
#[derive(Debug, Default)]
pub struct RestoreProgress {
    ready: Option<String>,
    progressing: Option<String>,
}

impl RestoreProgress {
    /// Inspect one Restore update
    ///
    /// Ready is checked first and ends the wait on CreationFailed. Progressing
    /// messages are logged while the condition is true. The wait ends once
    /// Completed is true.
    pub fn observe(&mut self, restore: &Restore) -> WatchStep {
        if let Some(ready) = restore.condition(CONDITION_READY) {
            if self.ready.as_deref() != Some(ready.message.as_str()) {
                info!(condition = CONDITION_READY, "Restore progress: {}", ready.message);
                self.ready = Some(ready.message.clone());
            }
            if ready.reason == REASON_CREATION_FAILED {
                return WatchStep::Done;
            }
        }

        if let Some(progressing) = restore.condition(CONDITION_PROGRESSING) {
            if progressing.status == STATUS_TRUE
                && self.progressing.as_deref() != Some(progressing.message.as_str())
            {
                info!(
                    condition = CONDITION_PROGRESSING,
                    "Restore progress: {}", progressing.message
                );
                self.progressing = Some(progressing.message.clone());
            }
        }

        if is_condition_true(restore.conditions(), CONDITION_COMPLETED) {
            return WatchStep::Done;
        }
        WatchStep::Continue
    }
}

/// Inspect one Pod update; the wait ends once the pod succeeded or failed
pub fn observe_pod(pod: &Pod) -> WatchStep {
    match pod_phase(pod) {
        Some(POD_SUCCEEDED) | Some(POD_FAILED) => WatchStep::Done,
        _ => WatchStep::Continue,
    }
}

/// Current phase of a pod, if reported
pub fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}

/// Wait until the named Restore reaches a terminal condition
///
/// Blocks until k8up reports a terminal condition or the watch closes, unless
/// `deadline` is set. The final status is not returned; re-fetch the Restore
/// to classify it.
pub async fn wait_for_restore(
    client: &dyn TaskClient,
    name: &str,
    deadline: Option<Duration>,
) -> Result<(), Error> {
    let stream = client.watch_restore(name).await?;
    let mut progress = RestoreProgress::default();
    let what = format!("restore {}", name);
    bounded(deadline, &what, drive(stream, &what, |r| progress.observe(r))).await
}

/// Wait until the named Pod succeeds or fails
pub async fn wait_for_pod(
    client: &dyn TaskClient,
    name: &str,
    deadline: Option<Duration>,
) -> Result<(), Error> {
    let stream = client.watch_pod(name).await?;
    let what = format!("pod {}", name);
    bounded(deadline, &what, drive(stream, &what, |p| {
        if let Some(phase) = pod_phase(p) {
            debug!(pod = %what, phase = %phase, "Pod phase");
        }
        observe_pod(p)
    }))
    .await
}

/// Errors on an open watch are transient; the watcher resumes after them
async fn drive<T, F>(mut stream: WatchStream<T>, what: &str, mut observe: F)
where
    F: FnMut(&T) -> WatchStep,
{
    while let Some(update) = stream.next().await {
        match update {
            Ok(obj) => {
                if observe(&obj) == WatchStep::Done {
                    return;
                }
            }
            Err(e) => warn!(watch = %what, error = %e, "Watch error, still waiting"),
        }
    }
    warn!(watch = %what, "Watch closed before a terminal condition");
}

async fn bounded<F>(deadline: Option<Duration>, what: &str, wait: F) -> Result<(), Error>
where
    F: std::future::Future<Output = ()>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| Error::timeout(what)),
        None => {
            wait.await;
            Ok(())
        }
    }
}
