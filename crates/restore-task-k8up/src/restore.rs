//! k8up Restore custom resource
//!
//! A Restore instructs k8up to run restic against a snapshot and write the
//! selected paths into a volume. Progress is reported through standard
//! `metav1.Condition`s.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use restore_task_common::kube_utils::find_condition;

/// Condition type set once k8up has accepted (or rejected) the Restore
pub const CONDITION_READY: &str = "Ready";
/// Condition type updated while the restore job runs
pub const CONDITION_PROGRESSING: &str = "Progressing";
/// Condition type set when the restore job finished, successfully or not
pub const CONDITION_COMPLETED: &str = "Completed";

/// Ready reason reported when k8up could not create the restore job
pub const REASON_CREATION_FAILED: &str = "CreationFailed";
/// Completed reason reported when the restore job failed
pub const REASON_FAILED: &str = "Failed";

/// Specification for a k8up Restore
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "k8up.io",
    version = "v1",
    kind = "Restore",
    plural = "restores",
    namespaced,
    status = "RestoreStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSpec {
    /// Restic backend configuration, copied from the namespace's Schedule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Map<String, serde_json::Value>>")]
    pub backend: Option<serde_json::Value>,

    /// Snapshot ID to restore from
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub snapshot: String,

    /// Path filter passed to `restic restore --include`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub restore_filter: String,

    /// Where restored files are written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_method: Option<RestoreMethod>,

    /// Number of finished jobs k8up keeps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_jobs: Option<i32>,

    /// Number of failed jobs k8up keeps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_jobs_history_limit: Option<i32>,

    /// Number of successful jobs k8up keeps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful_jobs_history_limit: Option<i32>,
}

/// Restore destination
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestoreMethod {
    /// Restore into a folder on a PersistentVolumeClaim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<FolderRestore>,
}

/// Folder restore target, an inlined `PersistentVolumeClaimVolumeSource`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FolderRestore {
    /// Name of the PVC the files are written to
    pub claim_name: String,

    /// Mount the claim read-only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only: Option<bool>,
}

impl RestoreMethod {
    /// Restore into the root of the named claim
    pub fn folder(claim_name: impl Into<String>) -> Self {
        Self {
            folder: Some(FolderRestore {
                claim_name: claim_name.into(),
                read_only: None,
            }),
        }
    }
}

/// Status of a k8up Restore
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestoreStatus {
    /// Status conditions (Ready, Progressing, Completed)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Whether the job runs exclusively
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive: Option<bool>,

    /// Set once the job started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<bool>,

    /// Set once the job finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished: Option<bool>,
}

impl RestoreStatus {
    /// Look up a condition by type
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        find_condition(&self.conditions, condition_type)
    }
}

impl Restore {
    /// Conditions reported so far, empty when there is no status yet
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }

    /// Look up a condition by type
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        find_condition(self.conditions(), condition_type)
    }
}
