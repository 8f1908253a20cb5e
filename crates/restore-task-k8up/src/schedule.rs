//! k8up Schedule custom resource
//!
//! Only the restic backend is read; Lagoon creates one Schedule per environment
//! namespace and the restore reuses its repository configuration.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the Schedule Lagoon creates in every environment namespace
pub const LAGOON_BACKUP_SCHEDULE: &str = "k8up-lagoon-backup-schedule";

/// Specification for a k8up Schedule
///
/// Fields other than `backend` (backup/check/prune cron settings) are not
/// modelled and are ignored on deserialization.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "k8up.io",
    version = "v1",
    kind = "Schedule",
    plural = "schedules",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSpec {
    /// Restic backend configuration (repository, credentials, bucket)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Map<String, serde_json::Value>>")]
    pub backend: Option<serde_json::Value>,
}
