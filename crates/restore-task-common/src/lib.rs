//! Common types for the restore files task: errors, Kubernetes helpers, logging

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use error::{Error, ErrorCategory};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Annotation k8up reads to decide whether a PVC or pod is included in backups
pub const K8UP_BACKUP_ANNOTATION: &str = "k8up.io/backup";

/// Value of [`K8UP_BACKUP_ANNOTATION`] that opts a resource out of backup sweeps
pub const K8UP_BACKUP_SKIP: &str = "false";

/// Label key for the task a resource belongs to
pub const LABEL_TASK_KEY: &str = "lagoon.sh/restore-task";

/// Label key identifying the managing component
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label value for resources created by the restore files task
pub const LABEL_MANAGED_BY_RESTORE_TASK: &str = "restore-files-task";
