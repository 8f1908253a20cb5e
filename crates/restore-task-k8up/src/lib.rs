//! Typed k8up resources for the restore files task
//!
//! - **restore**: the `Restore` custom resource and its condition vocabulary
//! - **schedule**: the `Schedule` custom resource, read for its restic backend

pub mod restore;
pub mod schedule;

pub use restore::{
    FolderRestore, Restore, RestoreMethod, RestoreSpec, RestoreStatus, CONDITION_COMPLETED,
    CONDITION_PROGRESSING, CONDITION_READY, REASON_CREATION_FAILED, REASON_FAILED,
};
pub use schedule::{Schedule, ScheduleSpec, LAGOON_BACKUP_SCHEDULE};
