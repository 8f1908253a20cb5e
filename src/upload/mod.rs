//! Upload phase
//!
//! The restore command hands the restored volume claim to an [`UploadRunner`]:
//!
//! - [`PodUploadRunner`] bootstraps a pod that mounts the claim and runs this
//!   binary's `upload` command. This is the production path, since the task pod
//!   itself cannot mount the claim.
//! - [`InProcessUploadRunner`] archives and uploads from this process. The claim
//!   must already be mounted at the restore target, as in local testing.

pub mod bootstrap;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use restore_task_common::Error;

use crate::archive::{archive_dir, format_bytes};
use crate::cleanup::Cleanup;
use crate::lagoon::ArchiveUploader;
use crate::task::RestoreTask;

pub use bootstrap::{build_upload_pod, resolve_image, PodUploadRunner};

/// Runs the upload phase for a restored volume claim
#[async_trait]
pub trait UploadRunner: Send + Sync {
    /// Archive the files in `restore_claim` and upload them to the task
    ///
    /// On success returns the cleanup for resources the upload created, to be
    /// run once the whole task is done. On failure those resources are
    /// already cleaned up.
    async fn run(&self, task: &RestoreTask, restore_claim: &str) -> Result<Option<Cleanup>, Error>;
}

/// Archive the restore target and upload it to the task
///
/// This is the whole `upload` command. Cluster resources belong to the parent
/// process and are never touched here.
pub async fn upload_pvc_to_task(
    task: &RestoreTask,
    uploader: &dyn ArchiveUploader,
    restore_target: &Path,
    archive_target: &Path,
) -> Result<PathBuf, Error> {
    info!(source = %restore_target.display(), "Archiving restored files");
    let archive = archive_dir(restore_target, archive_target, &task.archive_file_name()).await?;

    let size = tokio::fs::metadata(&archive)
        .await
        .map_err(|e| Error::archive("stat", format!("failed to read archive: {}", e)))?
        .len();
    info!(
        archive = %archive.display(),
        size = %format_bytes(size),
        task = %task.task_id,
        "Uploading archive to Lagoon task"
    );

    uploader.upload(&archive).await?;
    Ok(archive)
}

/// [`UploadRunner`] that archives and uploads from this process
pub struct InProcessUploadRunner {
    uploader: Box<dyn ArchiveUploader>,
    restore_target: PathBuf,
    archive_target: PathBuf,
}

impl InProcessUploadRunner {
    /// Runner reading the restored files from `restore_target`
    pub fn new(
        uploader: Box<dyn ArchiveUploader>,
        restore_target: impl Into<PathBuf>,
        archive_target: impl Into<PathBuf>,
    ) -> Self {
        Self {
            uploader,
            restore_target: restore_target.into(),
            archive_target: archive_target.into(),
        }
    }
}

#[async_trait]
impl UploadRunner for InProcessUploadRunner {
    async fn run(&self, task: &RestoreTask, restore_claim: &str) -> Result<Option<Cleanup>, Error> {
        info!(pvc = %restore_claim, "Uploading from this process");
        upload_pvc_to_task(
            task,
            self.uploader.as_ref(),
            &self.restore_target,
            &self.archive_target,
        )
        .await?;
        Ok(None)
    }
}
