//! Lagoon upload client
//!
//! Uploading is three hard steps with no retries: retrieve a token over SSH,
//! bind a GraphQL client to the API host, submit the archive to the task.

pub mod api;
pub mod token;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

#[cfg(test)]
use mockall::automock;

use restore_task_common::Error;

use crate::task::RestoreTask;

pub use api::{LagoonClient, UploadedTask};
pub use token::TokenSource;

/// Sends an archive to the task record
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ArchiveUploader: Send + Sync {
    /// Upload the file at `archive` to the task
    async fn upload(&self, archive: &Path) -> Result<(), Error>;
}

/// [`ArchiveUploader`] for the Lagoon API
pub struct LagoonUploader {
    tokens: TokenSource,
    endpoint: String,
    task_id: i64,
    user_agent: String,
}

impl LagoonUploader {
    /// Uploader for a task, authenticating with the SSH key at `ssh_key`
    pub fn new(task: &RestoreTask, ssh_key: impl Into<PathBuf>) -> Result<Self, Error> {
        let endpoints = &task.endpoints;
        Ok(Self {
            tokens: TokenSource::new(endpoints.token_host.clone(), endpoints.token_port()?, ssh_key),
            endpoint: endpoints.graphql_url(),
            task_id: task.numeric_task_id()?,
            user_agent: task.user_agent(),
        })
    }
}

#[async_trait]
impl ArchiveUploader for LagoonUploader {
    async fn upload(&self, archive: &Path) -> Result<(), Error> {
        let token = self.tokens.retrieve().await?;
        let client = LagoonClient::new(&self.endpoint, token, &self.user_agent)?;
        let task = client.upload_files_for_task(self.task_id, archive).await?;
        info!(task = task.id, files = task.files.len(), "Archive attached to task");
        Ok(())
    }
}
