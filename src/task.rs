//! Restore task identity
//!
//! A [`RestoreTask`] is built once per process and never changes afterwards.
//! Every cluster resource the task creates is named from its task key, so a
//! cleanup pass can find everything and concurrent tasks never collide.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::Rng;
use serde::{Deserialize, Serialize};

use restore_task_common::Error;

/// Prefix of every task key
pub const TASK_KEY_PREFIX: &str = "rft";

/// Arguments Lagoon passes to the advanced task, carried in `JSON_PAYLOAD`
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskArgs {
    /// restic snapshot ID to restore from
    #[serde(rename = "backup_id")]
    pub backup_id: String,
    /// Path filter for the restore
    #[serde(rename = "restore_path")]
    pub restore_filter: String,
}

impl TaskArgs {
    /// Decode a base64-encoded JSON payload
    pub fn decode(encoded: &str) -> Result<Self, Error> {
        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::serialization(format!("invalid task payload encoding: {}", e)))?;
        serde_json::from_slice(&raw)
            .map_err(|e| Error::serialization(format!("invalid task payload: {}", e)))
    }

    /// Encode as base64 JSON, the inverse of [`TaskArgs::decode`]
    pub fn encode(&self) -> Result<String, Error> {
        let raw = serde_json::to_vec(self)
            .map_err(|e| Error::serialization(format!("failed to marshal task args: {}", e)))?;
        Ok(STANDARD.encode(raw))
    }
}

/// Where the upload phase gets its token and sends the archive
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadEndpoints {
    /// SSH token service host
    pub token_host: String,
    /// SSH token service port
    pub token_port: String,
    /// Lagoon API base URL, without the `/graphql` path
    pub api_host: String,
}

impl UploadEndpoints {
    /// GraphQL endpoint derived from the API host
    pub fn graphql_url(&self) -> String {
        format!("{}/graphql", self.api_host.trim_end_matches('/'))
    }

    /// Token port as a TCP port
    pub fn token_port(&self) -> Result<u16, Error> {
        self.token_port
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("invalid token port '{}'", self.token_port)))
    }
}

/// One restore-and-upload run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestoreTask {
    /// Backup ID and restore filter
    pub args: TaskArgs,
    /// Namespace every resource is created in
    pub namespace: String,
    /// Lagoon task ID (or a random local-testing ID)
    pub task_id: String,
    /// Name prefix for every resource of this task
    pub task_key: String,
    /// Token and API endpoints for the upload phase
    pub endpoints: UploadEndpoints,
    /// Version reported to the Lagoon API
    pub version: String,
}

impl RestoreTask {
    /// Build a task; a random `rnd-NNNN` ID is generated when `task_id` is empty
    pub fn new(
        args: TaskArgs,
        namespace: impl Into<String>,
        task_id: Option<String>,
        endpoints: UploadEndpoints,
        version: impl Into<String>,
    ) -> Self {
        let task_id = task_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(random_task_id);
        Self {
            args,
            namespace: namespace.into(),
            task_key: task_key(&task_id),
            task_id,
            endpoints,
            version: version.into(),
        }
    }

    /// PVC the backup is restored into
    pub fn restore_claim_name(&self) -> String {
        format!("restore-target-{}", self.task_key)
    }

    /// PVC the upload pod writes the archive to
    pub fn archive_claim_name(&self) -> String {
        format!("archive-target-{}", self.task_key)
    }

    /// k8up Restore resource
    pub fn restore_name(&self) -> String {
        self.task_key.clone()
    }

    /// Bootstrapped upload pod
    pub fn upload_pod_name(&self) -> String {
        format!("upload-{}", self.task_key)
    }

    /// File name of the archive, unique per backup and task
    pub fn archive_file_name(&self) -> String {
        format!("restore-{}-t{}.tar.gz", self.args.backup_id, self.task_id)
    }

    /// Task ID as the integer the Lagoon API expects
    pub fn numeric_task_id(&self) -> Result<i64, Error> {
        self.task_id
            .parse()
            .map_err(|_| Error::config(format!("task id '{}' is not numeric", self.task_id)))
    }

    /// User agent for Lagoon API requests
    pub fn user_agent(&self) -> String {
        format!("RestoreTask-{}", self.version)
    }
}

/// Task key for a task ID
pub fn task_key(task_id: &str) -> String {
    format!("{}-{}", TASK_KEY_PREFIX, task_id)
}

fn random_task_id() -> String {
    format!("rnd-{:04}", rand::thread_rng().gen_range(0..9999))
}
