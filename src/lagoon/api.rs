//! Lagoon GraphQL API client
//!
//! Files are attached to a task with the `uploadFilesForTask` mutation, sent
//! as a GraphQL multipart request: an `operations` part holding the query with
//! `null` placeholders, a `map` part pointing each file part at a placeholder,
//! then the file parts themselves.

use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use restore_task_common::Error;

/// Mutation attaching uploaded files to a task
pub const UPLOAD_FILES_FOR_TASK: &str = "mutation uploadFilesForTask($task: Int!, $files: [Upload]!) { uploadFilesForTask(input: {task: $task, files: $files}) { id files { filename download } } }";

/// Connect timeout for API requests
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A file attached to a task
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TaskFile {
    /// File name as stored by Lagoon
    pub filename: String,
    /// Download URL, when Lagoon returns one
    #[serde(default)]
    pub download: Option<String>,
}

/// Task returned by the upload mutation
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct UploadedTask {
    /// Task ID
    pub id: i64,
    /// All files attached to the task
    #[serde(default)]
    pub files: Vec<TaskFile>,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadData {
    upload_files_for_task: Option<UploadedTask>,
}

/// Client for one GraphQL endpoint with a bearer token
pub struct LagoonClient {
    http: Client,
    endpoint: String,
    token: String,
}

impl LagoonClient {
    /// Create a client for `endpoint` (the full `/graphql` URL)
    pub fn new(
        endpoint: impl Into<String>,
        token: impl Into<String>,
        user_agent: &str,
    ) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::api(format!("failed to build http client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            token: token.into(),
        })
    }

    /// Upload a file and attach it to a task
    pub async fn upload_files_for_task(
        &self,
        task_id: i64,
        path: &Path,
    ) -> Result<UploadedTask, Error> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::api(format!("not a file: {}", path.display())))?;
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::api(format!("failed to open {}: {}", path.display(), e)))?;
        let length = file
            .metadata()
            .await
            .map_err(|e| Error::api(format!("failed to stat {}: {}", path.display(), e)))?
            .len();

        let part = Part::stream_with_length(Body::from(file), length)
            .file_name(file_name)
            .mime_str("application/gzip")
            .map_err(|e| Error::api(e.to_string()))?;
        let form = Form::new()
            .text("operations", operations(task_id).to_string())
            .text("map", file_map().to_string())
            .part("0", part);

        debug!(
            endpoint = %self.endpoint,
            task = task_id,
            bytes = length,
            "Uploading file to task"
        );
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::api(format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::api(format!("failed to read response: {}", e)))?;
        if !status.is_success() {
            return Err(Error::api_status(status.as_u16(), body.trim().to_string()));
        }
        parse_upload_response(&body)
    }
}

/// `operations` part: the mutation with a null placeholder for one file
pub fn operations(task_id: i64) -> serde_json::Value {
    json!({
        "query": UPLOAD_FILES_FOR_TASK,
        "variables": {
            "task": task_id,
            "files": [null],
        },
    })
}

/// `map` part: multipart field "0" fills the first file placeholder
pub fn file_map() -> serde_json::Value {
    json!({ "0": ["variables.files.0"] })
}

/// Interpret a GraphQL response body of the upload mutation
pub fn parse_upload_response(body: &str) -> Result<UploadedTask, Error> {
    let response: GraphQlResponse<UploadData> = serde_json::from_str(body)
        .map_err(|e| Error::api(format!("invalid response: {}", e)))?;
    if !response.errors.is_empty() {
        let messages: Vec<_> = response.errors.into_iter().map(|e| e.message).collect();
        return Err(Error::api(messages.join("; ")));
    }
    response
        .data
        .and_then(|d| d.upload_files_for_task)
        .ok_or_else(|| Error::api("response contained no task"))
}
