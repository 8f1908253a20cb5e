//! Test helpers for integration tests

use std::time::Duration;

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::Client;
use tokio::time::sleep;

use restore_files_task::task::{RestoreTask, TaskArgs, UploadEndpoints};
use restore_files_task::upload::bootstrap::UPLOAD_SERVICE_ACCOUNT;
use restore_task_common::kube_utils::create_client;

/// Namespace override for the tests
pub const NAMESPACE_ENV: &str = "RESTORE_TASK_TEST_NAMESPACE";

/// Namespace the tests run in
pub fn test_namespace() -> String {
    std::env::var(NAMESPACE_ENV)
        .ok()
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| "default".to_string())
}

/// Client for the current kubeconfig context
pub async fn ensure_test_client() -> Result<Client, String> {
    create_client(None)
        .await
        .map_err(|e| format!("failed to create client: {e}"))
}

/// Task with a fixed ID so repeated runs reuse the same resource names
pub fn sample_task(task_id: &str) -> RestoreTask {
    RestoreTask::new(
        TaskArgs {
            backup_id: "abc123".to_string(),
            restore_filter: "/data/nginx".to_string(),
        },
        test_namespace(),
        Some(task_id.to_string()),
        UploadEndpoints {
            token_host: "ssh.lagoon.example".to_string(),
            token_port: "22".to_string(),
            api_host: "https://api.lagoon.example".to_string(),
        },
        "integration",
    )
}

/// Create the upload service account if it is missing
///
/// Pods naming a service account that does not exist are rejected at
/// admission.
pub async fn ensure_upload_service_account(client: &Client) -> Result<(), String> {
    let api: Api<ServiceAccount> = Api::namespaced(client.clone(), &test_namespace());
    let existing = api
        .get_opt(UPLOAD_SERVICE_ACCOUNT)
        .await
        .map_err(|e| format!("failed to get service account: {e}"))?;
    if existing.is_some() {
        return Ok(());
    }

    let sa = ServiceAccount {
        metadata: ObjectMeta {
            name: Some(UPLOAD_SERVICE_ACCOUNT.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    match api.create(&PostParams::default(), &sa).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
        Err(e) => Err(format!("failed to create service account: {e}")),
    }
}

/// Wait until a volume claim is gone
///
/// Deletion only marks the claim while its protection finalizer runs.
pub async fn wait_for_pvc_gone(client: &Client, name: &str, timeout: Duration) -> bool {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), &test_namespace());
    wait_until(timeout, || async {
        matches!(api.get_opt(name).await, Ok(None))
    })
    .await
}

/// Wait until a pod is gone
pub async fn wait_for_pod_gone(client: &Client, name: &str, timeout: Duration) -> bool {
    let api: Api<Pod> = Api::namespaced(client.clone(), &test_namespace());
    wait_until(timeout, || async { matches!(api.get_opt(name).await, Ok(None)) }).await
}

async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_secs(1)).await;
    }
}
