//! Integration tests for task resources
//!
//! These tests tell the story of the cluster objects a restore task leaves
//! behind while it runs: two volume claims and the upload pod. Every one of
//! them must be created with the task's labels and must be gone once the
//! task's cleanup has run, whether or not it ever existed.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{Api, ListParams};

use restore_files_task::cleanup::{cleanup, Cleanup, TaskResources};
use restore_files_task::client::{KubeTaskClient, TaskClient};
use restore_files_task::provision::{create_volume_claim, DEFAULT_CLAIM_SIZE};
use restore_files_task::upload::bootstrap::{build_upload_pod, UploadPodParams};
use restore_task_common::{LABEL_MANAGED_BY, LABEL_MANAGED_BY_RESTORE_TASK, LABEL_TASK_KEY};

use super::helpers::{
    ensure_test_client, ensure_upload_service_account, sample_task, test_namespace,
    wait_for_pod_gone, wait_for_pvc_gone,
};

const GONE_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// Volume Claim Stories
// =============================================================================

/// Story: A task provisions its restore and archive claims, then tears them down
///
/// Expected behavior:
/// - Both claims are created in the task namespace
/// - Both carry the task key label, so they can be found by task
/// - Running the deferred cleanup deletes both
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_task_claims_are_labelled_and_cleaned_up() {
    let kube = ensure_test_client()
        .await
        .expect("failed to create client");
    let task = sample_task("9001");
    let client: Arc<dyn TaskClient> =
        Arc::new(KubeTaskClient::new(kube.clone(), task.namespace.clone()));
    let restore_claim = task.restore_claim_name();
    let archive_claim = task.archive_claim_name();

    // Cleanup anything left behind by a previous run
    cleanup(
        client.as_ref(),
        &TaskResources::claim(&restore_claim).with_restore(task.restore_name()),
    )
    .await;
    cleanup(client.as_ref(), &TaskResources::claim(&archive_claim)).await;
    assert!(wait_for_pvc_gone(&kube, &restore_claim, GONE_TIMEOUT).await);
    assert!(wait_for_pvc_gone(&kube, &archive_claim, GONE_TIMEOUT).await);

    // Act: the task provisions both claims
    create_volume_claim(client.as_ref(), &task, &restore_claim, DEFAULT_CLAIM_SIZE)
        .await
        .expect("failed to create restore claim");
    create_volume_claim(client.as_ref(), &task, &archive_claim, DEFAULT_CLAIM_SIZE)
        .await
        .expect("failed to create archive claim");

    // Assert: the claims can be found by task
    let api: Api<PersistentVolumeClaim> = Api::namespaced(kube.clone(), &test_namespace());
    let selector = format!("{}={}", LABEL_TASK_KEY, task.task_key);
    let mut names: Vec<String> = api
        .list(&ListParams::default().labels(&selector))
        .await
        .expect("failed to list claims")
        .items
        .into_iter()
        .filter_map(|pvc| pvc.metadata.name)
        .collect();
    names.sort();
    assert_eq!(names, vec![archive_claim.clone(), restore_claim.clone()]);

    let fetched = api.get(&restore_claim).await.expect("failed to get claim");
    let labels = fetched.metadata.labels.unwrap_or_default();
    assert_eq!(
        labels.get(LABEL_MANAGED_BY).map(String::as_str),
        Some(LABEL_MANAGED_BY_RESTORE_TASK)
    );

    // Act: the deferred cleanup runs
    Cleanup::new(
        client.clone(),
        TaskResources {
            volume_claims: vec![restore_claim.clone(), archive_claim.clone()],
            restore: None,
            pod: None,
        },
    )
    .run()
    .await;

    // Assert: nothing is left
    assert!(
        wait_for_pvc_gone(&kube, &restore_claim, GONE_TIMEOUT).await,
        "restore claim should be deleted"
    );
    assert!(
        wait_for_pvc_gone(&kube, &archive_claim, GONE_TIMEOUT).await,
        "archive claim should be deleted"
    );
}

/// Story: Cleanup runs for resources that were never created
///
/// A task that fails early still runs its cleanup. Deleting what does not
/// exist is reported as not found and never fails the cleanup.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_cleanup_of_missing_resources_is_harmless() {
    let kube = ensure_test_client()
        .await
        .expect("failed to create client");
    let task = sample_task("9002");
    let client = KubeTaskClient::new(kube, task.namespace.clone());

    let err = client
        .delete_pvc(&task.restore_claim_name())
        .await
        .expect_err("claim should not exist");
    assert!(err.is_not_found(), "unexpected error: {err}");

    let missing = client
        .get_pod(&task.upload_pod_name())
        .await
        .expect("get of a missing pod should succeed");
    assert!(missing.is_none());

    // Completes without panicking
    cleanup(
        &client,
        &TaskResources::claim(task.restore_claim_name()).with_pod(task.upload_pod_name()),
    )
    .await;
}

// =============================================================================
// Upload Pod Stories
// =============================================================================

/// Story: The API server accepts the bootstrapped upload pod
///
/// The pod is only created here, never run to completion: its claims stay
/// unbound and its image is a placeholder.
///
/// Expected behavior:
/// - The pod is created with the task's name and labels
/// - Its container mounts both claims at the configured targets
/// - Cleanup removes the pod and both claims
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_upload_pod_is_accepted_and_cleaned_up() {
    let kube = ensure_test_client()
        .await
        .expect("failed to create client");
    ensure_upload_service_account(&kube)
        .await
        .expect("failed to ensure service account");
    let task = sample_task("9003");
    let client: Arc<dyn TaskClient> =
        Arc::new(KubeTaskClient::new(kube.clone(), task.namespace.clone()));
    let pod_name = task.upload_pod_name();
    let restore_claim = task.restore_claim_name();
    let archive_claim = task.archive_claim_name();
    let resources = TaskResources {
        volume_claims: vec![archive_claim.clone(), restore_claim.clone()],
        restore: None,
        pod: Some(pod_name.clone()),
    };

    // Cleanup anything left behind by a previous run
    cleanup(client.as_ref(), &resources).await;
    assert!(wait_for_pod_gone(&kube, &pod_name, GONE_TIMEOUT).await);

    let payload = task.args.encode().expect("failed to encode payload");
    let params = UploadPodParams {
        image: "registry.invalid/restore-files-task:integration",
        restore_claim: &restore_claim,
        archive_claim: &archive_claim,
        restore_target: Path::new("/restore"),
        archive_target: Path::new("/archive"),
        payload: &payload,
    };

    // Act: the task creates its upload pod
    let created = client
        .create_pod(&build_upload_pod(&task, &params))
        .await
        .expect("failed to create upload pod");

    // Assert: the pod is stored as built
    assert_eq!(created.metadata.name.as_deref(), Some(pod_name.as_str()));
    let labels = created.metadata.labels.clone().unwrap_or_default();
    assert_eq!(
        labels.get(LABEL_TASK_KEY).map(String::as_str),
        Some(task.task_key.as_str())
    );
    let mounts: Vec<String> = created
        .spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .and_then(|c| c.volume_mounts.clone())
        .unwrap_or_default()
        .into_iter()
        .map(|m| m.mount_path)
        .collect();
    assert!(mounts.contains(&"/restore".to_string()));
    assert!(mounts.contains(&"/archive".to_string()));

    let fetched = client
        .get_pod(&pod_name)
        .await
        .expect("failed to get pod");
    assert!(fetched.is_some(), "pod should be readable by name");

    // Act: cleanup runs with the claims never created
    Cleanup::new(client.clone(), resources).run().await;

    // Assert: the pod is gone
    assert!(
        wait_for_pod_gone(&kube, &pod_name, GONE_TIMEOUT).await,
        "upload pod should be deleted"
    );
}
