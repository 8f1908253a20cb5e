//! Kubernetes operations the restore task performs
//!
//! Everything the orchestrator does against the cluster goes through
//! [`TaskClient`], so workflows can be tested against a mock while production
//! uses [`KubeTaskClient`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use restore_task_common::Error;
use restore_task_k8up::{Restore, Schedule};

/// Stream of object updates from a watch
pub type WatchStream<T> = BoxStream<'static, Result<T, Error>>;

/// Trait abstracting the cluster calls of the restore task
///
/// All calls are scoped to the task's namespace. Every call is attempted once;
/// retries are left to the operator re-running the task.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TaskClient: Send + Sync {
    /// Create a PersistentVolumeClaim
    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, Error>;

    /// Delete a PersistentVolumeClaim by name
    async fn delete_pvc(&self, name: &str) -> Result<(), Error>;

    /// Get a k8up Schedule by name
    async fn get_schedule(&self, name: &str) -> Result<Schedule, Error>;

    /// Create a k8up Restore
    async fn create_restore(&self, restore: &Restore) -> Result<Restore, Error>;

    /// Get a k8up Restore by name
    async fn get_restore(&self, name: &str) -> Result<Restore, Error>;

    /// Delete a k8up Restore by name
    async fn delete_restore(&self, name: &str) -> Result<(), Error>;

    /// Watch a single Restore by name
    ///
    /// Yields the current object once the watch is established, then every
    /// change. Errors yielded by an open watch are transient; it resumes with
    /// backoff. Dropping the stream stops the watch.
    async fn watch_restore(&self, name: &str) -> Result<WatchStream<Restore>, Error>;

    /// Get a Pod by name, `None` when it does not exist
    async fn get_pod(&self, name: &str) -> Result<Option<Pod>, Error>;

    /// Create a Pod
    async fn create_pod(&self, pod: &Pod) -> Result<Pod, Error>;

    /// Delete a Pod by name
    async fn delete_pod(&self, name: &str) -> Result<(), Error>;

    /// Watch a single Pod by name
    async fn watch_pod(&self, name: &str) -> Result<WatchStream<Pod>, Error>;

    /// Full log output of a Pod's only container
    async fn pod_logs(&self, name: &str) -> Result<String, Error>;

    /// Names of the Pods matching a label selector
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<String>, Error>;
}

/// [`TaskClient`] backed by a kube client
pub struct KubeTaskClient {
    client: Client,
    namespace: String,
}

impl KubeTaskClient {
    /// Create a client scoped to one namespace
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn watch_by_name<K>(api: Api<K>, kind: &'static str, name: &str) -> WatchStream<K>
where
    K: kube::Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned + Send + 'static,
    <K as kube::Resource>::DynamicType: Default,
{
    let config = watcher::Config::default().fields(&format!("metadata.name={}", name));
    let what = format!("watch {} {}", kind, name);
    watcher(api, config)
        .default_backoff()
        .applied_objects()
        .map_err(move |e| Error::internal_with_context(what.clone(), e.to_string()))
        .boxed()
}

#[async_trait]
impl TaskClient for KubeTaskClient {
    async fn create_pvc(&self, pvc: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, Error> {
        let name = pvc.metadata.name.as_deref().unwrap_or_default();
        self.api::<PersistentVolumeClaim>()
            .create(&PostParams::default(), pvc)
            .await
            .map_err(|e| Error::kube(format!("create pvc {}", name), e))
    }

    async fn delete_pvc(&self, name: &str) -> Result<(), Error> {
        self.api::<PersistentVolumeClaim>()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::kube(format!("delete pvc {}", name), e))
    }

    async fn get_schedule(&self, name: &str) -> Result<Schedule, Error> {
        self.api::<Schedule>()
            .get(name)
            .await
            .map_err(|e| Error::kube(format!("get schedule {}", name), e))
    }

    async fn create_restore(&self, restore: &Restore) -> Result<Restore, Error> {
        let name = restore.metadata.name.as_deref().unwrap_or_default();
        self.api::<Restore>()
            .create(&PostParams::default(), restore)
            .await
            .map_err(|e| Error::kube(format!("create restore {}", name), e))
    }

    async fn get_restore(&self, name: &str) -> Result<Restore, Error> {
        self.api::<Restore>()
            .get(name)
            .await
            .map_err(|e| Error::kube(format!("get restore {}", name), e))
    }

    async fn delete_restore(&self, name: &str) -> Result<(), Error> {
        self.api::<Restore>()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::kube(format!("delete restore {}", name), e))
    }

    async fn watch_restore(&self, name: &str) -> Result<WatchStream<Restore>, Error> {
        Ok(watch_by_name(self.api::<Restore>(), "restore", name))
    }

    async fn get_pod(&self, name: &str) -> Result<Option<Pod>, Error> {
        self.api::<Pod>()
            .get_opt(name)
            .await
            .map_err(|e| Error::kube(format!("get pod {}", name), e))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, Error> {
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        self.api::<Pod>()
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| Error::kube(format!("create pod {}", name), e))
    }

    async fn delete_pod(&self, name: &str) -> Result<(), Error> {
        self.api::<Pod>()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| Error::kube(format!("delete pod {}", name), e))
    }

    async fn watch_pod(&self, name: &str) -> Result<WatchStream<Pod>, Error> {
        Ok(watch_by_name(self.api::<Pod>(), "pod", name))
    }

    async fn pod_logs(&self, name: &str) -> Result<String, Error> {
        self.api::<Pod>()
            .logs(name, &LogParams::default())
            .await
            .map_err(|e| Error::kube(format!("logs pod {}", name), e))
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<String>, Error> {
        let pods = self
            .api::<Pod>()
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| Error::kube(format!("list pods {}", label_selector), e))?;
        Ok(pods
            .items
            .into_iter()
            .filter_map(|p| p.metadata.name)
            .collect())
    }
}
