use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, EvictParams, ListParams};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{event, instrument, Level};

use crate::error::Error;
use crate::libs::helpers;

/// How long to stall between eviction attempts held off by a disruption budget
const EVICTION_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// How often to poll for an evicted pod to disappear
const DELETION_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Wrapper for pod api routes
pub struct Pods {
    /// Client to use for creating namespaced clients
    client: kube::Client,
    /// Pod API client for all namespaces
    api: Api<Pod>,
}

impl Pods {
    /// Creates a new pods wrapper
    ///
    /// # Arguments
    ///
    /// * `client` - Kubernetes client
    pub fn new(client: &kube::Client) -> Self {
        let api: Api<Pod> = Api::all(client.clone());
        Pods {
            client: client.clone(),
            api,
        }
    }

    /// Get a client scoped to a pods namespace
    fn namespaced(&self, pod: &Pod) -> Api<Pod> {
        match pod.metadata.namespace.as_deref() {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }

    /// List the non terminal pods assigned to a node
    ///
    /// # Arguments
    ///
    /// * `node` - The node to list pods from
    #[instrument(name = "k8s::Pods::list_on_node", skip(self), err(Debug))]
    pub async fn list_on_node(&self, node: &str) -> Result<Vec<Pod>, Error> {
        let params = ListParams::default().fields(&format!(
            "spec.nodeName=={node},status.phase!=Succeeded,status.phase!=Failed"
        ));
        let pods = self.api.list(&params).await?;
        Ok(pods.items)
    }

    /// List pods the scheduler has not been able to place anywhere
    #[instrument(name = "k8s::Pods::list_unschedulable", skip_all, err(Debug))]
    pub async fn list_unschedulable(&self) -> Result<Vec<Pod>, Error> {
        // unplaced pods are pending with no node assigned
        let params = ListParams::default().fields("spec.nodeName==,status.phase==Pending");
        let pods = self.api.list(&params).await?;
        // only count pods the scheduler has actually given up on
        let unschedulable = pods
            .into_iter()
            .filter(|pod| {
                pod.status
                    .as_ref()
                    .and_then(|status| status.conditions.as_ref())
                    .map(|conditions| {
                        conditions.iter().any(|cond| {
                            cond.type_ == "PodScheduled"
                                && cond.status == "False"
                                && cond.reason.as_deref() == Some("Unschedulable")
                        })
                    })
                    .unwrap_or(false)
            })
            .collect();
        Ok(unschedulable)
    }

    /// Evict a pod, honouring disruption budgets
    ///
    /// A 429 means a budget is holding the eviction off and a 500 a
    /// misconfigured budget; both stall for a fixed interval and retry until
    /// the timeout runs out. A pod that is already gone counts as evicted.
    ///
    /// # Arguments
    ///
    /// * `pod` - The pod to evict
    /// * `grace` - The graceful termination window to grant
    /// * `timeout` - How long to keep retrying held off evictions
    #[instrument(
        name = "k8s::Pods::evict",
        skip_all,
        fields(pod = %helpers::pod_id(pod)),
        err(Debug)
    )]
    pub async fn evict(&self, pod: &Pod, grace: Duration, timeout: Duration) -> Result<(), Error> {
        let api = self.namespaced(pod);
        let name = pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::new("Pod has no name"))?;
        let params = EvictParams {
            delete_options: Some(DeleteParams::default().grace_period(grace.as_secs() as u32)),
            ..Default::default()
        };
        let deadline = Instant::now() + timeout;
        loop {
            match api.evict(&name, &params).await {
                Ok(_) => {
                    event!(Level::INFO, msg = "Eviction accepted");
                    return Ok(());
                }
                // the pod is already gone
                Err(kube::Error::Api(err)) if err.code == 404 => return Ok(()),
                Err(kube::Error::Api(err)) if err.code == 429 || err.code == 500 => {
                    if Instant::now() + EVICTION_RETRY_INTERVAL >= deadline {
                        return Err(Error::new(format!(
                            "Timed out waiting to evict pod {}: {}",
                            helpers::pod_id(pod),
                            err
                        )));
                    }
                    event!(Level::WARN, code = err.code, msg = "Eviction held off, retrying");
                    sleep(EVICTION_RETRY_INTERVAL).await;
                }
                Err(error) => return Err(Error::from(error)),
            }
        }
    }

    /// Wait for an evicted pod to be deleted
    ///
    /// # Arguments
    ///
    /// * `pod` - The pod to wait on
    /// * `timeout` - How long to wait before giving up
    #[instrument(
        name = "k8s::Pods::wait_for_deletion",
        skip_all,
        fields(pod = %helpers::pod_id(pod)),
        err(Debug)
    )]
    pub async fn wait_for_deletion(&self, pod: &Pod, timeout: Duration) -> Result<(), Error> {
        let api = self.namespaced(pod);
        let name = pod
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::new("Pod has no name"))?;
        let start = Instant::now();
        loop {
            match api.get(&name).await {
                Err(kube::Error::Api(err)) if err.code == 404 => {
                    event!(Level::INFO, msg = "Pod deleted");
                    return Ok(());
                }
                Ok(_) => event!(Level::DEBUG, msg = "Pod not yet deleted"),
                // keep polling through transient read errors until the timeout
                Err(error) => event!(
                    Level::WARN,
                    error = error.to_string(),
                    msg = "Failed to check pod"
                ),
            }
            if start.elapsed() > timeout {
                return Err(Error::new(format!(
                    "Pod {} was not deleted within {}s",
                    helpers::pod_id(pod),
                    timeout.as_secs()
                )));
            }
            sleep(DELETION_CHECK_INTERVAL).await;
        }
    }
}
