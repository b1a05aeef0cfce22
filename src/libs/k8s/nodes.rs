use k8s_openapi::api::core::v1::{Node, Taint};
use kube::api::{Api, ListParams, PostParams};
use tracing::{event, instrument, Level};

use crate::error::Error;

/// Wrapper for node api routes
pub struct Nodes {
    /// API client for node commands
    api: Api<Node>,
}

/// Remove every taint with the given key, ignoring order
///
/// Returns whether anything was removed.
pub(crate) fn strip_taints(taints: &mut Vec<Taint>, key: &str) -> bool {
    let before = taints.len();
    let mut index = 0;
    while index < taints.len() {
        if taints[index].key == key {
            // delete the element without preserving order
            taints.swap_remove(index);
        } else {
            index += 1;
        }
    }
    taints.len() != before
}

impl Nodes {
    /// Build a new wrapper for node functions
    ///
    /// # Arguments
    ///
    /// * `client` - Kubernetes client
    pub fn new(client: &kube::Client) -> Self {
        Nodes {
            api: Api::all(client.clone()),
        }
    }

    /// Check whether a node is ready and accepting pods
    fn ready(node: &Node) -> bool {
        // cordoned nodes are not usable targets or sources
        if node
            .spec
            .as_ref()
            .and_then(|spec| spec.unschedulable)
            .unwrap_or(false)
        {
            return false;
        }
        node.status
            .as_ref()
            .and_then(|status| status.conditions.as_ref())
            .map(|conditions| {
                conditions
                    .iter()
                    .any(|cond| cond.type_ == "Ready" && cond.status == "True")
            })
            .unwrap_or(false)
    }

    /// List all ready schedulable nodes in the cluster
    #[instrument(name = "k8s::Nodes::list_ready", skip_all, err(Debug))]
    pub async fn list_ready(&self) -> Result<Vec<Node>, Error> {
        let nodes = self.api.list(&ListParams::default()).await?;
        Ok(nodes.into_iter().filter(Self::ready).collect())
    }

    /// Remove every taint with the given key from a node
    ///
    /// Returns whether the node actually carried the taint.
    ///
    /// # Arguments
    ///
    /// * `node` - The node to update
    /// * `key` - The taint key to remove
    #[instrument(name = "k8s::Nodes::remove_taint", skip(self, node), err(Debug))]
    pub async fn remove_taint(&self, node: &Node, key: &str) -> Result<bool, Error> {
        let name = node
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::new("node does not have a name"))?;
        let mut updated = node.clone();
        let changed = match updated.spec.as_mut().and_then(|spec| spec.taints.as_mut()) {
            Some(taints) => strip_taints(taints, key),
            None => false,
        };
        if !changed {
            return Ok(false);
        }
        self.api
            .replace(&name, &PostParams::default(), &updated)
            .await?;
        event!(Level::INFO, node = name, taint = key, msg = "Successfully removed taint on node");
        Ok(true)
    }
}
