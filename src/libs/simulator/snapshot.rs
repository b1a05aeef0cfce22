use k8s_openapi::api::core::v1::{Pod, Taint};
use std::collections::{BTreeMap, HashMap};

use crate::error::Error;
use crate::libs::helpers;
use crate::libs::nodes::{NodeInfo, Resources};

/// A spot node as seen by the placement simulation
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotNode {
    /// The name of this node
    pub name: String,
    /// The labels on this node
    pub labels: BTreeMap<String, String>,
    /// The taints on this node
    pub taints: Vec<Taint>,
    /// The total allocatable resources on this node
    pub allocatable: Resources,
    /// The requested resources including speculative placements
    pub requested: Resources,
}

impl SnapshotNode {
    /// Capture a spot node, skipping pods below the priority cutoff
    ///
    /// # Arguments
    ///
    /// * `info` - The node info to capture
    /// * `priority_threshold` - The lowest pod priority that counts against capacity
    fn from_info(info: &NodeInfo, priority_threshold: i32) -> Result<Self, Error> {
        let mut requested = Resources::default();
        for pod in &info.pods {
            // pods below the priority cutoff do not count against capacity
            let priority = pod.spec.as_ref().and_then(|spec| spec.priority).unwrap_or(0);
            if priority < priority_threshold {
                continue;
            }
            requested.add(&helpers::pod_requests(pod)?);
        }
        let labels = info.node.metadata.labels.clone().unwrap_or_default();
        let taints = info
            .node
            .spec
            .as_ref()
            .and_then(|spec| spec.taints.clone())
            .unwrap_or_default();
        Ok(SnapshotNode {
            name: info.name().to_owned(),
            labels,
            taints,
            allocatable: info.allocatable.clone(),
            requested,
        })
    }

    /// The capacity still free on this node
    pub fn free(&self) -> Resources {
        self.allocatable.saturating_sub(&self.requested)
    }
}

/// A forkable snapshot of spot node placement state
///
/// Fork pushes an undo layer; add_pod records the prior request totals into
/// the top layer before applying them; revert pops the layer and restores in
/// reverse order. A snapshot is built once per tick and dropped at tick end.
#[derive(Debug, Clone)]
pub struct ClusterSnapshot {
    /// The spot nodes by name
    nodes: HashMap<String, SnapshotNode>,
    /// Undo entries captured since each fork, newest layer last
    undo: Vec<Vec<(String, Resources)>>,
}

impl ClusterSnapshot {
    /// Build a snapshot from the spot subset of the node map
    ///
    /// # Arguments
    ///
    /// * `spot` - The spot node infos to capture
    /// * `priority_threshold` - The lowest pod priority that counts against capacity
    pub fn new(spot: &[NodeInfo], priority_threshold: i32) -> Result<Self, Error> {
        let mut nodes = HashMap::with_capacity(spot.len());
        for info in spot {
            let node = SnapshotNode::from_info(info, priority_threshold)?;
            nodes.insert(node.name.clone(), node);
        }
        Ok(ClusterSnapshot {
            nodes,
            undo: Vec::default(),
        })
    }

    /// Get a node in this snapshot
    ///
    /// # Arguments
    ///
    /// * `name` - The name of the node to get
    pub fn get(&self, name: &str) -> Option<&SnapshotNode> {
        self.nodes.get(name)
    }

    /// Push a speculative layer that revert can discard
    pub fn fork(&mut self) {
        self.undo.push(Vec::default());
    }

    /// Discard the newest speculative layer, restoring prior request totals
    pub fn revert(&mut self) {
        if let Some(layer) = self.undo.pop() {
            for (name, prior) in layer.into_iter().rev() {
                if let Some(node) = self.nodes.get_mut(&name) {
                    node.requested = prior;
                }
            }
        }
    }

    /// Speculatively assign a pod to a node so later placements see the claim
    ///
    /// # Arguments
    ///
    /// * `pod` - The pod to assign
    /// * `node_name` - The node to assign it to
    pub fn add_pod(&mut self, pod: &Pod, node_name: &str) -> Result<(), Error> {
        let requests = helpers::pod_requests(pod)?;
        let node = match self.nodes.get_mut(node_name) {
            Some(node) => node,
            None => return Err(Error::new(format!("Unknown node {node_name} in snapshot"))),
        };
        // remember the prior totals so revert can roll this back
        if let Some(layer) = self.undo.last_mut() {
            layer.push((node_name.to_owned(), node.requested.clone()));
        }
        node.requested.add(&requests);
        Ok(())
    }
}
