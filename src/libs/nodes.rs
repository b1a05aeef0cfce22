//! Classifies cluster nodes and summarises their pods and resources
//!
//! The orderings here are part of the consolidation policy: on-demand nodes
//! are walked emptiest first and spot nodes fullest first.

use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::{Node, Pod};
use std::cmp::Reverse;

use crate::error::Error;
use crate::libs::helpers;
use crate::libs::k8s::Pods;

/// How many per node pod listings to keep in flight at once
const POD_LIST_CONCURRENCY: usize = 5;

/// The classification of a node based on its labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// A node billed at a stable rate that we want to empty
    OnDemand,
    /// A preemptible node that we want to fill
    Spot,
    /// A node matching neither label
    Other,
}

impl NodeRole {
    /// Get our role as a str
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::OnDemand => "on-demand",
            NodeRole::Spot => "spot",
            NodeRole::Other => "other",
        }
    }
}

/// A node label selector in `key` or `key=value` form
#[derive(Debug, Clone)]
pub struct NodeLabel {
    /// The label key to look for
    key: String,
    /// The exact value to require if one was given
    value: Option<String>,
}

impl NodeLabel {
    /// Parse a selector, rejecting anything with more than one `=`
    ///
    /// # Arguments
    ///
    /// * `raw` - The raw selector string
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let parts: Vec<&str> = raw.split('=').collect();
        match parts.as_slice() {
            [key] => Ok(NodeLabel {
                key: (*key).to_owned(),
                value: None,
            }),
            [key, value] => Ok(NodeLabel {
                key: (*key).to_owned(),
                value: Some((*value).to_owned()),
            }),
            _ => Err(Error::new(format!(
                "the node label is not correctly formatted: \
                 expected '<label_name>' or '<label_name>=<label_value>', but got {raw}"
            ))),
        }
    }

    /// Check whether a node carries this label
    ///
    /// # Arguments
    ///
    /// * `node` - The node to check
    pub fn matches(&self, node: &Node) -> bool {
        // nodes without labels never match
        let labels = match &node.metadata.labels {
            Some(labels) => labels,
            None => return false,
        };
        match (&self.value, labels.get(&self.key)) {
            // a bare key matches on presence
            (None, Some(_)) => true,
            (Some(value), Some(found)) => value == found,
            (_, None) => false,
        }
    }
}

/// The two label selectors used to classify nodes
#[derive(Debug, Clone)]
pub struct NodeSelectors {
    /// Selector for nodes to drain
    pub on_demand: NodeLabel,
    /// Selector for nodes to fill
    pub spot: NodeLabel,
}

impl NodeSelectors {
    /// Parse both selectors
    ///
    /// # Arguments
    ///
    /// * `on_demand` - The raw on-demand node selector
    /// * `spot` - The raw spot node selector
    pub fn parse(on_demand: &str, spot: &str) -> Result<Self, Error> {
        Ok(NodeSelectors {
            on_demand: NodeLabel::parse(on_demand)?,
            spot: NodeLabel::parse(spot)?,
        })
    }

    /// Resolve the role of a node
    ///
    /// # Arguments
    ///
    /// * `node` - The node to classify
    pub fn classify(&self, node: &Node) -> NodeRole {
        if self.on_demand.matches(node) {
            NodeRole::OnDemand
        } else if self.spot.matches(node) {
            NodeRole::Spot
        } else {
            NodeRole::Other
        }
    }
}

/// Cpu and memory totals in millicpu and mebibytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resources {
    /// Millicpu
    pub cpu: u64,
    /// Mebibytes of memory
    pub memory: u64,
}

impl Resources {
    /// Check whether we have room for another set of requests
    ///
    /// # Arguments
    ///
    /// * `requests` - The requests to check against
    pub fn enough(&self, requests: &Resources) -> bool {
        self.cpu >= requests.cpu && self.memory >= requests.memory
    }

    /// Add another set of requests to this total
    ///
    /// # Arguments
    ///
    /// * `requests` - The requests to add
    pub fn add(&mut self, requests: &Resources) {
        self.cpu += requests.cpu;
        self.memory += requests.memory;
    }

    /// Subtract a set of requests, clamping at zero
    ///
    /// # Arguments
    ///
    /// * `requests` - The requests to subtract
    pub fn saturating_sub(&self, requests: &Resources) -> Resources {
        Resources {
            cpu: self.cpu.saturating_sub(requests.cpu),
            memory: self.memory.saturating_sub(requests.memory),
        }
    }
}

/// A node together with its pods and resource accounting
#[derive(Debug, Clone)]
pub struct NodeInfo {
    /// The node itself
    pub node: Node,
    /// The pods currently assigned to this node
    pub pods: Vec<Pod>,
    /// The total allocatable resources on this node
    pub allocatable: Resources,
    /// The total requested resources over this nodes pods
    pub requested: Resources,
}

impl NodeInfo {
    /// Build the info record for a node
    ///
    /// # Arguments
    ///
    /// * `node` - The node to summarise
    /// * `pods` - The pods assigned to this node
    pub fn new(node: Node, pods: Vec<Pod>) -> Result<Self, Error> {
        // extract this nodes allocatable resources
        let allocatable = match node.status.as_ref().and_then(|status| status.allocatable.as_ref()) {
            Some(alloc) => Resources {
                cpu: helpers::cpu(alloc.get("cpu"))?,
                memory: helpers::memory(alloc.get("memory"))?,
            },
            None => {
                return Err(Error::new(format!(
                    "Node {} has no allocatable resources",
                    node.metadata.name.as_deref().unwrap_or("unknown")
                )))
            }
        };
        // sum the requests of the pods assigned to this node
        let mut requested = Resources::default();
        for pod in &pods {
            requested.add(&helpers::pod_requests(pod)?);
        }
        Ok(NodeInfo {
            node,
            pods,
            allocatable,
            requested,
        })
    }

    /// Get this nodes name
    pub fn name(&self) -> &str {
        self.node.metadata.name.as_deref().unwrap_or("")
    }

    /// The capacity still free on this node
    ///
    /// Over-committed nodes report zero free capacity rather than wrapping.
    pub fn free(&self) -> Resources {
        self.allocatable.saturating_sub(&self.requested)
    }
}

/// The cluster nodes bucketed by role and ordered for consolidation
#[derive(Debug, Default)]
pub struct NodeMap {
    /// On-demand nodes ascending by requested cpu
    pub on_demand: Vec<NodeInfo>,
    /// Spot nodes descending by requested cpu
    pub spot: Vec<NodeInfo>,
}

impl NodeMap {
    /// Build a node map from the listed nodes, fetching each nodes pods
    ///
    /// Any per node pod listing failure fails the whole build; the control
    /// loop retries on its next tick.
    ///
    /// # Arguments
    ///
    /// * `pods` - The pod api wrapper to list with
    /// * `nodes` - All nodes in the cluster
    /// * `selectors` - The label selectors used to classify nodes
    pub async fn build(
        pods: &Pods,
        nodes: Vec<Node>,
        selectors: &NodeSelectors,
    ) -> Result<NodeMap, Error> {
        // classify the nodes and drop the ones we do not care about
        let classified: Vec<(NodeRole, Node)> = nodes
            .into_iter()
            .map(|node| (selectors.classify(&node), node))
            .filter(|(role, _)| *role != NodeRole::Other)
            .collect();
        // fetch the pods assigned to each node a few at a time
        let names: Vec<String> = classified
            .iter()
            .map(|(_, node)| node.metadata.name.clone().unwrap_or_default())
            .collect();
        let pod_lists = stream::iter(&names)
            .map(|name| pods.list_on_node(name))
            .buffered(POD_LIST_CONCURRENCY)
            .collect::<Vec<Result<Vec<Pod>, Error>>>()
            .await;
        // pair the nodes back up with their pods
        let mut entries = Vec::with_capacity(classified.len());
        for ((role, node), pods) in classified.into_iter().zip(pod_lists) {
            entries.push((role, node, pods?));
        }
        Self::assemble(entries)
    }

    /// Assemble and sort a node map from pre-fetched node and pod lists
    ///
    /// # Arguments
    ///
    /// * `entries` - The classified nodes and their pods
    pub fn assemble(entries: Vec<(NodeRole, Node, Vec<Pod>)>) -> Result<NodeMap, Error> {
        let mut map = NodeMap::default();
        for (role, node, pods) in entries {
            let info = NodeInfo::new(node, pods)?;
            match role {
                NodeRole::OnDemand => map.on_demand.push(info),
                NodeRole::Spot => map.spot.push(info),
                NodeRole::Other => (),
            }
        }
        // drain the least loaded on-demand node first
        map.on_demand.sort_by_key(|info| info.requested.cpu);
        // bin pack onto already warm spot nodes, keeping empty ones as spares
        map.spot.sort_by_key(|info| Reverse(info.requested.cpu));
        Ok(map)
    }
}
