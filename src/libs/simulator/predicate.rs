use k8s_openapi::api::core::v1::{Pod, Taint, Toleration};
use std::fmt;

use crate::libs::helpers;
use crate::libs::simulator::ClusterSnapshot;

/// Why a pod cannot run on a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateFailure {
    /// The node is not in the snapshot
    UnknownNode,
    /// Not enough free cpu on the node
    InsufficientCpu { requested: u64, free: u64 },
    /// Not enough free memory on the node
    InsufficientMemory { requested: u64, free: u64 },
    /// The pods node selector does not match the nodes labels
    NodeSelectorMismatch(String),
    /// The node carries a taint the pod does not tolerate
    UntoleratedTaint(String),
    /// The pods resource requests could not be parsed
    MalformedRequests(String),
}

impl fmt::Display for PredicateFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PredicateFailure::UnknownNode => write!(f, "node not present in snapshot"),
            PredicateFailure::InsufficientCpu { requested, free } => {
                write!(f, "insufficient cpu: requested {requested}m, free {free}m")
            }
            PredicateFailure::InsufficientMemory { requested, free } => {
                write!(f, "insufficient memory: requested {requested}Mi, free {free}Mi")
            }
            PredicateFailure::NodeSelectorMismatch(key) => {
                write!(f, "node selector {key} does not match")
            }
            PredicateFailure::UntoleratedTaint(key) => {
                write!(f, "taint {key} is not tolerated")
            }
            PredicateFailure::MalformedRequests(msg) => {
                write!(f, "malformed resource requests: {msg}")
            }
        }
    }
}

/// Answers whether a pod could legally run on a node right now
pub trait PredicateChecker {
    /// Check a pod against a node in the snapshot
    ///
    /// # Arguments
    ///
    /// * `snapshot` - The snapshot holding current and speculative placements
    /// * `pod` - The pod to place
    /// * `node_name` - The node to check
    fn check_predicates(
        &self,
        snapshot: &ClusterSnapshot,
        pod: &Pod,
        node_name: &str,
    ) -> Result<(), PredicateFailure>;
}

/// The standard predicate set: taints, node selector and resource fit
#[derive(Debug, Default, Clone, Copy)]
pub struct SchedulingPredicates;

impl SchedulingPredicates {
    /// Check whether any toleration matches a taint
    ///
    /// # Arguments
    ///
    /// * `tolerations` - The pods tolerations
    /// * `taint` - The taint to match
    fn tolerates(tolerations: &[Toleration], taint: &Taint) -> bool {
        tolerations.iter().any(|toleration| {
            // an empty effect matches every effect
            if let Some(effect) = toleration.effect.as_deref() {
                if !effect.is_empty() && effect != taint.effect {
                    return false;
                }
            }
            match toleration.key.as_deref() {
                // an empty key with Exists matches every taint
                None | Some("") => toleration.operator.as_deref() == Some("Exists"),
                Some(key) => {
                    if key != taint.key {
                        return false;
                    }
                    match toleration.operator.as_deref() {
                        Some("Exists") => true,
                        // Equal is the default operator
                        _ => {
                            toleration.value.as_deref().unwrap_or("")
                                == taint.value.as_deref().unwrap_or("")
                        }
                    }
                }
            }
        })
    }
}

impl PredicateChecker for SchedulingPredicates {
    fn check_predicates(
        &self,
        snapshot: &ClusterSnapshot,
        pod: &Pod,
        node_name: &str,
    ) -> Result<(), PredicateFailure> {
        let node = snapshot.get(node_name).ok_or(PredicateFailure::UnknownNode)?;
        // taints with a scheduling effect must be tolerated
        let empty = Vec::default();
        let tolerations = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.tolerations.as_ref())
            .unwrap_or(&empty);
        for taint in &node.taints {
            if taint.effect == "NoSchedule" || taint.effect == "NoExecute" {
                if !Self::tolerates(tolerations, taint) {
                    return Err(PredicateFailure::UntoleratedTaint(taint.key.clone()));
                }
            }
        }
        // the pods node selector must be a subset of the nodes labels
        if let Some(selector) = pod.spec.as_ref().and_then(|spec| spec.node_selector.as_ref()) {
            for (key, value) in selector {
                if node.labels.get(key) != Some(value) {
                    return Err(PredicateFailure::NodeSelectorMismatch(key.clone()));
                }
            }
        }
        // the request must fit in the remaining capacity
        let requests = helpers::pod_requests(pod)
            .map_err(|err| PredicateFailure::MalformedRequests(err.to_string()))?;
        let free = node.free();
        if requests.cpu > free.cpu {
            return Err(PredicateFailure::InsufficientCpu {
                requested: requests.cpu,
                free: free.cpu,
            });
        }
        if requests.memory > free.memory {
            return Err(PredicateFailure::InsufficientMemory {
                requested: requests.memory,
                free: free.memory,
            });
        }
        Ok(())
    }
}
