//! Decides which pods may be moved off a node and executes node drains

use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use std::time::Duration;
use tracing::{event, instrument, Level};

use crate::error::Error;
use crate::libs::helpers;
use crate::libs::k8s::Pods;

/// Pods annotated with this opt in or out of eviction without a landing spot
pub const SAFE_TO_EVICT_ANNOTATION: &str = "cluster-autoscaler.kubernetes.io/safe-to-evict";

/// Static pods mirrored onto the api server carry this annotation
const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/// Controller kinds that will recreate an evicted pod elsewhere
const REPLICATED_KINDS: [&str; 4] = ["ReplicaSet", "ReplicationController", "StatefulSet", "Job"];

/// Why a pod pins its node against draining
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedReason {
    /// Nothing will recreate this pod if we evict it
    NotReplicated,
    /// A disruption budget matching this pod allows no disruptions
    BudgetExhausted,
}

impl BlockedReason {
    /// Get our reason as a str
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockedReason::NotReplicated => "NotReplicated",
            BlockedReason::BudgetExhausted => "BudgetExhausted",
        }
    }
}

/// A pod that prevents its node from being drained
#[derive(Debug, Clone)]
pub struct BlockingPod {
    /// The pod that is blocking the drain
    pub pod: Pod,
    /// Why this pod blocks the drain
    pub reason: BlockedReason,
}

/// Get the value of the safe to evict annotation if one is set
///
/// # Arguments
///
/// * `pod` - The pod to inspect
pub fn safe_to_evict(pod: &Pod) -> Option<&str> {
    pod.metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(SAFE_TO_EVICT_ANNOTATION))
        .map(String::as_str)
}

/// Check whether a pod has a controller owner of one of the given kinds
fn has_controller_of_kind(pod: &Pod, kinds: &[&str]) -> bool {
    pod.metadata
        .owner_references
        .as_ref()
        .map(|owners| {
            owners
                .iter()
                .any(|owner| owner.controller == Some(true) && kinds.contains(&owner.kind.as_str()))
        })
        .unwrap_or(false)
}

/// Check whether a pod has already run to completion
fn finished(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|status| status.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

/// Check whether a pod is a static mirror pod
fn mirror(pod: &Pod) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .map(|annotations| annotations.contains_key(MIRROR_POD_ANNOTATION))
        .unwrap_or(false)
}

/// Check whether a disruption budget selects a pod
///
/// # Arguments
///
/// * `pdb` - The disruption budget to match
/// * `pod` - The pod to match against
fn pdb_matches(pdb: &PodDisruptionBudget, pod: &Pod) -> bool {
    // budgets only apply within their own namespace
    if pdb.metadata.namespace != pod.metadata.namespace {
        return false;
    }
    let selector = match pdb.spec.as_ref().and_then(|spec| spec.selector.as_ref()) {
        Some(selector) => selector,
        None => return false,
    };
    let empty = Default::default();
    let labels = pod.metadata.labels.as_ref().unwrap_or(&empty);
    if let Some(match_labels) = &selector.match_labels {
        for (key, value) in match_labels {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
    }
    if let Some(exprs) = &selector.match_expressions {
        for expr in exprs {
            let value = labels.get(&expr.key);
            let matched = match expr.operator.as_str() {
                "In" => value
                    .map(|value| {
                        expr.values
                            .as_ref()
                            .map(|values| values.contains(value))
                            .unwrap_or(false)
                    })
                    .unwrap_or(false),
                "NotIn" => value
                    .map(|value| {
                        expr.values
                            .as_ref()
                            .map(|values| !values.contains(value))
                            .unwrap_or(true)
                    })
                    .unwrap_or(true),
                "Exists" => value.is_some(),
                "DoesNotExist" => value.is_none(),
                _ => false,
            };
            if !matched {
                return false;
            }
        }
    }
    true
}

/// Check whether any matching disruption budget forbids evicting this pod
fn budget_blocks(pod: &Pod, pdbs: &[PodDisruptionBudget]) -> bool {
    pdbs.iter().any(|pdb| {
        pdb_matches(pdb, pod)
            && pdb
                .status
                .as_ref()
                .map(|status| status.disruptions_allowed <= 0)
                .unwrap_or(false)
    })
}

/// Split a nodes pods into the movable set and the first blocker found
///
/// Daemon set pods, mirror pods and finished pods are neither movable nor
/// blockers. The movable remainder is always returned so callers that only
/// want a pod count can ignore the blocker.
///
/// # Arguments
///
/// * `pods` - The pods assigned to the node
/// * `pdbs` - All known disruption budgets
/// * `delete_non_replicated` - Whether pods without a controller may be drained
pub fn pods_for_drain(
    pods: &[Pod],
    pdbs: &[PodDisruptionBudget],
    delete_non_replicated: bool,
) -> (Vec<Pod>, Option<BlockingPod>) {
    let mut movable = Vec::with_capacity(pods.len());
    let mut blocker = None;
    for pod in pods {
        if finished(pod) {
            continue;
        }
        // the daemon set controller ignores drains so leave its pods alone
        if has_controller_of_kind(pod, &["DaemonSet"]) {
            event!(
                Level::DEBUG,
                pod = helpers::pod_id(pod),
                msg = "Ignoring pod which is controlled by DaemonSet"
            );
            continue;
        }
        // static mirror pods cannot be controlled
        if mirror(pod) {
            event!(
                Level::DEBUG,
                pod = helpers::pod_id(pod),
                msg = "Ignoring static mirror pod"
            );
            continue;
        }
        let replicated = has_controller_of_kind(pod, &REPLICATED_KINDS);
        let opted_in = safe_to_evict(pod) == Some("true");
        if !replicated && !opted_in && !delete_non_replicated {
            if blocker.is_none() {
                blocker = Some(BlockingPod {
                    pod: pod.clone(),
                    reason: BlockedReason::NotReplicated,
                });
            }
            continue;
        }
        if budget_blocks(pod, pdbs) {
            if blocker.is_none() {
                blocker = Some(BlockingPod {
                    pod: pod.clone(),
                    reason: BlockedReason::BudgetExhausted,
                });
            }
            continue;
        }
        movable.push(pod.clone());
    }
    (movable, blocker)
}

/// Evict every movable pod from a node and wait for the evictions to land
///
/// Evictions are issued in sequence. Already evicted pods are not rolled
/// back when a later eviction fails; the orchestrator reschedules them.
///
/// # Arguments
///
/// * `pods` - The pod api wrapper to evict through
/// * `node` - The node being drained
/// * `movable` - The pods to evict
/// * `max_graceful` - The upper bound on pod shutdown grace
/// * `eviction_timeout` - How long to wait on each eviction
#[instrument(
    name = "drain::drain_node",
    skip_all,
    fields(node = node.metadata.name.as_deref().unwrap_or("")),
    err(Debug)
)]
pub async fn drain_node(
    pods: &Pods,
    node: &Node,
    movable: &[Pod],
    max_graceful: Duration,
    eviction_timeout: Duration,
) -> Result<(), Error> {
    // place an eviction on each pod in turn
    for pod in movable {
        pods.evict(pod, max_graceful, eviction_timeout).await?;
    }
    // wait for the evicted pods to actually terminate
    for pod in movable {
        pods.wait_for_deletion(pod, eviction_timeout).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utilities;

    #[test]
    fn replicated_pods_are_movable() {
        let pods = vec![test_utilities::owned_by(
            test_utilities::pod("web", 100, 64),
            "ReplicaSet",
        )];
        let (movable, blocker) = pods_for_drain(&pods, &[], false);
        assert_eq!(movable.len(), 1);
        assert!(blocker.is_none());
    }

    #[test]
    fn daemon_set_pods_are_never_movable() {
        let pods = vec![
            test_utilities::owned_by(test_utilities::pod("logging", 100, 64), "DaemonSet"),
            test_utilities::owned_by(test_utilities::pod("web", 100, 64), "ReplicaSet"),
        ];
        let (movable, blocker) = pods_for_drain(&pods, &[], false);
        let names: Vec<_> = movable
            .iter()
            .map(|pod| pod.metadata.name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["web"]);
        assert!(blocker.is_none());
    }

    #[test]
    fn a_node_with_only_daemon_set_pods_has_nothing_to_move() {
        let pods = vec![
            test_utilities::owned_by(test_utilities::pod("logging", 100, 64), "DaemonSet"),
            test_utilities::owned_by(test_utilities::pod("metrics", 100, 64), "DaemonSet"),
        ];
        let (movable, blocker) = pods_for_drain(&pods, &[], false);
        assert!(movable.is_empty());
        assert!(blocker.is_none());
    }

    #[test]
    fn bare_pods_block_unless_allowed() {
        let pods = vec![test_utilities::pod("oneshot", 100, 64)];
        // blocked by default
        let (movable, blocker) = pods_for_drain(&pods, &[], false);
        assert!(movable.is_empty());
        assert_eq!(blocker.unwrap().reason, BlockedReason::NotReplicated);
        // the toggle permits draining them
        let (movable, blocker) = pods_for_drain(&pods, &[], true);
        assert_eq!(movable.len(), 1);
        assert!(blocker.is_none());
    }

    #[test]
    fn safe_to_evict_opts_a_bare_pod_in() {
        let pods = vec![test_utilities::annotate(
            test_utilities::pod("oneshot", 100, 64),
            SAFE_TO_EVICT_ANNOTATION,
            "true",
        )];
        let (movable, blocker) = pods_for_drain(&pods, &[], false);
        assert_eq!(movable.len(), 1);
        assert!(blocker.is_none());
    }

    #[test]
    fn exhausted_budgets_block_their_pods() {
        let pods = vec![test_utilities::owned_by(
            test_utilities::pod("web", 100, 64),
            "ReplicaSet",
        )];
        let pdbs = vec![test_utilities::pdb("web-pdb", &[("app", "web")], 0)];
        let (movable, blocker) = pods_for_drain(&pods, &pdbs, false);
        assert!(movable.is_empty());
        assert_eq!(blocker.unwrap().reason, BlockedReason::BudgetExhausted);
    }

    #[test]
    fn budgets_with_headroom_do_not_block() {
        let pods = vec![test_utilities::owned_by(
            test_utilities::pod("web", 100, 64),
            "ReplicaSet",
        )];
        let pdbs = vec![test_utilities::pdb("web-pdb", &[("app", "web")], 1)];
        let (movable, blocker) = pods_for_drain(&pods, &pdbs, false);
        assert_eq!(movable.len(), 1);
        assert!(blocker.is_none());
    }

    #[test]
    fn budgets_for_other_pods_are_ignored() {
        let pods = vec![test_utilities::owned_by(
            test_utilities::pod("web", 100, 64),
            "ReplicaSet",
        )];
        let pdbs = vec![test_utilities::pdb("db-pdb", &[("app", "db")], 0)];
        let (movable, blocker) = pods_for_drain(&pods, &pdbs, false);
        assert_eq!(movable.len(), 1);
        assert!(blocker.is_none());
    }

    #[test]
    fn finished_and_mirror_pods_are_skipped() {
        let pods = vec![
            test_utilities::with_phase(test_utilities::pod("done", 100, 64), "Succeeded"),
            test_utilities::annotate(
                test_utilities::pod("static", 100, 64),
                MIRROR_POD_ANNOTATION,
                "checksum",
            ),
        ];
        let (movable, blocker) = pods_for_drain(&pods, &[], false);
        assert!(movable.is_empty());
        assert!(blocker.is_none());
    }
}
